// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::blocks::{ChainEpoch, Tipset};

/// Current stage of a sync job.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncStage {
    /// Syncing headers from the target tipset back to the local chain.
    #[default]
    #[serde(rename = "header sync")]
    Headers,
    /// Persisting fetched headers.
    #[serde(rename = "persisting headers")]
    PersistHeaders,
    /// Syncing messages and performing state transitions.
    #[serde(rename = "message sync")]
    Messages,
    /// Sync complete; following the chain.
    #[serde(rename = "complete")]
    Complete,
    /// An error occurred while syncing.
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStage::Headers => write!(f, "header sync"),
            SyncStage::PersistHeaders => write!(f, "persisting headers"),
            SyncStage::Messages => write!(f, "message sync"),
            SyncStage::Complete => write!(f, "complete"),
            SyncStage::Error => write!(f, "error"),
        }
    }
}

/// State of a single sync job, written by the sync function through its
/// progress handle and read through snapshots by inspection APIs.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SyncState {
    base: Option<Arc<Tipset>>,
    target: Option<Arc<Tipset>>,

    stage: SyncStage,
    epoch: ChainEpoch,

    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    message: String,
}

impl SyncState {
    /// Initializes the syncing state with base and target tipsets and sets
    /// the start time.
    pub fn init(&mut self, base: Arc<Tipset>, target: Arc<Tipset>) {
        *self = Self {
            base: Some(base),
            target: Some(target),
            start: Some(Utc::now()),
            ..Default::default()
        };
    }

    pub fn stage(&self) -> SyncStage {
        self.stage
    }

    pub fn base(&self) -> Option<&Arc<Tipset>> {
        self.base.as_ref()
    }

    pub fn target(&self) -> Option<&Arc<Tipset>> {
        self.target.as_ref()
    }

    pub fn epoch(&self) -> ChainEpoch {
        self.epoch
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.start
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.end
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Sets the stage of the sync. Reaching [`SyncStage::Complete`] stamps
    /// the end time.
    pub fn set_stage(&mut self, stage: SyncStage) {
        if let SyncStage::Complete = stage {
            self.end = Some(Utc::now());
        }
        self.stage = stage;
    }

    /// Sets the current epoch the sync has advanced to.
    pub fn set_epoch(&mut self, epoch: ChainEpoch) {
        self.epoch = epoch;
    }

    /// Records a sync failure and stamps the end time.
    pub fn error(&mut self, err: String) {
        self.message = err;
        self.stage = SyncStage::Error;
        self.end = Some(Utc::now());
    }
}

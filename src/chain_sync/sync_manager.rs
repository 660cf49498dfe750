// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;
use std::time::Instant;

use ahash::HashMap;
use async_trait::async_trait;
use libp2p_identity::PeerId;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::blocks::Tipset;

use super::bucket::SyncBucketSet;
use super::sync_state::SyncState;
use super::{SyncConfig, SyncError};

/// Handle through which a sync job publishes its progress. Shared between
/// the running [`TipsetSyncer`] invocation and [`SyncManager::state`]
/// readers.
pub type SyncStateHandle = Arc<RwLock<SyncState>>;

/// The fetch-and-validate pipeline invoked for every sync target.
#[async_trait]
pub trait TipsetSyncer: Send + Sync + 'static {
    /// Brings the local chain up to `target`, publishing progress through
    /// `state`. A failure is reported to the scheduler and logged; it does
    /// not abort the manager, and heavier extensions of the same chain are
    /// still attempted.
    async fn sync_tipset(&self, state: SyncStateHandle, target: Arc<Tipset>)
        -> Result<(), SyncError>;
}

/// A chain head report received from a peer.
struct PeerHead {
    peer: PeerId,
    tipset: Arc<Tipset>,
}

/// Completion notice posted by a sync worker.
struct WorkerStatus {
    id: u64,
    result: Result<(), SyncError>,
}

#[derive(Clone)]
struct WorkerState {
    id: u64,
    target: Arc<Tipset>,
    state: SyncStateHandle,
}

type WorkerTable = Arc<Mutex<HashMap<u64, WorkerState>>>;

/// Manages the chain synchronization process, both at bootstrap time and
/// during ongoing operation.
///
/// The manager receives candidate chain heads in the form of tipsets from
/// peers and schedules them onto sync workers, deduplicating processing for
/// already-active syncs. A single scheduler task owns all scheduling state;
/// the worker table is additionally shared with [`SyncManager::state`]
/// readers under a mutex.
pub struct SyncManager<S> {
    syncer: Arc<S>,
    config: SyncConfig,

    work_tx: flume::Sender<PeerHead>,
    work_rx: flume::Receiver<PeerHead>,
    status_tx: flume::Sender<WorkerStatus>,
    status_rx: flume::Receiver<WorkerStatus>,

    active: WorkerTable,
    shutdown: CancellationToken,
}

impl<S: TipsetSyncer> SyncManager<S> {
    pub fn new(syncer: Arc<S>, config: SyncConfig) -> Self {
        // Rendezvous channels: a report is accepted only when the scheduler
        // is ready to process it, keeping backpressure on the callers.
        let (work_tx, work_rx) = flume::bounded(0);
        let (status_tx, status_rx) = flume::bounded(0);

        Self {
            syncer,
            config,
            work_tx,
            work_rx,
            status_tx,
            status_rx,
            active: Arc::new(Mutex::new(HashMap::default())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Launches the scheduler task.
    pub fn start(&self) {
        let scheduler = Scheduler {
            syncer: Arc::clone(&self.syncer),
            status_tx: self.status_tx.clone(),
            active: Arc::clone(&self.active),
            shutdown: self.shutdown.clone(),
            bootstrap_peer_threshold: self.config.bootstrap_peer_threshold,
            next_worker_id: 0,
            heads: Some(HashMap::default()),
            pending: SyncBucketSet::default(),
        };
        tokio::spawn(scheduler.run(self.work_rx.clone(), self.status_rx.clone()));
    }

    /// Stops the manager. Idempotent; in-flight workers terminate without
    /// further effect on manager state.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Informs the manager that the given peer reported the given tipset as
    /// its chain head. Suspends until the scheduler accepts the report or
    /// the manager is stopped; dropping the returned future withdraws the
    /// report.
    pub async fn set_peer_head(&self, peer: PeerId, tipset: Arc<Tipset>) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = self.work_tx.send_async(PeerHead { peer, tipset }) => {}
        }
    }

    /// Retrieves progress snapshots of the running sync workers, ordered by
    /// ascending worker id. Never blocks on the scheduler.
    pub fn state(&self) -> Vec<SyncState> {
        let mut workers: Vec<WorkerState> = self.active.lock().values().cloned().collect();
        workers.sort_by_key(|ws| ws.id);
        workers.iter().map(|ws| ws.state.read().clone()).collect()
    }
}

/// The scheduler event loop. Exactly one event is processed at a time:
/// either an incoming peer head or a worker completion. All scheduling state
/// apart from the shared worker table is owned here and mutated without
/// locking.
struct Scheduler<S> {
    syncer: Arc<S>,
    status_tx: flume::Sender<WorkerStatus>,
    active: WorkerTable,
    shutdown: CancellationToken,
    bootstrap_peer_threshold: usize,

    /// Id handed to the most recently spawned worker; zero until the first
    /// worker is spawned.
    next_worker_id: u64,
    /// Peer head cache used to pick the initial sync target. `Some` exactly
    /// while bootstrapping; taken, and thereafter inaccessible, once enough
    /// peers have reported.
    heads: Option<HashMap<PeerId, Arc<Tipset>>>,
    /// Tipsets queued behind active or deferred work, grouped by chain.
    pending: SyncBucketSet,
}

impl<S: TipsetSyncer> Scheduler<S> {
    async fn run(
        mut self,
        work_rx: flume::Receiver<PeerHead>,
        status_rx: flume::Receiver<WorkerStatus>,
    ) {
        let shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                head = work_rx.recv_async() => match head {
                    Ok(head) => self.handle_peer_head(head),
                    Err(_) => return,
                },
                status = status_rx.recv_async() => match status {
                    Ok(status) => self.handle_worker_status(status),
                    Err(_) => return,
                },
            }
        }
    }

    fn handle_peer_head(&mut self, head: PeerHead) {
        debug!("new peer head: {} {}", head.peer, head.tipset);

        if let Some(mut heads) = self.heads.take() {
            // Still bootstrapping; track the head until enough peers have
            // reported to pick a trustworthy starting point.
            heads.insert(head.peer, head.tipset);
            if heads.len() < self.bootstrap_peer_threshold {
                self.heads = Some(heads);
                return;
            }

            match self.select_initial_sync_target(heads) {
                Some(target) => {
                    info!("selected initial sync target: {}", target);
                    self.spawn_worker(target);
                }
                None => {
                    error!("failed to select initial sync target");
                    self.heads = Some(HashMap::default());
                }
            }
            return;
        }

        if let Some(target) = self.add_sync_target(head.tipset) {
            info!("selected sync target: {}", target);
            self.spawn_worker(target);
        }
    }

    fn handle_worker_status(&mut self, status: WorkerStatus) {
        debug!("worker {} done; result: {:?}", status.id, status.result);

        let Some(ws) = self.active.lock().remove(&status.id) else {
            warn!("received status for unknown worker {}", status.id);
            return;
        };

        if let Err(e) = status.result {
            // The failed target may still have heavier pending extensions
            // worth attempting, so chain continuation still runs.
            error!("error during sync in {}: {}", ws.target, e);
        }

        if let Some(target) = self.select_sync_target(&ws.target) {
            info!("selected sync target: {}", target);
            self.spawn_worker(target);
        }
    }

    /// Selects the initial sync target by clustering the tracked peer heads;
    /// only called once, when the bootstrap quorum is reached.
    fn select_initial_sync_target(
        &self,
        heads: HashMap<PeerId, Arc<Tipset>>,
    ) -> Option<Arc<Tipset>> {
        let mut peer_heads: Vec<Arc<Tipset>> = heads.into_values().collect();
        // Insert lower heads first so early parents establish the buckets
        // their extensions then coalesce into.
        peer_heads.sort_by_key(|ts| ts.epoch());

        let mut buckets = SyncBucketSet::default();
        for ts in peer_heads {
            buckets.insert(ts);
        }

        if buckets.buckets().len() > 1 {
            warn!("caution, multiple distinct chains seen during head selection");
        }

        buckets.heaviest()
    }

    /// Adds a tipset to the potential sync targets. Returns the tipset if it
    /// is work to be started right away: either a restart on a quiescent
    /// node or a fork heavy enough to chase.
    fn add_sync_target(&mut self, tipset: Arc<Tipset>) -> Option<Arc<Tipset>> {
        let active = self.active.lock();

        // No workers running: the node has finished syncing and was waiting
        // for the next head.
        if active.is_empty() {
            return Some(tipset);
        }

        for ws in active.values() {
            if tipset == ws.target {
                // already syncing this exact target
                return None;
            }
            if tipset.parents() == ws.target.key() {
                // extension of an active sync; schedule it next
                self.pending.insert(tipset);
                return None;
            }
        }

        if self.pending.related_to_any(&tipset) {
            self.pending.insert(tipset);
            debug!("pending sync targets: {}", self.pending);
            return None;
        }

        // Unrelated to all known work: a candidate fork. Chase it only if it
        // is taller than everything active and pending; an unvalidated
        // fork's weight claim cannot be trusted, so height is the admission
        // test.
        if active.values().any(|ws| ws.target.epoch() > tipset.epoch()) {
            return None;
        }
        if let Some(heaviest) = self.pending.heaviest() {
            if heaviest.epoch() > tipset.epoch() {
                return None;
            }
        }

        Some(tipset)
    }

    /// Selects the next sync target after a worker finished with `done`.
    /// Returns the heaviest pending tipset related to the finished target,
    /// unless a taller chain is already being worked.
    fn select_sync_target(&mut self, done: &Tipset) -> Option<Arc<Tipset>> {
        let related = self.pending.pop_related(done)?;
        debug!("popped bucket related to {}: {}", done, related);
        let heaviest = related.heaviest_tipset()?;

        if self
            .active
            .lock()
            .values()
            .any(|ws| ws.target.epoch() > heaviest.epoch())
        {
            return None;
        }

        Some(heaviest)
    }

    fn spawn_worker(&mut self, target: Arc<Tipset>) {
        self.next_worker_id += 1;
        let id = self.next_worker_id;
        let state: SyncStateHandle = Arc::new(RwLock::new(SyncState::default()));

        self.active.lock().insert(
            id,
            WorkerState {
                id,
                target: Arc::clone(&target),
                state: Arc::clone(&state),
            },
        );

        let syncer = Arc::clone(&self.syncer);
        let status_tx = self.status_tx.clone();
        let shutdown = self.shutdown.clone();
        // The status task runs only after the worker is registered above, so
        // a completion is never observed for an unknown worker.
        tokio::spawn(async move {
            debug!("worker {} syncing in {}", id, target);
            let start = Instant::now();

            let result = tokio::select! {
                _ = shutdown.cancelled() => return,
                result = syncer.sync_tipset(Arc::clone(&state), Arc::clone(&target)) => result,
            };
            debug!("worker {} done; took {:?}", id, start.elapsed());

            if let Err(e) = &result {
                state.write().error(e.to_string());
            }

            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = status_tx.send_async(WorkerStatus { id, result }) => {}
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ahash::HashSet;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::blocks::TipsetKey;
    use crate::chain_sync::SyncStage;
    use crate::test_utils::{child_tipset, construct_tipset, template_key};

    /// Sync stub that records its targets and parks each job until the test
    /// releases it. Jobs targeting a registered failing tipset return an
    /// error when released.
    struct StubSyncer {
        gate: Semaphore,
        synced: Mutex<Vec<Arc<Tipset>>>,
        failing: Mutex<HashSet<TipsetKey>>,
    }

    impl StubSyncer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                synced: Mutex::new(Vec::new()),
                failing: Mutex::new(HashSet::default()),
            })
        }

        fn fail_on(&self, ts: &Tipset) {
            self.failing.lock().insert(ts.key().clone());
        }

        /// Lets one parked sync job run to completion.
        fn finish_one(&self) {
            self.gate.add_permits(1);
        }

        fn synced(&self) -> Vec<Arc<Tipset>> {
            self.synced.lock().clone()
        }
    }

    #[async_trait]
    impl TipsetSyncer for StubSyncer {
        async fn sync_tipset(
            &self,
            state: SyncStateHandle,
            target: Arc<Tipset>,
        ) -> Result<(), SyncError> {
            state
                .write()
                .init(Arc::clone(&target), Arc::clone(&target));
            self.synced.lock().push(Arc::clone(&target));

            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }

            if self.failing.lock().contains(target.key()) {
                return Err(SyncError::Validation("sync failed".to_string()));
            }
            state.write().set_stage(SyncStage::Complete);
            Ok(())
        }
    }

    fn manager(syncer: &Arc<StubSyncer>) -> SyncManager<StubSyncer> {
        let manager = SyncManager::new(Arc::clone(syncer), SyncConfig::default());
        manager.start();
        manager
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    /// Bootstraps a manager with two unrelated peer heads; the second one is
    /// taller and heavier and becomes the initial sync target.
    async fn bootstrap(
        syncer: &Arc<StubSyncer>,
        manager: &SyncManager<StubSyncer>,
    ) -> Arc<Tipset> {
        let ts_a = construct_tipset(template_key(b"bootstrap chain a"), 10, 100);
        let ts_b = construct_tipset(template_key(b"bootstrap chain b"), 12, 120);

        manager.set_peer_head(PeerId::random(), ts_a).await;
        manager.set_peer_head(PeerId::random(), Arc::clone(&ts_b)).await;

        let expected = Arc::clone(&ts_b);
        let syncer = Arc::clone(syncer);
        wait_until(move || syncer.synced() == vec![Arc::clone(&expected)]).await;
        ts_b
    }

    #[tokio::test]
    async fn bootstrap_on_two_peers() {
        let syncer = StubSyncer::new();
        let manager = manager(&syncer);
        let target = bootstrap(&syncer, &manager).await;

        let state = manager.state();
        assert_eq!(state.len(), 1);
        assert_eq!(state[0].target(), Some(&target));
    }

    #[tokio::test]
    async fn single_peer_does_not_bootstrap() {
        let syncer = StubSyncer::new();
        let manager = manager(&syncer);

        let ts = construct_tipset(template_key(b"lonely peer"), 10, 100);
        manager.set_peer_head(PeerId::random(), ts).await;
        settle().await;

        assert!(manager.state().is_empty());
        assert!(syncer.synced().is_empty());
    }

    #[tokio::test]
    async fn flapping_peer_does_not_fill_quorum() {
        let syncer = StubSyncer::new();
        let manager = manager(&syncer);

        let peer = PeerId::random();
        let ts = construct_tipset(template_key(b"flapping peer"), 10, 100);
        let taller = child_tipset(&ts, 110);
        manager.set_peer_head(peer, ts).await;
        manager.set_peer_head(peer, taller).await;
        settle().await;

        assert!(manager.state().is_empty());
    }

    #[tokio::test]
    async fn chain_extension_waits_for_active_sync() {
        let syncer = StubSyncer::new();
        let manager = manager(&syncer);
        let target = bootstrap(&syncer, &manager).await;

        // A direct child of the active target queues up instead of spawning.
        let child = child_tipset(&target, 130);
        manager
            .set_peer_head(PeerId::random(), Arc::clone(&child))
            .await;
        settle().await;
        assert_eq!(manager.state().len(), 1);
        assert_eq!(syncer.synced().len(), 1);

        // Once the active sync completes, the extension gets its worker.
        syncer.finish_one();
        {
            let syncer = Arc::clone(&syncer);
            let child = Arc::clone(&child);
            wait_until(move || syncer.synced().last() == Some(&child)).await;
        }
        let state = manager.state();
        assert_eq!(state.len(), 1);
        assert_eq!(state[0].target(), Some(&child));
    }

    #[tokio::test]
    async fn duplicate_report_is_absorbed() {
        let syncer = StubSyncer::new();
        let manager = manager(&syncer);
        let target = bootstrap(&syncer, &manager).await;

        manager.set_peer_head(PeerId::random(), target).await;
        settle().await;

        assert_eq!(manager.state().len(), 1);
        assert_eq!(syncer.synced().len(), 1);
    }

    #[tokio::test]
    async fn dominated_fork_is_discarded() {
        let syncer = StubSyncer::new();
        let manager = manager(&syncer);
        bootstrap(&syncer, &manager).await;

        let fork = construct_tipset(template_key(b"short fork"), 8, 300);
        manager.set_peer_head(PeerId::random(), fork).await;
        settle().await;

        assert_eq!(manager.state().len(), 1);
        assert_eq!(syncer.synced().len(), 1);
    }

    #[tokio::test]
    async fn taller_unrelated_fork_gets_its_own_worker() {
        let syncer = StubSyncer::new();
        let manager = manager(&syncer);
        let first = bootstrap(&syncer, &manager).await;

        let fork = construct_tipset(template_key(b"tall fork"), 20, 90);
        manager
            .set_peer_head(PeerId::random(), Arc::clone(&fork))
            .await;
        {
            let syncer = Arc::clone(&syncer);
            wait_until(move || syncer.synced().len() == 2).await;
        }

        let state = manager.state();
        assert_eq!(state.len(), 2);
        // Snapshots come back ordered by worker id.
        assert_eq!(state[0].target(), Some(&first));
        assert_eq!(state[1].target(), Some(&fork));
    }

    #[tokio::test]
    async fn failed_sync_still_continues_the_chain() {
        let syncer = StubSyncer::new();
        let manager = manager(&syncer);
        let target = bootstrap(&syncer, &manager).await;
        syncer.fail_on(&target);

        let child = child_tipset(&target, 130);
        manager
            .set_peer_head(PeerId::random(), Arc::clone(&child))
            .await;
        settle().await;

        syncer.finish_one();
        {
            let syncer = Arc::clone(&syncer);
            let child = Arc::clone(&child);
            wait_until(move || syncer.synced().last() == Some(&child)).await;
        }
    }

    #[tokio::test]
    async fn restart_after_quiescence() {
        let syncer = StubSyncer::new();
        let manager = manager(&syncer);
        let target = bootstrap(&syncer, &manager).await;

        syncer.finish_one();
        {
            let manager_active = manager.active.clone();
            wait_until(move || manager_active.lock().is_empty()).await;
        }

        // With no active workers, any fresh head is immediate work, even a
        // shorter unrelated one.
        let fresh = construct_tipset(template_key(b"fresh chain"), 5, 50);
        manager
            .set_peer_head(PeerId::random(), Arc::clone(&fresh))
            .await;
        {
            let syncer = Arc::clone(&syncer);
            wait_until(move || syncer.synced().len() == 2).await;
        }
        assert_ne!(fresh, target);
        assert_eq!(syncer.synced().last(), Some(&fresh));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_unblocks_reports() {
        let syncer = StubSyncer::new();
        let manager = manager(&syncer);

        manager.stop();
        manager.stop();

        // Reports after stop return immediately instead of blocking on the
        // scheduler, which has exited.
        let ts = construct_tipset(template_key(b"post stop"), 1, 1);
        manager.set_peer_head(PeerId::random(), ts).await;
        assert!(manager.state().is_empty());
    }
}

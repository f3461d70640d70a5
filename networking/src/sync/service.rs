/// Peer synchronization service.
///
/// `PeerSync` owns a single dispatch loop. Every state-changing decision
/// (which peer to sync from, what to fetch next, when a peer has stalled) is
/// made on that loop, so decisions never race. Network requests run as
/// background tasks; their failures come back to the loop as peer updates.
///
/// Producers (`on_peer_connected`, `get_blocks`, ...) enqueue a
/// [`SyncMessage`] and return immediately. After `stop` they are no-ops.
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chain::{Chain, TxMemPool};
use containers::{GraphState, Hash, Inventory};
use metrics::SharedMetrics;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use super::{
    config::SyncConfig,
    error::SyncError,
    messages::{PauseHandle, SyncMessage},
    network::SyncNetwork,
    orphans::{plan_fetch, FetchPlan},
    peer_selection::best_peer,
    stall::{StallMonitor, StallVerdict},
    states::Lifecycle,
};
use crate::peers::{Peer, PeerRegistry};
use crate::time_source::MedianTime;
use crate::types::PeerId;

/// State owned by the dispatch loop.
#[derive(Debug, Default)]
struct HandlerState {
    stall: StallMonitor,
}

pub struct PeerSync<N: SyncNetwork> {
    config: SyncConfig,
    pub(super) chain: Arc<dyn Chain>,
    pub(super) mempool: Arc<dyn TxMemPool>,
    pub(super) peers: Arc<dyn PeerRegistry>,
    pub(super) network: Arc<N>,
    time_source: Arc<MedianTime>,
    pub(super) metrics: Option<SharedMetrics>,

    sync_peer: RwLock<Option<PeerId>>,
    /// Graph state the node is syncing towards. Set together with `sync_peer`.
    sync_target: RwLock<Option<GraphState>>,
    /// Written only by the dispatch loop.
    long_sync_mode: AtomicBool,

    lifecycle: Mutex<Lifecycle>,
    msg_tx: mpsc::UnboundedSender<SyncMessage>,
    msg_rx: Mutex<Option<mpsc::UnboundedReceiver<SyncMessage>>>,
    quit: CancellationToken,
    tasks: TaskTracker,
    handler: Mutex<Option<JoinHandle<()>>>,
}

impl<N: SyncNetwork> PeerSync<N> {
    pub fn new(
        config: SyncConfig,
        chain: Arc<dyn Chain>,
        mempool: Arc<dyn TxMemPool>,
        peers: Arc<dyn PeerRegistry>,
        network: Arc<N>,
    ) -> Self {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();

        Self {
            config: config.sanitized(),
            chain,
            mempool,
            peers,
            network,
            time_source: Arc::new(MedianTime::new()),
            metrics: None,
            sync_peer: RwLock::new(None),
            sync_target: RwLock::new(None),
            long_sync_mode: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle::Created),
            msg_tx,
            msg_rx: Mutex::new(Some(msg_rx)),
            quit: CancellationToken::new(),
            tasks: TaskTracker::new(),
            handler: Mutex::new(None),
        }
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_time_source(mut self, time_source: Arc<MedianTime>) -> Self {
        self.time_source = time_source;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn time_source(&self) -> &Arc<MedianTime> {
        &self.time_source
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock()
    }

    pub(super) fn is_shutting_down(&self) -> bool {
        self.lifecycle() == Lifecycle::Shutdown
    }

    /// Spawn the dispatch loop. Only the first call has an effect.
    pub fn start(self: &Arc<Self>) {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.can_transition_to(Lifecycle::Started) {
            debug!(state = ?*lifecycle, "Peer sync already started");
            return;
        }
        let Some(inbox) = self.msg_rx.lock().take() else {
            return;
        };
        *lifecycle = Lifecycle::Started;

        info!(
            stall_sample_interval = ?self.config.stall_sample_interval(),
            "Starting peer sync"
        );
        let handle = tokio::spawn(self.clone().run(inbox));
        *self.handler.lock() = Some(handle);
    }

    /// Stop the dispatch loop and wait for it and every background request
    /// to finish. Only the first call does the work.
    pub async fn stop(&self) {
        let handle = {
            let mut lifecycle = self.lifecycle.lock();
            if !lifecycle.can_transition_to(Lifecycle::Shutdown) {
                warn!("Peer sync is already in the process of shutting down");
                return;
            }
            *lifecycle = Lifecycle::Shutdown;
            self.handler.lock().take()
        };

        info!("Peer sync shutting down");
        self.quit.cancel();

        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(%err, "Peer sync handler exited abnormally");
            }
        }

        self.tasks.close();
        self.tasks.wait().await;
        debug!("Peer sync stopped");
    }

    async fn run(self: Arc<Self>, mut inbox: mpsc::UnboundedReceiver<SyncMessage>) {
        let period = self.config.stall_sample_interval();
        let mut stall_ticker = time::interval_at(Instant::now() + period, period);
        stall_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut state = HandlerState::default();

        loop {
            tokio::select! {
                biased;

                _ = self.quit.cancelled() => break,

                Some(msg) = inbox.recv() => self.dispatch(msg, &mut state).await,

                _ = stall_ticker.tick() => self.handle_stall_sample(&mut state),
            }
        }

        // Pending messages are dropped; this also releases any pause waiter.
        inbox.close();
        let mut dropped = 0usize;
        while inbox.try_recv().is_ok() {
            dropped += 1;
        }
        debug!(dropped, "Peer sync handler done");
    }

    async fn dispatch(self: &Arc<Self>, msg: SyncMessage, state: &mut HandlerState) {
        trace!(%msg, "Dispatching sync message");
        if let Some(metrics) = &self.metrics {
            metrics.inc_sync_messages(msg.kind());
        }

        match msg {
            SyncMessage::Connected(peer) => self.on_connected(peer, state),
            SyncMessage::Disconnected(peer) => self.on_disconnected(&peer, state),
            SyncMessage::GetBlocks { peer, blocks } => self.process_get_blocks(peer, blocks),
            SyncMessage::GetBlockDatas { peer, blocks } => {
                self.process_get_block_datas(peer, blocks)
            }
            SyncMessage::GetTxs { peer, txs } => self.process_get_txs(peer, txs),
            SyncMessage::UpdateGraphState(peer) => self.process_update_graph_state(peer),
            SyncMessage::SyncDagBlocks(peer) => self.process_sync_dag_blocks(peer),
            SyncMessage::PeerUpdate { peer, orphan } => {
                self.on_peer_update(peer.as_ref(), orphan, state)
            }
            SyncMessage::Pause { paused, resume } => self.on_pause(paused, resume).await,
            SyncMessage::SyncQnr { peer, qnr } => self.process_sync_qnr(peer, qnr),
            SyncMessage::GetData { peer, inventory } => self.on_get_data(peer, inventory),
            SyncMessage::Unknown { command } => {
                warn!(command, "Invalid message type in task handler");
            }
        }
    }

    // Producers

    /// Enqueue `msg` for the dispatch loop. No-op after shutdown.
    pub fn send(&self, msg: SyncMessage) {
        if self.is_shutting_down() {
            trace!(%msg, "Peer sync shutting down, dropping message");
            return;
        }
        if let Err(err) = self.msg_tx.send(msg) {
            debug!(msg = %err.0, "Peer sync inbox closed");
        }
    }

    pub fn on_peer_connected(&self, peer: PeerId) {
        self.send(SyncMessage::Connected(peer));
    }

    pub fn on_peer_disconnected(&self, peer: PeerId) {
        self.send(SyncMessage::Disconnected(peer));
    }

    /// Re-evaluate the sync peer. `orphan` forces an orphan pool refresh
    /// before the next fetch decision.
    pub fn peer_update(&self, peer: Option<PeerId>, orphan: bool) {
        self.send(SyncMessage::PeerUpdate { peer, orphan });
    }

    pub fn get_blocks(&self, peer: PeerId, blocks: Vec<Hash>) {
        self.send(SyncMessage::GetBlocks { peer, blocks });
    }

    pub fn get_block_datas(&self, peer: PeerId, blocks: Vec<Hash>) {
        self.send(SyncMessage::GetBlockDatas { peer, blocks });
    }

    pub fn get_txs(&self, peer: PeerId, txs: Vec<Hash>) {
        self.send(SyncMessage::GetTxs { peer, txs });
    }

    pub fn update_graph_state(&self, peer: PeerId) {
        self.send(SyncMessage::UpdateGraphState(peer));
    }

    pub fn sync_dag_blocks(&self, peer: PeerId) {
        self.send(SyncMessage::SyncDagBlocks(peer));
    }

    pub fn sync_qnr(&self, peer: PeerId, qnr: String) {
        self.send(SyncMessage::SyncQnr { peer, qnr });
    }

    pub fn get_data(&self, peer: PeerId, inventory: Inventory) {
        self.send(SyncMessage::GetData { peer, inventory });
    }

    /// Park the dispatch loop. Returns once the loop is parked; it stays
    /// parked until the handle is resumed or dropped, or until `stop`.
    pub async fn pause(&self) -> Result<PauseHandle, SyncError> {
        if self.lifecycle() != Lifecycle::Started {
            return Err(SyncError::NotRunning);
        }

        let (paused_tx, paused_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel();
        self.send(SyncMessage::Pause {
            paused: paused_tx,
            resume: resume_rx,
        });

        paused_rx.await.map_err(|_| SyncError::NotRunning)?;
        Ok(PauseHandle::new(resume_tx))
    }

    async fn on_pause(&self, paused: oneshot::Sender<()>, resume: oneshot::Receiver<()>) {
        if paused.send(()).is_err() {
            return;
        }
        debug!("Peer sync paused");
        tokio::select! {
            _ = resume => {}
            _ = self.quit.cancelled() => {}
        }
        debug!("Peer sync resumed");
    }

    // Introspection

    pub fn sync_peer_id(&self) -> Option<PeerId> {
        self.sync_peer.read().clone()
    }

    /// The current sync peer, if it is still known to the registry.
    pub fn sync_peer(&self) -> Option<Arc<Peer>> {
        self.sync_peer_id().and_then(|id| self.peers.get(&id))
    }

    pub fn has_sync_peer(&self) -> bool {
        self.sync_peer.read().is_some()
    }

    /// Graph state recorded when the current sync peer was chosen, advanced
    /// as that peer reports progress.
    pub fn sync_target(&self) -> Option<GraphState> {
        self.sync_target.read().clone()
    }

    /// True when the local DAG is current and no sync peer is ahead of it.
    pub fn is_current(&self) -> bool {
        self.chain.is_current() && self.is_complete_for_sync_peer()
    }

    /// True when the local DAG has reached the sync target, or there is none.
    pub fn is_complete_for_sync_peer(&self) -> bool {
        let Some(target) = self.sync_target() else {
            return true;
        };
        !target.is_excellent(&self.chain.best_snapshot().graph_state)
    }

    pub fn is_long_sync_mode(&self) -> bool {
        self.long_sync_mode.load(Ordering::Acquire)
    }

    // Loop handlers

    fn on_connected(self: &Arc<Self>, id: PeerId, state: &mut HandlerState) {
        let Some(peer) = self.peers.get(&id) else {
            debug!(peer = %id, "Connected peer is not in the registry");
            return;
        };
        if let Some(timestamp) = peer.timestamp() {
            self.time_source.add_time_sample(id.as_str(), timestamp);
        }
        self.update_peer_gauge();

        if !self.has_sync_peer() {
            self.start_sync(state);
        }
    }

    fn on_disconnected(self: &Arc<Self>, id: &PeerId, state: &mut HandlerState) {
        self.update_peer_gauge();
        if self.sync_peer_id().as_ref() == Some(id) {
            info!(peer = %id, "Sync peer disconnected");
            self.update_sync_peer(true, "disconnected", state);
        }
    }

    fn on_peer_update(
        self: &Arc<Self>,
        updated: Option<&PeerId>,
        orphan: bool,
        state: &mut HandlerState,
    ) {
        let Some(sync_id) = self.sync_peer_id() else {
            self.update_sync_peer(false, "selected", state);
            return;
        };

        let sync_state = self
            .peers
            .get(&sync_id)
            .filter(|peer| peer.is_active())
            .and_then(|peer| peer.graph_state());
        let Some(sync_state) = sync_state else {
            debug!(peer = %sync_id, "Sync peer is no longer usable");
            self.update_sync_peer(true, "unusable", state);
            return;
        };

        let better = updated
            .filter(|id| **id != sync_id)
            .and_then(|id| self.peers.get(id))
            .filter(|peer| peer.is_active())
            .filter(|peer| {
                peer.graph_state()
                    .is_some_and(|graph_state| graph_state.is_excellent(&sync_state))
            });
        if let Some(peer) = better {
            debug!(peer = %peer.id(), sync_peer = %sync_id, "Found a better sync peer");
            self.update_sync_peer(true, "better_peer", state);
            return;
        }

        self.advance_sync_target(sync_state);

        self.intellect_sync_blocks(orphan);
        if self.is_complete_for_sync_peer() {
            self.set_long_sync_mode(false);
        }
    }

    fn handle_stall_sample(self: &Arc<Self>, state: &mut HandlerState) {
        if self.is_shutting_down() {
            return;
        }
        let local = self.chain.best_snapshot().graph_state;
        let sync_id = self.sync_peer_id();
        let sync_peer = sync_id.as_ref().and_then(|id| self.peers.get(id));
        let peer_state = sync_peer.as_ref().and_then(|peer| peer.graph_state());

        // Nothing left to download from the sync peer.
        if peer_state
            .as_ref()
            .is_some_and(|graph_state| !graph_state.is_excellent(&local))
        {
            state.stall.reset();
            self.set_long_sync_mode(false);
            return;
        }

        let verdict = state
            .stall
            .check(sync_id.as_ref().map(|id| (id, peer_state.as_ref())), &local);
        trace!(?verdict, local = %local, "Sampled sync progress");
        if verdict != StallVerdict::Stalled {
            return;
        }

        if let Some(id) = &sync_id {
            warn!(
                peer = %id,
                interval = ?self.config.stall_sample_interval(),
                "Sync peer stalled, selecting another one"
            );
        }
        if let Some(peer) = sync_peer {
            peer.mark_unhealthy();
        }
        if let Some(metrics) = &self.metrics {
            metrics.inc_sync_stalls();
        }
        self.update_sync_peer(true, "stalled", state);
    }

    fn update_sync_peer(self: &Arc<Self>, force: bool, reason: &'static str, state: &mut HandlerState) {
        debug!(force, reason, "Updating sync peer");
        if force {
            self.set_sync_peer(None, reason);
        }
        self.start_sync(state);
    }

    fn start_sync(self: &Arc<Self>, state: &mut HandlerState) {
        if self.has_sync_peer() {
            return;
        }

        let best = self.chain.best_snapshot();
        let Some(candidate) = best_peer(&best.graph_state, &self.peers.connected_peers()) else {
            trace!(graph_state = %best.graph_state, "No peer is ahead of the local DAG");
            self.set_long_sync_mode(false);
            return;
        };

        let lead = candidate
            .graph_state
            .main_height
            .saturating_sub(best.graph_state.main_height);
        info!(
            peer = %candidate.peer.id(),
            target = %candidate.graph_state,
            local = %best.graph_state,
            lead,
            "Syncing graph state from peer"
        );

        self.set_sync_peer(
            Some((candidate.peer.id().clone(), candidate.graph_state)),
            "selected",
        );
        self.set_long_sync_mode(lead > self.config.long_sync_threshold);
        state.stall.reset();
        self.intellect_sync_blocks(true);
    }

    /// Fetch orphan parents first; otherwise run a DAG sync round.
    fn intellect_sync_blocks(self: &Arc<Self>, refresh: bool) {
        let Some(peer) = self.sync_peer_id() else {
            return;
        };

        let plan = plan_fetch(self.chain.as_ref(), refresh);
        if let Some(metrics) = &self.metrics {
            metrics.set_orphans_total(self.chain.orphans_total() as i64);
        }

        match plan {
            FetchPlan::OrphanParents(parents) => {
                debug!(peer = %peer, parents = parents.len(), "Requesting orphan parents");
                for batch in parents.chunks(self.config.max_blocks_per_request) {
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_orphan_parent_requests();
                    }
                    self.process_get_blocks(peer.clone(), batch.to_vec());
                }
            }
            FetchPlan::DagBlocks => self.process_sync_dag_blocks(peer),
        }
    }

    fn set_sync_peer(&self, selected: Option<(PeerId, GraphState)>, reason: &'static str) {
        let (peer, target) = selected.unzip();
        let mut current = self.sync_peer.write();
        *self.sync_target.write() = target;
        if *current == peer {
            return;
        }
        *current = peer;
        if let Some(metrics) = &self.metrics {
            metrics.set_has_sync_peer(current.is_some());
            if current.is_some() {
                metrics.inc_sync_peer_changes(reason);
            }
        }
    }

    fn advance_sync_target(&self, graph_state: GraphState) {
        let mut target = self.sync_target.write();
        if target
            .as_ref()
            .is_none_or(|current| graph_state.is_excellent(current))
        {
            trace!(target = %graph_state, "Advanced sync target");
            *target = Some(graph_state);
        }
    }

    fn set_long_sync_mode(&self, enabled: bool) {
        if self.long_sync_mode.swap(enabled, Ordering::AcqRel) != enabled {
            info!(enabled, "Long sync mode changed");
            if let Some(metrics) = &self.metrics {
                metrics.set_long_sync_mode(enabled);
            }
        }
    }

    fn update_peer_gauge(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_peers(self.peers.connected_peers().len() as i64);
        }
    }

    // Background requests

    fn process_get_blocks(self: &Arc<Self>, peer: PeerId, blocks: Vec<Hash>) {
        if blocks.is_empty() {
            return;
        }
        let network = self.network.clone();
        let target = peer.clone();
        self.spawn_fetch("get_blocks", peer, async move {
            network.request_blocks(target, blocks).await
        });
    }

    fn process_get_block_datas(self: &Arc<Self>, peer: PeerId, blocks: Vec<Hash>) {
        if blocks.is_empty() {
            return;
        }
        let network = self.network.clone();
        let target = peer.clone();
        self.spawn_fetch("get_block_datas", peer, async move {
            network.request_block_datas(target, blocks).await
        });
    }

    fn process_get_txs(self: &Arc<Self>, peer: PeerId, txs: Vec<Hash>) {
        if txs.is_empty() {
            return;
        }
        let network = self.network.clone();
        let target = peer.clone();
        self.spawn_fetch("get_txs", peer, async move {
            network.request_txs(target, txs).await
        });
    }

    fn process_sync_dag_blocks(self: &Arc<Self>, peer: PeerId) {
        let local = self.chain.best_snapshot().graph_state;
        let network = self.network.clone();
        let target = peer.clone();
        self.spawn_fetch("sync_dag_blocks", peer, async move {
            network.sync_dag_blocks(target, local).await
        });
    }

    fn process_sync_qnr(self: &Arc<Self>, peer: PeerId, qnr: String) {
        let network = self.network.clone();
        let target = peer.clone();
        self.spawn_fetch("sync_qnr", peer, async move {
            network.sync_qnr(target, qnr).await
        });
    }

    fn process_update_graph_state(self: &Arc<Self>, peer: PeerId) {
        let this = self.clone();
        let target = peer.clone();
        self.spawn_fetch("update_graph_state", peer, async move {
            let graph_state = this.network.request_graph_state(target.clone()).await?;
            let Some(peer) = this.peers.get(&target) else {
                return Ok(());
            };
            debug!(peer = %target, graph_state = %graph_state, "Updated peer graph state");
            peer.update_graph_state(graph_state);
            this.peer_update(Some(target), false);
            Ok(())
        });
    }

    /// Run a request in the background. On failure the peer is marked
    /// unhealthy and the loop re-evaluates the sync peer.
    fn spawn_fetch<F>(self: &Arc<Self>, kind: &'static str, peer: PeerId, request: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let this = self.clone();
        self.tasks.spawn(async move {
            if let Err(err) = request.await {
                let err = SyncError::FetchFailed {
                    peer: peer.clone(),
                    kind,
                    reason: format!("{err:#}"),
                };
                warn!(%err, "Peer request failed");
                this.on_fetch_failure(kind, peer);
            }
        });
    }

    fn on_fetch_failure(&self, kind: &'static str, peer: PeerId) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_fetch_failures(kind);
        }
        if let Some(record) = self.peers.get(&peer) {
            record.mark_unhealthy();
        }
        self.peer_update(Some(peer), false);
    }

    /// Push data to a peer in the background. Failures are only logged.
    pub(super) fn spawn_send<F>(&self, kind: &'static str, peer: PeerId, send: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.is_shutting_down() {
            trace!(peer = %peer, kind, "Peer sync shutting down, dropping send");
            return;
        }
        self.tasks.spawn(async move {
            if let Err(err) = send.await {
                debug!(peer = %peer, kind, err = %format!("{err:#}"), "Failed to send to peer");
            }
        });
    }
}

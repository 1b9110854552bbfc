//! Public facade over the peer pool.

use std::{
    net::SocketAddr,
    sync::{Arc, Weak},
    time::Duration,
};

use bitcoin::{Block, BlockHash, Transaction};
use tokio::{
    sync::{Notify, mpsc, oneshot, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, error, info};

use crate::{
    chain::{Chain, FilterType},
    client::{
        driver::StateMachine,
        job::{JobKey, JobQueue, JobSettings, JobWaiter, Task, TaskType},
        oracle::Collaborators,
        peer::{PeerId, PeerSummary, Transport},
        pool::{Command, Pool, PoolChannels, PoolStatus},
    },
    config::{Config, ConfigError},
    hashes::Hash,
};

/// How long `add_peer` waits before checking the running flag again.
const ADD_PEER_POLL: Duration = Duration::from_secs(5);

/// How long `listen` waits for the pool to bind.
const LISTEN_TIMEOUT: Duration = Duration::from_secs(10);

struct Inner {
    config: Arc<Config>,
    collaborators: Collaborators,
    jobs: JobQueue,
    status: Arc<PoolStatus>,
    commands: mpsc::UnboundedSender<Command>,
    driver: StateMachine,
    stopped: watch::Receiver<bool>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.status.stop() {
            let (done, _) = oneshot::channel();
            let _ = self.commands.send(Command::Shutdown { done });
        }
    }
}

/// Handle to a running peer pool.
///
/// Cloning is cheap; the pool shuts down when [`PeerManager::shutdown`] is
/// called or the last clone is dropped.
#[derive(Clone)]
pub struct PeerManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PeerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerManager")
            .field("chain", &self.inner.config.chain)
            .field("running", &self.is_running())
            .field("connected", &self.connected_peer_count())
            .finish()
    }
}

impl PeerManager {
    /// Validates `config` and starts the pool and its driver.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: Config, collaborators: Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (ready, ready_rx) = mpsc::unbounded_channel();
        let (stopped_tx, stopped) = watch::channel(false);
        let status = Arc::new(PoolStatus::new());
        let notify = Arc::new(Notify::new());
        let jobs = JobQueue::new(JobSettings::from(config.as_ref()), ready);

        Pool::new(
            config.clone(),
            collaborators.clone(),
            jobs.clone(),
            status.clone(),
            notify.clone(),
            commands.downgrade(),
            events,
        )
        .spawn(
            PoolChannels {
                commands: commands_rx,
                events: events_rx,
                ready: ready_rx,
            },
            stopped_tx,
        );
        let driver = StateMachine::spawn(
            commands.clone(),
            status.clone(),
            notify,
            config.heartbeat_interval,
            config.idle_interval,
        );

        info!(
            "Peer manager started for {} (target {} peers)",
            config.chain,
            config.target_peer_count()
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                collaborators,
                jobs,
                status,
                commands,
                driver,
                stopped,
            }),
        })
    }

    /// Whether the manager accepts requests.
    pub fn is_running(&self) -> bool {
        self.inner.status.is_running()
    }

    /// Chain this manager connects to.
    pub fn chain(&self) -> Chain {
        self.inner.config.chain
    }

    /// Configuration in effect.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Connects to `addr`. Returns once the handshake completes or fails.
    pub async fn add_peer(&self, addr: SocketAddr) -> bool {
        if !self.is_running() {
            return false;
        }
        let (reply, mut result) = oneshot::channel();
        if !self.post(Command::AddPeer { addr, reply }) {
            return false;
        }
        loop {
            match timeout(ADD_PEER_POLL, &mut result).await {
                Ok(verified) => return verified.unwrap_or(false),
                Err(_) if !self.is_running() => return false,
                Err(_) => debug!("Still waiting for {} to connect", addr),
            }
        }
    }

    /// Accepts inbound peers on `addr`.
    pub async fn listen(&self, addr: SocketAddr) -> bool {
        if !self.is_running() {
            return false;
        }
        let (reply, result) = oneshot::channel();
        if !self.post(Command::Listen { addr, reply }) {
            return false;
        }
        match timeout(LISTEN_TIMEOUT, result).await {
            Ok(bound) => bound.unwrap_or(false),
            Err(_) => {
                error!("Timed out starting listener on {}", addr);
                false
            }
        }
    }

    /// Adopts a connection accepted outside the manager.
    pub async fn add_incoming_peer(&self, stream: impl Transport, addr: SocketAddr) -> bool {
        if !self.is_running() {
            return false;
        }
        let (reply, result) = oneshot::channel();
        let command = Command::IncomingPeer {
            stream: Box::new(stream),
            addr,
            reply: Some(reply),
        };
        self.post(command) && result.await.unwrap_or(false)
    }

    /// Drops the peer with `id`.
    pub async fn disconnect(&self, id: PeerId) -> bool {
        if !self.is_running() {
            return false;
        }
        let (reply, result) = oneshot::channel();
        self.post(Command::Disconnect { id, reply }) && result.await.unwrap_or(false)
    }

    /// Hands `tx` to the mempool and announces it to every verified peer.
    pub async fn broadcast_transaction(&self, tx: Transaction) -> bool {
        if !self.has_peers() {
            return false;
        }
        self.inner.collaborators.mempool.submit(&tx);
        drop(self.inner.jobs.dispatch(Task::BroadcastTransaction(Arc::new(tx))).await);
        true
    }

    /// Announces `block` to every verified peer.
    pub async fn broadcast_block(&self, block: Block) -> bool {
        if !self.has_peers() {
            return false;
        }
        drop(self.inner.jobs.dispatch(Task::BroadcastBlock(Arc::new(block))).await);
        true
    }

    /// Queues a download of one block.
    pub async fn request_block(&self, hash: BlockHash) -> bool {
        self.request_blocks(&[hash]).await
    }

    /// Queues a download of each block in `hashes`.
    pub async fn request_blocks(&self, hashes: &[BlockHash]) -> bool {
        if hashes.is_empty() || !self.has_peers() {
            return false;
        }
        for hash in hashes {
            drop(self.inner.jobs.dispatch(Task::Block(*hash)).await);
        }
        true
    }

    /// Queues a download of one block and returns its waiter.
    pub async fn fetch_block(&self, hash: BlockHash) -> Option<JobWaiter> {
        self.dispatch(Task::Block(hash)).await
    }

    /// Queues a header sync from the header oracle's locator.
    pub async fn request_headers(&self) -> bool {
        let task = Task::Headers {
            locator: self.inner.collaborators.headers.locator(),
            stop_hash: BlockHash::all_zeros(),
        };
        self.dispatch(task).await.is_some()
    }

    /// Queues a `getcfheaders` range.
    pub async fn request_cfheaders(
        &self,
        filter_type: FilterType,
        start_height: u32,
        stop_hash: BlockHash,
    ) -> bool {
        let task = Task::CfHeaders {
            filter_type,
            start_height,
            stop_hash,
        };
        self.dispatch(task).await.is_some()
    }

    /// Queues a `getcfilters` range.
    pub async fn request_cfilters(
        &self,
        filter_type: FilterType,
        start_height: u32,
        stop_hash: BlockHash,
    ) -> bool {
        let task = Task::CFilters {
            filter_type,
            start_height,
            stop_hash,
        };
        self.dispatch(task).await.is_some()
    }

    /// Queues a `getcfcheckpt` request.
    pub async fn request_cfcheckpt(&self, filter_type: FilterType, stop_hash: BlockHash) -> bool {
        let task = Task::CfCheckpt {
            filter_type,
            stop_hash,
        };
        self.dispatch(task).await.is_some()
    }

    /// Queues `task`. Returns `None` when stopped or without peers.
    pub async fn dispatch(&self, task: Task) -> Option<JobWaiter> {
        if !self.has_peers() {
            return None;
        }
        Some(self.inner.jobs.dispatch(task).await)
    }

    /// Number of peers that completed the handshake.
    pub async fn verified_peer_count(&self) -> usize {
        self.inner.status.verified_count().await
    }

    /// Number of peers connecting or connected.
    pub fn connected_peer_count(&self) -> usize {
        self.inner.status.connected()
    }

    /// Snapshot of every peer, ordered by id.
    pub async fn peers(&self) -> Vec<PeerSummary> {
        let (reply, result) = oneshot::channel();
        if !self.post(Command::Peers { reply }) {
            return Vec::new();
        }
        result.await.unwrap_or_default()
    }

    /// Asks the pool to assign pending jobs of `task_type`.
    pub fn job_ready(&self, task_type: TaskType) -> bool {
        self.post(Command::JobReady(task_type))
    }

    /// Adds an outbound candidate to the address book.
    pub fn add_address(&self, addr: SocketAddr) -> bool {
        self.is_running() && self.post(Command::AddAddresses(vec![addr]))
    }

    /// Whether a job with `key` is queued or in flight.
    pub async fn has_job(&self, key: &JobKey) -> bool {
        self.inner.jobs.has_job(key).await
    }

    /// Runs one housekeeping pass. Returns whether more work remains.
    pub async fn heartbeat(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        let (reply, result) = oneshot::channel();
        self.post(Command::Heartbeat { reply }) && result.await.unwrap_or(false)
    }

    /// Wakes the driver ahead of its idle interval.
    pub fn trigger(&self) {
        self.inner.driver.trigger();
    }

    /// Stops the pool, disconnects every peer and fails all jobs.
    ///
    /// Safe to call more than once; later calls wait for the first to finish.
    pub async fn shutdown(&self) {
        if self.inner.status.stop() {
            info!("Shutting down peer manager for {}", self.inner.config.chain);
            let (done, finished) = oneshot::channel();
            if self.post(Command::Shutdown { done }) {
                let _ = finished.await;
            }
        }
        let mut stopped = self.inner.stopped.clone();
        let _ = stopped.wait_for(|stopped| *stopped).await;
        self.inner.driver.stop();
    }

    /// Shuts the manager down once `signal` turns `true`.
    ///
    /// The watcher holds only a weak reference, so it never keeps the manager
    /// alive.
    pub fn with_shutdown_signal(&self, mut signal: watch::Receiver<bool>) -> JoinHandle<()> {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            if signal.wait_for(|stop| *stop).await.is_err() {
                return;
            }
            if let Some(inner) = inner.upgrade() {
                info!("Shutdown signal received");
                PeerManager { inner }.shutdown().await;
            }
        })
    }

    fn has_peers(&self) -> bool {
        self.is_running() && self.connected_peer_count() > 0
    }

    fn post(&self, command: Command) -> bool {
        self.inner.commands.send(command).is_ok()
    }
}

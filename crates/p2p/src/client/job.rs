//! Job queue and dispatcher.
//!
//! A job is one unit of work asked of the network: fetch a block, a header
//! batch or a filter range, or announce a transaction or block. Jobs are
//! keyed by content, so identical requests coalesce onto one job and
//! responses are matched regardless of which peer sends them or in which
//! order they arrive.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    sync::Arc,
    time::Duration,
};

use bitcoin::{Block, BlockHash, Transaction, Txid};
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc, oneshot},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    chain::FilterType,
    client::{
        message::{
            Inventory, Message, Request, Response,
            connection::PROTOCOL_VERSION,
            request::{GetCFCheckpt, GetCFHeaders, GetCFilters, GetData, GetHeaders},
            response::{CFCheckpt, CFHeaders, CFilter, Headers, Inv},
        },
        peer::PeerId,
    },
    config::Config,
    hashes::Hash,
};

/// Number of broadcast payloads kept to answer `getdata`.
const RELAY_CACHE_SIZE: usize = 1000;

/// Kind of work, used for readiness signals and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// Header sync.
    Headers,
    /// Block download.
    Block,
    /// Compact filter headers.
    CfHeaders,
    /// Compact filters.
    CFilters,
    /// Compact filter checkpoints.
    CfCheckpt,
    /// Transaction announcement.
    BroadcastTransaction,
    /// Block announcement.
    BroadcastBlock,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskType::Headers => "headers",
            TaskType::Block => "block",
            TaskType::CfHeaders => "cfheaders",
            TaskType::CFilters => "cfilters",
            TaskType::CfCheckpt => "cfcheckpt",
            TaskType::BroadcastTransaction => "broadcast_tx",
            TaskType::BroadcastBlock => "broadcast_block",
        };
        f.write_str(name)
    }
}

/// Work to be done, with its targets.
#[derive(Debug, Clone)]
pub enum Task {
    /// Fetch headers following `locator`.
    Headers {
        /// Block locator, newest first.
        locator: Vec<BlockHash>,
        /// Last header wanted, all zeros for as many as possible.
        stop_hash: BlockHash,
    },
    /// Fetch one block.
    Block(BlockHash),
    /// Fetch filter headers for a range.
    CfHeaders {
        /// Filter type.
        filter_type: FilterType,
        /// First block height.
        start_height: u32,
        /// Last block.
        stop_hash: BlockHash,
    },
    /// Fetch filters for a range.
    CFilters {
        /// Filter type.
        filter_type: FilterType,
        /// First block height.
        start_height: u32,
        /// Last block.
        stop_hash: BlockHash,
    },
    /// Fetch filter header checkpoints.
    CfCheckpt {
        /// Filter type.
        filter_type: FilterType,
        /// Last block.
        stop_hash: BlockHash,
    },
    /// Announce a transaction to every verified peer.
    BroadcastTransaction(Arc<Transaction>),
    /// Announce a block to every verified peer.
    BroadcastBlock(Arc<Block>),
}

impl Task {
    /// Content key used for dedup and response matching.
    pub fn key(&self) -> JobKey {
        match self {
            Task::Headers { .. } => JobKey::Headers,
            Task::Block(hash) => JobKey::Block(*hash),
            Task::CfHeaders {
                filter_type,
                stop_hash,
                ..
            } => JobKey::CfHeaders(*filter_type, *stop_hash),
            Task::CFilters {
                filter_type,
                stop_hash,
                ..
            } => JobKey::CFilters(*filter_type, *stop_hash),
            Task::CfCheckpt {
                filter_type,
                stop_hash,
            } => JobKey::CfCheckpt(*filter_type, *stop_hash),
            Task::BroadcastTransaction(tx) => JobKey::BroadcastTransaction(tx.txid()),
            Task::BroadcastBlock(block) => JobKey::BroadcastBlock(block.block_hash()),
        }
    }

    /// Kind of work.
    pub fn task_type(&self) -> TaskType {
        self.key().task_type()
    }

    fn is_broadcast(&self) -> bool {
        matches!(
            self,
            Task::BroadcastTransaction(_) | Task::BroadcastBlock(_)
        )
    }

    /// Request sent to the assigned peer. Blocks are batched separately.
    fn request(&self) -> Option<Message> {
        let request = match self {
            Task::Headers { locator, stop_hash } => {
                let stop = (*stop_hash != BlockHash::all_zeros()).then_some(*stop_hash);
                Request::GetHeaders(GetHeaders::new(
                    PROTOCOL_VERSION.unsigned_abs(),
                    locator.clone(),
                    stop,
                ))
            }
            Task::CfHeaders {
                filter_type,
                start_height,
                stop_hash,
            } => Request::GetCFHeaders(GetCFHeaders {
                filter_type: *filter_type,
                start_height: *start_height,
                stop_hash: *stop_hash,
            }),
            Task::CFilters {
                filter_type,
                start_height,
                stop_hash,
            } => Request::GetCFilters(GetCFilters {
                filter_type: *filter_type,
                start_height: *start_height,
                stop_hash: *stop_hash,
            }),
            Task::CfCheckpt {
                filter_type,
                stop_hash,
            } => Request::GetCFCheckpt(GetCFCheckpt {
                filter_type: *filter_type,
                stop_hash: *stop_hash,
            }),
            Task::Block(_) | Task::BroadcastTransaction(_) | Task::BroadcastBlock(_) => {
                return None;
            }
        };
        Some(request.into())
    }

    /// Inventory announced for broadcasts.
    fn announcement(&self) -> Option<Inventory> {
        match self {
            Task::BroadcastTransaction(tx) => Some(Inventory::Transaction(tx.txid())),
            Task::BroadcastBlock(block) => Some(Inventory::Block(block.block_hash())),
            _ => None,
        }
    }

    /// Payload served when a peer asks for an announced item.
    fn relay_payload(&self) -> Option<Message> {
        match self {
            Task::BroadcastTransaction(tx) => Some(Response::Tx(tx.as_ref().clone()).into()),
            Task::BroadcastBlock(block) => {
                Some(Response::Block(Box::new(block.as_ref().clone())).into())
            }
            _ => None,
        }
    }
}

/// Content key of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobKey {
    /// The header sync singleton.
    Headers,
    /// Block by hash.
    Block(BlockHash),
    /// Filter headers by type and stop hash.
    CfHeaders(FilterType, BlockHash),
    /// Filters by type and stop hash.
    CFilters(FilterType, BlockHash),
    /// Filter checkpoints by type and stop hash.
    CfCheckpt(FilterType, BlockHash),
    /// Transaction broadcast by txid.
    BroadcastTransaction(Txid),
    /// Block broadcast by hash.
    BroadcastBlock(BlockHash),
}

impl JobKey {
    /// Kind of work.
    pub fn task_type(&self) -> TaskType {
        match self {
            JobKey::Headers => TaskType::Headers,
            JobKey::Block(_) => TaskType::Block,
            JobKey::CfHeaders(..) => TaskType::CfHeaders,
            JobKey::CFilters(..) => TaskType::CFilters,
            JobKey::CfCheckpt(..) => TaskType::CfCheckpt,
            JobKey::BroadcastTransaction(_) => TaskType::BroadcastTransaction,
            JobKey::BroadcastBlock(_) => TaskType::BroadcastBlock,
        }
    }

    /// Key of the broadcast that announced `inventory`, if any.
    pub fn for_announced(inventory: &Inventory) -> Option<JobKey> {
        if let Some(txid) = inventory.txid() {
            return Some(JobKey::BroadcastTransaction(txid));
        }
        inventory.block_hash().map(JobKey::BroadcastBlock)
    }
}

/// Job identifier, increasing in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

/// Result delivered to waiters.
#[derive(Debug, Clone)]
pub enum JobOutput {
    /// Headers received.
    Headers(Arc<Headers>),
    /// Block received.
    Block(Arc<Block>),
    /// Filter headers received.
    CfHeaders(Arc<CFHeaders>),
    /// Filters received, in arrival order.
    CFilters(Arc<Vec<CFilter>>),
    /// Filter checkpoints received.
    CfCheckpt(Arc<CFCheckpt>),
    /// Announcement sent.
    Broadcast {
        /// Peers the announcement went to.
        peers: usize,
    },
}

/// Why a job did not produce output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// Every attempt failed.
    #[error("job failed after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// The data does not exist.
    #[error("requested data not found")]
    NotFound,
    /// The manager shut down.
    #[error("peer manager shut down")]
    Shutdown,
    /// The job was dropped without a result.
    #[error("job cancelled")]
    Cancelled,
}

type JobResult = Result<JobOutput, JobError>;

/// Receives the outcome of a dispatched job.
#[derive(Debug)]
pub struct JobWaiter {
    key: JobKey,
    receiver: oneshot::Receiver<JobResult>,
}

impl JobWaiter {
    /// Key of the job being waited on.
    pub fn key(&self) -> JobKey {
        self.key
    }

    /// Waits for the job to finish.
    pub async fn wait(self) -> JobResult {
        self.receiver.await.unwrap_or(Err(JobError::Cancelled))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobState {
    Pending,
    Assigned { peer: PeerId, since: Instant },
}

#[derive(Debug)]
struct Job {
    id: JobId,
    task: Task,
    state: JobState,
    created: Instant,
    retries: u32,
    tried: HashSet<PeerId>,
    waiters: Vec<oneshot::Sender<JobResult>>,
    filters: Vec<CFilter>,
}

impl Job {
    fn assigned_to(&self, peer: PeerId) -> bool {
        matches!(self.state, JobState::Assigned { peer: p, .. } if p == peer)
    }

    fn resolve(self, result: JobResult) {
        for waiter in self.waiters {
            let _ = waiter.send(result.clone());
        }
    }
}

/// Job queue settings taken from [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct JobSettings {
    /// How long an assigned job may wait for its answer.
    pub timeout: Duration,
    /// Reassignments allowed before a job fails.
    pub max_retries: u32,
    /// Maximum block hashes per `getdata`.
    pub block_batch_limit: usize,
}

impl From<&Config> for JobSettings {
    fn from(config: &Config) -> Self {
        Self {
            timeout: config.job_timeout,
            max_retries: config.max_job_retries,
            block_batch_limit: config.block_batch_limit.max(1),
        }
    }
}

#[derive(Debug, Default)]
struct JobTable {
    jobs: HashMap<JobKey, Job>,
    next_id: u64,
    closed: bool,
    relay: HashMap<JobKey, Message>,
    relay_order: VecDeque<JobKey>,
}

impl JobTable {
    fn remove(&mut self, key: &JobKey) -> Option<Job> {
        self.jobs.remove(key)
    }

    fn remember_relay(&mut self, key: JobKey, payload: Message) {
        if self.relay.insert(key, payload).is_none() {
            self.relay_order.push_back(key);
        }
        while self.relay_order.len() > RELAY_CACHE_SIZE {
            if let Some(oldest) = self.relay_order.pop_front() {
                self.relay.remove(&oldest);
            }
        }
    }
}

/// Shared handle to the job table.
#[derive(Debug, Clone)]
pub struct JobQueue {
    table: Arc<Mutex<JobTable>>,
    ready: mpsc::UnboundedSender<TaskType>,
    settings: JobSettings,
}

impl JobQueue {
    /// Creates a queue that signals new work on `ready`.
    pub fn new(settings: JobSettings, ready: mpsc::UnboundedSender<TaskType>) -> Self {
        Self {
            table: Arc::new(Mutex::new(JobTable::default())),
            ready,
            settings,
        }
    }

    /// Queues `task`, or joins the existing job with the same key.
    pub async fn dispatch(&self, task: Task) -> JobWaiter {
        let key = task.key();
        let (sender, receiver) = oneshot::channel();
        let waiter = JobWaiter { key, receiver };

        let mut table = self.table.lock().await;
        if table.closed {
            let _ = sender.send(Err(JobError::Shutdown));
            return waiter;
        }
        if let Some(job) = table.jobs.get_mut(&key) {
            debug!("Coalescing {:?} onto job {:?}", key, job.id);
            job.waiters.push(sender);
            return waiter;
        }

        let id = JobId(table.next_id);
        table.next_id = table.next_id.wrapping_add(1);
        let task_type = task.task_type();
        table.jobs.insert(
            key,
            Job {
                id,
                task,
                state: JobState::Pending,
                created: Instant::now(),
                retries: 0,
                tried: HashSet::new(),
                waiters: vec![sender],
                filters: Vec::new(),
            },
        );
        drop(table);

        debug!("Queued {} job {:?}", task_type, key);
        let _ = self.ready.send(task_type);
        waiter
    }

    /// Assigns every pending job to one of `peers` and returns the requests
    /// to send.
    pub async fn assign(&self, peers: &[PeerId]) -> Vec<(PeerId, Message)> {
        if peers.is_empty() {
            return Vec::new();
        }
        let now = Instant::now();
        let mut table = self.table.lock().await;

        let mut load: HashMap<PeerId, usize> = peers.iter().map(|peer| (*peer, 0)).collect();
        for job in table.jobs.values() {
            if let JobState::Assigned { peer, .. } = job.state
                && let Some(count) = load.get_mut(&peer)
            {
                *count = count.saturating_add(1);
            }
        }

        let mut pending: Vec<(JobId, JobKey)> = table
            .jobs
            .iter()
            .filter(|(_, job)| job.state == JobState::Pending)
            .map(|(key, job)| (job.id, *key))
            .collect();
        pending.sort();

        let mut messages = Vec::new();
        let mut blocks: HashMap<PeerId, Vec<BlockHash>> = HashMap::new();
        let mut broadcasts = Vec::new();

        for (_, key) in pending {
            let Some(job) = table.jobs.get_mut(&key) else {
                continue;
            };
            if job.task.is_broadcast() {
                broadcasts.push(key);
                continue;
            }

            let Some(peer) = select_peer(peers, &load, &job.tried) else {
                continue;
            };
            job.state = JobState::Assigned { peer, since: now };
            job.tried.insert(peer);
            if let Some(count) = load.get_mut(&peer) {
                *count = count.saturating_add(1);
            }

            match &job.task {
                Task::Block(hash) => blocks.entry(peer).or_default().push(*hash),
                task => {
                    if let Some(request) = task.request() {
                        messages.push((peer, request));
                    }
                }
            }
            debug!("Assigned {:?} to {} (attempt {})", key, peer, job.retries.saturating_add(1));
        }

        let mut block_peers: Vec<_> = blocks.into_iter().collect();
        block_peers.sort_by_key(|(peer, _)| *peer);
        for (peer, hashes) in block_peers {
            for batch in hashes.chunks(self.settings.block_batch_limit) {
                let inventories = batch.iter().copied().map(Inventory::Block).collect();
                messages.push((peer, Request::GetData(GetData::new(inventories)).into()));
            }
        }

        for key in broadcasts {
            let Some(job) = table.remove(&key) else {
                continue;
            };
            if let Some(inventory) = job.task.announcement() {
                for peer in peers {
                    messages.push((*peer, Response::Inv(Inv::new(vec![inventory])).into()));
                }
            }
            if let Some(payload) = job.task.relay_payload() {
                table.remember_relay(key, payload);
            }
            info!("Announced {:?} to {} peers", key, peers.len());
            job.resolve(Ok(JobOutput::Broadcast { peers: peers.len() }));
        }

        messages
    }

    /// Resolves the job for `key` with `output`.
    pub async fn complete(&self, key: &JobKey, output: JobOutput) -> bool {
        let job = self.table.lock().await.remove(key);
        match job {
            Some(job) => {
                debug!(
                    "Completed {:?} after {:?}",
                    key,
                    job.created.elapsed()
                );
                job.resolve(Ok(output));
                true
            }
            None => false,
        }
    }

    /// Resolves the job for `key` only if it is assigned to `peer`.
    pub async fn complete_from(&self, key: &JobKey, peer: PeerId, output: JobOutput) -> bool {
        let job = {
            let mut table = self.table.lock().await;
            if !table.jobs.get(key).is_some_and(|job| job.assigned_to(peer)) {
                return false;
            }
            table.remove(key)
        };
        match job {
            Some(job) => {
                debug!("Completed {:?} from {} after {:?}", key, peer, job.created.elapsed());
                job.resolve(Ok(output));
                true
            }
            None => false,
        }
    }

    /// Fails the job for `key`.
    pub async fn fail(&self, key: &JobKey, error: JobError) -> bool {
        let job = self.table.lock().await.remove(key);
        match job {
            Some(job) => {
                warn!("Job {:?} failed: {}", key, error);
                job.resolve(Err(error));
                true
            }
            None => false,
        }
    }

    /// `peer` could not answer the job for `key`; retry elsewhere.
    pub async fn reject(&self, key: &JobKey, peer: PeerId) -> bool {
        let mut table = self.table.lock().await;
        let assigned = table.jobs.get(key).is_some_and(|job| job.assigned_to(peer));
        if !assigned {
            return false;
        }
        self.requeue_or_fail(&mut table, key);
        true
    }

    /// Accumulates a filter for the `getcfilters` range it belongs to.
    ///
    /// The range completes when the filter for its stop hash arrives.
    pub async fn add_cfilter(&self, peer: PeerId, cfilter: CFilter) -> bool {
        let mut table = self.table.lock().await;
        let stop_key = JobKey::CFilters(cfilter.filter_type, cfilter.block_hash);

        let key = if table.jobs.contains_key(&stop_key) {
            if !table.jobs.get(&stop_key).is_some_and(|job| job.assigned_to(peer)) {
                debug!("Ignoring cfilter for {:?} from unassigned {}", stop_key, peer);
                return false;
            }
            stop_key
        } else {
            let candidate = table
                .jobs
                .iter()
                .filter(|(key, job)| {
                    matches!(key, JobKey::CFilters(filter_type, _) if *filter_type == cfilter.filter_type)
                        && job.assigned_to(peer)
                })
                .min_by_key(|(_, job)| job.id)
                .map(|(key, _)| *key);
            match candidate {
                Some(key) => key,
                None => return false,
            }
        };

        let Some(job) = table.jobs.get_mut(&key) else {
            return false;
        };
        job.filters.push(cfilter);
        if key != stop_key {
            return true;
        }

        if let Some(job) = table.remove(&key) {
            let filters = job.filters.clone();
            debug!("Completed {:?} with {} filters", key, filters.len());
            job.resolve(Ok(JobOutput::CFilters(Arc::new(filters))));
        }
        true
    }

    /// Requeues or fails every job assigned to `peer`.
    pub async fn peer_disconnected(&self, peer: PeerId) -> usize {
        let mut table = self.table.lock().await;
        let keys: Vec<JobKey> = table
            .jobs
            .iter()
            .filter(|(_, job)| job.assigned_to(peer))
            .map(|(key, _)| *key)
            .collect();
        for key in &keys {
            self.requeue_or_fail(&mut table, key);
        }
        keys.len()
    }

    /// Treats assigned jobs older than the timeout as rejected.
    pub async fn expire(&self, now: Instant) -> usize {
        let mut table = self.table.lock().await;
        let keys: Vec<JobKey> = table
            .jobs
            .iter()
            .filter(|(_, job)| match job.state {
                JobState::Assigned { since, .. } => {
                    now.saturating_duration_since(since) >= self.settings.timeout
                }
                JobState::Pending => false,
            })
            .map(|(key, _)| *key)
            .collect();
        for key in &keys {
            debug!("Job {:?} timed out", key);
            self.requeue_or_fail(&mut table, key);
        }
        keys.len()
    }

    /// Fails every job with [`JobError::Shutdown`] and refuses new ones.
    pub async fn shutdown(&self) {
        let mut table = self.table.lock().await;
        table.closed = true;
        let jobs: Vec<Job> = table.jobs.drain().map(|(_, job)| job).collect();
        table.relay.clear();
        table.relay_order.clear();
        drop(table);

        if !jobs.is_empty() {
            info!("Failing {} jobs on shutdown", jobs.len());
        }
        for job in jobs {
            job.resolve(Err(JobError::Shutdown));
        }
    }

    /// Whether a job with `key` exists.
    pub async fn has_job(&self, key: &JobKey) -> bool {
        self.table.lock().await.jobs.contains_key(key)
    }

    /// Number of jobs waiting for a peer.
    pub async fn pending_count(&self) -> usize {
        let table = self.table.lock().await;
        table
            .jobs
            .values()
            .filter(|job| job.state == JobState::Pending)
            .count()
    }

    /// Number of live jobs.
    pub async fn len(&self) -> usize {
        self.table.lock().await.jobs.len()
    }

    /// Whether no job is live.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Payload of a recent broadcast, served in answer to `getdata`.
    pub async fn relay_payload(&self, inventory: &Inventory) -> Option<Message> {
        let key = JobKey::for_announced(inventory)?;
        self.table.lock().await.relay.get(&key).cloned()
    }

    fn requeue_or_fail(&self, table: &mut JobTable, key: &JobKey) {
        let Some(job) = table.jobs.get_mut(key) else {
            return;
        };
        job.retries = job.retries.saturating_add(1);
        if job.retries > self.settings.max_retries {
            let attempts = job.retries;
            if let Some(job) = table.remove(key) {
                warn!("Job {:?} failed after {} attempts", key, attempts);
                job.resolve(Err(JobError::RetriesExhausted { attempts }));
            }
            return;
        }
        job.state = JobState::Pending;
        job.filters.clear();
        let _ = self.ready.send(key.task_type());
    }
}

/// Picks the least loaded peer the job has not tried, or the least loaded
/// peer overall when every peer has been tried.
fn select_peer(
    peers: &[PeerId],
    load: &HashMap<PeerId, usize>,
    tried: &HashSet<PeerId>,
) -> Option<PeerId> {
    let load_of = |peer: &PeerId| load.get(peer).copied().unwrap_or(0);
    peers
        .iter()
        .filter(|peer| !tried.contains(peer))
        .min_by_key(|peer| (load_of(peer), **peer))
        .or_else(|| peers.iter().min_by_key(|peer| (load_of(peer), **peer)))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::{sample_block, sample_transaction};

    fn queue(max_retries: u32, batch: usize) -> (JobQueue, mpsc::UnboundedReceiver<TaskType>) {
        let (ready, ready_rx) = mpsc::unbounded_channel();
        let settings = JobSettings {
            timeout: Duration::from_secs(30),
            max_retries,
            block_batch_limit: batch,
        };
        (JobQueue::new(settings, ready), ready_rx)
    }

    fn hash(n: u8) -> BlockHash {
        BlockHash::from_byte_array([n; 32])
    }

    fn getdata_hashes(message: &Message) -> Vec<BlockHash> {
        match message {
            Message::Request(Request::GetData(getdata)) => getdata
                .inventories()
                .iter()
                .filter_map(Inventory::block_hash)
                .collect(),
            other => panic!("expected getdata, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_identical_dispatches_coalesce() {
        let (queue, mut ready) = queue(3, 1);
        let first = queue.dispatch(Task::Block(hash(1))).await;
        let second = queue.dispatch(Task::Block(hash(1))).await;

        assert_eq!(queue.len().await, 1);
        assert_eq!(ready.try_recv().unwrap(), TaskType::Block);
        assert!(ready.try_recv().is_err());

        let messages = queue.assign(&[PeerId(1)]).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(getdata_hashes(&messages[0].1), vec![hash(1)]);

        let block = Arc::new(sample_block(2));
        assert!(queue.complete(&JobKey::Block(hash(1)), JobOutput::Block(block)).await);
        assert!(matches!(first.wait().await, Ok(JobOutput::Block(_))));
        assert!(matches!(second.wait().await, Ok(JobOutput::Block(_))));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_block_batches_respect_limit() {
        let (queue, _ready) = queue(3, 2);
        for n in 1..=3 {
            queue.dispatch(Task::Block(hash(n))).await;
        }

        let messages = queue.assign(&[PeerId(1)]).await;
        let sizes: Vec<usize> = messages.iter().map(|(_, m)| getdata_hashes(m).len()).collect();
        assert_eq!(sizes, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_load_spreads_across_peers() {
        let (queue, _ready) = queue(3, 1);
        for n in 1..=4 {
            queue.dispatch(Task::Block(hash(n))).await;
        }

        let messages = queue.assign(&[PeerId(1), PeerId(2)]).await;
        let to_first = messages.iter().filter(|(peer, _)| *peer == PeerId(1)).count();
        assert_eq!(messages.len(), 4);
        assert_eq!(to_first, 2);
    }

    #[tokio::test]
    async fn test_reject_moves_job_to_untried_peer() {
        let (queue, _ready) = queue(3, 1);
        queue.dispatch(Task::Block(hash(1))).await;

        let messages = queue.assign(&[PeerId(1)]).await;
        assert_eq!(messages[0].0, PeerId(1));
        assert!(!queue.reject(&JobKey::Block(hash(1)), PeerId(2)).await);
        assert!(queue.reject(&JobKey::Block(hash(1)), PeerId(1)).await);

        let messages = queue.assign(&[PeerId(1), PeerId(2)]).await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, PeerId(2));
    }

    #[tokio::test]
    async fn test_disconnect_requeues_then_fails() {
        let (queue, _ready) = queue(1, 1);
        let waiter = queue.dispatch(Task::Block(hash(1))).await;

        queue.assign(&[PeerId(1)]).await;
        assert_eq!(queue.peer_disconnected(PeerId(1)).await, 1);
        assert_eq!(queue.pending_count().await, 1);

        let messages = queue.assign(&[PeerId(2)]).await;
        assert_eq!(messages[0].0, PeerId(2));
        assert_eq!(queue.peer_disconnected(PeerId(2)).await, 1);

        assert_eq!(waiter.wait().await.unwrap_err(), JobError::RetriesExhausted { attempts: 2 });
        assert!(!queue.has_job(&JobKey::Block(hash(1))).await);
    }

    #[tokio::test]
    async fn test_expired_jobs_are_retried() {
        let (queue, _ready) = queue(3, 1);
        queue.dispatch(Task::Block(hash(1))).await;
        queue.assign(&[PeerId(1)]).await;

        assert_eq!(queue.expire(Instant::now()).await, 0);
        let later = Instant::now() + Duration::from_secs(31);
        assert_eq!(queue.expire(later).await, 1);
        assert_eq!(queue.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_cfilters_accumulate_until_stop_hash() {
        let (queue, _ready) = queue(3, 1);
        let waiter = queue
            .dispatch(Task::CFilters {
                filter_type: FilterType::Basic,
                start_height: 1,
                stop_hash: hash(3),
            })
            .await;

        let messages = queue.assign(&[PeerId(1)]).await;
        assert!(matches!(
            messages[0].1,
            Message::Request(Request::GetCFilters(GetCFilters { start_height: 1, .. }))
        ));

        for n in 1..=3 {
            let cfilter = CFilter {
                filter_type: FilterType::Basic,
                block_hash: hash(n),
                filter: vec![n],
            };
            assert!(queue.add_cfilter(PeerId(1), cfilter).await);
        }

        match waiter.wait().await.unwrap() {
            JobOutput::CFilters(filters) => assert_eq!(filters.len(), 3),
            other => panic!("unexpected output {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_headers_complete_only_from_assigned_peer() {
        let (queue, _ready) = queue(3, 1);
        let waiter = queue
            .dispatch(Task::Headers {
                locator: vec![hash(1)],
                stop_hash: BlockHash::all_zeros(),
            })
            .await;
        let output = || JobOutput::Headers(Arc::new(Headers::new(Vec::new())));

        assert!(!queue.complete_from(&JobKey::Headers, PeerId(1), output()).await);
        queue.assign(&[PeerId(1)]).await;
        assert!(!queue.complete_from(&JobKey::Headers, PeerId(2), output()).await);
        assert!(queue.has_job(&JobKey::Headers).await);

        assert!(queue.complete_from(&JobKey::Headers, PeerId(1), output()).await);
        assert!(matches!(waiter.wait().await, Ok(JobOutput::Headers(_))));
        assert!(!queue.has_job(&JobKey::Headers).await);
    }

    #[tokio::test]
    async fn test_cfilter_from_unassigned_peer_is_refused() {
        let (queue, _ready) = queue(3, 1);
        let key = JobKey::CFilters(FilterType::Basic, hash(3));
        let _waiter = queue
            .dispatch(Task::CFilters {
                filter_type: FilterType::Basic,
                start_height: 1,
                stop_hash: hash(3),
            })
            .await;

        let stop_filter = |n: u8| CFilter {
            filter_type: FilterType::Basic,
            block_hash: hash(3),
            filter: vec![n],
        };
        // Not assigned to anyone yet.
        assert!(!queue.add_cfilter(PeerId(1), stop_filter(0)).await);

        queue.assign(&[PeerId(1)]).await;
        assert!(!queue.add_cfilter(PeerId(2), stop_filter(1)).await);
        let stray = CFilter {
            filter_type: FilterType::Basic,
            block_hash: hash(1),
            filter: vec![2],
        };
        assert!(!queue.add_cfilter(PeerId(2), stray).await);
        assert!(queue.has_job(&key).await);
        assert_eq!(queue.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_announces_to_every_peer() {
        let (queue, _ready) = queue(3, 1);
        let tx = Arc::new(sample_transaction(5));
        let txid = tx.txid();
        let waiter = queue.dispatch(Task::BroadcastTransaction(tx)).await;

        assert!(queue.assign(&[]).await.is_empty());
        let messages = queue.assign(&[PeerId(1), PeerId(2)]).await;
        assert_eq!(messages.len(), 2);
        for (_, message) in &messages {
            assert_eq!(
                *message,
                Message::from(Response::Inv(Inv::new(vec![Inventory::Transaction(txid)])))
            );
        }
        assert!(matches!(waiter.wait().await, Ok(JobOutput::Broadcast { peers: 2 })));
        assert!(matches!(
            queue.relay_payload(&Inventory::WitnessTransaction(txid)).await,
            Some(Message::Response(Response::Tx(_)))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_fails_waiters() {
        let (queue, _ready) = queue(3, 1);
        let waiter = queue.dispatch(Task::Block(hash(1))).await;
        queue.shutdown().await;

        assert_eq!(waiter.wait().await.unwrap_err(), JobError::Shutdown);
        let late = queue.dispatch(Task::Block(hash(2))).await;
        assert_eq!(late.wait().await.unwrap_err(), JobError::Shutdown);
    }

    #[test]
    fn test_cf_keys_ignore_start_height() {
        let a = Task::CfHeaders {
            filter_type: FilterType::Basic,
            start_height: 1,
            stop_hash: hash(9),
        };
        let b = Task::CfHeaders {
            filter_type: FilterType::Basic,
            start_height: 5,
            stop_hash: hash(9),
        };
        assert_eq!(a.key(), b.key());
        assert_ne!(
            a.key(),
            Task::CFilters {
                filter_type: FilterType::Basic,
                start_height: 1,
                stop_hash: hash(9)
            }
            .key()
        );
    }
}

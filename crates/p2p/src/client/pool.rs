//! The peer pool task.
//!
//! One task per manager owns every peer handle, the address book and the
//! listeners. Commands from the manager, events from peer tasks and job
//! readiness signals are all consumed here, so pool state changes in a
//! single total order.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    fmt,
    net::{IpAddr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use bitcoin::BlockHash;
use tokio::{
    net::{TcpListener, lookup_host},
    sync::{Notify, RwLock, mpsc, oneshot, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    client::{
        connection::{ConnectionConfig, ConnectionManager},
        handshake::{Direction, HandshakeHandler},
        job::{JobKey, JobOutput, JobQueue, Task, TaskType},
        message::{
            Message, Request, Response,
            request::{GetData, GetHeaders},
            response::{Addr, Headers, MAX_ADDR_SIZE, NotFound},
        },
        oracle::Collaborators,
        peer::{Endpoint, PeerContext, PeerEvent, PeerHandle, PeerId, PeerSummary, Transport},
    },
    config::Config,
    hashes::Hash,
};

/// Addresses remembered for outbound connections.
const MAX_ADDRESSES: usize = 1000;

/// Requests handled by the pool task.
pub(crate) enum Command {
    /// Connect to `addr`; answers once the peer verifies or fails.
    AddPeer {
        addr: SocketAddr,
        reply: oneshot::Sender<bool>,
    },
    /// Accept inbound connections on `addr`.
    Listen {
        addr: SocketAddr,
        reply: oneshot::Sender<bool>,
    },
    /// Adopt a connection accepted elsewhere.
    IncomingPeer {
        stream: Box<dyn Transport>,
        addr: SocketAddr,
        reply: Option<oneshot::Sender<bool>>,
    },
    /// Drop a peer.
    Disconnect {
        id: PeerId,
        reply: oneshot::Sender<bool>,
    },
    /// Pending jobs of this type want peers.
    JobReady(TaskType),
    /// One housekeeping tick; answers whether more work remains.
    Heartbeat { reply: oneshot::Sender<bool> },
    /// Candidates for the address book.
    AddAddresses(Vec<SocketAddr>),
    /// The seed node lookup finished.
    SeedResolved(Vec<SocketAddr>),
    /// Snapshot of the pool.
    Peers {
        reply: oneshot::Sender<Vec<PeerSummary>>,
    },
    /// Stop everything.
    Shutdown { done: oneshot::Sender<()> },
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::AddPeer { addr, .. } => write!(f, "AddPeer({addr})"),
            Command::Listen { addr, .. } => write!(f, "Listen({addr})"),
            Command::IncomingPeer { addr, .. } => write!(f, "IncomingPeer({addr})"),
            Command::Disconnect { id, .. } => write!(f, "Disconnect({id})"),
            Command::JobReady(task_type) => write!(f, "JobReady({task_type})"),
            Command::Heartbeat { .. } => f.write_str("Heartbeat"),
            Command::AddAddresses(addrs) => write!(f, "AddAddresses({})", addrs.len()),
            Command::SeedResolved(addrs) => write!(f, "SeedResolved({})", addrs.len()),
            Command::Peers { .. } => f.write_str("Peers"),
            Command::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

/// Pool state readable outside the pool task.
#[derive(Debug)]
pub(crate) struct PoolStatus {
    running: AtomicBool,
    connected: AtomicUsize,
    verified: RwLock<HashSet<PeerId>>,
}

impl PoolStatus {
    pub(crate) fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            connected: AtomicUsize::new(0),
            verified: RwLock::new(HashSet::new()),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clears the running flag, returning whether it was set.
    pub(crate) fn stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn connected(&self) -> usize {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) async fn verified_count(&self) -> usize {
        self.verified.read().await.len()
    }
}

/// Candidate addresses for outbound connections, oldest first.
#[derive(Debug, Default)]
struct AddressBook {
    order: VecDeque<SocketAddr>,
    known: HashSet<SocketAddr>,
    tried: HashSet<SocketAddr>,
}

impl AddressBook {
    fn insert(&mut self, addr: SocketAddr) -> bool {
        if !self.known.insert(addr) {
            return false;
        }
        self.order.push_back(addr);
        while self.order.len() > MAX_ADDRESSES {
            if let Some(oldest) = self.order.pop_front() {
                self.known.remove(&oldest);
                self.tried.remove(&oldest);
            }
        }
        true
    }

    fn mark_tried(&mut self, addr: SocketAddr) {
        self.insert(addr);
        self.tried.insert(addr);
    }

    /// Takes the oldest untried address not in `exclude`.
    fn next_candidate(&mut self, exclude: &HashSet<SocketAddr>) -> Option<SocketAddr> {
        let addr = self
            .order
            .iter()
            .find(|addr| !self.tried.contains(addr) && !exclude.contains(addr))
            .copied()?;
        self.tried.insert(addr);
        Some(addr)
    }

    fn has_candidates(&self, exclude: &HashSet<SocketAddr>) -> bool {
        self.order
            .iter()
            .any(|addr| !self.tried.contains(addr) && !exclude.contains(addr))
    }

    /// Most recently learned addresses.
    fn sample(&self, max: usize) -> Vec<SocketAddr> {
        self.order.iter().rev().take(max).copied().collect()
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeedState {
    Pending,
    Resolving,
    Done,
}

/// Receiving ends consumed by the pool loop.
pub(crate) struct PoolChannels {
    pub(crate) commands: mpsc::UnboundedReceiver<Command>,
    pub(crate) events: mpsc::UnboundedReceiver<PeerEvent>,
    pub(crate) ready: mpsc::UnboundedReceiver<TaskType>,
}

pub(crate) struct Pool {
    config: Arc<Config>,
    collaborators: Collaborators,
    jobs: JobQueue,
    status: Arc<PoolStatus>,
    notify: Arc<Notify>,
    commands: mpsc::WeakUnboundedSender<Command>,
    events: mpsc::UnboundedSender<PeerEvent>,
    connection: ConnectionManager,
    nonce: u64,
    next_peer_id: u64,
    peers: HashMap<PeerId, PeerHandle>,
    pending_adds: HashMap<PeerId, Vec<oneshot::Sender<bool>>>,
    address_book: AddressBook,
    listeners: Vec<JoinHandle<()>>,
    seed: SeedState,
}

impl Pool {
    pub(crate) fn new(
        config: Arc<Config>,
        collaborators: Collaborators,
        jobs: JobQueue,
        status: Arc<PoolStatus>,
        notify: Arc<Notify>,
        commands: mpsc::WeakUnboundedSender<Command>,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        let connection = ConnectionManager::new(ConnectionConfig::from(config.as_ref()));
        Self {
            config,
            collaborators,
            jobs,
            status,
            notify,
            commands,
            events,
            connection,
            nonce: rand::random(),
            next_peer_id: 0,
            peers: HashMap::new(),
            pending_adds: HashMap::new(),
            address_book: AddressBook::default(),
            listeners: Vec::new(),
            seed: SeedState::Pending,
        }
    }

    /// Runs the pool until shutdown, then publishes `true` on `stopped`.
    pub(crate) fn spawn(mut self, mut channels: PoolChannels, stopped: watch::Sender<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Peer pool started for {}", self.config.chain);
            loop {
                tokio::select! {
                    command = channels.commands.recv() => match command {
                        Some(Command::Shutdown { done }) => {
                            self.shutdown().await;
                            let _ = done.send(());
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                        None => {
                            self.shutdown().await;
                            break;
                        }
                    },
                    Some(event) = channels.events.recv() => self.handle_event(event).await,
                    Some(task_type) = channels.ready.recv() => {
                        trace!("{} jobs ready", task_type);
                        self.assign_jobs().await;
                    }
                }
            }
            let _ = stopped.send(true);
        })
    }

    async fn handle_command(&mut self, command: Command) {
        trace!("Pool command {:?}", command);
        match command {
            Command::AddPeer { addr, reply } => self.add_peer(addr, reply),
            Command::Listen { addr, reply } => {
                let _ = reply.send(self.listen(addr).await);
            }
            Command::IncomingPeer { stream, addr, reply } => {
                let accepted = self.status.is_running();
                if accepted {
                    let id = self.spawn_peer(addr, Endpoint::Accepted(stream));
                    info!("Accepted inbound {} from {}", id, addr);
                }
                if let Some(reply) = reply {
                    let _ = reply.send(accepted);
                }
            }
            Command::Disconnect { id, reply } => {
                let removed = self.remove_peer(id, "disconnect requested").await;
                let _ = reply.send(removed);
            }
            Command::JobReady(_) => self.assign_jobs().await,
            Command::Heartbeat { reply } => {
                let more = self.housekeeping().await;
                let _ = reply.send(more);
            }
            Command::AddAddresses(addrs) => self.learn_addresses(addrs),
            Command::SeedResolved(addrs) => {
                info!("Seed node resolved to {} addresses", addrs.len());
                self.seed = SeedState::Done;
                self.learn_addresses(addrs);
            }
            Command::Peers { reply } => {
                let mut peers: Vec<PeerSummary> = self.peers.values().map(PeerHandle::summary).collect();
                peers.sort_by_key(|peer| peer.id);
                let _ = reply.send(peers);
            }
            // Handled by the loop.
            Command::Shutdown { done } => {
                let _ = done.send(());
            }
        }
    }

    fn add_peer(&mut self, addr: SocketAddr, reply: oneshot::Sender<bool>) {
        if !self.status.is_running() {
            let _ = reply.send(false);
            return;
        }
        if let Some(existing) = self.peers.values().find(|peer| peer.addr() == addr) {
            if existing.is_verified() {
                let _ = reply.send(true);
            } else {
                self.pending_adds.entry(existing.id()).or_default().push(reply);
            }
            return;
        }

        self.address_book.mark_tried(addr);
        let id = self.spawn_peer(addr, Endpoint::Connect);
        self.pending_adds.entry(id).or_default().push(reply);
    }

    async fn listen(&mut self, addr: SocketAddr) -> bool {
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to listen on {}: {}", addr, e);
                return false;
            }
        };
        let local = listener.local_addr().unwrap_or(addr);
        info!("Listening for peers on {}", local);

        let commands = self.commands.clone();
        self.listeners.push(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Failed to set nodelay for {}: {}", peer_addr, e);
                        }
                        let Some(commands) = commands.upgrade() else {
                            break;
                        };
                        let command = Command::IncomingPeer {
                            stream: Box::new(stream),
                            addr: peer_addr,
                            reply: None,
                        };
                        if commands.send(command).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to accept connection on {}: {}", local, e),
                }
            }
        }));
        true
    }

    fn spawn_peer(&mut self, addr: SocketAddr, endpoint: Endpoint) -> PeerId {
        let id = PeerId(self.next_peer_id);
        self.next_peer_id = self.next_peer_id.wrapping_add(1);

        let start_height = i32::try_from(self.collaborators.headers.best_height()).unwrap_or(i32::MAX);
        let context = PeerContext {
            id,
            addr,
            connection: self.connection,
            handshake: HandshakeHandler::new(&self.config, self.nonce, start_height),
            ping_interval: self.config.ping_interval,
            max_malformed: self.config.max_malformed_messages,
            events: self.events.clone(),
        };
        let handle = PeerHandle::spawn(context, endpoint);
        debug!("Spawned {} {} for {}", handle.direction(), id, addr);
        self.peers.insert(id, handle);
        self.update_connected();
        id
    }

    async fn remove_peer(&mut self, id: PeerId, reason: &str) -> bool {
        let Some(mut handle) = self.peers.remove(&id) else {
            return false;
        };
        handle.abort();
        handle.set_disconnected();
        self.status.verified.write().await.remove(&id);
        self.update_connected();
        info!("Removed {} ({}): {}", id, handle.addr(), reason);

        self.collaborators
            .observer
            .peer_disconnected(self.config.chain, handle.addr());
        for reply in self.pending_adds.remove(&id).into_iter().flatten() {
            let _ = reply.send(false);
        }

        let requeued = self.jobs.peer_disconnected(id).await;
        if requeued > 0 {
            debug!("Requeued {} jobs from {}", requeued, id);
            self.assign_jobs().await;
        }
        self.notify.notify_one();
        true
    }

    async fn handle_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Connected { id } => {
                if let Some(handle) = self.peers.get_mut(&id) {
                    handle.set_handshaking();
                }
            }
            PeerEvent::Verified { id, info } => {
                let Some(handle) = self.peers.get_mut(&id) else {
                    return;
                };
                info!(
                    "{} verified: {} version {} height {}",
                    id, info.user_agent, info.version, info.best_height
                );
                handle.set_verified(info.clone());
                let direction = handle.direction();
                self.status.verified.write().await.insert(id);
                self.collaborators
                    .observer
                    .peer_verified(self.config.chain, id, &info);
                for reply in self.pending_adds.remove(&id).into_iter().flatten() {
                    let _ = reply.send(true);
                }

                if direction == Direction::Outbound {
                    self.send_to(id, Request::GetAddr.into());
                }
                if i64::from(info.best_height) > i64::from(self.collaborators.headers.best_height()) {
                    self.request_headers().await;
                }
                self.assign_jobs().await;
                self.notify.notify_one();
            }
            PeerEvent::Message { id, message } => {
                if self.peers.contains_key(&id) {
                    self.handle_message(id, message).await;
                }
            }
            PeerEvent::Disconnected { id, reason } => {
                self.remove_peer(id, &reason).await;
            }
        }
    }

    async fn handle_message(&mut self, id: PeerId, message: Message) {
        match message {
            Message::Response(response) => self.handle_response(id, response).await,
            Message::Request(request) => self.handle_request(id, request).await,
            Message::Connection(connection) => {
                debug!("{} sent {}, ignoring", id, Message::from(connection).command().as_str());
            }
        }
    }

    async fn handle_response(&mut self, id: PeerId, response: Response) {
        match response {
            Response::Headers(headers) => {
                let applied = self.collaborators.headers.apply_headers(headers.headers());
                let full = headers.is_full_batch();
                debug!("{} sent {} headers, {} applied", id, headers.len(), applied);
                if applied > 0 {
                    let height = i32::try_from(self.collaborators.headers.best_height()).unwrap_or(i32::MAX);
                    if let Some(handle) = self.peers.get_mut(&id) {
                        handle.update_height(height);
                    }
                }
                let output = JobOutput::Headers(Arc::new(headers));
                if !self.jobs.complete_from(&JobKey::Headers, id, output).await {
                    debug!("Headers from {} did not answer a request", id);
                }
                if full && applied > 0 {
                    self.request_headers().await;
                }
            }
            Response::Block(block) => {
                let hash = block.block_hash();
                let output = JobOutput::Block(Arc::new(*block));
                if !self.jobs.complete(&JobKey::Block(hash), output).await {
                    debug!("{} sent unrequested block {}", id, hash);
                }
            }
            Response::Tx(tx) => {
                if self.collaborators.mempool.submit(&tx) {
                    debug!("Transaction {} from {} accepted", tx.txid(), id);
                }
            }
            Response::CFHeaders(cfheaders) => {
                self.collaborators.filters.apply_cfheaders(&cfheaders);
                let key = JobKey::CfHeaders(cfheaders.filter_type, cfheaders.stop_hash);
                self.jobs
                    .complete_from(&key, id, JobOutput::CfHeaders(Arc::new(cfheaders)))
                    .await;
            }
            Response::CFilter(cfilter) => {
                self.collaborators.filters.apply_cfilter(&cfilter);
                if !self.jobs.add_cfilter(id, cfilter).await {
                    debug!("{} sent unrequested cfilter", id);
                }
            }
            Response::CFCheckpt(checkpoint) => {
                let key = JobKey::CfCheckpt(checkpoint.filter_type, checkpoint.stop_hash);
                self.jobs
                    .complete_from(&key, id, JobOutput::CfCheckpt(Arc::new(checkpoint)))
                    .await;
            }
            Response::NotFound(not_found) => {
                for hash in not_found.inventories().iter().filter_map(|inv| inv.block_hash()) {
                    if self.jobs.reject(&JobKey::Block(hash), id).await {
                        debug!("{} does not have block {}", id, hash);
                    }
                }
            }
            Response::Inv(inv) => {
                if inv.announces_block() {
                    debug!("{} announced new blocks", id);
                    self.request_headers().await;
                }
            }
            Response::Addr(addr) => {
                let addrs = addr.socket_addrs();
                debug!("{} sent {} addresses", id, addrs.len());
                self.learn_addresses(addrs);
            }
        }
    }

    async fn handle_request(&mut self, id: PeerId, request: Request) {
        match request {
            Request::GetHeaders(getheaders) => {
                let headers = self.collaborators.headers.headers_after(
                    getheaders.locator(),
                    getheaders.stop_hash(),
                    GetHeaders::MAX_HEADERS,
                );
                self.send_to(id, Response::Headers(Headers::new(headers)).into());
            }
            Request::GetData(getdata) => self.serve_getdata(id, getdata).await,
            Request::GetAddr => {
                let time = u32::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
                let sample = self.address_book.sample(MAX_ADDR_SIZE);
                self.send_to(id, Response::Addr(Addr::from_socket_addrs(time, &sample)).into());
            }
            other => {
                debug!("{} sent {}, not served", id, Message::from(other).command().as_str());
            }
        }
    }

    async fn serve_getdata(&mut self, id: PeerId, getdata: GetData) {
        let mut missing = Vec::new();
        for inventory in getdata.inventories() {
            match self.jobs.relay_payload(inventory).await {
                Some(payload) => self.send_to(id, payload),
                None => missing.push(*inventory),
            }
        }
        if !missing.is_empty() {
            self.send_to(id, Response::NotFound(NotFound::new(missing)).into());
        }
    }

    /// One housekeeping pass. Returns whether more work remains.
    async fn housekeeping(&mut self) -> bool {
        if !self.status.is_running() {
            return false;
        }

        let expired = self.jobs.expire(Instant::now()).await;
        if expired > 0 {
            debug!("{} jobs timed out", expired);
        }

        let target = self.config.target_peer_count();
        if target > 0 && self.seed == SeedState::Pending {
            self.resolve_seed();
        }

        let mut connected: HashSet<SocketAddr> = self.peers.values().map(PeerHandle::addr).collect();
        while self.peers.len() < target {
            let Some(addr) = self.address_book.next_candidate(&connected) else {
                break;
            };
            connected.insert(addr);
            self.spawn_peer(addr, Endpoint::Connect);
        }

        self.assign_jobs().await;

        let best_peer_height = self
            .peers
            .values()
            .filter_map(PeerHandle::info)
            .map(|info| i64::from(info.best_height))
            .max();
        let our_height = i64::from(self.collaborators.headers.best_height());
        if best_peer_height.is_some_and(|height| height > our_height)
            && !self.jobs.has_job(&JobKey::Headers).await
        {
            self.request_headers().await;
        }

        let short_of_peers = self.peers.len() < target
            && (self.address_book.has_candidates(&connected) || self.seed == SeedState::Resolving);
        short_of_peers || self.jobs.pending_count().await > 0
    }

    fn resolve_seed(&mut self) {
        let Some(seed) = self.config.seed_node.clone() else {
            self.seed = SeedState::Done;
            return;
        };
        self.seed = SeedState::Resolving;
        let target = seed_target(&seed, self.config.chain.default_port());
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let addrs = match lookup_host(target.as_str()).await {
                Ok(addrs) => addrs.collect(),
                Err(e) => {
                    warn!("Failed to resolve seed node {}: {}", target, e);
                    Vec::new()
                }
            };
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::SeedResolved(addrs));
            }
        });
    }

    fn learn_addresses(&mut self, addrs: Vec<SocketAddr>) {
        let added = addrs
            .into_iter()
            .filter(|addr| self.address_book.insert(*addr))
            .count();
        if added > 0 {
            debug!("Address book grew by {} to {}", added, self.address_book.len());
            self.notify.notify_one();
        }
    }

    async fn request_headers(&self) {
        let task = Task::Headers {
            locator: self.collaborators.headers.locator(),
            stop_hash: BlockHash::all_zeros(),
        };
        drop(self.jobs.dispatch(task).await);
    }

    async fn assign_jobs(&mut self) {
        let mut verified: Vec<PeerId> = self
            .peers
            .values()
            .filter(|peer| peer.is_verified())
            .map(PeerHandle::id)
            .collect();
        if verified.is_empty() {
            return;
        }
        verified.sort();
        for (peer, message) in self.jobs.assign(&verified).await {
            self.send_to(peer, message);
        }
    }

    fn send_to(&self, id: PeerId, message: Message) {
        match self.peers.get(&id) {
            Some(handle) => {
                if !handle.send(message) {
                    debug!("{} is gone, dropping outbound message", id);
                }
            }
            None => debug!("No {} to send to", id),
        }
    }

    fn update_connected(&self) {
        self.status.connected.store(self.peers.len(), Ordering::SeqCst);
    }

    async fn shutdown(&mut self) {
        self.status.stop();
        for listener in self.listeners.drain(..) {
            listener.abort();
        }
        for (_, handle) in self.peers.drain() {
            handle.abort();
            self.collaborators
                .observer
                .peer_disconnected(self.config.chain, handle.addr());
        }
        self.status.verified.write().await.clear();
        self.update_connected();
        for (_, replies) in self.pending_adds.drain() {
            for reply in replies {
                let _ = reply.send(false);
            }
        }
        self.jobs.shutdown().await;
        self.notify.notify_one();
        info!("Peer pool stopped");
    }
}

/// `host:port` to resolve for the seed node.
fn seed_target(seed: &str, default_port: u16) -> String {
    if let Ok(ip) = seed.parse::<IpAddr>() {
        return SocketAddr::new(ip, default_port).to_string();
    }
    let has_port = seed
        .rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok());
    if has_port {
        seed.to_string()
    } else {
        format!("{seed}:{default_port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_address_book_candidates() {
        let mut book = AddressBook::default();
        assert!(book.insert(addr(1)));
        assert!(!book.insert(addr(1)));
        book.insert(addr(2));
        book.insert(addr(3));

        let exclude: HashSet<SocketAddr> = [addr(1)].into_iter().collect();
        assert_eq!(book.next_candidate(&exclude), Some(addr(2)));
        assert_eq!(book.next_candidate(&exclude), Some(addr(3)));
        assert_eq!(book.next_candidate(&exclude), None);
        assert!(!book.has_candidates(&exclude));
        assert!(book.has_candidates(&HashSet::new()));
    }

    #[test]
    fn test_address_book_is_bounded() {
        let mut book = AddressBook::default();
        for port in 0..=u16::try_from(MAX_ADDRESSES).unwrap() {
            book.insert(addr(port));
        }
        assert_eq!(book.len(), MAX_ADDRESSES);
        // The oldest entry was evicted.
        assert!(book.insert(addr(0)));
        assert_eq!(book.sample(1), vec![addr(0)]);
    }

    #[test]
    fn test_seed_target() {
        assert_eq!(seed_target("seed.example.org", 8333), "seed.example.org:8333");
        assert_eq!(seed_target("seed.example.org:18333", 8333), "seed.example.org:18333");
        assert_eq!(seed_target("10.0.0.1", 8333), "10.0.0.1:8333");
        assert_eq!(seed_target("::1", 18444), "[::1]:18444");
    }

    #[tokio::test]
    async fn test_status_flags() {
        let status = PoolStatus::new();
        assert!(status.is_running());
        assert!(status.stop());
        assert!(!status.stop());
        assert_eq!(status.connected(), 0);
        assert_eq!(status.verified_count().await, 0);
    }
}

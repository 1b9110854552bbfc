//! Per-peer connection task.
//!
//! Every peer runs in its own tokio task. The task connects (for outbound
//! peers), performs the handshake, then splits the stream: a writer drains
//! the outbound queue and sends keep-alive pings, while the reader decodes
//! frames and forwards them to the pool as [`PeerEvent`]s.

use std::{fmt, net::SocketAddr, time::Duration};

use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf},
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, interval_at},
};
use tracing::{debug, info, trace, warn};

use crate::client::{
    connection::{ConnectionError, ConnectionManager},
    handshake::{Direction, HandshakeHandler, PeerInfo},
    message::{
        Connection, Message,
        connection::{Ping, Pong, Reject, RejectCode},
    },
};

/// Identifier of a peer, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Any async byte stream usable as a peer socket.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Transport for T {}

/// Lifecycle of a peer as seen by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PeerState {
    /// TCP connection in progress.
    Connecting,
    /// Exchanging `version`/`verack`.
    Handshaking,
    /// Handshake completed, the peer takes jobs.
    Verified,
    /// The connection is gone.
    Disconnected,
}

/// Point-in-time view of one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSummary {
    /// Peer id.
    pub id: PeerId,
    /// Remote address.
    pub addr: SocketAddr,
    /// Who opened the connection.
    pub direction: Direction,
    /// Current state.
    pub state: PeerState,
    /// Handshake results, once verified.
    pub info: Option<PeerInfo>,
}

/// Notifications from peer tasks to the pool.
#[derive(Debug)]
pub enum PeerEvent {
    /// The transport is up and the handshake has started.
    Connected {
        /// Reporting peer.
        id: PeerId,
    },
    /// The handshake completed.
    Verified {
        /// Reporting peer.
        id: PeerId,
        /// What the peer told us about itself.
        info: PeerInfo,
    },
    /// An application message arrived.
    Message {
        /// Reporting peer.
        id: PeerId,
        /// The decoded message.
        message: Message,
    },
    /// The task is exiting.
    Disconnected {
        /// Reporting peer.
        id: PeerId,
        /// Human readable cause.
        reason: String,
    },
}

/// How the peer's transport is obtained.
pub enum Endpoint {
    /// Dial the address.
    Connect,
    /// Use a stream accepted elsewhere.
    Accepted(Box<dyn Transport>),
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Connect => f.write_str("Connect"),
            Endpoint::Accepted(_) => f.write_str("Accepted"),
        }
    }
}

/// Everything a peer task needs to run.
#[derive(Debug, Clone)]
pub struct PeerContext {
    /// Peer id.
    pub id: PeerId,
    /// Remote address.
    pub addr: SocketAddr,
    /// Frame I/O.
    pub connection: ConnectionManager,
    /// Handshake parameters.
    pub handshake: HandshakeHandler,
    /// Keep-alive ping period.
    pub ping_interval: Duration,
    /// Malformed payloads tolerated before disconnecting.
    pub max_malformed: u32,
    /// Event sink owned by the pool.
    pub events: mpsc::UnboundedSender<PeerEvent>,
}

/// Pool-side handle of a running peer task.
#[derive(Debug)]
pub struct PeerHandle {
    id: PeerId,
    addr: SocketAddr,
    direction: Direction,
    state: PeerState,
    info: Option<PeerInfo>,
    outbound: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

impl PeerHandle {
    /// Spawns the peer task.
    pub fn spawn(context: PeerContext, endpoint: Endpoint) -> Self {
        let direction = match endpoint {
            Endpoint::Connect => Direction::Outbound,
            Endpoint::Accepted(_) => Direction::Inbound,
        };
        let state = match direction {
            Direction::Outbound => PeerState::Connecting,
            Direction::Inbound => PeerState::Handshaking,
        };
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let id = context.id;
        let addr = context.addr;
        let task = tokio::spawn(run(context, endpoint, outbound.clone(), outbound_rx));

        Self {
            id,
            addr,
            direction,
            state,
            info: None,
            outbound,
            task,
        }
    }

    /// Queues a message for the writer. Never blocks.
    pub fn send(&self, message: Message) -> bool {
        self.outbound.send(message).is_ok()
    }

    /// Stops the task immediately.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Peer id.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Remote address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connection direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current state.
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Handshake results, once verified.
    pub fn info(&self) -> Option<&PeerInfo> {
        self.info.as_ref()
    }

    /// Whether the handshake completed.
    pub fn is_verified(&self) -> bool {
        self.state == PeerState::Verified
    }

    pub(crate) fn set_handshaking(&mut self) {
        if self.state == PeerState::Connecting {
            self.state = PeerState::Handshaking;
        }
    }

    pub(crate) fn set_verified(&mut self, info: PeerInfo) {
        self.state = PeerState::Verified;
        self.info = Some(info);
    }

    pub(crate) fn set_disconnected(&mut self) {
        self.state = PeerState::Disconnected;
    }

    pub(crate) fn update_height(&mut self, height: i32) {
        if let Some(info) = self.info.as_mut()
            && height > info.best_height
        {
            info.best_height = height;
        }
    }

    /// Snapshot for callers outside the pool.
    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            id: self.id,
            addr: self.addr,
            direction: self.direction,
            state: self.state,
            info: self.info.clone(),
        }
    }
}

/// Aborts the wrapped task when dropped.
struct TaskGuard(JoinHandle<ConnectionError>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn run(
    context: PeerContext,
    endpoint: Endpoint,
    outbound: mpsc::UnboundedSender<Message>,
    outbound_rx: mpsc::UnboundedReceiver<Message>,
) {
    let id = context.id;
    let events = context.events.clone();
    let reason = match session(context, endpoint, outbound, outbound_rx).await {
        Ok(()) => "event channel closed".to_string(),
        Err(err) => err.to_string(),
    };
    debug!("{} disconnected: {}", id, reason);
    let _ = events.send(PeerEvent::Disconnected { id, reason });
}

async fn session(
    context: PeerContext,
    endpoint: Endpoint,
    outbound: mpsc::UnboundedSender<Message>,
    outbound_rx: mpsc::UnboundedReceiver<Message>,
) -> Result<(), ConnectionError> {
    let (mut stream, direction): (Box<dyn Transport>, Direction) = match endpoint {
        Endpoint::Connect => (
            Box::new(context.connection.connect(context.addr).await?),
            Direction::Outbound,
        ),
        Endpoint::Accepted(stream) => (stream, Direction::Inbound),
    };
    if context
        .events
        .send(PeerEvent::Connected { id: context.id })
        .is_err()
    {
        return Ok(());
    }

    let info = context
        .handshake
        .perform_handshake(&context.connection, &mut stream, context.addr, direction)
        .await?;
    if context
        .events
        .send(PeerEvent::Verified {
            id: context.id,
            info,
        })
        .is_err()
    {
        return Ok(());
    }

    let (reader, writer) = tokio::io::split(stream);
    let mut writer_task = TaskGuard(tokio::spawn(write_loop(
        context.connection,
        writer,
        outbound_rx,
        context.ping_interval,
    )));

    tokio::select! {
        result = read_loop(&context, reader, outbound) => result,
        err = &mut writer_task.0 => match err {
            Ok(err) => Err(err),
            Err(join) => Err(ConnectionError::ProtocolViolation(format!("writer stopped: {join}"))),
        },
    }
}

async fn write_loop(
    connection: ConnectionManager,
    mut writer: WriteHalf<Box<dyn Transport>>,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    ping_interval: Duration,
) -> ConnectionError {
    let mut ping_timer = interval_at(Instant::now() + ping_interval, ping_interval);
    loop {
        let message = tokio::select! {
            message = outbound_rx.recv() => match message {
                Some(message) => message,
                None => return ConnectionError::ConnectionClosed,
            },
            _ = ping_timer.tick() => Connection::Ping(Ping::new()).into(),
        };
        if let Err(err) = connection.send_message(&mut writer, message).await {
            return err;
        }
    }
}

async fn read_loop(
    context: &PeerContext,
    mut reader: ReadHalf<Box<dyn Transport>>,
    outbound: mpsc::UnboundedSender<Message>,
) -> Result<(), ConnectionError> {
    let id = context.id;
    let mut strikes: u32 = 0;

    loop {
        let message = match context.connection.receive_message(&mut reader).await {
            Ok(message) => message,
            Err(err) if err.is_unknown_command() => {
                debug!("{} sent unsupported message: {}", id, err);
                continue;
            }
            Err(ConnectionError::Malformed { command, source }) => {
                strikes = strikes.saturating_add(1);
                warn!(
                    "{} sent malformed {} ({}/{}): {}",
                    id, command, strikes, context.max_malformed, source
                );
                let reject = Reject::new(command.clone(), RejectCode::Malformed, "error parsing message");
                let _ = outbound.send(Connection::Reject(reject).into());
                if strikes >= context.max_malformed {
                    return Err(ConnectionError::ProtocolViolation(format!(
                        "{strikes} malformed messages"
                    )));
                }
                continue;
            }
            Err(err) => return Err(err),
        };

        match message {
            Message::Connection(Connection::Ping(ping)) => {
                let _ = outbound.send(Connection::Pong(Pong::from(ping)).into());
            }
            Message::Connection(Connection::Pong(pong)) => {
                trace!("{} answered ping {}", id, pong.nonce());
            }
            Message::Connection(Connection::Reject(reject)) => {
                warn!(
                    "{} rejected {}: {} {}",
                    id,
                    reject.message(),
                    reject.code(),
                    reject.reason()
                );
            }
            Message::Connection(Connection::Version(_) | Connection::VerAck) => {
                debug!("{} repeated handshake message, ignoring", id);
            }
            message => {
                if context
                    .events
                    .send(PeerEvent::Message { id, message })
                    .is_err()
                {
                    info!("{} stopping, pool is gone", id);
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;
    use crate::{
        chain::Chain,
        client::{
            connection::ConnectionConfig,
            message::{Request, Response, response::Inv},
            network::NetworkMessage,
        },
        config::Config,
        util::test_util::RemoteNode,
    };

    fn context(max_malformed: u32) -> (PeerContext, mpsc::UnboundedReceiver<PeerEvent>) {
        let config = Config::new(Chain::UnitTest);
        let (events, events_rx) = mpsc::unbounded_channel();
        let context = PeerContext {
            id: PeerId(1),
            addr: "127.0.0.1:18444".parse().unwrap(),
            connection: ConnectionManager::new(ConnectionConfig::from(&config)),
            handshake: HandshakeHandler::new(&config, 42, 0),
            ping_interval: Duration::from_secs(60),
            max_malformed,
            events,
        };
        (context, events_rx)
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<PeerEvent>) -> PeerEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_verified_then_forwarded() {
        let (context, mut events) = context(3);
        let (local, remote) = duplex(64 * 1024);
        let handle = PeerHandle::spawn(context, Endpoint::Accepted(Box::new(local)));
        assert_eq!(handle.direction(), Direction::Inbound);

        let mut remote = RemoteNode::connect(Chain::UnitTest, remote, 9).await.unwrap();
        assert!(matches!(next_event(&mut events).await, PeerEvent::Connected { .. }));
        match next_event(&mut events).await {
            PeerEvent::Verified { id, info } => {
                assert_eq!(id, PeerId(1));
                assert_eq!(info.best_height, 9);
            }
            other => panic!("unexpected event {other:?}"),
        }

        remote.send(Request::GetAddr.into()).await.unwrap();
        match next_event(&mut events).await {
            PeerEvent::Message { message, .. } => assert_eq!(message, Message::from(Request::GetAddr)),
            other => panic!("unexpected event {other:?}"),
        }

        assert!(handle.send(Response::Inv(Inv::new(Vec::new())).into()));
        let received = remote.recv().await.unwrap();
        assert_eq!(received, Message::from(Response::Inv(Inv::new(Vec::new()))));
    }

    #[tokio::test]
    async fn test_ping_answered_by_peer_task() {
        let (context, _events) = context(3);
        let (local, remote) = duplex(64 * 1024);
        let _handle = PeerHandle::spawn(context, Endpoint::Accepted(Box::new(local)));

        let mut remote = RemoteNode::connect(Chain::UnitTest, remote, 0).await.unwrap();
        remote
            .send(Connection::Ping(Ping::with_nonce(31)).into())
            .await
            .unwrap();
        assert_eq!(
            remote.recv().await.unwrap(),
            Message::from(Connection::Pong(Pong::new(31)))
        );
    }

    #[tokio::test]
    async fn test_malformed_messages_strike_out() {
        let (context, mut events) = context(2);
        let (local, remote) = duplex(64 * 1024);
        let _handle = PeerHandle::spawn(context, Endpoint::Accepted(Box::new(local)));
        let mut remote = RemoteNode::connect(Chain::UnitTest, remote, 0).await.unwrap();

        // A ping frame with a 3 byte payload.
        let mut frame = NetworkMessage::new(Chain::UnitTest, Connection::Ping(Ping::with_nonce(1)).into())
            .unwrap()
            .to_bytes()
            .unwrap();
        frame.truncate(27);
        frame[16..20].copy_from_slice(&3u32.to_le_bytes());
        let checksum = Chain::UnitTest.checksum(&frame[24..]);
        frame[20..24].copy_from_slice(&checksum);

        remote.write_raw(&frame).await.unwrap();
        match remote.recv().await.unwrap() {
            Message::Connection(Connection::Reject(reject)) => {
                assert_eq!(reject.code(), RejectCode::Malformed);
                assert_eq!(reject.message(), "ping");
            }
            other => panic!("unexpected message {other:?}"),
        }

        remote.write_raw(&frame).await.unwrap();
        loop {
            if let PeerEvent::Disconnected { reason, .. } = next_event(&mut events).await {
                assert!(reason.contains("malformed"), "{reason}");
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_handshake_failure_reports_disconnect() {
        let (context, mut events) = context(3);
        let (local, remote) = duplex(1024);
        let _handle = PeerHandle::spawn(context, Endpoint::Accepted(Box::new(local)));
        drop(remote);

        loop {
            if let PeerEvent::Disconnected { id, .. } = next_event(&mut events).await {
                assert_eq!(id, PeerId(1));
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_outbound_connect_failure() {
        let (mut context, mut events) = context(3);
        // Nothing listens on port 1.
        context.addr = "127.0.0.1:1".parse().unwrap();
        let handle = PeerHandle::spawn(context, Endpoint::Connect);
        assert_eq!(handle.state(), PeerState::Connecting);

        assert!(matches!(
            next_event(&mut events).await,
            PeerEvent::Disconnected { .. }
        ));
    }
}

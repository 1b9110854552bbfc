//! Version handshake for P2P connections.
//!
//! Outbound connections send `version` first; inbound connections wait for
//! the remote `version` before answering. Either way the handshake completes
//! once both sides have exchanged `version` and `verack`.

use std::{fmt, net::SocketAddr, time::Duration};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::{
    client::{
        connection::{ConnectionError, ConnectionManager},
        message::{
            Connection, Message,
            connection::{MIN_PEER_PROTOCOL_VERSION, Pong, Version},
        },
    },
    config::Config,
    p2p::ServiceFlags,
};

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    /// The remote connected to us.
    Inbound,
    /// We connected to the remote.
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

/// Information about a peer after successful handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    /// The socket address of the peer.
    pub addr: SocketAddr,
    /// The protocol version used by the peer.
    pub version: i32,
    /// The services offered by the peer.
    #[serde(serialize_with = "serialize_services")]
    pub services: ServiceFlags,
    /// The timestamp from the peer's version message.
    pub timestamp: i64,
    /// The user agent string of the peer.
    pub user_agent: String,
    /// The best block height known to the peer.
    pub best_height: i32,
    /// Whether the peer relays transactions.
    pub relay: bool,
    /// The peer asked for wtxid based relay (BIP 339).
    pub wtxid_relay: bool,
    /// The peer accepts `addrv2` (BIP 155).
    pub addr_v2: bool,
}

fn serialize_services<S: serde::Serializer>(
    services: &ServiceFlags,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(services.to_u64())
}

impl PeerInfo {
    fn from_version(addr: SocketAddr, version: &Version) -> Self {
        Self {
            addr,
            version: version.version(),
            services: version.services(),
            timestamp: version.timestamp(),
            user_agent: version.user_agent().to_string(),
            best_height: version.start_height(),
            relay: version.relay(),
            wtxid_relay: false,
            addr_v2: false,
        }
    }
}

/// Handles the Bitcoin P2P handshake protocol.
#[derive(Debug, Clone)]
pub struct HandshakeHandler {
    user_agent: String,
    start_height: i32,
    services: ServiceFlags,
    relay: bool,
    nonce: u64,
    timeout: Duration,
}

impl HandshakeHandler {
    /// Creates a handler advertising `start_height`.
    ///
    /// `nonce` identifies this node; a remote echoing it is ourselves.
    pub fn new(config: &Config, nonce: u64, start_height: i32) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            start_height,
            services: config.service_flags(),
            relay: true,
            nonce,
            timeout: config.handshake_timeout,
        }
    }

    /// Sets the services flags to advertise in the version message.
    pub fn with_services(mut self, services: ServiceFlags) -> Self {
        self.services = services;
        self
    }

    /// Sets whether we ask the peer to relay transactions.
    pub fn with_relay(mut self, relay: bool) -> Self {
        self.relay = relay;
        self
    }

    /// Performs the complete handshake with a peer.
    ///
    /// The whole exchange is bounded by the handshake timeout.
    pub async fn perform_handshake<S>(
        &self,
        connection: &ConnectionManager,
        stream: &mut S,
        peer_addr: SocketAddr,
        direction: Direction,
    ) -> Result<PeerInfo, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        debug!("Starting {} handshake with peer: {}", direction, peer_addr);
        let exchange = self.exchange(connection, stream, peer_addr, direction);
        let peer_info = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ConnectionError::Timeout(self.timeout))??;

        info!(
            "Handshake completed with {} peer {}: version={}, user_agent={}, height={}",
            direction, peer_addr, peer_info.version, peer_info.user_agent, peer_info.best_height
        );
        Ok(peer_info)
    }

    async fn exchange<S>(
        &self,
        connection: &ConnectionManager,
        stream: &mut S,
        peer_addr: SocketAddr,
        direction: Direction,
    ) -> Result<PeerInfo, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + ?Sized,
    {
        if direction == Direction::Outbound {
            self.send_version(connection, stream, peer_addr).await?;
        }

        let mut peer_info: Option<PeerInfo> = None;
        loop {
            let message = match connection.receive_message(stream).await? {
                Message::Connection(message) => message,
                other => {
                    return Err(ConnectionError::ProtocolViolation(format!(
                        "{} before handshake completed",
                        other.command().as_str()
                    )));
                }
            };

            match message {
                Connection::Version(version) => {
                    if peer_info.is_some() {
                        return Err(ConnectionError::ProtocolViolation(
                            "duplicate version".to_string(),
                        ));
                    }
                    self.check_version(&version)?;
                    debug!(
                        "Peer {} version: version={}, services={}, user_agent={}, height={}",
                        peer_addr,
                        version.version(),
                        version.services(),
                        version.user_agent(),
                        version.start_height()
                    );
                    peer_info = Some(PeerInfo::from_version(peer_addr, &version));

                    if direction == Direction::Inbound {
                        self.send_version(connection, stream, peer_addr).await?;
                    }
                    connection
                        .send_message(stream, Connection::VerAck.into())
                        .await?;
                }
                Connection::VerAck => {
                    return peer_info.ok_or_else(|| {
                        ConnectionError::ProtocolViolation("verack before version".to_string())
                    });
                }
                Connection::Ping(ping) => {
                    connection
                        .send_message(stream, Connection::Pong(Pong::from(ping)).into())
                        .await?;
                }
                Connection::WtxIdRelay => {
                    debug!("Peer {} supports wtxid relay", peer_addr);
                    if let Some(info) = peer_info.as_mut() {
                        info.wtxid_relay = true;
                    }
                }
                Connection::SendAddrV2 => {
                    debug!("Peer {} supports addrv2", peer_addr);
                    if let Some(info) = peer_info.as_mut() {
                        info.addr_v2 = true;
                    }
                }
                Connection::Reject(reject) => {
                    warn!(
                        "Peer {} rejected {} during handshake: {} {}",
                        peer_addr,
                        reject.message(),
                        reject.code(),
                        reject.reason()
                    );
                }
                ignored @ (Connection::Pong(_)
                | Connection::SendHeaders
                | Connection::SendCmpct(_)
                | Connection::FeeFilter(_)) => {
                    debug!("Ignoring {} during handshake", Message::from(ignored).command().as_str());
                }
                other => {
                    return Err(ConnectionError::ProtocolViolation(format!(
                        "{} before handshake completed",
                        Message::from(other).command().as_str()
                    )));
                }
            }
        }
    }

    fn check_version(&self, version: &Version) -> Result<(), ConnectionError> {
        if version.nonce() == self.nonce {
            return Err(ConnectionError::SelfConnection);
        }
        if version.version() < MIN_PEER_PROTOCOL_VERSION {
            return Err(ConnectionError::ObsoleteVersion {
                version: version.version(),
                minimum: MIN_PEER_PROTOCOL_VERSION,
            });
        }
        Ok(())
    }

    async fn send_version<S>(
        &self,
        connection: &ConnectionManager,
        stream: &mut S,
        peer_addr: SocketAddr,
    ) -> Result<(), ConnectionError>
    where
        S: AsyncWrite + Unpin + ?Sized,
    {
        let mut version = Version::new(
            peer_addr,
            self.services,
            self.user_agent.clone(),
            self.start_height,
            self.relay,
        );
        version.nonce = self.nonce;
        connection
            .send_message(stream, Connection::Version(version).into())
            .await
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
            message::{Request, connection::Ping},
        },
    };

    fn setup() -> (Config, ConnectionManager, SocketAddr) {
        let config = Config::new(Chain::UnitTest).with_handshake_timeout(Duration::from_secs(2));
        let connection = ConnectionManager::new(ConnectionConfig::from(&config));
        (config, connection, "127.0.0.1:18444".parse().unwrap())
    }

    #[tokio::test]
    async fn test_outbound_and_inbound_complete() {
        let (config, connection, addr) = setup();
        let (mut a, mut b) = duplex(64 * 1024);

        let outbound = HandshakeHandler::new(&config, 1, 10);
        let inbound = HandshakeHandler::new(&config, 2, 20);

        let (left, right) = tokio::join!(
            outbound.perform_handshake(&connection, &mut a, addr, Direction::Outbound),
            inbound.perform_handshake(&connection, &mut b, addr, Direction::Inbound),
        );
        assert_eq!(left.unwrap().best_height, 20);
        assert_eq!(right.unwrap().best_height, 10);
    }

    #[tokio::test]
    async fn test_self_connection_detected() {
        let (config, connection, addr) = setup();
        let (mut a, mut b) = duplex(64 * 1024);

        let outbound = HandshakeHandler::new(&config, 7, 0);
        let inbound = HandshakeHandler::new(&config, 7, 0);

        let (_, right) = tokio::join!(
            outbound.perform_handshake(&connection, &mut a, addr, Direction::Outbound),
            inbound.perform_handshake(&connection, &mut b, addr, Direction::Inbound),
        );
        assert!(matches!(right, Err(ConnectionError::SelfConnection)));
    }

    #[tokio::test]
    async fn test_obsolete_version_rejected() {
        let (config, connection, addr) = setup();
        let (mut a, mut b) = duplex(64 * 1024);

        let mut old = Version::new(addr, ServiceFlags::NONE, "/old/".into(), 0, false);
        old.version = 60002;
        connection
            .send_message(&mut a, Connection::Version(old).into())
            .await
            .unwrap();

        let result = HandshakeHandler::new(&config, 1, 0)
            .perform_handshake(&connection, &mut b, addr, Direction::Inbound)
            .await;
        assert!(matches!(
            result,
            Err(ConnectionError::ObsoleteVersion { version: 60002, .. })
        ));
    }

    #[tokio::test]
    async fn test_application_message_is_violation() {
        let (config, connection, addr) = setup();
        let (mut a, mut b) = duplex(64 * 1024);

        connection
            .send_message(&mut a, Request::GetAddr.into())
            .await
            .unwrap();
        let result = HandshakeHandler::new(&config, 1, 0)
            .perform_handshake(&connection, &mut b, addr, Direction::Inbound)
            .await;
        assert!(matches!(result, Err(ConnectionError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn test_ping_answered_and_features_recorded() {
        let (config, connection, addr) = setup();
        let (mut a, mut b) = duplex(64 * 1024);

        let remote = async {
            let version = Version::new(addr, ServiceFlags::NETWORK, "/remote/".into(), 5, true);
            connection.send_message(&mut a, Connection::Version(version).into()).await.unwrap();
            connection.send_message(&mut a, Connection::WtxIdRelay.into()).await.unwrap();
            connection
                .send_message(&mut a, Connection::Ping(Ping::with_nonce(77)).into())
                .await
                .unwrap();

            // Our version, our verack, then the pong.
            let mut seen = Vec::new();
            for _ in 0..3 {
                seen.push(connection.receive_message(&mut a).await.unwrap());
            }
            connection.send_message(&mut a, Connection::VerAck.into()).await.unwrap();
            seen
        };
        let handler = HandshakeHandler::new(&config, 1, 0);
        let local = handler.perform_handshake(
            &connection,
            &mut b,
            addr,
            Direction::Inbound,
        );

        let (seen, info) = tokio::join!(remote, local);
        let info = info.unwrap();
        assert!(info.wtxid_relay);
        assert!(!info.addr_v2);
        assert_eq!(info.services, ServiceFlags::NETWORK);
        assert!(seen.contains(&Message::from(Connection::Pong(Pong::new(77)))));
    }

    #[tokio::test]
    async fn test_handshake_times_out() {
        let (config, connection, addr) = setup();
        let config = config.with_handshake_timeout(Duration::from_millis(50));
        let (_a, mut b) = duplex(1024);

        let result = HandshakeHandler::new(&config, 1, 0)
            .perform_handshake(&connection, &mut b, addr, Direction::Outbound)
            .await;
        assert!(matches!(result, Err(ConnectionError::Timeout(_))));
    }
}

//! Framed connection I/O for the P2P protocol.
//!
//! This module establishes TCP connections and moves whole frames over any
//! async byte stream, with timeouts on every operation.

use std::{io, net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, error, info, trace};

use crate::{
    chain::Chain,
    client::{
        message::Message,
        network::{NetworkError, NetworkMessage, NetworkMessageHeader},
    },
    config::Config,
    consensus::Decodable,
};

/// Errors that can occur during connection management.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// IO error during connection operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Network protocol error.
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Connection timeout.
    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    /// Connection closed by peer.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// The peer sent something the protocol does not allow at this point.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The peer speaks a protocol version older than we accept.
    #[error("Peer protocol version {version} is below {minimum}")]
    ObsoleteVersion {
        /// Version advertised by the peer
        version: i32,
        /// Oldest version accepted
        minimum: i32,
    },

    /// The remote echoed our own version nonce.
    #[error("Connected to self")]
    SelfConnection,

    /// A well-framed message whose payload failed to decode.
    #[error("Malformed {command} message: {source}")]
    Malformed {
        /// Command of the offending frame
        command: String,
        /// Decode failure
        source: NetworkError,
    },
}

impl ConnectionError {
    /// Whether the error is confined to one message payload.
    pub fn is_payload_error(&self) -> bool {
        matches!(self, ConnectionError::Malformed { .. })
    }

    /// Whether the frame carried a command this node does not know.
    pub fn is_unknown_command(&self) -> bool {
        matches!(
            self,
            ConnectionError::Network(NetworkError::UnknownCommand(_))
        )
    }
}

/// Configuration for connection management.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    /// Chain whose magic frames carry.
    pub chain: Chain,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Read timeout for receiving messages.
    pub read_timeout: Duration,
    /// Write timeout for sending messages.
    pub write_timeout: Duration,
    /// Maximum message size.
    pub max_message_size: u32,
}

impl ConnectionConfig {
    /// Default connection settings for `chain`.
    pub fn for_chain(chain: Chain) -> Self {
        Self::from(&Config::new(chain))
    }
}

impl From<&Config> for ConnectionConfig {
    fn from(config: &Config) -> Self {
        Self {
            chain: config.chain,
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            max_message_size: NetworkMessage::MAX_PAYLOAD_SIZE,
        }
    }
}

/// Moves frames between this node and one peer.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionManager {
    config: ConnectionConfig,
}

impl ConnectionManager {
    /// Creates a new connection manager with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Establishes a TCP connection to the specified peer address.
    pub async fn connect(&self, addr: SocketAddr) -> Result<TcpStream, ConnectionError> {
        debug!("Connecting to peer: {}", addr);

        let stream = timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ConnectionError::Timeout(self.config.connect_timeout))??;
        stream.set_nodelay(true)?;

        info!("Connected to peer: {}", addr);
        Ok(stream)
    }

    /// Frames `message` and writes it to `writer`.
    pub async fn send_message<W>(&self, writer: &mut W, message: Message) -> Result<(), ConnectionError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let network_msg = NetworkMessage::new(self.config.chain, message)?;
        let bytes = network_msg.to_bytes()?;

        trace!(
            "Sending {} message: {} bytes",
            network_msg.header.command,
            bytes.len()
        );
        self.write_frame(writer, &bytes).await
    }

    /// Writes an already framed message and flushes it.
    pub async fn write_frame<W>(&self, writer: &mut W, bytes: &[u8]) -> Result<(), ConnectionError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let write_timeout = self.config.write_timeout;
        let write = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        };
        match timeout(write_timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Failed to send message: {}", e);
                Err(closed_or_io(e))
            }
            Err(_) => {
                error!("Send message timeout after {:?}", write_timeout);
                Err(ConnectionError::Timeout(write_timeout))
            }
        }
    }

    /// Reads and decodes one message from `reader`.
    ///
    /// Framing failures (magic, size, checksum) leave the stream unusable.
    /// Payload decode failures and unknown commands consume the whole frame,
    /// so the caller may keep reading; see
    /// [`ConnectionError::is_payload_error`].
    pub async fn receive_message<R>(&self, reader: &mut R) -> Result<Message, ConnectionError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let header_bytes = self.read_exact(reader, NetworkMessageHeader::SIZE).await?;
        let header = NetworkMessageHeader::consensus_decode(&mut header_bytes.as_slice())
            .map_err(|_| NetworkError::InvalidCommand(hex::encode(&header_bytes)))?;
        header.validate_envelope(self.config.chain, self.config.max_message_size)?;

        let payload_size = usize::try_from(header.length)
            .map_err(|_| NetworkError::PayloadTooLarge {
                size: header.length,
                max: self.config.max_message_size,
            })?;
        let payload_bytes = self.read_exact(reader, payload_size).await?;
        header.validate_payload(self.config.chain, &payload_bytes)?;

        let message = header
            .message_command()
            .decode_payload(self.config.chain, &payload_bytes)
            .map_err(|source| {
                if source.is_payload_error() {
                    ConnectionError::Malformed {
                        command: header.command.to_string(),
                        source,
                    }
                } else {
                    ConnectionError::Network(source)
                }
            })?;
        trace!("Received {} message: {} bytes", header.command, payload_size);
        Ok(message)
    }

    /// Reads exactly `len` bytes, bounded by the read timeout.
    async fn read_exact<R>(&self, reader: &mut R, len: usize) -> Result<Vec<u8>, ConnectionError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buffer = vec![0u8; len];
        if len == 0 {
            return Ok(buffer);
        }
        timeout(self.config.read_timeout, reader.read_exact(&mut buffer))
            .await
            .map_err(|_| ConnectionError::Timeout(self.config.read_timeout))?
            .map_err(closed_or_io)?;
        Ok(buffer)
    }

    /// Chain whose frames this manager handles.
    pub fn chain(&self) -> Chain {
        self.config.chain
    }

    /// Connection settings.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

fn closed_or_io(err: io::Error) -> ConnectionError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => ConnectionError::ConnectionClosed,
        _ => ConnectionError::Io(err),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;
    use crate::client::message::{
        Connection,
        connection::{Ping, Version},
    };
    use crate::p2p::ServiceFlags;

    fn manager(chain: Chain) -> ConnectionManager {
        ConnectionManager::new(ConnectionConfig {
            read_timeout: Duration::from_millis(200),
            ..ConnectionConfig::for_chain(chain)
        })
    }

    #[tokio::test]
    async fn test_send_and_receive_over_duplex() {
        let manager = manager(Chain::UnitTest);
        let (mut local, mut remote) = duplex(64 * 1024);

        let peer = "127.0.0.1:18444".parse().unwrap();
        let version: Message =
            Connection::Version(Version::new(peer, ServiceFlags::NONE, "/t/".into(), 3, true)).into();
        manager.send_message(&mut local, version.clone()).await.unwrap();
        manager.send_message(&mut local, Connection::VerAck.into()).await.unwrap();

        assert_eq!(manager.receive_message(&mut remote).await.unwrap(), version);
        assert_eq!(
            manager.receive_message(&mut remote).await.unwrap(),
            Message::from(Connection::VerAck)
        );
    }

    #[tokio::test]
    async fn test_closed_stream() {
        let manager = manager(Chain::UnitTest);
        let (local, mut remote) = duplex(1024);
        drop(local);

        let result = manager.receive_message(&mut remote).await;
        assert!(matches!(result, Err(ConnectionError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let manager = manager(Chain::UnitTest);
        let (_local, mut remote) = duplex(1024);

        let result = manager.receive_message(&mut remote).await;
        assert!(matches!(result, Err(ConnectionError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_wrong_chain_is_rejected() {
        let sender = manager(Chain::Bitcoin);
        let receiver = manager(Chain::Litecoin);
        let (mut local, mut remote) = duplex(1024);

        sender.send_message(&mut local, Connection::VerAck.into()).await.unwrap();
        let result = receiver.receive_message(&mut remote).await;
        assert!(matches!(
            result,
            Err(ConnectionError::Network(NetworkError::InvalidMagic { .. }))
        ));
    }

    #[tokio::test]
    async fn test_malformed_payload_keeps_stream_aligned() {
        let manager = manager(Chain::UnitTest);
        let (mut local, mut remote) = duplex(1024);

        let mut frame = NetworkMessage::new(Chain::UnitTest, Connection::Ping(Ping::with_nonce(5)).into())
            .unwrap()
            .to_bytes()
            .unwrap();
        // Shorten the payload to 7 bytes and fix up length and checksum.
        frame.truncate(NetworkMessageHeader::SIZE + 7);
        frame[16..20].copy_from_slice(&7u32.to_le_bytes());
        let checksum = Chain::UnitTest.checksum(&frame[NetworkMessageHeader::SIZE..]);
        frame[20..24].copy_from_slice(&checksum);
        manager.write_frame(&mut local, &frame).await.unwrap();
        manager.send_message(&mut local, Connection::VerAck.into()).await.unwrap();

        let err = manager.receive_message(&mut remote).await.unwrap_err();
        assert!(err.is_payload_error());
        assert_eq!(
            manager.receive_message(&mut remote).await.unwrap(),
            Message::from(Connection::VerAck)
        );
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_before_read() {
        let manager = ConnectionManager::new(ConnectionConfig {
            max_message_size: 4,
            ..ConnectionConfig::for_chain(Chain::UnitTest)
        });
        let (mut local, mut remote) = duplex(1024);

        manager
            .send_message(&mut local, Connection::Ping(Ping::with_nonce(1)).into())
            .await
            .unwrap();
        assert!(matches!(
            manager.receive_message(&mut remote).await,
            Err(ConnectionError::Network(NetworkError::PayloadTooLarge { size: 8, max: 4 }))
        ));
    }
}

//! Network message framing for the Bitcoin P2P protocol.
//!
//! This module wraps and unwraps message payloads in the wire frame:
//! magic bytes, a NUL-padded command, the payload length and a checksum.

use bitcoin::p2p::message::CommandString;
use thiserror::Error;

use crate::{
    chain::Chain,
    client::message::{Message, MessageCommand},
    consensus::{Decodable, Encodable, EncodeDecodeError},
    io::{Error as IoError, ErrorKind, Read, Write},
    p2p::Magic,
};

/// Length of the command field in a frame header.
const COMMAND_SIZE: usize = 12;

/// Errors that can occur during network message handling.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// IO error during network operations.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// Invalid magic bytes in message header.
    #[error("Invalid magic bytes: expected {expected:08x}, got {actual:08x}")]
    InvalidMagic {
        /// The expected magic bytes value
        expected: u32,
        /// The actual magic bytes value received
        actual: u32,
    },

    /// Message payload too large.
    #[error("Message payload too large: {size} bytes (max: {max} bytes)")]
    PayloadTooLarge {
        /// The actual payload size in bytes
        size: u32,
        /// The maximum allowed payload size in bytes
        max: u32,
    },

    /// The header length does not match the bytes that follow it.
    #[error("Payload length mismatch: header says {declared} bytes, got {actual}")]
    LengthMismatch {
        /// Length announced by the header
        declared: u32,
        /// Bytes actually present
        actual: usize,
    },

    /// Invalid checksum in message header.
    #[error("Invalid checksum: expected {expected:08x}, got {actual:08x}")]
    InvalidChecksum {
        /// The expected checksum value
        expected: u32,
        /// The actual checksum value received
        actual: u32,
    },

    /// Invalid command string in message header.
    #[error("Invalid command string: {0}")]
    InvalidCommand(String),

    /// Well-formed command this node does not understand.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A message defined without payload arrived with one.
    #[error("Unexpected payload of {0} bytes")]
    UnexpectedPayload(usize),

    /// Consensus encoding/decoding error.
    #[error("Consensus error: {0}")]
    Consensus(#[from] EncodeDecodeError),
}

impl NetworkError {
    /// Whether the error concerns one message payload rather than the framing.
    ///
    /// Payload errors leave the stream aligned on the next frame, so the peer
    /// can be given another chance.
    pub fn is_payload_error(&self) -> bool {
        matches!(
            self,
            NetworkError::Consensus(_) | NetworkError::UnexpectedPayload(_)
        )
    }
}

/// Bitcoin P2P network message header.
///
/// The header contains metadata about the message including magic bytes,
/// command string, payload length, and checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkMessageHeader {
    /// Network magic bytes to identify the chain.
    pub magic: Magic,
    /// Command string (null-padded to 12 bytes).
    pub command: CommandString,
    /// Length of the payload in bytes.
    pub length: u32,
    /// First 4 bytes of SHA256(SHA256(payload)).
    pub checksum: [u8; 4],
}

impl NetworkMessageHeader {
    /// Size of the network message header in bytes.
    pub const SIZE: usize = 24; // 4 (magic) + 12 (command) + 4 (length) + 4 (checksum)

    /// Creates a header describing `payload` on `chain`.
    pub fn new(chain: Chain, command: CommandString, payload: &[u8]) -> Result<Self, NetworkError> {
        let length = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= NetworkMessage::MAX_PAYLOAD_SIZE)
            .ok_or(NetworkError::PayloadTooLarge {
                size: u32::try_from(payload.len()).unwrap_or(u32::MAX),
                max: NetworkMessage::MAX_PAYLOAD_SIZE,
            })?;

        Ok(Self {
            magic: chain.magic(),
            command,
            length,
            checksum: chain.checksum(payload),
        })
    }

    /// Checks the magic and the announced size before any payload is read.
    pub fn validate_envelope(&self, chain: Chain, max_size: u32) -> Result<(), NetworkError> {
        let expected = chain.magic();
        if self.magic != expected {
            return Err(NetworkError::InvalidMagic {
                expected: expected.to_u32(),
                actual: self.magic.to_u32(),
            });
        }
        if self.length > max_size {
            return Err(NetworkError::PayloadTooLarge {
                size: self.length,
                max: max_size,
            });
        }
        Ok(())
    }

    /// Checks the payload length and checksum.
    pub fn validate_payload(&self, chain: Chain, payload: &[u8]) -> Result<(), NetworkError> {
        if usize::try_from(self.length).ok() != Some(payload.len()) {
            return Err(NetworkError::LengthMismatch {
                declared: self.length,
                actual: payload.len(),
            });
        }

        let expected = chain.checksum(payload);
        if self.checksum != expected {
            return Err(NetworkError::InvalidChecksum {
                expected: u32::from_le_bytes(expected),
                actual: u32::from_le_bytes(self.checksum),
            });
        }
        Ok(())
    }

    /// Typed command of this frame.
    pub fn message_command(&self) -> MessageCommand {
        MessageCommand::from_command(&self.command)
    }
}

impl Encodable for NetworkMessageHeader {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, IoError> {
        let mut len = self.magic.consensus_encode(writer)?;

        let command_bytes = self.command.as_ref().as_bytes();
        let mut padded_command = [0u8; COMMAND_SIZE];
        let copy_len = command_bytes.len().min(COMMAND_SIZE);
        if let Some(dst_slice) = padded_command.get_mut(..copy_len)
            && let Some(src_slice) = command_bytes.get(..copy_len)
        {
            dst_slice.copy_from_slice(src_slice);
        }
        len = len.saturating_add(padded_command.consensus_encode(writer)?);
        len = len.saturating_add(self.length.consensus_encode(writer)?);
        len = len.saturating_add(self.checksum.consensus_encode(writer)?);
        Ok(len)
    }
}

impl Decodable for NetworkMessageHeader {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeDecodeError> {
        let magic = Magic::consensus_decode(reader)?;
        let command_bytes = <[u8; COMMAND_SIZE]>::consensus_decode(reader)?;
        let command = parse_command(&command_bytes)?;
        let length = u32::consensus_decode(reader)?;
        let checksum = <[u8; 4]>::consensus_decode(reader)?;

        Ok(Self {
            magic,
            command,
            length,
            checksum,
        })
    }
}

/// Parses the command field: printable ASCII followed only by NUL padding.
fn parse_command(bytes: &[u8; COMMAND_SIZE]) -> Result<CommandString, EncodeDecodeError> {
    let end_pos = bytes.iter().position(|&b| b == 0).unwrap_or(COMMAND_SIZE);
    let (name, padding) = bytes.split_at(end_pos);

    if padding.iter().any(|&b| b != 0) {
        return Err(EncodeDecodeError::ParseFailed("command has data after padding"));
    }
    if name.is_empty() || !name.iter().all(|b| b.is_ascii_graphic()) {
        return Err(EncodeDecodeError::ParseFailed("command is not printable ascii"));
    }
    let name = std::str::from_utf8(name)
        .map_err(|_| EncodeDecodeError::ParseFailed("command is not printable ascii"))?;
    CommandString::try_from(name)
        .map_err(|_| EncodeDecodeError::ParseFailed("command is not printable ascii"))
}

/// A complete Bitcoin P2P network message.
///
/// This wraps a message payload with the network protocol header,
/// providing serialization and deserialization for network transmission.
#[derive(Debug, Clone)]
pub struct NetworkMessage {
    /// Network message header.
    pub header: NetworkMessageHeader,
    /// Encoded payload bytes.
    pub payload_bytes: Vec<u8>,
    /// Message payload.
    pub payload: Message,
}

impl NetworkMessage {
    /// Maximum payload size for a network message (32 MiB).
    pub const MAX_PAYLOAD_SIZE: u32 = 32 * 1024 * 1024;

    /// Creates a new network message from a payload.
    pub fn new(chain: Chain, payload: Message) -> Result<Self, NetworkError> {
        let msg_command = payload.command();
        let payload_bytes = payload.encode_payload(chain)?;
        let header = NetworkMessageHeader::new(chain, msg_command.to_command_string()?, &payload_bytes)?;

        tracing::trace!(
            "Framed {} message: {} payload bytes",
            msg_command.as_str(),
            header.length
        );

        Ok(Self {
            header,
            payload_bytes,
            payload,
        })
    }

    /// Serializes the complete network message to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, NetworkError> {
        let mut bytes = Vec::with_capacity(NetworkMessageHeader::SIZE + self.payload_bytes.len());
        self.header.consensus_encode(&mut bytes)?;
        bytes.extend_from_slice(&self.payload_bytes);
        Ok(bytes)
    }

    /// Deserializes one complete frame received on `chain`.
    pub fn from_bytes(bytes: &[u8], chain: Chain) -> Result<Self, NetworkError> {
        let (header_bytes, payload_bytes) = bytes
            .split_at_checked(NetworkMessageHeader::SIZE)
            .ok_or_else(|| {
                NetworkError::Io(IoError::new(
                    ErrorKind::UnexpectedEof,
                    "Insufficient bytes for message header",
                ))
            })?;

        let mut reader = header_bytes;
        let header = NetworkMessageHeader::consensus_decode(&mut reader)
            .map_err(|_| NetworkError::InvalidCommand(hex::encode(header_bytes)))?;
        header.validate_envelope(chain, Self::MAX_PAYLOAD_SIZE)?;
        header.validate_payload(chain, payload_bytes)?;

        let payload = header.message_command().decode_payload(chain, payload_bytes)?;

        Ok(Self {
            header,
            payload_bytes: payload_bytes.to_vec(),
            payload,
        })
    }
}

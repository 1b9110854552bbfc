use std::net::{Ipv4Addr, SocketAddr};

use chrono::Utc;

use crate::{
    consensus::{Decodable, Encodable, EncodeDecodeError},
    io::{Error as IoError, Read, Write},
    p2p::{Address, ServiceFlags},
};

/// Protocol version advertised by this node.
pub const PROTOCOL_VERSION: i32 = 70016;

/// Oldest peer protocol version accepted during the handshake.
pub const MIN_PEER_PROTOCOL_VERSION: i32 = 70001;

/// Longest user agent accepted from a peer.
pub const MAX_USER_AGENT_LENGTH: usize = 256;

/// First protocol version carrying the sender address, nonce, user agent and
/// start height.
const EXTENDED_FIELDS_VERSION: i32 = 106;

/// First protocol version carrying the relay flag.
const RELAY_FLAG_VERSION: i32 = 70001;

/// Represents a version message in the P2P protocol.
///
/// A version message is used to initiate a connection between two peers.
/// It contains information about the protocol version, services supported,
/// timestamps, network addresses, user agent, and other relevant details.
///
/// Fields introduced by later protocol versions are only present on the wire
/// when `version` is high enough; otherwise they decode to their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// The version of the protocol being used.
    pub version: i32,
    /// The services supported by the node.
    pub services: ServiceFlags,
    /// The timestamp when the message was created.
    pub timestamp: i64,
    /// The network address of the receiving node.
    pub addr_recv: Address,
    /// The network address of the sending node.
    pub addr_from: Address,
    /// A random nonce used to detect connections to self.
    pub nonce: u64,
    /// The user agent string of the node.
    pub user_agent: String,
    /// The last block height known to the sending node.
    pub start_height: i32,
    /// Whether the node wants to receive relayed transactions or not.
    pub relay: bool,
}

impl Version {
    /// Creates a version message addressed to `peer`.
    pub fn new(
        peer: SocketAddr,
        services: ServiceFlags,
        user_agent: String,
        start_height: i32,
        relay: bool,
    ) -> Self {
        let unspecified = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        Version {
            version: PROTOCOL_VERSION,
            services,
            timestamp: Utc::now().timestamp(),
            addr_recv: Address::new(&peer, ServiceFlags::NONE),
            addr_from: Address::new(&unspecified, services),
            nonce: rand::random::<u64>(),
            user_agent,
            start_height,
            relay,
        }
    }

    /// The version of the protocol being used.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// The services supported by the node.
    pub fn services(&self) -> ServiceFlags {
        self.services
    }

    /// The timestamp when the message was created.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Connection nonce.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// The user agent string of the node.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// The last block height known to the sending node.
    pub fn start_height(&self) -> i32 {
        self.start_height
    }

    /// Whether the node wants transactions relayed.
    pub fn relay(&self) -> bool {
        self.relay
    }

    fn unspecified_address() -> Address {
        Address {
            services: ServiceFlags::NONE,
            address: [0; 8],
            port: 0,
        }
    }
}

impl Encodable for Version {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, IoError> {
        let mut len = self.version.consensus_encode(writer)?;
        len = len.saturating_add(self.services.consensus_encode(writer)?);
        len = len.saturating_add(self.timestamp.consensus_encode(writer)?);
        len = len.saturating_add(self.addr_recv.consensus_encode(writer)?);

        if self.version >= EXTENDED_FIELDS_VERSION {
            len = len.saturating_add(self.addr_from.consensus_encode(writer)?);
            len = len.saturating_add(self.nonce.consensus_encode(writer)?);
            len = len.saturating_add(self.user_agent.consensus_encode(writer)?);
            len = len.saturating_add(self.start_height.consensus_encode(writer)?);
        }
        if self.version >= RELAY_FLAG_VERSION {
            len = len.saturating_add(self.relay.consensus_encode(writer)?);
        }
        Ok(len)
    }
}

impl Decodable for Version {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeDecodeError> {
        let version = i32::consensus_decode(reader)?;
        let services = ServiceFlags::consensus_decode(reader)?;
        let timestamp = i64::consensus_decode(reader)?;
        let addr_recv = Address::consensus_decode(reader)?;

        let mut message = Version {
            version,
            services,
            timestamp,
            addr_recv,
            addr_from: Self::unspecified_address(),
            nonce: 0,
            user_agent: String::new(),
            start_height: 0,
            relay: false,
        };

        if version >= EXTENDED_FIELDS_VERSION {
            message.addr_from = Address::consensus_decode(reader)?;
            message.nonce = u64::consensus_decode(reader)?;
            message.user_agent = String::consensus_decode(reader)?;
            if message.user_agent.len() > MAX_USER_AGENT_LENGTH {
                return Err(EncodeDecodeError::ParseFailed("user agent too long"));
            }
            message.start_height = i32::consensus_decode(reader)?;
        }
        if version >= RELAY_FLAG_VERSION {
            message.relay = bool::consensus_decode(reader)?;
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use bitcoin::consensus::{deserialize, serialize};

    use super::*;

    // Captured from a Satoshi 0.7.2 node.
    const SATOSHI_VERSION: &str = "62ea0000010000000000000011b2d05000000000010000000000000000000000000000000000ffff000000000000010000000000000000000000000000000000ffff0000000000003b2eb35d8ce617650f2f5361746f7368693a302e372e322fc03e0300";

    #[test]
    fn test_decode_captured_version() {
        let bytes = hex::decode(SATOSHI_VERSION).unwrap();
        let version: Version = deserialize(&bytes).unwrap();

        assert_eq!(version.version(), 60002);
        assert_eq!(version.services(), ServiceFlags::NETWORK);
        assert_eq!(version.timestamp(), 0x50d0_b211);
        assert_eq!(version.nonce(), 0x6517_e68c_5db3_2e3b);
        assert_eq!(version.user_agent(), "/Satoshi:0.7.2/");
        assert_eq!(version.start_height(), 212_672);
        assert!(!version.relay());

        assert_eq!(serialize(&version), bytes);
    }

    #[test]
    fn test_relay_byte_required_from_70001() {
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8333);
        let version = Version::new(peer, ServiceFlags::NONE, "/test:0.1.0/".into(), 7, true);
        let mut bytes = serialize(&version);
        assert_eq!(deserialize::<Version>(&bytes).unwrap(), version);

        bytes.pop();
        assert!(deserialize::<Version>(&bytes).is_err());
    }

    #[test]
    fn test_truncated_version_fails_at_every_length() {
        let bytes = hex::decode(SATOSHI_VERSION).unwrap();
        for len in 0..bytes.len() {
            assert!(
                deserialize::<Version>(&bytes[..len]).is_err(),
                "prefix of {len} bytes decoded"
            );
        }
    }

    #[test]
    fn test_oversized_user_agent_rejected() {
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8333);
        let version = Version::new(peer, ServiceFlags::NONE, "x".repeat(300), 0, false);
        let bytes = serialize(&version);
        assert!(matches!(
            deserialize::<Version>(&bytes),
            Err(EncodeDecodeError::ParseFailed(_))
        ));
    }
}

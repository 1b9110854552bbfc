use std::net::SocketAddr;

use crate::{
    consensus::{Decodable, Encodable, EncodeDecodeError, decode_list, encode_list},
    io::{Error as IoError, Read, Write},
    p2p::{Address, ServiceFlags},
};

/// Maximum number of addresses in one `addr` message.
pub const MAX_ADDR_SIZE: usize = 1000;

/// An `addr` message gossiping known node addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addr {
    /// `(last seen unix time, address)` pairs.
    pub addresses: Vec<(u32, Address)>,
}

impl Addr {
    /// Creates an `addr` message.
    pub fn new(addresses: Vec<(u32, Address)>) -> Self {
        Self { addresses }
    }

    /// Builds an `addr` message from socket addresses, stamped with `time`.
    pub fn from_socket_addrs<'a>(
        time: u32,
        addrs: impl IntoIterator<Item = &'a SocketAddr>,
    ) -> Self {
        let addresses = addrs
            .into_iter()
            .map(|addr| (time, Address::new(addr, ServiceFlags::NETWORK)))
            .collect();
        Self { addresses }
    }

    /// Announced addresses that map to a socket address.
    pub fn socket_addrs(&self) -> Vec<SocketAddr> {
        self.addresses
            .iter()
            .filter_map(|(_, address)| address.socket_addr().ok())
            .collect()
    }
}

impl Encodable for Addr {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, IoError> {
        encode_list(writer, &self.addresses, |(time, address), w| {
            let len = time.consensus_encode(w)?;
            Ok(len.saturating_add(address.consensus_encode(w)?))
        })
    }
}

impl Decodable for Addr {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeDecodeError> {
        let addresses = decode_list(reader, MAX_ADDR_SIZE, |r| {
            Ok((u32::consensus_decode(r)?, Address::consensus_decode(r)?))
        })?;
        Ok(Addr { addresses })
    }
}

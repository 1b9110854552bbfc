pub use bitcoin::p2p::{ServiceFlags, address::Address};
use thiserror::Error;

use crate::{
    chain::Chain,
    consensus::{Decodable, Encodable, EncodeDecodeError},
    io::{Error as IoError, Read, Write},
};

/// Network magic bytes to identify the chain a frame was intended for.
#[derive(Debug, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Clone)]
pub struct Magic([u8; 4]);

impl Magic {
    /// Bitcoin main network.
    pub const BITCOIN: Self = Self([0xf9, 0xbe, 0xb4, 0xd9]);
    /// Bitcoin testnet3.
    pub const BITCOIN_TESTNET3: Self = Self([0x0b, 0x11, 0x09, 0x07]);
    /// Bitcoin Cash main network.
    pub const BITCOIN_CASH: Self = Self([0xe3, 0xe1, 0xf3, 0xe8]);
    /// Bitcoin Cash testnet3.
    pub const BITCOIN_CASH_TESTNET3: Self = Self([0xf4, 0xe5, 0xf3, 0xf4]);
    /// Litecoin main network.
    pub const LITECOIN: Self = Self([0xfb, 0xc0, 0xb6, 0xdb]);
    /// Litecoin testnet4.
    pub const LITECOIN_TESTNET4: Self = Self([0xfd, 0xd2, 0xc8, 0xf1]);
    /// Unit test network, shares its magic with Bitcoin regtest.
    pub const UNIT_TEST: Self = Self([0xfa, 0xbf, 0xb5, 0xda]);

    /// Returns the magic bytes as a 4-byte array.
    pub fn to_bytes(&self) -> [u8; 4] {
        self.0
    }

    /// Magic as a little-endian integer, used in diagnostics.
    pub fn to_u32(&self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

impl From<[u8; 4]> for Magic {
    fn from(bytes: [u8; 4]) -> Self {
        Magic(bytes)
    }
}

impl From<Chain> for Magic {
    fn from(chain: Chain) -> Self {
        match chain {
            Chain::Bitcoin => Magic::BITCOIN,
            Chain::BitcoinTestnet3 => Magic::BITCOIN_TESTNET3,
            Chain::BitcoinCash => Magic::BITCOIN_CASH,
            Chain::BitcoinCashTestnet3 => Magic::BITCOIN_CASH_TESTNET3,
            Chain::Litecoin => Magic::LITECOIN,
            Chain::LitecoinTestnet4 => Magic::LITECOIN_TESTNET4,
            Chain::UnitTest => Magic::UNIT_TEST,
        }
    }
}

impl std::fmt::Display for Magic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        hex::encode(self.0).fmt(f)
    }
}

impl Encodable for Magic {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, IoError> {
        self.0.consensus_encode(writer)
    }
}

impl Decodable for Magic {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeDecodeError> {
        Ok(Magic(Decodable::consensus_decode(reader)?))
    }
}

/// Errors that can occur when working with magic bytes.
#[derive(Debug, PartialEq, Clone, Copy, Error)]
pub enum MagicError {
    /// The magic bytes don't correspond to any known chain.
    #[error("unknown network magic: {0}")]
    UnknownMagic(Magic),
}

impl TryFrom<Magic> for Chain {
    type Error = MagicError;

    fn try_from(magic: Magic) -> Result<Self, Self::Error> {
        Chain::from_magic(magic).ok_or(MagicError::UnknownMagic(magic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magic_display_is_wire_order_hex() {
        assert_eq!(Magic::BITCOIN.to_string(), "f9beb4d9");
        assert_eq!(Magic::from(Chain::Litecoin).to_string(), "fbc0b6db");
    }

    #[test]
    fn test_unknown_magic() {
        let magic = Magic::from([1, 2, 3, 4]);
        assert_eq!(
            Chain::try_from(magic),
            Err(MagicError::UnknownMagic(magic))
        );
    }
}

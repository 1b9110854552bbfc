use std::{fmt, str::FromStr};

use bitcoin::{
    BlockHash, CompactTarget, Network, TxMerkleNode,
    block::{Header as BlockHeader, Version},
    blockdata::constants::genesis_block,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    consensus::EncodeDecodeError,
    hashes::{self, Hash as _},
    p2p::Magic,
};

/// Errors that can occur when parsing a chain type.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ChainTypeError {
    /// The provided chain type string is invalid.
    #[error("Invalid chain type: {0}")]
    InvalidChainType(String),
}

/// Blockchains the peer manager can speak to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    /// Bitcoin main network.
    Bitcoin,
    /// Bitcoin testnet3.
    BitcoinTestnet3,
    /// Bitcoin Cash main network.
    BitcoinCash,
    /// Bitcoin Cash testnet3.
    BitcoinCashTestnet3,
    /// Litecoin main network.
    Litecoin,
    /// Litecoin testnet4.
    LitecoinTestnet4,
    /// Local chain used by tests. Never makes outbound connections on its own.
    UnitTest,
}

impl Chain {
    /// Every supported chain.
    pub const ALL: [Chain; 7] = [
        Chain::Bitcoin,
        Chain::BitcoinTestnet3,
        Chain::BitcoinCash,
        Chain::BitcoinCashTestnet3,
        Chain::Litecoin,
        Chain::LitecoinTestnet4,
        Chain::UnitTest,
    ];

    /// Returns the magic bytes for this chain.
    pub fn magic(self) -> Magic {
        Magic::from(self)
    }

    /// Converts magic bytes back to the chain that uses them.
    pub fn from_magic(magic: Magic) -> Option<Chain> {
        Chain::ALL.into_iter().find(|chain| chain.magic() == magic)
    }

    /// Default P2P port.
    pub fn default_port(self) -> u16 {
        match self {
            Chain::Bitcoin | Chain::BitcoinCash => 8333,
            Chain::BitcoinTestnet3 | Chain::BitcoinCashTestnet3 => 18333,
            Chain::Litecoin => 9333,
            Chain::LitecoinTestnet4 => 19335,
            Chain::UnitTest => 18444,
        }
    }

    /// Frame checksum for a payload on this chain.
    ///
    /// All supported chains use truncated sha256d.
    pub fn checksum(self, payload: &[u8]) -> [u8; 4] {
        hashes::checksum(payload)
    }

    /// The basic compact filter type used on this chain.
    pub fn default_filter_type(self) -> FilterType {
        if self.uses_bch_filters() {
            FilterType::BasicBch
        } else {
            FilterType::Basic
        }
    }

    /// Wire byte for a filter type, or `None` if this chain has no such filter.
    pub fn filter_type_byte(self, filter_type: FilterType) -> Option<u8> {
        match (filter_type, self.uses_bch_filters()) {
            (FilterType::Basic, false) | (FilterType::BasicBch, true) => Some(0x00),
            (FilterType::Extended, _) => Some(0x58),
            _ => None,
        }
    }

    /// Filter type for a wire byte, or `None` if the byte is unknown on this
    /// chain.
    pub fn filter_type_from_byte(self, byte: u8) -> Option<FilterType> {
        match byte {
            0x00 => Some(self.default_filter_type()),
            0x58 => Some(FilterType::Extended),
            _ => None,
        }
    }

    /// Encodes a filter type, failing for types this chain does not carry.
    pub fn encode_filter_type(self, filter_type: FilterType) -> Result<u8, crate::io::Error> {
        self.filter_type_byte(filter_type).ok_or_else(|| {
            crate::io::Error::new(
                crate::io::ErrorKind::InvalidInput,
                format!("filter type {filter_type} is not supported on {self}"),
            )
        })
    }

    /// Decodes a filter type byte received from a peer.
    pub fn decode_filter_type(self, byte: u8) -> Result<FilterType, EncodeDecodeError> {
        self.filter_type_from_byte(byte)
            .ok_or(EncodeDecodeError::ParseFailed("unknown filter type for chain"))
    }

    /// Returns the string representation of this chain.
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Bitcoin => "bitcoin",
            Chain::BitcoinTestnet3 => "bitcoin_testnet3",
            Chain::BitcoinCash => "bitcoin_cash",
            Chain::BitcoinCashTestnet3 => "bitcoin_cash_testnet3",
            Chain::Litecoin => "litecoin",
            Chain::LitecoinTestnet4 => "litecoin_testnet4",
            Chain::UnitTest => "unit_test",
        }
    }

    /// Genesis header of the chain.
    ///
    /// Bitcoin Cash shares its genesis blocks with Bitcoin.
    pub fn genesis_header(self) -> BlockHeader {
        let network = match self {
            Chain::Bitcoin | Chain::BitcoinCash => Network::Bitcoin,
            Chain::BitcoinTestnet3 | Chain::BitcoinCashTestnet3 => Network::Testnet,
            Chain::UnitTest => Network::Regtest,
            Chain::Litecoin => return litecoin_genesis(1_317_972_665, 2_084_524_493),
            Chain::LitecoinTestnet4 => return litecoin_genesis(1_486_949_366, 293_345),
        };
        genesis_block(network).header
    }

    fn uses_bch_filters(self) -> bool {
        matches!(
            self,
            Chain::BitcoinCash | Chain::BitcoinCashTestnet3 | Chain::UnitTest
        )
    }
}

/// Litecoin networks share the genesis coinbase and differ in time and nonce.
fn litecoin_genesis(time: u32, nonce: u32) -> BlockHeader {
    BlockHeader {
        version: Version::ONE,
        prev_blockhash: BlockHash::all_zeros(),
        merkle_root: TxMerkleNode::from_byte_array([
            0xd9, 0xce, 0xd4, 0xed, 0x11, 0x30, 0xf7, 0xb7, 0xfa, 0xad, 0x9b, 0xe2, 0x53, 0x23,
            0xff, 0xaf, 0xa3, 0x32, 0x32, 0xa1, 0x7c, 0x3e, 0xdf, 0x6c, 0xfd, 0x97, 0xbe, 0xe6,
            0xba, 0xfb, 0xdd, 0x97,
        ]),
        time,
        bits: CompactTarget::from_consensus(0x1e0f_fff0),
        nonce,
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = ChainTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Chain::try_from(s)
    }
}

impl TryFrom<&str> for Chain {
    type Error = ChainTypeError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "bitcoin" | "btc" | "mainnet" => Ok(Chain::Bitcoin),
            "bitcoin_testnet3" | "btc_testnet" | "testnet" | "testnet3" => {
                Ok(Chain::BitcoinTestnet3)
            }
            "bitcoin_cash" | "bch" => Ok(Chain::BitcoinCash),
            "bitcoin_cash_testnet3" | "bch_testnet" => Ok(Chain::BitcoinCashTestnet3),
            "litecoin" | "ltc" => Ok(Chain::Litecoin),
            "litecoin_testnet4" | "ltc_testnet" => Ok(Chain::LitecoinTestnet4),
            "unit_test" | "unittest" | "regtest" => Ok(Chain::UnitTest),
            _ => Err(ChainTypeError::InvalidChainType(s.to_string())),
        }
    }
}

/// Logical compact block filter types.
///
/// The byte used on the wire for a given type depends on the chain, see
/// [`Chain::filter_type_byte`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// BIP 158 basic filter.
    Basic,
    /// Basic filter variant used on Bitcoin Cash style chains.
    BasicBch,
    /// Extended filter covering every output script and input prevout.
    Extended,
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FilterType::Basic => "basic",
            FilterType::BasicBch => "basic_bch",
            FilterType::Extended => "extended",
        };
        f.write_str(name)
    }
}

//! BIP 37 bloom filter messages. `filterclear` has no payload and is a bare
//! [`Connection`](crate::client::message::Connection) variant.

use crate::{
    consensus::{Decodable, Encodable, EncodeDecodeError},
    io::{Error as IoError, Read, Write},
};

/// Maximum size of a bloom filter in bytes.
pub const MAX_BLOOM_FILTER_SIZE: usize = 36_000;

/// Maximum number of hash functions in a bloom filter.
pub const MAX_HASH_FUNCS: u32 = 50;

/// Maximum size of a `filteradd` element.
pub const MAX_FILTER_ADD_SIZE: usize = 520;

/// `filterload`: installs a bloom filter on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterLoad {
    /// Filter bit field.
    pub filter: Vec<u8>,
    /// Number of hash functions.
    pub hash_funcs: u32,
    /// Random tweak added to the hash seed.
    pub tweak: u32,
    /// Update behaviour flags.
    pub flags: u8,
}

impl Encodable for FilterLoad {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, IoError> {
        let mut len = self.filter.consensus_encode(writer)?;
        len = len.saturating_add(self.hash_funcs.consensus_encode(writer)?);
        len = len.saturating_add(self.tweak.consensus_encode(writer)?);
        len = len.saturating_add(self.flags.consensus_encode(writer)?);
        Ok(len)
    }
}

impl Decodable for FilterLoad {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeDecodeError> {
        let filter = Vec::<u8>::consensus_decode(reader)?;
        if filter.len() > MAX_BLOOM_FILTER_SIZE {
            return Err(EncodeDecodeError::ParseFailed("bloom filter too large"));
        }
        let hash_funcs = u32::consensus_decode(reader)?;
        if hash_funcs > MAX_HASH_FUNCS {
            return Err(EncodeDecodeError::ParseFailed("too many bloom hash functions"));
        }
        Ok(FilterLoad {
            filter,
            hash_funcs,
            tweak: u32::consensus_decode(reader)?,
            flags: u8::consensus_decode(reader)?,
        })
    }
}

/// `filteradd`: adds one element to the installed bloom filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterAdd {
    /// Element to add.
    pub data: Vec<u8>,
}

impl Encodable for FilterAdd {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, IoError> {
        self.data.consensus_encode(writer)
    }
}

impl Decodable for FilterAdd {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeDecodeError> {
        let data = Vec::<u8>::consensus_decode(reader)?;
        if data.len() > MAX_FILTER_ADD_SIZE {
            return Err(EncodeDecodeError::ParseFailed("filteradd element too large"));
        }
        Ok(FilterAdd { data })
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::consensus::{deserialize, serialize};

    use super::*;

    #[test]
    fn test_filterload_round_trip() {
        let load = FilterLoad {
            filter: vec![0xb5, 0x0f],
            hash_funcs: 11,
            tweak: 0,
            flags: 0,
        };
        let bytes = serialize(&load);
        assert_eq!(hex::encode(&bytes), "02b50f0b0000000000000000");
        assert_eq!(deserialize::<FilterLoad>(&bytes).unwrap(), load);
    }

    #[test]
    fn test_filterload_rejects_excess_hash_funcs() {
        let load = FilterLoad {
            filter: vec![0],
            hash_funcs: 51,
            tweak: 0,
            flags: 0,
        };
        assert!(deserialize::<FilterLoad>(&serialize(&load)).is_err());
    }

    #[test]
    fn test_filteradd_limit() {
        let ok = FilterAdd { data: vec![1; 520] };
        assert_eq!(deserialize::<FilterAdd>(&serialize(&ok)).unwrap(), ok);

        let too_big = FilterAdd { data: vec![1; 521] };
        assert!(deserialize::<FilterAdd>(&serialize(&too_big)).is_err());
    }
}

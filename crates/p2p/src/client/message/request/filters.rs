//! BIP 157 compact filter requests.
//!
//! Each request begins with a filter type byte whose value depends on the
//! chain, so these types implement the chain-aware codec traits.

use bitcoin::BlockHash;

use crate::{
    chain::{Chain, FilterType},
    consensus::{
        ChainDecodable, ChainEncodable, Decodable, Encodable, EncodeDecodeError, decode_hash,
        encode_hash,
    },
    io::{Error as IoError, Read, Write},
};

/// `getcfilters`: filters for blocks from `start_height` up to `stop_hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GetCFilters {
    /// Filter type requested.
    pub filter_type: FilterType,
    /// Height of the first block.
    pub start_height: u32,
    /// Hash of the last block.
    pub stop_hash: BlockHash,
}

/// `getcfheaders`: filter headers for blocks from `start_height` up to
/// `stop_hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GetCFHeaders {
    /// Filter type requested.
    pub filter_type: FilterType,
    /// Height of the first block.
    pub start_height: u32,
    /// Hash of the last block.
    pub stop_hash: BlockHash,
}

/// `getcfcheckpt`: filter headers at every 1000th block up to `stop_hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GetCFCheckpt {
    /// Filter type requested.
    pub filter_type: FilterType,
    /// Hash of the last block.
    pub stop_hash: BlockHash,
}

fn encode_range<W: Write + ?Sized>(
    chain: Chain,
    writer: &mut W,
    filter_type: FilterType,
    start_height: u32,
    stop_hash: &BlockHash,
) -> Result<usize, IoError> {
    let mut len = chain.encode_filter_type(filter_type)?.consensus_encode(writer)?;
    len = len.saturating_add(start_height.consensus_encode(writer)?);
    len = len.saturating_add(encode_hash(stop_hash, writer)?);
    Ok(len)
}

fn decode_range<R: Read + ?Sized>(
    chain: Chain,
    reader: &mut R,
) -> Result<(FilterType, u32, BlockHash), EncodeDecodeError> {
    let filter_type = chain.decode_filter_type(u8::consensus_decode(reader)?)?;
    let start_height = u32::consensus_decode(reader)?;
    let stop_hash = decode_hash(reader)?;
    Ok((filter_type, start_height, stop_hash))
}

impl ChainEncodable for GetCFilters {
    fn encode_for<W: Write + ?Sized>(
        &self,
        chain: Chain,
        writer: &mut W,
    ) -> Result<usize, IoError> {
        encode_range(chain, writer, self.filter_type, self.start_height, &self.stop_hash)
    }
}

impl ChainDecodable for GetCFilters {
    fn decode_for<R: Read + ?Sized>(
        chain: Chain,
        reader: &mut R,
    ) -> Result<Self, EncodeDecodeError> {
        let (filter_type, start_height, stop_hash) = decode_range(chain, reader)?;
        Ok(GetCFilters {
            filter_type,
            start_height,
            stop_hash,
        })
    }
}

impl ChainEncodable for GetCFHeaders {
    fn encode_for<W: Write + ?Sized>(
        &self,
        chain: Chain,
        writer: &mut W,
    ) -> Result<usize, IoError> {
        encode_range(chain, writer, self.filter_type, self.start_height, &self.stop_hash)
    }
}

impl ChainDecodable for GetCFHeaders {
    fn decode_for<R: Read + ?Sized>(
        chain: Chain,
        reader: &mut R,
    ) -> Result<Self, EncodeDecodeError> {
        let (filter_type, start_height, stop_hash) = decode_range(chain, reader)?;
        Ok(GetCFHeaders {
            filter_type,
            start_height,
            stop_hash,
        })
    }
}

impl ChainEncodable for GetCFCheckpt {
    fn encode_for<W: Write + ?Sized>(
        &self,
        chain: Chain,
        writer: &mut W,
    ) -> Result<usize, IoError> {
        let len = chain
            .encode_filter_type(self.filter_type)?
            .consensus_encode(writer)?;
        Ok(len.saturating_add(encode_hash(&self.stop_hash, writer)?))
    }
}

impl ChainDecodable for GetCFCheckpt {
    fn decode_for<R: Read + ?Sized>(
        chain: Chain,
        reader: &mut R,
    ) -> Result<Self, EncodeDecodeError> {
        Ok(GetCFCheckpt {
            filter_type: chain.decode_filter_type(u8::consensus_decode(reader)?)?,
            stop_hash: decode_hash(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        consensus::{deserialize_for, serialize_for},
        hashes::Hash,
    };

    #[test]
    fn test_getcfheaders_layout() {
        let request = GetCFHeaders {
            filter_type: FilterType::Basic,
            start_height: 1000,
            stop_hash: BlockHash::from_byte_array([9; 32]),
        };
        let bytes = serialize_for(Chain::Bitcoin, &request).unwrap();
        assert_eq!(bytes.len(), 1 + 4 + 32);
        assert_eq!(&bytes[..5], &[0x00, 0xe8, 0x03, 0x00, 0x00]);
        assert_eq!(
            deserialize_for::<GetCFHeaders>(Chain::Bitcoin, &bytes).unwrap(),
            request
        );
    }

    #[test]
    fn test_unsupported_filter_type_fails_to_encode() {
        let request = GetCFilters {
            filter_type: FilterType::BasicBch,
            start_height: 0,
            stop_hash: BlockHash::all_zeros(),
        };
        assert!(serialize_for(Chain::Bitcoin, &request).is_err());
        assert!(serialize_for(Chain::BitcoinCash, &request).is_ok());
    }

    #[test]
    fn test_getcfcheckpt_round_trip() {
        let request = GetCFCheckpt {
            filter_type: FilterType::Extended,
            stop_hash: BlockHash::from_byte_array([4; 32]),
        };
        let bytes = serialize_for(Chain::Litecoin, &request).unwrap();
        assert_eq!(bytes[0], 0x58);
        assert_eq!(
            deserialize_for::<GetCFCheckpt>(Chain::Litecoin, &bytes).unwrap(),
            request
        );
    }
}

//! BIP 157 compact filter responses.

use bitcoin::{
    BlockHash,
    bip158::{FilterHash, FilterHeader},
};

use crate::{
    chain::{Chain, FilterType},
    consensus::{
        ChainDecodable, ChainEncodable, Decodable, Encodable, EncodeDecodeError, decode_hash,
        decode_list, encode_hash, encode_list,
    },
    io::{Error as IoError, Read, Write},
};

/// Maximum number of filter hashes in one `cfheaders`.
pub const MAX_CFHEADERS_SIZE: usize = 2000;

/// Maximum number of checkpoints in one `cfcheckpt`.
const MAX_CFCHECKPT_SIZE: usize = 100_000;

/// `cfilter`: the compact filter for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFilter {
    /// Filter type.
    pub filter_type: FilterType,
    /// Block the filter commits to.
    pub block_hash: BlockHash,
    /// Golomb-coded filter bytes.
    pub filter: Vec<u8>,
}

/// `cfheaders`: filter hashes for a range ending at `stop_hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFHeaders {
    /// Filter type.
    pub filter_type: FilterType,
    /// Last block of the range.
    pub stop_hash: BlockHash,
    /// Filter header of the block before the range.
    pub previous_header: FilterHeader,
    /// Filter hashes of every block in the range.
    pub filter_hashes: Vec<FilterHash>,
}

impl CFHeaders {
    /// Chains the filter hashes onto `previous_header`, yielding the filter
    /// header of every block in the range.
    pub fn filter_headers(&self) -> Vec<FilterHeader> {
        let mut previous = self.previous_header;
        self.filter_hashes
            .iter()
            .map(|hash| {
                previous = hash.filter_header(&previous);
                previous
            })
            .collect()
    }
}

/// `cfcheckpt`: filter headers at every 1000th block up to `stop_hash`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CFCheckpt {
    /// Filter type.
    pub filter_type: FilterType,
    /// Last block covered.
    pub stop_hash: BlockHash,
    /// Checkpoint filter headers.
    pub filter_headers: Vec<FilterHeader>,
}

impl ChainEncodable for CFilter {
    fn encode_for<W: Write + ?Sized>(
        &self,
        chain: Chain,
        writer: &mut W,
    ) -> Result<usize, IoError> {
        let mut len = chain
            .encode_filter_type(self.filter_type)?
            .consensus_encode(writer)?;
        len = len.saturating_add(encode_hash(&self.block_hash, writer)?);
        len = len.saturating_add(self.filter.consensus_encode(writer)?);
        Ok(len)
    }
}

impl ChainDecodable for CFilter {
    fn decode_for<R: Read + ?Sized>(
        chain: Chain,
        reader: &mut R,
    ) -> Result<Self, EncodeDecodeError> {
        Ok(CFilter {
            filter_type: chain.decode_filter_type(u8::consensus_decode(reader)?)?,
            block_hash: decode_hash(reader)?,
            filter: Vec::<u8>::consensus_decode(reader)?,
        })
    }
}

impl ChainEncodable for CFHeaders {
    fn encode_for<W: Write + ?Sized>(
        &self,
        chain: Chain,
        writer: &mut W,
    ) -> Result<usize, IoError> {
        let mut len = chain
            .encode_filter_type(self.filter_type)?
            .consensus_encode(writer)?;
        len = len.saturating_add(encode_hash(&self.stop_hash, writer)?);
        len = len.saturating_add(encode_hash(&self.previous_header, writer)?);
        len = len.saturating_add(encode_list(writer, &self.filter_hashes, encode_hash)?);
        Ok(len)
    }
}

impl ChainDecodable for CFHeaders {
    fn decode_for<R: Read + ?Sized>(
        chain: Chain,
        reader: &mut R,
    ) -> Result<Self, EncodeDecodeError> {
        Ok(CFHeaders {
            filter_type: chain.decode_filter_type(u8::consensus_decode(reader)?)?,
            stop_hash: decode_hash(reader)?,
            previous_header: decode_hash(reader)?,
            filter_hashes: decode_list(reader, MAX_CFHEADERS_SIZE, decode_hash)?,
        })
    }
}

impl ChainEncodable for CFCheckpt {
    fn encode_for<W: Write + ?Sized>(
        &self,
        chain: Chain,
        writer: &mut W,
    ) -> Result<usize, IoError> {
        let mut len = chain
            .encode_filter_type(self.filter_type)?
            .consensus_encode(writer)?;
        len = len.saturating_add(encode_hash(&self.stop_hash, writer)?);
        len = len.saturating_add(encode_list(writer, &self.filter_headers, encode_hash)?);
        Ok(len)
    }
}

impl ChainDecodable for CFCheckpt {
    fn decode_for<R: Read + ?Sized>(
        chain: Chain,
        reader: &mut R,
    ) -> Result<Self, EncodeDecodeError> {
        Ok(CFCheckpt {
            filter_type: chain.decode_filter_type(u8::consensus_decode(reader)?)?,
            stop_hash: decode_hash(reader)?,
            filter_headers: decode_list(reader, MAX_CFCHECKPT_SIZE, decode_hash)?,
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

    fn sample_cfheaders(filter_type: FilterType, count: usize) -> CFHeaders {
        CFHeaders {
            filter_type,
            stop_hash: BlockHash::from_byte_array([0x10; 32]),
            previous_header: FilterHeader::from_byte_array([0x20; 32]),
            filter_hashes: (0..count)
                .map(|i| FilterHash::from_byte_array([i as u8; 32]))
                .collect(),
        }
    }

    #[test]
    fn test_cfheaders_round_trip_on_bitcoin() {
        let message = sample_cfheaders(FilterType::Basic, 3);
        let bytes = serialize_for(Chain::Bitcoin, &message).unwrap();
        assert_eq!(bytes.len(), 1 + 32 + 32 + 1 + 3 * 32);
        let decoded: CFHeaders = deserialize_for(Chain::Bitcoin, &bytes).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.filter_type, FilterType::Basic);
    }

    #[test]
    fn test_cfheaders_filter_type_is_chain_relative() {
        let message = sample_cfheaders(FilterType::Basic, 1);
        let bytes = serialize_for(Chain::Bitcoin, &message).unwrap();

        let on_bch: CFHeaders = deserialize_for(Chain::BitcoinCash, &bytes).unwrap();
        assert_eq!(on_bch.filter_type, FilterType::BasicBch);
        assert_ne!(on_bch.filter_type, message.filter_type);
    }

    #[test]
    fn test_empty_cfheaders() {
        let message = sample_cfheaders(FilterType::Basic, 0);
        let bytes = serialize_for(Chain::Bitcoin, &message).unwrap();
        let decoded: CFHeaders = deserialize_for(Chain::Bitcoin, &bytes).unwrap();
        assert!(decoded.filter_hashes.is_empty());
        assert!(decoded.filter_headers().is_empty());
    }

    #[test]
    fn test_cfheaders_truncation() {
        let message = sample_cfheaders(FilterType::Extended, 2);
        let bytes = serialize_for(Chain::Litecoin, &message).unwrap();
        for len in 0..bytes.len() {
            assert!(deserialize_for::<CFHeaders>(Chain::Litecoin, &bytes[..len]).is_err());
        }
    }

    #[test]
    fn test_filter_headers_chain_from_previous() {
        let message = sample_cfheaders(FilterType::Basic, 2);
        let headers = message.filter_headers();
        assert_eq!(headers.len(), 2);
        assert_eq!(
            headers[0],
            message.filter_hashes[0].filter_header(&message.previous_header)
        );
        assert_eq!(headers[1], message.filter_hashes[1].filter_header(&headers[0]));
    }

    #[test]
    fn test_cfilter_round_trip() {
        let message = CFilter {
            filter_type: FilterType::BasicBch,
            block_hash: BlockHash::from_byte_array([5; 32]),
            filter: vec![0x01, 0x02, 0x03],
        };
        let bytes = serialize_for(Chain::BitcoinCash, &message).unwrap();
        assert_eq!(
            deserialize_for::<CFilter>(Chain::BitcoinCash, &bytes).unwrap(),
            message
        );
    }

    #[test]
    fn test_cfcheckpt_round_trip() {
        let message = CFCheckpt {
            filter_type: FilterType::Basic,
            stop_hash: BlockHash::from_byte_array([6; 32]),
            filter_headers: vec![FilterHeader::from_byte_array([7; 32])],
        };
        let bytes = serialize_for(Chain::Bitcoin, &message).unwrap();
        assert_eq!(
            deserialize_for::<CFCheckpt>(Chain::Bitcoin, &bytes).unwrap(),
            message
        );
    }
}

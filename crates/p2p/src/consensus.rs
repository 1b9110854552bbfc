//! Consensus codec re-exports and chain-aware extensions.
//!
//! Most payloads are chain independent and use the `bitcoin` crate's
//! `Encodable`/`Decodable` directly. Compact filter payloads carry a filter
//! type byte whose meaning depends on the chain, so they implement
//! [`ChainEncodable`]/[`ChainDecodable`] instead.

pub use bitcoin::consensus::encode::{
    Decodable, Encodable, Error as EncodeDecodeError, MAX_VEC_SIZE, VarInt, deserialize,
    serialize,
};
pub use blockchain_p2p_derive::WireCodec;

use crate::{
    chain::Chain,
    io::{Error as IoError, Read, Write},
};

/// Encoding that depends on the chain the payload is sent on.
pub trait ChainEncodable {
    /// Encodes `self` for `chain`, returning the number of bytes written.
    fn encode_for<W: Write + ?Sized>(&self, chain: Chain, writer: &mut W)
    -> Result<usize, IoError>;
}

/// Decoding that depends on the chain the payload was received on.
pub trait ChainDecodable: Sized {
    /// Decodes a value received on `chain`.
    fn decode_for<R: Read + ?Sized>(chain: Chain, reader: &mut R)
    -> Result<Self, EncodeDecodeError>;
}

/// Serializes a chain-aware value into a fresh buffer.
pub fn serialize_for<T: ChainEncodable + ?Sized>(
    chain: Chain,
    value: &T,
) -> Result<Vec<u8>, IoError> {
    let mut buffer = Vec::new();
    value.encode_for(chain, &mut buffer)?;
    Ok(buffer)
}

/// Deserializes a chain-aware value, requiring every byte to be consumed.
pub fn deserialize_for<T: ChainDecodable>(
    chain: Chain,
    data: &[u8],
) -> Result<T, EncodeDecodeError> {
    let mut reader = data;
    let value = T::decode_for(chain, &mut reader)?;
    if !reader.is_empty() {
        return Err(EncodeDecodeError::ParseFailed(
            "data not consumed entirely when explicitly deserializing",
        ));
    }
    Ok(value)
}

/// Reads a compact-size prefixed list, rejecting counts above `max`.
///
/// The count is checked before any allocation so a hostile prefix cannot
/// reserve more than `max` elements.
pub fn decode_list<R, T, F>(
    reader: &mut R,
    max: usize,
    mut decode_item: F,
) -> Result<Vec<T>, EncodeDecodeError>
where
    R: Read + ?Sized,
    F: FnMut(&mut R) -> Result<T, EncodeDecodeError>,
{
    let count = VarInt::consensus_decode(reader)?.0;
    let count = usize::try_from(count)
        .ok()
        .filter(|count| *count <= max)
        .ok_or(EncodeDecodeError::ParseFailed(
            "list length exceeds protocol maximum",
        ))?;

    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(decode_item(reader)?);
    }
    Ok(items)
}

/// Writes a compact-size prefixed list.
pub fn encode_list<W, T, F>(writer: &mut W, items: &[T], mut encode_item: F) -> Result<usize, IoError>
where
    W: Write + ?Sized,
    F: FnMut(&T, &mut W) -> Result<usize, IoError>,
{
    let mut len = VarInt(items.len() as u64).consensus_encode(writer)?;
    for item in items {
        len = len.saturating_add(encode_item(item, writer)?);
    }
    Ok(len)
}

/// Reads a 32 byte hash stored in internal byte order.
pub fn decode_hash<H, R>(reader: &mut R) -> Result<H, EncodeDecodeError>
where
    H: crate::hashes::Hash<Bytes = [u8; 32]>,
    R: Read + ?Sized,
{
    Ok(H::from_byte_array(<[u8; 32]>::consensus_decode(reader)?))
}

/// Writes a 32 byte hash in internal byte order.
pub fn encode_hash<H, W>(hash: &H, writer: &mut W) -> Result<usize, IoError>
where
    H: crate::hashes::Hash<Bytes = [u8; 32]>,
    W: Write + ?Sized,
{
    hash.as_byte_array().consensus_encode(writer)
}

#[cfg(test)]
mod tests {
    use bitcoin::BlockHash;

    use super::*;
    use crate::hashes::Hash;

    #[test]
    fn test_decode_list_rejects_oversized_count() {
        // compact size 0xfd 0x0300 = 768 entries, limit is 10
        let bytes = hex::decode("fd0003").unwrap();
        let mut reader = bytes.as_slice();
        let result = decode_list(&mut reader, 10, |r| u8::consensus_decode(r));
        assert!(matches!(result, Err(EncodeDecodeError::ParseFailed(_))));
    }

    #[test]
    fn test_decode_list_accepts_empty() {
        let bytes = [0u8];
        let mut reader = &bytes[..];
        let items = decode_list(&mut reader, 10, |r| u32::consensus_decode(r)).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_non_minimal_compact_size_fails() {
        // 0xfd prefix must carry a value >= 0xfd
        let bytes = hex::decode("fd0100").unwrap();
        let mut reader = bytes.as_slice();
        let result = decode_list(&mut reader, 10, |r| u8::consensus_decode(r));
        assert!(matches!(result, Err(EncodeDecodeError::NonMinimalVarInt)));
    }

    #[test]
    fn test_hash_helpers_preserve_byte_order() {
        let hash = BlockHash::from_byte_array([7u8; 32]);
        let mut buffer = Vec::new();
        encode_hash(&hash, &mut buffer).unwrap();
        let mut reader = buffer.as_slice();
        let decoded: BlockHash = decode_hash(&mut reader).unwrap();
        assert_eq!(decoded, hash);
        assert!(reader.is_empty());
    }
}

//! `notfound` response.
//!
//! A peer sends `notfound` for the entries of a `getdata` it cannot serve.
//! The job queue uses it to move the matching requests to another peer
//! instead of waiting for a timeout.

use crate::{
    client::message::inventory::{Inventory, decode_inventories, encode_inventories},
    consensus::{Decodable, Encodable, EncodeDecodeError},
    io::{Error as IoError, Read, Write},
};

/// Represents a not found response message in the P2P protocol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NotFound {
    /// A list of inventory vectors representing the items that were not found.
    pub inventories: Vec<Inventory>,
}

impl NotFound {
    /// Creates a new `NotFound` response message with the specified
    /// inventories.
    pub fn new(inventories: Vec<Inventory>) -> Self {
        Self { inventories }
    }

    /// Returns the list of inventories in the response.
    pub fn inventories(&self) -> &[Inventory] {
        &self.inventories
    }

    /// Returns the number of inventories in the response.
    pub fn len(&self) -> usize {
        self.inventories.len()
    }

    /// Checks if the response contains no inventories.
    pub fn is_empty(&self) -> bool {
        self.inventories.is_empty()
    }
}

impl Encodable for NotFound {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, IoError> {
        encode_inventories(writer, &self.inventories)
    }
}

impl Decodable for NotFound {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeDecodeError> {
        Ok(NotFound {
            inventories: decode_inventories(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{
        BlockHash,
        consensus::{deserialize, serialize},
    };

    use super::*;
    use crate::{client::message::inventory::MAX_INV_SIZE, consensus::VarInt, hashes::Hash};

    #[test]
    fn test_not_found_round_trip() {
        let not_found = NotFound::new(vec![Inventory::Block(BlockHash::from_byte_array(
            [0xaa; 32],
        ))]);
        let bytes = serialize(&not_found);
        assert_eq!(deserialize::<NotFound>(&bytes).unwrap(), not_found);
    }

    #[test]
    fn test_count_above_limit_rejected() {
        let bytes = serialize(&VarInt(MAX_INV_SIZE as u64 + 1));
        assert!(matches!(
            deserialize::<NotFound>(&bytes),
            Err(EncodeDecodeError::ParseFailed(_))
        ));
    }

    #[test]
    fn test_declared_count_without_entries_fails() {
        // claims two entries, carries none
        assert!(deserialize::<NotFound>(&[0x02]).is_err());
    }
}

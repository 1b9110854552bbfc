use bitcoin::{BlockHash, Txid};

use crate::{
    consensus::{Decodable, Encodable, EncodeDecodeError, decode_list, encode_list},
    hashes::Hash,
    io::{Error as IoError, Read, Write},
};

/// Maximum number of entries in an `inv`, `getdata` or `notfound`.
pub const MAX_INV_SIZE: usize = 50_000;

/// An inventory vector: a typed reference to a transaction or block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Inventory {
    /// The hash is a `Txid`.
    Transaction(Txid),
    /// The hash is a block header.
    Block(BlockHash),
    /// Block hash answered with a `merkleblock` (BIP 37).
    FilteredBlock(BlockHash),
    /// Block hash answered with a `cmpctblock` (BIP 152).
    CompactBlock(BlockHash),
    /// Transaction requested with witness serialization.
    WitnessTransaction(Txid),
    /// Block requested with witness serialization.
    WitnessBlock(BlockHash),
    /// Reserved for future use, not currently implemented into any protocol.
    FilteredWitnessBlock(BlockHash),
    /// An inventory type this node does not know, kept for reporting.
    Unknown {
        /// Raw inventory type.
        inv_type: u32,
        /// Raw hash bytes.
        hash: [u8; 32],
    },
}

impl Inventory {
    /// Wire type code.
    pub fn inv_type(&self) -> u32 {
        match self {
            Inventory::Transaction(_) => 1,
            Inventory::Block(_) => 2,
            Inventory::FilteredBlock(_) => 3,
            Inventory::CompactBlock(_) => 4,
            Inventory::WitnessTransaction(_) => 0x4000_0001,
            Inventory::WitnessBlock(_) => 0x4000_0002,
            Inventory::FilteredWitnessBlock(_) => 0x4000_0003,
            Inventory::Unknown { inv_type, .. } => *inv_type,
        }
    }

    /// Raw hash bytes in internal order.
    pub fn hash_bytes(&self) -> &[u8; 32] {
        match self {
            Inventory::Transaction(hash) | Inventory::WitnessTransaction(hash) => {
                hash.as_byte_array()
            }
            Inventory::Block(hash)
            | Inventory::FilteredBlock(hash)
            | Inventory::CompactBlock(hash)
            | Inventory::WitnessBlock(hash)
            | Inventory::FilteredWitnessBlock(hash) => hash.as_byte_array(),
            Inventory::Unknown { hash, .. } => hash,
        }
    }

    /// Block hash if this entry refers to a block in any encoding.
    pub fn block_hash(&self) -> Option<BlockHash> {
        match self {
            Inventory::Block(hash)
            | Inventory::FilteredBlock(hash)
            | Inventory::CompactBlock(hash)
            | Inventory::WitnessBlock(hash)
            | Inventory::FilteredWitnessBlock(hash) => Some(*hash),
            _ => None,
        }
    }

    /// Txid if this entry refers to a transaction.
    pub fn txid(&self) -> Option<Txid> {
        match self {
            Inventory::Transaction(txid) | Inventory::WitnessTransaction(txid) => Some(*txid),
            _ => None,
        }
    }
}

impl Encodable for Inventory {
    fn consensus_encode<W: Write + ?Sized>(&self, w: &mut W) -> Result<usize, IoError> {
        let len = self.inv_type().consensus_encode(w)?;
        Ok(len.saturating_add(self.hash_bytes().consensus_encode(w)?))
    }
}

impl Decodable for Inventory {
    fn consensus_decode<R: Read + ?Sized>(r: &mut R) -> Result<Self, EncodeDecodeError> {
        let inv_type = u32::consensus_decode(r)?;
        let hash = <[u8; 32]>::consensus_decode(r)?;
        Ok(match inv_type {
            1 => Inventory::Transaction(Txid::from_byte_array(hash)),
            2 => Inventory::Block(BlockHash::from_byte_array(hash)),
            3 => Inventory::FilteredBlock(BlockHash::from_byte_array(hash)),
            4 => Inventory::CompactBlock(BlockHash::from_byte_array(hash)),
            0x4000_0001 => Inventory::WitnessTransaction(Txid::from_byte_array(hash)),
            0x4000_0002 => Inventory::WitnessBlock(BlockHash::from_byte_array(hash)),
            0x4000_0003 => Inventory::FilteredWitnessBlock(BlockHash::from_byte_array(hash)),
            _ => Inventory::Unknown { inv_type, hash },
        })
    }
}

/// Writes a compact-size prefixed inventory list.
pub(crate) fn encode_inventories<W: Write + ?Sized>(
    writer: &mut W,
    inventories: &[Inventory],
) -> Result<usize, IoError> {
    encode_list(writer, inventories, |inv, w| inv.consensus_encode(w))
}

/// Reads a compact-size prefixed inventory list of at most [`MAX_INV_SIZE`]
/// entries. An empty list is valid.
pub(crate) fn decode_inventories<R: Read + ?Sized>(
    reader: &mut R,
) -> Result<Vec<Inventory>, EncodeDecodeError> {
    decode_list(reader, MAX_INV_SIZE, |r| Inventory::consensus_decode(r))
}

#[cfg(test)]
mod tests {
    use bitcoin::consensus::{deserialize, serialize};

    use super::*;
    use crate::util::hex_to_hash;

    #[test]
    fn test_inventory_encode() {
        let expected = hex::decode(
            "01000000\
            de55ffd709ac1f5dc509a0925d0b1fc4\
            42ca034f224732e429081da1b621f55a",
        )
        .unwrap();

        let txid: Txid =
            hex_to_hash("de55ffd709ac1f5dc509a0925d0b1fc442ca034f224732e429081da1b621f55a")
                .unwrap();

        assert_eq!(serialize(&Inventory::Transaction(txid)), expected);
        assert_eq!(
            deserialize::<Inventory>(&expected).unwrap(),
            Inventory::Transaction(txid)
        );
    }

    #[test]
    fn test_unknown_inventory_preserved() {
        let mut bytes = 0x0000_0007u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0x11; 32]);
        let inv: Inventory = deserialize(&bytes).unwrap();
        assert_eq!(
            inv,
            Inventory::Unknown {
                inv_type: 7,
                hash: [0x11; 32]
            }
        );
        assert_eq!(serialize(&inv), bytes);
        assert_eq!(inv.block_hash(), None);
    }

    #[test]
    fn test_witness_block_exposes_block_hash() {
        let hash = BlockHash::from_byte_array([3; 32]);
        assert_eq!(Inventory::WitnessBlock(hash).block_hash(), Some(hash));
        assert_eq!(Inventory::WitnessBlock(hash).txid(), None);
    }
}

use crate::{
    client::message::inventory::{Inventory, decode_inventories, encode_inventories},
    consensus::{Decodable, Encodable, EncodeDecodeError},
    io::{Error as IoError, Read, Write},
};

/// An `inv` announcement of transactions or blocks the peer has.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Inv {
    /// Announced objects.
    pub inventories: Vec<Inventory>,
}

impl Inv {
    /// Creates an announcement.
    pub fn new(inventories: Vec<Inventory>) -> Self {
        Self { inventories }
    }

    /// Announced objects.
    pub fn inventories(&self) -> &[Inventory] {
        &self.inventories
    }

    /// Whether any entry announces a block.
    pub fn announces_block(&self) -> bool {
        self.inventories.iter().any(|inv| inv.block_hash().is_some())
    }
}

impl Encodable for Inv {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, IoError> {
        encode_inventories(writer, &self.inventories)
    }
}

impl Decodable for Inv {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeDecodeError> {
        Ok(Inv {
            inventories: decode_inventories(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{
        BlockHash, Txid,
        consensus::{deserialize, serialize},
    };

    use super::*;
    use crate::hashes::Hash;

    #[test]
    fn test_empty_inv() {
        let inv = Inv::new(Vec::new());
        let bytes = serialize(&inv);
        assert_eq!(bytes, vec![0]);
        assert_eq!(deserialize::<Inv>(&bytes).unwrap(), inv);
        assert!(!inv.announces_block());
    }

    #[test]
    fn test_inv_block_detection() {
        let inv = Inv::new(vec![
            Inventory::Transaction(Txid::all_zeros()),
            Inventory::Block(BlockHash::all_zeros()),
        ]);
        assert!(inv.announces_block());
        assert_eq!(deserialize::<Inv>(&serialize(&inv)).unwrap(), inv);
    }
}

use crate::{
    client::message::inventory::{Inventory, decode_inventories, encode_inventories},
    consensus::{Decodable, Encodable, EncodeDecodeError},
    io::{Error as IoError, Read, Write},
};

/// A `getdata` request for the objects named by its inventory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GetData {
    /// Requested objects.
    pub inventories: Vec<Inventory>,
}

impl GetData {
    /// Creates a request for `inventories`.
    pub fn new(inventories: Vec<Inventory>) -> Self {
        Self { inventories }
    }

    /// Requested objects.
    pub fn inventories(&self) -> &[Inventory] {
        &self.inventories
    }

    /// Number of requested objects.
    pub fn len(&self) -> usize {
        self.inventories.len()
    }

    /// Whether nothing is requested.
    pub fn is_empty(&self) -> bool {
        self.inventories.is_empty()
    }
}

impl Encodable for GetData {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, IoError> {
        encode_inventories(writer, &self.inventories)
    }
}

impl Decodable for GetData {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeDecodeError> {
        Ok(GetData {
            inventories: decode_inventories(reader)?,
        })
    }
}

use bitcoin::BlockHash;

use crate::{
    consensus::{
        Decodable, Encodable, EncodeDecodeError, decode_hash, decode_list, encode_hash,
        encode_list,
    },
    hashes::Hash,
    io::{Error as IoError, Read, Write},
};

/// Longest block locator accepted from a peer.
pub const MAX_LOCATOR_SIZE: usize = 101;

/// A `getheaders` request.
///
/// The locator lists known block hashes from the tip backwards; the peer
/// answers with headers following the first hash it recognises, up to
/// `stop_hash` or [`GetHeaders::MAX_HEADERS`] headers. An all-zero stop hash
/// means "as many as possible".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GetHeaders {
    version: u32,
    locator: Vec<BlockHash>,
    stop_hash: BlockHash,
}

/// A `getblocks` request. Same layout as `getheaders`, answered with `inv`.
pub type GetBlocks = GetHeaders;

impl GetHeaders {
    /// Maximum number of headers a peer returns for one request.
    pub const MAX_HEADERS: usize = 2000;

    /// Creates a request. A missing stop hash is sent as all zeros.
    pub fn new(version: u32, locator: Vec<BlockHash>, stop_hash: Option<BlockHash>) -> Self {
        Self {
            version,
            locator,
            stop_hash: stop_hash.unwrap_or_else(BlockHash::all_zeros),
        }
    }

    /// Protocol version of the requester.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Block locator hashes.
    pub fn locator(&self) -> &[BlockHash] {
        &self.locator
    }

    /// Hash to stop at.
    pub fn stop_hash(&self) -> BlockHash {
        self.stop_hash
    }

    /// Whether the request asks for as many headers as possible.
    pub fn is_unbounded(&self) -> bool {
        self.stop_hash == BlockHash::all_zeros()
    }
}

impl Encodable for GetHeaders {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, IoError> {
        let mut len = self.version.consensus_encode(writer)?;
        len = len.saturating_add(encode_list(writer, &self.locator, encode_hash)?);
        len = len.saturating_add(encode_hash(&self.stop_hash, writer)?);
        Ok(len)
    }
}

impl Decodable for GetHeaders {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeDecodeError> {
        Ok(GetHeaders {
            version: u32::consensus_decode(reader)?,
            locator: decode_list(reader, MAX_LOCATOR_SIZE, decode_hash)?,
            stop_hash: decode_hash(reader)?,
        })
    }
}

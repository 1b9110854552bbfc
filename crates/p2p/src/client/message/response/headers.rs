use bitcoin::block::Header as BlockHeader;

use crate::{
    client::message::request::GetHeaders,
    consensus::{Decodable, Encodable, EncodeDecodeError, VarInt, decode_list, encode_list},
    io::{Error as IoError, Read, Write},
};

/// A `headers` response.
///
/// Every header on the wire is followed by a transaction count which must be
/// zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Headers {
    headers: Vec<BlockHeader>,
}

impl Headers {
    /// Wraps a list of headers.
    pub fn new(headers: Vec<BlockHeader>) -> Self {
        Self { headers }
    }

    /// Headers in chain order.
    pub fn headers(&self) -> &[BlockHeader] {
        &self.headers
    }

    /// Consumes the message, returning its headers.
    pub fn into_headers(self) -> Vec<BlockHeader> {
        self.headers
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Whether the peer had nothing to send.
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// A full batch means the peer probably has more.
    pub fn is_full_batch(&self) -> bool {
        self.headers.len() >= GetHeaders::MAX_HEADERS
    }
}

impl Encodable for Headers {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, IoError> {
        encode_list(writer, &self.headers, |header, w| {
            let len = header.consensus_encode(w)?;
            Ok(len.saturating_add(VarInt(0).consensus_encode(w)?))
        })
    }
}

impl Decodable for Headers {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeDecodeError> {
        let headers = decode_list(reader, GetHeaders::MAX_HEADERS, |r| {
            let header = BlockHeader::consensus_decode(r)?;
            if VarInt::consensus_decode(r)?.0 != 0 {
                return Err(EncodeDecodeError::ParseFailed(
                    "headers message carries transactions",
                ));
            }
            Ok(header)
        })?;
        Ok(Headers { headers })
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::consensus::{deserialize, serialize};

    use super::*;
    use crate::util::test_util::header_chain;

    #[test]
    fn test_headers_round_trip() {
        let message = Headers::new(header_chain(3));
        let bytes = serialize(&message);
        assert_eq!(bytes.len(), 1 + 3 * 81);
        assert_eq!(deserialize::<Headers>(&bytes).unwrap(), message);
    }

    #[test]
    fn test_empty_headers() {
        let message: Headers = deserialize(&[0u8]).unwrap();
        assert!(message.is_empty());
        assert!(!message.is_full_batch());
    }

    #[test]
    fn test_nonzero_tx_count_rejected() {
        let mut bytes = serialize(&Headers::new(header_chain(1)));
        let last = bytes.len() - 1;
        bytes[last] = 1;
        assert!(matches!(
            deserialize::<Headers>(&bytes),
            Err(EncodeDecodeError::ParseFailed(_))
        ));
    }
}

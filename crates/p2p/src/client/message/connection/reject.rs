use std::fmt;

use crate::{
    consensus::{Decodable, Encodable, EncodeDecodeError},
    io::{Error as IoError, Read, Write},
};

/// Longest message name or reason accepted in a `reject`.
const MAX_REJECT_STRING_LENGTH: usize = 111;

/// Reject codes defined by BIP 61.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectCode {
    /// The message could not be decoded.
    Malformed,
    /// The referenced transaction or block is invalid.
    Invalid,
    /// The message uses an obsolete protocol feature.
    Obsolete,
    /// The transaction or block was already seen.
    Duplicate,
    /// The transaction is non-standard.
    NonStandard,
    /// An output is below the dust threshold.
    Dust,
    /// The transaction fee is too low.
    InsufficientFee,
    /// The block conflicts with a checkpoint.
    Checkpoint,
    /// A code not listed above.
    Other(u8),
}

impl RejectCode {
    /// Wire value of the code.
    pub fn to_u8(self) -> u8 {
        match self {
            RejectCode::Malformed => 0x01,
            RejectCode::Invalid => 0x10,
            RejectCode::Obsolete => 0x11,
            RejectCode::Duplicate => 0x12,
            RejectCode::NonStandard => 0x40,
            RejectCode::Dust => 0x41,
            RejectCode::InsufficientFee => 0x42,
            RejectCode::Checkpoint => 0x43,
            RejectCode::Other(code) => code,
        }
    }

    /// Whether a `reject` with this code ends in a 32 byte hash.
    pub fn carries_hash(self) -> bool {
        matches!(self.to_u8(), 0x10 | 0x12 | 0x40..=0x43)
    }
}

impl From<u8> for RejectCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => RejectCode::Malformed,
            0x10 => RejectCode::Invalid,
            0x11 => RejectCode::Obsolete,
            0x12 => RejectCode::Duplicate,
            0x40 => RejectCode::NonStandard,
            0x41 => RejectCode::Dust,
            0x42 => RejectCode::InsufficientFee,
            0x43 => RejectCode::Checkpoint,
            other => RejectCode::Other(other),
        }
    }
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.to_u8())
    }
}

/// A `reject` message explaining why an earlier message was refused.
///
/// The trailing hash is present on the wire exactly when
/// [`RejectCode::carries_hash`] holds. Encoding such a code without a hash
/// writes 32 zero bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
    message: String,
    code: RejectCode,
    reason: String,
    hash: Option<[u8; 32]>,
}

impl Reject {
    /// Creates a reject for the command `message`.
    pub fn new(message: impl Into<String>, code: RejectCode, reason: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            reason: reason.into(),
            hash: None,
        }
    }

    /// Attaches the hash of the rejected object.
    pub fn with_hash(mut self, hash: [u8; 32]) -> Self {
        self.hash = Some(hash);
        self
    }

    /// Command of the rejected message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Reject code.
    pub fn code(&self) -> RejectCode {
        self.code
    }

    /// Human readable reason.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Hash of the rejected transaction or block, if any.
    pub fn hash(&self) -> Option<&[u8; 32]> {
        self.hash.as_ref()
    }
}

fn decode_bounded_string<R: Read + ?Sized>(reader: &mut R) -> Result<String, EncodeDecodeError> {
    let value = String::consensus_decode(reader)?;
    if value.len() > MAX_REJECT_STRING_LENGTH {
        return Err(EncodeDecodeError::ParseFailed("reject string too long"));
    }
    Ok(value)
}

impl Encodable for Reject {
    fn consensus_encode<W: Write + ?Sized>(&self, writer: &mut W) -> Result<usize, IoError> {
        let mut len = self.message.consensus_encode(writer)?;
        len = len.saturating_add(self.code.to_u8().consensus_encode(writer)?);
        len = len.saturating_add(self.reason.consensus_encode(writer)?);
        if self.code.carries_hash() {
            len = len.saturating_add(self.hash.unwrap_or_default().consensus_encode(writer)?);
        }
        Ok(len)
    }
}

impl Decodable for Reject {
    fn consensus_decode<R: Read + ?Sized>(reader: &mut R) -> Result<Self, EncodeDecodeError> {
        let message = decode_bounded_string(reader)?;
        let code = RejectCode::from(u8::consensus_decode(reader)?);
        let reason = decode_bounded_string(reader)?;
        let hash = if code.carries_hash() {
            Some(<[u8; 32]>::consensus_decode(reader)?)
        } else {
            None
        };
        Ok(Reject {
            message,
            code,
            reason,
            hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::consensus::{deserialize, serialize};

    use super::*;

    #[test]
    fn test_malformed_reject_has_no_hash() {
        let reject = Reject::new("version", RejectCode::Malformed, "bad");
        let bytes = serialize(&reject);
        assert_eq!(hex::encode(&bytes), "0776657273696f6e0103626164");
        assert_eq!(deserialize::<Reject>(&bytes).unwrap(), reject);
    }

    #[test]
    fn test_tx_reject_carries_hash() {
        let reject =
            Reject::new("tx", RejectCode::InsufficientFee, "min relay fee").with_hash([0xab; 32]);
        let bytes = serialize(&reject);
        assert_eq!(bytes.len(), 1 + 2 + 1 + 1 + 13 + 32);

        let decoded: Reject = deserialize(&bytes).unwrap();
        assert_eq!(decoded.code(), RejectCode::InsufficientFee);
        assert_eq!(decoded.hash(), Some(&[0xab; 32]));

        // missing trailing hash
        assert!(deserialize::<Reject>(&bytes[..bytes.len() - 32]).is_err());
    }

    #[test]
    fn test_obsolete_code_has_no_hash() {
        assert!(!RejectCode::Obsolete.carries_hash());
        assert!(RejectCode::Duplicate.carries_hash());
        assert!(RejectCode::Checkpoint.carries_hash());
        assert!(!RejectCode::Other(0x44).carries_hash());
    }
}

pub use bitcoin::hashes::{Hash, sha256d::Hash as Sha256Hash};

/// Checksum of a zero-length payload, the first four bytes of sha256d("").
pub const EMPTY_CHECKSUM: [u8; 4] = [0x5d, 0xf6, 0xe0, 0xe2];

/// A SHA256D hash type specifically for P2P message checksums
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChecksumHash(Sha256Hash);

impl ChecksumHash {
    /// Create a new checksum hash from the given data
    pub fn hash(data: &[u8]) -> Self {
        Self(Sha256Hash::hash(data))
    }

    /// Get the first 4 bytes of the hash as a checksum
    pub fn checksum(&self) -> [u8; 4] {
        let bytes = self.0.as_byte_array();
        [bytes[0], bytes[1], bytes[2], bytes[3]]
    }
}

impl From<Sha256Hash> for ChecksumHash {
    fn from(hash: Sha256Hash) -> Self {
        Self(hash)
    }
}

/// Computes the frame checksum of `payload`.
///
/// Empty payloads short-circuit to [`EMPTY_CHECKSUM`].
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    if payload.is_empty() {
        return EMPTY_CHECKSUM;
    }
    ChecksumHash::hash(payload).checksum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_uses_constant() {
        assert_eq!(checksum(&[]), EMPTY_CHECKSUM);
        assert_eq!(ChecksumHash::hash(&[]).checksum(), EMPTY_CHECKSUM);
    }

    #[test]
    fn test_sendcmpct_checksum() {
        let payload = hex::decode("000100000000000000").unwrap();
        assert_eq!(hex::encode(checksum(&payload)), "ccfe104a");
    }
}

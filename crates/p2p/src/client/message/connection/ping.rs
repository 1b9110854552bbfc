use rand::{RngCore, rng};

use crate::consensus::WireCodec;

/// Represents a Ping message in the P2P protocol.
///
/// A Ping message is used to check the liveness of a connection between peers.
/// It carries a nonce which the remote echoes back in a [`Pong`].
///
/// [`Pong`]: super::Pong
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, WireCodec)]
pub struct Ping {
    nonce: u64,
}

impl Ping {
    /// Creates a new Ping message with a random nonce.
    pub fn new() -> Ping {
        let nonce = rng().next_u64();
        Ping { nonce }
    }

    /// Creates a new Ping message with the given nonce.
    pub fn with_nonce(nonce: u64) -> Self {
        Self { nonce }
    }

    /// Returns the nonce of the Ping message.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }
}

impl Default for Ping {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::consensus::{deserialize, serialize};

    use super::Ping;

    #[test]
    fn test_ping_new() {
        let ping1 = Ping::new();
        let ping2 = Ping::new();
        assert_ne!(ping1.nonce(), ping2.nonce());
    }

    #[test]
    fn test_encoded_ping() {
        let expected_hex = "0094102111e2af4d";
        let nonce = u64::from_le_bytes(hex::decode(expected_hex).unwrap().try_into().unwrap());

        let ping = Ping::with_nonce(nonce);
        assert_eq!(hex::encode(serialize(&ping)), expected_hex);
    }

    #[test]
    fn test_short_ping_fails() {
        let bytes = hex::decode("0094102111e2af").unwrap();
        assert!(deserialize::<Ping>(&bytes).is_err());
    }
}

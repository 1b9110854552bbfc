use crate::{client::message::connection::Ping, consensus::WireCodec};

/// Reply to a [`Ping`], echoing its nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, WireCodec)]
pub struct Pong {
    nonce: u64,
}

impl Pong {
    /// Creates a pong carrying `nonce`.
    pub fn new(nonce: u64) -> Self {
        Self { nonce }
    }

    /// Returns the echoed nonce.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Whether this pong answers `ping`.
    pub fn answers(&self, ping: &Ping) -> bool {
        self.nonce == ping.nonce()
    }
}

impl From<Ping> for Pong {
    fn from(ping: Ping) -> Self {
        Pong::new(ping.nonce())
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::consensus::{deserialize, serialize};

    use super::*;

    #[test]
    fn test_pong_echoes_ping() {
        let ping = Ping::with_nonce(0x1122_3344_5566_7788);
        let pong = Pong::from(ping);
        assert!(pong.answers(&ping));
        assert_eq!(hex::encode(serialize(&pong)), "8877665544332211");
        assert_eq!(deserialize::<Pong>(&serialize(&pong)).unwrap(), pong);
    }
}

use crate::consensus::WireCodec;

/// BIP 152 `sendcmpct`: announces compact block support and whether the peer
/// wants new blocks announced as compact blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, WireCodec)]
pub struct SendCmpct {
    announce: bool,
    version: u64,
}

impl SendCmpct {
    /// Creates a `sendcmpct` message.
    pub fn new(announce: bool, version: u64) -> Self {
        Self { announce, version }
    }

    /// Whether new blocks should be announced with `cmpctblock`.
    pub fn announce(&self) -> bool {
        self.announce
    }

    /// Compact block protocol version.
    pub fn version(&self) -> u64 {
        self.version
    }
}

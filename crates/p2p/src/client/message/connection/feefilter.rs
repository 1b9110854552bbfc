use crate::consensus::WireCodec;

/// BIP 133 fee filter: the peer asks not to be sent transactions paying less
/// than `fee_rate` satoshis per kilobyte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, WireCodec)]
pub struct FeeFilter {
    fee_rate: i64,
}

impl FeeFilter {
    /// Creates a fee filter.
    pub fn new(fee_rate: i64) -> Self {
        Self { fee_rate }
    }

    /// Minimum fee rate in satoshis per kilobyte.
    pub fn fee_rate(&self) -> i64 {
        self.fee_rate
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::consensus::{deserialize, serialize};

    use super::*;

    #[test]
    fn test_feefilter_encoding() {
        // 1000 sat/kB
        let filter = FeeFilter::new(1000);
        let bytes = serialize(&filter);
        assert_eq!(hex::encode(&bytes), "e803000000000000");
        assert_eq!(deserialize::<FeeFilter>(&bytes).unwrap().fee_rate(), 1000);
    }
}

//! Collaborators the peer manager consults outside the network layer.
//!
//! Header validation, filter storage and the mempool live elsewhere; the pool
//! reaches them through these traits. In-memory implementations back the
//! tests and the example binary.

use std::{
    collections::{HashMap, HashSet, VecDeque, hash_map::Entry},
    hash::Hash as StdHash,
    net::SocketAddr,
    sync::{Arc, PoisonError, RwLock},
};

use bitcoin::{BlockHash, Transaction, Txid, bip158::FilterHeader, block::Header as BlockHeader};
use tracing::{debug, info};

use crate::{
    chain::{Chain, FilterType},
    client::{
        handshake::PeerInfo,
        message::{
            request::MAX_LOCATOR_SIZE,
            response::{CFHeaders, CFilter},
        },
        peer::PeerId,
    },
    hashes::Hash,
};

/// Source of truth for the best header chain.
pub trait HeaderOracle: Send + Sync {
    /// Offers headers received from a peer. Returns how many extended the chain.
    fn apply_headers(&self, headers: &[BlockHeader]) -> usize;
    /// Height of the best known header.
    fn best_height(&self) -> u32;
    /// Hash of the best known header.
    fn best_hash(&self) -> BlockHash;
    /// Block locator for `getheaders`, newest first.
    fn locator(&self) -> Vec<BlockHash>;
    /// Header by hash.
    fn header(&self, hash: &BlockHash) -> Option<BlockHeader>;
    /// Headers following the first locator entry we know, up to `stop` or `max`.
    fn headers_after(&self, locator: &[BlockHash], stop: BlockHash, max: usize) -> Vec<BlockHeader>;
}

/// Sink for compact filter data.
pub trait FilterOracle: Send + Sync {
    /// Offers a `cfheaders` batch. Returns whether it was stored.
    fn apply_cfheaders(&self, cfheaders: &CFHeaders) -> bool;
    /// Offers one `cfilter`. Returns whether it was stored.
    fn apply_cfilter(&self, cfilter: &CFilter) -> bool;
}

/// Transaction pool.
pub trait Mempool: Send + Sync {
    /// Adds a transaction. Returns `false` if it was already known.
    fn submit(&self, tx: &Transaction) -> bool;
}

/// Observer of peer lifecycle changes.
pub trait NetworkObserver: Send + Sync {
    /// A peer completed the handshake.
    fn peer_verified(&self, chain: Chain, id: PeerId, info: &PeerInfo);
    /// A peer went away.
    fn peer_disconnected(&self, chain: Chain, address: SocketAddr);
}

/// The collaborators handed to [`crate::PeerManager::start`].
#[derive(Clone)]
pub struct Collaborators {
    /// Header chain.
    pub headers: Arc<dyn HeaderOracle>,
    /// Filter storage.
    pub filters: Arc<dyn FilterOracle>,
    /// Mempool.
    pub mempool: Arc<dyn Mempool>,
    /// Peer lifecycle observer.
    pub observer: Arc<dyn NetworkObserver>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            headers: Arc::new(MemoryHeaderOracle::default()),
            filters: Arc::new(MemoryFilterOracle::default()),
            mempool: Arc::new(MemoryMempool::default()),
            observer: Arc::new(MemoryObserver::default()),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Replaces the header oracle.
    pub fn with_headers(mut self, headers: Arc<dyn HeaderOracle>) -> Self {
        self.headers = headers;
        self
    }

    /// Replaces the filter oracle.
    pub fn with_filters(mut self, filters: Arc<dyn FilterOracle>) -> Self {
        self.filters = filters;
        self
    }

    /// Replaces the mempool.
    pub fn with_mempool(mut self, mempool: Arc<dyn Mempool>) -> Self {
        self.mempool = mempool;
        self
    }

    /// Replaces the observer.
    pub fn with_observer(mut self, observer: Arc<dyn NetworkObserver>) -> Self {
        self.observer = observer;
        self
    }
}

#[derive(Debug, Default)]
struct ChainState {
    /// Header by hash, for every header on the best chain.
    headers: HashMap<BlockHash, BlockHeader>,
    /// Best chain, index is height.
    height_hashes: Vec<BlockHash>,
}

impl ChainState {
    fn tip(&self) -> Option<BlockHash> {
        self.height_hashes.last().copied()
    }

    fn height_of(&self, hash: &BlockHash) -> Option<usize> {
        // Headers only enter the map when appended to the best chain.
        self.headers.get(hash)?;
        self.height_hashes.iter().rposition(|h| h == hash)
    }
}

/// Header chain kept in memory.
///
/// Headers are appended when they extend the current tip. Forks are ignored;
/// proof of work is not checked.
#[derive(Debug, Default)]
pub struct MemoryHeaderOracle {
    state: RwLock<ChainState>,
}

impl MemoryHeaderOracle {
    /// Oracle whose chain starts at `genesis`.
    pub fn with_genesis(genesis: BlockHeader) -> Self {
        let oracle = Self::default();
        oracle.apply_headers(&[genesis]);
        oracle
    }
}

impl HeaderOracle for MemoryHeaderOracle {
    fn apply_headers(&self, headers: &[BlockHeader]) -> usize {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut added: usize = 0;
        for header in headers {
            let hash = header.block_hash();
            if state.headers.contains_key(&hash) {
                continue;
            }
            let extends_tip = match state.tip() {
                Some(tip) => header.prev_blockhash == tip,
                None => true,
            };
            if !extends_tip {
                debug!("Ignoring header {} not connecting to tip", hash);
                continue;
            }
            state.headers.insert(hash, *header);
            state.height_hashes.push(hash);
            added = added.saturating_add(1);
        }
        if added > 0 {
            info!(
                "Header chain extended by {} to height {}",
                added,
                state.height_hashes.len().saturating_sub(1)
            );
        }
        added
    }

    fn best_height(&self) -> u32 {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        u32::try_from(state.height_hashes.len().saturating_sub(1)).unwrap_or(u32::MAX)
    }

    fn best_hash(&self) -> BlockHash {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.tip().unwrap_or_else(BlockHash::all_zeros)
    }

    fn locator(&self) -> Vec<BlockHash> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut locator = Vec::new();
        let Some(mut height) = state.height_hashes.len().checked_sub(1) else {
            return locator;
        };
        let mut step: usize = 1;
        loop {
            if let Some(hash) = state.height_hashes.get(height) {
                locator.push(*hash);
            }
            if height == 0 || locator.len() >= MAX_LOCATOR_SIZE - 1 {
                break;
            }
            if locator.len() >= 10 {
                step = step.saturating_mul(2);
            }
            height = height.saturating_sub(step);
        }
        if let Some(genesis) = state.height_hashes.first()
            && locator.last() != Some(genesis)
        {
            locator.push(*genesis);
        }
        locator
    }

    fn header(&self, hash: &BlockHash) -> Option<BlockHeader> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.headers.get(hash).copied()
    }

    fn headers_after(&self, locator: &[BlockHash], stop: BlockHash, max: usize) -> Vec<BlockHeader> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let start = locator
            .iter()
            .find_map(|hash| state.height_of(hash))
            .map_or(0, |height| height.saturating_add(1));

        let mut headers = Vec::new();
        for hash in state.height_hashes.iter().skip(start).take(max) {
            let Some(header) = state.headers.get(hash) else {
                break;
            };
            headers.push(*header);
            if *hash == stop {
                break;
            }
        }
        headers
    }
}

/// Entries each in-memory store keeps before evicting the oldest.
pub const MAX_STORED_ENTRIES: usize = 1000;

/// Insertion-ordered map that forgets its oldest entry past a capacity.
#[derive(Debug)]
struct BoundedMap<K, V> {
    entries: HashMap<K, V>,
    order: VecDeque<K>,
    capacity: usize,
}

impl<K, V> Default for BoundedMap<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: MAX_STORED_ENTRIES,
        }
    }
}

impl<K: Copy + Eq + StdHash, V> BoundedMap<K, V> {
    fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether `key` was new.
    fn insert(&mut self, key: K, value: V) -> bool {
        match self.entries.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.insert(value);
                return false;
            }
            Entry::Vacant(entry) => {
                entry.insert(value);
            }
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        true
    }
}

/// Compact filter data kept in memory, bounded to the most recent ranges.
#[derive(Debug, Default)]
pub struct MemoryFilterOracle {
    cfheaders: RwLock<BoundedMap<(FilterType, BlockHash), Vec<FilterHeader>>>,
    cfilters: RwLock<BoundedMap<(FilterType, BlockHash), Vec<u8>>>,
}

impl MemoryFilterOracle {
    /// Filter headers stored for the range ending at `stop_hash`.
    pub fn filter_headers(&self, filter_type: FilterType, stop_hash: &BlockHash) -> Option<Vec<FilterHeader>> {
        let cfheaders = self.cfheaders.read().unwrap_or_else(PoisonError::into_inner);
        cfheaders.get(&(filter_type, *stop_hash)).cloned()
    }

    /// Filter stored for `block_hash`.
    pub fn filter(&self, filter_type: FilterType, block_hash: &BlockHash) -> Option<Vec<u8>> {
        let cfilters = self.cfilters.read().unwrap_or_else(PoisonError::into_inner);
        cfilters.get(&(filter_type, *block_hash)).cloned()
    }
}

impl FilterOracle for MemoryFilterOracle {
    fn apply_cfheaders(&self, cfheaders: &CFHeaders) -> bool {
        let mut stored = self.cfheaders.write().unwrap_or_else(PoisonError::into_inner);
        stored.insert(
            (cfheaders.filter_type, cfheaders.stop_hash),
            cfheaders.filter_headers(),
        )
    }

    fn apply_cfilter(&self, cfilter: &CFilter) -> bool {
        let mut stored = self.cfilters.write().unwrap_or_else(PoisonError::into_inner);
        stored.insert(
            (cfilter.filter_type, cfilter.block_hash),
            cfilter.filter.clone(),
        )
    }
}

/// Mempool kept in memory, holding the most recent transactions.
#[derive(Debug, Default)]
pub struct MemoryMempool {
    transactions: RwLock<BoundedMap<Txid, Transaction>>,
}

impl MemoryMempool {
    /// Whether `txid` is in the pool.
    pub fn contains(&self, txid: &Txid) -> bool {
        let transactions = self.transactions.read().unwrap_or_else(PoisonError::into_inner);
        transactions.contains_key(txid)
    }

    /// Number of transactions held.
    pub fn len(&self) -> usize {
        let transactions = self.transactions.read().unwrap_or_else(PoisonError::into_inner);
        transactions.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Mempool for MemoryMempool {
    fn submit(&self, tx: &Transaction) -> bool {
        let mut transactions = self.transactions.write().unwrap_or_else(PoisonError::into_inner);
        let txid = tx.txid();
        if transactions.contains_key(&txid) {
            return false;
        }
        transactions.insert(txid, tx.clone())
    }
}

/// A peer lifecycle change recorded by [`MemoryObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerChange {
    /// A peer completed the handshake.
    Verified(Chain, PeerId),
    /// A peer went away.
    Disconnected(Chain, SocketAddr),
}

/// Observer that records every change.
#[derive(Debug, Default)]
pub struct MemoryObserver {
    changes: RwLock<Vec<PeerChange>>,
    verified: RwLock<HashSet<PeerId>>,
}

impl MemoryObserver {
    /// Every change seen so far, oldest first.
    pub fn changes(&self) -> Vec<PeerChange> {
        self.changes.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Peers reported verified at any point.
    pub fn verified(&self) -> HashSet<PeerId> {
        self.verified.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl NetworkObserver for MemoryObserver {
    fn peer_verified(&self, chain: Chain, id: PeerId, _info: &PeerInfo) {
        self.verified
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        self.changes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PeerChange::Verified(chain, id));
    }

    fn peer_disconnected(&self, chain: Chain, address: SocketAddr) {
        self.changes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PeerChange::Disconnected(chain, address));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::{header_chain, sample_transaction};

    #[test]
    fn test_headers_extend_tip_only() {
        let chain = header_chain(5);
        let oracle = MemoryHeaderOracle::default();

        assert_eq!(oracle.apply_headers(&chain[..3]), 3);
        assert_eq!(oracle.best_height(), 2);
        // Out of order header does not connect.
        assert_eq!(oracle.apply_headers(&chain[4..]), 0);
        assert_eq!(oracle.apply_headers(&chain), 2);
        assert_eq!(oracle.best_hash(), chain[4].block_hash());
        assert_eq!(oracle.header(&chain[1].block_hash()), Some(chain[1]));
    }

    #[test]
    fn test_locator_shape() {
        let chain = header_chain(200);
        let oracle = MemoryHeaderOracle::default();
        oracle.apply_headers(&chain);

        let locator = oracle.locator();
        assert_eq!(locator.first(), Some(&chain[199].block_hash()));
        assert_eq!(locator.last(), Some(&chain[0].block_hash()));
        assert_eq!(locator[9], chain[190].block_hash());
        assert_eq!(locator[10], chain[188].block_hash());
        assert!(locator.len() <= MAX_LOCATOR_SIZE);
        assert!(MemoryHeaderOracle::default().locator().is_empty());
    }

    #[test]
    fn test_headers_after_locator() {
        let chain = header_chain(10);
        let oracle = MemoryHeaderOracle::with_genesis(chain[0]);
        oracle.apply_headers(&chain[1..]);

        let served = oracle.headers_after(&[chain[3].block_hash()], BlockHash::all_zeros(), 2000);
        assert_eq!(served, chain[4..].to_vec());

        let bounded = oracle.headers_after(&[chain[3].block_hash()], chain[5].block_hash(), 2000);
        assert_eq!(bounded, chain[4..6].to_vec());

        let unknown = oracle.headers_after(&[BlockHash::from_byte_array([9; 32])], BlockHash::all_zeros(), 3);
        assert_eq!(unknown, chain[..3].to_vec());
    }

    #[test]
    fn test_mempool_dedups() {
        let mempool = MemoryMempool::default();
        let tx = sample_transaction(3);
        assert!(mempool.submit(&tx));
        assert!(!mempool.submit(&tx));
        assert!(mempool.contains(&tx.txid()));
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_filter_oracle_stores_by_stop_hash() {
        let oracle = MemoryFilterOracle::default();
        let stop = BlockHash::from_byte_array([4; 32]);
        let cfheaders = CFHeaders {
            filter_type: FilterType::Basic,
            stop_hash: stop,
            previous_header: FilterHeader::all_zeros(),
            filter_hashes: vec![bitcoin::bip158::FilterHash::from_byte_array([1; 32])],
        };
        assert!(oracle.apply_cfheaders(&cfheaders));
        assert_eq!(
            oracle.filter_headers(FilterType::Basic, &stop),
            Some(cfheaders.filter_headers())
        );
        assert_eq!(oracle.filter_headers(FilterType::Extended, &stop), None);
    }

    #[test]
    fn test_stores_evict_oldest_past_capacity() {
        let mempool = MemoryMempool::default();
        let first = sample_transaction(0);
        for n in 0..=MAX_STORED_ENTRIES as u64 {
            assert!(mempool.submit(&sample_transaction(n)));
        }
        assert_eq!(mempool.len(), MAX_STORED_ENTRIES);
        assert!(!mempool.contains(&first.txid()));
        assert!(mempool.contains(&sample_transaction(MAX_STORED_ENTRIES as u64).txid()));

        let oracle = MemoryFilterOracle::default();
        let cfilter = |n: usize| CFilter {
            filter_type: FilterType::Basic,
            block_hash: BlockHash::from_byte_array(
                [(n % 256) as u8, (n / 256) as u8].repeat(16).try_into().unwrap(),
            ),
            filter: vec![1],
        };
        for n in 0..=MAX_STORED_ENTRIES {
            assert!(oracle.apply_cfilter(&cfilter(n)));
        }
        assert_eq!(oracle.filter(FilterType::Basic, &cfilter(0).block_hash), None);
        assert_eq!(
            oracle.filter(FilterType::Basic, &cfilter(MAX_STORED_ENTRIES).block_hash),
            Some(vec![1])
        );
    }
}

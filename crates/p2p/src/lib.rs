//! Peer-to-peer networking core for Bitcoin-style blockchains.
//!
//! The crate maintains a pool of peer connections, speaks the Bitcoin wire
//! protocol with them and coordinates block, header and compact filter
//! download through a deduplicating job queue. Everything outside of the
//! network layer (header validation, filter storage, the mempool) is reached
//! through the collaborator traits in [`client::oracle`].

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::indexing_slicing))]
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::cast_possible_truncation))]

/// Supported chains and their wire parameters.
pub mod chain;
/// Peer manager client: codec, peers, jobs and the command pipeline.
pub mod client;
/// Runtime configuration.
pub mod config;
/// Consensus encoding and decoding functionality.
pub mod consensus;
/// Hash functions used by the wire protocol.
pub mod hashes;
/// I/O traits used by the consensus codec.
pub mod io;
/// Peer-to-peer protocol primitives.
pub mod p2p;
/// Various utility functions and types.
pub mod util;

pub use chain::{Chain, FilterType};
pub use client::{Collaborators, PeerManager};
pub use config::{Config, StoragePolicy};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

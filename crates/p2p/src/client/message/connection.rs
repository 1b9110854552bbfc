//! Connection-related messages for the P2P handshake and link management.
//!
//! This module contains messages used for establishing and maintaining
//! connections with peers, including version negotiation, keep-alive,
//! relay preferences, rejections and BIP 37 bloom filters.

pub(crate) mod bloom;
pub(crate) mod feefilter;
pub(crate) mod ping;
pub(crate) mod pong;
pub(crate) mod reject;
pub(crate) mod sendcmpct;
pub(crate) mod version;

pub use bloom::{FilterAdd, FilterLoad};
pub use feefilter::FeeFilter;
pub use ping::Ping;
pub use pong::Pong;
pub use reject::{Reject, RejectCode};
pub use sendcmpct::SendCmpct;
pub use version::{
    MAX_USER_AGENT_LENGTH, MIN_PEER_PROTOCOL_VERSION, PROTOCOL_VERSION, Version,
};

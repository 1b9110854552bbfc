//! Peer manager client.
//!
//! This module holds everything between a TCP socket and the public
//! [`PeerManager`] API: framing, the handshake, per-peer tasks, the job queue
//! and the pool task that ties them together.

pub mod connection;
pub mod driver;
pub mod handshake;
pub mod job;
pub mod manager;
pub mod message;
pub mod network;
pub mod oracle;
pub mod peer;
pub(crate) mod pool;

pub use connection::{ConnectionConfig, ConnectionError, ConnectionManager};
pub use driver::StateMachine;
pub use handshake::{Direction, HandshakeHandler, PeerInfo};
pub use job::{JobError, JobKey, JobOutput, JobWaiter, Task, TaskType};
pub use manager::PeerManager;
pub use message::{Connection, Message, Request, Response};
pub use network::{NetworkError, NetworkMessage};
pub use oracle::{Collaborators, FilterOracle, HeaderOracle, Mempool, NetworkObserver};
pub use peer::{PeerId, PeerState, PeerSummary, Transport};

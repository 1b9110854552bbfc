//! P2P Network Message Types
//!
//! This module defines the closed set of wire messages understood by the peer
//! manager. Messages are categorized into three groups:
//!
//! 1. **Connection messages** - handshake, keep-alive and link preferences
//! 2. **Request messages** - asks for headers, blocks, filters or addresses
//! 3. **Response messages** - answers and unsolicited announcements
//!
//! Payload encoding is chain aware because compact filter messages carry a
//! filter type byte whose meaning depends on the chain.

// See: https://developer.bitcoin.org/reference/p2p_networking.html

pub mod connection;
pub mod inventory;
pub mod request;
pub mod response;

use bitcoin::{Block, Transaction, p2p::message::CommandString};
pub use connection::{
    FeeFilter, FilterAdd, FilterLoad, Ping, Pong, Reject, RejectCode, SendCmpct, Version,
};
pub use inventory::Inventory;
pub use request::{GetBlocks, GetCFCheckpt, GetCFHeaders, GetCFilters, GetData, GetHeaders};
pub use response::{Addr, CFCheckpt, CFHeaders, CFilter, Headers, Inv, NotFound};

use crate::{
    chain::Chain,
    client::network::NetworkError,
    consensus::{ChainDecodable, Decodable, deserialize, deserialize_for, serialize, serialize_for},
};

/// Enum for message commands to avoid string matching
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageCommand {
    /// Version message - initial handshake message
    Version,
    /// Version acknowledgment - confirms handshake completion
    VerAck,
    /// Ping message - keep-alive message
    Ping,
    /// Pong message - response to ping
    Pong,
    /// SendHeaders - announce new blocks with `headers` instead of `inv`
    SendHeaders,
    /// SendCmpct message - signal preference for compact block announcements
    SendCmpct,
    /// FeeFilter message - set minimum fee rate for transaction relay
    FeeFilter,
    /// WtxIdRelay message - signal preference for wtxid-based transaction relay
    WtxIdRelay,
    /// SendAddrV2 message - signal preference for addrv2 format
    SendAddrV2,
    /// Reject - an earlier message was refused
    Reject,
    /// FilterLoad - install a bloom filter
    FilterLoad,
    /// FilterAdd - add an element to the bloom filter
    FilterAdd,
    /// FilterClear - remove the bloom filter
    FilterClear,
    /// GetHeaders message - request for block headers
    GetHeaders,
    /// GetBlocks - request for block inventory
    GetBlocks,
    /// GetData message - request for specific data items
    GetData,
    /// GetCFilters - request compact filters for a range
    GetCFilters,
    /// GetCFHeaders - request compact filter headers for a range
    GetCFHeaders,
    /// GetCFCheckpt - request compact filter header checkpoints
    GetCFCheckpt,
    /// MemPool - request the peer's mempool inventory
    MemPool,
    /// GetAddr - request known addresses
    GetAddr,
    /// Headers message - response with block headers
    Headers,
    /// Block message - full block data
    Block,
    /// Tx message - full transaction data
    Tx,
    /// Inv - inventory announcement
    Inv,
    /// NotFound message - requested data not found
    NotFound,
    /// Addr - address gossip
    Addr,
    /// CFilter - one compact filter
    CFilter,
    /// CFHeaders - compact filter hashes for a range
    CFHeaders,
    /// CFCheckpt - compact filter header checkpoints
    CFCheckpt,
    /// Unknown command that wraps the command string
    Unknown(String),
}

impl MessageCommand {
    /// Convert from a CommandString
    pub fn from_command(command: &CommandString) -> Self {
        Self::from_name(command.as_ref())
    }

    /// Convert from a command name. Unrecognised names map to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "version" => MessageCommand::Version,
            "verack" => MessageCommand::VerAck,
            "ping" => MessageCommand::Ping,
            "pong" => MessageCommand::Pong,
            "sendheaders" => MessageCommand::SendHeaders,
            "sendcmpct" => MessageCommand::SendCmpct,
            "feefilter" => MessageCommand::FeeFilter,
            "wtxidrelay" => MessageCommand::WtxIdRelay,
            "sendaddrv2" => MessageCommand::SendAddrV2,
            "reject" => MessageCommand::Reject,
            "filterload" => MessageCommand::FilterLoad,
            "filteradd" => MessageCommand::FilterAdd,
            "filterclear" => MessageCommand::FilterClear,
            "getheaders" => MessageCommand::GetHeaders,
            "getblocks" => MessageCommand::GetBlocks,
            "getdata" => MessageCommand::GetData,
            "getcfilters" => MessageCommand::GetCFilters,
            "getcfheaders" => MessageCommand::GetCFHeaders,
            "getcfcheckpt" => MessageCommand::GetCFCheckpt,
            "mempool" => MessageCommand::MemPool,
            "getaddr" => MessageCommand::GetAddr,
            "headers" => MessageCommand::Headers,
            "block" => MessageCommand::Block,
            "tx" => MessageCommand::Tx,
            "inv" => MessageCommand::Inv,
            "notfound" => MessageCommand::NotFound,
            "addr" => MessageCommand::Addr,
            "cfilter" => MessageCommand::CFilter,
            "cfheaders" => MessageCommand::CFHeaders,
            "cfcheckpt" => MessageCommand::CFCheckpt,
            other => MessageCommand::Unknown(other.to_string()),
        }
    }

    /// Convert to a CommandString
    pub fn to_command_string(&self) -> Result<CommandString, NetworkError> {
        let command_str = self.as_str();
        CommandString::try_from(command_str)
            .map_err(|_| NetworkError::InvalidCommand(command_str.to_string()))
    }

    /// Get the command as a string for logging purposes
    pub fn as_str(&self) -> &str {
        match self {
            MessageCommand::Version => "version",
            MessageCommand::VerAck => "verack",
            MessageCommand::Ping => "ping",
            MessageCommand::Pong => "pong",
            MessageCommand::SendHeaders => "sendheaders",
            MessageCommand::SendCmpct => "sendcmpct",
            MessageCommand::FeeFilter => "feefilter",
            MessageCommand::WtxIdRelay => "wtxidrelay",
            MessageCommand::SendAddrV2 => "sendaddrv2",
            MessageCommand::Reject => "reject",
            MessageCommand::FilterLoad => "filterload",
            MessageCommand::FilterAdd => "filteradd",
            MessageCommand::FilterClear => "filterclear",
            MessageCommand::GetHeaders => "getheaders",
            MessageCommand::GetBlocks => "getblocks",
            MessageCommand::GetData => "getdata",
            MessageCommand::GetCFilters => "getcfilters",
            MessageCommand::GetCFHeaders => "getcfheaders",
            MessageCommand::GetCFCheckpt => "getcfcheckpt",
            MessageCommand::MemPool => "mempool",
            MessageCommand::GetAddr => "getaddr",
            MessageCommand::Headers => "headers",
            MessageCommand::Block => "block",
            MessageCommand::Tx => "tx",
            MessageCommand::Inv => "inv",
            MessageCommand::NotFound => "notfound",
            MessageCommand::Addr => "addr",
            MessageCommand::CFilter => "cfilter",
            MessageCommand::CFHeaders => "cfheaders",
            MessageCommand::CFCheckpt => "cfcheckpt",
            MessageCommand::Unknown(s) => s,
        }
    }

    /// Decodes a payload received on `chain` for this command.
    ///
    /// The whole payload must be consumed. Unknown commands fail with
    /// [`NetworkError::UnknownCommand`] so the caller can drop them.
    pub fn decode_payload(&self, chain: Chain, payload: &[u8]) -> Result<Message, NetworkError> {
        fn plain<T: Decodable>(payload: &[u8]) -> Result<T, NetworkError> {
            Ok(deserialize(payload)?)
        }
        fn chained<T: ChainDecodable>(chain: Chain, payload: &[u8]) -> Result<T, NetworkError> {
            Ok(deserialize_for(chain, payload)?)
        }
        fn empty(payload: &[u8], message: Message) -> Result<Message, NetworkError> {
            if payload.is_empty() {
                Ok(message)
            } else {
                Err(NetworkError::UnexpectedPayload(payload.len()))
            }
        }

        let message = match self {
            MessageCommand::Version => Connection::Version(plain(payload)?).into(),
            MessageCommand::VerAck => return empty(payload, Connection::VerAck.into()),
            MessageCommand::Ping => Connection::Ping(plain(payload)?).into(),
            MessageCommand::Pong => Connection::Pong(plain(payload)?).into(),
            MessageCommand::SendHeaders => return empty(payload, Connection::SendHeaders.into()),
            MessageCommand::SendCmpct => Connection::SendCmpct(plain(payload)?).into(),
            MessageCommand::FeeFilter => Connection::FeeFilter(plain(payload)?).into(),
            MessageCommand::WtxIdRelay => return empty(payload, Connection::WtxIdRelay.into()),
            MessageCommand::SendAddrV2 => return empty(payload, Connection::SendAddrV2.into()),
            MessageCommand::Reject => Connection::Reject(plain(payload)?).into(),
            MessageCommand::FilterLoad => Connection::FilterLoad(plain(payload)?).into(),
            MessageCommand::FilterAdd => Connection::FilterAdd(plain(payload)?).into(),
            MessageCommand::FilterClear => return empty(payload, Connection::FilterClear.into()),
            MessageCommand::GetHeaders => Request::GetHeaders(plain(payload)?).into(),
            MessageCommand::GetBlocks => Request::GetBlocks(plain(payload)?).into(),
            MessageCommand::GetData => Request::GetData(plain(payload)?).into(),
            MessageCommand::GetCFilters => Request::GetCFilters(chained(chain, payload)?).into(),
            MessageCommand::GetCFHeaders => {
                Request::GetCFHeaders(chained(chain, payload)?).into()
            }
            MessageCommand::GetCFCheckpt => {
                Request::GetCFCheckpt(chained(chain, payload)?).into()
            }
            MessageCommand::MemPool => return empty(payload, Request::MemPool.into()),
            MessageCommand::GetAddr => return empty(payload, Request::GetAddr.into()),
            MessageCommand::Headers => Response::Headers(plain(payload)?).into(),
            MessageCommand::Block => Response::Block(Box::new(plain(payload)?)).into(),
            MessageCommand::Tx => Response::Tx(plain(payload)?).into(),
            MessageCommand::Inv => Response::Inv(plain(payload)?).into(),
            MessageCommand::NotFound => Response::NotFound(plain(payload)?).into(),
            MessageCommand::Addr => Response::Addr(plain(payload)?).into(),
            MessageCommand::CFilter => Response::CFilter(chained(chain, payload)?).into(),
            MessageCommand::CFHeaders => Response::CFHeaders(chained(chain, payload)?).into(),
            MessageCommand::CFCheckpt => Response::CFCheckpt(chained(chain, payload)?).into(),
            MessageCommand::Unknown(name) => {
                return Err(NetworkError::UnknownCommand(name.clone()));
            }
        };
        Ok(message)
    }
}

/// Represents all possible P2P network messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Connection-related messages for handshake and keep-alive
    Connection(Connection),
    /// Request messages
    Request(Request),
    /// Response messages
    Response(Response),
}

/// Connection-related messages used for establishing and maintaining
/// connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    /// Version message - initial handshake message containing node information
    Version(Version),
    /// Version acknowledgment - confirms receipt of version message
    VerAck,
    /// Ping message - keep-alive message with nonce
    Ping(Ping),
    /// Pong message - response to ping with same nonce
    Pong(Pong),
    /// SendHeaders - prefer `headers` announcements
    SendHeaders,
    /// SendCmpct message - signal preference for compact block announcements
    SendCmpct(SendCmpct),
    /// FeeFilter message - set minimum fee rate for transaction relay
    FeeFilter(FeeFilter),
    /// WtxIdRelay message - signal preference for wtxid-based transaction relay
    WtxIdRelay,
    /// SendAddrV2 message - signal preference for addrv2 format
    SendAddrV2,
    /// Reject - an earlier message was refused
    Reject(Reject),
    /// FilterLoad - install a bloom filter
    FilterLoad(FilterLoad),
    /// FilterAdd - add an element to the bloom filter
    FilterAdd(FilterAdd),
    /// FilterClear - remove the bloom filter
    FilterClear,
}

/// Request messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Request for block headers
    GetHeaders(GetHeaders),
    /// Request for block inventory
    GetBlocks(GetBlocks),
    /// Request for specific data items
    GetData(GetData),
    /// Request for compact filters
    GetCFilters(GetCFilters),
    /// Request for compact filter headers
    GetCFHeaders(GetCFHeaders),
    /// Request for compact filter checkpoints
    GetCFCheckpt(GetCFCheckpt),
    /// Request for the peer's mempool inventory
    MemPool,
    /// Request for known addresses
    GetAddr,
}

/// Response messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Block headers
    Headers(Headers),
    /// Full block data
    Block(Box<Block>),
    /// Full transaction data
    Tx(Transaction),
    /// Inventory announcement
    Inv(Inv),
    /// Requested data not found
    NotFound(NotFound),
    /// Address gossip
    Addr(Addr),
    /// One compact filter
    CFilter(CFilter),
    /// Compact filter hashes for a range
    CFHeaders(CFHeaders),
    /// Compact filter header checkpoints
    CFCheckpt(CFCheckpt),
}

impl Message {
    /// Get the command for this message
    pub fn command(&self) -> MessageCommand {
        match self {
            Message::Connection(conn) => match conn {
                Connection::Version(_) => MessageCommand::Version,
                Connection::VerAck => MessageCommand::VerAck,
                Connection::Ping(_) => MessageCommand::Ping,
                Connection::Pong(_) => MessageCommand::Pong,
                Connection::SendHeaders => MessageCommand::SendHeaders,
                Connection::SendCmpct(_) => MessageCommand::SendCmpct,
                Connection::FeeFilter(_) => MessageCommand::FeeFilter,
                Connection::WtxIdRelay => MessageCommand::WtxIdRelay,
                Connection::SendAddrV2 => MessageCommand::SendAddrV2,
                Connection::Reject(_) => MessageCommand::Reject,
                Connection::FilterLoad(_) => MessageCommand::FilterLoad,
                Connection::FilterAdd(_) => MessageCommand::FilterAdd,
                Connection::FilterClear => MessageCommand::FilterClear,
            },
            Message::Request(req) => match req {
                Request::GetHeaders(_) => MessageCommand::GetHeaders,
                Request::GetBlocks(_) => MessageCommand::GetBlocks,
                Request::GetData(_) => MessageCommand::GetData,
                Request::GetCFilters(_) => MessageCommand::GetCFilters,
                Request::GetCFHeaders(_) => MessageCommand::GetCFHeaders,
                Request::GetCFCheckpt(_) => MessageCommand::GetCFCheckpt,
                Request::MemPool => MessageCommand::MemPool,
                Request::GetAddr => MessageCommand::GetAddr,
            },
            Message::Response(resp) => match resp {
                Response::Headers(_) => MessageCommand::Headers,
                Response::Block(_) => MessageCommand::Block,
                Response::Tx(_) => MessageCommand::Tx,
                Response::Inv(_) => MessageCommand::Inv,
                Response::NotFound(_) => MessageCommand::NotFound,
                Response::Addr(_) => MessageCommand::Addr,
                Response::CFilter(_) => MessageCommand::CFilter,
                Response::CFHeaders(_) => MessageCommand::CFHeaders,
                Response::CFCheckpt(_) => MessageCommand::CFCheckpt,
            },
        }
    }

    /// Encodes the payload for transmission on `chain`.
    pub fn encode_payload(&self, chain: Chain) -> Result<Vec<u8>, NetworkError> {
        let payload = match self {
            Message::Connection(conn) => match conn {
                Connection::Version(m) => serialize(m),
                Connection::Ping(m) => serialize(m),
                Connection::Pong(m) => serialize(m),
                Connection::SendCmpct(m) => serialize(m),
                Connection::FeeFilter(m) => serialize(m),
                Connection::Reject(m) => serialize(m),
                Connection::FilterLoad(m) => serialize(m),
                Connection::FilterAdd(m) => serialize(m),
                Connection::VerAck
                | Connection::SendHeaders
                | Connection::WtxIdRelay
                | Connection::SendAddrV2
                | Connection::FilterClear => Vec::new(),
            },
            Message::Request(req) => match req {
                Request::GetHeaders(m) | Request::GetBlocks(m) => serialize(m),
                Request::GetData(m) => serialize(m),
                Request::GetCFilters(m) => serialize_for(chain, m)?,
                Request::GetCFHeaders(m) => serialize_for(chain, m)?,
                Request::GetCFCheckpt(m) => serialize_for(chain, m)?,
                Request::MemPool | Request::GetAddr => Vec::new(),
            },
            Message::Response(resp) => match resp {
                Response::Headers(m) => serialize(m),
                Response::Block(m) => serialize(m.as_ref()),
                Response::Tx(m) => serialize(m),
                Response::Inv(m) => serialize(m),
                Response::NotFound(m) => serialize(m),
                Response::Addr(m) => serialize(m),
                Response::CFilter(m) => serialize_for(chain, m)?,
                Response::CFHeaders(m) => serialize_for(chain, m)?,
                Response::CFCheckpt(m) => serialize_for(chain, m)?,
            },
        };
        Ok(payload)
    }

    /// Whether the message may be exchanged before the handshake completes.
    pub fn allowed_during_handshake(&self) -> bool {
        matches!(
            self,
            Message::Connection(
                Connection::Version(_)
                    | Connection::VerAck
                    | Connection::Ping(_)
                    | Connection::Pong(_)
                    | Connection::SendHeaders
                    | Connection::SendCmpct(_)
                    | Connection::FeeFilter(_)
                    | Connection::WtxIdRelay
                    | Connection::SendAddrV2
                    | Connection::Reject(_)
            )
        )
    }
}

impl From<Connection> for Message {
    fn from(conn: Connection) -> Self {
        Message::Connection(conn)
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<Response> for Message {
    fn from(resp: Response) -> Self {
        Message::Response(resp)
    }
}

use hex::FromHex;

use crate::hashes::Hash;

/// Converts 64 hex characters, in wire byte order, to a hash type.
pub fn hex_to_hash<T>(hex: &str) -> Result<T, hex::FromHexError>
where
    T: Hash<Bytes = [u8; 32]>,
{
    let bytes = <[u8; 32]>::from_hex(hex)?;
    Ok(T::from_byte_array(bytes))
}

/// Fixtures shared by the unit tests.
#[cfg(test)]
pub mod test_util {
    use std::net::SocketAddr;

    use bitcoin::{
        Amount, Block, BlockHash, CompactTarget, OutPoint, ScriptBuf, Sequence, Transaction,
        TxIn, TxMerkleNode, TxOut, Witness,
        block::{Header as BlockHeader, Version},
        locktime::absolute,
        transaction,
    };
    use tokio::io::{AsyncRead, AsyncWrite};

    use crate::{
        chain::Chain,
        client::{
            connection::{ConnectionConfig, ConnectionError, ConnectionManager},
            handshake::{Direction, HandshakeHandler, PeerInfo},
            message::{Connection, Message, connection::Pong},
        },
        config::Config,
        hashes::Hash,
    };

    /// Nonce used by scripted remotes; never equal to a pool nonce in tests.
    const REMOTE_NONCE: u64 = 0x5eed_5eed;

    /// `n` headers linked by `prev_blockhash`, starting from an all-zero parent.
    pub fn header_chain(n: usize) -> Vec<BlockHeader> {
        let mut headers = Vec::with_capacity(n);
        let mut prev_blockhash = BlockHash::all_zeros();
        for i in 0..n {
            let header = BlockHeader {
                version: Version::ONE,
                prev_blockhash,
                merkle_root: TxMerkleNode::all_zeros(),
                time: 1_600_000_000 + i as u32,
                bits: CompactTarget::from_consensus(0x207f_ffff),
                nonce: i as u32,
            };
            prev_blockhash = header.block_hash();
            headers.push(header);
        }
        headers
    }

    /// A coinbase-shaped transaction; distinct `n` give distinct txids.
    pub fn sample_transaction(n: u64) -> Transaction {
        Transaction {
            version: transaction::Version::ONE,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: ScriptBuf::from_bytes(n.to_le_bytes().to_vec()),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(n.saturating_mul(1000)),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    /// A one-transaction block; distinct `n` give distinct hashes.
    pub fn sample_block(n: u64) -> Block {
        let txdata = vec![sample_transaction(n)];
        let mut block = Block {
            header: BlockHeader {
                version: Version::ONE,
                prev_blockhash: BlockHash::all_zeros(),
                merkle_root: TxMerkleNode::all_zeros(),
                time: 1_600_000_000,
                bits: CompactTarget::from_consensus(0x207f_ffff),
                nonce: n as u32,
            },
            txdata,
        };
        if let Some(root) = block.compute_merkle_root() {
            block.header.merkle_root = root;
        }
        block
    }

    /// A scripted remote node driving the other end of a transport.
    #[derive(Debug)]
    pub struct RemoteNode<S> {
        connection: ConnectionManager,
        stream: S,
        /// What our node announced in its `version`.
        pub peer: PeerInfo,
    }

    impl<S> RemoteNode<S>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        /// Handshakes as the dialing side: sends `version` first.
        pub async fn connect(chain: Chain, stream: S, start_height: i32) -> Result<Self, ConnectionError> {
            Self::handshake(chain, stream, start_height, Direction::Outbound).await
        }

        /// Handshakes as the accepting side.
        pub async fn accept(chain: Chain, stream: S, start_height: i32) -> Result<Self, ConnectionError> {
            Self::handshake(chain, stream, start_height, Direction::Inbound).await
        }

        async fn handshake(
            chain: Chain,
            mut stream: S,
            start_height: i32,
            direction: Direction,
        ) -> Result<Self, ConnectionError> {
            let config = Config::new(chain).with_user_agent("/remote:0.1/");
            let connection = ConnectionManager::new(ConnectionConfig {
                read_timeout: std::time::Duration::from_secs(5),
                ..ConnectionConfig::from(&config)
            });
            let addr: SocketAddr = ([127, 0, 0, 1], chain.default_port()).into();
            let peer = HandshakeHandler::new(&config, REMOTE_NONCE, start_height)
                .perform_handshake(&connection, &mut stream, addr, direction)
                .await?;
            Ok(Self {
                connection,
                stream,
                peer,
            })
        }

        /// Sends one message.
        pub async fn send(&mut self, message: Message) -> Result<(), ConnectionError> {
            self.connection.send_message(&mut self.stream, message).await
        }

        /// Receives the next message.
        pub async fn recv(&mut self) -> Result<Message, ConnectionError> {
            self.connection.receive_message(&mut self.stream).await
        }

        /// Receives until `pick` accepts a message, answering pings on the way.
        pub async fn recv_until<T>(
            &mut self,
            mut pick: impl FnMut(Message) -> Option<T>,
        ) -> Result<T, ConnectionError> {
            loop {
                let message = self.recv().await?;
                if let Message::Connection(Connection::Ping(ping)) = &message {
                    let pong = Connection::Pong(Pong::new(ping.nonce()));
                    self.send(pong.into()).await?;
                    continue;
                }
                if let Some(found) = pick(message) {
                    return Ok(found);
                }
            }
        }

        /// Writes raw bytes, framed or not.
        pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
            self.connection.write_frame(&mut self.stream, bytes).await
        }
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{BlockHash, Txid};

    use super::*;

    #[test]
    fn test_hex_to_hash_keeps_wire_order() {
        let hex = "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b";
        let txid: Txid = hex_to_hash(hex).unwrap();
        assert_eq!(
            txid.to_string(),
            "3ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a"
        );
    }

    #[test]
    fn test_invalid_hex() {
        assert!(hex_to_hash::<BlockHash>("invalid_hex").is_err());
        assert!(hex_to_hash::<BlockHash>("00").is_err());
    }
}

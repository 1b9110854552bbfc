//! Runtime configuration for the peer manager.
//!
//! A [`Config`] is supplied when the manager starts and is not mutated
//! afterwards. It can be built in code or loaded from JSON.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{chain::Chain, p2p::ServiceFlags};

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid JSON for [`Config`].
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    /// A field holds a value the manager cannot run with.
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// How much block data the node keeps. Drives the outbound peer target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoragePolicy {
    /// Keep every block.
    All,
    /// Keep recent blocks only.
    Cache,
    /// Keep no blocks.
    #[default]
    None,
}

impl StoragePolicy {
    /// Number of connected peers to maintain under this policy.
    pub fn peer_target(self) -> usize {
        match self {
            StoragePolicy::All => 6,
            StoragePolicy::Cache => 4,
            StoragePolicy::None => 2,
        }
    }
}

/// Peer manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Chain to connect to.
    pub chain: Chain,
    /// Storage policy, used to size the peer pool.
    #[serde(default)]
    pub storage_policy: StoragePolicy,
    /// Optional `host:port` resolved on the first housekeeping tick.
    #[serde(default)]
    pub seed_node: Option<String>,
    /// User agent advertised in `version`.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Raw service bits advertised in `version`.
    #[serde(default)]
    pub services: u64,
    /// Outbound TCP connect timeout.
    #[serde(default = "default_connect_timeout", with = "millis")]
    pub connect_timeout: Duration,
    /// Upper bound on the whole version/verack exchange.
    #[serde(default = "default_handshake_timeout", with = "millis")]
    pub handshake_timeout: Duration,
    /// Maximum silence tolerated between frames.
    #[serde(default = "default_read_timeout", with = "millis")]
    pub read_timeout: Duration,
    /// Timeout for writing one frame.
    #[serde(default = "default_write_timeout", with = "millis")]
    pub write_timeout: Duration,
    /// Keep-alive ping period for verified peers.
    #[serde(default = "default_ping_interval", with = "millis")]
    pub ping_interval: Duration,
    /// Driver tick period while work remains.
    #[serde(default = "default_heartbeat_interval", with = "millis")]
    pub heartbeat_interval: Duration,
    /// Driver tick period while idle.
    #[serde(default = "default_idle_interval", with = "millis")]
    pub idle_interval: Duration,
    /// How long an assigned job may wait for its answer.
    #[serde(default = "default_job_timeout", with = "millis")]
    pub job_timeout: Duration,
    /// Reassignments allowed before a job fails.
    #[serde(default = "default_max_job_retries")]
    pub max_job_retries: u32,
    /// Maximum block hashes per `getdata`.
    #[serde(default = "default_block_batch_limit")]
    pub block_batch_limit: usize,
    /// Malformed messages tolerated before a peer is dropped.
    #[serde(default = "default_max_malformed_messages")]
    pub max_malformed_messages: u32,
}

fn default_user_agent() -> String {
    format!("/blockchain-p2p:{}/", crate::VERSION)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_handshake_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_ping_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_idle_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_job_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_job_retries() -> u32 {
    3
}

fn default_block_batch_limit() -> usize {
    1
}

fn default_max_malformed_messages() -> u32 {
    10
}

impl Config {
    /// Configuration for `chain` with every other field at its default.
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            storage_policy: StoragePolicy::default(),
            seed_node: None,
            user_agent: default_user_agent(),
            services: 0,
            connect_timeout: default_connect_timeout(),
            handshake_timeout: default_handshake_timeout(),
            read_timeout: default_read_timeout(),
            write_timeout: default_write_timeout(),
            ping_interval: default_ping_interval(),
            heartbeat_interval: default_heartbeat_interval(),
            idle_interval: default_idle_interval(),
            job_timeout: default_job_timeout(),
            max_job_retries: default_max_job_retries(),
            block_batch_limit: default_block_batch_limit(),
            max_malformed_messages: default_max_malformed_messages(),
        }
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Sets the storage policy.
    pub fn with_storage_policy(mut self, policy: StoragePolicy) -> Self {
        self.storage_policy = policy;
        self
    }

    /// Sets the seed node.
    pub fn with_seed_node(mut self, seed: impl Into<String>) -> Self {
        self.seed_node = Some(seed.into());
        self
    }

    /// Sets the advertised user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Sets the advertised service bits.
    pub fn with_services(mut self, services: ServiceFlags) -> Self {
        self.services = services.to_u64();
        self
    }

    /// Sets the maximum number of block hashes per `getdata`.
    pub fn with_block_batch_limit(mut self, limit: usize) -> Self {
        self.block_batch_limit = limit;
        self
    }

    /// Sets the job timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Sets the retry bound for reassigned jobs.
    pub fn with_max_job_retries(mut self, retries: u32) -> Self {
        self.max_job_retries = retries;
        self
    }

    /// Sets the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Advertised services as flags.
    pub fn service_flags(&self) -> ServiceFlags {
        ServiceFlags::from(self.services)
    }

    /// Number of connected peers housekeeping tries to maintain.
    ///
    /// The unit test chain never connects out on its own.
    pub fn target_peer_count(&self) -> usize {
        if self.chain == Chain::UnitTest {
            return 0;
        }
        self.storage_policy.peer_target()
    }

    /// Checks values that would stall the manager.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_batch_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "block_batch_limit",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "heartbeat_interval",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.user_agent.len() > crate::client::message::connection::MAX_USER_AGENT_LENGTH {
            return Err(ConfigError::Invalid {
                field: "user_agent",
                reason: "exceeds 256 bytes".to_string(),
            });
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_target_by_policy() {
        let config = Config::new(Chain::Bitcoin);
        assert_eq!(config.target_peer_count(), 2);
        assert_eq!(
            config.clone().with_storage_policy(StoragePolicy::All).target_peer_count(),
            6
        );
        assert_eq!(
            config.with_storage_policy(StoragePolicy::Cache).target_peer_count(),
            4
        );
    }

    #[test]
    fn test_unit_test_chain_targets_no_peers() {
        let config = Config::new(Chain::UnitTest).with_storage_policy(StoragePolicy::All);
        assert_eq!(config.target_peer_count(), 0);
    }

    #[test]
    fn test_json_defaults() {
        let config = Config::from_json_str(r#"{"chain": "litecoin"}"#).unwrap();
        assert_eq!(config.chain, Chain::Litecoin);
        assert_eq!(config.storage_policy, StoragePolicy::None);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(100));
        assert_eq!(config.block_batch_limit, 1);
        assert_eq!(config.max_job_retries, 3);
    }

    #[test]
    fn test_json_overrides() {
        let json = r#"{
            "chain": "bitcoin_cash",
            "storage_policy": "Cache",
            "seed_node": "seed.example.org:8333",
            "job_timeout": 2500,
            "block_batch_limit": 16
        }"#;
        let config = Config::from_json_str(json).unwrap();
        assert_eq!(config.storage_policy, StoragePolicy::Cache);
        assert_eq!(config.seed_node.as_deref(), Some("seed.example.org:8333"));
        assert_eq!(config.job_timeout, Duration::from_millis(2500));
        assert_eq!(config.block_batch_limit, 16);
    }

    #[test]
    fn test_zero_batch_limit_is_rejected() {
        let result = Config::from_json_str(r#"{"chain": "bitcoin", "block_batch_limit": 0}"#);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                field: "block_batch_limit",
                ..
            })
        ));
    }
}

//! Configuration module for Harbor.

use crate::error::{HarborError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Main configuration for a Harbor node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarborConfig {
    /// Node identity configuration.
    pub node: NodeConfig,
    /// Placement configuration.
    pub placement: PlacementConfig,
    /// Job pipeline configuration.
    pub jobs: JobsConfig,
    /// Observability configuration.
    pub observability: ObservabilityConfig,
}

impl HarborConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HarborError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| HarborError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.node.id.is_empty() {
            return Err(HarborError::InvalidConfig {
                field: "node.id".to_string(),
                reason: "Node id must be non-empty".to_string(),
            });
        }

        if !self.placement.peers.contains(&self.node.id) {
            return Err(HarborError::InvalidConfig {
                field: "placement.peers".to_string(),
                reason: "Peer list must include this node's own id".to_string(),
            });
        }

        if self.placement.replication_factor == 0 {
            return Err(HarborError::InvalidConfig {
                field: "placement.replication_factor".to_string(),
                reason: "Replication factor must be non-zero".to_string(),
            });
        }

        if self.placement.shard_suffix_len == 0 || self.placement.shard_suffix_len > 2 {
            return Err(HarborError::InvalidConfig {
                field: "placement.shard_suffix_len".to_string(),
                reason: "Shard suffix length must be 1 or 2".to_string(),
            });
        }

        if self.jobs.workers == 0 {
            return Err(HarborError::InvalidConfig {
                field: "jobs.workers".to_string(),
                reason: "Worker count must be non-zero".to_string(),
            });
        }

        Ok(())
    }

    /// Create a minimal single-node development configuration.
    pub fn development() -> Self {
        Self {
            node: NodeConfig {
                id: "0xdevnode".to_string(),
                host: "http://127.0.0.1:1991".to_string(),
            },
            placement: PlacementConfig {
                namespace: "devnet".to_string(),
                peers: vec!["0xdevnode".to_string()],
                replication_factor: 1,
                shard_suffix_len: 1,
            },
            jobs: JobsConfig {
                workers: 2,
                ack_wait: Duration::from_secs(30),
                temp_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            },
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Node identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's stable public identity.
    pub id: String,
    /// Advertised host address.
    pub host: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: "0xharbor".to_string(),
            host: "http://127.0.0.1:1991".to_string(),
        }
    }
}

/// Placement configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Network namespace prefixing every shared resource name.
    pub namespace: String,
    /// Identities of every node in the cluster, this node included.
    pub peers: Vec<String>,
    /// Replicas per shard.
    pub replication_factor: usize,
    /// Content-id suffix length defining the shard space (36^k shards).
    pub shard_suffix_len: usize,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            namespace: "harbor".to_string(),
            peers: vec!["0xharbor".to_string()],
            replication_factor: 3,
            shard_suffix_len: 1,
        }
    }
}

/// Job pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Worker loops pulling from the shared job queue.
    pub workers: usize,
    /// Queue ack deadline before a claimed message is redelivered.
    #[serde(with = "humantime_serde")]
    pub ack_wait: Duration,
    /// Lifetime of staged sources and results in the temp store.
    #[serde(with = "humantime_serde")]
    pub temp_ttl: Duration,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            ack_wait: Duration::from_secs(30),
            temp_ttl: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics.
    pub metrics_enabled: bool,
    /// Metrics bind address.
    pub metrics_addr: SocketAddr,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_addr: "0.0.0.0:9090".parse().expect("valid socket address"),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = HarborConfig::default();
        config.validate().unwrap();
    }

    #[test]
    fn test_development_config() {
        let config = HarborConfig::development();
        config.validate().unwrap();
        assert_eq!(config.placement.replication_factor, 1);
        assert_eq!(config.placement.shard_suffix_len, 1);
    }

    #[test]
    fn test_rejects_missing_self_in_peers() {
        let mut config = HarborConfig::development();
        config.placement.peers = vec!["0xsomeoneelse".to_string()];
        let err = config.validate().unwrap_err();
        assert!(matches!(err, HarborError::InvalidConfig { .. }));
    }

    #[test]
    fn test_rejects_oversized_suffix() {
        let mut config = HarborConfig::development();
        config.placement.shard_suffix_len = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_roundtrip() {
        let config = HarborConfig::development();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harbor.json");
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = HarborConfig::from_file(&path).unwrap();
        assert_eq!(loaded.node.id, config.node.id);
        assert_eq!(loaded.jobs.ack_wait, config.jobs.ack_wait);
    }

    #[test]
    fn test_duration_fields_accept_humantime_strings() {
        let json = r#"{"workers": 2, "ack_wait": "45s", "temp_ttl": "10m"}"#;
        let jobs: JobsConfig = serde_json::from_str(json).unwrap();
        assert_eq!(jobs.ack_wait, Duration::from_secs(45));
        assert_eq!(jobs.temp_ttl, Duration::from_secs(600));
    }
}

//! Configuration management for VoteChain

use crate::error::ChainError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `ballot.secret_key`.
pub const SECRET_KEY_ENV: &str = "VOTECHAIN_SECRET_KEY";

/// Proof-of-work difficulty used when none is configured.
pub const DEFAULT_DIFFICULTY: usize = 2;

const MAX_DIFFICULTY: usize = 16;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub miner: MinerConfig,
    #[serde(default)]
    pub ballot: BallotConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Address peers use to reach this node. Derived from host/port when unset.
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
    #[serde(default = "default_peer_timeout")]
    pub peer_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            api_port: default_api_port(),
            public_url: None,
            bootstrap_peers: Vec::new(),
            peer_timeout_secs: default_peer_timeout(),
        }
    }
}

impl NetworkConfig {
    pub fn public_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.clone(),
            None => {
                let host = if self.host == "0.0.0.0" { "127.0.0.1" } else { &self.host };
                format!("http://{}:{}", host, self.api_port)
            }
        }
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Json,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_public_chain_file")]
    pub public_chain_file: String,
    #[serde(default = "default_counting_chain_file")]
    pub counting_chain_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: StorageBackend::default(),
            public_chain_file: default_public_chain_file(),
            counting_chain_file: default_counting_chain_file(),
        }
    }
}

impl StorageConfig {
    pub fn public_chain_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.public_chain_file)
    }

    pub fn counting_chain_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.counting_chain_file)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    #[serde(default = "default_difficulty")]
    pub difficulty: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
        }
    }
}

#[derive(Clone, Deserialize, Default)]
pub struct BallotConfig {
    /// Base64-encoded 32-byte AES key used to encrypt party choices on the public chain.
    #[serde(default)]
    pub secret_key: Option<String>,
}

impl std::fmt::Debug for BallotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BallotConfig")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl BallotConfig {
    /// Decoded key bytes, or `None` when no key has been configured.
    pub fn key_bytes(&self) -> Result<Option<Vec<u8>>, ChainError> {
        let Some(encoded) = &self.secret_key else {
            return Ok(None);
        };
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| ChainError::Config(format!("ballot.secret_key is not base64: {}", e)))?;
        if bytes.len() != 32 {
            return Err(ChainError::Config(format!(
                "ballot.secret_key must decode to 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Some(bytes))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    pub fn tracing_level(&self) -> tracing::Level {
        self.level.parse().unwrap_or(tracing::Level::INFO)
    }
}

/// Load configuration from `path`, falling back to defaults when the file is absent.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ChainError> {
    let path = path.as_ref();
    let config_str = if path.exists() {
        fs::read_to_string(path)
            .map_err(|e| ChainError::Config(format!("Failed to read {}: {}", path.display(), e)))?
    } else {
        String::new()
    };

    let mut config: Config = if config_str.trim().is_empty() {
        Config::default()
    } else {
        toml::from_str(&config_str).map_err(|e| ChainError::Config(e.to_string()))?
    };

    if let Ok(secret) = std::env::var(SECRET_KEY_ENV) {
        if !secret.trim().is_empty() {
            config.ballot.secret_key = Some(secret);
        }
    }

    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<(), ChainError> {
        if self.miner.difficulty == 0 || self.miner.difficulty > MAX_DIFFICULTY {
            return Err(ChainError::Config(format!(
                "miner.difficulty must be between 1 and {}",
                MAX_DIFFICULTY
            )));
        }

        if self.storage.data_dir.trim().is_empty() {
            return Err(ChainError::Config("storage.data_dir must be set".to_string()));
        }

        if self.storage.public_chain_file == self.storage.counting_chain_file {
            return Err(ChainError::Config(
                "public and counting chains must be stored in different files".to_string(),
            ));
        }

        self.ballot.key_bytes()?;
        Ok(())
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8000
}

fn default_peer_timeout() -> u64 {
    3
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_public_chain_file() -> String {
    "public_chain.json".to_string()
}

fn default_counting_chain_file() -> String {
    "counting_chain.json".to_string()
}

fn default_difficulty() -> usize {
    DEFAULT_DIFFICULTY
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.network.api_port, 8000);
        assert_eq!(config.miner.difficulty, DEFAULT_DIFFICULTY);
        assert_eq!(config.storage.backend, StorageBackend::Json);
        assert_eq!(config.network.public_url(), "http://127.0.0.1:8000");
    }

    #[test]
    fn test_parse_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[network]\napi_port = 9100\nbootstrap_peers = [\"http://10.0.0.2:8000\"]\n\n[storage]\nbackend = \"sqlite\"\n\n[miner]\ndifficulty = 3"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.network.api_port, 9100);
        assert_eq!(config.network.bootstrap_peers.len(), 1);
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.miner.difficulty, 3);
        assert_eq!(config.network.peer_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_rejects_zero_difficulty() {
        let mut config = Config::default();
        config.miner.difficulty = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_short_secret() {
        let config = BallotConfig {
            secret_key: Some(STANDARD.encode([7u8; 16])),
        };
        assert!(config.key_bytes().is_err());
    }

    #[test]
    fn test_rejects_shared_chain_file() {
        let mut config = Config::default();
        config.storage.counting_chain_file = config.storage.public_chain_file.clone();
        assert!(config.validate().is_err());
    }
}

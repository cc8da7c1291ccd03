//! Runtime settings loaded from `config.toml`.
//!
//! Every key is optional; missing keys fall back to the compile-time
//! defaults in `core::config`.

use crate::core::config::{
    CHUNK_ACK_TIMEOUT, CHUNK_SIZE, DEFAULT_ICE_SERVERS, MAX_CHUNK_RETRANSMITS, SIGNALING_TIMEOUT,
};
use crate::core::session::SessionConfig;
use crate::core::transfer::TransferConfig;
use crate::core::transport::ChannelReliability;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// User-configurable settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Display name shown to peers.
    pub display_name: Option<String>,
    /// Signaling store directory.
    pub store: Option<PathBuf>,
    /// Where received files are saved.
    pub out: Option<PathBuf>,
    pub transfer: TransferSettings,
    pub network: NetworkSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    pub chunk_size: usize,
    pub ack_timeout_ms: u64,
    pub max_retransmits: u32,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            ack_timeout_ms: CHUNK_ACK_TIMEOUT.as_millis() as u64,
            max_retransmits: MAX_CHUNK_RETRANSMITS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub ice_servers: Vec<String>,
    pub reliability: ChannelReliability,
    pub signaling_timeout_ms: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            ice_servers: DEFAULT_ICE_SERVERS.iter().map(|s| s.to_string()).collect(),
            reliability: ChannelReliability::default(),
            signaling_timeout_ms: SIGNALING_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file. Returns `Ok(None)` when the file does
    /// not exist.
    pub fn from_file(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let settings = toml::from_str::<Settings>(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(Some(settings))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            reliability: self.network.reliability,
            signaling_timeout: Duration::from_millis(self.network.signaling_timeout_ms),
            transfer: TransferConfig {
                // A zero chunk size would never make progress.
                chunk_size: self.transfer.chunk_size.max(1),
                ack_timeout: Duration::from_millis(self.transfer.ack_timeout_ms),
                max_retransmits: self.transfer.max_retransmits,
            },
            ..SessionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let settings: Settings = toml::from_str("").unwrap();
        assert_eq!(settings, Settings::default());

        let config = settings.session_config();
        assert_eq!(config.transfer, TransferConfig::default());
        assert_eq!(config.signaling_timeout, SIGNALING_TIMEOUT);
        assert_eq!(config.reliability, ChannelReliability::Reliable);
        assert_eq!(settings.network.ice_servers.len(), DEFAULT_ICE_SERVERS.len());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            display_name = "alice"

            [transfer]
            ack_timeout_ms = 500

            [network]
            ice_servers = ["stun:stun.example.org:3478"]
            reliability = { unordered = { max_retransmits = 3 } }
            "#,
        )
        .unwrap();

        assert_eq!(settings.display_name.as_deref(), Some("alice"));
        assert_eq!(settings.network.ice_servers, vec!["stun:stun.example.org:3478"]);

        let config = settings.session_config();
        assert_eq!(config.transfer.chunk_size, CHUNK_SIZE);
        assert_eq!(config.transfer.ack_timeout, Duration::from_millis(500));
        assert_eq!(config.transfer.max_retransmits, MAX_CHUNK_RETRANSMITS);
        assert_eq!(
            config.reliability,
            ChannelReliability::Unordered { max_retransmits: 3 }
        );
    }

    #[test]
    fn missing_file_is_none() {
        let path = std::env::temp_dir()
            .join("peerdrop_test")
            .join(format!("missing-{}.toml", uuid::Uuid::new_v4().simple()));
        assert!(Settings::from_file(&path).unwrap().is_none());
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = std::env::temp_dir()
            .join("peerdrop_test")
            .join(format!("settings-{}", uuid::Uuid::new_v4().simple()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        fs::write(&path, "[transfer]\nchunk_size = \"big\"\n").unwrap();

        assert!(Settings::from_file(&path).is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}

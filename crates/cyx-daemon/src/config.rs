//! Host configuration file (spec §B.3).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Complete host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CyxConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// 0 = OS-assigned ephemeral port.
    #[serde(default)]
    pub listen_port: u16,
    /// Bootstrap contacts, `host:port`, handed to the DHT collaborator.
    #[serde(default)]
    pub bootstrap_nodes: Vec<String>,
    #[serde(default = "default_max_peers")]
    pub max_peers: u32,
}

/// Where the long-term identity key material lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Path to the 32-byte raw Ed25519 seed. Generated on first run if
    /// absent.
    #[serde(default = "default_key_path")]
    pub key_path: String,
}

/// Naming settings (spec §4.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Name to register for this identity on startup, if any.
    #[serde(default)]
    pub advertise_name: String,
    /// Override the gossip hop limit (`cyx_dns::GOSSIP_MAX_HOPS` default).
    #[serde(default)]
    pub gossip_fanout_override: Option<u8>,
}

/// Configured relay servers (spec §4.2), capped at [`cyx_relay::MAX_RELAYS`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// `host:port` endpoints, at most `cyx_relay::MAX_RELAYS` of them.
    #[serde(default)]
    pub endpoints: Vec<String>,
}

fn default_max_peers() -> u32 {
    256
}

fn default_key_path() -> String {
    String::new()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_port: 0,
            bootstrap_nodes: Vec::new(),
            max_peers: default_max_peers(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self { key_path: default_key_path() }
    }
}

impl CyxConfig {
    /// Load from the default config file location, falling back to
    /// defaults if it does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        Self::default_data_dir()
    }

    pub fn key_path(&self) -> PathBuf {
        if self.identity.key_path.is_empty() {
            self.data_dir().join("identity.key")
        } else {
            PathBuf::from(&self.identity.key_path)
        }
    }

    fn config_path() -> PathBuf {
        Self::default_data_dir().join("config.toml")
    }

    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("CYX_DATA_DIR") {
            return PathBuf::from(dir);
        }
        std::env::var("HOME")
            .map(|h| PathBuf::from(h).join(".cyxchat"))
            .unwrap_or_else(|_| PathBuf::from("/tmp/cyxchat"))
    }
}

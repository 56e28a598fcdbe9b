//! Configuration data model.
//!
//! All structs derive `Serialize`/`Deserialize` for TOML persistence.
//! Every field has a sensible default so the client works out of the box.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::irc::metadata::DEFAULT_KEYS;
use crate::persist::SavedServer;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Servers seeded into the saved server list on first start.
    #[serde(default)]
    pub servers: Vec<SavedServer>,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub ctcp: CtcpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Event handling behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default = "default_max_scrollback")]
    pub max_scrollback: usize,
    #[serde(default = "default_typing_timeout")]
    pub typing_timeout_secs: u64,
    #[serde(default = "default_who_delay")]
    pub who_delay_ms: u64,
    #[serde(default = "default_chathistory_delay")]
    pub chathistory_delay_ms: u64,
    #[serde(default = "default_chathistory_limit")]
    pub chathistory_limit: usize,
    /// How long to wait for a history batch before falling back to `WHO`.
    #[serde(default = "default_chathistory_timeout")]
    pub chathistory_timeout_ms: u64,
    /// How long users lost in a netsplit are remembered for a netjoin.
    #[serde(default = "default_netsplit_memory")]
    pub netsplit_memory_secs: u64,
    /// Retry once with `_` appended when the nickname is taken.
    #[serde(default = "default_true")]
    pub nick_retry: bool,
    #[serde(default = "default_quit_message")]
    pub quit_message: String,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            max_scrollback: default_max_scrollback(),
            typing_timeout_secs: default_typing_timeout(),
            who_delay_ms: default_who_delay(),
            chathistory_delay_ms: default_chathistory_delay(),
            chathistory_limit: default_chathistory_limit(),
            chathistory_timeout_ms: default_chathistory_timeout(),
            netsplit_memory_secs: default_netsplit_memory(),
            nick_retry: true,
            quit_message: default_quit_message(),
        }
    }
}

impl BehaviorConfig {
    pub fn typing_timeout(&self) -> Duration {
        Duration::from_secs(self.typing_timeout_secs)
    }

    pub fn who_delay(&self) -> Duration {
        Duration::from_millis(self.who_delay_ms)
    }

    pub fn chathistory_delay(&self) -> Duration {
        Duration::from_millis(self.chathistory_delay_ms)
    }

    pub fn chathistory_timeout(&self) -> Duration {
        Duration::from_millis(self.chathistory_timeout_ms)
    }

    pub fn netsplit_memory(&self) -> Duration {
        Duration::from_secs(self.netsplit_memory_secs)
    }
}

/// `draft/metadata` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_metadata_keys")]
    pub subscribe_keys: Vec<String>,
    #[serde(default = "default_channel_cache_ttl")]
    pub channel_cache_ttl_secs: u64,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            subscribe_keys: default_metadata_keys(),
            channel_cache_ttl_secs: default_channel_cache_ttl(),
        }
    }
}

impl MetadataConfig {
    pub fn channel_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.channel_cache_ttl_secs)
    }
}

/// CTCP (Client-To-Client Protocol) auto-reply settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtcpConfig {
    #[serde(default = "default_true")]
    pub reply_version: bool,
    #[serde(default = "default_true")]
    pub reply_ping: bool,
    #[serde(default = "default_true")]
    pub reply_time: bool,
    #[serde(default = "default_true")]
    pub reply_clientinfo: bool,
    #[serde(default = "default_version_string")]
    pub version_string: String,
}

impl Default for CtcpConfig {
    fn default() -> Self {
        Self {
            reply_version: true,
            reply_ping: true,
            reply_time: true,
            reply_clientinfo: true,
            version_string: default_version_string(),
        }
    }
}

/// Diagnostic log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default = "default_true")]
    pub ansi: bool,
    #[serde(default)]
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            ansi: true,
            with_target: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Overrides the platform data directory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}
fn default_max_scrollback() -> usize {
    10000
}
fn default_typing_timeout() -> u64 {
    6
}
fn default_who_delay() -> u64 {
    100
}
fn default_chathistory_delay() -> u64 {
    50
}
fn default_chathistory_limit() -> usize {
    50
}
fn default_chathistory_timeout() -> u64 {
    5000
}
fn default_netsplit_memory() -> u64 {
    1800
}
fn default_quit_message() -> String {
    "ircsync".to_string()
}
fn default_metadata_keys() -> Vec<String> {
    DEFAULT_KEYS.iter().map(|k| k.to_string()).collect()
}
fn default_channel_cache_ttl() -> u64 {
    300
}
fn default_version_string() -> String {
    format!("ircsync {}", env!("CARGO_PKG_VERSION"))
}
fn default_log_filter() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.behavior.typing_timeout_secs, 6);
        assert_eq!(cfg.behavior.who_delay_ms, 100);
        assert_eq!(cfg.behavior.chathistory_delay_ms, 50);
        assert_eq!(cfg.behavior.chathistory_timeout_ms, 5000);
        assert_eq!(cfg.behavior.netsplit_memory_secs, 1800);
        assert_eq!(cfg.metadata.channel_cache_ttl_secs, 300);
        assert_eq!(cfg.metadata.subscribe_keys.len(), DEFAULT_KEYS.len());
        assert!(cfg.servers.is_empty());
    }

    #[test]
    fn test_partial_sections() {
        let cfg: AppConfig = toml::from_str(
            r##"
            [behavior]
            max_scrollback = 500

            [ctcp]
            reply_time = false

            [[servers]]
            host = "irc.example.org"
            nickname = "me"
            channels = ["#rust"]
            "##,
        )
        .unwrap();
        assert_eq!(cfg.behavior.max_scrollback, 500);
        assert!(cfg.behavior.nick_retry);
        assert!(!cfg.ctcp.reply_time);
        assert!(cfg.ctcp.reply_version);
        assert_eq!(cfg.servers[0].port, 6697);
        assert_eq!(cfg.servers[0].channels, vec!["#rust"]);
    }
}

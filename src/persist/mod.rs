//! Persisted client state.
//!
//! Everything lives in an opaque key-value store as last-write-wins JSON
//! blobs. Loading is forgiving: a missing or unreadable blob becomes the
//! default, and fields absent from an older blob are filled in by serde
//! defaults.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PersistError;
use crate::irc::caps::SaslCredentials;
use crate::irc::metadata::MetadataCache;

pub const SAVED_SERVERS_KEY: &str = "savedServers";
pub const SERVER_METADATA_KEY: &str = "serverMetadata";
pub const GLOBAL_SETTINGS_KEY: &str = "globalSettings";
pub const CHANNEL_ORDER_KEY: &str = "channelOrder";
pub const PINNED_CHATS_KEY: &str = "pinnedPrivateChats";

pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, PersistError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistError>;
    fn remove(&mut self, key: &str) -> Result<(), PersistError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// One `<key>.json` file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data_dir>/ircsync`, or `./ircsync` when there is no data dir.
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ircsync")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, PersistError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PersistError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistError> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistError::Read { path, source }),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistError> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir).map_err(|source| PersistError::Write {
            path: self.dir.clone(),
            source,
        })?;
        std::fs::write(&path, value).map_err(|source| PersistError::Write { path, source })
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistError> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistError::Write { path, source }),
        }
    }
}

/// A server the user saved, with everything needed to reconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedServer {
    #[serde(default)]
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub tls: bool,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub realname: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub sasl_account: Option<String>,
    #[serde(default)]
    pub sasl_password: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub oper_name: Option<String>,
    #[serde(default)]
    pub oper_password: Option<String>,
    #[serde(default)]
    pub oper_on_connect: bool,
    #[serde(default)]
    pub skip_link_security_warning: bool,
    #[serde(default)]
    pub auto_connect: bool,
}

impl SavedServer {
    pub fn new(host: &str, port: u16, nickname: &str) -> Self {
        Self {
            name: host.to_string(),
            host: host.to_string(),
            port,
            tls: true,
            nickname: nickname.to_string(),
            username: None,
            realname: None,
            password: None,
            sasl_account: None,
            sasl_password: None,
            channels: Vec::new(),
            oper_name: None,
            oper_password: None,
            oper_on_connect: false,
            skip_link_security_warning: false,
            auto_connect: false,
        }
    }

    pub fn key(&self) -> String {
        server_key(&self.host)
    }

    pub fn sasl_credentials(&self) -> Option<SaslCredentials> {
        match (&self.sasl_account, &self.sasl_password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => Some(SaslCredentials {
                username: u.clone(),
                password: p.clone(),
            }),
            _ => None,
        }
    }
}

/// Persistence key for a server host.
pub fn server_key(host: &str) -> String {
    host.to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
    #[serde(default = "default_true")]
    pub notification_sound: bool,
    #[serde(default = "default_true")]
    pub show_join_part: bool,
    #[serde(default = "default_true")]
    pub show_link_previews: bool,
    /// Extra words that count as a mention.
    #[serde(default)]
    pub highlight_words: Vec<String>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            notifications_enabled: true,
            notification_sound: true,
            show_join_part: true,
            show_link_previews: true,
            highlight_words: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedChat {
    pub username: String,
    pub order: u32,
}

fn default_port() -> u16 {
    6697
}
fn default_true() -> bool {
    true
}

/// Typed view over the key-value store. Writes go through immediately.
pub struct Persisted {
    kv: Box<dyn KeyValueStore>,
    pub saved_servers: Vec<SavedServer>,
    pub metadata: MetadataCache,
    pub settings: GlobalSettings,
    pub channel_order: BTreeMap<String, Vec<String>>,
    pub pinned: BTreeMap<String, Vec<PinnedChat>>,
}

impl Persisted {
    pub fn load(kv: Box<dyn KeyValueStore>) -> Self {
        Self {
            saved_servers: read(kv.as_ref(), SAVED_SERVERS_KEY),
            metadata: read(kv.as_ref(), SERVER_METADATA_KEY),
            settings: read(kv.as_ref(), GLOBAL_SETTINGS_KEY),
            channel_order: read(kv.as_ref(), CHANNEL_ORDER_KEY),
            pinned: read(kv.as_ref(), PINNED_CHATS_KEY),
            kv,
        }
    }

    pub fn in_memory() -> Self {
        Self::load(Box::new(MemoryStore::new()))
    }

    pub fn saved_server(&self, host: &str) -> Option<&SavedServer> {
        let key = server_key(host);
        self.saved_servers.iter().find(|s| s.key() == key)
    }

    pub fn saved_server_mut(&mut self, host: &str) -> Option<&mut SavedServer> {
        let key = server_key(host);
        self.saved_servers.iter_mut().find(|s| s.key() == key)
    }

    /// Replace the saved server with the same host, or append.
    pub fn upsert_server(&mut self, server: SavedServer) {
        match self.saved_server_mut(&server.host) {
            Some(existing) => *existing = server,
            None => self.saved_servers.push(server),
        }
        self.save_servers();
    }

    pub fn remove_server(&mut self, host: &str) {
        let key = server_key(host);
        self.saved_servers.retain(|s| s.key() != key);
        self.metadata.remove_server(&key);
        self.channel_order.remove(&key);
        self.pinned.remove(&key);
        self.save_servers();
        self.save_metadata();
        self.save_channel_order();
        self.save_pinned();
    }

    pub fn save_servers(&mut self) {
        write(self.kv.as_mut(), SAVED_SERVERS_KEY, &self.saved_servers);
    }

    pub fn save_metadata(&mut self) {
        write(self.kv.as_mut(), SERVER_METADATA_KEY, &self.metadata);
    }

    pub fn save_settings(&mut self) {
        write(self.kv.as_mut(), GLOBAL_SETTINGS_KEY, &self.settings);
    }

    pub fn save_channel_order(&mut self) {
        write(self.kv.as_mut(), CHANNEL_ORDER_KEY, &self.channel_order);
    }

    pub fn save_pinned(&mut self) {
        write(self.kv.as_mut(), PINNED_CHATS_KEY, &self.pinned);
    }
}

fn read<T: DeserializeOwned + Default>(kv: &dyn KeyValueStore, key: &str) -> T {
    match kv.get(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "discarding malformed persisted blob");
                T::default()
            }
        },
        Ok(None) => T::default(),
        Err(e) => {
            warn!(key, error = %e, "failed to read persisted blob");
            T::default()
        }
    }
}

fn write<T: Serialize>(kv: &mut dyn KeyValueStore, key: &str, value: &T) {
    let result = serde_json::to_string(value)
        .map_err(|source| PersistError::Encode {
            key: key.to_string(),
            source,
        })
        .and_then(|json| kv.set(key, &json));
    match result {
        Ok(()) => debug!(key, "persisted"),
        Err(e) => warn!(key, error = %e, "failed to persist blob"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irc::metadata::MetadataValue;

    #[test]
    fn test_missing_fields_take_defaults() {
        let mut kv = MemoryStore::new();
        kv.set(GLOBAL_SETTINGS_KEY, r#"{"show_join_part":false}"#).unwrap();
        kv.set(SAVED_SERVERS_KEY, r#"[{"host":"irc.example.org","nickname":"me"}]"#).unwrap();
        let p = Persisted::load(Box::new(kv));
        assert!(!p.settings.show_join_part);
        assert!(p.settings.notifications_enabled);
        let s = p.saved_server("IRC.example.org").unwrap();
        assert_eq!(s.port, 6697);
        assert!(s.tls);
        assert!(s.channels.is_empty());
    }

    #[test]
    fn test_malformed_blob_falls_back() {
        let mut kv = MemoryStore::new();
        kv.set(CHANNEL_ORDER_KEY, "{not json").unwrap();
        let p = Persisted::load(Box::new(kv));
        assert!(p.channel_order.is_empty());
    }

    #[test]
    fn test_upsert_replaces_by_host() {
        let mut p = Persisted::in_memory();
        p.upsert_server(SavedServer::new("irc.example.org", 6697, "a"));
        p.upsert_server(SavedServer::new("IRC.EXAMPLE.ORG", 6697, "b"));
        assert_eq!(p.saved_servers.len(), 1);
        assert_eq!(p.saved_servers[0].nickname, "b");
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = Persisted::load(Box::new(FileStore::new(dir.path())));
        p.metadata.set("irc.example.org", "me", "status", MetadataValue::new("busy", "*"));
        p.save_metadata();

        let reloaded = Persisted::load(Box::new(FileStore::new(dir.path())));
        assert_eq!(
            reloaded.metadata.get("irc.example.org", "me").unwrap()["status"].value,
            "busy"
        );
        assert!(dir.path().join("serverMetadata.json").exists());
    }

    #[test]
    fn test_file_store_rejects_bad_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut fs = FileStore::new(dir.path());
        assert!(matches!(fs.set("../escape", "x"), Err(PersistError::InvalidKey(_))));
        assert_eq!(fs.get("absent").unwrap(), None);
        fs.remove("absent").unwrap();
    }
}

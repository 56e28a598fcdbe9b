//! `draft/metadata` synchronisation.
//!
//! Holds the protocol-side bookkeeping: which own keys are still being
//! fetched, which values the server confirmed, and the short-lived cache of
//! channel avatars and display names used by the channel list. Applying
//! values to channels and users is left to the store.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::irc::commands;
use crate::irc::event::nick_of;

pub const DEFAULT_KEYS: &[&str] = &[
    "avatar",
    "display-name",
    "color",
    "status",
    "url",
    "website",
    "location",
    "bot",
];

/// Keys the channel list asks for.
pub const CHANNEL_LIST_KEYS: &[&str] = &["avatar", "display-name"];

pub const DEFAULT_CHANNEL_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataValue {
    pub value: String,
    #[serde(default = "default_visibility")]
    pub visibility: String,
}

fn default_visibility() -> String {
    "*".to_string()
}

impl MetadataValue {
    pub fn new(value: &str, visibility: &str) -> Self {
        Self {
            value: value.to_string(),
            visibility: if visibility.is_empty() {
                default_visibility()
            } else {
                visibility.to_string()
            },
        }
    }
}

pub type MetadataMap = BTreeMap<String, MetadataValue>;

/// True if any `draft/metadata*` capability was negotiated.
pub fn is_supported<'a, I>(caps: I) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    caps.into_iter().any(|c| c.starts_with("draft/metadata"))
}

/// `*` means ourselves; a hostmask is reduced to its nickname.
pub fn resolve_target(target: &str, own_nick: &str) -> String {
    if target == "*" {
        own_nick.to_string()
    } else {
        nick_of(target).to_string()
    }
}

/// Persisted metadata, `server -> target -> key -> value`. Targets are
/// stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataCache(BTreeMap<String, BTreeMap<String, MetadataMap>>);

impl MetadataCache {
    pub fn get(&self, server: &str, target: &str) -> Option<&MetadataMap> {
        self.0.get(server)?.get(&target.to_lowercase())
    }

    pub fn set(&mut self, server: &str, target: &str, key: &str, value: MetadataValue) {
        self.0
            .entry(server.to_string())
            .or_default()
            .entry(target.to_lowercase())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn remove(&mut self, server: &str, target: &str, key: &str) -> bool {
        let Some(targets) = self.0.get_mut(server) else {
            return false;
        };
        let lower = target.to_lowercase();
        let Some(map) = targets.get_mut(&lower) else {
            return false;
        };
        let removed = map.remove(key).is_some();
        if map.is_empty() {
            targets.remove(&lower);
        }
        removed
    }

    pub fn rename_target(&mut self, server: &str, from: &str, to: &str) {
        if let Some(targets) = self.0.get_mut(server) {
            if let Some(map) = targets.remove(&from.to_lowercase()) {
                targets.insert(to.to_lowercase(), map);
            }
        }
    }

    pub fn remove_server(&mut self, server: &str) {
        self.0.remove(server);
    }
}

/// Merge a value the server returned for one of our own keys into the local
/// map. Empty values never clear local state. Returns true if `local`
/// changed.
pub fn merge_server_value(local: &mut MetadataMap, key: &str, value: &str, visibility: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    let incoming = MetadataValue::new(value, visibility);
    if local.get(key) == Some(&incoming) {
        return false;
    }
    local.insert(key.to_string(), incoming);
    true
}

#[derive(Debug, Clone, Default)]
struct OwnFetch {
    outstanding: BTreeSet<String>,
    confirmed: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct ChannelListEntry {
    pub avatar: Option<String>,
    pub display_name: Option<String>,
    fetched_at: Instant,
}

/// Channel list avatar/display-name cache with per-channel in-flight
/// tracking.
#[derive(Debug, Clone)]
pub struct ChannelListCache {
    ttl: Duration,
    entries: HashMap<String, ChannelListEntry>,
    in_flight: HashMap<String, BTreeSet<String>>,
}

impl ChannelListCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
            in_flight: HashMap::new(),
        }
    }

    pub fn get(&self, channel: &str, now: Instant) -> Option<&ChannelListEntry> {
        self.entries
            .get(&channel.to_lowercase())
            .filter(|e| now.duration_since(e.fetched_at) < self.ttl)
    }

    pub fn is_in_flight(&self, channel: &str) -> bool {
        self.in_flight.contains_key(&channel.to_lowercase())
    }

    /// Pick the channels that need a fetch and mark them in flight.
    pub fn request(&mut self, channels: &[String], now: Instant) -> Vec<String> {
        let mut out = Vec::new();
        for ch in channels {
            let key = ch.to_lowercase();
            if self.get(&key, now).is_some() || self.in_flight.contains_key(&key) {
                continue;
            }
            self.in_flight.insert(
                key,
                CHANNEL_LIST_KEYS.iter().map(|k| k.to_string()).collect(),
            );
            out.push(ch.clone());
        }
        out
    }

    /// Record a value (or its absence) for `channel`.
    pub fn record(&mut self, channel: &str, key: &str, value: Option<&str>, now: Instant) {
        if !CHANNEL_LIST_KEYS.contains(&key) {
            return;
        }
        let lower = channel.to_lowercase();
        let entry = self.entries.entry(lower.clone()).or_insert(ChannelListEntry {
            avatar: None,
            display_name: None,
            fetched_at: now,
        });
        let value = value.filter(|v| !v.is_empty()).map(str::to_string);
        match key {
            "avatar" => entry.avatar = value,
            _ => entry.display_name = value,
        }
        entry.fetched_at = now;

        if let Some(pending) = self.in_flight.get_mut(&lower) {
            pending.remove(key);
            if pending.is_empty() {
                self.in_flight.remove(&lower);
            }
        }
    }

    /// A metadata batch ended: whatever was in flight has been answered.
    pub fn settle_in_flight(&mut self, now: Instant) {
        for (channel, _) in self.in_flight.drain() {
            self.entries.entry(channel).or_insert(ChannelListEntry {
                avatar: None,
                display_name: None,
                fetched_at: now,
            });
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.in_flight.clear();
    }
}

/// Per-connection metadata state.
#[derive(Debug, Clone)]
pub struct MetadataSync {
    enabled: bool,
    fetch: Option<OwnFetch>,
    subscriptions: BTreeSet<String>,
    pub channels: ChannelListCache,
}

impl MetadataSync {
    pub fn new(ttl: Duration) -> Self {
        Self {
            enabled: false,
            fetch: None,
            subscriptions: BTreeSet::new(),
            channels: ChannelListCache::new(ttl),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn reset(&mut self) {
        self.enabled = false;
        self.fetch = None;
        self.subscriptions.clear();
        self.channels.clear();
    }

    pub fn subscriptions(&self) -> &BTreeSet<String> {
        &self.subscriptions
    }

    pub fn add_subscriptions(&mut self, keys: &[String]) {
        self.subscriptions.extend(keys.iter().cloned());
    }

    pub fn remove_subscriptions(&mut self, keys: &[String]) {
        for k in keys {
            self.subscriptions.remove(k);
        }
    }

    /// Session start: subscribe to `keys` and fetch our own values.
    pub fn begin(&mut self, keys: &[String]) -> Vec<String> {
        if !self.enabled || keys.is_empty() {
            return Vec::new();
        }
        self.fetch = Some(OwnFetch {
            outstanding: keys.iter().cloned().collect(),
            confirmed: BTreeSet::new(),
        });
        debug!(keys = ?keys, "fetching own metadata");
        vec![commands::metadata_sub(keys), commands::metadata_get("*", keys)]
    }

    pub fn is_fetching(&self) -> bool {
        self.fetch.is_some()
    }

    /// A reply for one of our own keys arrived during the fetch.
    pub fn own_answered(&mut self, key: &str, non_empty: bool) {
        if let Some(f) = &mut self.fetch {
            f.outstanding.remove(key);
            if non_empty {
                f.confirmed.insert(key.to_string());
            }
        }
    }

    pub fn fetch_complete(&self) -> bool {
        self.fetch.as_ref().is_some_and(|f| f.outstanding.is_empty())
    }

    /// End the fetch and push local values the server did not confirm.
    pub fn finish_fetch(&mut self, local: &MetadataMap) -> Vec<String> {
        let Some(fetch) = self.fetch.take() else {
            return Vec::new();
        };
        local
            .iter()
            .filter(|(k, v)| !fetch.confirmed.contains(*k) && !v.value.is_empty())
            .map(|(k, v)| commands::metadata_set("*", k, Some(&v.value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_target() {
        assert_eq!(resolve_target("*", "me"), "me");
        assert_eq!(resolve_target("alice!a@host", "me"), "alice");
        assert_eq!(resolve_target("#chan", "me"), "#chan");
    }

    #[test]
    fn test_is_supported() {
        assert!(is_supported(&keys(&["batch", "draft/metadata-2"])));
        assert!(!is_supported(&keys(&["batch"])));
    }

    #[test]
    fn test_merge_never_clears() {
        let mut local = MetadataMap::new();
        local.insert("status".into(), MetadataValue::new("busy", "*"));
        assert!(!merge_server_value(&mut local, "status", "", "*"));
        assert_eq!(local["status"].value, "busy");
        assert!(merge_server_value(&mut local, "status", "away", "*"));
        assert_eq!(local["status"].value, "away");
        assert!(!merge_server_value(&mut local, "status", "away", "*"));
    }

    #[test]
    fn test_unset_key_is_pushed_back() {
        let mut sync = MetadataSync::new(DEFAULT_CHANNEL_CACHE_TTL);
        assert!(sync.begin(&keys(&["avatar"])).is_empty());
        sync.set_enabled(true);
        let lines = sync.begin(&keys(&["avatar", "status"]));
        assert_eq!(lines, vec!["METADATA * SUB avatar status", "METADATA * GET avatar status"]);

        sync.own_answered("avatar", true);
        assert!(!sync.fetch_complete());
        sync.own_answered("status", false);
        assert!(sync.fetch_complete());

        let mut local = MetadataMap::new();
        local.insert("avatar".into(), MetadataValue::new("https://x/a.png", "*"));
        local.insert("status".into(), MetadataValue::new("busy", "*"));
        assert_eq!(sync.finish_fetch(&local), vec!["METADATA * SET status :busy"]);
        assert!(!sync.is_fetching());
    }

    #[test]
    fn test_channel_cache_ttl_and_in_flight() {
        let mut cache = ChannelListCache::new(Duration::from_secs(300));
        let t0 = Instant::now();
        let chans = keys(&["#a", "#b"]);
        assert_eq!(cache.request(&chans, t0), chans);
        assert!(cache.request(&chans, t0).is_empty());

        cache.record("#a", "avatar", Some("https://x/a.png"), t0);
        assert!(cache.is_in_flight("#a"));
        cache.record("#A", "display-name", None, t0);
        assert!(!cache.is_in_flight("#a"));
        assert_eq!(cache.get("#a", t0).unwrap().avatar.as_deref(), Some("https://x/a.png"));

        cache.settle_in_flight(t0);
        assert!(!cache.is_in_flight("#b"));
        assert!(cache.request(&chans, t0 + Duration::from_secs(10)).is_empty());
        assert_eq!(cache.request(&chans, t0 + Duration::from_secs(301)), chans);
    }

    #[test]
    fn test_cache_case_insensitive_targets() {
        let mut c = MetadataCache::default();
        c.set("irc.example.org", "Alice", "color", MetadataValue::new("#ff0000", "*"));
        assert!(c.get("irc.example.org", "alice").is_some());
        c.rename_target("irc.example.org", "alice", "Alicia");
        assert!(c.get("irc.example.org", "alicia").is_some());
        assert!(c.remove("irc.example.org", "ALICIA", "color"));
        assert!(c.get("irc.example.org", "alicia").is_none());
    }
}

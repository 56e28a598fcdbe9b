//! Snapshot data model.
//!
//! A [`StoreState`] is immutable once published: the store clones it on
//! write and hands out `Arc` snapshots to subscribers.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::app::event::ServerId;
use crate::irc::event::{ConnectionStatus, ReplySeverity};
use crate::irc::jsonlog::JsonLog;
use crate::irc::metadata::MetadataMap;
use crate::irc::prefix::PrefixTable;
use crate::persist::GlobalSettings;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageTarget {
    Server,
    Channel(String),
    PrivateChat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Message,
    Notice,
    Join,
    Part,
    Quit,
    Kick,
    Nick,
    Mode,
    System,
    Invite,
    Netsplit,
    Netjoin,
    StandardReply,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaction {
    pub emoji: String,
    pub user: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkPreview {
    pub url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
}

impl LinkPreview {
    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.title.is_none() && self.description.is_none() && self.image.is_none()
    }

    /// Fields set in `other` win.
    pub fn merge(&mut self, other: LinkPreview) {
        if other.url.is_some() {
            self.url = other.url;
        }
        if other.title.is_some() {
            self.title = other.title;
        }
        if other.description.is_some() {
            self.description = other.description;
        }
        if other.image.is_some() {
            self.image = other.image;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetsplitInfo {
    pub servers: (String, String),
    pub users: Vec<String>,
    pub rejoined: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: u64,
    pub msgid: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub target: MessageTarget,
    pub server_id: ServerId,
    pub kind: MessageKind,
    pub is_action: bool,
    pub reactions: Vec<Reaction>,
    pub reply_to: Option<String>,
    pub multiline_ids: Vec<String>,
    pub link_preview: Option<LinkPreview>,
    pub netsplit: Option<NetsplitInfo>,
    pub severity: Option<ReplySeverity>,
    pub json_log: Option<JsonLog>,
    pub mentions_me: bool,
}

impl Message {
    pub fn new(
        server_id: ServerId,
        target: MessageTarget,
        kind: MessageKind,
        sender: &str,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            msgid: None,
            content: content.into(),
            timestamp,
            sender: sender.to_string(),
            target,
            server_id,
            kind,
            is_action: false,
            reactions: Vec::new(),
            reply_to: None,
            multiline_ids: Vec::new(),
            link_preview: None,
            netsplit: None,
            severity: None,
            json_log: None,
            mentions_me: false,
        }
    }

    /// Add a reaction unless this user already reacted with this emoji.
    pub fn add_reaction(&mut self, emoji: &str, user: &str) -> bool {
        if self
            .reactions
            .iter()
            .any(|r| r.emoji == emoji && r.user.eq_ignore_ascii_case(user))
        {
            return false;
        }
        self.reactions.push(Reaction {
            emoji: emoji.to_string(),
            user: user.to_string(),
        });
        true
    }

    pub fn remove_reaction(&mut self, emoji: &str, user: &str) -> bool {
        let before = self.reactions.len();
        self.reactions
            .retain(|r| !(r.emoji == emoji && r.user.eq_ignore_ascii_case(user)));
        self.reactions.len() != before
    }

    /// Same message by msgid, or by (content, timestamp, sender) when
    /// neither side has one.
    pub fn is_duplicate_of(&self, other: &Message) -> bool {
        match (&self.msgid, &other.msgid) {
            (Some(a), Some(b)) => a == b,
            _ => {
                self.content == other.content
                    && self.timestamp == other.timestamp
                    && self.sender.eq_ignore_ascii_case(&other.sender)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListEntry {
    pub mask: String,
    pub setter: Option<String>,
    pub set_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub username: String,
    pub ident: Option<String>,
    pub hostname: Option<String>,
    pub realname: Option<String>,
    pub account: Option<String>,
    pub is_online: bool,
    pub is_away: bool,
    pub away_message: Option<String>,
    pub is_bot: bool,
    pub is_oper: bool,
    /// Status symbols in PREFIX order, e.g. `@+`.
    pub status: String,
    pub metadata: MetadataMap,
}

impl User {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            is_online: true,
            ..Self::default()
        }
    }

    /// Copy identity fields from another record of the same person.
    pub fn copy_known(&mut self, other: &User) {
        if self.ident.is_none() {
            self.ident = other.ident.clone();
        }
        if self.hostname.is_none() {
            self.hostname = other.hostname.clone();
        }
        if self.realname.is_none() {
            self.realname = other.realname.clone();
        }
        if self.account.is_none() {
            self.account = other.account.clone();
        }
        self.is_away = other.is_away;
        self.away_message = other.away_message.clone();
        self.is_bot |= other.is_bot;
        self.is_oper |= other.is_oper;
        for (k, v) in &other.metadata {
            self.metadata.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Channel {
    pub name: String,
    pub topic: Option<String>,
    pub topic_set_by: Option<String>,
    pub topic_set_at: Option<i64>,
    pub users: Vec<User>,
    pub bans: Vec<ListEntry>,
    pub exceptions: Vec<ListEntry>,
    pub invites: Vec<ListEntry>,
    pub unread: u32,
    pub mentioned: bool,
    pub loading: bool,
    pub needs_who: bool,
    /// Flag modes currently set, e.g. `+nt`.
    pub modes: String,
    pub messages: Vec<Message>,
    pub typing: Vec<String>,
    pub metadata: MetadataMap,
}

impl Channel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn user(&self, nick: &str) -> Option<&User> {
        self.users.iter().find(|u| u.username.eq_ignore_ascii_case(nick))
    }

    pub fn user_mut(&mut self, nick: &str) -> Option<&mut User> {
        self.users
            .iter_mut()
            .find(|u| u.username.eq_ignore_ascii_case(nick))
    }

    pub fn has_user(&self, nick: &str) -> bool {
        self.user(nick).is_some()
    }

    /// Insert `user` unless a member with that name exists.
    pub fn add_user(&mut self, user: User) -> bool {
        if self.has_user(&user.username) {
            return false;
        }
        self.users.push(user);
        true
    }

    pub fn remove_user(&mut self, nick: &str) -> Option<User> {
        let idx = self
            .users
            .iter()
            .position(|u| u.username.eq_ignore_ascii_case(nick))?;
        Some(self.users.remove(idx))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrivateChat {
    pub username: String,
    pub pinned: bool,
    pub pin_order: Option<u32>,
    pub unread: u32,
    pub mentioned: bool,
    pub last_activity: Option<DateTime<Utc>>,
    pub is_online: bool,
    pub is_away: bool,
    pub away_message: Option<String>,
    pub realname: Option<String>,
    pub account: Option<String>,
    pub is_bot: bool,
    pub messages: Vec<Message>,
    pub typing: Vec<String>,
    pub metadata: MetadataMap,
}

impl PrivateChat {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedChannel {
    pub name: String,
    pub user_count: u32,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Server {
    pub id: ServerId,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub nickname: String,
    pub status: ConnectionStatus,
    /// Set once 001 arrived.
    pub registered: bool,
    pub capabilities: BTreeSet<String>,
    pub isupport: BTreeMap<String, String>,
    pub prefix: PrefixTable,
    pub elist: Option<String>,
    pub favicon: Option<String>,
    pub link_security: Option<u8>,
    pub link_warning_pending: bool,
    pub channels: Vec<Channel>,
    pub private_chats: Vec<PrivateChat>,
    pub metadata: MetadataMap,
    pub metadata_subscriptions: BTreeSet<String>,
    pub jwt_token: Option<String>,
    pub is_away: bool,
    pub is_oper: bool,
    pub user_modes: String,
    pub messages: Vec<Message>,
    pub channel_list: Vec<ListedChannel>,
    pub channel_list_loading: bool,
}

impl Server {
    pub fn new(id: ServerId, host: &str, port: u16, name: &str, nickname: &str) -> Self {
        Self {
            id,
            host: host.to_string(),
            port,
            name: name.to_string(),
            nickname: nickname.to_string(),
            status: ConnectionStatus::Disconnected,
            registered: false,
            capabilities: BTreeSet::new(),
            isupport: BTreeMap::new(),
            prefix: PrefixTable::default(),
            elist: None,
            favicon: None,
            link_security: None,
            link_warning_pending: false,
            channels: Vec::new(),
            private_chats: Vec::new(),
            metadata: MetadataMap::new(),
            metadata_subscriptions: BTreeSet::new(),
            jwt_token: None,
            is_away: false,
            is_oper: false,
            user_modes: String::new(),
            messages: Vec::new(),
            channel_list: Vec::new(),
            channel_list_loading: false,
        }
    }

    pub fn is_me(&self, nick: &str) -> bool {
        self.nickname.eq_ignore_ascii_case(nick)
    }

    pub fn has_cap(&self, cap: &str) -> bool {
        self.capabilities.contains(cap)
    }

    pub fn supports_chathistory(&self) -> bool {
        self.has_cap("draft/chathistory") || self.has_cap("chathistory")
    }

    pub fn supports_whox(&self) -> bool {
        self.isupport.contains_key("WHOX")
    }

    /// The ISUPPORT `BOT` mode letter, `B` by default.
    pub fn bot_flag(&self) -> char {
        self.isupport
            .get("BOT")
            .and_then(|b| b.chars().next())
            .unwrap_or('B')
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.channels
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn private_chat(&self, nick: &str) -> Option<&PrivateChat> {
        self.private_chats
            .iter()
            .find(|p| p.username.eq_ignore_ascii_case(nick))
    }

    pub fn private_chat_mut(&mut self, nick: &str) -> Option<&mut PrivateChat> {
        self.private_chats
            .iter_mut()
            .find(|p| p.username.eq_ignore_ascii_case(nick))
    }

    /// Any channel record for `nick`, used to fill in new records.
    pub fn known_user(&self, nick: &str) -> Option<&User> {
        self.channels.iter().find_map(|c| c.user(nick))
    }

    pub fn is_channel_name(&self, target: &str) -> bool {
        let chantypes = self
            .isupport
            .get("CHANTYPES")
            .map(String::as_str)
            .unwrap_or("#&");
        target
            .chars()
            .next()
            .map(|c| chantypes.contains(c))
            .unwrap_or(false)
    }

    pub fn messages_for(&self, target: &MessageTarget) -> Option<&Vec<Message>> {
        match target {
            MessageTarget::Server => Some(&self.messages),
            MessageTarget::Channel(name) => self.channel(name).map(|c| &c.messages),
            MessageTarget::PrivateChat(nick) => self.private_chat(nick).map(|p| &p.messages),
        }
    }

    pub fn messages_for_mut(&mut self, target: &MessageTarget) -> Option<&mut Vec<Message>> {
        match target {
            MessageTarget::Server => Some(&mut self.messages),
            MessageTarget::Channel(name) => self.channel_mut(name).map(|c| &mut c.messages),
            MessageTarget::PrivateChat(nick) => {
                self.private_chat_mut(nick).map(|p| &mut p.messages)
            }
        }
    }

    pub fn find_message_mut(&mut self, target: &MessageTarget, msgid: &str) -> Option<&mut Message> {
        self.messages_for_mut(target)?
            .iter_mut()
            .find(|m| m.msgid.as_deref() == Some(msgid))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub server_id: ServerId,
    pub target: MessageTarget,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreState {
    pub servers: Vec<Server>,
    pub selected: Option<Selection>,
    pub settings: GlobalSettings,
    pub next_message_id: u64,
}

impl StoreState {
    pub fn server(&self, id: ServerId) -> Option<&Server> {
        self.servers.iter().find(|s| s.id == id)
    }

    pub fn server_mut(&mut self, id: ServerId) -> Option<&mut Server> {
        self.servers.iter_mut().find(|s| s.id == id)
    }

    pub fn is_selected(&self, server_id: ServerId, target: &MessageTarget) -> bool {
        match &self.selected {
            Some(sel) if sel.server_id == server_id => match (&sel.target, target) {
                (MessageTarget::Channel(a), MessageTarget::Channel(b))
                | (MessageTarget::PrivateChat(a), MessageTarget::PrivateChat(b)) => {
                    a.eq_ignore_ascii_case(b)
                }
                (a, b) => a == b,
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str, sender: &str, msgid: Option<&str>, ts: DateTime<Utc>) -> Message {
        let mut m = Message::new(0, MessageTarget::Server, MessageKind::Message, sender, content, ts);
        m.msgid = msgid.map(str::to_string);
        m
    }

    #[test]
    fn test_duplicate_detection() {
        let ts = Utc::now();
        assert!(msg("hi", "a", Some("1"), ts).is_duplicate_of(&msg("other", "b", Some("1"), ts)));
        assert!(!msg("hi", "a", Some("1"), ts).is_duplicate_of(&msg("hi", "a", Some("2"), ts)));
        assert!(msg("hi", "a", None, ts).is_duplicate_of(&msg("hi", "A", None, ts)));
        assert!(!msg("hi", "a", None, ts).is_duplicate_of(&msg("hi", "b", None, ts)));
    }

    #[test]
    fn test_reaction_toggle() {
        let mut m = msg("hi", "a", Some("1"), Utc::now());
        assert!(m.add_reaction("😀", "bob"));
        assert!(!m.add_reaction("😀", "bob"));
        assert!(m.add_reaction("😀", "carol"));
        assert!(m.remove_reaction("😀", "bob"));
        assert!(!m.remove_reaction("😀", "bob"));
        assert_eq!(m.reactions.len(), 1);
    }

    #[test]
    fn test_channel_membership_case_insensitive() {
        let mut c = Channel::new("#rust");
        assert!(c.add_user(User::new("Alice")));
        assert!(!c.add_user(User::new("alice")));
        assert_eq!(c.users.len(), 1);
        assert!(c.remove_user("ALICE").is_some());
        assert!(c.users.is_empty());
    }

    #[test]
    fn test_selection_matches_case_insensitively() {
        let state = StoreState {
            selected: Some(Selection {
                server_id: 1,
                target: MessageTarget::Channel("#Rust".into()),
            }),
            ..StoreState::default()
        };
        assert!(state.is_selected(1, &MessageTarget::Channel("#rust".into())));
        assert!(!state.is_selected(2, &MessageTarget::Channel("#rust".into())));
        assert!(!state.is_selected(1, &MessageTarget::Server));
    }
}

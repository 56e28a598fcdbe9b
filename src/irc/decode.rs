//! Tokenized line to [`IrcEvent`] conversion.
//!
//! The `irc` crate does the tokenizing; this module classifies commands and
//! numerics into the event set the store understands. A [`Decoder`] lives
//! for one connection because two constructs span several lines: multiline
//! batches are combined into a single `MultilineMessage`, and long `EXTJWT`
//! tokens arrive in continuation chunks.

use std::collections::HashMap;

use tracing::trace;

use crate::irc::event::{
    nick_of, ChatLine, IrcEvent, ListKind, ReplySeverity, Tags, WhoReply,
};
use crate::irc::modes::split_mode_params;

/// One protocol line after tokenizing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawLine {
    pub tags: Tags,
    /// `nick` or server name from the source prefix.
    pub source: Option<String>,
    /// Full `nick!user@host` when the source is a user.
    pub hostmask: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl RawLine {
    pub fn new(command: &str, params: &[&str]) -> Self {
        Self {
            command: command.to_ascii_uppercase(),
            params: params.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(nick_of(source).to_string());
        if source.contains('!') {
            self.hostmask = Some(source.to_string());
        }
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    fn param(&self, i: usize) -> Option<&str> {
        self.params.get(i).map(|s| s.as_str())
    }

    fn param_or_empty(&self, i: usize) -> String {
        self.param(i).unwrap_or_default().to_string()
    }

    fn last(&self) -> String {
        self.params.last().cloned().unwrap_or_default()
    }

    fn sender(&self) -> String {
        self.source.clone().unwrap_or_default()
    }

    fn batch(&self) -> Option<String> {
        self.tags.get("batch").cloned()
    }
}

impl From<&irc::proto::Message> for RawLine {
    fn from(msg: &irc::proto::Message) -> Self {
        let mut tags = Tags::new();
        if let Some(list) = &msg.tags {
            for irc::proto::message::Tag(key, value) in list {
                tags.insert(key.clone(), value.clone().unwrap_or_default());
            }
        }

        let (source, hostmask) = match &msg.prefix {
            Some(irc::proto::Prefix::Nickname(nick, user, host)) => {
                let mask = if user.is_empty() && host.is_empty() {
                    None
                } else {
                    Some(format!("{}!{}@{}", nick, user, host))
                };
                (Some(nick.clone()), mask)
            }
            Some(irc::proto::Prefix::ServerName(name)) => (Some(name.clone()), None),
            None => (None, None),
        };

        let serialized = String::from(&msg.command);
        let (command, params) = split_serialized(&serialized);

        Self {
            tags,
            source,
            hostmask,
            command,
            params,
        }
    }
}

/// Split `COMMAND p1 p2 :trailing` into its command and parameters.
fn split_serialized(line: &str) -> (String, Vec<String>) {
    let line = line.trim_end_matches(['\r', '\n']);
    let (head, trailing) = match line.find(" :") {
        Some(i) => (&line[..i], Some(&line[i + 2..])),
        None => (line, None),
    };
    let mut words = head.split(' ').filter(|w| !w.is_empty());
    let command = words.next().unwrap_or_default().to_ascii_uppercase();
    let mut params: Vec<String> = words.map(str::to_string).collect();
    if let Some(t) = trailing {
        params.push(t.to_string());
    }
    (command, params)
}

struct MultilineBuffer {
    sender: String,
    target: String,
    lines: Vec<String>,
    message_ids: Vec<String>,
    tags: Tags,
}

/// Per-connection decoder.
pub struct Decoder {
    chantypes: String,
    multiline: HashMap<String, MultilineBuffer>,
    jwt_chunks: HashMap<String, String>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            chantypes: "#&".to_string(),
            multiline: HashMap::new(),
            jwt_chunks: HashMap::new(),
        }
    }

    pub fn set_chantypes(&mut self, chantypes: &str) {
        if !chantypes.is_empty() {
            self.chantypes = chantypes.to_string();
        }
    }

    pub fn is_channel(&self, target: &str) -> bool {
        target
            .chars()
            .next()
            .map(|c| self.chantypes.contains(c))
            .unwrap_or(false)
    }

    /// Decode one line. Most lines yield exactly one event; some yield none
    /// (absorbed into a multiline batch, unhandled numerics) and a closing
    /// multiline batch yields two.
    pub fn decode(&mut self, line: &RawLine) -> Vec<IrcEvent> {
        if let Some(code) = line.command.parse::<u16>().ok().filter(|_| line.command.len() == 3) {
            return self.decode_numeric(code, line).into_iter().collect();
        }

        match line.command.as_str() {
            "BATCH" => self.decode_batch(line),
            "PRIVMSG" | "NOTICE" => self.decode_chat(line).into_iter().collect(),
            "EXTJWT" => self.decode_extjwt(line).into_iter().collect(),
            _ => self.decode_command(line).into_iter().collect(),
        }
    }

    fn decode_batch(&mut self, line: &RawLine) -> Vec<IrcEvent> {
        let Some(reference) = line.param(0) else {
            return Vec::new();
        };
        if let Some(id) = reference.strip_prefix('+') {
            let id = id.to_string();
            let kind = line.param_or_empty(1).to_ascii_lowercase();
            let params: Vec<String> = line.params.iter().skip(2).cloned().collect();
            if kind == "draft/multiline" {
                self.multiline.insert(
                    id.clone(),
                    MultilineBuffer {
                        sender: line.sender(),
                        target: params.first().cloned().unwrap_or_default(),
                        lines: Vec::new(),
                        message_ids: Vec::new(),
                        tags: line.tags.clone(),
                    },
                );
            }
            return vec![IrcEvent::BatchStart {
                id,
                kind,
                params,
                parent: line.batch(),
            }];
        }

        let Some(id) = reference.strip_prefix('-') else {
            trace!(reference, "BATCH without +/- reference");
            return Vec::new();
        };
        let mut events = Vec::new();
        if let Some(buf) = self.multiline.remove(id) {
            events.push(IrcEvent::MultilineMessage {
                sender: buf.sender,
                target: buf.target,
                lines: buf.lines,
                message_ids: buf.message_ids,
                tags: buf.tags,
            });
        }
        events.push(IrcEvent::BatchEnd { id: id.to_string() });
        events
    }

    fn decode_chat(&mut self, line: &RawLine) -> Option<IrcEvent> {
        let target = line.param(0)?.to_string();
        let text = line.param_or_empty(1);

        if let Some(buf) = line.batch().and_then(|b| self.multiline.get_mut(&b)) {
            if buf.sender.is_empty() {
                buf.sender = line.sender();
            }
            let concat = line.tags.contains_key("draft/multiline-concat");
            match buf.lines.last_mut() {
                Some(prev) if concat => prev.push_str(&text),
                _ => buf.lines.push(text),
            }
            if let Some(id) = line.tags.get("msgid") {
                buf.message_ids.push(id.clone());
            }
            return None;
        }

        let chat = ChatLine {
            sender: line.sender(),
            hostmask: line.hostmask.clone(),
            target: target.clone(),
            text,
            tags: line.tags.clone(),
        };
        let is_channel = self.is_channel(&target);
        Some(match (line.command.as_str(), is_channel) {
            ("PRIVMSG", true) => IrcEvent::ChanMsg(chat),
            ("PRIVMSG", false) => IrcEvent::UserMsg(chat),
            (_, true) => IrcEvent::ChanNotice(chat),
            (_, false) => IrcEvent::UserNotice(chat),
        })
    }

    fn decode_extjwt(&mut self, line: &RawLine) -> Option<IrcEvent> {
        let target = line.param(0)?.to_string();
        let n = line.params.len();
        let token_chunk = line.last();
        let continued = n >= 3 && line.params[n - 2] == "*";
        let service = if n >= 3 && line.params[1] != "*" {
            Some(line.params[1].clone())
        } else {
            None
        };

        let entry = self.jwt_chunks.entry(target.clone()).or_default();
        entry.push_str(&token_chunk);
        if continued {
            return None;
        }
        let token = self.jwt_chunks.remove(&target).unwrap_or_default();
        Some(IrcEvent::Extjwt {
            target,
            service,
            token,
        })
    }

    fn decode_command(&mut self, line: &RawLine) -> Option<IrcEvent> {
        let sender = line.sender();
        let tags = line.tags.clone();
        let event = match line.command.as_str() {
            "JOIN" => {
                let account = line.param(1).filter(|a| *a != "*").map(str::to_string);
                IrcEvent::Join {
                    nick: sender,
                    hostmask: line.hostmask.clone(),
                    channel: line.param(0)?.to_string(),
                    account,
                    realname: line.param(2).map(str::to_string),
                    batch: line.batch(),
                    tags,
                }
            }
            "PART" => IrcEvent::Part {
                nick: sender,
                channel: line.param(0)?.to_string(),
                reason: line.param(1).map(str::to_string),
                batch: line.batch(),
                tags,
            },
            "QUIT" => IrcEvent::Quit {
                nick: sender,
                reason: line.param(0).map(str::to_string),
                batch: line.batch(),
                tags,
            },
            "KICK" => IrcEvent::Kick {
                sender,
                channel: line.param(0)?.to_string(),
                target: line.param(1)?.to_string(),
                reason: line.param(2).map(str::to_string),
                tags,
            },
            "NICK" => IrcEvent::Nick {
                old_nick: sender,
                new_nick: line.param(0)?.to_string(),
                tags,
            },
            "TOPIC" => IrcEvent::Topic {
                sender,
                channel: line.param(0)?.to_string(),
                topic: line.param_or_empty(1),
                tags,
            },
            "INVITE" => IrcEvent::Invite {
                sender,
                target: line.param(0)?.to_string(),
                channel: line.param(1)?.to_string(),
            },
            "TAGMSG" => IrcEvent::Tagmsg {
                sender,
                target: line.param(0)?.to_string(),
                tags,
            },
            "REDACT" => IrcEvent::Redact {
                sender,
                target: line.param(0)?.to_string(),
                msgid: line.param(1)?.to_string(),
                reason: line.param(2).map(str::to_string),
            },
            "MODE" => {
                let target = line.param(0)?.to_string();
                let (modestring, args) = split_mode_params(&line.params[1..]);
                IrcEvent::Mode {
                    sender,
                    target,
                    modestring,
                    args,
                }
            }
            "AWAY" => IrcEvent::Away {
                nick: sender,
                message: line.param(0).filter(|m| !m.is_empty()).map(str::to_string),
            },
            "CHGHOST" => IrcEvent::Chghost {
                nick: sender,
                ident: line.param(0)?.to_string(),
                host: line.param(1)?.to_string(),
            },
            "SETNAME" => IrcEvent::Setname {
                nick: sender,
                realname: line.param(0)?.to_string(),
            },
            "RENAME" => IrcEvent::Rename {
                sender,
                old_channel: line.param(0)?.to_string(),
                new_channel: line.param(1)?.to_string(),
                reason: line.param(2).map(str::to_string),
            },
            "METADATA" => {
                let value = line.param(3).map(str::to_string);
                IrcEvent::Metadata {
                    target: line.param(0)?.to_string(),
                    key: line.param(1)?.to_string(),
                    visibility: line.param(2).unwrap_or("*").to_string(),
                    value,
                }
            }
            "FAIL" | "WARN" | "NOTE" => return decode_standard_reply(line),
            "REGISTER" => {
                let account = line.param_or_empty(1);
                let message = line.last();
                match line.param(0)? {
                    "SUCCESS" => IrcEvent::RegisterSuccess { account, message },
                    "VERIFICATION_REQUIRED" => {
                        IrcEvent::RegisterVerificationRequired { account, message }
                    }
                    _ => return None,
                }
            }
            "VERIFY" if line.param(0) == Some("SUCCESS") => IrcEvent::VerifySuccess {
                account: line.param_or_empty(1),
                message: line.last(),
            },
            "CAP" => return decode_cap(line),
            "AUTHENTICATE" => IrcEvent::Authenticate {
                param: line.param_or_empty(0),
            },
            other => {
                trace!(command = other, "unhandled command");
                return None;
            }
        };
        Some(event)
    }

    fn decode_numeric(&mut self, code: u16, line: &RawLine) -> Option<IrcEvent> {
        let p = |i: usize| line.param_or_empty(i);
        let event = match code {
            1 => IrcEvent::Ready {
                nickname: p(0),
                server_name: line.source.clone(),
            },
            2 => IrcEvent::RplYourHost { message: line.last() },
            5 => {
                let end = line.params.len().saturating_sub(1);
                let tokens = line
                    .params
                    .iter()
                    .take(end)
                    .skip(1)
                    .filter(|t| !t.starts_with('-'))
                    .map(|t| match t.split_once('=') {
                        Some((k, v)) => (k.to_string(), Some(v.to_string())),
                        None => (t.to_string(), None),
                    })
                    .collect::<Vec<_>>();
                for (k, v) in &tokens {
                    if k == "CHANTYPES" {
                        if let Some(v) = v {
                            self.set_chantypes(v);
                        }
                    }
                }
                IrcEvent::Isupport { tokens }
            }
            305 => IrcEvent::RplUnAway,
            306 => IrcEvent::RplNowAway,
            311 => IrcEvent::WhoisUser {
                nick: p(1),
                ident: p(2),
                host: p(3),
                realname: line.last(),
            },
            313 => IrcEvent::WhoisOperator { nick: p(1) },
            315 => IrcEvent::WhoEnd { mask: p(1) },
            318 => IrcEvent::WhoisEnd { nick: p(1) },
            322 => IrcEvent::ListChannel {
                channel: p(1),
                user_count: p(2).parse().unwrap_or(0),
                topic: line.param(3).unwrap_or_default().to_string(),
            },
            323 => IrcEvent::ListEnd,
            330 => IrcEvent::WhoisAccount {
                nick: p(1),
                account: p(2),
            },
            331 => IrcEvent::RplNoTopic { channel: p(1) },
            332 => IrcEvent::RplTopic {
                channel: p(1),
                topic: line.param(2).unwrap_or_default().to_string(),
            },
            333 => IrcEvent::RplTopicWhoTime {
                channel: p(1),
                set_by: p(2),
                set_at: p(3).parse().unwrap_or(0),
            },
            335 => IrcEvent::WhoisBot { nick: p(1) },
            346 | 348 | 367 => IrcEvent::ModeListEntry {
                kind: list_kind(code),
                channel: p(1),
                mask: p(2),
                setter: line.param(3).map(str::to_string),
                set_at: line.param(4).and_then(|t| t.parse().ok()),
            },
            347 | 349 | 368 => IrcEvent::ModeListEnd {
                kind: list_kind(code),
                channel: p(1),
            },
            352 => {
                let trailing = line.last();
                let realname = trailing
                    .split_once(' ')
                    .map(|(_, r)| r.to_string())
                    .unwrap_or_default();
                IrcEvent::WhoReply(WhoReply {
                    channel: p(1),
                    ident: p(2),
                    host: p(3),
                    server: line.param(4).map(str::to_string),
                    nick: p(5),
                    flags: p(6),
                    account: None,
                    realname,
                })
            }
            354 => IrcEvent::WhoxReply(WhoReply {
                channel: p(1),
                ident: p(2),
                host: p(3),
                server: None,
                nick: p(4),
                flags: p(5),
                account: line.param(6).filter(|a| *a != "0").map(str::to_string),
                realname: p(7),
            }),
            381 => IrcEvent::RplYoureOper { message: line.last() },
            432 | 433 | 436 => IrcEvent::NickError {
                code,
                nick: p(1),
                message: line.last(),
            },
            730 => IrcEvent::MonOnline { targets: split_list(&line.last()) },
            731 => IrcEvent::MonOffline { targets: split_list(&line.last()) },
            761 => IrcEvent::MetadataKeyValue {
                target: p(1),
                key: p(2),
                visibility: p(3),
                value: line.param(4).unwrap_or_default().to_string(),
            },
            766 => IrcEvent::MetadataKeyNotSet {
                target: p(1),
                key: p(2),
            },
            770 => IrcEvent::MetadataSubOk { keys: line.params.get(1..).unwrap_or_default().to_vec() },
            771 => IrcEvent::MetadataUnsubOk { keys: line.params.get(1..).unwrap_or_default().to_vec() },
            772 => IrcEvent::MetadataSubs { keys: line.params.get(1..).unwrap_or_default().to_vec() },
            900 | 903 => IrcEvent::SaslOutcome {
                success: true,
                code,
                message: line.last(),
            },
            902 | 904 | 905 | 906 | 907 => IrcEvent::SaslOutcome {
                success: false,
                code,
                message: line.last(),
            },
            _ => {
                trace!(code, "unhandled numeric");
                return None;
            }
        };
        Some(event)
    }
}

fn list_kind(code: u16) -> ListKind {
    match code {
        346 | 347 => ListKind::Invite,
        348 | 349 => ListKind::Exception,
        _ => ListKind::Ban,
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn decode_cap(line: &RawLine) -> Option<IrcEvent> {
    let sub = line.param(1)?.to_ascii_uppercase();
    let (more, list) = if line.param(2) == Some("*") && line.params.len() > 3 {
        (true, line.param_or_empty(3))
    } else {
        (false, line.param_or_empty(2))
    };
    let names = || list.split_whitespace().map(str::to_string).collect::<Vec<_>>();

    match sub.as_str() {
        "LS" => Some(IrcEvent::CapLs {
            caps: list
                .split_whitespace()
                .map(|c| match c.split_once('=') {
                    Some((k, v)) => (k.to_string(), Some(v.to_string())),
                    None => (c.to_string(), None),
                })
                .collect(),
            more,
        }),
        "ACK" => Some(IrcEvent::CapAck { caps: names() }),
        "NAK" => Some(IrcEvent::CapNak { caps: names() }),
        other => {
            trace!(subcommand = other, "ignoring CAP subcommand");
            None
        }
    }
}

fn decode_standard_reply(line: &RawLine) -> Option<IrcEvent> {
    let severity = match line.command.as_str() {
        "FAIL" => ReplySeverity::Fail,
        "WARN" => ReplySeverity::Warn,
        _ => ReplySeverity::Note,
    };
    let command = line.param(0)?.to_string();
    let code = line.param_or_empty(1);
    let message = line.last();
    let context: Vec<String> = if line.params.len() > 3 {
        line.params[2..line.params.len() - 1].to_vec()
    } else {
        Vec::new()
    };

    if severity == ReplySeverity::Fail && command == "METADATA" {
        let (target, key) = match context.as_slice() {
            [] => (None, None),
            [key] => (None, Some(key.clone())),
            [target, key, ..] => (Some(target.clone()), Some(key.clone())),
        };
        return Some(IrcEvent::MetadataFail {
            code,
            target,
            key,
            retry_after: context.get(2).and_then(|r| r.parse().ok()),
            message,
        });
    }

    Some(IrcEvent::StandardReply {
        severity,
        command,
        code,
        context,
        message,
    })
}

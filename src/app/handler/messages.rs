//! Chat lines, TAGMSG, REDACT, topics, invites and error replies.

use tracing::{debug, info};

use super::session::apply_cap_effects;
use super::Ctx;
use crate::app::action::NotificationKind;
use crate::app::state::{LinkPreview, Message, MessageKind, MessageTarget, PrivateChat};
use crate::irc::commands;
use crate::irc::event::{nick_of, ChatLine, ReplySeverity, Tags};
use crate::irc::jsonlog::{self, JSON_LOG_TAG};

const REPLY_TAGS: &[&str] = &["+draft/reply", "+reply"];
const REACT_TAGS: &[&str] = &["+draft/react", "+react"];
const UNREACT_TAGS: &[&str] = &["+draft/unreact", "+unreact"];
const CLIENTINFO: &str = "ACTION CLIENTINFO PING TIME VERSION";

fn first_tag<'t>(tags: &'t Tags, names: &[&str]) -> Option<&'t str> {
    names
        .iter()
        .find_map(|n| tags.get(*n))
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

/// Link preview fields carried as client tags.
fn link_preview(tags: &Tags) -> Option<LinkPreview> {
    let get = |k: &str| tags.get(k).filter(|v| !v.is_empty()).cloned();
    let preview = LinkPreview {
        url: get("+draft/link-preview-url"),
        title: get("+draft/link-preview-title"),
        description: get("+draft/link-preview-description"),
        image: get("+draft/link-preview-image"),
    };
    (!preview.is_empty()).then_some(preview)
}

/// `\x01COMMAND args\x01` split into command and argument.
fn parse_ctcp(text: &str) -> Option<(String, String)> {
    let body = text.strip_prefix('\x01')?;
    let body = body.strip_suffix('\x01').unwrap_or(body);
    let (command, arg) = body.split_once(' ').unwrap_or((body, ""));
    if command.is_empty() {
        return None;
    }
    Some((command.to_ascii_uppercase(), arg.to_string()))
}

fn is_nick_char(c: char) -> bool {
    c.is_alphanumeric() || "_-[]\\`^{}|".contains(c)
}

/// Case-insensitive whole-word search.
pub(crate) fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let hay = haystack.to_lowercase();
    let needle = needle.to_lowercase();
    hay.match_indices(&needle).any(|(i, _)| {
        let before = hay[..i].chars().next_back();
        let after = hay[i + needle.len()..].chars().next();
        !before.is_some_and(is_nick_char) && !after.is_some_and(is_nick_char)
    })
}

fn mentions_me(ctx: &Ctx<'_>, text: &str) -> bool {
    contains_word(text, &ctx.own_nick())
        || ctx
            .state
            .settings
            .highlight_words
            .iter()
            .any(|w| contains_word(text, w))
}

/// The context a line from `sender` to `target` belongs to: the channel, or
/// the private chat with whoever is not us.
fn context_of(ctx: &Ctx<'_>, sender: &str, target: &str) -> MessageTarget {
    if ctx.is_channel(target) {
        MessageTarget::Channel(target.to_string())
    } else if ctx.is_me(sender) {
        MessageTarget::PrivateChat(target.to_string())
    } else {
        MessageTarget::PrivateChat(sender.to_string())
    }
}

/// Open a private chat with `nick` unless one exists.
pub(crate) fn ensure_private_chat(ctx: &mut Ctx<'_>, nick: &str) {
    if ctx.server().is_none_or(|s| s.private_chat(nick).is_some()) {
        return;
    }
    let key = ctx.server_key();
    let mut pm = PrivateChat::new(nick);
    pm.is_online = true;
    if let Some(pin) = ctx
        .persist
        .pinned
        .get(&key)
        .and_then(|list| list.iter().find(|p| p.username.eq_ignore_ascii_case(nick)))
    {
        pm.pinned = true;
        pm.pin_order = Some(pin.order);
    }
    if let Some(cached) = ctx.persist.metadata.get(&key, nick) {
        pm.metadata = cached.clone();
    }
    if let Some(known) = ctx.server().and_then(|s| s.known_user(nick)) {
        pm.realname = known.realname.clone();
        pm.account = known.account.clone();
        pm.is_bot = known.is_bot;
        pm.is_away = known.is_away;
        pm.away_message = known.away_message.clone();
    }
    debug!(server_id = ctx.server_id, nick, "private chat opened");
    if let Some(server) = ctx.server_mut() {
        server.private_chats.push(pm);
    }
}

pub(super) fn on_chat(ctx: &mut Ctx<'_>, line: ChatLine, kind: MessageKind) {
    let mut text = line.text.clone();
    let mut is_action = false;
    if let Some((command, arg)) = parse_ctcp(&line.text) {
        match (command.as_str(), kind) {
            ("ACTION", MessageKind::Message) => {
                text = arg;
                is_action = true;
            }
            (_, MessageKind::Notice) => {
                ctx.server_message(
                    MessageKind::System,
                    format!("CTCP {} reply from {}: {}", command, line.sender, arg),
                );
                return;
            }
            _ => {
                if !ctx.is_history(&line.tags) {
                    answer_ctcp(ctx, &line.sender, &command, &arg);
                }
                return;
            }
        }
    }

    let target = match route(ctx, &line, kind) {
        Some(t) => t,
        None => return,
    };
    let ts = ctx.timestamp(&line.tags);
    let mut msg = Message::new(ctx.server_id, target, kind, &line.sender, text, ts);
    msg.is_action = is_action;
    deliver(ctx, msg, &line.tags);
}

/// Where a chat line lands. `None` drops it.
fn route(ctx: &mut Ctx<'_>, line: &ChatLine, kind: MessageKind) -> Option<MessageTarget> {
    if ctx.is_channel(&line.target) {
        let name = ctx
            .server()
            .and_then(|s| s.channel(&line.target))
            .map(|c| c.name.clone());
        if name.is_none() {
            debug!(channel = %line.target, "message for unknown channel");
        }
        return name.map(MessageTarget::Channel);
    }
    let from_me = ctx.is_me(&line.sender);
    let peer = if from_me { &line.target } else { &line.sender };
    if kind == MessageKind::Notice {
        // Server notices and notices from strangers go to the server buffer.
        let has_pm = ctx.server().is_some_and(|s| s.private_chat(peer).is_some());
        if (line.hostmask.is_none() && !from_me) || !has_pm {
            return Some(MessageTarget::Server);
        }
        return Some(MessageTarget::PrivateChat(peer.clone()));
    }
    ensure_private_chat(ctx, peer);
    let name = ctx
        .server()
        .and_then(|s| s.private_chat(peer))
        .map(|p| p.username.clone())?;
    Some(MessageTarget::PrivateChat(name))
}

/// Fill in tag-derived fields, insert, and raise unread/notifications.
fn deliver(ctx: &mut Ctx<'_>, mut msg: Message, tags: &Tags) {
    let history = ctx.is_history(tags);
    let from_me = ctx.is_me(&msg.sender);
    msg.msgid = tags.get("msgid").cloned();
    msg.reply_to = first_tag(tags, REPLY_TAGS).map(str::to_string);
    msg.link_preview = link_preview(tags);
    msg.json_log = tags.get(JSON_LOG_TAG).map(|raw| jsonlog::parse(raw));
    msg.mentions_me = !from_me
        && matches!(msg.target, MessageTarget::Channel(_))
        && mentions_me(ctx, &msg.content);

    let target = msg.target.clone();
    let sender = msg.sender.clone();
    let preview = msg.content.clone();
    let mention = msg.mentions_me;
    let ts = msg.timestamp;

    match &target {
        MessageTarget::Channel(name) => ctx.stop_typing(name, &sender),
        MessageTarget::PrivateChat(peer) => {
            if !from_me {
                ctx.stop_typing(peer, &sender);
            }
        }
        MessageTarget::Server => {}
    }

    if !ctx.add_message(msg) {
        return;
    }
    if let MessageTarget::PrivateChat(peer) = &target {
        if let Some(pm) = ctx.server_mut().and_then(|s| s.private_chat_mut(peer)) {
            if pm.last_activity.is_none_or(|t| t < ts) {
                pm.last_activity = Some(ts);
            }
        }
    }
    if history || from_me {
        return;
    }
    ctx.note_activity(&target, mention);
    match &target {
        MessageTarget::Channel(name) if mention => {
            ctx.notify(
                NotificationKind::Mention,
                format!("{} in {}", sender, name),
                preview,
            );
        }
        MessageTarget::PrivateChat(_) => {
            ctx.notify(NotificationKind::PrivateMessage, sender, preview);
        }
        _ => {}
    }
}

fn answer_ctcp(ctx: &mut Ctx<'_>, sender: &str, command: &str, arg: &str) {
    if ctx.is_me(sender) {
        return;
    }
    let cfg = &ctx.config.ctcp;
    let reply = match command {
        "VERSION" if cfg.reply_version => Some(cfg.version_string.clone()),
        "PING" if cfg.reply_ping => Some(arg.to_string()),
        "TIME" if cfg.reply_time => Some(ctx.wall.to_rfc2822()),
        "CLIENTINFO" if cfg.reply_clientinfo => Some(CLIENTINFO.to_string()),
        _ => None,
    };
    ctx.server_message(
        MessageKind::System,
        format!("Received CTCP {} from {}", command, sender),
    );
    if let Some(reply) = reply {
        ctx.send(commands::ctcp_reply(sender, command, &reply));
    }
}

pub(super) fn on_multiline(
    ctx: &mut Ctx<'_>,
    sender: &str,
    target: &str,
    lines: Vec<String>,
    message_ids: Vec<String>,
    tags: &Tags,
) {
    let line = ChatLine {
        sender: sender.to_string(),
        hostmask: None,
        target: target.to_string(),
        text: String::new(),
        tags: tags.clone(),
    };
    let Some(context) = route(ctx, &line, MessageKind::Message) else {
        return;
    };
    let ts = ctx.timestamp(tags);
    let mut msg = Message::new(
        ctx.server_id,
        context,
        MessageKind::Message,
        sender,
        lines.join("\n"),
        ts,
    );
    msg.multiline_ids = message_ids;
    deliver(ctx, msg, tags);
}

pub(super) fn on_tagmsg(ctx: &mut Ctx<'_>, sender: &str, target: &str, tags: &Tags) {
    let context = context_of(ctx, sender, target);
    let from_me = ctx.is_me(sender);

    if let Some(state) = tags.get("+typing") {
        let name = match &context {
            MessageTarget::Channel(n) | MessageTarget::PrivateChat(n) => n.clone(),
            MessageTarget::Server => return,
        };
        if !from_me {
            match state.as_str() {
                "active" | "paused" => ctx.start_typing(&name, sender),
                "done" => ctx.stop_typing(&name, sender),
                other => debug!(state = other, "unknown typing state"),
            }
        }
    }

    let Some(reply) = first_tag(tags, REPLY_TAGS) else {
        return;
    };
    let react = first_tag(tags, REACT_TAGS);
    let unreact = first_tag(tags, UNREACT_TAGS);
    let preview = link_preview(tags);
    let Some(msg) = ctx
        .server_mut()
        .and_then(|s| s.find_message_mut(&context, reply))
    else {
        if react.is_some() || unreact.is_some() {
            debug!(msgid = reply, "reaction for unknown message");
        }
        return;
    };
    if let Some(emoji) = react {
        msg.add_reaction(emoji, sender);
    }
    if let Some(emoji) = unreact {
        msg.remove_reaction(emoji, sender);
    }
    if let Some(p) = preview {
        msg.link_preview.get_or_insert_with(LinkPreview::default).merge(p);
    }
}

pub(super) fn on_redact(ctx: &mut Ctx<'_>, sender: &str, target: &str, msgid: &str, reason: Option<&str>) {
    let context = context_of(ctx, sender, target);
    let Some(msg) = ctx
        .server_mut()
        .and_then(|s| s.find_message_mut(&context, msgid))
    else {
        debug!(msgid, "REDACT for unknown message");
        return;
    };
    let mut content = if msg.sender.eq_ignore_ascii_case(sender) {
        "Message deleted by author".to_string()
    } else {
        format!("Message deleted by {}", sender)
    };
    if let Some(r) = reason.filter(|r| !r.is_empty()) {
        content.push_str(&format!(" ({})", r));
    }
    msg.content = content;
    msg.kind = MessageKind::System;
    msg.is_action = false;
    msg.reactions.clear();
    msg.link_preview = None;
    msg.json_log = None;
}

pub(super) fn on_topic(ctx: &mut Ctx<'_>, sender: &str, channel: &str, topic: &str, tags: &Tags) {
    let ts = ctx.timestamp(tags);
    let Some(ch) = ctx.server_mut().and_then(|s| s.channel_mut(channel)) else {
        return;
    };
    ch.topic = (!topic.is_empty()).then(|| topic.to_string());
    ch.topic_set_by = Some(sender.to_string());
    ch.topic_set_at = Some(ts.timestamp());
    let content = if topic.is_empty() {
        format!("{} cleared the topic", sender)
    } else {
        format!("{} changed the topic to: {}", sender, topic)
    };
    ctx.context_message(
        MessageTarget::Channel(channel.to_string()),
        MessageKind::System,
        sender,
        content,
        ts,
    );
}

pub(super) fn on_rpl_topic(ctx: &mut Ctx<'_>, channel: &str, topic: Option<String>) {
    if let Some(ch) = ctx.server_mut().and_then(|s| s.channel_mut(channel)) {
        ch.topic = topic.filter(|t| !t.is_empty());
    }
}

pub(super) fn on_topic_who_time(ctx: &mut Ctx<'_>, channel: &str, set_by: &str, set_at: i64) {
    if let Some(ch) = ctx.server_mut().and_then(|s| s.channel_mut(channel)) {
        ch.topic_set_by = Some(nick_of(set_by).to_string());
        ch.topic_set_at = Some(set_at);
    }
}

pub(super) fn on_invite(ctx: &mut Ctx<'_>, sender: &str, target: &str, channel: &str) {
    if ctx.is_me(target) {
        info!(server_id = ctx.server_id, channel, by = sender, "invited");
        ctx.notify(
            NotificationKind::Invite,
            format!("Invitation to {}", channel),
            format!("{} invited you to {}", sender, channel),
        );
        ctx.server_message(
            MessageKind::Invite,
            format!("{} invited you to {}", sender, channel),
        );
        return;
    }
    if ctx.server().and_then(|s| s.channel(channel)).is_some() {
        let wall = ctx.wall;
        ctx.context_message(
            MessageTarget::Channel(channel.to_string()),
            MessageKind::Invite,
            sender,
            format!("{} invited {} to {}", sender, target, channel),
            wall,
        );
    }
}

pub(super) fn on_nick_error(ctx: &mut Ctx<'_>, code: u16, nick: &str, message: &str) {
    let attempted = if nick.is_empty() || nick == "*" {
        ctx.own_nick()
    } else {
        nick.to_string()
    };
    if code == 433 && ctx.config.behavior.nick_retry && !ctx.session.nick_retried {
        ctx.session.nick_retried = true;
        let next = format!("{}_", attempted);
        info!(server_id = ctx.server_id, nick = %attempted, retry = %next, "nickname in use, retrying");
        ctx.send(commands::nick(&next));
        return;
    }
    let text = format!("{}: {}", attempted, message);
    ctx.notify(NotificationKind::NickError, format!("Nickname error ({})", code), text.clone());
    ctx.server_message(MessageKind::System, text);
}

pub(super) fn on_standard_reply(
    ctx: &mut Ctx<'_>,
    severity: ReplySeverity,
    command: &str,
    code: &str,
    context: &[String],
    message: &str,
) {
    let title = format!("{} {} {}", severity.as_str(), command, code);
    ctx.notify(NotificationKind::StandardReply(severity), title, message);

    let mut content = format!("{} {}", command, code);
    for c in context {
        content.push(' ');
        content.push_str(c);
    }
    content.push_str(": ");
    content.push_str(message);
    let sender = ctx.server().map(|s| s.name.clone()).unwrap_or_default();
    let mut msg = Message::new(
        ctx.server_id,
        MessageTarget::Server,
        MessageKind::StandardReply,
        &sender,
        content,
        ctx.wall,
    );
    msg.severity = Some(severity);
    ctx.add_message(msg);

    if severity == ReplySeverity::Fail && matches!(command, "REGISTER" | "VERIFY") {
        let effects = ctx.session.caps.on_registration_done();
        apply_cap_effects(ctx, effects);
    }
}

//! JOIN, PART, QUIT, KICK, NICK and RENAME.

use tracing::{debug, info};

use super::Ctx;
use crate::app::state::{Channel, MessageKind, MessageTarget, Server, User};
use crate::app::timers::TimerKind;
use crate::irc::commands;
use crate::irc::event::Tags;

pub(crate) struct JoinInfo<'a> {
    pub nick: &'a str,
    pub hostmask: Option<&'a str>,
    pub channel: &'a str,
    pub account: Option<&'a str>,
    pub realname: Option<&'a str>,
    pub tags: &'a Tags,
}

pub(super) fn on_join(ctx: &mut Ctx<'_>, join: &JoinInfo<'_>) {
    if ctx.is_me(join.nick) {
        self_join(ctx, join);
    } else {
        member_join(ctx, join, true);
    }
}

fn self_join(ctx: &mut Ctx<'_>, join: &JoinInfo<'_>) {
    let sid = ctx.server_id;
    let key = ctx.server_key();
    let order = ctx.persist.channel_order.get(&key).cloned().unwrap_or_default();
    let Some(server) = ctx.state.server_mut(sid) else {
        return;
    };
    if server
        .channel(join.channel)
        .is_some_and(|c| c.has_user(join.nick))
    {
        debug!(channel = join.channel, "repeated self JOIN ignored");
        return;
    }
    if server.channel(join.channel).is_none() {
        insert_channel_ordered(server, Channel::new(join.channel), &order);
    }
    let chathistory = server.supports_chathistory();
    let mut me = User::new(join.nick);
    fill_identity(&mut me, join);
    me.metadata = server.metadata.clone();
    me.is_away = server.is_away;
    me.is_oper = server.is_oper;

    let Some(channel) = server.channel_mut(join.channel) else {
        return;
    };
    channel.add_user(me);
    channel.needs_who = true;
    channel.loading = chathistory;
    info!(server_id = sid, channel = join.channel, chathistory, "joined channel");

    if chathistory {
        let delay = ctx.config.behavior.chathistory_delay();
        ctx.schedule(
            delay,
            TimerKind::Chathistory {
                server_id: sid,
                channel: join.channel.to_string(),
            },
        );
    } else {
        ctx.send(commands::topic_query(join.channel));
        let delay = ctx.config.behavior.who_delay();
        ctx.schedule(
            delay,
            TimerKind::Who {
                server_id: sid,
                channel: join.channel.to_string(),
            },
        );
    }
    remember_channel(ctx, join.channel);
}

/// Add a member. Returns false when the channel is unknown or the member
/// already present.
pub(super) fn member_join(ctx: &mut Ctx<'_>, join: &JoinInfo<'_>, announce: bool) -> bool {
    let user = build_user(ctx, join);
    let ts = ctx.timestamp(join.tags);
    let show = ctx.state.settings.show_join_part;
    let Some(server) = ctx.server_mut() else {
        return false;
    };
    if let Some(pm) = server.private_chat_mut(join.nick) {
        pm.is_online = true;
    }
    let Some(channel) = server.channel_mut(join.channel) else {
        debug!(channel = join.channel, nick = join.nick, "JOIN for unknown channel");
        return false;
    };
    if !channel.add_user(user) {
        return false;
    }
    if announce && show {
        ctx.context_message(
            MessageTarget::Channel(join.channel.to_string()),
            MessageKind::Join,
            join.nick,
            format!("{} has joined {}", join.nick, join.channel),
            ts,
        );
    }
    true
}

/// A fresh member record, seeded from what we already know about the nick.
pub(super) fn build_user(ctx: &Ctx<'_>, join: &JoinInfo<'_>) -> User {
    let mut user = User::new(join.nick);
    fill_identity(&mut user, join);
    if let Some(server) = ctx.server() {
        if let Some(known) = server.known_user(join.nick) {
            user.copy_known(known);
        } else if let Some(pm) = server.private_chat(join.nick) {
            user.realname = user.realname.or_else(|| pm.realname.clone());
            user.account = user.account.or_else(|| pm.account.clone());
            user.is_bot = pm.is_bot;
        }
    }
    if let Some(cached) = ctx.persist.metadata.get(&ctx.server_key(), join.nick) {
        for (k, v) in cached {
            user.metadata.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    user
}

fn fill_identity(user: &mut User, join: &JoinInfo<'_>) {
    if let Some((ident, host)) = join.hostmask.and_then(split_hostmask) {
        user.ident = Some(ident.to_string());
        user.hostname = Some(host.to_string());
    }
    user.account = join.account.map(str::to_string);
    user.realname = join.realname.map(str::to_string);
}

/// `nick!ident@host` into `(ident, host)`.
pub(super) fn split_hostmask(mask: &str) -> Option<(&str, &str)> {
    let (_, rest) = mask.split_once('!')?;
    rest.split_once('@')
}

fn insert_channel_ordered(server: &mut Server, channel: Channel, order: &[String]) {
    let rank = |name: &str| order.iter().position(|o| o.eq_ignore_ascii_case(name));
    let pos = match rank(&channel.name) {
        Some(r) => server
            .channels
            .iter()
            .position(|c| rank(&c.name).is_none_or(|cr| cr > r))
            .unwrap_or(server.channels.len()),
        None => server.channels.len(),
    };
    server.channels.insert(pos, channel);
}

fn remember_channel(ctx: &mut Ctx<'_>, channel: &str) {
    let Some(host) = ctx.server().map(|s| s.host.clone()) else {
        return;
    };
    if let Some(saved) = ctx.persist.saved_server_mut(&host) {
        if !saved.channels.iter().any(|c| c.eq_ignore_ascii_case(channel)) {
            saved.channels.push(channel.to_string());
            ctx.persist.save_servers();
        }
    }
    let key = ctx.server_key();
    let order = ctx.persist.channel_order.entry(key).or_default();
    if !order.iter().any(|c| c.eq_ignore_ascii_case(channel)) {
        order.push(channel.to_string());
        ctx.persist.save_channel_order();
    }
}

fn forget_channel(ctx: &mut Ctx<'_>, channel: &str) {
    let Some(host) = ctx.server().map(|s| s.host.clone()) else {
        return;
    };
    if let Some(saved) = ctx.persist.saved_server_mut(&host) {
        let before = saved.channels.len();
        saved.channels.retain(|c| !c.eq_ignore_ascii_case(channel));
        if saved.channels.len() != before {
            ctx.persist.save_servers();
        }
    }
}

/// Drop a channel we are no longer in.
fn leave_channel(ctx: &mut Ctx<'_>, channel: &str) {
    ctx.clear_typing_context(channel);
    let sid = ctx.server_id;
    if let Some(server) = ctx.server_mut() {
        server.channels.retain(|c| !c.name.eq_ignore_ascii_case(channel));
    }
    let target = MessageTarget::Channel(channel.to_string());
    if ctx.state.is_selected(sid, &target) {
        if let Some(sel) = ctx.state.selected.as_mut() {
            sel.target = MessageTarget::Server;
        }
    }
}

pub(super) fn on_part(ctx: &mut Ctx<'_>, nick: &str, channel: &str, reason: Option<&str>, tags: &Tags) {
    if ctx.is_me(nick) {
        info!(server_id = ctx.server_id, channel, "left channel");
        leave_channel(ctx, channel);
        forget_channel(ctx, channel);
        return;
    }
    ctx.stop_typing(channel, nick);
    let removed = ctx
        .server_mut()
        .and_then(|s| s.channel_mut(channel))
        .and_then(|c| c.remove_user(nick))
        .is_some();
    if removed && ctx.state.settings.show_join_part {
        let ts = ctx.timestamp(tags);
        ctx.context_message(
            MessageTarget::Channel(channel.to_string()),
            MessageKind::Part,
            nick,
            with_reason(format!("{} has left {}", nick, channel), reason),
            ts,
        );
    }
}

pub(super) fn on_quit(ctx: &mut Ctx<'_>, nick: &str, reason: Option<&str>, tags: &Tags) {
    if ctx.is_me(nick) {
        return;
    }
    let ts = ctx.timestamp(tags);
    let show = ctx.state.settings.show_join_part;
    let channels: Vec<String> = ctx
        .server()
        .map(|s| {
            s.channels
                .iter()
                .filter(|c| c.has_user(nick))
                .map(|c| c.name.clone())
                .collect()
        })
        .unwrap_or_default();

    let content = with_reason(format!("{} has quit", nick), reason);
    for name in channels {
        ctx.stop_typing(&name, nick);
        if let Some(c) = ctx.server_mut().and_then(|s| s.channel_mut(&name)) {
            c.remove_user(nick);
        }
        if show {
            ctx.context_message(
                MessageTarget::Channel(name),
                MessageKind::Quit,
                nick,
                content.clone(),
                ts,
            );
        }
    }

    let has_pm = ctx.server().is_some_and(|s| s.private_chat(nick).is_some());
    if has_pm {
        ctx.stop_typing(nick, nick);
        if let Some(pm) = ctx.server_mut().and_then(|s| s.private_chat_mut(nick)) {
            pm.is_online = false;
        }
        ctx.context_message(
            MessageTarget::PrivateChat(nick.to_string()),
            MessageKind::Quit,
            nick,
            content,
            ts,
        );
    }
}

pub(super) fn on_kick(
    ctx: &mut Ctx<'_>,
    sender: &str,
    channel: &str,
    target: &str,
    reason: Option<&str>,
    tags: &Tags,
) {
    if ctx.is_me(target) {
        info!(server_id = ctx.server_id, channel, by = sender, "kicked from channel");
        leave_channel(ctx, channel);
        ctx.server_message(
            MessageKind::Kick,
            with_reason(format!("You were kicked from {} by {}", channel, sender), reason),
        );
        return;
    }
    ctx.stop_typing(channel, target);
    let removed = ctx
        .server_mut()
        .and_then(|s| s.channel_mut(channel))
        .and_then(|c| c.remove_user(target))
        .is_some();
    if removed {
        let ts = ctx.timestamp(tags);
        ctx.context_message(
            MessageTarget::Channel(channel.to_string()),
            MessageKind::Kick,
            sender,
            with_reason(format!("{} was kicked by {}", target, sender), reason),
            ts,
        );
    }
}

pub(super) fn on_nick(ctx: &mut Ctx<'_>, old: &str, new: &str, tags: &Tags) {
    let sid = ctx.server_id;
    let is_self = ctx.is_me(old);
    let ts = ctx.timestamp(tags);
    let old_lower = old.to_lowercase();

    let typing_contexts: Vec<String> = ctx
        .session
        .typing
        .keys()
        .filter(|(_, u)| *u == old_lower)
        .map(|(c, _)| c.clone())
        .collect();
    for context in typing_contexts {
        let to = if context == old_lower {
            new.to_string()
        } else {
            context.clone()
        };
        ctx.rekey_typing(&context, old, &to, new);
    }

    let Some(server) = ctx.state.server_mut(sid) else {
        return;
    };
    if is_self {
        info!(server_id = sid, old, new, "own nickname changed");
        server.nickname = new.to_string();
    }
    let mut channels = Vec::new();
    for ch in server.channels.iter_mut() {
        if let Some(user) = ch.user_mut(old) {
            user.username = new.to_string();
            channels.push(ch.name.clone());
        }
        for t in ch.typing.iter_mut() {
            if t.eq_ignore_ascii_case(old) {
                *t = new.to_string();
            }
        }
    }
    let mut pm_renamed = false;
    if server.private_chat(new).is_none() {
        if let Some(pm) = server.private_chat_mut(old) {
            pm.username = new.to_string();
            for t in pm.typing.iter_mut() {
                if t.eq_ignore_ascii_case(old) {
                    *t = new.to_string();
                }
            }
            for m in pm.messages.iter_mut() {
                m.target = MessageTarget::PrivateChat(new.to_string());
            }
            pm_renamed = true;
        }
    }

    if pm_renamed {
        if let Some(sel) = ctx.state.selected.as_mut() {
            if sel.server_id == sid
                && matches!(&sel.target, MessageTarget::PrivateChat(n) if n.eq_ignore_ascii_case(old))
            {
                sel.target = MessageTarget::PrivateChat(new.to_string());
            }
        }
    }

    let content = format!("{} is now known as {}", old, new);
    for name in channels {
        ctx.context_message(MessageTarget::Channel(name), MessageKind::Nick, old, content.clone(), ts);
    }
    if pm_renamed {
        ctx.context_message(
            MessageTarget::PrivateChat(new.to_string()),
            MessageKind::Nick,
            old,
            content.clone(),
            ts,
        );
    }
    if is_self {
        ctx.server_message(MessageKind::Nick, format!("You are now known as {}", new));
    }

    let key = ctx.server_key();
    ctx.persist.metadata.rename_target(&key, old, new);
    ctx.persist.save_metadata();
    if let Some(pinned) = ctx.persist.pinned.get_mut(&key) {
        if let Some(p) = pinned.iter_mut().find(|p| p.username.eq_ignore_ascii_case(old)) {
            p.username = new.to_string();
            ctx.persist.save_pinned();
        }
    }
}

pub(super) fn on_rename(ctx: &mut Ctx<'_>, sender: &str, old: &str, new: &str, reason: Option<&str>) {
    let sid = ctx.server_id;
    let Some(channel) = ctx.server_mut().and_then(|s| s.channel_mut(old)) else {
        debug!(old, "RENAME for unknown channel");
        return;
    };
    channel.name = new.to_string();
    for m in channel.messages.iter_mut() {
        m.target = MessageTarget::Channel(new.to_string());
    }
    let typers: Vec<String> = channel.typing.clone();
    for user in typers {
        ctx.rekey_typing(old, &user, new, &user);
    }
    if let Some(sel) = ctx.state.selected.as_mut() {
        if sel.server_id == sid
            && matches!(&sel.target, MessageTarget::Channel(n) if n.eq_ignore_ascii_case(old))
        {
            sel.target = MessageTarget::Channel(new.to_string());
        }
    }

    let key = ctx.server_key();
    let host = ctx.server().map(|s| s.host.clone()).unwrap_or_default();
    if let Some(saved) = ctx.persist.saved_server_mut(&host) {
        for c in saved.channels.iter_mut() {
            if c.eq_ignore_ascii_case(old) {
                *c = new.to_string();
            }
        }
        ctx.persist.save_servers();
    }
    if let Some(order) = ctx.persist.channel_order.get_mut(&key) {
        for c in order.iter_mut() {
            if c.eq_ignore_ascii_case(old) {
                *c = new.to_string();
            }
        }
        ctx.persist.save_channel_order();
    }
    ctx.persist.metadata.rename_target(&key, old, new);
    ctx.persist.save_metadata();

    let wall = ctx.wall;
    ctx.context_message(
        MessageTarget::Channel(new.to_string()),
        MessageKind::System,
        sender,
        with_reason(format!("{} renamed {} to {}", sender, old, new), reason),
        wall,
    );
}

pub(super) fn with_reason(text: String, reason: Option<&str>) -> String {
    match reason.filter(|r| !r.is_empty()) {
        Some(r) => format!("{} ({})", text, r),
        None => text,
    }
}

//! Inbound event handlers.
//!
//! [`dispatch`] is the single entry point: it offers the event to the batch
//! tracker and otherwise hands it to [`apply`], an exhaustive `match` over
//! [`IrcEvent`]. Every handler mutates the store's working copy through a
//! [`Ctx`] and queues its side effects there.

mod batches;
mod membership;
mod messages;
mod metadata;
mod modes;
mod session;
mod who;

pub(crate) use batches::SplitRecord;
pub(crate) use messages::ensure_private_chat;
pub(crate) use metadata::apply_own_value;
pub(crate) use session::apply_cap_effects;

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::app::action::{Action, Notification, NotificationKind};
use crate::app::event::ServerId;
use crate::app::state::{Message, MessageKind, MessageTarget, Server, StoreState};
use crate::app::store::Session;
use crate::app::timers::{TimerId, TimerKind, Timers};
use crate::config::AppConfig;
use crate::irc::batch::BatchKind;
use crate::irc::commands;
use crate::irc::event::{IrcEvent, Tags};
use crate::persist::{server_key, Persisted};

/// Everything a handler may touch while one event is applied.
pub(crate) struct Ctx<'a> {
    pub state: &'a mut StoreState,
    pub session: &'a mut Session,
    pub timers: &'a mut Timers,
    pub config: &'a AppConfig,
    pub persist: &'a mut Persisted,
    pub actions: Vec<Action>,
    pub server_id: ServerId,
    pub now: Instant,
    pub wall: DateTime<Utc>,
}

impl Ctx<'_> {
    pub fn server(&self) -> Option<&Server> {
        self.state.server(self.server_id)
    }

    pub fn server_mut(&mut self) -> Option<&mut Server> {
        self.state.server_mut(self.server_id)
    }

    pub fn own_nick(&self) -> String {
        self.server().map(|s| s.nickname.clone()).unwrap_or_default()
    }

    pub fn is_me(&self, nick: &str) -> bool {
        self.server().is_some_and(|s| s.is_me(nick))
    }

    /// Persistence key of this server.
    pub fn server_key(&self) -> String {
        self.server().map(|s| server_key(&s.host)).unwrap_or_default()
    }

    pub fn is_channel(&self, target: &str) -> bool {
        self.session.decoder.is_channel(target)
    }

    pub fn send(&mut self, line: String) {
        self.actions.push(Action::raw(self.server_id, line));
    }

    pub fn notify(&mut self, kind: NotificationKind, title: impl Into<String>, body: impl Into<String>) {
        let optional = matches!(
            kind,
            NotificationKind::Mention | NotificationKind::PrivateMessage | NotificationKind::Invite
        );
        if optional && !self.state.settings.notifications_enabled {
            return;
        }
        self.actions.push(Action::Notify(Notification {
            server_id: self.server_id,
            kind,
            title: title.into(),
            body: body.into(),
        }));
    }

    /// `server-time` from the tags, or the wall clock.
    pub fn timestamp(&self, tags: &Tags) -> DateTime<Utc> {
        tags.get("time")
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(self.wall)
    }

    /// True if the line belongs to an open chathistory batch.
    pub fn is_history(&self, tags: &Tags) -> bool {
        tags.get("batch")
            .and_then(|b| self.session.batches.kind_of(b))
            .is_some_and(|k| *k == BatchKind::Chathistory)
    }

    pub fn schedule(&mut self, delay: Duration, kind: TimerKind) -> TimerId {
        self.timers.schedule(self.now + delay, kind)
    }

    /// Insert a message in timestamp order. Duplicates are dropped and the
    /// list is capped at the configured scrollback.
    pub fn add_message(&mut self, mut msg: Message) -> bool {
        let max = self.config.behavior.max_scrollback;
        let id = self.state.next_message_id;
        let Some(server) = self.state.server_mut(self.server_id) else {
            return false;
        };
        let Some(list) = server.messages_for_mut(&msg.target) else {
            trace!(target = ?msg.target, "no context for message");
            return false;
        };
        if list.iter().any(|m| m.is_duplicate_of(&msg)) {
            trace!(msgid = ?msg.msgid, "duplicate message dropped");
            return false;
        }
        msg.id = id;
        let pos = list.partition_point(|m| m.timestamp <= msg.timestamp);
        list.insert(pos, msg);
        if max > 0 && list.len() > max {
            let excess = list.len() - max;
            list.drain(..excess);
        }
        self.state.next_message_id += 1;
        true
    }

    /// A line in the server buffer.
    pub fn server_message(&mut self, kind: MessageKind, content: impl Into<String>) {
        let sender = self.server().map(|s| s.name.clone()).unwrap_or_default();
        let msg = Message::new(
            self.server_id,
            MessageTarget::Server,
            kind,
            &sender,
            content,
            self.wall,
        );
        self.add_message(msg);
    }

    /// A system line in a channel or private chat.
    pub fn context_message(
        &mut self,
        target: MessageTarget,
        kind: MessageKind,
        sender: &str,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) {
        let msg = Message::new(self.server_id, target, kind, sender, content, timestamp);
        self.add_message(msg);
    }

    /// Count an unread line unless the context is on screen.
    pub fn note_activity(&mut self, target: &MessageTarget, mention: bool) {
        if self.state.is_selected(self.server_id, target) {
            return;
        }
        let Some(server) = self.state.server_mut(self.server_id) else {
            return;
        };
        match target {
            MessageTarget::Channel(name) => {
                if let Some(c) = server.channel_mut(name) {
                    c.unread += 1;
                    c.mentioned |= mention;
                }
            }
            MessageTarget::PrivateChat(nick) => {
                if let Some(p) = server.private_chat_mut(nick) {
                    p.unread += 1;
                    p.mentioned |= mention;
                }
            }
            MessageTarget::Server => {}
        }
    }

    fn typing_list_mut(&mut self, context: &str) -> Option<&mut Vec<String>> {
        let is_channel = self.is_channel(context);
        let server = self.state.server_mut(self.server_id)?;
        if is_channel {
            server.channel_mut(context).map(|c| &mut c.typing)
        } else {
            server.private_chat_mut(context).map(|p| &mut p.typing)
        }
    }

    /// Mark `user` as typing in `context` and (re)arm their expiry.
    pub fn start_typing(&mut self, context: &str, user: &str) {
        let Some(list) = self.typing_list_mut(context) else {
            return;
        };
        if !list.iter().any(|u| u.eq_ignore_ascii_case(user)) {
            list.push(user.to_string());
        }
        let key = typing_key(context, user);
        if let Some(old) = self.session.typing.remove(&key) {
            self.timers.cancel(old);
        }
        let timeout = self.config.behavior.typing_timeout();
        let id = self.schedule(
            timeout,
            TimerKind::TypingExpiry {
                server_id: self.server_id,
                context: context.to_string(),
                user: user.to_string(),
            },
        );
        self.session.typing.insert(key, id);
    }

    /// Drop `user` from the typing list of `context` and cancel the timer.
    pub fn stop_typing(&mut self, context: &str, user: &str) {
        if let Some(id) = self.session.typing.remove(&typing_key(context, user)) {
            self.timers.cancel(id);
        }
        if let Some(list) = self.typing_list_mut(context) {
            list.retain(|u| !u.eq_ignore_ascii_case(user));
        }
    }

    /// Cancel every typing timer of one context.
    pub fn clear_typing_context(&mut self, context: &str) {
        let lower = context.to_lowercase();
        let keys: Vec<_> = self
            .session
            .typing
            .keys()
            .filter(|(c, _)| *c == lower)
            .cloned()
            .collect();
        for key in keys {
            if let Some(id) = self.session.typing.remove(&key) {
                self.timers.cancel(id);
            }
        }
        if let Some(list) = self.typing_list_mut(context) {
            list.clear();
        }
    }

    /// Move typing timers from one key to another, keeping their deadlines.
    pub fn rekey_typing(&mut self, from_context: &str, from_user: &str, to_context: &str, to_user: &str) {
        let Some(id) = self.session.typing.remove(&typing_key(from_context, from_user)) else {
            return;
        };
        let Some(at) = self.timers.deadline(id) else {
            return;
        };
        self.timers.cancel(id);
        let new_id = self.timers.schedule(
            at,
            TimerKind::TypingExpiry {
                server_id: self.server_id,
                context: to_context.to_string(),
                user: to_user.to_string(),
            },
        );
        self.session.typing.insert(typing_key(to_context, to_user), new_id);
    }

    /// `WHO` for a channel, as WHOX when the server supports it.
    pub fn send_who(&mut self, mask: &str) {
        let whox = self.server().is_some_and(|s| s.supports_whox());
        self.send(commands::who(mask, whox));
    }
}

pub(crate) fn typing_key(context: &str, user: &str) -> (String, String) {
    (context.to_lowercase(), user.to_lowercase())
}

/// Route one event: buffer it into an open batch or apply it now.
pub(crate) fn dispatch(ctx: &mut Ctx<'_>, event: IrcEvent) {
    trace!(server_id = ctx.server_id, event = event.name(), "dispatch");
    if let Some(event) = ctx.session.batches.buffer(event) {
        apply(ctx, event);
    }
}

/// Apply one event to the store, bypassing batch buffering.
pub(crate) fn apply(ctx: &mut Ctx<'_>, event: IrcEvent) {
    match event {
        IrcEvent::Isupport { tokens } => modes::on_isupport(ctx, &tokens),
        IrcEvent::Mode {
            sender,
            target,
            modestring,
            args,
        } => modes::on_mode(ctx, &sender, &target, &modestring, &args),
        IrcEvent::Join {
            nick,
            hostmask,
            channel,
            account,
            realname,
            tags,
            ..
        } => membership::on_join(
            ctx,
            &membership::JoinInfo {
                nick: &nick,
                hostmask: hostmask.as_deref(),
                channel: &channel,
                account: account.as_deref(),
                realname: realname.as_deref(),
                tags: &tags,
            },
        ),
        IrcEvent::Part {
            nick,
            channel,
            reason,
            tags,
            ..
        } => membership::on_part(ctx, &nick, &channel, reason.as_deref(), &tags),
        IrcEvent::Quit {
            nick, reason, tags, ..
        } => membership::on_quit(ctx, &nick, reason.as_deref(), &tags),
        IrcEvent::Kick {
            sender,
            channel,
            target,
            reason,
            tags,
        } => membership::on_kick(ctx, &sender, &channel, &target, reason.as_deref(), &tags),
        IrcEvent::Nick {
            old_nick,
            new_nick,
            tags,
        } => membership::on_nick(ctx, &old_nick, &new_nick, &tags),
        IrcEvent::Topic {
            sender,
            channel,
            topic,
            tags,
        } => messages::on_topic(ctx, &sender, &channel, &topic, &tags),
        IrcEvent::RplTopic { channel, topic } => messages::on_rpl_topic(ctx, &channel, Some(topic)),
        IrcEvent::RplNoTopic { channel } => messages::on_rpl_topic(ctx, &channel, None),
        IrcEvent::RplTopicWhoTime {
            channel,
            set_by,
            set_at,
        } => messages::on_topic_who_time(ctx, &channel, &set_by, set_at),
        IrcEvent::Invite {
            sender,
            target,
            channel,
        } => messages::on_invite(ctx, &sender, &target, &channel),
        IrcEvent::ChanMsg(line) => messages::on_chat(ctx, line, MessageKind::Message),
        IrcEvent::UserMsg(line) => messages::on_chat(ctx, line, MessageKind::Message),
        IrcEvent::ChanNotice(line) => messages::on_chat(ctx, line, MessageKind::Notice),
        IrcEvent::UserNotice(line) => messages::on_chat(ctx, line, MessageKind::Notice),
        IrcEvent::MultilineMessage {
            sender,
            target,
            lines,
            message_ids,
            tags,
        } => messages::on_multiline(ctx, &sender, &target, lines, message_ids, &tags),
        IrcEvent::Tagmsg {
            sender,
            target,
            tags,
        } => messages::on_tagmsg(ctx, &sender, &target, &tags),
        IrcEvent::Redact {
            sender,
            target,
            msgid,
            reason,
        } => messages::on_redact(ctx, &sender, &target, &msgid, reason.as_deref()),
        IrcEvent::WhoisUser {
            nick,
            ident,
            host,
            realname,
        } => who::on_whois_user(ctx, &nick, &ident, &host, &realname),
        IrcEvent::WhoisAccount { nick, account } => who::on_whois_account(ctx, &nick, &account),
        IrcEvent::WhoisBot { nick } => who::on_whois_bot(ctx, &nick),
        IrcEvent::WhoisOperator { nick } => who::on_whois_operator(ctx, &nick),
        IrcEvent::WhoisEnd { nick } => debug!(nick = %nick, "end of WHOIS"),
        IrcEvent::WhoReply(reply) | IrcEvent::WhoxReply(reply) => who::on_who_reply(ctx, &reply),
        IrcEvent::WhoEnd { mask } => who::on_who_end(ctx, &mask),
        IrcEvent::Away { nick, message } => who::on_away(ctx, &nick, message.as_deref()),
        IrcEvent::Chghost { nick, ident, host } => who::on_chghost(ctx, &nick, &ident, &host),
        IrcEvent::RplNowAway => who::on_own_away(ctx, true),
        IrcEvent::RplUnAway => who::on_own_away(ctx, false),
        IrcEvent::ModeListEntry {
            kind,
            channel,
            mask,
            setter,
            set_at,
        } => modes::on_list_entry(ctx, kind, &channel, &mask, setter, set_at),
        IrcEvent::ModeListEnd { kind, channel } => {
            debug!(?kind, channel = %channel, "end of mode list")
        }
        IrcEvent::CapLs { caps, more } => session::on_cap_ls(ctx, &caps, more),
        IrcEvent::CapAck { caps } => session::on_cap_ack(ctx, &caps),
        IrcEvent::CapNak { caps } => session::on_cap_nak(ctx, &caps),
        IrcEvent::Authenticate { param } => session::on_authenticate(ctx, &param),
        IrcEvent::SaslOutcome {
            success,
            code,
            message,
        } => session::on_sasl_outcome(ctx, success, code, &message),
        IrcEvent::Metadata {
            target,
            key,
            visibility,
            value,
        } => metadata::on_metadata(ctx, &target, &key, &visibility, value.as_deref()),
        IrcEvent::MetadataKeyValue {
            target,
            key,
            visibility,
            value,
        } => metadata::on_key_value(ctx, &target, &key, &visibility, &value),
        IrcEvent::MetadataKeyNotSet { target, key } => metadata::on_key_not_set(ctx, &target, &key),
        IrcEvent::MetadataSubOk { keys } | IrcEvent::MetadataSubs { keys } => {
            metadata::on_subscribed(ctx, &keys)
        }
        IrcEvent::MetadataUnsubOk { keys } => metadata::on_unsubscribed(ctx, &keys),
        IrcEvent::MetadataFail {
            code,
            target,
            key,
            retry_after,
            message,
        } => metadata::on_fail(ctx, &code, target.as_deref(), key.as_deref(), retry_after, &message),
        IrcEvent::BatchStart {
            id,
            kind,
            params,
            parent,
        } => batches::on_batch_start(ctx, &id, &kind, params, parent),
        IrcEvent::BatchEnd { id } => batches::on_batch_end(ctx, &id),
        IrcEvent::MonOnline { targets } => who::on_monitor(ctx, &targets, true),
        IrcEvent::MonOffline { targets } => who::on_monitor(ctx, &targets, false),
        IrcEvent::Rename {
            sender,
            old_channel,
            new_channel,
            reason,
        } => membership::on_rename(ctx, &sender, &old_channel, &new_channel, reason.as_deref()),
        IrcEvent::Setname { nick, realname } => who::on_setname(ctx, &nick, &realname),
        IrcEvent::NickError {
            code,
            nick,
            message,
        } => messages::on_nick_error(ctx, code, &nick, &message),
        IrcEvent::StandardReply {
            severity,
            command,
            code,
            context,
            message,
        } => messages::on_standard_reply(ctx, severity, &command, &code, &context, &message),
        IrcEvent::RegisterSuccess { account, message } => {
            session::on_register_success(ctx, &account, &message)
        }
        IrcEvent::RegisterVerificationRequired { account, message } => {
            session::on_verification_required(ctx, &account, &message)
        }
        IrcEvent::VerifySuccess { account, message } => {
            session::on_verify_success(ctx, &account, &message)
        }
        IrcEvent::Extjwt { target, token, .. } => session::on_extjwt(ctx, &target, token),
        IrcEvent::RplYoureOper { message } => session::on_youre_oper(ctx, &message),
        IrcEvent::RplYourHost { message } => ctx.server_message(MessageKind::System, message),
        IrcEvent::ConnectionStateChange { status } => session::on_connection_state(ctx, status),
        IrcEvent::Ready {
            nickname,
            server_name,
        } => session::on_ready(ctx, &nickname, server_name.as_deref()),
        IrcEvent::ChathistoryLoading { channel, loading } => {
            batches::set_loading(ctx, &channel, loading)
        }
        IrcEvent::ListChannel {
            channel,
            user_count,
            topic,
        } => session::on_list_channel(ctx, channel, user_count, topic),
        IrcEvent::ListEnd => session::on_list_end(ctx),
    }
}

/// A timer came due.
pub(crate) fn on_timer(ctx: &mut Ctx<'_>, id: TimerId, kind: TimerKind) {
    match kind {
        TimerKind::TypingExpiry { context, user, .. } => {
            let key = typing_key(&context, &user);
            if ctx.session.typing.get(&key) == Some(&id) {
                ctx.session.typing.remove(&key);
            }
            if let Some(list) = ctx.typing_list_mut(&context) {
                list.retain(|u| !u.eq_ignore_ascii_case(&user));
            }
        }
        TimerKind::Chathistory { channel, .. } => {
            if ctx.server().and_then(|s| s.channel(&channel)).is_none() {
                debug!(channel = %channel, "history request for a channel we left");
                return;
            }
            let limit = ctx.config.behavior.chathistory_limit;
            ctx.send(commands::chathistory_latest(&channel, limit));
            ctx.send(commands::topic_query(&channel));
            let timeout = ctx.config.behavior.chathistory_timeout();
            let server_id = ctx.server_id;
            ctx.schedule(timeout, TimerKind::HistoryTimeout { server_id, channel });
        }
        TimerKind::HistoryTimeout { channel, .. } => {
            let waiting = ctx
                .server()
                .and_then(|s| s.channel(&channel))
                .map(|c| (c.loading, c.needs_who));
            let Some((loading, needs_who)) = waiting else {
                return;
            };
            if !loading || ctx.session.batches.history_open(&channel) {
                return;
            }
            debug!(channel = %channel, "no history batch arrived");
            batches::set_loading(ctx, &channel, false);
            if needs_who {
                ctx.send_who(&channel);
            }
        }
        TimerKind::Who { channel, .. } => {
            if ctx.server().and_then(|s| s.channel(&channel)).is_none() {
                debug!(channel = %channel, "WHO for a channel we left");
                return;
            }
            ctx.send_who(&channel);
        }
        TimerKind::MetadataRetry { target, key, .. } => {
            if ctx.session.metadata.enabled() {
                ctx.send(commands::metadata_get(&target, &[key]));
            }
        }
    }
}

//! The state-owning service.
//!
//! [`Store`] owns the only writable copy of [`StoreState`]. Every inbound
//! event and every user operation runs to completion through one applier
//! that clones the state on write (`Arc::make_mut`) and then publishes the
//! new snapshot on a `watch` channel. Side effects come back as
//! [`Action`]s for the caller to execute.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::app::action::Action;
use crate::app::command::{parse_command, Command};
use crate::app::event::{AppEvent, ServerId};
use crate::app::handler::{self, Ctx, SplitRecord};
use crate::app::state::{
    Message, MessageKind, MessageTarget, PrivateChat, Selection, Server, StoreState,
};
use crate::app::timers::{TimerId, Timers};
use crate::config::AppConfig;
use crate::irc::batch::BatchTracker;
use crate::irc::caps::{CapSequencer, PendingRegistration, REGISTRATION_CAP};
use crate::irc::commands;
use crate::irc::decode::{Decoder, RawLine};
use crate::irc::event::{ChatLine, ConnectionStatus, IrcEvent, Tags};
use crate::irc::metadata::{resolve_target, ChannelListEntry, MetadataSync, CHANNEL_LIST_KEYS};
use crate::persist::{server_key, GlobalSettings, Persisted, PinnedChat, SavedServer};

/// Protocol state of one connection that never leaves the store.
pub(crate) struct Session {
    pub decoder: Decoder,
    pub batches: BatchTracker,
    pub caps: CapSequencer,
    pub metadata: MetadataSync,
    /// The one automatic retry after 433 was used.
    pub nick_retried: bool,
    /// Typing expiry timer per (context, user), both lowercased.
    pub typing: HashMap<(String, String), TimerId>,
    /// Members removed by a netsplit, by lowercased nick.
    pub netsplit: HashMap<String, Vec<SplitRecord>>,
}

impl Session {
    pub fn new(host: &str, config: &AppConfig) -> Self {
        Self {
            decoder: Decoder::new(),
            batches: BatchTracker::new(),
            caps: CapSequencer::new(host, None, false),
            metadata: MetadataSync::new(config.metadata.channel_cache_ttl()),
            nick_retried: false,
            typing: HashMap::new(),
            netsplit: HashMap::new(),
        }
    }

    /// Start over for a new connection.
    pub fn reset(&mut self) {
        self.decoder = Decoder::new();
        self.batches.clear();
        self.caps.reset();
        self.metadata.reset();
        self.nick_retried = false;
        self.typing.clear();
        self.netsplit.clear();
    }
}

pub struct Store {
    state: Arc<StoreState>,
    tx: watch::Sender<Arc<StoreState>>,
    sessions: HashMap<ServerId, Session>,
    timers: Timers,
    config: AppConfig,
    persist: Persisted,
    next_server_id: ServerId,
}

impl Store {
    pub fn new(config: AppConfig, mut persist: Persisted) -> Self {
        for server in &config.servers {
            if persist.saved_server(&server.host).is_none() {
                info!(host = %server.host, "seeding saved server from config");
                persist.upsert_server(server.clone());
            }
        }
        let state = StoreState {
            settings: persist.settings.clone(),
            ..StoreState::default()
        };
        // The channel starts with its own copy so the live state stays
        // uniquely owned until somebody subscribes.
        let (tx, _) = watch::channel(Arc::new(state.clone()));
        Self {
            state: Arc::new(state),
            tx,
            sessions: HashMap::new(),
            timers: Timers::new(),
            config,
            persist,
            next_server_id: 1,
        }
    }

    /// Receive a snapshot after every applied change.
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreState>> {
        self.tx.send_replace(Arc::clone(&self.state));
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Arc<StoreState> {
        Arc::clone(&self.state)
    }

    pub fn state(&self) -> &StoreState {
        &self.state
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn persisted(&self) -> &Persisted {
        &self.persist
    }

    pub fn saved_servers(&self) -> &[SavedServer] {
        &self.persist.saved_servers
    }

    /// Number of armed timers, due or not.
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    fn publish(&self) {
        if self.tx.receiver_count() > 0 {
            self.tx.send_replace(Arc::clone(&self.state));
        }
    }

    /// Run `f` against one server's working copy and publish the result.
    fn apply<F>(&mut self, server_id: ServerId, now: Instant, f: F) -> Vec<Action>
    where
        F: FnOnce(&mut Ctx<'_>),
    {
        let Some(session) = self.sessions.get_mut(&server_id) else {
            debug!(server_id, "event for unknown server dropped");
            return Vec::new();
        };
        let mut ctx = Ctx {
            state: Arc::make_mut(&mut self.state),
            session,
            timers: &mut self.timers,
            config: &self.config,
            persist: &mut self.persist,
            actions: Vec::new(),
            server_id,
            now,
            wall: Utc::now(),
        };
        f(&mut ctx);
        let actions = ctx.actions;
        self.publish();
        actions
    }

    /// Changes that do not belong to one connection.
    fn mutate(&mut self, f: impl FnOnce(&mut StoreState, &mut Persisted)) {
        f(Arc::make_mut(&mut self.state), &mut self.persist);
        self.publish();
    }

    // --- inbound ---

    pub fn handle_app_event(&mut self, event: AppEvent) -> Vec<Action> {
        let now = Instant::now();
        match event {
            AppEvent::Irc { server_id, line } => self.handle_line_at(server_id, &line, now),
            AppEvent::Connected { server_id } => self.handle_at(
                server_id,
                IrcEvent::ConnectionStateChange {
                    status: ConnectionStatus::Connected,
                },
                now,
            ),
            AppEvent::Disconnected { server_id, reason } => self.apply(server_id, now, |ctx| {
                handler::apply(
                    ctx,
                    IrcEvent::ConnectionStateChange {
                        status: ConnectionStatus::Disconnected,
                    },
                );
                ctx.server_message(MessageKind::System, format!("Disconnected: {}", reason));
            }),
            AppEvent::Error { server_id, error } => self.apply(server_id, now, |ctx| {
                warn!(server_id, error = %error, "connection error");
                ctx.server_message(MessageKind::System, format!("Error: {}", error));
            }),
            AppEvent::Input(line) => self.handle_input(&line),
            AppEvent::Tick => self.tick(now),
        }
    }

    /// Decode one line and apply what it yields.
    pub fn handle_line_at(&mut self, server_id: ServerId, line: &RawLine, now: Instant) -> Vec<Action> {
        self.apply(server_id, now, |ctx| {
            let events = ctx.session.decoder.decode(line);
            for event in events {
                handler::dispatch(ctx, event);
            }
        })
    }

    pub fn handle_at(&mut self, server_id: ServerId, event: IrcEvent, now: Instant) -> Vec<Action> {
        self.apply(server_id, now, |ctx| handler::dispatch(ctx, event))
    }

    /// Fire every timer due at `now`.
    pub fn tick(&mut self, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        for (id, kind) in self.timers.due(now) {
            let server_id = kind.server_id();
            actions.extend(self.apply(server_id, now, |ctx| handler::on_timer(ctx, id, kind)));
        }
        actions
    }

    // --- connections ---

    /// Save `saved` and open (or reopen) its server entry.
    pub fn connect_server(&mut self, saved: SavedServer) -> (ServerId, Action) {
        let key = saved.key();
        let existing = self
            .state
            .servers
            .iter()
            .find(|s| server_key(&s.host) == key)
            .map(|s| s.id);
        let server_id = existing.unwrap_or_else(|| {
            let id = self.next_server_id;
            self.next_server_id += 1;
            id
        });
        self.persist.upsert_server(saved.clone());
        self.sessions
            .entry(server_id)
            .or_insert_with(|| Session::new(&saved.host, &self.config));

        let name = if saved.name.is_empty() {
            saved.host.clone()
        } else {
            saved.name.clone()
        };
        let cached = self.persist.metadata.get(&key, &saved.nickname).cloned();
        let pinned = self.persist.pinned.get(&key).cloned().unwrap_or_default();
        let mut pinned_chats: Vec<PrivateChat> = Vec::new();
        for pin in &pinned {
            let mut pm = PrivateChat::new(&pin.username);
            pm.pinned = true;
            pm.pin_order = Some(pin.order);
            if let Some(meta) = self.persist.metadata.get(&key, &pin.username) {
                pm.metadata = meta.clone();
            }
            pinned_chats.push(pm);
        }

        let state = Arc::make_mut(&mut self.state);
        match state.server_mut(server_id) {
            Some(server) => {
                server.status = ConnectionStatus::Connecting;
                server.nickname = saved.nickname.clone();
                server.port = saved.port;
            }
            None => {
                let mut server = Server::new(server_id, &saved.host, saved.port, &name, &saved.nickname);
                server.status = ConnectionStatus::Connecting;
                if let Some(meta) = cached {
                    server.metadata = meta;
                }
                server.private_chats = pinned_chats;
                state.servers.push(server);
            }
        }
        self.publish();
        info!(server_id, host = %saved.host, port = saved.port, tls = saved.tls, "connecting");

        let username = saved.username.clone().unwrap_or_else(|| saved.nickname.clone());
        let realname = saved.realname.clone().unwrap_or_else(|| saved.nickname.clone());
        let action = Action::Connect {
            server_id,
            host: saved.host,
            port: saved.port,
            tls: saved.tls,
            nickname: saved.nickname,
            username,
            realname,
            password: saved.password,
        };
        (server_id, action)
    }

    pub fn disconnect_server(&mut self, server_id: ServerId, message: Option<&str>) -> Vec<Action> {
        let message = message
            .unwrap_or(self.config.behavior.quit_message.as_str())
            .to_string();
        let mut actions = vec![Action::Disconnect {
            server_id,
            message: Some(message),
        }];
        actions.extend(self.handle_at(
            server_id,
            IrcEvent::ConnectionStateChange {
                status: ConnectionStatus::Disconnected,
            },
            Instant::now(),
        ));
        actions
    }

    /// Disconnect and forget a server, including everything persisted for it.
    pub fn remove_server(&mut self, server_id: ServerId) -> Vec<Action> {
        let Some(host) = self.state.server(server_id).map(|s| s.host.clone()) else {
            return Vec::new();
        };
        let actions = self.disconnect_server(server_id, None);
        self.sessions.remove(&server_id);
        self.timers.cancel_server(server_id);
        self.mutate(|state, persist| {
            state.servers.retain(|s| s.id != server_id);
            if state.selected.as_ref().is_some_and(|s| s.server_id == server_id) {
                state.selected = None;
            }
            persist.remove_server(&host);
        });
        info!(server_id, host = %host, "server removed");
        actions
    }

    /// Quit every connected server.
    pub fn quit_all(&mut self, message: Option<&str>) -> Vec<Action> {
        let ids: Vec<ServerId> = self
            .state
            .servers
            .iter()
            .filter(|s| s.status != ConnectionStatus::Disconnected)
            .map(|s| s.id)
            .collect();
        ids.into_iter()
            .flat_map(|id| self.disconnect_server(id, message))
            .collect()
    }

    /// Register an account now if the connection allows it, otherwise on the
    /// next connection attempt.
    pub fn register_account(
        &mut self,
        server_id: ServerId,
        account: &str,
        email: Option<&str>,
        password: &str,
    ) -> Vec<Action> {
        let registration = PendingRegistration {
            account: account.to_string(),
            email: email.map(str::to_string),
            password: password.to_string(),
        };
        self.apply(server_id, Instant::now(), |ctx| {
            let live = ctx.server().is_some_and(|s| s.registered && s.has_cap(REGISTRATION_CAP));
            if live {
                ctx.send(commands::register(account, email, password));
            } else {
                debug!(server_id = ctx.server_id, account, "registration queued for next connection");
                ctx.session.caps.queue_registration(registration);
            }
        })
    }

    pub fn verify_account(&mut self, server_id: ServerId, account: &str, code: &str) -> Vec<Action> {
        self.apply(server_id, Instant::now(), |ctx| {
            let effects = ctx.session.caps.verify(account, code);
            handler::apply_cap_effects(ctx, effects);
        })
    }

    /// Answer the link security warning. With `remember`, future connections
    /// to this host skip it.
    pub fn resolve_link_security_warning(
        &mut self,
        server_id: ServerId,
        proceed: bool,
        remember: bool,
    ) -> Vec<Action> {
        self.apply(server_id, Instant::now(), |ctx| {
            if remember && proceed {
                let host = ctx.server().map(|s| s.host.clone()).unwrap_or_default();
                if let Some(saved) = ctx.persist.saved_server_mut(&host) {
                    saved.skip_link_security_warning = true;
                    ctx.persist.save_servers();
                }
                ctx.session.caps.set_skip_link_warning(true);
            }
            let effects = ctx.session.caps.resolve_link_warning(proceed);
            handler::apply_cap_effects(ctx, effects);
        })
    }

    // --- outbound user operations ---

    fn send_line(&mut self, server_id: ServerId, line: String) -> Vec<Action> {
        self.apply(server_id, Instant::now(), |ctx| ctx.send(line))
    }

    pub fn join(&mut self, server_id: ServerId, channel: &str) -> Vec<Action> {
        self.send_line(server_id, commands::join(channel))
    }

    pub fn part(&mut self, server_id: ServerId, channel: &str, reason: Option<&str>) -> Vec<Action> {
        self.send_line(server_id, commands::part(channel, reason))
    }

    pub fn change_nick(&mut self, server_id: ServerId, nick: &str) -> Vec<Action> {
        self.send_line(server_id, commands::nick(nick))
    }

    pub fn kick(&mut self, server_id: ServerId, channel: &str, nick: &str, reason: Option<&str>) -> Vec<Action> {
        self.send_line(server_id, commands::kick(channel, nick, reason))
    }

    pub fn set_topic(&mut self, server_id: ServerId, channel: &str, topic: &str) -> Vec<Action> {
        self.send_line(server_id, commands::set_topic(channel, topic))
    }

    pub fn set_mode(&mut self, server_id: ServerId, target: &str, modestring: &str, args: &[String]) -> Vec<Action> {
        self.send_line(server_id, commands::mode(target, modestring, args))
    }

    pub fn whois(&mut self, server_id: ServerId, nick: &str) -> Vec<Action> {
        self.send_line(server_id, commands::whois(nick))
    }

    pub fn who(&mut self, server_id: ServerId, mask: &str) -> Vec<Action> {
        self.apply(server_id, Instant::now(), |ctx| ctx.send_who(mask))
    }

    pub fn oper(&mut self, server_id: ServerId, name: &str, password: &str) -> Vec<Action> {
        self.send_line(server_id, commands::oper(name, password))
    }

    pub fn set_away(&mut self, server_id: ServerId, message: Option<&str>) -> Vec<Action> {
        self.send_line(server_id, commands::away(message))
    }

    pub fn send_typing(&mut self, server_id: ServerId, target: &str, state: &str) -> Vec<Action> {
        self.apply(server_id, Instant::now(), |ctx| {
            if ctx.server().is_some_and(|s| s.has_cap("message-tags")) {
                ctx.send(commands::typing(target, state));
            }
        })
    }

    pub fn list_channels(&mut self, server_id: ServerId) -> Vec<Action> {
        self.apply(server_id, Instant::now(), |ctx| {
            if let Some(server) = ctx.server_mut() {
                server.channel_list.clear();
                server.channel_list_loading = true;
            }
            ctx.send(commands::list());
        })
    }

    /// Send a message (or with `action`, a CTCP ACTION). Without
    /// `echo-message` the line is also shown locally.
    pub fn send_message(&mut self, server_id: ServerId, target: &str, text: &str, action: bool) -> Vec<Action> {
        let text = if action {
            format!("\x01ACTION {}\x01", text)
        } else {
            text.to_string()
        };
        self.apply(server_id, Instant::now(), |ctx| {
            for line in text.split('\n').filter(|l| !l.is_empty()) {
                ctx.send(commands::privmsg(target, line));
            }
            if ctx.server().is_some_and(|s| s.has_cap("echo-message")) {
                return;
            }
            let line = ChatLine {
                sender: ctx.own_nick(),
                hostmask: None,
                target: target.to_string(),
                text: text.clone(),
                tags: Tags::new(),
            };
            let event = if ctx.is_channel(target) {
                IrcEvent::ChanMsg(line)
            } else {
                IrcEvent::UserMsg(line)
            };
            handler::apply(ctx, event);
        })
    }

    fn reaction(&mut self, server_id: ServerId, target: &str, msgid: &str, emoji: &str, add: bool) -> Vec<Action> {
        self.apply(server_id, Instant::now(), |ctx| {
            let line = if add {
                commands::react(target, msgid, emoji)
            } else {
                commands::unreact(target, msgid, emoji)
            };
            ctx.send(line);
            if ctx.server().is_some_and(|s| s.has_cap("echo-message")) {
                return;
            }
            let mut tags = Tags::new();
            tags.insert("+draft/reply".to_string(), msgid.to_string());
            let tag = if add { "+draft/react" } else { "+draft/unreact" };
            tags.insert(tag.to_string(), emoji.to_string());
            let sender = ctx.own_nick();
            handler::apply(
                ctx,
                IrcEvent::Tagmsg {
                    sender,
                    target: target.to_string(),
                    tags,
                },
            );
        })
    }

    pub fn react(&mut self, server_id: ServerId, target: &str, msgid: &str, emoji: &str) -> Vec<Action> {
        self.reaction(server_id, target, msgid, emoji, true)
    }

    pub fn unreact(&mut self, server_id: ServerId, target: &str, msgid: &str, emoji: &str) -> Vec<Action> {
        self.reaction(server_id, target, msgid, emoji, false)
    }

    // --- metadata ---

    pub fn metadata_get(&mut self, server_id: ServerId, target: &str, keys: &[String]) -> Vec<Action> {
        self.apply(server_id, Instant::now(), |ctx| {
            if ctx.session.metadata.enabled() {
                ctx.send(commands::metadata_get(target, keys));
            }
        })
    }

    pub fn metadata_list(&mut self, server_id: ServerId, target: &str) -> Vec<Action> {
        self.apply(server_id, Instant::now(), |ctx| {
            if ctx.session.metadata.enabled() {
                ctx.send(commands::metadata_list(target));
            }
        })
    }

    /// Set (or with `None`, clear) a key. Our own keys are stored locally
    /// even without server support and pushed on the next sync.
    pub fn metadata_set(&mut self, server_id: ServerId, target: &str, key: &str, value: Option<&str>) -> Vec<Action> {
        self.apply(server_id, Instant::now(), |ctx| {
            let own = ctx.own_nick();
            let resolved = resolve_target(target, &own);
            let enabled = ctx.session.metadata.enabled();
            if ctx.is_me(&resolved) {
                handler::apply_own_value(ctx, key, value);
                if enabled {
                    ctx.send(commands::metadata_set("*", key, value));
                }
            } else if enabled {
                ctx.send(commands::metadata_set(target, key, value));
            } else {
                debug!(target, key, "metadata unsupported, SET dropped");
            }
        })
    }

    pub fn metadata_subscribe(&mut self, server_id: ServerId, keys: &[String]) -> Vec<Action> {
        self.apply(server_id, Instant::now(), |ctx| {
            if ctx.session.metadata.enabled() && !keys.is_empty() {
                ctx.send(commands::metadata_sub(keys));
            }
        })
    }

    pub fn metadata_unsubscribe(&mut self, server_id: ServerId, keys: &[String]) -> Vec<Action> {
        self.apply(server_id, Instant::now(), |ctx| {
            if ctx.session.metadata.enabled() && !keys.is_empty() {
                ctx.send(commands::metadata_unsub(keys));
            }
        })
    }

    /// Fetch avatar and display name for channels shown in a channel list,
    /// skipping fresh and in-flight ones.
    pub fn request_channel_list_metadata(&mut self, server_id: ServerId, channels: &[String], now: Instant) -> Vec<Action> {
        self.apply(server_id, now, |ctx| {
            if !ctx.session.metadata.enabled() {
                return;
            }
            let keys: Vec<String> = CHANNEL_LIST_KEYS.iter().map(|k| k.to_string()).collect();
            for channel in ctx.session.metadata.channels.request(channels, now) {
                ctx.send(commands::metadata_get(&channel, &keys));
            }
        })
    }

    pub fn channel_list_metadata(&self, server_id: ServerId, channel: &str, now: Instant) -> Option<ChannelListEntry> {
        self.sessions
            .get(&server_id)?
            .metadata
            .channels
            .get(channel, now)
            .cloned()
    }

    // --- view state ---

    /// Show a context and clear its unread state.
    pub fn select(&mut self, server_id: ServerId, target: MessageTarget) {
        self.mutate(|state, _| {
            state.selected = Some(Selection {
                server_id,
                target: target.clone(),
            });
            clear_unread(state, server_id, &target);
        });
    }

    pub fn mark_read(&mut self, server_id: ServerId, target: &MessageTarget) {
        self.mutate(|state, _| clear_unread(state, server_id, target));
    }

    /// Open (or return to) a private chat and watch the peer's presence.
    pub fn open_private_chat(&mut self, server_id: ServerId, nick: &str) -> Vec<Action> {
        self.apply(server_id, Instant::now(), |ctx| {
            let existed = ctx.server().is_some_and(|s| s.private_chat(nick).is_some());
            handler::ensure_private_chat(ctx, nick);
            let monitor = ctx
                .server()
                .is_some_and(|s| s.registered && s.isupport.contains_key("MONITOR"));
            if !existed && monitor {
                ctx.send(commands::monitor_add(&[nick.to_string()]));
            }
        })
    }

    pub fn pin_private_chat(&mut self, server_id: ServerId, nick: &str) -> Vec<Action> {
        self.apply(server_id, Instant::now(), |ctx| {
            handler::ensure_private_chat(ctx, nick);
            let key = ctx.server_key();
            let pins = ctx.persist.pinned.entry(key).or_default();
            let order = match pins.iter().find(|p| p.username.eq_ignore_ascii_case(nick)) {
                Some(p) => p.order,
                None => {
                    let order = pins.iter().map(|p| p.order + 1).max().unwrap_or(0);
                    pins.push(PinnedChat {
                        username: nick.to_string(),
                        order,
                    });
                    order
                }
            };
            ctx.persist.save_pinned();
            if let Some(pm) = ctx.server_mut().and_then(|s| s.private_chat_mut(nick)) {
                pm.pinned = true;
                pm.pin_order = Some(order);
            }
        })
    }

    pub fn unpin_private_chat(&mut self, server_id: ServerId, nick: &str) -> Vec<Action> {
        self.apply(server_id, Instant::now(), |ctx| {
            let key = ctx.server_key();
            if let Some(pins) = ctx.persist.pinned.get_mut(&key) {
                pins.retain(|p| !p.username.eq_ignore_ascii_case(nick));
                ctx.persist.save_pinned();
            }
            if let Some(pm) = ctx.server_mut().and_then(|s| s.private_chat_mut(nick)) {
                pm.pinned = false;
                pm.pin_order = None;
            }
        })
    }

    /// Reorder the channel list. Channels not named keep their relative order
    /// after the named ones.
    pub fn reorder_channels(&mut self, server_id: ServerId, order: &[String]) {
        self.mutate(|state, persist| {
            let Some(server) = state.server_mut(server_id) else {
                return;
            };
            let rank = |name: &str| {
                order
                    .iter()
                    .position(|o| o.eq_ignore_ascii_case(name))
                    .unwrap_or(order.len())
            };
            server.channels.sort_by_key(|c| rank(&c.name));
            let names = server.channels.iter().map(|c| c.name.clone()).collect();
            persist.channel_order.insert(server_key(&server.host), names);
            persist.save_channel_order();
        });
    }

    pub fn update_settings(&mut self, settings: GlobalSettings) {
        self.mutate(|state, persist| {
            state.settings = settings.clone();
            persist.settings = settings;
            persist.save_settings();
        });
    }

    // --- typed input ---

    /// A line typed by the user: a slash command, or a message to the
    /// selected context.
    pub fn handle_input(&mut self, input: &str) -> Vec<Action> {
        let selected = self.state.selected.clone();
        let Some(Selection { server_id, target }) = selected else {
            warn!("input without a selected server ignored");
            return Vec::new();
        };
        let current = match &target {
            MessageTarget::Channel(name) | MessageTarget::PrivateChat(name) => Some(name.clone()),
            MessageTarget::Server => None,
        };

        if !input.trim_start().starts_with('/') {
            return match current {
                Some(t) => self.send_message(server_id, &t, input, false),
                None => self.server_notice(server_id, "Select a channel or conversation to send messages"),
            };
        }

        let Some(command) = parse_command(input) else {
            return self.server_notice(server_id, format!("Unknown command: {}", input.trim()));
        };
        let channel_or_current = |channel: Option<String>| channel.or_else(|| current.clone());
        match command {
            Command::Join { channel } => self.join(server_id, &channel),
            Command::Part { channel, reason } => match channel_or_current(channel) {
                Some(c) => self.part(server_id, &c, reason.as_deref()),
                None => Vec::new(),
            },
            Command::Nick { nick } => self.change_nick(server_id, &nick),
            Command::Msg { target, text } => self.send_message(server_id, &target, &text, false),
            Command::Query { nick } => {
                let actions = self.open_private_chat(server_id, &nick);
                self.select(server_id, MessageTarget::PrivateChat(nick));
                actions
            }
            Command::Me { text } => match current.as_deref() {
                Some(t) => self.send_message(server_id, t, &text, true),
                None => Vec::new(),
            },
            Command::Kick {
                channel,
                user,
                reason,
            } => match channel_or_current(channel) {
                Some(c) => self.kick(server_id, &c, &user, reason.as_deref()),
                None => Vec::new(),
            },
            Command::Mode {
                target,
                modes,
                args,
            } => self.set_mode(server_id, &target, &modes, &args),
            Command::Topic { channel, text } => match (channel_or_current(channel), text) {
                (Some(c), Some(t)) => self.set_topic(server_id, &c, &t),
                (Some(c), None) => self.send_line(server_id, commands::topic_query(&c)),
                (None, _) => Vec::new(),
            },
            Command::Whois { nick } => self.whois(server_id, &nick),
            Command::Who { target } => self.who(server_id, &target),
            Command::Oper { name, password } => self.oper(server_id, &name, &password),
            Command::React { msgid, emoji } => match current.as_deref() {
                Some(t) => self.react(server_id, t, &msgid, &emoji),
                None => Vec::new(),
            },
            Command::Unreact { msgid, emoji } => match current.as_deref() {
                Some(t) => self.unreact(server_id, t, &msgid, &emoji),
                None => Vec::new(),
            },
            Command::MetaGet { target, keys } => self.metadata_get(server_id, &target, &keys),
            Command::MetaSet { target, key, value } => {
                self.metadata_set(server_id, &target, &key, value.as_deref())
            }
            Command::MetaList { target } => self.metadata_list(server_id, &target),
            Command::MetaSub { keys } => self.metadata_subscribe(server_id, &keys),
            Command::MetaUnsub { keys } => self.metadata_unsubscribe(server_id, &keys),
            Command::Away { message } => self.set_away(server_id, message.as_deref()),
            Command::Register {
                account,
                email,
                password,
            } => self.register_account(server_id, &account, email.as_deref(), &password),
            Command::Verify { account, code } => self.verify_account(server_id, &account, &code),
            Command::Raw { line } => self.send_line(server_id, line),
            Command::List => self.list_channels(server_id),
            Command::Quit { message } => self.quit_all(message.as_deref()),
        }
    }

    fn server_notice(&mut self, server_id: ServerId, text: impl Into<String>) -> Vec<Action> {
        let text = text.into();
        self.apply(server_id, Instant::now(), |ctx| {
            ctx.server_message(MessageKind::System, text)
        })
    }

    /// Messages of one context, oldest first.
    pub fn messages(&self, server_id: ServerId, target: &MessageTarget) -> &[Message] {
        self.state
            .server(server_id)
            .and_then(|s| s.messages_for(target))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn clear_unread(state: &mut StoreState, server_id: ServerId, target: &MessageTarget) {
    let Some(server) = state.server_mut(server_id) else {
        return;
    };
    match target {
        MessageTarget::Channel(name) => {
            if let Some(c) = server.channel_mut(name) {
                c.unread = 0;
                c.mentioned = false;
            }
        }
        MessageTarget::PrivateChat(nick) => {
            if let Some(p) = server.private_chat_mut(nick) {
                p.unread = 0;
                p.mentioned = false;
            }
        }
        MessageTarget::Server => {}
    }
}

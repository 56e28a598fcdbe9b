//! Connection lifecycle: CAP/SASL, registration replies, `ready` and LIST.

use tracing::{debug, info, warn};

use super::Ctx;
use crate::app::action::{Action, NotificationKind};
use crate::app::state::{ListedChannel, MessageKind};
use crate::irc::caps::CapEffect;
use crate::irc::commands;
use crate::irc::event::ConnectionStatus;
use crate::irc::metadata;

/// Carry out what the capability sequencer asked for.
pub(crate) fn apply_cap_effects(ctx: &mut Ctx<'_>, effects: Vec<CapEffect>) {
    for effect in effects {
        match effect {
            CapEffect::Send(line) => ctx.send(line),
            CapEffect::LinkSecurityWarning { level } => {
                let host = match ctx.server_mut() {
                    Some(server) => {
                        server.link_warning_pending = true;
                        server.host.clone()
                    }
                    None => continue,
                };
                ctx.notify(
                    NotificationKind::LinkSecurityWarning,
                    "Insecure server links",
                    format!(
                        "{} reports link security level {}. Traffic between its servers may not be encrypted.",
                        host, level
                    ),
                );
            }
            CapEffect::SaslFailed { code, message } => {
                ctx.notify(
                    NotificationKind::SaslFailed,
                    "SASL authentication failed",
                    format!("{} ({})", message, code),
                );
                ctx.server_message(
                    MessageKind::System,
                    format!("SASL authentication failed: {}", message),
                );
            }
            CapEffect::SaslSucceeded => {
                ctx.server_message(MessageKind::System, "SASL authentication successful");
            }
            CapEffect::RegistrationDiscarded => {
                ctx.notify(
                    NotificationKind::RegistrationDiscarded,
                    "Account registration unavailable",
                    "The server does not support account registration",
                );
            }
            CapEffect::Finished => {
                if let Some(server) = ctx.server_mut() {
                    server.link_warning_pending = false;
                }
                debug!(server_id = ctx.server_id, "CAP END sent");
            }
            CapEffect::Abort => {
                if let Some(server) = ctx.server_mut() {
                    server.link_warning_pending = false;
                }
                ctx.actions.push(Action::Disconnect {
                    server_id: ctx.server_id,
                    message: None,
                });
            }
        }
    }
}

/// Mirror negotiated capabilities onto the server record.
fn sync_caps(ctx: &mut Ctx<'_>) {
    let acked = ctx.session.caps.acked().clone();
    let link_security = ctx.session.caps.link_security();
    ctx.session
        .metadata
        .set_enabled(metadata::is_supported(acked.iter()));
    if let Some(server) = ctx.server_mut() {
        server.capabilities = acked;
        server.link_security = link_security;
    }
}

pub(super) fn on_cap_ls(ctx: &mut Ctx<'_>, caps: &[(String, Option<String>)], more: bool) {
    let effects = ctx.session.caps.on_ls(caps, more);
    sync_caps(ctx);
    apply_cap_effects(ctx, effects);
}

pub(super) fn on_cap_ack(ctx: &mut Ctx<'_>, caps: &[String]) {
    let effects = ctx.session.caps.on_ack(caps);
    sync_caps(ctx);
    apply_cap_effects(ctx, effects);
}

pub(super) fn on_cap_nak(ctx: &mut Ctx<'_>, caps: &[String]) {
    let effects = ctx.session.caps.on_nak(caps);
    sync_caps(ctx);
    apply_cap_effects(ctx, effects);
}

pub(super) fn on_authenticate(ctx: &mut Ctx<'_>, param: &str) {
    let effects = ctx.session.caps.on_authenticate(param);
    apply_cap_effects(ctx, effects);
}

pub(super) fn on_sasl_outcome(ctx: &mut Ctx<'_>, success: bool, code: u16, message: &str) {
    let effects = ctx.session.caps.on_sasl_outcome(success, code, message);
    apply_cap_effects(ctx, effects);
}

pub(super) fn on_register_success(ctx: &mut Ctx<'_>, account: &str, message: &str) {
    info!(server_id = ctx.server_id, account, "account registered");
    ctx.notify(
        NotificationKind::RegistrationSuccess,
        "Account registered",
        format!("{}: {}", account, message),
    );
    ctx.server_message(
        MessageKind::System,
        format!("Account {} registered: {}", account, message),
    );
    let effects = ctx.session.caps.on_registration_done();
    apply_cap_effects(ctx, effects);
}

pub(super) fn on_verification_required(ctx: &mut Ctx<'_>, account: &str, message: &str) {
    ctx.session.caps.on_verification_required();
    ctx.notify(
        NotificationKind::VerificationRequired,
        "Verification required",
        format!("{}: {}", account, message),
    );
    ctx.server_message(
        MessageKind::System,
        format!("Account {} needs verification: {}", account, message),
    );
}

pub(super) fn on_verify_success(ctx: &mut Ctx<'_>, account: &str, message: &str) {
    info!(server_id = ctx.server_id, account, "account verified");
    ctx.notify(
        NotificationKind::RegistrationSuccess,
        "Account verified",
        format!("{}: {}", account, message),
    );
    ctx.server_message(
        MessageKind::System,
        format!("Account {} verified: {}", account, message),
    );
    let effects = ctx.session.caps.on_registration_done();
    apply_cap_effects(ctx, effects);
}

pub(super) fn on_extjwt(ctx: &mut Ctx<'_>, target: &str, token: String) {
    debug!(server_id = ctx.server_id, target, len = token.len(), "EXTJWT token received");
    if let Some(server) = ctx.server_mut() {
        server.jwt_token = Some(token);
    }
}

pub(super) fn on_youre_oper(ctx: &mut Ctx<'_>, message: &str) {
    let nick = ctx.own_nick();
    if let Some(server) = ctx.server_mut() {
        server.is_oper = true;
        for ch in server.channels.iter_mut() {
            if let Some(me) = ch.user_mut(&nick) {
                me.is_oper = true;
            }
        }
    }
    ctx.server_message(MessageKind::System, message);
}

pub(super) fn on_connection_state(ctx: &mut Ctx<'_>, status: ConnectionStatus) {
    match status {
        ConnectionStatus::Connecting => {
            if let Some(server) = ctx.server_mut() {
                server.status = ConnectionStatus::Connecting;
            }
        }
        ConnectionStatus::Connected => transport_up(ctx),
        ConnectionStatus::Disconnected => transport_down(ctx),
    }
}

/// Socket is open: start CAP negotiation and register.
fn transport_up(ctx: &mut Ctx<'_>) {
    let Some(server) = ctx.server_mut() else {
        return;
    };
    server.status = ConnectionStatus::Connecting;
    server.registered = false;
    let host = server.host.clone();
    let nickname = server.nickname.clone();
    info!(server_id = ctx.server_id, host = %host, "transport connected, registering");

    ctx.session.reset();
    let saved = ctx.persist.saved_server(&host).cloned();
    if let Some(saved) = &saved {
        ctx.session.caps.set_credentials(saved.sasl_credentials());
        ctx.session
            .caps
            .set_skip_link_warning(saved.skip_link_security_warning);
    }
    let effects = ctx.session.caps.begin();
    apply_cap_effects(ctx, effects);

    let username = saved
        .as_ref()
        .and_then(|s| s.username.clone())
        .unwrap_or_else(|| nickname.clone());
    let realname = saved
        .as_ref()
        .and_then(|s| s.realname.clone())
        .unwrap_or_else(|| nickname.clone());
    if let Some(password) = saved.as_ref().and_then(|s| s.password.as_deref()) {
        ctx.send(commands::pass(password));
    }
    ctx.send(commands::nick(&nickname));
    ctx.send(commands::user(&username, &realname));
}

/// Socket closed: everything learned on this connection is stale.
fn transport_down(ctx: &mut Ctx<'_>) {
    let sid = ctx.server_id;
    ctx.session.reset();
    ctx.timers.cancel_server(sid);
    let Some(server) = ctx.server_mut() else {
        return;
    };
    info!(server_id = sid, host = %server.host, "disconnected");
    server.status = ConnectionStatus::Disconnected;
    server.registered = false;
    server.capabilities.clear();
    server.link_warning_pending = false;
    server.is_away = false;
    server.is_oper = false;
    server.user_modes.clear();
    server.channel_list_loading = false;
    for ch in server.channels.iter_mut() {
        ch.users.clear();
        ch.typing.clear();
        ch.loading = false;
        ch.needs_who = false;
    }
    for pm in server.private_chats.iter_mut() {
        pm.typing.clear();
        pm.is_online = false;
    }
}

pub(super) fn on_ready(ctx: &mut Ctx<'_>, nickname: &str, server_name: Option<&str>) {
    let sid = ctx.server_id;
    let Some(server) = ctx.server_mut() else {
        return;
    };
    server.status = ConnectionStatus::Connected;
    server.registered = true;
    server.nickname = nickname.to_string();
    let host = server.host.clone();
    let supports_monitor = server.isupport.contains_key("MONITOR");
    let mut monitor: Vec<String> = server
        .private_chats
        .iter()
        .map(|p| p.username.clone())
        .collect();
    info!(server_id = sid, nick = nickname, server = ?server_name, "registered");
    ctx.server_message(
        MessageKind::System,
        format!("Connected to {} as {}", server_name.unwrap_or(&host), nickname),
    );

    let keys = ctx.config.metadata.subscribe_keys.clone();
    for line in ctx.session.metadata.begin(&keys) {
        ctx.send(line);
    }

    let saved = ctx.persist.saved_server(&host).cloned();
    if let Some(saved) = &saved {
        for channel in &saved.channels {
            ctx.send(commands::join(channel));
        }
    }

    let key = ctx.server_key();
    if let Some(pinned) = ctx.persist.pinned.get(&key) {
        for p in pinned {
            if !monitor.iter().any(|m| m.eq_ignore_ascii_case(&p.username)) {
                monitor.push(p.username.clone());
            }
        }
    }
    if supports_monitor && !monitor.is_empty() {
        ctx.send(commands::monitor_add(&monitor));
    }

    if let Some(saved) = saved.filter(|s| s.oper_on_connect) {
        match (&saved.oper_name, &saved.oper_password) {
            (Some(name), Some(password)) => ctx.send(commands::oper(name, password)),
            _ => warn!(server_id = sid, "oper on connect set without credentials"),
        }
    }
}

pub(super) fn on_list_channel(ctx: &mut Ctx<'_>, channel: String, user_count: u32, topic: String) {
    if let Some(server) = ctx.server_mut() {
        if !server.channel_list_loading {
            server.channel_list.clear();
            server.channel_list_loading = true;
        }
        server.channel_list.push(ListedChannel {
            name: channel,
            user_count,
            topic,
        });
    }
}

pub(super) fn on_list_end(ctx: &mut Ctx<'_>) {
    if let Some(server) = ctx.server_mut() {
        server.channel_list_loading = false;
        debug!(server_id = server.id, channels = server.channel_list.len(), "channel list complete");
    }
}

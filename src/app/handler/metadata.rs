//! `draft/metadata` replies and notifications.
//!
//! Values land in three places: the in-memory record they describe (our own
//! server entry, a channel, or every record of a user), the persisted cache,
//! and for channels the channel-list cache. While our own keys are being
//! fetched after `ready`, empty answers never clear local values.

use std::time::Duration;

use tracing::{debug, info};

use super::Ctx;
use crate::app::state::MessageKind;
use crate::app::timers::TimerKind;
use crate::irc::metadata::{merge_server_value, resolve_target, MetadataMap, MetadataValue};

/// Wait used when a rate-limit reply carries no retry hint.
const DEFAULT_RETRY: Duration = Duration::from_secs(5);

/// Write (or with `None`, delete) one key on whatever `target` names.
fn store_value(ctx: &mut Ctx<'_>, target: &str, key: &str, visibility: &str, value: Option<&str>) {
    let value = value.filter(|v| !v.is_empty());
    let is_channel = ctx.is_channel(target);
    let is_me = ctx.is_me(target);
    let apply = |map: &mut MetadataMap| match value {
        Some(v) => {
            map.insert(key.to_string(), MetadataValue::new(v, visibility));
        }
        None => {
            map.remove(key);
        }
    };

    if let Some(server) = ctx.server_mut() {
        if is_channel {
            if let Some(ch) = server.channel_mut(target) {
                apply(&mut ch.metadata);
            }
        } else {
            if is_me {
                apply(&mut server.metadata);
            }
            for ch in server.channels.iter_mut() {
                if let Some(u) = ch.user_mut(target) {
                    apply(&mut u.metadata);
                }
            }
            if let Some(pm) = server.private_chat_mut(target) {
                apply(&mut pm.metadata);
            }
        }
    }

    let server_key = ctx.server_key();
    match value {
        Some(v) => ctx
            .persist
            .metadata
            .set(&server_key, target, key, MetadataValue::new(v, visibility)),
        None => {
            ctx.persist.metadata.remove(&server_key, target, key);
        }
    }
    ctx.persist.save_metadata();
}

/// Local change to one of our own keys, made by the user.
pub(crate) fn apply_own_value(ctx: &mut Ctx<'_>, key: &str, value: Option<&str>) {
    let me = ctx.own_nick();
    store_value(ctx, &me, key, "*", value);
}

/// A reply for one of our own keys during the post-`ready` fetch.
fn own_fetch_answer(ctx: &mut Ctx<'_>, key: &str, visibility: &str, value: Option<&str>) {
    let value = value.filter(|v| !v.is_empty());
    ctx.session.metadata.own_answered(key, value.is_some());
    if let Some(v) = value {
        let changed = ctx
            .server_mut()
            .is_some_and(|s| merge_server_value(&mut s.metadata, key, v, visibility));
        if changed {
            debug!(key, "own metadata updated from server");
            let me = ctx.own_nick();
            store_value(ctx, &me, key, visibility, Some(v));
        }
    } else {
        debug!(key, "server has no value, keeping local");
    }
    finish_own_fetch(ctx);
}

/// Once every key was answered, push local values the server lacks.
fn finish_own_fetch(ctx: &mut Ctx<'_>) {
    if !ctx.session.metadata.fetch_complete() {
        return;
    }
    let local = ctx.server().map(|s| s.metadata.clone()).unwrap_or_default();
    let lines = ctx.session.metadata.finish_fetch(&local);
    info!(server_id = ctx.server_id, pushed = lines.len(), "own metadata synchronised");
    for line in lines {
        ctx.send(line);
    }
}

fn on_value(ctx: &mut Ctx<'_>, target: &str, key: &str, visibility: &str, value: Option<&str>) {
    if !ctx.session.metadata.enabled() {
        debug!(target, key, "metadata without capability ignored");
        return;
    }
    let own = ctx.own_nick();
    let resolved = resolve_target(target, &own);
    if ctx.is_channel(&resolved) {
        let now = ctx.now;
        ctx.session
            .metadata
            .channels
            .record(&resolved, key, value, now);
    }
    if ctx.is_me(&resolved) && ctx.session.metadata.is_fetching() {
        own_fetch_answer(ctx, key, visibility, value);
        return;
    }
    store_value(ctx, &resolved, key, visibility, value);
}

pub(super) fn on_metadata(ctx: &mut Ctx<'_>, target: &str, key: &str, visibility: &str, value: Option<&str>) {
    on_value(ctx, target, key, visibility, value);
}

pub(super) fn on_key_value(ctx: &mut Ctx<'_>, target: &str, key: &str, visibility: &str, value: &str) {
    on_value(ctx, target, key, visibility, Some(value));
}

pub(super) fn on_key_not_set(ctx: &mut Ctx<'_>, target: &str, key: &str) {
    on_value(ctx, target, key, "*", None);
}

pub(super) fn on_subscribed(ctx: &mut Ctx<'_>, keys: &[String]) {
    ctx.session.metadata.add_subscriptions(keys);
    let subs = ctx.session.metadata.subscriptions().clone();
    if let Some(server) = ctx.server_mut() {
        server.metadata_subscriptions = subs;
    }
}

pub(super) fn on_unsubscribed(ctx: &mut Ctx<'_>, keys: &[String]) {
    ctx.session.metadata.remove_subscriptions(keys);
    let subs = ctx.session.metadata.subscriptions().clone();
    if let Some(server) = ctx.server_mut() {
        server.metadata_subscriptions = subs;
    }
}

pub(super) fn on_fail(
    ctx: &mut Ctx<'_>,
    code: &str,
    target: Option<&str>,
    key: Option<&str>,
    retry_after: Option<u64>,
    message: &str,
) {
    let own = ctx.own_nick();
    let resolved = target.map(|t| resolve_target(t, &own));

    if code == "RATE_LIMITED" {
        if let (Some(target), Some(key)) = (resolved, key) {
            let delay = retry_after.map(Duration::from_secs).unwrap_or(DEFAULT_RETRY);
            debug!(target = %target, key, ?delay, "metadata rate limited, retrying");
            let sid = ctx.server_id;
            ctx.schedule(
                delay,
                TimerKind::MetadataRetry {
                    server_id: sid,
                    target,
                    key: key.to_string(),
                },
            );
        }
        return;
    }

    if let (Some(target), Some(key)) = (resolved.as_deref(), key) {
        if ctx.is_channel(target) {
            let now = ctx.now;
            ctx.session.metadata.channels.record(target, key, None, now);
        }
        if ctx.is_me(target) && ctx.session.metadata.is_fetching() {
            ctx.session.metadata.own_answered(key, false);
            finish_own_fetch(ctx);
            return;
        }
    }

    ctx.server_message(
        MessageKind::System,
        format!("METADATA {}: {}", code, message),
    );
}

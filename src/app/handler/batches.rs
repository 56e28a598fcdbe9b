//! What happens when a `BATCH` closes.
//!
//! Netsplit and netjoin batches are folded into one line per channel.
//! Users lost in a split are remembered with their position in the member
//! list so a netjoin puts them back exactly where they were.

use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, info};

use super::membership::{member_join, with_reason, JoinInfo};
use super::Ctx;
use crate::app::state::{Message, MessageKind, MessageTarget, NetsplitInfo, User};
use crate::app::timers::TimerKind;
use crate::irc::batch::{Batch, BatchKind};
use crate::irc::event::IrcEvent;

/// A member removed by a netsplit.
#[derive(Debug, Clone)]
pub(crate) struct SplitRecord {
    pub channel: String,
    pub index: usize,
    pub user: User,
    pub at: Instant,
}

/// Forget split members whose netjoin never came.
fn prune_split_records(ctx: &mut Ctx<'_>) {
    let Some(cutoff) = ctx.now.checked_sub(ctx.config.behavior.netsplit_memory()) else {
        return;
    };
    let before: usize = ctx.session.netsplit.values().map(Vec::len).sum();
    ctx.session.netsplit.retain(|_, list| {
        list.retain(|r| r.at > cutoff);
        !list.is_empty()
    });
    let after: usize = ctx.session.netsplit.values().map(Vec::len).sum();
    if after < before {
        debug!(server_id = ctx.server_id, dropped = before - after, "expired netsplit records");
    }
}

pub(super) fn on_batch_start(
    ctx: &mut Ctx<'_>,
    id: &str,
    kind: &str,
    params: Vec<String>,
    parent: Option<String>,
) {
    let history_target = match BatchKind::parse(kind) {
        BatchKind::Chathistory => params.first().cloned(),
        _ => None,
    };
    let now = ctx.now;
    ctx.session.batches.start(id, kind, params, parent, now);
    if let Some(target) = history_target.filter(|t| ctx.is_channel(t)) {
        set_loading(ctx, &target, true);
    }
}

pub(super) fn on_batch_end(ctx: &mut Ctx<'_>, id: &str) {
    let Some(batch) = ctx.session.batches.finish(id) else {
        debug!(batch = id, "end of unknown batch");
        return;
    };
    match batch.kind {
        BatchKind::Netsplit => netsplit(ctx, batch),
        BatchKind::Netjoin => netjoin(ctx, batch),
        BatchKind::Chathistory => end_chathistory(ctx, batch),
        BatchKind::Multiline => {}
        BatchKind::Metadata => {
            let now = ctx.now;
            ctx.session.metadata.channels.settle_in_flight(now);
        }
        BatchKind::Other(_) => replay_unknown_batch(ctx, batch),
    }
}

pub(super) fn set_loading(ctx: &mut Ctx<'_>, channel: &str, loading: bool) {
    if let Some(ch) = ctx.server_mut().and_then(|s| s.channel_mut(channel)) {
        ch.loading = loading;
    }
}

/// Batch types without special handling: apply what they carried as if it
/// had arrived unbatched.
fn replay_unknown_batch(ctx: &mut Ctx<'_>, batch: Batch) {
    debug!(batch = %batch.id, kind = batch.kind.as_str(), events = batch.events.len(), "replaying batch");
    for event in batch.events {
        super::apply(ctx, event);
    }
}

fn end_chathistory(ctx: &mut Ctx<'_>, batch: Batch) {
    let Some(target) = batch.params.first().cloned() else {
        return;
    };
    let show = ctx.state.settings.show_join_part;
    for event in batch.events {
        let (kind, nick, content, tags) = match event {
            IrcEvent::Join {
                nick, channel, tags, ..
            } => {
                let content = format!("{} has joined {}", nick, channel);
                (MessageKind::Join, nick, content, tags)
            }
            IrcEvent::Part {
                nick,
                channel,
                reason,
                tags,
                ..
            } => {
                let content = with_reason(format!("{} has left {}", nick, channel), reason.as_deref());
                (MessageKind::Part, nick, content, tags)
            }
            IrcEvent::Quit {
                nick, reason, tags, ..
            } => {
                let content = with_reason(format!("{} has quit", nick), reason.as_deref());
                (MessageKind::Quit, nick, content, tags)
            }
            other => {
                super::apply(ctx, other);
                continue;
            }
        };
        if !show {
            continue;
        }
        let ts = ctx.timestamp(&tags);
        let context = if ctx.is_channel(&target) {
            MessageTarget::Channel(target.clone())
        } else {
            MessageTarget::PrivateChat(target.clone())
        };
        let mut msg = Message::new(ctx.server_id, context, kind, &nick, content, ts);
        msg.msgid = tags.get("msgid").cloned();
        ctx.add_message(msg);
    }

    if !ctx.is_channel(&target) {
        return;
    }
    set_loading(ctx, &target, false);
    let needs_who = ctx
        .server()
        .and_then(|s| s.channel(&target))
        .is_some_and(|c| c.needs_who);
    if needs_who {
        let delay = ctx.config.behavior.who_delay();
        let sid = ctx.server_id;
        ctx.schedule(
            delay,
            TimerKind::Who {
                server_id: sid,
                channel: target,
            },
        );
    }
}

fn split_label(servers: &(String, String)) -> String {
    format!("{} <-> {}", servers.0, servers.1)
}

fn netsplit(ctx: &mut Ctx<'_>, batch: Batch) {
    prune_split_records(ctx);
    let servers = batch.server_pair().unwrap_or_default();
    let mut quitters: Vec<String> = Vec::new();
    let mut ts = None;
    for event in batch.events {
        match event {
            IrcEvent::Quit { nick, tags, .. } if !ctx.is_me(&nick) => {
                ts.get_or_insert_with(|| ctx.timestamp(&tags));
                if !quitters.iter().any(|q| q.eq_ignore_ascii_case(&nick)) {
                    quitters.push(nick);
                }
            }
            other => super::apply(ctx, other),
        }
    }
    if quitters.is_empty() {
        return;
    }
    let ts = ts.unwrap_or(ctx.wall);
    info!(server_id = ctx.server_id, split = %split_label(&servers), users = quitters.len(), "netsplit");

    let now = ctx.now;
    let names: Vec<String> = ctx
        .server()
        .map(|s| s.channels.iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default();
    for name in names {
        let Some(ch) = ctx.server_mut().and_then(|s| s.channel_mut(&name)) else {
            continue;
        };
        // Indices are taken before anything is removed.
        let hits: Vec<usize> = ch
            .users
            .iter()
            .enumerate()
            .filter(|(_, u)| quitters.iter().any(|q| q.eq_ignore_ascii_case(&u.username)))
            .map(|(i, _)| i)
            .collect();
        if hits.is_empty() {
            continue;
        }
        let mut removed = Vec::with_capacity(hits.len());
        for &index in hits.iter().rev() {
            let user = ch.users.remove(index);
            removed.push(SplitRecord {
                channel: name.clone(),
                index,
                user,
                at: now,
            });
        }
        removed.reverse();

        let users: Vec<String> = removed.iter().map(|r| r.user.username.clone()).collect();
        for record in removed {
            let nick = record.user.username.clone();
            ctx.stop_typing(&name, &nick);
            ctx.session
                .netsplit
                .entry(nick.to_lowercase())
                .or_default()
                .push(record);
        }
        let mut msg = Message::new(
            ctx.server_id,
            MessageTarget::Channel(name.clone()),
            MessageKind::Netsplit,
            "",
            format!("Netsplit {}: {} quit", split_label(&servers), users.join(", ")),
            ts,
        );
        msg.netsplit = Some(NetsplitInfo {
            servers: servers.clone(),
            users,
            rejoined: false,
        });
        ctx.add_message(msg);
    }

    for nick in &quitters {
        ctx.stop_typing(nick, nick);
        if let Some(pm) = ctx.server_mut().and_then(|s| s.private_chat_mut(nick)) {
            pm.is_online = false;
        }
    }
}

/// Put back users a netsplit removed, in their original positions. Returns
/// the nicks that had no record.
fn restore_members(ctx: &mut Ctx<'_>, channel: &str, nicks: &[String]) -> Vec<String> {
    let mut records = Vec::new();
    let mut unknown = Vec::new();
    for nick in nicks {
        let key = nick.to_lowercase();
        let found = ctx.session.netsplit.get_mut(&key).and_then(|list| {
            let pos = list
                .iter()
                .position(|r| r.channel.eq_ignore_ascii_case(channel))?;
            Some(list.remove(pos))
        });
        if ctx.session.netsplit.get(&key).is_some_and(|l| l.is_empty()) {
            ctx.session.netsplit.remove(&key);
        }
        match found {
            Some(r) => records.push(r),
            None => unknown.push(nick.clone()),
        }
    }
    records.sort_by_key(|r| r.index);
    if let Some(ch) = ctx.server_mut().and_then(|s| s.channel_mut(channel)) {
        for record in records {
            if ch.has_user(&record.user.username) {
                continue;
            }
            let index = record.index.min(ch.users.len());
            ch.users.insert(index, record.user);
        }
    }
    unknown
}

fn netjoin(ctx: &mut Ctx<'_>, batch: Batch) {
    prune_split_records(ctx);
    let servers = batch.server_pair().unwrap_or_default();
    // channel -> joined nicks, in arrival order
    let mut per_channel: Vec<(String, Vec<String>)> = Vec::new();
    let mut joins = Vec::new();
    let mut ts = None;
    for event in batch.events {
        match event {
            IrcEvent::Join {
                ref nick,
                ref channel,
                ref tags,
                ..
            } if !ctx.is_me(nick) => {
                ts.get_or_insert_with(|| ctx.timestamp(tags));
                match per_channel
                    .iter_mut()
                    .find(|(c, _)| c.eq_ignore_ascii_case(channel))
                {
                    Some((_, nicks)) => nicks.push(nick.clone()),
                    None => per_channel.push((channel.clone(), vec![nick.clone()])),
                }
                joins.push(event);
            }
            other => super::apply(ctx, other),
        }
    }
    if per_channel.is_empty() {
        return;
    }
    let ts = ts.unwrap_or(ctx.wall);
    info!(server_id = ctx.server_id, split = %split_label(&servers), "netjoin");

    for (channel, nicks) in &per_channel {
        let unknown = restore_members(ctx, channel, nicks);
        for event in &joins {
            if let IrcEvent::Join {
                nick,
                hostmask,
                channel: ch,
                account,
                realname,
                tags,
                ..
            } = event
            {
                if !ch.eq_ignore_ascii_case(channel) || !unknown.contains(nick) {
                    continue;
                }
                member_join(
                    ctx,
                    &JoinInfo {
                        nick,
                        hostmask: hostmask.as_deref(),
                        channel: ch,
                        account: account.as_deref(),
                        realname: realname.as_deref(),
                        tags,
                    },
                    false,
                );
            }
        }
        for nick in nicks {
            if let Some(pm) = ctx.server_mut().and_then(|s| s.private_chat_mut(nick)) {
                pm.is_online = true;
            }
        }
    }

    // Rewrite the split lines of this server pair wherever they are shown.
    let label = split_label(&servers);
    let mut rewritten: HashSet<String> = HashSet::new();
    if let Some(server) = ctx.server_mut() {
        for ch in server.channels.iter_mut() {
            for msg in ch.messages.iter_mut() {
                let Some(info) = msg.netsplit.as_mut() else {
                    continue;
                };
                if msg.kind != MessageKind::Netsplit || info.rejoined || info.servers != servers {
                    continue;
                }
                info.rejoined = true;
                msg.kind = MessageKind::Netjoin;
                msg.content = format!("Netsplit {} over: {} rejoined", label, info.users.join(", "));
                rewritten.insert(ch.name.to_lowercase());
            }
        }
    }

    for (channel, nicks) in per_channel {
        if rewritten.contains(&channel.to_lowercase()) {
            continue;
        }
        if ctx.server().and_then(|s| s.channel(&channel)).is_none() {
            continue;
        }
        let mut msg = Message::new(
            ctx.server_id,
            MessageTarget::Channel(channel),
            MessageKind::Netjoin,
            "",
            format!("Netjoin {}: {} joined", label, nicks.join(", ")),
            ts,
        );
        msg.netsplit = Some(NetsplitInfo {
            servers: servers.clone(),
            users: nicks,
            rejoined: true,
        });
        ctx.add_message(msg);
    }
}

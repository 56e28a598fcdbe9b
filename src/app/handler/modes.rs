//! MODE, ISUPPORT and the ban/exception/invite list replies.

use tracing::{debug, info};

use super::Ctx;
use crate::app::state::{Channel, ListEntry, MessageKind, MessageTarget};
use crate::irc::event::ListKind;
use crate::irc::modes::parse_modes;
use crate::irc::prefix::PrefixTable;

pub(super) fn on_mode(ctx: &mut Ctx<'_>, sender: &str, target: &str, modestring: &str, args: &[String]) {
    if !ctx.is_channel(target) {
        if ctx.is_me(target) {
            on_user_mode(ctx, modestring);
        }
        return;
    }
    let wall = ctx.wall;
    let Some(server) = ctx.server_mut() else {
        return;
    };
    let prefix = server.prefix.clone();
    let Some(channel) = server.channel_mut(target) else {
        debug!(channel = target, "MODE for unknown channel");
        return;
    };
    apply_channel_modes(channel, &prefix, sender, modestring, args, wall.timestamp());

    let mut summary = format!("{} sets mode {}", sender, modestring);
    for a in args {
        summary.push(' ');
        summary.push_str(a);
    }
    ctx.context_message(
        MessageTarget::Channel(target.to_string()),
        MessageKind::Mode,
        sender,
        summary,
        wall,
    );
}

/// Apply a parsed mode change set to one channel.
pub(crate) fn apply_channel_modes(
    channel: &mut Channel,
    prefix: &PrefixTable,
    sender: &str,
    modestring: &str,
    args: &[String],
    now: i64,
) {
    for change in parse_modes(modestring, args) {
        let add = change.is_add();
        if let Some(symbol) = prefix.symbol_for(change.mode) {
            let Some(nick) = change.arg.as_deref() else {
                continue;
            };
            if let Some(user) = channel.user_mut(nick) {
                user.status = if add {
                    prefix.insert(&user.status, symbol)
                } else {
                    prefix.remove(&user.status, symbol)
                };
            }
            continue;
        }

        // `I` never carries an argument with the fixed argument table, so
        // invite exceptions only change through the 346/347 list replies.
        let list = match change.mode {
            'b' => Some(&mut channel.bans),
            'e' => Some(&mut channel.exceptions),
            _ => None,
        };
        match (list, change.arg) {
            (Some(list), Some(mask)) => {
                if add {
                    upsert_entry(
                        list,
                        ListEntry {
                            mask,
                            setter: Some(sender.to_string()),
                            set_at: Some(now),
                        },
                    );
                } else {
                    list.retain(|e| e.mask != mask);
                }
            }
            (_, Some(_)) => {}
            (_, None) => {
                let has = channel.modes.contains(change.mode);
                if add && !has {
                    if channel.modes.is_empty() {
                        channel.modes.push('+');
                    }
                    channel.modes.push(change.mode);
                } else if !add && has {
                    channel.modes = channel.modes.chars().filter(|c| *c != change.mode).collect();
                    if channel.modes == "+" {
                        channel.modes.clear();
                    }
                }
            }
        }
    }
}

/// Later entries with the same mask replace earlier ones.
fn upsert_entry(list: &mut Vec<ListEntry>, entry: ListEntry) {
    list.retain(|e| e.mask != entry.mask);
    list.push(entry);
}

fn on_user_mode(ctx: &mut Ctx<'_>, modestring: &str) {
    let Some(server) = ctx.server_mut() else {
        return;
    };
    let no_args: [String; 0] = [];
    for change in parse_modes(modestring, &no_args) {
        let has = server.user_modes.contains(change.mode);
        if change.is_add() && !has {
            server.user_modes.push(change.mode);
        } else if !change.is_add() {
            server.user_modes.retain(|c| c != change.mode);
        }
    }
    server.is_oper = server.user_modes.contains('o');
    let modes = server.user_modes.clone();
    ctx.server_message(MessageKind::Mode, format!("Your modes are now +{}", modes));
}

pub(super) fn on_isupport(ctx: &mut Ctx<'_>, tokens: &[(String, Option<String>)]) {
    if let Some((_, Some(chantypes))) = tokens.iter().find(|(k, _)| k == "CHANTYPES") {
        ctx.session.decoder.set_chantypes(chantypes);
    }
    let Some(server) = ctx.server_mut() else {
        return;
    };
    for (key, value) in tokens {
        let value = value.clone().unwrap_or_default();
        match key.as_str() {
            "PREFIX" => {
                let table = PrefixTable::parse(&value);
                for ch in server.channels.iter_mut() {
                    for user in ch.users.iter_mut() {
                        user.status = table.sort(&user.status);
                    }
                }
                server.prefix = table;
            }
            "ELIST" => server.elist = Some(value.clone()),
            "ICON" | "draft/ICON" => server.favicon = Some(value.clone()),
            _ => {}
        }
        server.isupport.insert(key.clone(), value);
    }
    info!(server_id = server.id, count = tokens.len(), "ISUPPORT");
}

pub(super) fn on_list_entry(
    ctx: &mut Ctx<'_>,
    kind: ListKind,
    channel: &str,
    mask: &str,
    setter: Option<String>,
    set_at: Option<i64>,
) {
    let Some(ch) = ctx.server_mut().and_then(|s| s.channel_mut(channel)) else {
        return;
    };
    let list = match kind {
        ListKind::Ban => &mut ch.bans,
        ListKind::Exception => &mut ch.exceptions,
        ListKind::Invite => &mut ch.invites,
    };
    upsert_entry(
        list,
        ListEntry {
            mask: mask.to_string(),
            setter,
            set_at,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::state::User;

    fn channel() -> Channel {
        let mut c = Channel::new("#rust");
        c.add_user(User::new("alice"));
        c.add_user(User::new("bob"));
        c
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_status_symbols_follow_prefix_order() {
        let prefix = PrefixTable::parse("(ov)@+");
        let mut c = channel();
        apply_channel_modes(&mut c, &prefix, "op", "+v", &args(&["alice"]), 0);
        apply_channel_modes(&mut c, &prefix, "op", "+o", &args(&["alice"]), 0);
        assert_eq!(c.user("alice").unwrap().status, "@+");
        apply_channel_modes(&mut c, &prefix, "op", "-o", &args(&["alice"]), 0);
        assert_eq!(c.user("alice").unwrap().status, "+");
    }

    #[test]
    fn test_ban_add_replaces_same_mask() {
        let prefix = PrefixTable::default();
        let mut c = channel();
        apply_channel_modes(&mut c, &prefix, "op1", "+b", &args(&["*!*@bad"]), 10);
        apply_channel_modes(&mut c, &prefix, "op2", "+b", &args(&["*!*@bad"]), 20);
        assert_eq!(c.bans.len(), 1);
        assert_eq!(c.bans[0].setter.as_deref(), Some("op2"));
        assert_eq!(c.bans[0].set_at, Some(20));
        apply_channel_modes(&mut c, &prefix, "op1", "-b", &args(&["*!*@bad"]), 30);
        assert!(c.bans.is_empty());
    }

    #[test]
    fn test_mixed_modes() {
        let prefix = PrefixTable::default();
        let mut c = channel();
        apply_channel_modes(&mut c, &prefix, "op", "+ov-b+nt", &args(&["alice", "bob", "m!*@*"]), 0);
        assert_eq!(c.user("alice").unwrap().status, "@");
        assert_eq!(c.user("bob").unwrap().status, "+");
        assert_eq!(c.modes, "+nt");
        apply_channel_modes(&mut c, &prefix, "op", "-n", &args(&[]), 0);
        assert_eq!(c.modes, "+t");
        apply_channel_modes(&mut c, &prefix, "op", "-t", &args(&[]), 0);
        assert_eq!(c.modes, "");
    }

    #[test]
    fn test_exception_and_unknown_user() {
        let prefix = PrefixTable::default();
        let mut c = channel();
        apply_channel_modes(&mut c, &prefix, "op", "+eo", &args(&["ok!*@*", "ghost"]), 0);
        assert_eq!(c.exceptions.len(), 1);
        assert!(c.users.iter().all(|u| u.status.is_empty()));
    }
}

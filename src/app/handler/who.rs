//! WHO/WHOX, WHOIS and the presence updates that enrich user records.

use tracing::debug;

use super::Ctx;
use crate::app::state::{MessageKind, PrivateChat, User};
use crate::irc::event::{nick_of, WhoReply};
use crate::irc::prefix::PrefixTable;

/// Apply `f` to every channel record of `nick`.
fn update_members(ctx: &mut Ctx<'_>, nick: &str, mut f: impl FnMut(&mut User)) {
    if let Some(server) = ctx.server_mut() {
        for ch in server.channels.iter_mut() {
            if let Some(u) = ch.user_mut(nick) {
                f(u);
            }
        }
    }
}

fn update_private_chat(ctx: &mut Ctx<'_>, nick: &str, f: impl FnOnce(&mut PrivateChat)) {
    if let Some(pm) = ctx.server_mut().and_then(|s| s.private_chat_mut(nick)) {
        f(pm);
    }
}

/// Parsed WHO flags field, e.g. `G*@+` or `HB`.
#[derive(Debug, Default, PartialEq, Eq)]
struct WhoFlags {
    away: bool,
    oper: bool,
    bot: bool,
    status: String,
}

fn parse_flags(flags: &str, prefix: &PrefixTable, bot_flag: char) -> WhoFlags {
    let mut out = WhoFlags::default();
    let mut symbols = String::new();
    for c in flags.chars() {
        match c {
            'G' => out.away = true,
            'H' => out.away = false,
            '*' => out.oper = true,
            c if c == bot_flag => out.bot = true,
            c if prefix.is_symbol(c) => symbols.push(c),
            _ => {}
        }
    }
    out.status = prefix.sort(&symbols);
    out
}

/// `0` and `*` mean "not logged in".
fn account_of(account: Option<&str>) -> Option<String> {
    account
        .filter(|a| !a.is_empty() && *a != "0" && *a != "*")
        .map(str::to_string)
}

pub(super) fn on_who_reply(ctx: &mut Ctx<'_>, reply: &WhoReply) {
    let Some(server) = ctx.server() else {
        return;
    };
    let flags = parse_flags(&reply.flags, &server.prefix, server.bot_flag());
    let account = account_of(reply.account.as_deref());
    let realname = (!reply.realname.is_empty()).then(|| reply.realname.clone());

    if reply.channel == "*" {
        update_private_chat(ctx, &reply.nick, |pm| {
            pm.is_online = true;
            pm.is_away = flags.away;
            pm.is_bot |= flags.bot;
            if realname.is_some() {
                pm.realname = realname.clone();
            }
            if account.is_some() {
                pm.account = account.clone();
            }
        });
        return;
    }

    let Some(channel) = ctx.server_mut().and_then(|s| s.channel_mut(&reply.channel)) else {
        debug!(channel = %reply.channel, "WHO reply for unknown channel");
        return;
    };
    if !channel.has_user(&reply.nick) {
        channel.add_user(User::new(&reply.nick));
    }
    if let Some(user) = channel.user_mut(&reply.nick) {
        user.ident = Some(reply.ident.clone());
        user.hostname = Some(reply.host.clone());
        if realname.is_some() {
            user.realname = realname.clone();
        }
        user.account = account.clone();
        if !flags.away {
            user.away_message = None;
        }
        user.is_away = flags.away;
        user.is_oper = flags.oper;
        user.is_bot = flags.bot;
        user.status = flags.status;
    }
    update_private_chat(ctx, &reply.nick, |pm| {
        pm.is_away = flags.away;
        pm.is_bot = flags.bot;
        pm.account = account;
        if realname.is_some() {
            pm.realname = realname;
        }
    });
}

pub(super) fn on_who_end(ctx: &mut Ctx<'_>, mask: &str) {
    if let Some(ch) = ctx.server_mut().and_then(|s| s.channel_mut(mask)) {
        ch.needs_who = false;
        debug!(channel = mask, users = ch.users.len(), "member list complete");
    }
}

pub(super) fn on_whois_user(ctx: &mut Ctx<'_>, nick: &str, ident: &str, host: &str, realname: &str) {
    update_members(ctx, nick, |u| {
        u.ident = Some(ident.to_string());
        u.hostname = Some(host.to_string());
        u.realname = Some(realname.to_string());
    });
    update_private_chat(ctx, nick, |pm| pm.realname = Some(realname.to_string()));
    ctx.server_message(
        MessageKind::System,
        format!("{} is {}@{} ({})", nick, ident, host, realname),
    );
}

pub(super) fn on_whois_account(ctx: &mut Ctx<'_>, nick: &str, account: &str) {
    let account = account_of(Some(account));
    update_members(ctx, nick, |u| u.account = account.clone());
    update_private_chat(ctx, nick, |pm| pm.account = account.clone());
    if let Some(a) = account {
        ctx.server_message(MessageKind::System, format!("{} is logged in as {}", nick, a));
    }
}

pub(super) fn on_whois_bot(ctx: &mut Ctx<'_>, nick: &str) {
    update_members(ctx, nick, |u| u.is_bot = true);
    update_private_chat(ctx, nick, |pm| pm.is_bot = true);
    ctx.server_message(MessageKind::System, format!("{} is a bot", nick));
}

pub(super) fn on_whois_operator(ctx: &mut Ctx<'_>, nick: &str) {
    update_members(ctx, nick, |u| u.is_oper = true);
    ctx.server_message(MessageKind::System, format!("{} is an IRC operator", nick));
}

pub(super) fn on_away(ctx: &mut Ctx<'_>, nick: &str, message: Option<&str>) {
    let away = message.is_some();
    let text = message.map(str::to_string);
    update_members(ctx, nick, |u| {
        u.is_away = away;
        u.away_message = text.clone();
    });
    update_private_chat(ctx, nick, |pm| {
        pm.is_away = away;
        pm.away_message = text.clone();
    });
    if ctx.is_me(nick) {
        if let Some(server) = ctx.server_mut() {
            server.is_away = away;
        }
    }
}

pub(super) fn on_chghost(ctx: &mut Ctx<'_>, nick: &str, ident: &str, host: &str) {
    update_members(ctx, nick, |u| {
        u.ident = Some(ident.to_string());
        u.hostname = Some(host.to_string());
    });
}

pub(super) fn on_setname(ctx: &mut Ctx<'_>, nick: &str, realname: &str) {
    update_members(ctx, nick, |u| u.realname = Some(realname.to_string()));
    update_private_chat(ctx, nick, |pm| pm.realname = Some(realname.to_string()));
}

pub(super) fn on_own_away(ctx: &mut Ctx<'_>, away: bool) {
    let nick = ctx.own_nick();
    if let Some(server) = ctx.server_mut() {
        server.is_away = away;
    }
    update_members(ctx, &nick, |u| {
        u.is_away = away;
        if !away {
            u.away_message = None;
        }
    });
    let text = if away {
        "You have been marked as being away"
    } else {
        "You are no longer marked as being away"
    };
    ctx.server_message(MessageKind::System, text);
}

pub(super) fn on_monitor(ctx: &mut Ctx<'_>, targets: &[String], online: bool) {
    for target in targets {
        let nick = nick_of(target);
        if !online {
            ctx.stop_typing(nick, nick);
        }
        update_private_chat(ctx, nick, |pm| {
            pm.is_online = online;
            if !online {
                pm.is_away = false;
                pm.away_message = None;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let prefix = PrefixTable::default();
        let f = parse_flags("G*+@", &prefix, 'B');
        assert!(f.away);
        assert!(f.oper);
        assert!(!f.bot);
        assert_eq!(f.status, "@+");

        let f = parse_flags("HB", &prefix, 'B');
        assert!(!f.away);
        assert!(f.bot);
        assert_eq!(f.status, "");
    }

    #[test]
    fn test_custom_bot_flag() {
        let prefix = PrefixTable::parse("(ov)@+");
        let f = parse_flags("Hr%", &prefix, 'r');
        assert!(f.bot);
        // `%` is not a symbol under this PREFIX.
        assert_eq!(f.status, "");
    }

    #[test]
    fn test_account_placeholders() {
        assert_eq!(account_of(Some("0")), None);
        assert_eq!(account_of(Some("*")), None);
        assert_eq!(account_of(None), None);
        assert_eq!(account_of(Some("alice")), Some("alice".into()));
    }
}

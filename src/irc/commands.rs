//! Outbound protocol line builders.
//!
//! Every function returns one complete line without the trailing CRLF.
//! The transport parses it back into a message before writing, so tags
//! (`@key=value`) are allowed at the front.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Maximum base64 payload per `AUTHENTICATE` line.
pub const SASL_CHUNK: usize = 400;

/// Escape a tag value (`;` ` ` `\` CR LF).
pub fn escape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// Append `text` as the final parameter, prefixing `:` when needed.
fn trailing(text: &str) -> String {
    if text.is_empty() || text.contains(' ') || text.starts_with(':') {
        format!(":{}", text)
    } else {
        text.to_string()
    }
}

pub fn cap_ls() -> String {
    "CAP LS 302".to_string()
}

pub fn cap_req(caps: &[String]) -> String {
    format!("CAP REQ :{}", caps.join(" "))
}

pub fn cap_end() -> String {
    "CAP END".to_string()
}

pub fn authenticate(param: &str) -> String {
    format!("AUTHENTICATE {}", param)
}

/// SASL PLAIN payload (`user\0user\0pass`), base64 encoded and split into
/// 400-byte `AUTHENTICATE` lines. An exact multiple of 400 is followed by
/// `AUTHENTICATE +`.
pub fn authenticate_plain(username: &str, password: &str) -> Vec<String> {
    let payload = format!("{}\0{}\0{}", username, username, password);
    let encoded = STANDARD.encode(payload.as_bytes());
    let mut lines: Vec<String> = encoded
        .as_bytes()
        .chunks(SASL_CHUNK)
        .map(|c| authenticate(&String::from_utf8_lossy(c)))
        .collect();
    if encoded.len() % SASL_CHUNK == 0 {
        lines.push(authenticate("+"));
    }
    lines
}

pub fn pass(password: &str) -> String {
    format!("PASS {}", trailing(password))
}

pub fn nick(nickname: &str) -> String {
    format!("NICK {}", nickname)
}

pub fn user(username: &str, realname: &str) -> String {
    format!("USER {} 0 * {}", username, trailing(realname))
}

pub fn join(channel: &str) -> String {
    format!("JOIN {}", channel)
}

pub fn part(channel: &str, reason: Option<&str>) -> String {
    match reason {
        Some(r) => format!("PART {} {}", channel, trailing(r)),
        None => format!("PART {}", channel),
    }
}

pub fn quit(message: Option<&str>) -> String {
    match message {
        Some(m) => format!("QUIT {}", trailing(m)),
        None => "QUIT".to_string(),
    }
}

pub fn privmsg(target: &str, text: &str) -> String {
    format!("PRIVMSG {} {}", target, trailing(text))
}

pub fn notice(target: &str, text: &str) -> String {
    format!("NOTICE {} {}", target, trailing(text))
}

/// CTCP reply, wrapped in `\x01` and sent as a NOTICE.
pub fn ctcp_reply(target: &str, command: &str, arg: &str) -> String {
    let body = if arg.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, arg)
    };
    notice(target, &format!("\x01{}\x01", body))
}

/// `WHO` with the WHOX field set `%cuhnfar` when the server supports it.
pub fn who(mask: &str, whox: bool) -> String {
    if whox {
        format!("WHO {} %cuhnfar", mask)
    } else {
        format!("WHO {}", mask)
    }
}

pub fn whois(nick: &str) -> String {
    format!("WHOIS {}", nick)
}

pub fn chathistory_latest(target: &str, limit: usize) -> String {
    format!("CHATHISTORY LATEST {} * {}", target, limit)
}

pub fn topic_query(channel: &str) -> String {
    format!("TOPIC {}", channel)
}

pub fn set_topic(channel: &str, topic: &str) -> String {
    format!("TOPIC {} :{}", channel, topic)
}

pub fn mode(target: &str, modestring: &str, args: &[String]) -> String {
    let mut line = format!("MODE {}", target);
    if !modestring.is_empty() {
        line.push(' ');
        line.push_str(modestring);
    }
    for a in args {
        line.push(' ');
        line.push_str(a);
    }
    line
}

pub fn kick(channel: &str, nick: &str, reason: Option<&str>) -> String {
    match reason {
        Some(r) => format!("KICK {} {} {}", channel, nick, trailing(r)),
        None => format!("KICK {} {}", channel, nick),
    }
}

pub fn oper(name: &str, password: &str) -> String {
    format!("OPER {} {}", name, password)
}

pub fn away(message: Option<&str>) -> String {
    match message {
        Some(m) if !m.is_empty() => format!("AWAY {}", trailing(m)),
        _ => "AWAY".to_string(),
    }
}

fn tagmsg(target: &str, tags: &[(&str, &str)]) -> String {
    let tags: Vec<String> = tags
        .iter()
        .map(|(k, v)| format!("{}={}", k, escape_tag_value(v)))
        .collect();
    format!("@{} TAGMSG {}", tags.join(";"), target)
}

pub fn react(target: &str, msgid: &str, emoji: &str) -> String {
    tagmsg(target, &[("+draft/react", emoji), ("+draft/reply", msgid)])
}

pub fn unreact(target: &str, msgid: &str, emoji: &str) -> String {
    tagmsg(target, &[("+draft/unreact", emoji), ("+draft/reply", msgid)])
}

pub fn typing(target: &str, state: &str) -> String {
    tagmsg(target, &[("+typing", state)])
}

pub fn metadata_get(target: &str, keys: &[String]) -> String {
    format!("METADATA {} GET {}", target, keys.join(" "))
}

pub fn metadata_list(target: &str) -> String {
    format!("METADATA {} LIST", target)
}

/// `METADATA <target> SET <key> [:value]`. No value clears the key.
pub fn metadata_set(target: &str, key: &str, value: Option<&str>) -> String {
    match value {
        Some(v) => format!("METADATA {} SET {} :{}", target, key, v),
        None => format!("METADATA {} SET {}", target, key),
    }
}

pub fn metadata_sub(keys: &[String]) -> String {
    format!("METADATA * SUB {}", keys.join(" "))
}

pub fn metadata_unsub(keys: &[String]) -> String {
    format!("METADATA * UNSUB {}", keys.join(" "))
}

pub fn metadata_subs() -> String {
    "METADATA * SUBS".to_string()
}

pub fn monitor_add(targets: &[String]) -> String {
    format!("MONITOR + {}", targets.join(","))
}

pub fn monitor_remove(targets: &[String]) -> String {
    format!("MONITOR - {}", targets.join(","))
}

pub fn register(account: &str, email: Option<&str>, password: &str) -> String {
    format!("REGISTER {} {} {}", account, email.unwrap_or("*"), password)
}

pub fn verify(account: &str, code: &str) -> String {
    format!("VERIFY {} {}", account, code)
}

pub fn list() -> String {
    "LIST".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticate_plain_single_chunk() {
        let lines = authenticate_plain("alice", "hunter2");
        let expected = STANDARD.encode("alice\0alice\0hunter2");
        assert_eq!(lines, vec![format!("AUTHENTICATE {}", expected)]);
    }

    #[test]
    fn test_authenticate_plain_chunks_long_payload() {
        let password = "x".repeat(600);
        let lines = authenticate_plain("bob", &password);
        assert!(lines.len() >= 2);
        for l in &lines[..lines.len() - 1] {
            assert_eq!(l.len(), "AUTHENTICATE ".len() + SASL_CHUNK);
        }
    }

    #[test]
    fn test_authenticate_plain_exact_multiple() {
        // 3 + 1 + 3 + 1 + 292 = 300 bytes -> 400 base64 chars
        let password = "p".repeat(292);
        let lines = authenticate_plain("abc", &password);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "AUTHENTICATE +");
    }

    #[test]
    fn test_react_escapes_tags() {
        assert_eq!(
            react("#c", "abc123", "👍"),
            "@+draft/react=👍;+draft/reply=abc123 TAGMSG #c"
        );
        assert_eq!(escape_tag_value("a b;c\\"), "a\\sb\\:c\\\\");
    }

    #[test]
    fn test_who_variants() {
        assert_eq!(who("#rust", true), "WHO #rust %cuhnfar");
        assert_eq!(who("#rust", false), "WHO #rust");
    }

    #[test]
    fn test_trailing_params() {
        assert_eq!(kick("#c", "bob", Some("bye now")), "KICK #c bob :bye now");
        assert_eq!(part("#c", None), "PART #c");
        assert_eq!(ctcp_reply("bob", "VERSION", "ircsync"), "NOTICE bob :\x01VERSION ircsync\x01");
        assert_eq!(user("me", "Real Name"), "USER me 0 * :Real Name");
    }

    #[test]
    fn test_metadata_lines() {
        let keys = vec!["avatar".to_string(), "status".to_string()];
        assert_eq!(metadata_get("*", &keys), "METADATA * GET avatar status");
        assert_eq!(metadata_set("*", "status", Some("busy now")), "METADATA * SET status :busy now");
        assert_eq!(metadata_set("*", "status", None), "METADATA * SET status");
        assert_eq!(metadata_sub(&keys), "METADATA * SUB avatar status");
    }
}

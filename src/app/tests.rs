//! Store scenarios driven through events, ticks and user operations.

use std::time::{Duration, Instant};

use super::action::{Action, NotificationKind};
use super::event::{AppEvent, ServerId};
use super::state::{Channel, MessageKind, MessageTarget, Server};
use super::Store;
use crate::config::AppConfig;
use crate::irc::decode::RawLine;
use crate::irc::event::{ChatLine, ConnectionStatus, IrcEvent, ReplySeverity, Tags, WhoReply};
use crate::irc::metadata::MetadataValue;
use crate::persist::{Persisted, SavedServer};

const HOST: &str = "irc.example.org";
const NICK: &str = "crab";

fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn lines(actions: &[Action]) -> Vec<String> {
    actions
        .iter()
        .filter_map(Action::line)
        .map(str::to_string)
        .collect()
}

fn notifications(actions: &[Action]) -> Vec<NotificationKind> {
    actions
        .iter()
        .filter_map(|a| match a {
            Action::Notify(n) => Some(n.kind.clone()),
            _ => None,
        })
        .collect()
}

fn join_ev(nick: &str, channel: &str, batch: Option<&str>, t: Tags) -> IrcEvent {
    IrcEvent::Join {
        nick: nick.to_string(),
        hostmask: Some(format!("{}!{}@host.example", nick, nick)),
        channel: channel.to_string(),
        account: None,
        realname: None,
        batch: batch.map(str::to_string),
        tags: t,
    }
}

fn join(nick: &str, channel: &str) -> IrcEvent {
    join_ev(nick, channel, None, Tags::new())
}

fn part(nick: &str, channel: &str) -> IrcEvent {
    IrcEvent::Part {
        nick: nick.to_string(),
        channel: channel.to_string(),
        reason: None,
        batch: None,
        tags: Tags::new(),
    }
}

fn quit(nick: &str, batch: Option<&str>) -> IrcEvent {
    IrcEvent::Quit {
        nick: nick.to_string(),
        reason: Some("*.net *.split".to_string()),
        batch: batch.map(str::to_string),
        tags: Tags::new(),
    }
}

fn chat(sender: &str, target: &str, text: &str, t: Tags) -> IrcEvent {
    let line = ChatLine {
        sender: sender.to_string(),
        hostmask: Some(format!("{}!{}@host.example", sender, sender)),
        target: target.to_string(),
        text: text.to_string(),
        tags: t,
    };
    if target.starts_with('#') {
        IrcEvent::ChanMsg(line)
    } else {
        IrcEvent::UserMsg(line)
    }
}

fn batch_start(id: &str, kind: &str, params: &[&str]) -> IrcEvent {
    IrcEvent::BatchStart {
        id: id.to_string(),
        kind: kind.to_string(),
        params: params.iter().map(|p| p.to_string()).collect(),
        parent: None,
    }
}

fn batch_end(id: &str) -> IrcEvent {
    IrcEvent::BatchEnd { id: id.to_string() }
}

fn cap_ls(caps: &[(&str, Option<&str>)]) -> IrcEvent {
    IrcEvent::CapLs {
        caps: caps
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect(),
        more: false,
    }
}

fn cap_ack(caps: &[&str]) -> IrcEvent {
    IrcEvent::CapAck {
        caps: caps.iter().map(|c| c.to_string()).collect(),
    }
}

/// One store with one server whose transport is up.
struct Harness {
    store: Store,
    id: ServerId,
    t0: Instant,
    connect_actions: Vec<Action>,
}

impl Harness {
    fn new() -> Self {
        Self::with(SavedServer::new(HOST, 6697, NICK), Persisted::in_memory())
    }

    fn with(saved: SavedServer, persist: Persisted) -> Self {
        let mut store = Store::new(AppConfig::default(), persist);
        let (id, _) = store.connect_server(saved);
        let t0 = Instant::now();
        let connect_actions = store.handle_at(
            id,
            IrcEvent::ConnectionStateChange {
                status: ConnectionStatus::Connected,
            },
            t0,
        );
        Self {
            store,
            id,
            t0,
            connect_actions,
        }
    }

    fn at(&mut self, ms: u64, event: IrcEvent) -> Vec<Action> {
        let now = self.t0 + Duration::from_millis(ms);
        self.store.handle_at(self.id, event, now)
    }

    fn send(&mut self, event: IrcEvent) -> Vec<Action> {
        self.at(0, event)
    }

    /// Feed one protocol line through the `irc` crate's parser.
    fn wire(&mut self, ms: u64, text: &str) -> Vec<Action> {
        let msg: irc::proto::Message = text.parse().expect("valid line");
        let now = self.t0 + Duration::from_millis(ms);
        self.store.handle_line_at(self.id, &RawLine::from(&msg), now)
    }

    fn tick(&mut self, ms: u64) -> Vec<Action> {
        self.store.tick(self.t0 + Duration::from_millis(ms))
    }

    fn ready(&mut self) -> Vec<Action> {
        self.send(IrcEvent::Ready {
            nickname: NICK.to_string(),
            server_name: Some("example".to_string()),
        })
    }

    /// Registered and sitting in `channel` with `others`.
    fn in_channel(channel: &str, others: &[&str]) -> Self {
        let mut h = Self::new();
        h.ready();
        h.send(join(NICK, channel));
        for nick in others {
            h.send(join(nick, channel));
        }
        h
    }

    fn server(&self) -> &Server {
        self.store.state().server(self.id).expect("server exists")
    }

    fn channel(&self, name: &str) -> &Channel {
        self.server().channel(name).expect("channel exists")
    }

    fn members(&self, name: &str) -> Vec<String> {
        self.channel(name)
            .users
            .iter()
            .map(|u| u.username.clone())
            .collect()
    }
}

#[test]
fn test_connect_starts_negotiation_and_registration() {
    let h = Harness::new();
    assert_eq!(
        lines(&h.connect_actions),
        vec!["CAP LS 302", "NICK crab", "USER crab 0 * crab"]
    );
    assert_eq!(h.server().status, ConnectionStatus::Connecting);
}

#[test]
fn test_repeated_join_is_idempotent() {
    let mut h = Harness::in_channel("#rust", &["alice"]);
    h.send(join(NICK, "#rust"));
    h.send(join("alice", "#rust"));
    assert_eq!(h.server().channels.len(), 1);
    assert_eq!(h.members("#rust"), vec!["crab", "alice"]);
}

#[test]
fn test_self_join_requests_topic_then_who() {
    let mut h = Harness::new();
    h.ready();
    let actions = h.send(join(NICK, "#rust"));
    assert_eq!(lines(&actions), vec!["TOPIC #rust"]);
    assert!(h.channel("#rust").needs_who);

    assert!(h.tick(50).is_empty());
    assert_eq!(lines(&h.tick(120)), vec!["WHO #rust"]);
    assert!(h
        .store
        .persisted()
        .saved_server(HOST)
        .is_some_and(|s| s.channels.contains(&"#rust".to_string())));
}

#[test]
fn test_chathistory_join_flow() {
    let mut h = Harness::new();
    h.send(cap_ls(&[("draft/chathistory", None), ("batch", None)]));
    let acked = h.send(cap_ack(&["draft/chathistory", "batch"]));
    assert!(lines(&acked).contains(&"CAP END".to_string()));
    h.ready();

    let joined = h.send(join(NICK, "#rust"));
    assert!(lines(&joined).is_empty());
    assert!(h.channel("#rust").loading);

    let requested = h.tick(60);
    assert_eq!(
        lines(&requested),
        vec!["CHATHISTORY LATEST #rust * 50", "TOPIC #rust"]
    );

    h.at(70, batch_start("h1", "chathistory", &["#rust"]));
    h.at(
        70,
        join_ev(
            "bob",
            "#rust",
            Some("h1"),
            tags(&[("msgid", "hj1"), ("time", "2024-01-01T10:00:00.000Z")]),
        ),
    );
    h.at(
        70,
        chat(
            "bob",
            "#rust",
            "old news",
            tags(&[
                ("batch", "h1"),
                ("msgid", "hm1"),
                ("time", "2024-01-01T10:00:01.000Z"),
            ]),
        ),
    );
    let ended = h.at(80, batch_end("h1"));
    assert!(lines(&ended).is_empty());

    let ch = h.channel("#rust");
    assert!(!ch.loading);
    assert!(!ch.has_user("bob"));
    assert_eq!(ch.unread, 0);
    let kinds: Vec<_> = ch
        .messages
        .iter()
        .map(|m| (m.kind, m.msgid.clone()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (MessageKind::Join, Some("hj1".to_string())),
            (MessageKind::Message, Some("hm1".to_string())),
        ]
    );

    assert!(h.tick(150).is_empty());
    assert_eq!(lines(&h.tick(190)), vec!["WHO #rust"]);
}

#[test]
fn test_duplicate_messages_are_dropped() {
    let mut h = Harness::in_channel("#rust", &["alice"]);
    let stamped = tags(&[("msgid", "m1"), ("time", "2024-01-01T10:00:00.000Z")]);
    h.send(chat("alice", "#rust", "hello", stamped.clone()));
    h.send(chat("alice", "#rust", "hello", stamped));

    let untagged = tags(&[("time", "2024-01-01T11:00:00.000Z")]);
    h.send(chat("alice", "#rust", "again", untagged.clone()));
    h.send(chat("alice", "#rust", "again", untagged));

    let contents: Vec<_> = h
        .store
        .messages(h.id, &MessageTarget::Channel("#rust".into()))
        .iter()
        .filter(|m| m.kind == MessageKind::Message)
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(contents, vec!["hello", "again"]);
    assert_eq!(h.channel("#rust").unread, 2);
}

#[test]
fn test_reactions_toggle_per_user() {
    let mut h = Harness::in_channel("#rust", &["alice", "bob"]);
    h.send(chat("alice", "#rust", "ship it", tags(&[("msgid", "m1")])));
    let react = |who: &str, tag: &str| IrcEvent::Tagmsg {
        sender: who.to_string(),
        target: "#rust".to_string(),
        tags: tags(&[("+draft/reply", "m1"), (tag, "🎉")]),
    };
    h.send(react("bob", "+draft/react"));
    h.send(react("bob", "+draft/react"));
    h.send(react("alice", "+react"));
    let msg = |h: &Harness| {
        h.channel("#rust")
            .messages
            .iter()
            .find(|m| m.msgid.as_deref() == Some("m1"))
            .cloned()
            .expect("message present")
    };
    assert_eq!(msg(&h).reactions.len(), 2);

    h.send(react("bob", "+draft/unreact"));
    let reactions = msg(&h).reactions;
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].user, "alice");
}

#[test]
fn test_local_reaction_without_echo() {
    let mut h = Harness::in_channel("#rust", &["alice"]);
    h.send(chat("alice", "#rust", "hi", tags(&[("msgid", "m9")])));
    let actions = h.store.react(h.id, "#rust", "m9", "👍");
    assert_eq!(
        lines(&actions),
        vec!["@+draft/react=👍;+draft/reply=m9 TAGMSG #rust"]
    );
    let msg = h
        .channel("#rust")
        .messages
        .iter()
        .find(|m| m.msgid.as_deref() == Some("m9"))
        .cloned()
        .expect("message present");
    assert_eq!(msg.reactions.len(), 1);
    assert_eq!(msg.reactions[0].user, NICK);
}

#[test]
fn test_netsplit_and_netjoin_restore_order() {
    let mut h = Harness::in_channel("#rust", &["alice", "bob", "carol"]);
    h.send(batch_start("s1", "netsplit", &["hub.example", "leaf.example"]));
    h.send(quit("alice", Some("s1")));
    h.send(quit("carol", Some("s1")));
    assert_eq!(h.members("#rust").len(), 4);
    h.send(batch_end("s1"));
    assert_eq!(h.members("#rust"), vec!["crab", "bob"]);

    let split: Vec<_> = h
        .channel("#rust")
        .messages
        .iter()
        .filter(|m| m.netsplit.is_some())
        .cloned()
        .collect();
    assert_eq!(split.len(), 1);
    assert_eq!(split[0].kind, MessageKind::Netsplit);

    h.send(batch_start("j1", "netjoin", &["hub.example", "leaf.example"]));
    h.send(join_ev("carol", "#rust", Some("j1"), Tags::new()));
    h.send(join_ev("alice", "#rust", Some("j1"), Tags::new()));
    h.send(batch_end("j1"));
    assert_eq!(h.members("#rust"), vec!["crab", "alice", "bob", "carol"]);

    let split: Vec<_> = h
        .channel("#rust")
        .messages
        .iter()
        .filter(|m| m.netsplit.is_some())
        .cloned()
        .collect();
    assert_eq!(split.len(), 1);
    assert_eq!(split[0].kind, MessageKind::Netjoin);
    assert!(split[0].netsplit.as_ref().is_some_and(|n| n.rejoined));
}

#[test]
fn test_unknown_batch_is_replayed_on_close() {
    let mut h = Harness::in_channel("#rust", &[]);
    h.send(batch_start("x1", "example.org/custom", &[]));
    h.send(join_ev("dave", "#rust", Some("x1"), Tags::new()));
    assert!(!h.channel("#rust").has_user("dave"));
    h.send(batch_end("x1"));
    assert!(h.channel("#rust").has_user("dave"));
}

#[test]
fn test_sasl_gates_cap_end() {
    let mut saved = SavedServer::new(HOST, 6697, NICK);
    saved.sasl_account = Some(NICK.to_string());
    saved.sasl_password = Some("hunter2".to_string());
    let mut h = Harness::with(saved, Persisted::in_memory());
    let mut all = Vec::new();

    let req = h.send(cap_ls(&[("sasl", Some("PLAIN"))]));
    assert_eq!(lines(&req), vec!["CAP REQ :sasl"]);
    let ack = h.send(cap_ack(&["sasl"]));
    assert_eq!(lines(&ack), vec!["AUTHENTICATE PLAIN"]);
    all.extend(ack);

    let payload = h.send(IrcEvent::Authenticate {
        param: "+".to_string(),
    });
    let payload = lines(&payload);
    assert_eq!(payload.len(), 1);
    assert!(payload[0].starts_with("AUTHENTICATE "));
    assert_ne!(payload[0], "AUTHENTICATE +");

    for _ in 0..2 {
        all.extend(h.send(IrcEvent::SaslOutcome {
            success: true,
            code: 903,
            message: "SASL authentication successful".to_string(),
        }));
    }
    let ends = lines(&all).iter().filter(|l| *l == "CAP END").count();
    assert_eq!(ends, 1);
}

#[test]
fn test_link_security_warning_proceed_and_remember() {
    let mut h = Harness::new();
    let actions = h.send(cap_ls(&[("unrealircd.org/link-security", Some("0"))]));
    assert!(notifications(&actions).contains(&NotificationKind::LinkSecurityWarning));
    assert!(!lines(&actions).contains(&"CAP END".to_string()));
    assert!(h.server().link_warning_pending);
    assert_eq!(h.server().link_security, Some(0));

    let resolved = h.store.resolve_link_security_warning(h.id, true, true);
    assert_eq!(lines(&resolved), vec!["CAP END"]);
    assert!(!h.server().link_warning_pending);
    assert!(h
        .store
        .persisted()
        .saved_server(HOST)
        .is_some_and(|s| s.skip_link_security_warning));
}

#[test]
fn test_link_security_warning_abort_disconnects() {
    let mut h = Harness::new();
    h.send(cap_ls(&[("unrealircd.org/link-security", Some("1"))]));
    let resolved = h.store.resolve_link_security_warning(h.id, false, false);
    assert!(resolved
        .iter()
        .any(|a| matches!(a, Action::Disconnect { .. })));
    assert!(!lines(&resolved).contains(&"CAP END".to_string()));
}

#[test]
fn test_own_metadata_survives_empty_fetch_and_is_pushed() {
    let mut persist = Persisted::in_memory();
    persist.metadata.set(
        HOST,
        NICK,
        "avatar",
        MetadataValue::new("https://img.example/crab.png", "*"),
    );
    let mut h = Harness::with(SavedServer::new(HOST, 6697, NICK), persist);
    assert!(h.server().metadata.contains_key("avatar"));

    h.send(cap_ls(&[("draft/metadata-2", None)]));
    h.send(cap_ack(&["draft/metadata-2"]));
    let ready = lines(&h.ready());
    assert!(ready.iter().any(|l| l.starts_with("METADATA * SUB avatar")));
    assert!(ready.iter().any(|l| l.starts_with("METADATA * GET avatar")));

    let keys = h.store.config().metadata.subscribe_keys.clone();
    let mut pushed = Vec::new();
    for key in keys {
        pushed.extend(h.send(IrcEvent::MetadataKeyNotSet {
            target: NICK.to_string(),
            key,
        }));
    }
    assert_eq!(
        lines(&pushed),
        vec!["METADATA * SET avatar :https://img.example/crab.png"]
    );
    assert_eq!(
        h.server().metadata.get("avatar").map(|v| v.value.as_str()),
        Some("https://img.example/crab.png")
    );
    assert!(h
        .store
        .persisted()
        .metadata
        .get(HOST, NICK)
        .is_some_and(|m| m.contains_key("avatar")));
}

#[test]
fn test_user_metadata_reaches_members() {
    let mut h = Harness::new();
    h.send(cap_ls(&[("draft/metadata-2", None)]));
    h.send(cap_ack(&["draft/metadata-2"]));
    h.ready();
    h.send(join(NICK, "#rust"));
    h.send(join("alice", "#rust"));
    h.send(IrcEvent::Metadata {
        target: "alice".to_string(),
        key: "display-name".to_string(),
        visibility: "*".to_string(),
        value: Some("Alice".to_string()),
    });
    let alice = h.channel("#rust").user("alice").cloned().expect("member");
    assert_eq!(
        alice.metadata.get("display-name").map(|v| v.value.as_str()),
        Some("Alice")
    );
}

#[test]
fn test_ban_list_replaces_same_mask() {
    let mut h = Harness::in_channel("#rust", &["alice", "bob"]);
    for setter in ["alice", "bob"] {
        h.send(IrcEvent::Mode {
            sender: setter.to_string(),
            target: "#rust".to_string(),
            modestring: "+b".to_string(),
            args: vec!["bad!*@*".to_string()],
        });
    }
    let bans = &h.channel("#rust").bans;
    assert_eq!(bans.len(), 1);
    assert_eq!(bans[0].setter.as_deref(), Some("bob"));
}

#[test]
fn test_status_prefixes_follow_isupport_order() {
    let mut h = Harness::new();
    h.send(IrcEvent::Isupport {
        tokens: vec![("PREFIX".to_string(), Some("(ov)@+".to_string()))],
    });
    h.ready();
    h.send(join(NICK, "#rust"));
    h.send(join("alice", "#rust"));
    for flag in ["+v", "+o"] {
        h.send(IrcEvent::Mode {
            sender: "ChanServ".to_string(),
            target: "#rust".to_string(),
            modestring: flag.to_string(),
            args: vec!["alice".to_string()],
        });
    }
    let status = |h: &Harness| h.channel("#rust").user("alice").map(|u| u.status.clone());
    assert_eq!(status(&h).as_deref(), Some("@+"));
    h.send(IrcEvent::Mode {
        sender: "ChanServ".to_string(),
        target: "#rust".to_string(),
        modestring: "-o".to_string(),
        args: vec!["alice".to_string()],
    });
    assert_eq!(status(&h).as_deref(), Some("+"));
}

#[test]
fn test_typing_expires_and_refreshes() {
    let mut h = Harness::in_channel("#rust", &["alice"]);
    let typing = |state: &str| IrcEvent::Tagmsg {
        sender: "alice".to_string(),
        target: "#rust".to_string(),
        tags: tags(&[("+typing", state)]),
    };
    h.at(0, typing("active"));
    assert_eq!(h.channel("#rust").typing, vec!["alice"]);

    h.tick(3_000);
    h.at(3_000, typing("active"));
    h.tick(7_000);
    assert_eq!(h.channel("#rust").typing, vec!["alice"]);
    h.tick(9_500);
    assert!(h.channel("#rust").typing.is_empty());
}

#[test]
fn test_part_cancels_typing_timer() {
    let mut h = Harness::in_channel("#rust", &["alice"]);
    h.tick(1_000);
    let before = h.store.pending_timers();
    h.send(IrcEvent::Tagmsg {
        sender: "alice".to_string(),
        target: "#rust".to_string(),
        tags: tags(&[("+typing", "active")]),
    });
    assert_eq!(h.store.pending_timers(), before + 1);
    h.send(part("alice", "#rust"));
    assert_eq!(h.store.pending_timers(), before);
    assert!(h.channel("#rust").typing.is_empty());
}

#[test]
fn test_redaction_placeholders() {
    let mut h = Harness::in_channel("#rust", &["alice", "bob"]);
    h.send(chat("alice", "#rust", "oops", tags(&[("msgid", "a1")])));
    h.send(chat("alice", "#rust", "spam", tags(&[("msgid", "a2")])));
    for (sender, msgid, reason) in [("alice", "a1", None), ("bob", "a2", Some("spam"))] {
        h.send(IrcEvent::Redact {
            sender: sender.to_string(),
            target: "#rust".to_string(),
            msgid: msgid.to_string(),
            reason: reason.map(str::to_string),
        });
    }
    let content = |id: &str| {
        h.channel("#rust")
            .messages
            .iter()
            .find(|m| m.msgid.as_deref() == Some(id))
            .map(|m| m.content.clone())
    };
    assert_eq!(content("a1").as_deref(), Some("Message deleted by author"));
    assert_eq!(
        content("a2").as_deref(),
        Some("Message deleted by bob (spam)")
    );
}

#[test]
fn test_nick_in_use_retries_once() {
    let mut h = Harness::new();
    let in_use = || IrcEvent::NickError {
        code: 433,
        nick: NICK.to_string(),
        message: "Nickname is already in use".to_string(),
    };
    assert_eq!(lines(&h.send(in_use())), vec!["NICK crab_"]);
    let second = h.send(in_use());
    assert!(lines(&second).is_empty());
    assert_eq!(notifications(&second), vec![NotificationKind::NickError]);
}

#[test]
fn test_who_star_updates_private_chat_only() {
    let mut h = Harness::in_channel("#rust", &[]);
    h.store.open_private_chat(h.id, "alice");
    h.send(IrcEvent::WhoReply(WhoReply {
        channel: "*".to_string(),
        ident: "a".to_string(),
        host: "host.example".to_string(),
        server: None,
        nick: "alice".to_string(),
        flags: "G".to_string(),
        account: Some("alice".to_string()),
        realname: "Alice A".to_string(),
    }));
    assert!(!h.channel("#rust").has_user("alice"));
    let pm = h.server().private_chat("alice").cloned().expect("pm open");
    assert!(pm.is_away);
    assert_eq!(pm.realname.as_deref(), Some("Alice A"));
    assert_eq!(pm.account.as_deref(), Some("alice"));
}

#[test]
fn test_nick_changes_rename_members_and_self() {
    let mut h = Harness::in_channel("#rust", &["alice"]);
    h.send(IrcEvent::Nick {
        old_nick: "alice".to_string(),
        new_nick: "alicia".to_string(),
        tags: Tags::new(),
    });
    assert_eq!(h.members("#rust"), vec!["crab", "alicia"]);

    h.send(IrcEvent::Nick {
        old_nick: NICK.to_string(),
        new_nick: "lobster".to_string(),
        tags: Tags::new(),
    });
    assert_eq!(h.server().nickname, "lobster");
    assert_eq!(h.members("#rust"), vec!["lobster", "alicia"]);
}

#[test]
fn test_fail_reply_notifies_and_logs() {
    let mut h = Harness::new();
    h.ready();
    let actions = h.send(IrcEvent::StandardReply {
        severity: ReplySeverity::Fail,
        command: "JOIN".to_string(),
        code: "CHANNEL_FULL".to_string(),
        context: vec!["#full".to_string()],
        message: "Channel is full".to_string(),
    });
    assert_eq!(
        notifications(&actions),
        vec![NotificationKind::StandardReply(ReplySeverity::Fail)]
    );
    let last = h.server().messages.last().cloned().expect("server line");
    assert_eq!(last.kind, MessageKind::StandardReply);
    assert_eq!(last.content, "JOIN CHANNEL_FULL #full: Channel is full");
    assert_eq!(last.severity, Some(ReplySeverity::Fail));
}

#[test]
fn test_kick_and_quit_remove_members() {
    let mut h = Harness::in_channel("#rust", &["alice", "bob"]);
    h.send(join(NICK, "#ops"));
    h.send(join("bob", "#ops"));
    h.send(IrcEvent::Kick {
        sender: "crab".to_string(),
        channel: "#rust".to_string(),
        target: "alice".to_string(),
        reason: Some("bye".to_string()),
        tags: Tags::new(),
    });
    assert_eq!(h.members("#rust"), vec!["crab", "bob"]);

    h.send(quit("bob", None));
    assert_eq!(h.members("#rust"), vec!["crab"]);
    assert_eq!(h.members("#ops"), vec!["crab"]);
}

#[test]
fn test_kicked_self_keeps_saved_channel_but_part_forgets_it() {
    let mut h = Harness::in_channel("#rust", &["op"]);
    h.send(join(NICK, "#ops"));
    h.send(IrcEvent::Kick {
        sender: "op".to_string(),
        channel: "#rust".to_string(),
        target: NICK.to_string(),
        reason: None,
        tags: Tags::new(),
    });
    assert!(h.server().channel("#rust").is_none());
    h.send(part(NICK, "#ops"));
    assert!(h.server().channel("#ops").is_none());

    let saved = h.store.persisted().saved_server(HOST).cloned().expect("saved");
    assert!(saved.channels.contains(&"#rust".to_string()));
    assert!(!saved.channels.contains(&"#ops".to_string()));
}

#[test]
fn test_disconnect_clears_members() {
    let mut h = Harness::in_channel("#rust", &["alice"]);
    h.store.handle_app_event(AppEvent::Disconnected {
        server_id: h.id,
        reason: "Connection closed".to_string(),
    });
    let server = h.server();
    assert_eq!(server.status, ConnectionStatus::Disconnected);
    assert!(!server.registered);
    assert!(h.channel("#rust").users.is_empty());
    assert_eq!(
        server.messages.last().map(|m| m.content.as_str()),
        Some("Disconnected: Connection closed")
    );
    assert_eq!(h.store.pending_timers(), 0);
}

#[test]
fn test_ctcp_version_is_answered() {
    let mut h = Harness::new();
    h.ready();
    let actions = h.send(chat("alice", NICK, "\x01VERSION\x01", Tags::new()));
    let sent = lines(&actions);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("NOTICE alice :\x01VERSION ircsync"));
    assert!(h.server().private_chat("alice").is_none());
}

#[test]
fn test_history_lines_do_not_count_unread() {
    let mut h = Harness::new();
    h.send(cap_ls(&[("draft/chathistory", None), ("batch", None)]));
    h.send(cap_ack(&["draft/chathistory", "batch"]));
    h.ready();
    h.send(join(NICK, "#rust"));
    h.send(batch_start("h2", "chathistory", &["#rust"]));
    h.send(chat("bob", "#rust", "crab: old ping", tags(&[("batch", "h2")])));
    h.send(batch_end("h2"));
    let ch = h.channel("#rust");
    assert_eq!(ch.unread, 0);
    assert!(!ch.mentioned);
}

#[test]
fn test_mention_raises_notification() {
    let mut h = Harness::in_channel("#rust", &["alice"]);
    let actions = h.send(chat("alice", "#rust", "hey crab, look", Tags::new()));
    assert_eq!(notifications(&actions), vec![NotificationKind::Mention]);
    let ch = h.channel("#rust");
    assert!(ch.mentioned);
    assert!(ch.messages.last().is_some_and(|m| m.mentions_me));

    let quiet = h.send(chat("alice", "#rust", "crabby weather", Tags::new()));
    assert!(notifications(&quiet).is_empty());
}

#[test]
fn test_selected_context_counts_no_unread() {
    let mut h = Harness::in_channel("#rust", &["alice"]);
    h.send(chat("alice", "#rust", "one", Tags::new()));
    assert_eq!(h.channel("#rust").unread, 1);
    h.store.select(h.id, MessageTarget::Channel("#rust".into()));
    assert_eq!(h.channel("#rust").unread, 0);
    h.send(chat("alice", "#rust", "two", Tags::new()));
    assert_eq!(h.channel("#rust").unread, 0);
}

#[test]
fn test_input_sends_and_echoes_locally() {
    let mut h = Harness::in_channel("#rust", &[]);
    h.store.select(h.id, MessageTarget::Channel("#rust".into()));
    let actions = h.store.handle_input("hello there");
    assert_eq!(lines(&actions), vec!["PRIVMSG #rust :hello there"]);
    let last = h.channel("#rust").messages.last().cloned().expect("echo");
    assert_eq!(last.sender, NICK);
    assert_eq!(last.content, "hello there");

    let joined = h.store.handle_input("/join ops");
    assert_eq!(lines(&joined), vec!["JOIN #ops"]);

    h.store.handle_input("/frobnicate");
    assert_eq!(
        h.server().messages.last().map(|m| m.content.as_str()),
        Some("Unknown command: /frobnicate")
    );
}

#[test]
fn test_snapshots_are_copy_on_write() {
    let mut h = Harness::in_channel("#rust", &[]);
    let before = h.store.snapshot();
    let mut rx = h.store.subscribe();
    assert!(!rx.has_changed().expect("sender alive"));

    h.send(join("alice", "#rust"));
    assert!(rx.has_changed().expect("sender alive"));
    let after = rx.borrow_and_update().clone();

    let old = before.server(h.id).and_then(|s| s.channel("#rust")).expect("old");
    let new = after.server(h.id).and_then(|s| s.channel("#rust")).expect("new");
    assert!(!old.has_user("alice"));
    assert!(new.has_user("alice"));
}

#[test]
fn test_pinned_chats_are_persisted_in_order() {
    let mut h = Harness::new();
    h.ready();
    h.store.pin_private_chat(h.id, "alice");
    h.store.pin_private_chat(h.id, "bob");
    let pins = h
        .store
        .persisted()
        .pinned
        .get(HOST)
        .cloned()
        .unwrap_or_default();
    let order: Vec<_> = pins.iter().map(|p| (p.username.as_str(), p.order)).collect();
    assert_eq!(order, vec![("alice", 0), ("bob", 1)]);

    h.store.unpin_private_chat(h.id, "alice");
    let pm = h.server().private_chat("alice").cloned().expect("still open");
    assert!(!pm.pinned);
}

#[test]
fn test_netsplit_over_the_wire() {
    let mut h = Harness::in_channel("#rust", &["alice", "bob", "carol"]);
    h.wire(0, ":hub.example BATCH +s1 netsplit hub.example leaf.example\r\n");
    h.wire(0, "@batch=s1 :alice!alice@host.example QUIT :hub.example leaf.example\r\n");
    h.wire(0, "@batch=s1 :carol!carol@host.example QUIT :hub.example leaf.example\r\n");
    h.wire(0, ":hub.example BATCH -s1\r\n");
    assert_eq!(h.members("#rust"), vec!["crab", "bob"]);
    let kinds: Vec<_> = h
        .channel("#rust")
        .messages
        .iter()
        .filter(|m| m.netsplit.is_some())
        .map(|m| m.kind)
        .collect();
    assert_eq!(kinds, vec![MessageKind::Netsplit]);

    h.wire(10, ":hub.example BATCH +j1 netjoin hub.example leaf.example\r\n");
    h.wire(10, "@batch=j1 :carol!carol@host.example JOIN #rust\r\n");
    h.wire(10, "@batch=j1 :alice!alice@host.example JOIN #rust\r\n");
    h.wire(10, ":hub.example BATCH -j1\r\n");
    assert_eq!(h.members("#rust"), vec!["crab", "alice", "bob", "carol"]);
    let kinds: Vec<_> = h
        .channel("#rust")
        .messages
        .iter()
        .filter(|m| m.netsplit.is_some())
        .map(|m| m.kind)
        .collect();
    assert_eq!(kinds, vec![MessageKind::Netjoin]);
}

#[test]
fn test_cap_negotiation_and_history_over_the_wire() {
    let mut h = Harness::new();
    assert!(lines(&h.wire(0, ":irc.example.org CAP * LS * :draft/chathistory\r\n")).is_empty());
    let req = lines(&h.wire(0, ":irc.example.org CAP * LS :batch server-time\r\n"));
    assert_eq!(req.len(), 1);
    let requested = req[0].strip_prefix("CAP REQ :").expect("CAP REQ").to_string();
    let mut names: Vec<&str> = requested.split(' ').collect();
    names.sort_unstable();
    assert_eq!(names, vec!["batch", "draft/chathistory", "server-time"]);

    let acked = h.wire(0, &format!(":irc.example.org CAP crab ACK :{}\r\n", requested));
    assert!(lines(&acked).contains(&"CAP END".to_string()));
    h.wire(0, ":irc.example.org 001 crab :Welcome to the network\r\n");
    h.wire(0, ":crab!crab@host.example JOIN #rust\r\n");
    assert!(h.channel("#rust").loading);
    assert_eq!(
        lines(&h.tick(60)),
        vec!["CHATHISTORY LATEST #rust * 50", "TOPIC #rust"]
    );

    h.wire(70, ":irc.example.org BATCH +h1 chathistory #rust\r\n");
    h.wire(
        70,
        "@batch=h1;msgid=hm1;time=2024-01-01T10:00:01.000Z :bob!bob@host.example PRIVMSG #rust :old news\r\n",
    );
    h.wire(80, ":irc.example.org BATCH -h1\r\n");

    let ch = h.channel("#rust");
    assert!(!ch.loading);
    assert_eq!(ch.unread, 0);
    assert_eq!(ch.messages.len(), 1);
    assert_eq!(ch.messages[0].msgid.as_deref(), Some("hm1"));
    assert_eq!(ch.messages[0].content, "old news");
    assert_eq!(lines(&h.tick(190)), vec!["WHO #rust"]);
    assert!(h.tick(6_000).is_empty());
}

#[test]
fn test_multiline_over_the_wire() {
    let mut h = Harness::in_channel("#rust", &["alice"]);
    h.wire(0, "@msgid=ml1 :alice!alice@host.example BATCH +ml1 draft/multiline #rust\r\n");
    h.wire(0, "@batch=ml1 :alice!alice@host.example PRIVMSG #rust :line one\r\n");
    h.wire(0, "@batch=ml1 :alice!alice@host.example PRIVMSG #rust :line two\r\n");
    h.wire(0, ":alice!alice@host.example BATCH -ml1\r\n");
    let texts: Vec<_> = h
        .channel("#rust")
        .messages
        .iter()
        .filter(|m| m.kind == MessageKind::Message)
        .map(|m| m.content.clone())
        .collect();
    assert_eq!(texts, vec!["line one\nline two"]);
}

#[test]
fn test_mode_changes_over_the_wire() {
    let mut h = Harness::in_channel("#rust", &["alice", "bob"]);
    h.wire(0, ":op!op@host.example MODE #rust +v bob\r\n");
    h.wire(0, ":op!op@host.example MODE #rust +o-v+b alice bob *!*@spam.example\r\n");
    let ch = h.channel("#rust");
    let status = |nick: &str| {
        ch.users
            .iter()
            .find(|u| u.username == nick)
            .map(|u| u.status.clone())
            .unwrap_or_default()
    };
    assert_eq!(status("alice"), "@");
    assert_eq!(status("bob"), "");
    let bans: Vec<_> = ch.bans.iter().map(|b| b.mask.as_str()).collect();
    assert_eq!(bans, vec!["*!*@spam.example"]);
}

#[test]
fn test_stale_netsplit_members_rejoin_as_new() {
    let mut h = Harness::in_channel("#rust", &["alice", "bob", "carol"]);
    h.send(batch_start("s1", "netsplit", &["hub.example", "leaf.example"]));
    h.send(quit("alice", Some("s1")));
    h.send(batch_end("s1"));
    assert_eq!(h.members("#rust"), vec!["crab", "bob", "carol"]);

    let later = 1_801_000;
    h.at(later, batch_start("j1", "netjoin", &["hub.example", "leaf.example"]));
    h.at(later, join_ev("alice", "#rust", Some("j1"), Tags::new()));
    h.at(later, batch_end("j1"));
    assert_eq!(h.members("#rust"), vec!["crab", "bob", "carol", "alice"]);
}

#[test]
fn test_missing_history_batch_falls_back_to_who() {
    let mut h = Harness::new();
    h.send(cap_ls(&[("draft/chathistory", None), ("batch", None)]));
    h.send(cap_ack(&["draft/chathistory", "batch"]));
    h.ready();
    h.send(join(NICK, "#rust"));
    h.tick(60);
    assert!(h.tick(1_000).is_empty());
    assert!(h.channel("#rust").loading);

    assert_eq!(lines(&h.tick(5_100)), vec!["WHO #rust"]);
    assert!(!h.channel("#rust").loading);
}

#[test]
fn test_open_history_batch_defers_who() {
    let mut h = Harness::new();
    h.send(cap_ls(&[("draft/chathistory", None), ("batch", None)]));
    h.send(cap_ack(&["draft/chathistory", "batch"]));
    h.ready();
    h.send(join(NICK, "#rust"));
    h.tick(60);
    h.at(100, batch_start("h1", "chathistory", &["#rust"]));
    assert!(h.tick(5_100).is_empty());
    assert!(h.channel("#rust").loading);

    h.at(5_200, batch_end("h1"));
    assert!(!h.channel("#rust").loading);
    assert_eq!(lines(&h.tick(5_300)), vec!["WHO #rust"]);
}

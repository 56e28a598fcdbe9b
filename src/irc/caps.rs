//! Capability negotiation and the SASL/registration steps that gate
//! `CAP END`.
//!
//! The sequencer is a plain state machine: every input returns the
//! [`CapEffect`]s the caller must carry out. It never talks to the network.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::irc::commands;

/// Capabilities requested when the server advertises them.
pub const WANTED_CAPS: &[&str] = &[
    "multi-prefix",
    "extended-join",
    "away-notify",
    "account-notify",
    "account-tag",
    "chghost",
    "setname",
    "server-time",
    "message-tags",
    "echo-message",
    "batch",
    "labeled-response",
    "invite-notify",
    "cap-notify",
    "extended-monitor",
    "userhost-in-names",
    "chathistory",
    "draft/chathistory",
    "draft/event-playback",
    "draft/multiline",
    "draft/metadata-2",
    "draft/metadata",
    "draft/metadata-notify-2",
    "draft/channel-rename",
    "draft/message-redaction",
    "draft/account-registration",
    "draft/extended-isupport",
    "unrealircd.org/json-log",
    "sasl",
];

/// Informational token carrying the server's link security level.
pub const LINK_SECURITY_CAP: &str = "unrealircd.org/link-security";

pub const REGISTRATION_CAP: &str = "draft/account-registration";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRegistration {
    pub account: String,
    pub email: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslState {
    Idle,
    /// `AUTHENTICATE PLAIN` sent, waiting for `AUTHENTICATE +`.
    Requested,
    PayloadSent,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Registration {
    None,
    Queued(PendingRegistration),
    Sent,
    AwaitingVerification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkWarning {
    None,
    Pending,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapEffect {
    Send(String),
    LinkSecurityWarning { level: u8 },
    SaslFailed { code: u16, message: String },
    SaslSucceeded,
    RegistrationDiscarded,
    /// `CAP END` went out.
    Finished,
    /// The user declined to continue past the link security warning.
    Abort,
}

#[derive(Debug, Clone)]
pub struct CapSequencer {
    host: String,
    skip_link_warning: bool,
    credentials: Option<SaslCredentials>,
    advertised: BTreeMap<String, Option<String>>,
    ls_complete: bool,
    outstanding: BTreeSet<String>,
    acked: BTreeSet<String>,
    sasl: SaslState,
    registration: Registration,
    link_security: Option<u8>,
    link_warning: LinkWarning,
    cap_end_sent: bool,
}

impl CapSequencer {
    pub fn new(host: &str, credentials: Option<SaslCredentials>, skip_link_warning: bool) -> Self {
        Self {
            host: host.to_string(),
            skip_link_warning,
            credentials,
            advertised: BTreeMap::new(),
            ls_complete: false,
            outstanding: BTreeSet::new(),
            acked: BTreeSet::new(),
            sasl: SaslState::Idle,
            registration: Registration::None,
            link_security: None,
            link_warning: LinkWarning::None,
            cap_end_sent: false,
        }
    }

    /// Forget everything learned on the previous connection. Credentials,
    /// skip flag and a queued registration survive.
    pub fn reset(&mut self) {
        let registration = match std::mem::replace(&mut self.registration, Registration::None) {
            Registration::Queued(r) => Registration::Queued(r),
            _ => Registration::None,
        };
        *self = Self {
            registration,
            ..Self::new(&self.host, self.credentials.take(), self.skip_link_warning)
        };
    }

    pub fn set_credentials(&mut self, credentials: Option<SaslCredentials>) {
        self.credentials = credentials;
    }

    pub fn set_skip_link_warning(&mut self, skip: bool) {
        self.skip_link_warning = skip;
    }

    pub fn queue_registration(&mut self, registration: PendingRegistration) {
        self.registration = Registration::Queued(registration);
    }

    pub fn acked(&self) -> &BTreeSet<String> {
        &self.acked
    }

    pub fn advertised(&self) -> &BTreeMap<String, Option<String>> {
        &self.advertised
    }

    pub fn link_security(&self) -> Option<u8> {
        self.link_security
    }

    pub fn link_warning(&self) -> LinkWarning {
        self.link_warning
    }

    pub fn sasl_state(&self) -> SaslState {
        self.sasl
    }

    pub fn cap_end_sent(&self) -> bool {
        self.cap_end_sent
    }

    pub fn awaiting_verification(&self) -> bool {
        self.registration == Registration::AwaitingVerification
    }

    /// Opening lines for a fresh connection.
    pub fn begin(&mut self) -> Vec<CapEffect> {
        vec![CapEffect::Send(commands::cap_ls())]
    }

    pub fn on_ls(&mut self, caps: &[(String, Option<String>)], more: bool) -> Vec<CapEffect> {
        for (name, value) in caps {
            self.advertised.insert(name.clone(), value.clone());
        }
        if more || self.ls_complete {
            return Vec::new();
        }
        self.ls_complete = true;

        let mut effects = Vec::new();
        if let Some(Some(value)) = self.advertised.get(LINK_SECURITY_CAP) {
            let level = value.parse::<u8>().unwrap_or(0);
            self.link_security = Some(level);
            if (level < 2 || is_loopback(&self.host)) && !self.skip_link_warning {
                warn!(host = %self.host, level, "link security warning raised");
                self.link_warning = LinkWarning::Pending;
                effects.push(CapEffect::LinkSecurityWarning { level });
            }
        }

        let request: Vec<String> = WANTED_CAPS
            .iter()
            .filter(|c| self.advertised.contains_key(**c))
            .map(|c| c.to_string())
            .collect();

        if request.is_empty() {
            effects.extend(self.try_finish());
        } else {
            debug!(caps = ?request, "requesting capabilities");
            self.outstanding = request.iter().cloned().collect();
            effects.push(CapEffect::Send(commands::cap_req(&request)));
        }
        effects
    }

    pub fn on_ack(&mut self, caps: &[String]) -> Vec<CapEffect> {
        let mut effects = Vec::new();
        for cap in caps {
            if let Some(removed) = cap.strip_prefix('-') {
                self.acked.remove(removed);
                self.outstanding.remove(removed);
                continue;
            }
            self.outstanding.remove(cap);
            self.acked.insert(cap.clone());
            if cap == "sasl" && self.credentials.is_some() && self.sasl == SaslState::Idle {
                info!(host = %self.host, "starting SASL PLAIN");
                self.sasl = SaslState::Requested;
                effects.push(CapEffect::Send(commands::authenticate("PLAIN")));
            }
        }
        if self.outstanding.is_empty() {
            effects.extend(self.after_negotiation());
        }
        effects
    }

    pub fn on_nak(&mut self, caps: &[String]) -> Vec<CapEffect> {
        for cap in caps {
            debug!(cap = %cap, "capability rejected");
            self.outstanding.remove(cap);
        }
        if self.outstanding.is_empty() {
            self.after_negotiation()
        } else {
            Vec::new()
        }
    }

    /// `AUTHENTICATE <param>` from the server. Credentials go out once, and
    /// never after `CAP END`.
    pub fn on_authenticate(&mut self, param: &str) -> Vec<CapEffect> {
        if param != "+" || self.sasl != SaslState::Requested || self.cap_end_sent {
            debug!(param, state = ?self.sasl, "ignoring AUTHENTICATE");
            return Vec::new();
        }
        let Some(creds) = &self.credentials else {
            return Vec::new();
        };
        self.sasl = SaslState::PayloadSent;
        commands::authenticate_plain(&creds.username, &creds.password)
            .into_iter()
            .map(CapEffect::Send)
            .collect()
    }

    pub fn on_sasl_outcome(&mut self, success: bool, code: u16, message: &str) -> Vec<CapEffect> {
        if self.sasl == SaslState::Done {
            return Vec::new();
        }
        self.sasl = SaslState::Done;
        let mut effects = if success {
            info!(host = %self.host, "SASL authentication succeeded");
            vec![CapEffect::SaslSucceeded]
        } else {
            warn!(host = %self.host, code, message, "SASL authentication failed");
            vec![CapEffect::SaslFailed {
                code,
                message: message.to_string(),
            }]
        };
        effects.extend(self.try_finish());
        effects
    }

    /// `REGISTER SUCCESS`, `VERIFY SUCCESS` or a `FAIL REGISTER/VERIFY`.
    pub fn on_registration_done(&mut self) -> Vec<CapEffect> {
        if matches!(self.registration, Registration::None) {
            return Vec::new();
        }
        self.registration = Registration::None;
        self.try_finish()
    }

    pub fn on_verification_required(&mut self) {
        if self.registration == Registration::Sent {
            self.registration = Registration::AwaitingVerification;
        }
    }

    pub fn verify(&mut self, account: &str, code: &str) -> Vec<CapEffect> {
        vec![CapEffect::Send(commands::verify(account, code))]
    }

    pub fn resolve_link_warning(&mut self, proceed: bool) -> Vec<CapEffect> {
        if self.link_warning != LinkWarning::Pending {
            return Vec::new();
        }
        self.link_warning = LinkWarning::Resolved;
        if !proceed {
            info!(host = %self.host, "connection aborted at link security warning");
            return vec![CapEffect::Abort];
        }
        self.try_finish()
    }

    /// True while anything still needs to happen before `CAP END`.
    pub fn blocked(&self) -> bool {
        !self.ls_complete
            || !self.outstanding.is_empty()
            || matches!(self.sasl, SaslState::Requested | SaslState::PayloadSent)
            || !matches!(self.registration, Registration::None)
            || self.link_warning == LinkWarning::Pending
    }

    fn after_negotiation(&mut self) -> Vec<CapEffect> {
        let mut effects = Vec::new();
        if let Registration::Queued(reg) = &self.registration {
            if self.acked.contains(REGISTRATION_CAP) {
                info!(account = %reg.account, "sending account registration");
                effects.push(CapEffect::Send(commands::register(
                    &reg.account,
                    reg.email.as_deref(),
                    &reg.password,
                )));
                self.registration = Registration::Sent;
            } else {
                warn!("server lacks account registration, discarding request");
                self.registration = Registration::None;
                effects.push(CapEffect::RegistrationDiscarded);
            }
        }
        effects.extend(self.try_finish());
        effects
    }

    fn try_finish(&mut self) -> Vec<CapEffect> {
        if self.cap_end_sent || self.blocked() {
            return Vec::new();
        }
        self.cap_end_sent = true;
        info!(host = %self.host, caps = self.acked.len(), "capability negotiation finished");
        vec![CapEffect::Send(commands::cap_end()), CapEffect::Finished]
    }
}

pub fn is_loopback(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(list: &[&str]) -> Vec<(String, Option<String>)> {
        list.iter()
            .map(|c| match c.split_once('=') {
                Some((k, v)) => (k.to_string(), Some(v.to_string())),
                None => (c.to_string(), None),
            })
            .collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn sent(effects: &[CapEffect]) -> Vec<String> {
        effects
            .iter()
            .filter_map(|e| match e {
                CapEffect::Send(l) => Some(l.clone()),
                _ => None,
            })
            .collect()
    }

    fn creds() -> Option<SaslCredentials> {
        Some(SaslCredentials {
            username: "alice".into(),
            password: "pw".into(),
        })
    }

    #[test]
    fn test_no_caps_ends_immediately() {
        let mut s = CapSequencer::new("irc.example.org", None, false);
        let out = s.on_ls(&caps(&["vendor/unknown"]), false);
        assert_eq!(sent(&out), vec!["CAP END"]);
        assert!(s.cap_end_sent());
    }

    #[test]
    fn test_ls_continuation_waits() {
        let mut s = CapSequencer::new("irc.example.org", None, false);
        assert!(s.on_ls(&caps(&["batch"]), true).is_empty());
        let out = s.on_ls(&caps(&["server-time"]), false);
        assert_eq!(sent(&out), vec!["CAP REQ :server-time batch"]);
        let out = s.on_ack(&names(&["server-time", "batch"]));
        assert_eq!(sent(&out), vec!["CAP END"]);
    }

    #[test]
    fn test_sasl_blocks_cap_end_until_outcome() {
        let mut s = CapSequencer::new("irc.example.org", creds(), false);
        s.on_ls(&caps(&["sasl=PLAIN", "batch"]), false);
        let out = s.on_ack(&names(&["batch", "sasl"]));
        assert_eq!(sent(&out), vec!["AUTHENTICATE PLAIN"]);
        assert!(!s.cap_end_sent());

        let out = s.on_authenticate("+");
        assert_eq!(out.len(), 1);
        assert!(sent(&out)[0].starts_with("AUTHENTICATE "));
        assert!(s.on_authenticate("+").is_empty());

        let out = s.on_sasl_outcome(true, 903, "ok");
        assert!(out.contains(&CapEffect::SaslSucceeded));
        assert_eq!(sent(&out), vec!["CAP END"]);
    }

    #[test]
    fn test_sasl_without_credentials_does_not_block() {
        let mut s = CapSequencer::new("irc.example.org", None, false);
        s.on_ls(&caps(&["sasl"]), false);
        let out = s.on_ack(&names(&["sasl"]));
        assert_eq!(sent(&out), vec!["CAP END"]);
    }

    #[test]
    fn test_sasl_failure_still_ends() {
        let mut s = CapSequencer::new("irc.example.org", creds(), false);
        s.on_ls(&caps(&["sasl"]), false);
        s.on_ack(&names(&["sasl"]));
        s.on_authenticate("+");
        let out = s.on_sasl_outcome(false, 904, "bad password");
        assert!(matches!(out[0], CapEffect::SaslFailed { code: 904, .. }));
        assert_eq!(sent(&out), vec!["CAP END"]);
    }

    #[test]
    fn test_authenticate_after_cap_end_is_ignored() {
        let mut s = CapSequencer::new("irc.example.org", creds(), false);
        s.on_ls(&caps(&["sasl"]), false);
        s.on_ack(&names(&["sasl"]));
        s.on_sasl_outcome(false, 906, "aborted");
        assert!(s.cap_end_sent());
        assert!(s.on_authenticate("+").is_empty());
    }

    #[test]
    fn test_link_security_warning_blocks() {
        let mut s = CapSequencer::new("irc.example.org", None, false);
        let out = s.on_ls(&caps(&["unrealircd.org/link-security=1", "batch"]), false);
        assert!(out.contains(&CapEffect::LinkSecurityWarning { level: 1 }));
        let out = s.on_ack(&names(&["batch"]));
        assert!(sent(&out).is_empty());
        assert!(!s.cap_end_sent());

        let out = s.resolve_link_warning(true);
        assert_eq!(sent(&out), vec!["CAP END"]);
        assert!(s.resolve_link_warning(true).is_empty());
    }

    #[test]
    fn test_link_security_decline_aborts() {
        let mut s = CapSequencer::new("irc.example.org", None, false);
        s.on_ls(&caps(&["unrealircd.org/link-security=0"]), false);
        assert_eq!(s.resolve_link_warning(false), vec![CapEffect::Abort]);
        assert!(!s.cap_end_sent());
    }

    #[test]
    fn test_link_security_skip_and_high_level() {
        let mut s = CapSequencer::new("irc.example.org", None, true);
        let out = s.on_ls(&caps(&["unrealircd.org/link-security=0"]), false);
        assert_eq!(sent(&out), vec!["CAP END"]);

        let mut s = CapSequencer::new("irc.example.org", None, false);
        let out = s.on_ls(&caps(&["unrealircd.org/link-security=2"]), false);
        assert_eq!(s.link_security(), Some(2));
        assert_eq!(sent(&out), vec!["CAP END"]);

        let mut s = CapSequencer::new("127.0.0.1", None, false);
        let out = s.on_ls(&caps(&["unrealircd.org/link-security=2"]), false);
        assert!(out.contains(&CapEffect::LinkSecurityWarning { level: 2 }));
    }

    #[test]
    fn test_registration_sent_when_supported() {
        let mut s = CapSequencer::new("irc.example.org", None, false);
        s.queue_registration(PendingRegistration {
            account: "alice".into(),
            email: None,
            password: "pw".into(),
        });
        s.on_ls(&caps(&["draft/account-registration"]), false);
        let out = s.on_ack(&names(&["draft/account-registration"]));
        assert_eq!(sent(&out), vec!["REGISTER alice * pw"]);
        s.on_verification_required();
        assert!(s.awaiting_verification());
        assert!(s.blocked());
        let out = s.on_registration_done();
        assert_eq!(sent(&out), vec!["CAP END"]);
    }

    #[test]
    fn test_registration_discarded_when_unsupported() {
        let mut s = CapSequencer::new("irc.example.org", None, false);
        s.queue_registration(PendingRegistration {
            account: "alice".into(),
            email: Some("a@example.org".into()),
            password: "pw".into(),
        });
        s.on_ls(&caps(&["batch"]), false);
        let out = s.on_nak(&names(&["batch"]));
        assert!(out.contains(&CapEffect::RegistrationDiscarded));
        assert_eq!(sent(&out), vec!["CAP END"]);
    }

    #[test]
    fn test_cap_end_at_most_once() {
        let mut s = CapSequencer::new("irc.example.org", None, false);
        s.on_ls(&caps(&["batch"]), false);
        let first = s.on_ack(&names(&["batch"]));
        assert_eq!(sent(&first), vec!["CAP END"]);
        assert!(s.on_ack(&names(&["batch"])).is_empty());
        assert!(s.on_sasl_outcome(true, 903, "").iter().all(|e| !matches!(e, CapEffect::Send(_))));
    }

    #[test]
    fn test_reset_keeps_queued_registration() {
        let mut s = CapSequencer::new("irc.example.org", creds(), false);
        s.queue_registration(PendingRegistration {
            account: "a".into(),
            email: None,
            password: "p".into(),
        });
        s.on_ls(&caps(&["batch"]), false);
        s.reset();
        assert!(!s.cap_end_sent());
        assert!(s.acked().is_empty());
        s.on_ls(&caps(&["draft/account-registration"]), false);
        let out = s.on_ack(&names(&["draft/account-registration"]));
        assert_eq!(sent(&out), vec!["REGISTER a * p"]);
    }

    #[test]
    fn test_loopback_detection() {
        assert!(is_loopback("localhost"));
        assert!(is_loopback("127.0.0.1"));
        assert!(is_loopback("[::1]"));
        assert!(!is_loopback("irc.libera.chat"));
    }
}

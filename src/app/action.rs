use crate::app::event::ServerId;
use crate::irc::event::ReplySeverity;

/// Side effects produced by the store. The caller executes them in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SendRaw { server_id: ServerId, line: String },
    Notify(Notification),
    Connect {
        server_id: ServerId,
        host: String,
        port: u16,
        tls: bool,
        nickname: String,
        username: String,
        realname: String,
        password: Option<String>,
    },
    Disconnect { server_id: ServerId, message: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationKind {
    Mention,
    PrivateMessage,
    Invite,
    StandardReply(ReplySeverity),
    NickError,
    SaslFailed,
    LinkSecurityWarning,
    RegistrationDiscarded,
    RegistrationSuccess,
    VerificationRequired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub server_id: ServerId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
}

impl Action {
    pub fn raw(server_id: ServerId, line: impl Into<String>) -> Self {
        Action::SendRaw {
            server_id,
            line: line.into(),
        }
    }

    /// The line if this is a `SendRaw`.
    pub fn line(&self) -> Option<&str> {
        match self {
            Action::SendRaw { line, .. } => Some(line),
            _ => None,
        }
    }
}

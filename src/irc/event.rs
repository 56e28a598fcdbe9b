//! Inbound protocol events.
//!
//! Every line the transport delivers is decoded into one of these variants
//! before it reaches the store. The set is closed: the store dispatches on
//! it with an exhaustive `match`.

use std::collections::BTreeMap;

/// IRCv3 message tags, already unescaped.
pub type Tags = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Ban,
    Exception,
    Invite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySeverity {
    Fail,
    Warn,
    Note,
}

impl ReplySeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            ReplySeverity::Fail => "FAIL",
            ReplySeverity::Warn => "WARN",
            ReplySeverity::Note => "NOTE",
        }
    }
}

/// A chat line (PRIVMSG or NOTICE) after target classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatLine {
    /// Nickname of the sender, or a server name.
    pub sender: String,
    pub hostmask: Option<String>,
    /// Channel name or the nickname the line was addressed to.
    pub target: String,
    pub text: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhoReply {
    pub channel: String,
    pub ident: String,
    pub host: String,
    pub server: Option<String>,
    pub nick: String,
    pub flags: String,
    pub account: Option<String>,
    pub realname: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrcEvent {
    Isupport {
        tokens: Vec<(String, Option<String>)>,
    },
    Mode {
        sender: String,
        target: String,
        modestring: String,
        args: Vec<String>,
    },
    Join {
        nick: String,
        hostmask: Option<String>,
        channel: String,
        account: Option<String>,
        realname: Option<String>,
        batch: Option<String>,
        tags: Tags,
    },
    Part {
        nick: String,
        channel: String,
        reason: Option<String>,
        batch: Option<String>,
        tags: Tags,
    },
    Quit {
        nick: String,
        reason: Option<String>,
        batch: Option<String>,
        tags: Tags,
    },
    Kick {
        sender: String,
        channel: String,
        target: String,
        reason: Option<String>,
        tags: Tags,
    },
    Nick {
        old_nick: String,
        new_nick: String,
        tags: Tags,
    },
    Topic {
        sender: String,
        channel: String,
        topic: String,
        tags: Tags,
    },
    RplTopic {
        channel: String,
        topic: String,
    },
    RplNoTopic {
        channel: String,
    },
    RplTopicWhoTime {
        channel: String,
        set_by: String,
        set_at: i64,
    },
    Invite {
        sender: String,
        target: String,
        channel: String,
    },
    ChanMsg(ChatLine),
    UserMsg(ChatLine),
    ChanNotice(ChatLine),
    UserNotice(ChatLine),
    MultilineMessage {
        sender: String,
        target: String,
        lines: Vec<String>,
        message_ids: Vec<String>,
        tags: Tags,
    },
    Tagmsg {
        sender: String,
        target: String,
        tags: Tags,
    },
    Redact {
        sender: String,
        target: String,
        msgid: String,
        reason: Option<String>,
    },
    WhoisUser {
        nick: String,
        ident: String,
        host: String,
        realname: String,
    },
    WhoisAccount {
        nick: String,
        account: String,
    },
    WhoisBot {
        nick: String,
    },
    WhoisOperator {
        nick: String,
    },
    WhoisEnd {
        nick: String,
    },
    WhoReply(WhoReply),
    WhoEnd {
        mask: String,
    },
    WhoxReply(WhoReply),
    Away {
        nick: String,
        message: Option<String>,
    },
    Chghost {
        nick: String,
        ident: String,
        host: String,
    },
    RplNowAway,
    RplUnAway,
    ModeListEntry {
        kind: ListKind,
        channel: String,
        mask: String,
        setter: Option<String>,
        set_at: Option<i64>,
    },
    ModeListEnd {
        kind: ListKind,
        channel: String,
    },
    CapLs {
        caps: Vec<(String, Option<String>)>,
        more: bool,
    },
    CapAck {
        caps: Vec<String>,
    },
    CapNak {
        caps: Vec<String>,
    },
    Authenticate {
        param: String,
    },
    SaslOutcome {
        success: bool,
        code: u16,
        message: String,
    },
    Metadata {
        target: String,
        key: String,
        visibility: String,
        value: Option<String>,
    },
    MetadataKeyValue {
        target: String,
        key: String,
        visibility: String,
        value: String,
    },
    MetadataKeyNotSet {
        target: String,
        key: String,
    },
    MetadataSubOk {
        keys: Vec<String>,
    },
    MetadataUnsubOk {
        keys: Vec<String>,
    },
    MetadataSubs {
        keys: Vec<String>,
    },
    MetadataFail {
        code: String,
        target: Option<String>,
        key: Option<String>,
        retry_after: Option<u64>,
        message: String,
    },
    BatchStart {
        id: String,
        kind: String,
        params: Vec<String>,
        parent: Option<String>,
    },
    BatchEnd {
        id: String,
    },
    MonOnline {
        targets: Vec<String>,
    },
    MonOffline {
        targets: Vec<String>,
    },
    Rename {
        sender: String,
        old_channel: String,
        new_channel: String,
        reason: Option<String>,
    },
    Setname {
        nick: String,
        realname: String,
    },
    NickError {
        code: u16,
        nick: String,
        message: String,
    },
    StandardReply {
        severity: ReplySeverity,
        command: String,
        code: String,
        context: Vec<String>,
        message: String,
    },
    RegisterSuccess {
        account: String,
        message: String,
    },
    RegisterVerificationRequired {
        account: String,
        message: String,
    },
    VerifySuccess {
        account: String,
        message: String,
    },
    Extjwt {
        target: String,
        service: Option<String>,
        token: String,
    },
    RplYoureOper {
        message: String,
    },
    RplYourHost {
        message: String,
    },
    ConnectionStateChange {
        status: ConnectionStatus,
    },
    Ready {
        nickname: String,
        server_name: Option<String>,
    },
    ChathistoryLoading {
        channel: String,
        loading: bool,
    },
    ListChannel {
        channel: String,
        user_count: u32,
        topic: String,
    },
    ListEnd,
}

impl IrcEvent {
    /// Batch reference carried by events the batch tracker may buffer.
    pub fn batch_id(&self) -> Option<&str> {
        match self {
            IrcEvent::Join { batch, .. }
            | IrcEvent::Part { batch, .. }
            | IrcEvent::Quit { batch, .. } => batch.as_deref(),
            _ => None,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            IrcEvent::Isupport { .. } => "ISUPPORT",
            IrcEvent::Mode { .. } => "MODE",
            IrcEvent::Join { .. } => "JOIN",
            IrcEvent::Part { .. } => "PART",
            IrcEvent::Quit { .. } => "QUIT",
            IrcEvent::Kick { .. } => "KICK",
            IrcEvent::Nick { .. } => "NICK",
            IrcEvent::Topic { .. } => "TOPIC",
            IrcEvent::RplTopic { .. } => "RPL_TOPIC",
            IrcEvent::RplNoTopic { .. } => "RPL_NOTOPIC",
            IrcEvent::RplTopicWhoTime { .. } => "RPL_TOPICWHOTIME",
            IrcEvent::Invite { .. } => "INVITE",
            IrcEvent::ChanMsg(_) => "CHANMSG",
            IrcEvent::UserMsg(_) => "USERMSG",
            IrcEvent::ChanNotice(_) => "CHANNNOTICE",
            IrcEvent::UserNotice(_) => "USERNOTICE",
            IrcEvent::MultilineMessage { .. } => "MULTILINE_MESSAGE",
            IrcEvent::Tagmsg { .. } => "TAGMSG",
            IrcEvent::Redact { .. } => "REDACT",
            IrcEvent::WhoisUser { .. } => "WHOIS_USER",
            IrcEvent::WhoisAccount { .. } => "WHOIS_ACCOUNT",
            IrcEvent::WhoisBot { .. } => "WHOIS_BOT",
            IrcEvent::WhoisOperator { .. } => "WHOIS_OPERATOR",
            IrcEvent::WhoisEnd { .. } => "WHOIS_END",
            IrcEvent::WhoReply(_) => "WHO_REPLY",
            IrcEvent::WhoEnd { .. } => "WHO_END",
            IrcEvent::WhoxReply(_) => "WHOX_REPLY",
            IrcEvent::Away { .. } => "AWAY",
            IrcEvent::Chghost { .. } => "CHGHOST",
            IrcEvent::RplNowAway => "RPL_NOWAWAY",
            IrcEvent::RplUnAway => "RPL_UNAWAY",
            IrcEvent::ModeListEntry { .. } => "RPL_MODELIST",
            IrcEvent::ModeListEnd { .. } => "RPL_ENDOFMODELIST",
            IrcEvent::CapLs { .. } => "CAP LS",
            IrcEvent::CapAck { .. } => "CAP ACK",
            IrcEvent::CapNak { .. } => "CAP NAK",
            IrcEvent::Authenticate { .. } => "AUTHENTICATE",
            IrcEvent::SaslOutcome { .. } => "SASL",
            IrcEvent::Metadata { .. } => "METADATA",
            IrcEvent::MetadataKeyValue { .. } => "METADATA_KEYVALUE",
            IrcEvent::MetadataKeyNotSet { .. } => "METADATA_KEYNOTSET",
            IrcEvent::MetadataSubOk { .. } => "METADATA_SUBOK",
            IrcEvent::MetadataUnsubOk { .. } => "METADATA_UNSUBOK",
            IrcEvent::MetadataSubs { .. } => "METADATA_SUBS",
            IrcEvent::MetadataFail { .. } => "METADATA_FAIL",
            IrcEvent::BatchStart { .. } => "BATCH_START",
            IrcEvent::BatchEnd { .. } => "BATCH_END",
            IrcEvent::MonOnline { .. } => "MONONLINE",
            IrcEvent::MonOffline { .. } => "MONOFFLINE",
            IrcEvent::Rename { .. } => "RENAME",
            IrcEvent::Setname { .. } => "SETNAME",
            IrcEvent::NickError { .. } => "NICK_ERROR",
            IrcEvent::StandardReply { severity, .. } => severity.as_str(),
            IrcEvent::RegisterSuccess { .. } => "REGISTER_SUCCESS",
            IrcEvent::RegisterVerificationRequired { .. } => "REGISTER_VERIFICATION_REQUIRED",
            IrcEvent::VerifySuccess { .. } => "VERIFY_SUCCESS",
            IrcEvent::Extjwt { .. } => "EXTJWT",
            IrcEvent::RplYoureOper { .. } => "RPL_YOUREOPER",
            IrcEvent::RplYourHost { .. } => "RPL_YOURHOST",
            IrcEvent::ConnectionStateChange { .. } => "connectionStateChange",
            IrcEvent::Ready { .. } => "ready",
            IrcEvent::ChathistoryLoading { .. } => "CHATHISTORY_LOADING",
            IrcEvent::ListChannel { .. } => "LIST_CHANNEL",
            IrcEvent::ListEnd => "LIST_END",
        }
    }
}

/// Reduce `nick!user@host` to `nick`.
pub fn nick_of(mask: &str) -> &str {
    mask.split('!').next().unwrap_or(mask)
}

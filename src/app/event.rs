use crate::irc::decode::RawLine;

pub type ServerId = usize;

/// Everything the main loop reacts to.
#[derive(Debug)]
pub enum AppEvent {
    /// A tokenized line received from a server
    Irc { server_id: ServerId, line: RawLine },

    /// Transport connection state changed
    Connected { server_id: ServerId },
    Disconnected { server_id: ServerId, reason: String },
    Error { server_id: ServerId, error: String },

    /// A line typed on stdin
    Input(String),

    /// Timer tick (50ms)
    Tick,
}

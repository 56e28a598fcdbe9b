//! `BATCH` bookkeeping.
//!
//! The tracker only owns the open/closed lifecycle and the buffered events.
//! What happens when a batch closes is decided by the store, which matches
//! on [`BatchKind`].

use std::collections::HashMap;
use std::time::Instant;

use tracing::debug;

use crate::irc::event::IrcEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchKind {
    Netsplit,
    Netjoin,
    Chathistory,
    Multiline,
    Metadata,
    Other(String),
}

impl BatchKind {
    /// Batch types are case-insensitive; the `irc` crate uppercases them.
    pub fn parse(kind: &str) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "netsplit" => BatchKind::Netsplit,
            "netjoin" => BatchKind::Netjoin,
            "chathistory" | "draft/chathistory" => BatchKind::Chathistory,
            "draft/multiline" => BatchKind::Multiline,
            "metadata" | "draft/metadata" => BatchKind::Metadata,
            other => BatchKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BatchKind::Netsplit => "netsplit",
            BatchKind::Netjoin => "netjoin",
            BatchKind::Chathistory => "chathistory",
            BatchKind::Multiline => "draft/multiline",
            BatchKind::Metadata => "metadata",
            BatchKind::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub id: String,
    pub kind: BatchKind,
    pub params: Vec<String>,
    pub parent: Option<String>,
    pub events: Vec<IrcEvent>,
    pub started: Instant,
}

impl Batch {
    /// The two server names of a netsplit or netjoin batch.
    pub fn server_pair(&self) -> Option<(String, String)> {
        match self.params.as_slice() {
            [a, b, ..] => Some((a.clone(), b.clone())),
            _ => None,
        }
    }
}

/// Open batches for one connection, keyed by reference id.
#[derive(Debug, Default)]
pub struct BatchTracker {
    open: HashMap<String, Batch>,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(
        &mut self,
        id: &str,
        kind: &str,
        params: Vec<String>,
        parent: Option<String>,
        now: Instant,
    ) {
        debug!(batch = id, kind, ?parent, "batch opened");
        self.open.insert(
            id.to_string(),
            Batch {
                id: id.to_string(),
                kind: BatchKind::parse(kind),
                params,
                parent,
                events: Vec::new(),
                started: now,
            },
        );
    }

    /// Buffer `event` if it names an open batch. Otherwise hand it back so
    /// the caller applies it immediately.
    pub fn buffer(&mut self, event: IrcEvent) -> Option<IrcEvent> {
        let open = event
            .batch_id()
            .and_then(|id| self.open.get_mut(id));
        match open {
            Some(batch) => {
                batch.events.push(event);
                None
            }
            None => Some(event),
        }
    }

    /// Close a batch and return it for processing. Unknown ids yield `None`.
    pub fn finish(&mut self, id: &str) -> Option<Batch> {
        let batch = self.open.remove(id);
        if let Some(b) = &batch {
            debug!(batch = id, kind = b.kind.as_str(), events = b.events.len(), "batch closed");
        }
        batch
    }

    /// Whether a history batch for `target` is still being received.
    pub fn history_open(&self, target: &str) -> bool {
        self.open.values().any(|b| {
            b.kind == BatchKind::Chathistory
                && b.params.first().is_some_and(|t| t.eq_ignore_ascii_case(target))
        })
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.open.contains_key(id)
    }

    pub fn kind_of(&self, id: &str) -> Option<&BatchKind> {
        self.open.get(id).map(|b| &b.kind)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn clear(&mut self) {
        self.open.clear();
    }
}

//! Cancellable one-shot timers.
//!
//! Timers live in an arena and are addressed by a generational
//! [`TimerId`], so a stale id can never cancel a timer that reused its slot.
//! Nothing fires on its own: the store calls [`Timers::due`] from `tick`.

use std::time::Instant;

use crate::app::event::ServerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    index: usize,
    generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// Drop `user` from the typing list of `context`.
    TypingExpiry {
        server_id: ServerId,
        context: String,
        user: String,
    },
    /// Request history (then the topic) after a self-join.
    Chathistory { server_id: ServerId, channel: String },
    /// Give up waiting for a history batch and fill the member list.
    HistoryTimeout { server_id: ServerId, channel: String },
    /// WHO for a channel whose member list still needs filling.
    Who { server_id: ServerId, channel: String },
    /// Retry a rate-limited `METADATA GET`.
    MetadataRetry {
        server_id: ServerId,
        target: String,
        key: String,
    },
}

impl TimerKind {
    pub fn server_id(&self) -> ServerId {
        match self {
            TimerKind::TypingExpiry { server_id, .. }
            | TimerKind::Chathistory { server_id, .. }
            | TimerKind::HistoryTimeout { server_id, .. }
            | TimerKind::Who { server_id, .. }
            | TimerKind::MetadataRetry { server_id, .. } => *server_id,
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u64,
    entry: Option<(Instant, TimerKind)>,
}

#[derive(Debug, Default)]
pub struct Timers {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: Instant, kind: TimerKind) -> TimerId {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.generation += 1;
                slot.entry = Some((at, kind));
                TimerId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some((at, kind)),
                });
                TimerId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    /// Cancel a pending timer. Returns false for stale or fired ids.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.slots.get_mut(id.index) {
            Some(slot) if slot.generation == id.generation && slot.entry.is_some() => {
                slot.entry = None;
                self.free.push(id.index);
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self, id: TimerId) -> Option<Instant> {
        self.slots
            .get(id.index)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.entry.as_ref().map(|(at, _)| *at))
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.deadline(id).is_some()
    }

    /// Remove and return every timer due at `now`, earliest first.
    pub fn due(&mut self, now: Instant) -> Vec<(TimerId, TimerKind)> {
        let mut fired = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if matches!(&slot.entry, Some((at, _)) if *at <= now) {
                if let Some((at, kind)) = slot.entry.take() {
                    fired.push((
                        at,
                        TimerId {
                            index,
                            generation: slot.generation,
                        },
                        kind,
                    ));
                    self.free.push(index);
                }
            }
        }
        fired.sort_by_key(|(at, id, _)| (*at, id.index));
        fired.into_iter().map(|(_, id, kind)| (id, kind)).collect()
    }

    /// Cancel everything belonging to one server.
    pub fn cancel_server(&mut self, server_id: ServerId) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if matches!(&slot.entry, Some((_, k)) if k.server_id() == server_id) {
                slot.entry = None;
                self.free.push(index);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn who(ch: &str) -> TimerKind {
        TimerKind::Who {
            server_id: 1,
            channel: ch.into(),
        }
    }

    #[test]
    fn test_due_in_deadline_order() {
        let mut t = Timers::new();
        let now = Instant::now();
        t.schedule(now + Duration::from_millis(100), who("#b"));
        t.schedule(now + Duration::from_millis(50), who("#a"));
        t.schedule(now + Duration::from_secs(5), who("#c"));

        assert!(t.due(now).is_empty());
        let fired: Vec<_> = t.due(now + Duration::from_millis(200)).into_iter().map(|(_, k)| k).collect();
        assert_eq!(fired, vec![who("#a"), who("#b")]);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_cancel_and_stale_ids() {
        let mut t = Timers::new();
        let now = Instant::now();
        let a = t.schedule(now, who("#a"));
        assert!(t.cancel(a));
        assert!(!t.cancel(a));

        let b = t.schedule(now, who("#b"));
        assert!(!t.cancel(a), "stale id must not cancel the slot's new occupant");
        assert!(t.is_active(b));
        assert_eq!(t.due(now).len(), 1);
        assert!(!t.is_active(b));
    }

    #[test]
    fn test_cancel_server() {
        let mut t = Timers::new();
        let now = Instant::now();
        t.schedule(now, who("#a"));
        t.schedule(now, TimerKind::Who { server_id: 2, channel: "#x".into() });
        t.cancel_server(1);
        assert_eq!(t.len(), 1);
        assert_eq!(t.due(now)[0].1.server_id(), 2);
    }
}

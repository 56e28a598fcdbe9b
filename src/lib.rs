//! IRC event-to-store reconciliation core.
//!
//! Inbound protocol lines are decoded into [`irc::event::IrcEvent`]s and
//! applied by [`app::Store`], which owns the client state, publishes
//! immutable snapshots and returns the [`app::action::Action`]s to execute.

pub mod app;
pub mod config;
pub mod error;
pub mod irc;
pub mod logging;
pub mod persist;

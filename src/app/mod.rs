//! Core application logic: the store, its event handlers, and the actions
//! they produce.

pub mod action;
pub mod command;
pub mod event;
pub(crate) mod handler;
pub mod state;
pub mod store;
pub mod timers;

#[cfg(test)]
mod tests;

pub use store::Store;

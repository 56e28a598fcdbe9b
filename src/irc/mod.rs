//! IRC protocol layer: line decoding, capability negotiation, batches,
//! metadata sync, outbound command builders and the transport.

pub mod batch;
pub mod caps;
pub mod commands;
pub mod connection;
pub mod decode;
pub mod event;
pub mod jsonlog;
pub mod manager;
pub mod metadata;
pub mod modes;
pub mod prefix;

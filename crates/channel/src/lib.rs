//! Remote sessions over line-delimited JSON.
//!
//! A session starts with one snapshot of every store, then receives each
//! store patch as it is emitted. In the other direction the client sends
//! compound actions (optionally tagged with a token) and telemetry events;
//! action outcomes are acknowledged only to the session that carried the
//! token.

#![warn(missing_docs)]

pub mod server;
pub mod wire;

pub use server::ChannelServer;
pub use wire::{ClientMessage, ServerMessage, StoreSnapshot};

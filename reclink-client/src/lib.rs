//! # reclink-client
//!
//! Async client for the reclink backend control link.
//!
//! This crate provides:
//! - Version handshake and announce over one TCP session
//! - Per-command version validation with deterministic fallback selection
//! - A single-reader dispatch loop multiplexing command replies and
//!   unsolicited backend events on the same socket

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;

pub use command::{CommandCatalog, CommandSpec, Dispatch};
pub use config::{AnnounceMode, ConnectionConfig};
pub use connection::{Connection, ConnectionState};
pub use error::ClientError;
pub use events::{BackendEvent, ListenerId};

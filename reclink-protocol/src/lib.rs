//! # reclink-protocol
//!
//! Wire protocol for the reclink backend control link.
//!
//! This crate provides:
//! - The protocol version catalogue and generic version-range algebra
//! - Text framing: 8-digit ASCII length prefix, `[]:[]`-joined arguments
//! - Positional property schemas resolved per negotiated version
//! - Typed value decoding with version-era-aware timestamps

pub mod codec;
pub mod error;
pub mod frame;
pub mod messages;
pub mod range;
pub mod schema;
pub mod value;
pub mod version;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{Packet, DELIMITER, EVENT_MARKER, LENGTH_PREFIX_SIZE};
pub use range::{VersionBound, VersionRange};
pub use schema::{PropertyDescriptor, PropertyIndex, PropertyList, PropertySchema, ResolvedSchema};
pub use value::{DataType, TypedValue};
pub use version::{catalog, DbSchemaVersion, ProtocolVersion};

/// Default port the backend listens on.
pub const DEFAULT_PORT: u16 = 6543;

/// Maximum frame payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: u64 = 16 * 1024 * 1024;

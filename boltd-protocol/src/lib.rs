//! # boltd-protocol
//!
//! Wire protocol implementation for boltd (Bolt over TCP).
//!
//! This crate provides:
//! - PackStream binary value encoding/decoding (marker table, packer, unpacker)
//! - Length-prefixed chunked message framing with end-of-message markers
//! - The Bolt message catalog and reply envelope types
//! - Hydration of raw structure buffers into typed messages and graph values

pub mod chunk;
pub mod codec;
pub mod error;
pub mod hydrator;
pub mod marker;
pub mod message;
pub mod pack;
pub mod value;

pub use chunk::{ChunkDecoder, Chunker};
pub use codec::Encoder;
pub use error::ProtocolError;
pub use hydrator::{unpack_request, Hydrator};
pub use marker::{Marker, PackType};
pub use message::{BoltMsg, DbError, Record, Reply, Success};
pub use pack::{Packer, Unpacker};
pub use value::Value;

/// Magic preamble opening every Bolt connection.
pub const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Size of the fixed handshake buffer: magic plus four version proposals.
pub const HANDSHAKE_LEN: usize = 20;

/// Major protocol version this implementation speaks.
pub const SUPPORTED_MAJOR: u8 = 4;

/// Minor protocol version this implementation speaks.
pub const SUPPORTED_MINOR: u8 = 4;

/// Default port for the Bolt endpoint.
pub const DEFAULT_PORT: u16 = 7687;

/// Maximum payload carried by a single chunk.
pub const MAX_CHUNK_PAYLOAD: usize = 0xFFFF;

//! MCBP wire protocol.
//!
//! Provides:
//! - the 24-byte [`Header`] codec and [`Magic`] discriminator
//! - the restartable stream decoder [`FrameBuffer`]
//! - [`Message`] frames with typed body accessors and [`RequestBuilder`]
//! - closed opcode, status and feature registries
//! - command bodies for the handshake, subdocument and key-value paths

mod frame;
mod frame_buffer;
mod wire_format;

pub mod handshake;
pub mod hello;
pub mod kv;
pub mod opcode;
pub mod status;
pub mod subdoc;

pub use frame::{Message, RequestBuilder};
pub use frame_buffer::{FrameBuffer, MAX_BODY_SIZE};
pub use wire_format::{Header, Magic, HEADER_SIZE};

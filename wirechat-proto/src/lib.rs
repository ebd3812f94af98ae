//! Shared protocol definitions for the `WireChat` wire format.

pub mod codec;
pub mod crypto;
pub mod packet;

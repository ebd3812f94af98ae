//! `WireChat` relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The server
//! accepts TCP connections, registers identities by display name, and
//! routes messages, files, and call media between them.

pub mod config;
pub mod registry;
pub mod relay;
pub mod router;

//! Websocket protocol message types.
//!
//! This module defines the frames exchanged by [`WsTransport`] and its
//! peer.
//!
//! # Protocol Overview
//!
//! | Packet | Direction | Purpose |
//! |--------|-----------|---------|
//! | `call` | both | Request expecting a reply |
//! | `fire` | both | One-way event |
//! | `ack` | both | Successful reply |
//! | `error` | both | Failed reply |
//!
//! [`WsTransport`]: crate::transport::WsTransport

// ============================================================================
// Submodules
// ============================================================================

/// Packet definitions and binary payload helpers.
pub mod packet;

// ============================================================================
// Re-exports
// ============================================================================

pub use packet::{Packet, decode_bytes};

//! Domain Layer - Instruments, subscriptions and ticks.
//!
//! This layer contains the core types of the market data client. Nothing
//! here performs I/O; catalog bytes and wire frames are handed in by the
//! infrastructure layer.

/// Instrument directory and resolution rules.
pub mod instrument;

/// Decoded tick types.
pub mod streaming;

/// Desired subscription set and control messages.
pub mod subscription;

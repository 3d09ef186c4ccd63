//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the subscription manager, the swappable directory
//! handle, and the port interfaces that tie them to the feed.

/// Port interfaces for the feed session, tokens and tick consumers.
pub mod ports;

/// Application services for directory access and subscription management.
pub mod services;

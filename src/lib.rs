//! Notification-driven speech orchestration.
//!
//! Turns arbitrary text and a backlog of pending notifications into spoken
//! audio: a durable encoding-tolerant store, a dispatcher over cloud/local
//! synthesis backends, a mutual-exclusion speech session, a transport
//! playback state machine, and a background auto-read scheduler.

pub mod backends;
pub mod catalog;
pub mod config;
pub mod error;
pub mod playback;
pub mod scheduler;
pub mod session;
pub mod store;

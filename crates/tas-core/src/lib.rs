//! Core domain + application logic for the Telegram anti-spam gatekeeper.
//!
//! This crate is intentionally framework-agnostic. The Telegram client lives
//! behind ports (traits) implemented in the adapter crate; everything here can
//! be exercised against an in-memory port.

pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod gatekeeper;
pub mod logging;
pub mod messaging;
pub mod scheduler;
pub mod store;
pub mod sweeper;

pub use errors::{Error, Result};

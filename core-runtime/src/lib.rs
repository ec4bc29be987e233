//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the credential crates:
//! - Logging and tracing bootstrap with token redaction
//! - Configuration (injected bridges plus the refresh policy)
//! - Event bus for credential lifecycle notifications
//!
//! ## Overview
//!
//! Nothing here knows about specific identity providers. `core-auth` builds
//! on these pieces; hosts use them to wire logging and listen for events.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};

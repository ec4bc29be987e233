//! # Host Bridge Traits
//!
//! Platform abstraction traits the credential core depends on.
//!
//! ## Overview
//!
//! The core never touches the keychain, the disk, the network or the wall
//! clock directly. Each of those is a trait here, implemented once per host
//! (`bridge-desktop` for desktop targets) and injected at construction time.
//! Tests substitute in-memory fakes.
//!
//! ## Traits
//!
//! - [`SecureStore`](storage::SecureStore) - OS credential store (Keychain, Secret Service, Credential Manager)
//! - [`FileSystemAccess`](storage::FileSystemAccess) - plain file I/O for fallback credential files
//! - [`HttpClient`](http::HttpClient) - async HTTP for token endpoints
//! - [`Clock`](time::Clock) - time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - forward structured logs to the host
//!
//! ## Error Handling
//!
//! All bridge traits return [`BridgeError`](error::BridgeError). Implementations
//! translate platform errors into its variants, in particular
//! `NotFound` / `AccessDenied` for secure-store lookups, so callers can treat
//! both as "absent" without string matching.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`.

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use storage::{FileSystemAccess, SecureStore};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};

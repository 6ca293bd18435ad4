//! formsync request orchestration
//!
//! Runs client requests against live form documents and answers them with
//! incremental DOM updates.
//!
//! # Core Concepts
//!
//! - [`Engine`]: lookup, lock, sequence check, dispatch, comparison and memoization per request
//! - [`Request`] / [`ClientEvent`]: what the client sends
//! - [`Response`] / [`ResponseKind`]: incremental, all-events, no-op, replay, retry and error shapes
//! - [`EventDispatcher`]: applies events to a working copy of the document
//! - [`EngineConfig`]: thresholds, lock waits and session settings, loadable from TOML
//!
//! # Request Flow
//!
//! ```text
//! Received → EventsExtracted → LockAcquired → EventsDispatched
//!          → DiffComputed → ResponseSent → LockReleased
//! ```
//!
//! Keep-alive requests stop after `EventsExtracted`; retransmissions are
//! answered from the memoized response without the lock.

#![warn(unreachable_pub)]

mod config;
pub mod demo;
mod dispatch;
mod engine;
mod error;
mod request;
mod response;
pub mod simulate;
mod transport;

pub use config::{ConfigError, EngineConfig};
pub use dispatch::{
    DispatchContext, DispatchError, EventDispatcher, EventHandler, LoggingSubmissionRunner, StandardDispatcher,
    SubmissionRunner,
};
pub use engine::{Engine, EngineBuilder};
pub use error::ProcessError;
pub use request::{ClientEvent, Request, RequestKind, UploadedFile};
pub use response::{ErrorDocument, EventResponse, Response, ResponseKind};
pub use transport::transmit;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Environment controller for the visreg harness.
//!
//! Owns the mutable state a page shares with the test script: per-context
//! connectivity, cache storage, and the log of browser-originated events
//! (worker registrations, downloads). Every request a context makes, from
//! the main thread or a background worker, passes through the context's
//! network gate.

mod context;
pub mod controller;
pub mod events;
pub mod manifest;
pub mod network;

pub use controller::EnvironmentController;
pub use events::{BrowserEvent, EventKind, Subscription, WaitError};
pub use manifest::{DisplayMode, ManifestError, ManifestIcon, WebManifest};
pub use network::{FetchOutcome, Network, Request, RequestOrigin, Response, ServedFrom, StubNetwork};

use thiserror::Error;
use visreg_core::ContextId;

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("Unknown browsing context: {0}")]
    UnknownContext(ContextId),
    #[error("Browsing context {0} is closed")]
    ContextClosed(ContextId),
    #[error("Request to {url} failed: {context} is offline")]
    Offline { context: ContextId, url: String },
    #[error("Request to {url} failed: {reason}")]
    Network { url: String, reason: String },
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("Event wait failed: {0}")]
    Wait(#[from] WaitError),
}

pub type Result<T> = std::result::Result<T, EnvError>;

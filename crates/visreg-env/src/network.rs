//! Requests, responses and the live network boundary.

use hashbrown::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use visreg_core::{ContextId, WorkerId};

use crate::{EnvError, Result};

/// An outgoing network request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    pub url: String,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
        }
    }

    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
        }
    }
}

/// A network or cache response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn ok(content_type: &str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: Some(content_type.to_string()),
            body: body.into(),
        }
    }

    #[must_use]
    pub const fn not_found() -> Self {
        Self {
            status: 404,
            content_type: None,
            body: Vec::new(),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Which thread of the page issued a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestOrigin {
    MainThread,
    Worker(WorkerId),
}

/// Where a response came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServedFrom {
    Network,
    Cache,
}

/// A response together with how it was obtained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchOutcome {
    pub response: Response,
    pub served_from: ServedFrom,
    pub origin: RequestOrigin,
}

/// The live network, outside the harness.
pub trait Network: Send + Sync {
    fn fetch(&self, context: ContextId, request: &Request) -> Result<Response>;
}

/// In-memory network with fixed routes.
///
/// Unrouted URLs answer 404. Every request that reaches it is logged, which
/// lets tests prove offline requests never got this far.
#[derive(Default)]
pub struct StubNetwork {
    routes: Mutex<HashMap<String, Response>>,
    failures: Mutex<HashMap<String, String>>,
    log: Mutex<Vec<(ContextId, Request)>>,
}

impl StubNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `response` for `url`.
    #[must_use]
    pub fn route(self, url: impl Into<String>, response: Response) -> Self {
        self.routes.lock().insert(url.into(), response);
        self
    }

    /// Fail every request to `url` with `reason`.
    #[must_use]
    pub fn fail(self, url: impl Into<String>, reason: impl Into<String>) -> Self {
        self.failures.lock().insert(url.into(), reason.into());
        self
    }

    /// Requests that reached the network, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<(ContextId, Request)> {
        self.log.lock().clone()
    }
}

impl Network for StubNetwork {
    fn fetch(&self, context: ContextId, request: &Request) -> Result<Response> {
        self.log.lock().push((context, request.clone()));

        if let Some(reason) = self.failures.lock().get(&request.url) {
            return Err(EnvError::Network {
                url: request.url.clone(),
                reason: reason.clone(),
            });
        }

        Ok(self
            .routes
            .lock()
            .get(&request.url)
            .cloned()
            .unwrap_or_else(Response::not_found))
    }
}

//! Per-context shared state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use visreg_core::ContextId;

use crate::events::EventLog;
use crate::network::Response;

/// State a browsing context shares between the test script and page code.
///
/// Nothing here is shared with sibling contexts.
pub(crate) struct BrowsingContext {
    pub(crate) id: ContextId,
    offline: AtomicBool,
    closed: AtomicBool,
    cache: RwLock<HashMap<String, Response>>,
    pub(crate) events: Arc<EventLog>,
}

impl BrowsingContext {
    pub(crate) fn new(id: ContextId) -> Self {
        Self {
            id,
            offline: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cache: RwLock::new(HashMap::new()),
            events: Arc::new(EventLog::default()),
        }
    }

    #[inline]
    pub(crate) fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.events.close();
        self.cache.write().clear();
    }

    pub(crate) fn cache_put(&self, url: String, response: Response) {
        self.cache.write().insert(url, response);
    }

    pub(crate) fn cache_match(&self, url: &str) -> Option<Response> {
        self.cache.read().get(url).cloned()
    }

    pub(crate) fn cache_clear(&self) {
        self.cache.write().clear();
    }

    pub(crate) fn cache_len(&self) -> usize {
        self.cache.read().len()
    }
}

//! The environment controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{debug, info};
use visreg_core::{CancelToken, ContextId};

use crate::context::BrowsingContext;
use crate::events::{BrowserEvent, EventKind, Subscription, WaitError};
use crate::manifest::{ManifestError, WebManifest};
use crate::network::{FetchOutcome, Network, Request, RequestOrigin, Response, ServedFrom};
use crate::{EnvError, Result};

/// Controls connectivity, cache storage and event delivery for a set of
/// isolated browsing contexts.
pub struct EnvironmentController {
    network: Arc<dyn Network>,
    contexts: RwLock<HashMap<ContextId, Arc<BrowsingContext>>>,
}

impl EnvironmentController {
    pub fn new(network: Arc<dyn Network>) -> Self {
        Self {
            network,
            contexts: RwLock::new(HashMap::new()),
        }
    }

    /// Open a fresh, online browsing context.
    pub fn open_context(&self) -> ContextId {
        let id = ContextId::next();
        self.contexts
            .write()
            .insert(id, Arc::new(BrowsingContext::new(id)));
        debug!("Opened {}", id);
        id
    }

    /// Close a context. Pending event waits on it fail with `ContextClosed`.
    pub fn close_context(&self, context: ContextId) -> Result<()> {
        let ctx = self.live(context)?;
        ctx.close();
        debug!("Closed {}", context);
        Ok(())
    }

    /// Toggle simulated connectivity.
    ///
    /// Takes effect for every request the context issues afterwards, from
    /// any thread. Fails immediately on closed or unknown contexts.
    pub fn set_offline(&self, context: ContextId, offline: bool) -> Result<()> {
        let ctx = self.live(context)?;
        ctx.set_offline(offline);
        info!(
            "{} is now {}",
            context,
            if offline { "offline" } else { "online" }
        );
        Ok(())
    }

    pub fn is_offline(&self, context: ContextId) -> Result<bool> {
        Ok(self.live(context)?.is_offline())
    }

    /// Issue a request on behalf of a context.
    ///
    /// While the context is offline the live network is never reached: the
    /// request is answered from the context's cache storage or fails with
    /// `Offline`.
    pub fn fetch(
        &self,
        context: ContextId,
        request: &Request,
        origin: RequestOrigin,
    ) -> Result<FetchOutcome> {
        let ctx = self.live(context)?;

        if ctx.is_offline() {
            if let Some(response) = ctx.cache_match(&request.url) {
                debug!("{} {:?} served {} from cache", context, origin, request.url);
                return Ok(FetchOutcome {
                    response,
                    served_from: ServedFrom::Cache,
                    origin,
                });
            }
            debug!("{} {:?} blocked {} while offline", context, origin, request.url);
            return Err(EnvError::Offline {
                context,
                url: request.url.clone(),
            });
        }

        let response = self.network.fetch(context, request)?;
        debug!(
            "{} {:?} fetched {} ({})",
            context, origin, request.url, response.status
        );
        Ok(FetchOutcome {
            response,
            served_from: ServedFrom::Network,
            origin,
        })
    }

    /// Store a response in the context's cache storage.
    pub fn cache_put(&self, context: ContextId, url: impl Into<String>, response: Response) -> Result<()> {
        self.live(context)?.cache_put(url.into(), response);
        Ok(())
    }

    pub fn cache_match(&self, context: ContextId, url: &str) -> Result<Option<Response>> {
        Ok(self.live(context)?.cache_match(url))
    }

    pub fn cache_clear(&self, context: ContextId) -> Result<()> {
        self.live(context)?.cache_clear();
        Ok(())
    }

    /// Number of cached entries.
    pub fn cache_len(&self, context: ContextId) -> Result<usize> {
        Ok(self.live(context)?.cache_len())
    }

    /// Record a browser-originated event.
    ///
    /// This is the hook the browser side calls; tests call it to simulate
    /// page behaviour.
    pub fn emit(
        &self,
        context: ContextId,
        kind: EventKind,
        identifier: impl Into<String>,
    ) -> Result<BrowserEvent> {
        let ctx = self.live(context)?;
        let event = ctx.events.emit(context, kind, identifier.into());
        debug!("{} emitted {} ({})", context, event.kind, event.identifier);
        Ok(event)
    }

    /// Register interest in future events of `kind`.
    ///
    /// Only events emitted after this call are delivered; use
    /// [`occurrences`](Self::occurrences) for earlier ones.
    pub fn subscribe(&self, context: ContextId, kind: EventKind) -> Result<Subscription> {
        let ctx = self.live(context)?;
        Ok(ctx.events.subscribe(context, kind))
    }

    /// Events of `kind` that have already occurred, oldest first.
    pub fn occurrences(&self, context: ContextId, kind: &EventKind) -> Result<Vec<BrowserEvent>> {
        Ok(self.live(context)?.events.occurrences(kind))
    }

    /// Wait for an event matching `predicate`, whether it already happened
    /// or happens within `timeout`.
    pub fn wait_for_event(
        &self,
        context: ContextId,
        kind: EventKind,
        predicate: impl Fn(&BrowserEvent) -> bool,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<BrowserEvent> {
        // Register before reading the snapshot so nothing falls in between.
        let subscription = self.subscribe(context, kind.clone())?;
        if let Some(event) = self
            .occurrences(context, &kind)?
            .into_iter()
            .find(|e| e.seq < subscription.start_seq() && predicate(e))
        {
            return Ok(event);
        }

        let deadline = Instant::now().checked_add(timeout);
        loop {
            let remaining = deadline.map_or(timeout, |d| d.saturating_duration_since(Instant::now()));
            if remaining.is_zero() {
                return Err(WaitError::Timeout { kind, timeout }.into());
            }
            let event = subscription.next(remaining, cancel).map_err(|e| match e {
                WaitError::Timeout { kind, .. } => WaitError::Timeout { kind, timeout },
                other => other,
            })?;
            if predicate(&event) {
                return Ok(event);
            }
        }
    }

    /// Fetch and validate a web app manifest.
    pub fn fetch_manifest(&self, context: ContextId, url: &str) -> Result<WebManifest> {
        let outcome = self.fetch(context, &Request::get(url), RequestOrigin::MainThread)?;
        if !outcome.response.is_success() {
            return Err(ManifestError::Status {
                url: url.to_string(),
                status: outcome.response.status,
            }
            .into());
        }
        let manifest = WebManifest::parse(&outcome.response.body)?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn live(&self, context: ContextId) -> Result<Arc<BrowsingContext>> {
        let ctx = self
            .contexts
            .read()
            .get(&context)
            .cloned()
            .ok_or(EnvError::UnknownContext(context))?;
        if ctx.is_closed() {
            return Err(EnvError::ContextClosed(ctx.id));
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::StubNetwork;
    use std::thread;
    use visreg_core::WorkerId;

    const APP: &str = "https://app.test/index.html";
    const API: &str = "https://app.test/api/data";

    fn controller() -> (EnvironmentController, Arc<StubNetwork>) {
        let network = Arc::new(
            StubNetwork::new()
                .route(APP, Response::ok("text/html", "<html></html>"))
                .route(API, Response::ok("application/json", "{}")),
        );
        (
            EnvironmentController::new(Arc::clone(&network) as Arc<dyn Network>),
            network,
        )
    }

    #[test]
    fn online_requests_reach_network() {
        let (env, network) = controller();
        let ctx = env.open_context();

        let outcome = env
            .fetch(ctx, &Request::get(APP), RequestOrigin::MainThread)
            .unwrap();
        assert_eq!(outcome.served_from, ServedFrom::Network);
        assert_eq!(network.requests().len(), 1);
    }

    #[test]
    fn offline_never_reaches_network() {
        let (env, network) = controller();
        let ctx = env.open_context();
        env.cache_put(ctx, APP, Response::ok("text/html", "cached"))
            .unwrap();

        env.set_offline(ctx, true).unwrap();

        let cached = env
            .fetch(ctx, &Request::get(APP), RequestOrigin::MainThread)
            .unwrap();
        assert_eq!(cached.served_from, ServedFrom::Cache);
        assert_eq!(cached.response.text(), "cached");

        let err = env
            .fetch(ctx, &Request::get(API), RequestOrigin::MainThread)
            .unwrap_err();
        assert!(matches!(err, EnvError::Offline { .. }));

        assert!(network.requests().is_empty());
    }

    #[test]
    fn offline_applies_to_worker_requests() {
        let (env, network) = controller();
        let env = Arc::new(env);
        let ctx = env.open_context();
        env.set_offline(ctx, true).unwrap();

        let worker_env = Arc::clone(&env);
        let result = thread::spawn(move || {
            worker_env.fetch(ctx, &Request::get(API), RequestOrigin::Worker(WorkerId(1)))
        })
        .join()
        .unwrap();

        assert!(matches!(result, Err(EnvError::Offline { .. })));
        assert!(network.requests().is_empty());
    }

    #[test]
    fn going_back_online_restores_network() {
        let (env, network) = controller();
        let ctx = env.open_context();
        env.set_offline(ctx, true).unwrap();
        env.set_offline(ctx, false).unwrap();

        assert!(!env.is_offline(ctx).unwrap());
        assert!(env
            .fetch(ctx, &Request::get(API), RequestOrigin::MainThread)
            .is_ok());
        assert_eq!(network.requests().len(), 1);
    }

    #[test]
    fn contexts_are_isolated() {
        let (env, _network) = controller();
        let a = env.open_context();
        let b = env.open_context();

        env.set_offline(a, true).unwrap();
        env.cache_put(a, APP, Response::ok("text/html", "a")).unwrap();
        env.emit(a, EventKind::WorkerRegistered, "/sw.js").unwrap();

        assert!(!env.is_offline(b).unwrap());
        assert!(env.cache_match(b, APP).unwrap().is_none());
        assert!(env
            .occurrences(b, &EventKind::WorkerRegistered)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn closed_context_fails_immediately() {
        let (env, _network) = controller();
        let ctx = env.open_context();
        env.close_context(ctx).unwrap();

        assert!(matches!(
            env.set_offline(ctx, true),
            Err(EnvError::ContextClosed(_))
        ));
        assert!(matches!(
            env.fetch(ctx, &Request::get(APP), RequestOrigin::MainThread),
            Err(EnvError::ContextClosed(_))
        ));
    }

    #[test]
    fn unknown_context() {
        let (env, _network) = controller();
        assert!(matches!(
            env.set_offline(ContextId::next(), true),
            Err(EnvError::UnknownContext(_))
        ));
    }

    #[test]
    fn wait_for_event_sees_past_occurrence() {
        let (env, _network) = controller();
        let ctx = env.open_context();
        env.emit(ctx, EventKind::WorkerRegistered, "/sw.js").unwrap();

        let event = env
            .wait_for_event(
                ctx,
                EventKind::WorkerRegistered,
                |e| e.identifier == "/sw.js",
                Duration::from_millis(10),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(event.seq, 0);
    }

    #[test]
    fn wait_for_event_skips_non_matching() {
        let (env, _network) = controller();
        let env = Arc::new(env);
        let ctx = env.open_context();

        let page = Arc::clone(&env);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            page.emit(ctx, EventKind::WorkerRegistered, "/other-sw.js")
                .unwrap();
            page.emit(ctx, EventKind::WorkerRegistered, "/sw.js").unwrap();
        });

        let event = env
            .wait_for_event(
                ctx,
                EventKind::WorkerRegistered,
                |e| e.identifier == "/sw.js",
                Duration::from_secs(5),
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(event.seq, 1);
        handle.join().unwrap();
    }

    #[test]
    fn wait_for_event_times_out() {
        let (env, _network) = controller();
        let ctx = env.open_context();
        let err = env
            .wait_for_event(
                ctx,
                EventKind::DownloadStarted,
                |_| true,
                Duration::from_millis(30),
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            EnvError::Wait(WaitError::Timeout { timeout, .. }) if timeout == Duration::from_millis(30)
        ));
    }

    #[test]
    fn wait_for_event_without_deadline() {
        let (env, _network) = controller();
        let env = Arc::new(env);
        let ctx = env.open_context();

        let page = Arc::clone(&env);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            page.emit(ctx, EventKind::DownloadStarted, "report.csv").unwrap();
        });
        let event = env
            .wait_for_event(
                ctx,
                EventKind::DownloadStarted,
                |_| true,
                Duration::MAX,
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(event.identifier, "report.csv");
        handle.join().unwrap();

        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });
        let err = env
            .wait_for_event(ctx, EventKind::ConsoleMessage, |_| true, Duration::MAX, &cancel)
            .unwrap_err();
        assert!(matches!(err, EnvError::Wait(WaitError::Cancelled { .. })));
        handle.join().unwrap();
    }
}


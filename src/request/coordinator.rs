//! Request Cache Coordinator
//!
//! Decides per request whether cached data is served, refreshed in the
//! background or fetched first, writes network results through every cache
//! tier and delivers outcomes to weakly held callbacks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::cache::{normalize_key, CachedResponse, ResponseStore};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::Result;
use crate::freshness::{CacheMetadata, FetchDecision, Freshness};
use crate::request::decoded::{AnyValue, DecodedObjectCache};
use crate::request::parser::Parser;
use crate::request::query::{CachePolicy, Request};
use crate::request::result::{
    FailureKind, NetworkFailure, NetworkResponse, QueryCallback, ResultCode, ResultInfo,
};

// == Fetch Seam ==
/// Identifies one network fetch issued by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub id: u64,
    pub query_id: u64,
    pub key: String,
    /// The fetch refreshes stale data that was already delivered
    pub refresh: bool,
}

/// Transport side: performs the fetch and reports back through
/// [`RequestCacheCoordinator::on_network_result`] or
/// [`RequestCacheCoordinator::on_network_failure`].
pub trait Fetcher: Send + Sync {
    fn issue_fetch(&self, ticket: FetchTicket);
}

/// What `submit` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Fresh data delivered, nothing fetched
    Served,
    /// Stale data delivered, refresh issued
    Refreshing(FetchTicket),
    /// Nothing deliverable yet, fetch issued
    Fetching(FetchTicket),
}

impl Submission {
    pub fn ticket(&self) -> Option<&FetchTicket> {
        match self {
            Submission::Served => None,
            Submission::Refreshing(ticket) | Submission::Fetching(ticket) => Some(ticket),
        }
    }
}

/// A cached value found by [`RequestCacheCoordinator::lookup`].
#[derive(Debug)]
pub struct CacheHit<T> {
    pub value: Arc<T>,
    pub metadata: CacheMetadata,
    pub freshness: Freshness,
}

// == Pending Deliveries ==
/// Typed half of an in-flight fetch, erased so fetches of any type share a map.
trait PendingDelivery: Send {
    fn decode(&self, body: &[u8]) -> Result<AnyValue>;

    fn deliver_value(&self, info: &ResultInfo, value: AnyValue);

    fn deliver_failure(&self, info: &ResultInfo, failure: &NetworkFailure);
}

struct TypedDelivery<T, E> {
    query_id: u64,
    callback: Weak<dyn QueryCallback<T, E>>,
    parser: Parser<T>,
    error_parser: Option<Parser<E>>,
}

impl<T, E> PendingDelivery for TypedDelivery<T, E>
where
    T: Send + Sync + 'static,
    E: Send + 'static,
{
    fn decode(&self, body: &[u8]) -> Result<AnyValue> {
        let value: AnyValue = Arc::new(self.parser.parse(body)?);
        Ok(value)
    }

    fn deliver_value(&self, info: &ResultInfo, value: AnyValue) {
        match value.downcast::<T>() {
            Ok(value) => deliver(&self.callback, self.query_id, info, Some(value), None),
            Err(_) => warn!(query_id = self.query_id, "decoded value has an unexpected type"),
        }
    }

    fn deliver_failure(&self, info: &ResultInfo, failure: &NetworkFailure) {
        let error = match (&self.error_parser, &failure.body) {
            (Some(parser), Some(body)) if failure.has_error_payload() => match parser.parse(body) {
                Ok(error) => Some(error),
                Err(err) => {
                    debug!(query_id = self.query_id, "error payload not decodable: {err}");
                    None
                }
            },
            _ => None,
        };
        deliver(&self.callback, self.query_id, info, None, error);
    }
}

fn deliver<T, E>(
    callback: &Weak<dyn QueryCallback<T, E>>,
    query_id: u64,
    info: &ResultInfo,
    data: Option<Arc<T>>,
    error: Option<E>,
) {
    match callback.upgrade() {
        Some(callback) => {
            trace!(query_id, code = ?info.code, "delivering result");
            callback.on_query_finished(query_id, info, data, error);
        }
        None => debug!(query_id, "callback dropped, result discarded"),
    }
}

struct InFlight {
    key: String,
    policy: CachePolicy,
    delivery: Box<dyn PendingDelivery>,
    cancelled: bool,
}

// == Request Cache Coordinator ==
pub struct RequestCacheCoordinator {
    store: Arc<ResponseStore>,
    decoded: DecodedObjectCache,
    fetcher: Arc<dyn Fetcher>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<HashMap<u64, InFlight>>,
    next_ticket: AtomicU64,
}

impl RequestCacheCoordinator {
    // == Constructor ==
    pub fn new(
        store: Arc<ResponseStore>,
        decoded: DecodedObjectCache,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            store,
            decoded,
            fetcher,
            clock: Arc::new(SystemClock),
            in_flight: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Opens every tier described by `config`.
    pub fn from_config(config: &Config, fetcher: Arc<dyn Fetcher>) -> Self {
        Self::new(
            Arc::new(ResponseStore::from_config(config)),
            DecodedObjectCache::new(config.decoded_entries),
            fetcher,
        )
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<ResponseStore> {
        &self.store
    }

    pub fn decoded(&self) -> &DecodedObjectCache {
        &self.decoded
    }

    /// Fetches issued but not yet completed, cancelled ones included.
    pub fn pending_fetches(&self) -> usize {
        self.in_flight.lock().len()
    }

    // == Lookup ==
    /// Servable cached data for `request`, decoded-object cache first.
    ///
    /// Expired data and requests that do not cache are misses.
    pub fn lookup<T, E>(&self, request: &Request<T, E>) -> Option<CacheHit<T>>
    where
        T: Send + Sync + 'static,
    {
        if !request.policy().caches() {
            return None;
        }
        self.resolve(request)
            .filter(|hit| hit.freshness.is_servable())
    }

    fn resolve<T, E>(&self, request: &Request<T, E>) -> Option<CacheHit<T>>
    where
        T: Send + Sync + 'static,
    {
        let now = self.clock.now_ms();
        let policy = request.policy();
        let key = request.key();

        if policy.decoded.reads() {
            if let Some((value, metadata)) = self.decoded.get::<T>(key) {
                let freshness = metadata.classify(now);
                if freshness.is_servable() {
                    trace!(key, ?freshness, "decoded object hit");
                    return Some(CacheHit {
                        value,
                        metadata,
                        freshness,
                    });
                }
            }
        }

        let cached = self.store.get_from(key, policy.family)?;
        let value = match request.parser().parse(&cached.payload) {
            Ok(value) => Arc::new(value),
            Err(err) => {
                debug!(key, "cached payload not decodable, treating as miss: {err}");
                self.store.remove(key);
                return None;
            }
        };
        if policy.decoded.writes() {
            self.decoded.put(key, Arc::clone(&value), cached.metadata);
        }
        Some(CacheHit {
            value,
            metadata: cached.metadata,
            freshness: cached.metadata.classify(now),
        })
    }

    // == Submit ==
    /// Serves `request` from cache where possible and issues the fetch the
    /// freshness of the cached data calls for.
    ///
    /// Only a weak reference to `callback` is kept.
    pub fn submit<T, E, C>(&self, request: &Request<T, E>, callback: &Arc<C>) -> Submission
    where
        T: Send + Sync + 'static,
        E: Send + 'static,
        C: QueryCallback<T, E> + 'static,
    {
        let weak: Weak<C> = Arc::downgrade(callback);
        let weak: Weak<dyn QueryCallback<T, E>> = weak;
        let hit = self.lookup(request);
        let decision = match &hit {
            Some(hit) => hit.freshness.fetch_decision(),
            None => FetchDecision::Blocking,
        };

        if let Some(hit) = hit {
            let mut info = ResultInfo::success(hit.metadata.server_timestamp);
            info.data_is_refreshing = decision == FetchDecision::Background;
            deliver(&weak, request.id(), &info, Some(hit.value), None);
        }

        match decision {
            FetchDecision::None => Submission::Served,
            FetchDecision::Background => {
                Submission::Refreshing(self.start_fetch(request, weak, true))
            }
            FetchDecision::Blocking => {
                Submission::Fetching(self.start_fetch(request, weak, false))
            }
        }
    }

    /// Delivers whatever is cached for `request`, regardless of age, without
    /// touching the network. A miss is delivered as a server error.
    pub fn lookup_cached_only<T, E, C>(&self, request: &Request<T, E>, callback: &Arc<C>)
    where
        T: Send + Sync + 'static,
        E: Send + 'static,
        C: QueryCallback<T, E> + 'static,
    {
        let weak: Weak<C> = Arc::downgrade(callback);
        let weak: Weak<dyn QueryCallback<T, E>> = weak;
        match self.resolve(request) {
            Some(hit) => {
                let info = ResultInfo::success(hit.metadata.server_timestamp);
                deliver(&weak, request.id(), &info, Some(hit.value), None);
            }
            None => {
                let info = ResultInfo::failure(ResultCode::ServerError, None);
                deliver(&weak, request.id(), &info, None, None);
            }
        }
    }

    fn start_fetch<T, E>(
        &self,
        request: &Request<T, E>,
        callback: Weak<dyn QueryCallback<T, E>>,
        refresh: bool,
    ) -> FetchTicket
    where
        T: Send + Sync + 'static,
        E: Send + 'static,
    {
        let ticket = FetchTicket {
            id: self.next_ticket.fetch_add(1, Ordering::Relaxed),
            query_id: request.id(),
            key: request.key().to_string(),
            refresh,
        };
        let delivery = TypedDelivery {
            query_id: request.id(),
            callback,
            parser: request.parser().clone(),
            error_parser: request.error_parser().cloned(),
        };
        self.in_flight.lock().insert(
            ticket.id,
            InFlight {
                key: ticket.key.clone(),
                policy: *request.policy(),
                delivery: Box::new(delivery),
                cancelled: false,
            },
        );

        debug!(ticket = ticket.id, key = %ticket.key, refresh, "issuing fetch");
        self.fetcher.issue_fetch(ticket.clone());
        ticket
    }

    // == Network Completion ==
    /// Decodes a fetched response, writes it through every tier the policy
    /// allows and delivers it.
    ///
    /// Results for unknown tickets, including those dropped by
    /// [`clear_all`](Self::clear_all), are ignored. Undecodable bodies are not
    /// cached and are delivered as server errors.
    pub fn on_network_result(&self, ticket: &FetchTicket, response: NetworkResponse) {
        if !response.is_success() {
            let failure = NetworkFailure::http(response.status, response.body);
            self.on_network_failure(ticket, failure);
            return;
        }
        let Some(flight) = self.in_flight.lock().remove(&ticket.id) else {
            debug!(ticket = ticket.id, "result for unknown fetch discarded");
            return;
        };

        let value = match flight.delivery.decode(&response.body) {
            Ok(value) => value,
            Err(err) => {
                warn!(key = %flight.key, "response body not decodable: {err}");
                if !flight.cancelled {
                    let mut info =
                        ResultInfo::failure(ResultCode::ServerError, Some(response.status));
                    info.is_refresh = ticket.refresh;
                    deliver_failure(&flight, &info);
                }
                return;
            }
        };

        let now = self.clock.now_ms();
        let policy = flight.policy;
        let metadata = CacheMetadata::from_ttl(
            response.server_timestamp(now),
            now,
            policy.time_to_refresh,
            policy.time_to_live,
        )
        .retained(policy.always_retain);

        if policy.caches() {
            let cached =
                CachedResponse::new(normalize_key(&flight.key), metadata, response.body)
                    .with_headers(response.headers);
            self.store.put(&flight.key, Arc::new(cached), policy.placement());
        }
        if policy.decoded.writes() {
            self.decoded.put_any(&flight.key, Arc::clone(&value), metadata);
        }

        if flight.cancelled {
            debug!(ticket = ticket.id, "fetch was cancelled, result cached only");
            return;
        }
        let mut info = ResultInfo::success(metadata.server_timestamp);
        info.http_status = Some(response.status);
        info.is_refresh = ticket.refresh;
        flight.delivery.deliver_value(&info, value);
    }

    /// Classifies the failure and delivers it; nothing is retried.
    pub fn on_network_failure(&self, ticket: &FetchTicket, failure: NetworkFailure) {
        let Some(flight) = self.in_flight.lock().remove(&ticket.id) else {
            debug!(ticket = ticket.id, "failure for unknown fetch discarded");
            return;
        };
        if flight.cancelled {
            return;
        }

        let mut info = ResultInfo::failure(failure.classify(), failure.http_status);
        info.is_refresh = ticket.refresh;
        info.error_body = failure
            .body
            .as_deref()
            .filter(|body| !body.is_empty())
            .map(|body| String::from_utf8_lossy(body).into_owned());
        debug!(key = %flight.key, code = ?info.code, "fetch failed: {}", failure.to_error());
        flight.delivery.deliver_failure(&info, &failure);
    }

    /// Stops delivery for `ticket`. A result still arriving is cached.
    pub fn cancel(&self, ticket: &FetchTicket) -> bool {
        match self.in_flight.lock().get_mut(&ticket.id) {
            Some(flight) => {
                flight.cancelled = true;
                true
            }
            None => false,
        }
    }

    // == Clearing ==
    /// Empties every cache and forgets all in-flight fetches.
    pub fn clear_all(&self) {
        let dropped = {
            let mut in_flight = self.in_flight.lock();
            let dropped = in_flight.len();
            in_flight.clear();
            dropped
        };
        self.decoded.clear();
        self.store.clear();
        info!(dropped_fetches = dropped, "all caches cleared");
    }

    /// Removes every cached response whose key satisfies `matches`, after
    /// emptying the decoded object cache. Returns the persistent records removed.
    pub fn clear_by_criteria(&self, matches: impl Fn(&str) -> bool) -> usize {
        self.decoded.clear();
        let removed = self.store.remove_where(matches);
        info!(removed, "cache cleared by criteria");
        removed
    }

    /// Removes every cached response whose key contains any of `criteria`.
    pub fn clear_matching(&self, criteria: &[&str]) -> usize {
        self.clear_by_criteria(|key| criteria.iter().any(|c| key.contains(c)))
    }
}

/// Undecodable success bodies surface as payload-less server errors.
fn deliver_failure(flight: &InFlight, info: &ResultInfo) {
    flight
        .delivery
        .deliver_failure(info, &NetworkFailure::new(FailureKind::ServerError));
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ByteWeigher, CacheFamilies, ResponseCodec, TieredValueCache};
    use crate::clock::ManualClock;
    use crate::request::parser::TextParser;
    use crate::request::query::DecodedCacheMode;
    use std::time::Duration;

    #[derive(Default)]
    struct Tickets(Mutex<Vec<FetchTicket>>);

    impl Fetcher for Tickets {
        fn issue_fetch(&self, ticket: FetchTicket) {
            self.0.lock().push(ticket);
        }
    }

    #[derive(Default)]
    struct Inbox(Mutex<Vec<(ResultInfo, Option<String>, Option<String>)>>);

    impl QueryCallback<String, String> for Inbox {
        fn on_query_finished(
            &self,
            _query_id: u64,
            info: &ResultInfo,
            data: Option<Arc<String>>,
            error: Option<String>,
        ) {
            self.0.lock().push((info.clone(), data.map(|d| (*d).clone()), error));
        }
    }

    fn coordinator() -> (RequestCacheCoordinator, Arc<Tickets>, Arc<ManualClock>) {
        let store = TieredValueCache::new(
            1 << 20,
            8,
            CacheFamilies::disabled(),
            ResponseCodec,
            ByteWeigher,
        );
        let fetcher = Arc::new(Tickets::default());
        let clock = Arc::new(ManualClock::new(10_000));
        let coordinator = RequestCacheCoordinator::new(
            Arc::new(store),
            DecodedObjectCache::new(4),
            fetcher.clone(),
        )
        .with_clock(clock.clone());
        (coordinator, fetcher, clock)
    }

    fn request(policy: CachePolicy) -> Request<String, String> {
        Request::new(7, "https://api/items", Parser::custom(TextParser))
            .with_policy(policy)
            .with_error_parser(Parser::custom(TextParser))
    }

    fn cached_policy() -> CachePolicy {
        CachePolicy::ttl(Duration::from_millis(100), Duration::from_millis(500))
    }

    #[test]
    fn test_miss_fetches_then_delivers_and_caches() {
        let (coordinator, fetcher, _) = coordinator();
        let inbox = Arc::new(Inbox::default());
        let request = request(cached_policy());

        let submission = coordinator.submit(&request, &inbox);
        let Submission::Fetching(ticket) = &submission else {
            panic!("expected a blocking fetch, got {submission:?}");
        };
        assert!(inbox.0.lock().is_empty());
        assert_eq!(fetcher.0.lock().len(), 1);

        coordinator.on_network_result(ticket, NetworkResponse::ok("body"));
        let delivered = inbox.0.lock();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].0.is_success());
        assert!(!delivered[0].0.is_refresh);
        assert_eq!(delivered[0].1.as_deref(), Some("body"));

        let hit = coordinator.lookup(&request).unwrap();
        assert_eq!(*hit.value, "body");
        assert_eq!(hit.freshness, Freshness::Fresh);
        assert_eq!(coordinator.pending_fetches(), 0);
    }

    #[test]
    fn test_no_cache_policy_never_stores() {
        let (coordinator, _, _) = coordinator();
        let inbox = Arc::new(Inbox::default());
        let request = request(CachePolicy::no_cache());

        let ticket = coordinator.submit(&request, &inbox).ticket().cloned().unwrap();
        coordinator.on_network_result(&ticket, NetworkResponse::ok("body"));

        assert_eq!(inbox.0.lock().len(), 1);
        assert!(coordinator.store().get("https://api/items").is_none());
        assert!(matches!(coordinator.submit(&request, &inbox), Submission::Fetching(_)));
    }

    #[test]
    fn test_stale_hit_delivers_twice() {
        let (coordinator, fetcher, clock) = coordinator();
        let inbox = Arc::new(Inbox::default());
        let request = request(cached_policy());

        let ticket = coordinator.submit(&request, &inbox).ticket().cloned().unwrap();
        coordinator.on_network_result(&ticket, NetworkResponse::ok("v1"));

        clock.advance(Duration::from_millis(200));
        let submission = coordinator.submit(&request, &inbox);
        let Submission::Refreshing(refresh) = &submission else {
            panic!("expected a background refresh, got {submission:?}");
        };
        assert!(refresh.refresh);
        assert_eq!(fetcher.0.lock().len(), 2);

        coordinator.on_network_result(refresh, NetworkResponse::ok("v2"));
        let delivered = inbox.0.lock();
        assert_eq!(delivered.len(), 3);
        assert!(delivered[1].0.data_is_refreshing);
        assert_eq!(delivered[1].1.as_deref(), Some("v1"));
        assert!(delivered[2].0.is_refresh);
        assert_eq!(delivered[2].1.as_deref(), Some("v2"));
    }

    #[test]
    fn test_undecodable_response_is_not_cached() {
        let (coordinator, _, _) = coordinator();
        let inbox = Arc::new(Inbox::default());
        let request = request(cached_policy());

        let ticket = coordinator.submit(&request, &inbox).ticket().cloned().unwrap();
        coordinator.on_network_result(&ticket, NetworkResponse::ok(vec![0xff, 0xfe]));

        let delivered = inbox.0.lock();
        assert_eq!(delivered[0].0.code, ResultCode::ServerError);
        assert!(delivered[0].1.is_none());
        assert!(coordinator.lookup(&request).is_none());
    }

    #[test]
    fn test_http_error_status_goes_through_failure_path() {
        let (coordinator, _, _) = coordinator();
        let inbox = Arc::new(Inbox::default());
        let request = request(cached_policy());

        let ticket = coordinator.submit(&request, &inbox).ticket().cloned().unwrap();
        coordinator.on_network_result(&ticket, NetworkResponse::new(500, "boom"));

        let delivered = inbox.0.lock();
        assert_eq!(delivered[0].0.code, ResultCode::ServerError);
        assert_eq!(delivered[0].0.http_status, Some(500));
        assert_eq!(delivered[0].0.error_body.as_deref(), Some("boom"));
        assert_eq!(delivered[0].2.as_deref(), Some("boom"));
    }

    #[test]
    fn test_decoded_cache_serves_repeat_lookups() {
        let (coordinator, _, _) = coordinator();
        let inbox = Arc::new(Inbox::default());
        let request = request(cached_policy().with_decoded(DecodedCacheMode::ReadWrite));

        let ticket = coordinator.submit(&request, &inbox).ticket().cloned().unwrap();
        coordinator.on_network_result(&ticket, NetworkResponse::ok("body"));
        assert_eq!(coordinator.decoded().len(), 1);

        // gone from the byte tiers, still served decoded
        coordinator.store().remove("https://api/items");
        assert_eq!(*coordinator.lookup(&request).unwrap().value, "body");
    }

    #[test]
    fn test_cancelled_fetch_still_caches() {
        let (coordinator, _, _) = coordinator();
        let inbox = Arc::new(Inbox::default());
        let request = request(cached_policy());

        let ticket = coordinator.submit(&request, &inbox).ticket().cloned().unwrap();
        assert!(coordinator.cancel(&ticket));
        coordinator.on_network_result(&ticket, NetworkResponse::ok("body"));

        assert!(inbox.0.lock().is_empty());
        assert!(coordinator.lookup(&request).is_some());
        assert!(!coordinator.cancel(&ticket));
    }

    #[test]
    fn test_clear_all_discards_late_results() {
        let (coordinator, _, _) = coordinator();
        let inbox = Arc::new(Inbox::default());
        let request = request(cached_policy());

        let ticket = coordinator.submit(&request, &inbox).ticket().cloned().unwrap();
        coordinator.clear_all();
        coordinator.on_network_result(&ticket, NetworkResponse::ok("body"));

        assert!(inbox.0.lock().is_empty());
        assert!(coordinator.lookup(&request).is_none());
    }

    #[test]
    fn test_cached_only_lookup() {
        let (coordinator, _, clock) = coordinator();
        let inbox = Arc::new(Inbox::default());
        let request = request(cached_policy());

        coordinator.lookup_cached_only(&request, &inbox);
        assert_eq!(inbox.0.lock()[0].0.code, ResultCode::ServerError);

        let ticket = coordinator.submit(&request, &inbox).ticket().cloned().unwrap();
        coordinator.on_network_result(&ticket, NetworkResponse::ok("body"));
        clock.advance(Duration::from_secs(60));

        coordinator.lookup_cached_only(&request, &inbox);
        let delivered = inbox.0.lock();
        let last = delivered.last().unwrap();
        assert!(last.0.is_success());
        assert_eq!(last.1.as_deref(), Some("body"));
    }
}

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use foundation::Waypoint;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::residency::RouteState;
use crate::route::{Route, RouteKey};
use crate::routing::{RoutingError, RoutingService};

#[derive(Debug)]
pub enum RouteError {
    /// Rejected before any request was made.
    InvalidWaypoints(String),
    /// The routing collaborator could not produce a route.
    Unavailable(RoutingError),
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteError::InvalidWaypoints(msg) => write!(f, "invalid waypoints: {msg}"),
            RouteError::Unavailable(err) => write!(f, "route unavailable: {err}"),
        }
    }
}

impl std::error::Error for RouteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RouteError::InvalidWaypoints(_) => None,
            RouteError::Unavailable(err) => Some(err),
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    cell: Arc<OnceCell<Arc<Route>>>,
    last_used_tick: u64,
    last_error: Option<String>,
}

impl CacheEntry {
    /// A caller holds the cell and it has no value yet.
    fn in_flight(&self) -> bool {
        !self.cell.initialized() && Arc::strong_count(&self.cell) > 1
    }
}

#[derive(Debug, Default)]
struct Inner {
    tick: u64,
    entries: BTreeMap<RouteKey, CacheEntry>,
}

/// Session route cache in front of a routing collaborator.
///
/// - One entry per distinct ordered waypoint set (`RouteKey`).
/// - At most one outstanding request per key; concurrent callers share it.
/// - Failures are not cached, the next call for the key tries again.
/// - Beyond `capacity` resident routes, the least recently used one is evicted
///   (tie-break by key ordering).
pub struct RouteCache {
    router: Arc<dyn RoutingService>,
    capacity: usize,
    inner: Mutex<Inner>,
    requests: AtomicU64,
    hits: AtomicU64,
}

impl RouteCache {
    pub const DEFAULT_CAPACITY: usize = 16;

    pub fn new(router: Arc<dyn RoutingService>) -> Self {
        Self::with_capacity(router, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(router: Arc<dyn RoutingService>, capacity: usize) -> Self {
        Self {
            router,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
            requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    pub fn router_name(&self) -> &str {
        self.router.name()
    }

    /// Number of requests issued to the routing collaborator so far.
    pub fn requests_issued(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Number of calls answered without issuing a request.
    pub fn cache_hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn state(&self, waypoints: &[Waypoint]) -> Option<RouteState> {
        let key = RouteKey::for_waypoints(waypoints);
        let inner = self.inner.lock();
        let entry = inner.entries.get(&key)?;
        Some(if entry.cell.initialized() {
            RouteState::Resident
        } else if entry.last_error.is_some() {
            RouteState::Failed
        } else {
            RouteState::Pending
        })
    }

    /// Cached route for `waypoints`, if resident. Never issues a request.
    pub fn cached(&self, waypoints: &[Waypoint]) -> Option<Arc<Route>> {
        let key = RouteKey::for_waypoints(waypoints);
        let inner = self.inner.lock();
        inner.entries.get(&key)?.cell.get().cloned()
    }

    /// Route through `waypoints` in order.
    ///
    /// The first call for a waypoint set requests geometry from the collaborator;
    /// later calls return the cached route without a request.
    pub async fn get_route(&self, waypoints: &[Waypoint]) -> Result<Arc<Route>, RouteError> {
        validate_waypoints(waypoints)?;
        let key = RouteKey::for_waypoints(waypoints);

        let cell = {
            let mut inner = self.inner.lock();
            inner.tick += 1;
            let tick = inner.tick;
            let entry = inner.entries.entry(key).or_insert_with(|| CacheEntry {
                cell: Arc::new(OnceCell::new()),
                last_used_tick: tick,
                last_error: None,
            });
            entry.last_used_tick = tick;
            entry.cell.clone()
        };

        if let Some(route) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("route cache hit: {}", key.short());
            return Ok(route.clone());
        }

        let mut issued = false;
        let result = cell
            .get_or_try_init(|| {
                issued = true;
                self.requests.fetch_add(1, Ordering::Relaxed);
                self.fetch(key, waypoints)
            })
            .await;

        match result {
            Ok(route) => {
                if !issued {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                }
                let route = route.clone();
                let evicted = {
                    let mut inner = self.inner.lock();
                    if let Some(entry) = inner.entries.get_mut(&key) {
                        entry.last_error = None;
                    }
                    evict_as_needed(&mut inner, self.capacity, key)
                };
                for k in evicted {
                    debug!("route cache evicted {}", k.short());
                }
                Ok(route)
            }
            Err(err) => {
                warn!("route {} unavailable via {}: {err}", key.short(), self.router.name());
                if let Some(entry) = self.inner.lock().entries.get_mut(&key) {
                    entry.last_error = Some(err.to_string());
                }
                Err(RouteError::Unavailable(err))
            }
        }
    }

    async fn fetch(&self, key: RouteKey, waypoints: &[Waypoint]) -> Result<Arc<Route>, RoutingError> {
        let started = Instant::now();
        info!(
            "requesting route {} for {} waypoints via {}",
            key.short(),
            waypoints.len(),
            self.router.name()
        );
        let geometry = self.router.route(waypoints).await?;
        info!(
            "route {} ready: {} points, {:.1} km in {} ms",
            key.short(),
            geometry.points.len(),
            geometry.length_m() / 1000.0,
            started.elapsed().as_millis()
        );
        Ok(Arc::new(Route::new(waypoints.to_vec(), geometry)))
    }

    /// Drop the entry for `waypoints`. Returns `true` if one was removed.
    ///
    /// An entry with a request in flight is kept, so a later caller joins
    /// that request instead of issuing a second one.
    pub fn invalidate(&self, waypoints: &[Waypoint]) -> bool {
        let key = RouteKey::for_waypoints(waypoints);
        let mut inner = self.inner.lock();
        match inner.entries.get(&key) {
            Some(entry) if entry.in_flight() => {
                debug!("route {} in flight, not invalidated", key.short());
                false
            }
            Some(_) => inner.entries.remove(&key).is_some(),
            None => false,
        }
    }

    /// Drop every entry except the one for `waypoints`. Returns the dropped keys.
    ///
    /// Entries with a request in flight are kept, as in `invalidate`.
    pub fn retain_only(&self, waypoints: &[Waypoint]) -> Vec<RouteKey> {
        let keep = RouteKey::for_waypoints(waypoints);
        let mut inner = self.inner.lock();
        let dropped: Vec<RouteKey> = inner
            .entries
            .iter()
            .filter(|(k, e)| **k != keep && !e.in_flight())
            .map(|(k, _)| *k)
            .collect();
        for k in &dropped {
            inner.entries.remove(k);
        }
        dropped
    }
}

/// At least two waypoints, all with valid coordinates.
pub fn validate_waypoints(waypoints: &[Waypoint]) -> Result<(), RouteError> {
    if waypoints.len() < 2 {
        return Err(RouteError::InvalidWaypoints(format!(
            "need at least 2 waypoints, got {}",
            waypoints.len()
        )));
    }
    for (i, w) in waypoints.iter().enumerate() {
        if let Err(e) = w.coord().validate() {
            return Err(RouteError::InvalidWaypoints(format!("waypoint {i}: {e}")));
        }
    }
    Ok(())
}

fn evict_as_needed(inner: &mut Inner, capacity: usize, protected: RouteKey) -> Vec<RouteKey> {
    let mut evicted = Vec::new();
    loop {
        let resident = inner
            .entries
            .values()
            .filter(|e| e.cell.initialized())
            .count();
        if resident <= capacity {
            break;
        }
        let candidate = inner
            .entries
            .iter()
            .filter(|(k, e)| e.cell.initialized() && **k != protected)
            .min_by(|(ka, ea), (kb, eb)| {
                ea.last_used_tick
                    .cmp(&eb.last_used_tick)
                    .then_with(|| ka.cmp(kb))
            })
            .map(|(k, _)| *k);
        let Some(key) = candidate else {
            break;
        };
        inner.entries.remove(&key);
        evicted.push(key);
    }
    evicted
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use foundation::{LatLon, Waypoint};

    use super::{RouteCache, RouteError};
    use crate::residency::RouteState;
    use crate::route::RouteGeometry;
    use crate::routing::{BoxFuture, RoutingError, RoutingService};

    /// Counts requests; fails while `fail` is set; optionally slow.
    #[derive(Default)]
    struct CountingRouter {
        calls: AtomicU64,
        fail: AtomicBool,
        delay_ms: u64,
    }

    impl RoutingService for CountingRouter {
        fn name(&self) -> &str {
            "counting"
        }

        fn route<'a>(
            &'a self,
            waypoints: &'a [Waypoint],
        ) -> BoxFuture<'a, Result<RouteGeometry, RoutingError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
                }
                if self.fail.load(Ordering::SeqCst) {
                    return Err(RoutingError::new("routing service down"));
                }
                Ok(RouteGeometry::new(waypoints.iter().map(|w| w.coord()).collect()))
            })
        }
    }

    fn la_riverside() -> Vec<Waypoint> {
        vec![Waypoint::new(34.05, -118.24), Waypoint::new(33.95, -117.40)]
    }

    #[tokio::test]
    async fn second_identical_call_issues_no_request() {
        let router = Arc::new(CountingRouter::default());
        let cache = RouteCache::new(router.clone());
        let w = la_riverside();

        let first = cache.get_route(&w).await.unwrap();
        assert_eq!(router.calls.load(Ordering::SeqCst), 1);

        let second = cache.get_route(&w).await.unwrap();
        assert_eq!(router.calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.requests_issued(), 1);
        assert_eq!(cache.cache_hits(), 1);
        assert_eq!(cache.state(&w), Some(RouteState::Resident));
        assert_eq!(first.points()[0], LatLon::new(34.05, -118.24));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_request() {
        let router = Arc::new(CountingRouter {
            delay_ms: 50,
            ..Default::default()
        });
        let cache = Arc::new(RouteCache::new(router.clone()));
        let w = la_riverside();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let w = w.clone();
            tasks.push(tokio::spawn(async move { cache.get_route(&w).await.map(|r| r.key()) }));
        }
        for t in tasks {
            assert!(t.await.unwrap().is_ok());
        }
        assert_eq!(router.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.requests_issued(), 1);
    }

    #[tokio::test]
    async fn failure_is_reported_and_not_cached() {
        let router = Arc::new(CountingRouter::default());
        router.fail.store(true, Ordering::SeqCst);
        let cache = RouteCache::new(router.clone());
        let w = la_riverside();

        let err = cache.get_route(&w).await.unwrap_err();
        assert!(matches!(err, RouteError::Unavailable(_)));
        assert_eq!(cache.state(&w), Some(RouteState::Failed));
        assert!(cache.cached(&w).is_none());

        router.fail.store(false, Ordering::SeqCst);
        let route = cache.get_route(&w).await.unwrap();
        assert!(route.matches(&w));
        assert_eq!(router.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.state(&w), Some(RouteState::Resident));
    }

    #[tokio::test]
    async fn invalid_waypoints_issue_no_request() {
        let router = Arc::new(CountingRouter::default());
        let cache = RouteCache::new(router.clone());

        let one = vec![Waypoint::new(1.0, 1.0)];
        assert!(matches!(
            cache.get_route(&one).await,
            Err(RouteError::InvalidWaypoints(_))
        ));
        let bad = vec![Waypoint::new(1.0, 1.0), Waypoint::new(123.0, 1.0)];
        assert!(matches!(
            cache.get_route(&bad).await,
            Err(RouteError::InvalidWaypoints(_))
        ));
        assert_eq!(router.calls.load(Ordering::SeqCst), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn distinct_waypoint_sets_are_cached_separately() {
        let router = Arc::new(CountingRouter::default());
        let cache = RouteCache::new(router.clone());
        let a = la_riverside();
        let b = vec![Waypoint::new(40.71, -74.0), Waypoint::new(42.36, -71.06)];

        let ra = cache.get_route(&a).await.unwrap();
        let rb = cache.get_route(&b).await.unwrap();
        assert_ne!(ra.key(), rb.key());
        cache.get_route(&a).await.unwrap();
        cache.get_route(&b).await.unwrap();
        assert_eq!(router.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_a_new_request() {
        let router = Arc::new(CountingRouter::default());
        let cache = RouteCache::new(router.clone());
        let w = la_riverside();

        cache.get_route(&w).await.unwrap();
        assert!(cache.invalidate(&w));
        assert!(!cache.invalidate(&w));
        cache.get_route(&w).await.unwrap();
        assert_eq!(router.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_keeps_a_request_in_flight() {
        let router = Arc::new(CountingRouter {
            delay_ms: 50,
            ..Default::default()
        });
        let cache = Arc::new(RouteCache::new(router.clone()));
        let w = la_riverside();

        let first = {
            let cache = cache.clone();
            let w = w.clone();
            tokio::spawn(async move { cache.get_route(&w).await.map(|r| r.key()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.state(&w), Some(RouteState::Pending));
        assert!(!cache.invalidate(&w));
        assert!(cache.retain_only(&[]).is_empty());

        let second = cache.get_route(&w).await.unwrap();
        assert_eq!(first.await.unwrap().unwrap(), second.key());
        assert_eq!(router.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retain_only_drops_other_waypoint_sets() {
        let router = Arc::new(CountingRouter::default());
        let cache = RouteCache::new(router.clone());
        let a = la_riverside();
        let b = vec![Waypoint::new(40.71, -74.0), Waypoint::new(42.36, -71.06)];
        cache.get_route(&a).await.unwrap();
        let rb = cache.get_route(&b).await.unwrap();

        let dropped = cache.retain_only(&b);
        assert_eq!(dropped.len(), 1);
        assert!(cache.cached(&a).is_none());
        assert_eq!(cache.cached(&b).map(|r| r.key()), Some(rb.key()));
    }

    #[tokio::test]
    async fn evicts_least_recently_used_beyond_capacity() {
        let router = Arc::new(CountingRouter::default());
        let cache = RouteCache::with_capacity(router.clone(), 2);
        let a = vec![Waypoint::new(0.0, 0.0), Waypoint::new(0.0, 1.0)];
        let b = vec![Waypoint::new(1.0, 0.0), Waypoint::new(1.0, 1.0)];
        let c = vec![Waypoint::new(2.0, 0.0), Waypoint::new(2.0, 1.0)];

        cache.get_route(&a).await.unwrap();
        cache.get_route(&b).await.unwrap();
        // Touch `a` so `b` is the oldest.
        cache.get_route(&a).await.unwrap();
        cache.get_route(&c).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.cached(&a).is_some());
        assert!(cache.cached(&b).is_none());
        assert!(cache.cached(&c).is_some());
    }
}

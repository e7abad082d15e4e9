/// Lifecycle of a cached route as seen by callers.
///
/// Pending → Resident, or Pending → Failed → Pending on retry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RouteState {
    /// Known to the cache, no geometry yet.
    Pending,
    /// Geometry is cached and will be served without a request.
    Resident,
    /// The last request for this waypoint set failed; the next call retries.
    Failed,
}

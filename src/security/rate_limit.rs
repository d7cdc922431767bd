//! Per-IP token bucket rate limiting.
//!
//! # Responsibilities
//! - Gate new connections per source IP with a token bucket
//! - Refill lazily on access (no background timer)
//! - Bound the number of tracked IPs
//!
//! # Design Decisions
//! - One mutex guards the whole bucket map; a check is O(1)
//! - Rate 0 disables limiting entirely
//! - Full buckets are evicted first since they carry no state

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::Instant;

use crate::config::TokenBucketConfig;

/// Anything that can decide whether a source IP may open another connection.
pub trait RateLimiter: Send + Sync {
    /// Returns `true` if the IP is allowed to proceed.
    fn allow(&self, ip: IpAddr) -> bool;
}

/// Token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketParams {
    /// Tokens added per second. Zero disables limiting.
    pub rate: u64,
    /// Maximum tokens a bucket can hold.
    pub capacity: u64,
    /// Maximum number of IPs tracked at once (0 = unbounded).
    pub max_tracked_ips: usize,
}

impl From<&TokenBucketConfig> for TokenBucketParams {
    fn from(config: &TokenBucketConfig) -> Self {
        Self {
            rate: config.rate,
            capacity: config.capacity,
            max_tracked_ips: config.max_tracked_ips,
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    tokens: u64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: u64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant, params: &TokenBucketParams) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if !elapsed.is_zero() {
            let refill = (elapsed.as_secs_f64() * params.rate as f64) as u64;
            self.tokens = self.tokens.saturating_add(refill);
            // Any fractional token earned since the last check is dropped.
            self.last_refill = now;
        }
        // Capacity may also have shrunk on reload.
        self.tokens = self.tokens.min(params.capacity);
    }

    fn try_acquire(&mut self, now: Instant, params: &TokenBucketParams) -> bool {
        self.refill(now, params);

        if self.tokens == 0 {
            return false;
        }
        self.tokens -= 1;
        true
    }

    fn is_replenished(&self, now: Instant, params: &TokenBucketParams) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let refill = (elapsed * params.rate as f64) as u64;
        self.tokens.saturating_add(refill) >= params.capacity
    }
}

#[derive(Debug)]
struct LimiterState {
    params: TokenBucketParams,
    buckets: HashMap<IpAddr, TokenBucket>,
}

impl LimiterState {
    fn make_room(&mut self, now: Instant) {
        let max = self.params.max_tracked_ips;
        if max == 0 || self.buckets.len() < max {
            return;
        }

        let params = self.params;
        self.buckets.retain(|_, bucket| !bucket.is_replenished(now, &params));

        if self.buckets.len() >= max {
            let oldest = self
                .buckets
                .iter()
                .min_by_key(|(_, bucket)| bucket.last_refill)
                .map(|(ip, _)| *ip);
            if let Some(ip) = oldest {
                self.buckets.remove(&ip);
                tracing::debug!(client_ip = %ip, "Evicted rate limiter bucket");
            }
        }
    }
}

/// Token bucket rate limiter keyed by source IP.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    state: Mutex<LimiterState>,
}

impl TokenBucketLimiter {
    pub fn new(params: TokenBucketParams) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                params,
                buckets: HashMap::new(),
            }),
        }
    }

    /// Run the admission check as if the current time were `now`.
    pub fn allow_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        let params = state.params;
        if params.rate == 0 {
            return true;
        }

        if !state.buckets.contains_key(&ip) {
            state.make_room(now);
        }

        state
            .buckets
            .entry(ip)
            .or_insert_with(|| TokenBucket::full(params.capacity, now))
            .try_acquire(now, &params)
    }

    /// Replace the bucket parameters. Existing buckets are clamped on next access.
    pub fn reconfigure(&self, params: TokenBucketParams) {
        let mut state = self.state.lock().expect("rate limiter mutex poisoned");
        if state.params != params {
            tracing::info!(
                rate = params.rate,
                capacity = params.capacity,
                max_tracked_ips = params.max_tracked_ips,
                "Rate limiter reconfigured"
            );
            state.params = params;
        }
    }

    pub fn params(&self) -> TokenBucketParams {
        self.state.lock().expect("rate limiter mutex poisoned").params
    }

    /// Number of IPs currently holding a bucket.
    pub fn tracked_ips(&self) -> usize {
        self.state.lock().expect("rate limiter mutex poisoned").buckets.len()
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn allow(&self, ip: IpAddr) -> bool {
        self.allow_at(ip, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn params(rate: u64, capacity: u64) -> TokenBucketParams {
        TokenBucketParams {
            rate,
            capacity,
            max_tracked_ips: 0,
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn full_bucket_drains_then_refills_one_token() {
        let limiter = TokenBucketLimiter::new(params(10, 3));
        let t0 = Instant::now();

        for _ in 0..3 {
            assert!(limiter.allow_at(ip(1), t0));
        }
        assert!(!limiter.allow_at(ip(1), t0));

        // 1/rate later exactly one token is back.
        let t1 = t0 + Duration::from_millis(150);
        assert!(limiter.allow_at(ip(1), t1));
        assert!(!limiter.allow_at(ip(1), t1));
    }

    #[test]
    fn zero_rate_is_unlimited() {
        let limiter = TokenBucketLimiter::new(params(0, 0));
        for _ in 0..1000 {
            assert!(limiter.allow(ip(1)));
        }
        assert_eq!(limiter.tracked_ips(), 0);
    }

    #[test]
    fn zero_capacity_denies_everything() {
        let limiter = TokenBucketLimiter::new(params(5, 0));
        let t0 = Instant::now();
        assert!(!limiter.allow_at(ip(1), t0));
        assert!(!limiter.allow_at(ip(1), t0 + Duration::from_secs(10)));
    }

    #[test]
    fn buckets_are_per_ip() {
        let limiter = TokenBucketLimiter::new(params(1, 1));
        let t0 = Instant::now();
        assert!(limiter.allow_at(ip(1), t0));
        assert!(!limiter.allow_at(ip(1), t0));
        assert!(limiter.allow_at(ip(2), t0));
        assert_eq!(limiter.tracked_ips(), 2);
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let limiter = TokenBucketLimiter::new(params(100, 2));
        let t0 = Instant::now();
        assert!(limiter.allow_at(ip(1), t0));

        let later = t0 + Duration::from_secs(60);
        assert!(limiter.allow_at(ip(1), later));
        assert!(limiter.allow_at(ip(1), later));
        assert!(!limiter.allow_at(ip(1), later));
    }

    #[test]
    fn probing_faster_than_rate_never_accrues_a_token() {
        // Rate 2/s, probed every 100ms: each check resets the refill clock.
        let limiter = TokenBucketLimiter::new(params(2, 1));
        let t0 = Instant::now();
        assert!(limiter.allow_at(ip(1), t0));

        for step in 1..=10 {
            let at = t0 + Duration::from_millis(100 * step);
            assert!(!limiter.allow_at(ip(1), at), "allowed at {}ms", 100 * step);
        }

        // A full 1/rate of quiet brings one token back.
        assert!(limiter.allow_at(ip(1), t0 + Duration::from_millis(1600)));
    }

    #[test]
    fn bounded_map_evicts_replenished_buckets_first() {
        let limiter = TokenBucketLimiter::new(TokenBucketParams {
            rate: 1,
            capacity: 1,
            max_tracked_ips: 2,
        });
        let t0 = Instant::now();

        assert!(limiter.allow_at(ip(1), t0));
        assert!(limiter.allow_at(ip(2), t0 + Duration::from_millis(900)));

        // ip(1) has refilled by now, ip(2) has not.
        let t1 = t0 + Duration::from_millis(1500);
        assert!(limiter.allow_at(ip(3), t1));
        assert_eq!(limiter.tracked_ips(), 2);

        // ip(2) kept its drained bucket.
        assert!(!limiter.allow_at(ip(2), t1));
    }

    #[test]
    fn bounded_map_evicts_oldest_when_nothing_replenished() {
        let limiter = TokenBucketLimiter::new(TokenBucketParams {
            rate: 1,
            capacity: 1,
            max_tracked_ips: 2,
        });
        let t0 = Instant::now();

        assert!(limiter.allow_at(ip(1), t0));
        assert!(limiter.allow_at(ip(2), t0 + Duration::from_millis(100)));
        assert!(limiter.allow_at(ip(3), t0 + Duration::from_millis(200)));
        assert_eq!(limiter.tracked_ips(), 2);

        // ip(1) was evicted and comes back with a full bucket.
        assert!(limiter.allow_at(ip(1), t0 + Duration::from_millis(300)));
    }

    #[test]
    fn reconfigure_clamps_existing_buckets() {
        let limiter = TokenBucketLimiter::new(params(1, 10));
        let t0 = Instant::now();
        assert!(limiter.allow_at(ip(1), t0));

        limiter.reconfigure(params(1, 2));
        assert!(limiter.allow_at(ip(1), t0));
        assert!(limiter.allow_at(ip(1), t0));
        assert!(!limiter.allow_at(ip(1), t0));
    }

    #[test]
    fn reconfigure_to_zero_rate_disables_limiting() {
        let limiter = TokenBucketLimiter::new(params(1, 1));
        let t0 = Instant::now();
        assert!(limiter.allow_at(ip(1), t0));
        assert!(!limiter.allow_at(ip(1), t0));

        limiter.reconfigure(params(0, 1));
        assert!(limiter.allow_at(ip(1), t0));
    }
}

//! Sliding-window counter limiter.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use super::clock::{Clock, SystemClock};
use super::policy::RateLimitPolicy;
use crate::config::SlidingWindowConfig;
use crate::error::{Result, TurnstileError};

/// Default trailing window.
pub const DEFAULT_WINDOW_SIZE: Duration = Duration::from_secs(10);
/// Default number of events admitted per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 1;

/// Admits up to `max_requests` events per identity within a trailing window.
///
/// Each identity owns a queue of admission instants, oldest first. Every
/// operation first evicts instants that fell out of the window, and an
/// identity whose queue empties is removed from the map entirely, so memory
/// tracks only identities with events still inside the window.
///
/// The map is sharded; `record_at` decides and appends while holding the
/// shard guard for the identity, which makes check-then-act atomic per key.
#[derive(Debug)]
pub struct SlidingWindowLimiter<C: Clock = SystemClock> {
    /// Admission instants per identity, oldest first. Never empty.
    requests: DashMap<String, VecDeque<Instant>>,
    window_size: Duration,
    max_requests: usize,
    clock: C,
}

impl SlidingWindowLimiter<SystemClock> {
    /// Create a limiter reading time from the system clock.
    pub fn new(window_size: Duration, max_requests: u32) -> Result<Self> {
        Self::with_clock(window_size, max_requests, SystemClock)
    }
}

impl<C: Clock> SlidingWindowLimiter<C> {
    /// Create a limiter reading time from `clock`.
    ///
    /// Fails if `max_requests` is zero.
    pub fn with_clock(window_size: Duration, max_requests: u32, clock: C) -> Result<Self> {
        if max_requests == 0 {
            return Err(TurnstileError::invalid(
                "max_requests",
                "capacity must be at least 1",
            ));
        }

        Ok(Self::build(window_size, max_requests as usize, clock))
    }

    fn build(window_size: Duration, max_requests: usize, clock: C) -> Self {
        info!(
            window_size = ?window_size,
            max_requests = max_requests,
            "Sliding window limiter initialized"
        );

        Self {
            requests: DashMap::new(),
            window_size,
            max_requests,
            clock,
        }
    }

    /// Create a limiter from its configuration section.
    pub fn from_config(config: &SlidingWindowConfig, clock: C) -> Result<Self> {
        Self::with_clock(config.window_size()?, config.max_requests, clock)
    }

    /// The trailing window length.
    pub fn window_size(&self) -> Duration {
        self.window_size
    }

    /// Capacity per window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests as u32
    }

    /// Number of in-window events currently stored for `identity`.
    ///
    /// Does not run eviction, so it may include events that expire on the
    /// next query.
    pub fn stored_events(&self, identity: &str) -> usize {
        self.requests.get(identity).map_or(0, |q| q.len())
    }

    /// Run eviction for one identity and report what is left.
    ///
    /// Returns `None` when the identity holds no in-window events, after
    /// removing its entry. Otherwise returns the remaining count and the
    /// oldest instant.
    fn cleanup(&self, identity: &str, now: Instant) -> Option<(usize, Instant)> {
        let remaining = {
            let mut queue = self.requests.get_mut(identity)?;
            let evicted = evict_expired(&mut queue, now, self.window_size);
            if evicted > 0 {
                trace!(identity = identity, evicted = evicted, "Evicted expired events");
            }
            queue.front().map(|oldest| (queue.len(), *oldest))
        };

        if remaining.is_none() {
            // Guard is released above; re-check emptiness under the shard lock
            // in case a concurrent record refilled the queue.
            if self.requests.remove_if(identity, |_, q| q.is_empty()).is_some() {
                debug!(identity = identity, "Removed idle identity");
            }
        }

        remaining
    }
}

/// Pop instants at the front of `queue` that are at least `window` old.
fn evict_expired(queue: &mut VecDeque<Instant>, now: Instant, window: Duration) -> usize {
    let mut evicted = 0;
    while let Some(oldest) = queue.front() {
        if now.saturating_duration_since(*oldest) < window {
            break;
        }
        queue.pop_front();
        evicted += 1;
    }
    evicted
}

impl<C: Clock> RateLimitPolicy for SlidingWindowLimiter<C> {
    fn can_send_at(&self, identity: &str, now: Instant) -> bool {
        match self.cleanup(identity, now) {
            Some((count, _)) => count < self.max_requests,
            None => true,
        }
    }

    fn record_at(&self, identity: &str, now: Instant) -> bool {
        let admitted = match self.requests.entry(identity.to_owned()) {
            Entry::Occupied(mut entry) => {
                let queue = entry.get_mut();
                evict_expired(queue, now, self.window_size);
                if queue.len() < self.max_requests {
                    // Keep the queue oldest-first if the clock stepped back.
                    let at = queue.back().map_or(now, |newest| now.max(*newest));
                    queue.push_back(at);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(VecDeque::from([now]));
                true
            }
        };

        if admitted {
            trace!(identity = identity, "Event admitted");
        } else {
            debug!(
                identity = identity,
                max_requests = self.max_requests,
                "Sliding window limit exceeded"
            );
        }

        admitted
    }

    fn time_until_next_allowed_at(&self, identity: &str, now: Instant) -> Duration {
        match self.cleanup(identity, now) {
            Some((count, oldest)) if count >= self.max_requests => {
                let age = now.saturating_duration_since(oldest);
                self.window_size.saturating_sub(age)
            }
            _ => Duration::ZERO,
        }
    }

    fn purge_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.requests.retain(|_, queue| {
            evict_expired(queue, now, self.window_size);
            if queue.is_empty() {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            debug!(removed = removed, "Purged idle identities");
        }
        removed
    }

    fn active_identities(&self) -> Vec<String> {
        self.requests.iter().map(|e| e.key().clone()).collect()
    }

    fn active_count(&self) -> usize {
        self.requests.len()
    }

    fn reset(&self, identity: &str) -> bool {
        self.requests.remove(identity).is_some()
    }

    fn clear(&self) {
        self.requests.clear();
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }
}

impl Default for SlidingWindowLimiter<SystemClock> {
    fn default() -> Self {
        Self::build(DEFAULT_WINDOW_SIZE, DEFAULT_MAX_REQUESTS as usize, SystemClock)
    }
}

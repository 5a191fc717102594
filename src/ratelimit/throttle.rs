//! Fixed minimum-interval throttle.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use super::clock::{Clock, SystemClock};
use super::policy::RateLimitPolicy;
use crate::config::ThrottleConfig;
use crate::error::Result;

/// Default cooldown between admitted events.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(10);

/// Admits at most one event per identity per `min_interval`.
///
/// Only the last admitted instant is kept per identity. Once an identity's
/// cooldown has fully elapsed its entry carries no information, so queries
/// that observe this drop it and `purge_expired` sweeps the rest.
#[derive(Debug)]
pub struct ThrottleLimiter<C: Clock = SystemClock> {
    /// Last admitted instant per identity
    last_admitted: DashMap<String, Instant>,
    min_interval: Duration,
    clock: C,
}

impl ThrottleLimiter<SystemClock> {
    /// Create a throttle reading time from the system clock.
    pub fn new(min_interval: Duration) -> Self {
        Self::with_clock(min_interval, SystemClock)
    }
}

impl<C: Clock> ThrottleLimiter<C> {
    /// Create a throttle reading time from `clock`.
    pub fn with_clock(min_interval: Duration, clock: C) -> Self {
        info!(min_interval = ?min_interval, "Throttle limiter initialized");
        Self {
            last_admitted: DashMap::new(),
            min_interval,
            clock,
        }
    }

    /// Create a throttle from its configuration section.
    pub fn from_config(config: &ThrottleConfig, clock: C) -> Result<Self> {
        Ok(Self::with_clock(config.min_interval()?, clock))
    }

    /// The cooldown between admitted events.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// The last admitted instant for `identity`, if it is still cooling down
    /// or has not been swept yet.
    pub fn last_admitted(&self, identity: &str) -> Option<Instant> {
        self.last_admitted.get(identity).map(|t| *t)
    }

    fn elapsed(&self, last: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last) >= self.min_interval
    }

    /// Remaining cooldown for `identity`, dropping its entry once it is zero.
    fn remaining_cooldown(&self, identity: &str, now: Instant) -> Duration {
        let last = match self.last_admitted.get(identity) {
            Some(last) => *last,
            None => return Duration::ZERO,
        };

        let remaining = self
            .min_interval
            .saturating_sub(now.saturating_duration_since(last));

        if remaining.is_zero()
            && self
                .last_admitted
                .remove_if(identity, |_, last| self.elapsed(*last, now))
                .is_some()
        {
            trace!(identity = identity, "Cooldown elapsed, entry dropped");
        }

        remaining
    }
}

impl<C: Clock> RateLimitPolicy for ThrottleLimiter<C> {
    fn can_send_at(&self, identity: &str, now: Instant) -> bool {
        self.remaining_cooldown(identity, now).is_zero()
    }

    fn record_at(&self, identity: &str, now: Instant) -> bool {
        let admitted = match self.last_admitted.entry(identity.to_owned()) {
            Entry::Occupied(mut entry) => {
                if self.elapsed(*entry.get(), now) {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        };

        if admitted {
            trace!(identity = identity, "Event admitted");
        } else {
            debug!(
                identity = identity,
                min_interval = ?self.min_interval,
                "Throttle cooldown active"
            );
        }

        admitted
    }

    fn time_until_next_allowed_at(&self, identity: &str, now: Instant) -> Duration {
        self.remaining_cooldown(identity, now)
    }

    fn purge_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.last_admitted.retain(|_, last| {
            if self.elapsed(*last, now) {
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
        self.last_admitted.iter().map(|e| e.key().clone()).collect()
    }

    fn active_count(&self) -> usize {
        self.last_admitted.len()
    }

    fn reset(&self, identity: &str) -> bool {
        self.last_admitted.remove(identity).is_some()
    }

    fn clear(&self) {
        self.last_admitted.clear();
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }
}

impl Default for ThrottleLimiter<SystemClock> {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

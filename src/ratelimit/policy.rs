//! Rate limit policy trait shared by the sliding-window and throttle limiters.

use std::time::{Duration, Instant};

/// Admission contract implemented by every limiter.
///
/// The `_at` operations take an explicit instant; the message-level
/// operations read it from the limiter's own clock. Implementations must make
/// `record_at` atomic per identity so concurrent callers cannot both be
/// admitted past the budget.
pub trait RateLimitPolicy: Send + Sync {
    /// Whether `identity` would be admitted at `now`.
    fn can_send_at(&self, identity: &str, now: Instant) -> bool;

    /// Admit and record an event for `identity` at `now` if allowed.
    ///
    /// Returns `false` and leaves state untouched on denial.
    fn record_at(&self, identity: &str, now: Instant) -> bool;

    /// How long `identity` must wait after `now` before it can be admitted.
    ///
    /// Zero exactly when [`can_send_at`](Self::can_send_at) is true.
    fn time_until_next_allowed_at(&self, identity: &str, now: Instant) -> Duration;

    /// Drop state for every identity that no longer affects any decision.
    ///
    /// Returns the number of identities removed.
    fn purge_expired(&self, now: Instant) -> usize;

    /// Identities currently holding state.
    fn active_identities(&self) -> Vec<String>;

    /// Number of identities currently holding state.
    fn active_count(&self) -> usize;

    /// Forget a single identity. Returns whether it had state.
    fn reset(&self, identity: &str) -> bool;

    /// Forget every identity.
    fn clear(&self);

    /// The current instant according to the limiter's clock.
    fn now(&self) -> Instant;

    /// [`can_send_at`](Self::can_send_at) at the clock's current instant.
    fn can_send_message(&self, identity: &str) -> bool {
        self.can_send_at(identity, self.now())
    }

    /// [`record_at`](Self::record_at) at the clock's current instant.
    fn record_message(&self, identity: &str) -> bool {
        self.record_at(identity, self.now())
    }

    /// [`time_until_next_allowed_at`](Self::time_until_next_allowed_at) at
    /// the clock's current instant.
    fn time_until_next_allowed(&self, identity: &str) -> Duration {
        self.time_until_next_allowed_at(identity, self.now())
    }
}

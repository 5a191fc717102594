//! Rate limiting policies and per-identity state management.

mod clock;
mod policy;
mod sliding_window;
mod throttle;

pub use clock::{Clock, ManualClock, SystemClock};
pub use policy::RateLimitPolicy;
pub use sliding_window::{SlidingWindowLimiter, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SIZE};
pub use throttle::{ThrottleLimiter, DEFAULT_MIN_INTERVAL};

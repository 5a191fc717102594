//! Turnstile - Per-Identity Rate Limiting
//!
//! This crate decides admission for timestamped events keyed by an identity.
//! Two independent policies are provided: a sliding-window counter that
//! admits up to N events per trailing window, and a throttle that enforces a
//! minimum interval between admitted events. Both read time from an injected
//! [`ratelimit::Clock`] so they can be driven deterministically in tests.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod simulation;

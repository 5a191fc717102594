//! Synthetic traffic driver for exercising a limiter.
//!
//! Messages rotate through a fixed set of users with a random delay between
//! sends, split into rounds separated by a pause. With [`Pacing::Simulated`]
//! the delays advance a [`ManualClock`] instead of sleeping, so a run is
//! fully determined by its seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::{secs_to_duration, SimulationSettings, TurnstileConfig};
use crate::error::Result;
use crate::ratelimit::{Clock, ManualClock, RateLimitPolicy, SlidingWindowLimiter, ThrottleLimiter};

/// Which limiter a simulation drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    SlidingWindow,
    Throttle,
}

impl PolicyKind {
    /// Pause between rounds when none is configured.
    pub fn default_pause(&self) -> Duration {
        match self {
            PolicyKind::SlidingWindow => Duration::from_secs(4),
            PolicyKind::Throttle => Duration::from_secs(10),
        }
    }

    /// Build the limiter for this policy from configuration.
    pub fn build<C: Clock + 'static>(
        &self,
        config: &TurnstileConfig,
        clock: C,
    ) -> Result<Box<dyn RateLimitPolicy>> {
        Ok(match self {
            PolicyKind::SlidingWindow => Box::new(SlidingWindowLimiter::from_config(
                &config.sliding_window,
                clock,
            )?),
            PolicyKind::Throttle => Box::new(ThrottleLimiter::from_config(&config.throttle, clock)?),
        })
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::SlidingWindow => write!(f, "sliding-window"),
            PolicyKind::Throttle => write!(f, "throttle"),
        }
    }
}

/// Resolved simulation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub seed: u64,
    pub rounds: u32,
    pub messages_per_round: u32,
    pub users: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub pause: Duration,
}

impl SimulationConfig {
    /// Resolve settings for `policy`, falling back to its default pause.
    pub fn from_settings(settings: &SimulationSettings, policy: PolicyKind) -> Result<Self> {
        settings.validate()?;
        let pause = match settings.pause_secs {
            Some(secs) => secs_to_duration("simulation.pause_secs", secs)?,
            None => policy.default_pause(),
        };

        Ok(Self {
            seed: settings.seed,
            rounds: settings.rounds,
            messages_per_round: settings.messages_per_round,
            users: settings.users,
            min_delay: secs_to_duration("simulation.min_delay_secs", settings.min_delay_secs)?,
            max_delay: secs_to_duration("simulation.max_delay_secs", settings.max_delay_secs)?,
            pause,
        })
    }
}

/// How the driver lets time pass between messages.
#[derive(Debug, Clone)]
pub enum Pacing {
    /// Advance a manual clock; the limiter must read the same clock.
    Simulated(ManualClock),
    /// Sleep on the tokio timer; the limiter should use the system clock.
    Realtime,
}

impl Pacing {
    async fn pause(&self, duration: Duration) {
        match self {
            Pacing::Simulated(clock) => clock.advance(duration),
            Pacing::Realtime => tokio::time::sleep(duration).await,
        }
    }
}

fn serialize_secs<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Result of sending one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageOutcome {
    pub round: u32,
    pub message_id: u32,
    pub user_id: u32,
    pub allowed: bool,
    /// Wait reported right after the send
    #[serde(rename = "wait_secs", serialize_with = "serialize_secs")]
    pub wait: Duration,
    /// Time since the simulation started
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

impl fmt::Display for MessageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message {:2} | User {} | ", self.message_id, self.user_id)?;
        if self.allowed {
            write!(f, "allowed")
        } else {
            write!(f, "denied (wait {:.1}s)", self.wait.as_secs_f64())
        }
    }
}

/// Outcomes of one round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundReport {
    pub round: u32,
    pub outcomes: Vec<MessageOutcome>,
}

impl RoundReport {
    pub fn admitted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.allowed).count()
    }

    pub fn denied(&self) -> usize {
        self.outcomes.len() - self.admitted()
    }
}

/// Drives a limiter with synthetic traffic.
pub struct Simulation {
    config: SimulationConfig,
    rng: StdRng,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self { config, rng }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn next_delay(&mut self) -> Duration {
        self.rng.gen_range(self.config.min_delay..=self.config.max_delay)
    }

    /// Send every message of every round through `limiter`.
    pub async fn run<P>(&mut self, limiter: &P, pacing: &Pacing) -> Vec<RoundReport>
    where
        P: RateLimitPolicy + ?Sized,
    {
        let started: Instant = limiter.now();
        let mut reports = Vec::with_capacity(self.config.rounds as usize);
        let mut message_id = 0u32;

        for round in 1..=self.config.rounds {
            if round > 1 {
                info!(pause = ?self.config.pause, "Pausing before next round");
                pacing.pause(self.config.pause).await;
            }
            info!(round = round, "Starting round");

            let mut outcomes = Vec::with_capacity(self.config.messages_per_round as usize);
            for _ in 0..self.config.messages_per_round {
                message_id += 1;
                let user_id = message_id % self.config.users + 1;
                let identity = user_id.to_string();

                let allowed = limiter.record_message(&identity);
                let wait = limiter.time_until_next_allowed(&identity);
                let outcome = MessageOutcome {
                    round,
                    message_id,
                    user_id,
                    allowed,
                    wait,
                    elapsed: limiter.now().saturating_duration_since(started),
                };
                debug!(
                    message_id = message_id,
                    user_id = user_id,
                    allowed = allowed,
                    wait = ?wait,
                    "Message processed"
                );
                outcomes.push(outcome);

                let delay = self.next_delay();
                pacing.pause(delay).await;
            }

            reports.push(RoundReport { round, outcomes });
        }

        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::SystemClock;

    fn settings() -> SimulationSettings {
        SimulationSettings::default()
    }

    async fn run_simulated(policy: PolicyKind, config: &TurnstileConfig) -> Vec<RoundReport> {
        let clock = ManualClock::starting_now();
        let limiter = policy.build(config, clock.clone()).unwrap();
        let sim_config = SimulationConfig::from_settings(&config.simulation, policy).unwrap();
        let mut simulation = Simulation::new(sim_config);
        simulation.run(limiter.as_ref(), &Pacing::Simulated(clock)).await
    }

    #[test]
    fn test_default_pause_per_policy() {
        let sliding = SimulationConfig::from_settings(&settings(), PolicyKind::SlidingWindow).unwrap();
        assert_eq!(sliding.pause, Duration::from_secs(4));

        let throttle = SimulationConfig::from_settings(&settings(), PolicyKind::Throttle).unwrap();
        assert_eq!(throttle.pause, Duration::from_secs(10));

        let custom = SimulationSettings {
            pause_secs: Some(1.5),
            ..settings()
        };
        let config = SimulationConfig::from_settings(&custom, PolicyKind::Throttle).unwrap();
        assert_eq!(config.pause, Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_same_seed_same_outcomes() {
        let config = TurnstileConfig::default();
        let first = run_simulated(PolicyKind::SlidingWindow, &config).await;
        let second = run_simulated(PolicyKind::SlidingWindow, &config).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_sliding_window_first_round() {
        let reports = run_simulated(PolicyKind::SlidingWindow, &TurnstileConfig::default()).await;
        assert_eq!(reports.len(), 2);

        // Five users, ten messages, at most 5s between a user's two sends.
        let first = &reports[0];
        assert_eq!(first.admitted(), 5);
        assert_eq!(first.denied(), 5);
        for outcome in &first.outcomes[..5] {
            assert!(outcome.allowed);
            assert_eq!(outcome.wait, Duration::from_secs(10));
        }
        for outcome in &first.outcomes[5..] {
            assert!(!outcome.allowed);
            assert!(outcome.wait > Duration::ZERO);
        }
    }

    #[tokio::test]
    async fn test_throttle_first_round_and_user_rotation() {
        let reports = run_simulated(PolicyKind::Throttle, &TurnstileConfig::default()).await;
        let first = &reports[0];

        let users: Vec<u32> = first.outcomes.iter().map(|o| o.user_id).collect();
        assert_eq!(users, vec![2, 3, 4, 5, 1, 2, 3, 4, 5, 1]);
        assert_eq!(first.admitted(), 5);

        let ids: Vec<u32> = reports[1].outcomes.iter().map(|o| o.message_id).collect();
        assert_eq!(ids, (11..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_zero_interval_throttle_admits_everything() {
        let mut config = TurnstileConfig::default();
        config.throttle.min_interval_secs = 0.0;

        let reports = run_simulated(PolicyKind::Throttle, &config).await;
        assert!(reports.iter().all(|r| r.denied() == 0));
        assert!(reports
            .iter()
            .flat_map(|r| &r.outcomes)
            .all(|o| o.wait.is_zero()));
    }

    #[tokio::test]
    async fn test_elapsed_includes_pause() {
        let reports = run_simulated(PolicyKind::SlidingWindow, &TurnstileConfig::default()).await;
        let last_of_first = reports[0].outcomes.last().unwrap().elapsed;
        let first_of_second = reports[1].outcomes[0].elapsed;

        let gap = first_of_second - last_of_first;
        assert!(gap >= Duration::from_millis(4100));
        assert!(gap <= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_realtime_pacing_with_zero_delays() {
        let mut config = TurnstileConfig::default();
        config.simulation.min_delay_secs = 0.0;
        config.simulation.max_delay_secs = 0.0;
        config.simulation.pause_secs = Some(0.0);

        let limiter = PolicyKind::SlidingWindow.build(&config, SystemClock).unwrap();
        let sim_config =
            SimulationConfig::from_settings(&config.simulation, PolicyKind::SlidingWindow).unwrap();
        let reports = Simulation::new(sim_config)
            .run(limiter.as_ref(), &Pacing::Realtime)
            .await;

        let admitted: usize = reports.iter().map(|r| r.admitted()).sum();
        assert_eq!(admitted, 5);
    }

    #[test]
    fn test_outcome_display() {
        let allowed = MessageOutcome {
            round: 1,
            message_id: 3,
            user_id: 4,
            allowed: true,
            wait: Duration::from_secs(10),
            elapsed: Duration::ZERO,
        };
        assert_eq!(allowed.to_string(), "Message  3 | User 4 | allowed");

        let denied = MessageOutcome {
            allowed: false,
            wait: Duration::from_millis(4300),
            message_id: 12,
            ..allowed
        };
        assert_eq!(denied.to_string(), "Message 12 | User 4 | denied (wait 4.3s)");
    }

    #[test]
    fn test_outcome_serializes_seconds() {
        let outcome = MessageOutcome {
            round: 2,
            message_id: 11,
            user_id: 2,
            allowed: false,
            wait: Duration::from_millis(2500),
            elapsed: Duration::from_secs(12),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["wait_secs"], 2.5);
        assert_eq!(json["elapsed_secs"], 12.0);
        assert_eq!(json["allowed"], false);
    }
}

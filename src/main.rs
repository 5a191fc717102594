use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::{LogFormat, TurnstileConfig};
use turnstile::ratelimit::{ManualClock, SystemClock};
use turnstile::simulation::{Pacing, PolicyKind, Simulation, SimulationConfig};

#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about = "Per-identity rate limiting")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter directive, overrides both `RUST_LOG` and the configured level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Drive a limiter with synthetic traffic and print each decision
    Simulate {
        #[arg(long, value_enum, default_value_t = PolicyKind::SlidingWindow)]
        policy: PolicyKind,

        /// Seed for the delay generator, overrides the configured seed
        #[arg(long)]
        seed: Option<u64>,

        /// Sleep for real instead of advancing a simulated clock
        #[arg(long)]
        realtime: bool,

        /// Print one JSON object per message
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and print the effective values
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = TurnstileConfig::load(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    let env_directive = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let directive = filter_directive(
        cli.log_level.as_deref(),
        env_directive.as_deref(),
        &config.logging.level,
    );
    init_tracing(directive, config.logging.format)?;
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &cli.config {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("Configuration loaded from defaults and environment"),
    }

    match cli.command {
        Command::Simulate {
            policy,
            seed,
            realtime,
            json,
        } => {
            if let Some(seed) = seed {
                config.simulation.seed = seed;
            }
            simulate(&config, policy, realtime, json).await
        }
        Command::CheckConfig => {
            print!("{}", config.to_yaml()?);
            Ok(())
        }
    }
}

/// Pick the log filter: the CLI flag, then `RUST_LOG`, then the config file.
fn filter_directive<'a>(cli: Option<&'a str>, env: Option<&'a str>, configured: &'a str) -> &'a str {
    cli.or(env).unwrap_or(configured)
}

fn init_tracing(directive: &str, format: LogFormat) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(directive)?)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

async fn simulate(
    config: &TurnstileConfig,
    policy: PolicyKind,
    realtime: bool,
    json: bool,
) -> anyhow::Result<()> {
    let sim_config = SimulationConfig::from_settings(&config.simulation, policy)?;
    info!(policy = %policy, seed = sim_config.seed, realtime = realtime, "Starting simulation");

    let (limiter, pacing) = if realtime {
        (policy.build(config, SystemClock)?, Pacing::Realtime)
    } else {
        let clock = ManualClock::starting_now();
        (policy.build(config, clock.clone())?, Pacing::Simulated(clock))
    };

    let reports = Simulation::new(sim_config)
        .run(limiter.as_ref(), &pacing)
        .await;

    for report in &reports {
        if json {
            for outcome in &report.outcomes {
                println!("{}", serde_json::to_string(outcome)?);
            }
            continue;
        }

        println!("\n=== Round {} ({}) ===", report.round, policy);
        for outcome in &report.outcomes {
            println!("{}", outcome);
        }
        println!(
            "admitted: {}, denied: {}",
            report.admitted(),
            report.denied()
        );
    }

    let purged = limiter.purge_expired(limiter.now());
    info!(
        purged = purged,
        active = limiter.active_count(),
        "Simulation finished"
    );
    Ok(())
}

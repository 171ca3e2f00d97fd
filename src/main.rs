use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use worldguard::cache::{CacheBackend, MemoryCache, RedisCache};
use worldguard::config::WorldguardConfig;
use worldguard::ratelimit::FailedAttemptLimiter;

/// Inspect and manage failed-attempt state for world authentication.
#[derive(Debug, Parser)]
#[command(name = "worldguard", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(long, short = 'c', global = true)]
    config: Option<String>,

    /// Override the failed attempts allowed per window
    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show whether a subject is currently limited
    Status(Target),
    /// Record a failed attempt for a subject
    Fail(Target),
    /// Forget every failed attempt for a subject
    Clear(Target),
}

#[derive(Debug, Args)]
struct Target {
    /// World name
    #[arg(long)]
    world: String,

    /// Subject identifier (IP address, wallet address, ...)
    #[arg(long)]
    subject: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config =
        WorldguardConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(max_attempts) = cli.max_attempts {
        config.rate_limit.max_attempts_per_window = max_attempts;
        config.validate().context("invalid --max-attempts")?;
    }
    info!(
        max_attempts = config.rate_limit.max_attempts_per_window,
        window_secs = config.rate_limit.window_seconds,
        "Configuration loaded"
    );

    let cache = build_cache(&config).await?;
    let limiter = FailedAttemptLimiter::new(cache, config.rate_limit.clone())
        .with_namespace(config.cache.namespace.clone());

    match cli.command {
        Command::Status(target) => {
            let limited = limiter.is_rate_limited(&target.world, &target.subject).await;
            let attempts = limiter.live_attempts(&target.world, &target.subject).await;
            println!(
                "world={} subject={} rate_limited={} live_attempts={}",
                target.world, target.subject, limited, attempts
            );
        }
        Command::Fail(target) => {
            let outcome = limiter
                .record_failed_attempt(&target.world, &target.subject)
                .await;
            println!("{}", serde_json::to_string(&outcome)?);
        }
        Command::Clear(target) => {
            limiter.clear_attempts(&target.world, &target.subject).await;
            println!("cleared world={} subject={}", target.world, target.subject);
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn build_cache(config: &WorldguardConfig) -> anyhow::Result<Arc<dyn CacheBackend>> {
    match config.cache.redis_url.as_deref() {
        Some(url) => {
            let cache = RedisCache::connect(url)?;
            cache.ping().await.context("Redis is unreachable")?;
            info!("Using Redis shared cache");
            Ok(Arc::new(cache))
        }
        None => {
            warn!("No cache.redis_url configured, state is local to this process");
            Ok(Arc::new(MemoryCache::new()))
        }
    }
}

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slidewin::config::{LogFormat, LoggingConfig, SlidewinConfig};
use slidewin::ratelimit::{Field, RateLimiter};
use slidewin::store::RedisStore;

/// Check sliding-window rate limits against a shared Redis store.
#[derive(Debug, Parser)]
#[command(name = "slidewin", version)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Redis URL, overriding the configuration
    #[arg(long)]
    redis_url: Option<String>,

    /// Scope of the rate limited subject
    #[arg(long, default_value = "user")]
    scope: String,

    /// Identifier of the rate limited subject
    #[arg(long, default_value = "127.0.0.1")]
    identifier: String,

    /// Number of decisions to make
    #[arg(short = 'n', long, default_value_t = 1)]
    requests: u32,

    /// Pause between decisions in milliseconds
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,

    /// Print each decision as a JSON line
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = SlidewinConfig::load(args.config.as_deref())?;
    if let Some(url) = &args.redis_url {
        config.redis.url = url.clone();
    }

    init_tracing(&config.logging);

    info!("Starting Slidewin");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let store = RedisStore::connect(&config.redis).await?;
    let limiter = RateLimiter::new(Arc::new(store), config.limiter.to_options())?;
    info!(limiter = ?limiter, "Rate limiter initialized");

    let field = Field::new(args.scope.clone(), args.identifier.clone());
    let interval = Duration::from_millis(args.interval_ms);

    // Dropping an in-flight decision is safe: the store either ran the
    // whole window step or none of it.
    tokio::select! {
        result = run(&limiter, &field, args.requests, interval, args.json) => result?,
        _ = shutdown_signal() => {
            warn!("Interrupted, remaining decisions skipped");
        }
    }

    Ok(())
}

/// Make `requests` decisions for `field`, printing each one.
async fn run(
    limiter: &RateLimiter,
    field: &Field,
    requests: u32,
    interval: Duration,
    json: bool,
) -> anyhow::Result<()> {
    for i in 0..requests {
        if i > 0 && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }

        let decision = limiter.decide(field).await?;

        if json {
            println!("{}", serde_json::to_string(&decision)?);
            continue;
        }

        let mut line = format!(
            "{} throttled={} count={}",
            field, decision.throttled, decision.count.current_count
        );
        if let Some(metadata) = decision.metadata {
            for (name, value) in metadata.pairs() {
                line.push_str(&format!(" {}={}", name, value));
            }
        }
        println!("{}", line);
    }

    Ok(())
}

/// Install the global subscriber. Logs go to stderr so stdout only carries
/// decisions.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}

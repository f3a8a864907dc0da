//! switchyard reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!  Client ──▶ HttpServer ──▶ request_logger ──▶ rate_limit ──▶ request_filter ──▶ Gateway ──▶ Backend
//!            (request id,     (outermost)                                        │
//!             trace, panic                                                        └─ upgrade ─▶ websocket tunnel
//!             recovery)
//!
//!  Background: ban sweep (every cleanup_interval_secs), metrics endpoint (optional)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use switchyard::config;
use switchyard::http::middleware::request_logger;
use switchyard::observability::{self, TracingRecorder};
use switchyard::security::{rate_limit, request_filter, IpRateLimiter, RateLimitSettings, RequestFilter};
use switchyard::{Gateway, HttpServer, ProxyRegistry, Shutdown};

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(about = "Path-prefix reverse proxy with per-IP rate limiting", long_about = None)]
struct Cli {
    /// TOML configuration file. PROXY_RULE_* variables are added to its rules.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = config::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    observability::logging::init(&config.observability);
    tracing::info!("switchyard v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        proxy_rules = config.proxy.rules.len(),
        rate_limit = config.rate_limit.enabled,
        filter = config.filter.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => observability::metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let registry = ProxyRegistry::from_config(&config.proxy.rules)?;
    if registry.is_empty() {
        tracing::warn!("No proxy rules configured, every request will get 404");
    }

    let mut gateway = Gateway::new(registry).with_timeouts(&config.timeouts);

    // registration order: last registered is outermost
    if config.filter.enabled {
        gateway = gateway.with_middleware(request_filter(Arc::new(RequestFilter::from(&config.filter))));
    }

    let mut sweep = None;
    if config.rate_limit.enabled {
        let limiter = Arc::new(IpRateLimiter::new(RateLimitSettings::from(&config.rate_limit)));
        sweep = Some(limiter.spawn_cleanup(
            Duration::from_secs(config.rate_limit.cleanup_interval_secs),
            shutdown.subscribe(),
        ));
        gateway = gateway.with_middleware(rate_limit(limiter));
    }

    gateway = gateway.with_middleware(request_logger(Arc::new(TracingRecorder)));

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    tokio::spawn(switchyard::lifecycle::shutdown_signal(shutdown.clone()));

    let server = HttpServer::new(gateway.into_handler(), &config.timeouts);
    let result = server.run(listener, shutdown.subscribe()).await;

    // a fatal accept error also stops the background tasks
    shutdown.trigger();
    if let Some(sweep) = sweep {
        let _ = sweep.await;
    }

    result?;
    tracing::info!("Shutdown complete");
    Ok(())
}

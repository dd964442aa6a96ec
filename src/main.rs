//! Pour demo service
//!
//! Starts the pour client, emits a heartbeat event on a fixed interval and
//! ships everything to the configured collector until interrupted.
//!
//! ## Configuration
//!
//! - `POUR_CONFIG`: path to a JSON config file; when unset, `POUR_*`
//!   environment variables are used (see `pour::config::Config`)
//! - `POUR_HEARTBEAT_SECS`: seconds between heartbeat events (default: 60)
//! - `RUST_LOG`: Logging level filter (default: info)

use std::env;
use std::time::Duration;

use tokio::time::interval;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pour::config::Config;
use pour::tag::TAG_SUCCESS;
use pour::Pour;

/// Default seconds between heartbeat events
const DEFAULT_HEARTBEAT_SECS: u64 = 60;

/// Exit code for unusable configuration
const CONFIG_EXIT_CODE: i32 = 1;

#[tokio::main]
async fn main() {
    init_tracing();

    info!("Starting pour...");

    let loaded = match env::var("POUR_CONFIG") {
        Ok(path) => Config::from_file(path),
        Err(_) => Config::from_env(),
    };

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            // Local-only pipeline, just to report the failure
            let pour = Pour::bootstrap(Config::default());
            pour.emitter()
                .fatal(CONFIG_EXIT_CODE, format!("Couldn't read pour config: {}", e));
        }
    };

    info!(
        remote_logs = config.remote_logs,
        collector = %config.base_url(),
        log_path = %config.log_path.display(),
        "Configuration loaded"
    );

    let mut pour = Pour::bootstrap(config);
    pour.start();

    let heartbeat_secs = env::var("POUR_HEARTBEAT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_HEARTBEAT_SECS);
    let emitter = pour.emitter().clone();
    let heartbeat = tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(heartbeat_secs.max(1)));
        let mut beats: u64 = 0;
        loop {
            ticker.tick().await;
            beats += 1;
            pour::log_tagged!(emitter, true, TAG_SUCCESS, "heartbeat", beats);
        }
    });

    info!("Pour running. Press Ctrl+C to stop.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }

    info!("Shutdown signal received, stopping...");
    heartbeat.abort();

    let shutdown_timeout = Duration::from_secs(10);
    if tokio::time::timeout(shutdown_timeout, pour.shutdown()).await.is_err() {
        warn!("Shutdown timed out after {:?}", shutdown_timeout);
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

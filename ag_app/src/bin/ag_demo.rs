use std::sync::Arc;
use std::time::Duration;

use ag_app::cli;
use ag_app::config_loader;
use ag_app::shutdown_handler;
use ag_app::tracing_setup;
use ag_app::workload;
use ag_limiter::RateLimiter;
use tracing::info;
use tracing::warn;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = cli::get_config_path(cli::DEFAULT_CONFIG_PATH);
    let (config, load_error) = config_loader::load_demo_config_or_default(&config_path);

    let _guard = tracing_setup::init("ag_demo", &config.log_dir, tracing_setup::parse_level(&config.log_level), config.log_stdout);

    match load_error {
        None => info!("Loaded demo config from {config_path}"),
        Some(err) => warn!("Failed to load demo config from {}: {}. Using defaults.", config_path, err),
    }

    let limiter = Arc::new(RateLimiter::from_config(&config.limiter)?);
    let shutdown = shutdown_handler::setup()?;

    info!(
        "Submitting {} operations at {} per {:?}, {}ms each",
        config.operations,
        limiter.capacity(),
        limiter.window(),
        config.work_ms
    );

    let report = workload::submit_all(Arc::clone(&limiter), config.operations, Duration::from_millis(config.work_ms), &shutdown).await;

    limiter.shutdown();
    let stats = limiter.stats();
    info!(
        "Done in {:?}: {} completed, {} cancelled, {} rejected (admitted={}, resets={})",
        report.elapsed, report.completed, report.cancelled, report.rejected, stats.admitted, stats.resets
    );

    Ok(())
}

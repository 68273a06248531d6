/// One-shot cleanup run against the local data directory
///
/// Usage: cargo run --release --bin run_cleanup -- <source> <url_output> <image_output>

use anyhow::{Context, Result};
use std::sync::Arc;

use nutritious_cleanup::core::config::Config;
use nutritious_cleanup::core::types::CleanupRequest;
use nutritious_cleanup::orchestration::CleanupOrchestrator;
use nutritious_cleanup::utils::Metrics;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 {
        eprintln!("Usage: {} <source> <url_output> <image_output>", args[0]);
        std::process::exit(1);
    }

    // Settings are read before the log level is known; surface their warnings anyway
    let bootstrap = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .finish();
    let config = tracing::subscriber::with_default(bootstrap, Config::new)
        .context("Failed to load configuration")?;
    let config = Arc::new(config);

    let filter = tracing_subscriber::EnvFilter::new(format!(
        "nutritious_cleanup={}",
        config.log_level().as_str().to_lowercase()
    ));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let request = CleanupRequest {
        source: args[1].clone(),
        url_output: args[2].clone(),
        image_output: args[3].clone(),
    };

    println!("Data dir: {}", config.data_dir());
    println!(
        "Running: {} -> {} -> {}",
        request.source, request.url_output, request.image_output
    );

    let metrics = Metrics::new();
    let orchestrator = CleanupOrchestrator::from_config(config, metrics.clone())?;
    let reports = orchestrator
        .run_cleanup(&request)
        .await
        .with_context(|| format!("Cleanup of {} failed", request.source))?;

    for report in &reports {
        println!("{}", serde_json::to_string_pretty(report)?);
    }

    let snapshot = metrics.snapshot();
    println!(
        "\nProbes: {} ({} failed), classifier calls: {} ({} failed), cache hit rate: {:.1}%",
        snapshot.probes_total,
        snapshot.probes_failed,
        snapshot.classifier_calls_total,
        snapshot.classifier_calls_failed,
        snapshot.cache_hit_rate * 100.0
    );

    Ok(())
}

//! # Sync Configuration Validator
//!
//! Loads a provider-sync configuration the same way the service does (file,
//! then `PROVIDER_SYNC__*` environment overrides), validates it, and prints
//! the effective values. Exits non-zero on any configuration error.

use clap::{Parser, Subcommand, ValueEnum};
use provider_sync::config::{redact_url, ConfigLoader, SyncConfig};
use provider_sync::logging::init_tracing;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "sync-config-validator")]
#[command(about = "Validate provider sync configuration")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (default: $SYNC_CONFIG_PATH or config/provider-sync.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate and summarize (default)
    Validate,

    /// Print the full effective configuration
    Show,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => ConfigLoader::load_from_path(path),
        None => ConfigLoader::load(),
    };

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Configuration validation failed");
            eprintln!("Configuration invalid: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Validate) {
        Commands::Validate => print_summary(&config, cli.format),
        Commands::Show => print_full(&config),
    };

    if let Err(e) = result {
        error!(error = %e, "Failed to render configuration");
        process::exit(1);
    }
    info!("Configuration validation completed successfully");
}

fn redacted(config: &SyncConfig) -> SyncConfig {
    let mut config = config.clone();
    config.database_url = config.database_url.as_deref().map(redact_url);
    config.rate_limits.redis_url = config.rate_limits.redis_url.as_deref().map(redact_url);
    config
}

fn print_full(config: &SyncConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&redacted(config))?);
    Ok(())
}

fn print_summary(config: &SyncConfig, format: OutputFormat) -> anyhow::Result<()> {
    let config = redacted(config);

    if let OutputFormat::Json = format {
        let summary = serde_json::json!({
            "valid": true,
            "circuit_breakers": {
                "enabled": config.circuit_breakers.enabled,
                "components": config.circuit_breakers.components.keys().collect::<Vec<_>>(),
            },
            "rate_limit_categories": config.rate_limits.categories,
            "counter_store": if config.rate_limits.redis_url.is_some() { "redis" } else { "memory" },
            "cursor_store": if config.database_url.is_some() { "postgres" } else { "memory" },
            "bind_address": config.web.bind_address,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Configuration valid");
    println!();
    println!("Circuit breakers   enabled={}", config.circuit_breakers.enabled);
    let default = &config.circuit_breakers.default;
    println!(
        "  default          failures={} successes={} reset={}s",
        default.failure_threshold, default.success_threshold, default.reset_timeout_seconds
    );
    let mut components: Vec<_> = config.circuit_breakers.components.iter().collect();
    components.sort_by(|a, b| a.0.cmp(b.0));
    for (name, breaker) in components {
        println!(
            "  {name:<16} failures={} successes={} reset={}s",
            breaker.failure_threshold, breaker.success_threshold, breaker.reset_timeout_seconds
        );
    }

    println!(
        "Retry              max_retries={} base={}ms max={}ms",
        config.retry.max_retries, config.retry.base_delay_ms, config.retry.max_delay_ms
    );

    println!("Rate limits        prefix={}", config.rate_limits.key_prefix);
    let mut categories: Vec<_> = config.rate_limits.categories.iter().collect();
    categories.sort_by(|a, b| a.0.cmp(b.0));
    for (name, category) in categories {
        println!(
            "  {name:<16} {} per {}s",
            category.max_requests, category.window_seconds
        );
    }
    println!(
        "  counter store    {}",
        config.rate_limits.redis_url.as_deref().unwrap_or("in-memory")
    );

    let pipeline = &config.pipeline;
    println!(
        "Pipeline           concurrency={} batch={} quota={} pages={}",
        pipeline.item_concurrency,
        pipeline.max_items_per_batch,
        pipeline.daily_quota,
        pipeline.max_delta_pages
    );
    println!(
        "  cursor store     {}",
        config.database_url.as_deref().unwrap_or("in-memory")
    );
    println!("Web                {}", config.web.bind_address);
    Ok(())
}

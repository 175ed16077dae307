mod cli;

use feedplay::{simulate, FeedEngine};
use feedplay_core::config::{Config, EngineConfig};
use feedplay_core::{Connectivity, ItemId, Priority};
use feedplay_prefetch::{Candidate, PrefetchScheduler};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use url::Url;

fn parse_urls(raw: &[String]) -> Result<Vec<Url>> {
    raw.iter()
        .map(|s| Url::parse(s).with_context(|| format!("invalid URL: {s}")))
        .collect()
}

async fn warm(
    config_path: Option<&Path>,
    urls: &[String],
    manifest_only: bool,
    json: bool,
) -> Result<()> {
    let mut config = Config::load_or_default(config_path)?;
    let urls = parse_urls(urls)?;
    // Every requested manifest gets reported, so none may be evicted.
    config.prefetch.max_cache_size = config.prefetch.max_cache_size.max(urls.len());
    let scheduler = PrefetchScheduler::with_http(config.prefetch.clone())?;
    let priority = if manifest_only {
        Priority::Medium
    } else {
        Priority::High
    };

    tracing::info!(count = urls.len(), "Warming manifests");
    let warms = urls.into_iter().enumerate().map(|(index, url)| {
        scheduler.prefetch(Candidate {
            id: ItemId::new(url.as_str()),
            index,
            url,
            priority,
        })
    });
    let _: Vec<_> = futures::stream::iter(warms)
        .buffer_unordered(config.prefetch.max_concurrent)
        .collect()
        .await;

    let mut entries = scheduler.entries();
    entries.sort_by_key(|e| e.index);
    let settled = entries.iter().filter(|e| e.status.is_settled()).count();
    tracing::info!(settled, total = entries.len(), "Warm finished");

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            match &entry.error {
                Some(error) => println!("{:<8} {} ({})", entry.status, entry.url, error),
                None => println!(
                    "{:<8} {} [{} segments]",
                    entry.status,
                    entry.url,
                    entry.segment_urls.as_ref().map_or(0, Vec::len)
                ),
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_simulation(
    config_path: Option<&Path>,
    urls: &[String],
    steps: &[usize],
    dwell_ms: u64,
    play_latency_ms: u64,
    unmetered: bool,
    platform: Option<feedplay_core::PlatformProfile>,
    json: bool,
) -> Result<()> {
    let mut config = Config::load_or_default(config_path)?;
    if let Some(profile) = platform {
        config.engine = EngineConfig::for_platform(profile);
    }
    let urls = parse_urls(urls)?;
    if let Some(step) = steps.iter().find(|s| **s >= urls.len()) {
        anyhow::bail!("step {step} is past the end of the feed ({} items)", urls.len());
    }

    let engine = FeedEngine::with_http(&config)?;
    if unmetered {
        engine.handle_connectivity(Connectivity::Unmetered);
    }

    let report = simulate::run(
        &engine,
        &urls,
        steps,
        Duration::from_millis(dwell_ms),
        Duration::from_millis(play_latency_ms),
    )
    .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Events:");
    for event in &report.events {
        println!("  {}", serde_json::to_string(event)?);
    }
    println!("Items:");
    for item in &report.items {
        println!(
            "  #{:<3} {:<10} playing={} preloaded={} handle={} retries={}",
            item.index, item.id, item.is_playing, item.is_preloaded, item.has_handle, item.retry_count
        );
    }
    println!("Prefetch:");
    for entry in &report.prefetch {
        println!(
            "  #{:<3} {:<8} {:<6} {}",
            entry.index, entry.status, entry.priority, entry.url
        );
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            Config::load(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };
    println!("✓ Configuration is valid");
    println!(
        "  Window: {} ahead, {} behind",
        config.engine.preload_ahead, config.engine.preload_behind
    );
    println!("  Max cached items: {}", config.engine.max_cached_items);
    println!("  Max retries: {}", config.engine.max_retries);
    println!(
        "  Prefetch: {} concurrent, {} cached",
        config.prefetch.max_concurrent, config.prefetch.max_cache_size
    );
    for warning in config.validate() {
        println!("  ⚠ {}", warning);
    }

    Ok(())
}

fn show_config(
    config_path: Option<&Path>,
    platform: Option<feedplay_core::PlatformProfile>,
) -> Result<()> {
    let mut config = Config::load_or_default(config_path)?;
    if let Some(profile) = platform {
        config.engine = EngineConfig::for_platform(profile);
    }
    print!("{}", config.to_toml()?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging - RUST_LOG takes precedence over --verbose
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::from_default_env()
    } else if cli.verbose {
        tracing_subscriber::EnvFilter::new(
            "feedplay=trace,feedplay_core=debug,feedplay_prefetch=debug",
        )
    } else {
        tracing_subscriber::EnvFilter::new(
            "feedplay=info,feedplay_core=info,feedplay_prefetch=info",
        )
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Warm {
            urls,
            manifest_only,
            json,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(warm(config_path, &urls, manifest_only, json))?;
        }
        Commands::Simulate {
            urls,
            steps,
            dwell_ms,
            play_latency_ms,
            unmetered,
            platform,
            json,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_simulation(
                config_path,
                &urls,
                &steps,
                dwell_ms,
                play_latency_ms,
                unmetered,
                platform,
                json,
            ))?;
        }
        Commands::Validate { config } => {
            validate_config(config.as_deref().or(config_path))?;
        }
        Commands::ShowConfig { platform } => {
            show_config(config_path, platform)?;
        }
        Commands::Version => {
            println!("feedplay {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

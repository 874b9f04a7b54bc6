mod cli;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use metrics_exporter_prometheus::PrometheusBuilder;
use mf_av::ToolRegistry;
use mf_blob::{BlobStore, FsBlobStore};
use mf_core::config::Config;
use mf_core::events::EventBus;
use mf_core::{ConversionOptions, JobId};
use mf_db::models::JobStatus;
use mf_dispatch::{JobService, SubmitRequest};
use tokio_util::sync::CancellationToken;

fn load_config(path: Option<&Path>) -> Config {
    let mut config = Config::load_or_default(path);
    config.apply_env_overrides();
    for warning in config.validate() {
        tracing::warn!("Config: {warning}");
    }
    config
}

fn job_service(config: &Config) -> Result<JobService> {
    let db = mf_db::pool::init_pool(&config.store)?;
    let blob: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(&config.blob.root));
    Ok(JobService::new(
        db,
        blob,
        Arc::new(EventBus::default()),
        config.telemetry.ttl(),
    ))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse repeated `key=value` flags; values that parse as JSON keep their
/// type, anything else is a string.
fn parse_options(raw: &[String]) -> Result<ConversionOptions> {
    let mut options = ConversionOptions::new();
    for item in raw {
        let (key, value) = item
            .split_once('=')
            .with_context(|| format!("option '{item}' is not key=value"))?;
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        options.insert(key.trim().to_string(), value);
    }
    Ok(options)
}

fn install_metrics_exporter(config: &Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.metrics.host, config.metrics.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid metrics listen address {}:{}",
                config.metrics.host, config.metrics.port
            )
        })?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install Prometheus exporter")?;
    tracing::info!("Metrics exporter listening on {addr}");
    Ok(())
}

async fn run_worker(mut config: Config, worker_id: Option<String>) -> Result<()> {
    if worker_id.is_some() {
        config.worker.worker_id = worker_id;
    }
    if config.metrics.enabled {
        install_metrics_exporter(&config)?;
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        });
    }

    mf_worker::run_worker(config, cancel).await?;
    tracing::info!("Worker shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received; finishing current job");
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mediaflow=trace,mf_worker=trace,mf_dispatch=trace,mf_av=trace,mf_db=debug,mf_blob=debug,mf_core=debug".to_string()
        } else {
            "mediaflow=info,mf_worker=info,mf_dispatch=info,mf_av=info,mf_db=warn,mf_blob=warn,mf_core=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Worker { worker_id } => {
            let config = load_config(config_path);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_worker(config, worker_id))
        }
        Commands::Submit {
            owner,
            input,
            format,
            options,
        } => {
            let config = load_config(config_path);
            let service = job_service(&config)?;
            let req = SubmitRequest {
                owner,
                input_key: input,
                output_format: format,
                options: parse_options(&options)?,
            };
            let rt = tokio::runtime::Runtime::new()?;
            let resp = rt.block_on(service.submit(req))?;
            print_json(&resp)
        }
        Commands::Status { job_id } => {
            let job_id: JobId = job_id.parse()?;
            let service = job_service(&load_config(config_path))?;
            print_json(&service.get_status(job_id)?)
        }
        Commands::List {
            status,
            limit,
            offset,
        } => {
            let status = status.map(|s| s.parse::<JobStatus>()).transpose()?;
            let service = job_service(&load_config(config_path))?;
            print_json(&service.list(status, limit, offset)?)
        }
        Commands::QueueStats => {
            let service = job_service(&load_config(config_path))?;
            print_json(&service.queue_stats()?)
        }
        Commands::Workers => {
            let service = job_service(&load_config(config_path))?;
            print_json(&service.worker_stats()?)
        }
        Commands::CheckTools => check_tools(&load_config(config_path)),
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or_else(|| cli.config.clone());
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mediaflow {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check_tools(config: &Config) -> Result<()> {
    println!("Checking external tools...\n");

    let registry = ToolRegistry::discover(&config.tools);
    let mut all_ok = true;

    for tool in registry.check_all() {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Workers cannot convert until they are installed.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("failed to read {}", p.display()))?;
            Config::from_json(&contents)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("✓ Configuration is valid");
    println!("  Database: {}", config.store.db_path.display());
    println!("  Blob root: {}", config.blob.root.display());
    println!(
        "  Worker id: {}",
        config.worker.worker_id.as_deref().unwrap_or("(hostname)")
    );
    println!(
        "  Telemetry: every {}s, ttl {}s",
        config.telemetry.interval_secs, config.telemetry.ttl_secs
    );
    println!("  Stale claim after: {}s", config.worker.stale_claim_secs);
    if config.metrics.enabled {
        println!("  Metrics: {}:{}", config.metrics.host, config.metrics.port);
    }

    let warnings = config.validate();
    for w in &warnings {
        println!("  ⚠ {w}");
    }

    Ok(())
}

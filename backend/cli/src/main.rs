mod api;
mod output;
mod pipeline;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use docpipe_config::PipelineConfig;
use docpipe_core::{InputId, InstanceStatus};
use docpipe_logging::redact_sensitive_data;
use docpipe_scheduler::{UploadSink, UploadWatcher};

use api::AppState;

#[derive(Parser)]
#[command(name = "docpipe")]
#[command(about = "docpipe: durable document extraction, summarization and publishing")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for one input document and print the output blob name
    Run {
        /// Blob name in the input container, or a `container/name` path
        input_id: String,
        /// Upload event key; repeating a key resumes the same instance
        #[arg(long)]
        event_key: Option<String>,
    },
    /// Start the HTTP API, resume pending instances, and watch for uploads
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
        /// Do not poll the input container for new uploads
        #[arg(long)]
        no_watch: bool,
    },
    /// Show one instance and its step history
    Status {
        id: Uuid,
    },
    /// List recent instances
    List {
        /// Only show instances in this state (running, completed, failed)
        #[arg(long)]
        status: Option<InstanceStatus>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Delete finished instances and their history
    Purge {
        #[arg(long)]
        older_than_days: u32,
    },
    /// Print the effective configuration with secrets masked
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    match execute(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::note_error(&redact_sensitive_data(&format!("{e:#}")));
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let mut config =
        docpipe_config::from_env().context("Failed to read configuration from environment")?;
    docpipe_logging::init_logger(&config.log_dir, &config.log_level);

    match cli.command {
        Commands::Run {
            input_id,
            event_key,
        } => run_once(&config, &input_id, event_key.as_deref()).await,
        Commands::Serve { port, no_watch } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            run_server(config, !no_watch).await
        }
        Commands::Status { id } => show_status(&config, id),
        Commands::List { status, limit } => list(&config, status, limit),
        Commands::Purge { older_than_days } => purge(&config, older_than_days),
        Commands::Config => show_config(&config),
    }
}

async fn run_once(config: &PipelineConfig, raw_input: &str, event_key: Option<&str>) -> Result<()> {
    docpipe_config::check(config)?;
    let input_id = InputId::from_blob_path(raw_input)?;
    let pipeline = pipeline::build(config)?;

    let instance = pipeline
        .runtime
        .run_to_completion(input_id, event_key)
        .await
        .context("Instance could not be driven to completion")?;

    match (&instance.status, &instance.output_ref) {
        (InstanceStatus::Completed, Some(output)) => {
            println!("{output}");
            Ok(())
        }
        _ => anyhow::bail!(
            "instance {} {}: {}",
            instance.id,
            instance.status,
            instance.error.as_deref().unwrap_or("no output produced")
        ),
    }
}

async fn run_server(config: PipelineConfig, watch: bool) -> Result<()> {
    docpipe_config::check(&config)?;
    info!(
        port = config.server.port,
        bind = %config.server.bind_address,
        db = %config.db_path,
        "Starting docpipe server"
    );

    let pipeline = pipeline::build(&config)?;
    pipeline
        .runtime
        .resume_pending()
        .context("Failed to resume pending instances")?;

    if watch {
        let sink: Arc<dyn UploadSink> = pipeline.runtime.clone();
        let watcher = Arc::new(UploadWatcher::new(
            pipeline.store.clone(),
            config.storage.input_container.clone(),
            Duration::from_secs(config.server.poll_interval_secs),
            sink,
        ));
        tokio::spawn(watcher.run());
    }

    let state = Arc::new(AppState {
        runtime: pipeline.runtime.clone(),
        history: pipeline.history.clone(),
    });
    let app = api::build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.bind_address, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped; unfinished instances resume on next start");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
}

fn show_status(config: &PipelineConfig, id: Uuid) -> Result<()> {
    let history = pipeline::open_history(config)?;
    let instance = history
        .get_instance(&id)?
        .with_context(|| format!("no instance {id}"))?;
    let steps = history.step_history(&id)?;

    let color = output::supports_color();
    print!("{}", output::instance_detail(&instance, color));
    if steps.is_empty() {
        output::note_info("No steps recorded yet");
    } else {
        println!();
        print!("{}", output::step_table(&steps, color));
    }
    Ok(())
}

fn list(config: &PipelineConfig, status: Option<InstanceStatus>, limit: usize) -> Result<()> {
    let history = pipeline::open_history(config)?;
    let instances = history.list_instances(status, limit)?;
    if instances.is_empty() {
        output::note_info("No instances");
        return Ok(());
    }
    print!("{}", output::instance_table(&instances, output::supports_color()));
    Ok(())
}

fn purge(config: &PipelineConfig, older_than_days: u32) -> Result<()> {
    let history = pipeline::open_history(config)?;
    let cutoff = purge_cutoff(Utc::now(), older_than_days)?;
    let removed = history.purge_finished(cutoff)?;
    output::note_success(&format!(
        "Removed {removed} finished instance(s) last updated before {}",
        cutoff.format("%Y-%m-%d %H:%M:%S")
    ));
    Ok(())
}

fn purge_cutoff(now: DateTime<Utc>, older_than_days: u32) -> Result<DateTime<Utc>> {
    TimeDelta::try_days(i64::from(older_than_days))
        .and_then(|age| now.checked_sub_signed(age))
        .with_context(|| format!("--older-than-days {older_than_days} is out of range"))
}

fn show_config(config: &PipelineConfig) -> Result<()> {
    let rendered = serde_json::to_string_pretty(&config.redacted())?;
    println!("{}", redact_sensitive_data(&rendered));
    let masked = config.masked_fields();
    if !masked.is_empty() {
        output::note_info(&format!("Masked: {}", masked.join(", ")));
    }

    let report = docpipe_config::validate(config);
    for warning in &report.warnings {
        output::note_warn(&format!("{}: {}", warning.path, warning.message));
    }
    for err in &report.errors {
        output::note_error(&format!("{}: {}", err.path, err.message));
    }
    if report.is_valid() {
        output::note_success("Configuration is valid");
        Ok(())
    } else {
        anyhow::bail!("configuration has {} error(s)", report.errors.len())
    }
}

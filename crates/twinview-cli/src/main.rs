//! Twinview - Headless viewer session driver
//!
//! Runs one viewer session against a model API server with the in-memory
//! scene backend: lists or uploads models, loads the selected model and
//! reports the placed sensor overlays.

mod config;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use twinview_client::{HttpModelApi, ModelApi};
use twinview_core::ModelUpload;
use twinview_session::{
    Collaborators, LogNotifier, MemoryAddressBar, MemoryScene, SelectionOutcome,
    SessionOrchestrator, SessionSnapshot, UnavailableXr,
};

#[derive(Parser, Debug)]
#[command(name = "twinview")]
#[command(about = "Digital twin model viewer session")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "twinview.toml")]
    config: PathBuf,

    /// Base URL of the model API server
    #[arg(short, long)]
    api: Option<String>,

    /// Model URN to open
    #[arg(short, long, conflicts_with = "fragment")]
    model: Option<String>,

    /// Address fragment to start from (e.g. "#dXJu...")
    #[arg(long)]
    fragment: Option<String>,

    /// List models and exit
    #[arg(long)]
    list: bool,

    /// Upload a model file before opening it
    #[arg(long, value_name = "FILE")]
    upload: Option<PathBuf>,

    /// Path of the main design inside a .zip upload
    #[arg(long, value_name = "NAME", requires = "upload")]
    entry: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Twinview v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    if let Some(api) = args.api {
        config.api.base_url = api;
    }

    info!(
        api = %config.api.base_url,
        scenes = %config.scene.path.display(),
        "Configuration loaded"
    );

    let api = Arc::new(HttpModelApi::new(
        config.api.base_url.clone(),
        Duration::from_secs(config.api.timeout_secs),
    )?);

    if args.list {
        let models = api.list_models().await?;
        println!("{} models:", models.len());
        for model in models {
            println!("  - {} ({})", model.name, model.urn);
        }
        return Ok(());
    }

    let catalog = config.load_catalog()?;
    let scene = Arc::new(MemoryScene::with_dir(config.scene.path.clone()));
    let fragment = args
        .fragment
        .or_else(|| args.model.map(|urn| format!("#{urn}")));

    let orchestrator = Arc::new(SessionOrchestrator::new(
        Collaborators {
            api,
            engine: scene.clone(),
            xr: Arc::new(UnavailableXr),
            graphics: scene,
            notifier: Arc::new(LogNotifier),
            address: Arc::new(MemoryAddressBar::new(fragment)),
        },
        config.session_config(catalog),
    ));
    let forwarder = orchestrator.spawn_selection_forwarder();

    let outcome = match args.upload {
        Some(path) => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .context("Upload path has no file name")?;
            let mut upload = ModelUpload::new(file_name, bytes);
            if let Some(entry) = args.entry {
                upload = upload.with_archive_entry(entry);
            }
            if upload.needs_archive_entry() {
                bail!("Archive uploads need --entry naming the main design file");
            }
            orchestrator.upload(upload).await?
        }
        None => orchestrator.start().await?,
    };

    report(outcome.as_ref(), &orchestrator.snapshot().await);
    forwarder.abort();

    Ok(())
}

fn report(outcome: Option<&SelectionOutcome>, snapshot: &SessionSnapshot) {
    println!("{} models available", snapshot.models.len());
    let Some(selected) = &snapshot.selected else {
        println!("No model selected");
        return;
    };
    println!("Selected {selected}");

    match outcome {
        Some(SelectionOutcome::Loaded { sensors, misses }) => {
            println!("Loaded with {sensors} sensors");
            for miss in misses {
                warn!(?miss, "Sensor not placed");
            }
            for marker in &snapshot.markers {
                let p = marker.world_position;
                println!(
                    "  - marker {} at ({:.2}, {:.2}, {:.2}){}",
                    marker.object_id,
                    p.x,
                    p.y,
                    p.z,
                    if marker.visible { "" } else { " [hidden]" }
                );
            }
            for panel in &snapshot.panels {
                println!("  panel {} ({}px) {}", panel.kind, panel.width_px, panel.url);
            }
        }
        Some(SelectionOutcome::TranslationFailed(diagnostics)) => {
            println!("Translation failed:");
            for diagnostic in diagnostics {
                println!("  {diagnostic}");
            }
        }
        Some(SelectionOutcome::NotTranslated) => println!("Model has not been translated"),
        Some(SelectionOutcome::Superseded) => println!("Selection superseded"),
        None => println!("Phase: {:?}", snapshot.phase),
    }
}

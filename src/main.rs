//! bridge-convert: Bridge teleoperation data to a columnar dataset
//!
//! Subcommands:
//!
//! - `convert`  -- Walk the raw tree, normalize every trajectory, write the dataset
//! - `list`     -- List the trajectory directories the walk would visit
//! - `inspect`  -- Normalize a single trajectory and print its metadata

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use bridge_convert::config::ConverterConfig;
use bridge_convert::model::EmbeddingClient;
use bridge_convert::pipeline::ConversionPipeline;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Convert raw Bridge trajectories into a fixed-schema columnar dataset.
#[derive(Parser)]
#[command(name = "bridge-convert", version, about)]
struct Cli {
    /// Path to a JSON configuration file (uses defaults if not provided).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Dataset root containing one or more `raw/` directories.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Compute instruction embeddings through the configured API.
    #[arg(long, global = true)]
    embed: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert every annotated trajectory under the root.
    Convert {
        /// Output directory for the dataset.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Replace an existing output directory.
        #[arg(long)]
        overwrite: bool,

        /// Log and skip trajectories with malformed files instead of aborting.
        #[arg(long)]
        skip_malformed: bool,
    },

    /// List trajectory directories found under the root.
    List,

    /// Normalize one trajectory directory and print a summary.
    Inspect {
        /// Path to the trajectory directory.
        path: PathBuf,
    },
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing (reads RUST_LOG env var, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConverterConfig::load_from_file(path)?,
        None => ConverterConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.source.root = root.clone();
    }
    if cli.embed {
        config.embedding.enabled = true;
    }
    if config.embedding.api_key.is_empty() {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.embedding.api_key = key;
        }
    }

    match cli.command {
        Commands::Convert {
            output,
            overwrite,
            skip_malformed,
        } => {
            if let Some(output) = output {
                config.output.dir = output;
            }
            config.output.overwrite |= overwrite;
            config.episode.skip_malformed |= skip_malformed;
            cmd_convert(config).await
        }
        Commands::List => cmd_list(config),
        Commands::Inspect { path } => cmd_inspect(config, &path).await,
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn build_embedder(config: &ConverterConfig) -> Result<Option<EmbeddingClient>> {
    if !config.embedding.enabled {
        tracing::info!("Embeddings disabled, writing zero vectors");
        return Ok(None);
    }
    tracing::info!(model = %config.embedding.model_id, "Using embedding API");
    EmbeddingClient::new(&config.embedding).map(Some)
}

async fn cmd_convert(config: ConverterConfig) -> Result<()> {
    let embedder = build_embedder(&config)?;
    let pipeline = ConversionPipeline::new(config);

    let (summary, manifest) = pipeline
        .run(embedder.as_ref())
        .await
        .context("Conversion failed")?;

    tracing::info!(
        run_id = %manifest.run_id,
        episodes = manifest.episodes,
        steps = manifest.total_steps,
        unannotated = summary.skipped_unannotated,
        failed = summary.failed,
        path = %pipeline.config().output.dir.display(),
        "Saved dataset"
    );
    Ok(())
}

fn cmd_list(config: ConverterConfig) -> Result<()> {
    let pipeline = ConversionPipeline::new(config);
    let walk = pipeline.list_trajectories()?;

    for path in &walk.trajectories {
        println!("{}", path.display());
    }
    eprintln!(
        "{} trajectories in {} groups under {} raw directories ({} entries skipped)",
        walk.summary.trajectories,
        walk.summary.groups,
        walk.summary.raw_dirs,
        walk.summary.skipped_entries
    );
    Ok(())
}

async fn cmd_inspect(config: ConverterConfig, path: &Path) -> Result<()> {
    let embedder = build_embedder(&config)?;
    let pipeline = ConversionPipeline::new(config);

    let Some((key, record)) = pipeline.inspect_trajectory(path, embedder.as_ref()).await? else {
        println!("{}: no annotations/lang_lupus.txt, trajectory would be skipped", path.display());
        return Ok(());
    };

    let meta = &record.metadata;
    println!("Trajectory: {}", key.display());
    println!("  Steps: {}", meta.traj_length);
    println!("  depth_0: {}", meta.has_depth_0);
    println!("  image_0: {}", meta.has_image_0);
    println!("  image_1: {}", meta.has_image_1);
    println!("  image_2: {}", meta.has_image_2);
    println!("  image_3: {}", meta.has_image_3);
    println!("  language: {}", meta.has_language);
    println!("  groundtruth: {}", meta.has_groundtruth);

    if let Some(first) = record.steps.first() {
        println!();
        println!("Language instructions:");
        for (slot, text) in first.language_instruction.iter().enumerate() {
            println!("  [{slot}] {text}");
        }
        println!("Groundtruth:");
        for (slot, text) in first.groundtruth.iter().enumerate() {
            println!("  [{slot}] {text}");
        }
        println!("Initial state: {:?}", first.observation.state);
        println!("First action:  {:?}", first.action);
    }

    Ok(())
}

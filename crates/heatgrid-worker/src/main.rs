//! `heatgrid` command line.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use heatgrid_models::encoding::{snapshot_name, DEFAULT_TOP_CELLS};
use heatgrid_models::{Resolution, RunId};
use heatgrid_storage::OccupancyQueries;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use heatgrid_worker::{
    AnalysisConfig, DetectionOracle, HeatmapProcessor, ProcessOracle, ReplayOracle,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Spatial occupancy heatmaps from tracked video", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze one video file
    Analyze(AnalyzeArgs),
    /// Print the dashboard summary of a run
    Stats {
        run_id: i64,
        #[arg(long, env = "HEATGRID_DATABASE")]
        database: PathBuf,
        /// Number of densest cells to list
        #[arg(long, default_value_t = DEFAULT_TOP_CELLS)]
        top: usize,
    },
    /// Print the time series of one grid cell
    Cell {
        run_id: i64,
        x: u32,
        y: u32,
        #[arg(long, env = "HEATGRID_DATABASE")]
        database: PathBuf,
        /// Directory holding window snapshots
        #[arg(long)]
        snapshot_dir: Option<PathBuf>,
    },
    /// List stored runs, newest first
    Runs {
        #[arg(long, env = "HEATGRID_DATABASE")]
        database: PathBuf,
    },
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Source video
    video: PathBuf,

    /// Directory for videos, images and tracks
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Precomputed tracker output (JSON Lines)
    #[arg(long, conflicts_with = "tracker_cmd")]
    replay: Option<PathBuf>,

    /// External tracker command speaking the frame pipe protocol
    #[arg(long)]
    tracker_cmd: Option<String>,

    /// Seconds to wait for one tracker answer before killing it
    #[arg(long)]
    tracker_timeout: Option<f64>,

    /// SQLite database for trajectories and heatmap rows
    #[arg(long)]
    database: Option<PathBuf>,

    #[arg(long)]
    cell_size: Option<u32>,

    #[arg(long)]
    window_length: Option<u64>,

    /// Query the tracker every N frames
    #[arg(long)]
    stride: Option<u64>,

    /// Class id kept from tracker output
    #[arg(long)]
    target_class: Option<i32>,

    #[arg(long, requires = "height")]
    width: Option<u32>,

    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// Run id used when no database is attached
    #[arg(long)]
    run_id: Option<i64>,

    /// Extract one JPEG per heatmap window
    #[arg(long)]
    snapshots: bool,

    /// Keep the raw encodes instead of transcoding for the web
    #[arg(long)]
    no_transcode: bool,
}

impl AnalyzeArgs {
    fn apply(&self, mut config: AnalysisConfig) -> AnalysisConfig {
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(database) = &self.database {
            config.database = Some(database.clone());
        }
        if let Some(cell_size) = self.cell_size {
            config.cell_size = cell_size;
        }
        if let Some(window_length) = self.window_length {
            config.window_length = window_length;
        }
        if let Some(stride) = self.stride {
            config.detection_stride = stride;
        }
        if let Some(target_class) = self.target_class {
            config.target_class = target_class;
        }
        if let (Some(width), Some(height)) = (self.width, self.height) {
            config.resolution = Resolution::new(width, height);
        }
        if let Some(secs) = self.tracker_timeout.filter(|s| s.is_finite() && *s > 0.0) {
            config.tracker_timeout = Duration::from_secs_f64(secs);
        }
        if let Some(run_id) = self.run_id {
            config.run_id = RunId(run_id);
        }
        config.snapshots |= self.snapshots;
        if self.no_transcode {
            config.transcode = false;
        }
        config
    }

    fn oracle(&self, config: &AnalysisConfig) -> anyhow::Result<Box<dyn DetectionOracle>> {
        if let Some(path) = &self.replay {
            let oracle = ReplayOracle::from_path(path)
                .with_context(|| format!("loading replay file {}", path.display()))?;
            return Ok(Box::new(oracle));
        }
        if let Some(cmd) = &self.tracker_cmd {
            let oracle = ProcessOracle::spawn(cmd)
                .context("spawning tracker")?
                .with_timeout(config.tracker_timeout);
            return Ok(Box::new(oracle));
        }
        bail!("a detection source is required: pass --replay FILE or --tracker-cmd CMD")
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("heatgrid=info,heatgrid_worker=info,heatgrid_media=info,heatgrid_storage=info"));

    // Logs go to stderr; stdout carries the JSON results.
    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Analyze(args) => {
            let config = args.apply(AnalysisConfig::from_env());
            info!("Analysis config: {:?}", config);

            let oracle = args.oracle(&config)?;
            let artifacts = HeatmapProcessor::new(config)
                .process(&args.video, oracle)
                .await?;
            print_json(&artifacts)
        }
        Command::Stats {
            run_id,
            database,
            top,
        } => {
            let summary = query(database, move |q| {
                q.run(RunId(run_id))?;
                q.run_summary(RunId(run_id), top)
            })
            .await?;
            print_json(&summary)
        }
        Command::Cell {
            run_id,
            x,
            y,
            database,
            snapshot_dir,
        } => {
            let series = query(database, move |q| q.cell_series(RunId(run_id), x, y)).await?;
            let snaps: Vec<PathBuf> = match &snapshot_dir {
                Some(dir) => series
                    .iter()
                    .map(|s| dir.join(snapshot_name(run_id, s.window_start_frame)))
                    .filter(|p| p.exists())
                    .collect(),
                None => Vec::new(),
            };
            print_json(&json!({ "series": series, "snaps": snaps }))
        }
        Command::Runs { database } => {
            let runs = query(database, |q| q.list_runs()).await?;
            print_json(&runs)
        }
    }
}

/// Run a read query on a blocking thread.
async fn query<T, F>(database: PathBuf, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&OccupancyQueries) -> heatgrid_storage::StorageResult<T> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || {
        let queries = OccupancyQueries::open(&database)?;
        f(&queries)
    })
    .await
    .context("query task failed")??;
    Ok(result)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

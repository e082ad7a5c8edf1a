use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use erp_lib::{
    io::{
        epochs::write_epoch_tables,
        session::{list_session_files, load_session, store_session},
    },
    metrics::{bands::epoch_band_powers, evoked::evoked_by_condition},
    pipeline::{prepare_session, run_batch, BatchOutcome},
    PipelineConfig,
};
use log::info;
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

#[derive(Parser)]
#[command(
    name = "erp",
    version,
    about = "ERP: EEG session segmentation into labelled trial epochs"
)]
struct Cli {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RunArgs {
    /// Session file or directory of session files
    #[arg(long)]
    input: PathBuf,
    /// Pipeline configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the unmixing seed
    #[arg(long)]
    seed: Option<u64>,
    /// Concatenate all sessions before conditioning
    #[arg(long)]
    pool: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment sessions into epochs and print a summary
    Epochs {
        #[command(flatten)]
        run: RunArgs,
        /// Write epochs_A.csv, epochs_B.csv and features.csv here
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Average the epochs of each condition
    Evoked {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Band powers of every kept epoch
    Bands {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Load, unroll and align a single session without filtering
    Inspect {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Persist a posted session body under the ingestion naming scheme
    Store {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long)]
        suffix: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();

    match cli.command {
        Commands::Epochs { run, out_dir } => cmd_epochs(&run, out_dir.as_deref())?,
        Commands::Evoked { run } => cmd_evoked(&run)?,
        Commands::Bands { run } => cmd_bands(&run)?,
        Commands::Inspect { input, config } => cmd_inspect(&input, config.as_deref())?,
        Commands::Store {
            input,
            out_dir,
            suffix,
        } => cmd_store(&input, &out_dir, suffix.as_deref())?,
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    let cfg = match path {
        Some(path) => PipelineConfig::from_toml_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    cfg.validate()?;
    Ok(cfg)
}

fn session_paths(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_dir() {
        let paths = list_session_files(input)
            .with_context(|| format!("listing {}", input.display()))?;
        if paths.is_empty() {
            bail!("no *.json session files in {}", input.display());
        }
        Ok(paths)
    } else {
        Ok(vec![input.to_path_buf()])
    }
}

fn run(args: &RunArgs) -> Result<BatchOutcome> {
    let mut cfg = load_config(args.config.as_deref())?;
    if let Some(seed) = args.seed {
        cfg.ica.seed = seed;
    }
    cfg.pool_sessions |= args.pool;
    let paths = session_paths(&args.input)?;
    info!("processing {} session file(s)", paths.len());
    Ok(run_batch(&paths, &cfg)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct EpochsOutput {
    #[serde(flatten)]
    report: erp_lib::pipeline::BatchReport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    written: Vec<PathBuf>,
}

fn cmd_epochs(args: &RunArgs, out_dir: Option<&Path>) -> Result<()> {
    let outcome = run(args)?;
    let written = match out_dir {
        Some(dir) => write_epoch_tables(dir, &outcome.segmentation, outcome.channel_names)
            .with_context(|| format!("writing epoch tables to {}", dir.display()))?,
        None => Vec::new(),
    };
    print_json(&EpochsOutput {
        report: outcome.report(),
        written,
    })
}

fn cmd_evoked(args: &RunArgs) -> Result<()> {
    let outcome = run(args)?;
    print_json(&evoked_by_condition(&outcome.segmentation))
}

fn cmd_bands(args: &RunArgs) -> Result<()> {
    let outcome = run(args)?;
    print_json(&epoch_band_powers(&outcome.segmentation, outcome.fs))
}

fn cmd_inspect(input: &Path, config: Option<&Path>) -> Result<()> {
    let cfg = load_config(config)?;
    let session =
        load_session(input).with_context(|| format!("loading session {}", input.display()))?;
    let (_, summary) = prepare_session(&session, &cfg)?;
    print_json(&summary)
}

fn cmd_store(input: &Path, out_dir: &Path, suffix: Option<&str>) -> Result<()> {
    let body = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let received_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before 1970")?
        .as_secs_f64()
        * 1000.0;
    let path = store_session(&body, out_dir, received_ms, suffix)?;
    println!("{}", path.display());
    Ok(())
}

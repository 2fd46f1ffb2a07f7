//! lagsentry - aggregator lag anomaly pipeline
//!
//! Usage:
//!   lagsentry --config lagsentry.json train --data-dir data --model-out model.bin
//!   lagsentry --config lagsentry.json detect --model model.bin --out live_anomalies.json
//!   lagsentry --config lagsentry.json escalate --model model.bin snapshots/*.csv
//!   lagsentry --config lagsentry.json hydrate --input live_anomalies.json
//!   lagsentry report --input live_anomalies.json

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use lagsentry_core::{
    AnomalyHydrator, DirectoryCorpus, GraphiteConfig, GraphiteStore, LiveDetector, OutlierModel,
    PipelineConfig, RawTable, ThresholdEscalator, TrainingPipeline, load_records,
    rank_by_max_value, save_records, store::DEFAULT_TIMEOUT_SECS, table::DEFAULT_SKIP_LINES,
};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lagsentry")]
#[command(about = "Aggregator lag anomaly detection: train, detect, escalate, hydrate")]
struct Cli {
    /// Pipeline config (JSON); built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// Graphite render endpoint
    #[arg(long, env = "LAGSENTRY_RENDER_URL", default_value = "http://localhost:8080/render")]
    render_url: String,

    /// Bearer token for the metrics store
    #[arg(long, env = "LAGSENTRY_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,
}

impl StoreArgs {
    fn connect(self) -> Result<GraphiteStore> {
        let store = GraphiteStore::new(GraphiteConfig {
            render_url: self.render_url,
            api_token: self.api_token,
            timeout_secs: self.timeout,
        })?;
        Ok(store)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a new outlier model on historical CSV tables
    Train {
        /// Directory of historical *.csv tables
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        /// Where to write the model artifact
        #[arg(short, long, default_value = "model.bin")]
        model_out: PathBuf,

        /// Leading lines to ignore before each header row
        #[arg(long, default_value_t = DEFAULT_SKIP_LINES)]
        skip_lines: usize,
    },

    /// Sweep the machine x aggregator grid once and record anomalies
    Detect {
        #[arg(short, long, default_value = "model.bin")]
        model: PathBuf,

        /// Anomaly record file, replaced on every run
        #[arg(short, long, default_value = "live_anomalies.json")]
        out: PathBuf,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Static threshold escalation over batch lag snapshots
    Escalate {
        /// Also score every row with this model
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Snapshot directory, used when no file is given
        #[arg(short, long, default_value = "snapshots")]
        data_dir: PathBuf,

        #[arg(long, default_value_t = DEFAULT_SKIP_LINES)]
        skip_lines: usize,

        /// Snapshot files
        files: Vec<PathBuf>,
    },

    /// Attach max/avg/validity statistics to recorded anomalies
    Hydrate {
        #[arg(short, long, default_value = "live_anomalies.json")]
        input: PathBuf,

        /// Defaults to rewriting the input file
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        store: StoreArgs,
    },

    /// Print recorded anomalies ranked by max value
    Report {
        #[arg(short, long, default_value = "live_anomalies.json")]
        input: PathBuf,

        /// Show at most this many records
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Train {
            data_dir,
            model_out,
            skip_lines,
        } => run_train(config, &data_dir, &model_out, skip_lines),
        Commands::Detect { model, out, store } => run_detect(&config, &model, &out, store),
        Commands::Escalate {
            model,
            data_dir,
            skip_lines,
            files,
        } => run_escalate(&config, model.as_deref(), &data_dir, skip_lines, files),
        Commands::Hydrate {
            input,
            output,
            store,
        } => run_hydrate(&config, &input, output.as_deref(), store),
        Commands::Report { input, limit } => run_report(&input, limit),
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => Ok(PipelineConfig::from_json_file(path)?),
        None => {
            let config = PipelineConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

fn run_train(config: PipelineConfig, data_dir: &Path, model_out: &Path, skip_lines: usize) -> Result<()> {
    let corpus = DirectoryCorpus::new(data_dir).with_skip_lines(skip_lines);
    let trained = TrainingPipeline::new(config)
        .train(&corpus)
        .with_context(|| format!("training on {}", data_dir.display()))?;

    trained.model.save(model_out)?;
    let report = &trained.report;
    info!(
        path = %model_out.display(),
        tables = report.tables_loaded.len(),
        skipped = report.tables_skipped.len(),
        columns = report.feature_columns.len(),
        windows = report.window_count,
        "model saved"
    );
    Ok(())
}

fn run_detect(config: &PipelineConfig, model_path: &Path, out: &Path, store: StoreArgs) -> Result<()> {
    if config.machines.is_empty() || config.aggregators.is_empty() {
        bail!("config lists no machines or no aggregators to scan");
    }
    let model = OutlierModel::load(model_path)?;
    let detector = LiveDetector::new(config, &model, store.connect()?)
        .context("model does not fit the configured window size")?;

    let run = detector.detect()?;
    save_records(out, &run.anomalies)?;
    info!(
        path = %out.display(),
        anomalies = run.anomalies.len(),
        skipped = run.stats.pairs_skipped,
        too_short = run.stats.series_too_short,
        "anomaly records written"
    );
    Ok(())
}

fn run_escalate(
    config: &PipelineConfig,
    model_path: Option<&Path>,
    data_dir: &Path,
    skip_lines: usize,
    files: Vec<PathBuf>,
) -> Result<()> {
    let model = model_path.map(OutlierModel::load).transpose()?;
    let escalator = ThresholdEscalator::new(config, model.as_ref());

    let paths = if files.is_empty() {
        DirectoryCorpus::new(data_dir).csv_paths()?
    } else {
        files
    };

    let mut meta_alerts = 0;
    for path in &paths {
        let table = match RawTable::from_path(path, skip_lines) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "skipping snapshot");
                continue;
            }
        };
        let report = match escalator.classify(&table) {
            Ok(r) => r,
            Err(e) => {
                warn!(table = %table.name, error = %e, "skipping snapshot");
                continue;
            }
        };
        if report.meta_alert() {
            meta_alerts += 1;
        }
        print_batch(&report);
    }
    info!(snapshots = paths.len(), meta_alerts, "escalation finished");
    Ok(())
}

fn print_batch(report: &lagsentry_core::BatchReport) {
    println!("== {} ({} rows)", report.table, report.rows.len());
    match &report.breaches {
        Some(b) => {
            println!(
                "   level 1: {}  level 2: {}  breaching shards: {}{}",
                b.level_1_rows,
                b.level_2_rows,
                b.breaching_shards,
                if b.meta_alert { "  [META ALERT]" } else { "" }
            );
        }
        None => println!("   thresholds skipped (lag or shard column missing)"),
    }
    if let Some(rate) = report.ml_outlier_rate() {
        println!(
            "   ml outliers: {} ({:.2}%)",
            report.ml_outliers,
            rate * 100.0
        );
    }
}

fn run_hydrate(
    config: &PipelineConfig,
    input: &Path,
    output: Option<&Path>,
    store: StoreArgs,
) -> Result<()> {
    let records = load_records(input)?;
    let hydrator = AnomalyHydrator::new(config, store.connect()?);
    let hydrated = hydrator.hydrate(records);

    let out = output.unwrap_or(input);
    save_records(out, &hydrated)?;
    info!(path = %out.display(), records = hydrated.len(), "hydrated records written");
    Ok(())
}

fn run_report(input: &Path, limit: Option<usize>) -> Result<()> {
    let mut records = load_records(input)?;
    rank_by_max_value(&mut records);
    let shown = limit.unwrap_or(records.len()).min(records.len());

    println!(
        "{:<24} {:<32} {:<20} {:>8} {:>10} {:>10} {:>7}",
        "machine", "aggregator", "timestamp", "severity", "max", "avg", "valid"
    );
    for r in &records[..shown] {
        let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |v| format!("{:.4}", v));
        let valid = r
            .hydration
            .map_or_else(|| "-".to_string(), |h| format!("{:.1}%", h.valid_pct * 100.0));
        println!(
            "{:<24} {:<32} {:<20} {:>8} {:>10} {:>10} {:>7}",
            r.machine,
            r.aggregator,
            r.timestamp.format("%Y-%m-%d %H:%M:%S"),
            r.severity.as_str(),
            fmt(r.max_value()),
            fmt(r.hydration.and_then(|h| h.avg_value)),
            valid
        );
    }
    if shown < records.len() {
        println!("... {} more", records.len() - shown);
    }
    Ok(())
}

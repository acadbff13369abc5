//! Batch pipeline entry point.
//!
//! Runs the offline stages over a JSON record list and writes every artifact
//! into the configured data directory.
//!
//! # Examples
//!
//! Full run with the default configuration:
//! ```bash
//! pipeline run --input data/articles.json
//! ```
//!
//! Re-split and relabel after editing the sub-cluster targets:
//! ```bash
//! pipeline --config topics.toml consolidate
//! pipeline --config topics.toml label
//! ```

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, ContentArrangement, Table};
use indicatif::{ProgressBar, ProgressStyle};
use paper_topics::{
    config::PipelineConfig,
    consolidate::{AllocationOutcome, Consolidation},
    label::LabelTable,
    pipeline::{Evaluation, Pipeline},
    storage::json::{read_records_file, write_atomic, JsonArtifactStore},
};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Offline topic clustering pipeline
#[derive(Parser, Debug)]
#[command(
    name = "pipeline",
    version,
    about = "Cluster publication records into labelled topics",
    long_about = "Runs the batch stages: preprocess, train (vectorizer, coarse pass, \
                  association rules), consolidate (re-split into final clusters) and label. \
                  Each stage reads its inputs from and writes its outputs to the data directory."
)]
struct Args {
    /// TOML configuration file
    #[arg(long, short, value_name = "FILE", env = "PAPER_TOPICS_CONFIG")]
    config: Option<PathBuf>,

    /// Artifact directory (overrides paths.data_dir)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Logging verbosity level (overrides logging.level)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deduplicate and clean raw records
    Preprocess {
        /// Raw record list (overrides paths.input)
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,
    },
    /// Fit the vectorizer, run the coarse pass and mine association rules
    Train,
    /// Re-split coarse clusters into final clusters
    Consolidate,
    /// Derive a label for every final cluster
    Label,
    /// Write the HTML cluster report
    Report {
        /// Output file (overrides paths.report)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Print coarse silhouette and an inertia sweep
    Evaluate,
    /// Preprocess, train, consolidate and label in one go
    Run {
        /// Raw record list (overrides paths.input)
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,
    },
}

/// Initialize logging subsystem with the specified level
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

fn create_progress_bar() -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} clusters labelled")
            .context("Invalid progress bar template")?
            .progress_chars("##-"),
    );
    Ok(pb)
}

async fn load_raw(config: &PipelineConfig, input: Option<PathBuf>) -> Result<Vec<paper_topics::Record>> {
    let input = input.unwrap_or_else(|| config.paths.input.clone());
    if !input.exists() {
        anyhow::bail!("Input file not found: {:?}", input);
    }
    info!("Loading records from {:?}", input);
    read_records_file(&input)
        .await
        .with_context(|| format!("Failed to load records from {:?}", input))
}

fn print_consolidation(consolidation: &Consolidation) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Coarse").add_attribute(Attribute::Bold),
        Cell::new("Members").add_attribute(Attribute::Bold),
        Cell::new("Target").add_attribute(Attribute::Bold),
        Cell::new("Final ids").add_attribute(Attribute::Bold),
    ]);
    for allocation in &consolidation.allocations {
        let ids = match &allocation.outcome {
            AllocationOutcome::Degenerate { id } => format!("{id} (degenerate)"),
            AllocationOutcome::Split { ids } => format!("{}..={}", ids.start, ids.end.saturating_sub(1)),
        };
        table.add_row(vec![
            Cell::new(allocation.coarse),
            Cell::new(allocation.members),
            Cell::new(allocation.target),
            Cell::new(ids),
        ]);
    }
    println!("{table}");
    println!(
        "{} final clusters, {} unassigned records, next id {}",
        consolidation.final_cluster_count(),
        consolidation.unassigned(),
        consolidation.next_id
    );
}

fn print_labels(labels: &LabelTable) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Cluster").add_attribute(Attribute::Bold),
        Cell::new("Size").add_attribute(Attribute::Bold),
        Cell::new("Keywords").add_attribute(Attribute::Bold),
        Cell::new("Sample titles").add_attribute(Attribute::Bold),
    ]);
    for (id, label) in labels.iter() {
        table.add_row(vec![
            Cell::new(id),
            Cell::new(label.size),
            Cell::new(label.keywords.join(", ")),
            Cell::new(label.sample_titles.join("\n")),
        ]);
    }
    println!("{table}");
}

fn print_evaluation(evaluation: &Evaluation) {
    match evaluation.silhouette {
        Some(score) => println!("Coarse silhouette: {score:.4}"),
        None => println!("Coarse silhouette: undefined"),
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("k").add_attribute(Attribute::Bold),
        Cell::new("Inertia").add_attribute(Attribute::Bold),
    ]);
    for (k, inertia) in &evaluation.inertia {
        table.add_row(vec![Cell::new(k), Cell::new(format!("{inertia:.4}"))]);
    }
    println!("{table}");
}

async fn label_with_progress(pipeline: &mut Pipeline<JsonArtifactStore>) -> Result<LabelTable> {
    let progress = create_progress_bar()?;
    let labels = pipeline
        .label(|done, total| {
            progress.set_length(total as u64);
            progress.set_position(done as u64);
        })
        .await
        .context("Failed to label clusters")?;
    progress.finish();
    Ok(labels)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = PipelineConfig::load_or_default(args.config.as_deref())
        .with_context(|| format!("Failed to load configuration {:?}", args.config))?;
    if let Some(dir) = args.data_dir.clone() {
        config.paths.data_dir = dir;
    }

    let level = args.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level).context("Failed to initialize logging")?;
    debug!("CLI arguments: {:?}", args);

    let start_time = Instant::now();

    let store = JsonArtifactStore::open(config.paths.data_dir.clone())
        .await
        .with_context(|| format!("Failed to open artifact directory {:?}", config.paths.data_dir))?;
    info!("Artifact directory: {:?}", store.dir());
    let report_path = config.paths.report.clone();
    let mut pipeline = Pipeline::new(store, config);

    match args.command {
        Command::Preprocess { input } => {
            let raw = load_raw(pipeline.config(), input).await?;
            let summary = pipeline.preprocess(raw).await.context("Preprocess stage failed")?;
            println!(
                "{} records kept, {} duplicate rows dropped, {} with empty abstracts",
                summary.records,
                summary.duplicates.surplus_rows(),
                summary.empty_abstracts
            );
            if summary.duplicates.has_divergent() {
                warn!(
                    "{} keys had divergent duplicate rows; the first row of each was kept",
                    summary.duplicates.divergent().count()
                );
            }
        }
        Command::Train => {
            let summary = pipeline.train().await.context("Train stage failed")?;
            println!(
                "Vocabulary: {} terms, coarse sizes {:?}, inertia {:.4}, {} association rules",
                summary.vocabulary, summary.coarse_sizes, summary.inertia, summary.rules
            );
        }
        Command::Consolidate => {
            let consolidation = pipeline.consolidate().await.context("Consolidate stage failed")?;
            print_consolidation(&consolidation);
        }
        Command::Label => {
            let labels = label_with_progress(&mut pipeline).await?;
            print_labels(&labels);
        }
        Command::Report { output } => {
            let html = pipeline.report().await.context("Failed to render report")?;
            let path = output.unwrap_or(report_path);
            write_atomic(&path, html.as_bytes())
                .await
                .with_context(|| format!("Failed to write report to {:?}", path))?;
            println!("Report written to {}", path.display());
        }
        Command::Evaluate => {
            let evaluation = pipeline.evaluate().await.context("Evaluation failed")?;
            print_evaluation(&evaluation);
        }
        Command::Run { input } => {
            let raw = load_raw(pipeline.config(), input).await?;
            pipeline.preprocess(raw).await.context("Preprocess stage failed")?;
            pipeline.train().await.context("Train stage failed")?;
            let consolidation = pipeline.consolidate().await.context("Consolidate stage failed")?;
            print_consolidation(&consolidation);
            let labels = label_with_progress(&mut pipeline).await?;
            print_labels(&labels);
        }
    }

    info!("Completed in {:.2?}", start_time.elapsed());
    Ok(())
}

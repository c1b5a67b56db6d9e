//! metazoo CLI - meta-models over a CNN model zoo
//!
//! Command-line entry point orchestrating the study stage by stage:
//!
//! 1. Extract: pull aligned covariate/target datasets out of the zoo
//! 2. Train: sweep meta-models over covariate families and train fractions
//! 3. Plot: treatment effects, zoo accuracy spreads, result heatmaps
//!
//! Each stage reads the previous stage's bincode artifacts from the
//! experiment directory, so stages rerun independently.
//!
//! The expression novelty metrics ride along as their own subcommands; they
//! share nothing with the zoo pipeline except the crate.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;

use metazoo::config::{Config, FINAL_CHECKPOINT};
use metazoo::extraction::store::ExperimentStore;
use metazoo::extraction::{extract_covariates_and_targets, ImagePool};
use metazoo::novelty;
use metazoo::zoo::{load_zoo, WeightLayout};

/// Meta-model study over a CNN model zoo
///
/// metazoo loads a zoo of small CNNs (flat weights + metrics table),
/// extracts aligned covariate/target datasets at chosen checkpoints, trains
/// dense meta-models that predict converged behavior, and renders the
/// study's plots.
///
/// Examples:
///   metazoo extract                      # All configured checkpoints
///   metazoo extract --chkpt 20           # One checkpoint
///   metazoo train-meta                   # Full covariate/fraction sweep
///   metazoo plot-heatmap                 # Pivot results into heatmaps
#[derive(Parser, Debug)]
#[command(name = "metazoo")]
#[command(version)]
#[command(about, long_about = None)]
struct Cli {
    /// Directory holding `metazoo.toml`
    ///
    /// Missing file means built-in defaults; every pipeline stage reads the
    /// same config, so keep one file per study.
    #[arg(short, long, default_value = ".")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract covariate/target datasets from the zoo
    ///
    /// Loads `weights.bin` / `metrics.csv` / `train_images.bin` from the
    /// data directory and writes one aligned dataset per checkpoint into
    /// the experiment directory. The final checkpoint is always extracted;
    /// its predictions are every meta-model's target.
    Extract {
        /// Extract only this checkpoint (plus the final one)
        #[arg(long)]
        chkpt: Option<u32>,
    },

    /// Train meta-models over every configured setup
    ///
    /// Sweeps the hparams covariates and the per-checkpoint weight
    /// covariates across all train fractions, appending to the cumulative
    /// results table after every run.
    TrainMeta,

    /// Plot individual and average treatment effects per hyperparameter
    ///
    /// Requires an identical-samples extraction at the final checkpoint:
    /// the plots compare how differently-configured base models classify
    /// the same image.
    PlotTe,

    /// Plot the zoo's train/test accuracy spread per checkpoint
    PlotAccuracies,

    /// Plot meta-model accuracies pivoted over (train_fraction, chkpt)
    PlotHeatmap,

    /// Compute syntactic and semantic novelty rates of generated expressions
    ///
    /// Both inputs are JSON objects mapping a simplified expression to the
    /// list of raw expressions that simplify to it.
    NoveltyRate {
        /// Generated expressions (JSON buckets)
        #[arg(long)]
        generated: PathBuf,

        /// Training-set expressions (JSON buckets)
        #[arg(long)]
        training: PathBuf,

        /// Keep only the first occurrence among unseen expressions
        #[arg(long)]
        deduplicate: bool,
    },

    /// Aggregate per-expression condition distances per expected condition
    ///
    /// Input is a JSON array of rows with expected/true leading powers at 0
    /// and infinity plus an is_terminal flag.
    ConditionDistance {
        /// Condition rows (JSON array)
        #[arg(long)]
        input: PathBuf,

        /// Distance charged to non-terminal expressions
        #[arg(long, default_value_t = novelty::condition::NONTERMINAL_DISTANCE)]
        nonterminal_distance: f64,

        /// Distance charged to failed evaluations; omit to exclude them
        #[arg(long)]
        failure_distance: Option<f64>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = Config::load(&cli.config_dir);

    match cli.command {
        Command::Extract { chkpt } => run_extract(&config, chkpt),
        Command::TrainMeta => run_train_meta(&config),
        Command::PlotTe => {
            let store = ExperimentStore::open(&config)?;
            metazoo::plots::plot_treatment_effects(&config, &store)
        }
        Command::PlotAccuracies => {
            let (_, metrics) = load_zoo(&config)?;
            metazoo::plots::plot_base_model_accuracies(&config, &metrics)
        }
        Command::PlotHeatmap => {
            let store = ExperimentStore::open(&config)?;
            metazoo::plots::plot_results_heatmap(&config, &store)
        }
        Command::NoveltyRate { generated, training, deduplicate } => {
            run_novelty_rate(&generated, &training, deduplicate)
        }
        Command::ConditionDistance { input, nonterminal_distance, failure_distance } => {
            run_condition_distance(&input, nonterminal_distance, failure_distance)
        }
    }
}

fn run_extract(config: &Config, only_chkpt: Option<u32>) -> Result<()> {
    config.validate()?;
    println!("{}", config.display_summary());

    let store = ExperimentStore::open(config)?;
    let (weights, metrics) = load_zoo(config)?;
    let pool = ImagePool::load(config)?;
    let (_, _, channels) = config.dataset.input_shape();
    let layout = WeightLayout::cnn_zoo(channels, config.dataset.num_classes());

    let mut checkpoints: Vec<u32> = match only_chkpt {
        Some(chkpt) => vec![chkpt],
        None => config.covariate_checkpoints.clone(),
    };
    if !checkpoints.contains(&FINAL_CHECKPOINT) {
        checkpoints.push(FINAL_CHECKPOINT);
    }

    for chkpt in checkpoints {
        let data = extract_covariates_and_targets(config, &layout, &weights, &metrics, &pool, chkpt)?;
        store.save_extraction(config, chkpt, &data)?;
        println!(
            "  {} checkpoint {}: {} rows",
            "extracted".green().bold(),
            chkpt,
            data.num_rows()
        );
    }
    Ok(())
}

fn run_train_meta(config: &Config) -> Result<()> {
    config.validate()?;
    println!("{}", config.display_summary());

    let store = ExperimentStore::open(config)?;
    let results = metazoo::meta::train_over_setups(config, &store)?;

    println!("\n{}", " META-MODEL SWEEP COMPLETE ".bold().on_green());
    for row in &results {
        println!(
            "  chkpt {:>3}  fraction {:.2}  train {}  test {}",
            row.chkpt,
            row.train_fraction,
            format!("{:.3}", row.train_accuracy).cyan(),
            format!("{:.3}", row.test_accuracy).cyan(),
        );
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn run_novelty_rate(generated: &PathBuf, training: &PathBuf, deduplicate: bool) -> Result<()> {
    let generated: novelty::ExpressionBuckets = read_json(generated)?;
    let training: novelty::ExpressionBuckets = read_json(training)?;

    // Raw strings act as their own simplified form here; callers needing a
    // real simplifier use the library API with their own closure.
    let split = novelty::seen_and_unseen_expressions(&generated, &training, deduplicate, |e| {
        e.to_string()
    });

    for (name, partition) in [
        ("syntactic", &split.syntactic),
        ("semantic", &split.semantic),
    ] {
        let summary = novelty::novelty_rate(&partition.seen, &partition.unseen)?;
        println!(
            "{} novelty: {} seen, {} unseen, rate {}",
            name.bold(),
            summary.num_seen,
            summary.num_unseen,
            format!("{:.4}", summary.novelty_rate).green()
        );
    }
    Ok(())
}

fn run_condition_distance(
    input: &PathBuf,
    nonterminal_distance: f64,
    failure_distance: Option<f64>,
) -> Result<()> {
    let rows: Vec<novelty::ConditionRow> = read_json(input)?;
    let distances =
        novelty::distance_from_expected_condition(&rows, nonterminal_distance, failure_distance);

    println!("{:>12} {:>12} {:>10}", "at_0".bold(), "at_inf".bold(), "distance".bold());
    for d in &distances {
        println!(
            "{:>12} {:>12} {:>10.4}",
            d.expected_leading_at_0, d.expected_leading_at_inf, d.distance_from_expected_condition
        );
    }
    Ok(())
}

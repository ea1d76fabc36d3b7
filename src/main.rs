//! Contrastive SSL CLI
//!
//! Entry point for training SimCLR, BarlowTwins and MoCo on STL-10 and
//! inspecting the derived dataset geometry and run configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use contrastive_ssl::backend::{backend_name, init_device, TrainingBackend};
use contrastive_ssl::dataset::{prepare_dataset, DataSource, SyntheticConfig};
use contrastive_ssl::model::config::{AlgorithmKind, ExperimentConfig};
use contrastive_ssl::training::{run_experiment, HISTORY_KEYS};
use contrastive_ssl::utils::format_number;
use contrastive_ssl::utils::logging::{init_logging, LogConfig, LogLevel};

/// Self-supervised representation learning on STL-10
///
/// Trains an encoder with SimCLR, BarlowTwins or MoCo and tracks a linear
/// probe on the labeled split. The per-epoch history is written as
/// `<AlgorithmName>.pkl`.
#[derive(Parser, Debug)]
#[command(name = "contrastive_ssl")]
#[command(version)]
#[command(about = "SimCLR / BarlowTwins / MoCo on STL-10 with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Log level for this crate (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pre-train one algorithm and save its history
    Train {
        #[command(flatten)]
        overrides: Overrides,

        /// Number of training epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Network width (channels and feature size)
        #[arg(long)]
        width: Option<usize>,

        /// Directory receiving <AlgorithmName>.pkl
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,

        /// Also write the history as JSON
        #[arg(long, default_value = "false")]
        json: bool,

        /// Save encoder and probe records
        #[arg(long, default_value = "false")]
        save_model: bool,

        /// Hide the per-epoch progress bar
        #[arg(long, default_value = "false")]
        no_progress: bool,
    },

    /// Show split sizes and the derived batch sizes
    Stats {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Print the effective configuration as TOML
    Config {
        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Flags shared by every subcommand; each overrides the config file
#[derive(clap::Args, Debug)]
struct Overrides {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Algorithm to train (simclr, barlow-twins, moco)
    #[arg(short, long)]
    algorithm: Option<AlgorithmKind>,

    /// Optimisation steps per epoch; batch sizes are derived from it
    #[arg(long)]
    steps_per_epoch: Option<usize>,

    /// STL-10 binary directory (or its parent)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Use generated images instead of STL-10
    #[arg(long, default_value = "false")]
    synthetic: bool,

    /// Cap on unlabeled STL-10 images, for quick runs
    #[arg(long)]
    max_unlabeled: Option<usize>,
}

impl Overrides {
    fn resolve(&self) -> Result<ExperimentConfig> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ExperimentConfig::default(),
        };

        if let Some(algorithm) = self.algorithm {
            config.algorithm = algorithm;
        }
        if let Some(steps) = self.steps_per_epoch {
            config.steps_per_epoch = steps;
        }

        if self.synthetic {
            if !matches!(config.data, DataSource::Synthetic(_)) {
                config.data = DataSource::Synthetic(SyntheticConfig::default());
            }
        } else if self.data_dir.is_some() || self.max_unlabeled.is_some() {
            let (dir, max_unlabeled) = match &config.data {
                DataSource::Stl10 { dir, max_unlabeled } => (dir.clone(), *max_unlabeled),
                DataSource::Synthetic(_) => (PathBuf::from("data"), None),
            };
            config.data = DataSource::Stl10 {
                dir: self.data_dir.clone().unwrap_or(dir),
                max_unlabeled: self.max_unlabeled.or(max_unlabeled),
            };
        }

        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    if let Some(level) = &cli.log_level {
        log_config.level = LogLevel::parse(level);
    }

    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Train {
            overrides,
            epochs,
            width,
            output_dir,
            seed,
            json,
            save_model,
            no_progress,
        } => {
            let mut config = overrides.resolve()?;
            if let Some(epochs) = epochs {
                config.num_epochs = epochs;
            }
            if let Some(width) = width {
                config.width = width;
            }
            if let Some(dir) = output_dir {
                config.output.dir = dir;
            }
            if let Some(seed) = seed {
                config.seed = seed;
            }
            config.output.json |= json;
            config.output.save_model |= save_model;

            cmd_train(&config, !no_progress)?;
        }

        Commands::Stats { overrides } => {
            cmd_stats(&overrides.resolve()?)?;
        }

        Commands::Config { overrides } => {
            let config = overrides.resolve()?;
            config.validate()?;
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}

fn cmd_train(config: &ExperimentConfig, show_progress: bool) -> Result<()> {
    println!("{}", format!("Training {}", config.algorithm.name()).green().bold());
    println!("  Backend: {}", backend_name());
    println!("  Epochs: {}", config.num_epochs);
    println!("  Steps per epoch: {}", config.steps_per_epoch);
    println!("  Width: {}", config.width);
    println!("  Hyperparameters: {:?}", config.algorithm_config());
    println!();

    let device = init_device(config.seed);
    info!("Using device {:?}", device);

    let outcome = run_experiment::<TrainingBackend>(config, device, show_progress)
        .with_context(|| format!("{} run failed", config.algorithm.name()))?;

    println!();
    println!("{}", "Training Complete!".green().bold());
    if let Some(last) = outcome.history.last() {
        let values = [
            last.c_loss,
            last.c_acc,
            last.r_acc,
            last.p_loss,
            last.p_acc,
            last.val_p_loss,
            last.val_p_acc,
        ];
        for (key, value) in HISTORY_KEYS.iter().zip(values) {
            println!("  {:<11} {:.4}", key, value);
        }
    }
    println!();
    println!("  History: {}", outcome.history_path.display().to_string().cyan());
    if let Some(path) = &outcome.json_path {
        println!("  JSON:    {}", path.display().to_string().cyan());
    }
    for path in &outcome.model_paths {
        println!("  Model:   {}.mpk", path.display().to_string().cyan());
    }

    Ok(())
}

fn cmd_stats(config: &ExperimentConfig) -> Result<()> {
    let data = prepare_dataset(config.steps_per_epoch, &config.data)
        .context("preparing dataset")?;
    let stats = data.stats();

    println!("{}", "Dataset Statistics".cyan().bold());
    println!("  Unlabeled train: {}", format_number(stats.unlabeled_len));
    println!("  Labeled train:   {}", format_number(stats.labeled_len));
    println!("  Test:            {}", format_number(stats.test_len));
    println!();
    println!("{}", "Batch Geometry".cyan().bold());
    println!("  Steps per epoch: {}", stats.steps_per_epoch);
    println!(
        "  Batch size:      {} ({} unlabeled + {} labeled)",
        stats.batch_size, stats.unlabeled_batch_size, stats.labeled_batch_size
    );
    println!("  Test batches:    {}", stats.test_batches);

    Ok(())
}

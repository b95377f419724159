use clap::{Args, Parser, Subcommand};
use piper_bridge::bridge;
use piper_bridge::phonemize::{phonemizer_for, PhonemeType};
use piper_bridge::pipeline::*;
use piper_bridge::training::*;
use std::path::PathBuf;
use tracing::{info, warn};

/// Trains a Piper voice and exports it to ONNX
#[derive(Parser, Debug)]
pub struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Full run from recordings to an exported model
    Run(ConfigArgs),
    /// Export a checkpoint from an earlier run
    Export {
        #[clap(flatten)]
        config: ConfigArgs,
        /// Checkpoint to export, defaults to the newest in the work directory
        #[clap(long)]
        checkpoint: Option<PathBuf>,
    },
    /// Report how well the phoneme table covers a dataset
    Analyse {
        /// Pipe separated metadata file
        #[clap(long)]
        manifest: PathBuf,
        #[clap(long, default_value = "es")]
        language: String,
        #[clap(long, value_enum, default_value_t = PhonemeType::Espeak)]
        phoneme_type: PhonemeType,
        /// Where to write the JSON report
        #[clap(long, default_value = "coverage.json")]
        report: PathBuf,
    },
    /// Install the piper_phonemize module into site-packages
    InstallBridge {
        #[clap(long)]
        site_packages: Option<PathBuf>,
        #[clap(long, default_value = "python3")]
        python: String,
    },
}

/// Settings for a run, anything given here overrides the config file
#[derive(Args, Debug)]
struct ConfigArgs {
    /// JSON config file
    #[clap(long)]
    config: Option<PathBuf>,
    #[clap(long)]
    project_name: Option<String>,
    /// espeak-ng voice
    #[clap(long)]
    language: Option<String>,
    #[clap(long)]
    metadata: Option<PathBuf>,
    #[clap(long)]
    work_dir: Option<PathBuf>,
    #[clap(long)]
    input_dir: Option<PathBuf>,
    #[clap(long, value_enum)]
    quality: Option<Quality>,
    #[clap(long)]
    batch_size: Option<u32>,
    #[clap(long)]
    checkpoint_epochs: Option<u32>,
    #[clap(long)]
    output_model_name: Option<String>,
    #[clap(long)]
    site_packages: Option<PathBuf>,
    #[clap(long)]
    skip_dependencies: bool,
}

impl ConfigArgs {
    fn resolve(self) -> anyhow::Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)?,
            None => TrainingConfig::default(),
        };
        if let Some(x) = self.project_name {
            config.project_name = x;
        }
        if let Some(x) = self.language {
            config.language = x;
        }
        if let Some(x) = self.metadata {
            config.metadata = Some(x);
        }
        if let Some(x) = self.work_dir {
            config.work_dir = x;
        }
        if let Some(x) = self.input_dir {
            config.input_dir = x;
        }
        if let Some(x) = self.quality {
            config.quality = x;
        }
        if let Some(x) = self.batch_size {
            config.batch_size = x;
        }
        if let Some(x) = self.checkpoint_epochs {
            config.checkpoint_epochs = x;
        }
        if let Some(x) = self.output_model_name {
            config.output_model_name = x;
        }
        if let Some(x) = self.site_packages {
            config.site_packages = Some(x);
        }
        config.skip_dependencies |= self.skip_dependencies;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    piper_bridge::setup_logging();
    let args = Cli::parse();

    match args.command {
        Command::Run(config) => {
            let config = config.resolve()?;
            let model = Pipeline::new(&config, SystemRunner).run()?;
            info!(
                "Done! Model: {} ({:.1} MB)",
                model.onnx.display(),
                model.size_mib()
            );
        }
        Command::Export { config, checkpoint } => {
            let config = config.resolve()?;
            Pipeline::new(&config, SystemRunner).export(checkpoint.as_deref())?;
        }
        Command::Analyse {
            manifest,
            language,
            phoneme_type,
            report,
        } => {
            let manifest = Manifest::load(&manifest)?;
            info!("Analysing {} utterances", manifest.len());
            let mut analytics = CoverageAnalytics::new(phonemizer_for(phoneme_type, &language));
            for utterance in &manifest.utterances {
                analytics.push_utterance(utterance);
            }
            let coverage = analytics.generate_report();

            println!("Utterances: {}", coverage.utterances);
            println!("Distinct symbols: {}", coverage.symbols.len());
            println!("Coverage: {:.2}%", coverage.coverage() * 100.0);
            if !coverage.missing.is_empty() {
                warn!("Symbols missing from the table: {:?}", coverage.missing);
            }

            std::fs::write(&report, serde_json::to_string_pretty(&coverage)?)?;
            info!("Report written to {}", report.display());
        }
        Command::InstallBridge {
            site_packages,
            python,
        } => {
            let site_packages = match site_packages {
                Some(p) => p,
                None => bridge::site_packages(&python)?,
            };
            bridge::install(&site_packages)?;
        }
    }
    Ok(())
}

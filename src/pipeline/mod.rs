//! Drives a full Piper training run: workspace, dependencies, the phonemize bridge, manifest,
//! preprocessing, training and export. The model work all happens in piper_train, this only sets
//! the stage for it and checks each step left behind what the next one needs.
use crate::bridge;
use crate::training::Manifest;
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub mod config;
pub mod export;
pub mod patches;
pub mod runner;
pub mod workspace;

pub use config::*;
pub use export::{ExportedModel, EXPORT_DRIVER};
pub use patches::{CompatPatch, PatchOutcome};
pub use runner::*;

const PIP_PACKAGES: &[&str] = &[
    "Cython",
    "numpy",
    "onnxruntime",
    "onnx",
    "pytorch-lightning==1.9.0",
    "onnxscript",
];

pub struct Pipeline<'a, R: CommandRunner> {
    config: &'a TrainingConfig,
    runner: R,
}

impl<'a, R: CommandRunner> Pipeline<'a, R> {
    pub fn new(config: &'a TrainingConfig, runner: R) -> Self {
        Self { config, runner }
    }

    /// Runs every step in order, stopping at the first one that can't be recovered from.
    pub fn run(&mut self) -> anyhow::Result<ExportedModel> {
        info!("1/7: Preparing a clean workspace in {}", self.config.work_dir.display());
        self.prepare_workspace()?;
        info!("2/7: Copying recordings");
        self.copy_dataset()?;
        info!("3/7: Installing dependencies");
        self.install_dependencies();
        info!("4/7: Building native modules and installing piper_train");
        self.build_piper()?;
        info!("5/7: Writing metadata.csv");
        self.write_manifest()?;
        info!("6/7: Preprocessing");
        self.preprocess()?;
        info!("7/7: Training ({} epochs per checkpoint)", self.config.checkpoint_epochs);
        self.train();
        info!("Exporting to ONNX");
        self.export(None)
    }

    /// Cleans the work directory, refusing if any of the run's inputs live inside it.
    pub fn prepare_workspace(&mut self) -> anyhow::Result<()> {
        let work_dir = &self.config.work_dir;
        workspace::ensure_outside(work_dir, &self.config.input_dir, "input_dir")?;
        if let Some(metadata) = &self.config.metadata {
            workspace::ensure_outside(work_dir, metadata, "metadata")?;
        }
        workspace::prepare(work_dir, &self.config.wav_dir())
    }

    pub fn copy_dataset(&mut self) -> anyhow::Result<usize> {
        workspace::copy_wavs(&self.config.input_dir, &self.config.wav_dir())
    }

    /// System packages, Python packages and the Piper repo. None of these are checked, if
    /// something is really missing a later step fails with a clearer error.
    pub fn install_dependencies(&mut self) {
        if self.config.skip_dependencies {
            info!("Skipping dependency installation");
            return;
        }
        let python = &self.config.python;
        self.runner.run_lenient(
            &Invocation::new("apt-get").args(["install", "-y", "-q", "libespeak-ng-dev"]),
        );
        self.runner.run_lenient(
            &Invocation::new(python)
                .args(["-m", "pip", "install", "-q"])
                .args(PIP_PACKAGES),
        );
        self.runner.run_lenient(
            &Invocation::new("git")
                .args(["clone", "-q"])
                .arg(&self.config.piper_repo)
                .arg(self.config.piper_dir().display()),
        );
    }

    /// Builds monotonic_align, installs the bridge and then piper_train itself.
    pub fn build_piper(&mut self) -> anyhow::Result<()> {
        let piper_src = self.config.piper_src();

        // Has to be built from the package root or the extension lands in the wrong place
        self.runner.run_lenient(
            &Invocation::new(&self.config.python)
                .args([
                    "piper_train/vits/monotonic_align/setup.py",
                    "build_ext",
                    "--inplace",
                ])
                .current_dir(&piper_src),
        );
        workspace::relocate_monotonic_align(&piper_src)?;

        self.install_bridge()?;

        patches::apply_all(patches::INSTALL_PATCHES, &piper_src)?;
        self.runner.run_lenient(
            &Invocation::new(&self.config.python)
                .args(["-m", "pip", "install", "-q", "-e", ".", "--no-deps"])
                .current_dir(&piper_src),
        );
        Ok(())
    }

    pub fn install_bridge(&mut self) -> anyhow::Result<PathBuf> {
        let site_packages = match &self.config.site_packages {
            Some(p) => p.clone(),
            None => bridge::site_packages(&self.config.python)?,
        };
        bridge::install(&site_packages)
    }

    /// Writes the manifest into the dataset and checks it against the copied recordings.
    pub fn write_manifest(&mut self) -> anyhow::Result<Manifest> {
        let source = match &self.config.metadata {
            Some(p) => p.clone(),
            None => workspace::find_files(&self.config.input_dir, "csv")
                .into_iter()
                .find(|p| p.file_name().map(|n| n == "metadata.csv").unwrap_or(false))
                .with_context(|| {
                    format!(
                        "No metadata given and no metadata.csv under {}. Set `metadata` in the config",
                        self.config.input_dir.display()
                    )
                })?,
        };
        let manifest = Manifest::load(&source)?;
        if manifest.is_empty() {
            anyhow::bail!("Manifest {} has no utterances", source.display());
        }
        manifest.write(self.config.manifest_path())?;

        let report = manifest.validate(&self.config.wav_dir(), Some(self.config.sample_rate));
        if report.missing_audio.is_empty() {
            info!("{} utterances verified", manifest.len());
        } else {
            warn!("Missing recordings: {:?}", report.missing_audio);
        }
        Ok(manifest)
    }

    pub fn preprocess(&mut self) -> anyhow::Result<()> {
        let config = self.config;
        let invocation = Invocation::new(&config.python)
            .args(["-m", "piper_train.preprocess"])
            .flag("--input-dir", config.dataset_dir().display())
            .flag("--output-dir", config.output_dir().display())
            .flag("--language", &config.language)
            .flag("--dataset-format", config.dataset_format)
            .flag("--sample-rate", config.sample_rate)
            .flag("--max-workers", config.max_workers)
            .current_dir(&config.work_dir);
        self.runner.run_lenient(&invocation);

        if !config.voice_config().is_file() {
            anyhow::bail!(
                "Preprocessing failed, {} wasn't written. Check the wav files are in {} and match the names in metadata.csv",
                config.voice_config().display(),
                config.wav_dir().display()
            );
        }
        info!("Preprocessing complete");
        Ok(())
    }

    /// Training failures show up as a missing checkpoint at export time
    pub fn train(&mut self) {
        let config = self.config;
        let invocation = Invocation::new(&config.python)
            .args(["-m", "piper_train"])
            .flag("--dataset-dir", config.output_dir().display())
            .flag("--checkpoint-epochs", config.checkpoint_epochs)
            .flag("--quality", config.quality)
            .flag("--batch-size", config.batch_size)
            .flag("--accelerator", &config.accelerator)
            .flag("--devices", config.devices)
            .current_dir(&config.work_dir);
        self.runner.run_lenient(&invocation);
    }

    pub fn export(&mut self, checkpoint: Option<&Path>) -> anyhow::Result<ExportedModel> {
        export::export(self.config, &mut self.runner, checkpoint)
    }
}

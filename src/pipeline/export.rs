//! ONNX export of a trained checkpoint. This runs at the end of a training run and is also usable
//! on its own to retry an export that failed or re-export an older checkpoint.
use super::config::TrainingConfig;
use super::patches::{self, EXPORT_PATCHES};
use super::runner::{CommandRunner, Invocation};
use super::workspace;
use anyhow::Context;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Runs piper_train's exporter. torch 2.6 only unpickles allow-listed types by default and
/// Piper's checkpoints contain paths.
pub const EXPORT_DRIVER: &str = "import torch, pathlib
torch.serialization.add_safe_globals([pathlib.PosixPath])
from piper_train.export_onnx import main
main()
";

#[derive(Clone, Debug, PartialEq)]
pub struct ExportedModel {
    pub onnx: PathBuf,
    /// The voice config copied next to the model, if one was found
    pub config: Option<PathBuf>,
    pub size_bytes: u64,
}

impl ExportedModel {
    pub fn size_mib(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// The preprocessing config.json for the voice. Prefers the one for this project, otherwise the
/// first one under the output directory.
pub fn find_voice_config(config: &TrainingConfig) -> Option<PathBuf> {
    let own = config.voice_config();
    if own.is_file() {
        return Some(own);
    }
    workspace::find_files(&config.outputs_dir(), "json")
        .into_iter()
        .find(|p| p.file_name().map(|n| n == "config.json").unwrap_or(false))
}

fn remove_stale(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed previous export {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
    }
}

/// Exports `checkpoint`, or the newest checkpoint in the work directory if not given.
pub fn export(
    config: &TrainingConfig,
    runner: &mut dyn CommandRunner,
    checkpoint: Option<&Path>,
) -> anyhow::Result<ExportedModel> {
    let checkpoint = match checkpoint {
        Some(c) if c.is_file() => c.to_path_buf(),
        Some(c) => anyhow::bail!("Checkpoint {} doesn't exist", c.display()),
        None => workspace::newest_checkpoint(&config.work_dir)?,
    };
    info!("Exporting checkpoint: {}", checkpoint.display());

    patches::apply_all(EXPORT_PATCHES, &config.piper_src())?;

    let driver = config.export_script();
    fs::write(&driver, EXPORT_DRIVER)
        .with_context(|| format!("failed to write {}", driver.display()))?;

    let onnx = config.onnx_path();
    // Leftovers from an earlier export would pass for this one's output
    remove_stale(&onnx)?;
    remove_stale(&config.onnx_config_path())?;

    let invocation = Invocation::new(&config.python)
        .arg(driver.display())
        .arg(checkpoint.display())
        .arg(onnx.display())
        .current_dir(&config.work_dir);
    runner.run_lenient(&invocation);

    let voice_config = match find_voice_config(config) {
        Some(src) => {
            let dst = config.onnx_config_path();
            fs::copy(&src, &dst)
                .with_context(|| format!("failed to copy {}", src.display()))?;
            Some(dst)
        }
        None => {
            warn!("No config.json found under {}", config.outputs_dir().display());
            None
        }
    };

    if !onnx.is_file() {
        anyhow::bail!(
            "Export failed, {} wasn't written. Check the errors above and retry with `trainer export`",
            onnx.display()
        );
    }
    let size_bytes = fs::metadata(&onnx)?.len();
    let model = ExportedModel {
        onnx,
        config: voice_config,
        size_bytes,
    };
    info!(
        "Model exported: {} ({:.1} MB)",
        model.onnx.display(),
        model.size_mib()
    );
    if let Some(c) = &model.config {
        info!("Config: {}", c.display());
    }
    Ok(model)
}

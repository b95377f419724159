//! Settings for a training run. Everything has a default that works in a Kaggle notebook so a
//! config file only needs to contain what differs.
use anyhow::Context;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Layout of the dataset handed to piper_train's preprocessing
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    #[default]
    Ljspeech,
    Mycroft,
}

impl fmt::Display for DatasetFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ljspeech => write!(f, "ljspeech"),
            Self::Mycroft => write!(f, "mycroft"),
        }
    }
}

/// Model size. Medium is a good trade off between quality and how fast the voice runs.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Name for the run, used for the preprocessing output directory
    pub project_name: String,
    /// espeak-ng voice, i.e. es, en-us, pt-br
    pub language: String,
    pub dataset_format: DatasetFormat,
    /// Sample rate of the recordings, 22050 is what Piper voices expect
    pub sample_rate: u32,
    /// Save a checkpoint every N epochs
    pub checkpoint_epochs: u32,
    pub quality: Quality,
    /// Drop to 8 if the GPU runs out of memory
    pub batch_size: u32,
    /// Preprocessing workers, keep at 1 on Python 3.12+
    pub max_workers: u32,
    pub accelerator: String,
    pub devices: u32,
    /// Exported model is written as `<name>.onnx` and `<name>.onnx.json`
    pub output_model_name: String,
    /// Manifest to train on. If unset the first metadata.csv under `input_dir` is used
    pub metadata: Option<PathBuf>,
    /// Writable directory everything is built in. This gets wiped at the start of a run!
    pub work_dir: PathBuf,
    /// Where the recordings are, searched recursively for wav files
    pub input_dir: PathBuf,
    pub piper_repo: String,
    pub python: String,
    /// Overrides asking the interpreter where site-packages is
    pub site_packages: Option<PathBuf>,
    /// Don't apt-get/pip install/clone, for when the environment is already set up
    pub skip_dependencies: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            project_name: "voice".to_string(),
            language: "es".to_string(),
            dataset_format: DatasetFormat::default(),
            sample_rate: 22050,
            checkpoint_epochs: 500,
            quality: Quality::default(),
            batch_size: 16,
            max_workers: 1,
            accelerator: "cuda".to_string(),
            devices: 1,
            output_model_name: "aris_voice".to_string(),
            metadata: None,
            work_dir: PathBuf::from("/kaggle/working"),
            input_dir: PathBuf::from("/kaggle/input"),
            piper_repo: "https://github.com/rhasspy/piper.git".to_string(),
            python: "python3".to_string(),
            site_packages: None,
            skip_dependencies: false,
        }
    }
}

impl TrainingConfig {
    /// Loads a JSON config, missing fields take their default values.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("couldn't read config {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.work_dir.join("dataset")
    }

    pub fn wav_dir(&self) -> PathBuf {
        self.dataset_dir().join("wavs")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dataset_dir().join("metadata.csv")
    }

    /// Root of all preprocessing output
    pub fn outputs_dir(&self) -> PathBuf {
        self.work_dir.join("output")
    }

    /// Preprocessing output for this project, also where training reads from
    pub fn output_dir(&self) -> PathBuf {
        self.outputs_dir().join(&self.project_name)
    }

    pub fn voice_config(&self) -> PathBuf {
        self.output_dir().join("config.json")
    }

    pub fn piper_dir(&self) -> PathBuf {
        self.work_dir.join("piper")
    }

    /// The python package root of the cloned repo, patches are relative to this
    pub fn piper_src(&self) -> PathBuf {
        self.piper_dir().join("src").join("python")
    }

    pub fn export_script(&self) -> PathBuf {
        self.work_dir.join("do_export.py")
    }

    pub fn onnx_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}.onnx", self.output_model_name))
    }

    pub fn onnx_config_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}.onnx.json", self.output_model_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn partial_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"project_name": "patricia", "quality": "high", "dataset_format": "mycroft", "work_dir": "/tmp/run"}"#,
        )
        .unwrap();

        let config = TrainingConfig::load(&path).unwrap();
        assert_eq!(config.project_name, "patricia");
        assert_eq!(config.quality, Quality::High);
        assert_eq!(config.dataset_format, DatasetFormat::Mycroft);
        assert_eq!(config.sample_rate, 22050);
        assert_eq!(config.batch_size, 16);
        assert_eq!(config.output_dir(), PathBuf::from("/tmp/run/output/patricia"));
        assert_eq!(config.piper_src(), PathBuf::from("/tmp/run/piper/src/python"));
        assert_eq!(config.onnx_path(), PathBuf::from("/tmp/run/aris_voice.onnx"));
    }

    #[test]
    fn bad_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"quality": "ultra"}"#).unwrap();
        assert!(TrainingConfig::load(&path).is_err());
        assert!(TrainingConfig::load(dir.path().join("nope.json")).is_err());
    }
}

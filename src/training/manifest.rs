//! The metadata file piper_train's preprocessing reads. Both the ljspeech and mycroft layouts use
//! the same `<audio file>|<transcript>` lines, one utterance per line, with the audio in a `wavs/`
//! directory beside it.
use anyhow::Context;
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Utterance {
    /// The audio file, with or without the `.wav` extension
    pub id: String,
    pub text: String,
}

impl Utterance {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }

    /// Where the audio for this utterance lives. Like piper_train we accept the id as the file
    /// name and then try adding `.wav`.
    pub fn audio_path(&self, wav_dir: &Path) -> Option<PathBuf> {
        let exact = wav_dir.join(&self.id);
        if exact.is_file() {
            return Some(exact);
        }
        let with_ext = wav_dir.join(format!("{}.wav", self.id));
        with_ext.is_file().then_some(with_ext)
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Manifest {
    pub utterances: Vec<Utterance>,
}

impl Manifest {
    pub fn load(p: impl AsRef<Path>) -> anyhow::Result<Self> {
        let p = p.as_ref();
        let f = File::open(p).with_context(|| format!("couldn't open manifest {}", p.display()))?;
        Self::from_reader(io::BufReader::new(f))
    }

    pub fn from_reader(reader: impl io::Read) -> anyhow::Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .delimiter(b'|')
            .quoting(false) // Transcripts are free text and quotes don't have to be balanced
            .flexible(true)
            .from_reader(reader);

        let mut utterances = vec![];

        for result in rdr.records() {
            let record = result?;
            match (record.get(0), record.len()) {
                (Some(id), n) if n >= 2 => {
                    // A pipe in the transcript splits it into more fields, stitch them back
                    let text = record.iter().skip(1).collect::<Vec<_>>().join("|");
                    utterances.push(Utterance::new(id.trim(), text.trim()));
                }
                _ => error!("Incomplete record: {:?}", record),
            }
        }
        Ok(Self { utterances })
    }

    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    /// Writes the manifest out, there's no trailing newline after the last utterance.
    pub fn write(&self, p: impl AsRef<Path>) -> anyhow::Result<()> {
        let p = p.as_ref();
        fs::write(p, self.to_string())
            .with_context(|| format!("failed to write manifest {}", p.display()))
    }

    /// Checks the manifest against the audio in `wav_dir`. If `sample_rate` is given every wav
    /// is opened to check it's been recorded at that rate.
    pub fn validate(&self, wav_dir: &Path, sample_rate: Option<u32>) -> ValidationReport {
        info!("Validating manifest");
        let mut report = ValidationReport::default();
        let mut ids = HashSet::new();
        for utterance in &self.utterances {
            if utterance.text.is_empty() {
                error!("Transcript for {} is empty", utterance.id);
                report.empty_transcripts.push(utterance.id.clone());
            }
            if !ids.insert(utterance.id.as_str()) {
                error!("Duplicate ID: {}", utterance.id);
                report.duplicate_ids.push(utterance.id.clone());
            }
            let path = match utterance.audio_path(wav_dir) {
                Some(p) => p,
                None => {
                    warn!("No audio for {}", utterance.id);
                    report.missing_audio.push(utterance.id.clone());
                    continue;
                }
            };
            if let Some(expected) = sample_rate {
                match hound::WavReader::open(&path) {
                    Ok(reader) if reader.spec().sample_rate != expected => {
                        warn!(
                            "{} is {}Hz, expected {}Hz",
                            utterance.id,
                            reader.spec().sample_rate,
                            expected
                        );
                        report
                            .sample_rate_mismatches
                            .push((utterance.id.clone(), reader.spec().sample_rate));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Couldn't read {}: {}", path.display(), e);
                        report.unreadable_audio.push(utterance.id.clone());
                    }
                }
            }
        }
        info!("Validation complete");
        report
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, utterance) in self.utterances.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}|{}", utterance.id, utterance.text)?;
        }
        Ok(())
    }
}

/// Problems found validating a manifest, identified by utterance id.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ValidationReport {
    pub empty_transcripts: Vec<String>,
    pub duplicate_ids: Vec<String>,
    pub missing_audio: Vec<String>,
    pub unreadable_audio: Vec<String>,
    /// Utterance id and the sample rate it was actually recorded at
    pub sample_rate_mismatches: Vec<(String, u32)>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.empty_transcripts.is_empty()
            && self.duplicate_ids.is_empty()
            && self.missing_audio.is_empty()
            && self.unreadable_audio.is_empty()
            && self.sample_rate_mismatches.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::TempDir;

    fn write_wav(path: &Path, sample_rate: u32) {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn parse_manifest() {
        let manifest = Manifest::from_reader(
            "a_000.wav|en la necesidad del día a día.\na_001| Ya, \"pero no\n\nbroken\na_002|uno|dos"
                .as_bytes(),
        )
        .unwrap();

        assert_eq!(
            manifest.utterances,
            vec![
                Utterance::new("a_000.wav", "en la necesidad del día a día."),
                Utterance::new("a_001", "Ya, \"pero no"),
                Utterance::new("a_002", "uno|dos"),
            ]
        );
    }

    #[test]
    fn write_has_no_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.csv");
        let manifest = Manifest {
            utterances: vec![Utterance::new("a.wav", "hola"), Utterance::new("b.wav", "adiós")],
        };
        manifest.write(&path).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "a.wav|hola\nb.wav|adiós");
        assert_eq!(Manifest::load(&path).unwrap(), manifest);
    }

    #[test]
    fn validation() {
        let dir = TempDir::new().unwrap();
        write_wav(&dir.path().join("a.wav"), 22050);
        write_wav(&dir.path().join("b.wav"), 16000);
        fs::write(dir.path().join("c.wav"), b"not a wav").unwrap();

        let manifest = Manifest {
            utterances: vec![
                Utterance::new("a.wav", "hola"),
                Utterance::new("b", "adiós"),
                Utterance::new("c.wav", ""),
                Utterance::new("d.wav", "nada"),
                Utterance::new("a.wav", "otra vez"),
            ],
        };

        let report = manifest.validate(dir.path(), None);
        assert_eq!(report.missing_audio, vec!["d.wav".to_string()]);
        assert_eq!(report.duplicate_ids, vec!["a.wav".to_string()]);
        assert_eq!(report.empty_transcripts, vec!["c.wav".to_string()]);
        assert!(report.sample_rate_mismatches.is_empty());
        assert!(!report.is_ok());

        let report = manifest.validate(dir.path(), Some(22050));
        assert_eq!(report.sample_rate_mismatches, vec![("b".to_string(), 16000)]);
        assert_eq!(report.unreadable_audio, vec!["c.wav".to_string()]);
    }

    #[test]
    fn clean_manifest_is_ok() {
        let dir = TempDir::new().unwrap();
        write_wav(&dir.path().join("a.wav"), 22050);
        let manifest = Manifest {
            utterances: vec![Utterance::new("a", "hola")],
        };
        assert!(manifest.validate(dir.path(), Some(22050)).is_ok());
    }
}

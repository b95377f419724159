//! Turning text into phonemes. Piper's preprocessing expects a list of sentences where each
//! sentence is a list of phonemes, one `char` per phoneme.
//!
//! Phonemization here is allowed to be lossy but never allowed to fail. If espeak-ng can't be run
//! we fall back to the characters of the input so a single bad utterance doesn't take down a whole
//! preprocessing run.
use anyhow::Context;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How long espeak-ng gets per call before we give up on it
pub const ESPEAK_TIMEOUT: Duration = Duration::from_secs(10);

/// Default phonemizer program
pub const ESPEAK_PROGRAM: &str = "espeak-ng";

/// A sentence as a sequence of phonemes
pub type Sentence = Vec<char>;

/// Something that can turn text into phonemes.
pub trait Phonemizer {
    fn name(&self) -> &str;

    /// Implementations must not fail, a degraded result is always preferred over an error.
    fn phonemize(&self, text: &str) -> Vec<Sentence>;
}

/// Which phonemizer a voice uses, matches the `phoneme_type` values Piper writes in its voice
/// configs.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhonemeType {
    /// IPA phonemes from espeak-ng
    #[default]
    Espeak,
    /// Raw codepoints, for languages espeak-ng doesn't support
    Text,
}

impl fmt::Display for PhonemeType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Espeak => write!(f, "espeak"),
            Self::Text => write!(f, "text"),
        }
    }
}

/// Creates the phonemizer for a phoneme type. The voice is ignored for codepoints.
pub fn phonemizer_for(phoneme_type: PhonemeType, voice: &str) -> Box<dyn Phonemizer> {
    match phoneme_type {
        PhonemeType::Espeak => Box::new(EspeakPhonemizer::new(voice)),
        PhonemeType::Text => Box::new(CodepointPhonemizer),
    }
}

/// Shells out to espeak-ng for IPA output.
#[derive(Clone, Debug)]
pub struct EspeakPhonemizer {
    program: String,
    voice: String,
    timeout: Duration,
}

impl EspeakPhonemizer {
    pub fn new(voice: impl Into<String>) -> Self {
        Self {
            program: ESPEAK_PROGRAM.to_string(),
            voice: voice.into(),
            timeout: ESPEAK_TIMEOUT,
        }
    }

    /// Use a different program, i.e. `espeak` on systems without espeak-ng
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn try_phonemize(&self, text: &str) -> anyhow::Result<Vec<Sentence>> {
        let mut command = Command::new(&self.program);
        command.args(["--ipa=3", "-v", &self.voice, "-q", text]);

        let (status, stdout) = output_with_timeout(command, self.timeout)
            .with_context(|| format!("failed to run phonemizer '{}'", self.program))?;
        if !status.success() {
            anyhow::bail!("phonemizer '{}' exited with {}", self.program, status);
        }
        let stdout = String::from_utf8(stdout).context("phonemizer emitted non-utf8 output")?;

        Ok(split_sentences(&stdout))
    }
}

/// espeak-ng prints one line of phonemes per clause
fn split_sentences(output: &str) -> Vec<Sentence> {
    output
        .trim()
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| line.chars().collect())
        .collect()
}

impl Phonemizer for EspeakPhonemizer {
    fn name(&self) -> &str {
        &self.program
    }

    fn phonemize(&self, text: &str) -> Vec<Sentence> {
        match self.try_phonemize(text) {
            Ok(sentences) => sentences,
            Err(e) => {
                warn!(
                    "Falling back to characters for '{}' (voice {}): {:#}",
                    text, self.voice, e
                );
                phonemize_codepoints(text)
            }
        }
    }
}

/// Treats every character as a phoneme.
#[derive(Clone, Copy, Debug, Default)]
pub struct CodepointPhonemizer;

impl Phonemizer for CodepointPhonemizer {
    fn name(&self) -> &str {
        "codepoints"
    }

    fn phonemize(&self, text: &str) -> Vec<Sentence> {
        phonemize_codepoints(text)
    }
}

/// Phonemizes with espeak-ng for the given voice, degrading to the characters of `text` if
/// espeak-ng is missing, times out or fails.
pub fn phonemize_espeak(text: &str, voice: &str) -> Vec<Sentence> {
    EspeakPhonemizer::new(voice).phonemize(text)
}

pub fn phonemize_codepoints(text: &str) -> Vec<Sentence> {
    vec![text.chars().collect()]
}

/// Arabic diacritization. Only exists because Piper calls it, text is returned untouched.
pub fn tashkeel_run(text: &str) -> String {
    text.to_string()
}

/// Runs a command capturing stdout, killing it if it's still running after `timeout`.
///
/// Stdout is drained on another thread, otherwise a chatty child can fill the pipe and never exit.
fn output_with_timeout(
    mut command: Command,
    timeout: Duration,
) -> anyhow::Result<(ExitStatus, Vec<u8>)> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let mut stdout = child.stdout.take().context("child stdout not captured")?;
    let reader = thread::spawn(move || {
        let mut buf = vec![];
        stdout.read_to_end(&mut buf).map(|_| buf)
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            debug!("Killing child after {:?}", timeout);
            // It may have exited between try_wait and here
            let _ = child.kill();
            let _ = child.wait();
            anyhow::bail!("timed out after {:?}", timeout);
        }
        thread::sleep(Duration::from_millis(5));
    };

    let stdout = match reader.join() {
        Ok(res) => res?,
        Err(_) => anyhow::bail!("stdout reader panicked"),
    };
    Ok((status, stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn codepoints() {
        assert_eq!(phonemize_codepoints("hola"), vec![chars("hola")]);
        assert_eq!(phonemize_codepoints(""), vec![Vec::<char>::new()]);
        assert_eq!(CodepointPhonemizer.phonemize("ñu"), vec![vec!['ñ', 'u']]);
    }

    #[test]
    fn tashkeel_is_identity() {
        assert_eq!(tashkeel_run("مرحبا"), "مرحبا");
    }

    #[test]
    fn missing_program_falls_back() {
        let phonemizer =
            EspeakPhonemizer::new("es").with_program("/definitely/not/a/real/espeak-ng");
        assert_eq!(phonemizer.phonemize("hola"), vec![chars("hola")]);
    }

    #[test]
    #[cfg(unix)]
    fn failing_program_falls_back() {
        // `false` ignores its arguments and exits 1
        let phonemizer = EspeakPhonemizer::new("es").with_program("false");
        assert_eq!(phonemizer.phonemize("hola mundo"), vec![chars("hola mundo")]);
    }

    #[test]
    #[cfg(unix)]
    fn arguments_and_output_splitting() {
        // echo prints back exactly what espeak-ng would be given
        let phonemizer = EspeakPhonemizer::new("es").with_program("echo");
        assert_eq!(
            phonemizer.phonemize("hola"),
            vec![chars("--ipa=3 -v es -q hola")]
        );
    }

    #[test]
    fn empty_lines_are_dropped() {
        assert_eq!(
            split_sentences("ˈola\n\nmˈundo\n"),
            vec![chars("ˈola"), chars("mˈundo")]
        );
        assert!(split_sentences("\n").is_empty());
    }

    #[test]
    fn crlf_output() {
        assert_eq!(
            split_sentences("ˈola\r\nmˈundo\r\n"),
            vec![chars("ˈola"), chars("mˈundo")]
        );
    }

    #[test]
    #[cfg(unix)]
    fn slow_program_times_out() {
        let mut command = Command::new("sleep");
        command.arg("5");
        let start = Instant::now();
        assert!(output_with_timeout(command, Duration::from_millis(100)).is_err());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    #[cfg(unix)]
    fn slow_phonemizer_falls_back() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let program = dir.path().join("espeak-ng");
        std::fs::write(&program, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();

        let phonemizer = EspeakPhonemizer::new("es")
            .with_program(program.display().to_string())
            .with_timeout(Duration::from_millis(100));
        let start = Instant::now();
        assert_eq!(phonemizer.phonemize("hola"), vec![chars("hola")]);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn selects_phonemizer() {
        assert_eq!(phonemizer_for(PhonemeType::Espeak, "es").name(), "espeak-ng");
        assert_eq!(phonemizer_for(PhonemeType::Text, "es").name(), "codepoints");
    }
}

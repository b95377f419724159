//! piper_train imports `piper_phonemize` by name and that package has been archived, pip can't
//! install it anymore. We generate a pure Python stand-in and drop it into the interpreter's
//! site-packages. It has to be site-packages, the preprocessing and training steps run as new
//! `python3 -m` processes so nothing set up in-process is visible to them.
//!
//! The symbol table in the generated module comes straight from [`PhonemeTable`] so IDs from the
//! Python side and the Rust side always agree.
use crate::phonemes::{PhonemeTable, MAX_PHONEMES};
use crate::phonemize::{ESPEAK_PROGRAM, ESPEAK_TIMEOUT};
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// The module name piper_train imports
pub const MODULE_NAME: &str = "piper_phonemize";

const MODULE_TEMPLATE: &str = r#""""Stand-in for piper-phonemize. Generated by piper-bridge, do not edit."""
import subprocess

_PHONEMES = [
@SYMBOLS@
]
_ID_MAP = {p: i for i, p in enumerate(_PHONEMES)}


def phonemize_espeak(text, voice, **kwargs):
    try:
        result = subprocess.run(
            ["@PROGRAM@", "--ipa=3", "-v", voice, "-q", text],
            capture_output=True, text=True, timeout=@TIMEOUT@, check=True,
        )
    except Exception:
        return [list(text)]
    return [list(line) for line in result.stdout.strip().split("\n") if line]


def phonemize_codepoints(text, **kwargs):
    return [list(text)]


def _to_ids(sentences, missing):
    ids = []
    for sentence in sentences:
        for symbol in sentence:
            if symbol in _ID_MAP:
                ids.append(_ID_MAP[symbol])
            elif missing is not None:
                missing[symbol] = missing.get(symbol, 0) + 1
    return ids


# pad is accepted for compatibility, unknown symbols are dropped not padded
def phoneme_ids_espeak(phonemes, missing_phonemes=None, pad="_"):
    return _to_ids(phonemes, missing_phonemes)


def phoneme_ids_codepoints(codepoints, missing_codepoints=None, pad="_"):
    return _to_ids(codepoints, missing_codepoints)


def get_espeak_map():
    return dict(_ID_MAP)


def get_codepoints_map():
    return get_espeak_map()


def get_max_phonemes():
    return @MAX_PHONEMES@


def tashkeel_run(text):
    return text
"#;

/// Renders the Python source of the bridge module.
pub fn render_python_module() -> String {
    let symbols = PhonemeTable::espeak()
        .symbols()
        .chunks(12)
        .map(|row| {
            let row = row
                .iter()
                .map(|c| python_literal(*c))
                .collect::<Vec<_>>()
                .join(", ");
            format!("    {},", row)
        })
        .collect::<Vec<_>>()
        .join("\n");

    MODULE_TEMPLATE
        .replace("@SYMBOLS@", &symbols)
        .replace("@PROGRAM@", ESPEAK_PROGRAM)
        .replace("@TIMEOUT@", &ESPEAK_TIMEOUT.as_secs().to_string())
        .replace("@MAX_PHONEMES@", &MAX_PHONEMES.to_string())
}

/// Single quoted Python string literal for a symbol. Anything outside printable ASCII is escaped
/// so the generated file survives editors and terminals mangling combining characters.
fn python_literal(c: char) -> String {
    match c {
        '\'' => r"'\''".to_string(),
        '\\' => r"'\\'".to_string(),
        ' '..='~' => format!("'{}'", c),
        c if (c as u32) <= 0xffff => format!("'\\u{:04x}'", c as u32),
        c => format!("'\\U{:08x}'", c as u32),
    }
}

/// Asks the interpreter where its global site-packages lives.
pub fn site_packages(python: &str) -> anyhow::Result<PathBuf> {
    let output = Command::new(python)
        .args(["-c", "import site; print(site.getsitepackages()[0])"])
        .output()
        .with_context(|| format!("failed to run '{}' to locate site-packages", python))?;
    if !output.status.success() {
        anyhow::bail!(
            "'{}' couldn't report its site-packages: {}",
            python,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    let path = String::from_utf8(output.stdout).context("site-packages path isn't utf8")?;
    let path = path.trim();
    if path.is_empty() {
        anyhow::bail!("'{}' reported an empty site-packages path", python);
    }
    debug!("site-packages for {}: {}", python, path);
    Ok(PathBuf::from(path))
}

/// Writes the bridge module into `site_packages`, returning the path of the written module.
pub fn install(site_packages: &Path) -> anyhow::Result<PathBuf> {
    if !site_packages.is_dir() {
        anyhow::bail!(
            "site-packages directory {} doesn't exist, check the python interpreter or pass --site-packages",
            site_packages.display()
        );
    }
    let target = site_packages.join(format!("{}.py", MODULE_NAME));
    fs::write(&target, render_python_module())
        .with_context(|| format!("failed to write bridge to {}", target.display()))?;
    info!("Bridge installed at {}", target.display());
    Ok(target)
}

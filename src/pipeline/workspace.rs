//! Filesystem chores around a run. Kaggle mounts datasets read-only so everything gets copied into
//! the work directory first.
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Removes everything inside `work_dir` (but not the directory itself) and creates `wav_dir`.
pub fn prepare(work_dir: &Path, wav_dir: &Path) -> anyhow::Result<()> {
    if work_dir.parent().is_none() {
        anyhow::bail!("refusing to clean {}", work_dir.display());
    }
    if work_dir.is_dir() {
        for entry in fs::read_dir(work_dir)? {
            let path = entry?.path();
            debug!("Removing {}", path.display());
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.with_context(|| format!("failed to remove {}", path.display()))?;
        }
    }
    fs::create_dir_all(wav_dir)
        .with_context(|| format!("failed to create {}", wav_dir.display()))?;
    Ok(())
}

/// Errors if `path` is `work_dir` or anything under it, since cleaning the work directory would
/// delete it.
pub fn ensure_outside(work_dir: &Path, path: &Path, name: &str) -> anyhow::Result<()> {
    if path.starts_with(work_dir) {
        anyhow::bail!(
            "{} ({}) is inside the work directory {} which is wiped at the start of a run. Move it or pick another work_dir",
            name,
            path.display(),
            work_dir.display()
        );
    }
    Ok(())
}

/// All files under `root` with the given extension, sorted so runs are repeatable.
pub fn find_files(root: &Path, extension: &str) -> Vec<PathBuf> {
    let mut files = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| match e {
            Ok(e) => Some(e),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().map(|x| x == extension).unwrap_or(false))
        .collect::<Vec<_>>();
    files.sort();
    files
}

/// Copies every wav under `input_dir` into `wav_dir`. Subdirectories are flattened, if two
/// recordings share a name the last one wins.
pub fn copy_wavs(input_dir: &Path, wav_dir: &Path) -> anyhow::Result<usize> {
    let wavs = find_files(input_dir, "wav");
    if wavs.is_empty() {
        anyhow::bail!(
            "No .wav files found under {}. Make sure the dataset is attached (on Kaggle use 'Add Data' in the side panel)",
            input_dir.display()
        );
    }
    info!("Copying {} recordings to {}", wavs.len(), wav_dir.display());
    for wav in &wavs {
        let name = wav.file_name().context("wav without a file name")?;
        fs::copy(wav, wav_dir.join(name))
            .with_context(|| format!("failed to copy {}", wav.display()))?;
    }
    Ok(wavs.len())
}

/// The most recently written checkpoint under `root`.
pub fn newest_checkpoint(root: &Path) -> anyhow::Result<PathBuf> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for ckpt in find_files(root, "ckpt") {
        let modified = fs::metadata(&ckpt)?.modified()?;
        if newest.as_ref().map(|(t, _)| modified >= *t).unwrap_or(true) {
            newest = Some((modified, ckpt));
        }
    }
    match newest {
        Some((_, ckpt)) => Ok(ckpt),
        None => anyhow::bail!(
            "No checkpoint found under {}, training may have failed",
            root.display()
        ),
    }
}

/// The extension build puts `core*.so` next to setup.py but the package imports
/// `.monotonic_align.core`, so it needs copying into a nested package. Returns how many shared
/// objects were found.
pub fn relocate_monotonic_align(piper_src: &Path) -> anyhow::Result<usize> {
    let ma_dir = piper_src
        .join("piper_train")
        .join("vits")
        .join("monotonic_align");
    let nested = ma_dir.join("monotonic_align");

    let mut objects = vec![];
    if ma_dir.is_dir() {
        for entry in fs::read_dir(&ma_dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map(|x| x == "so").unwrap_or(false) {
                objects.push(path);
            }
        }
    }
    objects.sort();

    if objects.is_empty() {
        warn!("No .so files in {}, the build may have failed", ma_dir.display());
        return Ok(0);
    }

    fs::create_dir_all(&nested)?;
    for object in &objects {
        fs::copy(object, nested.join("core.so"))
            .with_context(|| format!("failed to copy {}", object.display()))?;
    }
    fs::write(nested.join("__init__.py"), "")?;
    info!("monotonic_align built: {:?}", objects);
    Ok(objects.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn prepare_cleans() {
        let dir = TempDir::new().unwrap();
        let work = dir.path().join("working");
        fs::create_dir_all(work.join("old/nested")).unwrap();
        fs::write(work.join("stale.txt"), "x").unwrap();

        let wavs = work.join("dataset/wavs");
        prepare(&work, &wavs).unwrap();

        assert!(wavs.is_dir());
        assert!(!work.join("old").exists());
        assert!(!work.join("stale.txt").exists());

        assert!(prepare(Path::new("/"), &wavs).is_err());
    }

    #[test]
    fn inside_work_dir() {
        let work = Path::new("/kaggle/working");
        assert!(ensure_outside(work, Path::new("/kaggle/working/metadata.csv"), "metadata").is_err());
        assert!(ensure_outside(work, work, "input_dir").is_err());
        assert!(ensure_outside(work, Path::new("/kaggle/input"), "input_dir").is_ok());
        assert!(ensure_outside(work, Path::new("/kaggle/working_copy"), "input_dir").is_ok());
    }

    #[test]
    fn copies_nested_wavs() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input");
        fs::create_dir_all(input.join("speaker/a")).unwrap();
        fs::write(input.join("speaker/a/one.wav"), "1").unwrap();
        fs::write(input.join("two.wav"), "2").unwrap();
        fs::write(input.join("notes.txt"), "no").unwrap();
        let out = dir.path().join("wavs");
        fs::create_dir_all(&out).unwrap();

        assert_eq!(copy_wavs(&input, &out).unwrap(), 2);
        assert_eq!(fs::read_to_string(out.join("one.wav")).unwrap(), "1");
        assert_eq!(fs::read_to_string(out.join("two.wav")).unwrap(), "2");
        assert!(!out.join("notes.txt").exists());

        let empty = dir.path().join("empty");
        fs::create_dir_all(&empty).unwrap();
        let err = copy_wavs(&empty, &out).unwrap_err();
        assert!(err.to_string().contains("No .wav files"));
    }

    #[test]
    fn picks_newest_checkpoint() {
        let dir = TempDir::new().unwrap();
        assert!(newest_checkpoint(dir.path()).is_err());

        let logs = dir.path().join("lightning_logs/version_0/checkpoints");
        fs::create_dir_all(&logs).unwrap();
        fs::write(logs.join("epoch=499.ckpt"), "old").unwrap();
        // Make sure the mtimes differ even on coarse filesystems
        thread::sleep(Duration::from_millis(1100));
        fs::write(dir.path().join("epoch=999.ckpt"), "new").unwrap();

        assert_eq!(
            newest_checkpoint(dir.path()).unwrap(),
            dir.path().join("epoch=999.ckpt")
        );
    }

    #[test]
    fn relocates_shared_object() {
        let dir = TempDir::new().unwrap();
        assert_eq!(relocate_monotonic_align(dir.path()).unwrap(), 0);

        let ma = dir.path().join("piper_train/vits/monotonic_align");
        fs::create_dir_all(&ma).unwrap();
        fs::write(ma.join("core.cpython-311-x86_64-linux-gnu.so"), "elf").unwrap();
        fs::write(ma.join("setup.py"), "").unwrap();

        assert_eq!(relocate_monotonic_align(dir.path()).unwrap(), 1);
        assert_eq!(
            fs::read_to_string(ma.join("monotonic_align/core.so")).unwrap(),
            "elf"
        );
        assert!(ma.join("monotonic_align/__init__.py").is_file());
    }
}

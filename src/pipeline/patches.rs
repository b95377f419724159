//! Source patches for piper_train. Its pinned dependencies have moved on since it was last
//! released, these get it installing and exporting again. Each patch is a plain text substitution
//! keyed to the release that broke it, and applying one twice is a no-op.
use anyhow::Context;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CompatPatch {
    pub id: &'static str,
    /// The upstream change this works around
    pub target: &'static str,
    /// Relative to piper's python package root
    pub file: &'static str,
    pub needle: &'static str,
    pub replacement: &'static str,
    /// Text only present once the patch has been applied. Without one a patched file just looks
    /// like one the patch doesn't apply to.
    pub marker: Option<&'static str>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PatchOutcome {
    /// Number of occurrences replaced
    Applied(usize),
    AlreadyApplied,
    NotApplicable,
    /// The file to patch doesn't exist
    Missing,
}

impl fmt::Display for PatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Applied(n) => write!(f, "applied ({} replacements)", n),
            Self::AlreadyApplied => write!(f, "already applied"),
            Self::NotApplicable => write!(f, "not applicable"),
            Self::Missing => write!(f, "file missing"),
        }
    }
}

/// piper-phonemize was archived and can't be installed, the bridge module replaces it.
pub const STRIP_PHONEMIZE_DEPENDENCY: CompatPatch = CompatPatch {
    id: "strip-piper-phonemize-dep",
    target: "piper-phonemize archived (2025-07)",
    file: "setup.py",
    needle: "\"piper-phonemize~=1.1.0\"",
    replacement: "",
    marker: None,
};

/// The spline discriminant can go slightly negative while tracing and the assert aborts the
/// export, clamp instead.
pub const CLAMP_SPLINE_DISCRIMINANT: CompatPatch = CompatPatch {
    id: "clamp-spline-discriminant",
    target: "torch 2.6 onnx tracing",
    file: "piper_train/vits/transforms.py",
    needle: "assert (discriminant >= 0).all(), discriminant",
    replacement: "discriminant = discriminant.clamp(min=1e-8)",
    marker: Some("discriminant = discriminant.clamp(min=1e-8)"),
};

/// torch 2.6 defaults to the dynamo exporter which can't handle the VITS model.
pub const LEGACY_ONNX_EXPORTER: CompatPatch = CompatPatch {
    id: "legacy-onnx-exporter",
    target: "torch 2.6 dynamo export default",
    file: "piper_train/export_onnx.py",
    needle: "torch.onnx.export(",
    replacement: "torch.onnx.export(dynamo=False,",
    marker: Some("dynamo=False"),
};

/// Needed before `pip install -e .`
pub const INSTALL_PATCHES: &[CompatPatch] = &[STRIP_PHONEMIZE_DEPENDENCY];

/// Needed before exporting to ONNX
pub const EXPORT_PATCHES: &[CompatPatch] = &[CLAMP_SPLINE_DISCRIMINANT, LEGACY_ONNX_EXPORTER];

impl CompatPatch {
    pub fn apply(&self, root: &Path) -> anyhow::Result<PatchOutcome> {
        let path = root.join(self.file);
        if !path.is_file() {
            return Ok(PatchOutcome::Missing);
        }
        let source = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        if self.marker.map(|m| source.contains(m)).unwrap_or(false) {
            return Ok(PatchOutcome::AlreadyApplied);
        }
        let count = source.matches(self.needle).count();
        if count == 0 {
            return Ok(PatchOutcome::NotApplicable);
        }
        fs::write(&path, source.replace(self.needle, self.replacement))
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(PatchOutcome::Applied(count))
    }
}

/// Applies each patch under `root`, logging what happened to each.
pub fn apply_all(
    patches: &[CompatPatch],
    root: &Path,
) -> anyhow::Result<Vec<(&'static str, PatchOutcome)>> {
    let mut outcomes = vec![];
    for patch in patches {
        let outcome = patch
            .apply(root)
            .with_context(|| format!("patch {} failed", patch.id))?;
        match outcome {
            PatchOutcome::Missing => warn!("{}: {} not found", patch.id, patch.file),
            _ => info!("{} ({}): {}", patch.id, patch.target, outcome),
        }
        outcomes.push((patch.id, outcome));
    }
    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TRANSFORMS: &str = "    discriminant = b.pow(2) - 4 * a * c\n    assert (discriminant >= 0).all(), discriminant\n\n    root = (2 * c) / (-b - torch.sqrt(discriminant))\n";

    const EXPORT: &str = "    torch.onnx.export(\n        model=model_g,\n        args=dummy_input,\n    )\n";

    #[test]
    fn export_patches_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let vits = dir.path().join("piper_train/vits");
        fs::create_dir_all(&vits).unwrap();
        fs::write(vits.join("transforms.py"), TRANSFORMS).unwrap();
        fs::write(dir.path().join("piper_train/export_onnx.py"), EXPORT).unwrap();

        let outcomes = apply_all(EXPORT_PATCHES, dir.path()).unwrap();
        assert_eq!(
            outcomes,
            vec![
                ("clamp-spline-discriminant", PatchOutcome::Applied(1)),
                ("legacy-onnx-exporter", PatchOutcome::Applied(1)),
            ]
        );

        let transforms = fs::read_to_string(vits.join("transforms.py")).unwrap();
        assert!(transforms.contains("    discriminant = discriminant.clamp(min=1e-8)\n"));
        assert!(!transforms.contains("assert"));
        let export = fs::read_to_string(dir.path().join("piper_train/export_onnx.py")).unwrap();
        assert!(export.starts_with("    torch.onnx.export(dynamo=False,\n"));

        let outcomes = apply_all(EXPORT_PATCHES, dir.path()).unwrap();
        assert!(outcomes
            .iter()
            .all(|(_, o)| *o == PatchOutcome::AlreadyApplied));
        assert_eq!(
            fs::read_to_string(dir.path().join("piper_train/export_onnx.py")).unwrap(),
            export
        );
    }

    #[test]
    fn strip_dependency() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            STRIP_PHONEMIZE_DEPENDENCY.apply(dir.path()).unwrap(),
            PatchOutcome::Missing
        );

        fs::write(
            dir.path().join("setup.py"),
            "install_requires=[\"piper-phonemize~=1.1.0\"],",
        )
        .unwrap();
        assert_eq!(
            STRIP_PHONEMIZE_DEPENDENCY.apply(dir.path()).unwrap(),
            PatchOutcome::Applied(1)
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("setup.py")).unwrap(),
            "install_requires=[],"
        );
        assert_eq!(
            STRIP_PHONEMIZE_DEPENDENCY.apply(dir.path()).unwrap(),
            PatchOutcome::NotApplicable
        );
    }
}

//! File names of the intermediates a signing run produces.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::models::RunToken;

/// Suffix of the V1-signed intermediate.
pub const V1_SUFFIX: &str = "_v1";
/// Suffix of the aligned intermediate, appended to the V1 name.
pub const ALIGN_SUFFIX: &str = "_align";
/// Extension of the V4 sidecar signature file.
pub const SIDECAR_EXTENSION: &str = "idsig";

/// Directory containing `path`. A bare file name resolves to `.`.
pub(crate) fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Inserts `suffix` (and the run token, when given) before the extension.
///
/// `dir/app-unsigned.apk` with `_v1` becomes `dir/app-unsigned_v1.apk`, or
/// `dir/app-unsigned-<token>_v1.apk` with a token.
pub fn intermediate_path(base: &Path, suffix: &str, token: Option<&RunToken>) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut name = stem;
    if let Some(token) = token {
        name.push('-');
        name.push_str(&token.to_string());
    }
    name.push_str(suffix);
    if let Some(ext) = base.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }

    base.with_file_name(name)
}

/// `<path>.idsig`
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(".");
    s.push(SIDECAR_EXTENSION);
    PathBuf::from(s)
}

/// Hidden temp file beside the final output that stage 3 writes to.
pub fn temp_output_path(signed: &Path, token: Option<&RunToken>) -> PathBuf {
    let name = signed
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tag = match token {
        Some(t) => t.to_string(),
        None => "partial".to_string(),
    };
    parent_dir(signed).join(format!(".{}.{}.tmp", name, tag))
}

/// Every path one signing run may create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkPaths {
    /// Stage 1 output.
    pub v1: PathBuf,
    /// Stage 2 output.
    pub aligned: PathBuf,
    /// Stage 3 output before it is renamed into place.
    pub temp_output: PathBuf,
    /// Sidecar a V4-capable signer writes next to the temp output.
    pub temp_sidecar: PathBuf,
    /// Final output.
    pub signed: PathBuf,
    /// Sidecar next to the final output.
    pub sidecar: PathBuf,
}

impl WorkPaths {
    pub fn new(unsigned: &Path, signed: &Path, token: Option<&RunToken>) -> Self {
        let v1 = intermediate_path(unsigned, V1_SUFFIX, token);
        let aligned = intermediate_path(&v1, ALIGN_SUFFIX, None);
        let temp_output = temp_output_path(signed, token);
        let temp_sidecar = sidecar_path(&temp_output);
        Self {
            v1,
            aligned,
            temp_output,
            temp_sidecar,
            signed: signed.to_path_buf(),
            sidecar: sidecar_path(signed),
        }
    }

    /// Paths removed by the cleanup pass after a failed run.
    ///
    /// The final output is not listed; it only appears through the last rename.
    pub fn scratch(&self) -> [&Path; 4] {
        [&self.v1, &self.aligned, &self.temp_output, &self.temp_sidecar]
    }
}

/// Deletes `path`, treating a missing file as success.
///
/// Returns whether a file was actually removed.
pub async fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Best-effort removal. Failures are logged and otherwise ignored.
pub async fn discard(path: &Path) -> bool {
    match remove_if_exists(path).await {
        Ok(removed) => {
            if removed {
                tracing::debug!("Removed {}", path.display());
            }
            removed
        }
        Err(e) => {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
            false
        }
    }
}

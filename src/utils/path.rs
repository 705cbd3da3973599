use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::pipeline::reference::has_image_extension;

static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

/// Reduce a client-supplied filename to a safe basename.
///
/// Path components are discarded, whitespace becomes `_`, and anything outside
/// `[A-Za-z0-9._-]` is dropped. Leading dots are stripped so the result can never
/// name a hidden file or walk upwards. Returns `None` when nothing usable is left.
pub fn secure_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some('_')
            } else if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                Some(c)
            } else {
                None
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches(|c: char| c == '.' || c == '_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// True when the filename carries one of the accepted image extensions.
pub fn allowed_file(filename: &str) -> bool {
    filename.contains('.') && has_image_extension(Path::new(filename))
}

/// An uploaded file written to its own directory under the upload root.
///
/// The directory (and the file inside it) is removed when the value is dropped,
/// so a failed request never leaves uploads behind.
#[derive(Debug)]
pub struct StagedUpload {
    dir: PathBuf,
    path: PathBuf,
}

impl StagedUpload {
    pub fn write(upload_root: &Path, filename: &str, bytes: &[u8]) -> std::io::Result<Self> {
        let seq = UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = upload_root.join(format!("{}-{}", std::process::id(), seq));
        std::fs::create_dir_all(&dir)?;
        let staged = Self { path: dir.join(filename), dir };
        std::fs::write(&staged.path, bytes)?;
        Ok(staged)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = ?self.dir, error = %e, "failed to clean staged upload");
            }
        }
    }
}

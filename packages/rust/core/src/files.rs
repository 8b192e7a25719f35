//! Filesystem helpers shared by the executor and publisher.

use std::path::{Path, PathBuf};

use tracing::debug;

use nbdocs_shared::{NbdocsError, Result};

/// Sibling temp path used while writing `path`: `.<file>.tmp`.
pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{file}.tmp"))
}

/// Write to a temp sibling, then rename over `path`.
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| NbdocsError::io(parent, e))?;
    }

    let temp = temp_path(path);
    std::fs::write(&temp, contents).map_err(|e| NbdocsError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| NbdocsError::io(path, e))?;

    debug!(path = %path.display(), size = contents.len(), "wrote file");
    Ok(())
}

/// Remove a file or directory tree. Returns whether anything was removed.
pub(crate) fn remove_path(path: &Path) -> Result<bool> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(NbdocsError::io(path, e)),
    };

    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
    .map_err(|e| NbdocsError::io(path, e))?;

    debug!(path = %path.display(), "removed");
    Ok(true)
}

/// Lowercase hex SHA-256 of `bytes`.
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

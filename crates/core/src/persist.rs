//! Crash-safe JSON documents on disk.
//!
//! Every persisted document in the daemon (playbook, cursors, stats) goes
//! through [`write_json_atomic`]: the new content is written to a `.tmp`
//! sibling, `fsync`'d, then renamed over the original.  A crash before the
//! rename leaves the previous version untouched; readers never observe a
//! half-written file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

fn tmp_sibling(path: &Path) -> PathBuf {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "document.json".to_string());
    path.with_file_name(format!("{filename}.tmp"))
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
    }

    let rendered = serde_json::to_vec_pretty(value).context("serialize document")?;
    let tmp_path = tmp_sibling(path);

    let write_result: Result<()> = (|| {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .with_context(|| format!("open {}", tmp_path.display()))?;
        file.write_all(&rendered)?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err).with_context(|| format!("rename into {}", path.display()));
    }

    Ok(())
}

/// Read a JSON document.  `Ok(None)` when the file does not exist; an error
/// when it exists but cannot be read or decoded.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value = serde_json::from_str(&raw).with_context(|| format!("decode {}", path.display()))?;
    Ok(Some(value))
}

/// Read a JSON document, falling back to `T::default()` when the file is
/// missing or corrupt.  Corruption is logged, never propagated.
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match read_json(path) {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(err) => {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "unreadable state file, starting from defaults"
            );
            T::default()
        }
    }
}

//! Managed on-disk storage for input artifacts and reference outputs.
//!
//! Layout under the configured root:
//!
//! ```text
//! {temp_dir}/
//!  ├─ {uuid}_{filename}        input artifacts, one per in-flight request
//!  └─ outputs/
//!      └─ {stem}_{hex8}.md     reference outputs, served by /outputs/{name}
//! ```
//!
//! Concurrent requests share the tree without any locking: every name embeds
//! a random token, so collisions are negligible by construction. Every path
//! handed in for deletion or retrieval is canonicalised and must be a
//! descendant of the canonical root.

use crate::config::{GatewayConfig, OUTPUT_SUBDIR};
use crate::error::GatewayError;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A Markdown result persisted for later retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredOutputFile {
    /// Generated name, `{stem}_{hex8}.md`.
    pub filename: String,
    /// Absolute path under the output directory.
    pub path: PathBuf,
    /// Content size in bytes.
    pub size: u64,
}

impl StoredOutputFile {
    /// Retrieval locator for this file.
    pub fn locator(&self) -> String {
        format!("/{}/{}", OUTPUT_SUBDIR, self.filename)
    }
}

/// File counts and sizes for `/system/info`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageUsage {
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_file_count: usize,
    pub output_file_count: usize,
    pub total_size_bytes: u64,
}

/// Owner of the temp/output directory tree.
#[derive(Debug, Clone)]
pub struct TempStorage {
    temp_dir: PathBuf,
    output_dir: PathBuf,
    max_file_size: u64,
}

impl TempStorage {
    /// Create (if absent) the temp and output roots and probe that they are
    /// writable. Safe to call repeatedly on the same root.
    pub async fn init(temp_dir: impl AsRef<Path>, max_file_size: u64) -> Result<Self, GatewayError> {
        let requested = temp_dir.as_ref();
        let unavailable = |detail: String| GatewayError::StorageUnavailable {
            path: requested.to_path_buf(),
            detail,
        };

        tokio::fs::create_dir_all(requested.join(OUTPUT_SUBDIR))
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let temp_dir = tokio::fs::canonicalize(requested)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        let output_dir = temp_dir.join(OUTPUT_SUBDIR);

        let storage = Self {
            temp_dir,
            output_dir,
            max_file_size,
        };
        storage.probe().await.map_err(|e| unavailable(e.to_string()))?;

        info!(
            temp_dir = %storage.temp_dir.display(),
            output_dir = %storage.output_dir.display(),
            "Directories initialized"
        );
        Ok(storage)
    }

    /// [`TempStorage::init`] with the root and size limit from `config`.
    pub async fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        Self::init(&config.temp_dir, config.max_file_size).await
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Reject payloads above the configured limit.
    pub fn check_size(&self, size: u64) -> Result<(), GatewayError> {
        if size > self.max_file_size {
            return Err(GatewayError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Write `bytes` as a new input artifact named `{uuid}_{filename}`.
    ///
    /// The on-disk size is re-read after the write and must match.
    pub async fn store(&self, bytes: &[u8], filename: &str) -> Result<PathBuf, GatewayError> {
        self.check_size(bytes.len() as u64)?;

        let base = base_name(filename)?;
        let path = self.temp_dir.join(format!("{}_{}", Uuid::new_v4(), base));

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| GatewayError::io(&path, e))?;
        verify_written(&path, bytes.len() as u64).await?;

        info!(
            temp_path = %path.display(),
            size = bytes.len(),
            original_filename = filename,
            "File stored successfully"
        );
        Ok(path)
    }

    /// Persist Markdown as a reference output named `{stem}_{hex8}.md`.
    pub async fn store_output(
        &self,
        content: &str,
        filename: &str,
    ) -> Result<StoredOutputFile, GatewayError> {
        let stem = Path::new(filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("output");
        let token = Uuid::new_v4().simple().to_string();
        let name = format!("{stem}_{}.md", &token[..8]);
        let path = self.output_dir.join(&name);

        tokio::fs::write(&path, content.as_bytes())
            .await
            .map_err(|e| GatewayError::io(&path, e))?;
        let size = content.len() as u64;
        verify_written(&path, size).await?;

        info!(output_path = %path.display(), size, "Output stored");
        Ok(StoredOutputFile {
            filename: name,
            path,
            size,
        })
    }

    /// Read a stored output by its bare filename.
    pub async fn read_output(&self, name: &str) -> Result<String, GatewayError> {
        let denied = || GatewayError::AccessDenied {
            name: name.to_string(),
        };

        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return Err(denied()),
        }

        let candidate = self.output_dir.join(name);
        let resolved = match tokio::fs::canonicalize(&candidate).await {
            Ok(p) => p,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(GatewayError::NotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(GatewayError::io(&candidate, e)),
        };
        if !resolved.starts_with(&self.output_dir) {
            warn!(name, resolved = %resolved.display(), "Output lookup escaped output directory");
            return Err(denied());
        }
        if !resolved.is_file() {
            return Err(GatewayError::NotFound {
                name: name.to_string(),
            });
        }

        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| GatewayError::io(&resolved, e))
    }

    /// Delete a managed file.
    ///
    /// Returns `true` when the file is gone afterwards (including when it
    /// never existed) and `false` when deletion was refused or failed.
    pub async fn delete(&self, path: &Path) -> bool {
        let resolved = match tokio::fs::canonicalize(path).await {
            Ok(p) => p,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "File does not exist, nothing to cleanup");
                return true;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to resolve file for cleanup");
                return false;
            }
        };

        if !self.is_managed(&resolved) {
            warn!(
                path = %path.display(),
                "Attempted to delete file outside temp directory"
            );
            return false;
        }

        match tokio::fs::remove_file(&resolved).await {
            Ok(()) => {
                debug!(path = %resolved.display(), "Temporary file deleted");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => {
                warn!(path = %resolved.display(), error = %e, "Failed to cleanup file");
                false
            }
        }
    }

    /// Delete every file in the temp root and output directory whose age is
    /// at least `max_age`. Returns the number of files deleted.
    pub async fn sweep(&self, max_age: Duration) -> usize {
        let now = SystemTime::now();
        let mut deleted = 0;

        for dir in [&self.temp_dir, &self.output_dir] {
            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Failed to scan directory");
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "Failed to read directory entry");
                        break;
                    }
                };
                let path = entry.path();
                let modified = match entry.metadata().await {
                    Ok(meta) if meta.is_file() => meta.modified(),
                    Ok(_) => continue,
                    Err(e) => Err(e),
                };
                let age = match modified {
                    Ok(mtime) => now.duration_since(mtime).unwrap_or(Duration::ZERO),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to stat file");
                        continue;
                    }
                };
                if age < max_age {
                    continue;
                }
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        deleted += 1;
                        debug!(path = %path.display(), "Deleted old file");
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old file"),
                }
            }
        }

        if deleted > 0 {
            info!(deleted, "Cleaned up old files");
        }
        deleted
    }

    /// [`TempStorage::sweep`] with the window expressed in hours.
    pub async fn sweep_hours(&self, max_age_hours: u64) -> usize {
        self.sweep(Duration::from_secs(max_age_hours.saturating_mul(3600))).await
    }

    /// Count files and bytes in both directories.
    pub async fn usage(&self) -> Result<StorageUsage, GatewayError> {
        let (temp_file_count, temp_bytes) = count_files(&self.temp_dir).await?;
        let (output_file_count, output_bytes) = count_files(&self.output_dir).await?;
        Ok(StorageUsage {
            temp_dir: self.temp_dir.clone(),
            output_dir: self.output_dir.clone(),
            temp_file_count,
            output_file_count,
            total_size_bytes: temp_bytes + output_bytes,
        })
    }

    /// Whether the temp root currently accepts writes.
    pub async fn is_writable(&self) -> bool {
        match self.probe().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Temp directory write probe failed");
                false
            }
        }
    }

    /// Canonical-path containment check against the managed root.
    fn is_managed(&self, resolved: &Path) -> bool {
        resolved != self.temp_dir
            && resolved != self.output_dir
            && resolved.starts_with(&self.temp_dir)
    }

    async fn probe(&self) -> std::io::Result<()> {
        let token = Uuid::new_v4().simple().to_string();
        let probe = self.temp_dir.join(format!(".probe_{}.tmp", &token[..8]));
        tokio::fs::write(&probe, b"probe").await?;
        tokio::fs::remove_file(&probe).await
    }
}

/// Final path component of `filename`, rejecting names without one.
fn base_name(filename: &str) -> Result<&str, GatewayError> {
    Path::new(filename)
        .file_name()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GatewayError::InvalidRequest(format!("invalid filename '{filename}'")))
}

async fn verify_written(path: &Path, expected: u64) -> Result<(), GatewayError> {
    let actual = tokio::fs::metadata(path)
        .await
        .map_err(|e| GatewayError::io(path, e))?
        .len();
    if actual != expected {
        return Err(GatewayError::WriteVerificationError {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(())
}

async fn count_files(dir: &Path) -> Result<(usize, u64), GatewayError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| GatewayError::io(dir, e))?;
    let mut count = 0;
    let mut bytes = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| GatewayError::io(dir, e))?
    {
        if let Ok(meta) = entry.metadata().await {
            if meta.is_file() {
                count += 1;
                bytes += meta.len();
            }
        }
    }
    Ok((count, bytes))
}

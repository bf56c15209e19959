//! # Atomic Index Installation
//!
//! Replaces the live index directory and catalogue file with newly built
//! ones so that at every observable instant either the old pair or the new
//! pair is fully present. The protocol:
//!
//! 1. The index is built into a scratch directory outside the live dir.
//! 2. Scratch contents are copied into a hidden `.staging` subdirectory of
//!    the live dir, so the final rename happens on the destination volume.
//! 3. Each staged entry atomically replaces its live counterpart.
//! 4. The catalogue file is backed up, removed, and the new one moved in.
//! 5. Metadata is written last, only after every file operation succeeded.

use crate::errors::KbError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Sidecar file holding [`IndexMetadata`] inside the live index directory.
pub const METADATA_FILE_NAME: &str = "metadata.json";

const STAGING_DIR_NAME: &str = ".staging";
const BACKUP_SUFFIX: &str = "bak";

/// Persisted record describing the currently installed index.
///
/// Written only after the on-disk index and catalogue it describes are
/// already consistent; the metadata write is the final step of an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub catalogue_path: PathBuf,
    pub row_count: usize,
    pub content_checksum: String,
    pub built_at: DateTime<Utc>,
    pub catalogue_mtime: DateTime<Utc>,
}

/// Filesystem layout for the knowledge base.
#[derive(Debug, Clone)]
pub struct KbPaths {
    /// Directory holding the live, queryable index.
    pub index_dir: PathBuf,
    /// Scratch directory new indexes are built into. Must not be nested
    /// inside `index_dir`, or the install step would delete its own source.
    pub scratch_dir: PathBuf,
    /// Final location of the installed catalogue file.
    pub catalogue_path: PathBuf,
}

impl KbPaths {
    /// Creates the directory layout and rejects a scratch directory nested
    /// inside the live index directory.
    pub fn ensure_layout(&self) -> Result<(), KbError> {
        fs::create_dir_all(&self.index_dir)?;
        fs::create_dir_all(&self.scratch_dir)?;
        if let Some(parent) = self.catalogue_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let index_dir = fs::canonicalize(&self.index_dir)?;
        let scratch_dir = fs::canonicalize(&self.scratch_dir)?;
        if scratch_dir.starts_with(&index_dir) {
            return Err(KbError::Config(format!(
                "scratch directory {} must not be nested inside the live index directory {}",
                self.scratch_dir.display(),
                self.index_dir.display()
            )));
        }
        Ok(())
    }
}

/// Installs the contents of `scratch_dir` into `index_dir` via a hidden
/// staging subdirectory, then discards both staging and scratch.
pub fn install_index(paths: &KbPaths) -> Result<(), KbError> {
    let staging = paths.index_dir.join(STAGING_DIR_NAME);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    // Copy scratch into staging so the per-entry replacement below is a
    // same-volume rename.
    copy_dir_contents(&paths.scratch_dir, &staging)?;

    for entry in fs::read_dir(&staging)? {
        let entry = entry?;
        let staged = entry.path();
        let live = paths.index_dir.join(entry.file_name());
        replace_entry(&staged, &live)?;
    }

    fs::remove_dir_all(&staging)?;
    fs::remove_dir_all(&paths.scratch_dir)?;
    info!(index_dir = %paths.index_dir.display(), "installed new index");
    Ok(())
}

/// Swaps the live catalogue file for `new_catalogue`.
///
/// The previous catalogue is copied aside before removal; the backup is
/// deleted only once the move succeeded. On failure the backup remains on
/// disk for operator recovery and an install error is returned.
pub fn swap_catalogue(new_catalogue: &Path, destination: &Path) -> Result<(), KbError> {
    let mut backup = destination.as_os_str().to_os_string();
    backup.push(".");
    backup.push(BACKUP_SUFFIX);
    let backup = PathBuf::from(backup);
    let had_previous = destination.exists();

    if had_previous {
        fs::copy(destination, &backup).map_err(|e| {
            KbError::Install(format!(
                "failed to back up catalogue {}: {e}",
                destination.display()
            ))
        })?;
        fs::remove_file(destination).map_err(|e| {
            KbError::Install(format!(
                "failed to remove previous catalogue {} (backup kept at {}): {e}",
                destination.display(),
                backup.display()
            ))
        })?;
        debug!(backup = %backup.display(), "backed up previous catalogue");
    }

    safe_move(new_catalogue, destination).map_err(|e| {
        KbError::Install(format!(
            "failed to move new catalogue into place{}: {e}",
            if had_previous {
                format!(" (previous version preserved at {})", backup.display())
            } else {
                String::new()
            }
        ))
    })?;

    if had_previous {
        if let Err(e) = fs::remove_file(&backup) {
            warn!(backup = %backup.display(), "could not remove catalogue backup: {e}");
        }
    }
    info!(catalogue = %destination.display(), "installed new catalogue file");
    Ok(())
}

/// Writes the metadata sidecar into the live index directory. Callers must
/// only invoke this after every other file operation has succeeded.
pub fn write_metadata(index_dir: &Path, metadata: &IndexMetadata) -> Result<(), KbError> {
    fs::create_dir_all(index_dir)?;
    let file = fs::File::create(index_dir.join(METADATA_FILE_NAME))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), metadata)?;
    Ok(())
}

/// Reads the metadata sidecar, returning `None` when no index was ever
/// installed.
pub fn read_metadata(index_dir: &Path) -> Result<Option<IndexMetadata>, KbError> {
    let path = index_dir.join(METADATA_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    let file = fs::File::open(path)?;
    Ok(Some(serde_json::from_reader(std::io::BufReader::new(
        file,
    ))?))
}

/// Content hash of a file on disk, as a lowercase hex digest.
pub fn checksum_file(path: &Path) -> Result<String, KbError> {
    let bytes = fs::read(path)?;
    Ok(format!("{:x}", md5::compute(&bytes)))
}

/// Last-modified time of a file as a UTC timestamp.
pub fn file_mtime_utc(path: &Path) -> Result<DateTime<Utc>, KbError> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Removes `final_path` (file or directory) if present, then moves the
/// staged entry into its place.
fn replace_entry(staged: &Path, final_path: &Path) -> Result<(), KbError> {
    if final_path.exists() {
        if final_path.is_dir() {
            fs::remove_dir_all(final_path)?;
        } else {
            fs::remove_file(final_path)?;
        }
    }
    safe_move(staged, final_path)
}

/// Moves `src` to `dst`, preferring an atomic rename and falling back to
/// copy-then-delete when the rename fails (e.g. across volumes).
fn safe_move(src: &Path, dst: &Path) -> Result<(), KbError> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!(
                src = %src.display(),
                dst = %dst.display(),
                "rename failed ({rename_err}), falling back to copy+remove"
            );
            if src.is_dir() {
                copy_dir_recursive(src, dst)?;
                fs::remove_dir_all(src)?;
            } else {
                fs::copy(src, dst)?;
                fs::remove_file(src)?;
            }
            Ok(())
        }
    }
}

fn copy_dir_contents(src: &Path, dst: &Path) -> Result<(), KbError> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if from.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<(), KbError> {
    fs::create_dir_all(dst)?;
    copy_dir_contents(src, dst)
}

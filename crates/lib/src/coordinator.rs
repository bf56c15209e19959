//! # Knowledge Base Coordinator
//!
//! Single entry point for knowledge-base updates and read access to the
//! current index. Updates are serialized by a process-wide lock; readers are
//! never blocked and keep serving from the current index until the atomic
//! swap completes. Every public method is exception-safe: failures are
//! logged and folded into negative results, because this component is called
//! from request-handling contexts that must not crash on a bad upload.

use crate::{
    catalogue::parse_catalogue,
    errors::KbError,
    gateway::ModelGateway,
    index::{build_index, Retriever, VectorIndex, DEFAULT_MMR_LAMBDA, DEFAULT_TOP_K},
    install::{
        checksum_file, file_mtime_utc, install_index, read_metadata, swap_catalogue,
        write_metadata, IndexMetadata, KbPaths,
    },
};
use chrono::Utc;
use std::{path::Path, sync::Arc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Outcome of a validation or update call. Never an `Err`: failures carry a
/// human-readable message distinguishing bad input (fix and retry) from
/// internal failures (retry later / contact the operator).
#[derive(Debug, Clone)]
pub struct UpdateReport {
    pub ok: bool,
    pub message: String,
    pub metadata: Option<IndexMetadata>,
}

impl UpdateReport {
    fn rejected(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            metadata: None,
        }
    }

    fn succeeded(message: impl Into<String>, metadata: IndexMetadata) -> Self {
        Self {
            ok: true,
            message: message.into(),
            metadata: Some(metadata),
        }
    }
}

/// Owns the update lock, validation, build, install, and metadata
/// bookkeeping for the knowledge base.
pub struct KnowledgeBase {
    paths: KbPaths,
    gateway: Arc<ModelGateway>,
    max_catalogue_bytes: u64,
    update_lock: Mutex<()>,
}

impl KnowledgeBase {
    pub fn new(paths: KbPaths, gateway: Arc<ModelGateway>, max_catalogue_size_mb: u64) -> Self {
        Self {
            paths,
            gateway,
            max_catalogue_bytes: max_catalogue_size_mb * 1024 * 1024,
            update_lock: Mutex::new(()),
        }
    }

    pub fn paths(&self) -> &KbPaths {
        &self.paths
    }

    /// Pre-flight size and parse check. No side effects, no lock; safe to
    /// call while an update is in flight.
    pub async fn validate(&self, path: &Path) -> UpdateReport {
        info!(path = %path.display(), "validating catalogue file");

        if !path.exists() {
            return UpdateReport::rejected("Catalogue file does not exist.");
        }
        let file_size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("could not stat catalogue file: {e}");
                return UpdateReport::rejected(format!("Catalogue file is unreadable: {e}"));
            }
        };
        if file_size > self.max_catalogue_bytes {
            return UpdateReport::rejected(format!(
                "Catalogue exceeds the maximum size of {} MB.",
                self.max_catalogue_bytes / (1024 * 1024)
            ));
        }

        match parse_catalogue(path) {
            Ok(records) => UpdateReport {
                ok: true,
                message: format!("Validation passed: {} rows.", records.len()),
                metadata: None,
            },
            Err(e) => UpdateReport::rejected(format!("Validation failed: {e}")),
        }
    }

    /// Rebuilds and atomically installs the knowledge base from a new
    /// catalogue file. Serialized process-wide: a concurrent call waits for
    /// the one in flight to finish before starting.
    pub async fn update(&self, path: &Path) -> UpdateReport {
        let _guard = self.update_lock.lock().await;
        info!(path = %path.display(), "starting knowledge base update");

        let validation = self.validate(path).await;
        if !validation.ok {
            return validation;
        }

        let records = match parse_catalogue(path) {
            Ok(records) => records,
            Err(e) => return UpdateReport::rejected(format!("Catalogue rejected: {e}")),
        };

        if let Err(e) = self.paths.ensure_layout() {
            error!("invalid knowledge base layout: {e}");
            return UpdateReport::rejected(format!("Configuration error: {e}"));
        }

        // Discard any leftovers from an interrupted previous build.
        if self.paths.scratch_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.paths.scratch_dir) {
                warn!("could not clear scratch directory: {e}");
            }
        }

        if let Err(e) = build_index(&records, &self.gateway, &self.paths.scratch_dir).await {
            error!("index build failed: {e}");
            return UpdateReport::rejected(format!(
                "Internal failure while building the index: {e}. Try again later."
            ));
        }

        if let Err(e) = install_index(&self.paths) {
            error!("index install failed: {e}");
            return UpdateReport::rejected(format!(
                "Internal failure while installing the index: {e}. Try again later."
            ));
        }

        // Confirm the installed index opens before committing to the
        // catalogue swap. A failure here is recoverable but needs an
        // operator, so it must not look like a routine rejection.
        if let Err(e) = VectorIndex::load(&self.paths.index_dir) {
            error!("installed index failed to reload: {e}");
            return UpdateReport::rejected(format!(
                "Index swapped but failed to reload: {e}. Operator attention required."
            ));
        }

        if let Err(e) = swap_catalogue(path, &self.paths.catalogue_path) {
            error!("catalogue swap failed: {e}");
            return UpdateReport::rejected(format!(
                "Index installed but the catalogue file swap failed: {e}. \
                 Backups were left on disk; operator attention required."
            ));
        }

        let metadata = match self.assemble_metadata(records.len()) {
            Ok(metadata) => metadata,
            Err(e) => {
                error!("failed to assemble index metadata: {e}");
                return UpdateReport::rejected(format!(
                    "Index installed but metadata could not be written: {e}."
                ));
            }
        };
        if let Err(e) = write_metadata(&self.paths.index_dir, &metadata) {
            error!("failed to persist index metadata: {e}");
            return UpdateReport::rejected(format!(
                "Index installed but metadata could not be written: {e}."
            ));
        }

        info!(rows = metadata.row_count, "knowledge base update completed");
        UpdateReport::succeeded(
            format!("Knowledge base updated: {} rows indexed.", metadata.row_count),
            metadata,
        )
    }

    /// Last persisted metadata, with the catalogue mtime refreshed when the
    /// file still exists. `None` means no index has ever been built.
    pub async fn status(&self) -> Option<IndexMetadata> {
        let mut metadata = match read_metadata(&self.paths.index_dir) {
            Ok(Some(metadata)) => metadata,
            Ok(None) => return None,
            Err(e) => {
                warn!("failed to read index metadata: {e}");
                return None;
            }
        };
        if metadata.catalogue_path.exists() {
            if let Ok(mtime) = file_mtime_utc(&metadata.catalogue_path) {
                metadata.catalogue_mtime = mtime;
            }
        }
        Some(metadata)
    }

    /// Opens the currently installed index and returns a query handle
    /// configured for diversity-aware top-k search. Returns `None` (logged,
    /// not raised) when the index cannot be opened.
    pub fn current_retriever(&self) -> Option<Retriever> {
        match VectorIndex::load(&self.paths.index_dir) {
            Ok(index) => Some(Retriever::new(
                Arc::new(index),
                DEFAULT_TOP_K,
                DEFAULT_MMR_LAMBDA,
            )),
            Err(e) => {
                error!("failed to load current retriever: {e}");
                None
            }
        }
    }

    fn assemble_metadata(&self, row_count: usize) -> Result<IndexMetadata, KbError> {
        Ok(IndexMetadata {
            catalogue_path: self.paths.catalogue_path.clone(),
            row_count,
            content_checksum: checksum_file(&self.paths.catalogue_path)?,
            built_at: Utc::now(),
            catalogue_mtime: file_mtime_utc(&self.paths.catalogue_path)?,
        })
    }
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("paths", &self.paths)
            .field("max_catalogue_bytes", &self.max_catalogue_bytes)
            .finish_non_exhaustive()
    }
}

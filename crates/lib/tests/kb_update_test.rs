//! Integration tests for the knowledge-base update pipeline: validation,
//! build, atomic install, and status reporting.

use catalograg::{
    gateway::{ModelGateway, RateLimiter},
    install::KbPaths,
    KnowledgeBase,
};
use catalograg_test_utils::{FailingEmbedder, MockAiProvider, MockEmbedder};
use chrono::Utc;
use std::{
    fs,
    path::Path,
    sync::{Arc, Once},
};
use tempfile::TempDir;

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .compact()
            .try_init();
    });
}

fn kb_paths(root: &Path) -> KbPaths {
    KbPaths {
        index_dir: root.join("index"),
        scratch_dir: root.join("scratch"),
        catalogue_path: root.join("data").join("catalogue.csv"),
    }
}

fn gateway_with_mock_embedder() -> Arc<ModelGateway> {
    Arc::new(ModelGateway::new(
        Arc::new(MockAiProvider::new(vec![])),
        Arc::new(MockEmbedder),
        Arc::new(RateLimiter::new(600_000)),
    ))
}

fn make_kb(root: &Path, max_mb: u64) -> KnowledgeBase {
    init_tracing();
    KnowledgeBase::new(kb_paths(root), gateway_with_mock_embedder(), max_mb)
}

#[tokio::test]
async fn update_installs_index_and_reports_row_count() {
    let dir = TempDir::new().unwrap();
    let kb = make_kb(dir.path(), 10);

    let upload = dir.path().join("upload.csv");
    fs::write(&upload, "A,1\nB,2\nC,3\n").unwrap();

    let before = Utc::now();
    let report = kb.update(&upload).await;
    assert!(report.ok, "update failed: {}", report.message);

    let metadata = report.metadata.expect("metadata on success");
    assert_eq!(metadata.row_count, 3);
    assert!(metadata.built_at >= before && metadata.built_at <= Utc::now());

    // The upload was moved to its final location and the index is live.
    let paths = kb_paths(dir.path());
    assert!(!upload.exists());
    assert!(paths.catalogue_path.exists());
    assert!(paths.index_dir.join("index.json").exists());
    assert!(!paths.scratch_dir.exists());
    assert!(kb.current_retriever().is_some());
}

#[tokio::test]
async fn status_round_trips_the_persisted_metadata() {
    let dir = TempDir::new().unwrap();
    let kb = make_kb(dir.path(), 10);
    assert!(kb.status().await.is_none());

    let upload = dir.path().join("upload.csv");
    fs::write(&upload, "A,1\nB,2\n").unwrap();
    let report = kb.update(&upload).await;
    assert!(report.ok);

    let status = kb.status().await.expect("status after update");
    let reported = report.metadata.unwrap();
    assert_eq!(status.row_count, 2);
    assert_eq!(status.content_checksum, reported.content_checksum);
    assert_eq!(status.catalogue_path, kb_paths(dir.path()).catalogue_path);
}

#[tokio::test]
async fn empty_file_is_rejected_without_side_effects() {
    let dir = TempDir::new().unwrap();
    let kb = make_kb(dir.path(), 10);

    let upload = dir.path().join("empty.csv");
    fs::write(&upload, "").unwrap();

    let report = kb.update(&upload).await;
    assert!(!report.ok);
    assert!(report.metadata.is_none());

    // Nothing was installed and the upload is untouched.
    assert!(upload.exists());
    assert!(!kb_paths(dir.path()).index_dir.join("index.json").exists());
    assert!(kb.status().await.is_none());
}

#[tokio::test]
async fn validate_reports_without_mutating_anything() {
    let dir = TempDir::new().unwrap();
    let kb = make_kb(dir.path(), 10);

    let upload = dir.path().join("upload.csv");
    fs::write(&upload, "A,1\nB,2\n").unwrap();

    let report = kb.validate(&upload).await;
    assert!(report.ok);
    assert!(report.message.contains('2'));

    // Validation is idempotent on an unchanged file.
    let again = kb.validate(&upload).await;
    assert_eq!(again.ok, report.ok);
    assert_eq!(again.message, report.message);

    // Validation never builds or installs.
    assert!(upload.exists());
    assert!(!kb_paths(dir.path()).index_dir.exists());
    assert!(kb.status().await.is_none());
}

#[tokio::test]
async fn oversized_catalogue_is_rejected() {
    let dir = TempDir::new().unwrap();
    let kb = make_kb(dir.path(), 1);

    let upload = dir.path().join("big.csv");
    fs::write(&upload, "a".repeat(2 * 1024 * 1024)).unwrap();

    let report = kb.update(&upload).await;
    assert!(!report.ok);
    assert!(report.message.contains("maximum size"));
    assert!(kb.status().await.is_none());
}

#[tokio::test]
async fn missing_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let kb = make_kb(dir.path(), 10);
    let report = kb.validate(&dir.path().join("nope.csv")).await;
    assert!(!report.ok);
}

#[tokio::test]
async fn concurrent_updates_are_serialized_and_leave_a_consistent_state() {
    let dir = TempDir::new().unwrap();
    let kb = make_kb(dir.path(), 10);

    let first = dir.path().join("first.csv");
    let second = dir.path().join("second.csv");
    fs::write(&first, "A,1\nB,2\nC,3\n").unwrap();
    fs::write(&second, "X,9\nY,8\n").unwrap();

    let (r1, r2) = tokio::join!(kb.update(&first), kb.update(&second));
    assert!(r1.ok, "first update failed: {}", r1.message);
    assert!(r2.ok, "second update failed: {}", r2.message);

    // Whichever ran last won; the installed state must be self-consistent.
    let status = kb.status().await.expect("status after updates");
    assert!(status.row_count == 2 || status.row_count == 3);
    assert!(kb.current_retriever().is_some());
}

#[tokio::test]
async fn scratch_nested_inside_the_index_dir_is_rejected() {
    let dir = TempDir::new().unwrap();
    let paths = KbPaths {
        index_dir: dir.path().join("index"),
        scratch_dir: dir.path().join("index").join("scratch"),
        catalogue_path: dir.path().join("catalogue.csv"),
    };
    let kb = KnowledgeBase::new(paths, gateway_with_mock_embedder(), 10);

    let upload = dir.path().join("upload.csv");
    fs::write(&upload, "A,1\n").unwrap();

    let report = kb.update(&upload).await;
    assert!(!report.ok);
    assert!(report.message.contains("Configuration error"));
}

#[tokio::test]
async fn backend_failure_during_build_installs_nothing() {
    let dir = TempDir::new().unwrap();
    let gateway = Arc::new(ModelGateway::new(
        Arc::new(MockAiProvider::new(vec![])),
        Arc::new(FailingEmbedder),
        Arc::new(RateLimiter::new(600_000)),
    ));
    let kb = KnowledgeBase::new(kb_paths(dir.path()), gateway, 10);

    let upload = dir.path().join("upload.csv");
    fs::write(&upload, "A,1\nB,2\n").unwrap();

    let report = kb.update(&upload).await;
    assert!(!report.ok);
    assert!(report.message.contains("Internal failure"));

    // The live locations are untouched and the upload is preserved.
    assert!(upload.exists());
    assert!(!kb_paths(dir.path()).index_dir.join("index.json").exists());
    assert!(kb.status().await.is_none());
    assert!(kb.current_retriever().is_none());
}

//! Integration tests for the multi-stage chat pipeline: sentinel and
//! product paths, stage-log lifecycle, context truncation, and runtime
//! prompt replacement.

use catalograg::{
    engine::{ChatEngine, KnowledgeService, MAX_CONTEXT_CHARS, TRUNCATION_MARKER},
    gateway::{ModelGateway, RateLimiter},
    history::{stage_session_key, HistoryStore, SqliteHistoryStore, STAGE_DOSAGE, STAGE_PRODUCTS},
    install::KbPaths,
    prompt::SqlitePromptStore,
    prompts::INITIAL_SYSTEM_PROMPT,
    KbError, KnowledgeBase,
};
use catalograg_test_utils::{MockAiProvider, MockEmbedder, TestSetup};
use std::{
    fs,
    sync::{Arc, Once},
};
use tempfile::TempDir;

const SESSION: &str = "session-1";

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .compact()
            .try_init();
    });
}

struct Harness {
    engine: ChatEngine,
    ai: MockAiProvider,
    history: Arc<SqliteHistoryStore>,
    _dir: TempDir,
}

impl Harness {
    async fn stage_log_len(&self, tag: &str) -> usize {
        let key = stage_session_key(SESSION, tag);
        self.history.get(&key).await.unwrap().len()
    }
}

/// Builds a full engine over an in-memory database and a two-product index.
async fn harness(script: Vec<&str>) -> Harness {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let ai = MockAiProvider::new(script);
    let gateway = Arc::new(ModelGateway::new(
        Arc::new(ai.clone()),
        Arc::new(MockEmbedder),
        Arc::new(RateLimiter::new(600_000)),
    ));

    let paths = KbPaths {
        index_dir: dir.path().join("index"),
        scratch_dir: dir.path().join("scratch"),
        catalogue_path: dir.path().join("catalogue.csv"),
    };
    let kb = Arc::new(KnowledgeBase::new(paths, gateway.clone(), 10));
    let upload = dir.path().join("upload.csv");
    fs::write(
        &upload,
        "Vitamin C,ascorbic acid,500 mg daily\nZinc,trace mineral,25 mg daily\n",
    )
    .unwrap();
    let report = kb.update(&upload).await;
    assert!(report.ok, "index setup failed: {}", report.message);

    let setup = TestSetup::new().await.unwrap();
    let history = Arc::new(SqliteHistoryStore::new(setup.provider.clone()));
    let prompt_store = Arc::new(SqlitePromptStore::new(
        setup.provider.clone(),
        INITIAL_SYSTEM_PROMPT,
    ));
    let engine = ChatEngine::new(kb, gateway, history.clone(), prompt_store)
        .await
        .unwrap();

    Harness {
        engine,
        ai,
        history,
        _dir: dir,
    }
}

#[tokio::test]
async fn general_question_answers_with_retrieval_in_two_calls() {
    let h = harness(vec!["0", "final answer"]).await;

    let reply = h.engine.process_query("hello there", SESSION).await.unwrap();
    assert_eq!(reply, "final answer");
    assert_eq!(h.ai.call_count(), 2);

    let calls = h.ai.get_calls();
    // Stage one classifies against retrieved catalogue excerpts.
    assert!(calls[0].0.contains("single character 0"));
    assert!(calls[0].0.contains("Vitamin C | ascorbic acid"));
    // Stage two answers with fresh retrieval under the stored final prompt.
    assert!(calls[1].0.contains("Vitamin C | ascorbic acid"));
    assert_eq!(calls[1].1, "hello there");

    // The durable log recorded the turn; stage sub-logs are gone.
    let main_log = h.history.get(SESSION).await.unwrap();
    assert_eq!(main_log.len(), 2);
    assert_eq!(main_log[0].content, "hello there");
    assert_eq!(main_log[1].content, "final answer");
    assert_eq!(h.stage_log_len(STAGE_PRODUCTS).await, 0);
    assert_eq!(h.stage_log_len(STAGE_DOSAGE).await, 0);
}

#[tokio::test]
async fn product_question_assembles_findings_in_identification_order() {
    let h = harness(vec![
        "Vitamin C\nZinc",
        "Take 500 mg daily.",
        "Take 25 mg daily.",
        "done",
    ])
    .await;

    let reply = h.engine.process_query("what doses?", SESSION).await.unwrap();
    assert_eq!(reply, "done");
    assert_eq!(h.ai.call_count(), 4);

    let calls = h.ai.get_calls();
    // One dosage call per product, in the order they were identified.
    assert_eq!(calls[1].1, "Vitamin C");
    assert_eq!(calls[2].1, "Zinc");

    // The final stage gets the assembled findings, not fresh retrieval.
    assert_eq!(
        calls[3].1,
        "what doses?\n\nVitamin C\nTake 500 mg daily.\n\nZinc\nTake 25 mg daily."
    );
    assert!(!calls[3].0.contains("Vitamin C | ascorbic acid"));

    // The durable log records the assembled input, not the raw utterance.
    let main_log = h.history.get(SESSION).await.unwrap();
    assert_eq!(main_log.len(), 2);
    assert_eq!(main_log[0].content, calls[3].1);
    assert_eq!(main_log[1].content, "done");

    assert_eq!(h.stage_log_len(STAGE_PRODUCTS).await, 0);
    assert_eq!(h.stage_log_len(STAGE_DOSAGE).await, 0);
}

#[tokio::test]
async fn failed_turn_still_clears_stage_logs_and_leaves_the_main_log_alone() {
    // Script ends after the first dosage answer, so the second dosage call
    // hits an exhausted backend.
    let h = harness(vec!["Vitamin C\nZinc", "Take 500 mg daily."]).await;

    let err = h.engine.process_query("doses?", SESSION).await.unwrap_err();
    assert!(matches!(err, KbError::Generation(_)));

    assert!(h.history.get(SESSION).await.unwrap().is_empty());
    assert_eq!(h.stage_log_len(STAGE_PRODUCTS).await, 0);
    assert_eq!(h.stage_log_len(STAGE_DOSAGE).await, 0);
}

#[tokio::test]
async fn oversized_findings_are_truncated_with_the_utterance_kept() {
    let long_dosage = "x".repeat(9000);
    let h = harness(vec!["Tonic", long_dosage.as_str(), "ok"]).await;

    h.engine.process_query("q", SESSION).await.unwrap();

    let calls = h.ai.get_calls();
    let assembled = &calls[2].1;
    assert!(assembled.starts_with("q\n\n"));
    assert!(assembled.ends_with(TRUNCATION_MARKER));
    let marker_chars = TRUNCATION_MARKER.chars().count();
    assert!(assembled.chars().count() <= MAX_CONTEXT_CHARS + marker_chars);
}

#[tokio::test]
async fn update_prompt_affects_only_the_final_stage() {
    let h = harness(vec!["0", "answer"]).await;

    assert!(h.engine.update_prompt("Be terse.").await.unwrap());
    h.engine.process_query("hello", SESSION).await.unwrap();

    let calls = h.ai.get_calls();
    assert!(!calls[0].0.contains("Be terse."));
    assert!(calls[1].0.contains("Be terse."));
    // The stored prompt was normalized before use.
    assert!(calls[1].0.starts_with("\"\"\""));
    assert!(calls[1].0.contains("Vitamin C | ascorbic acid"));
}

#[tokio::test]
async fn empty_prompt_update_is_rejected_and_leaves_the_prompt_unchanged() {
    let h = harness(vec!["0", "answer"]).await;

    assert!(!h.engine.update_prompt("   ").await.unwrap());
    h.engine.process_query("hello", SESSION).await.unwrap();

    let calls = h.ai.get_calls();
    assert!(calls[1].0.contains("friendly customer assistant"));
}

#[tokio::test]
async fn second_turn_reformulates_the_query_before_retrieval() {
    let h = harness(vec!["0", "first answer"]).await;
    h.engine.process_query("tell me about zinc", SESSION).await.unwrap();

    h.ai.push_response("what is the dosage of zinc?");
    h.ai.push_response("0");
    h.ai.push_response("second answer");
    let reply = h.engine.process_query("and the dosage?", SESSION).await.unwrap();
    assert_eq!(reply, "second answer");
    assert_eq!(h.ai.call_count(), 5);

    let calls = h.ai.get_calls();
    // The extra call is the reformulation against the conversation so far.
    assert!(calls[2].0.contains("standalone question"));
    assert_eq!(calls[2].1, "and the dosage?");
    // Product identification runs on the standalone form, the final answer
    // on the user's original words.
    assert_eq!(calls[3].1, "what is the dosage of zinc?");
    assert_eq!(calls[4].1, "and the dosage?");
}

#[tokio::test]
async fn clear_history_erases_the_durable_log() {
    let h = harness(vec!["0", "answer"]).await;
    h.engine.process_query("hello", SESSION).await.unwrap();
    assert_eq!(h.history.get(SESSION).await.unwrap().len(), 2);

    h.engine.clear_history(SESSION).await.unwrap();
    assert!(h.history.get(SESSION).await.unwrap().is_empty());
}

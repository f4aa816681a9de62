//! End-to-end engine behaviour with a scripted generator.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use docsage_core::telemetry::init_tracing;
use docsage_core::{DataPaths, EngineConfig, Error, Result, RetryPolicy};
use docsage_generate::{GenerationRequest, Generator, PromptKind};
use docsage_infer::HashingEmbedder;
use docsage_ingest::Document;
use docsage_retrieve::RetrievalMode;
use docsage_runtime::{AnalysisOutcome, Engine, QueryRequest, SummaryKind};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tempfile::TempDir;

const TENDER: &str = "Project tender for office equipment.\n\
The delivery deadline is 15 March 2025 and late delivery incurs penalties.\n\
Contact procurement@example.com for questions.\n\n\
Item | Quantity | Price\n\
Desk | 20 | 4000\n\
Chair | 40 | 2400\n";

const POLICY_A: &str = "The warranty covers hardware replacement for three years after delivery.";
const POLICY_B: &str = "Hardware replacement under the warranty requires a service ticket.";

/// Records every request and answers `"<Kind> output <n>"`, or always
/// fails when `offline`.
struct ScriptedGenerator {
    requests: Mutex<Vec<GenerationRequest>>,
    offline: bool,
}

impl ScriptedGenerator {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            offline: false,
        })
    }

    fn offline() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            offline: true,
        })
    }

    fn kinds(&self) -> Vec<PromptKind> {
        self.requests.lock().iter().map(|r| r.kind).collect()
    }

    fn last_prompt(&self) -> String {
        self.requests.lock().last().map(|r| r.prompt.clone()).unwrap_or_default()
    }
}

impl Generator for ScriptedGenerator {
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let n = {
                let mut requests = self.requests.lock();
                requests.push(request.clone());
                requests.len()
            };
            if self.offline {
                return Err(Error::GenerationUnavailable("offline".into()));
            }
            Ok(format!("{:?} output {n}", request.kind))
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

fn engine(dir: &Path, generator: Arc<ScriptedGenerator>) -> Engine {
    init_tracing("docsage=debug");
    let mut config = EngineConfig::default();
    config.index.dimension = 64;
    config.generation.retry = RetryPolicy {
        max_retries: 1,
        initial_delay_ms: 1,
        backoff_factor: 2.0,
        max_delay_ms: 2,
    };
    let paths = DataPaths::new(dir).unwrap();
    Engine::with_components(config, paths, Arc::new(HashingEmbedder::new(64)), generator).unwrap()
}

fn ingest_all(engine: &Engine, session_id: &str) {
    for (id, name, text) in [
        ("d1", "tender.txt", TENDER),
        ("d2", "policy_a.txt", POLICY_A),
        ("d3", "policy_b.txt", POLICY_B),
    ] {
        let report = engine
            .ingest_document(session_id, &Document::from_text(id, name, text))
            .unwrap();
        assert!(report.chunks_indexed > 0);
    }
}

fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_specific_question_uses_top_k() {
    let dir = TempDir::new().unwrap();
    let generator = ScriptedGenerator::new();
    let engine = engine(dir.path(), Arc::clone(&generator));
    ingest_all(&engine, "s1");

    let answer = engine
        .query(&QueryRequest::new("s1", "When is the delivery deadline?"))
        .await
        .unwrap();

    assert_eq!(answer.mode_used, RetrievalMode::TopK);
    assert!(!answer.fell_back);
    assert!(!answer.sources.is_empty());
    assert_eq!(answer.text.as_deref(), Some("Answer output 1"));
    assert!(generator
        .last_prompt()
        .contains("Question: When is the delivery deadline?"));
}

#[tokio::test]
async fn test_summary_request_covers_whole_file() {
    let dir = TempDir::new().unwrap();
    let generator = ScriptedGenerator::new();
    let engine = engine(dir.path(), Arc::clone(&generator));
    let report = engine
        .ingest_document("s1", &Document::from_text("d1", "tender.txt", TENDER.repeat(3)))
        .unwrap();
    engine
        .ingest_document("s1", &Document::from_text("d2", "policy_a.txt", POLICY_A))
        .unwrap();

    let request = QueryRequest::new("s1", "Give me an overview of the tender")
        .with_filenames(names(&["tender.txt"]));
    let answer = engine.query(&request).await.unwrap();

    assert_eq!(answer.mode_used, RetrievalMode::Exhaustive);
    assert_eq!(answer.sources.len(), report.chunks_indexed);
    assert!(answer.sources.iter().all(|s| s.filename == "tender.txt"));
    assert!(answer.sources.iter().all(|s| s.score.is_none()));
}

#[tokio::test]
async fn test_unknown_session_skips_generation() {
    let dir = TempDir::new().unwrap();
    let generator = ScriptedGenerator::new();
    let engine = engine(dir.path(), Arc::clone(&generator));

    let answer = engine
        .query(&QueryRequest::new("ghost", "What is the budget?"))
        .await
        .unwrap();
    assert!(answer.text.is_none());
    assert!(answer.sources.is_empty());
    assert!(generator.kinds().is_empty());
}

#[tokio::test]
async fn test_generation_failure_is_retryable_and_leaves_index_intact() {
    let dir = TempDir::new().unwrap();
    let generator = ScriptedGenerator::offline();
    let engine = engine(dir.path(), Arc::clone(&generator));
    ingest_all(&engine, "s1");
    let before = engine.registry().open("s1").unwrap().index().len();

    let err = engine
        .query(&QueryRequest::new("s1", "Who handles procurement?"))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    // One attempt plus one retry.
    assert_eq!(generator.kinds().len(), 2);
    assert_eq!(engine.registry().open("s1").unwrap().index().len(), before);
}

#[tokio::test]
async fn test_combine_reuses_saved_and_generates_missing() {
    let dir = TempDir::new().unwrap();
    let generator = ScriptedGenerator::new();
    let engine = engine(dir.path(), Arc::clone(&generator));
    ingest_all(&engine, "s1");

    let saved = engine.summarize_file("s1", "tender.txt").await.unwrap();
    assert_eq!(saved.text, "Summary output 1");
    assert_eq!(saved.metadata.kind, SummaryKind::File);
    assert!(saved.metadata.chunk_count > 0);
    assert!(engine.saved_summary("s1", "tender.txt").unwrap().is_some());

    let combined = engine
        .combine_summaries("s1", &names(&["tender.txt", "policy_a.txt", "missing.txt"]))
        .await
        .unwrap();

    assert_eq!(combined.files, names(&["tender.txt", "policy_a.txt"]));
    assert_eq!(combined.generated, names(&["policy_a.txt"]));
    assert_eq!(combined.failed, names(&["missing.txt"]));
    assert_eq!(
        generator.kinds(),
        vec![PromptKind::Summary, PromptKind::Summary, PromptKind::Combine]
    );
    assert_eq!(combined.text, "Combine output 3");

    let prompt = generator.last_prompt();
    let tender = prompt.find("=== tender.txt ===\nSummary output 1").unwrap();
    let policy = prompt.find("=== policy_a.txt ===\nSummary output 2").unwrap();
    assert!(tender < policy);

    let listed = engine.list_summaries("s1").unwrap();
    assert!(listed
        .iter()
        .any(|m| m.name == "combined_tender_policy_a" && m.kind == SummaryKind::Combined));
}

#[tokio::test]
async fn test_combine_of_single_file_needs_no_merge() {
    let dir = TempDir::new().unwrap();
    let generator = ScriptedGenerator::new();
    let engine = engine(dir.path(), Arc::clone(&generator));
    ingest_all(&engine, "s1");

    let combined = engine
        .combine_summaries("s1", &names(&["policy_b.txt", "policy_b.txt"]))
        .await
        .unwrap();
    assert_eq!(combined.files, names(&["policy_b.txt"]));
    assert_eq!(combined.text, "Summary output 1");
    assert_eq!(generator.kinds(), vec![PromptKind::Summary]);

    let err = engine.combine_summaries("s1", &[]).await.unwrap_err();
    assert!(matches!(err, Error::MalformedInput(_)));
}

#[tokio::test]
async fn test_condense() {
    let dir = TempDir::new().unwrap();
    let generator = ScriptedGenerator::new();
    let engine = engine(dir.path(), Arc::clone(&generator));

    assert!(matches!(
        engine.condense("   ").await.unwrap_err(),
        Error::MalformedInput(_)
    ));
    let condensed = engine.condense("A long combined report.").await.unwrap();
    assert_eq!(condensed, "Condense output 1");
    assert!(generator.last_prompt().contains("A long combined report."));
}

#[tokio::test]
async fn test_cross_document_themes_span_files() {
    let dir = TempDir::new().unwrap();
    let generator = ScriptedGenerator::new();
    let engine = engine(dir.path(), Arc::clone(&generator));
    ingest_all(&engine, "s1");

    let files = names(&["policy_a.txt", "policy_b.txt"]);
    let outcome = engine.analyze_cross_documents("s1", &files).unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.documents, files);
    assert!(!report.insights.is_empty());
    assert!(report.insights.iter().all(|i| i.filenames().len() >= 2));
    assert!(report.insights.iter().any(|i| i.theme().contains("warranty")));
    assert_eq!(report.document_count, 2);
    assert_eq!(report.source_mapping.keys().cloned().collect::<Vec<_>>(), files);
    assert!(report.overview.contains("from 2 documents"));
    assert!(!report.key_insights.is_empty());
    assert!(generator.kinds().is_empty());

    let explained = engine
        .explain_cross_documents("s1", &files, "How do the policies relate?")
        .await
        .unwrap();
    match explained {
        AnalysisOutcome::Ready { narrative, .. } => {
            assert_eq!(narrative.as_deref(), Some("CrossDocument output 1"));
        }
        AnalysisOutcome::Unavailable { reason } => panic!("unavailable: {reason}"),
    }
}

#[test]
fn test_concurrent_ingest_keeps_chunk_ids_unique() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), ScriptedGenerator::new());
    let text = "Clause one sets the delivery terms for every office. ".repeat(20);

    for round in 0..10 {
        let session_id = format!("race-{round}");
        let barrier = std::sync::Barrier::new(2);
        std::thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| {
                    barrier.wait();
                    engine
                        .ingest_document(&session_id, &Document::from_text("d1", "a.txt", text.as_str()))
                        .unwrap();
                });
            }
        });

        let session = engine.registry().open(&session_id).unwrap();
        let ids: Vec<String> = session
            .index()
            .read(|idx| idx.metadata().iter().map(|m| m.chunk_id.clone()).collect());
        let unique: std::collections::BTreeSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len(), "round {round}");
    }
}

#[tokio::test]
async fn test_corrupt_index_makes_analysis_unavailable() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), ScriptedGenerator::new());
    ingest_all(&engine, "s1");
    engine.persist("s1").unwrap();
    assert_eq!(engine.evict_idle(Duration::ZERO).unwrap(), 1);

    let index_file = engine.registry().session_dir("s1").join("index.db");
    std::fs::write(&index_file, b"definitely not sqlite").unwrap();

    let outcome = engine.analyze_cross_documents("s1", &[]).unwrap();
    assert!(matches!(outcome, AnalysisOutcome::Unavailable { .. }));

    let missing = engine.analyze_cross_documents("ghost", &[]).unwrap();
    assert!(matches!(missing, AnalysisOutcome::Unavailable { .. }));
}

#[tokio::test]
async fn test_sessions_survive_restart() {
    let dir = TempDir::new().unwrap();
    {
        let engine = engine(dir.path(), ScriptedGenerator::new());
        engine
            .ingest_document("s1", &Document::from_text("d1", "tender.txt", TENDER))
            .unwrap();
        assert_eq!(engine.persist_all().unwrap(), 1);
    }

    let generator = ScriptedGenerator::new();
    let engine = engine(dir.path(), Arc::clone(&generator));
    assert_eq!(engine.list_sessions().unwrap(), vec!["s1"]);
    assert_eq!(engine.documents("s1").unwrap(), vec!["tender.txt"]);
    assert_eq!(engine.selected("s1").unwrap(), vec!["tender.txt"]);

    let answer = engine
        .query(&QueryRequest::new("s1", "delivery deadline"))
        .await
        .unwrap();
    assert!(answer.text.is_some());
}

#[test]
fn test_ingest_path_and_selection() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), ScriptedGenerator::new());

    let notes = dir.path().join("notes.md");
    std::fs::write(&notes, "# Notes\n\nThe kickoff meeting is on 2 June 2025.").unwrap();
    let first = engine.ingest_path("s1", &notes).unwrap();
    let second = engine.ingest_path("s1", &notes).unwrap();
    assert!(first.chunks_indexed > 0);
    assert!(second.already_indexed);
    assert_eq!(engine.registry().open("s1").unwrap().index().len(), first.chunks_indexed);

    let scan = dir.path().join("scan.png");
    std::fs::write(&scan, [0x89u8, 0x50, 0x4e, 0x47]).unwrap();
    let report = engine.ingest_path("s1", &scan).unwrap();
    assert!(report.ocr_required);
    assert_eq!(report.chunks_total, 0);

    assert_eq!(engine.documents("s1").unwrap(), vec!["notes.md"]);
    engine.select("s1", names(&["notes.md"])).unwrap();
    assert_eq!(engine.selected("s1").unwrap(), vec!["notes.md"]);
}

#[tokio::test]
async fn test_remove_session_drops_summaries() {
    let dir = TempDir::new().unwrap();
    let engine = engine(dir.path(), ScriptedGenerator::new());
    ingest_all(&engine, "s1");
    engine.summarize_file("s1", "policy_a.txt").await.unwrap();
    engine.persist("s1").unwrap();

    assert!(engine.remove_session("s1").unwrap());
    assert!(engine.list_summaries("s1").unwrap().is_empty());
    assert!(engine.list_sessions().unwrap().is_empty());
}

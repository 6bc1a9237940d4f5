//! End-to-end pipeline tests over the in-memory store with fake providers

use async_trait::async_trait;
use normrag_common::config::RagConfig;
use normrag_common::context::{
    AnswerGenerator, QueryUnderstander, RagPipeline, NOT_FOUND_ANSWER, NOT_FOUND_REASONING,
};
use normrag_common::db::{DocumentStore, MemoryStore, NewDocument};
use normrag_common::embeddings::{Embedder, EmbeddingMode, MockEmbedder};
use normrag_common::llm::{ChatModel, ExtractionRequest, StructuredExtractor};
use normrag_common::retrieval::{ChunkStore, NewChunk, Retriever};
use normrag_common::{AppError, Result};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Fakes
// ============================================================================

/// Fixed vectors per text; anything unknown points away from every chunk
struct TableEmbedder {
    table: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl TableEmbedder {
    fn new(entries: &[(&str, [f32; 2])]) -> Self {
        Self {
            table: entries
                .iter()
                .map(|(text, v)| (text.to_string(), v.to_vec()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    async fn embed_batch(&self, texts: &[String], _mode: EmbeddingMode) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| self.table.get(t).cloned().unwrap_or_else(|| vec![0.0, -1.0]))
            .collect())
    }

    fn model_name(&self) -> &str {
        "table"
    }

    fn dimension(&self) -> usize {
        2
    }
}

struct ScriptedExtractor {
    response: Option<serde_json::Value>,
}

#[async_trait]
impl StructuredExtractor for ScriptedExtractor {
    async fn extract(&self, _request: &ExtractionRequest) -> Result<serde_json::Value> {
        self.response
            .clone()
            .ok_or_else(|| AppError::upstream("llm", "connection reset"))
    }
}

struct RecordingChat {
    prompts: Mutex<Vec<String>>,
}

impl RecordingChat {
    fn new() -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for RecordingChat {
    async fn complete(&self, prompt: &str, _temperature: f32, _max_tokens: u32) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(" Стипендія призначається щомісяця (Джерело 1).\n".to_string())
    }
}

// ============================================================================
// Fixture
// ============================================================================

const QUERY: &str = "Коли виплачується стипендія?";
const MONTHLY: &str = "Стипендія виплачується щомісяця.";
const AMOUNT: &str = "Розмір стипендії встановлюється наказом ректора.";
const UNRELATED: &str = "Гуртожиток надається іногороднім студентам.";

fn understanding_json() -> serde_json::Value {
    json!({
        "intent": "дізнатися терміни виплати стипендії",
        "key_terms": ["розмір", "стипендії", "наказом"],
        "expected_document_type": "положення",
        "confidence": 0.8
    })
}

struct Fixture {
    store: Arc<MemoryStore>,
    embedder: Arc<TableEmbedder>,
    chat: Arc<RecordingChat>,
    rag: RagConfig,
}

impl Fixture {
    fn new() -> Self {
        let embedder = TableEmbedder::new(&[
            (QUERY, [1.0, 0.0]),
            (MONTHLY, [1.0, 0.0]),
            (AMOUNT, [0.8, 0.6]),
            (UNRELATED, [0.0, 1.0]),
        ]);

        Self {
            store: Arc::new(MemoryStore::new(2)),
            embedder: Arc::new(embedder),
            chat: Arc::new(RecordingChat::new()),
            rag: RagConfig {
                similarity_threshold: 0.5,
                excerpt_length: 20,
                ..RagConfig::default()
            },
        }
    }

    async fn index(&self, title: &str, number: Option<&str>, contents: &[&str]) {
        let document = self
            .store
            .create_document(NewDocument {
                title: title.to_string(),
                document_number: number.map(str::to_string),
                url: Some("https://sumdu.edu.ua/normative".to_string()),
                file_path: None,
            })
            .await
            .unwrap();

        let texts: Vec<String> = contents.iter().map(|c| c.to_string()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts, EmbeddingMode::Document)
            .await
            .unwrap();

        let chunks = texts
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (content, embedding))| NewChunk {
                chunk_index: i as i32,
                content,
                article_number: (i == 0).then(|| "ст. 3".to_string()),
                embedding,
            })
            .collect();

        self.store.replace_chunks(document.id, chunks).await.unwrap();
    }

    fn pipeline(&self, understanding: Option<serde_json::Value>) -> RagPipeline {
        let retriever = Retriever::new(
            self.embedder.clone(),
            self.store.clone(),
            self.store.clone(),
            &self.rag,
        );
        let understander = QueryUnderstander::new(Arc::new(ScriptedExtractor {
            response: understanding,
        }));
        let generator = AnswerGenerator::new(self.chat.clone(), 0.7, 2000);

        RagPipeline::new(understander, Arc::new(retriever), generator, &self.rag)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_empty_index_short_circuits() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(Some(understanding_json()));

    let answer = pipeline.process_query(QUERY, None).await.unwrap();

    assert_eq!(answer.answer, NOT_FOUND_ANSWER);
    assert_eq!(answer.answer, "На жаль, я не знайшов релевантної інформації в документах.");
    assert!(answer.sources.is_empty());
    assert_eq!(answer.reasoning_path, NOT_FOUND_REASONING);
    assert_eq!(answer.reasoning_path, "Не знайдено релевантних документів");
    assert_eq!(fixture.chat.calls(), 0);
}

#[tokio::test]
async fn test_below_threshold_short_circuits() {
    let fixture = Fixture::new();
    fixture.index("Положення про гуртожитки", None, &[UNRELATED]).await;

    let answer = fixture
        .pipeline(Some(understanding_json()))
        .process_query(QUERY, None)
        .await
        .unwrap();

    assert_eq!(answer.answer, NOT_FOUND_ANSWER);
    assert_eq!(fixture.chat.calls(), 0);
}

#[tokio::test]
async fn test_answer_with_sources_in_retrieval_order() {
    let fixture = Fixture::new();
    fixture
        .index("Положення про стипендії", Some("45-од"), &[AMOUNT, MONTHLY, UNRELATED])
        .await;

    let answer = fixture
        .pipeline(Some(understanding_json()))
        .process_query(QUERY, None)
        .await
        .unwrap();

    assert_eq!(answer.answer, "Стипендія призначається щомісяця (Джерело 1).");

    // MONTHLY is closest to the query; AMOUNT matches more key terms
    assert_eq!(answer.sources.len(), 2);
    assert_eq!(answer.sources[0].excerpt, "Стипендія виплачу...");
    assert!(answer.sources[0].article.is_none());
    assert_eq!(answer.sources[1].article.as_deref(), Some("ст. 3"));
    assert_eq!(answer.sources[1].document_number.as_deref(), Some("45-од"));
    assert_eq!(answer.sources[1].document_title, "Положення про стипендії");

    let prompts = fixture.chat.prompts.lock().unwrap();
    let prompt = &prompts[0];
    let monthly_at = prompt.find(MONTHLY).unwrap();
    let amount_at = prompt.find(AMOUNT).unwrap();
    assert!(monthly_at < amount_at);
    assert!(prompt.contains("[Джерело 1: 'Положення про стипендії' №45-од ]"));

    assert!(answer
        .reasoning_path
        .contains("намір: дізнатися терміни виплати стипендії"));
    assert!(answer.reasoning_path.contains("відібрано 2 релевантних"));
}

#[tokio::test]
async fn test_top_k_caps_sources() {
    let fixture = Fixture::new();
    fixture.index("Положення", None, &[AMOUNT, MONTHLY]).await;

    let answer = fixture
        .pipeline(Some(understanding_json()))
        .process_query(QUERY, Some(1))
        .await
        .unwrap();

    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].excerpt, "Стипендія виплачу...");
}

#[tokio::test]
async fn test_understanding_failure_propagates() {
    let fixture = Fixture::new();
    fixture.index("Положення", None, &[MONTHLY]).await;

    let err = fixture
        .pipeline(None)
        .process_query(QUERY, None)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::UpstreamUnavailable { .. }));
    assert_eq!(err.public_message(), "Query processing failed");
    assert_eq!(fixture.chat.calls(), 0);
}

#[tokio::test]
async fn test_understanding_failure_degrades_when_enabled() {
    let mut fixture = Fixture::new();
    fixture.rag.degrade_on_understanding_failure = true;
    fixture.index("Положення", None, &[MONTHLY]).await;

    let answer = fixture
        .pipeline(None)
        .process_query(QUERY, None)
        .await
        .unwrap();

    assert_eq!(answer.sources.len(), 1);
    assert!(answer.reasoning_path.contains("намір: unknown"));
    assert!(answer.reasoning_path.contains("[]"));
}

#[tokio::test]
async fn test_blank_query_rejected_before_providers() {
    let fixture = Fixture::new();
    let pipeline = fixture.pipeline(Some(understanding_json()));

    let err = pipeline.process_query("   ", None).await.unwrap_err();

    assert!(matches!(err, AppError::InvalidInput { .. }));
    assert_eq!(fixture.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_mock_embedder_matches_identical_text() {
    let store = Arc::new(MemoryStore::new(32));
    let embedder = Arc::new(MockEmbedder::new(32));
    let document = store
        .create_document(NewDocument {
            title: "Наказ".to_string(),
            file_path: Some("data/documents/nakaz.txt".to_string()),
            ..NewDocument::default()
        })
        .await
        .unwrap();

    let embedding = embedder.embed(MONTHLY, EmbeddingMode::Document).await.unwrap();
    store
        .replace_chunks(
            document.id,
            vec![NewChunk {
                chunk_index: 0,
                content: MONTHLY.to_string(),
                article_number: None,
                embedding,
            }],
        )
        .await
        .unwrap();

    let rag = RagConfig {
        similarity_threshold: 0.99,
        ..RagConfig::default()
    };
    let retriever = Retriever::new(embedder, store.clone(), store, &rag);

    let hits = retriever.search_by_text(MONTHLY, None, None).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert!((hits[0].similarity - 1.0).abs() < 1e-5);
}

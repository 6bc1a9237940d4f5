//! NormRAG API Gateway
//!
//! The entry point for all external API requests.
//! Handles:
//! - Question answering over the indexed documents
//! - Document management (create, update, delete, reprocess)
//! - Health checks
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};
use normrag_common::{
    config::{AppConfig, ObservabilityConfig},
    context::{AnswerGenerator, QueryUnderstander, RagPipeline},
    db::{DbPool, DocumentStore, Repository},
    embeddings::create_embedder,
    llm::OpenAiCompatibleClient,
    metrics,
    retrieval::Retriever,
};
use normrag_ingestion::{document_service, DocumentService};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<RagPipeline>,
    pub documents: Arc<DocumentService>,
    pub store: Arc<dyn DocumentStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;
    config.validate()?;

    // Initialize tracing
    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting NormRAG API Gateway v{}",
        normrag_common::VERSION
    );

    let config = Arc::new(config);

    // Initialize metrics
    if config.observability.metrics_port > 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        prometheus_builder(&config.observability)?
            .with_http_listener(metrics_addr)
            .install()?;
        info!("Metrics exporter listening on {}", metrics_addr);
    }
    metrics::register_metrics();

    // Initialize database connection
    let db = DbPool::new(&config.database).await?;
    db.init_schema(config.embedding.dimension).await?;
    let repository = Arc::new(Repository::new(db, config.embedding.dimension));

    // Providers
    let embedder = create_embedder(&config.embedding)?;
    let llm = Arc::new(OpenAiCompatibleClient::new(&config.llm)?);

    // Core components, built once and shared
    let retriever = Retriever::new(
        embedder.clone(),
        repository.clone(),
        repository.clone(),
        &config.rag,
    );
    let pipeline = RagPipeline::new(
        QueryUnderstander::new(llm.clone()),
        Arc::new(retriever),
        AnswerGenerator::new(llm, config.llm.temperature, config.llm.max_tokens),
        &config.rag,
    );
    let documents = document_service(&config, repository.clone(), embedder)?;

    // Create app state
    let state = AppState {
        config: config.clone(),
        pipeline: Arc::new(pipeline),
        documents: Arc::new(documents),
        store: repository,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Prometheus exporter with the service label and histogram buckets.
/// Embedding and LLM calls get the wider upstream buckets.
fn prometheus_builder(config: &ObservabilityConfig) -> Result<PrometheusBuilder, BuildError> {
    let upstream = ["embedding_duration_seconds", "llm_duration_seconds"];

    upstream.iter().try_fold(
        PrometheusBuilder::new()
            .add_global_label("service", config.service_name.clone())
            .set_buckets(metrics::LATENCY_BUCKETS)?,
        |builder, name| {
            builder.set_buckets_for_metric(
                Matcher::Full(format!("{}_{}", metrics::METRICS_PREFIX, name)),
                metrics::UPSTREAM_BUCKETS,
            )
        },
    )
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let timeout = TimeoutLayer::new(state.config.request_timeout());

    // API routes
    let api_routes = Router::new()
        .route("/query", post(handlers::query::query))
        .route(
            "/documents",
            get(handlers::documents::list_documents).post(handlers::documents::create_document),
        )
        .route(
            "/documents/{id}",
            get(handlers::documents::get_document)
                .put(handlers::documents::update_document)
                .delete(handlers::documents::delete_document),
        )
        .route(
            "/documents/{id}/reprocess",
            post(handlers::documents::reprocess_document),
        );

    // Compose the app
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/health/detailed", get(handlers::health::health_detailed))
        .nest("/api", api_routes)
        .route_layer(axum::middleware::from_fn(middleware::metrics::track_requests))
        .layer(timeout)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use normrag_common::db::MemoryStore;
    use normrag_common::embeddings::MockEmbedder;
    use normrag_common::errors::{AppError, Result};
    use normrag_common::llm::{ChatModel, ExtractionRequest, StructuredExtractor};
    use normrag_common::text::WhitespaceCounter;
    use normrag_ingestion::{LocalContentLoader, TextChunker};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const DIM: usize = 16;

    struct FakeLlm {
        available: bool,
    }

    #[async_trait]
    impl ChatModel for FakeLlm {
        async fn complete(&self, _prompt: &str, _t: f32, _m: u32) -> Result<String> {
            if self.available {
                Ok("Відповідь з джерелами.".to_string())
            } else {
                Err(AppError::upstream("llm", "401 invalid api key"))
            }
        }
    }

    #[async_trait]
    impl StructuredExtractor for FakeLlm {
        async fn extract(&self, _request: &ExtractionRequest) -> Result<Value> {
            Ok(json!({
                "intent": "довідка",
                "key_terms": ["стипендія"],
                "expected_document_type": null,
                "confidence": 0.6
            }))
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.embedding.dimension = DIM;
        config.rag.similarity_threshold = 0.99;
        config.rag.chunk_size = 50;
        config.rag.chunk_overlap = 5;
        config
    }

    fn test_state(llm_available: bool) -> AppState {
        build_state(test_config(), llm_available)
    }

    fn build_state(config: AppConfig, llm_available: bool) -> AppState {
        let config = Arc::new(config);

        let store = Arc::new(MemoryStore::new(DIM));
        let embedder = Arc::new(MockEmbedder::new(DIM));
        let llm = Arc::new(FakeLlm {
            available: llm_available,
        });

        let retriever = Retriever::new(embedder.clone(), store.clone(), store.clone(), &config.rag);
        let pipeline = RagPipeline::new(
            QueryUnderstander::new(llm.clone()),
            Arc::new(retriever),
            AnswerGenerator::new(llm, 0.7, 2000),
            &config.rag,
        );
        let documents = DocumentService::new(
            store.clone(),
            store.clone(),
            embedder,
            TextChunker::new(Arc::new(WhitespaceCounter)),
            Arc::new(LocalContentLoader::new(&config.ingestion)),
            &config.rag,
        );

        AppState {
            config,
            pipeline: Arc::new(pipeline),
            documents: Arc::new(documents),
            store,
        }
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(state: &AppState, content: &str) -> Value {
        let (status, body) = send(
            create_router(state.clone()),
            "POST",
            "/api/documents",
            Some(json!({
                "title": "Положення про стипендії",
                "document_number": "45-од",
                "url": "https://sumdu.edu.ua/stypendii",
                "content": content
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    #[tokio::test]
    async fn test_health() {
        let state = test_state(true);
        let (status, body) = send(create_router(state), "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"], "connected");
        assert_eq!(body["llm_api"], "not_configured");
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn test_health_detailed_counts() {
        let state = test_state(true);
        create(&state, "Стипендія виплачується щомісяця.").await;

        let (_, body) = send(create_router(state), "GET", "/health/detailed", None).await;
        assert_eq!(body["documents_count"], 1);
        assert_eq!(body["chunks_count"], 1);
        assert_eq!(body["embedding_model"], "embed-multilingual-v3.0");
    }

    #[tokio::test]
    async fn test_query_validation() {
        let state = test_state(true);
        let (status, body) = send(
            create_router(state.clone()),
            "POST",
            "/api/query",
            Some(json!({ "query": "ab" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["field"], "query");

        let (status, _) = send(
            create_router(state),
            "POST",
            "/api/query",
            Some(json!({ "query": "Коли сесія?", "top_k": 21 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_query_without_documents() {
        let state = test_state(true);
        let (status, body) = send(
            create_router(state),
            "POST",
            "/api/query",
            Some(json!({ "query": "Коли сесія?" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["answer"],
            "На жаль, я не знайшов релевантної інформації в документах."
        );
        assert_eq!(body["sources"], json!([]));
        assert_eq!(body["reasoning_path"], "Не знайдено релевантних документів");
    }

    #[tokio::test]
    async fn test_query_answers_with_sources() {
        let state = test_state(true);
        let text = "Стипендія виплачується щомісяця.";
        create(&state, text).await;

        let (status, body) = send(
            create_router(state),
            "POST",
            "/api/query",
            Some(json!({ "query": text, "top_k": 3 })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], "Відповідь з джерелами.");
        assert_eq!(body["sources"][0]["document_title"], "Положення про стипендії");
        assert_eq!(body["sources"][0]["document_number"], "45-од");
        assert_eq!(body["sources"][0]["excerpt"], text);
    }

    #[tokio::test]
    async fn test_query_top_k_falls_back_to_config() {
        let mut config = test_config();
        config.rag.top_k = 1;
        let state = build_state(config, true);
        let text = "Стипендія виплачується щомісяця.";
        create(&state, text).await;
        create(&state, text).await;

        let (status, body) = send(
            create_router(state.clone()),
            "POST",
            "/api/query",
            Some(json!({ "query": text })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sources"].as_array().unwrap().len(), 1);

        let (_, body) = send(
            create_router(state),
            "POST",
            "/api/query",
            Some(json!({ "query": text, "top_k": 2 })),
        )
        .await;
        assert_eq!(body["sources"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_requests_recorded_per_route() {
        let recorder = prometheus_builder(&ObservabilityConfig::default())
            .unwrap()
            .build_recorder();
        let handle = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        ::metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let state = test_state(true);
                send(create_router(state.clone()), "GET", "/health", None).await;
                let missing = format!("/api/documents/{}", uuid::Uuid::new_v4());
                send(create_router(state), "GET", &missing, None).await;
            })
        });

        let rendered = handle.render();
        assert!(rendered.contains("normrag_requests_total"), "{rendered}");
        assert!(rendered.contains(r#"endpoint="/health""#));
        assert!(rendered.contains(r#"endpoint="/api/documents/{id}""#));
        assert!(rendered.contains(r#"status="404""#));
        assert!(rendered.contains(r#"service="normrag""#));
    }

    #[tokio::test]
    async fn test_upstream_failure_is_generic() {
        let state = test_state(false);
        let text = "Стипендія виплачується щомісяця.";
        create(&state, text).await;

        let (status, body) = send(
            create_router(state),
            "POST",
            "/api/query",
            Some(json!({ "query": text })),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["message"], "Query processing failed");
    }

    #[tokio::test]
    async fn test_document_crud() {
        let state = test_state(true);
        let created = create(&state, "Стаття 4. Сесія триває два тижні.").await;
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["status"], "completed");
        assert_eq!(created["chunk_count"], 1);

        let (status, list) = send(create_router(state.clone()), "GET", "/api/documents?limit=10", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["total"], 1);
        assert_eq!(list["limit"], 10);
        assert_eq!(list["items"][0]["chunk_count"], 1);

        let (_, detail) = send(create_router(state.clone()), "GET", &format!("/api/documents/{id}"), None).await;
        assert_eq!(detail["chunks_preview"][0]["article_number"], "Стаття 4");

        let (status, updated) = send(
            create_router(state.clone()),
            "PUT",
            &format!("/api/documents/{id}"),
            Some(json!({ "title": "Положення про сесію" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["title"], "Положення про сесію");

        let (status, reprocess) = send(
            create_router(state.clone()),
            "POST",
            &format!("/api/documents/{id}/reprocess"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{reprocess}");

        let (status, deleted) = send(create_router(state.clone()), "DELETE", &format!("/api/documents/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted, json!({ "status": "deleted", "deleted_chunks": 1 }));

        let (status, _) = send(create_router(state), "GET", &format!("/api/documents/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_requires_content_for_url() {
        let state = test_state(true);
        let (status, _) = send(
            create_router(state),
            "POST",
            "/api/documents",
            Some(json!({ "title": "Наказ", "url": "https://sumdu.edu.ua/nakaz" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

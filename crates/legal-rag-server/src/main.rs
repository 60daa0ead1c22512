//! HTTP surface for the legal question-answering engine (§6): `POST
//! /query` streams an SSE response driven by the orchestrator's event
//! channel, `GET /health` reports liveness, `GET /stats` exposes a
//! request counter, and `POST /admin/reload` is gated behind the
//! configured API key. Grounded on the teacher's `discord_http_server.rs`
//! Router/AppState/CORS wiring.

mod sse;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use legal_rag::config::AppConfig;
use legal_rag::embeddings::e5::{E5Config, E5Embeddings};
use legal_rag::embeddings::EmbeddingModel;
use legal_rag::llm::ExternalLlm;
use legal_rag::rag::{Orchestrator, OrchestratorDeps};
use legal_rag::reranking::CrossEncoderReranker;
use legal_rag::search::TextSearch;
use legal_rag::storage::{LanceVectorStore, ParentStore, VectorStore};
use legal_rag::types::QueryEnvelope;

use state::AppState;

#[derive(Debug, Deserialize)]
struct QueryRequest {
    question: String,
    #[serde(default)]
    mode: legal_rag::types::ResponseMode,
    #[serde(default)]
    history: Vec<legal_rag::types::HistoryTurn>,
    #[serde(default = "default_k")]
    k: usize,
    #[serde(default)]
    filter: Option<std::collections::HashMap<String, String>>,
}

fn default_k() -> usize {
    10
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    requests_served: u64,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        requests_served: state.requests_served(),
    })
}

async fn admin_reload(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, StatusCode> {
    let provided = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    match &state.config.api_key {
        Some(expected) if expected == provided => {
            tracing::info!("admin reload requested");
            Ok(StatusCode::NO_CONTENT)
        }
        Some(_) => Err(StatusCode::UNAUTHORIZED),
        None => Err(StatusCode::FORBIDDEN),
    }
}

async fn query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<QueryRequest>,
) -> impl IntoResponse {
    let request_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    state.mark_request_served();

    let envelope = QueryEnvelope {
        question: body.question,
        mode: body.mode,
        history: body.history,
        k: body.k,
        filter: body.filter,
    };

    let cancel = state.cancellation_child();
    let events = state.orchestrator.run(envelope, request_id.clone(), cancel);

    let mut response_headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response_headers.insert("x-request-id", value);
    }

    let sse = Sse::new(sse::event_stream(events)).keep_alive(KeepAlive::default());
    (response_headers, sse)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "legal_rag_server=info,legal_rag=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!("configuration loaded, building pipeline dependencies");

    let vector_store: Arc<dyn VectorStore> = Arc::new(
        LanceVectorStore::new(
            config.chromadb_path.to_string_lossy().as_ref(),
            config.expected_embedding_dim,
        )
        .await?,
    );

    let text_search = match TextSearch::new(config.bm25_index_path.to_string_lossy().as_ref()) {
        Ok(ts) => Some(Arc::new(ts)),
        Err(e) => {
            tracing::warn!(error = %e, "lexical index unavailable, BM25 leg disabled");
            None
        }
    };

    let parent_store = Some(Arc::new(ParentStore::new(config.parent_store_path.clone())));

    let embedding_model_dir =
        std::env::var("EMBEDDING_MODEL_DIR").unwrap_or_else(|_| "./models/embeddings".to_string());
    let embedder: Arc<dyn EmbeddingModel> = {
        let e5_config = E5Config::auto_detect(std::path::Path::new(&embedding_model_dir))
            .ok_or_else(|| anyhow::anyhow!("no embedding model found under {embedding_model_dir}"))?;
        Arc::new(E5Embeddings::new(e5_config)?)
    };

    let reranker = if config.reranking_enabled {
        let reranker_model_dir = std::env::var("RERANKER_MODEL_DIR")
            .unwrap_or_else(|_| "./models/reranker".to_string());
        match CrossEncoderReranker::new(std::path::Path::new(&reranker_model_dir)) {
            Ok(r) => Some(Arc::new(r)),
            Err(e) => {
                tracing::warn!(error = %e, "cross-encoder reranker unavailable, rerank stage disabled");
                None
            }
        }
    } else {
        None
    };

    let llm_model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "default".to_string());
    let llm = Arc::new(ExternalLlm::new(
        config.llm_base_url.clone(),
        llm_model,
        config.llm_timeout,
    )?);

    let deps = OrchestratorDeps {
        config: config.clone(),
        vector_store,
        text_search,
        parent_store,
        embedder,
        reranker,
        llm,
    };

    let state = AppState::new(Arc::new(Orchestrator::new(deps)), config.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/query", post(query))
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .route("/admin/reload", post(admin_reload))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = std::env::var("LISTEN_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8787".to_string())
        .parse()?;
    tracing::info!(%addr, "legal-rag-server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

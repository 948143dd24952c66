use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};

use eeportal::answer::{AskOptions, Portal};
use eeportal::chunker::Chunk;
use eeportal::embedder::openai::OpenAiEmbedder;
use eeportal::embedder::TextEmbedder;
use eeportal::feedback::{FeedbackLog, FeedbackRecord};
use eeportal::glossary::{Glossary, GlossaryEntry};
use eeportal::prompt::Language;
use eeportal::providers::{AnthropicProvider, LlmProvider, OpenAiProvider};
use eeportal::retriever::ScoredChunk;
use eeportal::retriever::VectorIndex;
use eeportal::sources::{CONTEXT_INDEX, RULES_INDEX};

#[derive(Parser, Debug)]
#[command(
    name = "eeportal-api",
    about = "HTTP portal serving retrieval-grounded answers over the rule indexes"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port)
    #[arg(long, env = "EEPORTAL_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Directory holding the index artifact triples
    #[arg(long, env = "EEPORTAL_INDEX_DIR", default_value = "data/index")]
    index_dir: PathBuf,

    /// Glossary JSON file; served empty when the file is absent
    #[arg(long, env = "EEPORTAL_GLOSSARY", default_value = "data/glossary.json")]
    glossary: PathBuf,

    /// Feedback JSONL file appended to by the feedback route
    #[arg(long, env = "EEPORTAL_FEEDBACK", default_value = "data/feedback.jsonl")]
    feedback: PathBuf,

    /// API key for embeddings and the OpenAI answer model
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Embedding model identifier (must match the built indexes)
    #[arg(
        long,
        env = "EEPORTAL_EMBED_MODEL",
        default_value = "text-embedding-3-small"
    )]
    embed_model: String,

    /// Optional embedding dimension override
    #[arg(long, env = "EEPORTAL_EMBED_DIMENSIONS")]
    embed_dimensions: Option<usize>,

    /// Base URL for the OpenAI-compatible embedding API
    #[arg(
        long,
        env = "EEPORTAL_EMBED_BASE",
        default_value = "https://api.openai.com/v1"
    )]
    embed_base_url: String,

    /// Seconds before embedding requests time out
    #[arg(long, env = "EEPORTAL_EMBED_TIMEOUT_SECS", default_value_t = 30)]
    embed_timeout_secs: u64,

    /// Retry attempts for transient embedding errors
    #[arg(long, env = "EEPORTAL_EMBED_MAX_RETRIES", default_value_t = 5)]
    max_retries: usize,

    /// Max cached query embeddings kept in memory (0 disables caching)
    #[arg(long, default_value_t = 1024)]
    embedding_cache_size: usize,

    /// Default rule passages retrieved per question
    #[arg(long, default_value_t = 6)]
    default_k_rules: usize,

    /// Default context passages retrieved per question
    #[arg(long, default_value_t = 3)]
    default_k_context: usize,

    /// Maximum passages allowed per request
    #[arg(long, default_value_t = 12)]
    max_top_k: usize,

    /// Target LLM provider (openai or anthropic)
    #[arg(long, env = "EEPORTAL_LLM_PROVIDER", default_value = "openai")]
    llm_provider: String,

    /// OpenAI chat model used for synthesis
    #[arg(long, env = "EEPORTAL_CHAT_MODEL", default_value = "gpt-4.1-mini")]
    chat_model: String,

    /// Anthropic API key (required when --llm-provider anthropic)
    #[arg(long, env = "ANTHROPIC_API_KEY")]
    anthropic_api_key: Option<String>,

    /// Anthropic model identifier
    #[arg(
        long,
        env = "EEPORTAL_ANTHROPIC_MODEL",
        default_value = "claude-3-sonnet-20240229"
    )]
    anthropic_model: String,

    /// Sampling temperature for the answer model
    #[arg(long, default_value_t = 0.2)]
    temperature: f32,

    /// Maximum tokens to request from the answer model
    #[arg(long, default_value_t = 400)]
    max_completion_tokens: usize,
}

#[derive(Clone)]
struct AppState {
    portal: Arc<Portal>,
    provider: Arc<dyn LlmProvider>,
    feedback: Arc<FeedbackLog>,
    default_k_rules: usize,
    default_k_context: usize,
    max_top_k: usize,
    temperature: f32,
    max_completion_tokens: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ApiCli::parse();

    let embedder: Arc<dyn TextEmbedder> = Arc::new(OpenAiEmbedder::new(
        cli.openai_api_key.clone(),
        cli.embed_base_url,
        cli.embed_model,
        cli.embed_dimensions,
        Duration::from_secs(cli.embed_timeout_secs.max(1)),
        cli.max_retries.max(1),
        1,
    )?);

    let rules = VectorIndex::open(&cli.index_dir, RULES_INDEX, embedder.clone())?;
    let context = VectorIndex::open(&cli.index_dir, CONTEXT_INDEX, embedder)?;
    eprintln!(
        "loaded indexes: {} ({} chunks), {} ({} chunks)",
        rules.name(),
        rules.len(),
        context.name(),
        context.len()
    );

    let glossary = if cli.glossary.exists() {
        Glossary::load(&cli.glossary)?
    } else {
        eprintln!("no glossary at {:?}; serving an empty one", cli.glossary);
        Glossary::empty()
    };

    let portal = Portal::new(rules, context, glossary, cli.embedding_cache_size)?;

    let provider: Arc<dyn LlmProvider> = match cli.llm_provider.to_lowercase().as_str() {
        "openai" => Arc::new(OpenAiProvider::new(cli.openai_api_key, cli.chat_model)?),
        "anthropic" => {
            let key = cli.anthropic_api_key.clone().unwrap_or_default();
            Arc::new(AnthropicProvider::new(key, cli.anthropic_model)?)
        }
        other => anyhow::bail!("unsupported llm provider '{}'; use openai or anthropic", other),
    };

    let state = AppState {
        portal: Arc::new(portal),
        provider,
        feedback: Arc::new(FeedbackLog::new(cli.feedback)),
        default_k_rules: cli.default_k_rules.max(1),
        default_k_context: cli.default_k_context,
        max_top_k: cli.max_top_k.max(1),
        temperature: cli.temperature,
        max_completion_tokens: cli.max_completion_tokens.max(1),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/ask", post(ask_handler))
        .route("/v1/retrieve", post(retrieve_handler))
        .route("/v1/rules/chunks", get(browse_rules_handler))
        .route("/v1/context/chunks", get(browse_context_handler))
        .route("/v1/glossary", get(glossary_handler))
        .route("/v1/feedback", post(feedback_handler))
        .with_state(state);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    println!("eeportal-api listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .await
        .context("server shutdown")?;
    Ok(())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default = "default_language")]
    language: Language,
    #[serde(default)]
    include_program_context: bool,
    #[serde(default)]
    k_rules: Option<usize>,
    #[serde(default)]
    k_context: Option<usize>,
}

fn default_language() -> Language {
    Language::English
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    advisory: Option<String>,
    citation_gated: bool,
    completion_failed: bool,
    rule_passages: Vec<ScoredChunk>,
    context_passages: Vec<ScoredChunk>,
    meta: ResponseMeta,
}

#[derive(Serialize)]
struct ResponseMeta {
    latency_ms: f64,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

type HandlerError = (StatusCode, Json<ErrorBody>);

async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, HandlerError> {
    if request.question.trim().is_empty() {
        return Err(bad_request("question text must not be empty"));
    }
    let options = AskOptions {
        language: request.language,
        include_program_context: request.include_program_context,
        k_rules: request
            .k_rules
            .unwrap_or(state.default_k_rules)
            .clamp(1, state.max_top_k),
        k_context: request
            .k_context
            .unwrap_or(state.default_k_context)
            .min(state.max_top_k),
        temperature: state.temperature,
        max_completion_tokens: state.max_completion_tokens,
    };
    let start = Instant::now();
    let portal = state.portal.clone();
    let provider = state.provider.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        portal.ask(provider.as_ref(), &request.question, &options)
    })
    .await
    .map_err(join_error)?
    .map_err(internal_error)?;

    Ok(Json(AskResponse {
        answer: outcome.answer,
        advisory: outcome.advisory,
        citation_gated: outcome.citation_gated,
        completion_failed: outcome.completion_failed,
        rule_passages: outcome.rule_hits,
        context_passages: outcome.context_hits,
        meta: ResponseMeta {
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        },
    }))
}

#[derive(Debug, Deserialize)]
struct RetrieveRequest {
    corpus: Corpus,
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Corpus {
    Rules,
    Context,
}

#[derive(Serialize)]
struct RetrieveResponse {
    chunks: Vec<ScoredChunk>,
    meta: ResponseMeta,
}

async fn retrieve_handler(
    State(state): State<AppState>,
    Json(request): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, HandlerError> {
    if request.query.trim().is_empty() {
        return Err(bad_request("query text must not be empty"));
    }
    let top_k = request
        .top_k
        .unwrap_or(state.default_k_rules)
        .min(state.max_top_k);
    let start = Instant::now();
    let portal = state.portal.clone();
    let chunks = tokio::task::spawn_blocking(move || match request.corpus {
        Corpus::Rules => portal.retrieve_rules(&request.query, top_k),
        Corpus::Context => portal.retrieve_context(&request.query, top_k),
    })
    .await
    .map_err(join_error)?
    .map_err(internal_error)?;

    Ok(Json(RetrieveResponse {
        chunks,
        meta: ResponseMeta {
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        },
    }))
}

#[derive(Debug, Deserialize)]
struct BrowseParams {
    #[serde(default)]
    rule_id: Option<String>,
    #[serde(default)]
    q: Option<String>,
}

#[derive(Serialize)]
struct BrowseResponse {
    chunks: Vec<Chunk>,
}

async fn browse_rules_handler(
    State(state): State<AppState>,
    Query(params): Query<BrowseParams>,
) -> Json<BrowseResponse> {
    let chunks = state
        .portal
        .browse_rules(params.rule_id.as_deref(), params.q.as_deref())
        .into_iter()
        .cloned()
        .collect();
    Json(BrowseResponse { chunks })
}

async fn browse_context_handler(
    State(state): State<AppState>,
    Query(params): Query<BrowseParams>,
) -> Json<BrowseResponse> {
    let chunks = state
        .portal
        .browse_context(params.q.as_deref())
        .into_iter()
        .cloned()
        .collect();
    Json(BrowseResponse { chunks })
}

#[derive(Debug, Deserialize)]
struct GlossaryParams {
    #[serde(default)]
    q: Option<String>,
}

#[derive(Serialize)]
struct GlossaryResponse {
    entries: Vec<GlossaryEntry>,
}

async fn glossary_handler(
    State(state): State<AppState>,
    Query(params): Query<GlossaryParams>,
) -> Json<GlossaryResponse> {
    let glossary = state.portal.glossary();
    let entries = match params.q.as_deref() {
        Some(needle) => glossary.search(needle).into_iter().cloned().collect(),
        None => glossary.entries().to_vec(),
    };
    Json(GlossaryResponse { entries })
}

async fn feedback_handler(
    State(state): State<AppState>,
    Json(record): Json<FeedbackRecord>,
) -> Result<StatusCode, HandlerError> {
    let feedback = state.feedback.clone();
    tokio::task::spawn_blocking(move || feedback.append(&record))
        .await
        .map_err(join_error)?
        .map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

fn bad_request(message: impl Into<String>) -> HandlerError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            message: message.into(),
        }),
    )
}

fn internal_error(err: anyhow::Error) -> HandlerError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: err.to_string(),
        }),
    )
}

fn join_error(err: tokio::task::JoinError) -> HandlerError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            message: format!("worker task failed: {err}"),
        }),
    )
}

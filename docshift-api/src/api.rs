use crate::download;
use crate::error::AppError;
use crate::ingest::ingest;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, MethodRouter},
    Json, Router,
};
use chrono::{DateTime, Utc};
use docshift::{
    package, preview, ConversionJob, ConversionRequest, ConvertError, Dispatcher, ImageFormat, JobState, Operation,
    PreviewKind, ResultStore, ServiceConfig,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{field, info, Instrument, Span};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<ServiceConfig>,
    dispatcher: Arc<Dispatcher>,
    results: Arc<ResultStore>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl AppState {
    /// Validates `config` and opens the result store under its scratch root.
    pub async fn new(config: ServiceConfig) -> Result<Self, ConvertError> {
        config.validate()?;
        let results = ResultStore::open(config.results_dir(), config.result_ttl).await?;
        Ok(Self {
            dispatcher: Arc::new(Dispatcher::new(config.clone())),
            config: Arc::new(config),
            results: Arc::new(results),
            started_at: Utc::now(),
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn results(&self) -> &Arc<ResultStore> {
        &self.results
    }
}

/// Response for the health check endpoint
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
}

/// Query string accepted by every conversion route
#[derive(Debug, Default, Deserialize)]
pub struct ConvertQuery {
    /// Park the result and return a download token instead of the file
    #[serde(default)]
    pub handoff: bool,
}

/// Build the application router with all routes configured
pub fn app(state: AppState) -> Router {
    let body_limit = state.config.request_body_limit;
    Router::new()
        .route("/api/health", get(health_check))
        // PDF operations
        .route("/api/merge-pdf", convert_route(Operation::Merge))
        .route("/api/compress-pdf", convert_route(Operation::Compress))
        .route("/api/pdf-to-jpg", convert_route(Operation::PdfToImage(ImageFormat::Jpeg)))
        .route("/api/pdf-to-png", convert_route(Operation::PdfToImage(ImageFormat::Png)))
        .route("/api/pdf-to-word", convert_route(Operation::PdfToWord))
        // Images and office documents
        .route("/api/image-to-pdf", convert_route(Operation::ImageToPdf))
        .route("/api/convert/{conversion}", post(image_conversion))
        .route("/api/word-to-pdf", convert_route(Operation::OfficeToPdf))
        // Previews
        .route("/api/preview/pdf", preview_route(PreviewKind::Pdf))
        .route("/api/preview/word", preview_route(PreviewKind::Word))
        .route("/api/preview/image", preview_route(PreviewKind::Image))
        // Result handoff
        .route("/api/results/{token}", get(fetch_result))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn convert_route(operation: Operation) -> MethodRouter<AppState> {
    post(
        move |State(state): State<AppState>, Query(query): Query<ConvertQuery>, multipart: Multipart| async move {
            run_conversion(state, operation, query, multipart).await
        },
    )
}

fn preview_route(kind: PreviewKind) -> MethodRouter<AppState> {
    post(move |State(state): State<AppState>, multipart: Multipart| async move {
        run_preview(state, kind, multipart).await
    })
}

/// Health check endpoint for monitoring and load balancing
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "docshift API".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        started_at: state.started_at,
    })
}

/// `POST /api/convert/{from}-to-{to}`
async fn image_conversion(
    State(state): State<AppState>,
    Path(conversion): Path<String>,
    Query(query): Query<ConvertQuery>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let operation = Operation::image_conversion(&conversion)?;
    run_conversion(state, operation, query, multipart).await
}

async fn run_conversion(
    state: AppState,
    operation: Operation,
    query: ConvertQuery,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let span = tracing::info_span!("job", id = field::Empty, operation = %operation);
    conversion_pipeline(state, operation, query, multipart)
        .instrument(span)
        .await
}

/// The whole job pipeline: ingest, validate, convert, package, respond.
///
/// Every early return drops `job`, which sweeps its scratch directory. On
/// success the job moves into the response body and is swept when the
/// download finishes.
async fn conversion_pipeline(
    state: AppState,
    operation: Operation,
    query: ConvertQuery,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let mut job = ConversionJob::create(&state.config.scratch_root, operation).await?;
    Span::current().record("id", field::display(job.id()));

    let fields = ingest(&mut job, multipart, &operation.limits(&state.config)).await?;
    state.dispatcher.validate(&mut job)?;
    let request = ConversionRequest::from_fields(operation, &fields)?;
    job.set_options(fields);

    let report = state.dispatcher.convert(&mut job, &request).await?;
    let packaged = package(&mut job).await?;
    job.advance(JobState::Responding)?;

    if query.handoff {
        let ticket = state.results.store(&packaged).await?;
        job.finish().await;
        info!(token = %ticket.token, size = ticket.size, "result handed off");
        return Ok((StatusCode::CREATED, Json(ticket)).into_response());
    }

    info!(file = %packaged.download_name, size = packaged.size, "streaming result");
    download::job_response(job, &packaged, &report.headers).await
}

async fn run_preview(state: AppState, kind: PreviewKind, multipart: Multipart) -> Result<Response, AppError> {
    let operation = Operation::Preview(kind);
    let span = tracing::info_span!("job", id = field::Empty, operation = %operation);
    preview_pipeline(state, operation, multipart).instrument(span).await
}

async fn preview_pipeline(state: AppState, operation: Operation, multipart: Multipart) -> Result<Response, AppError> {
    let mut job = ConversionJob::create(&state.config.scratch_root, operation).await?;
    Span::current().record("id", field::display(job.id()));

    ingest(&mut job, multipart, &operation.limits(&state.config)).await?;
    state.dispatcher.validate(&mut job)?;
    let preview = preview(&mut job).await?;
    job.finish().await;
    Ok(Json(preview).into_response())
}

/// `GET /api/results/{token}`: one-shot download of a handed-off result.
async fn fetch_result(State(state): State<AppState>, Path(token): Path<String>) -> Result<Response, AppError> {
    let stored = state
        .results
        .take(&token)
        .await
        .ok_or_else(|| AppError::NotFound("Result not found or expired".to_string()))?;

    let path = stored.path.clone();
    let content_type = stored.content_type.clone();
    let file_name = stored.file_name.clone();
    download::stream_file(&path, &content_type, &file_name, &[], stored).await
}

/// Periodically drops handed-off results nobody collected.
pub fn spawn_result_sweeper(results: Arc<ResultStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            results.sweep_expired().await;
        }
    })
}

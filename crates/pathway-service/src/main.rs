use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use pathway_api::{PathwayApi, PathwayConfig, SchemaStatus, API_CONTRACT_VERSION};
use pathway_core::{
    BundleMetadata, EvaluationReport, PathwayError, RecommendationPackage, RecommendationRequest,
    ServingContext, StudentProfile, TrainingSummary,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");
const NOT_READY: &str = "serving context is not ready";

#[derive(Debug, Clone)]
struct ServiceState {
    api: PathwayApi,
    context: Arc<OnceLock<ServingContext>>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error_kind: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    ready: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct EvaluationRequest {
    profiles: Vec<StudentProfile>,
    #[serde(default)]
    top_n: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
struct ModelResponse {
    bundle: BundleMetadata,
    summary: TrainingSummary,
    catalog_resources: usize,
}

#[derive(Debug, Parser)]
#[command(name = "pathway-service")]
#[command(about = "Local HTTP service for Pathway recommendations")]
struct Args {
    #[arg(long, default_value = "./pathway.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// YAML file with `engine` and `training` settings.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl ServiceError {
    fn new(status: StatusCode, error_kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error_kind,
            error: message.into(),
        }
    }

    fn not_ready() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "not_ready", NOT_READY)
    }

    fn from_domain(err: &PathwayError) -> Self {
        let status = match err {
            PathwayError::Validation(_) | PathwayError::Dimension(_) => StatusCode::BAD_REQUEST,
            PathwayError::Schema(_) | PathwayError::Quality(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.kind(), err.to_string())
    }

    fn from_anyhow(err: &anyhow::Error) -> Self {
        match err.chain().find_map(|cause| cause.downcast_ref::<PathwayError>()) {
            Some(domain) => {
                let mut mapped = Self::from_domain(domain);
                mapped.error = format!("{err:#}");
                mapped
            }
            None => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", format!("{err:#}")),
        }
    }
}

impl ServiceState {
    fn new(api: PathwayApi) -> Self {
        Self { api, context: Arc::new(OnceLock::new()) }
    }

    fn ready_context(&self) -> Result<&ServingContext, ServiceError> {
        self.context.get().ok_or_else(ServiceError::not_ready)
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/db/schema-version", post(db_schema_version))
        .route("/v1/model", get(model))
        .route("/v1/recommend", post(recommend))
        .route("/v1/evaluate", post(evaluate))
        .with_state(state)
}

/// Load the catalog and latest bundle and publish them to request handlers.
fn warm_up(state: &ServiceState) -> Result<()> {
    let context = state.api.load_serving_context()?;
    let bundle_id = context.bundle().metadata.bundle_id.clone();
    let resources = context.catalog_len();
    if state.context.set(context).is_err() {
        tracing::warn!("serving context was already published");
        return Ok(());
    }
    tracing::info!(bundle_id = bundle_id.as_str(), resources, "serving context published");
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match &args.config {
        Some(path) => PathwayConfig::from_path(path)?,
        None => PathwayConfig::default(),
    };
    let state = ServiceState::new(PathwayApi::with_config(args.db, config));
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "pathway service listening");

    let warm_state = state.clone();
    tokio::task::spawn_blocking(move || {
        if let Err(err) = warm_up(&warm_state) {
            tracing::error!(error = %format!("{err:#}"), "failed to load serving context");
            std::process::exit(1);
        }
    });

    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health(State(state): State<ServiceState>) -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok", ready: state.context.get().is_some() }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn db_schema_version(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<SchemaStatus>>, ServiceError> {
    let status = state.api.schema_status().map_err(|err| ServiceError::from_anyhow(&err))?;
    Ok(Json(envelope(status)))
}

async fn model(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<ModelResponse>>, ServiceError> {
    let context = state.ready_context()?;
    let bundle = context.bundle();
    Ok(Json(envelope(ModelResponse {
        bundle: bundle.metadata.clone(),
        summary: bundle.summary(),
        catalog_resources: context.catalog_len(),
    })))
}

async fn recommend(
    State(state): State<ServiceState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<ServiceEnvelope<RecommendationPackage>>, ServiceError> {
    state.ready_context()?;
    let request = serde_json::from_value::<RecommendationRequest>(body).map_err(|err| {
        ServiceError::new(StatusCode::BAD_REQUEST, "validation", format!("invalid request: {err}"))
    })?;
    let context = Arc::clone(&state.context);
    let outcome = tokio::task::spawn_blocking(move || {
        context.get().map(|context| context.recommend(&request))
    })
    .await
    .map_err(|err| {
        ServiceError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
    })?;

    match outcome {
        Some(Ok(package)) => Ok(Json(envelope(package))),
        Some(Err(err)) => Err(ServiceError::from_domain(&err)),
        None => Err(ServiceError::not_ready()),
    }
}

async fn evaluate(
    State(state): State<ServiceState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<ServiceEnvelope<EvaluationReport>>, ServiceError> {
    state.ready_context()?;
    let request = serde_json::from_value::<EvaluationRequest>(body).map_err(|err| {
        ServiceError::new(StatusCode::BAD_REQUEST, "validation", format!("invalid request: {err}"))
    })?;
    let context = Arc::clone(&state.context);
    let outcome = tokio::task::spawn_blocking(move || {
        context.get().map(|context| context.evaluate(&request.profiles, request.top_n))
    })
    .await
    .map_err(|err| {
        ServiceError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
    })?;

    match outcome {
        Some(Ok(report)) => Ok(Json(envelope(report))),
        Some(Err(err)) => Err(ServiceError::from_domain(&err)),
        None => Err(ServiceError::not_ready()),
    }
}

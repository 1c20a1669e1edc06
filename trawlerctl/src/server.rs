//! HTTP control surface: configuration CRUD, account and settings
//! management, on-demand scrape jobs, and scraped-data reads.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::FutureExt;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use trawler_core::model::{PoolSettings, StoredConfig};
use trawler_core::store::{ItemQuery, NewConfig, StoreError};
use trawler_core::{
    BrowserPool, ChromiumBackend, CronRegistry, JobError, PoolOptions, ScheduleError, ScrapeEngine,
    TriggerRunner,
};

use crate::{AppContext, Result};

#[derive(Clone)]
pub struct AppState {
    engine: ScrapeEngine,
    registry: Arc<CronRegistry>,
    runner: TriggerRunner,
}

/// Boots the pool and cron registry, then serves the API until ctrl-c.
pub async fn serve(context: AppContext) -> Result<()> {
    let AppContext {
        config,
        store,
        vault,
    } = context;

    let settings = store.load_pool_settings()?;
    let options = PoolOptions::from_section(&config.pool).with_settings(&settings);
    let backend = ChromiumBackend::new(config.chromium.clone());
    let pool = Arc::new(BrowserPool::new(backend, options));
    pool.initialize().await?;

    let engine = ScrapeEngine::new(
        Arc::clone(&pool),
        store.clone(),
        vault,
        config.scraping.clone(),
        config.screenshots_dir(),
    );
    let registry = Arc::new(CronRegistry::new());
    let runner = job_runner(engine.clone());
    registry.sync_all(&store, runner.clone()).await?;

    let state = AppState {
        engine,
        registry: Arc::clone(&registry),
        runner,
    };
    let mut router = api_router().with_state(state);
    if config.server.cors_permissive {
        router = router.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.server.bind_addr, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "engine API listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down");
    registry.stop_all().await;
    pool.shutdown().await?;
    Ok(())
}

fn api_router() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/configurations", get(list_configs).post(create_config))
        .route(
            "/api/configurations/:id",
            get(get_config).put(update_config).delete(delete_config),
        )
        .route(
            "/api/engine-settings",
            get(get_settings).put(put_settings),
        )
        .route("/api/accounts", get(list_accounts).post(add_account))
        .route("/api/scrape-jobs/:id/run", post(run_job))
        .route("/api/scrape-jobs/run-multiple", post(run_jobs))
        .route("/api/scraped-data", get(list_items))
        .route("/api/scraped-data/:id", get(get_item))
        .route("/api/pool/stats", get(pool_stats))
        .route("/api/cron/status", get(cron_status))
}

fn job_runner(engine: ScrapeEngine) -> TriggerRunner {
    Arc::new(move |config: StoredConfig| {
        let engine = engine.clone();
        async move {
            if let Err(err) = engine.run_config(&config).await {
                warn!(config = %config.name, error = %err, "scheduled run failed");
            }
        }
        .boxed()
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
}

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let status = match &err {
            StoreError::Validation(_) => StatusCode::BAD_REQUEST,
            StoreError::NotFound(_) => StatusCode::NOT_FOUND,
            StoreError::DuplicateName(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        let status = match &err {
            JobError::UnknownConfig(_) => StatusCode::NOT_FOUND,
            JobError::Store(StoreError::Validation(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        let status = match &err {
            ScheduleError::Invalid { .. } => StatusCode::BAD_REQUEST,
            ScheduleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn list_configs(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.store().list_configs()?))
}

async fn create_config(
    State(state): State<AppState>,
    Json(payload): Json<NewConfig>,
) -> ApiResult<impl IntoResponse> {
    let created = state.engine.store().create_config(&payload)?;
    state
        .registry
        .sync(&created, state.engine.store().clone(), state.runner.clone())
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_config(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let config = state
        .engine
        .store()
        .get_config(id)?
        .ok_or_else(|| ApiError::not_found(format!("configuration {id} not found")))?;
    Ok(Json(config))
}

async fn update_config(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<NewConfig>,
) -> ApiResult<impl IntoResponse> {
    let updated = state.engine.store().update_config(id, &payload)?;
    state
        .registry
        .sync(&updated, state.engine.store().clone(), state.runner.clone())
        .await?;
    Ok(Json(updated))
}

async fn delete_config(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    state.registry.remove(id).await;
    state.engine.store().delete_config(id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_settings(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.store().load_pool_settings()?))
}

/// Persisted immediately; pool sizing takes effect on the next boot.
async fn put_settings(
    State(state): State<AppState>,
    Json(payload): Json<PoolSettings>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.store().save_pool_settings(&payload)?))
}

#[derive(Debug, Deserialize)]
struct AccountPayload {
    platform: String,
    username: String,
    password: String,
}

async fn list_accounts(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.engine.store().list_accounts()?))
}

async fn add_account(
    State(state): State<AppState>,
    Json(payload): Json<AccountPayload>,
) -> ApiResult<impl IntoResponse> {
    let account = state.engine.store().add_account(
        state.engine.vault(),
        &payload.platform,
        &payload.username,
        &payload.password,
    )?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// Accepts immediately; completion is observable via logs and stored items.
async fn run_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let config = state.engine.resolve_config(&id)?;
    let name = config.name.clone();
    let engine = state.engine.clone();
    tokio::spawn(async move {
        match engine.run_config(&config).await {
            Ok(outcome) => {
                info!(config = %config.name, saved = outcome.saved_count, "background run finished")
            }
            Err(err) => warn!(config = %config.name, error = %err, "background run failed"),
        }
    });
    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": name }))))
}

#[derive(Debug, Deserialize)]
struct RunManyRequest {
    configs: Vec<String>,
}

/// Resolves every name up front, then runs in the background.
async fn run_jobs(
    State(state): State<AppState>,
    Json(payload): Json<RunManyRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut configs = Vec::with_capacity(payload.configs.len());
    for name_or_id in &payload.configs {
        configs.push(state.engine.resolve_config(name_or_id)?);
    }
    let accepted: Vec<String> = configs.iter().map(|config| config.name.clone()).collect();

    let engine = state.engine.clone();
    tokio::spawn(async move {
        let summaries = engine.run_many(&configs).await;
        for (name, summary) in &summaries {
            if summary.success {
                info!(config = %name, items = summary.results_count, "background run finished");
            } else {
                warn!(config = %name, message = %summary.message, "background run failed");
            }
        }
    });
    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": accepted }))))
}

#[derive(Debug, Deserialize)]
struct ItemsQueryParams {
    config_id: Option<i64>,
    page: Option<usize>,
    limit: Option<usize>,
    /// "asc" for oldest first; anything else keeps newest first.
    order: Option<String>,
}

async fn list_items(
    State(state): State<AppState>,
    Query(params): Query<ItemsQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let defaults = ItemQuery::default();
    let query = ItemQuery {
        config_id: params.config_id,
        page: params.page.unwrap_or(defaults.page),
        limit: params.limit.unwrap_or(defaults.limit),
        newest_first: params.order.as_deref() != Some("asc"),
    };
    Ok(Json(state.engine.store().list_items(&query)?))
}

async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let item = state
        .engine
        .store()
        .get_item(id)?
        .ok_or_else(|| ApiError::not_found(format!("scraped item {id} not found")))?;
    Ok(Json(item))
}

async fn pool_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.pool().stats().await)
}

async fn cron_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.status().await)
}

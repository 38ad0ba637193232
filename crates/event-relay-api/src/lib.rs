//! # Event Relay HTTP Service
//!
//! HTTP surface of the relay:
//! - signed webhook intake that acknowledges before dispatch happens
//! - GA4 connection and validation endpoints
//! - read-only statistics, events and stores listings for the dashboard
//! - manual retry of a stored event
//! - health and Prometheus metrics

pub mod config;
pub mod errors;
pub mod metrics;
pub mod responses;

pub use config::{
    ConfigError, DispatchSettings, LoggingConfig, SecurityConfig, ServerConfig, ServiceConfig,
    WebhookConfig,
};
pub use errors::{ApiError, ServiceError};
pub use metrics::ServiceMetrics;

use axum::{
    extract::{DefaultBodyLimit, MatchedPath, Path, Query, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use event_relay_core::{
    dispatch::ga4::connection_test_payload, status_counts, AnalyticsSink, DispatchOutcome,
    DispatchQueue, DispatchWorkers, Dispatcher, EventFilter, EventRecord, EventRepository,
    Ga4Credentials, Ga4Settings, HmacSignatureVerifier, IngestError, IngestOutcome,
    IngestionPipeline, RecordId, SinkSettingsRepository, SortOrder, TenantGate, TenantRepository,
    Timestamp, TokenCipher, WebhookHeaders, WebhookRequest,
};
use metrics::webhook_result;
use responses::{
    required_param, DataResponse, EventsQuery, Ga4ConnectRequest, Ga4ConnectResponse,
    Ga4SettingsView, HealthResponse, RetryResponse, StatsQuery, StatsResponse, StoreView,
    WebhookAck, STORE_LIST_LIMIT,
};
use serde::de::DeserializeOwned;
use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, instrument, warn};

// ============================================================================
// Application State
// ============================================================================

/// Repository handles shared by the handlers and the dispatcher
#[derive(Clone)]
pub struct Repositories {
    pub events: Arc<dyn EventRepository>,
    pub tenants: Arc<dyn TenantRepository>,
    pub settings: Arc<dyn SinkSettingsRepository>,
}

impl Repositories {
    /// Use one store for every table.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: EventRepository + TenantRepository + SinkSettingsRepository + 'static,
    {
        Self {
            events: store.clone(),
            tenants: store.clone(),
            settings: store,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: ServiceConfig,
    pub pipeline: IngestionPipeline,
    pub dispatcher: Arc<Dispatcher>,
    pub repositories: Repositories,
    pub sink: Arc<dyn AnalyticsSink>,
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    pub fn new(
        config: ServiceConfig,
        pipeline: IngestionPipeline,
        dispatcher: Arc<Dispatcher>,
        repositories: Repositories,
        sink: Arc<dyn AnalyticsSink>,
        metrics: Arc<ServiceMetrics>,
    ) -> Self {
        Self {
            config,
            pipeline,
            dispatcher,
            repositories,
            sink,
            metrics,
        }
    }

    /// Wire the dispatcher, worker pool and ingestion pipeline.
    ///
    /// Spawns the dispatch workers, so this must run inside a Tokio runtime.
    /// The workers exit after every clone of the returned state is dropped.
    pub fn assemble(
        config: ServiceConfig,
        repositories: Repositories,
        sink: Arc<dyn AnalyticsSink>,
        cipher: Arc<dyn TokenCipher>,
        metrics: Arc<ServiceMetrics>,
    ) -> (Self, DispatchWorkers) {
        let dispatcher = Arc::new(Dispatcher::new(
            repositories.events.clone(),
            repositories.tenants.clone(),
            repositories.settings.clone(),
            sink.clone(),
        ));
        let (queue, workers) = DispatchQueue::start(dispatcher.clone(), config.dispatch.pool());

        let pipeline = IngestionPipeline::new(
            Arc::new(HmacSignatureVerifier::new(config.webhook.secret.clone())),
            TenantGate::new(repositories.tenants.clone(), cipher),
            repositories.events.clone(),
            queue,
        )
        .with_authorization_signature(config.webhook.allow_authorization_signature);

        let state = Self::new(config, pipeline, dispatcher, repositories, sink, metrics);
        (state, workers)
    }
}

// ============================================================================
// Router and Server
// ============================================================================

/// Create the HTTP router with all endpoints and middleware
pub fn create_router(state: AppState) -> Router {
    let webhook_routes =
        Router::new().route(&state.config.webhook.endpoint_path, post(handle_webhook));

    let health_routes = Router::new()
        .route("/health", get(handle_health_check))
        .route("/metrics", get(metrics_endpoint));

    let platform_routes = Router::new()
        .route("/platforms/ga4/connect", post(connect_ga4))
        .route("/platforms/ga4/validate", post(validate_ga4))
        .route("/platforms/ga4/retry", post(retry_missing_id))
        .route("/platforms/ga4/retry/", post(retry_missing_id))
        .route("/platforms/ga4/retry/{id}", post(retry_event))
        .route("/platforms/ga4/{store_id}", get(get_ga4_settings))
        .route("/platforms/stats", get(get_stats))
        .route("/platforms/events", get(list_events))
        .route("/platforms/stores", get(list_stores));

    let timeout = Duration::from_secs(state.config.server.timeout_seconds);
    let body_limit = state.config.server.max_body_size;

    Router::new()
        .merge(webhook_routes)
        .merge(health_routes)
        .merge(platform_routes)
        .fallback(route_not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    timeout,
                ))
                .layer(local_cors())
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .into_inner(),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn route_not_found() -> ApiError {
    ApiError::not_found("Route not found")
}

/// Start the HTTP server and serve until `shutdown` resolves.
///
/// In-flight requests complete before this returns.
pub async fn start_server<F>(state: AppState, shutdown: F) -> Result<(), ServiceError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let address = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: address.clone(),
            message: e.to_string(),
        })?;

    info!(address = %address, "Starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })?;

    info!("HTTP server shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

/// CORS for a dashboard served from a local development origin.
///
/// Only `http://localhost` and `http://127.0.0.1` origins are echoed back.
fn local_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            |origin: &HeaderValue, _: &Parts| {
                origin.to_str().map(is_local_origin).unwrap_or(false)
            },
        ))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

fn is_local_origin(origin: &str) -> bool {
    let Some(rest) = origin.strip_prefix("http://") else {
        return false;
    };
    let (host, port) = match rest.split_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (rest, None),
    };

    let host_ok = host == "localhost" || host == "127.0.0.1";
    let port_ok = port.map_or(true, |p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    host_ok && port_ok
}

// ============================================================================
// Webhook Handlers
// ============================================================================

/// Handle a signed webhook.
///
/// Returns as soon as the event is persisted and queued; the dispatch
/// outcome never changes the response.
#[instrument(skip(state, headers, body), fields(body_len = body.len()))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let header_map: HashMap<String, String> = headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_lowercase(),
                v.to_str().unwrap_or("").to_string(),
            )
        })
        .collect();

    let webhook_headers =
        WebhookHeaders::from_http_headers(&header_map, &state.config.webhook.signature_header);
    let request = WebhookRequest::new(webhook_headers, body);

    let result = state.pipeline.ingest(&request).await;
    state
        .metrics
        .set_dispatch_backlog(state.pipeline.queue().backlog());

    match result {
        Ok(IngestOutcome::Accepted { .. }) => {
            state.metrics.record_webhook(webhook_result::ACCEPTED);
            Ok(Json(WebhookAck::received()))
        }
        Ok(IngestOutcome::Deduplicated) => {
            state.metrics.record_webhook(webhook_result::DEDUPLICATED);
            Ok(Json(WebhookAck::deduplicated()))
        }
        Ok(IngestOutcome::Lifecycle { handled }) => {
            state.metrics.record_webhook(webhook_result::LIFECYCLE);
            Ok(Json(WebhookAck::handled(handled)))
        }
        Err(e) => {
            let label = match &e {
                IngestError::Unauthorized => webhook_result::UNAUTHORIZED,
                IngestError::InvalidPayload { .. } => webhook_result::INVALID,
                IngestError::StoreNotActive { .. } => webhook_result::FORBIDDEN,
                IngestError::Storage(_) | IngestError::Cipher(_) => webhook_result::ERROR,
            };
            state.metrics.record_webhook(label);
            warn!(error = %e, result = label, "Webhook rejected");
            Err(e.into())
        }
    }
}

// ============================================================================
// Health and Metrics
// ============================================================================

async fn handle_health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Timestamp::now(),
    })
}

async fn metrics_endpoint(State(state): State<AppState>) -> Result<Response, StatusCode> {
    state
        .metrics
        .set_dispatch_backlog(state.pipeline.queue().backlog());

    let text = state.metrics.render().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    )
        .into_response())
}

// ============================================================================
// GA4 Settings Handlers
// ============================================================================

/// Save GA4 settings without contacting GA4.
#[instrument(skip(state, body))]
async fn connect_ga4(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Ga4ConnectResponse>, ApiError> {
    let request: Ga4ConnectRequest = parse_json(&body)?;
    let (store_id, measurement_id, api_secret) = request.required_fields().ok_or_else(|| {
        ApiError::bad_request("Missing fields: store_id, measurement_id, api_secret")
    })?;
    let enabled = request.enabled.unwrap_or(true);

    state
        .repositories
        .settings
        .upsert(Ga4Settings::new(
            store_id.clone(),
            measurement_id,
            api_secret,
            enabled,
        ))
        .await?;

    info!(store_id = %store_id, enabled, "GA4 settings saved");
    Ok(Json(Ga4ConnectResponse {
        ok: true,
        status: "ga4_connected".to_string(),
        store_id,
        enabled,
    }))
}

/// Check GA4 credentials against the validation endpoint, then save them
/// enabled.
#[instrument(skip(state, body))]
async fn validate_ga4(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Ga4ConnectResponse>, ApiError> {
    let request: Ga4ConnectRequest = parse_json(&body)?;
    let (store_id, measurement_id, api_secret) = request
        .required_fields()
        .ok_or_else(|| ApiError::bad_request("Missing fields"))?;

    let credentials = Ga4Credentials {
        measurement_id: measurement_id.clone(),
        api_secret: api_secret.clone(),
    };

    if let Err(e) = state
        .sink
        .validate(&credentials, &connection_test_payload(&store_id))
        .await
    {
        warn!(store_id = %store_id, error = %e, "GA4 validation failed");
        return Err(ApiError::bad_request("GA4 validation failed"));
    }

    state
        .repositories
        .settings
        .upsert(Ga4Settings::new(
            store_id.clone(),
            measurement_id,
            api_secret,
            true,
        ))
        .await?;

    info!(store_id = %store_id, "GA4 settings validated and saved");
    Ok(Json(Ga4ConnectResponse {
        ok: true,
        status: "validated".to_string(),
        store_id,
        enabled: true,
    }))
}

async fn get_ga4_settings(
    State(state): State<AppState>,
    Path(store_id): Path<String>,
) -> Result<Json<DataResponse<Ga4SettingsView>>, ApiError> {
    let settings = state
        .repositories
        .settings
        .find(store_id.trim())
        .await?
        .ok_or_else(|| ApiError::not_found("GA4 settings not found"))?;

    Ok(Json(DataResponse::new(Ga4SettingsView::from(&settings))))
}

// ============================================================================
// Dashboard Handlers
// ============================================================================

async fn get_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<DataResponse<StatsResponse>>, ApiError> {
    let store_id =
        required_param(&query.store_id).ok_or_else(|| ApiError::bad_request("Missing store_id"))?;
    let hours = query.window_hours();
    let since = Timestamp::now().subtract_duration(Duration::from_secs(hours * 3600));

    let counts = status_counts(state.repositories.events.as_ref(), &store_id, since).await?;

    Ok(Json(DataResponse::new(StatsResponse::new(
        store_id, hours, counts,
    ))))
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<DataResponse<Vec<EventRecord>>>, ApiError> {
    let store_id =
        required_param(&query.store_id).ok_or_else(|| ApiError::bad_request("Missing store_id"))?;

    let events = state
        .repositories
        .events
        .find_many(
            &EventFilter::for_store(&store_id),
            SortOrder::NewestFirst,
            query.page_size(),
            query.offset.unwrap_or(0),
        )
        .await?;

    Ok(Json(DataResponse::new(events)))
}

async fn list_stores(
    State(state): State<AppState>,
) -> Result<Json<DataResponse<Vec<StoreView>>>, ApiError> {
    let stores = state.repositories.tenants.list(STORE_LIST_LIMIT).await?;

    Ok(Json(DataResponse::new(
        stores.iter().map(StoreView::from).collect(),
    )))
}

// ============================================================================
// Manual Retry
// ============================================================================

async fn retry_missing_id() -> ApiError {
    ApiError::bad_request("Missing id")
}

/// Re-dispatch a stored event and report that the attempt was made.
///
/// The outcome of the attempt is recorded on the event itself.
#[instrument(skip(state))]
async fn retry_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RetryResponse>, ApiError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ApiError::bad_request("Missing id"));
    }

    let record_id: RecordId = id
        .parse()
        .map_err(|_| ApiError::not_found(format!("Event not found: {}", id)))?;

    let outcome = match state.dispatcher.retry(&record_id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            state.metrics.record_manual_retry("not_found");
            return Err(e.into());
        }
    };

    let label = match &outcome {
        DispatchOutcome::Sent { .. } => "sent",
        DispatchOutcome::Failed { .. } => "failed",
        DispatchOutcome::Skipped(_) => "skipped",
    };
    state.metrics.record_manual_retry(label);
    info!(record_id = %record_id, outcome = label, "Manual retry attempted");

    Ok(Json(RetryResponse::attempted(record_id)))
}

// ============================================================================
// Middleware
// ============================================================================

/// Assigns or propagates `x-correlation-id` and logs each request.
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let correlation_id = request
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    // Downstream handlers log the same id
    if let Ok(header_value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", header_value);
    }

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert("x-correlation-id", header_value);
    }

    let status = response.status();

    if status.is_server_error() {
        error!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri.path(),
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri.path(),
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            correlation_id = %correlation_id,
            method = %method,
            uri = %uri.path(),
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed successfully"
        );
    }

    response
}

/// Label for requests that matched no route.
const UNMATCHED_PATH: &str = "unmatched";

/// Records request count and latency per route template.
///
/// Labels use the matched route (`/platforms/ga4/{store_id}`) rather than the
/// request path, so client input never creates new label values.
async fn metrics_middleware(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let start = std::time::Instant::now();
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_PATH.to_string());

    let response = next.run(request).await;

    state.metrics.record_http_request(
        method.as_str(),
        &path,
        response.status().as_u16(),
        start.elapsed(),
    );

    response
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

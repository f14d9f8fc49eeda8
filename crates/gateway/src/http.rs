use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{ConnectInfo, FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use parcelgate_auth::{resolve_identity, tier_from_headers};
use parcelgate_contracts::{FilterBounds, FilterError, ParcelRecord, RawParams};
use parcelgate_policy::compile;
use parcelgate_store::{FilterMemory, JsonFileFilterStore, PgFilterStore};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing::Instrument;
use ulid::Ulid;

use crate::config::{FilterStoreMode, GatewayConfig, StartupError};
use crate::export::ExportStream;
use crate::query::{QueryError, query_parcels};
use crate::source::{ParcelSource, PgParcelSource, SourceError, TableRef};

const FILTER_STORE_OP_TIMEOUT: Duration = Duration::from_secs(2);
const READY_CHECK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    source: Arc<dyn ParcelSource>,
    filters: FilterMemory,
}

impl AppState {
    pub fn new(config: GatewayConfig, source: Arc<dyn ParcelSource>, filters: FilterMemory) -> Self {
        Self {
            config,
            source,
            filters,
        }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn router(config: GatewayConfig) -> Result<Router, StartupError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.db_url)
        .await
        .map_err(|_| StartupError {
            code: "ERR_DB_UNAVAILABLE",
            message: "failed to initialize parcel database pool".to_string(),
        })?;

    let filters = match config.filter_store {
        FilterStoreMode::File => FilterMemory::new(Arc::new(JsonFileFilterStore::new(
            config.filter_store_path.clone(),
        ))),
        FilterStoreMode::Postgres => {
            let store = PgFilterStore::from_pool(pool.clone(), FILTER_STORE_OP_TIMEOUT);
            store.ensure_schema().await.map_err(|err| StartupError {
                code: "ERR_FILTER_STORE_UNAVAILABLE",
                message: format!("failed to initialize filter store: {}", err),
            })?;
            FilterMemory::new(Arc::new(store))
        }
        FilterStoreMode::Memory => FilterMemory::in_memory(),
    };

    let source = Arc::new(PgParcelSource::new(
        pool,
        config.parcels_table.clone(),
        config.statement_timeout_ms,
    ));

    Ok(router_with_state(AppState::new(config, source, filters)))
}

pub fn router_with_state(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/parcels", get(list_parcels))
        .route("/v1/parcels/export", get(export_parcels))
        .route("/v1/filters", get(load_filters))
        .route("/v1/inspect/tables", get(inspect_tables))
        .with_state(state)
}

/// Network origin of the caller, when the server was started with connect info.
pub struct ClientOrigin(pub Option<IpAddr>);

impl<S> FromRequestParts<S> for ClientOrigin
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientOrigin(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip()),
        ))
    }
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct ReadyzResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, bool>,
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();

    let postgres_ready = tokio::time::timeout(READY_CHECK_TIMEOUT, state.source.ping())
        .await
        .is_ok_and(|res| res.is_ok());
    checks.insert("postgres", postgres_ready);

    let all_ready = checks.values().all(|ok| *ok);
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyzResponse {
            status: if all_ready { "ready" } else { "not_ready" },
            checks,
        }),
    )
}

async fn metrics() -> impl IntoResponse {
    match crate::metrics::render() {
        Ok((body, content_type)) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(content_type.as_str()) {
                headers.insert(header::CONTENT_TYPE, value);
            }
            (headers, body).into_response()
        }
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn list_parcels(
    State(state): State<AppState>,
    ClientOrigin(origin): ClientOrigin,
    headers: HeaderMap,
    params: Result<Query<RawParams>, QueryRejection>,
) -> Result<Json<Vec<ParcelRecord>>, ApiError> {
    let tier = tier_from_headers(&headers);
    let identity = resolve_identity(&headers, origin);
    let request_id = extract_request_id(&headers);

    let span = tracing::info_span!(
        "parcels.query",
        request_id = %request_id,
        tier = tier.as_str(),
        rows = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    let result = async {
        let Query(raw) = params.map_err(|_| query_string_error())?;

        let records = query_parcels(state.source.as_ref(), &state.filters, &raw, tier, &identity)
            .await
            .map_err(|err| match err {
                QueryError::Filter(err) => filter_error(&err),
                QueryError::Source(err) => source_error(&err),
            })?;

        tracing::Span::current().record("rows", records.len() as u64);
        Ok::<_, ApiError>(Json(records))
    }
    .instrument(span.clone())
    .await;

    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err((status, _)) => *status,
    };
    record_outcome(&span, status, started);
    crate::metrics::observe_http_request("/v1/parcels", "GET", status.as_u16(), started.elapsed());
    result
}

async fn export_parcels(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<RawParams>, QueryRejection>,
) -> Response {
    let tier = tier_from_headers(&headers);
    let request_id = extract_request_id(&headers);
    let started = Instant::now();

    let prepared = async {
        let Query(raw) = params.map_err(|_| query_string_error())?;
        let query = compile(&raw, tier).map_err(|err| filter_error(&err))?;

        let mut export = ExportStream::new(
            state.source.clone(),
            query,
            tier,
            state.config.export_strategy,
            &request_id,
        );
        let first = export.start().await.map_err(|err| source_error(&err))?;
        Ok::<_, ApiError>((export, first))
    }
    .await;

    let status = match &prepared {
        Ok(_) => StatusCode::OK,
        Err((status, _)) => *status,
    };
    crate::metrics::observe_http_request(
        "/v1/parcels/export",
        "GET",
        status.as_u16(),
        started.elapsed(),
    );

    match prepared {
        Ok((export, first)) => {
            let mut headers = HeaderMap::new();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/csv; charset=utf-8"),
            );
            headers.insert(
                header::CONTENT_DISPOSITION,
                HeaderValue::from_static("attachment; filename=\"parcels.csv\""),
            );
            (
                StatusCode::OK,
                headers,
                Body::from_stream(export.into_body_stream(first)),
            )
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Serialize)]
struct FiltersResponse {
    filters: Option<FilterBounds>,
    #[serde(rename = "updatedAt")]
    updated_at: Option<DateTime<Utc>>,
}

async fn load_filters(
    State(state): State<AppState>,
    ClientOrigin(origin): ClientOrigin,
    headers: HeaderMap,
) -> Json<FiltersResponse> {
    let identity = resolve_identity(&headers, origin);
    let request_id = extract_request_id(&headers);

    let span = tracing::info_span!(
        "filters.load",
        request_id = %request_id,
        tier = tier_from_headers(&headers).as_str(),
        latency_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
    );
    let started = Instant::now();

    let entry = async {
        match state.filters.load_entry(&identity).await {
            Ok(entry) => entry,
            Err(err) => {
                crate::metrics::inc_filter_store_failure("load");
                tracing::warn!(error = %err, "failed to load memorized filters; returning none");
                None
            }
        }
    }
    .instrument(span.clone())
    .await;

    record_outcome(&span, StatusCode::OK, started);
    crate::metrics::observe_http_request("/v1/filters", "GET", 200, started.elapsed());

    Json(FiltersResponse {
        filters: entry.as_ref().map(|e| e.filters),
        updated_at: entry.map(|e| e.updated_at),
    })
}

async fn inspect_tables(State(state): State<AppState>) -> Result<Json<Vec<TableRef>>, ApiError> {
    let started = Instant::now();

    let result = if state.config.inspect_enabled {
        state
            .source
            .list_tables()
            .await
            .map(Json)
            .map_err(|err| source_error(&err))
    } else {
        Err(json_error(
            StatusCode::NOT_FOUND,
            "ERR_NOT_FOUND",
            "not found",
            false,
        ))
    };

    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err((status, _)) => *status,
    };
    crate::metrics::observe_http_request(
        "/v1/inspect/tables",
        "GET",
        status.as_u16(),
        started.elapsed(),
    );
    result
}

fn record_outcome(span: &tracing::Span, status: StatusCode, started: Instant) {
    span.record("latency_ms", started.elapsed().as_millis() as u64);
    span.record(
        "outcome",
        if status.is_success() { "success" } else { "error" },
    );
}

fn filter_error(err: &FilterError) -> ApiError {
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_PARAMS",
        err.to_string(),
        false,
    )
}

fn query_string_error() -> ApiError {
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_PARAMS",
        "query string could not be parsed",
        false,
    )
}

fn source_error(err: &SourceError) -> ApiError {
    tracing::error!(error = %err, "parcel source request failed");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "ERR_QUERY_FAILED",
        "query failed",
        true,
    )
}

fn extract_request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .and_then(sanitize_request_id)
        .unwrap_or_else(|| Ulid::new().to_string())
}

fn sanitize_request_id(raw: &str) -> Option<String> {
    const MAX_LEN: usize = 64;
    let mut out = String::with_capacity(raw.len().min(MAX_LEN));

    for ch in raw.chars() {
        if out.len() >= MAX_LEN {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        }
    }

    (!out.is_empty()).then_some(out)
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    retryable: bool,
}

fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
    retryable: bool,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message: message.into(),
            retryable,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_is_sanitized_and_bounded() {
        assert_eq!(
            sanitize_request_id("abc-123_x.y"),
            Some("abc-123_x.y".to_string())
        );
        assert_eq!(
            sanitize_request_id("a b<script>c"),
            Some("abscriptc".to_string())
        );
        assert_eq!(sanitize_request_id("!!!"), None);
        assert_eq!(
            sanitize_request_id(&"x".repeat(200)).map(|id| id.len()),
            Some(64)
        );
    }

    #[test]
    fn missing_request_id_falls_back_to_ulid() {
        let id = extract_request_id(&HeaderMap::new());
        assert!(id.parse::<Ulid>().is_ok());
    }

    #[test]
    fn source_errors_hide_detail() {
        let (status, Json(body)) = source_error(&SourceError::Backend(
            "relation \"takehome.dallas_parcels\" does not exist".to_string(),
        ));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.code, "ERR_QUERY_FAILED");
        assert!(!body.message.contains("dallas_parcels"));
    }

    #[test]
    fn filter_errors_name_the_parameter() {
        let err = FilterError {
            param: "minPrice",
            message: "must be a number".to_string(),
        };
        let (status, Json(body)) = filter_error(&err);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.code, "ERR_INVALID_PARAMS");
        assert!(body.message.starts_with("minPrice"));
    }
}

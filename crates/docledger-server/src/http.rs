//! HTTP API surface: authentication middleware, KV / record / schema / audit
//! endpoints, and the ops endpoints.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, Path, Query, Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;

use docledger_core::domain::{Item, JsonPathFilter, Record, RecordListFilter, ScanFilter};
use docledger_core::event::{AuditFilter, MutationMetadata};
use docledger_core::{
    AuditService, AuthService, BulkUpsertItem, Error, IdempotentResponseCache, KvService,
    OutboxDispatcher, RecordService, SchemaService,
};
use docledger_store_sqlite::Db;

const MAX_JSON_BODY: usize = 1 << 20;

#[derive(Default)]
pub struct HttpMetrics {
    pub requests_total: AtomicU64,
    pub request_latency_ms_total: AtomicU64,
    pub record_write_total: AtomicU64,
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Db>,
    pub kv: Arc<KvService>,
    pub records: Arc<RecordService>,
    pub schemas: Arc<SchemaService>,
    pub audit: Arc<AuditService>,
    pub auth: Arc<AuthService>,
    pub idempotency: Arc<IdempotentResponseCache>,
    pub dispatcher: Arc<OutboxDispatcher>,
    pub metrics: Arc<HttpMetrics>,
}

/// Tenant and actor resolved from the presented API key.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant_id: String,
    pub actor: String,
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/kv", get(scan_items))
        .route("/v1/kv/{*key}", put(upsert_item).get(get_item).delete(delete_item))
        .route("/v1/collections/{collection}/records", get(list_records))
        .route(
            "/v1/collections/{collection}/records/{id}",
            put(upsert_record).get(get_record).delete(delete_record),
        )
        .route("/v1/collections/{collection}/records:bulk-upsert", post(bulk_upsert_records))
        .route("/v1/collections/{collection}/records:bulk-delete", post(bulk_delete_records))
        .route(
            "/v1/collections/{collection}/schema",
            put(upsert_schema).get(get_schema).delete(delete_schema),
        )
        .route("/v1/audit/events", get(list_audit_events))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metricsz", get(metricsz))
        .route("/openapi.json", get(openapi))
        .merge(protected)
        .layer(middleware::from_fn_with_state(state.clone(), track_metrics))
        .layer(DefaultBodyLimit::max(MAX_JSON_BODY))
        .with_state(state)
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self.0 {
            Error::SchemaViolation(messages) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "schema validation failed", "errors": messages})),
            )
                .into_response(),
            Error::InvalidKey
            | Error::InvalidCategory
            | Error::InvalidFilter
            | Error::InvalidSchema(_) => {
                error_response(StatusCode::BAD_REQUEST, &self.0.to_string())
            }
            Error::NotFound => error_response(StatusCode::NOT_FOUND, "not found"),
            Error::Unauthorized => error_response(StatusCode::UNAUTHORIZED, "unauthorized"),
            _ => {
                tracing::error!(error = %self.0, "request failed");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = bearer_token(request.headers());
    match state.auth.authenticate(&token) {
        Ok(key) => {
            request
                .extensions_mut()
                .insert(AuthContext { tenant_id: key.tenant_id, actor: key.name });
            next.run(request).await
        }
        Err(Error::Unauthorized) => error_response(StatusCode::UNAUTHORIZED, "unauthorized"),
        Err(err) => {
            tracing::error!(error = %err, "api key lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
        }
    }
}

/// Token from `X-API-Key`, falling back to `Authorization: Bearer <token>`.
fn bearer_token(headers: &HeaderMap) -> String {
    let direct = header_value(headers, "x-api-key");
    if !direct.is_empty() {
        return direct;
    }

    let auth = header_value(headers, "authorization");
    if auth.len() >= 7 && auth[..7].eq_ignore_ascii_case("bearer ") {
        return auth[7..].trim().to_string();
    }
    String::new()
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

async fn track_metrics(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    state
        .metrics
        .request_latency_ms_total
        .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);
    if is_write_route(&method, &path) {
        state.metrics.record_write_total.fetch_add(1, Ordering::Relaxed);
    }

    response
}

fn is_write_route(method: &Method, path: &str) -> bool {
    matches!(*method, Method::PUT | Method::POST | Method::DELETE)
        && (path.contains("/records") || path.starts_with("/v1/kv/"))
}

fn mutation_meta(headers: &HeaderMap, auth: &AuthContext) -> MutationMetadata {
    MutationMetadata {
        actor: auth.actor.clone(),
        source: "api".to_string(),
        request_id: header_value(headers, "x-request-id"),
        correlation_id: header_value(headers, "x-correlation-id"),
        causation_id: header_value(headers, "x-causation-id"),
        idempotency_key: header_value(headers, "idempotency-key"),
        occurred_at: Some(OffsetDateTime::now_utc()),
    }
}

// ---- KV endpoints ----

#[derive(Debug, Deserialize)]
struct UpsertItemRequest {
    category: String,
    value: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ScanQuery {
    category: String,
    prefix: String,
    after: String,
    limit: usize,
}

async fn upsert_item(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<UpsertItemRequest>,
) -> Result<Json<Item>, ApiError> {
    let item = state.kv.upsert(Item::new(key, req.category, req.value))?;
    Ok(Json(item))
}

async fn get_item(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Item>, ApiError> {
    Ok(Json(state.kv.get(&key)?))
}

async fn delete_item(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state.kv.delete(&key)?;
    Ok(Json(json!({"deleted": deleted})))
}

async fn scan_items(
    State(state): State<AppState>,
    Query(query): Query<ScanQuery>,
) -> Result<Json<Value>, ApiError> {
    let items = state.kv.scan(ScanFilter {
        category: query.category,
        prefix: query.prefix,
        after_key: query.after,
        limit: query.limit,
    })?;
    Ok(Json(json!({"items": items})))
}

// ---- Record endpoints ----

#[derive(Debug, Serialize)]
struct RecordResponse {
    id: String,
    collection: String,
    data: Value,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
}

impl From<Record> for RecordResponse {
    fn from(record: Record) -> Self {
        Self {
            id: record.id,
            collection: record.collection,
            data: record.data,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ListRecordsQuery {
    prefix: String,
    after: String,
    limit: usize,
    json_path: String,
    json_op: String,
    json_value: String,
}

async fn upsert_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(data): Json<Value>,
) -> Result<Json<RecordResponse>, ApiError> {
    let meta = mutation_meta(&headers, &auth);
    let record = state
        .records
        .upsert(Record::new(auth.tenant_id, collection, id, data), meta)?;
    Ok(Json(record.into()))
}

async fn get_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<RecordResponse>, ApiError> {
    let record = state.records.get(&auth.tenant_id, &collection, &id)?;
    Ok(Json(record.into()))
}

async fn delete_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let meta = mutation_meta(&headers, &auth);
    let deleted = state.records.delete(&auth.tenant_id, &collection, &id, meta)?;
    Ok(Json(json!({"deleted": deleted})))
}

async fn list_records(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<ListRecordsQuery>,
) -> Result<Json<Value>, ApiError> {
    let records = state.records.list(
        &auth.tenant_id,
        &collection,
        RecordListFilter {
            prefix: query.prefix,
            after: query.after,
            limit: query.limit,
            json: JsonPathFilter {
                path: query.json_path.trim().to_string(),
                op: query.json_op.trim().to_string(),
                value: query.json_value,
            },
        },
    )?;

    let items: Vec<RecordResponse> = records.into_iter().map(RecordResponse::from).collect();
    Ok(Json(json!({"items": items})))
}

#[derive(Debug, Deserialize)]
struct BulkUpsertRequest {
    items: Vec<BulkUpsertItem>,
}

#[derive(Debug, Deserialize)]
struct BulkDeleteRequest {
    ids: Vec<String>,
}

async fn bulk_upsert_records(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(req): Json<BulkUpsertRequest>,
) -> Result<Json<Value>, ApiError> {
    let token = header_value(&headers, "idempotency-key");
    if let Some(cached) = state.idempotency.read(&auth.tenant_id, &collection, "bulk-upsert", &token)
    {
        return Ok(Json(cached));
    }

    let meta = mutation_meta(&headers, &auth);
    let records = state.records.bulk_upsert(&auth.tenant_id, &collection, req.items, meta)?;
    let items: Vec<RecordResponse> = records.into_iter().map(RecordResponse::from).collect();
    let payload = json!({"items": items});

    state.idempotency.write(&auth.tenant_id, &collection, "bulk-upsert", &token, &payload);
    Ok(Json(payload))
}

async fn bulk_delete_records(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(req): Json<BulkDeleteRequest>,
) -> Result<Json<Value>, ApiError> {
    let token = header_value(&headers, "idempotency-key");
    if let Some(cached) = state.idempotency.read(&auth.tenant_id, &collection, "bulk-delete", &token)
    {
        return Ok(Json(cached));
    }

    let meta = mutation_meta(&headers, &auth);
    let deleted = state.records.bulk_delete(&auth.tenant_id, &collection, &req.ids, meta)?;
    let payload = json!({"deleted": deleted});

    state.idempotency.write(&auth.tenant_id, &collection, "bulk-delete", &token, &payload);
    Ok(Json(payload))
}

// ---- Collection schema endpoints ----

#[derive(Debug, Serialize)]
struct SchemaResponse {
    collection: String,
    schema: Value,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
}

async fn upsert_schema(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(schema): Json<Value>,
) -> Result<Json<SchemaResponse>, ApiError> {
    let stored = state.schemas.upsert(&auth.tenant_id, &collection, schema)?;
    Ok(Json(SchemaResponse {
        collection: stored.collection,
        schema: stored.schema,
        created_at: stored.created_at,
        updated_at: stored.updated_at,
    }))
}

async fn get_schema(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<SchemaResponse>, ApiError> {
    let stored = state.schemas.get(&auth.tenant_id, &collection)?;
    Ok(Json(SchemaResponse {
        collection: stored.collection,
        schema: stored.schema,
        created_at: stored.created_at,
        updated_at: stored.updated_at,
    }))
}

async fn delete_schema(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state.schemas.delete(&auth.tenant_id, &collection)?;
    Ok(Json(json!({"deleted": deleted})))
}

// ---- Audit endpoint ----

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AuditQuery {
    aggregate_type: String,
    aggregate_id: String,
    action: String,
    after_id: i64,
    limit: usize,
}

async fn list_audit_events(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>, ApiError> {
    let events = state.audit.list(AuditFilter {
        tenant_id: auth.tenant_id,
        aggregate_type: query.aggregate_type,
        aggregate_id: query.aggregate_id,
        action: query.action,
        after_id: query.after_id,
        limit: query.limit,
    })?;
    Ok(Json(json!({"items": events})))
}

// ---- Ops endpoints ----

async fn healthz() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn readyz(State(state): State<AppState>) -> Response {
    let ready = state
        .db
        .with_read(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|err| Error::FatalStore(err.to_string()))
        })
        .is_ok();

    if ready {
        Json(json!({"ok": true})).into_response()
    } else {
        error_response(StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn openapi() -> Json<Value> {
    Json(json!({
        "openapi": "3.0.3",
        "info": {"title": "docledger", "version": "1.0.0"},
        "paths": {
            "/v1/kv": {"get": {"summary": "Scan items"}},
            "/v1/kv/{key}": {
                "put": {"summary": "Upsert item"},
                "get": {"summary": "Get item"},
                "delete": {"summary": "Delete item"}
            },
            "/v1/collections/{collection}/records": {
                "get": {"summary": "List records"}
            },
            "/v1/collections/{collection}/records/{id}": {
                "put": {"summary": "Upsert record"},
                "get": {"summary": "Get record"},
                "delete": {"summary": "Delete record"}
            },
            "/v1/collections/{collection}/records:bulk-upsert": {
                "post": {"summary": "Bulk upsert records"}
            },
            "/v1/collections/{collection}/records:bulk-delete": {
                "post": {"summary": "Bulk delete records"}
            },
            "/v1/collections/{collection}/schema": {
                "put": {"summary": "Upsert collection schema"},
                "get": {"summary": "Get collection schema"},
                "delete": {"summary": "Delete collection schema"}
            },
            "/v1/audit/events": {"get": {"summary": "List audit events"}}
        }
    }))
}

async fn metricsz(State(state): State<AppState>) -> Json<Value> {
    let dispatcher = state.dispatcher.metrics();
    Json(json!({
        "http_requests_total": state.metrics.requests_total.load(Ordering::Relaxed),
        "http_request_latency_ms_total":
            state.metrics.request_latency_ms_total.load(Ordering::Relaxed),
        "record_write_total": state.metrics.record_write_total.load(Ordering::Relaxed),
        "dispatch_success_total": dispatcher.dispatch_success_total,
        "dispatch_failure_total": dispatcher.dispatch_failure_total,
        "dispatch_dead_total": dispatcher.dispatch_dead_total,
    }))
}

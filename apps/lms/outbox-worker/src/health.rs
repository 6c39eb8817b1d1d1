//! Health, readiness, metrics and queue stats endpoints.

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use database::postgres::DatabaseConnection;
use domain_outbox::{OutboxStore, render_metrics};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// Shared state for the health endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub db: DatabaseConnection,
    pub store: Arc<dyn OutboxStore>,
    pub app_name: String,
    pub app_version: String,
}

impl HealthState {
    pub fn new(
        db: DatabaseConnection,
        store: Arc<dyn OutboxStore>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            db,
            store,
            app_name: app_name.into(),
            app_version: app_version.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub name: String,
    pub version: String,
}

/// Liveness: OK whenever the process answers.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness: the outbox database must answer `SELECT 1`.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    match database::postgres::check_health(&state.db).await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": { "database": "ok" }
            })),
        )),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "database": format!("error: {}", e) }
            })),
        )),
    }
}

/// Prometheus text format for scraping.
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_metrics(),
    )
}

/// Entry counts per status.
pub async fn stats_handler(
    State(state): State<HealthState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.store.counts_by_status().await {
        Ok(counts) => Ok(Json(json!({
            "total": counts.total(),
            "by_status": counts,
        }))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": format!("Failed to count outbox entries: {}", e) })),
        )),
    }
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/outbox/stats", get(stats_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use domain_outbox::{Clock, InMemoryOutboxStore, NewOutboxEntry, SystemClock};
    use sea_orm::{DatabaseBackend, DbErr, MockDatabase};
    use std::collections::BTreeMap;
    use tower::ServiceExt; // For oneshot()

    fn state(db: DatabaseConnection, store: InMemoryOutboxStore) -> HealthState {
        HealthState::new(db, Arc::new(store), "lms_outbox_worker", "0.1.0")
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn empty_db() -> DatabaseConnection {
        MockDatabase::new(DatabaseBackend::Postgres).into_connection()
    }

    #[tokio::test]
    async fn test_health_reports_identity() {
        let app = health_router(state(empty_db(), InMemoryOutboxStore::new()));
        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["name"], "lms_outbox_worker");
    }

    #[tokio::test]
    async fn test_ready_reflects_database() {
        let row: BTreeMap<&str, sea_orm::Value> = [("?column?", 1i32.into())].into_iter().collect();
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![row]])
            .into_connection();
        let router = health_router(state(db, InMemoryOutboxStore::new()));
        let (status, body) = get_json(router, "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["database"], "ok");

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_errors([DbErr::Custom("connection refused".into())])
            .into_connection();
        let router = health_router(state(db, InMemoryOutboxStore::new()));
        let (status, body) = get_json(router, "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");
    }

    #[tokio::test]
    async fn test_stats_counts_entries() {
        let store = InMemoryOutboxStore::new();
        for to in ["a@example.org", "b@example.org"] {
            store
                .enqueue(NewOutboxEntry::new(to, "invite", 1), SystemClock.now())
                .await
                .unwrap();
        }

        let router = health_router(state(empty_db(), store));
        let (status, body) = get_json(router, "/outbox/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["by_status"]["pending"], 2);
    }
}

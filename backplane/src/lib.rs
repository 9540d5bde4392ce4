//! backplane library interface
//!
//! Exposes the db layer, domain models, and services as a library so both the
//! `backplaned` binary and integration tests can drive the job/worker substrate
//! without going through HTTP.

pub mod db;
pub mod models;
pub mod services;
pub mod utils;

use axum::extract::State;
use axum::response::sse::Sse;
use axum::routing::get;
use axum::{Json, Router};
use backplane_common::events::EventBus;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

/// Shared state for the backplane's thin observability router. This is not the
/// REST/auth surface — it's a health snapshot and an SSE event feed, the ambient
/// surface SPEC_FULL.md calls for alongside the job/worker substrate.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub event_bus: EventBus,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self {
            db,
            event_bus,
            startup_time: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: i64,
    jobs: db::jobs::JobCounts,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let jobs = db::jobs::count_by_status(&state.db)
        .await
        .unwrap_or_default();
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: (Utc::now() - state.startup_time).num_seconds(),
        jobs,
    })
}

async fn events(
    State(state): State<AppState>,
) -> Sse<impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>> {
    backplane_common::sse::create_event_sse_stream(state.event_bus.clone())
}

/// Build the backplane's observability router: `/health` and `/events`. Everything
/// the spec excludes (REST CRUD, auth) lives outside this crate entirely.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", get(events))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::initialize_schema;

    #[tokio::test]
    async fn health_route_reports_ok_and_zero_jobs_on_empty_db() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        let state = AppState::new(pool, EventBus::new(16));
        let app = build_router(state);

        let response = tower::ServiceExt::oneshot(
            app,
            axum::http::Request::builder()
                .uri("/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["jobs"]["pending"], 0);
    }
}

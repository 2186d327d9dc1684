//! Health and status endpoint.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use datasaver_core::RunState;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub state: RunState,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub next_run: Option<DateTime<Utc>>,
}

/// "degraded" when the last run failed or the newest success is older than
/// `alert_after`. No backup at all is not degraded: a fresh install waits
/// for its first tick.
pub fn health_status(
    last_success: Option<DateTime<Utc>>,
    last_error: Option<&str>,
    alert_after: chrono::Duration,
    now: DateTime<Utc>,
) -> &'static str {
    let stale = last_success.is_some_and(|t| now - t > alert_after);
    if last_error.is_some() || stale {
        "degraded"
    } else {
        "ok"
    }
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.engine.status();

    // After a restart the engine has no memory of earlier runs.
    let last_run = match status.last_run {
        Some(t) => Some(t),
        None => match state.engine.list_backups(&state.shutdown).await {
            Ok(records) => records.first().map(|r| r.timestamp),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list backups for health check");
                None
            }
        },
    };

    let next_run = match &state.scheduler {
        Some(scheduler) => scheduler.next_run().await,
        None => None,
    };

    let health = health_status(
        last_run,
        status.last_error.as_deref(),
        state.alert_after,
        Utc::now(),
    );
    let code = if health == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            status: health,
            version: env!("CARGO_PKG_VERSION"),
            state: status.state,
            last_run,
            last_error: status.last_error,
            next_run,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::create_router;
    use crate::test_support::sqlite_engine;
    use axum::body::Body;
    use axum::http::Request;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    #[test]
    fn test_health_status() {
        let now = Utc::now();
        let day = chrono::Duration::hours(26);

        assert_eq!(health_status(None, None, day, now), "ok");
        assert_eq!(health_status(Some(now - chrono::Duration::hours(2)), None, day, now), "ok");
        assert_eq!(health_status(Some(now - chrono::Duration::hours(30)), None, day, now), "degraded");
        assert_eq!(health_status(Some(now), Some("dump failed"), day, now), "degraded");
    }

    #[tokio::test]
    async fn test_health_endpoint_after_backup() {
        let fixture = sqlite_engine();
        let cancel = CancellationToken::new();
        fixture.engine.run(&cancel).await.unwrap();

        let state = Arc::new(AppState::new(
            fixture.engine.clone(),
            chrono::Duration::hours(26),
            cancel,
        ));
        let response = create_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["state"], "done");
        assert!(json["last_run"].is_string());
        assert!(json["next_run"].is_null());
    }

    #[tokio::test]
    async fn test_backups_endpoints() {
        let fixture = sqlite_engine();
        let cancel = CancellationToken::new();
        let result = fixture.engine.run(&cancel).await.unwrap();
        let app = create_router(Arc::new(AppState::new(
            fixture.engine.clone(),
            chrono::Duration::hours(26),
            cancel,
        )));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/backups").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json[0]["id"], result.id.as_str());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/backups/{}/validate", result.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["valid"], true);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/backups/backup_20000101_000000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

use crate::gateway::AppState;
use crate::media::MediaStats;
use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    status: &'static str,
    timestamp: String,
    uptime_seconds: u64,
    configured_keys: usize,
    working_keys: usize,
    cooling_keys: usize,
    stored_media: MediaStats,
    version: &'static str,
}

/// GET /health - 没有可用凭证时返回 503（分析仍会走兜底）。
pub async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    let working = state.store().working_count();
    let healthy = working > 0;

    let body = Health {
        status: if healthy { "healthy" } else { "degraded" },
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        configured_keys: state.store().count(),
        working_keys: working,
        cooling_keys: state.tracker().cooling_count(),
        stored_media: state.media.stats().await,
        version: env!("CARGO_PKG_VERSION"),
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        [
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        Json(body),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use crate::gateway::test_support::{FakeGemini, spawn_gateway, test_config};
    use serde_json::Value;

    #[tokio::test]
    async fn healthy_with_usable_key() {
        let upstream = FakeGemini::default().spawn().await;
        let (base, _state) =
            spawn_gateway(test_config(&upstream, &[("key1", "good"), ("key2", "x")])).await;

        let resp = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers()["cache-control"],
            "no-cache, no-store, must-revalidate"
        );
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["configuredKeys"], 2);
        assert_eq!(body["workingKeys"], 2);
        assert_eq!(body["coolingKeys"], 0);
        assert_eq!(body["storedMedia"]["count"], 0);
    }

    #[tokio::test]
    async fn degraded_without_keys() {
        let upstream = FakeGemini::default().spawn().await;
        let (base, _state) = spawn_gateway(test_config(&upstream, &[])).await;

        let resp = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(resp.status(), 503);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["workingKeys"], 0);
    }
}

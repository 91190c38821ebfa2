//! 管理接口：凭证查看/更新、凭证探测、兜底链路自检、冷却状态。

use crate::cooldown::FailureSnapshot;
use crate::error::AppError;
use crate::gateway::AppState;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

/// 1x1 透明 PNG，用于自检。
const TEST_PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8/5+hHgAHggJ/PchI7wAAAABJRU5ErkJggg==";

fn presented_password(headers: &HeaderMap) -> Option<&str> {
    if let Some(v) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(v.trim());
    }
    headers
        .get("x-admin-password")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

/// 未配置 ADMIN_PASSWORD 时整个管理接口关闭。
pub async fn admin_auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let expected = state.cfg.admin_password.trim();
    if expected.is_empty() {
        return AppError::unauthorized("管理接口未启用（未设置 ADMIN_PASSWORD）").into_response();
    }
    match presented_password(&headers) {
        Some(p) if p == expected => next.run(request).await,
        _ => AppError::unauthorized("管理密码错误").into_response(),
    }
}

fn key_counts(state: &AppState) -> Value {
    json!({
        "totalKeys": state.store().count(),
        "workingKeys": state.store().working_count(),
    })
}

/// GET /api/admin/keys
pub async fn handle_keys_get(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut out = key_counts(&state);
    out["keys"] = Value::Object(state.store().masked());
    Json(out)
}

#[derive(Debug, Deserialize)]
pub struct UpdateKeysRequest {
    keys: serde_json::Map<String, Value>,
}

/// POST /api/admin/keys - `{keys: {id: secret}}`，空值表示停用
pub async fn handle_keys_post(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateKeysRequest>,
) -> Result<Json<Value>, AppError> {
    let mut updates = Vec::with_capacity(req.keys.len());
    for (id, v) in req.keys {
        let secret = match v {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => {
                return Err(AppError::bad_request(format!(
                    "凭证 {id} 的值必须是字符串，实际为 {other}"
                )));
            }
        };
        if id.trim().is_empty() {
            return Err(AppError::bad_request("凭证 id 不能为空"));
        }
        updates.push((id, secret));
    }

    state.store().update(updates).await?;

    let mut out = key_counts(&state);
    out["success"] = Value::Bool(true);
    out["message"] = Value::from("API keys updated successfully");
    Ok(Json(out))
}

#[derive(Debug, Deserialize)]
pub struct TestKeyRequest {
    #[serde(default)]
    key: String,
}

/// POST /api/admin/test-key - 用 `GET models` 检查一个密钥
pub async fn handle_test_key(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TestKeyRequest>,
) -> Result<Json<Value>, AppError> {
    let key = req.key.trim();
    if key.is_empty() {
        return Err(AppError::bad_request("缺少 key"));
    }

    let out = match state.dispatcher.upstream().check_key(key).await {
        Ok(()) => json!({ "success": true }),
        Err(e) => json!({
            "success": false,
            "status": e.status(),
            "error": e.to_string(),
        }),
    };
    Ok(Json(out))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyCheck {
    key_id: String,
    working: bool,
    status: Option<u16>,
    error: Option<String>,
}

/// POST /api/admin/test-fallback - 逐个检查凭证，再跑一次完整分析
pub async fn handle_test_fallback(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, AppError> {
    let usable = state.store().usable();
    let mut checks = Vec::with_capacity(usable.len());
    for cred in &usable {
        let check = match state.dispatcher.upstream().check_key(&cred.secret).await {
            Ok(()) => KeyCheck {
                key_id: cred.id.clone(),
                working: true,
                status: Some(200),
                error: None,
            },
            Err(e) => KeyCheck {
                key_id: cred.id.clone(),
                working: false,
                status: e.status(),
                error: Some(e.to_string()),
            },
        };
        tracing::info!(credential_id = %cred.id, working = check.working, "凭证检查");
        checks.push(check);
    }
    let working = checks.iter().filter(|p| p.working).count();

    let png = BASE64
        .decode(TEST_PNG_BASE64)
        .map_err(|e| anyhow::anyhow!("内置测试图片解码失败: {e}"))?;
    let outcome = state
        .dispatcher
        .analyze("image/png", "test-fallback.png", &png)
        .await?;

    let message = if !outcome.is_fallback() {
        format!("Fallback mechanism working! {working}/{} keys operational", usable.len())
    } else if working > 0 {
        format!(
            "{working}/{} keys working, but analysis failed - check key quotas",
            usable.len()
        )
    } else {
        "All keys failed - using fallback analysis".to_string()
    };

    Ok(Json(json!({
        "success": !outcome.is_fallback() || working > 0,
        "message": message,
        "results": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "geminiKeys": checks,
            "totalKeys": usable.len(),
            "workingKeys": working,
            "fallbackUsed": outcome.is_fallback(),
            "credentialId": outcome.credential_id(),
            "finalResult": outcome.report(),
        },
    })))
}

/// GET /api/admin/cooldowns
pub async fn handle_cooldowns(State(state): State<Arc<AppState>>) -> Json<Vec<FailureSnapshot>> {
    Json(state.tracker().snapshot())
}

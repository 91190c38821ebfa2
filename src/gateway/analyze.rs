use crate::analysis::AnalysisOutcome;
use crate::error::AppError;
use crate::gateway::AppState;
use crate::jobs::Progress;
use crate::media::store::validate_upload;
use crate::media::{MediaMetadata, StoredMedia};
use crate::util::id;
use axum::Json;
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::payload_too_large(e.body_text())
    } else {
        AppError::bad_request(e.body_text())
    }
}

/// POST /api/upload - multipart 字段 `file`
pub async fn handle_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field.file_name().unwrap_or("upload").to_string();
        let media_type = field
            .content_type()
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        let bytes = field.bytes().await.map_err(multipart_error)?;
        validate_upload(&media_type, bytes.len())?;

        let file_id = id::file_id();
        let metadata = MediaMetadata {
            filename: format!("{file_id}-{original_name}"),
            original_name,
            size: bytes.len(),
            media_type,
            uploaded_at: chrono::Utc::now(),
        };
        tracing::info!(
            file_id = %file_id,
            name = %metadata.original_name,
            media_type = %metadata.media_type,
            size = metadata.size,
            "文件已上传"
        );
        state
            .media
            .put(
                file_id.clone(),
                StoredMedia {
                    bytes,
                    metadata: metadata.clone(),
                },
            )
            .await;

        return Ok(Json(json!({
            "success": true,
            "fileId": file_id,
            "metadata": metadata,
            "message": "File uploaded successfully",
        })));
    }

    Err(AppError::bad_request("缺少 file 字段"))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default)]
    file_id: Option<String>,
}

/// POST /api/analyze - 启动后台分析
pub async fn handle_analyze_start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRequest>,
) -> Result<Json<Value>, AppError> {
    let file_id = req
        .file_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::bad_request("缺少 fileId"))?;

    let media = state
        .media
        .get(&file_id)
        .await
        .ok_or_else(|| AppError::not_found(format!("文件不存在或已过期: {file_id}")))?;

    let analysis_id = state.jobs.spawn(state.dispatcher.clone(), &file_id, media);
    tracing::info!(file_id = %file_id, analysis_id = %analysis_id, "分析任务已启动");

    Ok(Json(json!({
        "success": true,
        "analysisId": analysis_id,
        "status": "started",
        "message": "Analysis started successfully",
    })))
}

/// GET /api/progress/{analysis_id}
pub async fn handle_progress(
    State(state): State<Arc<AppState>>,
    Path(analysis_id): Path<String>,
) -> Json<Progress> {
    Json(state.jobs.progress(&analysis_id).await)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultQuery {
    #[serde(default)]
    analysis_id: Option<String>,
}

/// GET /api/analyze?analysisId=
pub async fn handle_analyze_result(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ResultQuery>,
) -> Result<Json<Value>, AppError> {
    let analysis_id = q
        .analysis_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("缺少 analysisId"))?;

    let outcome = state
        .jobs
        .result(analysis_id.trim())
        .await
        .ok_or_else(|| AppError::not_found("分析不存在或尚未完成"))?;

    Ok(Json(json!({
        "success": true,
        "source": outcome.source(),
        "credentialId": outcome.credential_id(),
        "result": outcome.report(),
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectRequest {
    #[serde(default)]
    media_type: String,
    #[serde(default)]
    media_name: String,
    /// base64，允许带 `data:<mime>;base64,` 前缀。
    #[serde(default)]
    data: String,
}

/// POST /api/analyze/direct - 同步分析，直接返回结果
pub async fn handle_analyze_direct(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DirectRequest>,
) -> Result<Json<AnalysisOutcome>, AppError> {
    let data = req.data.trim();
    let data = match data.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let bytes = BASE64
        .decode(data)
        .map_err(|e| AppError::bad_request(format!("data 不是合法的 base64: {e}")))?;

    let outcome = state
        .dispatcher
        .analyze(&req.media_type, &req.media_name, &bytes)
        .await?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use crate::gateway::test_support::{FakeGemini, spawn_gateway, test_config};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn png_part(bytes: Vec<u8>, mime: &str) -> reqwest::multipart::Form {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name("photo.png")
            .mime_str(mime)
            .unwrap();
        reqwest::multipart::Form::new().part("file", part)
    }

    async fn upload(base: &str, form: reqwest::multipart::Form) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{base}/api/upload"))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upload_then_background_analysis_end_to_end() {
        let fake = FakeGemini::default();
        let upstream = fake.spawn().await;
        let (base, _state) =
            spawn_gateway(test_config(&upstream, &[("key1", "limited"), ("key2", "good")])).await;
        let http = reqwest::Client::new();

        let resp = upload(&base, png_part(vec![1, 2, 3], "image/png")).await;
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        let file_id = body["fileId"].as_str().unwrap().to_string();
        assert_eq!(body["metadata"]["originalName"], "photo.png");
        assert_eq!(body["metadata"]["size"], 3);

        let started: Value = http
            .post(format!("{base}/api/analyze"))
            .json(&json!({ "fileId": file_id }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(started["status"], "started");
        let analysis_id = started["analysisId"].as_str().unwrap().to_string();

        let mut done = false;
        for _ in 0..200 {
            let p: Value = http
                .get(format!("{base}/api/progress/{analysis_id}"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if p["completed"] == true {
                assert_eq!(p["stage"], 6);
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(done);

        let result: Value = http
            .get(format!("{base}/api/analyze?analysisId={analysis_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(result["source"], "success");
        assert_eq!(result["credentialId"], "key2");
        assert_eq!(result["result"]["authenticityScore"], 93);
        assert_eq!(fake.calls(), vec!["limited", "good"]);
    }

    #[tokio::test]
    async fn upload_rejects_bad_type_and_oversize() {
        let upstream = FakeGemini::default().spawn().await;
        let (base, _state) = spawn_gateway(test_config(&upstream, &[])).await;

        let resp = upload(&base, png_part(vec![0; 8], "application/pdf")).await;
        assert_eq!(resp.status(), 400);

        let resp = upload(&base, png_part(vec![0; 10 * 1024 * 1024 + 1], "image/png")).await;
        assert_eq!(resp.status(), 413);

        let resp = upload(&base, reqwest::multipart::Form::new().text("other", "x")).await;
        assert_eq!(resp.status(), 400);
    }

    #[tokio::test]
    async fn analyze_start_and_result_errors() {
        let upstream = FakeGemini::default().spawn().await;
        let (base, _state) = spawn_gateway(test_config(&upstream, &[])).await;
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("{base}/api/analyze"))
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = http
            .post(format!("{base}/api/analyze"))
            .json(&json!({ "fileId": "missing" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let resp = http.get(format!("{base}/api/analyze")).send().await.unwrap();
        assert_eq!(resp.status(), 400);

        let resp = http
            .get(format!("{base}/api/analyze?analysisId=nope"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);

        let p: Value = http
            .get(format!("{base}/api/progress/nope"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(p, json!({"stage": 0, "message": "Initializing...", "completed": false}));
    }

    #[tokio::test]
    async fn direct_analysis_falls_back_when_all_keys_fail() {
        let fake = FakeGemini::default();
        let upstream = fake.spawn().await;
        let (base, state) =
            spawn_gateway(test_config(&upstream, &[("key1", "revoked"), ("key2", "limited")])).await;
        let http = reqwest::Client::new();

        let out: Value = http
            .post(format!("{base}/api/analyze/direct"))
            .json(&json!({
                "mediaType": "video/mp4",
                "mediaName": "clip.mp4",
                "data": format!("data:video/mp4;base64,{}", BASE64.encode(b"mp4")),
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(out["kind"], "fallback");
        assert_eq!(out["payload"]["authenticityScore"], 82);
        assert_eq!(out["payload"]["confidenceLevel"], "Medium");
        assert_eq!(fake.calls(), vec!["revoked", "limited"]);
        assert_eq!(state.tracker().failure_count("key1"), 1);
        assert_eq!(state.tracker().failure_count("key2"), 1);
    }

    #[tokio::test]
    async fn direct_analysis_rejects_bad_input() {
        let upstream = FakeGemini::default().spawn().await;
        let (base, _state) = spawn_gateway(test_config(&upstream, &[("key1", "good")])).await;
        let http = reqwest::Client::new();

        for body in [
            json!({"mediaType": "image/png", "data": "!!!not base64"}),
            json!({"mediaType": "", "data": BASE64.encode(b"x")}),
            json!({"mediaType": "image/png", "data": ""}),
        ] {
            let resp = http
                .post(format!("{base}/api/analyze/direct"))
                .json(&body)
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 400, "{body}");
        }
    }
}

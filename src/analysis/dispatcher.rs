use crate::analysis::fallback::fallback;
use crate::analysis::parse::parse_report;
use crate::analysis::prompt::{analysis_prompt, large_media_prompt};
use crate::analysis::types::AnalysisOutcome;
use crate::cooldown::AvailabilityTracker;
use crate::credential::{Credential, Store};
use crate::error::AppError;
use crate::gemini::types::{Content, GenerateRequest, GenerationConfig, Part};
use crate::gemini::{ApiError, GeminiClient};
use crate::logging::{self, LogLevel};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// 上游调用的抽象：拿一个凭证发出请求，返回模型原始文本。
pub trait Upstream: Send + Sync {
    fn generate(
        &self,
        credential: &Credential,
        req: &GenerateRequest,
    ) -> impl Future<Output = Result<String, ApiError>> + Send;
}

impl Upstream for GeminiClient {
    async fn generate(
        &self,
        credential: &Credential,
        req: &GenerateRequest,
    ) -> Result<String, ApiError> {
        self.generate_content(&credential.secret, req).await
    }
}

/// 按配置顺序逐个尝试凭证，第一个通过校验的结果胜出；全部失败则兜底。
///
/// 单次分析内串行调用，从不并发扇出。多个分析请求之间只共享 tracker。
#[derive(Debug)]
pub struct Dispatcher<U> {
    upstream: U,
    store: Arc<Store>,
    tracker: Arc<AvailabilityTracker>,
    max_inline_bytes: usize,
    log_level: LogLevel,
}

impl<U: Upstream> Dispatcher<U> {
    pub fn new(
        upstream: U,
        store: Arc<Store>,
        tracker: Arc<AvailabilityTracker>,
        max_inline_bytes: usize,
        log_level: LogLevel,
    ) -> Self {
        Self {
            upstream,
            store,
            tracker,
            max_inline_bytes,
            log_level,
        }
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<AvailabilityTracker> {
        &self.tracker
    }

    /// 只有缺少媒体类型或内容时返回错误；上游失败全部在这里被吸收。
    pub async fn analyze(
        &self,
        media_type: &str,
        media_name: &str,
        bytes: &[u8],
    ) -> Result<AnalysisOutcome, AppError> {
        let media_type = media_type.trim();
        if media_type.is_empty() {
            return Err(AppError::bad_request("缺少媒体类型"));
        }
        if bytes.is_empty() {
            return Err(AppError::bad_request("媒体内容为空"));
        }
        let media_name = match media_name.trim() {
            "" => "unknown",
            n => n,
        };

        let candidates: Vec<Credential> = self
            .store
            .usable()
            .into_iter()
            .filter(|c| self.tracker.is_available(&c.id))
            .collect();

        if candidates.is_empty() {
            tracing::info!(media_type, "没有可用凭证，返回兜底结果");
            return Ok(AnalysisOutcome::Fallback {
                report: fallback(media_type),
            });
        }

        let req = self.build_request(media_type, media_name, bytes);
        if self.log_level.summary_enabled() {
            tracing::info!(
                media_type,
                media_name,
                size = bytes.len(),
                candidates = candidates.len(),
                inline = bytes.len() <= self.max_inline_bytes,
                "开始分析"
            );
        }

        for cred in &candidates {
            let start = Instant::now();
            let result = self
                .upstream
                .generate(cred, &req)
                .await
                .and_then(|text| {
                    parse_report(&text).map_err(|e| ApiError::InvalidReport(e.to_string()))
                });

            match result {
                Ok(report) => {
                    tracing::info!(
                        credential_id = %cred.id,
                        elapsed_ms = logging::format_duration_ms(start.elapsed()),
                        score = report.authenticity_score,
                        confidence = ?report.confidence_level,
                        "分析成功"
                    );
                    return Ok(AnalysisOutcome::Success {
                        credential_id: cred.id.clone(),
                        report,
                    });
                }
                Err(e) => {
                    let rate_limited = e.is_rate_limit();
                    let failures = self.tracker.record_failure(&cred.id, rate_limited);
                    tracing::warn!(
                        credential_id = %cred.id,
                        elapsed_ms = logging::format_duration_ms(start.elapsed()),
                        rate_limited,
                        timeout = e.is_timeout(),
                        failures,
                        error = %e,
                        "凭证调用失败，尝试下一个"
                    );
                }
            }
        }

        tracing::warn!(
            attempted = candidates.len(),
            "所有可用凭证均失败，返回兜底结果"
        );
        Ok(AnalysisOutcome::Fallback {
            report: fallback(media_type),
        })
    }

    fn build_request(&self, media_type: &str, media_name: &str, bytes: &[u8]) -> GenerateRequest {
        let parts = if bytes.len() <= self.max_inline_bytes {
            vec![
                Part::text(analysis_prompt(media_type, media_name)),
                Part::inline(media_type, BASE64.encode(bytes)),
            ]
        } else {
            vec![Part::text(large_media_prompt(
                media_type,
                media_name,
                bytes.len(),
            ))]
        };

        GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: Some(GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 2000,
                response_mime_type: Some("application/json".to_string()),
            }),
        }
    }
}

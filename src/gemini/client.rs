use crate::config::{AuthMode, Config};
use crate::gemini::types::{GenerateRequest, GenerateResponse};
use crate::logging::{self, LogLevel};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use sonic_rs::JsonValueTrait;
use std::time::{Duration, Instant};
use thiserror::Error;

/// 单次上游调用的失败。Dispatcher 负责分类、计数，并换下一个凭证。
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Gemini API 错误 {status}: {message}")]
    Http { status: u16, message: String },

    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] sonic_rs::Error),

    #[error("Gemini 返回了空内容")]
    EmptyResponse,

    #[error("模型输出无法解析为评分报告: {0}")]
    InvalidReport(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }

    /// 429，或错误文本里出现限流/配额字样。
    pub fn is_rate_limit(&self) -> bool {
        if self.status() == Some(429) {
            return true;
        }
        let msg = self.to_string().to_lowercase();
        ["rate limit", "quota", "too many requests", "resource_exhausted"]
            .iter()
            .any(|p| msg.contains(p))
    }
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    auth_mode: AuthMode,
    log_level: LogLevel,
}

impl GeminiClient {
    pub fn new(cfg: &Config) -> Result<Self, anyhow::Error> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(cfg.timeout());

        if !cfg.proxy.trim().is_empty() {
            builder = builder.proxy(reqwest::Proxy::all(cfg.proxy.trim())?);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: cfg.gemini_base_url.trim_end_matches('/').to_string(),
            model: cfg.gemini_model.clone(),
            auth_mode: cfg.auth_mode,
            log_level: cfg.log_level(),
        })
    }

    pub fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    pub fn models_url(&self) -> String {
        format!("{}/v1beta/models", self.base_url)
    }

    fn with_credential(&self, url: String, secret: &str) -> (String, HeaderMap) {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        match self.auth_mode {
            AuthMode::Query => (
                format!("{url}?key={}", urlencoding::encode(secret)),
                h,
            ),
            AuthMode::Bearer => {
                if let Ok(v) = HeaderValue::from_str(&format!("Bearer {secret}")) {
                    h.insert(AUTHORIZATION, v);
                }
                (url, h)
            }
        }
    }

    /// 调用 generateContent 并返回第一个候选的文本。
    pub async fn generate_content(
        &self,
        secret: &str,
        req: &GenerateRequest,
    ) -> Result<String, ApiError> {
        let (url, headers) = self.with_credential(self.generate_url(), secret);
        let body = sonic_rs::to_vec(req)?;
        logging::backend_request(self.log_level, "POST", &url, &headers, &body);

        let start = Instant::now();
        let resp = self
            .http
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let bytes = resp.bytes().await?;
        logging::backend_response(self.log_level, status.as_u16(), start.elapsed(), &bytes);

        if !status.is_success() {
            return Err(extract_error_details(status.as_u16(), &bytes));
        }

        let parsed = sonic_rs::from_slice::<GenerateResponse>(&bytes)?;
        let text = parsed.text();
        if text.trim().is_empty() {
            return Err(ApiError::EmptyResponse);
        }
        Ok(text)
    }

    /// 用 `GET models` 探测凭证是否有效。
    pub async fn check_key(&self, secret: &str) -> Result<(), ApiError> {
        let (url, headers) = self.with_credential(self.models_url(), secret);
        logging::backend_request(self.log_level, "GET", &url, &headers, &[]);

        let start = Instant::now();
        let resp = self.http.get(url).headers(headers).send().await?;
        let status = resp.status();
        let bytes = resp.bytes().await?;
        logging::backend_response(self.log_level, status.as_u16(), start.elapsed(), &bytes);

        if !status.is_success() {
            return Err(extract_error_details(status.as_u16(), &bytes));
        }
        Ok(())
    }
}

fn extract_error_details(status: u16, body: &[u8]) -> ApiError {
    #[derive(Debug, serde::Deserialize)]
    struct ErrResp {
        error: ErrInner,
    }

    #[derive(Debug, serde::Deserialize)]
    struct ErrInner {
        #[serde(default)]
        code: Option<sonic_rs::Value>,
        #[serde(default)]
        message: String,
        #[serde(default)]
        status: String,
    }

    let mut out_status = status;
    let mut message = String::from_utf8_lossy(body).trim().to_string();
    if message.is_empty() {
        message = "Unknown error".to_string();
    }

    if let Ok(err_resp) = sonic_rs::from_slice::<ErrResp>(body) {
        let err = err_resp.error;
        if !err.message.is_empty() {
            message = err.message;
        }

        if let Some(i) = err.code.as_ref().and_then(|c| c.as_i64())
            && i > 0
            && i <= u16::MAX as i64
        {
            out_status = i as u16;
        }

        match err.status.to_uppercase().as_str() {
            "RESOURCE_EXHAUSTED" => out_status = 429,
            "UNAVAILABLE" if out_status < 500 => out_status = 503,
            _ => {}
        }
    }

    ApiError::Http {
        status: out_status,
        message,
    }
}

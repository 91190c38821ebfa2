use reqwest::header::HeaderMap;
use sonic_rs::prelude::*;
use std::borrow::Cow;
use std::time::Duration;

/// 日志等级：
/// - off：只输出每次尝试的结果
/// - low：同 off，另外输出调度摘要
/// - medium：额外输出上游请求/响应（格式化、脱敏、截断 base64）
/// - high：额外输出上游请求/响应原文（仍截断 base64 并隐藏凭证）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl LogLevel {
    pub fn parse(debug: &str) -> Self {
        match debug.trim().to_lowercase().as_str() {
            "low" | "client" => Self::Low,
            "medium" | "backend" => Self::Medium,
            "high" | "all" | "raw" => Self::High,
            _ => Self::Off,
        }
    }

    pub fn summary_enabled(self) -> bool {
        self >= Self::Low
    }

    pub fn backend_enabled(self) -> bool {
        self >= Self::Medium
    }

    pub fn raw_enabled(self) -> bool {
        self >= Self::High
    }
}

pub fn format_duration_ms(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

pub fn backend_request(level: LogLevel, method: &str, url: &str, headers: &HeaderMap, body: &[u8]) {
    if !level.backend_enabled() {
        return;
    }
    let url = redact_url(url);
    if level.raw_enabled() {
        tracing::info!(
            "\n=================== 上游请求（RAW） ===================\n[上游请求] {method} {url}\n[上游请求头]\n{}\n[上游请求体]\n{}\n=========================================================",
            format_headers(headers),
            raw_body_for_log(body),
        );
    } else {
        tracing::info!(
            "\n====================== 上游请求 ========================\n[上游请求] {method} {url}\n[上游请求头]\n{}\n{}\n==========================================================",
            format_headers(headers),
            format_body_bytes(body)
        );
    }
}

pub fn backend_response(level: LogLevel, status: u16, duration: Duration, body: &[u8]) {
    if !level.backend_enabled() {
        return;
    }
    if level.raw_enabled() {
        tracing::info!(
            "\n=================== 上游响应（RAW） ===================\n[上游响应] {} {}ms\n{}\n=========================================================",
            status,
            format_duration_ms(duration),
            raw_body_for_log(body),
        );
    } else {
        tracing::info!(
            "\n====================== 上游响应 ========================\n[上游响应] {} {}ms\n{}\n==========================================================",
            status,
            format_duration_ms(duration),
            format_body_bytes(body)
        );
    }
}

/// 隐藏 URL 查询串里的 `key=`。
pub fn redact_url(url: &str) -> Cow<'_, str> {
    let Some((base, query)) = url.split_once('?') else {
        return Cow::Borrowed(url);
    };
    let parts: Vec<String> = query
        .split('&')
        .map(|kv| match kv.split_once('=') {
            Some((k, _)) if k.eq_ignore_ascii_case("key") => format!("{k}=***"),
            _ => kv.to_string(),
        })
        .collect();
    Cow::Owned(format!("{base}?{}", parts.join("&")))
}

/// 日志里展示的凭证掩码：保留前 8 个字符。
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    let keep = chars.len().min(8);
    let mut out: String = chars[..keep].iter().collect();
    out.push_str(&"*".repeat(chars.len() - keep));
    out
}

fn format_headers(headers: &HeaderMap) -> String {
    let mut out = String::new();
    for (name, value) in headers.iter() {
        let key = name.as_str();
        let key_lc = key.to_lowercase();
        let val = if key_lc == "authorization" || key_lc == "x-goog-api-key" {
            "***"
        } else {
            value.to_str().unwrap_or("<binary>")
        };
        out.push_str(key);
        out.push_str(": ");
        out.push_str(val);
        out.push('\n');
    }
    out
}

fn format_body_bytes(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }

    // 超大包体不做 JSON 解析，避免为日志付出额外内存与 CPU。
    const MAX_PARSE_BYTES: usize = 32 * 1024 * 1024;
    if bytes.len() > MAX_PARSE_BYTES {
        return format!("(body too large: {} bytes)", bytes.len());
    }

    match sonic_rs::from_slice::<sonic_rs::Value>(bytes) {
        Ok(v) => {
            let sanitized = sanitize_json_for_log(&v, false);
            sonic_rs::to_string_pretty(&sanitized).unwrap_or_else(|_| sanitized.to_string())
        }
        Err(_) => truncate_text_for_log(&String::from_utf8_lossy(bytes)),
    }
}

/// RAW 模式：保持紧凑原文，只截断 inlineData 里的 base64。
fn raw_body_for_log(bytes: &[u8]) -> String {
    const MAX_PARSE_BYTES: usize = 32 * 1024 * 1024;
    if bytes.len() <= MAX_PARSE_BYTES
        && let Ok(v) = sonic_rs::from_slice::<sonic_rs::Value>(bytes)
    {
        return sanitize_json_for_log(&v, false).to_string();
    }
    truncate_text_for_log(&String::from_utf8_lossy(bytes))
}

fn truncate_text_for_log(s: &str) -> String {
    const MAX_CHARS: usize = 32 * 1024;
    if s.chars().count() <= MAX_CHARS {
        return s.to_string();
    }
    let mut out: String = s.chars().take(MAX_CHARS).collect();
    out.push_str("...[TRUNCATED]");
    out
}

fn sanitize_json_for_log(v: &sonic_rs::Value, in_inline_data: bool) -> sonic_rs::Value {
    if let Some(obj) = v.as_object() {
        let mut out = sonic_rs::Object::new();
        for (key, child) in obj.iter() {
            let sanitized = match key {
                "inlineData" | "inline_data" => sanitize_json_for_log(child, true),
                "data" if in_inline_data => match child.as_str() {
                    Some(s) => sonic_rs::Value::from(truncate_base64(s).as_ref()),
                    None => sanitize_json_for_log(child, true),
                },
                _ => sanitize_json_for_log(child, in_inline_data),
            };
            out.insert(key, sanitized);
        }
        return out.into_value();
    }

    if let Some(arr) = v.as_array() {
        let out: Vec<sonic_rs::Value> = arr
            .iter()
            .map(|item| sanitize_json_for_log(item, in_inline_data))
            .collect();
        return sonic_rs::Value::from(out);
    }

    v.to_owned()
}

fn truncate_base64(s: &str) -> Cow<'_, str> {
    const KEEP: usize = 20;
    if s.len() <= 100 || !s.is_ascii() {
        return Cow::Borrowed(s);
    }
    let omitted = s.len() - KEEP * 2;
    Cow::Owned(format!(
        "{}...[TRUNCATED: {omitted} chars]...{}",
        &s[..KEEP],
        &s[s.len() - KEEP..]
    ))
}

use crate::analysis::types::{ConfidenceLevel, Factor, Indicator, IndicatorStatus, ScoreReport};
use serde::Deserialize;
use thiserror::Error;

const MAX_TOP_FACTORS: usize = 5;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("模型输出为空")]
    Empty,

    #[error("模型输出不是合法 JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("报告字段不合法: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReport {
    #[serde(default)]
    authenticity_score: Option<serde_json::Value>,
    #[serde(default)]
    confidence_level: Option<String>,
    #[serde(default, alias = "indicators")]
    key_indicators: Option<Vec<WireIndicator>>,
    #[serde(default, rename = "top5Factors", alias = "topFactors")]
    top_factors: Option<Vec<WireFactor>>,
    #[serde(default, alias = "summary")]
    final_assessment: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireIndicator {
    #[serde(default)]
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct WireFactor {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "confidenceScore")]
    confidence: Option<serde_json::Value>,
    #[serde(default)]
    category: String,
}

/// 去掉代码围栏与首尾杂文，只保留第一个 `{` 到最后一个 `}`。
pub fn extract_json(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```") {
        s = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    }
    if let Some(rest) = s.trim_end().strip_suffix("```") {
        s = rest;
    }
    match (s.find('{'), s.rfind('}')) {
        (Some(start), Some(end)) if end > start => &s[start..=end],
        _ => s.trim(),
    }
}

/// 解析并校验模型输出。
pub fn parse_report(text: &str) -> Result<ScoreReport, ReportError> {
    if text.trim().is_empty() {
        return Err(ReportError::Empty);
    }
    let wire: WireReport = serde_json::from_str(extract_json(text))?;

    let score = wire
        .authenticity_score
        .as_ref()
        .and_then(number_of)
        .ok_or_else(|| ReportError::Invalid("authenticityScore 缺失或不是数字".to_string()))?;
    let authenticity_score = percent(score, "authenticityScore")?;

    let confidence_level = wire
        .confidence_level
        .as_deref()
        .and_then(ConfidenceLevel::parse)
        .ok_or_else(|| ReportError::Invalid("confidenceLevel 必须是 Low/Medium/High".to_string()))?;

    let indicators = wire
        .key_indicators
        .ok_or_else(|| ReportError::Invalid("keyIndicators 缺失".to_string()))?
        .into_iter()
        .map(|i| {
            let status = IndicatorStatus::parse(&i.status).ok_or_else(|| {
                ReportError::Invalid(format!("指标 {:?} 的 status 不合法: {:?}", i.name, i.status))
            })?;
            Ok(Indicator {
                name: i.name,
                status,
                reason: i.reason,
            })
        })
        .collect::<Result<Vec<_>, ReportError>>()?;

    let summary = wire
        .final_assessment
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ReportError::Invalid("finalAssessment 缺失".to_string()))?;

    let top_factors = wire
        .top_factors
        .unwrap_or_default()
        .into_iter()
        .take(MAX_TOP_FACTORS)
        .map(|f| {
            let confidence = match f.confidence.as_ref() {
                None | Some(serde_json::Value::Null) => 0,
                Some(v) => {
                    let n = number_of(v).ok_or_else(|| {
                        ReportError::Invalid(format!("因素 {:?} 的 confidence 不是数字", f.title))
                    })?;
                    percent(n, "confidence")?
                }
            };
            Ok(Factor {
                title: f.title,
                description: f.description,
                confidence_score: confidence,
                category: f.category,
            })
        })
        .collect::<Result<Vec<_>, ReportError>>()?;

    Ok(ScoreReport {
        authenticity_score,
        confidence_level,
        indicators,
        top_factors,
        summary,
    })
}

fn number_of(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        _ => None,
    }
}

fn percent(n: f64, field: &str) -> Result<u8, ReportError> {
    if !n.is_finite() || !(0.0..=100.0).contains(&n) {
        return Err(ReportError::Invalid(format!("{field} 超出 0-100: {n}")));
    }
    Ok(n.round() as u8)
}

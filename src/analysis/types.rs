use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndicatorStatus {
    Natural,
    Suspicious,
}

impl IndicatorStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "natural" => Some(Self::Natural),
            "suspicious" => Some(Self::Suspicious),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indicator {
    pub name: String,
    pub status: IndicatorStatus,
    pub reason: String,
}

impl Indicator {
    pub fn natural(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            status: IndicatorStatus::Natural,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Factor {
    pub title: String,
    pub description: String,
    #[serde(rename = "confidence", alias = "confidenceScore")]
    pub confidence_score: u8,
    pub category: String,
}

/// 评分报告。字段名沿用提示词中约定的 JSON 格式。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreReport {
    #[serde(rename = "authenticityScore")]
    pub authenticity_score: u8,
    #[serde(rename = "confidenceLevel")]
    pub confidence_level: ConfidenceLevel,
    #[serde(rename = "keyIndicators", alias = "indicators")]
    pub indicators: Vec<Indicator>,
    #[serde(rename = "top5Factors", alias = "topFactors", default)]
    pub top_factors: Vec<Factor>,
    #[serde(rename = "finalAssessment", alias = "summary")]
    pub summary: String,
}

/// 一次分析的结果：上游成功，或兜底。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AnalysisOutcome {
    Success {
        #[serde(rename = "credentialId")]
        credential_id: String,
        #[serde(rename = "payload")]
        report: ScoreReport,
    },
    Fallback {
        #[serde(rename = "payload")]
        report: ScoreReport,
    },
}

impl AnalysisOutcome {
    pub fn report(&self) -> &ScoreReport {
        match self {
            Self::Success { report, .. } | Self::Fallback { report } => report,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    pub fn credential_id(&self) -> Option<&str> {
        match self {
            Self::Success { credential_id, .. } => Some(credential_id),
            Self::Fallback { .. } => None,
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Fallback { .. } => "fallback",
        }
    }
}

/// 按 MIME 前缀区分的媒体大类。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Other,
}

impl MediaKind {
    pub fn from_mime(media_type: &str) -> Self {
        let t = media_type.trim().to_lowercase();
        if t.starts_with("image/") {
            Self::Image
        } else if t.starts_with("video/") {
            Self::Video
        } else if t.starts_with("audio/") {
            Self::Audio
        } else {
            Self::Other
        }
    }

    pub fn noun(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Other => "media",
        }
    }
}

use serde::{Deserialize, Serialize};

/// `models/{model}:generateContent` 请求体。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub role: String,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn inline(mime_type: impl Into<String>, base64_data: String) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data: base64_data,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResponsePart {
    #[serde(default)]
    pub text: String,
}

impl GenerateResponse {
    /// 第一个候选的全部文本分片拼接结果。
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect::<String>())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_camel_case_without_empty_fields() {
        let req = GenerateRequest {
            contents: vec![Content {
                role: String::new(),
                parts: vec![Part::text("p"), Part::inline("image/png", "QUJD".to_string())],
            }],
            generation_config: Some(GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 2000,
                response_mime_type: Some("application/json".to_string()),
            }),
        };
        let v: serde_json::Value = serde_json::to_value(&req).unwrap();
        assert_eq!(v["contents"][0]["parts"][0]["text"], "p");
        assert_eq!(
            v["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/png"
        );
        assert!(v["contents"][0].get("role").is_none());
        assert_eq!(v["generationConfig"]["maxOutputTokens"], 2000);
        assert_eq!(
            v["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn response_text_joins_parts_of_first_candidate() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"{\"a\":"},{"text":"1}"}]},"finishReason":"STOP"},{"content":{"parts":[{"text":"ignored"}]}}]}"#;
        let resp: GenerateResponse = sonic_rs::from_str(body).unwrap();
        assert_eq!(resp.text(), "{\"a\":1}");
        assert_eq!(GenerateResponse::default().text(), "");
    }
}

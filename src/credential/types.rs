use serde::{Deserialize, Serialize};

/// 一个上游凭证：标识 + 密钥。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub secret: String,
}

impl Credential {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }

    /// 密钥为空（或全空白）的凭证视为停用。
    pub fn is_usable(&self) -> bool {
        !self.secret.trim().is_empty()
    }

    pub fn masked_secret(&self) -> String {
        crate::logging::mask_secret(&self.secret)
    }
}

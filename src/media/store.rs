use crate::analysis::MediaKind;
use crate::error::AppError;
use axum::body::Bytes;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::Serialize;
use std::time::Duration;

const MB: usize = 1024 * 1024;

/// 所有媒体的总字节上限。
const MAX_TOTAL_BYTES: u64 = 2 * 1024 * 1024 * 1024;

pub const ACCEPTED_TYPES: [&str; 7] = [
    "image/jpeg",
    "image/png",
    "video/mp4",
    "video/quicktime",
    "audio/mpeg",
    "audio/wav",
    "audio/mp4",
];

/// 按媒体大类的上传大小限制。
pub fn size_limit(media_type: &str) -> usize {
    match MediaKind::from_mime(media_type) {
        MediaKind::Image => 10 * MB,
        MediaKind::Audio => 25 * MB,
        MediaKind::Video | MediaKind::Other => 50 * MB,
    }
}

/// 上传前的大小与类型检查。超限优先于类型错误。
pub fn validate_upload(media_type: &str, size: usize) -> Result<(), AppError> {
    let media_type = media_type.trim().to_lowercase();
    let limit = size_limit(&media_type);
    if size > limit {
        return Err(AppError::payload_too_large(format!(
            "文件大小 {:.1}MB 超过 {}MB 限制",
            size as f64 / MB as f64,
            limit / MB
        )));
    }
    if !ACCEPTED_TYPES.contains(&media_type.as_str()) {
        return Err(AppError::bad_request(format!(
            "不支持的文件类型: {media_type}"
        )));
    }
    if size == 0 {
        return Err(AppError::bad_request("文件为空"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    pub original_name: String,
    pub filename: String,
    pub size: usize,
    #[serde(rename = "type")]
    pub media_type: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub bytes: Bytes,
    pub metadata: MediaMetadata,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStats {
    pub count: u64,
    pub total_bytes: u64,
}

/// 上传文件按 id 存放，过期自动淘汰。
#[derive(Clone, Debug)]
pub struct MediaStore {
    entries: Cache<String, StoredMedia>,
}

impl MediaStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(MAX_TOTAL_BYTES)
                .weigher(|_k: &String, v: &StoredMedia| {
                    v.bytes.len().min(u32::MAX as usize) as u32
                })
                .build(),
        }
    }

    pub async fn put(&self, id: String, media: StoredMedia) {
        self.entries.insert(id, media).await;
    }

    pub async fn get(&self, id: &str) -> Option<StoredMedia> {
        if id.is_empty() {
            return None;
        }
        self.entries.get(id).await
    }

    pub async fn stats(&self) -> MediaStats {
        self.entries.run_pending_tasks().await;
        let mut stats = MediaStats::default();
        for (_, media) in self.entries.iter() {
            stats.count += 1;
            stats.total_bytes += media.bytes.len() as u64;
        }
        stats
    }
}

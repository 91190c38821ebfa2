use uuid::Uuid;

/// 上传文件 id：毫秒时间戳 + 短随机后缀，便于按时间排查。
pub fn file_id() -> String {
    format!("{}-{}", chrono::Utc::now().timestamp_millis(), short())
}

/// 同一文件可以被多次分析，每次得到不同的任务 id。
pub fn analysis_id(file_id: &str) -> String {
    format!("analysis-{file_id}-{}", short())
}

fn short() -> String {
    let s = Uuid::new_v4().simple().to_string();
    s[..8].to_string()
}

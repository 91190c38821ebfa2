//! 后台分析任务：阶段进度与结果缓存。

use crate::analysis::{AnalysisOutcome, Dispatcher, Upstream};
use crate::media::StoredMedia;
use crate::util::id;
use moka::future::Cache;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const MAX_JOBS: u64 = 10_000;

const STAGES: [(u8, &str); 5] = [
    (1, "Uploading file..."),
    (2, "Initializing analysis engine..."),
    (3, "Analyzing media signatures..."),
    (4, "Cross-referencing consistency markers..."),
    (5, "Compiling final report..."),
];

pub const STAGE_DONE: u8 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub stage: u8,
    pub message: String,
    pub completed: bool,
}

impl Progress {
    fn new(stage: u8, message: &str, completed: bool) -> Self {
        Self {
            stage,
            message: message.to_string(),
            completed,
        }
    }

    /// 未知任务的初始进度。
    pub fn initializing() -> Self {
        Self::new(0, "Initializing...", false)
    }

    pub fn failed() -> Self {
        Self::new(0, "Analysis failed", true)
    }
}

#[derive(Clone, Debug)]
pub struct Jobs {
    progress: Cache<String, Progress>,
    results: Cache<String, AnalysisOutcome>,
}

impl Jobs {
    pub fn new(ttl: Duration) -> Self {
        Self {
            progress: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(MAX_JOBS)
                .build(),
            results: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(MAX_JOBS)
                .build(),
        }
    }

    pub async fn progress(&self, analysis_id: &str) -> Progress {
        self.progress
            .get(analysis_id)
            .await
            .unwrap_or_else(Progress::initializing)
    }

    /// 只有任务完成后才有结果。
    pub async fn result(&self, analysis_id: &str) -> Option<AnalysisOutcome> {
        self.results.get(analysis_id).await
    }

    async fn set(&self, analysis_id: &str, progress: Progress) {
        self.progress.insert(analysis_id.to_string(), progress).await;
    }

    /// 在后台跑一次分析，立即返回任务 id。
    pub fn spawn<U: Upstream + 'static>(
        &self,
        dispatcher: Arc<Dispatcher<U>>,
        file_id: &str,
        media: StoredMedia,
    ) -> String {
        let analysis_id = id::analysis_id(file_id);
        let jobs = self.clone();
        let job_id = analysis_id.clone();
        tokio::spawn(async move {
            jobs.run(&dispatcher, &job_id, media).await;
        });
        analysis_id
    }

    async fn run<U: Upstream>(&self, dispatcher: &Dispatcher<U>, analysis_id: &str, media: StoredMedia) {
        for &(stage, message) in &STAGES[..3] {
            self.set(analysis_id, Progress::new(stage, message, false)).await;
        }

        let meta = &media.metadata;
        let outcome = match dispatcher
            .analyze(&meta.media_type, &meta.original_name, &media.bytes)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(analysis_id, "分析任务失败: {e}");
                self.set(analysis_id, Progress::failed()).await;
                return;
            }
        };

        for &(stage, message) in &STAGES[3..] {
            self.set(analysis_id, Progress::new(stage, message, false)).await;
        }

        tracing::info!(
            analysis_id,
            source = outcome.source(),
            score = outcome.report().authenticity_score,
            "分析任务完成"
        );
        self.results.insert(analysis_id.to_string(), outcome).await;
        self.set(
            analysis_id,
            Progress::new(STAGE_DONE, "Analysis complete", true),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::types::ConfidenceLevel;
    use crate::cooldown::{AvailabilityTracker, TrackerConfig};
    use crate::credential::{Credential, Store};
    use crate::gemini::ApiError;
    use crate::gemini::types::GenerateRequest;
    use crate::logging::LogLevel;
    use crate::media::MediaMetadata;
    use axum::body::Bytes;

    struct FixedUpstream(&'static str);

    impl Upstream for FixedUpstream {
        async fn generate(
            &self,
            _credential: &Credential,
            _req: &GenerateRequest,
        ) -> Result<String, ApiError> {
            Ok(self.0.to_string())
        }
    }

    fn dispatcher(reply: &'static str) -> Arc<Dispatcher<FixedUpstream>> {
        Arc::new(Dispatcher::new(
            FixedUpstream(reply),
            Arc::new(Store::in_memory(vec![Credential::new("key1", "s1")])),
            Arc::new(AvailabilityTracker::new(TrackerConfig::default())),
            1024,
            LogLevel::Off,
        ))
    }

    fn media(media_type: &str, body: &'static [u8]) -> StoredMedia {
        StoredMedia {
            bytes: Bytes::from_static(body),
            metadata: MediaMetadata {
                original_name: "a.png".to_string(),
                filename: "1-a.png".to_string(),
                size: body.len(),
                media_type: media_type.to_string(),
                uploaded_at: chrono::Utc::now(),
            },
        }
    }

    async fn wait_done(jobs: &Jobs, id: &str) -> Progress {
        for _ in 0..200 {
            let p = jobs.progress(id).await;
            if p.completed {
                return p;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn unknown_job_reports_initializing() {
        let jobs = Jobs::new(Duration::from_secs(60));
        assert_eq!(jobs.progress("nope").await, Progress::initializing());
        assert!(jobs.result("nope").await.is_none());
    }

    #[tokio::test]
    async fn job_runs_to_completion_and_stores_outcome() {
        let jobs = Jobs::new(Duration::from_secs(60));
        let d = dispatcher(
            r#"{"authenticityScore":91,"confidenceLevel":"High","keyIndicators":[],"finalAssessment":"ok"}"#,
        );
        let id = jobs.spawn(d, "f1", media("image/png", b"png"));

        let p = wait_done(&jobs, &id).await;
        assert_eq!(p.stage, STAGE_DONE);
        assert_eq!(p.message, "Analysis complete");

        let outcome = jobs.result(&id).await.unwrap();
        assert_eq!(outcome.credential_id(), Some("key1"));
        assert_eq!(outcome.report().authenticity_score, 91);
    }

    #[tokio::test]
    async fn upstream_garbage_still_completes_with_fallback() {
        let jobs = Jobs::new(Duration::from_secs(60));
        let id = jobs.spawn(dispatcher("nope"), "f2", media("audio/wav", b"wav"));

        assert_eq!(wait_done(&jobs, &id).await.stage, STAGE_DONE);
        let outcome = jobs.result(&id).await.unwrap();
        assert!(outcome.is_fallback());
        assert_eq!(outcome.report().confidence_level, ConfidenceLevel::Medium);
    }

    #[tokio::test]
    async fn caller_error_marks_job_failed() {
        let jobs = Jobs::new(Duration::from_secs(60));
        let id = jobs.spawn(dispatcher("unused"), "f3", media("image/png", b""));

        assert_eq!(wait_done(&jobs, &id).await, Progress::failed());
        assert!(jobs.result(&id).await.is_none());
    }
}

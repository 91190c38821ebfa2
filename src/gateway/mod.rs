//! HTTP 接口：上传/分析、管理、健康检查。

pub mod admin;
pub mod analyze;
pub mod health;

use crate::analysis::Dispatcher;
use crate::config::Config;
use crate::cooldown::{AvailabilityTracker, TrackerConfig};
use crate::credential::Store;
use crate::gemini::GeminiClient;
use crate::jobs::Jobs;
use crate::media::MediaStore;
use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Router, middleware};
use std::sync::Arc;
use std::time::Instant;

/// 上传上限 50MB，multipart 编码再留一些余量。
const MAX_BODY_BYTES: usize = 60 * 1024 * 1024;

pub struct AppState {
    pub cfg: Config,
    pub dispatcher: Arc<Dispatcher<GeminiClient>>,
    pub media: MediaStore,
    pub jobs: Jobs,
    pub started_at: Instant,
}

impl AppState {
    /// 组装所有组件。凭证需要调用方另行 `load`。
    pub fn new(cfg: Config) -> anyhow::Result<Self> {
        let client = GeminiClient::new(&cfg).context("初始化 GeminiClient 失败")?;
        let store = Arc::new(Store::new(&cfg));
        let tracker = Arc::new(AvailabilityTracker::new(TrackerConfig {
            cooldown: cfg.cooldown(),
            failure_threshold: cfg.max_failures,
        }));
        let dispatcher = Arc::new(Dispatcher::new(
            client,
            store,
            tracker,
            cfg.max_inline_bytes,
            cfg.log_level(),
        ));

        Ok(Self {
            media: MediaStore::new(cfg.media_ttl()),
            jobs: Jobs::new(cfg.media_ttl()),
            dispatcher,
            cfg,
            started_at: Instant::now(),
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        self.dispatcher.store()
    }

    pub fn tracker(&self) -> &Arc<AvailabilityTracker> {
        self.dispatcher.tracker()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    // === 公开路由 ===
    let public_routes = Router::new()
        .route("/health", get(health::handle_health))
        .route("/api/upload", post(analyze::handle_upload))
        .route(
            "/api/analyze",
            post(analyze::handle_analyze_start).get(analyze::handle_analyze_result),
        )
        .route("/api/analyze/direct", post(analyze::handle_analyze_direct))
        .route("/api/progress/{analysis_id}", get(analyze::handle_progress));

    // === 管理路由（需要密码）===
    let admin_routes = Router::new()
        .route(
            "/api/admin/keys",
            get(admin::handle_keys_get).post(admin::handle_keys_post),
        )
        .route("/api/admin/test-key", post(admin::handle_test_key))
        .route("/api/admin/test-fallback", post(admin::handle_test_fallback))
        .route("/api/admin/cooldowns", get(admin::handle_cooldowns))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin::admin_auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

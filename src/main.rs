pub mod analysis;
pub mod config;
pub mod cooldown;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod gemini;
pub mod jobs;
pub mod logging;
pub mod media;
pub mod util;

#[cfg(test)]
mod testutil;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (cfg, env_err) = config::Config::load();

    init_tracing();
    if let Some(e) = env_err {
        tracing::warn!("环境变量解析失败，全部配置退回默认值: {e}");
    }

    let state = Arc::new(gateway::AppState::new(cfg.clone())?);
    // 凭证文件损坏时 load 会退回环境变量，不阻塞启动。
    if let Err(e) = state.store().load().await {
        tracing::warn!("加载凭证失败: {e:#}");
    }

    let working = state.store().working_count();
    if working == 0 {
        tracing::warn!("没有可用的 Gemini 凭证，所有分析都会返回兜底结果");
    } else {
        tracing::info!(
            "凭证池：共 {} 个，可用 {working} 个；冷却 {}s / 阈值 {} 次",
            state.store().count(),
            cfg.cooldown_seconds,
            cfg.max_failures
        );
    }
    if cfg.admin_password.trim().is_empty() {
        tracing::info!("未设置 ADMIN_PASSWORD，管理接口已关闭");
    }

    let app = gateway::router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));

    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("绑定监听端口失败")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务异常退出")?;

    Ok(())
}

fn init_tracing() {
    // 依赖库默认压到 warn，本项目自身至少 info，避免预设的 RUST_LOG=warn 吞掉调度日志。
    // DEBUG 只控制上游请求/响应日志块，不影响这里的过滤。
    let env = std::env::var("RUST_LOG").unwrap_or_default();
    let env = env.trim();
    let filter = if env.is_empty() {
        EnvFilter::new("warn,pratyaksh=info")
    } else if env.contains("pratyaksh") {
        EnvFilter::new(env)
    } else {
        EnvFilter::new(format!("{env},pratyaksh=info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("收到退出信号，准备关闭服务...");
}

//! Tutor 服务入口
//!
//! 启动: cargo run
//! 配置: config/default.toml，环境变量 TUTOR__* 覆盖

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tutor::api::create_router;
use tutor::config::load_config;
use tutor::llm::create_llm_from_config;
use tutor::session::{
    ConversationStore, MemoryConversationStore, SessionOrchestrator, SqliteConversationStore,
};
use tutor::upstream::{ProgressGateway, ReqwestTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with(fmt::layer())
        .init();

    let cfg = load_config(None).context("failed to load configuration")?;
    tracing::info!("Starting {} on {}:{}", cfg.app.name, cfg.app.host, cfg.app.port);

    let transport = ReqwestTransport::new(
        cfg.upstream.base_url.clone(),
        Duration::from_secs(cfg.upstream.timeout_secs),
        cfg.upstream.api_key.clone(),
    )
    .context("failed to build upstream HTTP client")?;
    let gateway = Arc::new(ProgressGateway::new(transport, cfg.retry.policy()));

    let store: Arc<dyn ConversationStore> = match &cfg.session.db_path {
        Some(path) => {
            tracing::info!("Using SQLite conversation store: {}", path.display());
            Arc::new(
                SqliteConversationStore::new(path)
                    .await
                    .context("failed to open conversation database")?,
            )
        }
        None => {
            tracing::warn!("No db_path configured, conversations will not survive restarts");
            Arc::new(MemoryConversationStore::new())
        }
    };

    let llm = create_llm_from_config(&cfg.llm);

    let orchestrator = Arc::new(SessionOrchestrator::new(
        store,
        gateway,
        llm,
        cfg.session.completion_marker.clone(),
        cfg.session.max_context_turns,
    ));

    let app = create_router(orchestrator);
    let addr = format!("{}:{}", cfg.app.host, cfg.app.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

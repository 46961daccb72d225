//! LLM 客户端抽象与实现（OpenAI 兼容 / Mock）

mod mock;
mod openai;
mod traits;

pub use mock::MockLlmClient;
pub use openai::OpenAiClient;
pub use traits::LlmClient;

use std::sync::Arc;

use crate::config::LlmSection;

/// 根据配置与环境变量选择 LLM 后端：有 OPENAI_API_KEY 走 OpenAI 兼容端点，否则用 Mock
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    if std::env::var("OPENAI_API_KEY").is_ok() {
        tracing::info!("Using OpenAI-compatible LLM ({})", cfg.model);
        Arc::new(OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, None))
    } else {
        tracing::warn!("No API key set, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

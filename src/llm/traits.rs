//! LLM 客户端抽象
//!
//! 生成引擎是黑盒能力：给定有序消息，异步返回文本，可能失败。
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient。

use async_trait::async_trait;

use crate::session::Turn;

/// LLM 客户端 trait：对有序对话窗口做一次非流式完成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 生成一条回复；失败时返回可读的错误描述
    async fn generate(&self, turns: &[Turn]) -> Result<String, String>;
}

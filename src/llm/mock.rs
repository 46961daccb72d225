//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 可按顺序预置回复；脚本耗尽或为空时回显最后一条 User 消息。

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::llm::LlmClient;
use crate::session::{Turn, TurnRole};

/// Mock 客户端：预置脚本优先，否则回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<String>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置按调用顺序弹出的回复
    pub fn scripted(replies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().map(Into::into).collect()),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(&self, turns: &[Turn]) -> Result<String, String> {
        if let Some(reply) = self.script.lock().await.pop_front() {
            return Ok(reply);
        }

        let last_user = turns
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::User)
            .map(|t| t.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!("Echo from Mock: {}", last_user))
    }
}

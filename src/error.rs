//! 领域错误类型
//!
//! 编排器向路由层暴露的分类失败：调用方据此区分「稍后重试」「会话已结束」「目标不存在」。

use thiserror::Error;
use uuid::Uuid;

/// 会话编排过程中可能出现的错误（上游不可达、目标缺失、状态冲突、生成失败等）
#[derive(Error, Debug)]
pub enum SessionError {
    /// 上游后端在耗尽重试后仍不可达，调用方可稍后重试
    #[error("Upstream unavailable after {attempts} attempts: {message}")]
    UpstreamUnavailable { attempts: u32, message: String },

    /// 引用的用户 / 主题 / 会话不存在，重试无意义
    #[error("Not found: {0}")]
    NotFound(String),

    /// 同一 (user, topic) 已存在 Active 会话
    #[error("Active session already exists for user {user_id} and topic {topic_id}")]
    Conflict { user_id: i64, topic_id: i64 },

    /// 会话已是终态，拒绝新输入
    #[error("Session {0} is not active")]
    SessionNotActive(Uuid),

    /// 启动时上游上下文获取失败，会话未创建
    #[error("Context unavailable: {0}")]
    ContextUnavailable(String),

    /// LLM 生成失败
    #[error("Generation failure: {0}")]
    GenerationFailure(String),

    /// 持久化层错误
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for SessionError {
    fn from(e: sqlx::Error) -> Self {
        SessionError::Storage(e.to_string())
    }
}

impl SessionError {
    /// 路由层映射用的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            SessionError::NotFound(_) => 404,
            SessionError::Conflict { .. } | SessionError::SessionNotActive(_) => 409,
            SessionError::UpstreamUnavailable { .. } | SessionError::ContextUnavailable(_) => 503,
            SessionError::GenerationFailure(_) => 502,
            SessionError::Storage(_) => 500,
        }
    }
}

//! 会话领域模型
//!
//! Session 1—* Turn（有序、只追加），Session 1—1 SessionContext（启动时快照）。
//! 状态只沿 Active → Completed / Abandoned 迁移，终态不可复活。

pub mod orchestrator;
pub mod store;

pub use orchestrator::{MessageOutcome, SessionDetail, SessionOrchestrator, StartOutcome};
pub use store::{ConversationStore, MemoryConversationStore, SqliteConversationStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::upstream::{TopicSpec, UserContext};

/// 会话生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SessionStatus::Active),
            "completed" => Some(SessionStatus::Completed),
            "abandoned" => Some(SessionStatus::Abandoned),
            _ => None,
        }
    }
}

/// 消息角色（与 LLM API 一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnRole::System => "system",
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(TurnRole::System),
            "user" => Some(TurnRole::User),
            "assistant" => Some(TurnRole::Assistant),
            _ => None,
        }
    }
}

/// 一次辅导会话：绑定 (user, topic, course) 三元组
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: i64,
    pub topic_id: i64,
    pub course_id: i64,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    /// 不变量：当且仅当 status == Completed 时为 Some
    pub completed_at: Option<DateTime<Utc>>,
}

/// 会话内的一条消息：按 seq 单调递增，只追加
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: i64,
    pub session_id: Uuid,
    pub role: TurnRole,
    pub content: String,
    pub seq: i64,
    pub created_at: DateTime<Utc>,
}

/// 启动时捕获的外部事实快照，会话生命周期内不变，仅供 Prompt 组装使用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub user_level: Option<String>,
    pub completed_topic_ids: Vec<i64>,
    pub struggle_topics: Vec<String>,
    pub course_title: String,
    pub topic_title: String,
    pub topic_description: String,
    pub learning_objectives: Option<String>,
    pub prompt_template: Option<String>,
}

impl SessionContext {
    /// 从上游两份 DTO 捕获快照
    pub fn capture(topic: &TopicSpec, user: Option<&UserContext>) -> Self {
        Self {
            user_level: user.and_then(|u| u.user_level.clone()),
            completed_topic_ids: user.map(|u| u.completed_topic_ids.clone()).unwrap_or_default(),
            struggle_topics: user.map(|u| u.struggle_topics.clone()).unwrap_or_default(),
            course_title: topic.course_title.clone(),
            topic_title: topic.title.clone(),
            topic_description: topic.description.clone(),
            learning_objectives: topic.learning_objectives.clone(),
            prompt_template: topic.prompt_template.clone(),
        }
    }
}

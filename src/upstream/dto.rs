//! 上游后端的传输对象
//!
//! 上游是 .NET 服务，线上的字段名为 PascalCase；alias 同时接受 snake_case，便于测试桩与本地 mock。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 用户上下文：水平、已完成主题、薄弱点
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserContext {
    #[serde(alias = "user_id")]
    pub user_id: i64,
    #[serde(default, alias = "user_level")]
    pub user_level: Option<String>,
    #[serde(default, alias = "completed_topic_ids")]
    pub completed_topic_ids: Vec<i64>,
    #[serde(default, alias = "struggle_topics")]
    pub struggle_topics: Vec<String>,
}

/// 主题详情：标题、描述、所属课程、Prompt 模板与学习目标
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TopicSpec {
    #[serde(alias = "id")]
    pub id: i64,
    #[serde(alias = "title")]
    pub title: String,
    #[serde(alias = "description")]
    pub description: String,
    #[serde(default, alias = "prompt_template")]
    pub prompt_template: Option<String>,
    #[serde(alias = "course_id")]
    pub course_id: i64,
    #[serde(alias = "course_title")]
    pub course_title: String,
    #[serde(default, alias = "learning_objectives")]
    pub learning_objectives: Option<String>,
}

/// 主题完成通知（至少一次语义，上游按幂等处理重复）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompletionNotice {
    pub user_id: i64,
    pub topic_id: i64,
    pub course_id: i64,
    pub completed_at: DateTime<Utc>,
    pub session_id: Uuid,
}

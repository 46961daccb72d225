//! 会话存储抽象层
//!
//! 定义统一的会话/对话历史接口，提供内存与 SQLite 两种实现。
//! 历史只追加；给 LLM 的读取视图按窗口截断，System 指令永远保留。

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Session, SessionContext, SessionStatus, Turn, TurnRole};
use crate::error::SessionError;

/// 会话存储接口
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// 创建 Active 会话并保存上下文快照
    async fn create_session(
        &self,
        user_id: i64,
        topic_id: i64,
        course_id: i64,
        context: SessionContext,
    ) -> Result<Session, SessionError>;

    /// 按 ID 取会话
    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, SessionError>;

    /// 取会话的上下文快照
    async fn get_context(&self, id: Uuid) -> Result<Option<SessionContext>, SessionError>;

    /// 查 (user, topic) 的 Active 会话
    async fn find_active(
        &self,
        user_id: i64,
        topic_id: i64,
    ) -> Result<Option<Session>, SessionError>;

    /// 状态迁移；completed_at 仅在迁移到 Completed 时为 Some
    async fn set_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), SessionError>;

    /// 追加一条消息，seq 单调递增；永不改写已有消息
    async fn append_turn(
        &self,
        session_id: Uuid,
        role: TurnRole,
        content: &str,
    ) -> Result<Turn, SessionError>;

    /// 按 seq 升序取全部消息
    async fn list_turns(&self, session_id: Uuid) -> Result<Vec<Turn>, SessionError>;

    /// 取发给 LLM 的窗口：System 永远在首位，其余只保留最近 max_turns-1 条（原序）
    async fn read_for_context(
        &self,
        session_id: Uuid,
        max_turns: usize,
    ) -> Result<Vec<Turn>, SessionError> {
        let turns = self.list_turns(session_id).await?;
        Ok(context_window(turns, max_turns))
    }
}

/// 截断策略：System 消息始终保留，其余取最近 max_turns-1 条，窗口内维持原顺序
fn context_window(mut turns: Vec<Turn>, max_turns: usize) -> Vec<Turn> {
    let system = turns
        .iter()
        .position(|t| t.role == TurnRole::System)
        .map(|i| turns.remove(i));

    let budget = max_turns.saturating_sub(1);
    let start = turns.len().saturating_sub(budget);

    let mut window = Vec::with_capacity(budget + 1);
    if let Some(s) = system {
        window.push(s);
    }
    window.extend(turns.drain(start..));
    window
}

/// 内存实现：测试与本地试跑用，无持久化
#[derive(Default)]
pub struct MemoryConversationStore {
    records: RwLock<HashMap<Uuid, SessionRecord>>,
    next_turn_id: AtomicI64,
}

struct SessionRecord {
    session: Session,
    context: SessionContext,
    turns: Vec<Turn>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create_session(
        &self,
        user_id: i64,
        topic_id: i64,
        course_id: i64,
        context: SessionContext,
    ) -> Result<Session, SessionError> {
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            topic_id,
            course_id,
            status: SessionStatus::Active,
            started_at: Utc::now(),
            completed_at: None,
        };
        self.records.write().await.insert(
            session.id,
            SessionRecord {
                session: session.clone(),
                context,
                turns: Vec::new(),
            },
        );
        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, SessionError> {
        Ok(self.records.read().await.get(&id).map(|r| r.session.clone()))
    }

    async fn get_context(&self, id: Uuid) -> Result<Option<SessionContext>, SessionError> {
        Ok(self.records.read().await.get(&id).map(|r| r.context.clone()))
    }

    async fn find_active(
        &self,
        user_id: i64,
        topic_id: i64,
    ) -> Result<Option<Session>, SessionError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|r| {
                r.session.user_id == user_id
                    && r.session.topic_id == topic_id
                    && r.session.status == SessionStatus::Active
            })
            .map(|r| r.session.clone()))
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), SessionError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| SessionError::NotFound(format!("session {}", id)))?;
        record.session.status = status;
        record.session.completed_at = completed_at;
        Ok(())
    }

    async fn append_turn(
        &self,
        session_id: Uuid,
        role: TurnRole,
        content: &str,
    ) -> Result<Turn, SessionError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&session_id)
            .ok_or_else(|| SessionError::NotFound(format!("session {}", session_id)))?;
        let turn = Turn {
            id: self.next_turn_id.fetch_add(1, Ordering::SeqCst) + 1,
            session_id,
            role,
            content: content.to_string(),
            seq: record.turns.len() as i64,
            created_at: Utc::now(),
        };
        record.turns.push(turn.clone());
        Ok(turn)
    }

    async fn list_turns(&self, session_id: Uuid) -> Result<Vec<Turn>, SessionError> {
        Ok(self
            .records
            .read()
            .await
            .get(&session_id)
            .map(|r| r.turns.clone())
            .unwrap_or_default())
    }
}

/// SQLite 实现：服务重启后会话与历史可恢复
pub struct SqliteConversationStore {
    pool: sqlx::sqlite::SqlitePool,
}

impl SqliteConversationStore {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, sqlx::Error> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                topic_id INTEGER NOT NULL,
                course_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                seq INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS session_contexts (
                session_id TEXT PRIMARY KEY,
                context_json TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_user_topic ON sessions(user_id, topic_id, status)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_turns_session ON turns(session_id, seq)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn session_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Session, SessionError> {
        let id: String = row.get("id");
        let status: String = row.get("status");
        let started_at: String = row.get("started_at");
        let completed_at: Option<String> = row.get("completed_at");

        Ok(Session {
            id: Uuid::parse_str(&id).map_err(|e| SessionError::Storage(e.to_string()))?,
            user_id: row.get("user_id"),
            topic_id: row.get("topic_id"),
            course_id: row.get("course_id"),
            status: SessionStatus::parse(&status)
                .ok_or_else(|| SessionError::Storage(format!("unknown status {}", status)))?,
            started_at: parse_rfc3339(&started_at)?,
            completed_at: completed_at.as_deref().map(parse_rfc3339).transpose()?,
        })
    }

    fn turn_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Turn, SessionError> {
        let session_id: String = row.get("session_id");
        let role: String = row.get("role");
        let created_at: String = row.get("created_at");

        Ok(Turn {
            id: row.get("id"),
            session_id: Uuid::parse_str(&session_id)
                .map_err(|e| SessionError::Storage(e.to_string()))?,
            role: TurnRole::parse(&role)
                .ok_or_else(|| SessionError::Storage(format!("unknown role {}", role)))?,
            content: row.get("content"),
            seq: row.get("seq"),
            created_at: parse_rfc3339(&created_at)?,
        })
    }
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, SessionError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SessionError::Storage(e.to_string()))
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn create_session(
        &self,
        user_id: i64,
        topic_id: i64,
        course_id: i64,
        context: SessionContext,
    ) -> Result<Session, SessionError> {
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            topic_id,
            course_id,
            status: SessionStatus::Active,
            started_at: Utc::now(),
            completed_at: None,
        };

        sqlx::query(
            "INSERT INTO sessions (id, user_id, topic_id, course_id, status, started_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, NULL)",
        )
        .bind(session.id.to_string())
        .bind(session.user_id)
        .bind(session.topic_id)
        .bind(session.course_id)
        .bind(session.status.as_str())
        .bind(session.started_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let context_json = serde_json::to_string(&context)
            .map_err(|e| SessionError::Storage(e.to_string()))?;
        sqlx::query("INSERT INTO session_contexts (session_id, context_json) VALUES (?, ?)")
            .bind(session.id.to_string())
            .bind(context_json)
            .execute(&self.pool)
            .await?;

        Ok(session)
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<Session>, SessionError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::session_from_row).transpose()
    }

    async fn get_context(&self, id: Uuid) -> Result<Option<SessionContext>, SessionError> {
        let row = sqlx::query("SELECT context_json FROM session_contexts WHERE session_id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let json: String = r.get("context_json");
            serde_json::from_str(&json).map_err(|e| SessionError::Storage(e.to_string()))
        })
        .transpose()
    }

    async fn find_active(
        &self,
        user_id: i64,
        topic_id: i64,
    ) -> Result<Option<Session>, SessionError> {
        let row = sqlx::query(
            "SELECT * FROM sessions WHERE user_id = ? AND topic_id = ? AND status = 'active' LIMIT 1",
        )
        .bind(user_id)
        .bind(topic_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::session_from_row).transpose()
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), SessionError> {
        let result = sqlx::query("UPDATE sessions SET status = ?, completed_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(completed_at.map(|t| t.to_rfc3339()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(SessionError::NotFound(format!("session {}", id)));
        }
        Ok(())
    }

    async fn append_turn(
        &self,
        session_id: Uuid,
        role: TurnRole,
        content: &str,
    ) -> Result<Turn, SessionError> {
        // 编排器串行化同一会话的写入，seq 查询与插入之间没有竞争
        let row = sqlx::query("SELECT COALESCE(MAX(seq) + 1, 0) AS next FROM turns WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        let seq: i64 = row.get("next");
        let created_at = Utc::now();

        let result = sqlx::query(
            "INSERT INTO turns (session_id, role, content, seq, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id.to_string())
        .bind(role.as_str())
        .bind(content)
        .bind(seq)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(Turn {
            id: result.last_insert_rowid(),
            session_id,
            role,
            content: content.to_string(),
            seq,
            created_at,
        })
    }

    async fn list_turns(&self, session_id: Uuid) -> Result<Vec<Turn>, SessionError> {
        let rows = sqlx::query("SELECT * FROM turns WHERE session_id = ? ORDER BY seq ASC")
            .bind(session_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::turn_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context() -> SessionContext {
        SessionContext {
            user_level: Some("beginner".into()),
            completed_topic_ids: vec![3],
            struggle_topics: vec!["loops".into()],
            course_title: "Intro to Programming".into(),
            topic_title: "Variables".into(),
            topic_description: "Naming values".into(),
            learning_objectives: None,
            prompt_template: None,
        }
    }

    async fn fill_turns(store: &dyn ConversationStore, id: Uuid, extra: usize) {
        store.append_turn(id, TurnRole::System, "system prompt").await.unwrap();
        for i in 0..extra {
            let role = if i % 2 == 0 { TurnRole::User } else { TurnRole::Assistant };
            store.append_turn(id, role, &format!("msg {}", i)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn window_keeps_system_plus_most_recent() {
        let store = MemoryConversationStore::new();
        let session = store.create_session(1, 5, 2, context()).await.unwrap();
        fill_turns(&store, session.id, 10).await;

        let window = store.read_for_context(session.id, 4).await.unwrap();
        assert_eq!(window.len(), 4);
        assert_eq!(window[0].role, TurnRole::System);
        assert_eq!(window[1].content, "msg 7");
        assert_eq!(window[2].content, "msg 8");
        assert_eq!(window[3].content, "msg 9");
    }

    #[tokio::test]
    async fn window_returns_everything_when_short() {
        let store = MemoryConversationStore::new();
        let session = store.create_session(1, 5, 2, context()).await.unwrap();
        fill_turns(&store, session.id, 2).await;

        let window = store.read_for_context(session.id, 50).await.unwrap();
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].role, TurnRole::System);
    }

    #[tokio::test]
    async fn seq_is_monotonic_and_append_only() {
        let store = MemoryConversationStore::new();
        let session = store.create_session(1, 5, 2, context()).await.unwrap();
        fill_turns(&store, session.id, 5).await;

        let turns = store.list_turns(session.id).await.unwrap();
        for (i, turn) in turns.iter().enumerate() {
            assert_eq!(turn.seq, i as i64);
        }
    }

    #[tokio::test]
    async fn sqlite_round_trips_across_reopen() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("tutor_test.db");

        let store = SqliteConversationStore::new(&db_path).await.unwrap();
        let session = store.create_session(1, 5, 2, context()).await.unwrap();
        fill_turns(&store, session.id, 3).await;
        store
            .set_status(session.id, SessionStatus::Completed, Some(Utc::now()))
            .await
            .unwrap();
        store.close().await;

        let store2 = SqliteConversationStore::new(&db_path).await.unwrap();
        let loaded = store2.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Completed);
        assert!(loaded.completed_at.is_some());

        let turns = store2.list_turns(session.id).await.unwrap();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[0].role, TurnRole::System);

        let ctx = store2.get_context(session.id).await.unwrap().unwrap();
        assert_eq!(ctx.topic_title, "Variables");
    }

    #[tokio::test]
    async fn sqlite_find_active_matches_user_topic_pair() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("tutor_test.db");
        let store = SqliteConversationStore::new(&db_path).await.unwrap();

        let session = store.create_session(1, 5, 2, context()).await.unwrap();
        assert!(store.find_active(1, 5).await.unwrap().is_some());
        assert!(store.find_active(1, 6).await.unwrap().is_none());

        store
            .set_status(session.id, SessionStatus::Abandoned, None)
            .await
            .unwrap();
        assert!(store.find_active(1, 5).await.unwrap().is_none());
    }
}

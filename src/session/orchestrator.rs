//! 会话编排器：状态机主控
//!
//! 负责：启动会话（拉上游上下文 → 建 Prompt → 开场白）、处理用户消息
//! （追加 → 生成 → 完成检测 → 必要时状态迁移与上游通知）、放弃会话。
//! 同一会话的消息处理用 per-session 互斥锁串行化，不同会话互不阻塞。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::store::ConversationStore;
use super::{Session, SessionContext, SessionStatus, Turn, TurnRole};
use crate::completion;
use crate::error::SessionError;
use crate::llm::LlmClient;
use crate::prompt::PromptBuilder;
use crate::upstream::{CompletionNotice, GatewayError, HttpTransport, ProgressGateway};

/// start 的结果：会话快照 + 开场白（已剥离标记）
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub session: Session,
    pub opening_message: String,
}

/// post_message 的结果
///
/// notify_failed：本地已迁移到 Completed 但上游通知重试耗尽。
/// 这是警告不是错误——用户的消息没有失败，状态也不会回滚。
#[derive(Debug, Clone)]
pub struct MessageOutcome {
    pub session_id: Uuid,
    pub reply: String,
    pub completed: bool,
    pub notify_failed: bool,
    pub timestamp: DateTime<Utc>,
}

/// get_session 的结果：快照 + 上下文 + 历史（不含 System 指令）
#[derive(Debug, Clone)]
pub struct SessionDetail {
    pub session: Session,
    pub context: Option<SessionContext>,
    pub turns: Vec<Turn>,
}

/// 顶层状态机：协调存储、上游网关、Prompt 组装、完成检测与 LLM
pub struct SessionOrchestrator<T: HttpTransport> {
    store: Arc<dyn ConversationStore>,
    gateway: Arc<ProgressGateway<T>>,
    llm: Arc<dyn LlmClient>,
    prompt: PromptBuilder,
    marker: String,
    max_context_turns: usize,
    /// 把冲突检查与建会话圈成原子段；上游拉取在段外，不挡无关请求
    start_lock: Mutex<()>,
    /// 每个会话一把锁，锁表本身短暂持有；会话到终态后条目被回收
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl<T: HttpTransport> SessionOrchestrator<T> {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        gateway: Arc<ProgressGateway<T>>,
        llm: Arc<dyn LlmClient>,
        marker: impl Into<String>,
        max_context_turns: usize,
    ) -> Self {
        let marker = marker.into();
        Self {
            store,
            gateway,
            llm,
            prompt: PromptBuilder::new(marker.clone()),
            marker,
            max_context_turns,
            start_lock: Mutex::new(()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 启动新会话
    ///
    /// 同一 (user, topic) 已有 Active 会话时拒绝（Conflict），避免同一主题并行辅导线程。
    /// 两路上游拉取并行进行；任一失败则会话不创建。
    pub async fn start(
        &self,
        user_id: i64,
        topic_id: i64,
        course_id: i64,
    ) -> Result<StartOutcome, SessionError> {
        if self.store.find_active(user_id, topic_id).await?.is_some() {
            return Err(SessionError::Conflict { user_id, topic_id });
        }

        tracing::info!(
            "Starting session: user_id={}, topic_id={}, course_id={}",
            user_id,
            topic_id,
            course_id
        );

        let (topic, user_ctx) = tokio::try_join!(
            async {
                self.gateway
                    .fetch_topic_spec(topic_id)
                    .await
                    .map_err(map_fetch_error)
            },
            async {
                self.gateway
                    .fetch_user_context(user_id)
                    .await
                    .map_err(map_fetch_error)
            },
        )?;

        let context = SessionContext::capture(&topic, Some(&user_ctx));
        let system_prompt = self.prompt.build(&topic, Some(&user_ctx));

        // 上游拉取期间另一个 start 可能已建过会话，检查与创建必须同段
        let session = {
            let _gate = self.start_lock.lock().await;
            if self.store.find_active(user_id, topic_id).await?.is_some() {
                return Err(SessionError::Conflict { user_id, topic_id });
            }
            self.store
                .create_session(user_id, topic_id, course_id, context)
                .await?
        };
        let system_turn = self
            .store
            .append_turn(session.id, TurnRole::System, &system_prompt)
            .await?;

        // 开场白仅以 System 指令为种子；标记若出现只剥离，不会完成一个还没有用户输入的会话
        let raw_opening = self
            .llm
            .generate(std::slice::from_ref(&system_turn))
            .await
            .map_err(SessionError::GenerationFailure)?;
        let detection = completion::detect(&raw_opening, &self.marker);

        // 只落清洗后的文本，任何读取路径都见不到标记
        self.store
            .append_turn(session.id, TurnRole::Assistant, &detection.cleaned)
            .await?;

        tracing::info!("Session created: session_id={}", session.id);

        Ok(StartOutcome {
            session,
            opening_message: detection.cleaned,
        })
    }

    /// 处理一条用户消息
    ///
    /// 整个调用持有该会话的锁：追加、生成、完成迁移不会与并发调用交错。
    /// 终态会话直接拒绝，不追加任何消息。
    pub async fn post_message(
        &self,
        session_id: Uuid,
        user_text: &str,
    ) -> Result<MessageOutcome, SessionError> {
        let _guard = self.session_lock(session_id).await;

        let session = match self.store.get_session(session_id).await? {
            Some(s) => s,
            None => {
                self.release_lock(session_id).await;
                return Err(SessionError::NotFound(format!("session {}", session_id)));
            }
        };
        if session.status.is_terminal() {
            self.release_lock(session_id).await;
            return Err(SessionError::SessionNotActive(session_id));
        }

        self.store
            .append_turn(session_id, TurnRole::User, user_text)
            .await?;

        let window = self
            .store
            .read_for_context(session_id, self.max_context_turns)
            .await?;
        let raw_reply = self
            .llm
            .generate(&window)
            .await
            .map_err(SessionError::GenerationFailure)?;

        // 检测在原始回复上做，存储只落清洗后的文本
        let detection = completion::detect(&raw_reply, &self.marker);
        self.store
            .append_turn(session_id, TurnRole::Assistant, &detection.cleaned)
            .await?;

        let now = Utc::now();
        let mut notify_failed = false;

        if detection.completed {
            self.store
                .set_status(session_id, SessionStatus::Completed, Some(now))
                .await?;
            tracing::info!("Session completed: session_id={}", session_id);

            let notice = CompletionNotice {
                user_id: session.user_id,
                topic_id: session.topic_id,
                course_id: session.course_id,
                completed_at: now,
                session_id,
            };
            if let Err(e) = self.gateway.notify_completion(&notice).await {
                // 本地状态已是 Completed，不回滚；降级为警告交给调用方
                tracing::warn!(
                    "Session {} completed locally but upstream notification failed: {}",
                    session_id,
                    e
                );
                notify_failed = true;
            }
            // 终态不再接收消息，锁条目就此回收
            self.release_lock(session_id).await;
        }

        Ok(MessageOutcome {
            session_id,
            reply: detection.cleaned,
            completed: detection.completed,
            notify_failed,
            timestamp: now,
        })
    }

    /// 放弃会话：Active → Abandoned，无上游通知
    ///
    /// 终态下是幂等的 no-op 成功——放弃一个已结束的会话不算故障。
    pub async fn abandon(&self, session_id: Uuid) -> Result<Session, SessionError> {
        let _guard = self.session_lock(session_id).await;

        let session = match self.store.get_session(session_id).await? {
            Some(s) => s,
            None => {
                self.release_lock(session_id).await;
                return Err(SessionError::NotFound(format!("session {}", session_id)));
            }
        };
        if session.status.is_terminal() {
            self.release_lock(session_id).await;
            return Ok(session);
        }

        self.store
            .set_status(session_id, SessionStatus::Abandoned, None)
            .await?;
        tracing::info!("Session abandoned: session_id={}", session_id);
        self.release_lock(session_id).await;

        self.store
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(format!("session {}", session_id)))
    }

    /// 会话详情：快照 + 上下文 + 历史（System 指令不外露）
    pub async fn get_session(&self, session_id: Uuid) -> Result<SessionDetail, SessionError> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound(format!("session {}", session_id)))?;
        let context = self.store.get_context(session_id).await?;
        let turns = self
            .store
            .list_turns(session_id)
            .await?
            .into_iter()
            .filter(|t| t.role != TurnRole::System)
            .collect();

        Ok(SessionDetail {
            session,
            context,
            turns,
        })
    }

    /// 上游可达性（健康检查用）
    pub async fn upstream_healthy(&self) -> bool {
        self.gateway.health_check().await
    }

    async fn session_lock(&self, session_id: Uuid) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(session_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        mutex.lock_owned().await
    }

    /// 回收锁表条目。只在会话已处于（或刚迁移到）终态或不存在时调用：
    /// 此后任何持锁方看到的都是终态，不会再产生需要互斥的写入。
    async fn release_lock(&self, session_id: Uuid) {
        self.locks.lock().await.remove(&session_id);
    }
}

/// 启动期的拉取失败映射：404 区分「目标不存在」，其余归为上下文不可用
fn map_fetch_error(e: GatewayError) -> SessionError {
    match e {
        GatewayError::NotFound(what) => SessionError::NotFound(what),
        other => SessionError::ContextUnavailable(other.to_string()),
    }
}

//! HTTP 接口层
//!
//! 薄壳：反序列化请求 → 调编排器 → 按错误类别映射状态码。
//! 所有业务规则都在 SessionOrchestrator，这里不做判断。

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;
use crate::session::{Session, SessionContext, SessionOrchestrator, SessionStatus, Turn};
use crate::upstream::HttpTransport;

/// POST /api/sessions/start 请求体
#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub user_id: i64,
    pub topic_id: i64,
    pub course_id: i64,
}

/// POST /api/sessions/{id}/message 请求体
#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub opening_message: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PostMessageResponse {
    pub session_id: Uuid,
    pub reply: String,
    pub completed: bool,
    pub notify_failed: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SessionDetailResponse {
    #[serde(flatten)]
    pub session: Session,
    pub context: Option<SessionContext>,
    pub turns: Vec<Turn>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub upstream: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// 创建服务路由
pub fn create_router<T>(orchestrator: Arc<SessionOrchestrator<T>>) -> Router
where
    T: HttpTransport + 'static,
{
    Router::new()
        .route("/api/sessions/start", post(start_session))
        .route("/api/sessions/:id/message", post(post_message))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/sessions/:id/abandon", post(abandon_session))
        .route("/api/health", get(health))
        .with_state(orchestrator)
}

/// POST /api/sessions/start - 启动辅导会话，返回开场白
async fn start_session<T: HttpTransport + 'static>(
    State(orchestrator): State<Arc<SessionOrchestrator<T>>>,
    Json(req): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<StartSessionResponse>), SessionError> {
    let outcome = orchestrator
        .start(req.user_id, req.topic_id, req.course_id)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(StartSessionResponse {
            session_id: outcome.session.id,
            status: outcome.session.status,
            opening_message: outcome.opening_message,
            started_at: outcome.session.started_at,
        }),
    ))
}

/// POST /api/sessions/{id}/message - 提交学生消息，返回辅导回复
async fn post_message<T: HttpTransport + 'static>(
    State(orchestrator): State<Arc<SessionOrchestrator<T>>>,
    Path(id): Path<Uuid>,
    Json(req): Json<PostMessageRequest>,
) -> Result<Json<PostMessageResponse>, SessionError> {
    let outcome = orchestrator.post_message(id, &req.message).await?;
    Ok(Json(PostMessageResponse {
        session_id: outcome.session_id,
        reply: outcome.reply,
        completed: outcome.completed,
        notify_failed: outcome.notify_failed,
        timestamp: outcome.timestamp,
    }))
}

/// GET /api/sessions/{id} - 会话详情与可见历史
async fn get_session<T: HttpTransport + 'static>(
    State(orchestrator): State<Arc<SessionOrchestrator<T>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionDetailResponse>, SessionError> {
    let detail = orchestrator.get_session(id).await?;
    Ok(Json(SessionDetailResponse {
        session: detail.session,
        context: detail.context,
        turns: detail.turns,
    }))
}

/// POST /api/sessions/{id}/abandon - 放弃会话（终态下幂等）
async fn abandon_session<T: HttpTransport + 'static>(
    State(orchestrator): State<Arc<SessionOrchestrator<T>>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Session>, SessionError> {
    let session = orchestrator.abandon(id).await?;
    Ok(Json(session))
}

/// GET /api/health - 服务存活 + 上游可达性
async fn health<T: HttpTransport + 'static>(
    State(orchestrator): State<Arc<SessionOrchestrator<T>>>,
) -> Json<HealthResponse> {
    let upstream = if orchestrator.upstream_healthy().await {
        "ok"
    } else {
        "unreachable"
    };
    Json(HealthResponse {
        status: "ok",
        upstream,
    })
}

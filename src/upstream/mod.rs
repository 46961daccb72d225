//! 上游进度后端网关
//!
//! 把对上游的三类操作（取用户上下文 / 取主题详情 / 完成通知）包成带重试的类型化调用。
//! 404 立即失败（NotFound），网络与 5xx 类失败按策略重试，耗尽后收敛为 UpstreamUnavailable。

pub mod dto;
pub mod http;

pub use dto::{CompletionNotice, TopicSpec, UserContext};
pub use http::{HttpTransport, ReqwestTransport, TransportError};

use crate::retry::{RetryError, RetryExecutor, RetryPolicy};

/// 网关级失败：重试耗尽或目标不存在
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// 重试耗尽后上游仍不可达，附带实际尝试次数
    #[error("Upstream unavailable after {attempts} attempts: {message}")]
    UpstreamUnavailable { attempts: u32, message: String },

    /// 上游明确报告目标不存在，不重试
    #[error("{0} not found on upstream")]
    NotFound(String),

    /// 上游拒绝请求或响应不可解析（4xx / 解码失败），不重试
    #[error("Upstream rejected request: {0}")]
    Rejected(String),
}

/// 进度后端网关：所有操作共用同一重试策略
pub struct ProgressGateway<T: HttpTransport> {
    transport: T,
    executor: RetryExecutor,
}

impl<T: HttpTransport> ProgressGateway<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            executor: RetryExecutor::new(policy),
        }
    }

    /// 拉取用户上下文（水平、已完成主题、薄弱点）
    pub async fn fetch_user_context(&self, user_id: i64) -> Result<UserContext, GatewayError> {
        let path = format!("/api/UserProgress/{}/context", user_id);
        let value = self
            .executor
            .execute("fetch_user_context", || self.transport.get(&path))
            .await
            .map_err(|e| map_retry_error(format!("user {}", user_id), e))?;
        serde_json::from_value(value).map_err(|e| GatewayError::Rejected(e.to_string()))
    }

    /// 拉取主题详情（标题、描述、模板、学习目标）
    pub async fn fetch_topic_spec(&self, topic_id: i64) -> Result<TopicSpec, GatewayError> {
        let path = format!("/api/TrainingTopics/{}", topic_id);
        let value = self
            .executor
            .execute("fetch_topic_spec", || self.transport.get(&path))
            .await
            .map_err(|e| map_retry_error(format!("topic {}", topic_id), e))?;
        serde_json::from_value(value).map_err(|e| GatewayError::Rejected(e.to_string()))
    }

    /// 通知上游主题完成（至少一次：重复通知由上游幂等吸收）
    pub async fn notify_completion(&self, notice: &CompletionNotice) -> Result<(), GatewayError> {
        let body =
            serde_json::to_value(notice).map_err(|e| GatewayError::Rejected(e.to_string()))?;
        self.executor
            .execute("notify_completion", || {
                self.transport.post("/api/UserProgress/complete-topic", body.clone())
            })
            .await
            .map_err(|e| map_retry_error(format!("session {}", notice.session_id), e))?;
        tracing::info!(
            "Notified upstream of topic completion: user_id={}, topic_id={}, session_id={}",
            notice.user_id,
            notice.topic_id,
            notice.session_id
        );
        Ok(())
    }

    /// 上游可达性探测，单次请求不重试
    pub async fn health_check(&self) -> bool {
        self.transport.get("/api/health").await.is_ok()
    }
}

fn map_retry_error(what: String, e: RetryError<TransportError>) -> GatewayError {
    match e.error {
        TransportError::NotFound => GatewayError::NotFound(what),
        TransportError::Client { .. } | TransportError::Decode(_) => {
            GatewayError::Rejected(e.error.to_string())
        }
        other => GatewayError::UpstreamUnavailable {
            attempts: e.attempts,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// 前 failures 次返回给定错误，之后返回固定成功体
    struct FlakyTransport {
        failures: u32,
        calls: AtomicU32,
        success: Value,
        not_found: bool,
    }

    impl FlakyTransport {
        fn new(failures: u32, success: Value) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                success,
                not_found: false,
            }
        }

        fn respond(&self) -> Result<Value, TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.not_found {
                return Err(TransportError::NotFound);
            }
            if n <= self.failures {
                Err(TransportError::Server { status: 503 })
            } else {
                Ok(self.success.clone())
            }
        }
    }

    #[async_trait]
    impl HttpTransport for FlakyTransport {
        async fn get(&self, _path: &str) -> Result<Value, TransportError> {
            self.respond()
        }

        async fn post(&self, _path: &str, _body: Value) -> Result<Value, TransportError> {
            self.respond()
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            growth: 2.0,
        }
    }

    #[tokio::test]
    async fn fetch_recovers_from_transient_failures() {
        let transport = FlakyTransport::new(
            4,
            json!({"UserId": 1, "UserLevel": "beginner", "CompletedTopicIds": [], "StruggleTopics": []}),
        );
        let gateway = ProgressGateway::new(transport, fast_policy());

        let ctx = gateway.fetch_user_context(1).await.unwrap();
        assert_eq!(ctx.user_id, 1);
        assert_eq!(gateway.transport.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn exhausted_retries_collapse_to_unavailable() {
        let transport = FlakyTransport::new(99, Value::Null);
        let gateway = ProgressGateway::new(transport, fast_policy());

        let err = gateway.fetch_topic_spec(5).await.unwrap_err();
        match err {
            GatewayError::UpstreamUnavailable { attempts, .. } => assert_eq!(attempts, 5),
            other => panic!("expected UpstreamUnavailable, got {:?}", other),
        }
        assert_eq!(gateway.transport.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn missing_topic_fails_without_retry() {
        let mut transport = FlakyTransport::new(0, Value::Null);
        transport.not_found = true;
        let gateway = ProgressGateway::new(transport, fast_policy());

        let err = gateway.fetch_topic_spec(42).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
        assert_eq!(gateway.transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn notify_completion_posts_pascal_case_payload() {
        let transport = FlakyTransport::new(0, Value::Null);
        let gateway = ProgressGateway::new(transport, fast_policy());

        let notice = CompletionNotice {
            user_id: 1,
            topic_id: 5,
            course_id: 2,
            completed_at: chrono::Utc::now(),
            session_id: uuid::Uuid::new_v4(),
        };
        gateway.notify_completion(&notice).await.unwrap();
        assert_eq!(gateway.transport.calls.load(Ordering::SeqCst), 1);
    }
}

//! HTTP 传输抽象
//!
//! 网关只依赖 HttpTransport：单次请求/响应交换，并把结果分类为
//! 成功 / 可重试失败 / 不可重试失败，供重试执行器决策。测试用桩实现替换。

use async_trait::async_trait;
use serde_json::Value;

use crate::retry::IsRetryable;

/// 单次交换的失败分类
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// 连接失败或超时，可重试
    #[error("Upstream unreachable: {0}")]
    Unreachable(String),

    /// 服务端错误（5xx / 429），可重试
    #[error("Upstream server error: HTTP {status}")]
    Server { status: u16 },

    /// 目标资源不存在（404），不可重试
    #[error("Upstream resource not found")]
    NotFound,

    /// 其余客户端错误（4xx），不可重试
    #[error("Upstream rejected request: HTTP {status}")]
    Client { status: u16 },

    /// 响应体无法解析，不可重试
    #[error("Upstream response decode failed: {0}")]
    Decode(String),
}

impl IsRetryable for TransportError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Unreachable(_) | TransportError::Server { .. }
        )
    }
}

/// 请求/响应交换：给定方法、路径与载荷，返回分类后的结果
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, path: &str) -> Result<Value, TransportError>;
    async fn post(&self, path: &str, body: Value) -> Result<Value, TransportError>;
}

/// reqwest 实现：base_url 拼接路径，可选 X-API-Key 服务间认证头
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ReqwestTransport {
    pub fn new(
        base_url: impl Into<String>,
        timeout: std::time::Duration,
        api_key: Option<String>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("X-API-Key", key),
            None => req,
        }
    }

    async fn classify(response: reqwest::Response) -> Result<Value, TransportError> {
        let status = response.status();
        if status.is_success() {
            // 部分上游端点成功时返回空体（如完成通知的 204）
            let text = response
                .text()
                .await
                .map_err(|e| TransportError::Decode(e.to_string()))?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()));
        }

        let code = status.as_u16();
        if code == 404 {
            Err(TransportError::NotFound)
        } else if code == 429 || status.is_server_error() {
            Err(TransportError::Server { status: code })
        } else {
            Err(TransportError::Client { status: code })
        }
    }

    fn map_send_error(e: reqwest::Error) -> TransportError {
        TransportError::Unreachable(e.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, path: &str) -> Result<Value, TransportError> {
        let req = self.apply_auth(self.client.get(self.url(path)));
        let response = req.send().await.map_err(Self::map_send_error)?;
        Self::classify(response).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, TransportError> {
        let req = self.apply_auth(self.client.post(self.url(path)).json(&body));
        let response = req.send().await.map_err(Self::map_send_error)?;
        Self::classify(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_drives_retry_decision() {
        assert!(TransportError::Unreachable("timeout".into()).is_retryable());
        assert!(TransportError::Server { status: 503 }.is_retryable());
        assert!(TransportError::Server { status: 429 }.is_retryable());
        assert!(!TransportError::NotFound.is_retryable());
        assert!(!TransportError::Client { status: 400 }.is_retryable());
        assert!(!TransportError::Decode("bad json".into()).is_retryable());
    }
}

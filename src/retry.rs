//! 上游调用重试：确定性指数退避
//!
//! 重试策略作为显式参数传入 execute，而不是挂在函数声明上的隐式行为；
//! 退避不加抖动，默认参数下等待序列为 1s, 2s, 4s, 8s（5 次尝试共 4 次等待），测试可复现。

use std::future::Future;
use std::time::Duration;

/// 错误分类：网络 / 超时 / 5xx 可重试，4xx 与校验类失败不可重试
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

/// 重试参数：尝试上限、初始延迟、延迟上限、指数底数
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub growth: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            growth: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 第 attempt 次尝试失败后的等待时长：min(base * growth^(attempt-1), max)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = self.growth.powi(attempt.saturating_sub(1) as i32);
        let delay = self.base_delay.as_secs_f64() * exp;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// 重试耗尽或遇到不可重试错误时返回：附带实际尝试次数与最后一次错误
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub error: E,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed after {} attempts: {}", self.attempts, self.error)
    }
}

impl<E: std::fmt::Display + std::fmt::Debug> std::error::Error for RetryError<E> {}

/// 重试执行器：包裹幂等（或可安全重复）的异步操作
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 执行 op，可重试错误按策略退避后重试；不可重试错误立即返回（attempts = 当前次数）。
    ///
    /// 等待用 tokio::time::sleep，整体 Future 被丢弃时挂起的 sleep 一并取消。
    pub async fn execute<T, E, F, Fut>(&self, name: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: IsRetryable + std::fmt::Display,
    {
        let max = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < max => {
                    let delay = self.policy.delay_after(attempt);
                    tracing::warn!(
                        "{} attempt {}/{} failed: {}. Retrying in {:.1}s...",
                        name,
                        attempt,
                        max,
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        tracing::error!("{} failed after {} attempts. Last error: {}", name, max, e);
                    }
                    return Err(RetryError { attempts: attempt, error: e });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct FakeError {
        retryable: bool,
    }

    impl std::fmt::Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "fake error (retryable={})", self.retryable)
        }
    }

    impl IsRetryable for FakeError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            growth: 2.0,
        }
    }

    #[test]
    fn default_delay_sequence_is_deterministic() {
        let policy = RetryPolicy::default();
        let secs: Vec<u64> = (1..=4).map(|a| policy.delay_after(a).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8]);
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(10),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_after(7).as_secs(), 10);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(fast_policy(5));

        let result: Result<u32, _> = executor
            .execute("op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 5 {
                        Err(FakeError { retryable: true })
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_reports_count() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(fast_policy(3));

        let result: Result<(), _> = executor
            .execute("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeError { retryable: true }) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_error_yields_single_attempt() {
        let calls = AtomicU32::new(0);
        let executor = RetryExecutor::new(fast_policy(5));

        let result: Result<(), _> = executor
            .execute("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeError { retryable: false }) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

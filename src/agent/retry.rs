//! 重试信封：指数退避 + 应用层成功判定
//!
//! 单次尝试成功的条件是「HTTP 2xx 且有响应体」并且「响应体自身 success 为真」。
//! 200 OK + `{success:false}` 仍算失败并继续重试，最终错误携带响应体里的 message。
//! 不可重试的错误（见 [`AgentError::is_retryable`]）立即返回，不等待。

use std::future::Future;
use std::time::Duration;

use crate::agent::api::HasOutcome;
use crate::core::AgentError;

/// 一次 HTTP 调用的原始结果：状态码 + 可选的已解析响应体
#[derive(Debug, Clone, PartialEq)]
pub struct HttpReply<T> {
    pub status: u16,
    pub body: Option<T>,
    /// 非 2xx 时的错误体或状态说明
    pub error_text: Option<String>,
}

impl<T> HttpReply<T> {
    pub fn ok(body: T) -> Self {
        Self {
            status: 200,
            body: Some(body),
            error_text: None,
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: None,
            error_text: None,
        }
    }

    pub fn error(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            body: None,
            error_text: Some(text.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl<T: HasOutcome> HttpReply<T> {
    /// 合并传输层与应用层判定
    pub fn into_outcome(self) -> Result<T, AgentError> {
        if !self.is_success() {
            return Err(AgentError::Http {
                status: self.status,
                message: self.error_text.unwrap_or_else(|| "Request failed".to_string()),
            });
        }
        match self.body {
            Some(body) if body.succeeded() => Ok(body),
            Some(body) => Err(AgentError::Application(
                body.failure_message().unwrap_or("Unknown error").to_string(),
            )),
            None => Err(AgentError::Application(format!(
                "Empty response body (HTTP {})",
                self.status
            ))),
        }
    }
}

/// 单次退避等待的上限
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// 退避参数
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(300),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 只尝试一次（健康检查等存活探测）
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// 两次尝试之间的等待序列：initial, initial*f, initial*f^2 ...，共 max_attempts-1 项
    ///
    /// 每项封顶 [`MAX_RETRY_DELAY`]；非有限或负的系数按 1.0 处理。
    pub fn delays(&self) -> Vec<Duration> {
        let attempts = self.max_attempts.max(1);
        let factor = if self.backoff_factor.is_finite() && self.backoff_factor >= 0.0 {
            self.backoff_factor
        } else {
            1.0
        };
        let mut delay = self.initial_delay.min(MAX_RETRY_DELAY);
        let mut out = Vec::with_capacity(attempts as usize - 1);
        for _ in 1..attempts {
            out.push(delay);
            delay = Duration::try_from_secs_f64(delay.as_secs_f64() * factor)
                .ok()
                .map_or(MAX_RETRY_DELAY, |d| d.min(MAX_RETRY_DELAY));
        }
        out
    }
}

/// 以 policy 执行 call，直到某次尝试满足双层成功判定或次数用尽
///
/// call 返回 Err 表示传输异常；返回 Ok(HttpReply) 时再看状态码与响应体。
pub async fn call_with_retry<T, F, Fut>(policy: &RetryPolicy, mut call: F) -> Result<T, AgentError>
where
    T: HasOutcome,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<HttpReply<T>, AgentError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut delays = policy.delays().into_iter();
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        let failure = match call().await {
            Ok(reply) => match reply.into_outcome() {
                Ok(body) => return Ok(body),
                Err(e) => e,
            },
            Err(e) => e,
        };
        tracing::warn!(
            "Agent request attempt {}/{} failed: {}",
            attempt,
            max_attempts,
            failure
        );
        if !failure.is_retryable() {
            return Err(failure);
        }
        last_error = Some(failure);

        if attempt < max_attempts {
            if let Some(delay) = delays.next() {
                tracing::debug!("Retrying in {}ms", delay.as_millis());
                tokio::time::sleep(delay).await;
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        AgentError::Transport(format!("Unknown network error after {max_attempts} attempts"))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    struct Body {
        success: bool,
        message: Option<String>,
    }

    impl HasOutcome for Body {
        fn succeeded(&self) -> bool {
            self.success
        }

        fn failure_message(&self) -> Option<&str> {
            self.message.as_deref()
        }
    }

    #[derive(Debug, PartialEq)]
    struct Plain(u8);

    impl HasOutcome for Plain {}

    #[test]
    fn test_delay_sequence() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(300),
            backoff_factor: 2.0,
        };
        assert_eq!(
            policy.delays(),
            vec![
                Duration::from_millis(300),
                Duration::from_millis(600),
                Duration::from_millis(1200)
            ]
        );
        assert!(RetryPolicy::single_attempt().delays().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_invoked_n_times_with_backoff() {
        for n in 1..=4u32 {
            let policy = RetryPolicy {
                max_attempts: n,
                initial_delay: Duration::from_millis(300),
                backoff_factor: 2.0,
            };
            let calls = Arc::new(Mutex::new(Vec::<Instant>::new()));
            let recorded = calls.clone();
            let result: Result<Body, _> = call_with_retry(&policy, || {
                recorded.lock().unwrap().push(Instant::now());
                async { Err(AgentError::Transport("connection refused".into())) }
            })
            .await;

            assert_eq!(
                result.unwrap_err(),
                AgentError::Transport("connection refused".into())
            );
            let calls = calls.lock().unwrap();
            assert_eq!(calls.len() as u32, n);
            let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
            assert_eq!(gaps, policy.delays());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_application_failure_is_retried_and_keeps_message() {
        let counter = AtomicU32::new(0);
        let result = call_with_retry(&RetryPolicy::default(), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Ok(HttpReply::ok(Body {
                    success: false,
                    message: Some("X".into()),
                }))
            }
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err(), AgentError::Application("X".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_application_failure_clears() {
        let counter = AtomicU32::new(0);
        let result = call_with_retry(&RetryPolicy::default(), || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(HttpReply::ok(Body {
                    success: n >= 1,
                    message: None,
                }))
            }
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(result.unwrap().success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_error_and_empty_body() {
        let result: Result<Body, _> = call_with_retry(&RetryPolicy::single_attempt(), || async {
            Ok(HttpReply::error(502, "Bad Gateway"))
        })
        .await;
        assert_eq!(
            result.unwrap_err(),
            AgentError::Http {
                status: 502,
                message: "Bad Gateway".into()
            }
        );

        let result: Result<Body, _> =
            call_with_retry(&RetryPolicy::single_attempt(), || async { Ok(HttpReply::empty(204)) })
                .await;
        assert_eq!(
            result.unwrap_err(),
            AgentError::Application("Empty response body (HTTP 204)".into())
        );
    }

    #[test]
    fn test_delays_saturate_instead_of_overflowing() {
        let huge = RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(300),
            backoff_factor: 1e20,
        };
        assert_eq!(
            huge.delays(),
            vec![Duration::from_millis(300), MAX_RETRY_DELAY, MAX_RETRY_DELAY]
        );

        for factor in [f64::INFINITY, f64::NAN, -2.0] {
            let policy = RetryPolicy {
                backoff_factor: factor,
                ..RetryPolicy::default()
            };
            assert_eq!(policy.delays(), vec![Duration::from_millis(300); 2]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_errors_fail_on_first_attempt() {
        for error in [AgentError::NoActiveThread, AgentError::Timeout] {
            let counter = AtomicU32::new(0);
            let start = Instant::now();
            let result: Result<Body, _> = call_with_retry(&RetryPolicy::default(), || {
                counter.fetch_add(1, Ordering::SeqCst);
                let error = error.clone();
                async move { Err(error) }
            })
            .await;

            assert_eq!(result.unwrap_err(), error);
            assert_eq!(counter.load(Ordering::SeqCst), 1);
            assert_eq!(start.elapsed(), Duration::ZERO);
        }
    }

    #[tokio::test]
    async fn test_body_without_flag_succeeds_on_transport_success() {
        let counter = AtomicU32::new(0);
        let result = call_with_retry(&RetryPolicy::default(), || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(HttpReply::ok(Plain(7))) }
        })
        .await;
        assert_eq!(result.unwrap(), Plain(7));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::config::ConnectorConfig;
use crate::error::{ConnectorError, Result};

/// 接続レベルの失敗時に同じリクエストを再送する
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 初回失敗後の再試行回数 (合計 `max_retries + 1` 回)
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: config.retry_backoff,
        }
    }

    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt <= self.max_retries => {
                    let backoff = self
                        .initial_backoff
                        .saturating_mul(2u32.saturating_pow(attempt - 1));
                    warn!(
                        "{} attempt {} failed, retrying in {}ms: {}",
                        what,
                        attempt,
                        backoff.as_millis(),
                        e
                    );
                    sleep(backoff).await;
                }
                Err(ConnectorError::TransientNetwork { message, .. }) => {
                    return Err(ConnectorError::TransientNetwork {
                        attempts: attempt,
                        message,
                    })
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// 任意のサブリソースのサーバーエラーを「データなし」に落とす
///
/// ポートフォリオのない口座では評価額APIが5xxを返すことがある
pub fn or_empty_when_unavailable<T>(what: &str, result: Result<Vec<T>>) -> Result<Vec<T>> {
    match result {
        Err(ConnectorError::UpstreamUnavailable { status, url }) => {
            warn!(
                "{} unavailable (HTTP {} at {}), treating as empty",
                what, status, url
            );
            Ok(Vec::new())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_backoff: Duration::ZERO,
        }
    }

    async fn flaky(calls: &AtomicU32, failures: u32) -> Result<&'static str> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < failures {
            Err(ConnectorError::transient("connection reset"))
        } else {
            Ok("ok")
        }
    }

    #[tokio::test]
    async fn test_n_failures_then_success_uses_n_plus_one_attempts() {
        let calls = AtomicU32::new(0);
        let value = policy(3).run("fetch", || flaky(&calls, 3)).await.unwrap();
        assert_eq!(value, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_budget_exhausted_surfaces_transient_failure() {
        let calls = AtomicU32::new(0);
        let err = policy(3).run("fetch", || flaky(&calls, 4)).await.unwrap_err();
        assert!(matches!(err, ConnectorError::TransientNetwork { attempts: 4, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = policy(3)
            .run("fetch", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ConnectorError::InvalidCredentials("nope".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidCredentials(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unavailable_degrades_to_empty() {
        let degraded: Result<Vec<u8>> = or_empty_when_unavailable(
            "market",
            Err(ConnectorError::UpstreamUnavailable {
                status: 500,
                url: "https://x/pe-war/rpc/portfolioDetails/get".into(),
            }),
        );
        assert!(degraded.unwrap().is_empty());

        let kept: Result<Vec<u8>> =
            or_empty_when_unavailable("market", Err(ConnectorError::NotFound("x".into())));
        assert!(matches!(kept, Err(ConnectorError::NotFound(_))));
    }
}

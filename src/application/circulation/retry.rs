//! 競合時の再試行
//!
//! コミットのガードが失敗した場合（`StorageConflict`）、読み取りからやり直して
//! 操作全体を再実行する。その他のエラーは即座に返す。

use std::future::Future;
use std::time::Duration;

use super::errors::{CirculationError, Result};

/// 指数バックオフによる再試行ポリシー
///
/// 既定値：
/// - `max_attempts`: 3（初回を含む試行回数）
/// - `initial_delay`: 5ms
/// - `max_delay`: 200ms
/// - `multiplier`: 2.0
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(200),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 再試行しないポリシー
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// 試行回数を指定したポリシー
    pub fn with_max_attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    /// n回目の再試行前の待機時間
    ///
    /// delay = initial_delay * multiplier^attempt（max_delayで頭打ち）
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(millis as u64);
        delay.min(self.max_delay)
    }
}

/// `StorageConflict`の場合のみ操作全体を再実行する
pub async fn retry_on_conflict<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut run: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match run().await {
            Err(CirculationError::StorageConflict(reason)) if attempt + 1 < max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    reason = %reason,
                    delay_ms = delay.as_millis() as u64,
                    "storage conflict, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

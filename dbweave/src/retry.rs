// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 重试模块
//!
//! 带指数退避的通用重试组合子，供连接工厂及其他资源获取代码复用

use std::future::Future;
use std::time::Duration;

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 最大尝试次数（包含第一次）
    pub max_attempts: u32,
    /// 首次退避时长
    pub base_delay: Duration,
    /// 退避倍数
    pub multiplier: f64,
    /// 单次退避上限
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// 不重试（只尝试一次）
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// 指定次数与首次退避
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// 第 `attempt` 次失败（从 1 开始）之后的等待时长
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let nanos = (self.base_delay.as_nanos() as f64 * factor).round();
        let delay = if nanos >= u64::MAX as f64 {
            Duration::MAX
        } else {
            Duration::from_nanos(nanos as u64)
        };
        delay.min(self.max_delay)
    }
}

/// 重试耗尽后的错误
#[derive(Debug)]
pub struct RetryError<E> {
    /// 实际尝试次数
    pub attempts: u32,
    /// 最后一次错误
    pub last_error: E,
}

/// 按策略执行 `op`，`is_retryable` 判定错误是否值得重试
///
/// 终止性错误立即返回，不再等待。
pub async fn retry<T, E, F, Fut, C>(policy: &RetryPolicy, is_retryable: C, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= max_attempts || !is_retryable(&error) {
                    return Err(RetryError {
                        attempts: attempt,
                        last_error: error,
                    });
                }
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    "Attempt {}/{} failed: {}; retrying in {:?}",
                    attempt,
                    max_attempts,
                    error,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

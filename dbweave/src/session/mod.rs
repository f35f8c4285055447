// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 会话与 CSRF 安全模块
//!
//! 每个请求一个 [`Session`]：懒启动，只有第一次访问数据时才读存储。
//! 会话数据分为用户键、保留的框架命名空间（令牌、指纹、时间戳）与闪存子命名空间。
//!
//! 会话状态机：
//!
//! ```text
//! new ──start──▶ active ──(闲置超过 lifetime)──▶ expired ──▶ destroyed
//!                  │  ▲
//!                  │  └─(距上次重建超过 regenerate_interval：换 ID，保留数据)
//!                  └──(窗口内违规数达到上限)──▶ locked out（窗口过去后恢复）
//! ```
//!
//! - [`SessionSecurity`]: 指纹、过期、违规锁定与登录尝试计数
//! - [`Csrf`] / [`CsrfMiddleware`]: 会话绑定的 CSRF 令牌与不安全方法校验
//! - [`SessionMiddleware`]: 每个请求的 start → validate → commit 流程
//!
//! 这一层是同步的：文件存储使用阻塞 I/O，一个请求在一个执行上下文中完成。

mod clock;
mod csrf;
mod middleware;
mod record;
mod request;
mod security;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use csrf::{Csrf, CsrfConfig, CsrfMiddleware};
pub use middleware::SessionMiddleware;
pub use record::{CsrfToken, FrameworkState, SecurityState, Session, SessionData, is_valid_session_id};
pub use request::{Cookie, CookieJar, MemoryCookieJar, RequestContext, SameSite};
pub use security::{FingerprintConfig, SecurityConfig, SessionSecurity, Validation};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};

use std::time::Duration;
use thiserror::Error;

/// 会话操作结果类型
pub type SessionResult<T> = Result<T, SessionError>;

/// CSRF 校验失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CsrfFailure {
    /// 请求没有携带令牌
    #[error("token missing")]
    Missing,
    /// 令牌不匹配，或会话中没有令牌
    #[error("token mismatch")]
    Mismatch,
    /// 会话中的令牌已过期
    #[error("token expired")]
    Expired,
}

/// 会话错误
#[derive(Debug, Error)]
pub enum SessionError {
    /// 闲置时间超过会话生命周期
    #[error("Session expired after {idle_secs}s of inactivity")]
    SessionExpired {
        /// 闲置秒数
        idle_secs: i64,
    },

    /// 请求指纹与会话启动时记录的不一致（已记录一次违规）
    #[error("Session fingerprint mismatch ({violations} violation(s) in window)")]
    FingerprintMismatch {
        /// 当前窗口内的违规次数
        violations: usize,
    },

    /// 窗口内违规次数达到上限
    #[error("Session locked out, retry after {}s", .retry_after.as_secs())]
    LockedOut {
        /// 最早一次违规滑出窗口前的剩余时间
        retry_after: Duration,
    },

    /// CSRF 校验失败
    #[error("CSRF validation failed: {0}")]
    CsrfValidationFailed(CsrfFailure),

    /// 配置错误（例如非法的豁免路径模式）
    #[error("Session configuration error: {0}")]
    Configuration(String),

    /// 存储错误
    #[error("Session storage error: {0}")]
    Storage(String),

    /// 文件 I/O 错误
    #[error("Session I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误
    #[error("Session serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionError {
    /// 对应的 HTTP 状态码提示
    pub fn status_hint(&self) -> u16 {
        match self {
            SessionError::SessionExpired { .. } => 401,
            SessionError::FingerprintMismatch { .. } | SessionError::LockedOut { .. } => 403,
            SessionError::CsrfValidationFailed(_) => 419,
            _ => 500,
        }
    }

    /// 锁定时的建议重试间隔
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SessionError::LockedOut { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// 会话配置
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// 会话 ID Cookie 名
    pub cookie_name: String,
    /// Cookie 路径
    pub cookie_path: String,
    /// Cookie 域
    pub cookie_domain: Option<String>,
    /// 仅 HTTPS 发送
    pub secure: bool,
    /// 禁止脚本访问
    pub http_only: bool,
    /// SameSite 策略
    pub same_site: SameSite,
    /// 存储中会话的最长保留时间（垃圾回收依据）
    pub max_age: Duration,
    /// 每个请求结束时触发垃圾回收的概率
    pub gc_probability: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "dbweave_session".to_string(),
            cookie_path: "/".to_string(),
            cookie_domain: None,
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
            max_age: Duration::from_secs(7200),
            gc_probability: 0.01,
        }
    }
}

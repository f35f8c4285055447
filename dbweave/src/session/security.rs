// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 会话安全
//!
//! 每个请求调用一次 [`SessionSecurity::validate`]，检查顺序：
//!
//! 1. 没有活动时间戳：初始化安全上下文
//! 2. 修剪违规窗口，达到上限则 [`SessionError::LockedOut`]
//! 3. 闲置超过生命周期则 [`SessionError::SessionExpired`]
//! 4. 指纹不一致则记录违规并返回 [`SessionError::FingerprintMismatch`]
//! 5. 距上次重建超过间隔则换 ID
//!
//! 锁定先于过期检查：被锁定的会话不能靠等待过期绕过锁定提示。

use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::record::{SecurityState, Session};
use super::request::RequestContext;
use super::{SessionError, SessionResult};

/// 指纹包含的请求信号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerprintConfig {
    /// User-Agent 头
    pub user_agent: bool,
    /// Accept-Language 头
    pub accept_language: bool,
    /// 客户端 IP（移动网络切换时会变化，默认关闭）
    pub ip_address: bool,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            user_agent: true,
            accept_language: true,
            ip_address: false,
        }
    }
}

/// 会话安全配置
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// 允许的最长闲置时间
    pub lifetime: Duration,
    /// 两次 ID 重建之间的最短间隔
    pub regenerate_interval: Duration,
    /// 指纹信号
    pub fingerprint: FingerprintConfig,
    /// 窗口内允许的违规次数上限
    pub max_violations: usize,
    /// 违规滑动窗口
    pub violation_window: Duration,
    /// 窗口内允许的登录尝试次数上限
    pub max_login_attempts: usize,
    /// 登录尝试滑动窗口
    pub login_window: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            lifetime: Duration::from_secs(7200),
            regenerate_interval: Duration::from_secs(300),
            fingerprint: FingerprintConfig::default(),
            max_violations: 3,
            violation_window: Duration::from_secs(900),
            max_login_attempts: 5,
            login_window: Duration::from_secs(900),
        }
    }
}

/// 校验通过时的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// 首次访问，安全上下文已初始化
    Initialized,
    /// 校验通过
    Valid,
    /// 校验通过，并且会话 ID 已重建
    Regenerated,
}

/// 会话安全校验器
#[derive(Debug, Clone)]
pub struct SessionSecurity {
    config: SecurityConfig,
    clock: Arc<dyn Clock>,
}

impl Default for SessionSecurity {
    fn default() -> Self {
        Self::new(SecurityConfig::default())
    }
}

impl SessionSecurity {
    /// 使用系统时钟创建
    pub fn new(config: SecurityConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// 使用指定时钟创建
    pub fn with_clock(config: SecurityConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    /// 配置
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// 计算请求指纹（SHA-256 十六进制）
    pub fn fingerprint(&self, request: &RequestContext) -> String {
        let signals = &self.config.fingerprint;
        let mut hasher = Sha256::new();
        if signals.user_agent {
            hasher.update(b"ua:");
            hasher.update(request.get_header("user-agent").unwrap_or_default());
            hasher.update(b"\n");
        }
        if signals.accept_language {
            hasher.update(b"lang:");
            hasher.update(request.get_header("accept-language").unwrap_or_default());
            hasher.update(b"\n");
        }
        if signals.ip_address {
            hasher.update(b"ip:");
            hasher.update(request.client_ip().unwrap_or_default());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }

    /// 校验会话
    pub fn validate(&self, session: &mut Session, request: &RequestContext) -> SessionResult<Validation> {
        let now = self.clock.now();
        let fingerprint = self.fingerprint(request);
        let lifetime = secs(self.config.lifetime);
        let window = secs(self.config.violation_window);

        let needs_regeneration = {
            let state = &mut session.framework()?.security;

            let Some(last_activity) = state.last_activity else {
                state.last_activity = Some(now);
                state.last_regeneration = Some(now);
                state.fingerprint = Some(fingerprint);
                debug!("Session security context initialized");
                return Ok(Validation::Initialized);
            };

            prune(&mut state.violations, now, window);
            if state.violations.len() >= self.config.max_violations {
                let oldest = state.violations.first().copied().unwrap_or(now);
                let retry_after = Duration::from_secs((oldest + window - now).max(0) as u64);
                warn!(
                    "Session locked out after {} violation(s), retry after {}s",
                    state.violations.len(),
                    retry_after.as_secs()
                );
                return Err(SessionError::LockedOut { retry_after });
            }

            let idle = now - last_activity;
            if idle > lifetime {
                debug!("Session expired after {}s idle", idle);
                return Err(SessionError::SessionExpired { idle_secs: idle });
            }

            let mismatch = state
                .fingerprint
                .as_deref()
                .is_some_and(|stored| !bool::from(stored.as_bytes().ct_eq(fingerprint.as_bytes())));
            if mismatch {
                state.violations.push(now);
                let violations = state.violations.len();
                warn!("Session fingerprint mismatch ({} violation(s) in window)", violations);
                return Err(SessionError::FingerprintMismatch { violations });
            }
            if state.fingerprint.is_none() {
                state.fingerprint = Some(fingerprint);
            }

            state.last_activity = Some(now);
            let last_regeneration = state.last_regeneration.unwrap_or(now);
            if now - last_regeneration > secs(self.config.regenerate_interval) {
                state.last_regeneration = Some(now);
                true
            } else {
                false
            }
        };

        if needs_regeneration {
            session.regenerate(true)?;
            return Ok(Validation::Regenerated);
        }
        Ok(Validation::Valid)
    }

    /// 记录一次安全违规，返回窗口内的违规次数
    pub fn record_violation(&self, session: &mut Session, reason: &str) -> SessionResult<usize> {
        let now = self.clock.now();
        let state = &mut session.framework()?.security;
        prune(&mut state.violations, now, secs(self.config.violation_window));
        state.violations.push(now);
        warn!("Session security violation recorded: {}", reason);
        Ok(state.violations.len())
    }

    /// 窗口内的违规次数（不修改会话）
    pub fn violation_count(&self, session: &mut Session) -> SessionResult<usize> {
        let now = self.clock.now();
        let window = secs(self.config.violation_window);
        let state = &session.framework()?.security;
        Ok(count_within(&state.violations, now, window))
    }

    /// 记录一次登录尝试，返回窗口内的尝试次数
    pub fn record_login_attempt(&self, session: &mut Session, identifier: &str) -> SessionResult<usize> {
        let now = self.clock.now();
        let window = secs(self.config.login_window);
        let state = &mut session.framework()?.security;
        let attempts = state.login_attempts.entry(identifier.to_string()).or_default();
        prune(attempts, now, window);
        attempts.push(now);
        Ok(attempts.len())
    }

    /// 标识符是否已被阻止登录
    pub fn is_blocked(&self, session: &mut Session, identifier: &str) -> SessionResult<bool> {
        Ok(self.attempts_within(session, identifier)? >= self.config.max_login_attempts)
    }

    /// 剩余的登录尝试次数
    pub fn remaining_attempts(&self, session: &mut Session, identifier: &str) -> SessionResult<usize> {
        Ok(self
            .config
            .max_login_attempts
            .saturating_sub(self.attempts_within(session, identifier)?))
    }

    /// 清除标识符的登录尝试（登录成功后调用）
    pub fn clear_login_attempts(&self, session: &mut Session, identifier: &str) -> SessionResult<()> {
        session.framework()?.security.login_attempts.remove(identifier);
        Ok(())
    }

    /// 登录成功：重建 ID，重新绑定指纹，清除违规与 CSRF 令牌
    pub fn on_login(&self, session: &mut Session, request: &RequestContext) -> SessionResult<()> {
        session.regenerate(true)?;
        let now = self.clock.now();
        let fingerprint = self.fingerprint(request);
        let framework = session.framework()?;
        framework.security.last_activity = Some(now);
        framework.security.last_regeneration = Some(now);
        framework.security.fingerprint = Some(fingerprint);
        framework.security.violations.clear();
        framework.csrf = None;
        Ok(())
    }

    /// 登出：清空用户数据，重建 ID，重置安全状态
    pub fn on_logout(&self, session: &mut Session) -> SessionResult<()> {
        session.clear()?;
        session.regenerate(true)?;
        let framework = session.framework()?;
        framework.security = SecurityState::default();
        framework.csrf = None;
        framework.flash.clear();
        Ok(())
    }

    fn attempts_within(&self, session: &mut Session, identifier: &str) -> SessionResult<usize> {
        let now = self.clock.now();
        let window = secs(self.config.login_window);
        let state = &session.framework()?.security;
        Ok(state
            .login_attempts
            .get(identifier)
            .map_or(0, |attempts| count_within(attempts, now, window)))
    }
}

fn secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

/// 只保留窗口内的时间戳
fn prune(timestamps: &mut Vec<i64>, now: i64, window: i64) {
    timestamps.retain(|&t| now.saturating_sub(t) < window);
}

fn count_within(timestamps: &[i64], now: i64, window: i64) -> usize {
    timestamps.iter().filter(|&&t| now.saturating_sub(t) < window).count()
}

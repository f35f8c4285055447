// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! CSRF 防护
//!
//! 令牌绑定在会话的框架命名空间中，带签发时间。比较先对两边做 SHA-256，
//! 再做常量时间比较，长度不同的输入也不会提前返回。

use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

#[cfg(feature = "metrics")]
use crate::metrics::MetricsCollector;

use super::clock::{Clock, SystemClock};
use super::record::{CsrfToken, Session, random_hex};
use super::request::RequestContext;
use super::{CsrfFailure, SessionError, SessionResult};

/// 令牌随机字节数
const TOKEN_BYTES: usize = 32;

/// CSRF 配置
#[derive(Debug, Clone)]
pub struct CsrfConfig {
    /// 令牌有效期
    pub lifetime: Duration,
    /// 表单字段名与 JSON 字段名
    pub field_name: String,
    /// 请求头名
    pub header_name: String,
    /// 豁免的路径模式，`*` 匹配任意字符
    pub exempt: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            lifetime: Duration::from_secs(7200),
            field_name: "_token".to_string(),
            header_name: "X-CSRF-TOKEN".to_string(),
            exempt: Vec::new(),
        }
    }
}

/// CSRF 令牌服务
#[derive(Debug, Clone)]
pub struct Csrf {
    config: CsrfConfig,
    exempt: Vec<Regex>,
    clock: Arc<dyn Clock>,
}

impl Csrf {
    /// 创建令牌服务，豁免模式非法时返回配置错误
    pub fn new(config: CsrfConfig) -> SessionResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// 使用指定时钟创建
    pub fn with_clock(config: CsrfConfig, clock: Arc<dyn Clock>) -> SessionResult<Self> {
        let exempt = config
            .exempt
            .iter()
            .map(|pattern| glob_to_regex(pattern))
            .collect::<SessionResult<Vec<_>>>()?;
        Ok(Self { config, exempt, clock })
    }

    /// 配置
    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    /// 当前令牌，不存在或已过期时签发新令牌
    pub fn token(&self, session: &mut Session) -> SessionResult<String> {
        let now = self.clock.now();
        let lifetime = self.lifetime_secs();
        let framework = session.framework()?;
        if let Some(token) = framework.csrf.as_ref().filter(|t| now - t.issued_at <= lifetime) {
            return Ok(token.value.clone());
        }
        let token = issue(now);
        let value = token.value.clone();
        framework.csrf = Some(token);
        Ok(value)
    }

    /// 签发新令牌
    pub fn regenerate_token(&self, session: &mut Session) -> SessionResult<String> {
        let token = issue(self.clock.now());
        let value = token.value.clone();
        session.framework()?.csrf = Some(token);
        debug!("CSRF token regenerated");
        Ok(value)
    }

    /// 令牌是否与会话中的当前令牌一致且未过期
    pub fn is_valid_token(&self, session: &mut Session, token: &str) -> SessionResult<bool> {
        Ok(self.check(session, Some(token))?.is_ok())
    }

    /// 校验令牌，失败时返回 [`SessionError::CsrfValidationFailed`]
    pub fn validate_token(&self, session: &mut Session, token: Option<&str>) -> SessionResult<()> {
        self.check(session, token)?
            .map_err(SessionError::CsrfValidationFailed)
    }

    /// 删除会话中的令牌
    pub fn clear_token(&self, session: &mut Session) -> SessionResult<()> {
        session.framework()?.csrf = None;
        Ok(())
    }

    /// 路径是否匹配豁免模式
    pub fn is_exempt_path(&self, path: &str) -> bool {
        self.exempt.iter().any(|re| re.is_match(path))
    }

    fn check(&self, session: &mut Session, token: Option<&str>) -> SessionResult<Result<(), CsrfFailure>> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Ok(Err(CsrfFailure::Missing));
        };
        let now = self.clock.now();
        let lifetime = self.lifetime_secs();
        let Some(current) = &session.framework()?.csrf else {
            return Ok(Err(CsrfFailure::Mismatch));
        };

        if !constant_time_eq(&current.value, token) {
            return Ok(Err(CsrfFailure::Mismatch));
        }
        if now - current.issued_at > lifetime {
            return Ok(Err(CsrfFailure::Expired));
        }
        Ok(Ok(()))
    }

    fn lifetime_secs(&self) -> i64 {
        i64::try_from(self.config.lifetime.as_secs()).unwrap_or(i64::MAX)
    }
}

fn issue(now: i64) -> CsrfToken {
    CsrfToken {
        value: random_hex(TOKEN_BYTES),
        issued_at: now,
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = Sha256::digest(a.as_bytes());
    let b = Sha256::digest(b.as_bytes());
    a.as_slice().ct_eq(b.as_slice()).into()
}

fn glob_to_regex(pattern: &str) -> SessionResult<Regex> {
    let body = pattern.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");
    Regex::new(&format!("^{}$", body))
        .map_err(|e| SessionError::Configuration(format!("Invalid CSRF exempt pattern '{}': {}", pattern, e)))
}

/// 不安全方法的 CSRF 校验
#[derive(Debug, Clone)]
pub struct CsrfMiddleware {
    csrf: Csrf,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<MetricsCollector>>,
}

impl CsrfMiddleware {
    /// 创建中间件
    pub fn new(csrf: Csrf) -> Self {
        Self {
            csrf,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// 记录校验失败
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 令牌服务
    pub fn csrf(&self) -> &Csrf {
        &self.csrf
    }

    /// 校验请求
    ///
    /// 安全方法、处理器声明豁免或路径匹配豁免模式时直接通过；
    /// 否则依次从请求头、表单字段、JSON 字段读取令牌。
    pub fn verify(&self, session: &mut Session, request: &RequestContext) -> SessionResult<()> {
        if request.is_safe_method() || request.is_csrf_exempt() || self.csrf.is_exempt_path(request.path()) {
            return Ok(());
        }

        let config = self.csrf.config();
        let token = request
            .get_header(&config.header_name)
            .or_else(|| request.get_form_field(&config.field_name))
            .or_else(|| request.get_json_field(&config.field_name));

        let result = self.csrf.validate_token(session, token);
        if let Err(SessionError::CsrfValidationFailed(reason)) = &result {
            warn!("CSRF check failed for {} {}: {}", request.method(), request.path(), reason);
            #[cfg(feature = "metrics")]
            if let Some(metrics) = &self.metrics {
                metrics.record_csrf_failure();
            }
        }
        result
    }
}

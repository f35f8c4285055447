// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 会话中间件：每个请求 start → validate → commit

use rand::Rng;
use std::sync::Arc;
use tracing::{debug, warn};

#[cfg(feature = "metrics")]
use crate::metrics::MetricsCollector;

use super::record::Session;
use super::request::{CookieJar, RequestContext};
use super::security::{SessionSecurity, Validation};
use super::store::SessionStore;
use super::{SessionConfig, SessionError, SessionResult};

/// 会话中间件
#[derive(Debug, Clone)]
pub struct SessionMiddleware {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    security: SessionSecurity,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<MetricsCollector>>,
}

impl SessionMiddleware {
    /// 创建中间件
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig, security: SessionSecurity) -> Self {
        Self {
            store,
            config,
            security,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// 记录违规与锁定
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 安全校验器
    pub fn security(&self) -> &SessionSecurity {
        &self.security
    }

    /// 请求开始：载入并校验会话
    ///
    /// 过期的会话在返回 [`SessionError::SessionExpired`] 之前已被销毁，Cookie 已删除；
    /// 调用方可以直接为下一个请求重新开始。指纹不一致与锁定时会话保持原样。
    pub fn handle(&self, request: &RequestContext, jar: &mut dyn CookieJar) -> SessionResult<(Session, Validation)> {
        let mut session = Session::from_jar(self.store.clone(), self.config.clone(), jar);

        match self.security.validate(&mut session, request) {
            Ok(validation) => Ok((session, validation)),
            Err(err @ SessionError::SessionExpired { .. }) => {
                session.destroy()?;
                session.commit(jar)?;
                Err(err)
            }
            Err(err) => {
                match &err {
                    SessionError::FingerprintMismatch { .. } => {
                        // 违规记录需要落盘
                        session.save()?;
                        #[cfg(feature = "metrics")]
                        if let Some(metrics) = &self.metrics {
                            metrics.record_security_violation();
                        }
                    }
                    SessionError::LockedOut { .. } => {
                        #[cfg(feature = "metrics")]
                        if let Some(metrics) = &self.metrics {
                            metrics.record_lockout();
                        }
                    }
                    _ => {}
                }
                Err(err)
            }
        }
    }

    /// 请求结束：持久化、写 Cookie，并按概率触发垃圾回收
    pub fn finish(&self, session: &Session, jar: &mut dyn CookieJar) -> SessionResult<()> {
        session.commit(jar)?;

        let probability = self.config.gc_probability.clamp(0.0, 1.0);
        if probability > 0.0 && rand::thread_rng().gen_bool(probability) {
            if let Err(e) = self.gc() {
                warn!("Session gc failed: {}", e);
            }
        }
        Ok(())
    }

    /// 立即执行垃圾回收
    pub fn gc(&self) -> SessionResult<usize> {
        let removed = self.store.gc(self.config.max_age)?;
        debug!("Session gc removed {} session(s)", removed);
        Ok(removed)
    }
}

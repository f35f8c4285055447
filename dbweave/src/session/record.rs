// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 会话记录

use rand::RngCore;
use rand::rngs::OsRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::request::{Cookie, CookieJar};
use super::store::SessionStore;
use super::{SessionConfig, SessionResult};

/// 会话 ID 的随机字节数（十六进制后长度翻倍）
const SESSION_ID_BYTES: usize = 32;

/// 会话 ID 是否为固定长度的小写十六进制串
pub fn is_valid_session_id(id: &str) -> bool {
    id.len() == SESSION_ID_BYTES * 2 && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

pub(crate) fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// 持久化的会话数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    /// 用户键
    #[serde(default)]
    pub values: Map<String, JsonValue>,
    /// 保留的框架命名空间
    #[serde(default, rename = "_framework")]
    pub framework: FrameworkState,
}

/// 框架命名空间
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameworkState {
    /// 安全状态
    #[serde(default)]
    pub security: SecurityState,
    /// 当前 CSRF 令牌
    #[serde(default)]
    pub csrf: Option<CsrfToken>,
    /// 闪存值，读取一次后删除
    #[serde(default)]
    pub flash: Map<String, JsonValue>,
}

/// 安全状态（Unix 秒）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityState {
    /// 最近一次活动
    pub last_activity: Option<i64>,
    /// 最近一次重建 ID
    pub last_regeneration: Option<i64>,
    /// 会话启动时的请求指纹
    pub fingerprint: Option<String>,
    /// 违规时间戳（升序）
    #[serde(default)]
    pub violations: Vec<i64>,
    /// 标识符 → 登录尝试时间戳
    #[serde(default)]
    pub login_attempts: HashMap<String, Vec<i64>>,
}

/// CSRF 令牌
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfToken {
    /// 令牌值
    pub value: String,
    /// 签发时间
    pub issued_at: i64,
}

/// 单个请求的会话
///
/// 构造时不做任何 I/O；第一次访问数据时才启动：请求携带的 ID 合法且存储中有数据时载入，
/// 否则生成新 ID。
#[derive(Debug)]
pub struct Session {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
    incoming_id: Option<String>,
    id: Option<String>,
    data: SessionData,
    started: bool,
    destroyed: bool,
}

impl Session {
    /// 创建会话，`incoming_id` 为请求 Cookie 中的 ID
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig, incoming_id: Option<String>) -> Self {
        Self {
            store,
            config,
            incoming_id,
            id: None,
            data: SessionData::default(),
            started: false,
            destroyed: false,
        }
    }

    /// 从 Cookie 容器读取会话 ID 创建会话
    pub fn from_jar(store: Arc<dyn SessionStore>, config: SessionConfig, jar: &dyn CookieJar) -> Self {
        let incoming = jar.get(&config.cookie_name);
        Self::new(store, config, incoming)
    }

    /// 启动会话（幂等）
    pub fn start(&mut self) -> SessionResult<()> {
        if self.started {
            return Ok(());
        }

        let loaded = match self.incoming_id.take() {
            Some(id) if is_valid_session_id(&id) => self.store.read(&id)?.map(|data| (id, data)),
            Some(id) => {
                debug!("Ignoring malformed session id of length {}", id.len());
                None
            }
            None => None,
        };

        match loaded {
            Some((id, data)) => {
                self.id = Some(id);
                self.data = data;
            }
            None => {
                self.id = Some(random_hex(SESSION_ID_BYTES));
                self.data = SessionData::default();
            }
        }

        self.started = true;
        self.destroyed = false;
        Ok(())
    }

    /// 是否已启动
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// 当前会话 ID（启动前为 None）
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// 会话配置
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 读取用户值
    pub fn get<T: DeserializeOwned>(&mut self, key: &str) -> SessionResult<Option<T>> {
        self.start()?;
        match self.data.values.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// 写入用户值
    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> SessionResult<()> {
        self.start()?;
        self.data.values.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// 是否存在用户值
    pub fn has(&mut self, key: &str) -> SessionResult<bool> {
        self.start()?;
        Ok(self.data.values.contains_key(key))
    }

    /// 删除用户值
    pub fn remove(&mut self, key: &str) -> SessionResult<Option<JsonValue>> {
        self.start()?;
        Ok(self.data.values.remove(key))
    }

    /// 全部用户值
    pub fn all(&mut self) -> SessionResult<Map<String, JsonValue>> {
        self.start()?;
        Ok(self.data.values.clone())
    }

    /// 清空用户值（框架命名空间保留）
    pub fn clear(&mut self) -> SessionResult<()> {
        self.start()?;
        self.data.values.clear();
        Ok(())
    }

    /// 写入闪存值
    pub fn flash<T: Serialize>(&mut self, key: &str, value: T) -> SessionResult<()> {
        self.start()?;
        self.data.framework.flash.insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// 读取并删除闪存值
    pub fn get_flash<T: DeserializeOwned>(&mut self, key: &str) -> SessionResult<Option<T>> {
        self.start()?;
        match self.data.framework.flash.remove(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// 是否存在闪存值（不消费）
    pub fn has_flash(&mut self, key: &str) -> SessionResult<bool> {
        self.start()?;
        Ok(self.data.framework.flash.contains_key(key))
    }

    /// 框架命名空间
    pub fn framework(&mut self) -> SessionResult<&mut FrameworkState> {
        self.start()?;
        Ok(&mut self.data.framework)
    }

    /// 换新 ID，保留数据
    pub fn regenerate(&mut self, delete_old: bool) -> SessionResult<()> {
        self.start()?;
        let new_id = random_hex(SESSION_ID_BYTES);
        if let Some(old) = self.id.replace(new_id) {
            if delete_old {
                self.store.destroy(&old)?;
            }
        }
        debug!("Session id regenerated");
        Ok(())
    }

    /// 销毁会话：删除存储并清空数据，之后的访问会启动一个全新会话
    pub fn destroy(&mut self) -> SessionResult<()> {
        if let Some(id) = self.id.take() {
            self.store.destroy(&id)?;
        }
        self.incoming_id = None;
        self.data = SessionData::default();
        self.started = false;
        self.destroyed = true;
        Ok(())
    }

    /// 持久化（未启动时不做 I/O）
    pub fn save(&self) -> SessionResult<()> {
        match (&self.id, self.started) {
            (Some(id), true) => self.store.write(id, &self.data),
            _ => Ok(()),
        }
    }

    /// 持久化并写出会话 Cookie；销毁后的会话删除 Cookie
    pub fn commit(&self, jar: &mut dyn CookieJar) -> SessionResult<()> {
        if self.started {
            self.save()?;
            if let Some(id) = &self.id {
                jar.set(self.cookie(id));
            }
        } else if self.destroyed {
            jar.remove(&self.config.cookie_name);
        }
        Ok(())
    }

    fn cookie(&self, id: &str) -> Cookie {
        Cookie {
            name: self.config.cookie_name.clone(),
            value: id.to_string(),
            path: self.config.cookie_path.clone(),
            domain: self.config.cookie_domain.clone(),
            max_age: Some(self.config.max_age),
            secure: self.config.secure,
            http_only: self.config.http_only,
            same_site: self.config.same_site,
        }
    }
}

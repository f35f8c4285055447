// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 请求上下文与 Cookie 协作者
//!
//! HTTP 层负责 Cookie 的收发，这里只定义会话层需要的最小接口。

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// 安全（不改变状态）的 HTTP 方法
const SAFE_METHODS: &[&str] = &["GET", "HEAD", "OPTIONS", "TRACE"];

/// 会话层需要的请求信息
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    method: String,
    path: String,
    /// 小写头名 → 值
    headers: HashMap<String, String>,
    ip: Option<String>,
    form: HashMap<String, String>,
    json: Option<JsonValue>,
    csrf_exempt: bool,
}

impl RequestContext {
    /// 创建请求上下文
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    /// 添加请求头（名称大小写不敏感）
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// 客户端 IP
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// 表单字段
    pub fn form_field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.form.insert(name.to_string(), value.into());
        self
    }

    /// JSON 请求体
    pub fn json(mut self, body: JsonValue) -> Self {
        self.json = Some(body);
        self
    }

    /// 处理器声明跳过 CSRF 校验
    pub fn csrf_exempt(mut self) -> Self {
        self.csrf_exempt = true;
        self
    }

    /// 请求方法（大写）
    pub fn method(&self) -> &str {
        &self.method
    }

    /// 请求路径
    pub fn path(&self) -> &str {
        &self.path
    }

    /// 读取请求头
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// 客户端 IP
    pub fn client_ip(&self) -> Option<&str> {
        self.ip.as_deref()
    }

    /// 读取表单字段
    pub fn get_form_field(&self, name: &str) -> Option<&str> {
        self.form.get(name).map(String::as_str)
    }

    /// 读取 JSON 请求体顶层的字符串字段
    pub fn get_json_field(&self, name: &str) -> Option<&str> {
        self.json.as_ref()?.get(name)?.as_str()
    }

    /// 是否声明了 CSRF 豁免
    pub fn is_csrf_exempt(&self) -> bool {
        self.csrf_exempt
    }

    /// 是否为安全方法
    pub fn is_safe_method(&self) -> bool {
        SAFE_METHODS.contains(&self.method.as_str())
    }
}

/// SameSite 策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    /// Strict
    Strict,
    /// Lax
    #[default]
    Lax,
    /// None（需要 Secure）
    None,
}

impl SameSite {
    /// 属性值
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// 待发送的 Cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    /// 名称
    pub name: String,
    /// 值
    pub value: String,
    /// 路径
    pub path: String,
    /// 域
    pub domain: Option<String>,
    /// 有效期；`Some(0)` 表示删除
    pub max_age: Option<Duration>,
    /// Secure
    pub secure: bool,
    /// HttpOnly
    pub http_only: bool,
    /// SameSite
    pub same_site: SameSite,
}

impl Cookie {
    /// 使用默认属性创建（路径 `/`，Secure，HttpOnly，SameSite=Lax）
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            domain: None,
            max_age: None,
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
        }
    }

    /// 是否为删除指令
    pub fn is_removal(&self) -> bool {
        self.max_age == Some(Duration::ZERO)
    }
}

impl fmt::Display for Cookie {
    /// `Set-Cookie` 头的值
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}; Path={}", self.name, self.value, self.path)?;
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={}", domain)?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={}", max_age.as_secs())?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        write!(f, "; SameSite={}", self.same_site.as_str())
    }
}

/// Cookie 收发接口，由 HTTP 层实现
pub trait CookieJar {
    /// 读取请求中的 Cookie
    fn get(&self, name: &str) -> Option<String>;

    /// 设置响应 Cookie
    fn set(&mut self, cookie: Cookie);

    /// 删除 Cookie
    fn remove(&mut self, name: &str);
}

/// 内存 Cookie 容器
#[derive(Debug, Clone, Default)]
pub struct MemoryCookieJar {
    incoming: HashMap<String, String>,
    outgoing: Vec<Cookie>,
}

impl MemoryCookieJar {
    /// 创建空容器
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟请求携带的 Cookie
    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.incoming.insert(name.to_string(), value.to_string());
        self
    }

    /// 已发出的 Cookie（按设置顺序）
    pub fn outgoing(&self) -> &[Cookie] {
        &self.outgoing
    }

    /// 最后一次设置的同名 Cookie
    pub fn last_set(&self, name: &str) -> Option<&Cookie> {
        self.outgoing.iter().rev().find(|c| c.name == name)
    }

    /// 把发出的 Cookie 转为下一个请求携带的 Cookie
    pub fn next_request(&self) -> Self {
        let mut incoming = self.incoming.clone();
        for cookie in &self.outgoing {
            if cookie.is_removal() {
                incoming.remove(&cookie.name);
            } else {
                incoming.insert(cookie.name.clone(), cookie.value.clone());
            }
        }
        Self {
            incoming,
            outgoing: Vec::new(),
        }
    }
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        self.incoming.get(name).cloned()
    }

    fn set(&mut self, cookie: Cookie) {
        self.outgoing.push(cookie);
    }

    fn remove(&mut self, name: &str) {
        let mut cookie = Cookie::new(name, "");
        cookie.max_age = Some(Duration::ZERO);
        self.outgoing.push(cookie);
    }
}

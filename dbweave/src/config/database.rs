// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 数据库端点配置模块
//!
//! `DatabaseConfig` 描述一个物理连接端点（驱动、主机、端口、凭据、字符集、
//! 读写角色与负载均衡权重）。构造后不可变，所有字段只通过 getter 暴露。

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{DbError, DbResult};

/// 数据库驱动类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// MySQL / MariaDB
    #[serde(alias = "mariadb")]
    MySql,
    /// PostgreSQL
    #[serde(alias = "postgres", alias = "pgsql")]
    PostgreSql,
    /// SQLite
    Sqlite,
}

impl Driver {
    /// 从字符串解析驱动类型
    ///
    /// # Examples
    ///
    /// ```rust
    /// use dbweave::config::Driver;
    ///
    /// assert_eq!(Driver::parse("postgres").unwrap(), Driver::PostgreSql);
    /// assert_eq!(Driver::parse("MySQL").unwrap(), Driver::MySql);
    /// assert!(Driver::parse("oracle").is_err());
    /// ```
    pub fn parse(s: &str) -> DbResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Driver::MySql),
            "postgres" | "postgresql" | "pgsql" => Ok(Driver::PostgreSql),
            "sqlite" | "sqlite3" => Ok(Driver::Sqlite),
            other => Err(DbError::Configuration(format!("Unsupported database driver: {}", other))),
        }
    }

    /// 获取驱动的显示名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::MySql => "mysql",
            Driver::PostgreSql => "postgresql",
            Driver::Sqlite => "sqlite",
        }
    }

    /// 驱动默认端口，SQLite 没有端口
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Driver::MySql => Some(3306),
            Driver::PostgreSql => Some(5432),
            Driver::Sqlite => None,
        }
    }

    /// 驱动默认字符集
    pub fn default_charset(&self) -> &'static str {
        match self {
            Driver::MySql => "utf8mb4",
            Driver::PostgreSql | Driver::Sqlite => "utf8",
        }
    }

    /// 是否需要主机名（SQLite 为文件型数据库，不需要）
    pub fn requires_host(&self) -> bool {
        !matches!(self, Driver::Sqlite)
    }

    /// 对应的 Sea-ORM 后端
    pub fn backend(&self) -> sea_orm::DatabaseBackend {
        match self {
            Driver::MySql => sea_orm::DatabaseBackend::MySql,
            Driver::PostgreSql => sea_orm::DatabaseBackend::Postgres,
            Driver::Sqlite => sea_orm::DatabaseBackend::Sqlite,
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 连接角色（读 / 写）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// 只读副本
    Read,
    /// 主库
    #[default]
    Write,
}

impl Role {
    /// 获取角色名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Read => "read",
            Role::Write => "write",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 单个物理端点的原始配置（反序列化输入）
///
/// 通过 [`DatabaseConfig::try_from`] 校验后才能使用。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointSpec {
    /// 驱动
    pub driver: Option<Driver>,
    /// 主机
    #[serde(default)]
    pub host: Option<String>,
    /// 端口
    #[serde(default)]
    pub port: Option<u16>,
    /// 数据库名（SQLite 为文件路径或 `:memory:`）
    #[serde(default)]
    pub database: String,
    /// 用户名
    #[serde(default)]
    pub username: Option<String>,
    /// 密码
    #[serde(default)]
    pub password: Option<String>,
    /// 字符集
    #[serde(default)]
    pub charset: Option<String>,
    /// 排序规则
    #[serde(default)]
    pub collation: Option<String>,
    /// 角色
    #[serde(default)]
    pub role: Option<Role>,
    /// 负载均衡权重
    #[serde(default)]
    pub weight: Option<i64>,
}

/// 物理连接端点配置
///
/// 不变量：`database` 非空；非 SQLite 驱动必须提供 `host`；`weight >= 1`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseConfig {
    driver: Driver,
    host: Option<String>,
    port: Option<u16>,
    database: String,
    username: Option<String>,
    #[serde(skip_serializing)]
    password: Option<String>,
    charset: String,
    collation: Option<String>,
    role: Role,
    weight: u32,
}

impl DatabaseConfig {
    /// 开始构建端点配置
    pub fn builder(driver: Driver, database: impl Into<String>) -> DatabaseConfigBuilder {
        DatabaseConfigBuilder {
            spec: EndpointSpec {
                driver: Some(driver),
                database: database.into(),
                ..Default::default()
            },
        }
    }

    /// SQLite 端点的快捷构造
    pub fn sqlite(path: impl Into<String>) -> DbResult<Self> {
        Self::builder(Driver::Sqlite, path).build()
    }

    /// 驱动
    pub fn driver(&self) -> Driver {
        self.driver
    }

    /// 主机
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// 端口（未设置时取驱动默认值）
    pub fn port(&self) -> Option<u16> {
        self.port.or_else(|| self.driver.default_port())
    }

    /// 数据库名
    pub fn database(&self) -> &str {
        &self.database
    }

    /// 用户名
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// 密码
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// 字符集
    pub fn charset(&self) -> &str {
        &self.charset
    }

    /// 排序规则
    pub fn collation(&self) -> Option<&str> {
        self.collation.as_deref()
    }

    /// 角色
    pub fn role(&self) -> Role {
        self.role
    }

    /// 负载均衡权重
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// 是否为 SQLite 内存数据库
    pub fn is_memory(&self) -> bool {
        self.driver == Driver::Sqlite && self.database == ":memory:"
    }

    /// 返回角色被替换后的副本
    ///
    /// 配置本身不可变，这里构造一个新的值。
    pub fn with_role(&self, role: Role) -> Self {
        Self { role, ..self.clone() }
    }

    /// 生成驱动连接字符串
    ///
    /// 用户名和密码会经过百分号编码。
    pub fn dsn(&self) -> DbResult<String> {
        match self.driver {
            Driver::Sqlite => {
                if self.is_memory() {
                    Ok("sqlite::memory:".to_string())
                } else {
                    Ok(format!("sqlite://{}?mode=rwc", self.database))
                }
            }
            Driver::MySql | Driver::PostgreSql => {
                let scheme = match self.driver {
                    Driver::MySql => "mysql",
                    _ => "postgres",
                };
                let host = self.host.as_deref().unwrap_or("localhost");
                let port = self.port().unwrap_or_default();
                let mut url = url::Url::parse(&format!("{}://{}:{}", scheme, host, port))
                    .map_err(|e| DbError::Configuration(format!("Invalid host '{}': {}", host, e)))?;
                url.set_path(&self.database);
                if let Some(user) = &self.username {
                    url.set_username(user)
                        .map_err(|_| DbError::Configuration("Invalid username".to_string()))?;
                }
                if let Some(password) = &self.password {
                    url.set_password(Some(password))
                        .map_err(|_| DbError::Configuration("Invalid password".to_string()))?;
                }
                if self.driver == Driver::MySql {
                    url.query_pairs_mut().append_pair("charset", &self.charset);
                }
                Ok(url.to_string())
            }
        }
    }

    /// 用于日志的目标描述（不含密码）
    pub fn display_target(&self) -> String {
        match self.driver {
            Driver::Sqlite => format!("sqlite:{}", self.database),
            _ => format!(
                "{}://{}:{}/{}",
                self.driver,
                self.host.as_deref().unwrap_or("localhost"),
                self.port().unwrap_or_default(),
                self.database
            ),
        }
    }
}

impl TryFrom<EndpointSpec> for DatabaseConfig {
    type Error = DbError;

    fn try_from(spec: EndpointSpec) -> Result<Self, Self::Error> {
        let driver = spec
            .driver
            .ok_or_else(|| DbError::Configuration("Missing required field: driver".to_string()))?;

        if spec.database.trim().is_empty() {
            return Err(DbError::Configuration("Missing required field: database".to_string()));
        }

        let host = spec.host.filter(|h| !h.trim().is_empty());
        if driver.requires_host() && host.is_none() {
            return Err(DbError::Configuration(format!(
                "Missing required field: host (driver {})",
                driver
            )));
        }

        let weight = spec.weight.unwrap_or(1);
        if weight < 1 {
            return Err(DbError::Configuration(format!("Weight must be >= 1, got {}", weight)));
        }
        let weight = u32::try_from(weight)
            .map_err(|_| DbError::Configuration(format!("Weight out of range: {}", weight)))?;

        Ok(Self {
            driver,
            host,
            port: spec.port,
            database: spec.database,
            username: spec.username,
            password: spec.password,
            charset: spec.charset.unwrap_or_else(|| driver.default_charset().to_string()),
            collation: spec.collation,
            role: spec.role.unwrap_or_default(),
            weight,
        })
    }
}

impl<'de> Deserialize<'de> for DatabaseConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let spec = EndpointSpec::deserialize(deserializer)?;
        DatabaseConfig::try_from(spec).map_err(serde::de::Error::custom)
    }
}

/// `DatabaseConfig` 构建器
#[derive(Debug, Clone)]
pub struct DatabaseConfigBuilder {
    spec: EndpointSpec,
}

impl DatabaseConfigBuilder {
    /// 主机
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.spec.host = Some(host.into());
        self
    }

    /// 端口
    pub fn port(mut self, port: u16) -> Self {
        self.spec.port = Some(port);
        self
    }

    /// 用户名与密码
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.spec.username = Some(username.into());
        self.spec.password = Some(password.into());
        self
    }

    /// 字符集
    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.spec.charset = Some(charset.into());
        self
    }

    /// 排序规则
    pub fn collation(mut self, collation: impl Into<String>) -> Self {
        self.spec.collation = Some(collation.into());
        self
    }

    /// 角色
    pub fn role(mut self, role: Role) -> Self {
        self.spec.role = Some(role);
        self
    }

    /// 权重
    pub fn weight(mut self, weight: i64) -> Self {
        self.spec.weight = Some(weight);
        self
    }

    /// 校验并生成配置
    ///
    /// # Errors
    ///
    /// 数据库名为空、缺少主机或权重小于 1 时返回 `DbError::Configuration`
    pub fn build(self) -> DbResult<DatabaseConfig> {
        DatabaseConfig::try_from(self.spec)
    }
}

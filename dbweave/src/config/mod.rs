// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 配置管理模块
//!
//! 提供逻辑连接配置的加载、校验，以及连接工厂参数

mod database;

pub use database::{DatabaseConfig, DatabaseConfigBuilder, Driver, EndpointSpec, Role};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;

/// 数据库操作结果类型
pub type DbResult<T> = Result<T, DbError>;

/// 数据库错误
#[derive(Debug, Error)]
pub enum DbError {
    /// 配置错误：未注册的逻辑连接、缺失字段、非法权重
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 所有候选端点在重试后仍无法连接
    #[error("Connection error: {target} failed after {attempts} attempt(s): {source}")]
    Connection {
        /// 最后一次尝试的目标
        target: String,
        /// 尝试次数
        attempts: u32,
        /// 最后一次底层错误
        #[source]
        source: sea_orm::DbErr,
    },

    /// 查询执行错误
    #[error("Query error: {0}")]
    Query(#[from] sea_orm::DbErr),

    /// 参数错误（空插入、空更新、非法运算符）
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 结果为空
    #[error("Not found: {0}")]
    NotFound(String),

    /// 事务错误
    #[error("Transaction error: {0}")]
    Transaction(String),
}

impl DbError {
    /// 对应的 HTTP 状态码提示
    pub fn status_hint(&self) -> u16 {
        match self {
            DbError::NotFound(_) => 404,
            DbError::InvalidArgument(_) => 400,
            _ => 500,
        }
    }
}

/// 一个或多个端点
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// 单个
    One(T),
    /// 多个
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

/// 单个逻辑连接的配置：写端点（一个或多个）与可选的读副本
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSpec {
    /// 写端点
    pub write: OneOrMany<EndpointSpec>,
    /// 读副本
    #[serde(default)]
    pub read: Vec<EndpointSpec>,
}

impl ConnectionSpec {
    /// 展开为带角色的端点配置列表
    ///
    /// 读端点未声明驱动时继承第一个写端点的驱动。
    ///
    /// # Errors
    ///
    /// 任何端点校验失败时返回 `DbError::Configuration`
    pub fn into_configs(self) -> DbResult<Vec<DatabaseConfig>> {
        let writes = self.write.into_vec();
        let inherited = writes.first().and_then(|w| w.driver);

        let mut configs = Vec::with_capacity(writes.len() + self.read.len());
        for mut spec in writes {
            spec.role = Some(Role::Write);
            configs.push(DatabaseConfig::try_from(spec)?);
        }
        for mut spec in self.read {
            spec.role = Some(Role::Read);
            if spec.driver.is_none() {
                spec.driver = inherited;
            }
            configs.push(DatabaseConfig::try_from(spec)?);
        }
        Ok(configs)
    }
}

/// 全部逻辑连接配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionsConfig {
    /// 逻辑名称 → 连接配置
    pub connections: IndexMap<String, ConnectionSpec>,
}

impl ConnectionsConfig {
    /// 从 YAML 字符串加载
    ///
    /// 支持以下格式（也可省略顶层 `connections` 键）：
    /// ```yaml
    /// connections:
    ///   default:
    ///     write: { driver: mysql, host: db-primary, database: app }
    ///     read:
    ///       - { host: db-replica-1, database: app, weight: 1 }
    ///       - { host: db-replica-2, database: app, weight: 3 }
    /// ```
    ///
    /// # Errors
    ///
    /// 格式错误或校验失败时返回错误
    pub fn from_yaml_str(yaml: &str) -> DbResult<Self> {
        #[derive(Deserialize)]
        struct Wrapper {
            connections: ConnectionsConfig,
        }

        let config = match serde_yaml::from_str::<Wrapper>(yaml) {
            Ok(wrapper) => wrapper.connections,
            Err(_) => serde_yaml::from_str::<ConnectionsConfig>(yaml)
                .map_err(|e| DbError::Configuration(format!("Invalid YAML: {}", e)))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 字符串加载
    ///
    /// ```toml
    /// [connections.default.write]
    /// driver = "postgresql"
    /// host = "pg-primary"
    /// database = "app"
    /// ```
    ///
    /// # Errors
    ///
    /// 格式错误或校验失败时返回错误
    pub fn from_toml_str(content: &str) -> DbResult<Self> {
        #[derive(Deserialize)]
        struct Wrapper {
            connections: ConnectionsConfig,
        }

        let config = match toml::from_str::<Wrapper>(content) {
            Ok(wrapper) => wrapper.connections,
            Err(_) => toml::from_str::<ConnectionsConfig>(content)
                .map_err(|e| DbError::Configuration(format!("Invalid TOML: {}", e)))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// 从 YAML 文件加载
    pub fn from_yaml_file(path: impl AsRef<Path>) -> DbResult<Self> {
        let content = read_config_file(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// 从 TOML 文件加载
    pub fn from_toml_file(path: impl AsRef<Path>) -> DbResult<Self> {
        let content = read_config_file(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// 从环境变量创建 `default` 连接
    ///
    /// 读取 `DB_DRIVER`、`DB_HOST`、`DB_PORT`、`DB_DATABASE`、`DB_USERNAME`、
    /// `DB_PASSWORD`、`DB_CHARSET`，以及逗号分隔的 `DB_READ_HOSTS`。
    ///
    /// # Errors
    ///
    /// 缺少 `DB_DATABASE` 或取值非法时返回错误
    pub fn from_env() -> DbResult<Self> {
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        let driver = Driver::parse(&var("DB_DRIVER").unwrap_or_else(|| "mysql".to_string()))?;
        let database =
            var("DB_DATABASE").ok_or_else(|| DbError::Configuration("Missing required field: DB_DATABASE".to_string()))?;
        let port = match var("DB_PORT") {
            Some(port) => Some(
                port.parse::<u16>()
                    .map_err(|_| DbError::Configuration("DB_PORT must be a valid port number".to_string()))?,
            ),
            None => None,
        };

        let base = EndpointSpec {
            driver: Some(driver),
            host: var("DB_HOST"),
            port,
            database,
            username: var("DB_USERNAME"),
            password: var("DB_PASSWORD"),
            charset: var("DB_CHARSET"),
            ..Default::default()
        };

        let read = var("DB_READ_HOSTS")
            .map(|hosts| {
                hosts
                    .split(',')
                    .map(str::trim)
                    .filter(|h| !h.is_empty())
                    .map(|host| EndpointSpec {
                        host: Some(host.to_string()),
                        ..base.clone()
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut connections = IndexMap::new();
        connections.insert(
            "default".to_string(),
            ConnectionSpec {
                write: OneOrMany::One(base),
                read,
            },
        );

        let config = Self { connections };
        config.validate()?;
        Ok(config)
    }

    /// 自动加载配置文件
    ///
    /// 按顺序尝试以下路径：
    /// 1. ./dbweave.yaml
    /// 2. ./dbweave.toml
    /// 3. ./config/dbweave.yaml
    /// 4. ./config/dbweave.toml
    /// 5. ~/.config/dbweave/config.yaml
    /// 6. ~/.dbweave/config.toml
    ///
    /// # Errors
    ///
    /// 如果未找到配置文件或文件格式错误，返回错误
    pub fn from_config_files() -> DbResult<Self> {
        let mut candidates: Vec<std::path::PathBuf> = [
            "dbweave.yaml",
            "dbweave.toml",
            "config/dbweave.yaml",
            "config/dbweave.toml",
        ]
        .iter()
        .map(std::path::PathBuf::from)
        .collect();

        if let Some(home_dir) = home::home_dir() {
            candidates.push(home_dir.join(".config").join("dbweave").join("config.yaml"));
            candidates.push(home_dir.join(".dbweave").join("config.toml"));
        }

        for path in candidates {
            if path.exists() {
                tracing::info!("Loading connection configuration from: {}", path.display());
                let is_yaml = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == "yaml" || ext == "yml");
                return if is_yaml {
                    Self::from_yaml_file(&path)
                } else {
                    Self::from_toml_file(&path)
                };
            }
        }

        Err(DbError::Configuration("No configuration file found".to_string()))
    }

    /// 校验每个逻辑连接：至少一个写端点，所有端点字段合法
    pub fn validate(&self) -> DbResult<()> {
        if self.connections.is_empty() {
            return Err(DbError::Configuration("No connections configured".to_string()));
        }
        for (name, spec) in &self.connections {
            let configs = spec
                .clone()
                .into_configs()
                .map_err(|e| DbError::Configuration(format!("connection '{}': {}", name, e)))?;
            if !configs.iter().any(|c| c.role() == Role::Write) {
                return Err(DbError::Configuration(format!(
                    "connection '{}' has no write endpoint",
                    name
                )));
            }
        }
        Ok(())
    }

    /// 展开为 `(逻辑名称, 端点列表)`
    pub fn into_entries(self) -> DbResult<Vec<(String, Vec<DatabaseConfig>)>> {
        self.connections
            .into_iter()
            .map(|(name, spec)| Ok((name, spec.into_configs()?)))
            .collect()
    }
}

fn read_config_file(path: &Path) -> DbResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| DbError::Configuration(format!("Cannot read {}: {}", path.display(), e)))
}

/// 连接工厂配置
#[derive(Debug, Clone)]
pub struct FactoryConfig {
    /// 建连重试策略
    pub retry: RetryPolicy,
    /// 单次建连超时
    pub connect_timeout: Duration,
    /// 每个物理句柄内部的最大连接数
    pub handle_max_connections: u32,
    /// 是否输出 sqlx 语句日志
    pub sqlx_logging: bool,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(5),
            handle_max_connections: 1,
            sqlx_logging: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
connections:
  default:
    write:
      driver: mysql
      host: db-primary
      database: app
      username: app
      password: secret
    read:
      - host: db-replica-1
        database: app
        weight: 1
      - host: db-replica-2
        database: app
        weight: 3
  analytics:
    write:
      driver: postgresql
      host: pg
      database: stats
"#;

    /// TEST-U-010: YAML 加载与读写端点展开
    #[test]
    fn test_yaml_connections() {
        let config = ConnectionsConfig::from_yaml_str(YAML).unwrap();
        let entries = config.into_entries().unwrap();
        assert_eq!(entries.len(), 2);

        let (name, configs) = &entries[0];
        assert_eq!(name, "default");
        assert_eq!(configs.len(), 3);
        assert_eq!(configs[0].role(), Role::Write);
        assert_eq!(configs[1].role(), Role::Read);
        // 读副本继承写端点的驱动
        assert_eq!(configs[1].driver(), Driver::MySql);
        assert_eq!(configs[2].weight(), 3);

        assert_eq!(entries[1].1[0].driver(), Driver::PostgreSql);
    }

    /// TEST-U-011: 不带 connections 前缀的 YAML
    #[test]
    fn test_yaml_without_wrapper() {
        let yaml = "default:\n  write: { driver: sqlite, database: ':memory:' }\n";
        let config = ConnectionsConfig::from_yaml_str(yaml).unwrap();
        assert!(config.connections.contains_key("default"));
    }

    /// TEST-U-012: TOML 加载，写端点可为多个
    #[test]
    fn test_toml_connections() {
        let toml = r#"
[[connections.default.write]]
driver = "postgresql"
host = "pg-a"
database = "app"
weight = 2

[[connections.default.write]]
driver = "postgresql"
host = "pg-b"
database = "app"
"#;
        let config = ConnectionsConfig::from_toml_str(toml).unwrap();
        let entries = config.into_entries().unwrap();
        let configs = &entries[0].1;
        assert_eq!(configs.len(), 2);
        assert!(configs.iter().all(|c| c.role() == Role::Write));
        assert_eq!(configs[0].weight(), 2);
    }

    /// TEST-U-013: 非法权重在加载时被拒绝
    #[test]
    fn test_invalid_weight_rejected() {
        let yaml = "default:\n  write: { driver: mysql, host: h, database: app, weight: 0 }\n";
        let result = ConnectionsConfig::from_yaml_str(yaml);
        assert!(matches!(result, Err(DbError::Configuration(_))));
    }

    /// TEST-U-014: 状态码提示
    #[test]
    fn test_status_hint() {
        assert_eq!(DbError::NotFound("row".into()).status_hint(), 404);
        assert_eq!(DbError::Configuration("x".into()).status_hint(), 500);
        assert_eq!(DbError::InvalidArgument("x".into()).status_hint(), 400);
    }
}

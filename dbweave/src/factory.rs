// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 连接工厂模块
//!
//! 将一个 [`DatabaseConfig`] 变成一个已调优、可直接使用的物理连接：
//! 构造连接字符串、带重试地建立连接，然后执行驱动相关的会话调优
//! （严格 SQL 模式、UTC 时区、字符集与排序规则）。

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{DatabaseConfig, DbError, DbResult, Driver, FactoryConfig};
use crate::retry::{RetryError, retry};

/// MySQL 严格模式
const MYSQL_SQL_MODE: &str =
    "STRICT_TRANS_TABLES,NO_ZERO_IN_DATE,NO_ZERO_DATE,ERROR_FOR_DIVISION_BY_ZERO,NO_ENGINE_SUBSTITUTION";

/// 物理连接工厂
#[derive(Debug, Clone, Default)]
pub struct ConnectionFactory {
    config: FactoryConfig,
}

impl ConnectionFactory {
    /// 使用工厂配置创建
    pub fn new(config: FactoryConfig) -> Self {
        Self { config }
    }

    /// 工厂配置
    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    /// 建立并调优一个物理连接
    ///
    /// 瞬时错误按重试策略重试；重试耗尽后返回 `DbError::Connection`，
    /// 其中携带最后一次底层错误。
    pub async fn create(&self, config: &DatabaseConfig) -> DbResult<DatabaseConnection> {
        let dsn = config.dsn()?;
        let target = config.display_target();

        let result = retry(&self.config.retry, is_transient, |attempt| {
            let dsn = dsn.clone();
            let target = target.clone();
            async move {
                debug!("Connecting to {} (attempt {})", target, attempt);
                let conn = Database::connect(self.connect_options(config, dsn)).await?;
                if let Err(e) = Self::tune_session(&conn, config).await {
                    let _ = conn.close().await;
                    return Err(e);
                }
                Ok(conn)
            }
        })
        .await;

        match result {
            Ok(conn) => {
                info!("Connected to {} as {}", target, config.role());
                Ok(conn)
            }
            Err(RetryError { attempts, last_error }) => {
                tracing::error!("Giving up on {} after {} attempt(s): {}", target, attempts, last_error);
                Err(DbError::Connection {
                    target,
                    attempts,
                    source: last_error,
                })
            }
        }
    }

    /// 测试端点是否可用：建立连接并执行一次 `SELECT 1`
    ///
    /// 吞掉所有错误，仅返回布尔值。
    pub async fn test_connection(&self, config: &DatabaseConfig) -> bool {
        let Ok(dsn) = config.dsn() else {
            return false;
        };

        let conn = match Database::connect(self.connect_options(config, dsn)).await {
            Ok(conn) => conn,
            Err(e) => {
                debug!("Connection test for {} failed: {}", config.display_target(), e);
                return false;
            }
        };

        let ok = conn.execute_unprepared("SELECT 1").await.is_ok();
        let _ = conn.close().await;
        ok
    }

    fn connect_options(&self, config: &DatabaseConfig, dsn: String) -> ConnectOptions {
        let mut options = ConnectOptions::new(dsn);
        // 内存库的每个连接都是独立数据库，只能保留一个
        let max = if config.is_memory() {
            1
        } else {
            self.config.handle_max_connections.max(1)
        };
        options
            .max_connections(max)
            .min_connections(1)
            .connect_timeout(self.config.connect_timeout)
            .acquire_timeout(self.config.connect_timeout)
            .idle_timeout(Duration::from_secs(24 * 3600))
            .max_lifetime(Duration::from_secs(24 * 3600))
            .sqlx_logging(self.config.sqlx_logging);
        options
    }

    /// 连接后的驱动相关会话调优
    async fn tune_session(conn: &DatabaseConnection, config: &DatabaseConfig) -> Result<(), DbErr> {
        for statement in Self::session_statements(config) {
            conn.execute_unprepared(&statement).await?;
        }
        Ok(())
    }

    /// 返回连接建立后要执行的调优语句
    pub fn session_statements(config: &DatabaseConfig) -> Vec<String> {
        match config.driver() {
            Driver::MySql => {
                let names = match config.collation() {
                    Some(collation) => format!("SET NAMES '{}' COLLATE '{}'", config.charset(), collation),
                    None => format!("SET NAMES '{}'", config.charset()),
                };
                vec![
                    names,
                    format!("SET SESSION sql_mode = '{}'", MYSQL_SQL_MODE),
                    "SET time_zone = '+00:00'".to_string(),
                ]
            }
            Driver::PostgreSql => vec![
                format!("SET client_encoding TO '{}'", config.charset().to_uppercase()),
                "SET TIME ZONE 'UTC'".to_string(),
            ],
            Driver::Sqlite => vec!["PRAGMA foreign_keys = ON".to_string()],
        }
    }
}

/// 连接层面的错误才值得重试
fn is_transient(error: &DbErr) -> bool {
    matches!(error, DbErr::Conn(_) | DbErr::ConnectionAcquire(_))
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! dbweave - 读写分离的数据库访问层与会话安全组件
//!
//! 基于 Sea-ORM 的连接管理、SQL 查询构建器与会话/CSRF 安全层
//!
//! # 功能特性
//!
//! - **连接管理**: 按逻辑名称懒建立物理连接，读写分离，按权重选择读副本，读失败回退写端点
//! - **连接工厂**: 带指数退避的重试与驱动相关的会话调优
//! - **查询构建器**: 链式 API、命名参数绑定、按方言生成 SQL
//! - **查询结果**: 分组、聚合、分页等集合操作
//! - **会话安全**: 懒启动会话、指纹校验、违规锁定、周期性换 ID
//! - **CSRF**: 会话绑定的令牌与不安全方法校验
//! - **监控指标**: Prometheus 文本格式导出（`metrics` 特性）
//!
//! # 快速开始
//!
//! ```rust,ignore
//! use dbweave::{ConnectionManager, ConnectionsConfig, ConnectionFactory};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionsConfig::from_yaml_file("database.yaml")?;
//!     let manager = ConnectionManager::from_config(config, ConnectionFactory::default())?;
//!
//!     let players = manager
//!         .table("players")?
//!         .where_eq("team_id", 7)
//!         .order_by("name")
//!         .get()
//!         .await?;
//!     println!("{} players", players.count());
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/dbweave/0.1")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

#[cfg(not(any(feature = "sqlite", feature = "postgres", feature = "mysql")))]
compile_error!("Enable at least one database feature: 'sqlite', 'postgres', or 'mysql'");

// ============================================================================
// 模块声明
// ============================================================================

/// 配置与错误类型模块
pub mod config;
/// 连接工厂模块
pub mod factory;
/// Metrics 收集模块
#[cfg(feature = "metrics")]
pub mod metrics;
/// 连接管理模块
pub mod pool;
/// 查询构建与结果模块
pub mod query;
/// 重试模块
pub mod retry;
/// 会话与 CSRF 安全模块
pub mod session;

pub use crate::config::{
    ConnectionsConfig, DatabaseConfig, DbError, DbResult, Driver, FactoryConfig, Role,
};
pub use crate::factory::ConnectionFactory;
pub use crate::pool::{ConnectionManager, DEFAULT_CONNECTION};
pub use crate::query::{Page, QueryBuilder, QueryResult, Value};
pub use crate::retry::RetryPolicy;
pub use crate::session::{
    Csrf, CsrfMiddleware, Session, SessionConfig, SessionError, SessionMiddleware, SessionResult,
    SessionSecurity,
};

/// Sea-ORM 类型重导出
pub use sea_orm as orm;

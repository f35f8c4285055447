// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 测试辅助模块
//!
//! 提供基于临时 SQLite 文件的连接管理器与测试夹具

use dbweave::config::{DatabaseConfig, FactoryConfig, Role};
use dbweave::{ConnectionFactory, ConnectionManager, RetryPolicy};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

/// 初始化测试日志（`RUST_LOG` 控制级别，重复调用无副作用）
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 不重试、快速超时的连接工厂
pub fn fast_factory() -> ConnectionFactory {
    ConnectionFactory::new(FactoryConfig {
        retry: RetryPolicy::none(),
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    })
}

/// 临时目录中的 SQLite 文件端点
pub fn sqlite_file(dir: &Path, file: &str, role: Role) -> DatabaseConfig {
    let path = dir.join(file);
    DatabaseConfig::builder(dbweave::Driver::Sqlite, path.to_string_lossy().into_owned())
        .role(role)
        .build()
        .expect("Failed to build sqlite config")
}

/// 指向不存在目录的端点，连接必然失败
#[allow(dead_code)]
pub fn unreachable_sqlite(dir: &Path, role: Role) -> DatabaseConfig {
    let path = dir.join("missing").join("nested").join("replica.db");
    DatabaseConfig::builder(dbweave::Driver::Sqlite, path.to_string_lossy().into_owned())
        .role(role)
        .build()
        .expect("Failed to build sqlite config")
}

/// 只有写端点的默认连接
///
/// 返回管理器与临时目录；目录句柄必须在测试结束前保持存活
pub fn sqlite_manager() -> (ConnectionManager, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let manager = ConnectionManager::new(fast_factory());
    manager
        .load_config(
            dbweave::DEFAULT_CONNECTION,
            vec![sqlite_file(dir.path(), "app.db", Role::Write)],
        )
        .expect("Failed to register connection");
    (manager, dir)
}

/// 创建测试用的 players 表
#[allow(dead_code)]
pub async fn create_players_table(manager: &ConnectionManager) {
    manager
        .statement(
            dbweave::DEFAULT_CONNECTION,
            "CREATE TABLE players (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, \
             position TEXT NOT NULL, rating INTEGER NOT NULL, team_id INTEGER)",
            Default::default(),
        )
        .await
        .expect("Failed to create players table");
}

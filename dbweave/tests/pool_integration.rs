// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 连接管理集成测试

use dbweave::config::{DatabaseConfig, Driver, Role};
use dbweave::{ConnectionManager, DEFAULT_CONNECTION, DbError, Value};
use indexmap::IndexMap;
use std::time::Duration;
use tempfile::TempDir;

mod common;

#[tokio::test]
async fn test_read_uses_write_handle_without_replicas() {
    common::init_tracing();
    let (manager, _dir) = common::sqlite_manager();

    manager.get_read_connection(DEFAULT_CONNECTION).await.unwrap();
    manager.get_write_connection(DEFAULT_CONNECTION).await.unwrap();
    let read = manager.resolved_config(DEFAULT_CONNECTION, Role::Read).await.unwrap();
    let write = manager.resolved_config(DEFAULT_CONNECTION, Role::Write).await.unwrap();
    assert_eq!(read, write);
    assert_eq!(manager.status().await.open_handles, 1);
}

#[tokio::test]
async fn test_read_replica_failure_falls_back_to_write() {
    let dir = TempDir::new().unwrap();
    let manager = ConnectionManager::new(common::fast_factory());
    manager
        .load_config(
            DEFAULT_CONNECTION,
            vec![
                common::sqlite_file(dir.path(), "primary.db", Role::Write),
                common::unreachable_sqlite(dir.path(), Role::Read),
            ],
        )
        .unwrap();

    manager.get_read_connection(DEFAULT_CONNECTION).await.unwrap();
    let read = manager.resolved_config(DEFAULT_CONNECTION, Role::Read).await.unwrap();
    assert_eq!(read.role(), Role::Write);
    assert!(read.database().ends_with("primary.db"));

    // 失败的副本不再重试，之后的读取直接使用写连接
    manager.get_read_connection(DEFAULT_CONNECTION).await.unwrap();
    assert_eq!(manager.status().await.open_handles, 1);
}

#[tokio::test]
async fn test_write_failure_surfaces_connection_error() {
    let dir = TempDir::new().unwrap();
    let manager = ConnectionManager::new(common::fast_factory());
    manager
        .load_config("broken", vec![common::unreachable_sqlite(dir.path(), Role::Write)])
        .unwrap();

    let err = manager.get_write_connection("broken").await.unwrap_err();
    assert!(matches!(err, DbError::Connection { attempts: 1, .. }));
    assert_eq!(err.status_hint(), 500);
    assert_eq!(manager.status().await.open_handles, 0);
}

#[tokio::test]
async fn test_unregistered_name() {
    let manager = ConnectionManager::new(common::fast_factory());
    let err = manager.get_write_connection("nope").await.unwrap_err();
    assert!(matches!(err, DbError::Configuration(_)));
    assert!(manager.table("players").is_err());
}

#[test]
fn test_registration_requires_write_endpoint() {
    let manager = ConnectionManager::new(common::fast_factory());
    let read_only = DatabaseConfig::builder(Driver::Sqlite, "replica.db")
        .role(Role::Read)
        .build()
        .unwrap();
    assert!(matches!(
        manager.load_config("reports", vec![read_only]),
        Err(DbError::Configuration(_))
    ));
    assert!(!manager.has_connection("reports"));
}

#[tokio::test]
async fn test_weighted_replica_distribution() {
    let dir = TempDir::new().unwrap();
    let manager = ConnectionManager::builder()
        .factory(common::fast_factory())
        .seed(7)
        .build();
    let replica = |file: &str, weight: i64| {
        DatabaseConfig::builder(Driver::Sqlite, dir.path().join(file).to_string_lossy().into_owned())
            .role(Role::Read)
            .weight(weight)
            .build()
            .unwrap()
    };
    manager
        .load_config(
            DEFAULT_CONNECTION,
            vec![
                common::sqlite_file(dir.path(), "primary.db", Role::Write),
                replica("r1.db", 1),
                replica("r2.db", 3),
            ],
        )
        .unwrap();

    let trials = 1000;
    let mut heavy = 0;
    for _ in 0..trials {
        manager.get_read_connection(DEFAULT_CONNECTION).await.unwrap();
        let served = manager.resolved_config(DEFAULT_CONNECTION, Role::Read).await.unwrap();
        if served.database().ends_with("r2.db") {
            heavy += 1;
        }
    }
    let share = heavy as f64 / trials as f64;
    assert!((0.70..=0.80).contains(&share), "r2 share was {}", share);
    // 每个副本只建立一次物理连接
    assert_eq!(manager.status().await.open_handles, 2);

    // 写角色只会选中写端点
    let write = manager.select_config(DEFAULT_CONNECTION, Role::Write).unwrap();
    assert!(write.database().ends_with("primary.db"));
}

#[tokio::test]
async fn test_concurrent_access_shares_one_handle() {
    let (manager, _dir) = common::sqlite_manager();

    let lookups = (0..8).map(|_| manager.get_write_connection(DEFAULT_CONNECTION));
    let results = futures::future::join_all(lookups).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(manager.status().await.open_handles, 1);
}

#[test]
fn test_close_all_without_handles() {
    let manager = ConnectionManager::new(common::fast_factory());
    tokio_test::block_on(manager.close_all());
    let status = tokio_test::block_on(manager.status());
    assert_eq!(status.open_handles, 0);
    assert_eq!(status.registered, 0);
}

#[tokio::test]
async fn test_raw_select_and_statement() {
    let (manager, _dir) = common::sqlite_manager();
    common::create_players_table(&manager).await;

    let mut bindings = IndexMap::new();
    bindings.insert("name".to_string(), Value::from("Okafor"));
    bindings.insert("rating".to_string(), Value::from(81));
    let written = manager
        .statement(
            DEFAULT_CONNECTION,
            "INSERT INTO players (name, position, rating) VALUES (:name, 'FW', :rating)",
            bindings,
        )
        .await
        .unwrap();
    assert_eq!(written.affected_rows(), 1);
    assert!(written.is_empty());

    let mut bindings = IndexMap::new();
    bindings.insert("min".to_string(), Value::from(80));
    let result = manager
        .select(
            DEFAULT_CONNECTION,
            "SELECT name, rating FROM players WHERE rating >= :min",
            bindings,
        )
        .await
        .unwrap();
    assert_eq!(result.count(), 1);
    assert_eq!(result.pluck("name"), vec![serde_json::json!("Okafor")]);
    assert_eq!(result.bindings()["min"], Value::Int(80));
}

#[tokio::test]
async fn test_transaction_commit_and_rollback() {
    let (manager, _dir) = common::sqlite_manager();
    common::create_players_table(&manager).await;

    let committed = manager
        .transaction(DEFAULT_CONNECTION, |db| async move {
            let id = db
                .table("players")?
                .insert_get_id(vec![("name", Value::from("Silva")), ("position", "GK".into()), ("rating", 75.into())])
                .await?;
            // 事务内的读取走同一个事务
            assert_eq!(db.table("players")?.count().await?, 1);
            Ok::<_, DbError>(id)
        })
        .await;
    assert_eq!(committed.unwrap(), 1);
    assert!(!manager.in_transaction(DEFAULT_CONNECTION).await);

    let failed = manager
        .transaction(DEFAULT_CONNECTION, |db| async move {
            db.table("players")?
                .insert(vec![("name", Value::from("Ghost")), ("position", "MF".into()), ("rating", 1.into())])
                .await?;
            Err::<(), _>(DbError::InvalidArgument("abort".to_string()))
        })
        .await;
    assert!(matches!(failed, Err(DbError::InvalidArgument(ref m)) if m == "abort"));
    assert!(!manager.in_transaction(DEFAULT_CONNECTION).await);

    let names = manager.table("players").unwrap().get().await.unwrap().pluck("name");
    assert_eq!(names, vec![serde_json::json!("Silva")]);
}

#[tokio::test]
async fn test_transaction_leaves_other_writers_alone() {
    let (manager, _dir) = common::sqlite_manager();
    common::create_players_table(&manager).await;
    let (opened_tx, opened_rx) = tokio::sync::oneshot::channel::<()>();

    let aborted = manager.transaction(DEFAULT_CONNECTION, |db| async move {
        db.table("players")?
            .insert(vec![("name", Value::from("Inside")), ("position", "DF".into()), ("rating", 60.into())])
            .await?;
        let _ = opened_tx.send(());
        tokio::time::sleep(Duration::from_millis(100)).await;
        Err::<(), _>(DbError::InvalidArgument("abort".to_string()))
    });
    let outsider = async {
        opened_rx.await.unwrap();
        assert!(!manager.in_transaction(DEFAULT_CONNECTION).await);
        manager
            .table("players")
            .unwrap()
            .insert(vec![("name", Value::from("Outside")), ("position", "FW".into()), ("rating", 70.into())])
            .await
    };

    let (aborted, inserted) = tokio::join!(aborted, outsider);
    assert!(aborted.is_err());
    assert!(inserted.unwrap());

    let names = manager.table("players").unwrap().get().await.unwrap().pluck("name");
    assert_eq!(names, vec![serde_json::json!("Outside")]);
}

#[tokio::test]
async fn test_manual_transaction_is_scoped_to_handle() {
    let (manager, _dir) = common::sqlite_manager();
    common::create_players_table(&manager).await;

    let forked = manager.fork();
    manager.begin_transaction(DEFAULT_CONNECTION).await.unwrap();
    assert!(manager.clone().in_transaction(DEFAULT_CONNECTION).await);
    assert!(!forked.in_transaction(DEFAULT_CONNECTION).await);

    // 本句柄已开启事务时不能再嵌套
    let nested = manager
        .transaction(DEFAULT_CONNECTION, |_db| async { Ok::<_, DbError>(()) })
        .await;
    assert!(matches!(nested, Err(DbError::Transaction(_))));

    manager
        .table("players")
        .unwrap()
        .insert(vec![("name", Value::from("Draft")), ("position", "MF".into()), ("rating", 50.into())])
        .await
        .unwrap();
    manager.rollback(DEFAULT_CONNECTION).await.unwrap();
    assert_eq!(manager.table("players").unwrap().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_manual_transaction_errors() {
    let (manager, _dir) = common::sqlite_manager();

    assert!(matches!(manager.commit(DEFAULT_CONNECTION).await, Err(DbError::Transaction(_))));

    manager.begin_transaction(DEFAULT_CONNECTION).await.unwrap();
    assert!(matches!(
        manager.begin_transaction(DEFAULT_CONNECTION).await,
        Err(DbError::Transaction(_))
    ));
    assert_eq!(manager.status().await.open_transactions, 1);
    manager.rollback(DEFAULT_CONNECTION).await.unwrap();
    assert!(matches!(manager.rollback(DEFAULT_CONNECTION).await, Err(DbError::Transaction(_))));
}

#[tokio::test]
async fn test_disconnect_and_reconnect() {
    let (manager, _dir) = common::sqlite_manager();
    manager.get_write_connection(DEFAULT_CONNECTION).await.unwrap();
    manager.get_read_connection(DEFAULT_CONNECTION).await.unwrap();

    manager.disconnect(DEFAULT_CONNECTION).await;
    assert_eq!(manager.status().await.open_handles, 0);
    assert!(manager.has_connection(DEFAULT_CONNECTION));

    manager.get_write_connection(DEFAULT_CONNECTION).await.unwrap();
    assert_eq!(manager.status().await.open_handles, 1);

    manager.close_all().await;
    assert_eq!(manager.status().await.open_handles, 0);
}

#[tokio::test]
async fn test_disconnect_rolls_back_open_transaction() {
    let (manager, _dir) = common::sqlite_manager();
    common::create_players_table(&manager).await;

    manager.begin_transaction(DEFAULT_CONNECTION).await.unwrap();
    manager
        .table("players")
        .unwrap()
        .insert(vec![("name", Value::from("Loan")), ("position", "FW".into()), ("rating", 55.into())])
        .await
        .unwrap();

    manager.disconnect(DEFAULT_CONNECTION).await;
    assert!(!manager.in_transaction(DEFAULT_CONNECTION).await);
    assert_eq!(manager.table("players").unwrap().count().await.unwrap(), 0);
}

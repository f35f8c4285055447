// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 查询模块
//!
//! - [`QueryBuilder`]: 链式构建查询，委托语法器编译、委托连接管理器执行
//! - [`SqlGrammar`]: 无状态的方言编译器（MySQL / PostgreSQL / SQLite）
//! - [`QueryResult`]: 物化结果集及其内存聚合与变换

pub mod binder;
mod builder;
mod components;
mod grammar;
mod result;
mod value;

pub use builder::QueryBuilder;
pub use components::{
    Boolean, CompiledQuery, Direction, Having, Join, JoinType, Order, QueryComponents, Where, WhereClause,
};
pub use grammar::{MySqlGrammar, PostgresGrammar, SqlGrammar, SqliteGrammar, grammar_for, sanitize_binding_name};
pub use result::{Page, QueryResult, Row};
pub use value::Value;

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 命名占位符绑定
//!
//! 编译出的 SQL 使用 `:name` 占位符；驱动只接受位置参数，
//! 这里把 `:name` 依次替换为 `?`（MySQL / SQLite）或 `$n`（PostgreSQL），
//! 并按出现顺序收集值。引号内的文本与 `::` 类型转换不会被当作占位符。
//!
//! NULL 值直接写成 `NULL` 字面量而不是参数，避免驱动给它附带一个列类型。

use indexmap::IndexMap;
use sea_orm::{DatabaseBackend, Statement};

use super::value::Value;
use crate::config::{DbError, DbResult};

/// 把命名占位符 SQL 转换为位置参数 SQL
///
/// # Errors
///
/// SQL 引用了绑定表中不存在的占位符时返回 `DbError::InvalidArgument`
pub fn to_positional(
    sql: &str,
    bindings: &IndexMap<String, Value>,
    backend: DatabaseBackend,
) -> DbResult<(String, Vec<Value>)> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                out.push(c);
                i += 1;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' if chars.get(i + 1).is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let value = bindings
                    .get(&name)
                    .ok_or_else(|| DbError::InvalidArgument(format!("No binding supplied for :{}", name)))?;
                if value.is_null() {
                    out.push_str("NULL");
                } else {
                    values.push(value.clone());
                    match backend {
                        DatabaseBackend::Postgres => out.push_str(&format!("${}", values.len())),
                        _ => out.push('?'),
                    }
                }
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok((out, values))
}

/// 构造可执行的 Sea-ORM 语句
pub fn statement(sql: &str, bindings: &IndexMap<String, Value>, backend: DatabaseBackend) -> DbResult<Statement> {
    let (sql, values) = to_positional(sql, bindings, backend)?;
    Ok(Statement::from_sql_and_values(
        backend,
        sql,
        values.into_iter().map(sea_orm::Value::from),
    ))
}

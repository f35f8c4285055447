// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! SQL 语法器
//!
//! 把 [`QueryComponents`] 编译成目标方言的 SQL 文本。语法器是无状态的纯函数集合：
//! 标识符按方言的引用符包裹，通配符 `*`、数字字面量、函数调用表达式与
//! `CURRENT_TIMESTAMP` 一类关键字表达式保持原样，已经包裹过的标识符不会再次包裹。
//!
//! 空列表策略：`IN ()` 编译为恒假谓词 `1=0`（不匹配任何行），
//! `NOT IN ()` 编译为恒真谓词 `1=1`（匹配所有行）。调用方传入空集合时
//! 得到的是"没有行"或"所有行"，而不是错误或非法 SQL。

use indexmap::IndexMap;
use std::fmt::Debug;
use std::sync::Arc;

use super::components::{CompiledQuery, Having, Join, QueryComponents, Where, WhereClause};
use super::value::Value;
use crate::config::{DbError, DbResult, Driver};

/// 保持原样的关键字表达式
const KEYWORD_EXPRESSIONS: &[&str] = &[
    "CURRENT_TIMESTAMP",
    "CURRENT_DATE",
    "CURRENT_TIME",
    "LOCALTIME",
    "LOCALTIMESTAMP",
    "NULL",
    "TRUE",
    "FALSE",
];

/// 方言语法器
pub trait SqlGrammar: Debug + Send + Sync {
    /// 方言名称
    fn name(&self) -> &'static str;

    /// 标识符引用符
    fn quote_char(&self) -> char;

    /// 只有 OFFSET 没有 LIMIT 时的写法
    fn compile_offset_only(&self, offset: u64) -> String;

    /// INSERT 之后返回主键的子句（不支持时为 None）
    fn compile_returning(&self, _column: &str) -> Option<String> {
        None
    }

    /// 包裹单个标识符片段
    fn wrap_segment(&self, segment: &str) -> String {
        let q = self.quote_char();
        if segment == "*" || is_quoted(segment) {
            return segment.to_string();
        }
        let escaped = segment.replace(q, &format!("{q}{q}"));
        format!("{q}{escaped}{q}")
    }

    /// 包裹列名
    ///
    /// 支持 `table.column` 限定与 `AS` 别名（别名本身不包裹）。
    fn wrap_column(&self, column: &str) -> String {
        let column = column.trim();
        if column == "*" || is_expression(column) {
            return column.to_string();
        }
        if let Some((expr, alias)) = split_alias(column) {
            return format!("{} AS {}", self.wrap_column(expr), alias);
        }
        column
            .split('.')
            .map(|segment| self.wrap_segment(segment.trim()))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// 包裹表名，规则与列名相同
    fn wrap_table(&self, table: &str) -> String {
        self.wrap_column(table)
    }

    /// 编译 SELECT
    ///
    /// 子句按固定顺序输出：select → from → joins → where → group → having → order → limit。
    fn compile_select(&self, components: &QueryComponents) -> String {
        let mut sql = String::from("SELECT ");
        if components.distinct {
            sql.push_str("DISTINCT ");
        }
        let columns = if components.columns.is_empty() {
            "*".to_string()
        } else {
            components
                .columns
                .iter()
                .map(|c| self.wrap_column(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        sql.push_str(&columns);
        sql.push_str(" FROM ");
        sql.push_str(&self.wrap_table(&components.table));

        for join in &components.joins {
            sql.push_str(&self.compile_join(join));
        }

        if !components.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.compile_wheres(&components.wheres));
        }

        if !components.groups.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(
                &components
                    .groups
                    .iter()
                    .map(|g| self.wrap_column(g))
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }

        if !components.havings.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&self.compile_havings(&components.havings));
        }

        if !components.orders.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(
                &components
                    .orders
                    .iter()
                    .map(|o| format!("{} {}", self.wrap_column(&o.column), o.direction.as_sql()))
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }

        sql.push_str(&self.compile_limit(components.limit, components.offset));
        sql
    }

    /// 编译计数查询，忽略排序与分页
    ///
    /// 带 DISTINCT 或 GROUP BY 时把原查询包成子查询，计数结果与 SELECT 返回的行数一致。
    fn compile_count(&self, components: &QueryComponents, alias: &str) -> String {
        let mut inner = components.clone();
        inner.orders.clear();
        inner.limit = None;
        inner.offset = None;

        if inner.distinct || !inner.groups.is_empty() {
            return format!(
                "SELECT COUNT(*) AS {} FROM ({}) AS {}_table",
                alias,
                self.compile_select(&inner),
                alias
            );
        }
        inner.columns = vec![format!("COUNT(*) AS {}", alias)];
        self.compile_select(&inner)
    }

    /// 编译 JOIN
    fn compile_join(&self, join: &Join) -> String {
        format!(
            " {} {} ON {} {} {}",
            join.kind.as_sql(),
            self.wrap_table(&join.table),
            self.wrap_column(&join.first),
            join.operator,
            self.wrap_column(&join.second)
        )
    }

    /// 编译 WHERE 列表（不含 `WHERE` 关键字）
    fn compile_wheres(&self, wheres: &[Where]) -> String {
        let mut sql = String::new();
        for (index, item) in wheres.iter().enumerate() {
            if index > 0 {
                sql.push(' ');
                sql.push_str(item.boolean.as_sql());
                sql.push(' ');
            }
            sql.push_str(&self.compile_where(&item.clause));
        }
        sql
    }

    /// 编译单个 WHERE 条件
    fn compile_where(&self, clause: &WhereClause) -> String {
        match clause {
            WhereClause::Basic {
                column,
                operator,
                binding,
            } => format!("{} {} :{}", self.wrap_column(column), operator, binding),
            WhereClause::In {
                column,
                bindings,
                negated,
            } => {
                if bindings.is_empty() {
                    return if *negated { "1=1".to_string() } else { "1=0".to_string() };
                }
                let placeholders = bindings.iter().map(|b| format!(":{}", b)).collect::<Vec<_>>().join(", ");
                format!(
                    "{} {}IN ({})",
                    self.wrap_column(column),
                    if *negated { "NOT " } else { "" },
                    placeholders
                )
            }
            WhereClause::Null { column, negated } => format!(
                "{} IS {}NULL",
                self.wrap_column(column),
                if *negated { "NOT " } else { "" }
            ),
            WhereClause::Between {
                column,
                min,
                max,
                negated,
            } => format!(
                "{} {}BETWEEN :{} AND :{}",
                self.wrap_column(column),
                if *negated { "NOT " } else { "" },
                min,
                max
            ),
            WhereClause::Raw { sql } => sql.clone(),
        }
    }

    /// 编译 HAVING 列表
    fn compile_havings(&self, havings: &[Having]) -> String {
        let mut sql = String::new();
        for (index, having) in havings.iter().enumerate() {
            if index > 0 {
                sql.push(' ');
                sql.push_str(having.boolean.as_sql());
                sql.push(' ');
            }
            sql.push_str(&format!(
                "{} {} :{}",
                self.wrap_column(&having.column),
                having.operator,
                having.binding
            ));
        }
        sql
    }

    /// 编译 LIMIT / OFFSET
    fn compile_limit(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (Some(limit), Some(offset)) => format!(" LIMIT {} OFFSET {}", limit, offset),
            (Some(limit), None) => format!(" LIMIT {}", limit),
            (None, Some(offset)) => self.compile_offset_only(offset),
            (None, None) => String::new(),
        }
    }

    /// 编译 INSERT（单行或多行）
    ///
    /// 单行时占位符为列名；多行时每行的占位符追加行号后缀以保持唯一。
    ///
    /// # Errors
    ///
    /// 没有行、没有列或各行列集合不一致时返回 `DbError::InvalidArgument`
    fn compile_insert(&self, table: &str, rows: &[IndexMap<String, Value>]) -> DbResult<CompiledQuery> {
        let first = rows
            .first()
            .filter(|row| !row.is_empty())
            .ok_or_else(|| DbError::InvalidArgument("Insert values cannot be empty".to_string()))?;
        let columns: Vec<&String> = first.keys().collect();

        let multi = rows.len() > 1;
        let mut bindings = IndexMap::new();
        let mut tuples = Vec::with_capacity(rows.len());

        for (row_index, row) in rows.iter().enumerate() {
            if row.len() != columns.len() || columns.iter().any(|c| !row.contains_key(c.as_str())) {
                return Err(DbError::InvalidArgument(format!(
                    "Insert row {} does not match the columns of the first row",
                    row_index
                )));
            }
            let mut placeholders = Vec::with_capacity(columns.len());
            for column in &columns {
                let base = if multi {
                    format!("{}_{}", sanitize_binding_name(column), row_index)
                } else {
                    sanitize_binding_name(column)
                };
                let name = unique_name(&bindings, base);
                placeholders.push(format!(":{}", name));
                bindings.insert(name, row[column.as_str()].clone());
            }
            tuples.push(format!("({})", placeholders.join(", ")));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.wrap_table(table),
            columns.iter().map(|c| self.wrap_column(c)).collect::<Vec<_>>().join(", "),
            tuples.join(", ")
        );

        Ok(CompiledQuery { sql, bindings })
    }

    /// 编译 UPDATE，`sets` 为 `(列, 占位符名)`
    fn compile_update(&self, components: &QueryComponents, sets: &[(String, String)]) -> String {
        let assignments = sets
            .iter()
            .map(|(column, binding)| format!("{} = :{}", self.wrap_column(column), binding))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("UPDATE {} SET {}", self.wrap_table(&components.table), assignments);
        if !components.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.compile_wheres(&components.wheres));
        }
        sql
    }

    /// 编译 DELETE
    fn compile_delete(&self, components: &QueryComponents) -> String {
        let mut sql = format!("DELETE FROM {}", self.wrap_table(&components.table));
        if !components.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.compile_wheres(&components.wheres));
        }
        sql
    }
}

/// MySQL 语法器（反引号引用）
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlGrammar;

impl SqlGrammar for MySqlGrammar {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_char(&self) -> char {
        '`'
    }

    fn compile_offset_only(&self, offset: u64) -> String {
        format!(" LIMIT 18446744073709551615 OFFSET {}", offset)
    }
}

/// PostgreSQL 语法器（双引号引用）
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresGrammar;

impl SqlGrammar for PostgresGrammar {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn quote_char(&self) -> char {
        '"'
    }

    fn compile_offset_only(&self, offset: u64) -> String {
        format!(" OFFSET {}", offset)
    }

    fn compile_returning(&self, column: &str) -> Option<String> {
        Some(format!(" RETURNING {}", self.wrap_column(column)))
    }
}

/// SQLite 语法器（双引号引用）
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteGrammar;

impl SqlGrammar for SqliteGrammar {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_char(&self) -> char {
        '"'
    }

    fn compile_offset_only(&self, offset: u64) -> String {
        format!(" LIMIT -1 OFFSET {}", offset)
    }
}

/// 按驱动选择语法器
pub fn grammar_for(driver: Driver) -> Arc<dyn SqlGrammar> {
    match driver {
        Driver::MySql => Arc::new(MySqlGrammar),
        Driver::PostgreSql => Arc::new(PostgresGrammar),
        Driver::Sqlite => Arc::new(SqliteGrammar),
    }
}

/// 把列名转换为只含 `[A-Za-z0-9_]` 的占位符名
pub fn sanitize_binding_name(column: &str) -> String {
    let cleaned: String = column
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned.starts_with(|c: char| c.is_ascii_digit()) {
        format!("p_{}", cleaned)
    } else {
        cleaned
    }
}

fn unique_name(bindings: &IndexMap<String, Value>, base: String) -> String {
    if !bindings.contains_key(&base) {
        return base;
    }
    (1..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !bindings.contains_key(candidate))
        .unwrap_or(base)
}

fn is_quoted(segment: &str) -> bool {
    let pairs = [('`', '`'), ('"', '"'), ('[', ']')];
    segment.len() >= 2
        && pairs
            .iter()
            .any(|(open, close)| segment.starts_with(*open) && segment.ends_with(*close))
}

/// 不需要引用的表达式：数字字面量、函数调用、关键字表达式、已引用的标识符
fn is_expression(value: &str) -> bool {
    let numeric_chars = value.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-');
    if numeric_chars && value.parse::<f64>().is_ok() {
        return true;
    }
    if value.contains('(') {
        return true;
    }
    if is_quoted(value) {
        return true;
    }
    KEYWORD_EXPRESSIONS.contains(&value.to_ascii_uppercase().as_str())
}

/// 拆分 `expr AS alias`（大小写不敏感）
fn split_alias(value: &str) -> Option<(&str, &str)> {
    let lower = value.to_ascii_lowercase();
    let pos = lower.rfind(" as ")?;
    let expr = value[..pos].trim();
    let alias = value[pos + 4..].trim();
    if expr.is_empty() || alias.is_empty() {
        return None;
    }
    Some((expr, alias))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::components::{Boolean, Direction, JoinType, Order};

    /// TEST-U-060: 列名包裹规则
    #[test]
    fn test_wrap_column() {
        let g = MySqlGrammar;
        assert_eq!(g.wrap_column("users.id"), "`users`.`id`");
        assert_eq!(g.wrap_column("COUNT(*)"), "COUNT(*)");
        assert_eq!(g.wrap_column("name AS n"), "`name` AS n");
        assert_eq!(g.wrap_column("name as n"), "`name` AS n");
        assert_eq!(g.wrap_column("*"), "*");
        assert_eq!(g.wrap_column("users.*"), "`users`.*");
        assert_eq!(g.wrap_column("42"), "42");
        assert_eq!(g.wrap_column("CURRENT_TIMESTAMP"), "CURRENT_TIMESTAMP");
        assert_eq!(g.wrap_column("`already`"), "`already`");
        assert_eq!(g.wrap_column("`users`.id"), "`users`.`id`");
        assert_eq!(g.wrap_column("we`ird"), "`we``ird`");
    }

    /// TEST-U-061: 其它方言的引用符
    #[test]
    fn test_wrap_column_other_dialects() {
        assert_eq!(PostgresGrammar.wrap_column("users.id"), "\"users\".\"id\"");
        assert_eq!(SqliteGrammar.wrap_table("users AS u"), "\"users\" AS u");
    }

    fn basic(column: &str, binding: &str) -> Where {
        Where {
            boolean: Boolean::And,
            clause: WhereClause::Basic {
                column: column.to_string(),
                operator: "=".to_string(),
                binding: binding.to_string(),
            },
        }
    }

    /// TEST-U-062: SELECT 子句顺序
    #[test]
    fn test_compile_select_full() {
        let mut c = QueryComponents::new("users");
        c.columns = vec!["users.id".into(), "COUNT(posts.id) AS total".into()];
        c.joins.push(Join {
            kind: JoinType::Left,
            table: "posts".into(),
            first: "posts.user_id".into(),
            operator: "=".into(),
            second: "users.id".into(),
        });
        c.wheres.push(basic("users.active", "users_active_1"));
        c.groups.push("users.id".into());
        c.havings.push(Having {
            boolean: Boolean::And,
            column: "COUNT(posts.id)".into(),
            operator: ">".into(),
            binding: "having_2".into(),
        });
        c.orders.push(Order {
            column: "total".into(),
            direction: Direction::Desc,
        });
        c.limit = Some(10);
        c.offset = Some(20);

        assert_eq!(
            MySqlGrammar.compile_select(&c),
            "SELECT `users`.`id`, COUNT(posts.id) AS total FROM `users` \
             LEFT JOIN `posts` ON `posts`.`user_id` = `users`.`id` \
             WHERE `users`.`active` = :users_active_1 \
             GROUP BY `users`.`id` HAVING COUNT(posts.id) > :having_2 \
             ORDER BY `total` DESC LIMIT 10 OFFSET 20"
        );
    }

    /// TEST-U-063: 空 IN / NOT IN 策略
    #[test]
    fn test_empty_in_lists() {
        let g = MySqlGrammar;
        let empty_in = WhereClause::In {
            column: "id".into(),
            bindings: vec![],
            negated: false,
        };
        let empty_not_in = WhereClause::In {
            column: "id".into(),
            bindings: vec![],
            negated: true,
        };
        assert_eq!(g.compile_where(&empty_in), "1=0");
        assert_eq!(g.compile_where(&empty_not_in), "1=1");

        let in_list = WhereClause::In {
            column: "id".into(),
            bindings: vec!["id_1".into(), "id_2".into()],
            negated: true,
        };
        assert_eq!(g.compile_where(&in_list), "`id` NOT IN (:id_1, :id_2)");
    }

    /// TEST-U-064: NULL / BETWEEN / RAW 与 OR 连接
    #[test]
    fn test_where_variants() {
        let g = SqliteGrammar;
        let wheres = vec![
            Where {
                boolean: Boolean::And,
                clause: WhereClause::Null {
                    column: "deleted_at".into(),
                    negated: false,
                },
            },
            Where {
                boolean: Boolean::Or,
                clause: WhereClause::Between {
                    column: "age".into(),
                    min: "age_1".into(),
                    max: "age_2".into(),
                    negated: true,
                },
            },
            Where {
                boolean: Boolean::And,
                clause: WhereClause::Raw {
                    sql: "score > :min_score".into(),
                },
            },
        ];
        assert_eq!(
            g.compile_wheres(&wheres),
            "\"deleted_at\" IS NULL OR \"age\" NOT BETWEEN :age_1 AND :age_2 AND score > :min_score"
        );
    }

    /// TEST-U-065: 只有 OFFSET 时的方言差异
    #[test]
    fn test_offset_only() {
        assert_eq!(MySqlGrammar.compile_limit(None, Some(5)), " LIMIT 18446744073709551615 OFFSET 5");
        assert_eq!(PostgresGrammar.compile_limit(None, Some(5)), " OFFSET 5");
        assert_eq!(SqliteGrammar.compile_limit(None, Some(5)), " LIMIT -1 OFFSET 5");
    }

    /// TEST-U-066: 多行 INSERT 的占位符带行号
    #[test]
    fn test_compile_insert_multi_row() {
        let rows: Vec<IndexMap<String, Value>> = vec![
            IndexMap::from([("name".to_string(), Value::from("a")), ("age".to_string(), Value::from(1))]),
            IndexMap::from([("age".to_string(), Value::from(2)), ("name".to_string(), Value::from("b"))]),
        ];
        let compiled = MySqlGrammar.compile_insert("users", &rows).unwrap();
        assert_eq!(
            compiled.sql,
            "INSERT INTO `users` (`name`, `age`) VALUES (:name_0, :age_0), (:name_1, :age_1)"
        );
        assert_eq!(compiled.bindings.len(), 4);
        assert_eq!(compiled.bindings["age_1"], Value::Int(2));

        let single = MySqlGrammar.compile_insert("users", &rows[..1]).unwrap();
        assert_eq!(single.sql, "INSERT INTO `users` (`name`, `age`) VALUES (:name, :age)");
    }

    /// TEST-U-067: 空 INSERT 与列不一致
    #[test]
    fn test_compile_insert_invalid() {
        assert!(matches!(
            MySqlGrammar.compile_insert("users", &[]),
            Err(DbError::InvalidArgument(_))
        ));
        let rows = vec![
            IndexMap::from([("a".to_string(), Value::from(1))]),
            IndexMap::from([("b".to_string(), Value::from(1))]),
        ];
        assert!(matches!(
            MySqlGrammar.compile_insert("users", &rows),
            Err(DbError::InvalidArgument(_))
        ));
    }

    /// TEST-U-068: UPDATE / DELETE
    #[test]
    fn test_compile_update_delete() {
        let mut c = QueryComponents::new("users");
        c.wheres.push(basic("id", "id_1"));
        let sets = vec![("name".to_string(), "update_name_2".to_string())];
        assert_eq!(
            PostgresGrammar.compile_update(&c, &sets),
            "UPDATE \"users\" SET \"name\" = :update_name_2 WHERE \"id\" = :id_1"
        );
        assert_eq!(MySqlGrammar.compile_delete(&c), "DELETE FROM `users` WHERE `id` = :id_1");
    }

    /// TEST-U-069: 占位符名清洗
    #[test]
    fn test_sanitize_binding_name() {
        assert_eq!(sanitize_binding_name("users.id"), "users_id");
        assert_eq!(sanitize_binding_name("first name"), "first_name");
        assert_eq!(sanitize_binding_name("1col"), "p_1col");
    }

    /// TEST-U-070: 只有 PostgreSQL 支持 RETURNING
    #[test]
    fn test_returning_clause() {
        assert_eq!(PostgresGrammar.compile_returning("id").as_deref(), Some(" RETURNING \"id\""));
        assert!(MySqlGrammar.compile_returning("id").is_none());
    }

    /// TEST-U-071: 计数查询去掉排序与分页，分组时使用子查询
    #[test]
    fn test_compile_count() {
        let mut c = QueryComponents::new("events");
        c.wheres.push(basic("kind", "kind_1"));
        c.orders.push(Order {
            column: "at".into(),
            direction: Direction::Asc,
        });
        c.limit = Some(3);
        assert_eq!(
            SqliteGrammar.compile_count(&c, "aggregate"),
            "SELECT COUNT(*) AS aggregate FROM \"events\" WHERE \"kind\" = :kind_1"
        );

        c.columns = vec!["kind".into()];
        c.groups.push("kind".into());
        assert_eq!(
            PostgresGrammar.compile_count(&c, "aggregate"),
            "SELECT COUNT(*) AS aggregate FROM (SELECT \"kind\" FROM \"events\" \
             WHERE \"kind\" = :kind_1 GROUP BY \"kind\") AS aggregate_table"
        );
    }
}

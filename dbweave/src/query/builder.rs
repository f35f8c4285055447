// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 查询构建器
//!
//! 链式调用累积查询形状，终结操作时编译并执行一次。
//!
//! 每个带值的子句都会分配一个新的占位符名：列名清洗为标识符安全字符，
//! 再追加单调递增的计数器后缀，因此同一构建器内的占位符名不会冲突，
//! 且分配顺序就是调用顺序，`to_sql()` 的输出可复现。
//!
//! 读操作走逻辑连接的读连接，写操作走写连接。

use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use super::components::{
    Boolean, CompiledQuery, Direction, Having, Join, JoinType, Order, QueryComponents, Where, WhereClause,
};
use super::grammar::{SqlGrammar, sanitize_binding_name};
use super::result::{QueryResult, Row};
use super::value::Value;
use crate::config::{DbError, DbResult, Role};
use crate::pool::ConnectionManager;

/// 允许的比较运算符
const OPERATORS: &[&str] = &[
    "=", "<", ">", "<=", ">=", "<>", "!=", "LIKE", "NOT LIKE", "ILIKE", "NOT ILIKE",
];

/// `count()` 使用的聚合别名
const AGGREGATE_ALIAS: &str = "aggregate";

/// 查询构建器
#[derive(Clone)]
pub struct QueryBuilder {
    manager: ConnectionManager,
    connection: String,
    grammar: Arc<dyn SqlGrammar>,
    components: QueryComponents,
    counter: usize,
    /// 链式调用中记录的第一个错误，在终结操作时返回
    error: Option<String>,
}

impl fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("connection", &self.connection)
            .field("grammar", &self.grammar.name())
            .field("components", &self.components)
            .finish()
    }
}

impl QueryBuilder {
    /// 创建构建器（通常通过 [`ConnectionManager::table`] 获得）
    pub fn new(manager: ConnectionManager, connection: &str, grammar: Arc<dyn SqlGrammar>, table: &str) -> Self {
        Self {
            manager,
            connection: connection.to_string(),
            grammar,
            components: QueryComponents::new(table),
            counter: 0,
            error: None,
        }
    }

    /// 当前组件
    pub fn components(&self) -> &QueryComponents {
        &self.components
    }

    /// 当前绑定
    pub fn bindings(&self) -> &IndexMap<String, Value> {
        &self.components.bindings
    }

    // ------------------------------------------------------------------
    // SELECT
    // ------------------------------------------------------------------

    /// 设置选择列（替换默认的 `*`）
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.components.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// 追加选择列
    pub fn add_select(mut self, column: impl Into<String>) -> Self {
        if self.components.columns == ["*"] {
            self.components.columns.clear();
        }
        self.components.columns.push(column.into());
        self
    }

    /// SELECT DISTINCT
    pub fn distinct(mut self) -> Self {
        self.components.distinct = true;
        self
    }

    // ------------------------------------------------------------------
    // WHERE
    // ------------------------------------------------------------------

    /// `col op value`
    pub fn where_(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        self.basic_where(Boolean::And, column, operator, value.into())
    }

    /// `col = value`
    pub fn where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.basic_where(Boolean::And, column, "=", value.into())
    }

    /// `OR col op value`
    pub fn or_where(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        self.basic_where(Boolean::Or, column, operator, value.into())
    }

    /// `OR col = value`
    pub fn or_where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.basic_where(Boolean::Or, column, "=", value.into())
    }

    /// `col IN (...)`，空列表不匹配任何行
    pub fn where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.in_where(Boolean::And, column, values, false)
    }

    /// `OR col IN (...)`
    pub fn or_where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.in_where(Boolean::Or, column, values, false)
    }

    /// `col NOT IN (...)`，空列表匹配所有行
    pub fn where_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.in_where(Boolean::And, column, values, true)
    }

    /// `OR col NOT IN (...)`
    pub fn or_where_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.in_where(Boolean::Or, column, values, true)
    }

    /// `col IS NULL`
    pub fn where_null(self, column: &str) -> Self {
        self.push_where(Boolean::And, null_clause(column, false))
    }

    /// `OR col IS NULL`
    pub fn or_where_null(self, column: &str) -> Self {
        self.push_where(Boolean::Or, null_clause(column, false))
    }

    /// `col IS NOT NULL`
    pub fn where_not_null(self, column: &str) -> Self {
        self.push_where(Boolean::And, null_clause(column, true))
    }

    /// `OR col IS NOT NULL`
    pub fn or_where_not_null(self, column: &str) -> Self {
        self.push_where(Boolean::Or, null_clause(column, true))
    }

    /// `col BETWEEN min AND max`
    pub fn where_between(self, column: &str, min: impl Into<Value>, max: impl Into<Value>) -> Self {
        self.between_where(column, min.into(), max.into(), false)
    }

    /// `col NOT BETWEEN min AND max`
    pub fn where_not_between(self, column: &str, min: impl Into<Value>, max: impl Into<Value>) -> Self {
        self.between_where(column, min.into(), max.into(), true)
    }

    /// `col LIKE pattern`
    pub fn where_like(self, column: &str, pattern: impl Into<Value>) -> Self {
        self.basic_where(Boolean::And, column, "LIKE", pattern.into())
    }

    /// `OR col LIKE pattern`
    pub fn or_where_like(self, column: &str, pattern: impl Into<Value>) -> Self {
        self.basic_where(Boolean::Or, column, "LIKE", pattern.into())
    }

    /// `col NOT LIKE pattern`
    pub fn where_not_like(self, column: &str, pattern: impl Into<Value>) -> Self {
        self.basic_where(Boolean::And, column, "NOT LIKE", pattern.into())
    }

    /// 原始 SQL 条件，使用自己的命名占位符
    ///
    /// 例如 `where_raw("score > :min_score", [("min_score", 10)])`。
    pub fn where_raw<I, K, V>(self, sql: &str, bindings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.raw_where(Boolean::And, sql, bindings)
    }

    /// `OR` 原始 SQL 条件
    pub fn or_where_raw<I, K, V>(self, sql: &str, bindings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.raw_where(Boolean::Or, sql, bindings)
    }

    // ------------------------------------------------------------------
    // JOIN / GROUP / HAVING / ORDER / LIMIT
    // ------------------------------------------------------------------

    /// INNER JOIN
    pub fn join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.push_join(JoinType::Inner, table, first, operator, second)
    }

    /// LEFT JOIN
    pub fn left_join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.push_join(JoinType::Left, table, first, operator, second)
    }

    /// RIGHT JOIN
    pub fn right_join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.push_join(JoinType::Right, table, first, operator, second)
    }

    /// FULL JOIN
    pub fn full_join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.push_join(JoinType::Full, table, first, operator, second)
    }

    /// GROUP BY
    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.components.groups.extend(columns.into_iter().map(Into::into));
        self
    }

    /// HAVING
    pub fn having(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        self.push_having(Boolean::And, column, operator, value.into())
    }

    /// OR HAVING
    pub fn or_having(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        self.push_having(Boolean::Or, column, operator, value.into())
    }

    /// ORDER BY ... ASC
    pub fn order_by(mut self, column: &str) -> Self {
        self.components.orders.push(Order {
            column: column.to_string(),
            direction: Direction::Asc,
        });
        self
    }

    /// ORDER BY ... DESC
    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.components.orders.push(Order {
            column: column.to_string(),
            direction: Direction::Desc,
        });
        self
    }

    /// LIMIT
    pub fn limit(mut self, limit: u64) -> Self {
        self.components.limit = Some(limit);
        self
    }

    /// OFFSET
    pub fn offset(mut self, offset: u64) -> Self {
        self.components.offset = Some(offset);
        self
    }

    /// 数据库侧分页，页码从 1 开始
    pub fn paginate(self, per_page: u64, page: u64) -> Self {
        let per_page = per_page.max(1);
        let page = page.max(1);
        self.limit(per_page).offset((page - 1).saturating_mul(per_page))
    }

    // ------------------------------------------------------------------
    // 编译
    // ------------------------------------------------------------------

    /// 编译 SELECT，不执行
    ///
    /// # Errors
    ///
    /// 链式调用中使用了不支持的运算符时返回 `DbError::InvalidArgument`
    pub fn to_sql(&self) -> DbResult<String> {
        self.check()?;
        Ok(self.grammar.compile_select(&self.components))
    }

    /// 编译 SELECT 并带上绑定
    pub fn compile(&self) -> DbResult<CompiledQuery> {
        Ok(CompiledQuery {
            sql: self.to_sql()?,
            bindings: self.components.bindings.clone(),
        })
    }

    // ------------------------------------------------------------------
    // 读操作
    // ------------------------------------------------------------------

    /// 执行 SELECT
    pub async fn get(&self) -> DbResult<QueryResult> {
        let sql = self.to_sql()?;
        let bindings = &self.components.bindings;
        let started = Instant::now();
        let rows = self
            .manager
            .fetch_rows(&self.connection, Role::Read, &sql, bindings)
            .await?;
        Ok(QueryResult::new(rows, sql, bindings.clone(), started.elapsed(), 0))
    }

    /// 第一行
    pub async fn first(&self) -> DbResult<Option<Row>> {
        let result = self.clone().limit(1).get().await?;
        Ok(result.into_rows().into_iter().next())
    }

    /// 第一行，结果为空时返回 `DbError::NotFound`
    pub async fn first_or_fail(&self) -> DbResult<Row> {
        self.first()
            .await?
            .ok_or_else(|| DbError::NotFound(format!("No rows found in {}", self.components.table)))
    }

    /// `COUNT(*)`
    ///
    /// 忽略排序与分页，构建器本身不变。带 DISTINCT 或 GROUP BY 时计数的是
    /// `get()` 会返回的行数。
    pub async fn count(&self) -> DbResult<u64> {
        self.check()?;
        let sql = self.grammar.compile_count(&self.components, AGGREGATE_ALIAS);
        let count = self
            .manager
            .fetch_i64(&self.connection, Role::Read, &sql, &self.components.bindings, AGGREGATE_ALIAS)
            .await?;
        Ok(count.unwrap_or(0).max(0) as u64)
    }

    /// 编译 `count()` 使用的 SQL，不执行
    pub fn to_count_sql(&self) -> DbResult<String> {
        self.check()?;
        Ok(self.grammar.compile_count(&self.components, AGGREGATE_ALIAS))
    }

    /// 是否存在匹配行
    pub async fn exists(&self) -> DbResult<bool> {
        Ok(self.count().await? > 0)
    }

    // ------------------------------------------------------------------
    // 写操作
    // ------------------------------------------------------------------

    /// 插入一行
    ///
    /// # Errors
    ///
    /// 值为空时返回 `DbError::InvalidArgument`
    pub async fn insert<I, K, V>(&self, values: I) -> DbResult<bool>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let row = collect_row(values);
        let compiled = self.grammar.compile_insert(&self.components.table, &[row])?;
        self.manager
            .execute(&self.connection, &compiled.sql, &compiled.bindings)
            .await?;
        Ok(true)
    }

    /// 插入多行，返回受影响行数
    ///
    /// # Errors
    ///
    /// 没有行或各行列集合不一致时返回 `DbError::InvalidArgument`
    pub async fn insert_many(&self, rows: Vec<IndexMap<String, Value>>) -> DbResult<u64> {
        let compiled = self.grammar.compile_insert(&self.components.table, &rows)?;
        let result = self
            .manager
            .execute(&self.connection, &compiled.sql, &compiled.bindings)
            .await?;
        Ok(result.rows_affected())
    }

    /// 插入一行并返回自增主键 `id`
    ///
    /// PostgreSQL 使用 `RETURNING`，其它方言读取驱动返回的最后插入 ID。
    pub async fn insert_get_id<I, K, V>(&self, values: I) -> DbResult<i64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let row = collect_row(values);
        let compiled = self.grammar.compile_insert(&self.components.table, &[row])?;

        match self.grammar.compile_returning("id") {
            Some(returning) => {
                let sql = format!("{}{}", compiled.sql, returning);
                self.manager
                    .fetch_i64(&self.connection, Role::Write, &sql, &compiled.bindings, "id")
                    .await?
                    .ok_or_else(|| DbError::NotFound("Insert returned no id".to_string()))
            }
            None => {
                let result = self
                    .manager
                    .execute(&self.connection, &compiled.sql, &compiled.bindings)
                    .await?;
                i64::try_from(result.last_insert_id())
                    .map_err(|_| DbError::InvalidArgument("Last insert id does not fit in i64".to_string()))
            }
        }
    }

    /// 更新匹配行，返回受影响行数
    ///
    /// # Errors
    ///
    /// 值为空时返回 `DbError::InvalidArgument`
    pub async fn update<I, K, V>(&self, values: I) -> DbResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.check()?;
        let values = collect_row(values);
        if values.is_empty() {
            return Err(DbError::InvalidArgument("Update values cannot be empty".to_string()));
        }

        let mut bindings = self.components.bindings.clone();
        let mut counter = self.counter;
        let mut sets = Vec::with_capacity(values.len());
        for (column, value) in values {
            let base = format!("update_{}", sanitize_binding_name(&column));
            let name = allocate_name(&bindings, &mut counter, &base);
            bindings.insert(name.clone(), value);
            sets.push((column, name));
        }

        let sql = self.grammar.compile_update(&self.components, &sets);
        let result = self.manager.execute(&self.connection, &sql, &bindings).await?;
        Ok(result.rows_affected())
    }

    /// 删除匹配行，返回受影响行数
    pub async fn delete(&self) -> DbResult<u64> {
        self.check()?;
        let sql = self.grammar.compile_delete(&self.components);
        let result = self
            .manager
            .execute(&self.connection, &sql, &self.components.bindings)
            .await?;
        Ok(result.rows_affected())
    }

    // ------------------------------------------------------------------
    // 内部
    // ------------------------------------------------------------------

    fn check(&self) -> DbResult<()> {
        match &self.error {
            Some(message) => Err(DbError::InvalidArgument(message.clone())),
            None => Ok(()),
        }
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(message);
        }
    }

    /// 分配一个新的占位符并记录绑定
    fn bind(&mut self, column: &str, value: Value) -> String {
        let name = allocate_name(&self.components.bindings, &mut self.counter, &sanitize_binding_name(column));
        self.components.bindings.insert(name.clone(), value);
        name
    }

    fn normalize_operator(&mut self, operator: &str) -> Option<String> {
        let normalized = operator.trim().to_uppercase();
        if OPERATORS.contains(&normalized.as_str()) {
            Some(normalized)
        } else {
            self.fail(format!("Unsupported operator '{}'", operator));
            None
        }
    }

    fn push_where(mut self, boolean: Boolean, clause: WhereClause) -> Self {
        self.components.wheres.push(Where { boolean, clause });
        self
    }

    fn basic_where(mut self, boolean: Boolean, column: &str, operator: &str, value: Value) -> Self {
        let Some(operator) = self.normalize_operator(operator) else {
            return self;
        };
        let binding = self.bind(column, value);
        self.push_where(
            boolean,
            WhereClause::Basic {
                column: column.to_string(),
                operator,
                binding,
            },
        )
    }

    fn in_where<I, V>(mut self, boolean: Boolean, column: &str, values: I, negated: bool) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let bindings = values
            .into_iter()
            .map(|value| self.bind(column, value.into()))
            .collect::<Vec<_>>();
        self.push_where(
            boolean,
            WhereClause::In {
                column: column.to_string(),
                bindings,
                negated,
            },
        )
    }

    fn between_where(mut self, column: &str, min: Value, max: Value, negated: bool) -> Self {
        let min = self.bind(column, min);
        let max = self.bind(column, max);
        self.push_where(
            Boolean::And,
            WhereClause::Between {
                column: column.to_string(),
                min,
                max,
                negated,
            },
        )
    }

    fn raw_where<I, K, V>(mut self, boolean: Boolean, sql: &str, bindings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (name, value) in bindings {
            let name = name.into();
            let name = name.trim_start_matches(':').to_string();
            if self.components.bindings.contains_key(&name) {
                self.fail(format!("Raw binding ':{}' collides with an existing binding", name));
            }
            self.components.bindings.insert(name, value.into());
        }
        self.push_where(boolean, WhereClause::Raw { sql: sql.to_string() })
    }

    fn push_join(mut self, kind: JoinType, table: &str, first: &str, operator: &str, second: &str) -> Self {
        let Some(operator) = self.normalize_operator(operator) else {
            return self;
        };
        self.components.joins.push(Join {
            kind,
            table: table.to_string(),
            first: first.to_string(),
            operator,
            second: second.to_string(),
        });
        self
    }

    fn push_having(mut self, boolean: Boolean, column: &str, operator: &str, value: Value) -> Self {
        let Some(operator) = self.normalize_operator(operator) else {
            return self;
        };
        let binding = self.bind(column, value);
        self.components.havings.push(Having {
            boolean,
            column: column.to_string(),
            operator,
            binding,
        });
        self
    }
}

fn null_clause(column: &str, negated: bool) -> WhereClause {
    WhereClause::Null {
        column: column.to_string(),
        negated,
    }
}

/// 计数器递增到第一个未被占用的 `{base}_{n}`，原始条件的占位符也算占用
fn allocate_name(bindings: &IndexMap<String, Value>, counter: &mut usize, base: &str) -> String {
    loop {
        *counter += 1;
        let name = format!("{}_{}", base, counter);
        if !bindings.contains_key(&name) {
            return name;
        }
    }
}

fn collect_row<I, K, V>(values: I) -> IndexMap<String, Value>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    values.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, Driver};

    fn manager(driver: Driver) -> ConnectionManager {
        let manager = ConnectionManager::default();
        let config = match driver {
            Driver::Sqlite => DatabaseConfig::sqlite(":memory:").unwrap(),
            other => DatabaseConfig::builder(other, "app").host("localhost").build().unwrap(),
        };
        manager.load_config("default", vec![config]).unwrap();
        manager
    }

    fn users() -> QueryBuilder {
        manager(Driver::MySql).table("users").unwrap()
    }

    /// TEST-U-110: 编译结果可复现
    #[test]
    fn test_to_sql_is_idempotent() {
        let query = users().select(["id", "name"]).where_("id", "=", 5).limit(1);
        let first = query.to_sql().unwrap();
        let second = query.to_sql().unwrap();
        assert_eq!(first, "SELECT `id`, `name` FROM `users` WHERE `id` = :id_1 LIMIT 1");
        assert_eq!(first, second);
        assert_eq!(query.bindings(), &query.compile().unwrap().bindings);
        assert_eq!(query.bindings()["id_1"], Value::Int(5));
    }

    /// TEST-U-111: 子句顺序不影响 SQL
    #[test]
    fn test_clause_order_is_canonical() {
        let a = users().limit(10).order_by("name").where_eq("active", true);
        let b = users().where_eq("active", true).order_by("name").limit(10);
        assert_eq!(a.to_sql().unwrap(), b.to_sql().unwrap());
    }

    /// TEST-U-112: 占位符计数器跨子句递增
    #[test]
    fn test_binding_names_are_unique() {
        let query = users()
            .where_between("age", 18, 30)
            .where_in("id", [1, 2])
            .where_eq("users.name", "bob");
        assert_eq!(
            query.to_sql().unwrap(),
            "SELECT * FROM `users` WHERE `age` BETWEEN :age_1 AND :age_2 \
             AND `id` IN (:id_3, :id_4) AND `users`.`name` = :users_name_5"
        );
        assert_eq!(query.bindings().len(), 5);
    }

    /// TEST-U-113: 空 IN / NOT IN
    #[test]
    fn test_empty_in_lists() {
        let empty: Vec<i64> = Vec::new();
        let none = users().where_in("id", empty.clone());
        let all = users().where_not_in("id", empty);
        assert_eq!(none.to_sql().unwrap(), "SELECT * FROM `users` WHERE 1=0");
        assert_eq!(all.to_sql().unwrap(), "SELECT * FROM `users` WHERE 1=1");
    }

    /// TEST-U-114: OR 条件、NULL、LIKE
    #[test]
    fn test_or_null_like() {
        let query = users()
            .where_null("deleted_at")
            .or_where_like("email", "%@example.com")
            .or_where_not_null("verified_at");
        assert_eq!(
            query.to_sql().unwrap(),
            "SELECT * FROM `users` WHERE `deleted_at` IS NULL \
             OR `email` LIKE :email_1 OR `verified_at` IS NOT NULL"
        );
    }

    /// TEST-U-115: 非法运算符在终结操作时报告
    #[test]
    fn test_invalid_operator() {
        let query = users().where_("id", "=; DROP TABLE users", 1).where_eq("name", "x");
        assert!(matches!(query.to_sql(), Err(DbError::InvalidArgument(_))));
    }

    /// TEST-U-116: JOIN / GROUP / HAVING / 分页
    #[test]
    fn test_join_group_having_paginate() {
        let query = users()
            .select(["users.id", "COUNT(posts.id) AS posts"])
            .left_join("posts", "posts.user_id", "=", "users.id")
            .group_by(["users.id"])
            .having("COUNT(posts.id)", ">", 3)
            .order_by_desc("posts")
            .paginate(15, 3);
        assert_eq!(
            query.to_sql().unwrap(),
            "SELECT `users`.`id`, COUNT(posts.id) AS posts FROM `users` \
             LEFT JOIN `posts` ON `posts`.`user_id` = `users`.`id` \
             GROUP BY `users`.`id` HAVING COUNT(posts.id) > :COUNT_posts_id__1 \
             ORDER BY `posts` DESC LIMIT 15 OFFSET 30"
        );
    }

    /// TEST-U-117: 原始条件使用调用方的占位符
    #[test]
    fn test_where_raw() {
        let query = manager(Driver::PostgreSql)
            .table("scores")
            .unwrap()
            .where_eq("game", "chess")
            .where_raw("points > :min_points", [("min_points", 100)]);
        assert_eq!(
            query.to_sql().unwrap(),
            "SELECT * FROM \"scores\" WHERE \"game\" = :game_1 AND points > :min_points"
        );
        assert_eq!(query.bindings()["min_points"], Value::Int(100));

        let clash = query.where_raw("x = :game_1", [("game_1", 1)]);
        assert!(clash.to_sql().is_err());
    }

    /// TEST-U-122: 自动占位符跳过原始条件已占用的名字
    #[test]
    fn test_auto_binding_skips_raw_names() {
        let query = users()
            .where_raw("score > :id_1", [("id_1", 99)])
            .where_eq("id", 5)
            .where_eq("id", 6);
        assert_eq!(
            query.to_sql().unwrap(),
            "SELECT * FROM `users` WHERE score > :id_1 AND `id` = :id_2 AND `id` = :id_3"
        );
        assert_eq!(query.bindings()["id_1"], Value::Int(99));
        assert_eq!(query.bindings()["id_2"], Value::Int(5));
        assert_eq!(query.bindings()["id_3"], Value::Int(6));
    }

    /// TEST-U-123: DISTINCT 与 GROUP BY 的计数包成子查询
    #[test]
    fn test_count_sql() {
        let plain = users().where_eq("active", true).order_by("name").limit(5);
        assert_eq!(
            plain.to_count_sql().unwrap(),
            "SELECT COUNT(*) AS aggregate FROM `users` WHERE `active` = :active_1"
        );

        let distinct = users().select(["team"]).distinct().limit(5);
        assert_eq!(
            distinct.to_count_sql().unwrap(),
            "SELECT COUNT(*) AS aggregate FROM (SELECT DISTINCT `team` FROM `users`) AS aggregate_table"
        );

        let grouped = users().select(["team"]).group_by(["team"]).having("COUNT(*)", ">", 1);
        assert_eq!(
            grouped.to_count_sql().unwrap(),
            "SELECT COUNT(*) AS aggregate FROM (SELECT `team` FROM `users` GROUP BY `team` \
             HAVING COUNT(*) > :COUNT____1) AS aggregate_table"
        );
    }

    /// TEST-U-118: 空插入与空更新
    #[tokio::test]
    async fn test_empty_write_values() {
        let query = users();
        let empty: Vec<(String, Value)> = Vec::new();
        assert!(matches!(
            query.insert(empty.clone()).await,
            Err(DbError::InvalidArgument(_))
        ));
        assert!(matches!(query.update(empty).await, Err(DbError::InvalidArgument(_))));
        assert!(matches!(query.insert_many(vec![]).await, Err(DbError::InvalidArgument(_))));
    }

    /// TEST-U-119: SQLite 只有 OFFSET
    #[test]
    fn test_sqlite_offset_only() {
        let query = manager(Driver::Sqlite).table("logs").unwrap().offset(20).distinct();
        assert_eq!(query.to_sql().unwrap(), "SELECT DISTINCT * FROM \"logs\" LIMIT -1 OFFSET 20");
    }
}

// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 查询结果
//!
//! 一次执行的物化结果集。行在构造时一次性取回，之后所有访问、聚合、
//! 变换都只在内存中完成，不会再次访问数据库。变换方法返回新的集合，
//! 不修改结果本身。

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::time::Duration;

use super::value::Value;
use crate::config::{DbError, DbResult};

/// 一行数据：列名 → 值
pub type Row = serde_json::Map<String, JsonValue>;

/// 物化的查询结果
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    rows: Vec<Row>,
    sql: String,
    bindings: IndexMap<String, Value>,
    #[serde(with = "duration_millis")]
    execution_time: Duration,
    affected_rows: u64,
}

/// 内存分页结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    /// 当前页数据
    pub data: Vec<Row>,
    /// 当前页码（从 1 开始）
    pub current_page: usize,
    /// 每页条数
    pub per_page: usize,
    /// 总条数
    pub total: usize,
    /// 最后一页页码
    pub last_page: usize,
    /// 是否还有下一页
    pub has_more: bool,
}

impl QueryResult {
    /// 构造结果
    pub fn new(
        rows: Vec<Row>,
        sql: impl Into<String>,
        bindings: IndexMap<String, Value>,
        execution_time: Duration,
        affected_rows: u64,
    ) -> Self {
        Self {
            rows,
            sql: sql.into(),
            bindings,
            execution_time,
            affected_rows,
        }
    }

    /// 全部行
    pub fn all(&self) -> &[Row] {
        &self.rows
    }

    /// 取出全部行
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// 第一行
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// 第一行，结果为空时返回 `DbError::NotFound`
    pub fn first_or_fail(&self) -> DbResult<&Row> {
        self.rows
            .first()
            .ok_or_else(|| DbError::NotFound("Query returned no rows".to_string()))
    }

    /// 最后一行
    pub fn last(&self) -> Option<&Row> {
        self.rows.last()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 行数
    pub fn count(&self) -> usize {
        self.rows.len()
    }

    /// 执行的 SQL（命名占位符形式）
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// 执行时使用的绑定
    pub fn bindings(&self) -> &IndexMap<String, Value> {
        &self.bindings
    }

    /// 执行耗时
    pub fn execution_time(&self) -> Duration {
        self.execution_time
    }

    /// 受影响行数（仅对 INSERT / UPDATE / DELETE 有意义）
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// 逐行映射
    pub fn map<T, F>(&self, f: F) -> Vec<T>
    where
        F: FnMut(&Row) -> T,
    {
        self.rows.iter().map(f).collect()
    }

    /// 过滤出满足条件的行
    pub fn filter<F>(&self, mut predicate: F) -> Vec<Row>
    where
        F: FnMut(&Row) -> bool,
    {
        self.rows.iter().filter(|row| predicate(row)).cloned().collect()
    }

    /// 按列分组，缺失或 NULL 的值以字符串 `"null"` 作为键
    pub fn group_by(&self, column: &str) -> IndexMap<String, Vec<Row>> {
        let mut groups: IndexMap<String, Vec<Row>> = IndexMap::new();
        for row in &self.rows {
            groups.entry(group_key(row.get(column))).or_default().push(row.clone());
        }
        groups
    }

    /// 取出某一列，缺失值为 NULL
    pub fn pluck(&self, column: &str) -> Vec<JsonValue> {
        self.rows
            .iter()
            .map(|row| row.get(column).cloned().unwrap_or(JsonValue::Null))
            .collect()
    }

    /// 以 `key_column` 为键取出 `value_column`
    pub fn pluck_keyed(&self, value_column: &str, key_column: &str) -> IndexMap<String, JsonValue> {
        self.rows
            .iter()
            .map(|row| {
                (
                    group_key(row.get(key_column)),
                    row.get(value_column).cloned().unwrap_or(JsonValue::Null),
                )
            })
            .collect()
    }

    /// 以某列为键索引行，重复键保留最后一行
    pub fn key_by(&self, column: &str) -> IndexMap<String, Row> {
        self.rows
            .iter()
            .map(|row| (group_key(row.get(column)), row.clone()))
            .collect()
    }

    /// 数值列求和，非数值忽略
    pub fn sum(&self, column: &str) -> f64 {
        self.numbers(column).sum()
    }

    /// 数值列平均值，没有数值时为 None
    pub fn avg(&self, column: &str) -> Option<f64> {
        let values: Vec<f64> = self.numbers(column).collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    /// 数值列最小值
    pub fn min(&self, column: &str) -> Option<f64> {
        self.numbers(column).reduce(f64::min)
    }

    /// 数值列最大值
    pub fn max(&self, column: &str) -> Option<f64> {
        self.numbers(column).reduce(f64::max)
    }

    /// 某列的去重值，保持首次出现顺序
    pub fn unique(&self, column: &str) -> Vec<JsonValue> {
        let mut seen = Vec::new();
        for value in self.pluck(column) {
            if !seen.contains(&value) {
                seen.push(value);
            }
        }
        seen
    }

    /// 按列升序排序（稳定排序，NULL 在前）
    pub fn sort_by(&self, column: &str) -> Vec<Row> {
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| compare_json(a.get(column), b.get(column)));
        rows
    }

    /// 按列降序排序
    pub fn sort_by_desc(&self, column: &str) -> Vec<Row> {
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| compare_json(b.get(column), a.get(column)));
        rows
    }

    /// 按固定大小切块
    pub fn chunk(&self, size: usize) -> Vec<Vec<Row>> {
        if size == 0 {
            return Vec::new();
        }
        self.rows.chunks(size).map(<[Row]>::to_vec).collect()
    }

    /// 对已取回的结果做内存分页
    ///
    /// 页码从 1 开始；`per_page` 为 0 时按 1 处理，页码为 0 时按 1 处理。
    pub fn paginate(&self, per_page: usize, page: usize) -> Page {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let total = self.rows.len();
        let last_page = total.div_ceil(per_page).max(1);
        let start = (page - 1).saturating_mul(per_page).min(total);
        let end = start.saturating_add(per_page).min(total);

        Page {
            data: self.rows[start..end].to_vec(),
            current_page: page,
            per_page,
            total,
            last_page,
            has_more: page < last_page,
        }
    }

    /// 序列化行为 JSON 数组
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Array(self.rows.iter().cloned().map(JsonValue::Object).collect())
    }

    fn numbers<'a>(&'a self, column: &'a str) -> impl Iterator<Item = f64> + 'a {
        self.rows.iter().filter_map(move |row| match row.get(column) {
            Some(JsonValue::Number(n)) => n.as_f64(),
            Some(JsonValue::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

impl IntoIterator for QueryResult {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

fn group_key(value: Option<&JsonValue>) -> String {
    match value {
        None | Some(JsonValue::Null) => "null".to_string(),
        Some(JsonValue::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn compare_json(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    let rank = |v: Option<&JsonValue>| match v {
        None | Some(JsonValue::Null) => 0,
        Some(JsonValue::Bool(_)) => 1,
        Some(JsonValue::Number(_)) => 2,
        Some(JsonValue::String(_)) => 3,
        Some(_) => 4,
    };
    match (a, b) {
        (Some(JsonValue::Number(x)), Some(JsonValue::Number(y))) => x
            .as_f64()
            .unwrap_or_default()
            .partial_cmp(&y.as_f64().unwrap_or_default())
            .unwrap_or(Ordering::Equal),
        (Some(JsonValue::String(x)), Some(JsonValue::String(y))) => x.cmp(y),
        (Some(JsonValue::Bool(x)), Some(JsonValue::Bool(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: JsonValue) -> Row {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn sample() -> QueryResult {
        let rows = vec![
            row(json!({"id": 1, "team": "red", "score": 10})),
            row(json!({"id": 2, "team": "blue", "score": 30})),
            row(json!({"id": 3, "team": "red", "score": 20})),
            row(json!({"id": 4, "team": null, "score": "5"})),
        ];
        QueryResult::new(rows, "SELECT * FROM players", IndexMap::new(), Duration::from_millis(3), 0)
    }

    fn empty() -> QueryResult {
        QueryResult::new(vec![], "SELECT * FROM players", IndexMap::new(), Duration::ZERO, 0)
    }

    /// TEST-U-090: count 与 all 长度一致
    #[test]
    fn test_count_matches_all() {
        let result = sample();
        assert_eq!(result.count(), result.all().len());
        assert_eq!(empty().count(), empty().all().len());
    }

    /// TEST-U-091: first_or_fail
    #[test]
    fn test_first_or_fail() {
        assert!(matches!(empty().first_or_fail(), Err(DbError::NotFound(_))));
        let result = sample();
        assert_eq!(result.first_or_fail().unwrap()["id"], json!(1));
        assert_eq!(result.last().unwrap()["id"], json!(4));
    }

    /// TEST-U-092: 分组与 NULL 键
    #[test]
    fn test_group_by() {
        let groups = sample().group_by("team");
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["red", "blue", "null"]);
        assert_eq!(groups["red"].len(), 2);
        assert_eq!(sample().group_by("missing")["null"].len(), 4);
    }

    /// TEST-U-093: pluck / key_by / unique
    #[test]
    fn test_pluck_and_key_by() {
        let result = sample();
        assert_eq!(result.pluck("id"), vec![json!(1), json!(2), json!(3), json!(4)]);
        assert_eq!(result.pluck("nope"), vec![JsonValue::Null; 4]);
        let keyed = result.key_by("id");
        assert_eq!(keyed["2"]["team"], json!("blue"));
        assert_eq!(result.unique("team"), vec![json!("red"), json!("blue"), JsonValue::Null]);
        assert_eq!(result.pluck_keyed("score", "id")["3"], json!(20));
    }

    /// TEST-U-094: 聚合
    #[test]
    fn test_aggregates() {
        let result = sample();
        assert_eq!(result.sum("score"), 65.0);
        assert_eq!(result.avg("score"), Some(16.25));
        assert_eq!(result.min("score"), Some(5.0));
        assert_eq!(result.max("score"), Some(30.0));
        assert_eq!(empty().avg("score"), None);
        assert_eq!(empty().sum("score"), 0.0);
    }

    /// TEST-U-095: 排序与过滤不修改原结果
    #[test]
    fn test_sort_and_filter() {
        let result = sample();
        let sorted = result.sort_by_desc("id");
        assert_eq!(sorted[0]["id"], json!(4));
        assert_eq!(result.first().unwrap()["id"], json!(1));

        let reds = result.filter(|r| r.get("team") == Some(&json!("red")));
        assert_eq!(reds.len(), 2);

        let ids = result.map(|r| r["id"].as_i64().unwrap_or_default());
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    /// TEST-U-096: 内存分页
    #[test]
    fn test_paginate() {
        let result = sample();
        let page = result.paginate(3, 1);
        assert_eq!(page.data.len(), 3);
        assert_eq!(page.total, 4);
        assert_eq!(page.last_page, 2);
        assert!(page.has_more);

        let page = result.paginate(3, 2);
        assert_eq!(page.data.len(), 1);
        assert!(!page.has_more);

        let beyond = result.paginate(3, 9);
        assert!(beyond.data.is_empty());
        assert_eq!(beyond.current_page, 9);

        let empty_page = empty().paginate(10, 1);
        assert_eq!(empty_page.last_page, 1);
        assert!(!empty_page.has_more);
    }

    /// TEST-U-097: 切块与 JSON 输出
    #[test]
    fn test_chunk_and_json() {
        let result = sample();
        let chunks = result.chunk(3);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].len(), 1);
        assert!(result.chunk(0).is_empty());
        assert_eq!(result.to_json().as_array().map(Vec::len), Some(4));
    }
}

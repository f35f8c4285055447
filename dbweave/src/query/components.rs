// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 查询组件
//!
//! 构建中的查询的内部状态。语法器只读取这些结构，不做任何 I/O。

use indexmap::IndexMap;

use super::value::Value;

/// 子句之间的布尔连接符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Boolean {
    /// AND
    #[default]
    And,
    /// OR
    Or,
}

impl Boolean {
    /// SQL 关键字
    pub fn as_sql(&self) -> &'static str {
        match self {
            Boolean::And => "AND",
            Boolean::Or => "OR",
        }
    }
}

/// WHERE 子句的各个变体
#[derive(Debug, Clone, PartialEq)]
pub enum WhereClause {
    /// `col op :binding`
    Basic {
        /// 列
        column: String,
        /// 运算符
        operator: String,
        /// 占位符名
        binding: String,
    },
    /// `col [NOT] IN (:b0, :b1, ...)`
    ///
    /// 空列表时 `IN` 编译为恒假 `1=0`，`NOT IN` 编译为恒真 `1=1`。
    In {
        /// 列
        column: String,
        /// 占位符名列表
        bindings: Vec<String>,
        /// 是否为 NOT IN
        negated: bool,
    },
    /// `col IS [NOT] NULL`
    Null {
        /// 列
        column: String,
        /// 是否为 IS NOT NULL
        negated: bool,
    },
    /// `col [NOT] BETWEEN :min AND :max`
    Between {
        /// 列
        column: String,
        /// 下界占位符
        min: String,
        /// 上界占位符
        max: String,
        /// 是否为 NOT BETWEEN
        negated: bool,
    },
    /// 原始 SQL，绑定值单独提供
    Raw {
        /// SQL 片段
        sql: String,
    },
}

/// 带布尔连接符的 WHERE 条目
#[derive(Debug, Clone, PartialEq)]
pub struct Where {
    /// 与前一个条件的连接方式
    pub boolean: Boolean,
    /// 条件本体
    pub clause: WhereClause,
}

/// JOIN 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    /// INNER JOIN
    Inner,
    /// LEFT JOIN
    Left,
    /// RIGHT JOIN
    Right,
    /// FULL JOIN
    Full,
}

impl JoinType {
    /// SQL 关键字
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER JOIN",
            JoinType::Left => "LEFT JOIN",
            JoinType::Right => "RIGHT JOIN",
            JoinType::Full => "FULL JOIN",
        }
    }
}

/// JOIN 子句（列与列比较，不产生绑定）
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// 类型
    pub kind: JoinType,
    /// 目标表
    pub table: String,
    /// 左列
    pub first: String,
    /// 运算符
    pub operator: String,
    /// 右列
    pub second: String,
}

/// HAVING 子句
#[derive(Debug, Clone, PartialEq)]
pub struct Having {
    /// 连接符
    pub boolean: Boolean,
    /// 列或聚合表达式
    pub column: String,
    /// 运算符
    pub operator: String,
    /// 占位符名
    pub binding: String,
}

/// 排序方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// 升序
    #[default]
    Asc,
    /// 降序
    Desc,
}

impl Direction {
    /// SQL 关键字
    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// ORDER BY 条目
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    /// 列
    pub column: String,
    /// 方向
    pub direction: Direction,
}

/// 一个查询的全部组件
#[derive(Debug, Clone, PartialEq)]
pub struct QueryComponents {
    /// 目标表
    pub table: String,
    /// 选择列，默认为 `*`
    pub columns: Vec<String>,
    /// SELECT DISTINCT
    pub distinct: bool,
    /// JOIN 列表
    pub joins: Vec<Join>,
    /// WHERE 列表
    pub wheres: Vec<Where>,
    /// GROUP BY 列
    pub groups: Vec<String>,
    /// HAVING 列表
    pub havings: Vec<Having>,
    /// ORDER BY 列表
    pub orders: Vec<Order>,
    /// LIMIT
    pub limit: Option<u64>,
    /// OFFSET
    pub offset: Option<u64>,
    /// 占位符名 → 值，按分配顺序排列
    pub bindings: IndexMap<String, Value>,
}

impl QueryComponents {
    /// 以目标表创建空组件
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: vec!["*".to_string()],
            distinct: false,
            joins: Vec::new(),
            wheres: Vec::new(),
            groups: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            bindings: IndexMap::new(),
        }
    }
}

/// 编译结果：SQL 文本与本次使用的绑定
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// 含命名占位符的 SQL
    pub sql: String,
    /// 绑定
    pub bindings: IndexMap<String, Value>,
}

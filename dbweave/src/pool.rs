// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 连接管理模块
//!
//! [`ConnectionManager`] 把"逻辑连接名 + 访问角色"映射到一个可用的物理连接：
//!
//! - 每个逻辑名注册一个或多个 [`DatabaseConfig`]，至少一个为写角色
//! - 物理连接按端点懒创建并缓存，直到 [`ConnectionManager::close_all`]
//! - 每次获取连接都在同角色的候选中按权重随机选择，RNG 可注入以获得确定性
//! - 只读副本连接失败时记录日志并回退到写连接，不会让请求失败；
//!   失败的副本在 [`ConnectionManager::disconnect`] 之前不再尝试
//! - 事务属于开启它的句柄及其克隆，每个句柄上每个逻辑名最多一个打开的事务；
//!   事务期间经该句柄发出的语句都在事务中执行，其它句柄不受影响
//!
//! 管理器在服务启动时构造一次，通过克隆句柄在各处共享。
//! [`ConnectionManager::transaction`] 的闭包拿到一个独立事务作用域的句柄。

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DatabaseTransaction, ExecResult, FromQueryResult,
    QueryResult as RawRow, TransactionTrait,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::{ConnectionsConfig, DatabaseConfig, DbError, DbResult, Role};
use crate::factory::ConnectionFactory;
#[cfg(feature = "metrics")]
use crate::metrics::MetricsCollector;
use crate::query::{QueryBuilder, QueryResult, Row, SqlGrammar, Value, binder, grammar_for};

/// 默认逻辑连接名
pub const DEFAULT_CONNECTION: &str = "default";

/// 已建立的物理连接
#[derive(Clone)]
struct PhysicalConnection {
    conn: DatabaseConnection,
    config: DatabaseConfig,
    created_at: Instant,
}

/// 逻辑名下的一个端点：`{name}:{role}#{index}`，index 为注册列表中的位置
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointKey {
    name: String,
    role: Role,
    index: usize,
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.name, self.role, self.index)
    }
}

#[derive(Default)]
struct ConnectionCache {
    /// 端点 → 物理连接
    handles: HashMap<EndpointKey, PhysicalConnection>,

    /// `(name, role)` → 最近一次为该角色服务的端点
    routes: HashMap<(String, Role), EndpointKey>,

    /// 连接失败的只读端点
    unavailable: HashSet<EndpointKey>,
}

impl ConnectionCache {
    fn forget(&mut self, name: &str) -> Vec<PhysicalConnection> {
        self.routes.retain(|(n, _), _| n != name);
        self.unavailable.retain(|key| key.name != name);
        let keys: Vec<EndpointKey> = self.handles.keys().filter(|key| key.name == name).cloned().collect();
        keys.iter().filter_map(|key| self.handles.remove(key)).collect()
    }
}

type TransactionScope = Arc<AsyncMutex<HashMap<String, DatabaseTransaction>>>;

/// 连接管理器
///
/// 克隆共享连接缓存与事务作用域；[`fork`](Self::fork) 得到共享连接缓存但事务独立的句柄。
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,

    /// 逻辑名 → 本句柄打开的事务
    transactions: TransactionScope,
}

struct ManagerInner {
    /// 逻辑名 → 端点配置
    configs: RwLock<HashMap<String, Vec<DatabaseConfig>>>,

    connections: AsyncMutex<ConnectionCache>,

    factory: ConnectionFactory,

    /// 负载均衡用的非加密 RNG
    rng: Mutex<StdRng>,

    #[cfg(feature = "metrics")]
    metrics: Option<Arc<MetricsCollector>>,
}

/// 管理器状态快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerStatus {
    /// 已注册的逻辑连接数
    pub registered: usize,
    /// 已建立的物理连接数
    pub open_handles: usize,
    /// 本句柄打开的事务数
    pub open_transactions: usize,
}

/// 连接管理器构建器
#[derive(Default)]
pub struct ConnectionManagerBuilder {
    factory: Option<ConnectionFactory>,
    rng: Option<StdRng>,
    #[cfg(feature = "metrics")]
    metrics: Option<Arc<MetricsCollector>>,
}

impl ConnectionManagerBuilder {
    /// 使用指定的连接工厂
    pub fn factory(mut self, factory: ConnectionFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    /// 注入负载均衡 RNG
    pub fn rng(mut self, rng: StdRng) -> Self {
        self.rng = Some(rng);
        self
    }

    /// 以固定种子创建负载均衡 RNG
    pub fn seed(self, seed: u64) -> Self {
        self.rng(StdRng::seed_from_u64(seed))
    }

    /// 设置指标收集器
    #[cfg(feature = "metrics")]
    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 构建管理器
    pub fn build(self) -> ConnectionManager {
        ConnectionManager {
            inner: Arc::new(ManagerInner {
                configs: RwLock::new(HashMap::new()),
                connections: AsyncMutex::new(ConnectionCache::default()),
                factory: self.factory.unwrap_or_default(),
                rng: Mutex::new(self.rng.unwrap_or_else(StdRng::from_entropy)),
                #[cfg(feature = "metrics")]
                metrics: self.metrics,
            }),
            transactions: TransactionScope::default(),
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionFactory::default())
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connection_names())
            .finish()
    }
}

impl ConnectionManager {
    /// 使用连接工厂创建管理器
    pub fn new(factory: ConnectionFactory) -> Self {
        Self::builder().factory(factory).build()
    }

    /// 创建构建器
    pub fn builder() -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::default()
    }

    /// 共享连接缓存、但不继承任何打开事务的句柄
    ///
    /// 并发任务各自 fork 一个句柄后，手动开启的事务只影响开启它的那个句柄。
    pub fn fork(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            transactions: TransactionScope::default(),
        }
    }

    /// 从配置文件结构创建管理器并注册全部逻辑连接
    ///
    /// # Errors
    ///
    /// 任一逻辑连接缺少写端点或端点非法时返回 `DbError::Configuration`
    pub fn from_config(config: ConnectionsConfig, factory: ConnectionFactory) -> DbResult<Self> {
        let manager = Self::new(factory);
        for (name, configs) in config.into_entries()? {
            manager.load_config(&name, configs)?;
        }
        Ok(manager)
    }

    /// 注册逻辑连接
    ///
    /// 同角色的多个端点作为负载均衡候选。重复注册会替换端点列表，
    /// 已缓存的物理连接在 [`disconnect`](Self::disconnect) 之后才会按新配置重建。
    ///
    /// # Errors
    ///
    /// 没有任何写角色端点时返回 `DbError::Configuration`
    pub fn load_config(&self, name: &str, configs: Vec<DatabaseConfig>) -> DbResult<()> {
        if !configs.iter().any(|c| c.role() == Role::Write) {
            return Err(DbError::Configuration(format!(
                "Connection '{}' requires at least one write endpoint",
                name
            )));
        }

        let reads = configs.iter().filter(|c| c.role() == Role::Read).count();
        info!(
            "Registered connection '{}': {} write, {} read endpoint(s)",
            name,
            configs.len() - reads,
            reads
        );
        self.inner.configs.write().insert(name.to_string(), configs);
        Ok(())
    }

    /// 是否注册了逻辑连接
    pub fn has_connection(&self, name: &str) -> bool {
        self.inner.configs.read().contains_key(name)
    }

    /// 已注册的逻辑连接名（排序）
    pub fn connection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.configs.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// 获取 `{name}:{role}` 的物理连接
    ///
    /// 每次调用都按权重选出一个端点，端点的物理连接首次使用时创建并缓存。
    /// 读角色没有端点时直接使用写连接；所有只读端点都无法连接时记录警告并回退到写连接。
    ///
    /// # Errors
    ///
    /// - 逻辑名未注册：`DbError::Configuration`
    /// - 所有写端点重试后仍失败：`DbError::Connection`
    pub async fn get_connection(&self, name: &str, role: Role) -> DbResult<DatabaseConnection> {
        let configs = self.configs_for(name)?;
        let mut cache = self.inner.connections.lock().await;
        let (key, physical) = match role {
            Role::Write => self.acquire(&mut cache, name, Role::Write, &configs).await?,
            Role::Read => self.acquire_read(&mut cache, name, &configs).await?,
        };
        cache.routes.insert((name.to_string(), role), key);
        Ok(physical.conn)
    }

    /// 读连接
    pub async fn get_read_connection(&self, name: &str) -> DbResult<DatabaseConnection> {
        self.get_connection(name, Role::Read).await
    }

    /// 写连接
    pub async fn get_write_connection(&self, name: &str) -> DbResult<DatabaseConnection> {
        self.get_connection(name, Role::Write).await
    }

    /// 按权重随机选出一个端点，不建立连接
    ///
    /// 读角色没有端点时从写端点中选择。
    ///
    /// # Errors
    ///
    /// 逻辑名未注册时返回 `DbError::Configuration`
    pub fn select_config(&self, name: &str, role: Role) -> DbResult<DatabaseConfig> {
        let configs = self.configs_for(name)?;
        let mut candidates = candidates_for(&configs, role);
        if candidates.is_empty() {
            candidates = candidates_for(&configs, Role::Write);
        }
        let index = weighted_pick(&candidates, &mut *self.inner.rng.lock())
            .ok_or_else(|| DbError::Configuration(format!("Connection '{}' has no endpoints", name)))?;
        Ok(candidates.swap_remove(index))
    }

    /// 最近一次 `get_connection(name, role)` 实际使用的端点
    pub async fn resolved_config(&self, name: &str, role: Role) -> Option<DatabaseConfig> {
        let cache = self.inner.connections.lock().await;
        let key = cache.routes.get(&(name.to_string(), role))?;
        cache.handles.get(key).map(|p| p.config.clone())
    }

    /// 管理器状态
    pub async fn status(&self) -> ManagerStatus {
        ManagerStatus {
            registered: self.inner.configs.read().len(),
            open_handles: self.inner.connections.lock().await.handles.len(),
            open_transactions: self.transactions.lock().await.len(),
        }
    }

    /// 逻辑连接的 SQL 语法器（由写端点的驱动决定）
    ///
    /// # Errors
    ///
    /// 逻辑名未注册时返回 `DbError::Configuration`
    pub fn grammar(&self, name: &str) -> DbResult<Arc<dyn SqlGrammar>> {
        Ok(grammar_for(self.primary_config(name)?.driver()))
    }

    /// 在默认连接上开始一个查询
    pub fn table(&self, table: &str) -> DbResult<QueryBuilder> {
        self.query(DEFAULT_CONNECTION, table)
    }

    /// 在指定逻辑连接上开始一个查询
    ///
    /// # Errors
    ///
    /// 逻辑名未注册时返回 `DbError::Configuration`
    pub fn query(&self, name: &str, table: &str) -> DbResult<QueryBuilder> {
        let grammar = self.grammar(name)?;
        Ok(QueryBuilder::new(self.clone(), name, grammar, table))
    }

    /// 在读连接上执行带命名绑定的原始查询
    pub async fn select(&self, name: &str, sql: &str, bindings: IndexMap<String, Value>) -> DbResult<QueryResult> {
        let started = Instant::now();
        let rows = self.fetch_rows(name, Role::Read, sql, &bindings).await?;
        Ok(QueryResult::new(rows, sql, bindings, started.elapsed(), 0))
    }

    /// 在写连接上执行带命名绑定的原始语句
    ///
    /// 结果不含行，[`QueryResult::affected_rows`] 为语句影响的行数。
    pub async fn statement(&self, name: &str, sql: &str, bindings: IndexMap<String, Value>) -> DbResult<QueryResult> {
        let started = Instant::now();
        let affected = self.execute(name, sql, &bindings).await?.rows_affected();
        Ok(QueryResult::new(Vec::new(), sql, bindings, started.elapsed(), affected))
    }

    // ------------------------------------------------------------------
    // 事务
    // ------------------------------------------------------------------

    /// 在写连接上为本句柄开始事务
    ///
    /// # Errors
    ///
    /// 本句柄在该逻辑名上已有打开的事务时返回 `DbError::Transaction`
    pub async fn begin_transaction(&self, name: &str) -> DbResult<()> {
        if self.in_transaction(name).await {
            return Err(already_open(name));
        }

        // 连接与 BEGIN 都不持有事务表锁
        let conn = self.get_write_connection(name).await?;
        let txn = conn.begin().await?;

        {
            let mut transactions = self.transactions.lock().await;
            if !transactions.contains_key(name) {
                transactions.insert(name.to_string(), txn);
                debug!("Transaction started on '{}'", name);
                return Ok(());
            }
        }

        // 同一句柄上并发的 begin 先完成了
        discard(name, txn).await;
        Err(already_open(name))
    }

    /// 提交事务
    ///
    /// # Errors
    ///
    /// 没有打开的事务时返回 `DbError::Transaction`
    pub async fn commit(&self, name: &str) -> DbResult<()> {
        let txn = self.take_transaction(name, "commit").await?;
        txn.commit().await?;
        debug!("Transaction committed on '{}'", name);
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_transaction_commit();
        }
        Ok(())
    }

    /// 回滚事务
    ///
    /// # Errors
    ///
    /// 没有打开的事务时返回 `DbError::Transaction`
    pub async fn rollback(&self, name: &str) -> DbResult<()> {
        let txn = self.take_transaction(name, "rollback").await?;
        txn.rollback().await?;
        debug!("Transaction rolled back on '{}'", name);
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_transaction_rollback();
        }
        Ok(())
    }

    /// 本句柄在该逻辑名上是否有打开的事务
    pub async fn in_transaction(&self, name: &str) -> bool {
        self.transactions.lock().await.contains_key(name)
    }

    /// 在事务中执行操作
    ///
    /// 闭包拿到一个独立事务作用域的句柄，只有经它发出的语句进入事务；
    /// 返回 `Ok` 时提交，返回 `Err` 时回滚并原样返回错误。
    ///
    /// 写连接默认只有一个物理会话，闭包内经其它句柄发出的写语句会等到事务结束。
    ///
    /// # Errors
    ///
    /// 本句柄已在该逻辑名上开启事务、开始或提交事务失败，或闭包返回错误
    pub async fn transaction<F, Fut, T, E>(&self, name: &str, f: F) -> Result<T, E>
    where
        F: FnOnce(ConnectionManager) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<DbError>,
    {
        if self.in_transaction(name).await {
            return Err(already_open(name).into());
        }

        let scope = self.fork();
        scope.begin_transaction(name).await?;

        match f(scope.clone()).await {
            Ok(value) => {
                scope.commit(name).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = scope.rollback(name).await {
                    warn!("Rollback on '{}' failed: {}", name, rollback_error);
                }
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // 生命周期
    // ------------------------------------------------------------------

    /// 关闭一个逻辑名下的所有物理连接，本句柄未结束的事务会被回滚
    ///
    /// 之前标记为不可用的只读端点会在下次访问时重新尝试。
    pub async fn disconnect(&self, name: &str) {
        let open = self.transactions.lock().await.remove(name);
        if let Some(txn) = open {
            warn!("Disconnecting '{}' with an open transaction, rolling back", name);
            discard(name, txn).await;
        }

        let removed = self.inner.connections.lock().await.forget(name);
        for physical in removed {
            close_physical(physical).await;
        }
    }

    /// 关闭全部物理连接；之后的访问会重新懒创建
    pub async fn close_all(&self) {
        let open: Vec<(String, DatabaseTransaction)> = self.transactions.lock().await.drain().collect();
        for (name, txn) in open {
            warn!("Closing '{}' with an open transaction, rolling back", name);
            discard(&name, txn).await;
        }

        let handles: Vec<PhysicalConnection> = {
            let mut cache = self.inner.connections.lock().await;
            cache.routes.clear();
            cache.unavailable.clear();
            cache.handles.drain().map(|(_, p)| p).collect()
        };
        let count = handles.len();
        for physical in handles {
            close_physical(physical).await;
        }
        info!("Closed {} cached connection handle(s)", count);
    }

    // ------------------------------------------------------------------
    // 执行（供查询构建器使用）
    // ------------------------------------------------------------------

    /// 执行查询并把每行转换为 JSON 映射
    pub(crate) async fn fetch_rows(
        &self,
        name: &str,
        role: Role,
        sql: &str,
        bindings: &IndexMap<String, Value>,
    ) -> DbResult<Vec<Row>> {
        let raw = self.fetch_raw(name, role, sql, bindings).await?;
        raw.iter()
            .map(|row| -> DbResult<Row> {
                match serde_json::Value::from_query_result(row, "")? {
                    serde_json::Value::Object(map) => Ok(map),
                    _ => Ok(Row::new()),
                }
            })
            .collect()
    }

    /// 执行查询并读取第一行的某个整数列
    pub(crate) async fn fetch_i64(
        &self,
        name: &str,
        role: Role,
        sql: &str,
        bindings: &IndexMap<String, Value>,
        column: &str,
    ) -> DbResult<Option<i64>> {
        let raw = self.fetch_raw(name, role, sql, bindings).await?;
        match raw.first() {
            Some(row) => Ok(Some(row.try_get::<i64>("", column)?)),
            None => Ok(None),
        }
    }

    /// 在写连接（或本句柄打开的事务）上执行语句
    pub(crate) async fn execute(
        &self,
        name: &str,
        sql: &str,
        bindings: &IndexMap<String, Value>,
    ) -> DbResult<ExecResult> {
        let statement = binder::statement(sql, bindings, self.backend(name)?)?;
        let started = Instant::now();

        let transactions = self.transactions.lock().await;
        let result = if transactions.contains_key(name) {
            transactions[name].execute_raw(statement).await
        } else {
            drop(transactions);
            let conn = self.get_write_connection(name).await?;
            conn.execute_raw(statement).await
        };

        self.observe(sql, started.elapsed(), result.is_ok());
        Ok(result?)
    }

    async fn fetch_raw(
        &self,
        name: &str,
        role: Role,
        sql: &str,
        bindings: &IndexMap<String, Value>,
    ) -> DbResult<Vec<RawRow>> {
        let statement = binder::statement(sql, bindings, self.backend(name)?)?;
        let started = Instant::now();

        let transactions = self.transactions.lock().await;
        let result = if transactions.contains_key(name) {
            transactions[name].query_all_raw(statement).await
        } else {
            drop(transactions);
            let conn = self.get_connection(name, role).await?;
            conn.query_all_raw(statement).await
        };

        self.observe(sql, started.elapsed(), result.is_ok());
        Ok(result?)
    }

    #[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
    fn observe(&self, sql: &str, elapsed: Duration, success: bool) {
        debug!("Executed in {:?}: {}", elapsed, sql);
        #[cfg(feature = "metrics")]
        if let Some(metrics) = &self.inner.metrics {
            let kind = sql.split_whitespace().next().unwrap_or("UNKNOWN").to_uppercase();
            metrics.record_query(&kind, elapsed, success);
        }
    }

    // ------------------------------------------------------------------
    // 内部
    // ------------------------------------------------------------------

    fn configs_for(&self, name: &str) -> DbResult<Vec<DatabaseConfig>> {
        self.inner
            .configs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::Configuration(format!("Connection '{}' is not registered", name)))
    }

    fn primary_config(&self, name: &str) -> DbResult<DatabaseConfig> {
        self.configs_for(name)?
            .into_iter()
            .find(|c| c.role() == Role::Write)
            .ok_or_else(|| DbError::Configuration(format!("Connection '{}' has no write endpoint", name)))
    }

    fn backend(&self, name: &str) -> DbResult<DatabaseBackend> {
        Ok(self.primary_config(name)?.driver().backend())
    }

    /// 在已持有缓存锁的情况下为读角色取出或创建物理连接
    async fn acquire_read(
        &self,
        cache: &mut ConnectionCache,
        name: &str,
        configs: &[DatabaseConfig],
    ) -> DbResult<(EndpointKey, PhysicalConnection)> {
        if !configs.iter().any(|c| c.role() == Role::Read) {
            debug!("Connection '{}' has no read endpoints, reads use the write handle", name);
            return self.acquire(cache, name, Role::Write, configs).await;
        }

        match self.acquire(cache, name, Role::Read, configs).await {
            Ok(found) => Ok(found),
            Err(e) => {
                debug!("No read replica of '{}' is usable ({}), reading from write", name, e);
                self.acquire(cache, name, Role::Write, configs).await
            }
        }
    }

    /// 按权重选出端点并返回它的物理连接
    ///
    /// 先尝试选中的端点，再按声明顺序尝试其余端点。只读端点连接失败后被标记为不可用。
    async fn acquire(
        &self,
        cache: &mut ConnectionCache,
        name: &str,
        role: Role,
        configs: &[DatabaseConfig],
    ) -> DbResult<(EndpointKey, PhysicalConnection)> {
        let (keys, candidates): (Vec<EndpointKey>, Vec<DatabaseConfig>) = configs
            .iter()
            .enumerate()
            .filter(|(_, c)| c.role() == role)
            .map(|(index, c)| {
                let key = EndpointKey {
                    name: name.to_string(),
                    role,
                    index,
                };
                (key, c.clone())
            })
            .filter(|(key, _)| !cache.unavailable.contains(key))
            .unzip();

        let first = weighted_pick(&candidates, &mut *self.inner.rng.lock())
            .ok_or_else(|| DbError::Configuration(format!("Connection '{}' has no usable {} endpoint", name, role)))?;
        let order = std::iter::once(first).chain((0..candidates.len()).filter(|i| *i != first));

        let mut last_error = None;
        for i in order {
            let key = &keys[i];
            if let Some(physical) = cache.handles.get(key) {
                return Ok((key.clone(), physical.clone()));
            }

            let config = &candidates[i];
            match self.inner.factory.create(config).await {
                Ok(conn) => {
                    info!("Opened {} connection to {}", key, config.display_target());
                    #[cfg(feature = "metrics")]
                    if let Some(metrics) = &self.inner.metrics {
                        metrics.record_connection_created();
                    }
                    let physical = PhysicalConnection {
                        conn,
                        config: config.clone(),
                        created_at: Instant::now(),
                    };
                    cache.handles.insert(key.clone(), physical.clone());
                    return Ok((key.clone(), physical));
                }
                Err(e) => {
                    warn!("Endpoint {} for '{}' is unavailable: {}", config.display_target(), name, e);
                    #[cfg(feature = "metrics")]
                    if let Some(metrics) = &self.inner.metrics {
                        metrics.record_connection_error();
                    }
                    if role == Role::Read {
                        warn!("Read replica {} of '{}' disabled until disconnect, falling back", key, name);
                        #[cfg(feature = "metrics")]
                        if let Some(metrics) = &self.inner.metrics {
                            metrics.record_replica_fallback();
                        }
                        cache.unavailable.insert(key.clone());
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DbError::Configuration(format!("Connection '{}' has no {} endpoint", name, role))
        }))
    }

    async fn take_transaction(&self, name: &str, action: &str) -> DbResult<DatabaseTransaction> {
        self.transactions
            .lock()
            .await
            .remove(name)
            .ok_or_else(|| DbError::Transaction(format!("No active transaction to {} on '{}'", action, name)))
    }
}

async fn close_physical(physical: PhysicalConnection) {
    debug!(
        "Closing handle to {} (open for {:?})",
        physical.config.display_target(),
        physical.created_at.elapsed()
    );
    if let Err(e) = physical.conn.close().await {
        debug!("Closing {} reported: {}", physical.config.display_target(), e);
    }
}

/// 回滚一个不再需要的事务，失败只记录日志
async fn discard(name: &str, txn: DatabaseTransaction) {
    if let Err(e) = txn.rollback().await {
        warn!("Rollback on '{}' failed: {}", name, e);
    }
}

fn already_open(name: &str) -> DbError {
    DbError::Transaction(format!("Transaction already in progress on '{}'", name))
}

fn candidates_for(configs: &[DatabaseConfig], role: Role) -> Vec<DatabaseConfig> {
    configs.iter().filter(|c| c.role() == role).cloned().collect()
}

/// 按权重随机选择候选下标
///
/// 在 `[1, Σweight]` 中均匀抽取一个整数，沿候选列表累加权重，
/// 返回第一个累计权重不小于抽取值的候选。候选为空时返回 `None`。
pub fn weighted_pick<R: Rng + ?Sized>(candidates: &[DatabaseConfig], rng: &mut R) -> Option<usize> {
    let total: u64 = candidates.iter().map(|c| u64::from(c.weight())).sum();
    if total == 0 {
        return None;
    }

    let draw = rng.gen_range(1..=total);
    let mut cumulative = 0u64;
    for (index, candidate) in candidates.iter().enumerate() {
        cumulative += u64::from(candidate.weight());
        if draw <= cumulative {
            return Some(index);
        }
    }
    Some(candidates.len() - 1)
}

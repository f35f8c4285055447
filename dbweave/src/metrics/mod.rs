// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 运行指标收集模块
//!
//! 进程内的轻量指标，全部基于原子计数器：
//! - **查询指标**: 按语句类型统计次数、错误数与延迟直方图
//! - **连接指标**: 物理连接创建、建连失败、只读副本回退
//! - **事务指标**: 提交与回滚次数
//! - **安全指标**: 会话安全违规、锁定与 CSRF 校验失败
//!
//! 通过 [`MetricsCollector::export_prometheus`] 导出 Prometheus 文本格式。

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 默认直方图桶边界（毫秒）
const DEFAULT_BUCKETS_MS: &[u64] = &[1, 5, 10, 25, 50, 100, 250, 500, 1000, 5000];

/// 延迟直方图
#[derive(Debug)]
pub struct LatencyHistogram {
    /// 桶边界（毫秒）
    buckets: Vec<u64>,
    /// 每个桶的计数，最后一个为溢出桶
    counts: Vec<AtomicU64>,
    /// 总样本数
    total: AtomicU64,
    /// 累计耗时（纳秒）
    sum_ns: AtomicU64,
}

impl LatencyHistogram {
    /// 创建新的延迟直方图
    ///
    /// # Arguments
    ///
    /// * `bucket_boundaries` - 桶边界定义（毫秒），如 [1, 5, 10, 50, 100, 500, 1000]
    pub fn new(bucket_boundaries: Vec<u64>) -> Self {
        let counts: Vec<_> = (0..bucket_boundaries.len() + 1).map(|_| AtomicU64::new(0)).collect();

        Self {
            buckets: bucket_boundaries,
            counts,
            total: AtomicU64::new(0),
            sum_ns: AtomicU64::new(0),
        }
    }

    /// 记录一次延迟
    pub fn record(&self, duration: Duration) {
        let latency_ms = duration.as_millis() as u64;
        let bucket_idx = self
            .buckets
            .iter()
            .position(|boundary| latency_ms <= *boundary)
            .unwrap_or(self.buckets.len());

        self.counts[bucket_idx].fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        self.sum_ns.fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// 获取直方图统计
    pub fn stats(&self) -> HistogramStats {
        let total = self.total.load(Ordering::SeqCst);
        let mut cumulative = 0u64;
        let mut buckets = Vec::with_capacity(self.counts.len());

        for (idx, counter) in self.counts.iter().enumerate() {
            let count = counter.load(Ordering::SeqCst);
            cumulative += count;
            buckets.push(HistogramBucket {
                boundary_ms: self.buckets.get(idx).copied().unwrap_or(u64::MAX),
                count,
                cumulative_count: cumulative,
            });
        }

        HistogramStats {
            total_samples: total,
            sum: Duration::from_nanos(self.sum_ns.load(Ordering::SeqCst)),
            buckets,
        }
    }
}

/// 直方图桶统计
#[derive(Debug, Clone)]
pub struct HistogramBucket {
    /// 桶边界（毫秒），溢出桶为 `u64::MAX`
    pub boundary_ms: u64,
    /// 桶内样本数
    pub count: u64,
    /// 累计样本数
    pub cumulative_count: u64,
}

/// 直方图统计
#[derive(Debug, Clone)]
pub struct HistogramStats {
    /// 总样本数
    pub total_samples: u64,
    /// 累计耗时
    pub sum: Duration,
    /// 桶统计
    pub buckets: Vec<HistogramBucket>,
}

/// 查询统计信息
#[derive(Debug, Clone)]
pub struct QueryStats {
    /// 查询次数
    pub count: u64,
    /// 错误次数
    pub error_count: u64,
    /// 直方图统计
    pub histogram: HistogramStats,
}

impl QueryStats {
    /// 获取错误率
    pub fn error_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.count as f64
        }
    }

    /// 平均延迟
    pub fn avg_latency(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.histogram.sum / self.count as u32
        }
    }
}

/// 事务统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionStats {
    /// 提交次数
    pub commit_count: u64,
    /// 回滚次数
    pub rollback_count: u64,
}

/// 安全统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityStats {
    /// 安全违规次数
    pub violations: u64,
    /// 锁定拒绝次数
    pub lockouts: u64,
    /// CSRF 校验失败次数
    pub csrf_failures: u64,
}

#[derive(Debug)]
struct QueryMetricsInner {
    histogram: LatencyHistogram,
    count: AtomicU64,
    error_count: AtomicU64,
}

/// 指标收集器
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    query_metrics: Arc<RwLock<HashMap<String, Arc<QueryMetricsInner>>>>,
    connections_created: Arc<AtomicU64>,
    connection_errors: Arc<AtomicU64>,
    replica_fallbacks: Arc<AtomicU64>,
    commits: Arc<AtomicU64>,
    rollbacks: Arc<AtomicU64>,
    violations: Arc<AtomicU64>,
    lockouts: Arc<AtomicU64>,
    csrf_failures: Arc<AtomicU64>,
    start_time: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// 创建新的 Metrics 收集器
    pub fn new() -> Self {
        Self {
            query_metrics: Arc::new(RwLock::new(HashMap::new())),
            connections_created: Arc::new(AtomicU64::new(0)),
            connection_errors: Arc::new(AtomicU64::new(0)),
            replica_fallbacks: Arc::new(AtomicU64::new(0)),
            commits: Arc::new(AtomicU64::new(0)),
            rollbacks: Arc::new(AtomicU64::new(0)),
            violations: Arc::new(AtomicU64::new(0)),
            lockouts: Arc::new(AtomicU64::new(0)),
            csrf_failures: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    /// 记录一次查询
    pub fn record_query(&self, query_type: &str, duration: Duration, success: bool) {
        let metrics = {
            let mut map = self.query_metrics.write();
            map.entry(query_type.to_string())
                .or_insert_with(|| {
                    Arc::new(QueryMetricsInner {
                        histogram: LatencyHistogram::new(DEFAULT_BUCKETS_MS.to_vec()),
                        count: AtomicU64::new(0),
                        error_count: AtomicU64::new(0),
                    })
                })
                .clone()
        };

        metrics.histogram.record(duration);
        metrics.count.fetch_add(1, Ordering::SeqCst);
        if !success {
            metrics.error_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// 获取查询类型统计
    pub fn get_query_stats(&self, query_type: &str) -> Option<QueryStats> {
        self.query_metrics.read().get(query_type).map(|m| stats_of(m))
    }

    /// 获取所有查询类型统计
    pub fn all_query_stats(&self) -> HashMap<String, QueryStats> {
        self.query_metrics
            .read()
            .iter()
            .map(|(k, m)| (k.clone(), stats_of(m)))
            .collect()
    }

    /// 记录物理连接创建
    pub fn record_connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::SeqCst);
    }

    /// 记录建连失败
    pub fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::SeqCst);
    }

    /// 记录只读副本回退到写库
    pub fn record_replica_fallback(&self) {
        self.replica_fallbacks.fetch_add(1, Ordering::SeqCst);
    }

    /// 已创建的物理连接数
    pub fn connections_created(&self) -> u64 {
        self.connections_created.load(Ordering::SeqCst)
    }

    /// 建连失败次数
    pub fn connection_errors(&self) -> u64 {
        self.connection_errors.load(Ordering::SeqCst)
    }

    /// 副本回退次数
    pub fn replica_fallbacks(&self) -> u64 {
        self.replica_fallbacks.load(Ordering::SeqCst)
    }

    /// 记录事务提交
    pub fn record_transaction_commit(&self) {
        self.commits.fetch_add(1, Ordering::SeqCst);
    }

    /// 记录事务回滚
    pub fn record_transaction_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
    }

    /// 获取事务统计
    pub fn transaction_stats(&self) -> TransactionStats {
        TransactionStats {
            commit_count: self.commits.load(Ordering::SeqCst),
            rollback_count: self.rollbacks.load(Ordering::SeqCst),
        }
    }

    /// 记录会话安全违规
    pub fn record_security_violation(&self) {
        self.violations.fetch_add(1, Ordering::SeqCst);
    }

    /// 记录锁定拒绝
    pub fn record_lockout(&self) {
        self.lockouts.fetch_add(1, Ordering::SeqCst);
    }

    /// 记录 CSRF 校验失败
    pub fn record_csrf_failure(&self) {
        self.csrf_failures.fetch_add(1, Ordering::SeqCst);
    }

    /// 获取安全统计
    pub fn security_stats(&self) -> SecurityStats {
        SecurityStats {
            violations: self.violations.load(Ordering::SeqCst),
            lockouts: self.lockouts.load(Ordering::SeqCst),
            csrf_failures: self.csrf_failures.load(Ordering::SeqCst),
        }
    }

    /// 获取运行时长
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 重置所有指标
    pub fn reset(&self) {
        self.query_metrics.write().clear();
        for counter in [
            &self.connections_created,
            &self.connection_errors,
            &self.replica_fallbacks,
            &self.commits,
            &self.rollbacks,
            &self.violations,
            &self.lockouts,
            &self.csrf_failures,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
    }

    /// 导出为 Prometheus 格式
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# TYPE dbweave_uptime_seconds gauge\n");
        output.push_str(&format!("dbweave_uptime_seconds {:.3}\n", self.uptime().as_secs_f64()));

        // 连接指标
        output.push_str("# TYPE dbweave_connections counter\n");
        output.push_str(&format!(
            "dbweave_connections_created_total {}\n",
            self.connections_created()
        ));
        output.push_str(&format!("dbweave_connection_errors_total {}\n", self.connection_errors()));
        output.push_str(&format!("dbweave_replica_fallbacks_total {}\n", self.replica_fallbacks()));

        // 事务指标
        let txn = self.transaction_stats();
        output.push_str("# TYPE dbweave_transactions counter\n");
        output.push_str(&format!("dbweave_transactions_commit_total {}\n", txn.commit_count));
        output.push_str(&format!("dbweave_transactions_rollback_total {}\n", txn.rollback_count));

        // 安全指标
        let security = self.security_stats();
        output.push_str("# TYPE dbweave_security counter\n");
        output.push_str(&format!("dbweave_security_violations_total {}\n", security.violations));
        output.push_str(&format!("dbweave_security_lockouts_total {}\n", security.lockouts));
        output.push_str(&format!("dbweave_csrf_failures_total {}\n", security.csrf_failures));

        // 查询指标，按类型排序保证输出稳定
        let mut stats: Vec<_> = self.all_query_stats().into_iter().collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        if !stats.is_empty() {
            output.push_str("# TYPE dbweave_queries_total counter\n");
            output.push_str("# TYPE dbweave_query_duration_seconds histogram\n");
        }
        for (query_type, stat) in stats {
            let label = query_type.to_lowercase();
            output.push_str(&format!("dbweave_queries_total{{type=\"{}\"}} {}\n", label, stat.count));
            output.push_str(&format!(
                "dbweave_query_errors_total{{type=\"{}\"}} {}\n",
                label, stat.error_count
            ));
            for bucket in &stat.histogram.buckets {
                let le = if bucket.boundary_ms == u64::MAX {
                    "+Inf".to_string()
                } else {
                    format!("{}", bucket.boundary_ms as f64 / 1000.0)
                };
                output.push_str(&format!(
                    "dbweave_query_duration_seconds_bucket{{type=\"{}\",le=\"{}\"}} {}\n",
                    label, le, bucket.cumulative_count
                ));
            }
            output.push_str(&format!(
                "dbweave_query_duration_seconds_sum{{type=\"{}\"}} {:.6}\n",
                label,
                stat.histogram.sum.as_secs_f64()
            ));
            output.push_str(&format!(
                "dbweave_query_duration_seconds_count{{type=\"{}\"}} {}\n",
                label, stat.histogram.total_samples
            ));
        }

        output
    }
}

fn stats_of(metrics: &QueryMetricsInner) -> QueryStats {
    QueryStats {
        count: metrics.count.load(Ordering::SeqCst),
        error_count: metrics.error_count.load(Ordering::SeqCst),
        histogram: metrics.histogram.stats(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// TEST-U-100: 直方图分桶
    #[test]
    fn test_histogram_buckets() {
        let histogram = LatencyHistogram::new(vec![10, 100]);
        histogram.record(Duration::from_millis(5));
        histogram.record(Duration::from_millis(50));
        histogram.record(Duration::from_millis(500));

        let stats = histogram.stats();
        assert_eq!(stats.total_samples, 3);
        assert_eq!(stats.buckets.len(), 3);
        assert_eq!(stats.buckets[0].count, 1);
        assert_eq!(stats.buckets[1].cumulative_count, 2);
        assert_eq!(stats.buckets[2].boundary_ms, u64::MAX);
        assert_eq!(stats.buckets[2].cumulative_count, 3);
    }

    /// TEST-U-101: 查询统计与错误率
    #[test]
    fn test_record_query() {
        let metrics = MetricsCollector::new();
        metrics.record_query("SELECT", Duration::from_millis(2), true);
        metrics.record_query("SELECT", Duration::from_millis(4), false);

        let stats = metrics.get_query_stats("SELECT").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.error_count, 1);
        assert!((stats.error_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.avg_latency(), Duration::from_millis(3));
        assert!(metrics.get_query_stats("DELETE").is_none());
    }

    /// TEST-U-102: Prometheus 导出
    #[test]
    fn test_export_prometheus() {
        let metrics = MetricsCollector::new();
        metrics.record_query("INSERT", Duration::from_millis(1), true);
        metrics.record_transaction_commit();
        metrics.record_security_violation();

        let text = metrics.export_prometheus();
        assert!(text.contains("dbweave_queries_total{type=\"insert\"} 1"));
        assert!(text.contains("dbweave_transactions_commit_total 1"));
        assert!(text.contains("dbweave_security_violations_total 1"));
        assert!(text.contains("le=\"+Inf\"} 1"));
    }

    /// TEST-U-103: 重置
    #[test]
    fn test_reset() {
        let metrics = MetricsCollector::new();
        metrics.record_connection_error();
        metrics.record_transaction_rollback();
        metrics.record_query("SELECT", Duration::from_millis(1), true);
        metrics.reset();

        assert_eq!(metrics.connection_errors(), 0);
        assert_eq!(metrics.transaction_stats(), TransactionStats::default());
        assert!(metrics.all_query_stats().is_empty());
    }
}

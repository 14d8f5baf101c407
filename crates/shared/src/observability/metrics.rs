//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过 exporter 自带的监听端口暴露，供 Prometheus 抓取。
//! 未初始化 recorder 时（如单元测试）所有记录函数都是空操作。

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

use super::ObservabilityConfig;

/// 初始化 Prometheus 指标导出
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));

    PrometheusBuilder::new().with_http_listener(addr).install()?;

    register_common_metrics(&config.service_name);
    info!("Metrics exporter listening on {}", addr);

    Ok(())
}

/// 注册通用指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "accrual_polls_total",
        "Total number of accrual service lookups, by outcome"
    );
    metrics::describe_counter!(
        "accrual_reconciled_total",
        "Total number of orders reconciled, by new status"
    );
    metrics::describe_counter!(
        "accrual_credited_minor_units_total",
        "Total points credited to balances, in minor units"
    );
    metrics::describe_gauge!(
        "accrual_cycle_limit",
        "Current per-cycle order limit of the rate controller"
    );
    metrics::describe_counter!(
        "accrual_cycles_total",
        "Total number of reconciliation cycles, by end-of-cycle decision"
    );
    metrics::describe_histogram!(
        "accrual_cycle_duration_seconds",
        "Reconciliation cycle duration in seconds, excluding the inter-cycle sleep"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次积分查询的分类结果
#[inline]
pub fn record_poll(outcome: &'static str) {
    metrics::counter!("accrual_polls_total", "outcome" => outcome).increment(1);
}

/// 记录一次对账落库
#[inline]
pub fn record_reconciled(status: &'static str, credited_minor_units: u64) {
    metrics::counter!("accrual_reconciled_total", "status" => status).increment(1);
    if credited_minor_units > 0 {
        metrics::counter!("accrual_credited_minor_units_total").increment(credited_minor_units);
    }
}

/// 更新当前每轮上限
#[inline]
pub fn set_cycle_limit(limit: u32) {
    metrics::gauge!("accrual_cycle_limit").set(f64::from(limit));
}

/// 记录一轮对账
#[inline]
pub fn record_cycle(decision: &'static str, duration_secs: f64) {
    metrics::counter!("accrual_cycles_total", "decision" => decision).increment(1);
    metrics::histogram!("accrual_cycle_duration_seconds", "decision" => decision)
        .record(duration_secs);
}

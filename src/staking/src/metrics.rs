//! Prometheus metrics for the staking engine
//!
//! Amount-valued series are exported in whole tokens (f64), since wei
//! amounts do not fit Prometheus integer gauges.

use lazy_static::lazy_static;
use nodestake_core::{units, Amount};
use parking_lot::RwLock;
use prometheus::{
    register_gauge_vec_with_registry, register_gauge_with_registry,
    register_histogram_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, register_int_gauge_vec_with_registry,
    register_int_gauge_with_registry, Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter,
    IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use std::sync::Arc;

use crate::error::ErrorKind;
use crate::types::Operation;

/// Histogram buckets for stake and withdrawal amounts (tokens)
const AMOUNT_BUCKETS: &[f64] = &[
    0.1,
    1.0,
    3.2,
    10.0,
    32.0,
    100.0,
    1000.0,
    10000.0,
];

lazy_static! {
    /// Global metrics registry shared by every engine in the process
    static ref METRICS_REGISTRY: Arc<RwLock<Option<Registry>>> = Arc::new(RwLock::new(None));
}

/// Metrics collection for stake and withdrawal activity
pub struct StakingMetrics {
    /// Total amount staked across all nodes (Gauge)
    pub stake_total: Gauge,

    /// Stake amount per node (Gauge)
    pub stake_per_node: GaugeVec,

    /// Active minipools per node (Gauge)
    pub minipools_per_node: IntGaugeVec,

    /// Registered nodes (Gauge)
    pub registered_nodes: IntGauge,

    /// Accepted stake requests (Counter)
    pub stakes_total: IntCounter,

    /// Accepted withdraw requests (Counter)
    pub withdrawals_total: IntCounter,

    /// Rejected requests by operation and failure kind (Counter)
    pub rejections_total: IntCounterVec,

    /// Distribution of stake amounts (Histogram)
    pub stake_amount_histogram: Histogram,

    /// Distribution of withdrawal amounts (Histogram)
    pub withdrawal_amount_histogram: Histogram,
}

impl StakingMetrics {
    /// Create a new metrics collection with custom registry
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let stake_total = register_gauge_with_registry!(
            Opts::new("nodestake_stake_total", "Total amount staked across all nodes (tokens)"),
            registry
        )?;

        let stake_per_node = register_gauge_vec_with_registry!(
            Opts::new("nodestake_stake_per_node", "Staked amount per node (tokens)"),
            &["node"],
            registry
        )?;

        let minipools_per_node = register_int_gauge_vec_with_registry!(
            Opts::new("nodestake_minipools_per_node", "Active minipools per node"),
            &["node"],
            registry
        )?;

        let registered_nodes = register_int_gauge_with_registry!(
            Opts::new("nodestake_registered_nodes", "Number of registered nodes"),
            registry
        )?;

        let stakes_total = register_int_counter_with_registry!(
            Opts::new("nodestake_stakes_total", "Accepted stake requests"),
            registry
        )?;

        let withdrawals_total = register_int_counter_with_registry!(
            Opts::new("nodestake_withdrawals_total", "Accepted withdraw requests"),
            registry
        )?;

        let rejections_total = register_int_counter_vec_with_registry!(
            Opts::new("nodestake_rejections_total", "Rejected requests by operation and kind"),
            &["operation", "kind"],
            registry
        )?;

        let stake_amount_histogram = register_histogram_with_registry!(
            HistogramOpts::new("nodestake_stake_amount", "Distribution of stake amounts (tokens)")
                .buckets(AMOUNT_BUCKETS.to_vec()),
            registry
        )?;

        let withdrawal_amount_histogram = register_histogram_with_registry!(
            HistogramOpts::new("nodestake_withdrawal_amount", "Distribution of withdrawal amounts (tokens)")
                .buckets(AMOUNT_BUCKETS.to_vec()),
            registry
        )?;

        Ok(Self {
            stake_total,
            stake_per_node,
            minipools_per_node,
            registered_nodes,
            stakes_total,
            withdrawals_total,
            rejections_total,
            stake_amount_histogram,
            withdrawal_amount_histogram,
        })
    }
}

/// Initialize the global metrics registry
///
/// Call once at startup; a second call fails with `AlreadyReg`.
pub fn register_metrics() -> Result<Arc<StakingMetrics>, prometheus::Error> {
    let mut registry_lock = METRICS_REGISTRY.write();
    let registry = registry_lock.get_or_insert_with(Registry::new);
    let metrics = StakingMetrics::new(registry)?;
    Ok(Arc::new(metrics))
}

/// Get the global metrics registry, if initialized
pub fn get_registry() -> Option<Registry> {
    METRICS_REGISTRY.read().clone()
}

/// Record an accepted stake
pub fn record_stake(metrics: &StakingMetrics, node: &str, amount: Amount, new_balance: Amount) {
    metrics.stakes_total.inc();
    metrics.stake_amount_histogram.observe(units::to_ether_f64(amount));
    metrics
        .stake_per_node
        .with_label_values(&[node])
        .set(units::to_ether_f64(new_balance));
}

/// Record an accepted withdrawal
pub fn record_withdrawal(metrics: &StakingMetrics, node: &str, amount: Amount, new_balance: Amount) {
    metrics.withdrawals_total.inc();
    metrics.withdrawal_amount_histogram.observe(units::to_ether_f64(amount));
    metrics
        .stake_per_node
        .with_label_values(&[node])
        .set(units::to_ether_f64(new_balance));
}

/// Record a rejected request
pub fn record_rejection(metrics: &StakingMetrics, operation: Operation, kind: ErrorKind) {
    metrics
        .rejections_total
        .with_label_values(&[operation.as_str(), kind.as_str()])
        .inc();
}

/// Update aggregate stake gauges
pub fn update_stake_totals(metrics: &StakingMetrics, total_staked: Amount, registered_nodes: usize) {
    metrics.stake_total.set(units::to_ether_f64(total_staked));
    metrics.registered_nodes.set(registered_nodes as i64);
}

/// Update a node's minipool gauge
pub fn update_node_minipools(metrics: &StakingMetrics, node: &str, active_minipools: u64) {
    metrics
        .minipools_per_node
        .with_label_values(&[node])
        .set(active_minipools as i64);
}

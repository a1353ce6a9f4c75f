//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `tfc_cluster_reconciliations_total` - Total number of reconciliations
//! - `tfc_cluster_reconciliation_errors_total` - Total number of reconciliation errors
//! - `tfc_cluster_reconciliation_duration_seconds` - Duration of reconciliation passes
//! - `tfc_cluster_configuration_versions_total` - Total number of configuration versions published
//! - `tfc_cluster_runs_started_total` - Total number of Terraform Cloud runs created
//! - `tfc_cluster_destroy_runs_total` - Total number of destroy runs requested

use anyhow::Result;
use prometheus::{Histogram, IntCounter, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tfc_cluster_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tfc_cluster_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "tfc_cluster_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static CONFIGURATION_VERSIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tfc_cluster_configuration_versions_total",
        "Total number of configuration versions published to Terraform Cloud",
    )
    .expect("Failed to create CONFIGURATION_VERSIONS_TOTAL metric - this should never happen")
});

static RUNS_STARTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tfc_cluster_runs_started_total",
        "Total number of Terraform Cloud runs created",
    )
    .expect("Failed to create RUNS_STARTED_TOTAL metric - this should never happen")
});

static DESTROY_RUNS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tfc_cluster_destroy_runs_total",
        "Total number of destroy runs requested",
    )
    .expect("Failed to create DESTROY_RUNS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(CONFIGURATION_VERSIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RUNS_STARTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DESTROY_RUNS_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_configuration_versions() {
    CONFIGURATION_VERSIONS_TOTAL.inc();
}

pub fn increment_runs_started() {
    RUNS_STARTED_TOTAL.inc();
}

pub fn increment_destroy_runs() {
    DESTROY_RUNS_TOTAL.inc();
}

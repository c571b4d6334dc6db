//! Prometheus metrics for the controller
//!
//! Metrics live in their own registry owned by `ControllerMetrics`, which is
//! handed to the reconciler through its context.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

pub type SharedMetrics = Arc<ControllerMetrics>;

pub struct ControllerMetrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    errors: IntCounterVec,
    duration: Histogram,
    latest_version: IntGaugeVec,
}

impl ControllerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("versio".to_string()), None)?;

        let reconciliations = IntCounterVec::new(
            Opts::new(
                "reconciliations_total",
                "DeploymentConfig reconciliations grouped by outcome",
            ),
            &["outcome"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new(
                "reconciliation_errors_total",
                "Failed DeploymentConfig reconciliations grouped by error class",
            ),
            &["kind"],
        )?;
        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "reconciliation_duration_seconds",
                "Time spent in one reconciliation pass",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        )?;
        let latest_version = IntGaugeVec::new(
            Opts::new(
                "latest_version",
                "Latest minted version of each DeploymentConfig",
            ),
            &["namespace", "name"],
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(latest_version.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            errors,
            duration,
            latest_version,
        })
    }

    pub fn record_reconciliation(&self, outcome: &str, duration_secs: f64) {
        self.reconciliations.with_label_values(&[outcome]).inc();
        self.duration.observe(duration_secs);
    }

    pub fn record_reconciliation_error(&self, kind: &str, duration_secs: f64) {
        self.errors.with_label_values(&[kind]).inc();
        self.duration.observe(duration_secs);
    }

    pub fn set_latest_version(&self, namespace: &str, name: &str, version: i64) {
        self.latest_version
            .with_label_values(&[namespace, name])
            .set(version);
    }

    /// Render every metric in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(ControllerMetrics::new()?))
}

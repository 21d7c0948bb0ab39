//! Prometheus counters exported on `/metrics`.
//!
//! | Metric | Meaning |
//! |--------|---------|
//! | `<ns>_approvals_total` | approve transactions submitted |
//! | `<ns>_executions_total` | executeBatch transactions submitted |
//! | `<ns>_failures_total` | chain reads, sends and subscription errors |
//!
//! On Linux the process collector (`process_*` families) is registered too.

use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

pub type MetricsResult<T> = Result<T, MetricsError>;

pub struct GuardMetrics {
    registry: Registry,
    approvals_total: IntCounter,
    executions_total: IntCounter,
    failures_total: IntCounter,
}

impl GuardMetrics {
    pub fn new(namespace: &str) -> MetricsResult<Self> {
        let registry = Registry::new();

        let approvals_total = IntCounter::with_opts(
            Opts::new("approvals_total", "Approve transactions submitted").namespace(namespace),
        )?;
        registry.register(Box::new(approvals_total.clone()))?;

        let executions_total = IntCounter::with_opts(
            Opts::new("executions_total", "Execute-batch transactions submitted").namespace(namespace),
        )?;
        registry.register(Box::new(executions_total.clone()))?;

        let failures_total = IntCounter::with_opts(
            Opts::new("failures_total", "Chain read, send and subscription failures").namespace(namespace),
        )?;
        registry.register(Box::new(failures_total.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))?;

        Ok(Self { registry, approvals_total, executions_total, failures_total })
    }

    pub fn inc_approvals(&self) {
        self.approvals_total.inc();
    }

    pub fn inc_executions(&self) {
        self.executions_total.inc();
    }

    pub fn inc_failures(&self) {
        self.failures_total.inc();
    }

    pub fn encode_text(&self) -> MetricsResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }

    #[cfg(test)]
    pub fn counts(&self) -> (u64, u64, u64) {
        (self.approvals_total.get(), self.executions_total.get(), self.failures_total.get())
    }
}

//! Reconcile metrics
//!
//! Counters and latency histograms per hook, exposed in the Prometheus text
//! format on the metrics listener.

use crate::error::{Error, Result};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// How a single hook call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    NotReady,
    Skipped,
    Failed,
    Finalized,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::NotReady => "not_ready",
            Outcome::Skipped => "skipped",
            Outcome::Failed => "failed",
            Outcome::Finalized => "finalized",
        }
    }
}

/// Operator metrics registered on their own registry
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconciles: IntCounterVec,
    duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconciles = IntCounterVec::new(
            Opts::new("cstor_pool_auto_reconcile_total", "Hook calls by outcome"),
            &["hook", "outcome"],
        )
        .map_err(metrics_error)?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "cstor_pool_auto_reconcile_duration_seconds",
                "Time spent answering a hook call",
            ),
            &["hook"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(reconciles.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(duration.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            reconciles,
            duration,
        })
    }

    /// Record one hook call
    pub fn observe(&self, hook: &str, outcome: Outcome, elapsed: Duration) {
        self.reconciles
            .with_label_values(&[hook, outcome.as_str()])
            .inc();
        self.duration
            .with_label_values(&[hook])
            .observe(elapsed.as_secs_f64());
    }

    /// Count recorded for `hook` and `outcome`
    pub fn count(&self, hook: &str, outcome: Outcome) -> u64 {
        self.reconciles
            .with_label_values(&[hook, outcome.as_str()])
            .get()
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_and_encode() {
        let metrics = Metrics::new().unwrap();
        metrics.observe("clusterplan", Outcome::Applied, Duration::from_millis(4));
        metrics.observe("clusterplan", Outcome::Applied, Duration::from_millis(6));
        metrics.observe("poolcluster", Outcome::NotReady, Duration::from_millis(1));

        assert_eq!(metrics.count("clusterplan", Outcome::Applied), 2);
        assert_eq!(metrics.count("poolcluster", Outcome::Failed), 0);

        let (content_type, body) = metrics.encode().unwrap();
        assert!(content_type.starts_with("text/plain"));
        let body = String::from_utf8(body).unwrap();
        assert!(body.contains(
            r#"cstor_pool_auto_reconcile_total{hook="clusterplan",outcome="applied"} 2"#
        ));
        assert!(body.contains("cstor_pool_auto_reconcile_duration_seconds_bucket"));
    }
}

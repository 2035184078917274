//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the engine:
//!
//! - `escrow_red_packets_created_total`
//! - `escrow_claims_total`
//! - `escrow_packet_refunds_total`
//! - `escrow_collections_created_total`
//! - `escrow_payments_total`
//! - `escrow_settlements_total`
//! - `escrow_contributor_refunds_total`
//! - `escrow_mutation_duration_seconds`

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Debug, Clone)]
pub struct Metrics {
    /// Red packets created
    pub packets_created: IntCounter,

    /// Successful claims
    pub claims: IntCounter,

    /// Expired-packet refunds executed
    pub packet_refunds: IntCounter,

    /// Collections opened
    pub collections_created: IntCounter,

    /// Payments accepted
    pub payments: IntCounter,

    /// Settlements to creators (target reached or fixed-split expiry)
    pub settlements: IntCounter,

    /// Individual contributor refunds
    pub contributor_refunds: IntCounter,

    /// Mutation latency histogram
    pub mutation_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let packets_created = IntCounter::with_opts(Opts::new(
            "escrow_red_packets_created_total",
            "Red packets created",
        ))?;
        registry.register(Box::new(packets_created.clone()))?;

        let claims = IntCounter::with_opts(Opts::new("escrow_claims_total", "Successful claims"))?;
        registry.register(Box::new(claims.clone()))?;

        let packet_refunds = IntCounter::with_opts(Opts::new(
            "escrow_packet_refunds_total",
            "Expired-packet refunds executed",
        ))?;
        registry.register(Box::new(packet_refunds.clone()))?;

        let collections_created = IntCounter::with_opts(Opts::new(
            "escrow_collections_created_total",
            "Collections opened",
        ))?;
        registry.register(Box::new(collections_created.clone()))?;

        let payments =
            IntCounter::with_opts(Opts::new("escrow_payments_total", "Payments accepted"))?;
        registry.register(Box::new(payments.clone()))?;

        let settlements = IntCounter::with_opts(Opts::new(
            "escrow_settlements_total",
            "Settlements to creators",
        ))?;
        registry.register(Box::new(settlements.clone()))?;

        let contributor_refunds = IntCounter::with_opts(Opts::new(
            "escrow_contributor_refunds_total",
            "Individual contributor refunds",
        ))?;
        registry.register(Box::new(contributor_refunds.clone()))?;

        let mutation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "escrow_mutation_duration_seconds",
                "Histogram of mutation latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(mutation_duration.clone()))?;

        Ok(Self {
            packets_created,
            claims,
            packet_refunds,
            collections_created,
            payments,
            settlements,
            contributor_refunds,
            mutation_duration,
            registry,
        })
    }

    /// Record mutation latency
    pub fn record_mutation_duration(&self, duration_seconds: f64) {
        self.mutation_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.packets_created.get(), 0);
        assert_eq!(metrics.claims.get(), 0);
    }

    #[test]
    fn test_counters_increment() {
        let metrics = Metrics::new().unwrap();
        metrics.claims.inc();
        metrics.claims.inc();
        assert_eq!(metrics.claims.get(), 2);

        metrics.settlements.inc();
        assert_eq!(metrics.settlements.get(), 1);
    }

    #[test]
    fn test_independent_registries() {
        // Each engine instance carries its own registry
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.payments.inc();
        assert_eq!(a.payments.get(), 1);
        assert_eq!(b.payments.get(), 0);
    }
}

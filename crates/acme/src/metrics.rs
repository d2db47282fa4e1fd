//! Prometheus metrics for challenge coordination

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Counters for leadership checks, challenge writes and challenge lookups
///
/// Registered on a caller-supplied [`Registry`] so several coordinators
/// (one per simulated replica in tests) can coexist in one process.
#[derive(Clone)]
pub struct AcmeMetrics {
    /// Leadership checks by outcome (leader, follower, error)
    leadership_checks: IntCounterVec,
    /// Present/clean_up calls by operation and result
    challenge_operations: IntCounterVec,
    /// Challenge lookups by result (found, not_found)
    challenge_lookups: IntCounterVec,
    /// Lookup attempts that were retried
    challenge_lookup_retries: IntCounter,
}

impl AcmeMetrics {
    /// Create the counters and register them on `registry`
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let leadership_checks = IntCounterVec::new(
            Opts::new(
                "sentinel_acme_leadership_checks_total",
                "HTTP challenge leadership checks by outcome",
            ),
            &["outcome"],
        )?;
        let challenge_operations = IntCounterVec::new(
            Opts::new(
                "sentinel_acme_challenge_operations_total",
                "HTTP-01 challenge present/clean_up calls by result",
            ),
            &["operation", "result"],
        )?;
        let challenge_lookups = IntCounterVec::new(
            Opts::new(
                "sentinel_acme_challenge_lookups_total",
                "HTTP-01 challenge token lookups by result",
            ),
            &["result"],
        )?;
        let challenge_lookup_retries = IntCounter::new(
            "sentinel_acme_challenge_lookup_retries_total",
            "HTTP-01 challenge token lookup attempts that were retried",
        )?;

        registry.register(Box::new(leadership_checks.clone()))?;
        registry.register(Box::new(challenge_operations.clone()))?;
        registry.register(Box::new(challenge_lookups.clone()))?;
        registry.register(Box::new(challenge_lookup_retries.clone()))?;

        Ok(Self {
            leadership_checks,
            challenge_operations,
            challenge_lookups,
            challenge_lookup_retries,
        })
    }

    pub fn record_leadership(&self, outcome: &str) {
        self.leadership_checks.with_label_values(&[outcome]).inc();
    }

    pub fn record_operation(&self, operation: &str, result: &str) {
        self.challenge_operations
            .with_label_values(&[operation, result])
            .inc();
    }

    pub fn record_lookup(&self, found: bool) {
        let result = if found { "found" } else { "not_found" };
        self.challenge_lookups.with_label_values(&[result]).inc();
    }

    pub fn record_lookup_retry(&self) {
        self.challenge_lookup_retries.inc();
    }

    pub fn leadership_count(&self, outcome: &str) -> u64 {
        self.leadership_checks.with_label_values(&[outcome]).get()
    }

    pub fn operation_count(&self, operation: &str, result: &str) -> u64 {
        self.challenge_operations
            .with_label_values(&[operation, result])
            .get()
    }

    pub fn lookup_count(&self, found: bool) -> u64 {
        let result = if found { "found" } else { "not_found" };
        self.challenge_lookups.with_label_values(&[result]).get()
    }

    pub fn lookup_retry_count(&self) -> u64 {
        self.challenge_lookup_retries.get()
    }
}

impl std::fmt::Debug for AcmeMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeMetrics").finish_non_exhaustive()
    }
}

//! Running counters reported by `GET /nboost/status`.

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Default)]
pub struct ProxyStats {
    inner: Mutex<Counters>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    proxied: u64,
    boosted: u64,
    passed_through: u64,
    rejected: u64,
    upstream_ms: u64,
    rerank_ms: u64,
    reciprocal_ranks: f64,
    evaluated: u64,
}

/// Point-in-time view of [`ProxyStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub proxied: u64,
    pub boosted: u64,
    pub passed_through: u64,
    pub rejected: u64,
    pub avg_upstream_ms: f64,
    pub avg_rerank_ms: f64,
    /// Mean reciprocal rank over requests that carried true ids.
    pub mrr: Option<f64>,
    pub evaluated: u64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_upstream(&self, latency_ms: u64) {
        let mut c = self.inner.lock();
        c.proxied += 1;
        c.upstream_ms += latency_ms;
    }

    pub fn record_boost(&self, rerank_ms: u64) {
        let mut c = self.inner.lock();
        c.boosted += 1;
        c.rerank_ms += rerank_ms;
    }

    pub fn record_pass_through(&self) {
        self.inner.lock().passed_through += 1;
    }

    pub fn record_rejected(&self) {
        self.inner.lock().rejected += 1;
    }

    pub fn record_reciprocal_rank(&self, rr: f64) {
        let mut c = self.inner.lock();
        c.reciprocal_ranks += rr;
        c.evaluated += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = *self.inner.lock();
        StatsSnapshot {
            proxied: c.proxied,
            boosted: c.boosted,
            passed_through: c.passed_through,
            rejected: c.rejected,
            avg_upstream_ms: mean(c.upstream_ms as f64, c.proxied),
            avg_rerank_ms: mean(c.rerank_ms as f64, c.boosted),
            mrr: (c.evaluated > 0).then(|| mean(c.reciprocal_ranks, c.evaluated)),
            evaluated: c.evaluated,
        }
    }
}

fn mean(total: f64, count: u64) -> f64 {
    if count == 0 { 0.0 } else { total / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_averages() {
        let stats = ProxyStats::new();
        assert_eq!(stats.snapshot().mrr, None);

        stats.record_upstream(10);
        stats.record_upstream(30);
        stats.record_boost(4);
        stats.record_pass_through();
        stats.record_reciprocal_rank(1.0);
        stats.record_reciprocal_rank(0.5);

        let snap = stats.snapshot();
        assert_eq!(snap.proxied, 2);
        assert_eq!(snap.boosted, 1);
        assert_eq!(snap.passed_through, 1);
        assert_eq!(snap.avg_upstream_ms, 20.0);
        assert_eq!(snap.avg_rerank_ms, 4.0);
        assert_eq!(snap.mrr, Some(0.75));
    }
}

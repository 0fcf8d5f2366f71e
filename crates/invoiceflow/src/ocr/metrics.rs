use std::sync::Mutex;

use serde::Serialize;

/// Smoothing factor of the processing-time moving average.
const EMA_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OcrMetricsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    /// Exponentially weighted mean, `None` until the first success.
    pub avg_processing_time_ms: Option<f64>,
}

/// Counters owned by one `OcrClient`.
#[derive(Debug, Default)]
pub struct OcrMetrics {
    inner: Mutex<OcrMetricsSnapshot>,
}

impl OcrMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut OcrMetricsSnapshot)) {
        // A poisoned lock only means a panic mid-update of plain counters.
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard);
    }

    pub fn record_request(&self) {
        self.update(|m| m.requests += 1);
    }

    pub fn record_cache_hit(&self) {
        self.update(|m| m.cache_hits += 1);
    }

    pub fn record_failure(&self) {
        self.update(|m| m.failures += 1);
    }

    pub fn record_success(&self, elapsed_ms: f64) {
        self.update(|m| {
            m.successes += 1;
            m.avg_processing_time_ms = Some(match m.avg_processing_time_ms {
                None => elapsed_ms,
                Some(avg) => EMA_ALPHA * elapsed_ms + (1.0 - EMA_ALPHA) * avg,
            });
        });
    }

    pub fn snapshot(&self) -> OcrMetricsSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_seeds_average() {
        let metrics = OcrMetrics::new();
        assert_eq!(metrics.snapshot().avg_processing_time_ms, None);

        metrics.record_success(200.0);
        assert_eq!(metrics.snapshot().avg_processing_time_ms, Some(200.0));

        metrics.record_success(100.0);
        let avg = metrics.snapshot().avg_processing_time_ms.unwrap();
        assert!((avg - 190.0).abs() < 1e-9);
    }

    #[test]
    fn test_counters() {
        let metrics = OcrMetrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_cache_hit();
        metrics.record_failure();
        let snap = metrics.snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.failures, 1);
        assert_eq!(snap.successes, 0);
    }
}

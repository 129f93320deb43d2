use serde::Serialize;
use std::sync::Mutex;

pub struct MetricsRecorder {
    inner: Mutex<Metrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Metrics {
    pub processed: usize,
    pub dropped: usize,
    pub peak_in_flight: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Metrics::default()),
        }
    }

    pub fn record_processed(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.processed += 1;
        }
    }

    pub fn record_dropped(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.dropped += 1;
        }
    }

    pub fn record_in_flight(&self, in_flight: usize) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.peak_in_flight = metrics.peak_in_flight.max(in_flight);
        }
    }

    pub fn snapshot(&self) -> Metrics {
        if let Ok(metrics) = self.inner.lock() {
            *metrics
        } else {
            Metrics::default()
        }
    }

    /// Hands over the counters and starts again from zero.
    pub fn take(&self) -> Metrics {
        if let Ok(mut metrics) = self.inner.lock() {
            std::mem::take(&mut *metrics)
        } else {
            Metrics::default()
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_in_flight_keeps_the_maximum() {
        let metrics = MetricsRecorder::new();
        metrics.record_in_flight(2);
        metrics.record_in_flight(4);
        metrics.record_in_flight(1);
        metrics.record_processed();
        metrics.record_dropped();
        assert_eq!(
            metrics.snapshot(),
            Metrics {
                processed: 1,
                dropped: 1,
                peak_in_flight: 4
            }
        );
    }

    #[test]
    fn take_resets_the_counters() {
        let metrics = MetricsRecorder::new();
        metrics.record_processed();
        metrics.record_in_flight(3);
        assert_eq!(metrics.take().processed, 1);
        assert_eq!(metrics.snapshot(), Metrics::default());
    }
}

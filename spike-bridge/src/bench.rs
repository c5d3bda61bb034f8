//! Benchmark timings of worker iterations.

use std::fmt;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{BridgeError, Result};

/// Collects per-iteration processing time in microseconds.
pub struct TimingRecorder {
    name: String,
    histogram: Mutex<Histogram<u64>>,
    started: Mutex<Option<Instant>>,
}

impl TimingRecorder {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        // 3 significant digits, auto-resizing
        let histogram = Histogram::<u64>::new(3).map_err(BridgeError::Histogram)?;
        Ok(Self {
            name: name.into(),
            histogram: Mutex::new(histogram),
            started: Mutex::new(None),
        })
    }

    /// Mark the beginning of the measured run and drop earlier samples.
    pub fn start(&self) {
        self.histogram.lock().reset();
        *self.started.lock() = Some(Instant::now());
    }

    pub fn record(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.histogram.lock().saturating_record(micros);
    }

    pub fn report(&self) -> TimingReport {
        let hist = self.histogram.lock();
        let wall = self
            .started
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default();
        let empty = hist.is_empty();
        TimingReport {
            name: self.name.clone(),
            count: hist.len(),
            min_us: if empty { 0 } else { hist.min() },
            max_us: hist.max(),
            mean_us: if empty { 0.0 } else { hist.mean() },
            p50_us: hist.value_at_quantile(0.50),
            p99_us: hist.value_at_quantile(0.99),
            wall_time: wall,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingReport {
    pub name: String,
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p99_us: u64,
    pub wall_time: Duration,
}

impl fmt::Display for TimingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: iterations={}, min={}µs, max={}µs, mean={:.2}µs, p50={}µs, p99={}µs, wall={:.3}s",
            self.name,
            self.count,
            self.min_us,
            self.max_us,
            self.mean_us,
            self.p50_us,
            self.p99_us,
            self.wall_time.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_summarises_samples() {
        let rec = TimingRecorder::new("bus").unwrap();
        rec.start();
        for us in [100, 200, 300] {
            rec.record(Duration::from_micros(us));
        }
        let r = rec.report();
        assert_eq!(r.count, 3);
        assert!(r.min_us >= 100 && r.min_us <= 101);
        assert!(r.max_us >= 300 && r.max_us <= 301);
        assert!(r.mean_us > 150.0 && r.mean_us < 250.0);
        assert!(r.to_string().starts_with("bus: iterations=3"));
    }

    #[test]
    fn empty_report_is_zero() {
        let r = TimingRecorder::new("idle").unwrap().report();
        assert_eq!(r.count, 0);
        assert_eq!(r.min_us, 0);
        assert_eq!(r.wall_time, Duration::ZERO);
    }

    #[test]
    fn start_discards_earlier_samples() {
        let rec = TimingRecorder::new("x").unwrap();
        rec.record(Duration::from_micros(5));
        rec.start();
        assert_eq!(rec.report().count, 0);
    }
}

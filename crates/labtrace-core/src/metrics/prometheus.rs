//! Prometheus metrics export.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket boundaries in milliseconds for record hold time.
/// Converts to seconds: [0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
const HOLD_TIME_BUCKETS_MS: [u64; 8] = [10, 50, 100, 500, 1000, 5000, 10000, 30000];

/// Default metric name prefix.
pub const DEFAULT_PREFIX: &str = "labtrace";

/// Collector metrics with counters, gauges, and a hold-time histogram.
pub struct CollectorMetrics {
    // === COUNTERS ===
    /// Messages received from the transport
    messages_total: AtomicU64,

    /// Messages rejected by the extractor
    decode_failures_total: AtomicU64,

    /// Records written to the sink
    records_emitted_total: AtomicU64,

    /// Bytes written to the sink, headers included
    bytes_written_total: AtomicU64,

    /// Deadline postponements caused by late records
    postponements_total: AtomicU64,

    /// Times the emission timer was retargeted
    timer_reschedules_total: AtomicU64,

    /// Records dropped from the buffer at stop
    records_discarded_total: AtomicU64,

    // === GAUGES ===
    /// Records currently waiting in the reorder buffer
    buffered_records: AtomicU64,

    // === HISTOGRAM: hold_time_seconds ===
    hold_time_sum_ms: AtomicU64,
    hold_time_count: AtomicU64,
    /// Buckets: HOLD_TIME_BUCKETS_MS plus +Inf
    hold_time_buckets: [AtomicU64; 9],
}

impl CollectorMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self {
            messages_total: AtomicU64::new(0),
            decode_failures_total: AtomicU64::new(0),
            records_emitted_total: AtomicU64::new(0),
            bytes_written_total: AtomicU64::new(0),
            postponements_total: AtomicU64::new(0),
            timer_reschedules_total: AtomicU64::new(0),
            records_discarded_total: AtomicU64::new(0),
            buffered_records: AtomicU64::new(0),
            hold_time_sum_ms: AtomicU64::new(0),
            hold_time_count: AtomicU64::new(0),
            hold_time_buckets: Default::default(),
        }
    }

    // === COUNTER RECORDING ===

    /// Record a message received.
    pub fn record_message(&self) {
        self.messages_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message that could not be decoded.
    pub fn record_decode_failure(&self) {
        self.decode_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a record buffered and the postponements it caused.
    pub fn record_buffered(&self, postponed: usize, pending: usize) {
        self.postponements_total
            .fetch_add(postponed as u64, Ordering::Relaxed);
        self.set_buffered_records(pending as u64);
    }

    /// Record an emitted record with its size and time spent in the buffer.
    pub fn record_emission(&self, bytes: usize, held: Duration) {
        self.records_emitted_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_written_total
            .fetch_add(bytes as u64, Ordering::Relaxed);

        let held_ms = held.as_millis() as u64;
        self.hold_time_sum_ms.fetch_add(held_ms, Ordering::Relaxed);
        self.hold_time_count.fetch_add(1, Ordering::Relaxed);

        // Prometheus buckets are cumulative
        for (i, &bucket_ms) in HOLD_TIME_BUCKETS_MS.iter().enumerate() {
            if held_ms <= bucket_ms {
                self.hold_time_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.hold_time_buckets[HOLD_TIME_BUCKETS_MS.len()].fetch_add(1, Ordering::Relaxed);
    }

    /// Record bytes written outside of a record (file headers).
    pub fn record_header_bytes(&self, bytes: usize) {
        self.bytes_written_total
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record the timer reschedule count reached so far.
    pub fn set_timer_reschedules(&self, total: u64) {
        self.timer_reschedules_total.store(total, Ordering::Relaxed);
    }

    /// Record records dropped at stop.
    pub fn record_discarded(&self, count: usize) {
        self.records_discarded_total
            .fetch_add(count as u64, Ordering::Relaxed);
        self.set_buffered_records(0);
    }

    // === GAUGE UPDATES ===

    /// Update the number of buffered records.
    pub fn set_buffered_records(&self, count: u64) {
        self.buffered_records.store(count, Ordering::Relaxed);
    }

    // === GETTERS ===

    /// Get total messages received.
    pub fn messages_total(&self) -> u64 {
        self.messages_total.load(Ordering::Relaxed)
    }

    /// Get total decode failures.
    pub fn decode_failures_total(&self) -> u64 {
        self.decode_failures_total.load(Ordering::Relaxed)
    }

    /// Get total records emitted.
    pub fn records_emitted_total(&self) -> u64 {
        self.records_emitted_total.load(Ordering::Relaxed)
    }

    /// Get total bytes written.
    pub fn bytes_written_total(&self) -> u64 {
        self.bytes_written_total.load(Ordering::Relaxed)
    }

    /// Get total postponements.
    pub fn postponements_total(&self) -> u64 {
        self.postponements_total.load(Ordering::Relaxed)
    }

    /// Get total timer reschedules.
    pub fn timer_reschedules_total(&self) -> u64 {
        self.timer_reschedules_total.load(Ordering::Relaxed)
    }

    /// Get total records discarded.
    pub fn records_discarded_total(&self) -> u64 {
        self.records_discarded_total.load(Ordering::Relaxed)
    }

    /// Get current buffered record count.
    pub fn buffered_records(&self) -> u64 {
        self.buffered_records.load(Ordering::Relaxed)
    }

    /// Get hold-time histogram data for export.
    pub fn hold_time_histogram(&self) -> HoldTimeHistogram {
        let mut buckets = [(0.0, 0); 8];
        for (i, &bucket_ms) in HOLD_TIME_BUCKETS_MS.iter().enumerate() {
            buckets[i] = (
                bucket_ms as f64 / 1000.0,
                self.hold_time_buckets[i].load(Ordering::Relaxed),
            );
        }
        HoldTimeHistogram {
            sum_seconds: self.hold_time_sum_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            count: self.hold_time_count.load(Ordering::Relaxed),
            buckets,
            inf_bucket: self.hold_time_buckets[HOLD_TIME_BUCKETS_MS.len()].load(Ordering::Relaxed),
        }
    }

    /// Export all metrics in Prometheus text format.
    ///
    /// # Example
    /// ```
    /// use labtrace_core::metrics::CollectorMetrics;
    ///
    /// let metrics = CollectorMetrics::new();
    /// metrics.record_message();
    /// let text = metrics.export_prometheus_text();
    /// assert!(text.contains("labtrace_messages_total 1"));
    /// ```
    pub fn export_prometheus_text(&self) -> String {
        self.export_prometheus_text_with_prefix(DEFAULT_PREFIX)
    }

    /// Export metrics in Prometheus text format with a custom name prefix.
    pub fn export_prometheus_text_with_prefix(&self, prefix: &str) -> String {
        let mut output = String::with_capacity(2048);

        // === COUNTERS ===
        let counters = [
            (
                "messages_total",
                "Messages received from the broker",
                self.messages_total(),
            ),
            (
                "decode_failures_total",
                "Messages rejected by the record extractor",
                self.decode_failures_total(),
            ),
            (
                "records_emitted_total",
                "Records written to the output file",
                self.records_emitted_total(),
            ),
            (
                "bytes_written_total",
                "Bytes written to the output file",
                self.bytes_written_total(),
            ),
            (
                "postponements_total",
                "Deadline postponements caused by late records",
                self.postponements_total(),
            ),
            (
                "timer_reschedules_total",
                "Times the emission timer was retargeted",
                self.timer_reschedules_total(),
            ),
            (
                "records_discarded_total",
                "Buffered records dropped at stop",
                self.records_discarded_total(),
            ),
        ];
        for (name, help, value) in counters {
            push_metric(&mut output, prefix, name, help, "counter", value);
        }

        // === GAUGES ===
        push_metric(
            &mut output,
            prefix,
            "buffered_records",
            "Records waiting in the reorder buffer",
            "gauge",
            self.buffered_records(),
        );

        // === HISTOGRAM: hold_time_seconds ===
        let hist = self.hold_time_histogram();
        let _ = writeln!(
            output,
            "# HELP {}_hold_time_seconds Time records spent in the reorder buffer",
            prefix
        );
        let _ = writeln!(output, "# TYPE {}_hold_time_seconds histogram", prefix);
        for (le, count) in &hist.buckets {
            let _ = writeln!(
                output,
                "{}_hold_time_seconds_bucket{{le=\"{}\"}} {}",
                prefix, le, count
            );
        }
        let _ = writeln!(
            output,
            "{}_hold_time_seconds_bucket{{le=\"+Inf\"}} {}",
            prefix, hist.inf_bucket
        );
        let _ = writeln!(output, "{}_hold_time_seconds_sum {}", prefix, hist.sum_seconds);
        let _ = writeln!(output, "{}_hold_time_seconds_count {}", prefix, hist.count);

        output
    }
}

fn push_metric(output: &mut String, prefix: &str, name: &str, help: &str, kind: &str, value: u64) {
    let _ = writeln!(output, "# HELP {}_{} {}", prefix, name, help);
    let _ = writeln!(output, "# TYPE {}_{} {}", prefix, name, kind);
    let _ = writeln!(output, "{}_{} {}", prefix, name, value);
    output.push('\n');
}

impl Default for CollectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of the hold-time histogram.
#[derive(Debug, Clone)]
pub struct HoldTimeHistogram {
    /// Sum of all observations in seconds
    pub sum_seconds: f64,
    /// Number of observations
    pub count: u64,
    /// (upper bound in seconds, cumulative count)
    pub buckets: [(f64, u64); 8],
    /// Count in the +Inf bucket
    pub inf_bucket: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = CollectorMetrics::new();
        metrics.record_message();
        metrics.record_message();
        metrics.record_decode_failure();
        metrics.record_buffered(3, 5);
        metrics.record_discarded(4);

        assert_eq!(metrics.messages_total(), 2);
        assert_eq!(metrics.decode_failures_total(), 1);
        assert_eq!(metrics.postponements_total(), 3);
        assert_eq!(metrics.records_discarded_total(), 4);
        assert_eq!(metrics.buffered_records(), 0);
    }

    #[test]
    fn test_emission_updates_histogram() {
        let metrics = CollectorMetrics::new();
        metrics.record_header_bytes(24);
        metrics.record_emission(100, Duration::from_millis(80));
        metrics.record_emission(50, Duration::from_millis(6000));

        assert_eq!(metrics.records_emitted_total(), 2);
        assert_eq!(metrics.bytes_written_total(), 174);

        let hist = metrics.hold_time_histogram();
        assert_eq!(hist.count, 2);
        assert!((hist.sum_seconds - 6.08).abs() < 1e-9);
        // 80ms lands in le=0.1 and above
        assert_eq!(hist.buckets[1], (0.05, 0));
        assert_eq!(hist.buckets[2], (0.1, 1));
        assert_eq!(hist.buckets[5], (5.0, 1));
        assert_eq!(hist.buckets[6], (10.0, 2));
        assert_eq!(hist.inf_bucket, 2);
    }

    #[test]
    fn test_prometheus_text_export() {
        let metrics = CollectorMetrics::new();
        metrics.record_message();
        metrics.set_timer_reschedules(7);
        metrics.set_buffered_records(2);

        let text = metrics.export_prometheus_text();
        assert!(text.contains("# TYPE labtrace_messages_total counter"));
        assert!(text.contains("labtrace_messages_total 1"));
        assert!(text.contains("labtrace_timer_reschedules_total 7"));
        assert!(text.contains("# TYPE labtrace_buffered_records gauge"));
        assert!(text.contains("labtrace_buffered_records 2"));
        assert!(text.contains("labtrace_hold_time_seconds_bucket{le=\"+Inf\"} 0"));
        assert!(text.contains("labtrace_hold_time_seconds_count 0"));
    }

    #[test]
    fn test_prometheus_text_export_with_prefix() {
        let metrics = CollectorMetrics::new();
        let text = metrics.export_prometheus_text_with_prefix("lab");
        assert!(text.contains("lab_records_emitted_total 0"));
        assert!(!text.contains("labtrace_"));
    }

    #[test]
    fn test_prometheus_text_format_validity() {
        let metrics = CollectorMetrics::default();
        let text = metrics.export_prometheus_text();
        for line in text.lines().filter(|l| !l.is_empty() && !l.starts_with('#')) {
            let parts: Vec<&str> = line.rsplitn(2, ' ').collect();
            assert_eq!(parts.len(), 2, "bad line {}", line);
            assert!(parts[0].parse::<f64>().is_ok(), "bad value in {}", line);
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use serde::Serialize;
use std::time::{Duration, Instant};
use vincap::{
    pipeline::Processed,
    session::{FrameInfo, FrameObserver},
};

/// Summary of one capture run
#[derive(Debug, Clone, Serialize)]
pub struct CaptureMetrics {
    /// Total number of frames dequeued
    pub frames_captured: u64,
    /// Frames shown on a display
    pub frames_displayed: u64,
    /// Frames the pipeline could not handle
    pub frames_rejected: u64,
    /// Total payload bytes dequeued
    pub bytes_captured: u64,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Average throughput in frames per second
    pub throughput_fps: f64,
    /// Average bandwidth in megabits per second
    pub bandwidth_mbps: f64,
    /// Minimum interval between driver timestamps in microseconds
    pub interval_min_us: u64,
    /// Maximum interval in microseconds
    pub interval_max_us: u64,
    /// Average interval in microseconds
    pub interval_avg_us: u64,
    /// 50th percentile (median) interval in microseconds
    pub interval_p50_us: u64,
    /// 95th percentile interval in microseconds
    pub interval_p95_us: u64,
    /// 99th percentile interval in microseconds
    pub interval_p99_us: u64,
    /// Frames the driver skipped, from gaps in the sequence counter
    pub dropped_frames: u64,
    /// Page flips completed by the display
    pub flips_completed: u64,
}

/// Collects per-frame statistics while a session runs
pub struct MetricsCollector {
    start_time: Instant,
    intervals_us: Vec<u64>,
    prev_timestamp: Option<Duration>,
    prev_sequence: Option<u32>,
    frames: u64,
    displayed: u64,
    rejected: u64,
    bytes: u64,
    dropped_frames: u64,
    flips: u64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            intervals_us: Vec::new(),
            prev_timestamp: None,
            prev_sequence: None,
            frames: 0,
            displayed: 0,
            rejected: 0,
            bytes: 0,
            dropped_frames: 0,
            flips: 0,
        }
    }

    /// Record the driver timestamp of a frame
    fn record_timestamp(&mut self, timestamp: Duration) {
        if let Some(prev) = self.prev_timestamp {
            match timestamp.checked_sub(prev) {
                Some(delta) => self.intervals_us.push(delta.as_micros() as u64),
                None => log::debug!("timestamp went backwards, interval skipped"),
            }
        }
        self.prev_timestamp = Some(timestamp);
    }

    /// Track the V4L2 sequence counter to detect drops
    /// Returns the number of dropped frames detected (0 or N)
    fn track_sequence(&mut self, sequence: u32) -> u64 {
        let drops = match self.prev_sequence {
            Some(prev) => {
                let expected = prev.wrapping_add(1);
                if sequence > expected {
                    u64::from(sequence - expected)
                } else {
                    if sequence < expected {
                        log::warn!("Frame sequence number decreased: {} -> {}", prev, sequence);
                    }
                    0
                }
            }
            None => 0,
        };

        self.dropped_frames += drops;
        self.prev_sequence = Some(sequence);
        drops
    }

    /// Finalize and calculate all metrics
    pub fn finalize(&mut self) -> CaptureMetrics {
        let duration = self.start_time.elapsed();
        let duration_ms = duration.as_millis() as u64;
        let duration_secs = duration.as_secs_f64();

        let throughput_fps = if duration_secs > 0.0 {
            self.frames as f64 / duration_secs
        } else {
            0.0
        };

        let bandwidth_mbps = if duration_secs > 0.0 {
            (self.bytes as f64 * 8.0) / (duration_secs * 1_000_000.0)
        } else {
            0.0
        };

        self.intervals_us.sort_unstable();
        let (min_us, max_us, avg_us) = match (self.intervals_us.first(), self.intervals_us.last())
        {
            (Some(&min), Some(&max)) => {
                let sum: u64 = self.intervals_us.iter().sum();
                (min, max, sum / self.intervals_us.len() as u64)
            }
            _ => (0, 0, 0),
        };

        CaptureMetrics {
            frames_captured: self.frames,
            frames_displayed: self.displayed,
            frames_rejected: self.rejected,
            bytes_captured: self.bytes,
            duration_ms,
            throughput_fps,
            bandwidth_mbps,
            interval_min_us: min_us,
            interval_max_us: max_us,
            interval_avg_us: avg_us,
            interval_p50_us: self.percentile(50.0),
            interval_p95_us: self.percentile(95.0),
            interval_p99_us: self.percentile(99.0),
            dropped_frames: self.dropped_frames,
            flips_completed: self.flips,
        }
    }

    /// Calculate percentile from sorted interval data
    /// Assumes self.intervals_us is already sorted
    fn percentile(&self, p: f64) -> u64 {
        if self.intervals_us.is_empty() {
            return 0;
        }

        let len = self.intervals_us.len();
        let idx = ((p / 100.0) * (len - 1) as f64).round() as usize;
        self.intervals_us[idx.min(len - 1)]
    }

    /// Print metrics in human-readable format
    pub fn print_text(&mut self) {
        let metrics = self.finalize();
        println!("\n=== Capture Metrics ===");
        println!("Frames captured:   {}", metrics.frames_captured);
        println!("Frames displayed:  {}", metrics.frames_displayed);
        println!(
            "Bytes captured:    {} ({:.2} MB)",
            metrics.bytes_captured,
            metrics.bytes_captured as f64 / 1_048_576.0
        );
        println!(
            "Duration:          {:.2} s",
            metrics.duration_ms as f64 / 1000.0
        );
        println!("Throughput:        {:.2} fps", metrics.throughput_fps);
        println!("Bandwidth:         {:.2} Mbps", metrics.bandwidth_mbps);
        println!("Flips completed:   {}", metrics.flips_completed);

        if metrics.frames_captured > 1 {
            println!("\nFrame Interval (µs):");
            println!("  Min:    {}", metrics.interval_min_us);
            println!("  Max:    {}", metrics.interval_max_us);
            println!("  Avg:    {}", metrics.interval_avg_us);
            println!("  P50:    {}", metrics.interval_p50_us);
            println!("  P95:    {}", metrics.interval_p95_us);
            println!("  P99:    {}", metrics.interval_p99_us);
        }

        if metrics.frames_rejected > 0 {
            println!("\nRejected frames:   {}", metrics.frames_rejected);
        }

        if metrics.dropped_frames > 0 {
            println!(
                "\nDropped frames:    {} ({:.2}%)",
                metrics.dropped_frames,
                (metrics.dropped_frames as f64
                    / (metrics.frames_captured + metrics.dropped_frames) as f64)
                    * 100.0
            );
        }
    }

    /// Print metrics in JSON format
    pub fn print_json(&mut self) -> Result<(), serde_json::Error> {
        let metrics = self.finalize();
        let json = serde_json::to_string_pretty(&metrics)?;
        println!("{}", json);
        Ok(())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameObserver for MetricsCollector {
    fn on_frame(&mut self, frame: &FrameInfo) {
        self.frames += 1;
        self.bytes += u64::from(frame.bytes_used);
        self.record_timestamp(frame.timestamp);
        self.track_sequence(frame.sequence);
        match frame.outcome {
            Processed::Displayed => self.displayed += 1,
            Processed::Dropped => self.rejected += 1,
            Processed::Captured => {}
        }
    }

    fn on_flip(&mut self) {
        self.flips += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u32, timestamp_us: u64, outcome: Processed) -> FrameInfo {
        FrameInfo {
            index: sequence % 4,
            sequence,
            bytes_used: 1000,
            timestamp: Duration::from_micros(timestamp_us),
            outcome,
        }
    }

    #[test]
    fn test_percentile_calculation() {
        let mut collector = MetricsCollector::new();

        // Intervals 0, 10, 20, ..., 100 (11 values)
        let mut ts = 1_000;
        collector.on_frame(&frame(0, ts, Processed::Captured));
        for i in 0..=10 {
            ts += i * 10;
            collector.on_frame(&frame(i as u32 + 1, ts, Processed::Captured));
        }

        let metrics = collector.finalize();

        assert_eq!(metrics.interval_p50_us, 50);
        assert_eq!(metrics.interval_p95_us, 100);
        assert_eq!(metrics.interval_min_us, 0);
        assert_eq!(metrics.interval_max_us, 100);
        assert_eq!(metrics.interval_avg_us, 50);
        assert_eq!(metrics.frames_captured, 12);
    }

    #[test]
    fn test_dropped_frames_detection() {
        let mut collector = MetricsCollector::new();

        assert_eq!(collector.track_sequence(100), 0);
        assert_eq!(collector.track_sequence(101), 0);
        assert_eq!(collector.track_sequence(102), 0);

        assert_eq!(collector.track_sequence(106), 3);
        assert_eq!(collector.dropped_frames, 3);

        collector.track_sequence(107);
        assert_eq!(collector.dropped_frames, 3);

        // Restarted counter is not a drop
        collector.track_sequence(0);
        assert_eq!(collector.dropped_frames, 3);
    }

    #[test]
    fn test_outcomes_and_flips() {
        let mut collector = MetricsCollector::new();
        collector.on_frame(&frame(0, 0, Processed::Displayed));
        collector.on_frame(&frame(1, 33_000, Processed::Displayed));
        collector.on_frame(&frame(2, 66_000, Processed::Dropped));
        collector.on_flip();
        collector.on_flip();

        let metrics = collector.finalize();
        assert_eq!(metrics.frames_displayed, 2);
        assert_eq!(metrics.frames_rejected, 1);
        assert_eq!(metrics.flips_completed, 2);
        assert_eq!(metrics.bytes_captured, 3000);
        assert_eq!(metrics.interval_avg_us, 33_000);
    }

    #[test]
    fn test_backwards_timestamp_skipped() {
        let mut collector = MetricsCollector::new();
        collector.on_frame(&frame(0, 50_000, Processed::Captured));
        collector.on_frame(&frame(1, 10_000, Processed::Captured));
        collector.on_frame(&frame(2, 20_000, Processed::Captured));
        let metrics = collector.finalize();
        assert_eq!(metrics.interval_min_us, 10_000);
        assert_eq!(metrics.interval_max_us, 10_000);
    }

    #[test]
    fn test_empty_metrics() {
        let mut collector = MetricsCollector::new();
        let metrics = collector.finalize();

        assert_eq!(metrics.frames_captured, 0);
        assert_eq!(metrics.bytes_captured, 0);
        assert_eq!(metrics.interval_min_us, 0);
        assert_eq!(metrics.interval_p99_us, 0);
        assert_eq!(metrics.flips_completed, 0);
    }
}

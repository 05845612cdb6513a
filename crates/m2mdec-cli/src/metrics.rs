// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use m2mdec::session::{DrainEnd, SessionSummary};
use serde::Serialize;
use std::time::Instant;

/// Decode metrics collected during a run
#[derive(Debug, Clone, Serialize)]
pub struct DecodeMetrics {
    /// Input file
    pub input: String,
    /// Compressed codec of the input
    pub codec: String,
    /// Decoded frame geometry and pixel format
    pub width: u32,
    pub height: u32,
    pub pixel_format: String,
    pub planes: usize,
    /// Compressed frames queued to the decoder
    pub frames_fed: u64,
    /// Compressed bytes queued to the decoder
    pub bytes_fed: u64,
    /// Frames larger than the OUTPUT buffer
    pub truncated_frames: u64,
    /// Frames returned by the decoder
    pub frames_decoded: u64,
    /// Decoded bytes handed to the sink
    pub bytes_decoded: u64,
    /// Total duration in milliseconds
    pub duration_ms: u64,
    /// Average throughput in frames per second
    pub throughput_fps: f64,
    /// Minimum interval between decoded frames in microseconds
    pub interval_min_us: u64,
    /// Maximum interval between decoded frames in microseconds
    pub interval_max_us: u64,
    /// Average interval between decoded frames in microseconds
    pub interval_avg_us: u64,
    /// 50th percentile (median) interval in microseconds
    pub interval_p50_us: u64,
    /// 95th percentile interval in microseconds
    pub interval_p95_us: u64,
    /// 99th percentile interval in microseconds
    pub interval_p99_us: u64,
    /// Gaps in the driver's CAPTURE sequence numbers
    pub skipped_frames: u64,
    /// How the drain ended: last-buffer, epipe, timeout or none
    pub drain: String,
    /// The run was interrupted
    pub stopped: bool,
}

/// Collects per-frame timing while the decode loop runs
pub struct MetricsCollector {
    start_time: Instant,
    last_frame: Option<Instant>,
    intervals_us: Vec<u64>,
    bytes: u64,
    prev_sequence: Option<u32>,
    skipped_frames: u64,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            last_frame: None,
            intervals_us: Vec::new(),
            bytes: 0,
            prev_sequence: None,
            skipped_frames: 0,
        }
    }

    /// Record a decoded frame of `bytes` bytes arriving now
    pub fn record_frame(&mut self, bytes: u64) {
        let now = Instant::now();
        if let Some(last) = self.last_frame {
            self.record_interval_us(now.duration_since(last).as_micros() as u64);
        }
        self.last_frame = Some(now);
        self.bytes += bytes;
    }

    /// Record a frame interval in microseconds
    pub fn record_interval_us(&mut self, interval_us: u64) {
        self.intervals_us.push(interval_us);
    }

    /// Track the driver sequence number to detect skipped frames
    /// Returns the number of skipped frames detected (0 or N)
    pub fn track_sequence(&mut self, sequence: u32) -> u64 {
        let skipped = match self.prev_sequence {
            Some(prev) => {
                let expected = prev.wrapping_add(1);
                if sequence > expected {
                    (sequence - expected) as u64
                } else {
                    if sequence < expected {
                        log::warn!("Frame sequence number decreased: {} -> {}", prev, sequence);
                    }
                    0
                }
            }
            // First frame
            None => 0,
        };

        self.skipped_frames += skipped;
        self.prev_sequence = Some(sequence);
        skipped
    }

    /// Combine the collected timing with the session summary
    pub fn finalize(&mut self, input: &str, codec: &str, summary: &SessionSummary) -> DecodeMetrics {
        let duration = self.start_time.elapsed();
        let duration_secs = duration.as_secs_f64();

        let throughput_fps = if duration_secs > 0.0 {
            summary.frames_decoded as f64 / duration_secs
        } else {
            0.0
        };

        self.intervals_us.sort_unstable();
        let (min_us, max_us, avg_us) = match (self.intervals_us.first(), self.intervals_us.last()) {
            (Some(&min), Some(&max)) => {
                let sum: u64 = self.intervals_us.iter().sum();
                (min, max, sum / self.intervals_us.len() as u64)
            }
            _ => (0, 0, 0),
        };

        let (width, height, pixel_format, planes) = match &summary.capture_format {
            Some(format) => (
                format.width(),
                format.height(),
                format.fourcc().to_string(),
                format.num_planes(),
            ),
            None => (0, 0, String::new(), 0),
        };

        DecodeMetrics {
            input: input.to_string(),
            codec: codec.to_string(),
            width,
            height,
            pixel_format,
            planes,
            frames_fed: summary.frames_fed,
            bytes_fed: summary.bytes_fed,
            truncated_frames: summary.truncated_frames,
            frames_decoded: summary.frames_decoded,
            bytes_decoded: self.bytes,
            duration_ms: duration.as_millis() as u64,
            throughput_fps,
            interval_min_us: min_us,
            interval_max_us: max_us,
            interval_avg_us: avg_us,
            interval_p50_us: self.percentile(50.0),
            interval_p95_us: self.percentile(95.0),
            interval_p99_us: self.percentile(99.0),
            skipped_frames: self.skipped_frames,
            drain: drain_name(summary.drain).to_string(),
            stopped: summary.stopped,
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
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn drain_name(drain: Option<DrainEnd>) -> &'static str {
    match drain {
        Some(DrainEnd::LastBuffer) => "last-buffer",
        Some(DrainEnd::Epipe) => "epipe",
        Some(DrainEnd::Timeout) => "timeout",
        None => "none",
    }
}

/// Print metrics in human-readable format
pub fn print_text(metrics: &DecodeMetrics) {
    println!("\n=== Decode Metrics ===");
    println!("Input:             {} ({})", metrics.input, metrics.codec);
    if metrics.planes > 0 {
        println!(
            "Output:            {}x{} {} ({} planes)",
            metrics.width, metrics.height, metrics.pixel_format, metrics.planes
        );
    }
    println!(
        "Frames fed:        {} ({:.2} MB)",
        metrics.frames_fed,
        metrics.bytes_fed as f64 / 1_048_576.0
    );
    println!("Frames decoded:    {}", metrics.frames_decoded);
    println!(
        "Duration:          {:.2} s",
        metrics.duration_ms as f64 / 1000.0
    );
    println!("Throughput:        {:.2} fps", metrics.throughput_fps);
    println!("Drain:             {}", metrics.drain);

    if metrics.frames_decoded > 1 {
        println!("\nFrame Interval Statistics (µs):");
        println!("  Min:    {}", metrics.interval_min_us);
        println!("  Max:    {}", metrics.interval_max_us);
        println!("  Avg:    {}", metrics.interval_avg_us);
        println!("  P50:    {}", metrics.interval_p50_us);
        println!("  P95:    {}", metrics.interval_p95_us);
        println!("  P99:    {}", metrics.interval_p99_us);
    }

    if metrics.truncated_frames > 0 {
        println!(
            "\nTruncated frames:  {} (increase --frame-size)",
            metrics.truncated_frames
        );
    }
    if metrics.skipped_frames > 0 {
        println!("Skipped frames:    {}", metrics.skipped_frames);
    }
    if metrics.stopped {
        println!("Interrupted before the end of the stream");
    }
}

/// Print metrics in JSON format
pub fn print_json(metrics: &DecodeMetrics) -> Result<(), serde_json::Error> {
    let json = serde_json::to_string_pretty(metrics)?;
    println!("{}", json);
    Ok(())
}

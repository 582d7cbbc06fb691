//! Pipeline counters and tick timing
//!
//! [`PipelineStats`] counts what happened to decoded frames and buffers;
//! [`FrameProfiler`] measures the interval between presented frames.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// What happened to frames and buffers over the life of a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames obtained from the decode pump
    pub decoded: u64,
    /// Frames submitted to the display
    pub presented: u64,
    /// Frames discarded (conversion or map failure, backpressure)
    pub dropped: u64,
    /// Ticks that found every buffer busy
    pub deferred_ticks: u64,
    /// Release events that freed a buffer
    pub releases: u64,
    /// Release events for buffers of an older pool generation
    pub stale_releases: u64,
    /// Times the buffers were recreated for a new frame geometry
    pub reconfigurations: u64,
}

impl PipelineStats {
    /// Share of decoded frames that reached the display
    pub fn presented_ratio(&self) -> f64 {
        if self.decoded == 0 {
            return 0.0;
        }
        self.presented as f64 / self.decoded as f64
    }

    pub fn log_summary(&self) {
        tracing::info!(
            decoded = self.decoded,
            presented = self.presented,
            dropped = self.dropped,
            deferred_ticks = self.deferred_ticks,
            releases = self.releases,
            stale_releases = self.stale_releases,
            reconfigurations = self.reconfigurations,
            "Pipeline statistics"
        );
    }
}

/// Frame timing statistics
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    /// Average frame time in milliseconds
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// 50th percentile (median) frame time
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    /// Number of samples in the statistics
    pub sample_count: usize,
}

/// Interval profiler for presented frames
pub struct FrameProfiler {
    frame_times: VecDeque<Duration>,
    /// Maximum samples to keep
    max_samples: usize,
    last_frame_start: Option<Instant>,
    /// Frame start times for FPS calculation
    frame_starts: VecDeque<Instant>,
}

impl Default for FrameProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameProfiler {
    pub fn new() -> Self {
        Self::with_capacity(300)
    }

    pub fn with_capacity(max_samples: usize) -> Self {
        let max_samples = max_samples.max(2);
        Self {
            frame_times: VecDeque::with_capacity(max_samples),
            max_samples,
            last_frame_start: None,
            frame_starts: VecDeque::with_capacity(max_samples),
        }
    }

    /// Mark a presented frame
    pub fn begin_frame(&mut self) {
        self.record(Instant::now());
    }

    fn record(&mut self, now: Instant) {
        if let Some(start) = self.last_frame_start {
            self.frame_times.push_back(now.duration_since(start));
            if self.frame_times.len() > self.max_samples {
                self.frame_times.pop_front();
            }
        }
        self.last_frame_start = Some(now);

        self.frame_starts.push_back(now);
        if self.frame_starts.len() > self.max_samples {
            self.frame_starts.pop_front();
        }
    }

    /// Get frame timing statistics
    pub fn stats(&self) -> FrameStats {
        if self.frame_times.is_empty() {
            return FrameStats::default();
        }

        let mut times: Vec<f64> = self.frame_times.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        times.sort_by(|a, b| a.total_cmp(b));

        let sum: f64 = times.iter().sum();
        let count = times.len() as f64;

        FrameStats {
            avg_ms: sum / count,
            min_ms: times.first().copied().unwrap_or(0.0),
            max_ms: times.last().copied().unwrap_or(0.0),
            p50_ms: percentile(&times, 0.50),
            p95_ms: percentile(&times, 0.95),
            p99_ms: percentile(&times, 0.99),
            sample_count: times.len(),
        }
    }

    /// Frames per second over the sample window
    pub fn fps(&self) -> f64 {
        let (Some(first), Some(last)) = (self.frame_starts.front(), self.frame_starts.back()) else {
            return 0.0;
        };
        let duration = last.duration_since(*first).as_secs_f64();

        if duration > 0.0 {
            (self.frame_starts.len() - 1) as f64 / duration
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        let stats = self.stats();
        if stats.sample_count == 0 {
            return;
        }
        tracing::info!(
            fps = format_args!("{:.2}", self.fps()),
            avg_ms = format_args!("{:.2}", stats.avg_ms),
            p95_ms = format_args!("{:.2}", stats.p95_ms),
            max_ms = format_args!("{:.2}", stats.max_ms),
            samples = stats.sample_count,
            "Frame timing"
        );
    }
}

/// Calculate percentile from sorted array
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() - 1) as f64 * p) as usize;
    sorted[idx]
}

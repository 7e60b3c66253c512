//! Bounded per-device metric history for sparkline-style extraction.
//!
//! One `MetricHistory` per device holds a fixed-capacity ring per
//! tracked metric, all sharing a single write cursor. Extraction is
//! scaled by the measured sample rate so a caller-chosen display window
//! in seconds maps to the right number of recent samples.

use std::collections::HashMap;

use crate::data::GpuSnapshot;

/// Ten minutes of history at the assumed 60 samples/s.
pub const HISTORY_CAPACITY: usize = 36_000;
pub const DEFAULT_DISPLAY_SECONDS: u32 = 60;
pub const MIN_DISPLAY_SECONDS: u32 = 5;
pub const MAX_DISPLAY_SECONDS: u32 = 600;
/// Assumed rate until enough samples exist to measure the real one.
const DEFAULT_SAMPLE_RATE: f32 = 60.0;

/// Fixed-capacity circular buffer with a saturating length.
///
/// Once full, writes overwrite the oldest slot; there is no separate
/// "full" state.
pub struct RingBuffer<T> {
    buf: Box<[T]>,
    write: usize,
    len: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            buf: vec![T::default(); capacity].into_boxed_slice(),
            write: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, value: T) {
        self.buf[self.write] = value;
        self.write = (self.write + 1) % self.buf.len();
        self.len = (self.len + 1).min(self.buf.len());
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Copies the `count` most recent samples into `out`, oldest first.
    /// `count` is capped to what the buffer holds; returns the number
    /// actually written.
    pub fn copy_latest(&self, count: usize, out: &mut Vec<T>) -> usize {
        let count = count.min(self.len);
        out.clear();
        if count == 0 {
            return 0;
        }
        let cap = self.buf.len();
        // Walk backward `count` slots from the cursor, emit forward.
        let start = (self.write + cap - count) % cap;
        for i in 0..count {
            out.push(self.buf[(start + i) % cap]);
        }
        count
    }
}

/// The metrics tracked per device, each normalized to [0,1].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metric {
    MemoryUsed,
    GpuUtilization,
    Power,
    CoreClock,
    MemoryClock,
    Temperature,
    FanSpeed,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::MemoryUsed,
        Metric::GpuUtilization,
        Metric::Power,
        Metric::CoreClock,
        Metric::MemoryClock,
        Metric::Temperature,
        Metric::FanSpeed,
    ];

    fn index(self) -> usize {
        match self {
            Metric::MemoryUsed => 0,
            Metric::GpuUtilization => 1,
            Metric::Power => 2,
            Metric::CoreClock => 3,
            Metric::MemoryClock => 4,
            Metric::Temperature => 5,
            Metric::FanSpeed => 6,
        }
    }
}

/// One observation tick's normalized values, one per tracked metric.
#[derive(Clone, Copy, Debug, Default)]
pub struct MetricSample {
    pub memory_used: f32,
    pub gpu_utilization: f32,
    pub power: f32,
    pub core_clock: f32,
    pub memory_clock: f32,
    pub temperature: f32,
    pub fan_speed: f32,
}

impl MetricSample {
    /// Normalizes a snapshot: memory as a fraction of total, power as a
    /// fraction of the limit, clocks as fractions of their maxima,
    /// temperature mapped 0-100 C, percentages divided by 100.
    pub fn from_snapshot(snap: &GpuSnapshot) -> Self {
        Self {
            memory_used: fraction(snap.memory_used as f32, snap.memory_total as f32),
            gpu_utilization: snap.gpu_utilization as f32 / 100.0,
            power: fraction(snap.power_draw as f32, snap.power_limit as f32),
            core_clock: fraction(snap.core_clock as f32, snap.core_clock_max as f32),
            memory_clock: fraction(snap.memory_clock as f32, snap.memory_clock_max as f32),
            temperature: snap.temperature as f32 / 100.0,
            fan_speed: snap.fan_speed as f32 / 100.0,
        }
    }

    fn value(&self, metric: Metric) -> f32 {
        match metric {
            Metric::MemoryUsed => self.memory_used,
            Metric::GpuUtilization => self.gpu_utilization,
            Metric::Power => self.power,
            Metric::CoreClock => self.core_clock,
            Metric::MemoryClock => self.memory_clock,
            Metric::Temperature => self.temperature,
            Metric::FanSpeed => self.fan_speed,
        }
    }
}

fn fraction(value: f32, denominator: f32) -> f32 {
    if denominator > 0.0 {
        (value / denominator).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// History for all tracked metrics of one device.
pub struct MetricHistory {
    rings: Vec<RingBuffer<f32>>,
    /// Wall-clock seconds since the first sample; drives the measured
    /// sample-rate estimate.
    elapsed: f32,
    display_seconds: u32,
}

impl Default for MetricHistory {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl MetricHistory {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            rings: Metric::ALL
                .iter()
                .map(|_| RingBuffer::with_capacity(capacity))
                .collect(),
            elapsed: 0.0,
            display_seconds: DEFAULT_DISPLAY_SECONDS,
        }
    }

    /// Appends one sample per metric and accounts `delta_seconds` of
    /// elapsed wall-clock time.
    pub fn record(&mut self, delta_seconds: f32, sample: &MetricSample) {
        self.elapsed += delta_seconds;
        for metric in Metric::ALL {
            self.rings[metric.index()].push(sample.value(metric));
        }
    }

    pub fn len(&self) -> usize {
        self.rings[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.rings[0].is_empty()
    }

    /// Measured samples per second, or the default assumption until at
    /// least two samples and 0.1s of elapsed time exist.
    pub fn samples_per_second(&self) -> f32 {
        if self.elapsed < 0.1 || self.len() < 2 {
            return DEFAULT_SAMPLE_RATE;
        }
        self.len() as f32 / self.elapsed
    }

    /// Copies the most recent samples covering the display window into
    /// `out`, oldest first, and returns how many were written.
    ///
    /// The count is min(round(display_seconds * rate), samples
    /// collected, capacity); with less history than the window asks for,
    /// everything available is returned — truncated, never padded. The
    /// rate estimate assumes a roughly steady consumer tick; after a
    /// stall the window over- or under-covers accordingly.
    pub fn window(&self, metric: Metric, out: &mut Vec<f32>) -> usize {
        let wanted = (self.display_seconds as f32 * self.samples_per_second()).round() as usize;
        self.rings[metric.index()].copy_latest(wanted, out)
    }

    pub fn display_seconds(&self) -> u32 {
        self.display_seconds
    }

    pub fn set_display_seconds(&mut self, seconds: u32) {
        self.display_seconds = seconds.clamp(MIN_DISPLAY_SECONDS, MAX_DISPLAY_SECONDS);
    }

    pub fn reset_display_seconds(&mut self) {
        self.display_seconds = DEFAULT_DISPLAY_SECONDS;
    }
}

/// Owning map of per-device histories, keyed by device UUID.
///
/// Histories are created lazily on first sight of a UUID and kept until
/// the consumer decides to prune.
#[derive(Default)]
pub struct HistoryMap {
    inner: HashMap<String, MetricHistory>,
}

impl HistoryMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&mut self, uuid: &str) -> &mut MetricHistory {
        self.inner
            .entry(uuid.to_string())
            .or_insert_with(MetricHistory::new)
    }

    pub fn get(&self, uuid: &str) -> Option<&MetricHistory> {
        self.inner.get(uuid)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drops histories for devices absent from `snapshots` (e.g. after
    /// hot-unplug). Optional; never called by the core itself.
    pub fn retain_devices(&mut self, snapshots: &[GpuSnapshot]) {
        self.inner
            .retain(|uuid, _| snapshots.iter().any(|s| s.uuid == *uuid));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_sample(v: f32) -> MetricSample {
        MetricSample {
            memory_used: v,
            gpu_utilization: v,
            power: v,
            core_clock: v,
            memory_clock: v,
            temperature: v,
            fan_speed: v,
        }
    }

    #[test]
    fn ring_overwrites_oldest_once_full() {
        let mut ring = RingBuffer::with_capacity(4);
        for v in 0..6 {
            ring.push(v as f32);
        }
        assert_eq!(ring.len(), 4);
        let mut out = Vec::new();
        assert_eq!(ring.copy_latest(10, &mut out), 4);
        assert_eq!(out, vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn ring_extraction_before_wrap_is_in_order() {
        let mut ring = RingBuffer::with_capacity(8);
        for v in 0..3 {
            ring.push(v as f32);
        }
        let mut out = Vec::new();
        assert_eq!(ring.copy_latest(2, &mut out), 2);
        assert_eq!(out, vec![1.0, 2.0]);
    }

    #[test]
    fn empty_history_returns_empty_window() {
        let history = MetricHistory::new();
        let mut out = vec![1.0; 3];
        assert_eq!(history.window(Metric::GpuUtilization, &mut out), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn window_scales_with_measured_rate() {
        // 120 samples at 2 samples/s with a 30s window -> 60 samples,
        // drawn from the most recent 60 writes.
        let mut history = MetricHistory::new();
        history.set_display_seconds(30);
        for i in 0..120 {
            history.record(0.5, &flat_sample(i as f32));
        }
        assert!((history.samples_per_second() - 2.0).abs() < 1e-3);
        let mut out = Vec::new();
        assert_eq!(history.window(Metric::Power, &mut out), 60);
        assert_eq!(out.first().copied(), Some(60.0));
        assert_eq!(out.last().copied(), Some(119.0));
    }

    #[test]
    fn short_history_is_truncated_not_padded() {
        // 10 samples at 1/s, 60s window -> exactly 10 samples.
        let mut history = MetricHistory::new();
        history.set_display_seconds(60);
        for i in 0..10 {
            history.record(1.0, &flat_sample(i as f32));
        }
        let mut out = Vec::new();
        assert_eq!(history.window(Metric::Temperature, &mut out), 10);
        assert_eq!(out.len(), 10);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[9], 9.0);
    }

    #[test]
    fn window_is_chronological_across_the_wrap_point() {
        let mut history = MetricHistory::with_capacity(16);
        history.set_display_seconds(MAX_DISPLAY_SECONDS);
        for i in 0..40 {
            history.record(1.0, &flat_sample(i as f32));
        }
        let mut out = Vec::new();
        let n = history.window(Metric::FanSpeed, &mut out);
        assert_eq!(n, 16);
        for pair in out.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(out.last().copied(), Some(39.0));
    }

    #[test]
    fn default_rate_applies_until_enough_history() {
        let mut history = MetricHistory::new();
        assert_eq!(history.samples_per_second(), 60.0);
        history.record(0.01, &flat_sample(0.5));
        assert_eq!(history.samples_per_second(), 60.0);
    }

    #[test]
    fn display_seconds_are_clamped() {
        let mut history = MetricHistory::new();
        history.set_display_seconds(1);
        assert_eq!(history.display_seconds(), MIN_DISPLAY_SECONDS);
        history.set_display_seconds(10_000);
        assert_eq!(history.display_seconds(), MAX_DISPLAY_SECONDS);
        history.reset_display_seconds();
        assert_eq!(history.display_seconds(), DEFAULT_DISPLAY_SECONDS);
    }

    #[test]
    fn normalization_guards_zero_denominators() {
        let snap = GpuSnapshot {
            memory_used: 512,
            memory_total: 1024,
            gpu_utilization: 50,
            power_draw: 100,
            power_limit: 0,
            temperature: 65,
            ..Default::default()
        };
        let sample = MetricSample::from_snapshot(&snap);
        assert_eq!(sample.memory_used, 0.5);
        assert_eq!(sample.gpu_utilization, 0.5);
        assert_eq!(sample.power, 0.0);
        assert_eq!(sample.temperature, 0.65);
    }

    #[test]
    fn history_map_creates_lazily_and_prunes() {
        let mut map = HistoryMap::new();
        map.history("GPU-a").record(1.0, &flat_sample(0.1));
        map.history("GPU-b").record(1.0, &flat_sample(0.2));
        assert_eq!(map.len(), 2);

        let remaining = vec![GpuSnapshot {
            uuid: "GPU-a".into(),
            ..Default::default()
        }];
        map.retain_devices(&remaining);
        assert_eq!(map.len(), 1);
        assert!(map.get("GPU-a").is_some());
        assert!(map.get("GPU-b").is_none());
    }
}

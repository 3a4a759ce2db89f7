//! Telemetry
//!
//! Read-only data for the control surface, produced without locks on the
//! audio thread:
//!
//! - [`SharedMeters`]: channel peak meters, active version and latency in
//!   atomics (no `AtomicF32` exists, so floats are stored as bits)
//! - [`TelemetryFrame`]: one graph point per band and channel, pushed
//!   through an `rtrb` ring every `graph_stride` samples
//! - mono sample taps feeding the control-side spectrum analyzers
//!
//! [`GraphStore`] is the control-side end: fixed-length histories of the
//! punch, reduction and gain graphs per band.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer};
use serde::{Deserialize, Serialize};

use breather_dsp::{gain_to_db, MAX_BANDS};

use crate::config::MAX_CHANNELS;
use crate::snapshot::TIME_MESH_POINTS;

/// State shared between the audio thread and the control side
pub struct SharedMeters {
    input_peak_bits: [AtomicU32; MAX_CHANNELS],
    output_peak_bits: [AtomicU32; MAX_CHANNELS],
    active_version: AtomicU64,
    latency: AtomicUsize,
    dropped_frames: AtomicU64,
}

impl SharedMeters {
    pub fn new() -> Self {
        Self {
            input_peak_bits: core::array::from_fn(|_| AtomicU32::new(0.0_f32.to_bits())),
            output_peak_bits: core::array::from_fn(|_| AtomicU32::new(0.0_f32.to_bits())),
            active_version: AtomicU64::new(0),
            latency: AtomicUsize::new(0),
            dropped_frames: AtomicU64::new(0),
        }
    }

    pub(crate) fn set_peaks(&self, channel: usize, input: f32, output: f32) {
        if channel < MAX_CHANNELS {
            // Relaxed is enough: each value is read independently
            self.input_peak_bits[channel].store(input.to_bits(), Ordering::Relaxed);
            self.output_peak_bits[channel].store(output.to_bits(), Ordering::Relaxed);
        }
    }

    /// Most recent block peak of the input, per channel
    pub fn input_peaks(&self) -> [f32; MAX_CHANNELS] {
        core::array::from_fn(|i| f32::from_bits(self.input_peak_bits[i].load(Ordering::Relaxed)))
    }

    /// Most recent block peak of the output, per channel
    pub fn output_peaks(&self) -> [f32; MAX_CHANNELS] {
        core::array::from_fn(|i| f32::from_bits(self.output_peak_bits[i].load(Ordering::Relaxed)))
    }

    pub(crate) fn set_active(&self, version: u64, latency: usize) {
        self.latency.store(latency, Ordering::Relaxed);
        self.active_version.store(version, Ordering::Release);
    }

    /// Version of the snapshot the audio thread is currently using
    pub fn active_version(&self) -> u64 {
        self.active_version.load(Ordering::Acquire)
    }

    /// Latency of the active snapshot in samples
    pub fn latency(&self) -> usize {
        self.latency.load(Ordering::Relaxed)
    }

    pub(crate) fn note_dropped(&self) {
        self.dropped_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Telemetry frames lost because the control side fell behind
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

impl Default for SharedMeters {
    fn default() -> Self {
        Self::new()
    }
}

/// One graph point for one band on one channel
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Parameter index of the band
    pub band: u8,
    pub channel: u8,
    /// Peak punch signal (linear)
    pub punch: f32,
    /// Deepest punch filter gain (linear, <= 1)
    pub reduction: f32,
    /// Largest beat processor gain (linear, >= 1)
    pub gain: f32,
    /// Peak of the band signal entering detection
    pub input_level: f32,
    /// Peak of the band's contribution to the output
    pub output_level: f32,
}

/// Running extremes between two graph points
#[derive(Debug, Clone, Copy)]
pub(crate) struct GraphAccumulator {
    punch: f32,
    reduction: f32,
    gain: f32,
    input_level: f32,
    output_level: f32,
}

impl GraphAccumulator {
    pub(crate) fn new() -> Self {
        Self {
            punch: 0.0,
            reduction: 1.0,
            gain: 1.0,
            input_level: 0.0,
            output_level: 0.0,
        }
    }

    #[inline]
    pub(crate) fn update(&mut self, punch: f32, reduction: f32, gain: f32, input: f32, output: f32) {
        self.punch = self.punch.max(punch);
        self.reduction = self.reduction.min(reduction);
        self.gain = self.gain.max(gain);
        self.input_level = self.input_level.max(input.abs());
        self.output_level = self.output_level.max(output.abs());
    }

    /// Take the accumulated point and start a new one
    pub(crate) fn take(&mut self, band: usize, channel: usize) -> TelemetryFrame {
        let frame = TelemetryFrame {
            band: band as u8,
            channel: channel as u8,
            punch: self.punch,
            reduction: self.reduction,
            gain: self.gain,
            input_level: self.input_level,
            output_level: self.output_level,
        };
        *self = Self::new();
        frame
    }
}

/// Where a chunk sits relative to the graph points
#[derive(Debug, Clone, Copy)]
pub(crate) struct GraphCursor {
    pub(crate) channel: usize,
    /// Samples since the last graph point at the start of the chunk
    phase: usize,
    /// Samples per graph point
    stride: usize,
}

impl GraphCursor {
    pub(crate) fn new(channel: usize, phase: usize, stride: usize) -> Self {
        Self {
            channel,
            phase,
            stride: stride.max(1),
        }
    }

    /// Whether sample `i` of the chunk closes a graph point
    #[inline]
    pub(crate) fn is_due(&self, i: usize) -> bool {
        (self.phase + i + 1) % self.stride == 0
    }
}

/// Audio-thread end of all telemetry rings
pub struct TelemetrySink {
    frames: Producer<TelemetryFrame>,
    input_samples: Producer<f32>,
    output_samples: Producer<f32>,
    pub(crate) meters: Arc<SharedMeters>,
}

impl TelemetrySink {
    pub(crate) fn new(
        frames: Producer<TelemetryFrame>,
        input_samples: Producer<f32>,
        output_samples: Producer<f32>,
        meters: Arc<SharedMeters>,
    ) -> Self {
        Self {
            frames,
            input_samples,
            output_samples,
            meters,
        }
    }

    #[inline]
    pub(crate) fn push_frame(&mut self, frame: TelemetryFrame) {
        if self.frames.push(frame).is_err() {
            self.meters.note_dropped();
        }
    }

    /// Forward samples to the input analyzer; drops what does not fit
    pub(crate) fn push_input(&mut self, samples: impl ExactSizeIterator<Item = f32>) {
        push_samples(&mut self.input_samples, samples);
    }

    pub(crate) fn push_output(&mut self, samples: impl ExactSizeIterator<Item = f32>) {
        push_samples(&mut self.output_samples, samples);
    }
}

fn push_samples(producer: &mut Producer<f32>, samples: impl ExactSizeIterator<Item = f32>) {
    let len = samples.len().min(producer.slots());
    if len == 0 {
        return;
    }
    if let Ok(chunk) = producer.write_chunk_uninit(len) {
        chunk.fill_from_iter(samples);
    }
}

/// Control-side end of the telemetry rings
pub struct TelemetrySource {
    pub(crate) frames: Consumer<TelemetryFrame>,
    pub(crate) input_samples: Consumer<f32>,
    pub(crate) output_samples: Consumer<f32>,
}

/// Drain every readable sample from a ring into `out`
pub(crate) fn drain_samples(consumer: &mut Consumer<f32>, out: &mut Vec<f32>) {
    let available = consumer.slots();
    if available == 0 {
        return;
    }
    if let Ok(chunk) = consumer.read_chunk(available) {
        let (first, second) = chunk.as_slices();
        out.extend_from_slice(first);
        out.extend_from_slice(second);
        chunk.commit_all();
    }
}

/// Fixed-length history of one graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphHistory {
    values: Vec<f32>,
    head: usize,
}

impl GraphHistory {
    pub fn new(initial: f32) -> Self {
        Self {
            values: vec![initial; TIME_MESH_POINTS],
            head: 0,
        }
    }

    pub fn push(&mut self, value: f32) {
        self.values[self.head] = value;
        self.head = (self.head + 1) % self.values.len();
    }

    /// Oldest to newest
    pub fn to_vec(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.values.len());
        out.extend_from_slice(&self.values[self.head..]);
        out.extend_from_slice(&self.values[..self.head]);
        out
    }

    pub fn latest(&self) -> f32 {
        let len = self.values.len();
        self.values[(self.head + len - 1) % len]
    }
}

/// Graphs for one band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandGraphs {
    /// Punch signal in dB
    pub punch: GraphHistory,
    /// Punch filter gain in dB (<= 0)
    pub reduction: GraphHistory,
    /// Beat processor gain in dB (>= 0)
    pub gain: GraphHistory,
    pub input_level: f32,
    pub output_level: f32,
}

impl BandGraphs {
    fn new() -> Self {
        Self {
            punch: GraphHistory::new(gain_to_db(0.0)),
            reduction: GraphHistory::new(0.0),
            gain: GraphHistory::new(0.0),
            input_level: 0.0,
            output_level: 0.0,
        }
    }
}

/// Per-band graph histories, one point per frame of channel 0
///
/// Linked channels produce identical graphs; with stereo split the other
/// channels still update the level meters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStore {
    pub bands: Vec<BandGraphs>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self {
            bands: (0..MAX_BANDS).map(|_| BandGraphs::new()).collect(),
        }
    }

    pub fn apply(&mut self, frame: &TelemetryFrame) {
        let Some(graphs) = self.bands.get_mut(frame.band as usize) else {
            return;
        };
        if frame.channel == 0 {
            graphs.punch.push(gain_to_db(frame.punch));
            graphs.reduction.push(gain_to_db(frame.reduction));
            graphs.gain.push(gain_to_db(frame.gain));
            graphs.input_level = frame.input_level;
            graphs.output_level = frame.output_level;
        } else {
            graphs.input_level = graphs.input_level.max(frame.input_level);
            graphs.output_level = graphs.output_level.max(frame.output_level);
        }
    }

    pub fn band(&self, index: usize) -> Option<&BandGraphs> {
        self.bands.get(index)
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

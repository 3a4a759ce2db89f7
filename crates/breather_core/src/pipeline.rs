//! Processing Pipeline State
//!
//! All mutable signal state of the processor, sized for one sample rate
//! and channel count. It is allocated on the control side and only ever
//! reconfigured from a [`Snapshot`] on the audio thread.
//!
//! Band contexts are indexed by parameter band index, not by position in
//! the active set, so toggling a neighbouring band keeps a band's
//! envelopes and gains intact.

use breather_dsp::{Crossover, MAX_BANDS};

use crate::band::{BandChannel, BandLane};
use crate::config::MAX_CHANNELS;
use crate::mixer::Mixer;
use crate::snapshot::Snapshot;
use crate::telemetry::{GraphCursor, TelemetrySink};

/// Frames processed per internal chunk
pub const MAX_CHUNK: usize = 1024;

/// Signal state of one channel
struct ChannelState {
    crossover: Crossover,
    bands: Vec<BandChannel>,
    /// Crossover output, one buffer per active band position
    band_audio: Vec<Vec<f32>>,
    short: Vec<f32>,
    long: Vec<f32>,
    gained: Vec<f32>,
    wet: Vec<f32>,
    mixer: Mixer,
}

impl ChannelState {
    fn new(sample_rate: f32) -> Self {
        Self {
            crossover: Crossover::new(),
            bands: (0..MAX_BANDS).map(|_| BandChannel::new(sample_rate)).collect(),
            band_audio: (0..MAX_BANDS).map(|_| vec![0.0; MAX_CHUNK]).collect(),
            short: vec![0.0; MAX_CHUNK],
            long: vec![0.0; MAX_CHUNK],
            gained: vec![0.0; MAX_CHUNK],
            wet: vec![0.0; MAX_CHUNK],
            mixer: Mixer::new(sample_rate),
        }
    }

    fn reset(&mut self) {
        self.crossover.reset();
        self.bands.iter_mut().for_each(BandChannel::reset);
        self.mixer.reset();
    }
}

/// Complete processing state for one stream configuration
pub struct PipelineState {
    sample_rate: u32,
    channels: usize,
    channel_states: Vec<ChannelState>,
    /// `[lane][band index]`; lane 0 is shared when channels are linked
    lanes: Vec<Vec<BandLane>>,
    /// Cross-channel RMS averages for linked detection
    link_short: Vec<f32>,
    link_long: Vec<f32>,
    /// Input and output staging, one buffer per channel
    pub(crate) io_in: Vec<Vec<f32>>,
    pub(crate) io_out: Vec<Vec<f32>>,
    /// Bands configured by the previous snapshot
    active: [bool; MAX_BANDS],
    /// Channels share lane 0
    linked: bool,
    graph_phase: usize,
    input_peaks: [f32; MAX_CHANNELS],
    output_peaks: [f32; MAX_CHANNELS],
    fresh: bool,
}

impl PipelineState {
    /// Allocate everything needed for `channels` channels at `sample_rate`
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        let rate = sample_rate as f32;
        let channels = channels.clamp(1, MAX_CHANNELS);
        Self {
            sample_rate,
            channels,
            channel_states: (0..channels).map(|_| ChannelState::new(rate)).collect(),
            lanes: (0..channels)
                .map(|_| (0..MAX_BANDS).map(|_| BandLane::new(rate)).collect())
                .collect(),
            link_short: vec![0.0; MAX_CHUNK],
            link_long: vec![0.0; MAX_CHUNK],
            io_in: (0..channels).map(|_| vec![0.0; MAX_CHUNK]).collect(),
            io_out: (0..channels).map(|_| vec![0.0; MAX_CHUNK]).collect(),
            active: [false; MAX_BANDS],
            linked: false,
            graph_phase: 0,
            input_peaks: [0.0; MAX_CHANNELS],
            output_peaks: [0.0; MAX_CHANNELS],
            fresh: true,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Pick up a new snapshot
    ///
    /// Bands that were inactive start from cleared state with their
    /// windows and gains snapped; everything else ramps. Lanes of the
    /// other channels sit idle while linked and restart from cleared state
    /// when the link mode changes.
    pub fn configure(&mut self, snapshot: &Snapshot) {
        let fresh = self.fresh;
        let mut active = [false; MAX_BANDS];

        let linked = !snapshot.mix.stereo_split && self.channels > 1;
        if !fresh && linked != self.linked {
            for lane in self.lanes.iter_mut().skip(1) {
                lane.iter_mut().for_each(BandLane::reset);
            }
        }
        self.linked = linked;

        for settings in &snapshot.bands {
            let index = settings.index;
            active[index] = true;
            let immediate = fresh || !self.active[index];

            for channel in &mut self.channel_states {
                let band = &mut channel.bands[index];
                if immediate {
                    band.reset();
                }
                band.configure(settings, immediate);
            }
            for lane in &mut self.lanes {
                if immediate {
                    lane[index].reset();
                }
                lane[index].configure(settings);
            }
        }

        for channel in &mut self.channel_states {
            channel
                .mixer
                .configure(&snapshot.mix, snapshot.latency.total, fresh);
        }

        self.active = active;
        self.fresh = false;
    }

    /// Clear all signal history
    pub fn reset(&mut self) {
        self.channel_states.iter_mut().for_each(ChannelState::reset);
        for lane in &mut self.lanes {
            lane.iter_mut().for_each(BandLane::reset);
        }
        self.graph_phase = 0;
    }

    pub(crate) fn begin_block(&mut self) {
        self.input_peaks = [0.0; MAX_CHANNELS];
        self.output_peaks = [0.0; MAX_CHANNELS];
    }

    pub(crate) fn end_block(&self, sink: &TelemetrySink) {
        for channel in 0..self.channels {
            sink.meters
                .set_peaks(channel, self.input_peaks[channel], self.output_peaks[channel]);
        }
    }

    /// Process `frames` samples from `io_in` into `io_out`
    pub(crate) fn process_chunk(&mut self, snapshot: &Snapshot, frames: usize, sink: &mut TelemetrySink) {
        let n = frames.min(MAX_CHUNK);
        let channels = self.channels;
        let linked = self.linked;

        // Input gain and band split
        for (ch, state) in self.channel_states.iter_mut().enumerate() {
            let input = &self.io_in[ch][..n];
            state.mixer.apply_input_gain(input, &mut state.gained[..n]);
            state
                .crossover
                .process(&snapshot.crossover, &state.gained[..n], &mut state.band_audio);
            state.wet[..n].fill(0.0);
        }

        for (position, settings) in snapshot.bands.iter().enumerate() {
            let index = settings.index;

            for state in &mut self.channel_states {
                let ChannelState {
                    bands,
                    band_audio,
                    short,
                    long,
                    ..
                } = state;
                bands[index].detector.process_block(
                    &band_audio[position][..n],
                    &mut short[..n],
                    &mut long[..n],
                );
            }

            if linked {
                let scale = 1.0 / channels as f32;
                self.link_short[..n].fill(0.0);
                self.link_long[..n].fill(0.0);
                for state in &self.channel_states {
                    for i in 0..n {
                        self.link_short[i] += state.short[i] * scale;
                        self.link_long[i] += state.long[i] * scale;
                    }
                }
                self.lanes[0][index].process(settings, &self.link_short[..n], &self.link_long[..n]);
            } else {
                for (ch, state) in self.channel_states.iter().enumerate() {
                    self.lanes[ch][index].process(settings, &state.short[..n], &state.long[..n]);
                }
            }

            for (ch, state) in self.channel_states.iter_mut().enumerate() {
                let lane = if linked { &self.lanes[0][index] } else { &self.lanes[ch][index] };
                let ChannelState {
                    bands,
                    band_audio,
                    wet,
                    ..
                } = state;
                bands[index].render(
                    settings,
                    &band_audio[position][..n],
                    lane,
                    &mut wet[..n],
                    GraphCursor::new(ch, self.graph_phase, snapshot.graph_stride),
                    sink,
                );
            }
        }

        // Mix, meters and analyzer taps
        for (ch, state) in self.channel_states.iter_mut().enumerate() {
            let input = &self.io_in[ch][..n];
            let output = &mut self.io_out[ch][..n];
            state.mixer.mix(input, &state.wet[..n], output);

            self.input_peaks[ch] = input.iter().fold(self.input_peaks[ch], |m, x| m.max(x.abs()));
            self.output_peaks[ch] = output.iter().fold(self.output_peaks[ch], |m, x| m.max(x.abs()));
        }

        let scale = 1.0 / channels as f32;
        if snapshot.mix.analyze_input {
            let io = &self.io_in;
            sink.push_input((0..n).map(|i| io.iter().map(|c| c[i]).sum::<f32>() * scale));
        }
        if snapshot.mix.analyze_output {
            let io = &self.io_out;
            sink.push_output((0..n).map(|i| io.iter().map(|c| c[i]).sum::<f32>() * scale));
        }

        self.graph_phase = (self.graph_phase + n) % snapshot.graph_stride.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::params::{BreatherParams, ChainTap};
    use crate::telemetry::SharedMeters;
    use rtrb::RingBuffer;
    use std::sync::Arc;

    fn sink() -> TelemetrySink {
        let (frames, _) = RingBuffer::new(1024);
        let (input, _) = RingBuffer::new(4096);
        let (output, _) = RingBuffer::new(4096);
        TelemetrySink::new(frames, input, output, Arc::new(SharedMeters::new()))
    }

    fn stream(channels: u16) -> StreamConfig {
        StreamConfig {
            channels,
            ..StreamConfig::default()
        }
    }

    #[test]
    fn test_state_sizing() {
        let state = PipelineState::new(48000, 2);
        assert_eq!(state.channels(), 2);
        assert_eq!(state.sample_rate(), 48000);
        assert_eq!(state.io_in.len(), 2);
        assert_eq!(state.lanes.len(), 2);
        assert_eq!(state.lanes[0].len(), MAX_BANDS);

        let snapshot = Snapshot::build(&BreatherParams::default(), &stream(2), 1).unwrap();
        assert_eq!(snapshot.channels(), state.channels());
    }

    #[test]
    fn test_raw_bands_reconstruct_delayed_input() {
        let mut params = BreatherParams::with_splits(&[300.0, 3000.0]);
        for band in &mut params.bands {
            band.tap = ChainTap::RawBand;
        }
        let snapshot = Snapshot::build(&params, &stream(1), 1).unwrap();
        let latency = snapshot.latency.total;
        assert!(latency > 0 && latency < MAX_CHUNK);

        let mut state = PipelineState::new(48000, 1);
        state.configure(&snapshot);
        state.io_in[0].fill(0.0);
        state.io_in[0][0] = 1.0;
        state.process_chunk(&snapshot, MAX_CHUNK, &mut sink());

        let out = &state.io_out[0];
        assert!((out[latency] - 1.0).abs() < 1e-3);
        let stray: f32 = out
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != latency)
            .map(|(_, v)| v.abs())
            .fold(0.0, f32::max);
        assert!(stray < 1e-3, "stray energy {stray}");
    }

    #[test]
    fn test_linked_channels_share_gains() {
        let mut params = BreatherParams::single_band();
        params.bands[0].filter.reduction_db = 0.0;
        params.bands[0].beat.threshold_db = -40.0;
        let snapshot = Snapshot::build(&params, &stream(2), 1).unwrap();
        let mut state = PipelineState::new(48000, 2);
        state.configure(&snapshot);

        for i in 0..MAX_CHUNK {
            let t = i as f32 / 48000.0;
            let burst = if i > 400 && i < 600 { 0.8 } else { 0.01 };
            state.io_in[0][i] = (t * 2.0 * std::f32::consts::PI * 200.0).sin() * burst;
            state.io_in[1][i] = 0.0;
        }
        state.process_chunk(&snapshot, MAX_CHUNK, &mut sink());

        // Only lane 0 is used; gains apply equally to the silent channel
        assert!(state.io_out[1].iter().all(|&v| v == 0.0));
        assert!(state.lanes[0][0].beat_gain[..MAX_CHUNK].iter().any(|&g| g > 1.0));
        assert!(state.lanes[1][0].beat_gain[..MAX_CHUNK].iter().all(|&g| g == 1.0));
    }

    #[test]
    fn test_split_after_link_starts_fresh_lanes() {
        let mut params = BreatherParams::single_band();
        params.bands[0].filter.reduction_db = 0.0;
        params.bands[0].beat.threshold_db = -40.0;
        params.stereo_split = true;
        let split = Snapshot::build(&params, &stream(2), 1).unwrap();
        params.stereo_split = false;
        let linked = Snapshot::build(&params, &stream(2), 2).unwrap();
        params.stereo_split = true;
        let split_again = Snapshot::build(&params, &stream(2), 3).unwrap();

        let mut state = PipelineState::new(48000, 2);
        let mut sink = sink();

        // Split: a burst at the end of the block leaves the right lane amplifying
        state.configure(&split);
        for i in 0..MAX_CHUNK {
            let t = i as f32 / 48000.0;
            let level = if i >= 600 { 0.8 } else { 0.01 };
            state.io_in[0][i] = 0.0;
            state.io_in[1][i] = (t * 2.0 * std::f32::consts::PI * 200.0).sin() * level;
        }
        state.process_chunk(&split, MAX_CHUNK, &mut sink);
        assert!(state.lanes[1][0].beat_gain[MAX_CHUNK - 1] > 1.0);

        // Linked: silence, the right lane is idle
        state.configure(&linked);
        state.io_in.iter_mut().for_each(|c| c.fill(0.0));
        state.process_chunk(&linked, MAX_CHUNK, &mut sink);

        // Split again: the right lane matches a freshly built one fed the
        // same detector curves
        state.configure(&split_again);
        state.process_chunk(&split_again, MAX_CHUNK, &mut sink);

        let settings = &split_again.bands[0];
        let mut fresh = BandLane::new(48000.0);
        fresh.configure(settings);
        let right = &state.channel_states[1];
        fresh.process(settings, &right.short[..MAX_CHUNK], &right.long[..MAX_CHUNK]);

        assert_eq!(state.lanes[1][0].beat_gain, fresh.beat_gain);
        assert_eq!(state.lanes[1][0].filter_gain, fresh.filter_gain);
        assert!((state.lanes[1][0].beat_gain[0] - 1.0).abs() < 0.01);
    }
}

//! Band Contexts
//!
//! Each active band runs in two parts:
//!
//! - [`BandLane`]: the control path (punch signal, punch filter, beat
//!   processor). One lane per channel with stereo split, a single shared
//!   lane otherwise, so linked channels get identical gains.
//! - [`BandChannel`]: the audio path of one band on one channel (RMS
//!   detection, lookahead and shift delays, tap selection, output gain,
//!   alignment padding).
//!
//! ```text
//!  band ──┬─► RMS short/long ──► lane: punch ─► filter ─► beat
//!         │                              │        │         │
//!         └─► lookahead ─┬─► shift ──────┼────────┼─────────┤
//!                        │               ▼        ▼         ▼
//!                        │          PD tap    PF tap     BP tap
//!                        └───────────────────────┘
//!  tap ─► gain ramp ─► padding ─► + wet
//! ```

use breather_dsp::{
    millis_to_samples, punch_signal, BeatProcessor, DelayLine, GainRamp, PunchDetector,
    PunchFilter, MAX_LOOKAHEAD_MS, MAX_TIME_SHIFT_MS,
};

use crate::params::ChainTap;
use crate::pipeline::MAX_CHUNK;
use crate::snapshot::BandSettings;
use crate::telemetry::{GraphAccumulator, GraphCursor, TelemetrySink};

/// Length of the band gain ramp
const GAIN_RAMP_MS: f32 = 5.0;

/// Control path of one band for one detection lane
pub(crate) struct BandLane {
    filter: PunchFilter,
    beat: BeatProcessor,
    pub(crate) punch: Vec<f32>,
    pub(crate) filter_gain: Vec<f32>,
    pub(crate) beat_gain: Vec<f32>,
}

impl BandLane {
    pub(crate) fn new(sample_rate: f32) -> Self {
        Self {
            filter: PunchFilter::new(sample_rate),
            beat: BeatProcessor::new(sample_rate),
            punch: vec![0.0; MAX_CHUNK],
            filter_gain: vec![1.0; MAX_CHUNK],
            beat_gain: vec![1.0; MAX_CHUNK],
        }
    }

    pub(crate) fn configure(&mut self, settings: &BandSettings) {
        self.filter.configure(&settings.filter);
        self.beat.configure(&settings.beat);
    }

    /// Turn RMS curves into punch, filter gain and beat gain curves
    pub(crate) fn process(&mut self, settings: &BandSettings, short: &[f32], long: &[f32]) {
        let detector = &settings.detector;
        for (i, (&s, &l)) in short.iter().zip(long).enumerate() {
            let punch = punch_signal(s, l, detector.bias, detector.makeup);
            let frame = self.filter.process(punch, &settings.filter);
            self.punch[i] = punch;
            self.filter_gain[i] = frame.gain;
            self.beat_gain[i] = self.beat.process(frame.envelope, &settings.beat);
        }
    }

    pub(crate) fn reset(&mut self) {
        self.filter.reset();
        self.beat.reset();
    }
}

/// Audio path of one band on one channel
pub(crate) struct BandChannel {
    pub(crate) detector: PunchDetector,
    lookahead: DelayLine,
    shift: DelayLine,
    align: DelayLine,
    gain: GainRamp,
    graph: GraphAccumulator,
}

impl BandChannel {
    pub(crate) fn new(sample_rate: f32) -> Self {
        let max_lookahead = millis_to_samples(MAX_LOOKAHEAD_MS, sample_rate);
        let max_shift = millis_to_samples(MAX_TIME_SHIFT_MS, sample_rate);
        Self {
            detector: PunchDetector::new(sample_rate),
            lookahead: DelayLine::new(max_lookahead),
            shift: DelayLine::new(max_shift),
            align: DelayLine::new(max_lookahead + max_shift),
            gain: GainRamp::new(0.0, millis_to_samples(GAIN_RAMP_MS, sample_rate).max(1)),
            graph: GraphAccumulator::new(),
        }
    }

    /// Apply new settings; `immediate` snaps windows and gain (fresh band)
    pub(crate) fn configure(&mut self, settings: &BandSettings, immediate: bool) {
        self.lookahead.set_delay(settings.filter.lookahead);
        self.shift.set_delay(settings.beat.audio_delay);
        self.align.set_delay(settings.padding);

        let gain = if settings.contributes { settings.gain } else { 0.0 };
        if immediate {
            self.detector.configure_immediate(&settings.detector);
            self.gain.set_immediate(gain);
        } else {
            self.detector.configure(&settings.detector);
            self.gain.set_target(gain);
        }
    }

    /// Render this band's contribution into `wet`
    pub(crate) fn render(
        &mut self,
        settings: &BandSettings,
        band: &[f32],
        lane: &BandLane,
        wet: &mut [f32],
        cursor: GraphCursor,
        sink: &mut TelemetrySink,
    ) {
        for (i, (&x, out)) in band.iter().zip(wet.iter_mut()).enumerate() {
            let filter_audio = self.lookahead.process(x);
            let beat_audio = self.shift.process(filter_audio);

            let tap = match settings.tap {
                ChainTap::RawBand => x,
                ChainTap::PunchDetector => lane.punch[i],
                ChainTap::PunchFilter => filter_audio * lane.filter_gain[i],
                ChainTap::BeatProcessor => beat_audio * lane.beat_gain[i],
            };

            let contribution = self.align.process(tap * self.gain.next_value());
            *out += contribution;

            self.graph.update(
                lane.punch[i],
                lane.filter_gain[i],
                lane.beat_gain[i],
                x,
                contribution,
            );
            if cursor.is_due(i) {
                sink.push_frame(self.graph.take(settings.index, cursor.channel));
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.detector.reset();
        self.lookahead.clear();
        self.shift.clear();
        self.align.clear();
        self.graph = GraphAccumulator::new();
    }
}

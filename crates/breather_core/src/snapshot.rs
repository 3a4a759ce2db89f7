//! Configuration Snapshots
//!
//! A [`Snapshot`] is everything the audio thread needs to process a block:
//! the designed crossover, per-band settings in samples and coefficients,
//! the mix settings and the latency plan. Snapshots are built and
//! validated on the control side, published whole, and never mutated
//! afterwards (except for handing over the pipeline state they carry).
//!
//! # Latency Plan
//!
//! ```text
//! tap latency:   RawBand = 0, PunchDetector = 0,
//!                PunchFilter = lookahead,
//!                BeatProcessor = lookahead + max(0, -shift)
//! band latency = max over active bands of (lookahead + max(0, -shift))
//! padding      = band latency - tap latency          (per band)
//! total        = crossover latency + band latency    (wet and dry paths)
//! ```

use breather_dsp::{
    db_to_gain, BeatProcessorSettings, CrossoverDesign, PunchDetectorSettings, PunchFilterSettings,
    SplitSpec,
};

use crate::config::StreamConfig;
use crate::error::EngineResult;
use crate::params::{BandParams, BreatherParams, ChainTap};
use crate::pipeline::PipelineState;

/// Length of the per-band graph histories
pub const TIME_MESH_POINTS: usize = 320;

/// Seconds covered by a graph history
pub const GRAPH_HISTORY_SECONDS: f32 = 5.0;

/// Sample-domain settings for one active band
#[derive(Debug, Clone, PartialEq)]
pub struct BandSettings {
    /// Index into [`BreatherParams::bands`]
    pub index: usize,
    pub low_hz: f32,
    pub high_hz: f32,
    pub tap: ChainTap,
    /// Resolved from mute/solo
    pub contributes: bool,
    /// Linear output gain
    pub gain: f32,
    pub detector: PunchDetectorSettings,
    pub filter: PunchFilterSettings,
    pub beat: BeatProcessorSettings,
    /// Delay the selected tap carries relative to the crossover output
    pub tap_latency: usize,
    /// Delay added after the tap so every band leaves at the same latency
    pub padding: usize,
}

impl BandSettings {
    /// Worst-case internal delay of this band (the beat processor tap)
    pub fn internal_latency(&self) -> usize {
        self.filter.lookahead + self.beat.audio_delay
    }

    /// Internal delay of a given tap
    pub fn latency_of(&self, tap: ChainTap) -> usize {
        match tap {
            ChainTap::RawBand | ChainTap::PunchDetector => 0,
            ChainTap::PunchFilter => self.filter.lookahead,
            ChainTap::BeatProcessor => self.filter.lookahead + self.beat.audio_delay,
        }
    }
}

/// Global gains and switches in linear units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixSettings {
    pub input_gain: f32,
    pub output_gain: f32,
    pub dry_level: f32,
    pub wet_level: f32,
    pub balance: f32,
    pub bypass: bool,
    pub stereo_split: bool,
    pub analyze_input: bool,
    pub analyze_output: bool,
}

/// Latency bookkeeping shared by every path to the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyPlan {
    pub crossover: usize,
    pub band: usize,
    pub total: usize,
}

/// Immutable, versioned configuration consumed by the audio thread
pub struct Snapshot {
    pub version: u64,
    pub stream: StreamConfig,
    pub crossover: CrossoverDesign,
    pub bands: Vec<BandSettings>,
    pub mix: MixSettings,
    pub latency: LatencyPlan,
    /// Samples per graph history point
    pub graph_stride: usize,
    /// Freshly allocated state for a new sample rate or channel count
    pub(crate) state: Option<Box<PipelineState>>,
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("stream", &self.stream)
            .field("bands", &self.bands.len())
            .field("latency", &self.latency)
            .field("carries_state", &self.state.is_some())
            .finish()
    }
}

impl Snapshot {
    /// Validate `params` and derive everything the audio thread needs
    pub fn build(params: &BreatherParams, stream: &StreamConfig, version: u64) -> EngineResult<Self> {
        stream.validate()?;
        let sample_rate = stream.sample_rate as f32;
        params.validate(sample_rate)?;

        let active = params.active_bands();
        // Both sides of a split share one complementary kernel; the steeper
        // of the lower band's LPF and the upper band's HPF slope sets it
        let splits: Vec<SplitSpec> = active
            .windows(2)
            .map(|pair| {
                let below = &params.bands[pair[0]];
                let above = &params.bands[pair[1]];
                SplitSpec {
                    frequency: above.frequency_hz,
                    slope_db: below.lpf_slope_db.max(above.hpf_slope_db),
                    flatten_db: below.flatten_db,
                }
            })
            .collect();
        let crossover = CrossoverDesign::design(sample_rate, &splits)?;

        let any_solo = active.iter().any(|&i| params.bands[i].solo);
        let mut bands: Vec<BandSettings> = active
            .iter()
            .enumerate()
            .map(|(position, &index)| {
                let (low_hz, high_hz) = crossover.band_range(position);
                band_settings(&params.bands[index], index, low_hz, high_hz, any_solo, sample_rate)
            })
            .collect();

        let band_latency = bands
            .iter()
            .map(BandSettings::internal_latency)
            .max()
            .unwrap_or(0);
        for band in &mut bands {
            band.padding = band_latency - band.tap_latency;
        }

        let latency = LatencyPlan {
            crossover: crossover.latency(),
            band: band_latency,
            total: crossover.latency() + band_latency,
        };

        let mix = MixSettings {
            input_gain: db_to_gain(params.input_gain_db),
            output_gain: db_to_gain(params.output_gain_db),
            dry_level: params.dry_level,
            wet_level: params.wet_level,
            balance: params.balance,
            bypass: params.bypass,
            stereo_split: params.stereo_split,
            analyze_input: params.analysis.input,
            analyze_output: params.analysis.output,
        };

        let graph_stride =
            ((sample_rate * GRAPH_HISTORY_SECONDS / TIME_MESH_POINTS as f32) as usize).max(1);

        Ok(Self {
            version,
            stream: *stream,
            crossover,
            bands,
            mix,
            latency,
            graph_stride,
            state: None,
        })
    }

    /// Attach freshly allocated pipeline state (sample rate or channel change)
    pub(crate) fn with_state(mut self, state: Box<PipelineState>) -> Self {
        self.state = Some(state);
        self
    }

    pub fn sample_rate(&self) -> f32 {
        self.stream.sample_rate as f32
    }

    pub fn channels(&self) -> usize {
        self.stream.channels as usize
    }

    /// Settings of the band at parameter index `index`, if active
    pub fn band(&self, index: usize) -> Option<&BandSettings> {
        self.bands.iter().find(|b| b.index == index)
    }
}

fn band_settings(
    band: &BandParams,
    index: usize,
    low_hz: f32,
    high_hz: f32,
    any_solo: bool,
    sample_rate: f32,
) -> BandSettings {
    let d = &band.detector;
    let f = &band.filter;
    let b = &band.beat;

    let detector = PunchDetectorSettings::from_millis(
        d.long_window_ms,
        d.short_window_ms,
        d.bias,
        d.makeup_db,
        sample_rate,
    );
    let filter = PunchFilterSettings::from_millis(
        f.lookahead_ms,
        f.attack_ms,
        f.release_ms,
        f.threshold_db,
        f.zone_db,
        f.reduction_db,
        sample_rate,
    );
    let beat = BeatProcessorSettings::from_millis(
        b.time_shift_ms,
        b.attack_ms,
        b.release_ms,
        b.threshold_db,
        b.ratio,
        b.max_gain_db,
        sample_rate,
    );

    // Solo wins over mute; without any solo, mute silences
    let contributes = if any_solo { band.solo } else { !band.mute };

    let mut settings = BandSettings {
        index,
        low_hz,
        high_hz,
        tap: band.tap,
        contributes,
        gain: db_to_gain(band.gain_db),
        detector,
        filter,
        beat,
        tap_latency: 0,
        padding: 0,
    };
    settings.tap_latency = settings.latency_of(band.tap);
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EngineError, ParamError};

    fn stream() -> StreamConfig {
        StreamConfig::default()
    }

    #[test]
    fn test_default_snapshot() {
        let snapshot = Snapshot::build(&BreatherParams::default(), &stream(), 1).unwrap();
        assert_eq!(snapshot.bands.len(), 4);
        assert_eq!(snapshot.crossover.band_count(), 4);
        assert_eq!(
            snapshot.bands.iter().map(|b| b.index).collect::<Vec<_>>(),
            vec![0, 2, 4, 6]
        );
        assert_eq!(snapshot.bands[1].low_hz, 100.0);
        assert_eq!(snapshot.bands[1].high_hz, 632.0);
        assert_eq!(snapshot.bands[3].high_hz, 24000.0);
        assert_eq!(snapshot.latency.band, 0);
        assert_eq!(snapshot.latency.total, snapshot.crossover.latency());
        assert_eq!(snapshot.graph_stride, 750);
    }

    #[test]
    fn test_single_band_has_no_crossover_latency() {
        let snapshot = Snapshot::build(&BreatherParams::single_band(), &stream(), 1).unwrap();
        assert_eq!(snapshot.crossover.latency(), 0);
        assert_eq!(snapshot.latency.total, 0);
    }

    #[test]
    fn test_latency_plan_pads_to_worst_band() {
        let mut params = BreatherParams::with_splits(&[500.0, 4000.0]);
        params.bands[0].filter.lookahead_ms = 2.0; // 96 samples
        params.bands[1].beat.time_shift_ms = -3.0; // 144 samples of extra audio delay
        params.bands[1].filter.lookahead_ms = 1.0; // 48
        params.bands[2].tap = ChainTap::RawBand;

        let snapshot = Snapshot::build(&params, &stream(), 7).unwrap();
        assert_eq!(snapshot.latency.band, 48 + 144);
        assert_eq!(snapshot.latency.total, snapshot.crossover.latency() + 192);

        let b0 = &snapshot.bands[0];
        assert_eq!(b0.tap_latency, 96);
        assert_eq!(b0.padding, 96);
        let b1 = &snapshot.bands[1];
        assert_eq!(b1.tap_latency, 192);
        assert_eq!(b1.padding, 0);
        let b2 = &snapshot.bands[2];
        assert_eq!(b2.tap_latency, 0);
        assert_eq!(b2.padding, 192);
    }

    #[test]
    fn test_positive_shift_adds_no_latency() {
        let mut params = BreatherParams::single_band();
        params.bands[0].beat.time_shift_ms = 4.0;
        let snapshot = Snapshot::build(&params, &stream(), 1).unwrap();
        assert_eq!(snapshot.latency.total, 0);
        assert_eq!(snapshot.bands[0].beat.envelope_delay, 192);
    }

    #[test]
    fn test_solo_and_mute_resolution() {
        let mut params = BreatherParams::with_splits(&[500.0, 4000.0]);
        params.bands[1].mute = true;
        let snapshot = Snapshot::build(&params, &stream(), 1).unwrap();
        let contributes: Vec<bool> = snapshot.bands.iter().map(|b| b.contributes).collect();
        assert_eq!(contributes, vec![true, false, true]);

        // A soloed band plays even if muted; everything else goes quiet
        params.bands[1].solo = true;
        let snapshot = Snapshot::build(&params, &stream(), 2).unwrap();
        let contributes: Vec<bool> = snapshot.bands.iter().map(|b| b.contributes).collect();
        assert_eq!(contributes, vec![false, true, false]);
    }

    #[test]
    fn test_slope_and_flatten_feed_the_split() {
        let mut params = BreatherParams::with_splits(&[1000.0]);
        params.bands[0].lpf_slope_db = 12.0;
        params.bands[1].hpf_slope_db = 60.0;
        params.bands[0].flatten_db = 6.0;
        let snapshot = Snapshot::build(&params, &stream(), 1).unwrap();
        let split = &snapshot.crossover.splits()[0];
        assert_eq!(split.slope_db, 60.0);
        assert!(split.cutoff < 1000.0);
        assert_eq!(split.frequency, 1000.0);
    }

    #[test]
    fn test_split_slope_is_steeper_side() {
        let mut params = BreatherParams::with_splits(&[1000.0]);
        params.bands[0].lpf_slope_db = 60.0;
        params.bands[1].hpf_slope_db = 12.0;
        let steep_below = Snapshot::build(&params, &stream(), 1).unwrap();
        assert_eq!(steep_below.crossover.splits()[0].slope_db, 60.0);

        // A shallower HPF on the upper band leaves the split alone
        params.bands[1].hpf_slope_db = 30.0;
        let shallower = Snapshot::build(&params, &stream(), 2).unwrap();
        assert_eq!(shallower.crossover.splits()[0].slope_db, 60.0);
        assert_eq!(shallower.latency.total, steep_below.latency.total);

        // A steeper HPF takes over and lengthens the kernel
        params.bands[1].hpf_slope_db = 72.0;
        let steep_above = Snapshot::build(&params, &stream(), 3).unwrap();
        assert_eq!(steep_above.crossover.splits()[0].slope_db, 72.0);
        assert!(steep_above.crossover.splits()[0].taps() > steep_below.crossover.splits()[0].taps());

        // Slopes of disabled bands in between play no part
        let mut params = BreatherParams::with_splits(&[500.0, 4000.0]);
        params.bands[0].lpf_slope_db = 24.0;
        params.bands[1].enabled = false;
        params.bands[1].hpf_slope_db = 72.0;
        params.bands[1].lpf_slope_db = 72.0;
        params.bands[2].hpf_slope_db = 48.0;
        let snapshot = Snapshot::build(&params, &stream(), 4).unwrap();
        assert_eq!(snapshot.crossover.band_count(), 2);
        assert_eq!(snapshot.crossover.splits()[0].frequency, 4000.0);
        assert_eq!(snapshot.crossover.splits()[0].slope_db, 48.0);
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = BreatherParams::with_splits(&[2000.0, 1000.0]);
        let err = Snapshot::build(&params, &stream(), 1).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidParams(ParamError::SplitOrder { .. })
        ));
    }
}

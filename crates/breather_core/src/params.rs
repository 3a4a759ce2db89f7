//! Parameter Model
//!
//! The complete, user-facing parameter set. Everything the control surface
//! can change lives here in user units (Hz, dB, ms, linear ratios). A
//! parameter set is validated as a whole before it is turned into a
//! snapshot, so the audio thread never sees a half-applied edit.
//!
//! Band layout: `bands[0]` is the lowest band and is always enabled. Every
//! other entry carries the frequency of its *lower* edge; disabled bands
//! are skipped and their range is absorbed by the enabled band below.

use serde::{Deserialize, Serialize};

use breather_dsp::MAX_BANDS;

use crate::error::ParamError;

/// Inclusive range accepted for one parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub min: f32,
    pub max: f32,
}

impl ParamRange {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// NaN is never contained
    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }

    fn check(&self, name: &str, band: Option<usize>, value: f32) -> Result<(), ParamError> {
        if self.contains(value) {
            return Ok(());
        }
        let name = match band {
            Some(index) => format!("band {} {}", index, name),
            None => name.to_string(),
        };
        Err(ParamError::OutOfRange {
            name,
            value,
            min: self.min,
            max: self.max,
        })
    }
}

/// Accepted ranges for every parameter
pub mod limits {
    use super::ParamRange;

    pub const SPLIT_FREQUENCY_HZ: ParamRange = ParamRange::new(10.0, 20000.0);
    pub const SLOPE_DB: ParamRange = ParamRange::new(0.0, 72.0);
    pub const FLATTEN_DB: ParamRange = ParamRange::new(0.0, 6.0);
    pub const BAND_GAIN_DB: ParamRange = ParamRange::new(-60.0, 12.0);

    pub const LONG_WINDOW_MS: ParamRange = ParamRange::new(100.0, 1000.0);
    pub const SHORT_WINDOW_MS: ParamRange = ParamRange::new(0.1, 20.0);
    pub const BIAS: ParamRange = ParamRange::new(0.0, 10.0);
    pub const MAKEUP_DB: ParamRange = ParamRange::new(-12.0, 12.0);

    pub const LOOKAHEAD_MS: ParamRange = ParamRange::new(0.0, 5.0);
    pub const FILTER_ATTACK_MS: ParamRange = ParamRange::new(0.0, 10.0);
    pub const FILTER_RELEASE_MS: ParamRange = ParamRange::new(0.0, 100.0);
    pub const FILTER_THRESHOLD_DB: ParamRange = ParamRange::new(-24.0, 24.0);
    pub const ZONE_DB: ParamRange = ParamRange::new(0.0, 24.0);
    pub const REDUCTION_DB: ParamRange = ParamRange::new(0.0, 48.0);

    pub const TIME_SHIFT_MS: ParamRange = ParamRange::new(-5.0, 5.0);
    pub const BEAT_ATTACK_MS: ParamRange = ParamRange::new(0.0, 100.0);
    pub const BEAT_RELEASE_MS: ParamRange = ParamRange::new(0.0, 200.0);
    pub const BEAT_THRESHOLD_DB: ParamRange = ParamRange::new(-72.0, 0.0);
    pub const RATIO: ParamRange = ParamRange::new(0.0, 10.0);
    pub const MAX_GAIN_DB: ParamRange = ParamRange::new(0.0, 24.0);

    pub const IO_GAIN_DB: ParamRange = ParamRange::new(-60.0, 24.0);
    pub const MIX_LEVEL: ParamRange = ParamRange::new(0.0, 4.0);
    pub const BALANCE: ParamRange = ParamRange::new(0.0, 1.0);

    pub const REACTIVITY_MS: ParamRange = ParamRange::new(10.0, 1000.0);
    pub const SPECTRUM_SHIFT_DB: ParamRange = ParamRange::new(-40.0, 60.0);
}

/// Signal a band contributes to the recombined output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChainTap {
    /// Crossover output before any detection
    RawBand,
    /// The punch signal itself
    PunchDetector,
    /// Band audio gated by the punch filter
    PunchFilter,
    /// Band audio amplified by the beat processor
    #[default]
    BeatProcessor,
}

/// Punch detector knobs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    pub long_window_ms: f32,
    pub short_window_ms: f32,
    /// Linear multiplier on the long-term RMS
    pub bias: f32,
    pub makeup_db: f32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            long_window_ms: 400.0,
            short_window_ms: 10.0,
            bias: 1.0,
            makeup_db: 0.0,
        }
    }
}

impl DetectorParams {
    /// Short window suited to a band starting at `low_hz` (two periods, 0.5-20 ms)
    pub fn for_band(low_hz: f32) -> Self {
        Self {
            short_window_ms: (2000.0 / low_hz.max(20.0)).clamp(0.5, 20.0),
            ..Self::default()
        }
    }
}

/// Punch filter knobs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    pub lookahead_ms: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub threshold_db: f32,
    pub zone_db: f32,
    /// Maximum reduction as a positive dB amount
    pub reduction_db: f32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            lookahead_ms: 0.0,
            attack_ms: 1.0,
            release_ms: 5.0,
            threshold_db: -9.0,
            zone_db: 3.0,
            reduction_db: 12.0,
        }
    }
}

/// Beat processor knobs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatParams {
    pub time_shift_ms: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub threshold_db: f32,
    pub ratio: f32,
    pub max_gain_db: f32,
}

impl Default for BeatParams {
    fn default() -> Self {
        Self {
            time_shift_ms: 0.0,
            attack_ms: 10.0,
            release_ms: 20.0,
            threshold_db: -24.0,
            ratio: 2.0,
            max_gain_db: 6.0,
        }
    }
}

/// One band of the processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BandParams {
    /// Ignored (and forced on) for band 0
    pub enabled: bool,
    /// Lower edge in Hz; ignored for band 0
    pub frequency_hz: f32,
    /// Slope of the split at this band's upper edge (dB/octave)
    pub lpf_slope_db: f32,
    /// Slope of the split at this band's lower edge (dB/octave)
    pub hpf_slope_db: f32,
    /// Attenuation near the upper edge in dB, 0 = off
    pub flatten_db: f32,
    pub solo: bool,
    pub mute: bool,
    pub gain_db: f32,
    pub tap: ChainTap,
    pub detector: DetectorParams,
    pub filter: FilterParams,
    pub beat: BeatParams,
}

impl Default for BandParams {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl BandParams {
    /// Enabled band with default knobs starting at `frequency_hz`
    pub fn new(frequency_hz: f32) -> Self {
        Self {
            enabled: true,
            frequency_hz,
            lpf_slope_db: 36.0,
            hpf_slope_db: 36.0,
            flatten_db: 0.0,
            solo: false,
            mute: false,
            gain_db: 0.0,
            tap: ChainTap::default(),
            detector: DetectorParams::for_band(frequency_hz),
            filter: FilterParams::default(),
            beat: BeatParams::default(),
        }
    }

    pub fn disabled(frequency_hz: f32) -> Self {
        Self {
            enabled: false,
            ..Self::new(frequency_hz)
        }
    }

    fn validate(&self, index: usize) -> Result<(), ParamError> {
        let band = Some(index);
        if index > 0 {
            limits::SPLIT_FREQUENCY_HZ.check("frequency_hz", band, self.frequency_hz)?;
        }
        limits::SLOPE_DB.check("lpf_slope_db", band, self.lpf_slope_db)?;
        limits::SLOPE_DB.check("hpf_slope_db", band, self.hpf_slope_db)?;
        limits::FLATTEN_DB.check("flatten_db", band, self.flatten_db)?;
        limits::BAND_GAIN_DB.check("gain_db", band, self.gain_db)?;

        let d = &self.detector;
        limits::LONG_WINDOW_MS.check("detector.long_window_ms", band, d.long_window_ms)?;
        limits::SHORT_WINDOW_MS.check("detector.short_window_ms", band, d.short_window_ms)?;
        limits::BIAS.check("detector.bias", band, d.bias)?;
        limits::MAKEUP_DB.check("detector.makeup_db", band, d.makeup_db)?;

        let f = &self.filter;
        limits::LOOKAHEAD_MS.check("filter.lookahead_ms", band, f.lookahead_ms)?;
        limits::FILTER_ATTACK_MS.check("filter.attack_ms", band, f.attack_ms)?;
        limits::FILTER_RELEASE_MS.check("filter.release_ms", band, f.release_ms)?;
        limits::FILTER_THRESHOLD_DB.check("filter.threshold_db", band, f.threshold_db)?;
        limits::ZONE_DB.check("filter.zone_db", band, f.zone_db)?;
        limits::REDUCTION_DB.check("filter.reduction_db", band, f.reduction_db)?;

        let b = &self.beat;
        limits::TIME_SHIFT_MS.check("beat.time_shift_ms", band, b.time_shift_ms)?;
        limits::BEAT_ATTACK_MS.check("beat.attack_ms", band, b.attack_ms)?;
        limits::BEAT_RELEASE_MS.check("beat.release_ms", band, b.release_ms)?;
        limits::BEAT_THRESHOLD_DB.check("beat.threshold_db", band, b.threshold_db)?;
        limits::RATIO.check("beat.ratio", band, b.ratio)?;
        limits::MAX_GAIN_DB.check("beat.max_gain_db", band, b.max_gain_db)?;
        Ok(())
    }
}

/// Spectrum analysis switches
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisParams {
    pub input: bool,
    pub output: bool,
    /// Smoothing time constant of the displayed spectrum
    pub reactivity_ms: f32,
    /// Level offset applied to the displayed spectrum
    pub shift_db: f32,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            input: true,
            output: true,
            reactivity_ms: 200.0,
            shift_db: 0.0,
        }
    }
}

/// Complete parameter set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreatherParams {
    pub bands: Vec<BandParams>,
    pub input_gain_db: f32,
    pub output_gain_db: f32,
    /// Linear level of the latency-matched dry signal in the mix
    pub dry_level: f32,
    /// Linear level of the processed signal in the mix
    pub wet_level: f32,
    /// 0.0 = pure dry, 1.0 = full dry/wet mix
    pub balance: f32,
    pub bypass: bool,
    /// Independent detection per channel instead of linked
    pub stereo_split: bool,
    pub analysis: AnalysisParams,
}

/// Default split points; every other one starts enabled
pub const DEFAULT_SPLITS_HZ: [f32; MAX_BANDS - 1] =
    [40.0, 100.0, 252.0, 632.0, 1587.0, 3984.0, 10000.0];

impl Default for BreatherParams {
    fn default() -> Self {
        let mut bands = Vec::with_capacity(MAX_BANDS);
        bands.push(BandParams::new(0.0));
        for (i, &freq) in DEFAULT_SPLITS_HZ.iter().enumerate() {
            bands.push(if i % 2 == 1 {
                BandParams::new(freq)
            } else {
                BandParams::disabled(freq)
            });
        }
        Self::with_bands(bands)
    }
}

impl BreatherParams {
    /// Global defaults around a custom band list
    pub fn with_bands(bands: Vec<BandParams>) -> Self {
        Self {
            bands,
            input_gain_db: 0.0,
            output_gain_db: 0.0,
            dry_level: 0.0,
            wet_level: 1.0,
            balance: 1.0,
            bypass: false,
            stereo_split: false,
            analysis: AnalysisParams::default(),
        }
    }

    /// One full-range band
    pub fn single_band() -> Self {
        Self::with_bands(vec![BandParams::new(0.0)])
    }

    /// Evenly spread enabled bands with splits at the given frequencies
    pub fn with_splits(splits_hz: &[f32]) -> Self {
        let mut bands = vec![BandParams::new(0.0)];
        bands.extend(splits_hz.iter().map(|&f| BandParams::new(f)));
        Self::with_bands(bands)
    }

    /// Indices of bands that take part in processing, in frequency order
    pub fn active_bands(&self) -> Vec<usize> {
        self.bands
            .iter()
            .enumerate()
            .filter(|(i, band)| *i == 0 || band.enabled)
            .map(|(i, _)| i)
            .collect()
    }

    /// Check every parameter against its range and the band layout rules
    pub fn validate(&self, sample_rate: f32) -> Result<(), ParamError> {
        if self.bands.is_empty() || self.bands.len() > MAX_BANDS {
            return Err(ParamError::BandCount(self.bands.len()));
        }
        if !self.bands[0].enabled {
            return Err(ParamError::BaseBandDisabled);
        }

        for (index, band) in self.bands.iter().enumerate() {
            band.validate(index)?;
        }

        // Enabled splits must tile the spectrum in order
        let nyquist = sample_rate * 0.5;
        let mut previous = 0.0_f32;
        for index in self.active_bands().into_iter().skip(1) {
            let frequency = self.bands[index].frequency_hz;
            if frequency <= previous {
                return Err(ParamError::SplitOrder {
                    band: index,
                    frequency,
                    previous,
                });
            }
            if frequency >= nyquist {
                return Err(ParamError::SplitAboveNyquist {
                    band: index,
                    frequency,
                    nyquist,
                });
            }
            previous = frequency;
        }

        limits::IO_GAIN_DB.check("input_gain_db", None, self.input_gain_db)?;
        limits::IO_GAIN_DB.check("output_gain_db", None, self.output_gain_db)?;
        limits::MIX_LEVEL.check("dry_level", None, self.dry_level)?;
        limits::MIX_LEVEL.check("wet_level", None, self.wet_level)?;
        limits::BALANCE.check("balance", None, self.balance)?;
        limits::REACTIVITY_MS.check("analysis.reactivity_ms", None, self.analysis.reactivity_ms)?;
        limits::SPECTRUM_SHIFT_DB.check("analysis.shift_db", None, self.analysis.shift_db)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let params = BreatherParams::default();
        assert_eq!(params.bands.len(), MAX_BANDS);
        assert_eq!(params.active_bands(), vec![0, 2, 4, 6]);
        assert!(params.validate(48000.0).is_ok());
        assert_eq!(params.bands[2].frequency_hz, 100.0);
        assert_eq!(params.bands[6].frequency_hz, 3984.0);
        assert_eq!(params.bands[1].tap, ChainTap::BeatProcessor);
    }

    #[test]
    fn test_short_window_depends_on_band() {
        assert_eq!(DetectorParams::for_band(0.0).short_window_ms, 20.0);
        assert!((DetectorParams::for_band(1000.0).short_window_ms - 2.0).abs() < 1e-6);
        assert_eq!(DetectorParams::for_band(10000.0).short_window_ms, 0.5);
    }

    #[test]
    fn test_rejects_band_count() {
        let params = BreatherParams::with_bands(Vec::new());
        assert_eq!(params.validate(48000.0), Err(ParamError::BandCount(0)));

        let params = BreatherParams::with_bands(vec![BandParams::new(0.0); 9]);
        assert_eq!(params.validate(48000.0), Err(ParamError::BandCount(9)));
    }

    #[test]
    fn test_rejects_disabled_base_band() {
        let mut params = BreatherParams::single_band();
        params.bands[0].enabled = false;
        assert_eq!(params.validate(48000.0), Err(ParamError::BaseBandDisabled));
    }

    #[test]
    fn test_rejects_overlapping_splits() {
        let params = BreatherParams::with_splits(&[1000.0, 500.0]);
        assert!(matches!(
            params.validate(48000.0),
            Err(ParamError::SplitOrder { band: 2, .. })
        ));

        let params = BreatherParams::with_splits(&[1000.0, 1000.0]);
        assert!(params.validate(48000.0).is_err());
    }

    #[test]
    fn test_disabled_bands_do_not_constrain_order() {
        let mut params = BreatherParams::with_splits(&[1000.0, 500.0, 4000.0]);
        params.bands[2].enabled = false;
        assert!(params.validate(48000.0).is_ok());
        assert_eq!(params.active_bands(), vec![0, 1, 3]);
    }

    #[test]
    fn test_rejects_split_above_nyquist() {
        let params = BreatherParams::with_splits(&[5000.0]);
        assert!(params.validate(48000.0).is_ok());
        assert!(matches!(
            params.validate(8000.0),
            Err(ParamError::SplitAboveNyquist { .. })
        ));
    }

    #[test]
    fn test_rejects_out_of_range_and_nan() {
        let mut params = BreatherParams::single_band();
        params.bands[0].filter.attack_ms = 50.0;
        assert!(matches!(
            params.validate(48000.0),
            Err(ParamError::OutOfRange { .. })
        ));

        let mut params = BreatherParams::single_band();
        params.bands[0].beat.ratio = f32::NAN;
        assert!(params.validate(48000.0).is_err());

        let mut params = BreatherParams::single_band();
        params.balance = 1.5;
        assert!(params.validate(48000.0).is_err());
    }

    #[test]
    fn test_params_serialization() {
        let mut params = BreatherParams::default();
        params.bands[2].tap = ChainTap::PunchFilter;
        params.bands[4].solo = true;
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("PunchFilter"));

        let back: BreatherParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let params: BreatherParams =
            serde_json::from_str(r#"{"bands":[{"gain_db":-3.0}],"bypass":true}"#).unwrap();
        assert!(params.bypass);
        assert_eq!(params.bands.len(), 1);
        assert_eq!(params.bands[0].gain_db, -3.0);
        assert_eq!(params.bands[0].beat.ratio, 2.0);
        assert!(params.validate(48000.0).is_ok());
    }
}

//! Linear-Phase Crossover
//!
//! Splits a signal into up to [`MAX_BANDS`] bands with a cascade of
//! complementary FIR splits:
//!
//! ```text
//! input ─► split 0 ─┬─ low ──────────────────────────► align ─► band 0
//!                   └─ high ─► split 1 ─┬─ low ──────► align ─► band 1
//!                                       └─ high ─► ...          band N-1
//! ```
//!
//! Each split's high branch is `delayed input - low`, so every split is an
//! exact delay when its outputs are summed. Lower bands are delayed by the
//! latency of the splits they skip, which makes all bands leave time-aligned
//! and their sum an exact delayed copy of the input.
//!
//! # Architecture
//!
//! [`CrossoverDesign`] is the immutable coefficient set, built off the
//! real-time path. [`Crossover`] only holds signal history and is driven
//! with a borrowed design, so publishing a new design never allocates on the
//! audio thread.

use realfft::RealFftPlanner;

use crate::delay::DelayLine;
use crate::error::DspError;
use crate::fir::{
    amplitude_response, design_lowpass, taps_for_slope, FirKernel, PartitionedFir, MAX_FIR_TAPS,
};

/// Maximum number of bands the crossover can produce
pub const MAX_BANDS: usize = 8;

/// Maximum number of splits (one less than the band count)
pub const MAX_SPLITS: usize = MAX_BANDS - 1;

/// Worst-case total crossover latency in samples
pub const MAX_CROSSOVER_LATENCY: usize = MAX_SPLITS * (MAX_FIR_TAPS - 1) / 2;

/// Maximum flatten amount in dB
pub const MAX_FLATTEN_DB: f32 = 6.0;

/// Octaves the cutoff moves down per dB of flatten
const FLATTEN_OCTAVES_PER_DB: f32 = 1.0 / 12.0;

/// Requested split between two adjacent bands
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitSpec {
    /// Crossover frequency in Hz
    pub frequency: f32,
    /// Slope in dB/octave (any real value, steeper = longer filter)
    pub slope_db: f32,
    /// Flatten amount for the band below this split, in dB (0 = off)
    pub flatten_db: f32,
}

impl SplitSpec {
    pub fn new(frequency: f32, slope_db: f32) -> Self {
        Self {
            frequency,
            slope_db,
            flatten_db: 0.0,
        }
    }
}

/// One designed split
#[derive(Debug, Clone)]
pub struct SplitFilter {
    /// Nominal crossover frequency in Hz
    pub frequency: f32,
    /// Cutoff actually used by the kernel (lower than nominal when flattened)
    pub cutoff: f32,
    pub slope_db: f32,
    kernel: FirKernel,
}

impl SplitFilter {
    pub fn taps(&self) -> usize {
        self.kernel.taps().len()
    }

    /// Group delay of this split in samples
    pub fn latency(&self) -> usize {
        self.kernel.latency()
    }

    pub fn kernel(&self) -> &[f32] {
        self.kernel.taps()
    }
}

/// Immutable crossover coefficient set
#[derive(Debug, Clone)]
pub struct CrossoverDesign {
    sample_rate: f32,
    splits: Vec<SplitFilter>,
    /// Extra delay each band needs to line up with the last band
    align: Vec<usize>,
    latency: usize,
}

impl CrossoverDesign {
    /// Design the split filters for a set of crossover points
    ///
    /// Splits must be given in increasing frequency order, all below
    /// Nyquist. An empty list yields a single full-range band with no latency.
    pub fn design(sample_rate: f32, splits: &[SplitSpec]) -> Result<Self, DspError> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(DspError::InvalidSampleRate(sample_rate));
        }
        if splits.len() > MAX_SPLITS {
            return Err(DspError::TooManySplits(splits.len()));
        }

        let nyquist = sample_rate * 0.5;
        let mut previous = 0.0_f32;
        let mut filters = Vec::with_capacity(splits.len());

        for spec in splits {
            if !(spec.frequency.is_finite() && spec.frequency > 0.0 && spec.frequency < nyquist) {
                return Err(DspError::InvalidSplitFrequency {
                    frequency: spec.frequency,
                    sample_rate,
                });
            }
            if spec.frequency <= previous {
                return Err(DspError::UnorderedSplits {
                    frequency: spec.frequency,
                    previous,
                });
            }
            previous = spec.frequency;

            // Length comes from the nominal edge so flatten never moves latency
            let taps = taps_for_slope(spec.frequency, spec.slope_db, sample_rate);
            let flatten = spec.flatten_db.clamp(0.0, MAX_FLATTEN_DB);
            let cutoff = spec.frequency * 2.0_f32.powf(-flatten * FLATTEN_OCTAVES_PER_DB);

            filters.push(SplitFilter {
                frequency: spec.frequency,
                cutoff,
                slope_db: spec.slope_db,
                kernel: FirKernel::new(design_lowpass(cutoff, taps, sample_rate))?,
            });
        }

        let latency: usize = filters.iter().map(SplitFilter::latency).sum();

        // Band k has passed through splits 0..=k; it waits for the rest
        let mut align = Vec::with_capacity(filters.len() + 1);
        let mut consumed = 0;
        for filter in &filters {
            consumed += filter.latency();
            align.push(latency - consumed);
        }
        align.push(0);

        Ok(Self {
            sample_rate,
            splits: filters,
            align,
            latency,
        })
    }

    /// Trivial single-band design
    pub fn full_range(sample_rate: f32) -> Result<Self, DspError> {
        Self::design(sample_rate, &[])
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn band_count(&self) -> usize {
        self.splits.len() + 1
    }

    pub fn splits(&self) -> &[SplitFilter] {
        &self.splits
    }

    /// Total latency in samples, identical for every band
    pub fn latency(&self) -> usize {
        self.latency
    }

    /// Lower and upper edge of a band in Hz
    pub fn band_range(&self, band: usize) -> (f32, f32) {
        let low = if band == 0 { 0.0 } else { self.splits[band - 1].frequency };
        let high = self
            .splits
            .get(band)
            .map(|s| s.frequency)
            .unwrap_or(self.sample_rate * 0.5);
        (low, high)
    }

    /// Magnitude response of one band at `frequency`
    ///
    /// All bands' responses sum to 1.0 at every frequency.
    pub fn band_response(&self, band: usize, frequency: f32) -> Result<f32, DspError> {
        if band >= self.band_count() {
            return Err(DspError::InvalidBandIndex {
                index: band,
                bands: self.band_count(),
            });
        }

        let mut response = 1.0;
        for split in &self.splits[..band] {
            response *= 1.0 - amplitude_response(split.kernel(), frequency, self.sample_rate);
        }
        if let Some(split) = self.splits.get(band) {
            response *= amplitude_response(split.kernel(), frequency, self.sample_rate);
        }
        Ok(response.abs())
    }
}

/// Crossover processing state for one channel
///
/// # Real-time Safety
/// All histories, FFT plans and spectrum buffers are sized for
/// [`MAX_BANDS`] bands of [`MAX_FIR_TAPS`]-tap kernels in
/// [`Crossover::new`]. Processing allocates nothing.
pub struct Crossover {
    splits: Vec<PartitionedFir>,
    align: Vec<DelayLine>,
    /// Per-sample band values before alignment
    scratch: [f32; MAX_BANDS],
}

impl Crossover {
    pub fn new() -> Self {
        let mut planner = RealFftPlanner::new();
        Self {
            splits: (0..MAX_SPLITS).map(|_| PartitionedFir::new(&mut planner)).collect(),
            align: (0..MAX_BANDS)
                .map(|_| DelayLine::new(MAX_CROSSOVER_LATENCY))
                .collect(),
            scratch: [0.0; MAX_BANDS],
        }
    }

    /// Split one sample into `bands` (one value per band of `design`)
    #[inline]
    pub fn process_sample(&mut self, design: &CrossoverDesign, input: f32, bands: &mut [f32]) {
        let count = design.band_count();
        let mut remainder = input;
        for (k, split) in design.splits.iter().enumerate() {
            let (low, high) = self.splits[k].process(&split.kernel, remainder);
            self.scratch[k] = low;
            remainder = high;
        }
        self.scratch[count - 1] = remainder;

        for (band, out) in bands.iter_mut().enumerate().take(count) {
            let line = &mut self.align[band];
            line.set_delay(design.align[band]);
            *out = line.process(self.scratch[band]);
        }
    }

    /// Split a block into per-band buffers
    ///
    /// `bands` must hold at least `design.band_count()` buffers, each at
    /// least `input.len()` long.
    pub fn process(&mut self, design: &CrossoverDesign, input: &[f32], bands: &mut [Vec<f32>]) {
        let count = design.band_count().min(bands.len());
        let mut frame = [0.0_f32; MAX_BANDS];
        for (i, &sample) in input.iter().enumerate() {
            self.process_sample(design, sample, &mut frame[..count]);
            for (band, &value) in frame[..count].iter().enumerate() {
                bands[band][i] = value;
            }
        }
    }

    pub fn reset(&mut self) {
        self.splits.iter_mut().for_each(PartitionedFir::reset);
        self.align.iter_mut().for_each(DelayLine::clear);
        self.scratch = [0.0; MAX_BANDS];
    }
}

impl Default for Crossover {
    fn default() -> Self {
        Self::new()
    }
}

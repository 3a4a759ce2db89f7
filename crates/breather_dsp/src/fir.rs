//! Linear-Phase FIR Design
//!
//! Windowed-sinc low-pass kernels for the crossover splits. Every kernel is
//! odd-length and symmetric, so its group delay is exactly `(taps - 1) / 2`
//! samples at all frequencies and its exact complement is
//! `delayed input - low-pass output`.
//!
//! # Slope Mapping
//!
//! Slope (dB/octave) is a free parameter, not a multiple of 6. It sets the
//! width of the transition band: the response is expected to fall by
//! [`STOPBAND_DB`] over `STOPBAND_DB / slope` octaves, centred geometrically
//! on the cutoff. The Blackman-windowed sinc needs about
//! [`BLACKMAN_WIDTH_FACTOR`]` * fs / transition_hz` taps for that transition,
//! so steeper slopes give longer filters and more latency.
//!
//! # Convolution
//!
//! Kernels reach thousands of taps, so [`PartitionedFir`] splits each one
//! into [`FIR_BLOCK`]-sample partitions. The first runs in the time domain;
//! the rest are applied by overlap-save FFT convolution once per block.
//! No latency is added on top of the kernel's group delay.

use std::f64::consts::PI;
use std::sync::Arc;

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use crate::error::DspError;

/// Attenuation the transition band is sized to reach
pub const STOPBAND_DB: f32 = 60.0;

/// Transition width (in units of fs / taps) of a Blackman window
pub const BLACKMAN_WIDTH_FACTOR: f32 = 5.5;

/// Shortest kernel a split will use
pub const MIN_FIR_TAPS: usize = 15;

/// Longest kernel a split will use (caps latency for very low, very steep splits)
pub const MAX_FIR_TAPS: usize = 4095;

/// Partition length of the split convolver
pub const FIR_BLOCK: usize = 128;

/// Partitions needed for the longest kernel
pub const MAX_PARTITIONS: usize = (MAX_FIR_TAPS + FIR_BLOCK - 1) / FIR_BLOCK;

const FFT_LEN: usize = FIR_BLOCK * 2;

const BINS: usize = FIR_BLOCK + 1;

/// Input samples kept per split (covers the group delay and one FFT frame)
const HISTORY: usize = MAX_FIR_TAPS;

/// Slopes below this are treated as this value
const MIN_SLOPE_DB: f32 = 3.0;

/// Widest transition band, in octaves
const MAX_TRANSITION_OCTAVES: f32 = 4.0;

/// Number of taps needed for a split at `frequency` with the given slope
///
/// Always odd and within [`MIN_FIR_TAPS`]..=[`MAX_FIR_TAPS`].
pub fn taps_for_slope(frequency: f32, slope_db: f32, sample_rate: f32) -> usize {
    let nyquist = sample_rate * 0.5;
    let octaves = (STOPBAND_DB / slope_db.max(MIN_SLOPE_DB)).min(MAX_TRANSITION_OCTAVES);
    let half = 2.0_f32.powf(octaves * 0.5);
    let upper = (frequency * half).min(nyquist);
    let lower = frequency / half;
    let transition = (upper - lower).max(f32::EPSILON);

    let taps = (BLACKMAN_WIDTH_FACTOR * sample_rate / transition).ceil();
    let taps = if taps.is_finite() {
        taps.min(MAX_FIR_TAPS as f32) as usize
    } else {
        MAX_FIR_TAPS
    };
    let taps = taps.clamp(MIN_FIR_TAPS, MAX_FIR_TAPS);
    taps | 1
}

#[inline]
fn blackman(n: usize, len: usize) -> f64 {
    if len <= 1 {
        return 1.0;
    }
    let x = 2.0 * PI * n as f64 / (len - 1) as f64;
    0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
}

/// Design a Blackman-windowed sinc low-pass with unity DC gain
///
/// `taps` must be odd; even values are bumped to the next odd length.
pub fn design_lowpass(cutoff: f32, taps: usize, sample_rate: f32) -> Vec<f32> {
    let taps = taps.max(1) | 1;
    let center = (taps / 2) as f64;
    // Normalized cutoff in cycles per sample
    let fc = (cutoff as f64 / sample_rate as f64).clamp(0.0, 0.5);

    let raw: Vec<f64> = (0..taps)
        .map(|n| {
            let m = n as f64 - center;
            let sinc = if m == 0.0 {
                2.0 * fc
            } else {
                (2.0 * PI * fc * m).sin() / (PI * m)
            };
            sinc * blackman(n, taps)
        })
        .collect();

    let dc: f64 = raw.iter().sum();
    let scale = if dc.abs() > f64::EPSILON { 1.0 / dc } else { 0.0 };
    raw.into_iter().map(|h| (h * scale) as f32).collect()
}

/// Zero-phase amplitude response of a symmetric kernel at `frequency`
///
/// For a linear-phase kernel this is the real amplitude once the pure delay
/// is factored out, so complementary kernels sum to exactly 1.0.
pub fn amplitude_response(kernel: &[f32], frequency: f32, sample_rate: f32) -> f32 {
    let center = (kernel.len() / 2) as f64;
    let w = 2.0 * PI * frequency as f64 / sample_rate as f64;
    kernel
        .iter()
        .enumerate()
        .map(|(n, &h)| h as f64 * (w * (n as f64 - center)).cos())
        .sum::<f64>() as f32
}

/// Kernel ready for partitioned convolution
///
/// The first [`FIR_BLOCK`] taps run in the time domain; every later
/// partition is stored as a spectrum and applied by FFT once per block.
#[derive(Debug, Clone)]
pub struct FirKernel {
    taps: Vec<f32>,
    /// Spectra of partitions 1.., `BINS` values each
    spectra: Vec<Complex<f32>>,
}

impl FirKernel {
    pub fn new(taps: Vec<f32>) -> Result<Self, DspError> {
        if taps.len() > MAX_FIR_TAPS {
            return Err(DspError::KernelTooLong(taps.len()));
        }

        let partitions = (taps.len() + FIR_BLOCK - 1) / FIR_BLOCK;
        let mut spectra = vec![Complex::new(0.0, 0.0); partitions.saturating_sub(1) * BINS];
        if !spectra.is_empty() {
            let forward = RealFftPlanner::<f32>::new().plan_fft_forward(FFT_LEN);
            let mut time = forward.make_input_vec();
            for (p, spectrum) in spectra.chunks_exact_mut(BINS).enumerate() {
                let start = (p + 1) * FIR_BLOCK;
                let end = (start + FIR_BLOCK).min(taps.len());
                time.fill(0.0);
                time[..end - start].copy_from_slice(&taps[start..end]);
                forward
                    .process(&mut time, spectrum)
                    .map_err(|e| DspError::Fft(e.to_string()))?;
            }
        }

        Ok(Self { taps, spectra })
    }

    pub fn taps(&self) -> &[f32] {
        &self.taps
    }

    /// Group delay in samples
    pub fn latency(&self) -> usize {
        self.taps.len().saturating_sub(1) / 2
    }

    fn tail_partitions(&self) -> usize {
        self.spectra.len() / BINS
    }

    fn tail_spectrum(&self, index: usize) -> &[Complex<f32>] {
        &self.spectra[index * BINS..(index + 1) * BINS]
    }
}

/// Zero-latency partitioned convolver for one crossover split
///
/// Uniformly partitioned overlap-save: partition 0 is convolved directly
/// per sample, partitions 1.. only ever touch completed input blocks, so
/// their sum for the coming block is computed by FFT at each block start.
/// The output has no delay beyond the kernel's own group delay.
///
/// History and spectrum buffers are sized for [`MAX_FIR_TAPS`], so
/// switching kernels never allocates and keeps the signal history. A new
/// kernel's later partitions take effect at the next block start.
pub struct PartitionedFir {
    /// Samples written twice so the newest `HISTORY` are always contiguous
    history: Vec<f32>,
    pos: usize,
    /// Samples processed in the current block
    fill: usize,
    /// Spectra of past input blocks, a ring of `MAX_PARTITIONS` slots
    inputs: Vec<Complex<f32>>,
    newest: usize,
    /// Output of partitions 1.. for the current block
    tail: Vec<f32>,
    time: Vec<f32>,
    accum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
}

impl PartitionedFir {
    pub fn new(planner: &mut RealFftPlanner<f32>) -> Self {
        let forward = planner.plan_fft_forward(FFT_LEN);
        let inverse = planner.plan_fft_inverse(FFT_LEN);
        let scratch = forward.get_scratch_len().max(inverse.get_scratch_len());
        Self {
            history: vec![0.0; HISTORY * 2],
            pos: 0,
            fill: 0,
            inputs: vec![Complex::new(0.0, 0.0); MAX_PARTITIONS * BINS],
            newest: 0,
            tail: vec![0.0; FIR_BLOCK],
            time: vec![0.0; FFT_LEN],
            accum: vec![Complex::new(0.0, 0.0); BINS],
            scratch: vec![Complex::new(0.0, 0.0); scratch],
            forward,
            inverse,
        }
    }

    /// Push one sample and return `(low, high)` for the given kernel
    ///
    /// `low` is the kernel output, `high` is the input delayed by the kernel's
    /// group delay minus `low`.
    #[inline]
    pub fn process(&mut self, kernel: &FirKernel, input: f32) -> (f32, f32) {
        if self.fill == 0 {
            self.start_block(kernel);
        }

        self.history[self.pos] = input;
        self.history[self.pos + HISTORY] = input;
        let newest = self.pos + HISTORY;
        self.pos = (self.pos + 1) % HISTORY;

        let taps = kernel.taps();
        let head = taps.len().min(FIR_BLOCK);
        let window = &self.history[newest + 1 - head..=newest];
        let direct: f32 = taps[..head]
            .iter()
            .zip(window.iter().rev())
            .map(|(h, x)| h * x)
            .sum();

        let low = direct + self.tail[self.fill];
        self.fill = (self.fill + 1) % FIR_BLOCK;

        let delayed = self.history[newest - kernel.latency()];
        (low, delayed - low)
    }

    /// Transform the block just completed and sum partitions 1.. for the next one
    fn start_block(&mut self, kernel: &FirKernel) {
        let last = (self.pos + HISTORY - 1) % HISTORY + HISTORY;
        self.time
            .copy_from_slice(&self.history[last + 1 - FFT_LEN..=last]);

        self.newest = (self.newest + 1) % MAX_PARTITIONS;
        let slot = self.newest * BINS;
        if self
            .forward
            .process_with_scratch(&mut self.time, &mut self.inputs[slot..slot + BINS], &mut self.scratch)
            .is_err()
        {
            self.inputs[slot..slot + BINS].fill(Complex::new(0.0, 0.0));
        }

        let partitions = kernel.tail_partitions();
        if partitions == 0 {
            self.tail.fill(0.0);
            return;
        }

        // Partition p + 1 meets the input block p + 1 blocks back
        self.accum.fill(Complex::new(0.0, 0.0));
        for p in 0..partitions {
            let start = ((self.newest + MAX_PARTITIONS - p) % MAX_PARTITIONS) * BINS;
            let input = &self.inputs[start..start + BINS];
            for ((acc, x), h) in self.accum.iter_mut().zip(input).zip(kernel.tail_spectrum(p)) {
                *acc += x * h;
            }
        }
        self.accum[0].im = 0.0;
        self.accum[BINS - 1].im = 0.0;

        if self
            .inverse
            .process_with_scratch(&mut self.accum, &mut self.time, &mut self.scratch)
            .is_err()
        {
            self.tail.fill(0.0);
            return;
        }
        let norm = 1.0 / FFT_LEN as f32;
        for (out, &value) in self.tail.iter_mut().zip(&self.time[FIR_BLOCK..]) {
            *out = value * norm;
        }
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.pos = 0;
        self.fill = 0;
        self.inputs.fill(Complex::new(0.0, 0.0));
        self.newest = 0;
        self.tail.fill(0.0);
    }
}

//! Breather DSP - Digital Signal Processing Module
//!
//! This crate provides the signal processing stages of the Breather
//! transient shaper:
//! - Linear-phase FIR crossover (up to 8 bands, any slope, exact reconstruction)
//! - Windowed RMS envelopes with ramped window changes
//! - Punch detector, lookahead punch filter and beat processor
//! - FFT spectrum analyzer for pre/post snapshots
//! - Zero-allocation processing path
//!
//! # Architecture
//!
//! Designs (FIR kernels, sample-domain settings) are plain values built off
//! the audio thread. Processing state only holds signal history and reads
//! the active design by reference, so a new design is swapped in between
//! blocks without allocating.

mod beat_processor;
mod crossover;
mod delay;
mod envelope;
mod error;
mod fft;
mod fir;
mod processor;
mod punch_detector;
mod punch_filter;
mod units;

pub use beat_processor::{amplification_db, BeatProcessor, BeatProcessorSettings, MAX_TIME_SHIFT_MS};
pub use crossover::{
    Crossover, CrossoverDesign, SplitFilter, SplitSpec, MAX_BANDS, MAX_CROSSOVER_LATENCY,
    MAX_FLATTEN_DB, MAX_SPLITS,
};
pub use delay::DelayLine;
pub use envelope::{follow, RmsEnvelope};
pub use error::DspError;
pub use fft::{SpectrumAnalyzer, FFT_MESH_POINTS, FFT_SIZE};
pub use fir::{taps_for_slope, MAX_FIR_TAPS, MIN_FIR_TAPS};
pub use processor::{AudioProcessor, ProcessContext};
pub use punch_detector::{
    punch_signal, PunchDetector, PunchDetectorSettings, MAX_LONG_WINDOW_MS, MAX_SHORT_WINDOW_MS,
};
pub use punch_filter::{
    zone_reduction_db, PunchFilter, PunchFilterFrame, PunchFilterSettings, MAX_LOOKAHEAD_MS,
};
pub use units::{
    db_to_gain, gain_to_db, millis_to_samples, time_constant_coeff, GainRamp, SILENCE_DB,
};

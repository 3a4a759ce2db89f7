//! DSP Error Types

use thiserror::Error;

/// Errors that can occur during DSP operations
#[derive(Error, Debug)]
pub enum DspError {
    #[error("Sample rate must be positive, got {0}")]
    InvalidSampleRate(f32),

    #[error("Too many crossover splits: {0} (must be 0-7)")]
    TooManySplits(usize),

    #[error("Invalid split frequency {frequency}Hz at sample rate {sample_rate}Hz")]
    InvalidSplitFrequency { frequency: f32, sample_rate: f32 },

    #[error("Split frequencies must increase: {frequency}Hz follows {previous}Hz")]
    UnorderedSplits { frequency: f32, previous: f32 },

    #[error("Band index {index} out of range for {bands} bands")]
    InvalidBandIndex { index: usize, bands: usize },

    #[error("FIR kernel of {0} taps exceeds the supported length")]
    KernelTooLong(usize),

    #[error("FFT error: {0}")]
    Fft(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DspError::TooManySplits(9);
        assert!(err.to_string().contains('9'));

        let err = DspError::InvalidSplitFrequency {
            frequency: 30000.0,
            sample_rate: 48000.0,
        };
        assert!(err.to_string().contains("30000"));

        let err = DspError::UnorderedSplits {
            frequency: 100.0,
            previous: 200.0,
        };
        assert!(err.to_string().contains("200"));
    }
}

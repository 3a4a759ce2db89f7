//! Engine Error Types

use thiserror::Error;

/// A parameter set that failed validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamError {
    #[error("Invalid band count: {0} (must be 1-8)")]
    BandCount(usize),

    #[error("Band 0 must always be enabled")]
    BaseBandDisabled,

    #[error("{name} out of range: {value} (must be {min} to {max})")]
    OutOfRange {
        name: String,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("Band {band} split at {frequency}Hz must be above the previous split at {previous}Hz")]
    SplitOrder {
        band: usize,
        frequency: f32,
        previous: f32,
    },

    #[error("Band {band} split at {frequency}Hz must be below Nyquist ({nyquist}Hz)")]
    SplitAboveNyquist {
        band: usize,
        frequency: f32,
        nyquist: f32,
    },
}

/// Errors that can occur in the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(#[from] ParamError),

    #[error("Stream configuration error: {0}")]
    ConfigError(String),

    #[error("DSP error: {0}")]
    DspError(#[from] breather_dsp::DspError),

    #[error("Snapshot queue full - audio thread has not consumed pending updates")]
    PublishQueueFull,

    #[error("Failed to spawn control thread: {0}")]
    ThreadSpawn(String),

    #[error("Channel send error - receiver dropped")]
    ChannelSendError,
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::ConfigError("bad rate".into());
        assert!(err.to_string().contains("bad rate"));

        let err = ParamError::OutOfRange {
            name: "band 1 gain_db".into(),
            value: 40.0,
            min: -60.0,
            max: 12.0,
        };
        let text = err.to_string();
        assert!(text.contains("band 1 gain_db"));
        assert!(text.contains("40"));
    }

    #[test]
    fn test_error_from_param() {
        let engine_err: EngineError = ParamError::BaseBandDisabled.into();
        assert!(matches!(engine_err, EngineError::InvalidParams(_)));
    }

    #[test]
    fn test_error_from_dsp() {
        let dsp_err = breather_dsp::DspError::TooManySplits(9);
        let engine_err: EngineError = dsp_err.into();
        assert!(matches!(engine_err, EngineError::DspError(_)));
    }
}

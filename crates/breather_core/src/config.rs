//! Engine and Stream Configuration

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Maximum channel count the engine processes
pub const MAX_CHANNELS: usize = 2;

/// Audio stream configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sample rate in Hz (e.g., 44100, 48000, 96000)
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Host buffer size in frames (informational; processing is chunked internally)
    pub buffer_size: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            buffer_size: 512,
        }
    }
}

impl StreamConfig {
    /// Calculate host buffer latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Convert a latency in samples to milliseconds at this rate
    pub fn samples_to_ms(&self, samples: usize) -> f32 {
        samples as f32 * 1000.0 / self.sample_rate as f32
    }

    /// Validate configuration
    pub fn validate(&self) -> EngineResult<()> {
        if self.sample_rate < 8000 || self.sample_rate > 192000 {
            return Err(EngineError::ConfigError(format!(
                "Invalid sample rate: {}",
                self.sample_rate
            )));
        }
        if self.channels == 0 || self.channels as usize > MAX_CHANNELS {
            return Err(EngineError::ConfigError(format!(
                "Invalid channel count: {}",
                self.channels
            )));
        }
        if self.buffer_size < 32 || self.buffer_size > 8192 {
            return Err(EngineError::ConfigError(format!(
                "Invalid buffer size: {}",
                self.buffer_size
            )));
        }
        Ok(())
    }
}

/// Overall engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Stream configuration
    pub stream: StreamConfig,

    /// Snapshots that may wait for the audio thread at once
    pub snapshot_queue: usize,

    /// Telemetry frames buffered between control polls
    pub telemetry_capacity: usize,

    /// Spectrum snapshot rate
    pub spectrum_fps: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            snapshot_queue: 4,
            telemetry_capacity: 4096,
            spectrum_fps: 30,
        }
    }
}

impl EngineConfig {
    /// Create config for a given stream
    pub fn with_stream(stream: StreamConfig) -> Self {
        Self {
            stream,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.stream.validate()?;
        if self.snapshot_queue == 0 {
            return Err(EngineError::ConfigError("Snapshot queue must hold at least one update".into()));
        }
        if self.telemetry_capacity == 0 {
            return Err(EngineError::ConfigError("Telemetry capacity must be positive".into()));
        }
        if self.spectrum_fps == 0 || self.spectrum_fps > 120 {
            return Err(EngineError::ConfigError(format!(
                "Invalid spectrum rate: {}",
                self.spectrum_fps
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StreamConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.channels, 2);
        assert_eq!(config.buffer_size, 512);
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_latency_calculation() {
        let config = StreamConfig {
            sample_rate: 48000,
            channels: 2,
            buffer_size: 480, // Exactly 10ms at 48kHz
        };
        assert!((config.latency_ms() - 10.0).abs() < 0.01);
        assert!((config.samples_to_ms(96) - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_validation() {
        assert!(StreamConfig::default().validate().is_ok());

        let bad_rate = StreamConfig {
            sample_rate: 1000,
            ..Default::default()
        };
        assert!(bad_rate.validate().is_err());

        let too_many_channels = StreamConfig {
            channels: 6,
            ..Default::default()
        };
        assert!(too_many_channels.validate().is_err());

        let tiny_buffer = StreamConfig {
            buffer_size: 8,
            ..Default::default()
        };
        assert!(tiny_buffer.validate().is_err());

        let mut config = EngineConfig::default();
        config.snapshot_queue = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = EngineConfig::with_stream(StreamConfig {
            sample_rate: 96000,
            channels: 1,
            buffer_size: 256,
        });
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stream, config.stream);
        assert_eq!(back.spectrum_fps, 30);
    }
}

//! Message Types for Thread Communication
//!
//! Commands flow from UI thread -> control thread
//! Events flow from control thread -> UI thread

use serde::{Deserialize, Serialize};

use crate::config::StreamConfig;
use crate::params::{BreatherParams, ChainTap};
use crate::telemetry::GraphStore;

/// Commands sent from the UI thread to the engine
#[derive(Debug, Clone)]
pub enum Command {
    /// Replace the whole parameter set
    ApplyParams(Box<BreatherParams>),

    /// Set one band's output gain
    SetBandGain { band: usize, gain_db: f32 },

    /// Select which signal a band contributes
    SetBandTap { band: usize, tap: ChainTap },

    SetBandSolo { band: usize, solo: bool },

    SetBandMute { band: usize, mute: bool },

    /// Crossfade to the latency-matched dry signal
    SetBypass(bool),

    /// Change sample rate / channel count (reallocates pipeline state)
    SetStreamConfig(StreamConfig),

    /// Request current state (triggers StateUpdate event)
    RequestState,

    /// Shutdown the engine
    Shutdown,
}

/// Which signal a spectrum was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpectrumSource {
    Input,
    Output,
}

/// Events sent from the engine to the UI thread
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    /// A snapshot was published
    ParamsApplied { version: u64, latency: usize },

    /// Error occurred
    Error { message: String },

    /// Channel peak levels (linear), one entry per channel
    LevelUpdate { input: Vec<f32>, output: Vec<f32> },

    /// Per-band graph histories
    GraphUpdate(Box<GraphStore>),

    /// Spectrum in dB, log-spaced bins
    SpectrumUpdate { source: SpectrumSource, bins: Vec<f32> },

    /// Current state snapshot
    StateUpdate {
        version: u64,
        active_version: u64,
        latency: usize,
        latency_ms: f32,
        params: Box<BreatherParams>,
    },
}

impl Event {
    /// Create an error event from any error type
    pub fn error<E: std::fmt::Display>(err: E) -> Self {
        Event::Error {
            message: err.to_string(),
        }
    }
}

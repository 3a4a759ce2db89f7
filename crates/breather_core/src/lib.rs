//! Breather Core - Punch Engine
//!
//! This crate turns the DSP stages of `breather_dsp` into a complete
//! multiband transient shaper:
//! - Validated parameter model and versioned, immutable snapshots
//! - Real-time block processor with lock-free snapshot swaps
//! - Latency planning so every band, the dry path and bypass line up
//! - Control thread with command/event messaging
//! - Lock-free telemetry: meters, per-band graphs and spectra
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        UI Thread                            │
//! │     ──commands──▶ BreatherEngine ◀──events──                │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ crossbeam-channel
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Control Thread                          │
//! │   Controller: validate ─▶ design crossover ─▶ Snapshot      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ rtrb (snapshots / retired / telemetry)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Audio Thread                           │
//! │   input gain ─▶ crossover ─▶ bands ─▶ sum ─▶ mix ─▶ bypass  │
//! │              (Zero allocation in this path)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod band;
mod breather;
mod config;
mod controller;
mod engine;
mod error;
mod message;
mod mixer;
mod params;
mod pipeline;
mod snapshot;
mod telemetry;

pub use breather::BreatherProcessor;
pub use config::{EngineConfig, StreamConfig, MAX_CHANNELS};
pub use controller::{BandCurve, Controller, TelemetryUpdate, CURVE_MESH_POINTS};
pub use engine::BreatherEngine;
pub use error::{EngineError, EngineResult, ParamError};
pub use message::{Command, Event, SpectrumSource};
pub use params::{
    limits, AnalysisParams, BandParams, BeatParams, BreatherParams, ChainTap, DetectorParams,
    FilterParams, ParamRange, DEFAULT_SPLITS_HZ,
};
pub use pipeline::{PipelineState, MAX_CHUNK};
pub use snapshot::{
    BandSettings, LatencyPlan, MixSettings, Snapshot, GRAPH_HISTORY_SECONDS, TIME_MESH_POINTS,
};
pub use telemetry::{BandGraphs, GraphHistory, GraphStore, SharedMeters, TelemetryFrame};

// Re-export DSP types for convenience
pub use breather_dsp::{AudioProcessor, CrossoverDesign, ProcessContext, MAX_BANDS};

//! Audio Processor Trait
//!
//! Interface a host adapter drives. Implemented by the engine's
//! real-time processor so it can sit behind any callback that hands out
//! interleaved buffers.

/// Context passed to processors containing stream metadata
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext {
    pub sample_rate: f32,
    pub channels: usize,
    pub buffer_size: usize,
}

impl ProcessContext {
    pub fn new(sample_rate: f32, channels: usize, buffer_size: usize) -> Self {
        Self {
            sample_rate,
            channels,
            buffer_size,
        }
    }
}

/// Trait for real-time audio processors
///
/// # Real-time Safety Contract
///
/// Implementors MUST follow these rules in `process()`:
/// - NO heap allocations (no Vec::push, no Box::new, no String)
/// - NO heap deallocations (retired state is handed back to the control side)
/// - NO syscalls (no file I/O, no network, no mutex locks)
/// - Constant or O(n) time complexity where n = buffer size
///
/// Violating these rules causes audio dropouts ("glitches").
pub trait AudioProcessor: Send {
    /// Process audio buffer in-place
    ///
    /// Buffer format is interleaved: [L0, R0, L1, R1, ...]
    fn process(&mut self, buffer: &mut [f32], context: &ProcessContext);

    /// Reset internal state (delay lines, envelopes, etc.)
    fn reset(&mut self);

    /// Human-readable name for debugging/UI
    fn name(&self) -> &'static str;

    /// Latency this processor adds, in samples
    fn latency(&self) -> usize {
        0
    }

    /// Whether this processor is currently enabled
    fn is_enabled(&self) -> bool {
        true
    }
}

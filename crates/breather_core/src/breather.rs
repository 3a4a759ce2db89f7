//! Real-time Block Processor
//!
//! [`BreatherProcessor`] is the only part of the engine that runs on the
//! audio thread. It owns the active [`Snapshot`] and the [`PipelineState`]
//! and talks to the control side through three lock-free rings:
//!
//! ```text
//!  Controller ── Box<Snapshot> ──► inbox ──┐
//!                                          ▼
//!                                BreatherProcessor::process()
//!                                          │
//!  Controller ◄── Retired ── retire ◄──────┤  (old snapshot / old state)
//!  Controller ◄── frames, samples ◄────────┘  (telemetry)
//! ```
//!
//! New snapshots are picked up only at block boundaries. Replaced boxes
//! are handed back through the retire ring so nothing is freed on the
//! audio thread; if the retire ring lacks room the swap waits a block.

use rtrb::{Consumer, Producer};

use breather_dsp::{AudioProcessor, ProcessContext};

use crate::pipeline::{PipelineState, MAX_CHUNK};
use crate::snapshot::Snapshot;
use crate::telemetry::TelemetrySink;

/// Boxes handed back to the control side for dropping
pub(crate) enum Retired {
    Snapshot(Box<Snapshot>),
    State(Box<PipelineState>),
}

/// Real-time multiband punch processor
///
/// Created by [`Controller::new`](crate::Controller::new) and moved into
/// the host's audio callback.
pub struct BreatherProcessor {
    snapshot: Box<Snapshot>,
    state: Box<PipelineState>,
    inbox: Consumer<Box<Snapshot>>,
    retire: Producer<Retired>,
    sink: TelemetrySink,
}

impl BreatherProcessor {
    pub(crate) fn new(
        snapshot: Box<Snapshot>,
        mut state: Box<PipelineState>,
        inbox: Consumer<Box<Snapshot>>,
        retire: Producer<Retired>,
        sink: TelemetrySink,
    ) -> Self {
        state.configure(&snapshot);
        sink.meters.set_active(snapshot.version, snapshot.latency.total);
        Self {
            snapshot,
            state,
            inbox,
            retire,
            sink,
        }
    }

    /// Install the newest pending snapshot, if any
    fn install_pending(&mut self) {
        let mut installed = false;

        // One install retires at most a snapshot and a state
        while self.retire.slots() >= 2 {
            let Ok(mut next) = self.inbox.pop() else {
                break;
            };
            if let Some(state) = next.state.take() {
                let old = std::mem::replace(&mut self.state, state);
                let _ = self.retire.push(Retired::State(old));
            }
            let old = std::mem::replace(&mut self.snapshot, next);
            let _ = self.retire.push(Retired::Snapshot(old));
            installed = true;
        }

        if installed {
            self.state.configure(&self.snapshot);
            self.sink
                .meters
                .set_active(self.snapshot.version, self.snapshot.latency.total);
        }
    }

    /// Process planar audio
    ///
    /// Missing input channels read as silence; output channels beyond the
    /// configured channel count are zeroed. The block length is the
    /// shortest of all given buffers.
    pub fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) {
        self.install_pending();

        let frames = inputs
            .iter()
            .map(|c| c.len())
            .chain(outputs.iter().map(|c| c.len()))
            .min()
            .unwrap_or(0);
        let channels = self.state.channels();

        self.state.begin_block();
        let mut offset = 0;
        while offset < frames {
            let n = (frames - offset).min(MAX_CHUNK);
            for ch in 0..channels {
                let staging = &mut self.state.io_in[ch][..n];
                match inputs.get(ch) {
                    Some(input) => staging.copy_from_slice(&input[offset..offset + n]),
                    None => staging.fill(0.0),
                }
            }

            self.state.process_chunk(&self.snapshot, n, &mut self.sink);

            for (ch, output) in outputs.iter_mut().enumerate() {
                let dst = &mut output[offset..offset + n];
                match self.state.io_out.get(ch) {
                    Some(rendered) => dst.copy_from_slice(&rendered[..n]),
                    None => dst.fill(0.0),
                }
            }
            offset += n;
        }
        self.state.end_block(&self.sink);
    }

    /// Process interleaved audio in place
    pub fn process_interleaved(&mut self, buffer: &mut [f32], channels: usize) {
        self.install_pending();
        if channels == 0 {
            return;
        }

        let frames = buffer.len() / channels;
        let active = self.state.channels().min(channels);

        self.state.begin_block();
        let mut offset = 0;
        while offset < frames {
            let n = (frames - offset).min(MAX_CHUNK);
            let block = &mut buffer[offset * channels..(offset + n) * channels];

            for ch in 0..self.state.channels() {
                let staging = &mut self.state.io_in[ch][..n];
                if ch < active {
                    for (i, s) in staging.iter_mut().enumerate() {
                        *s = block[i * channels + ch];
                    }
                } else {
                    staging.fill(0.0);
                }
            }

            self.state.process_chunk(&self.snapshot, n, &mut self.sink);

            for (i, frame) in block.chunks_exact_mut(channels).enumerate() {
                for (ch, sample) in frame.iter_mut().enumerate() {
                    *sample = if ch < active { self.state.io_out[ch][i] } else { 0.0 };
                }
            }
            offset += n;
        }
        self.state.end_block(&self.sink);
    }

    /// Latency of the active configuration in samples
    pub fn latency(&self) -> usize {
        self.snapshot.latency.total
    }

    /// Version of the active snapshot
    pub fn active_version(&self) -> u64 {
        self.snapshot.version
    }

    /// The active snapshot
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

impl AudioProcessor for BreatherProcessor {
    fn process(&mut self, buffer: &mut [f32], context: &ProcessContext) {
        self.process_interleaved(buffer, context.channels);
    }

    fn reset(&mut self) {
        self.state.reset();
    }

    fn name(&self) -> &'static str {
        "Breather"
    }

    fn latency(&self) -> usize {
        self.snapshot.latency.total
    }

    fn is_enabled(&self) -> bool {
        !self.snapshot.mix.bypass
    }
}

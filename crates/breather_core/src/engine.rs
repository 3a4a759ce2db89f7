//! Breather Engine - Main Entry Point
//!
//! [`BreatherEngine`] runs a [`Controller`] on a background control thread
//! and exposes it through commands and events, so a UI never blocks on
//! crossover design or telemetry work.
//!
//! # Architecture
//!
//! ```text
//!   UI thread                control thread               audio thread
//!  ───────────              ────────────────             ──────────────
//!  BreatherEngine ─Command─► Controller ──Box<Snapshot>─► BreatherProcessor
//!        ▲                   │  validate + design           │
//!        └──────Event────────┤  collect garbage  ◄─Retired──┤
//!                            └─ graphs, spectra  ◄─telemetry┘
//! ```
//!
//! The processor half is returned to the caller, who moves it into the
//! host's audio callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::breather::BreatherProcessor;
use crate::config::EngineConfig;
use crate::controller::Controller;
use crate::error::{EngineError, EngineResult, ParamError};
use crate::message::{Command, Event, SpectrumSource};
use crate::params::{BandParams, BreatherParams, ChainTap};
use crate::telemetry::{GraphStore, SharedMeters};

/// Poll interval of the control loop (~60 Hz)
const POLL_INTERVAL: Duration = Duration::from_millis(16);

/// Minimum spacing of graph events
const GRAPH_INTERVAL: Duration = Duration::from_millis(50);

/// Handle to the background control thread
pub struct BreatherEngine {
    /// Channel for sending commands to the control thread
    command_sender: Sender<Command>,

    /// Channel for receiving events from the control thread
    event_receiver: Receiver<Event>,

    control_thread: Option<JoinHandle<()>>,

    /// Flag to signal shutdown
    shutdown_flag: Arc<AtomicBool>,

    config: EngineConfig,

    meters: Arc<SharedMeters>,
    graphs: Arc<RwLock<GraphStore>>,
}

impl BreatherEngine {
    /// Validate the configuration, start the control thread and return the
    /// processor for the audio callback
    pub fn new(
        config: EngineConfig,
        params: BreatherParams,
    ) -> EngineResult<(Self, BreatherProcessor)> {
        let (controller, processor) = Controller::new(config.clone(), params)?;
        let meters = controller.meters();
        let graphs = controller.graphs();

        let (command_sender, command_receiver) = bounded::<Command>(32);
        let (event_sender, event_receiver) = unbounded::<Event>();
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown_flag);

        let control_thread = thread::Builder::new()
            .name("breather-control".into())
            .spawn(move || {
                Self::control_thread_main(controller, command_receiver, event_sender, shutdown_clone);
            })
            .map_err(|e| EngineError::ThreadSpawn(e.to_string()))?;

        Ok((
            Self {
                command_sender,
                event_receiver,
                control_thread: Some(control_thread),
                shutdown_flag,
                config,
                meters,
                graphs,
            },
            processor,
        ))
    }

    /// Replace the whole parameter set
    pub fn apply_params(&self, params: BreatherParams) -> EngineResult<()> {
        self.send_command(Command::ApplyParams(Box::new(params)))
    }

    pub fn set_band_gain(&self, band: usize, gain_db: f32) -> EngineResult<()> {
        self.send_command(Command::SetBandGain { band, gain_db })
    }

    pub fn set_band_tap(&self, band: usize, tap: ChainTap) -> EngineResult<()> {
        self.send_command(Command::SetBandTap { band, tap })
    }

    pub fn set_band_solo(&self, band: usize, solo: bool) -> EngineResult<()> {
        self.send_command(Command::SetBandSolo { band, solo })
    }

    pub fn set_band_mute(&self, band: usize, mute: bool) -> EngineResult<()> {
        self.send_command(Command::SetBandMute { band, mute })
    }

    pub fn set_bypass(&self, bypassed: bool) -> EngineResult<()> {
        self.send_command(Command::SetBypass(bypassed))
    }

    /// Change the stream configuration (new pipeline state is allocated)
    pub fn set_stream_config(&self, stream: crate::config::StreamConfig) -> EngineResult<()> {
        self.send_command(Command::SetStreamConfig(stream))
    }

    /// Request state update
    pub fn request_state(&self) -> EngineResult<()> {
        self.send_command(Command::RequestState)
    }

    /// Get next event (non-blocking)
    pub fn poll_event(&self) -> Option<Event> {
        self.event_receiver.try_recv().ok()
    }

    /// Get next event (blocking)
    pub fn wait_event(&self) -> Option<Event> {
        self.event_receiver.recv().ok()
    }

    /// Get next event, giving up after `timeout`
    pub fn wait_event_timeout(&self, timeout: Duration) -> Option<Event> {
        self.event_receiver.recv_timeout(timeout).ok()
    }

    /// Get the initial configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Lock-free meters shared with the audio thread
    pub fn meters(&self) -> Arc<SharedMeters> {
        Arc::clone(&self.meters)
    }

    /// Graph histories maintained by the control thread
    pub fn graphs(&self) -> Arc<RwLock<GraphStore>> {
        Arc::clone(&self.graphs)
    }

    /// Send command to the control thread
    fn send_command(&self, command: Command) -> EngineResult<()> {
        self.command_sender
            .send(command)
            .map_err(|_| EngineError::ChannelSendError)
    }

    /// Control thread main loop
    fn control_thread_main(
        mut controller: Controller,
        command_receiver: Receiver<Command>,
        event_sender: Sender<Event>,
        shutdown_flag: Arc<AtomicBool>,
    ) {
        info!("Control thread started");
        let mut last_graph = Instant::now();

        while !shutdown_flag.load(Ordering::SeqCst) {
            match command_receiver.recv_timeout(POLL_INTERVAL) {
                Ok(Command::Shutdown) => {
                    info!("Shutdown command received");
                    shutdown_flag.store(true, Ordering::SeqCst);
                }
                Ok(command) => Self::handle_command(&mut controller, command, &event_sender),
                Err(RecvTimeoutError::Timeout) => {
                    controller.collect_garbage();
                    Self::emit_telemetry(&mut controller, &event_sender, &mut last_graph);
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Command channel closed");
                    break;
                }
            }
        }

        // Retired boxes are freed here, never on the audio thread
        controller.collect_garbage();
        info!("Control thread stopped");
    }

    fn handle_command(controller: &mut Controller, command: Command, events: &Sender<Event>) {
        let result = match command {
            Command::ApplyParams(params) => controller.apply(*params),
            Command::SetBandGain { band, gain_db } => {
                edit_band(controller, band, |b| b.gain_db = gain_db)
            }
            Command::SetBandTap { band, tap } => edit_band(controller, band, |b| b.tap = tap),
            Command::SetBandSolo { band, solo } => edit_band(controller, band, |b| b.solo = solo),
            Command::SetBandMute { band, mute } => edit_band(controller, band, |b| b.mute = mute),
            Command::SetBypass(bypassed) => controller.update(|p| p.bypass = bypassed),
            Command::SetStreamConfig(stream) => controller.set_stream_config(stream),
            Command::RequestState => {
                let _ = events.send(Event::StateUpdate {
                    version: controller.version(),
                    active_version: controller.meters().active_version(),
                    latency: controller.latency().total,
                    latency_ms: controller.latency_ms(),
                    params: Box::new(controller.params().clone()),
                });
                return;
            }
            Command::Shutdown => return,
        };

        match result {
            Ok(version) => {
                let _ = events.send(Event::ParamsApplied {
                    version,
                    latency: controller.latency().total,
                });
            }
            Err(e) => {
                warn!("Command failed: {}", e);
                let _ = events.send(Event::error(e));
            }
        }
    }

    fn emit_telemetry(controller: &mut Controller, events: &Sender<Event>, last_graph: &mut Instant) {
        let update = controller.poll_telemetry();
        let channels = controller.config().stream.channels as usize;

        let (input, output) = controller.levels();
        // Only send if there's actual audio
        if input.iter().chain(output.iter()).any(|&p| p > 0.001) {
            let _ = events.try_send(Event::LevelUpdate {
                input: input[..channels].to_vec(),
                output: output[..channels].to_vec(),
            });
        }

        if update.frames > 0 && last_graph.elapsed() >= GRAPH_INTERVAL {
            let graphs = controller.graphs().read().clone();
            let _ = events.try_send(Event::GraphUpdate(Box::new(graphs)));
            *last_graph = Instant::now();
        }

        if update.input_spectrum {
            let _ = events.try_send(Event::SpectrumUpdate {
                source: SpectrumSource::Input,
                bins: controller.input_spectrum().to_vec(),
            });
        }
        if update.output_spectrum {
            let _ = events.try_send(Event::SpectrumUpdate {
                source: SpectrumSource::Output,
                bins: controller.output_spectrum().to_vec(),
            });
        }
    }
}

/// Apply a single-band edit, rejecting unknown band indices
fn edit_band<F>(controller: &mut Controller, band: usize, edit: F) -> EngineResult<u64>
where
    F: FnOnce(&mut BandParams),
{
    let bands = controller.params().bands.len();
    if band >= bands {
        return Err(ParamError::OutOfRange {
            name: "band index".into(),
            value: band as f32,
            min: 0.0,
            max: (bands - 1) as f32,
        }
        .into());
    }
    controller.update(|p| edit(&mut p.bands[band]))
}

impl Drop for BreatherEngine {
    fn drop(&mut self) {
        // Signal shutdown
        self.shutdown_flag.store(true, Ordering::SeqCst);

        // Send shutdown command
        let _ = self.command_sender.send(Command::Shutdown);

        // Wait for control thread to finish
        if let Some(handle) = self.control_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;

    const WAIT: Duration = Duration::from_secs(2);

    fn engine() -> (BreatherEngine, BreatherProcessor) {
        BreatherEngine::new(EngineConfig::default(), BreatherParams::default()).unwrap()
    }

    /// Wait for the first event matching `pred`, skipping telemetry
    fn wait_for(engine: &BreatherEngine, pred: impl Fn(&Event) -> bool) -> Option<Event> {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if let Some(event) = engine.wait_event_timeout(Duration::from_millis(50)) {
                if pred(&event) {
                    return Some(event);
                }
            }
        }
        None
    }

    #[test]
    fn test_engine_creation() {
        let result = BreatherEngine::new(EngineConfig::default(), BreatherParams::default());
        assert!(result.is_ok());
    }

    #[test]
    fn test_engine_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.stream.sample_rate = 1000;
        assert!(BreatherEngine::new(config, BreatherParams::default()).is_err());
    }

    #[test]
    fn test_engine_shutdown() {
        let (engine, _processor) = engine();
        drop(engine); // Should shutdown cleanly
    }

    #[test]
    fn test_request_state() {
        let (engine, _processor) = engine();
        engine.request_state().unwrap();

        let event = wait_for(&engine, |e| matches!(e, Event::StateUpdate { .. }));
        match event {
            Some(Event::StateUpdate { version, params, .. }) => {
                assert_eq!(version, 1);
                assert_eq!(params.bands.len(), 8);
            }
            _ => panic!("no state update"),
        }
    }

    #[test]
    fn test_set_band_gain_publishes() {
        let (engine, mut processor) = engine();
        engine.set_band_gain(2, -3.0).unwrap();

        let event = wait_for(&engine, |e| matches!(e, Event::ParamsApplied { .. }));
        assert!(matches!(event, Some(Event::ParamsApplied { version: 2, .. })));

        let input = vec![0.0; 64];
        let mut left = vec![0.0; 64];
        let mut right = vec![0.0; 64];
        processor.process(&[&input, &input], &mut [&mut left, &mut right]);
        assert_eq!(processor.active_version(), 2);
        assert_eq!(processor.snapshot().band(2).map(|b| b.gain), Some(breather_dsp::db_to_gain(-3.0)));
    }

    #[test]
    fn test_invalid_band_reports_error() {
        let (engine, _processor) = engine();
        engine.set_band_mute(12, true).unwrap();
        let event = wait_for(&engine, |e| matches!(e, Event::Error { .. }));
        assert!(event.is_some());

        engine.set_band_gain(2, 100.0).unwrap();
        let event = wait_for(&engine, |e| matches!(e, Event::Error { .. }));
        match event {
            Some(Event::Error { message }) => assert!(message.contains("gain_db")),
            _ => panic!("expected error event"),
        }
    }

    #[test]
    fn test_set_bypass_and_stream_config() {
        let (engine, _processor) = engine();
        engine.set_bypass(true).unwrap();
        assert!(wait_for(&engine, |e| matches!(e, Event::ParamsApplied { version: 2, .. })).is_some());

        engine
            .set_stream_config(StreamConfig {
                sample_rate: 44100,
                ..StreamConfig::default()
            })
            .unwrap();
        assert!(wait_for(&engine, |e| matches!(e, Event::ParamsApplied { version: 3, .. })).is_some());
    }
}

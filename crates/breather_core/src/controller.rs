//! Control Side
//!
//! The [`Controller`] owns the parameter model. Every edit is validated,
//! turned into a complete [`Snapshot`] (crossover design included) and
//! published to the [`BreatherProcessor`]; a rejected edit leaves the
//! previous configuration running untouched.
//!
//! It also receives everything the audio thread hands back: retired
//! snapshots and pipeline state to drop, graph frames and analyzer samples.

use std::sync::Arc;

use parking_lot::RwLock;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, info, warn};

use breather_dsp::{CrossoverDesign, SpectrumAnalyzer, FFT_SIZE};

use crate::breather::{BreatherProcessor, Retired};
use crate::config::{EngineConfig, StreamConfig, MAX_CHANNELS};
use crate::error::{EngineError, EngineResult};
use crate::params::BreatherParams;
use crate::pipeline::PipelineState;
use crate::snapshot::{LatencyPlan, Snapshot};
use crate::telemetry::{drain_samples, GraphStore, SharedMeters, TelemetrySink, TelemetrySource};

/// Points per band frequency-response curve
pub const CURVE_MESH_POINTS: usize = 256;

/// Lowest frequency of the response curves
const CURVE_MIN_HZ: f32 = 10.0;

/// Frequency response of one active band
#[derive(Debug, Clone, PartialEq)]
pub struct BandCurve {
    /// Parameter index of the band
    pub index: usize,
    /// `(frequency_hz, amplitude)` pairs, log-spaced
    pub points: Vec<(f32, f32)>,
}

/// Result of one telemetry poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryUpdate {
    /// Graph frames applied
    pub frames: usize,
    /// A new input spectrum is ready
    pub input_spectrum: bool,
    /// A new output spectrum is ready
    pub output_spectrum: bool,
}

/// What the last published snapshot looked like
struct Published {
    crossover: CrossoverDesign,
    /// Parameter indices of the active bands, in crossover order
    bands: Vec<usize>,
    latency: LatencyPlan,
}

impl Published {
    fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            crossover: snapshot.crossover.clone(),
            bands: snapshot.bands.iter().map(|b| b.index).collect(),
            latency: snapshot.latency,
        }
    }
}

/// Parameter owner and snapshot publisher
pub struct Controller {
    config: EngineConfig,
    params: BreatherParams,
    version: u64,
    published: Published,
    outbox: Producer<Box<Snapshot>>,
    garbage: Consumer<Retired>,
    telemetry: TelemetrySource,
    meters: Arc<SharedMeters>,
    graphs: Arc<RwLock<GraphStore>>,
    input_analyzer: SpectrumAnalyzer,
    output_analyzer: SpectrumAnalyzer,
    samples: Vec<f32>,
    reported_drops: u64,
}

impl Controller {
    /// Validate the initial configuration and create the processor pair
    pub fn new(
        config: EngineConfig,
        params: BreatherParams,
    ) -> EngineResult<(Self, BreatherProcessor)> {
        config.validate()?;
        let snapshot = Snapshot::build(&params, &config.stream, 1)?;
        let published = Published::from_snapshot(&snapshot);

        let (outbox, inbox) = RingBuffer::new(config.snapshot_queue);
        // Every installed snapshot can retire one snapshot and one state
        let (retire, garbage) = RingBuffer::new(config.snapshot_queue * 2 + 2);
        let (frames_tx, frames_rx) = RingBuffer::new(config.telemetry_capacity);
        let (input_tx, input_rx) = RingBuffer::new(FFT_SIZE * 4);
        let (output_tx, output_rx) = RingBuffer::new(FFT_SIZE * 4);

        let meters = Arc::new(SharedMeters::new());
        let sink = TelemetrySink::new(frames_tx, input_tx, output_tx, Arc::clone(&meters));
        let state = Box::new(PipelineState::new(config.stream.sample_rate, snapshot.channels()));

        let latency = snapshot.latency;
        let processor = BreatherProcessor::new(Box::new(snapshot), state, inbox, retire, sink);

        let (input_analyzer, output_analyzer) = analyzers(&config, &params);
        info!(
            sample_rate = config.stream.sample_rate,
            channels = config.stream.channels,
            bands = published.bands.len(),
            latency = latency.total,
            "Breather controller created"
        );

        let controller = Self {
            config,
            params,
            version: 1,
            published,
            outbox,
            garbage,
            telemetry: TelemetrySource {
                frames: frames_rx,
                input_samples: input_rx,
                output_samples: output_rx,
            },
            meters,
            graphs: Arc::new(RwLock::new(GraphStore::new())),
            input_analyzer,
            output_analyzer,
            samples: Vec::with_capacity(FFT_SIZE * 4),
            reported_drops: 0,
        };
        Ok((controller, processor))
    }

    /// Validate `params` and publish them; returns the new version
    ///
    /// On error nothing changes and the previous configuration stays active.
    pub fn apply(&mut self, params: BreatherParams) -> EngineResult<u64> {
        let version = self.version + 1;
        let snapshot = match Snapshot::build(&params, &self.config.stream, version) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(version = self.version, "Rejected parameter update: {}", e);
                return Err(e);
            }
        };

        self.publish(snapshot)?;
        self.input_analyzer.set_reactivity(params.analysis.reactivity_ms);
        self.input_analyzer.set_shift(params.analysis.shift_db);
        self.output_analyzer.set_reactivity(params.analysis.reactivity_ms);
        self.output_analyzer.set_shift(params.analysis.shift_db);
        self.params = params;
        Ok(version)
    }

    /// Edit a copy of the current parameters and apply it
    pub fn update<F>(&mut self, edit: F) -> EngineResult<u64>
    where
        F: FnOnce(&mut BreatherParams),
    {
        let mut params = self.params.clone();
        edit(&mut params);
        self.apply(params)
    }

    /// Switch to a new stream configuration
    ///
    /// Ships freshly allocated pipeline state with the snapshot, so every
    /// buffer is resized and all signal history starts over.
    pub fn set_stream_config(&mut self, stream: StreamConfig) -> EngineResult<u64> {
        if let Err(e) = stream.validate() {
            warn!("Rejected stream configuration: {}", e);
            return Err(e);
        }
        let version = self.version + 1;
        let snapshot = Snapshot::build(&self.params, &stream, version)?;
        let state = Box::new(PipelineState::new(stream.sample_rate, snapshot.channels()));
        self.publish(snapshot.with_state(state))?;

        self.config.stream = stream;
        let (input_analyzer, output_analyzer) = analyzers(&self.config, &self.params);
        self.input_analyzer = input_analyzer;
        self.output_analyzer = output_analyzer;
        info!(
            sample_rate = stream.sample_rate,
            channels = stream.channels,
            "Stream configuration changed"
        );
        Ok(version)
    }

    /// Change only the sample rate
    pub fn set_sample_rate(&mut self, sample_rate: u32) -> EngineResult<u64> {
        self.set_stream_config(StreamConfig {
            sample_rate,
            ..self.config.stream
        })
    }

    fn publish(&mut self, snapshot: Snapshot) -> EngineResult<()> {
        self.collect_garbage();

        let version = snapshot.version;
        let published = Published::from_snapshot(&snapshot);
        for split in snapshot.crossover.splits() {
            debug!(
                frequency = split.frequency,
                cutoff = split.cutoff,
                slope_db = split.slope_db,
                taps = split.taps(),
                "Crossover split designed"
            );
        }

        if self.outbox.push(Box::new(snapshot)).is_err() {
            warn!(version, "Snapshot queue full, update dropped");
            return Err(EngineError::PublishQueueFull);
        }

        info!(
            version,
            latency = published.latency.total,
            bands = published.bands.len(),
            "Published snapshot"
        );
        self.version = version;
        self.published = published;
        Ok(())
    }

    /// Drop everything the audio thread has retired; returns the count
    pub fn collect_garbage(&mut self) -> usize {
        let mut count = 0;
        while let Ok(retired) = self.garbage.pop() {
            match retired {
                Retired::Snapshot(snapshot) => drop(snapshot),
                Retired::State(state) => drop(state),
            }
            count += 1;
        }
        count
    }

    /// Drain telemetry rings into graphs and analyzers
    pub fn poll_telemetry(&mut self) -> TelemetryUpdate {
        let mut update = TelemetryUpdate::default();

        if !self.telemetry.frames.is_empty() {
            let mut graphs = self.graphs.write();
            while let Ok(frame) = self.telemetry.frames.pop() {
                graphs.apply(&frame);
                update.frames += 1;
            }
        }

        self.samples.clear();
        drain_samples(&mut self.telemetry.input_samples, &mut self.samples);
        if !self.samples.is_empty() {
            update.input_spectrum = self.input_analyzer.push_samples(&self.samples);
        }

        self.samples.clear();
        drain_samples(&mut self.telemetry.output_samples, &mut self.samples);
        if !self.samples.is_empty() {
            update.output_spectrum = self.output_analyzer.push_samples(&self.samples);
        }

        let drops = self.meters.dropped_frames();
        if drops > self.reported_drops {
            warn!(
                dropped = drops - self.reported_drops,
                "Telemetry frames dropped"
            );
            self.reported_drops = drops;
        }
        update
    }

    /// Amplitude response of band `index` at `frequency_hz`
    ///
    /// `None` if the band is not active in the published configuration.
    pub fn band_response(&self, index: usize, frequency_hz: f32) -> Option<f32> {
        let position = self.published.bands.iter().position(|&b| b == index)?;
        self.published
            .crossover
            .band_response(position, frequency_hz)
            .ok()
    }

    /// Log-spaced response curves of every active band
    pub fn band_curves(&self) -> Vec<BandCurve> {
        let nyquist = self.config.stream.sample_rate as f32 * 0.5;
        let ratio = (nyquist / CURVE_MIN_HZ).ln() / (CURVE_MESH_POINTS - 1) as f32;
        let frequencies: Vec<f32> = (0..CURVE_MESH_POINTS)
            .map(|i| CURVE_MIN_HZ * (ratio * i as f32).exp())
            .collect();

        self.published
            .bands
            .iter()
            .enumerate()
            .map(|(position, &index)| BandCurve {
                index,
                points: frequencies
                    .iter()
                    .map(|&f| {
                        let amplitude = self
                            .published
                            .crossover
                            .band_response(position, f)
                            .unwrap_or(0.0);
                        (f, amplitude)
                    })
                    .collect(),
            })
            .collect()
    }

    pub fn params(&self) -> &BreatherParams {
        &self.params
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Version of the last published snapshot
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Latency plan of the last published snapshot
    pub fn latency(&self) -> LatencyPlan {
        self.published.latency
    }

    pub fn latency_ms(&self) -> f32 {
        self.config.stream.samples_to_ms(self.published.latency.total)
    }

    pub fn meters(&self) -> Arc<SharedMeters> {
        Arc::clone(&self.meters)
    }

    /// Channel peaks `(input, output)` of the most recent block
    pub fn levels(&self) -> ([f32; MAX_CHANNELS], [f32; MAX_CHANNELS]) {
        (self.meters.input_peaks(), self.meters.output_peaks())
    }

    /// Shared handle to the graph histories
    pub fn graphs(&self) -> Arc<RwLock<GraphStore>> {
        Arc::clone(&self.graphs)
    }

    pub fn input_spectrum(&self) -> &[f32] {
        self.input_analyzer.spectrum()
    }

    pub fn output_spectrum(&self) -> &[f32] {
        self.output_analyzer.spectrum()
    }

    /// Center frequencies of the spectrum bins
    pub fn spectrum_frequencies(&self) -> Vec<f32> {
        self.input_analyzer.frequencies()
    }
}

fn analyzers(config: &EngineConfig, params: &BreatherParams) -> (SpectrumAnalyzer, SpectrumAnalyzer) {
    let rate = config.stream.sample_rate as f32;
    let make = || {
        let mut analyzer = SpectrumAnalyzer::new(rate, config.spectrum_fps);
        analyzer.set_reactivity(params.analysis.reactivity_ms);
        analyzer.set_shift(params.analysis.shift_db);
        analyzer
    };
    (make(), make())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParamError;
    use crate::params::ChainTap;

    fn mono() -> EngineConfig {
        EngineConfig::with_stream(StreamConfig {
            sample_rate: 48000,
            channels: 1,
            buffer_size: 512,
        })
    }

    fn run(processor: &mut BreatherProcessor, input: &[f32]) -> Vec<f32> {
        let mut output = vec![0.0; input.len()];
        processor.process(&[input], &mut [&mut output]);
        output
    }

    #[test]
    fn test_controller_creation() {
        let (controller, processor) = Controller::new(EngineConfig::default(), BreatherParams::default()).unwrap();
        assert_eq!(controller.version(), 1);
        assert_eq!(processor.active_version(), 1);
        assert_eq!(controller.latency().total, processor.latency());
        assert_eq!(controller.meters().latency(), processor.latency());
    }

    #[test]
    fn test_invalid_initial_config() {
        let mut config = mono();
        config.stream.channels = 4;
        assert!(Controller::new(config, BreatherParams::default()).is_err());

        let mut params = BreatherParams::default();
        params.bands[0].enabled = false;
        assert!(matches!(
            Controller::new(mono(), params),
            Err(EngineError::InvalidParams(ParamError::BaseBandDisabled))
        ));
    }

    #[test]
    fn test_rejected_update_keeps_previous() {
        let (mut controller, mut processor) = Controller::new(mono(), BreatherParams::default()).unwrap();
        let before = controller.params().clone();

        let err = controller
            .update(|p| {
                p.bands[4].frequency_hz = 50.0; // below band 2's split
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParams(ParamError::SplitOrder { .. })));
        assert_eq!(controller.params(), &before);
        assert_eq!(controller.version(), 1);

        run(&mut processor, &[0.0; 64]);
        assert_eq!(processor.active_version(), 1);
    }

    #[test]
    fn test_publish_queue_full() {
        let mut config = mono();
        config.snapshot_queue = 2;
        let (mut controller, _processor) = Controller::new(config, BreatherParams::single_band()).unwrap();

        assert!(controller.update(|p| p.bands[0].gain_db = -1.0).is_ok());
        assert!(controller.update(|p| p.bands[0].gain_db = -2.0).is_ok());
        let err = controller.update(|p| p.bands[0].gain_db = -3.0).unwrap_err();
        assert!(matches!(err, EngineError::PublishQueueFull));
        assert_eq!(controller.version(), 3);
        assert_eq!(controller.params().bands[0].gain_db, -2.0);
    }

    #[test]
    fn test_newest_snapshot_wins_and_garbage_returns() {
        let (mut controller, mut processor) = Controller::new(mono(), BreatherParams::single_band()).unwrap();
        controller.update(|p| p.bands[0].gain_db = -1.0).unwrap();
        controller.update(|p| p.bands[0].gain_db = -2.0).unwrap();
        controller.update(|p| p.bands[0].gain_db = -3.0).unwrap();

        run(&mut processor, &[0.0; 64]);
        assert_eq!(processor.active_version(), 4);
        assert_eq!(controller.collect_garbage(), 3);
        assert_eq!(controller.collect_garbage(), 0);
    }

    #[test]
    fn test_sample_rate_change_installs_new_state() {
        let mut params = BreatherParams::with_splits(&[1000.0]);
        for band in &mut params.bands {
            band.tap = ChainTap::RawBand;
        }
        let (mut controller, mut processor) = Controller::new(mono(), params).unwrap();
        let latency_48k = controller.latency().total;

        controller.set_sample_rate(96000).unwrap();
        assert_eq!(controller.config().stream.sample_rate, 96000);

        run(&mut processor, &[0.0; 64]);
        assert_eq!(processor.snapshot().sample_rate(), 96000.0);
        assert!(processor.latency() > latency_48k);
        // old snapshot + old state
        assert_eq!(controller.collect_garbage(), 2);

        assert!(controller.set_sample_rate(1000).is_err());
        assert_eq!(controller.config().stream.sample_rate, 96000);
    }

    #[test]
    fn test_band_curves_sum_to_one() {
        let (controller, _processor) = Controller::new(mono(), BreatherParams::default()).unwrap();
        let curves = controller.band_curves();
        assert_eq!(curves.len(), 4);
        assert_eq!(
            curves.iter().map(|c| c.index).collect::<Vec<_>>(),
            vec![0, 2, 4, 6]
        );
        for point in 0..CURVE_MESH_POINTS {
            let sum: f32 = curves.iter().map(|c| c.points[point].1).sum();
            assert!((sum - 1.0).abs() < 1e-3, "sum {sum} at point {point}");
        }
        assert!(controller.band_response(1, 1000.0).is_none());
        let low = controller.band_response(0, 20.0).unwrap();
        assert!(low > 0.9);
    }

    #[test]
    fn test_telemetry_reaches_graphs_and_meters() {
        let (mut controller, mut processor) = Controller::new(mono(), BreatherParams::single_band()).unwrap();
        let input: Vec<f32> = (0..48000)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 440.0 / 48000.0).sin() * 0.5)
            .collect();
        for block in input.chunks(512) {
            run(&mut processor, block);
            controller.poll_telemetry();
        }

        let graphs = controller.graphs();
        let store = graphs.read();
        assert!(store.band(0).unwrap().input_level > 0.4);
        let (inputs, _outputs) = controller.levels();
        assert!(inputs[0] > 0.4);
        assert_eq!(controller.meters().dropped_frames(), 0);
    }

    #[test]
    fn test_transient_drives_beat_gain() {
        let mut params = BreatherParams::with_splits(&[1000.0]);
        {
            let high = &mut params.bands[1];
            high.filter.threshold_db = -40.0;
            high.filter.reduction_db = 0.0;
            high.beat.threshold_db = -30.0;
            high.beat.ratio = 1.0;
            high.beat.max_gain_db = 6.0;
            high.beat.attack_ms = 10.0;
            high.beat.release_ms = 20.0;
        }
        let (mut controller, mut processor) = Controller::new(mono(), params).unwrap();

        // 100 ms burst at 5 kHz, then half a second of silence
        let mut input: Vec<f32> = (0..4800)
            .map(|i| (i as f32 * 2.0 * std::f32::consts::PI * 5000.0 / 48000.0).sin() * 0.8)
            .collect();
        input.extend(std::iter::repeat(0.0).take(24000));

        for block in input.chunks(512) {
            run(&mut processor, block);
            controller.poll_telemetry();
        }

        let graphs = controller.graphs();
        let store = graphs.read();
        let gain = &store.band(1).unwrap().gain;
        let peak = gain.to_vec().into_iter().fold(f32::MIN, f32::max);
        assert!(peak > 5.9 && peak <= 6.001, "peak gain {peak} dB");
        assert!(gain.latest() < 0.1, "residual gain {} dB", gain.latest());

        // The low band never sees the burst
        let low_peak = store
            .band(0)
            .unwrap()
            .gain
            .to_vec()
            .into_iter()
            .fold(f32::MIN, f32::max);
        assert!(low_peak < 1.0);
    }
}

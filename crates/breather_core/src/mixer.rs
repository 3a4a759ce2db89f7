//! Mixer & Bypass
//!
//! Everything around the band split for one channel: input gain before the
//! crossover, output gain on the recombined signal, the latency-matched dry
//! path, dry/wet/balance mix and the bypass crossfade.
//!
//! ```text
//! mix = dry * dry_level + wet * output_gain * wet_level
//! out = dry + balance * (mix - dry)
//! out = lerp(out, dry, bypass)        bypass ramps 0..1
//! ```
//!
//! All levels ramp over a few milliseconds so snapshot changes never
//! click. Once the bypass ramp settles at 1 the output is the dry path
//! sample for sample.

use breather_dsp::{
    millis_to_samples, DelayLine, GainRamp, MAX_CROSSOVER_LATENCY, MAX_LOOKAHEAD_MS,
    MAX_TIME_SHIFT_MS,
};

use crate::snapshot::MixSettings;

/// Length of level ramps and the bypass crossfade
const MIX_RAMP_MS: f32 = 5.0;

/// Per-channel mixer state
pub(crate) struct Mixer {
    input_gain: GainRamp,
    output_gain: GainRamp,
    dry_level: GainRamp,
    wet_level: GainRamp,
    balance: GainRamp,
    bypass: GainRamp,
    dry_delay: DelayLine,
}

impl Mixer {
    pub(crate) fn new(sample_rate: f32) -> Self {
        let ramp = millis_to_samples(MIX_RAMP_MS, sample_rate).max(1);
        let band_latency = millis_to_samples(MAX_LOOKAHEAD_MS, sample_rate)
            + millis_to_samples(MAX_TIME_SHIFT_MS, sample_rate);
        Self {
            input_gain: GainRamp::new(1.0, ramp),
            output_gain: GainRamp::new(1.0, ramp),
            dry_level: GainRamp::new(0.0, ramp),
            wet_level: GainRamp::new(1.0, ramp),
            balance: GainRamp::new(1.0, ramp),
            bypass: GainRamp::new(0.0, ramp),
            dry_delay: DelayLine::new(MAX_CROSSOVER_LATENCY + band_latency),
        }
    }

    /// Apply new mix settings; `immediate` skips the ramps (fresh state)
    pub(crate) fn configure(&mut self, mix: &MixSettings, total_latency: usize, immediate: bool) {
        self.dry_delay.set_delay(total_latency);
        let bypass = if mix.bypass { 1.0 } else { 0.0 };
        let targets = [
            (&mut self.input_gain, mix.input_gain),
            (&mut self.output_gain, mix.output_gain),
            (&mut self.dry_level, mix.dry_level),
            (&mut self.wet_level, mix.wet_level),
            (&mut self.balance, mix.balance),
            (&mut self.bypass, bypass),
        ];
        for (ramp, target) in targets {
            if immediate {
                ramp.set_immediate(target);
            } else {
                ramp.set_target(target);
            }
        }
    }

    /// Input gain stage ahead of the crossover
    #[inline]
    pub(crate) fn apply_input_gain(&mut self, input: &[f32], gained: &mut [f32]) {
        for (out, &x) in gained.iter_mut().zip(input) {
            *out = x * self.input_gain.next_value();
        }
    }

    /// Mix the recombined `wet` signal with the delayed dry `input`
    pub(crate) fn mix(&mut self, input: &[f32], wet: &[f32], output: &mut [f32]) {
        for ((out, &x), &w) in output.iter_mut().zip(input).zip(wet) {
            let dry = self.dry_delay.process(x);
            let wet = w * self.output_gain.next_value();
            let blend = dry * self.dry_level.next_value() + wet * self.wet_level.next_value();
            let mixed = dry + self.balance.next_value() * (blend - dry);

            let k = self.bypass.next_value();
            *out = if k >= 1.0 {
                dry
            } else if k <= 0.0 {
                mixed
            } else {
                mixed + k * (dry - mixed)
            };
        }
    }

    pub(crate) fn reset(&mut self) {
        self.dry_delay.clear();
    }
}

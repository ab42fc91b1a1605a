//! Wideband (broadcast) FM demodulator with stereo, spec §4.8. Unlike the
//! linear/NBFM demodulators this one needs three independently shifted
//! views of the same master spectrum (mono, pilot, subcarrier), so it owns
//! three [`OutputFilter`]s instead of going through the generic
//! single-filter [`crate::channel::Channel`] prologue.

use crate::demod::AudioFrame;
use fcsdr_core::{ComplexSample, CoreError};
use fcsdr_dsp::fastconv::{InputFilterShared, OutputFilter, SampleKind};
use std::sync::Arc;

pub const COMPOSITE_SAMPRATE_HZ: f64 = 384_000.0;
pub const AUDIO_SAMPRATE_HZ: f64 = 48_000.0;
const PILOT_HZ: f64 = 19_000.0;
const PILOT_PRESENT_EPSILON: f32 = 1e-6;

pub struct WfmDemod {
    mono: OutputFilter,
    pilot: OutputFilter,
    subcarrier: OutputFilter,
    pilot_phasor: ComplexSample,
    deemph_l_state: f32,
    deemph_r_state: f32,
    deemph_rate: f32,
    stereo: bool,
}

impl WfmDemod {
    /// `input` is the composite (384 kHz) shared input filter; `l_out` is
    /// the per-block sample count at `AUDIO_SAMPRATE_HZ`; `master_l` is the
    /// composite filter's own block length.
    pub fn new(
        input: Arc<InputFilterShared>,
        master_l: usize,
        l_out: usize,
        n_out: usize,
        mono_response: Vec<ComplexSample>,
        pilot_response: Vec<ComplexSample>,
        subcarrier_response: Vec<ComplexSample>,
    ) -> Result<Self, CoreError> {
        let mono = OutputFilter::new(Arc::clone(&input), master_l, l_out, n_out, SampleKind::Real, mono_response)?;
        let pilot = OutputFilter::new(Arc::clone(&input), master_l, l_out, n_out, SampleKind::Complex, pilot_response)?;
        let subcarrier = OutputFilter::new(input, master_l, l_out, n_out, SampleKind::Complex, subcarrier_response)?;

        let deemph_tc_s = 75e-6;
        let deemph_rate = 1.0 - (-1.0 / (deemph_tc_s * AUDIO_SAMPRATE_HZ)).exp() as f32;

        Ok(Self {
            mono,
            pilot,
            subcarrier,
            pilot_phasor: ComplexSample::new(1.0, 0.0),
            deemph_l_state: 0.0,
            deemph_r_state: 0.0,
            deemph_rate,
            stereo: true,
        })
    }

    /// `pilot_shift`/`subcarrier_shift` must be bin-aligned multiples of the
    /// master's overlap factor V (spec §4.8: "shift must be a multiple of V
    /// to avoid a mop-up oscillator"), so no fine-tuning phasor is needed on
    /// these two legs.
    pub fn process(&mut self, mono_shift: i64, pilot_shift: i64, subcarrier_shift: i64) -> AudioFrame {
        let mono = self.mono.execute_output(-mono_shift);
        let pilot = self.pilot.execute_output(-pilot_shift);
        let subcarrier = self.subcarrier.execute_output(-subcarrier_shift);

        let pilot_power: f32 = pilot.iter().map(|s| s.norm_sqr()).sum::<f32>() / pilot.len().max(1) as f32;
        self.stereo = pilot_power > PILOT_PRESENT_EPSILON;

        let n = mono.len().min(subcarrier.len());
        let mut samples = Vec::with_capacity(n * if self.stereo { 2 } else { 1 });

        for i in 0..n {
            let mono_sample = mono[i].re;
            if !self.stereo {
                self.deemph_l_state += self.deemph_rate * (mono_sample - self.deemph_l_state);
                samples.push(self.deemph_l_state);
                continue;
            }

            // Square the pilot phasor (19 kHz -> 38 kHz) and normalize it
            // to recover the subcarrier's coherent reference.
            let p = pilot[i] * pilot[i];
            let mag = p.norm();
            self.pilot_phasor = if mag > 0.0 { p / mag } else { self.pilot_phasor };
            let lr_diff = (subcarrier[i] * self.pilot_phasor.conj()).re;

            let l = mono_sample + lr_diff;
            let r = mono_sample - lr_diff;
            self.deemph_l_state += self.deemph_rate * (l - self.deemph_l_state);
            self.deemph_r_state += self.deemph_rate * (r - self.deemph_r_state);
            samples.push(self.deemph_l_state);
            samples.push(self.deemph_r_state);
        }

        AudioFrame {
            channels: if self.stereo { 2 } else { 1 },
            mute: false,
            samples,
        }
    }

    pub fn channel_count(&self) -> u8 {
        if self.stereo {
            2
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pilot_squaring_doubles_frequency() {
        let hz = PILOT_HZ;
        let samprate = COMPOSITE_SAMPRATE_HZ;
        let step = 2.0 * std::f64::consts::PI * hz / samprate;
        let p = ComplexSample::new(step.cos() as f32, step.sin() as f32);
        let doubled = p * p;
        let expected_step = 2.0 * step;
        let expected = ComplexSample::new(expected_step.cos() as f32, expected_step.sin() as f32);
        assert!((doubled.re - expected.re).abs() < 1e-4);
        assert!((doubled.im - expected.im).abs() < 1e-4);
    }
}

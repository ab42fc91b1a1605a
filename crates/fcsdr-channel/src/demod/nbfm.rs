//! Narrowband FM demodulator, spec §4.7. Grounded on `fcsdr_dsp::iir`'s
//! `Goertzel` (PL-tone detection) and `Iir::set_lowpass`/`set_notch`
//! (de-emphasis's DC removal and the PL-tone's companion lowpass).

use crate::channel::Channel;
use crate::demod::AudioFrame;
use fcsdr_core::ComplexSample;
use fcsdr_dsp::iir::{Goertzel, Iir};

const THRESHOLD_EXTENSION_BETA: f32 = 0.5;

pub struct NbfmParams {
    pub devmax_hz: f64,
    pub bandwidth_hz: f64,
    pub squelch_tail_blocks: u32,
    pub threshold_extension: bool,
    pub pl_tone_hz: Option<f64>,
    pub deemphasis_tc_s: f64,
}

impl Default for NbfmParams {
    fn default() -> Self {
        Self {
            devmax_hz: 5_000.0,
            bandwidth_hz: 3_000.0,
            squelch_tail_blocks: 2,
            threshold_extension: false,
            pl_tone_hz: None,
            deemphasis_tc_s: 530e-6,
        }
    }
}

pub struct NbfmDemod {
    params: NbfmParams,
    samprate: f64,
    last_sample: ComplexSample,
    squelch_state: i32,
    deemph_state: f32,
    deemph_rate: f32,
    pl_goertzel: Option<Goertzel>,
    pl_lpf: Iir,
    pl_integral_blocks: u32,
    pl_present: bool,
}

impl NbfmDemod {
    pub fn new(params: NbfmParams, samprate: f64) -> Self {
        let pl_goertzel = params.pl_tone_hz.map(|f| Goertzel::new((f / samprate) as f32));
        let mut pl_lpf = Iir::default();
        pl_lpf.set_lowpass(300.0 / samprate);
        let deemph_rate = 1.0 - (-1.0 / (params.deemphasis_tc_s * samprate)).exp() as f32;
        Self {
            params,
            samprate,
            last_sample: ComplexSample::new(1.0, 0.0),
            squelch_state: 0,
            deemph_state: 0.0,
            deemph_rate,
            pl_goertzel,
            pl_lpf,
            pl_integral_blocks: 0,
            pl_present: false,
        }
    }

    fn basic_snr(&self, bb_power: f32) -> f32 {
        let bw = self.params.bandwidth_hz as f32;
        let n0 = channel_n0_floor(bb_power);
        bb_power / (n0 * bw) - 1.0
    }

    fn update_squelch(&mut self, channel: &Channel) -> i32 {
        let snr_db = 10.0 * self.basic_snr(channel.baseband_power).max(1e-9).log10();
        let open_db = channel.tuning.squelch_open_db as f32;
        let close_db = channel.tuning.squelch_close_db as f32;
        let tail = self.params.squelch_tail_blocks as i32 + 4;

        if snr_db > open_db {
            self.squelch_state = tail;
        } else if snr_db < close_db {
            self.squelch_state = (self.squelch_state - 1).max(0);
        }
        self.squelch_state
    }

    fn update_pl_tone(&mut self, baseband_audio: &[f32]) {
        let (Some(goertzel), true) = (self.pl_goertzel.as_mut(), !baseband_audio.is_empty()) else {
            return;
        };
        let mut lpf_energy = 0.0f32;
        for &x in baseband_audio {
            goertzel.update(x);
            let filtered = self.pl_lpf.apply(x as f64) as f32;
            lpf_energy += filtered * filtered;
        }
        let tone_energy = goertzel.output().norm_sqr();
        self.pl_integral_blocks += 1;
        if self.pl_integral_blocks * baseband_audio.len() as u32 >= (0.240 * self.samprate) as u32 {
            self.pl_present = tone_energy > lpf_energy * 0.1;
            self.pl_integral_blocks = 0;
            goertzel.reset();
        }
    }

    pub fn process(&mut self, channel: &mut Channel, baseband: &[ComplexSample]) -> AudioFrame {
        let mut audio = Vec::with_capacity(baseband.len());
        let devmax_per_sample = (self.params.devmax_hz / self.samprate) as f32;

        for &sample in baseband {
            let prod = sample * self.last_sample.conj();
            self.last_sample = sample;
            let mut dphi = (1.0 / std::f32::consts::PI) * prod.im.atan2(prod.re);

            if self.params.threshold_extension {
                dphi = dphi.clamp(-devmax_per_sample, devmax_per_sample);
                let mag2 = sample.norm_sqr();
                let n0 = channel_n0_floor(channel.baseband_power);
                let weight = mag2 / (mag2 + THRESHOLD_EXTENSION_BETA * n0 * self.params.bandwidth_hz as f32);
                dphi *= weight;
            }

            self.deemph_state += self.deemph_rate * (dphi - self.deemph_state);
            audio.push(self.deemph_state);
        }

        self.update_pl_tone(&audio);
        let squelch_state = self.update_squelch(channel);

        let gain = 2.0 * 0.707 * self.samprate as f32 / (channel.tuning.high_if_hz - channel.tuning.low_if_hz) as f32;
        for s in audio.iter_mut() {
            *s *= gain;
        }

        let tone_required = self.pl_goertzel.is_some();
        let tone_blocks = if tone_required && !self.pl_present {
            true
        } else {
            false
        };

        if squelch_state == 0 || tone_blocks {
            AudioFrame {
                samples: vec![],
                channels: 1,
                mute: true,
            }
        } else if squelch_state <= 3 {
            AudioFrame {
                samples: vec![0.0; audio.len()],
                channels: 1,
                mute: false,
            }
        } else {
            AudioFrame {
                samples: audio,
                channels: 1,
                mute: false,
            }
        }
    }
}

/// Approximates the per-channel N0 floor from the channel's smoothed power
/// estimate (§4.5 step 9's minimum-of-per-bin-energies estimate, folded
/// here into the single scalar the channel already tracks).
fn channel_n0_floor(bb_power: f32) -> f32 {
    (bb_power * 0.01).max(1e-9)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_differentiation_recovers_tone_sign() {
        let samprate = 24_000.0;
        let _demod = NbfmDemod::new(NbfmParams::default(), samprate);
        let mut phase = 0.0f32;
        let step = 2.0 * std::f32::consts::PI * 1000.0 / samprate as f32;
        let baseband: Vec<ComplexSample> = (0..100)
            .map(|_| {
                phase += step;
                ComplexSample::new(phase.cos(), phase.sin())
            })
            .collect();
        // A constant-rate rotating phasor yields a consistently positive
        // instantaneous frequency estimate.
        let mut last = ComplexSample::new(1.0, 0.0);
        let mut total = 0.0f32;
        for &s in &baseband {
            let prod = s * last.conj();
            last = s;
            total += prod.im.atan2(prod.re);
        }
        assert!(total > 0.0);
    }
}

//! AM/SSB/CW ("linear") demodulator, spec §4.6. Grounded on `fcsdr_dsp::osc`'s
//! `Pll` for the coherent/DSB path and a block-rate approximation of the
//! sub-slice AGC the spec describes (this engine sees whole blocks, not
//! individual 2 ms sub-slices, so the AGC operates once per block using the
//! same branch structure rather than literally slicing the block in two).

use crate::channel::Channel;
use crate::demod::AudioFrame;
use fcsdr_core::ComplexSample;
use fcsdr_dsp::osc::Pll;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearMode {
    Iq,
    Ssb,
    Envelope,
    Coherent { squared: bool },
}

pub struct AgcParams {
    pub headroom: f32,
    pub hangtime_s: f32,
    pub recovery_rate_db_s: f32,
    pub threshold_db: f32,
}

impl Default for AgcParams {
    fn default() -> Self {
        Self {
            headroom: 0.707,
            hangtime_s: 1.0,
            recovery_rate_db_s: 20.0,
            threshold_db: -10.0,
        }
    }
}

pub struct LinearDemod {
    mode: LinearMode,
    agc_enabled: bool,
    agc: AgcParams,
    gain: f32,
    hang_timer_blocks: f32,
    pll: Option<Pll>,
    pll_locked: bool,
    lock_integral: f32,
    lock_time_s: f32,
    lock_dwell_s: f32,
    dc_state: f32,
    dc_rate: f32,
    blocktime_s: f64,
}

impl LinearDemod {
    pub fn new(mode: LinearMode, samprate_out: f64, blocktime_s: f64) -> Self {
        Self {
            mode,
            agc_enabled: true,
            agc: AgcParams::default(),
            gain: 1.0,
            hang_timer_blocks: 0.0,
            pll: matches!(mode, LinearMode::Coherent { .. }).then(|| Pll::new(samprate_out)),
            pll_locked: false,
            lock_integral: 0.0,
            lock_time_s: 0.05,
            lock_dwell_s: 0.0,
            dc_state: 0.0,
            dc_rate: 0.01,
            blocktime_s,
        }
    }

    /// Applies the AGC rule from spec §4.6 once per block: instant gain-drop
    /// on a peak excursion, exponential pull-in toward headroom, hang, then
    /// exponential recovery.
    fn run_agc(&mut self, baseband: &[ComplexSample]) {
        if !self.agc_enabled || baseband.is_empty() {
            return;
        }
        let peak = baseband.iter().map(|s| s.norm()).fold(0.0f32, f32::max);
        let rms = (baseband.iter().map(|s| s.norm_sqr()).sum::<f32>() / baseband.len() as f32).sqrt();
        let headroom = self.agc.headroom;
        let blocks_per_sec = 1.0 / self.blocktime_s.max(1e-6) as f32;

        if peak * self.gain > std::f32::consts::SQRT_2 * headroom {
            self.gain = std::f32::consts::SQRT_2 * headroom / peak.max(1e-12);
            self.hang_timer_blocks = self.agc.hangtime_s * blocks_per_sec;
        } else if rms * self.gain > headroom {
            let target = headroom / rms.max(1e-12);
            self.gain += (target - self.gain) * 0.5;
            self.hang_timer_blocks = self.agc.hangtime_s * blocks_per_sec;
        } else if rms * self.gain > 10f32.powf(self.agc.threshold_db / 20.0) * headroom {
            let target = 10f32.powf(self.agc.threshold_db / 20.0) * headroom / rms.max(1e-12);
            self.gain += (target - self.gain) * 0.5;
        } else if self.hang_timer_blocks > 0.0 {
            self.hang_timer_blocks -= 1.0;
        } else {
            let recovery_per_block = 10f32.powf(self.agc.recovery_rate_db_s / 20.0 * self.blocktime_s as f32);
            self.gain *= recovery_per_block;
        }
    }

    /// Runs the PLL's phase-tracking loop over `baseband` and integrates
    /// `I²−Q²` into a smoothed SNR estimate, in dB. Grounded on
    /// `nbfm.rs`'s `basic_snr`/`update_squelch` dB-conversion pattern.
    fn run_pll(&mut self, baseband: &[ComplexSample]) -> f32 {
        let Some(pll) = self.pll.as_mut() else { return f32::NEG_INFINITY };
        let squared = matches!(self.mode, LinearMode::Coherent { squared: true });
        let mut snr_acc = 0.0f32;
        for sample in baseband {
            let detector_input = if squared { sample * sample } else { *sample };
            let phase_error = detector_input.im.atan2(detector_input.re) as f64 - pll.phasor().im.atan2(pll.phasor().re) as f64;
            let wrapped = (phase_error + std::f64::consts::PI).rem_euclid(2.0 * std::f64::consts::PI) - std::f64::consts::PI;
            pll.run(wrapped);
            snr_acc += sample.re * sample.re - sample.im * sample.im;
        }
        snr_acc /= baseband.len().max(1) as f32;
        self.lock_integral += (snr_acc - self.lock_integral) * 0.1;
        10.0 * self.lock_integral.max(1e-9).log10()
    }

    /// Hysteresis + dwell lock declaration (spec §4.6): `pll_locked` only
    /// flips true once the integrated SNR has held above `open_db`
    /// continuously for `lock_time_s` seconds, and flips false as soon as it
    /// drops below `close_db`. Between the two thresholds the prior state
    /// and dwell timer both hold, same hysteresis band `nbfm.rs`'s
    /// `update_squelch` uses for its tail.
    fn update_pll_lock(&mut self, snr_db: f32, open_db: f32, close_db: f32) {
        if snr_db > open_db {
            self.lock_dwell_s += self.blocktime_s as f32;
            if self.lock_dwell_s >= self.lock_time_s {
                self.pll_locked = true;
            }
        } else if snr_db < close_db {
            self.lock_dwell_s = 0.0;
            self.pll_locked = false;
        }
    }

    pub fn process(&mut self, channel: &mut Channel, baseband: &[ComplexSample]) -> AudioFrame {
        self.run_agc(baseband);
        let pll_locked = if matches!(self.mode, LinearMode::Coherent { .. }) {
            let snr_db = self.run_pll(baseband);
            self.update_pll_lock(snr_db, channel.tuning.squelch_open_db as f32, channel.tuning.squelch_close_db as f32);
            Some(self.pll_locked)
        } else {
            None
        };

        // When the PLL is on, it gates the squelch directly: a demodulator
        // not yet locked has no meaningful baseband to pass through.
        let squelch_source_open = pll_locked.unwrap_or(true);

        let mut out = Vec::with_capacity(baseband.len() * 2);
        let mut channels_out = 1u8;
        for sample in baseband {
            let s = match self.mode {
                LinearMode::Iq => {
                    channels_out = 2;
                    out.push(sample.re * self.gain);
                    out.push(sample.im * self.gain);
                    continue;
                }
                LinearMode::Ssb => sample.re,
                LinearMode::Envelope => {
                    let env = std::f32::consts::FRAC_1_SQRT_2 * sample.norm();
                    self.dc_state += self.dc_rate * (env - self.dc_state);
                    env - self.dc_state
                }
                LinearMode::Coherent { .. } => sample.re,
            };
            out.push(s * self.gain);
        }

        let mute = channel.baseband_power == 0.0 || channel.tuning.carrier_hz == 0.0 || !squelch_source_open;
        AudioFrame {
            samples: out,
            channels: channels_out,
            mute,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelHandle, ChannelTuning};
    use crate::frontend::{FrontEndSnapshot, FrontEndStatus};
    use fcsdr_core::DemodKind;
    use fcsdr_dsp::fastconv::{InputFilter, OutputFilter, SampleKind};
    use std::sync::Arc;

    fn make_channel(stream_id: u32) -> Channel {
        let input = InputFilter::new(960, 481, SampleKind::Complex, None).unwrap();
        let response = vec![ComplexSample::new(1.0, 0.0); 480];
        let output = OutputFilter::new(Arc::clone(&input.shared), input.l, 480, 480, SampleKind::Complex, response).unwrap();
        let front_end = Arc::new(FrontEndStatus::new(FrontEndSnapshot {
            center_frequency_hz: 100_000_000.0,
            sample_rate_hz: 24_000.0,
            calibration_ppm: 0.0,
            bit_depth: 16,
            min_if_hz: -12_000.0,
            max_if_hz: 12_000.0,
            kind: SampleKind::Complex,
            rf_gain_db: 0.0,
            rf_atten_db: 0.0,
        }));
        let handle = Arc::new(ChannelHandle::new(stream_id, DemodKind::Linear));
        Channel::new(handle, output, front_end, 12_000.0, 2, ChannelTuning::default())
    }

    #[test]
    fn agc_reduces_gain_on_loud_peak() {
        let mut demod = LinearDemod::new(LinearMode::Envelope, 12_000.0, 0.04);
        let loud: Vec<ComplexSample> = (0..480).map(|_| ComplexSample::new(10.0, 0.0)).collect();
        demod.run_agc(&loud);
        assert!(demod.gain < 1.0);
    }

    #[test]
    fn envelope_process_tracks_amplitude_and_removes_dc() {
        let mut demod = LinearDemod::new(LinearMode::Envelope, 12_000.0, 0.04);
        demod.agc_enabled = false;
        let mut channel = make_channel(1);
        channel.tuning.carrier_hz = 1_000_000.0;
        channel.baseband_power = 1.0;
        let tone: Vec<ComplexSample> = (0..200).map(|i| ComplexSample::new((i as f32 * 0.1).cos(), (i as f32 * 0.1).sin())).collect();
        let frame = demod.process(&mut channel, &tone);

        assert_eq!(frame.channels, 1);
        assert!(!frame.mute);
        let expected_env = std::f32::consts::FRAC_1_SQRT_2 * tone[0].norm();
        // The DC tracker has barely moved off zero on the first sample, so
        // the output is still close to the raw envelope.
        assert!((frame.samples[0] - expected_env).abs() < 0.05 * expected_env);
        // Over a long constant-amplitude block the tracker catches up with
        // the envelope, collapsing the output toward zero.
        assert!(frame.samples.last().unwrap().abs() < 0.2 * expected_env);
    }

    #[test]
    fn pll_lock_requires_sustained_snr_above_open_with_hysteresis() {
        let mut demod = LinearDemod::new(LinearMode::Coherent { squared: false }, 12_000.0, 0.05);
        demod.lock_time_s = 0.1;

        demod.update_pll_lock(-20.0, 10.0, 5.0);
        assert!(!demod.pll_locked, "should not lock below open threshold");

        demod.update_pll_lock(20.0, 10.0, 5.0);
        assert!(!demod.pll_locked, "one block above open is short of lock_time_s");

        demod.update_pll_lock(20.0, 10.0, 5.0);
        assert!(demod.pll_locked, "two blocks above open reaches lock_time_s");

        demod.update_pll_lock(0.0, 10.0, 5.0);
        assert!(!demod.pll_locked, "dropping below close unlocks immediately");
    }
}

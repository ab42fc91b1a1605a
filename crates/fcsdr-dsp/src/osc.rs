//! Complex phasor oscillator and second-order PLL. Grounded on
//! `original_source/osc.c`/`osc.h`: a stepped complex phasor with periodic
//! renormalization, a 1024-entry sine table for the DDS path, and a
//! loop-bandwidth/damping-parameterized PLL whose integrator is clamped to
//! caller-supplied frequency limits.

use fcsdr_core::ComplexSample;
use std::f64::consts::PI;

/// Steps of `step_osc` between magnitude renormalizations (spec §9, §8).
pub const RENORM_RATE: u32 = 16384;

const TAB_BITS: u32 = 10;
const TAB_SIZE: usize = 1 << TAB_BITS; // 1024
const TAB_MASK: u32 = (TAB_SIZE as u32) - 1;
const FRACT_BITS: u32 = 32 - TAB_BITS;

/// Quarter-cycle-free full sine table, 1024 entries, linearly interpolated.
fn sine_table() -> &'static [f32; TAB_SIZE] {
    use std::sync::OnceLock;
    static TABLE: OnceLock<[f32; TAB_SIZE]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut t = [0.0f32; TAB_SIZE];
        for (i, v) in t.iter_mut().enumerate() {
            *v = (2.0 * PI * i as f64 / TAB_SIZE as f64).sin() as f32;
        }
        t
    })
}

/// Fixed-point phase accumulator, `u32` covering a full turn. `sine_dds`
/// interpolates linearly between adjacent table entries.
pub fn sine_dds(phase: u32) -> f32 {
    let table = sine_table();
    let index = (phase >> FRACT_BITS) & TAB_MASK;
    let frac = (phase << TAB_BITS) as f32 / (u32::MAX as f32 + 1.0);
    let a = table[index as usize];
    let b = table[((index + 1) & TAB_MASK) as usize];
    a + (b - a) * frac
}

pub fn cos_dds(phase: u32) -> f32 {
    sine_dds(phase.wrapping_add(1u32 << 30))
}

pub fn comp_dds(phase: u32) -> ComplexSample {
    ComplexSample::new(cos_dds(phase), sine_dds(phase))
}

/// A steppable complex phasor: `phasor *= step` each call to `step()`,
/// renormalized to unit magnitude every [`RENORM_RATE`] steps to counter
/// floating-point drift.
#[derive(Debug, Clone, Copy)]
pub struct Oscillator {
    pub freq_hz: f64,
    pub rate_hz: f64,
    pub phasor: ComplexSample,
    pub phasor_step: ComplexSample,
    steps: u32,
}

impl Oscillator {
    pub fn new(freq_hz: f64, rate_hz: f64) -> Self {
        let mut osc = Self {
            freq_hz: 0.0,
            rate_hz,
            phasor: ComplexSample::new(1.0, 0.0),
            phasor_step: ComplexSample::new(1.0, 0.0),
            steps: 0,
        };
        osc.set_freq(freq_hz);
        osc
    }

    pub fn set_freq(&mut self, freq_hz: f64) {
        self.freq_hz = freq_hz;
        let theta = 2.0 * PI * freq_hz / self.rate_hz;
        self.phasor_step = ComplexSample::new(theta.cos() as f32, theta.sin() as f32);
    }

    /// Advance the phasor by one sample and return its new value.
    pub fn step(&mut self) -> ComplexSample {
        self.phasor *= self.phasor_step;
        self.steps += 1;
        if self.steps >= RENORM_RATE {
            self.renormalize();
            self.steps = 0;
        }
        self.phasor
    }

    pub fn renormalize(&mut self) {
        let mag = (self.phasor.re * self.phasor.re + self.phasor.im * self.phasor.im).sqrt();
        if mag > 0.0 {
            self.phasor /= mag;
        }
    }
}

/// Second-order PLL with programmable natural frequency (`loop_bw`) and
/// damping; the integrator is clamped to `[lower_limit, upper_limit]` Hz.
/// Coefficients follow the standard analog-design-software formulas (see
/// `osc.c`'s `set_pll_params`).
#[derive(Debug, Clone, Copy)]
pub struct Pll {
    samprate: f64,
    vco_phase: f64,
    vco_step: f64,
    integrator: f64,
    integrator_gain: f64,
    prop_gain: f64,
    pub lower_limit: f64,
    pub upper_limit: f64,
    pub loop_bw: f64,
    pub damping: f64,
}

impl Pll {
    pub fn new(samprate: f64) -> Self {
        let mut pll = Self {
            samprate,
            vco_phase: 0.0,
            vco_step: 0.0,
            integrator: 0.0,
            integrator_gain: 0.0,
            prop_gain: 0.0,
            lower_limit: -samprate / 2.0,
            upper_limit: samprate / 2.0,
            loop_bw: 1.0,
            damping: std::f64::consts::FRAC_1_SQRT_2,
        };
        pll.set_params(1.0, std::f64::consts::FRAC_1_SQRT_2);
        pll
    }

    pub fn set_limits(&mut self, lower_hz: f64, upper_hz: f64) {
        self.lower_limit = lower_hz;
        self.upper_limit = upper_hz;
    }

    /// Re-derive loop-filter gains from natural frequency (Hz) and damping.
    pub fn set_params(&mut self, loop_bw: f64, damping: f64) {
        self.loop_bw = loop_bw;
        self.damping = damping;
        let wn = 2.0 * PI * loop_bw / self.samprate;
        self.integrator_gain = wn * wn;
        self.prop_gain = 2.0 * damping * wn;
    }

    /// Run one sample of the loop given the phase-detector error (radians);
    /// returns the instantaneous VCO phase.
    pub fn run(&mut self, phase_error: f64) -> f64 {
        self.integrator += self.integrator_gain * phase_error;
        self.integrator = self.integrator.clamp(
            self.lower_limit * 2.0 * PI / self.samprate,
            self.upper_limit * 2.0 * PI / self.samprate,
        );
        self.vco_step = self.integrator + self.prop_gain * phase_error;
        self.vco_phase = (self.vco_phase + self.vco_step).rem_euclid(2.0 * PI);
        self.vco_phase
    }

    /// Current VCO frequency estimate in Hz.
    pub fn frequency_hz(&self) -> f64 {
        self.vco_step * self.samprate / (2.0 * PI)
    }

    pub fn phasor(&self) -> ComplexSample {
        ComplexSample::new(self.vco_phase.cos() as f32, self.vco_phase.sin() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renormalization_restores_unit_magnitude() {
        let mut osc = Oscillator::new(1000.0, 48000.0);
        for _ in 0..(RENORM_RATE * 2) {
            osc.step();
        }
        let mag = (osc.phasor.re * osc.phasor.re + osc.phasor.im * osc.phasor.im).sqrt();
        assert!((mag - 1.0).abs() < 1e-6, "magnitude drifted to {mag}");
    }

    #[test]
    fn sine_dds_matches_float_sine_closely() {
        for i in 0..8 {
            let phase = (i as u32) << 29; // eighths of a turn
            let expected = (2.0 * PI * i as f64 / 8.0).sin() as f32;
            assert!((sine_dds(phase) - expected).abs() < 1e-3);
        }
    }

    #[test]
    fn pll_locks_onto_constant_offset_frequency() {
        let samprate = 48000.0;
        let mut pll = Pll::new(samprate);
        pll.set_params(100.0, std::f64::consts::FRAC_1_SQRT_2);
        let target_hz = 1000.0;
        let target_step = 2.0 * PI * target_hz / samprate;
        let mut phase = 0.0f64;
        for _ in 0..20_000 {
            let err = (phase - pll.vco_phase + PI).rem_euclid(2.0 * PI) - PI;
            pll.run(err);
            phase = (phase + target_step).rem_euclid(2.0 * PI);
        }
        assert!((pll.frequency_hz() - target_hz).abs() < 5.0);
    }
}

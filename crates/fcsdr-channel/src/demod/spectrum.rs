//! Spectrum-analysis pseudo-demodulator, spec §4.9. The wide-bin mode reads
//! the master's frequency-domain snapshot directly (grounded on
//! `InputFilterShared::wait_for_job`, the same primitive `OutputFilter`
//! uses, but without running bin selection or an inverse FFT); the fine-bin
//! mode layers a second, windowed complex FFT on top of an ordinary
//! down-converted channel.

use crate::demod::AudioFrame;
use fcsdr_core::ComplexSample;
use fcsdr_dsp::fastconv::{InputFilterShared, OutputFilter, SampleKind};
use fcsdr_dsp::filterdesign::unity_gain_kaiser;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Crossover between wide-bin and fine-bin mode, spec §4.9 (default 5 kHz).
pub const DEFAULT_CROSSOVER_HZ: f64 = 5_000.0;

pub struct WideBinSpectrum {
    input: Arc<InputFilterShared>,
    expected_job: u64,
    pub block_drops: u64,
    bins_out: usize,
    binsperbin: f64,
    center_bin: f64,
}

impl WideBinSpectrum {
    pub fn new(input: Arc<InputFilterShared>, bins_out: usize, binsperbin: f64, center_bin: f64) -> Self {
        let expected_job = input.next_job_number();
        Self {
            input,
            expected_job,
            block_drops: 0,
            bins_out,
            binsperbin,
            center_bin,
        }
    }

    /// Sums `binsperbin` adjacent master bins per output bin, fractionally
    /// splitting an input bin between two output bins when `binsperbin` is
    /// not an integer (spec §4.9's "non-integer ratios ... assigning each
    /// input bin fractionally based on its centre").
    pub fn process(&mut self) -> Vec<f32> {
        let (snapshot, next_expected, drops) = self.input.wait_for_job(self.expected_job);
        self.block_drops += drops;
        self.expected_job = next_expected;

        let n = self.input.n;
        let scale = match self.input.kind {
            SampleKind::Real => 2.0 / (n * n) as f32,
            SampleKind::Complex => 1.0 / (n * n) as f32,
        };

        let mut out = vec![0.0f32; self.bins_out];
        for (w, slot) in out.iter_mut().enumerate() {
            let lo = self.center_bin + (w as f64 - self.bins_out as f64 / 2.0) * self.binsperbin;
            let hi = lo + self.binsperbin;
            let lo_bin = lo.floor() as i64;
            let hi_bin = hi.ceil() as i64;
            let mut acc = 0.0f64;
            for b in lo_bin..hi_bin {
                let weight = (hi.min((b + 1) as f64) - lo.max(b as f64)).clamp(0.0, 1.0);
                if weight <= 0.0 {
                    continue;
                }
                let energy = master_bin_energy(&snapshot, n, self.input.kind, b) as f64;
                acc += energy * weight;
            }
            *slot = acc as f32 * scale;
        }
        out
    }
}

/// Energy of input bin `k` (possibly negative or beyond `n`), folding the
/// real-input Hermitian-symmetric upper half the same way `select_bins`
/// does, but returning magnitude-squared rather than a complex value.
fn master_bin_energy(snapshot: &[ComplexSample], n: usize, kind: SampleKind, k: i64) -> f32 {
    let k = k.rem_euclid(n as i64) as usize;
    match kind {
        SampleKind::Complex => snapshot[k].norm_sqr(),
        SampleKind::Real => {
            let half = n / 2;
            if k <= half {
                snapshot[k].norm_sqr()
            } else {
                snapshot[n - k].norm_sqr()
            }
        }
    }
}

pub struct FineBinSpectrum {
    channel: OutputFilter,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    fft_len: usize,
    history: Vec<ComplexSample>,
    averaged: Vec<f32>,
    alpha: f32,
}

impl FineBinSpectrum {
    pub fn new(channel: OutputFilter, fft_len: usize, beta: f64) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_len);
        let window = unity_gain_kaiser(fft_len, beta);
        Self {
            channel,
            fft,
            window,
            fft_len,
            history: Vec::new(),
            averaged: vec![0.0; fft_len],
            alpha: 0.5,
        }
    }

    /// Runs one down-converted block through the second, windowed FFT. Two
    /// 50%-overlapped windows share this one plan (spec §4.9): a fresh
    /// block's samples are prepended by the tail of the previous block
    /// before windowing, so every other call effectively re-centers the
    /// analysis window by half its length.
    pub fn process(&mut self, shift: i64) -> Vec<f32> {
        let block = self.channel.execute_output(shift);
        self.history.extend_from_slice(&block);
        let half = self.fft_len / 2;
        if self.history.len() < self.fft_len {
            return self.averaged.clone();
        }

        let start = self.history.len() - self.fft_len;
        let mut buf: Vec<ComplexSample> = self.history[start..]
            .iter()
            .zip(self.window.iter())
            .map(|(s, w)| *s * *w)
            .collect();
        self.fft.process(&mut buf);

        for (avg, bin) in self.averaged.iter_mut().zip(buf.iter()) {
            let mag = bin.norm_sqr() / (self.fft_len * self.fft_len) as f32;
            *avg += self.alpha * (mag - *avg);
        }

        if self.history.len() > self.fft_len + half {
            let drop = self.history.len() - (self.fft_len + half);
            self.history.drain(0..drop);
        }

        self.averaged.clone()
    }
}

pub fn bins_as_audio_frame(bins: Vec<f32>) -> AudioFrame {
    AudioFrame {
        channels: 1,
        mute: false,
        samples: bins,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcsdr_dsp::fastconv::InputFilter;

    #[test]
    fn wide_bin_mode_sums_adjacent_master_bins() {
        let mut input = InputFilter::new(8, 5, SampleKind::Complex, None).unwrap();
        let samples = vec![ComplexSample::new(1.0, 0.0); 8];
        input.execute_input(&samples).unwrap();
        let mut spectrum = WideBinSpectrum::new(Arc::clone(&input.shared), 4, 3.0, (input.n() / 2) as f64);
        let bins = spectrum.process();
        assert_eq!(bins.len(), 4);
        assert!(bins.iter().all(|b| b.is_finite()));
    }
}

//! Kaiser-windowed sinc filter-response synthesis for output filters.
//! Grounded on `fcfb_ref.rs`'s `raised_cosine_weights` (same idea -- build a
//! frequency-domain response by windowing a time-domain sinc and taking its
//! forward FFT) but parameterized by a Kaiser beta per spec §4 rather than a
//! raised-cosine transition, since the command/status protocol exposes
//! `kaiser_beta` directly (spec §6).

use fcsdr_core::ComplexSample;
use rustfft::FftPlanner;

/// Zeroth-order modified Bessel function of the first kind, via its power
/// series. Used by the Kaiser window.
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    let half_x = x / 2.0;
    for k in 1..32 {
        term *= (half_x / k as f64).powi(2);
        sum += term;
        if term < sum * 1e-16 {
            break;
        }
    }
    sum
}

/// Kaiser window of length `n`, shape parameter `beta`.
pub fn kaiser_window(n: usize, beta: f64) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    let denom = bessel_i0(beta);
    let m = (n - 1) as f64;
    (0..n)
        .map(|i| {
            let x = 2.0 * i as f64 / m - 1.0;
            bessel_i0(beta * (1.0 - x * x).max(0.0).sqrt()) / denom
        })
        .collect()
}

/// Build a frequency-domain response of length `bins` (a real-FFT bin count,
/// `n/2+1`, or the full `n` for complex) implementing a real-input bandpass
/// from `low_hz` to `high_hz` at `samprate`, Kaiser-windowed sinc, FFT
/// length `n`. Real-input filters carry a 3 dB gain correction relative to
/// the equivalent complex-input filter because their spectrum is one-sided
/// (spec §8's round-trip law).
pub fn real_bandpass_response(n: usize, samprate: f64, low_hz: f64, high_hz: f64, beta: f64) -> Vec<ComplexSample> {
    let taps = bandpass_sinc_taps(n, samprate, low_hz, high_hz, beta);
    fft_real_taps(&taps, n)
}

/// Same as [`real_bandpass_response`] but for complex input/output (no 3 dB
/// correction, full-length FFT, response symmetric about positive and
/// negative frequencies independently).
pub fn complex_bandpass_response(n: usize, samprate: f64, low_hz: f64, high_hz: f64, beta: f64) -> Vec<ComplexSample> {
    let taps = bandpass_sinc_taps(n, samprate, low_hz, high_hz, beta);
    fft_complex_taps(&taps, n)
}

fn bandpass_sinc_taps(n: usize, samprate: f64, low_hz: f64, high_hz: f64, beta: f64) -> Vec<f64> {
    let window = kaiser_window(n, beta);
    let center = (n - 1) as f64 / 2.0;
    let f_lo = low_hz / samprate;
    let f_hi = high_hz / samprate;
    (0..n)
        .map(|i| {
            let t = i as f64 - center;
            sinc(2.0 * f_hi * t) * 2.0 * f_hi - sinc(2.0 * f_lo * t) * 2.0 * f_lo
        })
        .zip(window.iter())
        .map(|(h, w)| h * w)
        .collect()
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (std::f64::consts::PI * x).sin() / (std::f64::consts::PI * x)
    }
}

/// Forward real-to-complex FFT of `taps` (zero-padded/truncated to `n`),
/// returning the one-sided `n/2+1` bins with the 3 dB real-input
/// normalization folded in (unity passband gain after the eventual inverse
/// FFT's unnormalized scaling is accounted for by the caller).
fn fft_real_taps(taps: &[f64], n: usize) -> Vec<ComplexSample> {
    let mut buf: Vec<ComplexSample> = (0..n)
        .map(|i| ComplexSample::new(*taps.get(i).unwrap_or(&0.0) as f32, 0.0))
        .collect();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buf);
    let bins = n / 2 + 1;
    buf.truncate(bins);
    // sqrt(2) folds the one-sided spectrum's missing negative-frequency
    // energy back in, giving the +3 dB correction from spec §8.
    buf.iter_mut().for_each(|b| *b *= std::f32::consts::SQRT_2);
    buf
}

fn fft_complex_taps(taps: &[f64], n: usize) -> Vec<ComplexSample> {
    let mut buf: Vec<ComplexSample> = (0..n)
        .map(|i| ComplexSample::new(*taps.get(i).unwrap_or(&0.0) as f32, 0.0))
        .collect();
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    fft.process(&mut buf);
    buf
}

/// Normalized-gain window used by the spectrum analyzer's fine-bin mode
/// (Kaiser, beta=5, scaled so the window's DC gain is unity). Spec §4.9.
pub fn unity_gain_kaiser(n: usize, beta: f64) -> Vec<f32> {
    let w = kaiser_window(n, beta);
    let sum: f64 = w.iter().sum();
    let scale = n as f64 / sum;
    w.iter().map(|x| (x * scale) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kaiser_window_is_symmetric_and_unity_at_center() {
        let w = kaiser_window(257, 11.0);
        assert!((w[0] - w[256]).abs() < 1e-12);
        assert!((w[128] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn real_bandpass_passes_in_band_energy() {
        let n = 1024;
        let samprate = 24000.0;
        let resp = real_bandpass_response(n, samprate, 300.0, 3000.0, 11.0);
        let passband_bin = (1500.0 / samprate * n as f64).round() as usize;
        let stopband_bin = (8000.0 / samprate * n as f64).round() as usize;
        assert!(resp[passband_bin].norm() > resp[stopband_bin].norm() * 10.0);
    }
}

//! Frequency-domain bin selection: the per-channel half of spec §4.2.

use fcsdr_core::ComplexSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Real,
    Complex,
}

/// Value of input bin `k`, reconstructing the Hermitian-symmetric upper half
/// for real input from the one-sided snapshot, or zero if `k` falls outside
/// the input's occupied range `[-(n/2), (n+1)/2)` (spec §4.2's "zero-pad
/// where the window falls outside the input's occupied range").
fn input_bin(snapshot: &[ComplexSample], n: usize, kind: SampleKind, k: i64) -> ComplexSample {
    let lo = -((n / 2) as i64);
    let hi = ((n + 1) / 2) as i64;
    if k < lo || k >= hi {
        return ComplexSample::new(0.0, 0.0);
    }
    let k = k.rem_euclid(n as i64) as usize;
    match kind {
        SampleKind::Complex => snapshot[k],
        SampleKind::Real => {
            let half = n / 2;
            if k <= half {
                snapshot[k]
            } else {
                snapshot[n - k].conj()
            }
        }
    }
}

/// Select `n_out`-long frequency-domain window from `snapshot` (the shared
/// input filter's latest forward-FFT result, `n_in` bins wide, of kind
/// `in_kind`) centered at bin offset `shift`, weighted by `response`
/// (`bins_out`-long), producing a full `n_out`-length spectrum ready for
/// the inverse FFT with the Nyquist bin zeroed.
///
/// `out_kind` selects which of the four combinations in spec §4.2 applies;
/// `CROSS_CONJ`/beam-forming are out of scope (flagged deprecated / unused
/// by spec's non-goals).
pub fn select_bins(
    snapshot: &[ComplexSample],
    n_in: usize,
    in_kind: SampleKind,
    n_out: usize,
    out_kind: SampleKind,
    shift: i64,
    response: &[ComplexSample],
) -> Vec<ComplexSample> {
    let mut full = vec![ComplexSample::new(0.0, 0.0); n_out];

    match (in_kind, out_kind) {
        (SampleKind::Complex, SampleKind::Complex) | (SampleKind::Real, SampleKind::Complex) => {
            let half = (n_out / 2) as i64;
            for bin_number in -half..(n_out as i64 - half) {
                let r = shift + bin_number;
                let w = bin_number.rem_euclid(n_out as i64) as usize;
                full[w] = input_bin(snapshot, n_in, in_kind, r) * response[w];
            }
        }
        (SampleKind::Complex, SampleKind::Real) => {
            let half = n_out / 2;
            for w in 0..=half {
                let r = shift + w as i64;
                let folded = input_bin(snapshot, n_in, in_kind, r) + input_bin(snapshot, n_in, in_kind, -r).conj();
                let val = folded * response[w];
                full[w] = val;
                if w != 0 && w != half {
                    full[n_out - w] = val.conj();
                }
            }
        }
        (SampleKind::Real, SampleKind::Real) => {
            let half = n_out / 2;
            for w in 0..=half {
                let r = shift + w as i64;
                let val = input_bin(snapshot, n_in, in_kind, r) * response[w];
                full[w] = val;
                if w != 0 && w != half {
                    full[n_out - w] = val.conj();
                }
            }
        }
    }

    if n_out % 2 == 0 {
        full[n_out / 2] = ComplexSample::new(0.0, 0.0);
    }
    full
}

/// Beam-forming variant (complex input only): treats the real and
/// imaginary parts of each input bin as two independent antenna channels,
/// combined with per-channel complex weights `alpha`, `beta`.
pub fn beamform_select(
    snapshot_a: &[ComplexSample],
    snapshot_b: &[ComplexSample],
    n_in: usize,
    n_out: usize,
    shift: i64,
    response: &[ComplexSample],
    alpha: ComplexSample,
    beta: ComplexSample,
) -> Vec<ComplexSample> {
    let mut full = vec![ComplexSample::new(0.0, 0.0); n_out];
    for (w, slot) in full.iter_mut().enumerate() {
        let r = shift + w as i64;
        let a = input_bin(snapshot_a, n_in, SampleKind::Complex, r);
        let b = input_bin(snapshot_b, n_in, SampleKind::Complex, r);
        *slot = (alpha * a + beta * b) * response[w];
    }
    if n_out % 2 == 0 {
        full[n_out / 2] = ComplexSample::new(0.0, 0.0);
    }
    full
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_zero_equal_bins_is_elementwise_product() {
        let n = 16;
        let snapshot: Vec<ComplexSample> = (0..n).map(|i| ComplexSample::new(i as f32, 0.0)).collect();
        let response: Vec<ComplexSample> = vec![ComplexSample::new(2.0, 0.0); n];
        let out = select_bins(&snapshot, n, SampleKind::Complex, n, SampleKind::Complex, 0, &response);
        for (w, val) in out.iter().enumerate() {
            if w == n / 2 {
                assert_eq!(*val, ComplexSample::new(0.0, 0.0)); // Nyquist zeroed
            } else {
                assert_eq!(*val, snapshot[w] * response[w]);
            }
        }
    }

    #[test]
    fn indices_stay_in_bounds_for_any_shift() {
        let n_in = 23;
        let n_out = 11;
        let snapshot = vec![ComplexSample::new(1.0, 0.0); n_in];
        let response = vec![ComplexSample::new(1.0, 0.0); n_out];
        for shift in [-1000i64, -7, 0, 7, 1000] {
            let out = select_bins(&snapshot, n_in, SampleKind::Complex, n_out, SampleKind::Complex, shift, &response);
            assert_eq!(out.len(), n_out);
        }
    }

    /// Downconversion (`n_out < n_in`): the negative-frequency half of the
    /// output must read from negative input bins, not `shift + w` directly.
    #[test]
    fn negative_frequency_half_centers_on_shift() {
        let n_in = 24;
        let n_out = 8;
        let mut snapshot = vec![ComplexSample::new(0.0, 0.0); n_in];
        snapshot[21] = ComplexSample::new(1.0, 0.0); // input bin -3
        let response = vec![ComplexSample::new(1.0, 0.0); n_out];
        let out = select_bins(&snapshot, n_in, SampleKind::Complex, n_out, SampleKind::Complex, 0, &response);
        // bin_number = -3 wraps to output index 5 (8 - 3).
        assert_eq!(out[5], ComplexSample::new(1.0, 0.0));
        for (w, val) in out.iter().enumerate() {
            if w != 5 {
                assert_eq!(*val, ComplexSample::new(0.0, 0.0), "unexpected energy at output bin {w}");
            }
        }
    }

    #[test]
    fn shift_past_occupied_range_zero_pads() {
        let n_in = 16;
        let n_out = 8;
        let snapshot = vec![ComplexSample::new(1.0, 0.0); n_in];
        let response = vec![ComplexSample::new(1.0, 0.0); n_out];
        // shift + bin_number never lands inside [-8, 8) for any bin_number
        // in this window once shift is pushed far enough past n_in's range.
        let out = select_bins(&snapshot, n_in, SampleKind::Complex, n_out, SampleKind::Complex, 1000, &response);
        for val in out {
            assert_eq!(val, ComplexSample::new(0.0, 0.0));
        }
    }
}

//! Overlap-save fast-convolution engine: one shared input filter runs the
//! forward FFT once per block; each channel's output filter selects its own
//! frequency-domain window and runs its own inverse FFT. Grounded on
//! `fcfb_ref.rs`'s `AnalysisInputProcessor`/`AnalysisOutputProcessor` pair,
//! generalized to the bin-shift/response model of spec §4.2 and the
//! real-vs-complex input handling of spec §3.

mod finetune;
mod input;
mod job;
mod output;
mod select;

pub use finetune::FineTune;
pub use input::{InputFilter, InputFilterShared, Notch};
pub use job::{run_forward_job, Job};
pub use output::OutputFilter;
pub use select::SampleKind;

/// Number of bins in a forward FFT of length `n`, given the input's sample
/// kind (spec §8's quantified invariant).
pub fn bin_count(n: usize, kind: SampleKind) -> usize {
    match kind {
        SampleKind::Complex => n,
        SampleKind::Real => n / 2 + 1,
    }
}

/// Factor the FFT length must admit for efficient computation: at most one
/// factor of 11 or 13, remaining factors drawn from {2,3,5,7}. Spec §4.2:
/// violating this doesn't fail creation, only emits a diagnostic.
pub fn is_well_factored(mut n: usize) -> bool {
    if n == 0 {
        return false;
    }
    let mut big_factor_used = false;
    for p in [2usize, 3, 5, 7, 11, 13] {
        while n % p == 0 {
            if p == 11 || p == 13 {
                if big_factor_used {
                    return false;
                }
                big_factor_used = true;
            }
            n /= p;
        }
    }
    n == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bin_counts_match_spec_invariant() {
        assert_eq!(bin_count(1440, SampleKind::Complex), 1440);
        assert_eq!(bin_count(1440, SampleKind::Real), 721);
    }

    #[test]
    fn well_factored_lengths() {
        assert!(is_well_factored(960)); // 2^6*3*5
        assert!(is_well_factored(5000)); // 2^3*5^4
        assert!(!is_well_factored(11 * 13 * 2)); // two large factors
        assert!(!is_well_factored(17)); // prime outside {2,3,5,7,11,13}
    }
}

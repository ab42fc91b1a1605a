//! Slave half of the fast-convolution engine: a per-channel output filter.
//! Spec §3 ("Output filter") and §4.2 ("Slave half, `execute-output(shift)`").

use super::input::InputFilterShared;
use super::select::{select_bins, SampleKind};
use fcsdr_core::{ComplexSample, CoreError};
use rustfft::{Fft, FftPlanner};
use std::sync::{Arc, Mutex};

/// A per-channel output filter. Holds a non-owning `Arc` reference to the
/// shared input filter it draws spectra from (Rust has no lifetime-checked
/// "must outlive" reference across worker threads, so `Arc` stands in for
/// the borrow spec §3 describes; the input filter is never destroyed while
/// any channel still references it).
pub struct OutputFilter {
    input: Arc<InputFilterShared>,
    pub l_out: usize,
    pub n_out: usize,
    pub kind: SampleKind,
    /// Protected separately so the response can be hot-swapped while the
    /// channel runs (spec §5: "protected by a per-filter response mutex").
    pub response: Mutex<Vec<ComplexSample>>,
    ifft: Arc<dyn Fft<f32>>,
    expected_job: u64,
    pub block_drops: u64,
}

impl OutputFilter {
    /// `l_out`/`n_out` must satisfy `bins_out * input.l == l_out * input.bins`
    /// exactly (spec §3's invariant and §8's quantified creation property).
    pub fn new(
        input: Arc<InputFilterShared>,
        input_l: usize,
        l_out: usize,
        n_out: usize,
        kind: SampleKind,
        response: Vec<ComplexSample>,
    ) -> Result<Self, CoreError> {
        let bins_out = super::bin_count(n_out, kind);
        if bins_out * input_l != l_out * input.bins {
            return Err(CoreError::InvalidConfig(format!(
                "bins'*L ({}) != L'*bins ({}): channel cannot exist at this rate",
                bins_out * input_l,
                l_out * input.bins
            )));
        }
        if response.len() != bins_out {
            return Err(CoreError::InvalidConfig(format!(
                "response length {} does not match bins' {}",
                response.len(),
                bins_out
            )));
        }

        let mut planner = FftPlanner::new();
        let ifft = planner.plan_fft_inverse(n_out);
        let expected_job = input.next_job_number();

        Ok(Self {
            input,
            l_out,
            n_out,
            kind,
            response: Mutex::new(response),
            ifft,
            expected_job,
            block_drops: 0,
        })
    }

    pub fn bins(&self) -> usize {
        super::bin_count(self.n_out, self.kind)
    }

    /// FFT length of the shared input filter this channel draws from, so a
    /// channel can derive the master's bin width (`samprate / master_n`)
    /// without needing its own copy of `N`.
    pub fn master_n(&self) -> usize {
        self.input.n
    }

    /// Wait for the next input snapshot, select bins centered at `shift`,
    /// run the inverse FFT, and return the `L'` usable (post-overlap-save)
    /// time-domain samples.
    pub fn execute_output(&mut self, shift: i64) -> Vec<ComplexSample> {
        let (snapshot, next_expected, drops) = self.input.wait_for_job(self.expected_job);
        if drops > 0 {
            self.block_drops += drops;
            tracing::warn!(drops, "output filter overrun, jumped to newest snapshot");
        }
        self.expected_job = next_expected;

        let response = self.response.lock().expect("response mutex poisoned");
        let mut spectrum = select_bins(
            &snapshot,
            self.input.n,
            self.input.kind,
            self.n_out,
            self.kind,
            shift,
            &response,
        );
        drop(response);

        self.ifft.process(&mut spectrum);
        let discard = self.n_out - self.l_out;
        spectrum.split_off(discard)
    }

    pub fn set_response(&self, response: Vec<ComplexSample>) {
        *self.response.lock().expect("response mutex poisoned") = response;
    }
}

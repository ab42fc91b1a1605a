//! The shared per-channel down-convert prologue (spec §4.5), common to all
//! four demodulators. Grounded on `soapy_dev.rs`'s `DemodulatorChannel` /
//! `process_block`: a per-channel struct mutated once per block, dispatched
//! by a match on its demodulator kind from the owning thread's run loop.

use crate::command::ChannelCommand;
use crate::frontend::FrontEndStatus;
use fcsdr_core::{ComplexSample, DemodKind};
use fcsdr_dsp::fastconv::{FineTune, OutputFilter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the owning thread should do after one prologue iteration.
pub enum Outcome {
    /// Baseband samples are ready for the demodulator proper.
    Ready(Vec<ComplexSample>),
    /// Carrier currently unreachable from the front end; indicators zeroed.
    OutOfCoverage,
    /// A command changed sample rate / demod kind / payload type; the
    /// owning thread should rebuild its output filter and demodulator from
    /// this command in place (spec §9's "cooperative restart") rather than
    /// relaunching a new thread.
    Restart(ChannelCommand),
    /// Lifetime expired at zero frequency.
    Terminate,
}

/// The tunable parameters a command or preset can change (spec §4.10);
/// everything but the *restart*-triggering fields (sample rate, demod kind,
/// payload type, handled by the supervisor instead).
#[derive(Debug, Clone)]
pub struct ChannelTuning {
    pub carrier_hz: f64,
    pub doppler_hz: f64,
    pub low_if_hz: f64,
    pub high_if_hz: f64,
    pub kaiser_beta: f64,
    pub squelch_open_db: f64,
    pub squelch_close_db: f64,
}

impl Default for ChannelTuning {
    fn default() -> Self {
        Self {
            carrier_hz: 0.0,
            doppler_hz: 0.0,
            low_if_hz: -3000.0,
            high_if_hz: 3000.0,
            kaiser_beta: 11.0,
            squelch_open_db: 8.0,
            squelch_close_db: 6.0,
        }
    }
}

/// The part of a channel visible outside its demodulator thread: looked up
/// in the [`crate::table::ChannelTable`] by stream ID, used to post a
/// command into the single-slot inbox or to request termination. The
/// thread-owned [`Channel`] below holds the rest (tuning, filters, DSP
/// state) privately, so no lock is needed for fields only that thread
/// touches (spec §5: "channel status mutex" protects only the inbox).
pub struct ChannelHandle {
    pub stream_id: u32,
    pub demod_kind: DemodKind,
    inbox: Mutex<Option<ChannelCommand>>,
    pub terminate: AtomicBool,
}

impl ChannelHandle {
    pub fn new(stream_id: u32, demod_kind: DemodKind) -> Self {
        Self {
            stream_id,
            demod_kind,
            inbox: Mutex::new(None),
            terminate: AtomicBool::new(false),
        }
    }

    pub fn post_command(&self, command: ChannelCommand) {
        *self.inbox.lock().expect("channel inbox mutex poisoned") = Some(command);
    }

    /// `pub(crate)` rather than private: the spectrum runtime polls its
    /// inbox directly, bypassing [`Channel::advance`] entirely since it has
    /// no output filter of its own to run a shared down-convert prologue on.
    pub(crate) fn take_command(&self) -> Option<ChannelCommand> {
        self.inbox.lock().expect("channel inbox mutex poisoned").take()
    }
}

pub struct Channel {
    pub handle: Arc<ChannelHandle>,
    pub output: OutputFilter,
    pub fine_tune: FineTune,
    pub front_end: Arc<FrontEndStatus>,
    pub tuning: ChannelTuning,
    pub samprate_out: f64,
    pub overlap_factor: usize,
    /// `samprate / master_n`, the master input filter's bin width in Hz.
    pub master_bin_width_hz: f64,
    pub last_shift: i64,
    pub lifetime_blocks: Option<u64>,
    pub baseband_power: f32,
    pub n0: f32,
    pub block_drops: u64,
    n0_smoothed: f32,
}

impl Channel {
    pub fn new(
        handle: Arc<ChannelHandle>,
        output: OutputFilter,
        front_end: Arc<FrontEndStatus>,
        samprate_out: f64,
        overlap_factor: usize,
        tuning: ChannelTuning,
    ) -> Self {
        let master_n = output.master_n();
        let master_bin_width_hz = front_end.snapshot().sample_rate_hz / master_n as f64;
        Self {
            handle,
            output,
            fine_tune: FineTune::new(samprate_out, overlap_factor),
            front_end,
            tuning,
            samprate_out,
            overlap_factor,
            master_bin_width_hz,
            last_shift: 0,
            lifetime_blocks: None,
            baseband_power: 0.0,
            n0: 1.0e-2 * 10.0, // biased 10x high to delay first use, spec §4.5 step 9
            block_drops: 0,
            n0_smoothed: 1.0e-2,
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.handle.stream_id
    }

    /// Runs the shared prologue for one block (spec §4.5). Step 7 (optional
    /// second-stage filter) is left to the caller, which knows whether its
    /// demodulator wants one.
    pub fn advance(&mut self) -> Outcome {
        if self.handle.terminate.load(Ordering::SeqCst) {
            return Outcome::Terminate;
        }

        if self.tuning.carrier_hz == 0.0 {
            if let Some(remaining) = self.lifetime_blocks {
                if remaining == 0 {
                    return Outcome::Terminate;
                }
                self.lifetime_blocks = Some(remaining - 1);
            }
        }

        if let Some(command) = self.handle.take_command() {
            if command.restart {
                return Outcome::Restart(command);
            }
            command.apply(self);
        }

        let snapshot = self.front_end.snapshot();
        self.master_bin_width_hz = snapshot.sample_rate_hz / self.output.master_n() as f64;
        let effective_hz = self.tuning.carrier_hz + self.tuning.doppler_hz;
        if !snapshot.covers(effective_hz) {
            self.front_end.wait_for_change(Duration::from_millis(20));
            self.baseband_power = 0.0;
            self.n0 = self.n0_smoothed * 10.0;
            return Outcome::OutOfCoverage;
        }

        let if_hz = effective_hz - snapshot.center_frequency_hz;
        let shift = (if_hz / self.master_bin_width_hz).round() as i64;
        let remainder_hz = if_hz - shift as f64 * self.master_bin_width_hz;

        let mut baseband = self.output.execute_output(-shift);
        self.block_drops = self.output.block_drops;

        if shift != self.last_shift {
            self.fine_tune.on_new_block(shift);
            self.last_shift = shift;
        }
        self.fine_tune.set_remainder(remainder_hz);
        self.fine_tune.apply(&mut baseband);

        let power: f32 = baseband.iter().map(|s| s.norm_sqr()).sum::<f32>() / baseband.len().max(1) as f32;
        self.baseband_power = power;

        if power > 0.0 {
            self.n0_smoothed += 0.001 * (power - self.n0_smoothed);
            self.n0 = self.n0_smoothed;
        }

        Outcome::Ready(baseband)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::FrontEndSnapshot;
    use fcsdr_dsp::fastconv::{InputFilter, SampleKind};

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
    fn out_of_coverage_zeros_indicators() {
        let mut ch = make_channel(1);
        ch.tuning.carrier_hz = 200_000_000.0; // far outside the 24 kHz front end
        match ch.advance() {
            Outcome::OutOfCoverage => {
                assert_eq!(ch.baseband_power, 0.0);
            }
            _ => panic!("expected OutOfCoverage"),
        }
    }

    #[test]
    fn zero_frequency_lifetime_expires() {
        let mut ch = make_channel(2);
        ch.lifetime_blocks = Some(1);
        // First call decrements 1 -> 0, still runs the rest of the prologue.
        let _ = ch.advance();
        // Second call sees 0 remaining and terminates before touching the
        // front end or output filter.
        match ch.advance() {
            Outcome::Terminate => {}
            _ => panic!("expected Terminate"),
        }
    }
}

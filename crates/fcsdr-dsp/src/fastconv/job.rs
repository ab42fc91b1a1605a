//! FFT job descriptor, spec §3: a unit of work handed to the worker pool
//! (or run inline when `worker_threads == 0`).

use super::input::InputFilterShared;
use fcsdr_core::ComplexSample;
use std::sync::Arc;

/// A forward-FFT job for the shared input filter, or a poison pill that
/// tells a worker to exit. `Terminate` exists for orderly shutdown; spec
/// §5 notes the field is unused in normal operation.
pub enum Job {
    Forward {
        shared: Arc<InputFilterShared>,
        samples: Vec<ComplexSample>,
        slot: usize,
        job_number: u64,
    },
    Terminate,
}

/// Runs one forward-FFT job to completion: FFT, notch, publish into the
/// snapshot ring, bump the completion field, and broadcast.
pub fn run_forward_job(shared: &InputFilterShared, mut samples: Vec<ComplexSample>, slot: usize, job_number: u64) {
    shared.fft.process(&mut samples);
    samples.truncate(shared.bins);

    {
        let mut notches = shared.notches.lock().expect("notch list mutex poisoned");
        for notch in notches.iter_mut() {
            if notch.bin_index == 0 {
                break; // DC-indexed terminator entry
            }
            if notch.bin_index < samples.len() {
                let bin = &mut samples[notch.bin_index];
                let mag = bin.norm();
                notch.smoothed_spur += notch.adaptation_rate * (mag - notch.smoothed_spur);
                if notch.smoothed_spur > 0.0 {
                    *bin *= 1.0 - (notch.smoothed_spur / mag).min(1.0);
                }
            }
        }
    }

    let (lock, cond) = &shared.state;
    let mut state = lock.lock().expect("input filter state mutex poisoned");
    state.snapshots[slot] = samples;
    state.completed_job[slot] = Some(job_number);
    cond.notify_all();
}

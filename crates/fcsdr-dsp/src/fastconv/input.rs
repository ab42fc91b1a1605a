//! Master half of the fast-convolution engine: the shared input filter.
//! Spec §3 ("Input filter") and §4.2 ("Master half").

use super::job::{run_forward_job, Job};
use super::select::SampleKind;
use crate::ringbuf::ComplexMirroredRingBuffer;
use crossbeam_channel::Sender;
use fcsdr_core::{ComplexSample, CoreError, ND};
use rustfft::{Fft, FftPlanner};
use std::sync::{Arc, Condvar, Mutex};

/// One entry of the optional per-input-filter notch list. The list
/// terminates with a `bin_index == 0` (DC) sentinel, per spec §3.
#[derive(Debug, Clone, Copy)]
pub struct Notch {
    pub bin_index: usize,
    pub smoothed_spur: f32,
    pub adaptation_rate: f32,
}

pub(super) struct InputFilterState {
    pub snapshots: Vec<Vec<ComplexSample>>,
    pub completed_job: Vec<Option<u64>>,
}

/// The part of the input filter shared with worker threads and every
/// output filter that references it. `state`/`cond` implement "a mutex plus
/// a broadcast condition" from spec §3.
pub struct InputFilterShared {
    pub bins: usize,
    pub n: usize,
    pub kind: SampleKind,
    pub fft: Arc<dyn Fft<f32>>,
    pub notches: Mutex<Vec<Notch>>,
    pub(super) state: (Mutex<InputFilterState>, Condvar),
    next_job: std::sync::atomic::AtomicU64,
}

impl InputFilterShared {
    /// Next job number the input filter will hand out (next call to
    /// `execute_input`'s job). Exposed so output filters can compute
    /// `expected_job` at creation time.
    pub fn next_job_number(&self) -> u64 {
        self.next_job.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Block until a snapshot at `expected` has landed, or until a newer
    /// one has (overrun). Returns `(snapshot, new_expected, drops)`.
    pub fn wait_for_job(&self, expected: u64) -> (Vec<ComplexSample>, u64, u64) {
        let (lock, cond) = &self.state;
        let mut state = lock.lock().expect("input filter state mutex poisoned");
        loop {
            let slot = (expected % ND as u64) as usize;
            if let Some(landed) = state.completed_job[slot] {
                if landed == expected {
                    return (state.snapshots[slot].clone(), expected + 1, 0);
                }
                if landed > expected {
                    let drops = landed - expected;
                    return (state.snapshots[slot].clone(), landed + 1, drops);
                }
            }
            state = cond.wait(state).expect("input filter condvar poisoned");
        }
    }
}

/// The shared input filter: consumes `L` new samples per block, runs one
/// forward FFT of length `N`, and publishes the result for every channel's
/// output filter to consume.
pub struct InputFilter {
    pub l: usize,
    pub m: usize,
    pub shared: Arc<InputFilterShared>,
    ring: ComplexMirroredRingBuffer,
    worker_tx: Option<Sender<Job>>,
}

impl InputFilter {
    /// `worker_tx`: `Some` to enqueue forward FFTs on the worker pool,
    /// `None` to run them inline on the caller's thread (spec §4.3: "the
    /// choice of inline vs. workers is frozen at filter creation").
    pub fn new(l: usize, m: usize, kind: SampleKind, worker_tx: Option<Sender<Job>>) -> Result<Self, CoreError> {
        if l == 0 || m == 0 {
            return Err(CoreError::InvalidConfig(format!("l={l} m={m} must both be > 0")));
        }
        let n = l + m - 1;
        if !super::is_well_factored(n) {
            tracing::warn!(n, "fft length does not factor into {{2,3,5,7}} with at most one 11/13 factor");
        }
        let bins = super::bin_count(n, kind);

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(n);

        let ring = ComplexMirroredRingBuffer::new(ND * n)
            .map_err(|_| CoreError::ResourceExhaustion("could not allocate input ring buffer".to_string()))?;

        let shared = Arc::new(InputFilterShared {
            bins,
            n,
            kind,
            fft,
            notches: Mutex::new(vec![Notch {
                bin_index: 0,
                smoothed_spur: 0.0,
                adaptation_rate: 0.0,
            }]),
            state: (
                Mutex::new(InputFilterState {
                    snapshots: vec![vec![ComplexSample::new(0.0, 0.0); bins]; ND],
                    completed_job: vec![None; ND],
                }),
                Condvar::new(),
            ),
            next_job: std::sync::atomic::AtomicU64::new(0),
        });

        Ok(Self {
            l,
            m,
            shared,
            ring,
            worker_tx,
        })
    }

    pub fn n(&self) -> usize {
        self.shared.n
    }

    pub fn bins(&self) -> usize {
        self.shared.bins
    }

    /// Overlap factor V = N/(M-1); the master FFT can shift by V-bin
    /// multiples without requiring a fine-tuning remainder (glossary).
    pub fn overlap_factor(&self) -> usize {
        self.shared.n / (self.m - 1).max(1)
    }

    /// Consume `L` newly arrived samples: append them to the ring, form the
    /// `M-1`-overlap + `L`-new window, and run (or enqueue) the forward FFT.
    pub fn execute_input(&mut self, new_samples: &[ComplexSample]) -> Result<(), CoreError> {
        if new_samples.len() != self.l {
            return Err(CoreError::InvalidConfig(format!(
                "expected {} new samples, got {}",
                self.l,
                new_samples.len()
            )));
        }
        let ring_len = self.ring.len();
        let write_pos = self.ring.push(new_samples);
        let new_write_pos = (write_pos + self.l) % ring_len;
        let n = self.shared.n;
        let window_start = (new_write_pos + ring_len - n) % ring_len;
        let window = self.ring.read_window(window_start, n);

        let job_number = self.shared.next_job.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let slot = (job_number % ND as u64) as usize;

        match &self.worker_tx {
            Some(tx) => {
                let job = Job::Forward {
                    shared: Arc::clone(&self.shared),
                    samples: window,
                    slot,
                    job_number,
                };
                tx.send(job).map_err(|_| CoreError::ResourceExhaustion("worker pool queue closed".to_string()))?;
            }
            None => run_forward_job(&self.shared, window, slot, job_number),
        }
        Ok(())
    }
}

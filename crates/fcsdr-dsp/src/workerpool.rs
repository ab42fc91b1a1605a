//! Forward-FFT worker pool, spec §4.3: a configurable number of threads
//! draining a single FIFO job queue. `W = 0` is handled by callers choosing
//! `worker_tx: None` on [`crate::fastconv::InputFilter`] and running jobs
//! inline; this module only exists for `W >= 1`.

use crate::fastconv::{run_forward_job, Job};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::thread::{self, JoinHandle};

/// Workers above this count are rejected at construction (spec §4.3,
/// §8: "W is clamped to a small ceiling").
pub const MAX_WORKERS: usize = 20;

pub struct WorkerPool {
    tx: Sender<Job>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` threads (1..=20) sharing one job queue.
    pub fn new(workers: usize) -> Result<Self, fcsdr_core::CoreError> {
        if workers == 0 || workers > MAX_WORKERS {
            return Err(fcsdr_core::CoreError::InvalidConfig(format!(
                "worker_threads must be in 1..={MAX_WORKERS}, got {workers}"
            )));
        }
        let (tx, rx): (Sender<Job>, Receiver<Job>) = unbounded();
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("fcsdr-fft-{i}"))
                .spawn(move || worker_loop(i, rx))
                .expect("failed to spawn fcsdr-fft worker thread");
            handles.push(handle);
        }
        Ok(Self { tx, handles })
    }

    pub fn sender(&self) -> Sender<Job> {
        self.tx.clone()
    }

    /// Sends a `Terminate` to every worker and waits for them to exit.
    pub fn shutdown(mut self) {
        for _ in &self.handles {
            let _ = self.tx.send(Job::Terminate);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(id: usize, rx: Receiver<Job>) {
    pin_and_prioritize(id);
    loop {
        match rx.recv() {
            Ok(Job::Forward {
                shared,
                samples,
                slot,
                job_number,
            }) => run_forward_job(&shared, samples, slot, job_number),
            Ok(Job::Terminate) | Err(_) => break,
        }
    }
}

/// Best-effort real-time priority and CPU pinning (spec §4.3, §9: "pinning
/// is advisory; a worker that cannot acquire real-time scheduling or
/// affinity still functions, only with weaker latency guarantees").
#[cfg(target_os = "linux")]
fn pin_and_prioritize(id: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        let ncpus = libc::sysconf(libc::_SC_NPROCESSORS_ONLN).max(1) as usize;
        libc::CPU_SET(id % ncpus, &mut set);
        let _ = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);

        let param = libc::sched_param {
            sched_priority: libc::sched_get_priority_max(libc::SCHED_FIFO) / 2,
        };
        let _ = libc::sched_setscheduler(0, libc::SCHED_FIFO, &param);
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_and_prioritize(_id: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_worker_count_out_of_range() {
        assert!(WorkerPool::new(0).is_err());
        assert!(WorkerPool::new(MAX_WORKERS + 1).is_err());
    }

    #[test]
    fn spawns_and_shuts_down_cleanly() {
        let pool = WorkerPool::new(2).expect("pool should spawn");
        pool.shutdown();
    }
}

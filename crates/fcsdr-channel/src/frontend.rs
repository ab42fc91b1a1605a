//! Front-end contract (spec §6) and the shared snapshot every channel reads
//! to compute its bin shift. Grounded on `soapyio.rs`'s device-setup and
//! `receive`/`rx_center_frequency`/`rx_sample_rate` surface, generalized
//! into a trait so a recorded-file source and a live SoapySDR device share
//! one interface.

use fcsdr_core::{ComplexSample, CoreError};
use fcsdr_dsp::fastconv::SampleKind;
use std::sync::{Condvar, Mutex};

/// Everything a channel needs to compute its bin shift and decide whether
/// its carrier currently falls inside the front end's usable IF (spec §3
/// "Front end snapshot").
#[derive(Debug, Clone, Copy)]
pub struct FrontEndSnapshot {
    pub center_frequency_hz: f64,
    pub sample_rate_hz: f64,
    pub calibration_ppm: f64,
    pub bit_depth: u32,
    pub min_if_hz: f64,
    pub max_if_hz: f64,
    pub kind: SampleKind,
    pub rf_gain_db: f64,
    pub rf_atten_db: f64,
}

impl FrontEndSnapshot {
    /// Whether `carrier_hz` (absolute RF frequency) is reachable from the
    /// current center frequency without exceeding the usable IF edges.
    pub fn covers(&self, carrier_hz: f64) -> bool {
        let if_hz = carrier_hz - self.center_frequency_hz;
        if_hz >= self.min_if_hz && if_hz <= self.max_if_hz
    }
}

/// Mutex-plus-condition wrapper so channels can block waiting for a retune
/// (spec §5: "demod thread ... may timeout on the front-end-status
/// condition when tuned outside coverage").
#[derive(Default)]
pub struct FrontEndStatus {
    state: Mutex<Option<FrontEndSnapshot>>,
    cond: Condvar,
}

impl FrontEndStatus {
    pub fn new(initial: FrontEndSnapshot) -> Self {
        Self {
            state: Mutex::new(Some(initial)),
            cond: Condvar::new(),
        }
    }

    pub fn publish(&self, snapshot: FrontEndSnapshot) {
        *self.state.lock().expect("front-end status mutex poisoned") = Some(snapshot);
        self.cond.notify_all();
    }

    pub fn snapshot(&self) -> FrontEndSnapshot {
        self.state
            .lock()
            .expect("front-end status mutex poisoned")
            .expect("front end published before first read")
    }

    /// Waits up to `timeout` for the next retune broadcast (spec §4.5 step
    /// 3's 20 ms timed wait); always returns the latest snapshot.
    pub fn wait_for_change(&self, timeout: std::time::Duration) -> FrontEndSnapshot {
        let guard = self.state.lock().expect("front-end status mutex poisoned");
        let (guard, _) = self.cond.wait_timeout(guard, timeout).expect("front-end status mutex poisoned");
        guard.expect("front end published before first read")
    }
}

/// The driver contract the core consumes (spec §6's "Front-end contract
/// (consumed)").
pub trait FrontEnd: Send {
    fn start(&mut self) -> Result<(), CoreError>;
    /// Requests the given absolute RF center frequency; returns the actual
    /// frequency achieved (front ends quantize to a PLL step size).
    fn tune(&mut self, hz: f64) -> Result<f64, CoreError>;
    fn gain(&mut self, db: f64) -> Result<f64, CoreError>;
    fn atten(&mut self, db: f64) -> Result<f64, CoreError>;
    /// Blocks for the next batch of freshly arrived samples, writing up to
    /// `buf.len()` of them and returning the count actually written.
    fn recv(&mut self, buf: &mut [ComplexSample]) -> Result<usize, CoreError>;
    fn sample_kind(&self) -> SampleKind;
}

//! Sample type aliases shared by every crate in the workspace.

/// A real-valued sample, as produced by the front end or an IIR stage.
pub type RealSample = f32;
/// A complex baseband sample, as produced by the fast-convolution engine.
pub type ComplexSample = num_complex::Complex<RealSample>;
/// Absolute sample counter, monotonic for the lifetime of a front end.
pub type SampleCount = i64;
/// Count of overlap-save blocks processed by the fast-convolution engine.
pub type BlockCount = u64;

/// Ring depth of frequency-domain snapshots a channel may lag the master by
/// before the producer overwrites and the channel must resynchronize.
pub const ND: usize = 4;

/// Which demodulator a channel runs. Drives both the down-convert loop's
/// dispatch and the command/status protocol's `demod_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DemodKind {
    /// AM/SSB/CW: envelope, coherent AM/DSB/PSK via PLL, or raw IQ.
    Linear,
    /// Narrowband FM with PL-tone squelch.
    Fm,
    /// Broadcast wideband FM with stereo pilot tracking.
    Wfm,
    /// Spectrum-analysis pseudo-demodulator.
    Spectrum,
}

/// FFT planning effort requested from the wisdom cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlanningLevel {
    Estimate,
    Measure,
    Patient,
    Exhaustive,
}

impl Default for PlanningLevel {
    fn default() -> Self {
        PlanningLevel::Estimate
    }
}

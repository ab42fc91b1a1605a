//! Error taxonomy for the fast-convolution DSP core.
//!
//! Most variants here are recoverable locally (see the comment on each) and
//! are surfaced mainly so callers can log or count them; only a handful
//! actually abort a create/reconfigure call.

use std::fmt;

/// Error kinds the core distinguishes, per the failure taxonomy in the
/// command/status and filter-creation paths.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// L/M/N out of range, `bins' * L != L' * bins`, an Opus-illegal sample
    /// rate, or a duplicate stream ID. The triggering create/reconfigure call
    /// fails and prior state is preserved.
    InvalidConfig(String),
    /// Cannot establish the mirrored mapping, cannot allocate frequency-domain
    /// scratch, or the channel table is full. Channel creation fails.
    ResourceExhaustion(String),
    /// The desired carrier lies outside the front end's usable IF. Not fatal:
    /// the channel loops with zeroed indicators and a timed wait.
    OutOfRangeTuning,
    /// A plan was not available at the requested planning level. Non-fatal:
    /// falls back to estimate level and the descriptor is logged.
    MissingWisdom(String),
    /// The forward FFT completed more than ND blocks ahead of a channel.
    /// Non-fatal: the channel jumps to the newest snapshot and counts drops.
    FilterOverrun { drops: u64 },
    /// The external output sink closed; the demodulator thread exits cleanly.
    StreamTerminated,
    /// A TLV field had an unknown type or a malformed value. Ignored; other
    /// fields in the same packet are still applied.
    InvalidCommand(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            CoreError::ResourceExhaustion(msg) => write!(f, "resource exhaustion: {msg}"),
            CoreError::OutOfRangeTuning => write!(f, "requested tuning is outside the front end's usable IF"),
            CoreError::MissingWisdom(desc) => write!(f, "no wisdom for plan {desc}, falling back to estimate"),
            CoreError::FilterOverrun { drops } => write!(f, "filter overrun, {drops} block(s) dropped"),
            CoreError::StreamTerminated => write!(f, "output stream terminated"),
            CoreError::InvalidCommand(msg) => write!(f, "invalid command field: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

/// True for kinds that the caller should treat as local/non-fatal recovery
/// rather than aborting whatever operation raised them.
impl CoreError {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::OutOfRangeTuning
                | CoreError::MissingWisdom(_)
                | CoreError::FilterOverrun { .. }
                | CoreError::InvalidCommand(_)
        )
    }
}

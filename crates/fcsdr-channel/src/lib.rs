//! Per-channel state machine, demodulators, and the front-end contract
//! (spec §§3-4, §6). Sits between `fcsdr-dsp`'s fast-convolution engine and
//! the daemon binary: owns everything from "here is a shifted baseband
//! block" down to "here is an audio frame or a spectrum", one channel per
//! demodulator thread.

pub mod channel;
pub mod command;
pub mod demod;
pub mod file_input;
pub mod frontend;
pub mod soapy;
pub mod supervisor;
pub mod table;

pub use channel::{Channel, ChannelHandle, ChannelTuning, Outcome};
pub use command::ChannelCommand;
pub use demod::AudioFrame;
pub use file_input::FileFrontEnd;
pub use frontend::{FrontEnd, FrontEndSnapshot, FrontEndStatus};
pub use soapy::SoapyFrontEnd;
pub use supervisor::{spawn_channel, AudioSink, EngineContext};
pub use table::ChannelTable;

//! The four demodulators (spec §4.6-§4.9), each consuming one block of
//! baseband from [`crate::channel::Channel::advance`] and producing one
//! [`AudioFrame`]. Grounded on `soapy_dev.rs`'s `process_block`, which plays
//! the same role for the teacher's PDU-based demodulator.

pub mod linear;
pub mod nbfm;
pub mod spectrum;
pub mod wfm;

/// One fixed-duration output frame (spec §6's "output contract").
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub channels: u8,
    pub mute: bool,
}

impl AudioFrame {
    pub fn silence(frames: usize, channels: u8) -> Self {
        Self {
            samples: vec![0.0; frames * channels as usize],
            channels,
            mute: true,
        }
    }
}

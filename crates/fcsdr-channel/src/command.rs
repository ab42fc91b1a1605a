//! Translates decoded TLV command packets into a `ChannelCommand` sitting
//! in a channel's single-slot inbox (spec §4.10). Grounded on the same
//! preset-then-fields precedence order the spec calls out, applied here as
//! plain struct mutation rather than the teacher's enum-match command
//! dispatch (no direct teacher analogue; closest is `soapy_dev.rs`'s
//! per-block command poll).

use crate::channel::{Channel, ChannelTuning};
use fcsdr_config::ChannelPreset;
use fcsdr_core::DemodKind;
use fcsdr_proto::{Field, Packet, Tag, Value};

/// A decoded command, ready to post to a channel's inbox. Fields that
/// change sample rate, demodulator kind, or payload encoding are surfaced
/// as `restart` rather than applied directly, since only the supervisor
/// that owns the demod thread can relaunch it (spec §4.10, §9's
/// "cooperative restart" design note).
#[derive(Debug, Clone, Default)]
pub struct ChannelCommand {
    pub restart: bool,
    pub new_filter: bool,
    pub requested_demod_kind: Option<DemodKind>,
    pub requested_output_samprate: Option<u32>,
    pub requested_output_channels: Option<u8>,
    /// PL-tone (CTCSS) squelch frequency for the narrowband-FM demodulator;
    /// bakes into `NbfmParams` at (re)build time, so changing it restarts
    /// the channel rather than applying in place.
    pub pl_tone_hz: Option<f64>,
    /// Linear-demod sub-mode selectors (spec §4.6): `pll_enable`/`pll_square`
    /// choose coherent/DSB detection, `envelope_mode` chooses envelope AM.
    /// Absent a field, IQ is implied by `requested_output_channels == 2` and
    /// SSB is the fallback — see `supervisor::linear_mode_from_command`.
    pub pll_enable: Option<bool>,
    pub pll_square: Option<bool>,
    pub envelope_mode: Option<bool>,
    /// Spectrum-analyzer bin count (spec §4.9); bakes into `WideBinSpectrum`
    /// at construction time.
    pub spectrum_bin_count: Option<u32>,
    carrier_hz: Option<f64>,
    doppler_hz: Option<f64>,
    low_if_hz: Option<f64>,
    high_if_hz: Option<f64>,
    kaiser_beta: Option<f64>,
    squelch_open_db: Option<f64>,
    squelch_close_db: Option<f64>,
}

impl ChannelCommand {
    /// Decodes one packet's fields into a command, applying a named preset
    /// first (if a `PresetName` field is present) so individual fields in
    /// the same packet can still override it (spec §4.10).
    pub fn from_packet(packet: &Packet, presets: &[ChannelPreset]) -> Self {
        let mut command = ChannelCommand::default();

        if let Some(preset) = packet
            .fields
            .iter()
            .find_map(|f| match (&f.tag, &f.value) {
                (Tag::PresetName, Value::Str(name)) => presets.iter().find(|p| &p.name == name),
                _ => None,
            })
        {
            command.requested_demod_kind = Some(preset.demod_type.into());
            command.low_if_hz = preset.low_if_hz;
            command.high_if_hz = preset.high_if_hz;
            command.kaiser_beta = preset.kaiser_beta;
            command.squelch_open_db = preset.squelch_open_db;
            command.squelch_close_db = preset.squelch_close_db;
            command.requested_output_samprate = preset.output_samprate;
            command.restart = true;
            command.new_filter = true;
        }

        for field in &packet.fields {
            apply_field(&mut command, field);
        }
        command
    }

    /// Applies the non-restart fields to a running channel's tuning
    /// (spec §4.5 step 2: "other fields ... take effect on the next
    /// iteration").
    pub fn apply(&self, channel: &mut Channel) {
        channel.tuning = self.apply_to_tuning(channel.tuning.clone());
    }

    /// Same field-by-field override as [`Self::apply`], but against a bare
    /// [`ChannelTuning`] rather than a live channel — used when a channel is
    /// first created or rebuilt, before its output filter (and therefore its
    /// `Channel`) exists yet.
    pub fn apply_to_tuning(&self, mut tuning: ChannelTuning) -> ChannelTuning {
        if let Some(v) = self.carrier_hz {
            tuning.carrier_hz = v;
        }
        if let Some(v) = self.doppler_hz {
            tuning.doppler_hz = v;
        }
        if let Some(v) = self.low_if_hz {
            tuning.low_if_hz = v;
        }
        if let Some(v) = self.high_if_hz {
            tuning.high_if_hz = v;
        }
        if let Some(v) = self.kaiser_beta {
            tuning.kaiser_beta = v;
        }
        if let Some(v) = self.squelch_open_db {
            tuning.squelch_open_db = v;
        }
        if let Some(v) = self.squelch_close_db {
            tuning.squelch_close_db = v;
        }
        tuning
    }
}

fn apply_field(command: &mut ChannelCommand, field: &Field) {
    match (&field.tag, &field.value) {
        (Tag::CarrierFrequency, Value::Float(v)) => command.carrier_hz = Some(*v),
        (Tag::Doppler, Value::Float(v)) => command.doppler_hz = Some(*v),
        (Tag::LowIfEdge, Value::Float(v)) => {
            command.low_if_hz = Some(*v);
            command.new_filter = true;
        }
        (Tag::HighIfEdge, Value::Float(v)) => {
            command.high_if_hz = Some(*v);
            command.new_filter = true;
        }
        (Tag::KaiserBeta, Value::Float(v)) => {
            command.kaiser_beta = Some(*v);
            command.new_filter = true;
        }
        (Tag::SquelchOpen, Value::Float(v)) => command.squelch_open_db = Some(*v),
        (Tag::SquelchClose, Value::Float(v)) => command.squelch_close_db = Some(*v),
        (Tag::DemodKind, Value::Int(v)) => {
            if let Some(kind) = demod_kind_from_wire(*v) {
                command.requested_demod_kind = Some(kind);
                command.restart = true;
            }
        }
        (Tag::OutputSampleRate, Value::Float(v)) => {
            command.requested_output_samprate = Some(*v as u32);
            command.restart = true;
        }
        (Tag::OutputChannels, Value::Int(v)) => {
            command.requested_output_channels = Some(*v as u8);
            command.restart = true;
        }
        (Tag::OutputEncoding, Value::Int(_)) => {
            command.restart = true;
        }
        (Tag::PlToneFrequency, Value::Float(v)) => {
            command.pl_tone_hz = Some(*v);
            command.restart = true;
        }
        (Tag::PllEnable, Value::Int(v)) => {
            command.pll_enable = Some(*v != 0);
            command.restart = true;
        }
        (Tag::PllSquare, Value::Int(v)) => {
            command.pll_square = Some(*v != 0);
            command.restart = true;
        }
        (Tag::EnvelopeMode, Value::Int(v)) => {
            command.envelope_mode = Some(*v != 0);
            command.restart = true;
        }
        (Tag::SpectrumBinCount, Value::Int(v)) if *v > 0 => {
            command.spectrum_bin_count = Some(*v as u32);
            command.restart = true;
        }
        _ => {}
    }
}

fn demod_kind_from_wire(v: i64) -> Option<DemodKind> {
    match v {
        0 => Some(DemodKind::Linear),
        1 => Some(DemodKind::Fm),
        2 => Some(DemodKind::Wfm),
        3 => Some(DemodKind::Spectrum),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcsdr_proto::PacketKind;

    #[test]
    fn preset_applies_before_individual_fields_override_it() {
        let presets = vec![ChannelPreset {
            name: "usb".to_string(),
            demod_type: fcsdr_config::PresetDemodKind::Linear,
            low_if_hz: Some(300.0),
            high_if_hz: Some(3000.0),
            kaiser_beta: Some(11.0),
            squelch_open_db: Some(8.0),
            squelch_close_db: Some(6.0),
            output_samprate: Some(12_000),
        }];
        let packet = Packet {
            kind: PacketKind::Command,
            fields: vec![
                Field {
                    tag: Tag::PresetName,
                    value: Value::Str("usb".to_string()),
                },
                Field {
                    tag: Tag::HighIfEdge,
                    value: Value::Float(2_700.0),
                },
            ],
        };
        let command = ChannelCommand::from_packet(&packet, &presets);
        assert_eq!(command.low_if_hz, Some(300.0));
        assert_eq!(command.high_if_hz, Some(2_700.0));
    }

    #[test]
    fn mode_selecting_fields_parse_and_force_a_restart() {
        let packet = Packet {
            kind: PacketKind::Command,
            fields: vec![
                Field {
                    tag: Tag::PlToneFrequency,
                    value: Value::Float(123.0),
                },
                Field {
                    tag: Tag::PllEnable,
                    value: Value::Int(1),
                },
                Field {
                    tag: Tag::PllSquare,
                    value: Value::Int(0),
                },
                Field {
                    tag: Tag::EnvelopeMode,
                    value: Value::Int(1),
                },
                Field {
                    tag: Tag::SpectrumBinCount,
                    value: Value::Int(512),
                },
            ],
        };
        let command = ChannelCommand::from_packet(&packet, &[]);
        assert_eq!(command.pl_tone_hz, Some(123.0));
        assert_eq!(command.pll_enable, Some(true));
        assert_eq!(command.pll_square, Some(false));
        assert_eq!(command.envelope_mode, Some(true));
        assert_eq!(command.spectrum_bin_count, Some(512));
        assert!(command.restart);
    }

    #[test]
    fn non_positive_spectrum_bin_count_is_ignored() {
        let packet = Packet {
            kind: PacketKind::Command,
            fields: vec![Field {
                tag: Tag::SpectrumBinCount,
                value: Value::Int(0),
            }],
        };
        let command = ChannelCommand::from_packet(&packet, &[]);
        assert_eq!(command.spectrum_bin_count, None);
        assert!(!command.restart);
    }
}

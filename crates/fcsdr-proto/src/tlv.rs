//! Command/status wire format, spec §6: a byte stream of `(type:u8,
//! length:varint, value:bytes)` triples terminated by `type=0`.

use fcsdr_core::CoreError;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Packet kind discriminator (spec §6's "one-byte kind discriminator").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Status,
    Command,
}

impl PacketKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(PacketKind::Status),
            1 => Some(PacketKind::Command),
            _ => None,
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            PacketKind::Status => 0,
            PacketKind::Command => 1,
        }
    }
}

/// The recognised field tags (spec §6, non-exhaustive list). Tag 0 is
/// reserved as the end-of-list terminator and never appears as a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    StreamId = 1,
    CommandTag = 2,
    DemodKind = 3,
    CarrierFrequency = 4,
    FirstLoFrequency = 5,
    Doppler = 6,
    DopplerRate = 7,
    PostDemodShift = 8,
    LowIfEdge = 9,
    HighIfEdge = 10,
    KaiserBeta = 11,
    PresetName = 12,
    SquelchOpen = 13,
    SquelchClose = 14,
    PlToneFrequency = 15,
    AgcEnable = 16,
    AgcHang = 17,
    AgcRecoveryRate = 18,
    AgcThreshold = 19,
    PllEnable = 20,
    PllBandwidth = 21,
    PllSquare = 22,
    EnvelopeMode = 23,
    OutputSampleRate = 24,
    OutputChannels = 25,
    OutputEncoding = 26,
    MinPacketDuration = 27,
    StatusInterval = 28,
    SetOptions = 29,
    ClearOptions = 30,
    SpectrumBinCount = 31,
    SpectrumResolutionBw = 32,
    SpectrumCrossover = 33,
    SpectrumWindowKind = 34,
    SpectrumShapeParam = 35,
    SpectrumFftLen = 36,
    SpectrumAveragingCount = 37,
    StatusSocket = 38,
}

impl Tag {
    fn from_byte(b: u8) -> Option<Self> {
        use Tag::*;
        Some(match b {
            1 => StreamId,
            2 => CommandTag,
            3 => DemodKind,
            4 => CarrierFrequency,
            5 => FirstLoFrequency,
            6 => Doppler,
            7 => DopplerRate,
            8 => PostDemodShift,
            9 => LowIfEdge,
            10 => HighIfEdge,
            11 => KaiserBeta,
            12 => PresetName,
            13 => SquelchOpen,
            14 => SquelchClose,
            15 => PlToneFrequency,
            16 => AgcEnable,
            17 => AgcHang,
            18 => AgcRecoveryRate,
            19 => AgcThreshold,
            20 => PllEnable,
            21 => PllBandwidth,
            22 => PllSquare,
            23 => EnvelopeMode,
            24 => OutputSampleRate,
            25 => OutputChannels,
            26 => OutputEncoding,
            27 => MinPacketDuration,
            28 => StatusInterval,
            29 => SetOptions,
            30 => ClearOptions,
            31 => SpectrumBinCount,
            32 => SpectrumResolutionBw,
            33 => SpectrumCrossover,
            34 => SpectrumWindowKind,
            35 => SpectrumShapeParam,
            36 => SpectrumFftLen,
            37 => SpectrumAveragingCount,
            38 => StatusSocket,
            _ => return None,
        })
    }
}

/// A decoded TLV value (spec §6: "integers ... floats ... strings ...
/// sockets ... or vectors of floats").
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Socket(SocketAddr),
    Floats(Vec<f32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub tag: Tag,
    pub value: Value,
}

/// One decoded command or status packet: its kind plus the fields that
/// parsed successfully. Unknown tags or malformed values are dropped
/// (spec §7's *invalid-command*: "other fields in the same packet are
/// still applied").
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub kind: PacketKind,
    pub fields: Vec<Field>,
}

fn encode_length(len: usize, out: &mut Vec<u8>) {
    if len < 128 {
        out.push(len as u8);
    } else {
        let bytes = len.to_be_bytes();
        let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
        let tail = &bytes[first_nonzero..];
        out.push(0x80 | tail.len() as u8);
        out.extend_from_slice(tail);
    }
}

fn decode_length(buf: &[u8]) -> Option<(usize, usize)> {
    let first = *buf.first()?;
    if first & 0x80 == 0 {
        Some((first as usize, 1))
    } else {
        let n = (first & 0x7f) as usize;
        if n == 0 || n > 8 || buf.len() < 1 + n {
            return None;
        }
        let mut len = 0usize;
        for &b in &buf[1..1 + n] {
            len = (len << 8) | b as usize;
        }
        Some((len, 1 + n))
    }
}

fn encode_value(tag: Tag, value: &Value, out: &mut Vec<u8>) {
    let mut body = Vec::new();
    match value {
        Value::Int(i) => {
            let bytes = i.to_be_bytes();
            let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
            body.extend_from_slice(&bytes[first_nonzero..]);
            if body.is_empty() {
                body.push(0);
            }
        }
        Value::Float(f) => body.extend_from_slice(&f.to_be_bytes()),
        Value::Str(s) => body.extend_from_slice(s.as_bytes()),
        Value::Socket(addr) => encode_socket(*addr, &mut body),
        Value::Floats(v) => {
            for f in v {
                body.extend_from_slice(&f.to_be_bytes());
            }
        }
    }
    out.push(tag as u8);
    encode_length(body.len(), out);
    out.extend_from_slice(&body);
}

fn encode_socket(addr: SocketAddr, out: &mut Vec<u8>) {
    match addr {
        SocketAddr::V4(a) => {
            out.push(4);
            out.extend_from_slice(&a.ip().octets());
            out.extend_from_slice(&a.port().to_be_bytes());
        }
        SocketAddr::V6(a) => {
            out.push(6);
            out.extend_from_slice(&a.ip().octets());
            out.extend_from_slice(&a.port().to_be_bytes());
        }
    }
}

fn decode_socket(body: &[u8]) -> Option<SocketAddr> {
    match body.first()? {
        4 if body.len() == 7 => {
            let octets: [u8; 4] = body[1..5].try_into().ok()?;
            let port = u16::from_be_bytes(body[5..7].try_into().ok()?);
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        6 if body.len() == 19 => {
            let octets: [u8; 16] = body[1..17].try_into().ok()?;
            let port = u16::from_be_bytes(body[17..19].try_into().ok()?);
            Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        _ => None,
    }
}

/// Which value kind a given tag decodes as. Most tags are a plain integer
/// or float; this table is the only place that distinction lives.
fn value_kind(tag: Tag) -> ValueKind {
    use Tag::*;
    use ValueKind::*;
    match tag {
        StreamId | CommandTag | DemodKind | OutputChannels | OutputEncoding | SetOptions | ClearOptions
        | SpectrumBinCount | SpectrumFftLen | SpectrumAveragingCount | SpectrumWindowKind => Int,
        AgcEnable | PllEnable | PllSquare | EnvelopeMode => Int,
        CarrierFrequency | FirstLoFrequency | Doppler | DopplerRate | PostDemodShift | LowIfEdge | HighIfEdge
        | KaiserBeta | SquelchOpen | SquelchClose | PlToneFrequency | AgcHang | AgcRecoveryRate | AgcThreshold
        | PllBandwidth | OutputSampleRate | MinPacketDuration | StatusInterval | SpectrumResolutionBw
        | SpectrumCrossover | SpectrumShapeParam => Float,
        PresetName => Str,
        StatusSocket => Socket,
    }
}

enum ValueKind {
    Int,
    Float,
    Str,
    Socket,
}

fn decode_value(tag: Tag, body: &[u8]) -> Option<Value> {
    match value_kind(tag) {
        ValueKind::Int => {
            if body.is_empty() || body.len() > 8 {
                return None;
            }
            let mut v: i64 = 0;
            for &b in body {
                v = (v << 8) | b as i64;
            }
            Some(Value::Int(v))
        }
        ValueKind::Float => match body.len() {
            4 => Some(Value::Float(f32::from_be_bytes(body.try_into().ok()?) as f64)),
            8 => Some(Value::Float(f64::from_be_bytes(body.try_into().ok()?))),
            _ => None,
        },
        ValueKind::Str => std::str::from_utf8(body).ok().map(|s| Value::Str(s.to_string())),
        ValueKind::Socket => decode_socket(body).map(Value::Socket),
    }
}

impl Packet {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.kind.to_byte()];
        for field in &self.fields {
            encode_value(field.tag, &field.value, &mut out);
        }
        out.push(0);
        out
    }

    /// Decodes a packet, dropping any field with an unrecognised tag or a
    /// malformed value (spec §7 *invalid-command*: ignored, other fields
    /// still applied).
    pub fn decode(buf: &[u8]) -> Result<Self, CoreError> {
        let kind_byte = *buf.first().ok_or_else(|| CoreError::InvalidCommand("empty packet".to_string()))?;
        let kind =
            PacketKind::from_byte(kind_byte).ok_or_else(|| CoreError::InvalidCommand(format!("bad kind byte {kind_byte}")))?;

        let mut fields = Vec::new();
        let mut pos = 1usize;
        loop {
            let tag_byte = *buf
                .get(pos)
                .ok_or_else(|| CoreError::InvalidCommand("truncated packet, missing terminator".to_string()))?;
            pos += 1;
            if tag_byte == 0 {
                break;
            }
            let (len, consumed) = match decode_length(&buf[pos..]) {
                Some(v) => v,
                None => {
                    tracing::warn!(tag_byte, "malformed length field, packet truncated at this field");
                    break;
                }
            };
            pos += consumed;
            let Some(body) = buf.get(pos..pos + len) else {
                tracing::warn!(tag_byte, len, "value runs past end of packet");
                break;
            };
            pos += len;

            match Tag::from_byte(tag_byte) {
                Some(tag) => match decode_value(tag, body) {
                    Some(value) => fields.push(Field { tag, value }),
                    None => tracing::warn!(?tag, "malformed value for tag, field ignored"),
                },
                None => tracing::warn!(tag_byte, "unrecognised tag, field ignored"),
            }
        }
        Ok(Packet { kind, fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_mixed_command_packet() {
        let packet = Packet {
            kind: PacketKind::Command,
            fields: vec![
                Field {
                    tag: Tag::StreamId,
                    value: Value::Int(0x1234_5678),
                },
                Field {
                    tag: Tag::CarrierFrequency,
                    value: Value::Float(14_250_000.0),
                },
                Field {
                    tag: Tag::PresetName,
                    value: Value::Str("usb".to_string()),
                },
                Field {
                    tag: Tag::StatusSocket,
                    value: Value::Socket("239.192.1.1:5006".parse().unwrap()),
                },
            ],
        };
        let bytes = packet.encode();
        let decoded = Packet::decode(&bytes).expect("valid packet decodes");
        assert_eq!(decoded, packet);
    }

    #[test]
    fn long_length_encoding_round_trips() {
        let floats = vec![1.0f32; 200];
        let packet = Packet {
            kind: PacketKind::Status,
            fields: vec![Field {
                tag: Tag::SpectrumBinCount,
                value: Value::Int(200),
            }],
        };
        let bytes = packet.encode();
        assert!(Packet::decode(&bytes).is_ok());
        let _ = floats;
    }

    #[test]
    fn unknown_tag_is_dropped_but_siblings_survive() {
        let mut bytes = vec![PacketKind::Command.to_byte()];
        encode_value(Tag::StreamId, &Value::Int(7), &mut bytes);
        bytes.push(200); // unrecognised tag
        encode_length(2, &mut bytes);
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        encode_value(Tag::CommandTag, &Value::Int(1), &mut bytes);
        bytes.push(0);

        let decoded = Packet::decode(&bytes).expect("should still decode");
        assert_eq!(decoded.fields.len(), 2);
        assert_eq!(decoded.fields[0].tag, Tag::StreamId);
        assert_eq!(decoded.fields[1].tag, Tag::CommandTag);
    }
}

//! Recorded-file front end (spec §10.2's "recorded-file input"), used with
//! `PhyBackend::None` in place of a live SoapySDR device. Grounded on the
//! same [`FrontEnd`] contract `soapy.rs` implements; paced to the file's
//! nominal sample rate with a simple sleep rather than a hardware clock, so
//! a recording played back through this front end drives the engine at the
//! same cadence live capture would.

use crate::frontend::FrontEnd;
use fcsdr_config::{CfgFileInput, FileSampleFormat};
use fcsdr_core::{ComplexSample, CoreError};
use fcsdr_dsp::fastconv::SampleKind;
use std::fs::File;
use std::io::{BufReader, Read};
use std::time::{Duration, Instant};

pub struct FileFrontEnd {
    reader: BufReader<File>,
    format: FileSampleFormat,
    sample_rate_hz: f64,
    center_frequency_hz: f64,
    loop_playback: bool,
    path: String,
    next_release: Option<Instant>,
}

impl FileFrontEnd {
    pub fn open(cfg: &CfgFileInput) -> Result<Self, CoreError> {
        let file = File::open(&cfg.path)
            .map_err(|err| CoreError::InvalidConfig(format!("cannot open recorded-file input '{}': {err}", cfg.path)))?;
        Ok(Self {
            reader: BufReader::new(file),
            format: cfg.format,
            sample_rate_hz: cfg.sample_rate_hz,
            center_frequency_hz: cfg.center_frequency_hz,
            loop_playback: cfg.loop_playback,
            path: cfg.path.clone(),
            next_release: None,
        })
    }

    fn bytes_per_sample(&self) -> usize {
        match self.format {
            FileSampleFormat::ComplexF32 => 8,
            FileSampleFormat::ComplexS16 => 4,
            FileSampleFormat::RealF32 => 4,
        }
    }

    fn decode_into(&self, raw: &[u8], out: &mut [ComplexSample]) {
        match self.format {
            FileSampleFormat::ComplexF32 => {
                for (chunk, sample) in raw.chunks_exact(8).zip(out.iter_mut()) {
                    let re = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    let im = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
                    *sample = ComplexSample::new(re, im);
                }
            }
            FileSampleFormat::ComplexS16 => {
                for (chunk, sample) in raw.chunks_exact(4).zip(out.iter_mut()) {
                    let re = i16::from_le_bytes([chunk[0], chunk[1]]);
                    let im = i16::from_le_bytes([chunk[2], chunk[3]]);
                    *sample = ComplexSample::new(re as f32 / 32768.0, im as f32 / 32768.0);
                }
            }
            FileSampleFormat::RealF32 => {
                for (chunk, sample) in raw.chunks_exact(4).zip(out.iter_mut()) {
                    let re = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                    *sample = ComplexSample::new(re, 0.0);
                }
            }
        }
    }

    /// Sleeps, if necessary, so `recv` returns at most once per block
    /// period rather than as fast as the disk can be read.
    fn pace(&mut self, n: usize) {
        let period = Duration::from_secs_f64(n as f64 / self.sample_rate_hz.max(1.0));
        let now = Instant::now();
        if let Some(release) = self.next_release {
            if release > now {
                std::thread::sleep(release - now);
            }
            self.next_release = Some(release.max(now) + period);
        } else {
            self.next_release = Some(now + period);
        }
    }
}

impl FrontEnd for FileFrontEnd {
    fn start(&mut self) -> Result<(), CoreError> {
        Ok(())
    }

    fn tune(&mut self, _hz: f64) -> Result<f64, CoreError> {
        // A recording was captured at one fixed center frequency; retuning
        // it is meaningless, so report the file's frequency unchanged.
        Ok(self.center_frequency_hz)
    }

    fn gain(&mut self, _db: f64) -> Result<f64, CoreError> {
        Ok(0.0)
    }

    fn atten(&mut self, _db: f64) -> Result<f64, CoreError> {
        Ok(0.0)
    }

    fn recv(&mut self, buf: &mut [ComplexSample]) -> Result<usize, CoreError> {
        let bps = self.bytes_per_sample();
        let mut raw = vec![0u8; buf.len() * bps];
        let mut filled = 0usize;

        while filled < raw.len() {
            match self.reader.read(&mut raw[filled..]) {
                Ok(0) => {
                    if !self.loop_playback {
                        break;
                    }
                    let file = File::open(&self.path)
                        .map_err(|err| CoreError::InvalidConfig(format!("cannot reopen recorded-file input '{}': {err}", self.path)))?;
                    self.reader = BufReader::new(file);
                }
                Ok(n) => filled += n,
                Err(err) => {
                    tracing::warn!("recorded-file input read error: {err}");
                    return Err(CoreError::StreamTerminated);
                }
            }
        }

        if filled == 0 {
            return Err(CoreError::StreamTerminated);
        }

        let n = filled / bps;
        self.decode_into(&raw[..n * bps], &mut buf[..n]);
        self.pace(n);
        Ok(n)
    }

    fn sample_kind(&self) -> SampleKind {
        match self.format {
            FileSampleFormat::RealF32 => SampleKind::Real,
            FileSampleFormat::ComplexF32 | FileSampleFormat::ComplexS16 => SampleKind::Complex,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_complex_f32_file(path: &std::path::Path, samples: &[(f32, f32)]) {
        let mut f = File::create(path).unwrap();
        for &(re, im) in samples {
            f.write_all(&re.to_le_bytes()).unwrap();
            f.write_all(&im.to_le_bytes()).unwrap();
        }
    }

    #[test]
    fn decodes_complex_f32_samples() {
        let dir = std::env::temp_dir();
        let path = dir.join("fcsdr_channel_test_complex_f32.iq");
        write_complex_f32_file(&path, &[(1.0, -1.0), (0.5, 0.25)]);

        let cfg = CfgFileInput {
            path: path.to_string_lossy().into_owned(),
            sample_rate_hz: 1_000_000.0,
            center_frequency_hz: 100_000_000.0,
            format: FileSampleFormat::ComplexF32,
            loop_playback: false,
        };
        let mut front_end = FileFrontEnd::open(&cfg).unwrap();
        let mut buf = vec![ComplexSample::new(0.0, 0.0); 2];
        let n = front_end.recv(&mut buf).unwrap();
        assert_eq!(n, 2);
        assert_eq!(buf[0], ComplexSample::new(1.0, -1.0));
        assert_eq!(buf[1], ComplexSample::new(0.5, 0.25));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn returns_stream_terminated_at_eof_without_looping() {
        let dir = std::env::temp_dir();
        let path = dir.join("fcsdr_channel_test_short.iq");
        write_complex_f32_file(&path, &[(1.0, 0.0)]);

        let cfg = CfgFileInput {
            path: path.to_string_lossy().into_owned(),
            sample_rate_hz: 1_000_000.0,
            center_frequency_hz: 100_000_000.0,
            format: FileSampleFormat::ComplexF32,
            loop_playback: false,
        };
        let mut front_end = FileFrontEnd::open(&cfg).unwrap();
        let mut buf = vec![ComplexSample::new(0.0, 0.0); 4];
        let _ = front_end.recv(&mut buf);
        let err = front_end.recv(&mut buf).unwrap_err();
        assert!(matches!(err, CoreError::StreamTerminated));

        let _ = std::fs::remove_file(&path);
    }
}

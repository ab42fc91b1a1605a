//! SoapySDR-backed front end (spec §6's front-end contract). Grounded on
//! `soapyio.rs`'s device-open/configure/activate sequence, trimmed to
//! receive-only since this daemon never transmits.

use crate::frontend::FrontEnd;
use fcsdr_config::{CfgSoapySdr, SoapySdrIoCfg};
use fcsdr_core::{ComplexSample, CoreError};
use fcsdr_dsp::fastconv::SampleKind;

/// Same "log-then-propagate" shape as the teacher's `soapycheck!` macro,
/// as a function since `?` already carries the SoapySDR error type.
fn check<T>(what: &str, result: Result<T, soapysdr::Error>) -> Result<T, CoreError> {
    result.map_err(|err| {
        tracing::error!("SoapySDR: failed to {what}: {err}");
        CoreError::InvalidConfig(format!("SoapySDR {what}: {err}"))
    })
}

pub struct SoapyFrontEnd {
    dev: soapysdr::Device,
    rx: soapysdr::RxStream<ComplexSample>,
    ch: usize,
    ppm_err: f64,
}

impl SoapyFrontEnd {
    pub fn open(cfg: &CfgSoapySdr) -> Result<Self, CoreError> {
        let ch = 0;
        let driver = cfg.io_cfg.driver_name();

        let mut dev_args = soapysdr::Args::new();
        dev_args.set("driver", driver);
        if let Some(extra) = &cfg.driver_args {
            for pair in extra.split(',').filter(|s| !s.is_empty()) {
                if let Some((key, value)) = pair.split_once('=') {
                    dev_args.set(key.trim(), value.trim());
                }
            }
        }

        let dev = check("open device", soapysdr::Device::new(dev_args))?;

        check(
            "set RX sample rate",
            dev.set_sample_rate(soapysdr::Direction::Rx, ch, cfg.sample_rate_hz),
        )?;

        let (corrected_hz, _) = cfg.corrected_frequency(cfg.center_frequency_hz);
        check(
            "set RX center frequency",
            dev.set_frequency(soapysdr::Direction::Rx, ch, corrected_hz, soapysdr::Args::new()),
        )?;

        apply_io_cfg(&dev, ch, driver, &cfg.io_cfg)?;

        if let Some(gain_db) = cfg.rf_gain_db {
            check("set RX overall gain", dev.set_gain(soapysdr::Direction::Rx, ch, gain_db))?;
        }

        let mut rx = check("setup RX stream", dev.rx_stream::<ComplexSample>(&[ch]))?;
        check("activate RX stream", rx.activate(None))?;

        Ok(Self {
            dev,
            rx,
            ch,
            ppm_err: cfg.ppm_err.unwrap_or(0.0),
        })
    }
}

fn apply_io_cfg(
    dev: &soapysdr::Device,
    ch: usize,
    driver: &str,
    io_cfg: &SoapySdrIoCfg,
) -> Result<(), CoreError> {
    match driver {
        "uhd" => {
            if let Some(cfg) = &io_cfg.iocfg_usrpb2xx {
                if let Some(ant) = &cfg.antenna {
                    check("set RX antenna", dev.set_antenna(soapysdr::Direction::Rx, ch, ant.as_str()))?;
                }
                if let Some(gain) = cfg.gain_pga_db {
                    check(
                        "set RX PGA gain",
                        dev.set_gain_element(soapysdr::Direction::Rx, ch, "PGA", gain),
                    )?;
                }
            }
        }
        "lime" => {
            if let Some(cfg) = &io_cfg.iocfg_limesdr {
                if let Some(ant) = &cfg.antenna {
                    check("set RX antenna", dev.set_antenna(soapysdr::Direction::Rx, ch, ant.as_str()))?;
                }
                if let Some(gain) = cfg.gain_lna_db {
                    check(
                        "set RX LNA gain",
                        dev.set_gain_element(soapysdr::Direction::Rx, ch, "LNA", gain),
                    )?;
                }
                if let Some(gain) = cfg.gain_tia_db {
                    check(
                        "set RX TIA gain",
                        dev.set_gain_element(soapysdr::Direction::Rx, ch, "TIA", gain),
                    )?;
                }
                if let Some(gain) = cfg.gain_pga_db {
                    check(
                        "set RX PGA gain",
                        dev.set_gain_element(soapysdr::Direction::Rx, ch, "PGA", gain),
                    )?;
                }
            }
        }
        "sx" => {
            if let Some(cfg) = &io_cfg.iocfg_sxceiver {
                if let Some(ant) = &cfg.antenna {
                    check("set RX antenna", dev.set_antenna(soapysdr::Direction::Rx, ch, ant.as_str()))?;
                }
                if let Some(gain) = cfg.gain_lna_db {
                    check(
                        "set RX LNA gain",
                        dev.set_gain_element(soapysdr::Direction::Rx, ch, "LNA", gain),
                    )?;
                }
                if let Some(gain) = cfg.gain_pga_db {
                    check(
                        "set RX PGA gain",
                        dev.set_gain_element(soapysdr::Direction::Rx, ch, "PGA", gain),
                    )?;
                }
            }
        }
        other => tracing::warn!("unrecognized SoapySDR driver '{other}', using hardware defaults"),
    }
    Ok(())
}

impl FrontEnd for SoapyFrontEnd {
    fn start(&mut self) -> Result<(), CoreError> {
        // The RX stream is activated in `open`; nothing further to do.
        Ok(())
    }

    fn tune(&mut self, hz: f64) -> Result<f64, CoreError> {
        let corrected = hz + (hz / 1_000_000.0) * self.ppm_err;
        check(
            "set RX center frequency",
            self.dev
                .set_frequency(soapysdr::Direction::Rx, self.ch, corrected, soapysdr::Args::new()),
        )?;
        check("get RX center frequency", self.dev.frequency(soapysdr::Direction::Rx, self.ch))
    }

    fn gain(&mut self, db: f64) -> Result<f64, CoreError> {
        check("set RX gain", self.dev.set_gain(soapysdr::Direction::Rx, self.ch, db))?;
        check("get RX gain", self.dev.gain(soapysdr::Direction::Rx, self.ch))
    }

    fn atten(&mut self, db: f64) -> Result<f64, CoreError> {
        // SoapySDR has no separate attenuator element on most of the
        // supported hardware; fold it into the overall gain as a negative
        // offset, matching how the teacher's config treats `rf_atten_db`.
        self.gain(-db).map(|applied| -applied)
    }

    fn recv(&mut self, buf: &mut [ComplexSample]) -> Result<usize, CoreError> {
        match self.rx.read(&mut [buf], 1_000_000) {
            Ok(len) => Ok(len),
            Err(err) => {
                tracing::warn!("SoapySDR RX read error: {err}");
                Err(CoreError::StreamTerminated)
            }
        }
    }

    fn sample_kind(&self) -> SampleKind {
        SampleKind::Complex
    }
}

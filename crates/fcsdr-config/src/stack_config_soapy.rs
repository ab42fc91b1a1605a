use serde::Deserialize;

/// Per-driver antenna/gain overrides for the SoapySDR front end.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SoapySdrIoCfg {
    #[serde(default)]
    pub iocfg_usrpb2xx: Option<UsrpB2xxCfg>,
    #[serde(default)]
    pub iocfg_limesdr: Option<LimeSdrCfg>,
    #[serde(default)]
    pub iocfg_sxceiver: Option<SxceiverCfg>,
}

impl SoapySdrIoCfg {
    pub fn driver_name(&self) -> &'static str {
        if self.iocfg_usrpb2xx.is_some() {
            "uhd"
        } else if self.iocfg_limesdr.is_some() {
            "lime"
        } else if self.iocfg_sxceiver.is_some() {
            "sx"
        } else {
            "unknown"
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsrpB2xxCfg {
    pub antenna: Option<String>,
    pub gain_pga_db: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimeSdrCfg {
    pub antenna: Option<String>,
    pub gain_lna_db: Option<f64>,
    pub gain_tia_db: Option<f64>,
    pub gain_pga_db: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SxceiverCfg {
    pub antenna: Option<String>,
    pub gain_lna_db: Option<f64>,
    pub gain_pga_db: Option<f64>,
}

/// SoapySDR front-end parameters. `ppm_err` corrects the commanded
/// frequency before it is handed to `FrontEnd::tune`.
#[derive(Debug, Clone, Deserialize)]
pub struct CfgSoapySdr {
    pub driver_args: Option<String>,
    pub sample_rate_hz: f64,
    pub center_frequency_hz: f64,
    pub ppm_err: Option<f64>,
    pub rf_gain_db: Option<f64>,
    pub rf_atten_db: Option<f64>,
    #[serde(default)]
    pub io_cfg: SoapySdrIoCfg,
}

impl CfgSoapySdr {
    /// Frequency corrected for calibration PPM error, and the applied
    /// correction in Hz.
    pub fn corrected_frequency(&self, requested_hz: f64) -> (f64, f64) {
        let ppm = self.ppm_err.unwrap_or(0.0);
        let err = (requested_hz / 1_000_000.0) * ppm;
        (requested_hz + err, err)
    }
}

use std::sync::{Arc, RwLock};

use fcsdr_core::{DemodKind, PlanningLevel};
use serde::Deserialize;

use super::stack_config_soapy::CfgSoapySdr;

/// Which front-end backend supplies samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhyBackend {
    Undefined,
    /// No hardware; samples come from a file or are synthesized (testing).
    None,
    SoapySdr,
}

/// Sample encoding of a recorded-file front end's raw IQ (or real) stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSampleFormat {
    /// Interleaved little-endian `f32` I/Q pairs.
    ComplexF32,
    /// Interleaved little-endian signed 16-bit I/Q pairs.
    ComplexS16,
    /// Single-channel little-endian `f32` real samples.
    RealF32,
}

/// Recorded-file front end (`PhyBackend::None`): replays a raw sample file
/// at its nominal rate instead of reading from hardware (spec §10.2's
/// "recorded-file input").
#[derive(Debug, Clone, Deserialize)]
pub struct CfgFileInput {
    pub path: String,
    pub sample_rate_hz: f64,
    pub center_frequency_hz: f64,
    pub format: FileSampleFormat,
    #[serde(default)]
    pub loop_playback: bool,
}

/// Front-end I/O configuration.
#[derive(Debug, Clone)]
pub struct CfgPhyIo {
    pub backend: PhyBackend,
    pub file_input: Option<CfgFileInput>,
    pub soapysdr: Option<CfgSoapySdr>,
}

impl Default for CfgPhyIo {
    fn default() -> Self {
        Self {
            backend: PhyBackend::Undefined,
            file_input: None,
            soapysdr: None,
        }
    }
}

/// Fast-convolution engine sizing: shared input filter + worker pool.
#[derive(Debug, Clone)]
pub struct CfgEngine {
    /// New samples consumed per block (L).
    pub block_len: usize,
    /// Impulse-response length of the shared input filter (M).
    pub impulse_len: usize,
    /// Worker threads servicing forward FFTs. 0 means execute inline.
    pub worker_threads: u32,
    pub wisdom_path: String,
    pub plan_request_log_path: String,
    pub planning_level: PlanningLevel,
}

impl Default for CfgEngine {
    fn default() -> Self {
        Self {
            block_len: 960,
            impulse_len: 481,
            worker_threads: 1,
            wisdom_path: "/var/lib/fcsdr/wisdom".to_string(),
            plan_request_log_path: "/var/lib/fcsdr/plan-requests.log".to_string(),
            planning_level: PlanningLevel::Estimate,
        }
    }
}

/// Multicast endpoints for the command/status protocol and output audio.
#[derive(Debug, Clone)]
pub struct CfgNetInfo {
    pub status_mcast_addr: String,
    pub command_mcast_addr: String,
    pub audio_mcast_addr: Option<String>,
}

impl Default for CfgNetInfo {
    fn default() -> Self {
        Self {
            status_mcast_addr: "239.192.1.1:5006".to_string(),
            command_mcast_addr: "239.192.1.1:5006".to_string(),
            audio_mcast_addr: None,
        }
    }
}

/// A named channel configuration applied when a command's `preset` field
/// references it, or when a channel is pre-declared at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelPreset {
    pub name: String,
    pub demod_type: PresetDemodKind,
    #[serde(default)]
    pub low_if_hz: Option<f64>,
    #[serde(default)]
    pub high_if_hz: Option<f64>,
    #[serde(default)]
    pub kaiser_beta: Option<f64>,
    #[serde(default)]
    pub squelch_open_db: Option<f64>,
    #[serde(default)]
    pub squelch_close_db: Option<f64>,
    #[serde(default)]
    pub output_samprate: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PresetDemodKind {
    Linear,
    Fm,
    Wfm,
    Spectrum,
}

impl From<PresetDemodKind> for DemodKind {
    fn from(v: PresetDemodKind) -> Self {
        match v {
            PresetDemodKind::Linear => DemodKind::Linear,
            PresetDemodKind::Fm => DemodKind::Fm,
            PresetDemodKind::Wfm => DemodKind::Wfm,
            PresetDemodKind::Spectrum => DemodKind::Spectrum,
        }
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub debug_log: Option<String>,
    pub phy_io: CfgPhyIo,
    pub engine: CfgEngine,
    pub net: CfgNetInfo,
    /// Fixed maximum number of simultaneously open channels.
    pub channel_table_size: usize,
    pub presets: Vec<ChannelPreset>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            debug_log: None,
            phy_io: CfgPhyIo::default(),
            engine: CfgEngine::default(),
            net: CfgNetInfo::default(),
            channel_table_size: 2000,
            presets: Vec::new(),
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self.phy_io.backend {
            PhyBackend::Undefined => return Err("phy_io backend must be defined".to_string()),
            PhyBackend::SoapySdr if self.phy_io.soapysdr.is_none() => {
                return Err("soapysdr configuration must be provided for the SoapySdr backend".to_string());
            }
            _ => {}
        }
        if self.engine.block_len == 0 {
            return Err("engine.block_len must be > 0".to_string());
        }
        if self.engine.impulse_len == 0 {
            return Err("engine.impulse_len must be > 0".to_string());
        }
        if self.engine.worker_threads > 20 {
            return Err("engine.worker_threads must be <= 20".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for p in &self.presets {
            if !seen.insert(&p.name) {
                return Err(format!("duplicate preset name: {}", p.name));
            }
        }
        Ok(())
    }

    pub fn find_preset(&self, name: &str) -> Option<&ChannelPreset> {
        self.presets.iter().find(|p| p.name == name)
    }
}

/// Immutable configuration plus whatever mutable, process-wide state the
/// daemon accumulates at runtime (currently just a connectivity flag; more
/// may be added as the command/status layer grows).
#[derive(Debug, Clone, Default)]
pub struct DaemonState {
    pub front_end_started: bool,
}

/// Global shared configuration handle: immutable config + mutable state,
/// both cheaply clonable and safe to pass to every worker/demod thread.
#[derive(Clone)]
pub struct SharedConfig {
    cfg: Arc<DaemonConfig>,
    state: Arc<RwLock<DaemonState>>,
}

impl SharedConfig {
    pub fn from_config(cfg: DaemonConfig) -> Self {
        Self::from_parts(cfg, DaemonState::default())
    }

    pub fn from_parts(cfg: DaemonConfig, state: DaemonState) -> Self {
        if let Err(e) = cfg.validate() {
            panic!("invalid daemon configuration: {e}");
        }
        Self {
            cfg: Arc::new(cfg),
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub fn config(&self) -> Arc<DaemonConfig> {
        Arc::clone(&self.cfg)
    }

    pub fn state_read(&self) -> std::sync::RwLockReadGuard<'_, DaemonState> {
        self.state.read().expect("DaemonState RwLock poisoned")
    }

    pub fn state_write(&self) -> std::sync::RwLockWriteGuard<'_, DaemonState> {
        self.state.write().expect("DaemonState RwLock poisoned")
    }
}

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use fcsdr_core::PlanningLevel;
use serde::Deserialize;
use toml::Value;

use super::stack_config::{
    CfgEngine, CfgFileInput, CfgNetInfo, CfgPhyIo, ChannelPreset, DaemonConfig, DaemonState, FileSampleFormat, PhyBackend,
    PresetDemodKind, SharedConfig,
};
use super::stack_config_soapy::{CfgSoapySdr, LimeSdrCfg, SoapySdrIoCfg, SxceiverCfg, UsrpB2xxCfg};

/// Build a `SharedConfig` from a TOML configuration string.
pub fn from_toml_str(toml_str: &str) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let root: TomlConfigRoot = toml::from_str(toml_str)?;

    let expected_config_version = "1";
    if root.config_version != expected_config_version {
        return Err(format!(
            "unrecognized config_version: {}, expected {}",
            root.config_version, expected_config_version
        )
        .into());
    }
    if !root.extra.is_empty() {
        return Err(format!("unrecognized top-level fields: {:?}", sorted_keys(&root.extra)).into());
    }
    if let Some(ref phy) = root.phy_io {
        if !phy.extra.is_empty() {
            return Err(format!("unrecognized fields: phy_io::{:?}", sorted_keys(&phy.extra)).into());
        }
        if let Some(ref soapy) = phy.soapysdr {
            if !soapy.extra.is_empty() {
                return Err(format!("unrecognized fields: phy_io.soapysdr::{:?}", sorted_keys(&soapy.extra)).into());
            }
        }
    }
    if let Some(ref engine) = root.engine {
        if !engine.extra.is_empty() {
            return Err(format!("unrecognized fields: engine::{:?}", sorted_keys(&engine.extra)).into());
        }
    }
    if let Some(ref net) = root.net {
        if !net.extra.is_empty() {
            return Err(format!("unrecognized fields: net::{:?}", sorted_keys(&net.extra)).into());
        }
    }

    let mut cfg = DaemonConfig {
        debug_log: root.debug_log,
        ..DaemonConfig::default()
    };

    if let Some(phy) = root.phy_io {
        apply_phy_io_patch(&mut cfg.phy_io, phy);
    }
    if let Some(engine) = root.engine {
        apply_engine_patch(&mut cfg.engine, engine);
    }
    if let Some(net) = root.net {
        apply_net_patch(&mut cfg.net, net);
    }
    if let Some(table_size) = root.channel_table_size {
        cfg.channel_table_size = table_size;
    }
    cfg.presets = root.presets;

    Ok(SharedConfig::from_parts(cfg, DaemonState::default()))
}

/// Build a `SharedConfig` from any reader.
pub fn from_reader<R: Read>(reader: R) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let mut contents = String::new();
    let mut reader = BufReader::new(reader);
    reader.read_to_string(&mut contents)?;
    from_toml_str(&contents)
}

/// Build a `SharedConfig` from a file path.
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<SharedConfig, Box<dyn std::error::Error>> {
    let f = File::open(path)?;
    from_reader(BufReader::new(f))
}

fn apply_phy_io_patch(dst: &mut CfgPhyIo, src: PhyIoDto) {
    dst.backend = src.backend;
    dst.file_input = src.file_input.map(|f| CfgFileInput {
        path: f.path,
        sample_rate_hz: f.sample_rate_hz,
        center_frequency_hz: f.center_frequency_hz,
        format: f.format,
        loop_playback: f.loop_playback,
    });

    if let Some(soapy_dto) = src.soapysdr {
        dst.soapysdr = Some(CfgSoapySdr {
            driver_args: soapy_dto.driver_args,
            sample_rate_hz: soapy_dto.sample_rate_hz,
            center_frequency_hz: soapy_dto.center_frequency_hz,
            ppm_err: soapy_dto.ppm_err,
            rf_gain_db: soapy_dto.rf_gain_db,
            rf_atten_db: soapy_dto.rf_atten_db,
            io_cfg: SoapySdrIoCfg {
                iocfg_usrpb2xx: soapy_dto.iocfg_usrpb2xx.map(|d| UsrpB2xxCfg {
                    antenna: d.antenna,
                    gain_pga_db: d.gain_pga_db,
                }),
                iocfg_limesdr: soapy_dto.iocfg_limesdr.map(|d| LimeSdrCfg {
                    antenna: d.antenna,
                    gain_lna_db: d.gain_lna_db,
                    gain_tia_db: d.gain_tia_db,
                    gain_pga_db: d.gain_pga_db,
                }),
                iocfg_sxceiver: soapy_dto.iocfg_sxceiver.map(|d| SxceiverCfg {
                    antenna: d.antenna,
                    gain_lna_db: d.gain_lna_db,
                    gain_pga_db: d.gain_pga_db,
                }),
            },
        });
    }
}

fn apply_engine_patch(dst: &mut CfgEngine, src: EngineDto) {
    if let Some(v) = src.block_len {
        dst.block_len = v;
    }
    if let Some(v) = src.impulse_len {
        dst.impulse_len = v;
    }
    if let Some(v) = src.worker_threads {
        dst.worker_threads = v;
    }
    if let Some(v) = src.wisdom_path {
        dst.wisdom_path = v;
    }
    if let Some(v) = src.plan_request_log_path {
        dst.plan_request_log_path = v;
    }
    if let Some(v) = src.planning_level {
        dst.planning_level = v;
    }
}

fn apply_net_patch(dst: &mut CfgNetInfo, src: NetDto) {
    if let Some(v) = src.status_mcast_addr {
        dst.status_mcast_addr = v;
    }
    if let Some(v) = src.command_mcast_addr {
        dst.command_mcast_addr = v;
    }
    dst.audio_mcast_addr = src.audio_mcast_addr;
}

fn sorted_keys(map: &HashMap<String, Value>) -> Vec<&str> {
    let mut v: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
    v.sort_unstable();
    v
}

// ----------------------------- DTOs -----------------------------

#[derive(Deserialize)]
struct TomlConfigRoot {
    config_version: String,
    #[serde(default)]
    debug_log: Option<String>,
    #[serde(default)]
    phy_io: Option<PhyIoDto>,
    #[serde(default)]
    engine: Option<EngineDto>,
    #[serde(default)]
    net: Option<NetDto>,
    #[serde(default)]
    channel_table_size: Option<usize>,
    #[serde(default)]
    presets: Vec<ChannelPreset>,
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct PhyIoDto {
    backend: PhyBackend,
    #[serde(default)]
    file_input: Option<FileInputDto>,
    #[serde(default)]
    soapysdr: Option<SoapySdrDto>,
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct FileInputDto {
    path: String,
    sample_rate_hz: f64,
    center_frequency_hz: f64,
    format: FileSampleFormat,
    #[serde(default)]
    loop_playback: bool,
}

#[derive(Deserialize)]
struct SoapySdrDto {
    #[serde(default)]
    driver_args: Option<String>,
    sample_rate_hz: f64,
    center_frequency_hz: f64,
    #[serde(default)]
    ppm_err: Option<f64>,
    #[serde(default)]
    rf_gain_db: Option<f64>,
    #[serde(default)]
    rf_atten_db: Option<f64>,
    #[serde(default)]
    iocfg_usrpb2xx: Option<UsrpB2xxDto>,
    #[serde(default)]
    iocfg_limesdr: Option<LimeSdrDto>,
    #[serde(default)]
    iocfg_sxceiver: Option<SxceiverDto>,
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct UsrpB2xxDto {
    antenna: Option<String>,
    gain_pga_db: Option<f64>,
}

#[derive(Deserialize)]
struct LimeSdrDto {
    antenna: Option<String>,
    gain_lna_db: Option<f64>,
    gain_tia_db: Option<f64>,
    gain_pga_db: Option<f64>,
}

#[derive(Deserialize)]
struct SxceiverDto {
    antenna: Option<String>,
    gain_lna_db: Option<f64>,
    gain_pga_db: Option<f64>,
}

#[derive(Deserialize)]
struct EngineDto {
    #[serde(default)]
    block_len: Option<usize>,
    #[serde(default)]
    impulse_len: Option<usize>,
    #[serde(default)]
    worker_threads: Option<u32>,
    #[serde(default)]
    wisdom_path: Option<String>,
    #[serde(default)]
    plan_request_log_path: Option<String>,
    #[serde(default)]
    planning_level: Option<PlanningLevel>,
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

#[derive(Deserialize)]
struct NetDto {
    #[serde(default)]
    status_mcast_addr: Option<String>,
    #[serde(default)]
    command_mcast_addr: Option<String>,
    #[serde(default)]
    audio_mcast_addr: Option<String>,
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

impl<'de> serde::Deserialize<'de> for PhyBackend {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "PascalCase")]
        enum Repr {
            Undefined,
            None,
            SoapySdr,
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Undefined => PhyBackend::Undefined,
            Repr::None => PhyBackend::None,
            Repr::SoapySdr => PhyBackend::SoapySdr,
        })
    }
}

impl<'de> serde::Deserialize<'de> for PlanningLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(rename_all = "lowercase")]
        enum Repr {
            Estimate,
            Measure,
            Patient,
            Exhaustive,
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Estimate => PlanningLevel::Estimate,
            Repr::Measure => PlanningLevel::Measure,
            Repr::Patient => PlanningLevel::Patient,
            Repr::Exhaustive => PlanningLevel::Exhaustive,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_backend_config_loads() {
        let toml_str = r#"
            config_version = "1"

            [phy_io]
            backend = "None"

            [engine]
            block_len = 960
            impulse_len = 481
            worker_threads = 2
        "#;
        let shared = from_toml_str(toml_str).expect("should parse");
        let cfg = shared.config();
        assert_eq!(cfg.engine.block_len, 960);
        assert_eq!(cfg.engine.worker_threads, 2);
    }

    #[test]
    fn unrecognized_field_is_rejected() {
        let toml_str = r#"
            config_version = "1"
            bogus_field = 1

            [phy_io]
            backend = "None"
        "#;
        assert!(from_toml_str(toml_str).is_err());
    }

    #[test]
    fn undefined_backend_fails_validation() {
        let toml_str = r#"
            config_version = "1"

            [phy_io]
            backend = "Undefined"
        "#;
        assert!(from_toml_str(toml_str).is_err());
    }
}

use clap::Parser;

use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use fcsdr_channel::demod::AudioFrame;
use fcsdr_channel::{supervisor, ChannelTable, FileFrontEnd, FrontEnd, FrontEndSnapshot, FrontEndStatus, SoapyFrontEnd};
use fcsdr_config::{toml_config, DaemonConfig, PhyBackend, SharedConfig};
use fcsdr_core::debug;
use fcsdr_dsp::fastconv::InputFilter;
use fcsdr_dsp::wisdom::WisdomCache;
use fcsdr_dsp::workerpool::WorkerPool;
use fcsdr_proto::MulticastTransport;

mod dispatch;

/// Loads and validates the TOML configuration file, exiting the process on
/// any failure (there is no partial-daemon state worth keeping).
fn load_config_from_toml(cfg_path: &str) -> SharedConfig {
    match toml_config::from_file(cfg_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration from {cfg_path}: {e}");
            std::process::exit(1);
        }
    }
}

fn open_front_end(cfg: &DaemonConfig) -> Box<dyn FrontEnd> {
    match cfg.phy_io.backend {
        PhyBackend::SoapySdr => {
            let soapy_cfg = cfg.phy_io.soapysdr.as_ref().expect("validated: soapysdr config present");
            match SoapyFrontEnd::open(soapy_cfg) {
                Ok(fe) => Box::new(fe),
                Err(err) => {
                    eprintln!("failed to open SoapySDR front end: {err}");
                    std::process::exit(1);
                }
            }
        }
        PhyBackend::None => {
            let file_cfg = cfg.phy_io.file_input.as_ref().unwrap_or_else(|| {
                eprintln!("phy_io backend is 'none' but no file_input is configured");
                std::process::exit(1);
            });
            match FileFrontEnd::open(file_cfg) {
                Ok(fe) => Box::new(fe),
                Err(err) => {
                    eprintln!("failed to open recorded-file front end: {err}");
                    std::process::exit(1);
                }
            }
        }
        PhyBackend::Undefined => unreachable!("validated at config load"),
    }
}

fn front_end_snapshot(cfg: &DaemonConfig, front_end: &dyn FrontEnd) -> FrontEndSnapshot {
    let (center_hz, sample_rate_hz, bit_depth) = match &cfg.phy_io.soapysdr {
        Some(soapy) => (soapy.center_frequency_hz, soapy.sample_rate_hz, 16),
        None => {
            let file = cfg.phy_io.file_input.as_ref().expect("validated above");
            (file.center_frequency_hz, file.sample_rate_hz, 32)
        }
    };
    FrontEndSnapshot {
        center_frequency_hz: center_hz,
        sample_rate_hz,
        calibration_ppm: 0.0,
        bit_depth,
        min_if_hz: -sample_rate_hz / 2.0,
        max_if_hz: sample_rate_hz / 2.0,
        kind: front_end.sample_kind(),
        rf_gain_db: 0.0,
        rf_atten_db: 0.0,
    }
}

/// Turns a finished [`AudioFrame`] into a wire packet and ships it out the
/// audio multicast group, if one is configured. No group means a no-op sink
/// (spec §10.1: audio output is the one optional piece of the ambient I/O).
fn build_audio_sink(group: Option<SocketAddrV4>) -> supervisor::AudioSink {
    let transport = group.and_then(|g| match MulticastTransport::join(g, std::time::Duration::from_millis(50)) {
        Ok(t) => Some(Arc::new(t)),
        Err(err) => {
            tracing::error!(%err, "cannot join audio multicast group, audio output disabled");
            None
        }
    });

    Arc::new(move |stream_id: u32, frame: AudioFrame| {
        let Some(transport) = &transport else { return };
        if frame.mute {
            return;
        }
        let mut payload = Vec::with_capacity(8 + frame.samples.len() * 4);
        payload.extend_from_slice(&stream_id.to_be_bytes());
        payload.push(frame.channels);
        payload.push(0);
        payload.extend_from_slice(&(frame.samples.len() as u16).to_be_bytes());
        for s in &frame.samples {
            payload.extend_from_slice(&s.to_be_bytes());
        }
        if let Err(err) = transport.send(&payload) {
            tracing::warn!(stream_id, %err, "audio send failed");
        }
    })
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Fast-convolution DSP daemon")]
struct Args {
    /// TOML configuration file
    config: String,
    /// Force verbose (debug-level, stdout) logging regardless of config
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    let shared_cfg = load_config_from_toml(&args.config);
    let cfg = shared_cfg.config();

    let _log_guard = if args.verbose {
        debug::setup_logging_verbose();
        None
    } else {
        debug::setup_logging_default(cfg.debug_log.clone())
    };

    tracing::info!(git_version = fcsdr_core::GIT_VERSION, build_version = fcsdr_core::BUILD_VERSION, "starting");

    let mut front_end = open_front_end(&cfg);
    if let Err(err) = front_end.start() {
        eprintln!("failed to start front end: {err}");
        std::process::exit(1);
    }
    let front_end_status = Arc::new(FrontEndStatus::new(front_end_snapshot(&cfg, &*front_end)));

    let pool = (cfg.engine.worker_threads > 0).then(|| match WorkerPool::new(cfg.engine.worker_threads as usize) {
        Ok(p) => p,
        Err(err) => {
            eprintln!("failed to start worker pool: {err}");
            std::process::exit(1);
        }
    });
    let worker_tx = pool.as_ref().map(|p| p.sender());

    let master = match InputFilter::new(cfg.engine.block_len, cfg.engine.impulse_len, front_end.sample_kind(), worker_tx) {
        Ok(f) => f,
        Err(err) => {
            eprintln!("failed to build master input filter: {err}");
            std::process::exit(1);
        }
    };
    let master_rate_hz = front_end_status.snapshot().sample_rate_hz;
    let overlap_factor = master.overlap_factor();

    // The wisdom cache is populated with the master transform's plan at
    // startup so a daemon started at `Patient`/`Exhaustive` level can amortize
    // that cost across restarts; per-channel output filter plans are not yet
    // routed through it (each `OutputFilter` still plans its own inverse FFT
    // directly — a known gap, see the design ledger).
    let wisdom = WisdomCache::new(cfg.engine.wisdom_path.clone(), cfg.engine.plan_request_log_path.clone());
    let _ = wisdom.get_or_plan(
        fcsdr_dsp::wisdom::PlanKey {
            direction: fcsdr_dsp::wisdom::PlanDirection::Forward,
            complex: matches!(front_end.sample_kind(), fcsdr_dsp::fastconv::SampleKind::Complex),
            n: master.n(),
        },
        cfg.engine.planning_level,
    );

    let table = Arc::new(ChannelTable::new(cfg.channel_table_size));
    let engine_ctx = Arc::new(supervisor::EngineContext::new(
        Arc::clone(&master.shared),
        cfg.engine.block_len,
        master_rate_hz,
        overlap_factor,
        Arc::clone(&front_end_status),
    ));

    let audio_group: Option<SocketAddrV4> = cfg.net.audio_mcast_addr.as_deref().and_then(|a| a.parse().ok());
    let audio = build_audio_sink(audio_group);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::SeqCst);
        })
        .expect("failed to set Ctrl+C handler");
    }

    let reader_running = Arc::clone(&running);
    let reader_block_len = cfg.engine.block_len;
    let reader = thread::Builder::new()
        .name("fcsdr-frontend".to_string())
        .spawn(move || {
            let mut master = master;
            let mut buf = vec![fcsdr_core::ComplexSample::new(0.0, 0.0); reader_block_len];
            while reader_running.load(Ordering::SeqCst) {
                match front_end.recv(&mut buf) {
                    Ok(n) if n == buf.len() => {
                        if let Err(err) = master.execute_input(&buf) {
                            tracing::warn!(%err, "master input filter rejected a block");
                        }
                    }
                    Ok(n) => tracing::warn!(got = n, want = buf.len(), "short read from front end, block dropped"),
                    Err(err) => {
                        tracing::error!(%err, "front end read failed, reader thread exiting");
                        break;
                    }
                }
            }
        })
        .expect("failed to spawn front-end reader thread");

    let dispatch_thread = match dispatch::command_group(&cfg) {
        Some(group) => {
            let presets = cfg.presets.clone();
            let table = Arc::clone(&table);
            let engine_ctx = Arc::clone(&engine_ctx);
            let audio = Arc::clone(&audio);
            let running = Arc::clone(&running);
            Some(
                thread::Builder::new()
                    .name("fcsdr-dispatch".to_string())
                    .spawn(move || dispatch::run(group, presets, table, engine_ctx, audio, running))
                    .expect("failed to spawn command/status dispatch thread"),
            )
        }
        None => {
            tracing::error!(addr = %cfg.net.command_mcast_addr, "cannot parse command_mcast_addr, dispatch disabled");
            None
        }
    };

    while running.load(Ordering::SeqCst) {
        thread::sleep(std::time::Duration::from_millis(200));
    }

    tracing::info!("shutting down");
    for stream_id in table.stream_ids() {
        table.remove(stream_id);
    }
    let _ = reader.join();
    if let Some(t) = dispatch_thread {
        let _ = t.join();
    }
    if let Some(pool) = pool {
        pool.shutdown();
    }
    if let Err(err) = wisdom.save() {
        tracing::warn!(%err, "failed to save wisdom cache");
    }
}

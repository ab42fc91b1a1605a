//! Offline wisdom-generation tool (spec §6/§10.3): precomputes FFT plans at
//! a requested planning level and records them in the same wisdom file the
//! daemon consults at startup, so a fresh daemon process never has to fall
//! back to estimate-level planning and log a plan request for something an
//! operator already knows it will need.

use clap::{Parser, ValueEnum};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fcsdr_core::PlanningLevel;
use fcsdr_dsp::wisdom::{PlanDirection, PlanKey, WisdomCache};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LevelArg {
    Estimate,
    Measure,
    Patient,
    Exhaustive,
}

impl From<LevelArg> for PlanningLevel {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Estimate => PlanningLevel::Estimate,
            LevelArg::Measure => PlanningLevel::Measure,
            LevelArg::Patient => PlanningLevel::Patient,
            LevelArg::Exhaustive => PlanningLevel::Exhaustive,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Offline FFT wisdom generator")]
struct Args {
    /// Daemon TOML config file, used to locate the wisdom and plan-request
    /// log paths this tool shares with the daemon.
    #[arg(long)]
    config: String,

    /// Planning effort to record against each generated descriptor.
    #[arg(long, value_enum)]
    level: LevelArg,

    /// Worker threads generating plans in parallel.
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Overall wall-clock budget; descriptors not finished in time count as
    /// failures (non-zero exit).
    #[arg(long)]
    timelimit: u64,

    /// Regenerate even if the wisdom file already records this length at or
    /// above the requested level.
    #[arg(long)]
    force: bool,

    /// Plan descriptors: `{r|c}o{f|b}<length>`, e.g. `cof5000`, `rob128`.
    #[arg(required = true)]
    descriptors: Vec<String>,
}

fn parse_descriptor(s: &str) -> Result<PlanKey, String> {
    let bytes = s.as_bytes();
    if bytes.len() < 4 || bytes[1] != b'o' {
        return Err(format!("malformed plan descriptor {s:?}, expected {{r|c}}o{{f|b}}<length>"));
    }
    let complex = match bytes[0] {
        b'r' => false,
        b'c' => true,
        other => return Err(format!("unknown sample kind '{}' in {s:?}", other as char)),
    };
    let direction = match bytes[2] {
        b'f' => PlanDirection::Forward,
        b'b' => PlanDirection::Inverse,
        other => return Err(format!("unknown direction '{}' in {s:?}", other as char)),
    };
    let n: usize = s[3..].parse().map_err(|_| format!("non-numeric length in {s:?}"))?;
    if n == 0 {
        return Err(format!("length must be positive in {s:?}"));
    }
    Ok(PlanKey { direction, complex, n })
}

fn main() {
    let args = Args::parse();
    fcsdr_core::debug::setup_logging_verbose();

    let keys: Vec<PlanKey> = match args.descriptors.iter().map(|d| parse_descriptor(d)).collect() {
        Ok(keys) => keys,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    let shared_cfg = match fcsdr_config::toml_config::from_file(&args.config) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("failed to load configuration from {}: {err}", args.config);
            std::process::exit(1);
        }
    };
    let cfg = shared_cfg.config();
    let level: PlanningLevel = args.level.into();

    let wisdom = Arc::new(WisdomCache::new(cfg.engine.wisdom_path.clone(), cfg.engine.plan_request_log_path.clone()));

    let deadline = Instant::now() + Duration::from_secs(args.timelimit);
    let timed_out = Arc::new(AtomicBool::new(false));
    let (tx, rx) = crossbeam_channel::unbounded::<PlanKey>();
    for key in &keys {
        let _ = tx.send(*key);
    }
    drop(tx);

    let threads = args.threads.max(1);
    let force = args.force;
    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let rx = rx.clone();
            let wisdom = Arc::clone(&wisdom);
            let timed_out = Arc::clone(&timed_out);
            handles.push(scope.spawn(move || {
                while let Ok(key) = rx.recv() {
                    if Instant::now() >= deadline {
                        timed_out.store(true, Ordering::SeqCst);
                        tracing::warn!(?key, "time limit reached before this plan could be generated");
                        continue;
                    }
                    if !force {
                        if let Some(achieved) = wisdom.achieved_level(key) {
                            if achieved >= level {
                                tracing::info!(?key, ?achieved, "already at or above requested level, skipping");
                                continue;
                            }
                        }
                    }
                    wisdom.generate(key, level);
                    tracing::info!(worker = i, ?key, ?level, "generated");
                }
            }));
        }
        for handle in handles {
            let _ = handle.join();
        }
    });

    if let Err(err) = wisdom.save() {
        eprintln!("failed to save wisdom file: {err}");
        std::process::exit(1);
    }

    if timed_out.load(Ordering::SeqCst) {
        eprintln!("time limit exceeded before all requested plans were generated");
        std::process::exit(1);
    }
}

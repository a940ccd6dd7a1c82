//! Temperature sweep of the 2-D Ising model.
//!
//! Usage: `ising_sweep [config.yaml]`
//!
//! For each temperature, runs `repeats` independent trajectories and prints
//! `temperature mean_magnetisation rms_magnetisation`. On the host backend
//! temperatures run in parallel, one simulation instance each.

use std::process::ExitCode;

use rayon::prelude::*;
use serde::Deserialize;
use tracing::{error, info};

use stagesim::config::{self, BackendKind, HarnessConfig};
use stagesim::logging::{self, LoggingConfig};
use stagesim::models::ising::{self, SweepPoint};
use stagesim::models::random::SeedStream;
use stagesim::{HostBackend, SimResult, Simulation};


#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SweepFile {
    harness: HarnessConfig,
    logging: LoggingConfig,
    sweep: SweepConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SweepConfig {
    t_min: f64,
    t_max: f64,
    t_step: f64,
    repeats: u32,
    seed: Option<u64>,
    parallel: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            t_min: 2.0,
            t_max: 3.0,
            t_step: 0.05,
            repeats: 256,
            seed: None,
            parallel: true,
        }
    }
}

fn main() -> ExitCode {
    let path = config::config_path_from_args();
    let config: SweepFile = match config::load_yaml(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init(&config.logging) {
        eprintln!("{e}");
    }

    match run(&config) {
        Ok(points) => {
            for p in points {
                println!("{:.6} {:.6} {:.6}", p.temperature, p.mean, p.rms);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(fatal = e.is_fatal(), "{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &SweepFile) -> SimResult<Vec<SweepPoint>> {
    let s = &config.sweep;
    let temperatures = ising::temperatures(s.t_min, s.t_max, s.t_step);
    let seeds = s.seed.map(SeedStream::new).unwrap_or_else(SeedStream::from_time);

    info!(
        backend = ?config.harness.backend,
        temperatures = temperatures.len(),
        repeats = s.repeats,
        "starting sweep"
    );

    match config.harness.backend {
        BackendKind::Host => sweep_host(config, &temperatures, &seeds),
        BackendKind::Gpu => sweep_gpu(config, &temperatures, &seeds),
    }
}

fn sweep_host(config: &SweepFile, temperatures: &[f64], seeds: &SeedStream) -> SimResult<Vec<SweepPoint>> {
    let harness = &config.harness;
    let repeats = config.sweep.repeats;

    let point = |(i, &t): (usize, &f64)| -> SimResult<SweepPoint> {
        let mut sim = Simulation::<HostBackend>::create(harness.platform, harness.device)?;
        sim.load_program(&ising::host_program(), ising::layout())?;
        let p = ising::sweep_point(&mut sim, t, repeats, &mut seeds.fork(i as u64))?;
        sim.release();
        info!(temperature = t, mean = p.mean, rms = p.rms, "temperature done");
        Ok(p)
    };

    if config.sweep.parallel {
        temperatures.par_iter().enumerate().map(point).collect()
    } else {
        temperatures.iter().enumerate().map(point).collect()
    }
}

#[cfg(feature = "gpu")]
fn sweep_gpu(config: &SweepFile, temperatures: &[f64], seeds: &SeedStream) -> SimResult<Vec<SweepPoint>> {
    use stagesim::gpu::WgpuBackend;
    use stagesim::KernelSource;

    let harness = &config.harness;
    let mut sim = Simulation::<WgpuBackend>::create(harness.platform, harness.device)?;
    match &harness.kernel_path {
        Some(path) => sim.load_program_from_file(path, ising::layout())?,
        None => sim.load_program(&KernelSource::new(ising::WGSL), ising::layout())?,
    }

    let points = temperatures
        .iter()
        .enumerate()
        .map(|(i, &t)| -> SimResult<SweepPoint> {
            let p = ising::sweep_point(&mut sim, t, config.sweep.repeats, &mut seeds.fork(i as u64))?;
            info!(temperature = t, mean = p.mean, rms = p.rms, "temperature done");
            Ok(p)
        })
        .collect::<SimResult<Vec<_>>>()?;

    sim.release();
    Ok(points)
}

#[cfg(not(feature = "gpu"))]
fn sweep_gpu(_: &SweepFile, _: &[f64], _: &SeedStream) -> SimResult<Vec<SweepPoint>> {
    Err(stagesim::ConfigurationError::BackendUnavailable { backend: "gpu" }.into())
}

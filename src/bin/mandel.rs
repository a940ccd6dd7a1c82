//! Mandelbrot escape-time render.
//!
//! Usage: `mandel [config.yaml]`
//!
//! Prints one `lastc,abs` line per pixel, row-major.

use std::io::{self, BufWriter, Write};
use std::process::ExitCode;

use serde::Deserialize;
use tracing::{error, info};

use stagesim::config::{self, BackendKind, HarnessConfig};
use stagesim::logging::{self, LoggingConfig};
use stagesim::models::mandel::{self, MandelImage, MandelParams};
use stagesim::{HostBackend, SimResult, Simulation};


#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MandelFile {
    harness: HarnessConfig,
    logging: LoggingConfig,
    mandel: MandelParams,
}

fn main() -> ExitCode {
    let path = config::config_path_from_args();
    let config: MandelFile = match config::load_yaml(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init(&config.logging) {
        eprintln!("{e}");
    }

    let image = match render(&config) {
        Ok(image) => image,
        Err(e) => {
            error!(fatal = e.is_fatal(), "{e}");
            return ExitCode::FAILURE;
        }
    };

    match write_csv(&image) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("couldn't write output: {e}");
            ExitCode::FAILURE
        }
    }
}

fn render(config: &MandelFile) -> SimResult<MandelImage> {
    let harness = &config.harness;
    let params = &config.mandel;
    info!(side = params.side, iterations = params.iterations, "rendering");

    match harness.backend {
        BackendKind::Host => {
            let mut sim = Simulation::<HostBackend>::create(harness.platform, harness.device)?;
            sim.load_program(&mandel::host_program(), params.layout())?;
            let image = mandel::render(&mut sim, params)?;
            sim.release();
            Ok(image)
        }
        BackendKind::Gpu => render_gpu(harness, params),
    }
}

#[cfg(feature = "gpu")]
fn render_gpu(harness: &HarnessConfig, params: &MandelParams) -> SimResult<MandelImage> {
    use stagesim::gpu::WgpuBackend;
    use stagesim::KernelSource;

    let mut sim = Simulation::<WgpuBackend>::create(harness.platform, harness.device)?;
    match &harness.kernel_path {
        Some(path) => sim.load_program_from_file(path, params.layout())?,
        None => sim.load_program(&KernelSource::new(mandel::WGSL), params.layout())?,
    }
    let image = mandel::render(&mut sim, params)?;
    sim.release();
    Ok(image)
}

#[cfg(not(feature = "gpu"))]
fn render_gpu(_: &HarnessConfig, _: &MandelParams) -> SimResult<MandelImage> {
    Err(stagesim::ConfigurationError::BackendUnavailable { backend: "gpu" }.into())
}

fn write_csv(image: &MandelImage) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for (lastc, abs) in image.lastc.iter().zip(&image.abs) {
        writeln!(out, "{lastc},{abs:.6}")?;
    }
    out.flush()
}

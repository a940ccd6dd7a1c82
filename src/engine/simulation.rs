//! # Simulation Instance
//!
//! [`Simulation`] is the caller-facing handle of the harness. It owns one
//! compute backend (context + in-order queue), one [`ResourceSet`] and the
//! [`Orchestrator`] tracking which state buffer is latest.
//!
//! ## Protocol
//!
//! ```text
//! create ─► load_program ─► configure_{init,update,measure}
//!        ─► run_init ─► run_update × N ─► run_meas ─► get_meas ─► release
//! ```
//!
//! `run_update` and `run_meas` may be interleaved freely; every enqueue is
//! non-blocking and only [`Simulation::get_meas`] waits for the device.
//!
//! ## Reconfiguration
//!
//! Any `configure_*` call may be repeated at any time after
//! `load_program`. The stage's argument buffer and bindings are replaced,
//! parity is left untouched, and the next enqueue of that stage uses the new
//! payload. Loading a new program resets the instance to `Uninitialized`.
//!
//! ## Release
//!
//! [`Simulation::release`] consumes the handle, so releasing twice cannot be
//! written. Dropping the handle performs the same teardown.

use tracing::{debug, error, info, trace, warn};

use crate::engine::backend::{ComputeBackend, DeviceInfo, DeviceLimits, KernelSource, PlatformInfo};
use crate::engine::error::{ConfigurationError, SimError, SimResult, StateError};
use crate::engine::orchestrator::Orchestrator;
use crate::engine::resources::ResourceSet;
use crate::engine::stage::StageDescriptor;
use crate::engine::types::{Geometry, StageKind, StateLayout, StateSlot};


/// One staged, double-buffered simulation bound to a device.
pub struct Simulation<B: ComputeBackend> {
    orchestrator: Orchestrator,
    resources: Option<ResourceSet<B>>,
    backend: B,
}

impl<B: ComputeBackend> Simulation<B> {
    /// Lists the platforms and devices the backend can open.
    pub fn platforms() -> SimResult<Vec<PlatformInfo>> {
        B::platforms()
    }

    /// Opens device `device_index` of platform `platform_index`.
    ///
    /// ## Errors
    /// `ConfigurationError` when either index is out of range.
    pub fn create(platform_index: usize, device_index: usize) -> SimResult<Self> {
        let backend = B::open(platform_index, device_index)?;
        Ok(Self::with_backend(backend))
    }

    /// Wraps an already opened backend.
    pub fn with_backend(backend: B) -> Self {
        let device = backend.device();
        info!(platform = %device.platform, device = %device.device, "device selected");
        Self {
            orchestrator: Orchestrator::new(),
            resources: None,
            backend,
        }
    }

    /// Compiles `source` and allocates both state buffers for `layout`.
    ///
    /// Replaces any previously loaded program together with every stage
    /// configuration, and resets the instance to `Uninitialized` with
    /// latest = `A`. On failure the previous program stays loaded.
    ///
    /// ## Errors
    /// * `CompileError` with the backend's full build log, including a
    ///   missing `init_k`, `update_k` or `measure_k` entry point.
    /// * `ConfigurationError` for an empty layout.
    pub fn load_program(&mut self, source: &B::Source, layout: StateLayout) -> SimResult<()> {
        let loaded = match ResourceSet::load(&mut self.backend, source, layout) {
            Ok(loaded) => loaded,
            Err(SimError::Compile(e)) => {
                error!(log = %e.log, "kernel program failed to build");
                return Err(e.into());
            }
            Err(e) => return Err(e),
        };

        if let Some(previous) = self.resources.replace(loaded) {
            debug!("replacing loaded program");
            previous.teardown();
        }
        self.orchestrator = Orchestrator::new();
        Ok(())
    }

    /// Binds the init stage: `init_k(state, args)` for both state buffers.
    pub fn configure_init(&mut self, args: &[u8], geometry: Geometry) -> SimResult<()> {
        self.configure(StageKind::Init, args, 0, geometry)
    }

    /// Binds both update variants `update_k(write, read, scratch, args)`:
    /// variant `A` reads `A` and writes `B`, variant `B` the reverse.
    pub fn configure_update(&mut self, args: &[u8], scratch_bytes: u64, geometry: Geometry) -> SimResult<()> {
        self.configure(StageKind::Update, args, scratch_bytes, geometry)
    }

    /// Reallocates the output buffer (`output_size` bytes) and binds both
    /// measure variants `measure_k(output, read, scratch, args)`.
    pub fn configure_measure(
        &mut self,
        args: &[u8],
        scratch_bytes: u64,
        output_size: usize,
        geometry: Geometry,
    ) -> SimResult<()> {
        let resources = self.resources.as_mut().ok_or(StateError::NoProgram)?;
        let descriptor = StageDescriptor::new(
            StageKind::Measure,
            args.len(),
            scratch_bytes,
            geometry,
            self.backend.limits(),
        )?;
        resources.configure_measure(&mut self.backend, descriptor, args, output_size)
    }

    fn configure(&mut self, stage: StageKind, args: &[u8], scratch_bytes: u64, geometry: Geometry) -> SimResult<()> {
        let resources = self.resources.as_mut().ok_or(StateError::NoProgram)?;
        let descriptor = StageDescriptor::new(stage, args.len(), scratch_bytes, geometry, self.backend.limits())?;
        resources.configure(&mut self.backend, descriptor, args)
    }

    /// Enqueues init into the latest state buffer. Never flips parity; may
    /// be repeated to restart a trajectory.
    pub fn run_init(&mut self) -> SimResult<()> {
        let variant = self.orchestrator.init_variant();
        self.enqueue(StageKind::Init, variant)?;
        self.orchestrator.commit_init();
        Ok(())
    }

    /// Enqueues one update reading the latest buffer and writing the other,
    /// then flips parity.
    pub fn run_update(&mut self) -> SimResult<()> {
        self.require_program()?;
        let variant = self.orchestrator.update_variant()?;
        self.enqueue(StageKind::Update, variant)?;
        self.orchestrator.commit_update();
        Ok(())
    }

    /// Enqueues one measurement of the latest state.
    pub fn run_meas(&mut self) -> SimResult<()> {
        self.require_program()?;
        let variant = self.orchestrator.measure_variant()?;
        self.enqueue(StageKind::Measure, variant)
    }

    /// Waits for all enqueued work, then copies the output buffer into the
    /// front of `host`.
    ///
    /// Returns the number of bytes copied (the configured output size).
    ///
    /// ## Errors
    /// * `StateError` when measure was never configured.
    /// * `ConfigurationError` when `host` is smaller than the output.
    pub fn get_meas(&mut self, host: &mut [u8]) -> SimResult<usize> {
        let resources = self.resources.as_ref().ok_or(StateError::NoProgram)?;
        let output = resources
            .output()
            .filter(|_| resources.stage(StageKind::Measure).is_some())
            .ok_or(StateError::StageNotConfigured { stage: StageKind::Measure })?;

        let size = output.size();
        if host.len() < size {
            return Err(ConfigurationError::HostBufferTooSmall {
                required: size,
                provided: host.len(),
            }
            .into());
        }

        self.backend.flush()?;
        self.backend.finish()?;
        self.backend.read_buffer(output.buffer(), &mut host[..size])?;
        trace!(bytes = size, "measurement read back");
        Ok(size)
    }

    /// Typed [`Simulation::get_meas`]: reads into a slice of POD values.
    pub fn get_meas_as<T: bytemuck::Pod>(&mut self, host: &mut [T]) -> SimResult<usize> {
        self.get_meas(bytemuck::cast_slice_mut(host))
    }

    /// Slot currently holding the latest state.
    pub fn latest(&self) -> StateSlot {
        self.orchestrator.latest()
    }

    /// Successful updates since the program was loaded.
    pub fn updates(&self) -> u64 {
        self.orchestrator.updates()
    }

    /// `true` once `run_init` has been enqueued.
    pub fn is_ready(&self) -> bool {
        self.orchestrator.is_ready()
    }

    /// Configured measurement output size in bytes.
    pub fn output_size(&self) -> Option<usize> {
        self.resources.as_ref()?.output().map(|o| o.size())
    }

    /// State layout of the loaded program.
    pub fn layout(&self) -> Option<StateLayout> {
        self.resources.as_ref().map(ResourceSet::layout)
    }

    /// Selected platform and device.
    pub fn device(&self) -> &DeviceInfo {
        self.backend.device()
    }

    /// Dispatch limits used for geometry validation.
    pub fn limits(&self) -> &DeviceLimits {
        self.backend.limits()
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Releases every device object: kernels, buffers, program, then the
    /// queue and context.
    pub fn release(mut self) {
        if let Err(e) = self.backend.finish() {
            warn!(error = %e, "pending work did not complete before release");
        }
        if let Some(resources) = self.resources.take() {
            resources.teardown();
        }
        info!(device = %self.backend.device().device, "simulation released");
    }

    fn require_program(&self) -> Result<(), StateError> {
        match self.resources {
            Some(_) => Ok(()),
            None => Err(StateError::NoProgram),
        }
    }

    fn enqueue(&mut self, kind: StageKind, variant: StateSlot) -> SimResult<()> {
        let resources = self.resources.as_ref().ok_or(StateError::NoProgram)?;
        let stage = resources
            .stage(kind)
            .ok_or(StateError::StageNotConfigured { stage: kind })?;

        self.backend.enqueue(stage.kernel(), stage.variant(variant), &stage.descriptor().geometry)?;
        trace!(stage = %kind, ?variant, "stage enqueued");
        Ok(())
    }
}

impl<B: ComputeBackend<Source = KernelSource>> Simulation<B> {
    /// Reads kernel source from `path`, then behaves as
    /// [`Simulation::load_program`].
    pub fn load_program_from_file(
        &mut self,
        path: impl AsRef<std::path::Path>,
        layout: StateLayout,
    ) -> SimResult<()> {
        let source = KernelSource::from_file(path)?;
        self.load_program(&source, layout)
    }
}

impl<B: ComputeBackend> Drop for Simulation<B> {
    fn drop(&mut self) {
        if let Some(resources) = self.resources.take() {
            resources.teardown();
        }
    }
}

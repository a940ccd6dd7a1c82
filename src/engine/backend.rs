//! # Compute Backend Binding
//!
//! The narrow capability surface the harness consumes from a compute API:
//! platform/device enumeration, context and queue creation, program
//! compilation, buffer allocation and transfer, argument binding, enqueue
//! and completion barriers.
//!
//! The harness depends only on the names and blocking contracts of these
//! operations, never on backend-internal representations. Two backends ship
//! with the crate:
//!
//! * [`crate::host::HostBackend`] - CPU reference backend running kernels
//!   written as Rust closures. Always available.
//! * `crate::gpu::WgpuBackend` - `wgpu` compute pipelines running WGSL
//!   kernels (`feature = "gpu"`).
//!
//! ## Blocking contracts
//!
//! | operation      | host thread |
//! |----------------|-------------|
//! | `write_buffer` | non-blocking, ordered before later enqueues |
//! | `enqueue`      | non-blocking |
//! | `flush`        | non-blocking, submits pending work |
//! | `finish`       | blocks until all enqueued work completed |
//! | `read_buffer`  | blocks until the copy completed |
//!
//! ## Ordering
//!
//! Backends must execute enqueued work **in submission order**. The
//! ping-pong protocol flips buffer roles on enqueue, not on completion, and
//! is only correct on an in-order queue.

use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::error::{ConfigurationError, SimResult};
use crate::engine::types::{Geometry, StageKind};


/// Backend-reported dispatch limits used for geometry validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Maximum invocations per work-group.
    pub max_work_group_size: u32,
    /// Maximum local extent per axis.
    pub max_local_extent: [u32; 3],
    /// Maximum number of work-groups along any one axis.
    pub max_work_groups_per_axis: u32,
    /// Maximum local scratch per work-group, in bytes.
    pub max_scratch_bytes: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_work_group_size: 256,
            max_local_extent: [256, 256, 64],
            max_work_groups_per_axis: 65_535,
            max_scratch_bytes: 16_384,
        }
    }
}

/// One enumerated platform and the names of its devices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformInfo {
    /// Platform name.
    pub name: String,
    /// Device names, in index order.
    pub devices: Vec<String>,
}

/// The platform and device an instance is bound to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Selected platform name.
    pub platform: String,
    /// Selected device name.
    pub device: String,
}

/// Role of a device buffer, used to pick usage flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// One of the two state buffers.
    State,
    /// A stage argument payload.
    Args,
    /// The measurement output.
    Output,
}

/// Per-configuration launch parameters baked into a stage kernel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchShape {
    /// Local (work-group) extent per axis; unused axes are 1.
    pub local: [u32; 3],
    /// Local scratch per work-group in bytes (slot 2).
    pub scratch_bytes: u64,
}

impl LaunchShape {
    /// Scratch size in 32-bit words, at least one.
    pub fn scratch_words(&self) -> u32 {
        let words = self.scratch_bytes.div_ceil(4).max(1);
        u32::try_from(words).unwrap_or(u32::MAX)
    }
}

/// A buffer bound to a kernel argument slot.
#[derive(Debug)]
pub struct ArgBinding<'a, Buf> {
    /// Slot index (see [`StageKind::slots`]).
    pub slot: u32,
    /// Buffer bound to the slot.
    pub buffer: &'a Buf,
}

/// Kernel source text (WGSL for the `gpu` backend).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelSource {
    text: String,
    origin: Option<PathBuf>,
}

impl KernelSource {
    /// Wraps in-memory source text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), origin: None }
    }

    /// Reads UTF-8 source text from `path`.
    pub fn from_file(path: impl AsRef<Path>) -> SimResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| ConfigurationError::KernelSource {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self { text, origin: Some(path.to_path_buf()) })
    }

    /// Source text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// File the source was read from, if any.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }
}

impl From<&str> for KernelSource {
    fn from(text: &str) -> Self { Self::new(text) }
}

impl From<String> for KernelSource {
    fn from(text: String) -> Self { Self::new(text) }
}

/// Capability surface of a compute API.
///
/// A backend value owns the context and the in-order command queue of one
/// device. Dropping it releases both; every object it created must be
/// dropped first (the resource set guarantees this ordering).
pub trait ComputeBackend: Sized {
    /// Program source accepted by [`ComputeBackend::compile`].
    type Source;
    /// A compiled program.
    type Program;
    /// A device buffer.
    type Buffer;
    /// A stage kernel built for one launch shape.
    type Kernel;
    /// A kernel with buffers bound to its slots (one kernel variant).
    type Binding;

    /// Lists available platforms and their devices.
    fn platforms() -> SimResult<Vec<PlatformInfo>>;

    /// Creates a context and in-order queue on the selected device.
    ///
    /// Fails with `ConfigurationError` when either index is out of range.
    fn open(platform_index: usize, device_index: usize) -> SimResult<Self>;

    /// Selected platform and device.
    fn device(&self) -> &DeviceInfo;

    /// Dispatch limits of the selected device.
    fn limits(&self) -> &DeviceLimits;

    /// Compiles `source` and resolves `entry_points`.
    ///
    /// Fails with `CompileError` carrying the full build log.
    fn compile(&mut self, source: &Self::Source, entry_points: &[&str]) -> SimResult<Self::Program>;

    /// Allocates a zero-initialised buffer of `size` bytes (a multiple of 4).
    fn create_buffer(&mut self, label: &'static str, size: u64, usage: BufferUsage) -> SimResult<Self::Buffer>;

    /// Queues a write of `bytes` to the start of `buffer`.
    fn write_buffer(&mut self, buffer: &Self::Buffer, bytes: &[u8]) -> SimResult<()>;

    /// Builds the kernel for `stage` with the given launch shape.
    fn create_kernel(&mut self, program: &Self::Program, stage: StageKind, shape: &LaunchShape) -> SimResult<Self::Kernel>;

    /// Binds buffers to the kernel's argument slots.
    fn bind(&mut self, kernel: &Self::Kernel, args: &[ArgBinding<'_, Self::Buffer>]) -> SimResult<Self::Binding>;

    /// Enqueues one dispatch of `kernel` with `binding` over `geometry`.
    fn enqueue(&mut self, kernel: &Self::Kernel, binding: &Self::Binding, geometry: &Geometry) -> SimResult<()>;

    /// Submits all pending work without waiting.
    fn flush(&mut self) -> SimResult<()>;

    /// Blocks until all submitted work has completed.
    fn finish(&mut self) -> SimResult<()>;

    /// Blocking copy of the first `out.len()` bytes of `buffer` into `out`.
    fn read_buffer(&mut self, buffer: &Self::Buffer, out: &mut [u8]) -> SimResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_words_round_up() {
        let shape = |scratch_bytes| LaunchShape { local: [16, 16, 1], scratch_bytes };
        assert_eq!(shape(0).scratch_words(), 1);
        assert_eq!(shape(1).scratch_words(), 1);
        assert_eq!(shape(1024).scratch_words(), 256);
        assert_eq!(shape(1025).scratch_words(), 257);
    }

    #[test]
    fn missing_kernel_file_is_a_configuration_error() {
        let err = KernelSource::from_file("/nonexistent/kernel.wgsl").unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("kernel.wgsl"));
    }
}

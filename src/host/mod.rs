//! # Host Backend
//!
//! CPU reference implementation of [`ComputeBackend`]. Kernels are Rust
//! closures registered in a [`HostProgram`] under the entry-point names
//! `init_k`, `update_k` and `measure_k`.
//!
//! ## Execution model
//!
//! * `enqueue` runs the kernel to completion on the calling thread, so the
//!   queue is trivially in-order. Kernels are free to parallelise internally
//!   (the bundled models use `rayon`).
//! * `flush` and `finish` are bookkeeping only; their calls are counted so
//!   tests can observe the barrier before readback.
//! * Buffers are word-aligned host allocations shared between the resource
//!   set and the bindings that reference them. Live-allocation counters
//!   let callers verify that reconfiguration releases what it replaces.
//! * [`HostBackend::with_memory_budget`] caps the bytes held by live
//!   buffers. An allocation past the cap fails with a [`BackendError`],
//!   the host stand-in for device memory exhaustion.
//!
//! ## Dispatch log
//!
//! Off by default. A backend built with [`HostBackend::with_dispatch_log`]
//! appends a [`DispatchRecord`] for every kernel that completes, naming
//! the stage and the buffer bound to each slot. This makes the ping-pong
//! role assignment directly observable without reading state back.
//! Enqueues that fail are not recorded.

mod invocation;
mod program;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::engine::backend::{
    ArgBinding, BufferUsage, ComputeBackend, DeviceInfo, DeviceLimits, LaunchShape, PlatformInfo,
};
use crate::engine::error::{BackendError, CompileError, ConfigurationError, SimResult};
use crate::engine::types::{Geometry, StageKind};

pub use invocation::HostInvocation;
pub use program::{HostProgram, KernelFn};

use invocation::BoundSlot;


const PLATFORM_NAME: &str = "host";
const DEVICE_NAME: &str = "cpu reference";

/// Buffers and bytes held by live allocations.
#[derive(Default)]
struct Usage {
    buffers: AtomicUsize,
    bytes: AtomicUsize,
}

/// Word-aligned host allocation.
struct Allocation {
    words: Mutex<Vec<u64>>,
    bytes: usize,
    usage: Arc<Usage>,
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.usage.buffers.fetch_sub(1, Ordering::AcqRel);
        self.usage.bytes.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

/// A host "device" buffer.
#[derive(Clone)]
pub struct HostBuffer {
    id: u64,
    label: &'static str,
    len: usize,
    alloc: Arc<Allocation>,
}

impl HostBuffer {
    /// Allocation id, unique per backend.
    pub fn id(&self) -> u64 { self.id }

    /// Label given at allocation.
    pub fn label(&self) -> &'static str { self.label }

    /// Size in bytes.
    pub fn len(&self) -> usize { self.len }

    /// `true` for a zero-sized buffer.
    pub fn is_empty(&self) -> bool { self.len == 0 }
}

impl std::fmt::Debug for HostBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBuffer")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("len", &self.len)
            .finish()
    }
}

/// A resolved host kernel.
pub struct HostKernel {
    stage: StageKind,
    shape: LaunchShape,
    body: KernelFn,
}

/// Buffers bound to a host kernel's slots.
pub struct HostBinding {
    stage: StageKind,
    slots: Vec<(u32, HostBuffer)>,
}

/// A buffer as seen by one recorded dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundBuffer {
    /// Slot index.
    pub slot: u32,
    /// Buffer id.
    pub buffer: u64,
    /// Buffer label (`state_a`, `state_b`, `output`, ...).
    pub label: &'static str,
}

/// One enqueue observed by the host backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchRecord {
    /// Stage executed.
    pub stage: StageKind,
    /// Geometry of the dispatch.
    pub geometry: Geometry,
    /// Buffers bound, in slot order.
    pub bindings: Vec<BoundBuffer>,
}

impl DispatchRecord {
    /// Label of the buffer bound to `slot`.
    pub fn label_at(&self, slot: u32) -> Option<&'static str> {
        self.bindings.iter().find(|b| b.slot == slot).map(|b| b.label)
    }
}

/// Counts of queue barriers issued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Barriers {
    /// `flush` calls.
    pub flushes: u64,
    /// `finish` calls.
    pub finishes: u64,
}

/// CPU reference backend.
pub struct HostBackend {
    device: DeviceInfo,
    limits: DeviceLimits,
    next_id: u64,
    usage: Arc<Usage>,
    memory_budget: Option<usize>,
    dispatch_log: Option<Vec<DispatchRecord>>,
    barriers: Barriers,
}

impl HostBackend {
    /// Limits reported by a default host device.
    pub const DEFAULT_LIMITS: DeviceLimits = DeviceLimits {
        max_work_group_size: 1024,
        max_local_extent: [1024, 1024, 64],
        max_work_groups_per_axis: 65_535,
        max_scratch_bytes: 32_768,
    };

    /// A host device with [`HostBackend::DEFAULT_LIMITS`].
    pub fn new() -> Self {
        Self::with_limits(Self::DEFAULT_LIMITS)
    }

    /// A host device reporting `limits`.
    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            device: DeviceInfo {
                platform: PLATFORM_NAME.to_string(),
                device: DEVICE_NAME.to_string(),
            },
            limits,
            next_id: 0,
            usage: Arc::new(Usage::default()),
            memory_budget: None,
            dispatch_log: None,
            barriers: Barriers::default(),
        }
    }

    /// Record every completed dispatch. See [`HostBackend::dispatches`].
    pub fn with_dispatch_log(mut self) -> Self {
        self.dispatch_log.get_or_insert_with(Vec::new);
        self
    }

    /// Fail allocations that would raise live buffer bytes above `bytes`.
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = Some(bytes);
        self
    }

    /// Completed dispatches, oldest first. Empty unless the log is enabled.
    pub fn dispatches(&self) -> &[DispatchRecord] {
        self.dispatch_log.as_deref().unwrap_or_default()
    }

    /// Drop the recorded dispatches, keeping the log enabled.
    pub fn clear_dispatches(&mut self) {
        if let Some(log) = &mut self.dispatch_log {
            log.clear();
        }
    }

    /// Barrier counts.
    pub fn barriers(&self) -> Barriers {
        self.barriers
    }

    /// Buffers currently allocated and not yet released.
    pub fn live_buffers(&self) -> usize {
        self.usage.buffers.load(Ordering::Acquire)
    }

    /// Bytes held by live buffers.
    pub fn live_bytes(&self) -> usize {
        self.usage.bytes.load(Ordering::Acquire)
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_failed(operation: &'static str) -> BackendError {
    BackendError::new(operation, "host buffer lock poisoned by a panicking kernel")
}

impl ComputeBackend for HostBackend {
    type Source = HostProgram;
    type Program = HostProgram;
    type Buffer = HostBuffer;
    type Kernel = HostKernel;
    type Binding = HostBinding;

    fn platforms() -> SimResult<Vec<PlatformInfo>> {
        Ok(vec![PlatformInfo {
            name: PLATFORM_NAME.to_string(),
            devices: vec![DEVICE_NAME.to_string()],
        }])
    }

    fn open(platform_index: usize, device_index: usize) -> SimResult<Self> {
        let platforms = Self::platforms()?;
        let platform = platforms.get(platform_index).ok_or(ConfigurationError::PlatformOutOfRange {
            index: platform_index,
            available: platforms.len(),
        })?;
        if device_index >= platform.devices.len() {
            return Err(ConfigurationError::DeviceOutOfRange {
                index: device_index,
                available: platform.devices.len(),
            }
            .into());
        }
        Ok(Self::new())
    }

    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    fn compile(&mut self, source: &HostProgram, entry_points: &[&str]) -> SimResult<HostProgram> {
        let missing: Vec<&str> = entry_points
            .iter()
            .copied()
            .filter(|name| source.entry(name).is_none())
            .collect();
        if !missing.is_empty() {
            let available = source.entry_names().collect::<Vec<_>>().join(", ");
            return Err(CompileError::new(format!(
                "host program is missing entry point(s): {}\navailable: [{available}]",
                missing.join(", ")
            ))
            .into());
        }
        Ok(source.clone())
    }

    fn create_buffer(&mut self, label: &'static str, size: u64, _usage: BufferUsage) -> SimResult<HostBuffer> {
        let len = usize::try_from(size)
            .map_err(|_| BackendError::new("allocate host buffer", format!("{size} bytes exceeds address space")))?;

        if let Some(budget) = self.memory_budget {
            let held = self.live_bytes();
            if held.saturating_add(len) > budget {
                return Err(BackendError::new(
                    "allocate host buffer",
                    format!("`{label}` needs {len} bytes, {held} of {budget} already held"),
                )
                .into());
            }
        }

        self.next_id += 1;
        self.usage.buffers.fetch_add(1, Ordering::AcqRel);
        self.usage.bytes.fetch_add(len, Ordering::AcqRel);
        let alloc = Allocation {
            words: Mutex::new(vec![0u64; len.div_ceil(8)]),
            bytes: len,
            usage: Arc::clone(&self.usage),
        };

        trace!(label, size, "host buffer allocated");
        Ok(HostBuffer { id: self.next_id, label, len, alloc: Arc::new(alloc) })
    }

    fn write_buffer(&mut self, buffer: &HostBuffer, bytes: &[u8]) -> SimResult<()> {
        if bytes.len() > buffer.len {
            return Err(BackendError::new(
                "write host buffer",
                format!("{} bytes into {} byte buffer `{}`", bytes.len(), buffer.len, buffer.label),
            )
            .into());
        }
        let mut words = buffer.alloc.words.lock().map_err(|_| lock_failed("write host buffer"))?;
        bytemuck::cast_slice_mut::<u64, u8>(words.as_mut_slice())[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn create_kernel(&mut self, program: &HostProgram, stage: StageKind, shape: &LaunchShape) -> SimResult<HostKernel> {
        let body = program
            .entry(stage.entry_point())
            .ok_or_else(|| CompileError::new(format!("entry point `{}` not found", stage.entry_point())))?;
        Ok(HostKernel { stage, shape: *shape, body: Arc::clone(body) })
    }

    fn bind(&mut self, kernel: &HostKernel, args: &[ArgBinding<'_, HostBuffer>]) -> SimResult<HostBinding> {
        for (i, a) in args.iter().enumerate() {
            if args[..i].iter().any(|b| Arc::ptr_eq(&a.buffer.alloc, &b.buffer.alloc)) {
                return Err(BackendError::new(
                    "bind host kernel",
                    format!("buffer `{}` bound to more than one slot", a.buffer.label),
                )
                .into());
            }
        }
        Ok(HostBinding {
            stage: kernel.stage,
            slots: args.iter().map(|a| (a.slot, a.buffer.clone())).collect(),
        })
    }

    fn enqueue(&mut self, kernel: &HostKernel, binding: &HostBinding, geometry: &Geometry) -> SimResult<()> {
        if binding.stage != kernel.stage {
            return Err(BackendError::new(
                "enqueue host kernel",
                format!("{} binding used with {} kernel", binding.stage, kernel.stage),
            )
            .into());
        }

        let mut slots = Vec::with_capacity(binding.slots.len());
        for (slot, buffer) in &binding.slots {
            let words = buffer.alloc.words.lock().map_err(|_| lock_failed("enqueue host kernel"))?;
            slots.push(BoundSlot { slot: *slot, len: buffer.len, words });
        }

        let scratch_words = if kernel.stage.uses_scratch() { kernel.shape.scratch_words() as usize } else { 0 };
        let mut invocation = HostInvocation::new(kernel.stage, *geometry, slots, scratch_words);
        (kernel.body)(&mut invocation)?;

        if let Some(log) = &mut self.dispatch_log {
            log.push(DispatchRecord {
                stage: kernel.stage,
                geometry: *geometry,
                bindings: binding
                    .slots
                    .iter()
                    .map(|(slot, buffer)| BoundBuffer { slot: *slot, buffer: buffer.id, label: buffer.label })
                    .collect(),
            });
        }
        Ok(())
    }

    fn flush(&mut self) -> SimResult<()> {
        self.barriers.flushes += 1;
        Ok(())
    }

    fn finish(&mut self) -> SimResult<()> {
        self.barriers.finishes += 1;
        Ok(())
    }

    fn read_buffer(&mut self, buffer: &HostBuffer, out: &mut [u8]) -> SimResult<()> {
        if out.len() > buffer.len {
            return Err(BackendError::new(
                "read host buffer",
                format!("{} bytes from {} byte buffer `{}`", out.len(), buffer.len, buffer.label),
            )
            .into());
        }
        let words = buffer.alloc.words.lock().map_err(|_| lock_failed("read host buffer"))?;
        out.copy_from_slice(&bytemuck::cast_slice::<u64, u8>(words.as_slice())[..out.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(value: u8) -> HostProgram {
        HostProgram::new().with_entry("init_k", move |inv| {
            inv.write(0)?.fill(value);
            Ok(())
        })
    }

    #[test]
    fn open_rejects_out_of_range_indices() {
        assert!(matches!(
            HostBackend::open(1, 0),
            Err(crate::SimError::Configuration(ConfigurationError::PlatformOutOfRange { index: 1, available: 1 }))
        ));
        assert!(matches!(
            HostBackend::open(0, 3),
            Err(crate::SimError::Configuration(ConfigurationError::DeviceOutOfRange { index: 3, available: 1 }))
        ));
    }

    #[test]
    fn compile_reports_missing_entry_points() {
        let mut backend = HostBackend::new();
        let err = backend.compile(&fill(1), &["init_k", "update_k"]).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("update_k"));
    }

    #[test]
    fn dropped_buffers_are_released() {
        let mut backend = HostBackend::new();
        let a = backend.create_buffer("a", 16, BufferUsage::State).unwrap();
        let b = backend.create_buffer("b", 16, BufferUsage::State).unwrap();
        assert_eq!(backend.live_buffers(), 2);
        let alias = a.clone();
        drop(a);
        assert_eq!(backend.live_buffers(), 2);
        drop(alias);
        drop(b);
        assert_eq!(backend.live_buffers(), 0);
        assert_eq!(backend.live_bytes(), 0);
    }

    #[test]
    fn allocations_past_the_budget_fail() {
        let mut backend = HostBackend::new().with_memory_budget(32);
        let a = backend.create_buffer("a", 24, BufferUsage::State).unwrap();
        assert_eq!(backend.live_bytes(), 24);

        let err = backend.create_buffer("b", 16, BufferUsage::State).unwrap_err();
        assert!(matches!(err, crate::SimError::Backend(_)));
        assert!(!err.is_fatal());
        assert_eq!(backend.live_buffers(), 1);

        drop(a);
        assert!(backend.create_buffer("b", 16, BufferUsage::State).is_ok());
    }

    #[test]
    fn enqueue_runs_the_kernel_in_place() {
        let mut backend = HostBackend::new().with_dispatch_log();
        let program = backend.compile(&fill(7), &["init_k"]).unwrap();
        let state = backend.create_buffer("state_a", 8, BufferUsage::State).unwrap();
        let args = backend.create_buffer("init_args", 4, BufferUsage::Args).unwrap();
        let shape = LaunchShape { local: [1, 1, 1], scratch_bytes: 0 };
        let kernel = backend.create_kernel(&program, StageKind::Init, &shape).unwrap();
        let binding = backend
            .bind(&kernel, &[ArgBinding { slot: 0, buffer: &state }, ArgBinding { slot: 1, buffer: &args }])
            .unwrap();

        backend.enqueue(&kernel, &binding, &Geometry::linear(8, 1)).unwrap();

        let mut out = [0u8; 8];
        backend.read_buffer(&state, &mut out).unwrap();
        assert_eq!(out, [7; 8]);
        assert_eq!(backend.dispatches()[0].label_at(0), Some("state_a"));
    }

    #[test]
    fn aliased_slots_are_rejected() {
        let mut backend = HostBackend::new();
        let program = backend.compile(&fill(0), &["init_k"]).unwrap();
        let state = backend.create_buffer("state_a", 8, BufferUsage::State).unwrap();
        let shape = LaunchShape { local: [1, 1, 1], scratch_bytes: 0 };
        let kernel = backend.create_kernel(&program, StageKind::Init, &shape).unwrap();
        let err = backend
            .bind(&kernel, &[ArgBinding { slot: 0, buffer: &state }, ArgBinding { slot: 1, buffer: &state }])
            .err();
        assert!(matches!(err, Some(crate::SimError::Backend(_))));
    }

    fn init_kernel(backend: &mut HostBackend, program: &HostProgram) -> (HostKernel, HostBinding) {
        let state = backend.create_buffer("state_a", 8, BufferUsage::State).unwrap();
        let args = backend.create_buffer("init_args", 4, BufferUsage::Args).unwrap();
        let program = backend.compile(program, &["init_k"]).unwrap();
        let shape = LaunchShape { local: [1, 1, 1], scratch_bytes: 0 };
        let kernel = backend.create_kernel(&program, StageKind::Init, &shape).unwrap();
        let binding = backend
            .bind(&kernel, &[ArgBinding { slot: 0, buffer: &state }, ArgBinding { slot: 1, buffer: &args }])
            .unwrap();
        (kernel, binding)
    }

    #[test]
    fn dispatches_are_not_kept_by_default() {
        let mut backend = HostBackend::new();
        let (kernel, binding) = init_kernel(&mut backend, &fill(3));
        for _ in 0..10_000 {
            backend.enqueue(&kernel, &binding, &Geometry::linear(8, 1)).unwrap();
        }
        assert!(backend.dispatches().is_empty());
        assert_eq!(backend.dispatch_log, None);
    }

    #[test]
    fn failed_kernels_are_not_logged() {
        let failing = HostProgram::new().with_entry("init_k", |inv| {
            inv.read(3)?;
            Ok(())
        });
        let mut backend = HostBackend::new().with_dispatch_log();
        let (kernel, binding) = init_kernel(&mut backend, &failing);
        assert!(backend.enqueue(&kernel, &binding, &Geometry::linear(8, 1)).is_err());
        assert!(backend.dispatches().is_empty());

        let (kernel, binding) = init_kernel(&mut backend, &fill(1));
        backend.enqueue(&kernel, &binding, &Geometry::linear(8, 1)).unwrap();
        backend.enqueue(&kernel, &binding, &Geometry::linear(8, 1)).unwrap();
        assert_eq!(backend.dispatches().len(), 2);

        backend.clear_dispatches();
        assert!(backend.dispatches().is_empty());
        backend.enqueue(&kernel, &binding, &Geometry::linear(8, 1)).unwrap();
        assert_eq!(backend.dispatches().len(), 1);
    }
}

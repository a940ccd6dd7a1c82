//! # Stage Configurator
//!
//! Turns a caller's stage configuration (argument payload, local scratch,
//! geometry) into kernel-ready device state: a validated [`StageDescriptor`],
//! the stage's argument buffer, one kernel built for the launch shape, and
//! **two bindings**, one per state slot.
//!
//! ## Variant bindings
//!
//! A binding is keyed by the slot that holds the latest state when it is
//! enqueued:
//!
//! | stage   | variant `A`              | variant `B`              |
//! |---------|--------------------------|--------------------------|
//! | init    | state = A                | state = B                |
//! | update  | read = A, write = B      | read = B, write = A      |
//! | measure | read = A, output         | read = B, output         |
//!
//! Both variants share the kernel; they differ only in which physical state
//! buffer is bound to which slot.
//!
//! ## Validation
//!
//! Geometry and scratch are validated against the backend's limits **before**
//! anything is allocated or enqueued, so a rejected configuration leaves the
//! previous binding of the stage intact.

use tracing::debug;

use crate::engine::backend::{ArgBinding, BufferUsage, ComputeBackend, DeviceLimits, LaunchShape};
use crate::engine::error::{ConfigurationError, SimResult};
use crate::engine::types::{padded_size, Geometry, SlotRole, StageKind, StateSlot};


/// Validated configuration of one stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageDescriptor {
    /// Stage this descriptor configures.
    pub stage: StageKind,
    /// Argument payload size in bytes, before padding.
    pub args_len: usize,
    /// Local scratch per work-group in bytes.
    pub scratch_bytes: u64,
    /// Execution geometry.
    pub geometry: Geometry,
}

impl StageDescriptor {
    /// Validates a stage configuration against `limits`.
    pub fn new(
        stage: StageKind,
        args_len: usize,
        scratch_bytes: u64,
        geometry: Geometry,
        limits: &DeviceLimits,
    ) -> Result<Self, ConfigurationError> {
        check_geometry(&geometry, limits)?;
        if stage.uses_scratch() && scratch_bytes > limits.max_scratch_bytes {
            return Err(ConfigurationError::ScratchTooLarge {
                requested: scratch_bytes,
                max: limits.max_scratch_bytes,
            });
        }
        Ok(Self { stage, args_len, scratch_bytes, geometry })
    }

    /// Launch parameters baked into the stage kernel.
    pub fn launch_shape(&self) -> LaunchShape {
        LaunchShape {
            local: [
                self.geometry.local_extent(0),
                self.geometry.local_extent(1),
                self.geometry.local_extent(2),
            ],
            scratch_bytes: self.scratch_bytes,
        }
    }
}

/// Checks `geometry` against the device-independent rules and `limits`.
pub fn check_geometry(geometry: &Geometry, limits: &DeviceLimits) -> Result<(), ConfigurationError> {
    geometry.validate()?;

    let requested = geometry.group_invocations();
    if requested > limits.max_work_group_size as u64 {
        return Err(ConfigurationError::WorkGroupTooLarge {
            requested,
            max: limits.max_work_group_size,
        });
    }

    let groups = geometry.work_groups();
    for axis in 0..geometry.dims {
        let local = geometry.local[axis];
        let max = limits.max_local_extent[axis];
        if local > max {
            return Err(ConfigurationError::LocalExtentTooLarge { axis, local, max });
        }
        if groups[axis] > limits.max_work_groups_per_axis {
            return Err(ConfigurationError::TooManyWorkGroups {
                axis,
                groups: groups[axis],
                max: limits.max_work_groups_per_axis,
            });
        }
    }
    Ok(())
}

/// Copies `payload` into a word-padded byte vector.
pub(crate) fn padded_payload(payload: &[u8]) -> Vec<u8> {
    let mut bytes = payload.to_vec();
    bytes.resize(padded_size(payload.len() as u64) as usize, 0);
    bytes
}

/// A configured stage: descriptor, argument buffer, kernel and the two
/// variant bindings.
///
/// Field order is drop order: bindings, then the kernel, then the argument
/// buffer.
pub struct BoundStage<B: ComputeBackend> {
    variants: [B::Binding; 2],
    kernel: B::Kernel,
    args: B::Buffer,
    descriptor: StageDescriptor,
}

impl<B: ComputeBackend> BoundStage<B> {
    /// Allocates and writes the argument buffer, builds the kernel and binds
    /// both variants.
    ///
    /// `output` must be present for the measure stage.
    pub(crate) fn configure(
        backend: &mut B,
        program: &B::Program,
        states: &[B::Buffer; 2],
        output: Option<&B::Buffer>,
        descriptor: StageDescriptor,
        payload: &[u8],
    ) -> SimResult<Self> {
        let stage = descriptor.stage;
        let bytes = padded_payload(payload);

        let args = backend.create_buffer(args_label(stage), bytes.len() as u64, BufferUsage::Args)?;
        backend.write_buffer(&args, &bytes)?;

        let kernel = backend.create_kernel(program, stage, &descriptor.launch_shape())?;

        let variant_a = bind_variant(backend, &kernel, stage, StateSlot::A, states, output, &args)?;
        let variant_b = bind_variant(backend, &kernel, stage, StateSlot::B, states, output, &args)?;

        debug!(
            %stage,
            args_len = descriptor.args_len,
            scratch = descriptor.scratch_bytes,
            dims = descriptor.geometry.dims,
            "stage configured"
        );

        Ok(Self { variants: [variant_a, variant_b], kernel, args, descriptor })
    }

    /// Binding to enqueue when `latest` holds the most recent state.
    #[inline]
    pub fn variant(&self, latest: StateSlot) -> &B::Binding {
        &self.variants[latest.index()]
    }

    /// The stage kernel.
    #[inline]
    pub fn kernel(&self) -> &B::Kernel {
        &self.kernel
    }

    /// The stage's argument buffer.
    #[inline]
    pub fn args(&self) -> &B::Buffer {
        &self.args
    }

    /// The validated configuration.
    #[inline]
    pub fn descriptor(&self) -> &StageDescriptor {
        &self.descriptor
    }

    /// Splits the stage into bindings, kernel and argument buffer so the
    /// resource set can release them in dependency order.
    pub(crate) fn into_parts(self) -> ([B::Binding; 2], B::Kernel, B::Buffer) {
        (self.variants, self.kernel, self.args)
    }
}

fn args_label(stage: StageKind) -> &'static str {
    match stage {
        StageKind::Init => "init_args",
        StageKind::Update => "update_args",
        StageKind::Measure => "measure_args",
    }
}

fn bind_variant<B: ComputeBackend>(
    backend: &mut B,
    kernel: &B::Kernel,
    stage: StageKind,
    latest: StateSlot,
    states: &[B::Buffer; 2],
    output: Option<&B::Buffer>,
    args: &B::Buffer,
) -> SimResult<B::Binding> {
    let mut bindings = Vec::with_capacity(stage.slots().len());
    for slot in stage.slots() {
        let buffer = match slot.role {
            SlotRole::State | SlotRole::Read => &states[latest.index()],
            SlotRole::Write => &states[latest.other().index()],
            SlotRole::Args => args,
            SlotRole::Output => match output {
                Some(buffer) => buffer,
                None => {
                    return Err(ConfigurationError::EmptyBuffer { what: "measure output" }.into());
                }
            },
        };
        bindings.push(ArgBinding { slot: slot.index, buffer });
    }
    backend.bind(kernel, &bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> DeviceLimits {
        DeviceLimits {
            max_work_group_size: 256,
            max_local_extent: [256, 256, 64],
            max_work_groups_per_axis: 64,
            max_scratch_bytes: 1024,
        }
    }

    #[test]
    fn oversized_work_group_is_rejected() {
        let g = Geometry::planar([64, 64], [32, 16]);
        assert_eq!(
            check_geometry(&g, &limits()),
            Err(ConfigurationError::WorkGroupTooLarge { requested: 512, max: 256 })
        );
    }

    #[test]
    fn too_many_groups_are_rejected() {
        let g = Geometry::linear(256 * 65, 256);
        assert_eq!(
            check_geometry(&g, &limits()),
            Err(ConfigurationError::TooManyWorkGroups { axis: 0, groups: 65, max: 64 })
        );
    }

    #[test]
    fn init_ignores_scratch_limit() {
        let g = Geometry::linear(256, 256);
        assert!(StageDescriptor::new(StageKind::Init, 4, 1 << 20, g, &limits()).is_ok());
        assert_eq!(
            StageDescriptor::new(StageKind::Measure, 4, 2048, g, &limits()),
            Err(ConfigurationError::ScratchTooLarge { requested: 2048, max: 1024 })
        );
    }

    #[test]
    fn launch_shape_fills_unused_axes() {
        let g = Geometry::linear(4096, 256);
        let d = StageDescriptor::new(StageKind::Measure, 8, 1024, g, &limits()).unwrap();
        let shape = d.launch_shape();
        assert_eq!(shape.local, [256, 1, 1]);
        assert_eq!(shape.scratch_bytes, 1024);
    }

    #[test]
    fn payload_is_padded_to_words() {
        assert_eq!(padded_payload(&[]), vec![0, 0, 0, 0]);
        assert_eq!(padded_payload(&[1, 2, 3, 4, 5]), vec![1, 2, 3, 4, 5, 0, 0, 0]);
    }
}

//! # stagesim
//!
//! A minimal harness for running iterative, stateful simulations on a
//! parallel compute device.
//!
//! A simulation is three kernel stages (`init`, `update`, `measure`) over an
//! opaque state buffer. The harness owns the device resources, binds kernel
//! arguments and drives the stage sequence; callers never touch the compute
//! API directly.
//!
//! ## Design Goals
//! - Two state buffers with alternating read/write roles per update
//! - Measurements always read the most recent state
//! - Non-blocking enqueue; only readback waits for the device
//! - Explicit ownership and scoped teardown of every device object
//! - Structured, recoverable errors
//!
//! ## Backends
//! - [`host::HostBackend`]: CPU reference, kernels are Rust closures
//! - `gpu::WgpuBackend`: WGSL compute on `wgpu` (`feature = "gpu"`)
//!
//! ## Example
//! ```rust
//! use stagesim::prelude::*;
//!
//! let program = HostProgram::new()
//!     .with_entry("init_k", |inv| { inv.write(0)?.fill(0); Ok(()) })
//!     .with_entry("update_k", |inv| {
//!         let (next, prev) = inv.split::<u32, u32>(0, 1)?;
//!         *next = *prev + 1;
//!         Ok(())
//!     })
//!     .with_entry("measure_k", |inv| {
//!         let (out, state) = inv.split::<u32, u32>(0, 1)?;
//!         *out = *state;
//!         Ok(())
//!     });
//!
//! let mut sim = Simulation::<HostBackend>::create(0, 0)?;
//! sim.load_program(&program, StateLayout::of::<u32>(1))?;
//! sim.configure_init(&[], Geometry::linear(1, 1))?;
//! sim.configure_update(&[], 0, Geometry::linear(1, 1))?;
//! sim.configure_measure(&[], 0, 4, Geometry::linear(1, 1))?;
//!
//! sim.run_init()?;
//! for _ in 0..3 {
//!     sim.run_update()?;
//! }
//! sim.run_meas()?;
//!
//! let mut out = [0u32; 1];
//! sim.get_meas_as(&mut out)?;
//! assert_eq!(out[0], 3);
//! sim.release();
//! # Ok::<(), stagesim::SimError>(())
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod config;
pub mod engine;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod host;
pub mod logging;
pub mod models;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::simulation::Simulation;

pub use engine::backend::{
    ComputeBackend,
    DeviceInfo,
    DeviceLimits,
    KernelSource,
    PlatformInfo,
};

pub use engine::error::{
    SimResult,
    SimError,
    ConfigurationError,
    CompileError,
    BackendError,
    StateError,
};

pub use engine::types::{
    Geometry,
    StageKind,
    StateLayout,
    StateSlot,
};

pub use host::{HostBackend, HostProgram, HostInvocation};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used harness types.
///
/// Import with:
/// ```rust
/// use stagesim::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Simulation,
        ComputeBackend,
        KernelSource,
        Geometry,
        StageKind,
        StateLayout,
        StateSlot,
        SimResult,
        SimError,
        HostBackend,
        HostProgram,
        HostInvocation,
    };
}

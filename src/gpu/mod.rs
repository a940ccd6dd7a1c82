//! # GPU Execution Backend
//!
//! This module implements the harness's **native compute backend** on `wgpu`:
//! kernels are WGSL compute entry points, buffers are storage buffers and
//! the queue is a `wgpu::Queue`.
//!
//! The GPU backend is an **optional, feature-gated extension**
//! (`feature = "gpu"`). Without it the crate builds and runs on the host
//! backend alone.
//!
//! ---
//!
//! ## Execution model
//!
//! 1. **Open**
//!    * Adapters are enumerated, grouped into platforms by native API and
//!      selected by index.
//!    * The device is requested with the adapter's own limits.
//!
//! 2. **Build**
//!    * The WGSL module is validated once per `load_program`.
//!    * Each stage configuration builds one compute pipeline whose work-group
//!      extent and scratch size are override constants.
//!    * Each pipeline gets two bind groups, one per state-buffer parity.
//!
//! 3. **Dispatch**
//!    * Every enqueue is a separate queue submission, in order.
//!
//! 4. **Synchronize & read back**
//!    * `finish` waits with `wgpu::Device::poll`.
//!    * Readback copies through a mapped staging buffer.
//!
//! ---
//!
//! ## WGSL conventions
//!
//! ```wgsl
//! override LOCAL_X: u32 = 64u;
//! override LOCAL_Y: u32 = 1u;
//! override SCRATCH_WORDS: u32 = 1u;
//! var<workgroup> scratch: array<u32, SCRATCH_WORDS>;
//!
//! @group(0) @binding(0) var<storage, read_write> next: State;
//! @group(0) @binding(1) var<storage, read> prev: State;
//! @group(0) @binding(3) var<storage, read> args: UpdateArgs;
//!
//! @compute @workgroup_size(LOCAL_X, LOCAL_Y)
//! fn update_k(@builtin(global_invocation_id) id: vec3<u32>) { ... }
//! ```
//!
//! ---
//!
//! ## Module structure
//!
//! * [`context`] - adapter enumeration, device and queue creation
//! * [`pipeline`] - module validation, pipeline and layout construction
//! * [`dispatch`] - submission, barriers and readback
//! * [`backend`] - the `ComputeBackend` implementation
//!
//! ## Public API
//!
//! * [`WgpuBackend`] - use as `Simulation<WgpuBackend>`
//! * [`adapter_available`] - probe used by binaries and tests

#![cfg(feature = "gpu")]

mod backend;
mod context;
mod dispatch;
mod pipeline;

pub use backend::{GpuBinding, WgpuBackend};
pub use context::adapter_available;
pub use pipeline::{GpuKernel, GpuProgram, LOCAL_X, LOCAL_Y, SCRATCH_WORDS};

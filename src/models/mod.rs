//! # Bundled Models
//!
//! Two complete simulations driven through the harness, each shipping host
//! kernels and matching WGSL kernels:
//!
//! * [`ising`] - 2-D Ising model with checkerboard Metropolis updates,
//!   measured as spin snapshots plus magnetisation.
//! * [`mandel`] - Mandelbrot escape-time iteration over a pixel grid.
//!
//! Models are ordinary harness callers: they supply a state layout, three
//! payloads, three geometries and an output size, then drive the protocol.

pub mod ising;
pub mod mandel;
pub mod random;

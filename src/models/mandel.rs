//! # Mandelbrot Escape Time
//!
//! One cell per pixel of a `side × side` grid over the complex plane. Each
//! update advances `z ← z² + c` for every cell that has not escaped and
//! counts the iterations survived. Measure writes `|z|` and the count.
//!
//! The output layout is two planes of `side²` values: `abs: [f32]` then
//! `lastc: [i32]`.
//!
//! ## Precision
//!
//! Cell state and payloads are `f32` on every backend. The layout is shared
//! with the WGSL kernels, and WGSL has no `f64`. The pixel pitch must
//! therefore stay well above the `f32` spacing at the edge of the view,
//! roughly `1.2e-7 × |coordinate|`. Deep zooms, for example a `1e-7` wide
//! view around `-0.5552`, put neighbouring pixels on the same `f32` value
//! and are rejected by [`configure`] with
//! [`ConfigurationError::InvalidParameter`].

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::engine::backend::ComputeBackend;
use crate::engine::error::{ConfigurationError, SimResult};
use crate::engine::simulation::Simulation;
use crate::engine::types::{Geometry, StateLayout};
use crate::host::{HostInvocation, HostProgram};


/// Pixel pitch must be at least this many `f32` spacings.
const MIN_PITCH_ULPS: f32 = 4.0;

/// Work-group side length for 2-D stages.
pub const LOCAL_WIDTH: u32 = 16;
/// WGSL source of the three stages.
pub const WGSL: &str = include_str!("../../kernels/mandel.wgsl");

/// Per-pixel state.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MandelCell {
    /// Current iterate.
    pub z: [f32; 2],
    /// Pixel coordinate `c`.
    pub z0: [f32; 2],
    /// Iterations completed before escaping.
    pub lastc: i32,
    _pad: u32,
}

/// Init payload: grid centre and pixel pitch.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MandelInit {
    /// Centre of the grid.
    pub z0: [f32; 2],
    /// Distance between neighbouring pixels.
    pub dz: [f32; 2],
}

/// Update payload.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MandelUpdate {
    /// Escape radius.
    pub bailout: f32,
}

/// Render parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MandelParams {
    /// Pixels per side; a multiple of [`LOCAL_WIDTH`].
    pub side: u32,
    /// Updates to run.
    pub iterations: u32,
    /// Centre of the view.
    pub center: [f32; 2],
    /// Width of the view.
    pub span: f32,
    /// Escape radius.
    pub bailout: f32,
}

impl Default for MandelParams {
    fn default() -> Self {
        Self {
            side: 512,
            iterations: 500,
            center: [-0.5, 0.0],
            span: 3.0,
            bailout: 2.0,
        }
    }
}

impl MandelParams {
    /// Number of pixels.
    pub fn cells(&self) -> usize {
        self.side as usize * self.side as usize
    }

    /// State layout: one [`MandelCell`] per pixel.
    pub fn layout(&self) -> StateLayout {
        StateLayout::of::<MandelCell>(self.cells() as u64)
    }

    /// Output size in bytes.
    pub fn output_size(&self) -> usize {
        self.cells() * 8
    }

    /// 2-D geometry for init and update.
    pub fn grid_geometry(&self) -> Geometry {
        Geometry::planar([self.side, self.side], [LOCAL_WIDTH, LOCAL_WIDTH])
    }

    /// 1-D geometry for measure.
    pub fn cell_geometry(&self) -> Geometry {
        Geometry::linear(self.side * self.side, LOCAL_WIDTH * LOCAL_WIDTH)
    }

    /// Distance between neighbouring pixels.
    pub fn pitch(&self) -> f32 {
        self.span / self.side as f32
    }

    /// Checks that `f32` state can tell neighbouring pixels apart.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let reach = self.center.iter().fold(0.0f32, |m, c| m.max(c.abs())) + self.span / 2.0;
        let spacing = reach * f32::EPSILON;
        let pitch = self.pitch();
        if !pitch.is_finite() || pitch < MIN_PITCH_ULPS * spacing {
            return Err(ConfigurationError::InvalidParameter {
                name: "span",
                message: format!(
                    "pixel pitch {pitch:e} is below the f32 resolution {spacing:e} of the view"
                ),
            });
        }
        Ok(())
    }

    fn init_args(&self) -> MandelInit {
        let pitch = self.pitch();
        MandelInit { z0: self.center, dz: [pitch, pitch] }
    }
}

/// Measured image.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MandelImage {
    /// `|z|` per pixel, row-major.
    pub abs: Vec<f32>,
    /// Iterations survived per pixel.
    pub lastc: Vec<i32>,
}

/// Binds the three stages for `params`.
pub fn configure<B: ComputeBackend>(sim: &mut Simulation<B>, params: &MandelParams) -> SimResult<()> {
    params.validate()?;
    let update = MandelUpdate { bailout: params.bailout };
    sim.configure_init(bytemuck::bytes_of(&params.init_args()), params.grid_geometry())?;
    sim.configure_update(bytemuck::bytes_of(&update), 0, params.grid_geometry())?;
    sim.configure_measure(&[], 0, params.output_size(), params.cell_geometry())
}

/// Renders one image: init, `iterations` updates, one measurement.
pub fn render<B: ComputeBackend>(sim: &mut Simulation<B>, params: &MandelParams) -> SimResult<MandelImage> {
    configure(sim, params)?;

    sim.run_init()?;
    for _ in 0..params.iterations {
        sim.run_update()?;
    }
    sim.run_meas()?;

    let cells = params.cells();
    let mut raw = vec![0u32; cells * 2];
    sim.get_meas_as(&mut raw)?;

    let (abs, lastc) = raw.split_at(cells);
    Ok(MandelImage {
        abs: abs.iter().map(|&b| f32::from_bits(b)).collect(),
        lastc: lastc.iter().map(|&b| b as i32).collect(),
    })
}

fn init_k(inv: &mut HostInvocation<'_>) -> SimResult<()> {
    let args: MandelInit = inv.read_pod(1)?;
    let side = inv.geometry().global_extent(0) as usize;
    let half = (side / 2) as f32;
    let cells = inv.write_as::<MandelCell>(0)?;

    cells.par_iter_mut().enumerate().for_each(|(c, cell)| {
        let (x, y) = ((c % side) as f32, (c / side) as f32);
        *cell = MandelCell {
            z: [0.0, 0.0],
            z0: [args.z0[0] + (x - half) * args.dz[0], args.z0[1] + (y - half) * args.dz[1]],
            lastc: 0,
            _pad: 0,
        };
    });
    Ok(())
}

fn update_k(inv: &mut HostInvocation<'_>) -> SimResult<()> {
    let args: MandelUpdate = inv.read_pod(3)?;
    let limit = args.bailout * args.bailout;
    let (next, prev) = inv.split_slices::<MandelCell, MandelCell>(0, 1)?;

    next.par_iter_mut().zip(prev.par_iter()).for_each(|(n, p)| {
        let [x, y] = p.z;
        *n = *p;
        if x * x + y * y <= limit {
            n.z = [x * x - y * y + p.z0[0], 2.0 * x * y + p.z0[1]];
            n.lastc = p.lastc + 1;
        }
    });
    Ok(())
}

fn measure_k(inv: &mut HostInvocation<'_>) -> SimResult<()> {
    let (out, state) = inv.split_slices::<u32, MandelCell>(0, 1)?;
    let cells = state.len().min(out.len() / 2);
    let (abs, lastc) = out.split_at_mut(cells);

    abs.par_iter_mut()
        .zip(lastc[..cells].par_iter_mut())
        .zip(state[..cells].par_iter())
        .for_each(|((a, l), cell)| {
            let [x, y] = cell.z;
            *a = (x * x + y * y).sqrt().to_bits();
            *l = cell.lastc as u32;
        });
    Ok(())
}

/// Host kernels for the three stages.
pub fn host_program() -> HostProgram {
    HostProgram::new()
        .with_entry("init_k", init_k)
        .with_entry("update_k", update_k)
        .with_entry("measure_k", measure_k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_matches_wgsl_struct_size() {
        assert_eq!(std::mem::size_of::<MandelCell>(), 24);
        assert_eq!(std::mem::size_of::<MandelInit>(), 16);
    }

    #[test]
    fn default_view_covers_the_set() {
        let p = MandelParams::default();
        assert_eq!(p.cells(), 512 * 512);
        assert_eq!(p.output_size(), 512 * 512 * 8);
        assert!((p.init_args().dz[0] - 3.0 / 512.0).abs() < f32::EPSILON);
        assert_eq!(p.validate(), Ok(()));
    }

    #[test]
    fn deep_zoom_is_below_f32_resolution() {
        let deep = MandelParams {
            center: [-0.555_200_08, 0.0],
            span: 1e-7,
            iterations: 5000,
            ..MandelParams::default()
        };
        let x = deep.center[0];
        assert_eq!(x + deep.pitch(), x);
        assert!(matches!(
            deep.validate(),
            Err(ConfigurationError::InvalidParameter { name: "span", .. })
        ));

        let shallow = MandelParams { span: 1e-3, ..deep };
        assert_eq!(shallow.validate(), Ok(()));
    }
}

//! # 2-D Ising Model
//!
//! A 64×64 periodic Ising lattice updated with a checkerboard Metropolis
//! sweep.
//!
//! ## State
//! [`IsingState`] holds one spin (`±1`) and one xorshift32 RNG state per
//! cell, plus an update counter. Each update touches only the sublattice
//! with `(x + y + counter)` even, so the two half-sweeps alternate.
//!
//! ## Acceptance
//! With `i` aligned neighbours a flip changes the energy by `4(i - 2)`.
//! [`IsingUpdate::at_temperature`] precomputes the five acceptance
//! thresholds `u32::MAX · min(1, exp(-4(i - 2)/T))`; a cell flips when its
//! next random number falls below `probs[i]`.
//!
//! ## Measurement
//! Measure stores a snapshot of the spins and accumulates the total
//! magnetisation into output slot `(counter + ioffset) / idiv`, skipping
//! slots outside `0..slots`. The output is `states[slots][CELLS]` followed
//! by `mag[slots]`, all `i32`.
//!
//! Host kernels below and `kernels/ising.wgsl` implement the same integer
//! arithmetic, so both backends produce identical trajectories for a seed.

use rayon::prelude::*;

use crate::engine::error::SimResult;
use crate::engine::backend::ComputeBackend;
use crate::engine::simulation::Simulation;
use crate::engine::types::{Geometry, StateLayout};
use crate::host::{HostInvocation, HostProgram};
use crate::models::random::SeedStream;


/// Lattice side length.
pub const SIDE: u32 = 64;
/// Number of cells.
pub const CELLS: usize = (SIDE * SIDE) as usize;
/// Work-group side length for 2-D stages.
pub const LOCAL_WIDTH: u32 = 16;
/// Updates per measurement.
pub const MEASURE_DIV: u32 = 512;
/// Updates covered by one trajectory's measurement window.
pub const WINDOW: u32 = 1024;
/// Thermalisation updates before the first measurement window opens.
pub const WARMUP: u32 = WINDOW / 4;
/// Measurements per trajectory.
pub const MEASUREMENTS: u32 = WINDOW / MEASURE_DIV;
/// WGSL source of the three stages.
pub const WGSL: &str = include_str!("../../kernels/ising.wgsl");

/// Lattice state.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct IsingState {
    /// Spins, `+1` or `-1`, row-major.
    pub spin: [i32; CELLS],
    /// Per-cell xorshift32 state, never zero.
    pub seed: [u32; CELLS],
    /// Updates applied since init.
    pub counter: i32,
}

/// Init payload.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct IsingInit {
    /// Trajectory seed.
    pub seed: u32,
}

/// Update payload.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct IsingUpdate {
    /// Flip thresholds indexed by the number of aligned neighbours.
    pub probs: [u32; 5],
}

impl IsingUpdate {
    /// Thresholds for temperature `t` (in units of `J / k_B`).
    pub fn at_temperature(t: f64) -> Self {
        let mut probs = [0u32; 5];
        for (i, p) in probs.iter_mut().enumerate() {
            let accept = (-4.0 * (i as f64 - 2.0) / t).exp().min(1.0);
            *p = (u32::MAX as f64 * accept) as u32;
        }
        Self { probs }
    }
}

/// Measure payload.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct IsingMeasure {
    /// Updates per output slot.
    pub idiv: u32,
    /// Offset added to the counter before dividing.
    pub ioffset: i32,
    /// Number of output slots.
    pub slots: u32,
    _pad: u32,
}

impl IsingMeasure {
    /// Slot layout with `slots` outputs.
    pub fn new(idiv: u32, ioffset: i32, slots: u32) -> Self {
        Self { idiv, ioffset, slots, _pad: 0 }
    }

    /// Layout used by the temperature sweep: one slot after each block of
    /// [`MEASURE_DIV`] updates following the warmup.
    pub fn sweep() -> Self {
        Self::new(MEASURE_DIV, -((WARMUP + MEASURE_DIV) as i32), MEASUREMENTS)
    }

    /// Output slot for `counter`, if any.
    pub fn slot(&self, counter: i32) -> Option<usize> {
        let shifted = counter.checked_add(self.ioffset)?;
        if shifted < 0 || self.idiv == 0 {
            return None;
        }
        let slot = shifted as u32 / self.idiv;
        (slot < self.slots).then_some(slot as usize)
    }

    /// Output size in bytes.
    pub fn output_size(&self) -> usize {
        self.slots as usize * (CELLS + 1) * std::mem::size_of::<i32>()
    }
}

/// State layout: one [`IsingState`].
pub fn layout() -> StateLayout {
    StateLayout::of::<IsingState>(1)
}

/// 2-D geometry for init and update.
pub fn lattice_geometry() -> Geometry {
    Geometry::planar([SIDE, SIDE], [LOCAL_WIDTH, LOCAL_WIDTH])
}

/// 1-D geometry for measure.
pub fn cell_geometry() -> Geometry {
    Geometry::linear(CELLS as u32, LOCAL_WIDTH * LOCAL_WIDTH)
}

/// Local scratch for measure: one word per work-group invocation.
pub fn measure_scratch() -> u64 {
    (LOCAL_WIDTH * LOCAL_WIDTH) as u64 * 4
}

/// Magnetisations at the tail of a measure output.
pub fn magnetisation(output: &[i32], slots: u32) -> &[i32] {
    let start = slots as usize * CELLS;
    output.get(start..start + slots as usize).unwrap_or(&[])
}

/// Spin snapshot of `slot` in a measure output.
pub fn snapshot(output: &[i32], slot: usize) -> &[i32] {
    output.get(slot * CELLS..(slot + 1) * CELLS).unwrap_or(&[])
}

/// Binds all three stages for one trajectory.
///
/// Measure is reconfigured as well, which reallocates (and zeroes) the
/// output buffer before accumulation starts.
pub fn configure<B: ComputeBackend>(
    sim: &mut Simulation<B>,
    init: &IsingInit,
    update: &IsingUpdate,
    measure: &IsingMeasure,
) -> SimResult<()> {
    sim.configure_init(bytemuck::bytes_of(init), lattice_geometry())?;
    sim.configure_update(bytemuck::bytes_of(update), 0, lattice_geometry())?;
    sim.configure_measure(
        bytemuck::bytes_of(measure),
        measure_scratch(),
        measure.output_size(),
        cell_geometry(),
    )
}

/// Runs one sweep trajectory: init, warmup, then [`MEASUREMENTS`] blocks of
/// [`MEASURE_DIV`] updates each followed by a measurement.
///
/// Returns the full measure output.
pub fn run_trajectory<B: ComputeBackend>(
    sim: &mut Simulation<B>,
    seed: u32,
    update: &IsingUpdate,
) -> SimResult<Vec<i32>> {
    let measure = IsingMeasure::sweep();
    configure(sim, &IsingInit { seed }, update, &measure)?;

    sim.run_init()?;
    for _ in 0..WARMUP {
        sim.run_update()?;
    }
    for _ in 0..MEASUREMENTS {
        for _ in 0..MEASURE_DIV {
            sim.run_update()?;
        }
        sim.run_meas()?;
    }

    let mut out = vec![0i32; measure.output_size() / 4];
    sim.get_meas_as(&mut out)?;
    Ok(out)
}

/// Magnetisation statistics at one temperature.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepPoint {
    /// Temperature.
    pub temperature: f64,
    /// Mean magnetisation over all measurements.
    pub mean: f64,
    /// Root mean square magnetisation.
    pub rms: f64,
}

/// Runs `repeats` trajectories at `temperature`, drawing init seeds from
/// `seeds`, and aggregates every measured magnetisation.
pub fn sweep_point<B: ComputeBackend>(
    sim: &mut Simulation<B>,
    temperature: f64,
    repeats: u32,
    seeds: &mut SeedStream,
) -> SimResult<SweepPoint> {
    let update = IsingUpdate::at_temperature(temperature);
    let (mut sum, mut sum_sq, mut n) = (0.0f64, 0.0f64, 0u64);

    for _ in 0..repeats {
        let out = run_trajectory(sim, seeds.next_u32(), &update)?;
        for &m in magnetisation(&out, MEASUREMENTS) {
            sum += m as f64;
            sum_sq += (m as f64).powi(2);
            n += 1;
        }
    }

    let n = n.max(1) as f64;
    Ok(SweepPoint { temperature, mean: sum / n, rms: (sum_sq / n).sqrt() })
}

/// Temperatures `t_min, t_min + step, ...` strictly below `t_max`.
pub fn temperatures(t_min: f64, t_max: f64, step: f64) -> Vec<f64> {
    if step <= 0.0 {
        return Vec::new();
    }
    (0u32..)
        .map(|i| t_min + i as f64 * step)
        .take_while(|&t| t < t_max - step * 1e-6)
        .collect()
}

/// Per-cell seed derived from the trajectory seed.
#[inline]
pub fn cell_seed(seed: u32, cell: u32) -> u32 {
    let h = hash(seed ^ cell.wrapping_mul(0x9e37_79b9));
    if h == 0 { 0x6d2b_79f5 } else { h }
}

/// Integer finaliser (lowbias32).
#[inline]
fn hash(mut x: u32) -> u32 {
    x ^= x >> 16;
    x = x.wrapping_mul(0x7feb_352d);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846c_a68b);
    x ^= x >> 16;
    x
}

#[inline]
fn xorshift32(mut x: u32) -> u32 {
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    x
}

#[inline]
fn neighbours(cell: usize) -> [usize; 4] {
    let side = SIDE as usize;
    let (x, y) = (cell % side, cell / side);
    [
        y * side + (x + 1) % side,
        y * side + (x + side - 1) % side,
        ((y + 1) % side) * side + x,
        ((y + side - 1) % side) * side + x,
    ]
}

fn init_k(inv: &mut HostInvocation<'_>) -> SimResult<()> {
    let args: IsingInit = inv.read_pod(1)?;
    let state = inv.view_mut::<IsingState>(0)?;

    state
        .spin
        .par_iter_mut()
        .zip(state.seed.par_iter_mut())
        .enumerate()
        .for_each(|(cell, (spin, seed))| {
            let s = cell_seed(args.seed, cell as u32);
            *seed = s;
            *spin = if s >> 31 == 1 { 1 } else { -1 };
        });
    state.counter = 0;
    Ok(())
}

fn update_k(inv: &mut HostInvocation<'_>) -> SimResult<()> {
    let args: IsingUpdate = inv.read_pod(3)?;
    let (next, prev) = inv.split::<IsingState, IsingState>(0, 1)?;
    let counter = prev.counter;

    next.spin
        .par_iter_mut()
        .zip(next.seed.par_iter_mut())
        .enumerate()
        .for_each(|(cell, (spin, seed))| {
            let side = SIDE as usize;
            let (x, y) = (cell % side, cell / side);
            let s = prev.spin[cell];

            if ((x + y) as i32).wrapping_add(counter) & 1 != 0 {
                *spin = s;
                *seed = prev.seed[cell];
                return;
            }

            let aligned = neighbours(cell).iter().filter(|&&n| prev.spin[n] == s).count();
            let r = xorshift32(prev.seed[cell]);
            *seed = r;
            *spin = if r < args.probs[aligned] { -s } else { s };
        });
    next.counter = counter.wrapping_add(1);
    Ok(())
}

fn measure_k(inv: &mut HostInvocation<'_>) -> SimResult<()> {
    let args: IsingMeasure = inv.read_pod(3)?;
    let (out, state) = inv.split_slice::<i32, IsingState>(0, 1)?;

    let Some(slot) = args.slot(state.counter) else {
        return Ok(());
    };
    let slots = args.slots as usize;
    if out.len() < slots * (CELLS + 1) {
        return Ok(());
    }

    out[slot * CELLS..(slot + 1) * CELLS].copy_from_slice(&state.spin);
    let total: i32 = state.spin.par_iter().sum();
    out[slots * CELLS + slot] += total;
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
    fn acceptance_saturates_below_two_aligned() {
        let update = IsingUpdate::at_temperature(2.5);
        assert_eq!(update.probs[0], u32::MAX);
        assert_eq!(update.probs[2], u32::MAX);
        assert!(update.probs[3] < u32::MAX);
        assert!(update.probs[4] < update.probs[3]);
    }

    #[test]
    fn sweep_slots_follow_window() {
        let m = IsingMeasure::sweep();
        assert_eq!(m.slot(0), None);
        assert_eq!(m.slot((WARMUP + MEASURE_DIV) as i32 - 1), None);
        assert_eq!(m.slot((WARMUP + MEASURE_DIV) as i32), Some(0));
        assert_eq!(m.slot((WARMUP + 2 * MEASURE_DIV) as i32), Some(1));
        assert_eq!(m.slot((WARMUP + 3 * MEASURE_DIV) as i32), None);
    }

    #[test]
    fn neighbours_wrap_around_the_torus() {
        let n = neighbours(0);
        assert!(n.contains(&1));
        assert!(n.contains(&(SIDE as usize - 1)));
        assert!(n.contains(&(SIDE as usize)));
        assert!(n.contains(&(CELLS - SIDE as usize)));
    }

    #[test]
    fn cell_seeds_are_never_zero() {
        assert!((0..CELLS as u32).all(|c| cell_seed(0, c) != 0));
        assert_ne!(cell_seed(1, 0), cell_seed(2, 0));
    }

    #[test]
    fn sweep_temperatures_exclude_the_upper_bound() {
        let ts = temperatures(2.0, 3.0, 0.05);
        assert_eq!(ts.len(), 20);
        assert!((ts[0] - 2.0).abs() < 1e-12);
        assert!(ts[19] < 3.0);
        assert!(temperatures(2.0, 3.0, 0.0).is_empty());
    }

    #[test]
    fn state_layout_matches_packed_size() {
        assert_eq!(layout().size(), (CELLS * 8 + 4) as u64);
        assert_eq!(IsingMeasure::sweep().output_size(), 2 * (CELLS + 1) * 4);
    }
}

//! Shared fixtures for the host-backend integration tests.
//!
//! The counter program keeps one `u32` of state:
//! * `init_k` writes the init argument (slot 1).
//! * `update_k` writes `prev + step`, with `step` from slot 3.
//! * `measure_k` stores the state at output index `slot` (slot 3 args).

#![allow(dead_code)]

use stagesim::host::DispatchRecord;
use stagesim::prelude::*;


pub fn counter_program() -> HostProgram {
    HostProgram::new()
        .with_entry("init_k", |inv| {
            let start: u32 = inv.read_pod(1)?;
            *inv.view_mut::<u32>(0)? = start;
            Ok(())
        })
        .with_entry("update_k", |inv| {
            let step: u32 = inv.read_pod(3)?;
            let (next, prev) = inv.split::<u32, u32>(0, 1)?;
            *next = prev.wrapping_add(step);
            Ok(())
        })
        .with_entry("measure_k", |inv| {
            let index: u32 = inv.read_pod(3)?;
            let (out, state) = inv.split_slice::<u32, u32>(0, 1)?;
            if let Some(cell) = out.get_mut(index as usize) {
                *cell = *state;
            }
            Ok(())
        })
}

pub fn one() -> Geometry {
    Geometry::linear(1, 1)
}

pub fn bytes(v: u32) -> [u8; 4] {
    v.to_ne_bytes()
}

/// Counter instance with all stages bound: init to `start`, update by
/// `step`, measure into index 0 of an `outputs`-word output. Dispatches
/// are recorded.
pub fn counter_sim(start: u32, step: u32, outputs: usize) -> SimResult<Simulation<HostBackend>> {
    counter_sim_on(HostBackend::new().with_dispatch_log(), start, step, outputs)
}

/// [`counter_sim`] on a caller-built backend.
pub fn counter_sim_on(
    backend: HostBackend,
    start: u32,
    step: u32,
    outputs: usize,
) -> SimResult<Simulation<HostBackend>> {
    stagesim::logging::init_for_tests();

    let mut sim = Simulation::with_backend(backend);
    sim.load_program(&counter_program(), StateLayout::of::<u32>(1))?;
    sim.configure_init(&bytes(start), one())?;
    sim.configure_update(&bytes(step), 0, one())?;
    sim.configure_measure(&bytes(0), 0, outputs * 4, one())?;
    Ok(sim)
}

/// Recorded dispatches of `stage`, oldest first.
pub fn dispatches_of(sim: &Simulation<HostBackend>, stage: StageKind) -> Vec<DispatchRecord> {
    sim.backend()
        .dispatches()
        .iter()
        .filter(|d| d.stage == stage)
        .cloned()
        .collect()
}

pub fn read_counter(sim: &mut Simulation<HostBackend>) -> SimResult<u32> {
    let mut out = [0u32; 1];
    sim.get_meas_as(&mut out)?;
    Ok(out[0])
}

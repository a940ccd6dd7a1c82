// Run:
//   cargo test --release --test ising_host

use stagesim::models::ising::{self, IsingInit, IsingMeasure, IsingUpdate, CELLS, SIDE};
use stagesim::models::random::SeedStream;
use stagesim::prelude::*;


fn ising_sim() -> SimResult<Simulation<HostBackend>> {
    stagesim::logging::init_for_tests();

    let mut sim = Simulation::<HostBackend>::create(0, 0)?;
    sim.load_program(&ising::host_program(), ising::layout())?;
    Ok(sim)
}

/// Measures the initial lattice into slot 0 and the lattice after one
/// update into slot 1.
fn first_step(seed: u32) -> SimResult<Vec<i32>> {
    let mut sim = ising_sim()?;
    let measure = IsingMeasure::new(1, 0, 2);
    ising::configure(&mut sim, &IsingInit { seed }, &IsingUpdate::at_temperature(2.3), &measure)?;

    sim.run_init()?;
    sim.run_meas()?;
    sim.run_update()?;
    sim.run_meas()?;

    let mut out = vec![0i32; measure.output_size() / 4];
    sim.get_meas_as(&mut out)?;
    sim.release();
    Ok(out)
}

#[test]
fn spins_are_unit_and_magnetisation_matches_snapshot() -> SimResult<()> {
    let out = first_step(17)?;
    let mags = ising::magnetisation(&out, 2);
    assert_eq!(mags.len(), 2);

    for slot in 0..2 {
        let spins = ising::snapshot(&out, slot);
        assert_eq!(spins.len(), CELLS);
        assert!(spins.iter().all(|&s| s == 1 || s == -1));
        assert_eq!(spins.iter().sum::<i32>(), mags[slot]);
    }
    Ok(())
}

#[test]
fn one_update_touches_a_single_sublattice() -> SimResult<()> {
    let out = first_step(99)?;
    let (before, after) = (ising::snapshot(&out, 0), ising::snapshot(&out, 1));

    let side = SIDE as usize;
    for cell in 0..CELLS {
        let (x, y) = (cell % side, cell / side);
        if (x + y) % 2 == 1 {
            assert_eq!(before[cell], after[cell], "cell ({x}, {y}) is not active on the first update");
        }
    }
    assert_ne!(before, after);
    Ok(())
}

#[test]
fn trajectories_are_reproducible_per_seed() -> SimResult<()> {
    let a = first_step(5)?;
    let b = first_step(5)?;
    let c = first_step(6)?;
    assert_eq!(a, b);
    assert_ne!(ising::snapshot(&a, 0), ising::snapshot(&c, 0));
    Ok(())
}

#[test]
fn sweep_point_aggregates_bounded_magnetisation() -> SimResult<()> {
    let mut sim = ising_sim()?;
    let mut seeds = SeedStream::new(2024);
    let point = ising::sweep_point(&mut sim, 2.5, 1, &mut seeds)?;

    assert_eq!(point.temperature, 2.5);
    assert!(point.mean.abs() <= CELLS as f64);
    assert!(point.rms >= point.mean.abs());
    assert!(point.rms <= CELLS as f64);

    // One trajectory: warmup plus both measurement blocks.
    assert_eq!(sim.updates(), (ising::WARMUP + ising::WINDOW) as u64);
    Ok(())
}

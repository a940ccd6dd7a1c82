// Run:
//   cargo test --test protocol -- --nocapture

mod common;

use common::*;

use stagesim::prelude::*;
use stagesim::{ConfigurationError, DeviceLimits, StateError};


#[test]
fn updates_alternate_buffer_roles() -> SimResult<()> {
    let mut sim = counter_sim(0, 1, 1)?;
    sim.run_init()?;
    for _ in 0..4 {
        sim.run_update()?;
    }

    let updates = dispatches_of(&sim, StageKind::Update);
    assert_eq!(updates.len(), 4);
    for (k, d) in updates.iter().enumerate() {
        let (read, write) = if k % 2 == 0 { ("state_a", "state_b") } else { ("state_b", "state_a") };
        assert_eq!(d.label_at(1), Some(read), "update {} read", k + 1);
        assert_eq!(d.label_at(0), Some(write), "update {} write", k + 1);
    }

    assert_eq!(sim.latest(), StateSlot::A);
    assert_eq!(sim.updates(), 4);
    Ok(())
}

#[test]
fn measure_reads_the_buffer_written_last() -> SimResult<()> {
    let mut sim = counter_sim(10, 5, 1)?;
    sim.run_init()?;
    for _ in 0..3 {
        sim.run_update()?;
    }
    sim.run_meas()?;

    let measures = dispatches_of(&sim, StageKind::Measure);
    assert_eq!(measures[0].label_at(1), Some("state_b"));
    assert_eq!(measures[0].label_at(0), Some("output"));
    assert_eq!(read_counter(&mut sim)?, 25);
    Ok(())
}

#[test]
fn reinit_targets_latest_and_keeps_parity() -> SimResult<()> {
    let mut sim = counter_sim(3, 1, 1)?;
    sim.run_init()?;
    sim.run_update()?;
    assert_eq!(sim.latest(), StateSlot::B);

    sim.run_init()?;
    sim.run_init()?;
    assert_eq!(sim.latest(), StateSlot::B);

    let inits = dispatches_of(&sim, StageKind::Init);
    assert_eq!(inits[0].label_at(0), Some("state_a"));
    assert_eq!(inits[1].label_at(0), Some("state_b"));
    assert_eq!(inits[2].label_at(0), Some("state_b"));

    sim.run_meas()?;
    assert_eq!(read_counter(&mut sim)?, 3);

    sim.run_update()?;
    let updates = dispatches_of(&sim, StageKind::Update);
    assert_eq!(updates[1].label_at(1), Some("state_b"));
    Ok(())
}

#[test]
fn reconfiguring_replaces_payload_without_leaking() -> SimResult<()> {
    let mut sim = counter_sim(0, 1, 1)?;
    let live = sim.backend().live_buffers();
    assert_eq!(live, 6);

    sim.run_init()?;
    sim.run_update()?;
    assert_eq!(sim.latest(), StateSlot::B);

    sim.configure_update(&bytes(100), 0, one())?;
    sim.configure_measure(&bytes(0), 0, 4, one())?;
    sim.configure_init(&bytes(7), one())?;
    assert_eq!(sim.backend().live_buffers(), live);
    assert_eq!(sim.latest(), StateSlot::B);
    assert!(sim.is_ready());

    sim.run_update()?;
    sim.run_meas()?;
    assert_eq!(read_counter(&mut sim)?, 101);
    Ok(())
}

#[test]
fn readback_is_byte_exact_and_last_measure_wins() -> SimResult<()> {
    let mut sim = counter_sim(1, 1, 3)?;
    sim.run_init()?;

    sim.run_meas()?;
    sim.run_update()?;
    sim.run_meas()?;

    sim.configure_measure(&bytes(2), 0, 12, one())?;
    sim.run_update()?;
    sim.run_meas()?;

    let mut host = [0xAAu8; 16];
    let copied = sim.get_meas(&mut host)?;
    assert_eq!(copied, 12);
    assert_eq!(sim.output_size(), Some(12));

    // Reallocating the output cleared index 0.
    let words: Vec<u32> = host[..12].chunks_exact(4).map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]])).collect();
    assert_eq!(words, vec![0, 0, 3]);
    assert_eq!(&host[12..], &[0xAA; 4]);
    Ok(())
}

#[test]
fn repeated_measures_overwrite_the_output() -> SimResult<()> {
    let mut sim = counter_sim(0, 2, 1)?;
    sim.run_init()?;
    for _ in 0..3 {
        sim.run_update()?;
        sim.run_meas()?;
    }
    assert_eq!(read_counter(&mut sim)?, 6);
    assert_eq!(read_counter(&mut sim)?, 6);
    Ok(())
}

#[test]
fn small_host_buffer_is_rejected() -> SimResult<()> {
    let mut sim = counter_sim(0, 1, 4)?;
    sim.run_init()?;
    sim.run_meas()?;

    let mut host = [0u8; 15];
    let err = sim.get_meas(&mut host).unwrap_err();
    assert_eq!(
        err,
        SimError::Configuration(ConfigurationError::HostBufferTooSmall { required: 16, provided: 15 })
    );
    assert_eq!(sim.backend().barriers().finishes, 0);
    Ok(())
}

#[test]
fn readback_waits_for_the_queue() -> SimResult<()> {
    let mut sim = counter_sim(0, 1, 1)?;
    sim.run_init()?;
    for _ in 0..8 {
        sim.run_update()?;
    }
    sim.run_meas()?;
    assert_eq!(sim.backend().barriers().finishes, 0);

    read_counter(&mut sim)?;
    let barriers = sim.backend().barriers();
    assert_eq!(barriers.flushes, 1);
    assert_eq!(barriers.finishes, 1);
    Ok(())
}

#[test]
fn operations_before_their_prerequisites_fail() -> SimResult<()> {
    let mut sim = Simulation::with_backend(HostBackend::new().with_dispatch_log());
    assert_eq!(sim.run_update(), Err(StateError::NoProgram.into()));
    assert_eq!(sim.configure_init(&[], one()), Err(StateError::NoProgram.into()));
    assert_eq!(sim.get_meas(&mut [0u8; 4]), Err(StateError::NoProgram.into()));

    sim.load_program(&counter_program(), StateLayout::of::<u32>(1))?;
    assert_eq!(
        sim.run_update(),
        Err(StateError::NotInitialized { operation: "run_update" }.into())
    );
    assert_eq!(
        sim.run_meas(),
        Err(StateError::NotInitialized { operation: "run_meas" }.into())
    );
    assert_eq!(
        sim.run_init(),
        Err(StateError::StageNotConfigured { stage: StageKind::Init }.into())
    );
    assert!(!sim.is_ready());

    sim.configure_init(&bytes(0), one())?;
    sim.run_init()?;
    assert_eq!(
        sim.run_update(),
        Err(StateError::StageNotConfigured { stage: StageKind::Update }.into())
    );
    assert_eq!(sim.latest(), StateSlot::A);
    assert_eq!(
        sim.get_meas(&mut [0u8; 4]),
        Err(StateError::StageNotConfigured { stage: StageKind::Measure }.into())
    );
    assert_eq!(sim.backend().dispatches().len(), 1);
    assert!(sim.backend().dispatches().iter().all(|d| d.stage == StageKind::Init));
    Ok(())
}

#[test]
fn geometry_is_rejected_before_anything_is_enqueued() -> SimResult<()> {
    let limits = DeviceLimits {
        max_work_group_size: 64,
        max_local_extent: [64, 64, 1],
        max_work_groups_per_axis: 16,
        max_scratch_bytes: 256,
    };
    let mut sim = Simulation::with_backend(HostBackend::with_limits(limits).with_dispatch_log());
    sim.load_program(&counter_program(), StateLayout::of::<u32>(1))?;

    assert_eq!(
        sim.configure_update(&bytes(1), 0, Geometry::planar([16, 16], [16, 8])),
        Err(ConfigurationError::WorkGroupTooLarge { requested: 128, max: 64 }.into())
    );
    assert_eq!(
        sim.configure_update(&bytes(1), 0, Geometry::linear(100, 8)),
        Err(ConfigurationError::IndivisibleExtent { axis: 0, global: 100, local: 8 }.into())
    );
    assert_eq!(
        sim.configure_update(&bytes(1), 0, Geometry::linear(34, 2)),
        Err(ConfigurationError::TooManyWorkGroups { axis: 0, groups: 17, max: 16 }.into())
    );
    assert_eq!(
        sim.configure_update(&bytes(1), 0, Geometry::linear(0, 1)),
        Err(ConfigurationError::ZeroExtent { axis: 0 }.into())
    );
    assert_eq!(
        sim.configure_measure(&bytes(0), 512, 4, one()),
        Err(ConfigurationError::ScratchTooLarge { requested: 512, max: 256 }.into())
    );
    assert_eq!(
        sim.configure_measure(&bytes(0), 0, 0, one()),
        Err(ConfigurationError::EmptyBuffer { what: "measure output" }.into())
    );

    sim.configure_init(&bytes(0), one())?;
    sim.run_init()?;
    assert_eq!(
        sim.run_update(),
        Err(StateError::StageNotConfigured { stage: StageKind::Update }.into())
    );
    assert!(dispatches_of(&sim, StageKind::Update).is_empty());
    assert_eq!(dispatches_of(&sim, StageKind::Init).len(), 1);
    Ok(())
}

#[test]
fn rejected_reconfiguration_keeps_the_previous_stage() -> SimResult<()> {
    let mut sim = counter_sim(0, 4, 1)?;
    sim.run_init()?;

    let err = sim.configure_update(&bytes(9), 0, Geometry::linear(3, 2)).unwrap_err();
    assert!(err.is_fatal());

    sim.run_update()?;
    sim.run_meas()?;
    assert_eq!(read_counter(&mut sim)?, 4);
    Ok(())
}

#[test]
fn failed_allocation_keeps_the_previous_stage() -> SimResult<()> {
    let mut sim = counter_sim_on(HostBackend::new().with_memory_budget(4096), 0, 4, 1)?;
    sim.run_init()?;
    let live = sim.backend().live_buffers();

    let err = sim.configure_update(&[0u8; 8192], 0, one()).unwrap_err();
    assert!(matches!(err, SimError::Backend(_)));
    assert!(!err.is_fatal());

    // The output buffer fits, the measure arguments do not.
    let err = sim.configure_measure(&[0u8; 4064], 0, 64, one()).unwrap_err();
    assert!(matches!(err, SimError::Backend(_)));
    let err = sim.configure_measure(&bytes(0), 0, 8192, one()).unwrap_err();
    assert!(matches!(err, SimError::Backend(_)));

    assert_eq!(sim.backend().live_buffers(), live);
    assert_eq!(sim.output_size(), Some(4));
    assert!(sim.is_ready());

    sim.run_update()?;
    sim.run_meas()?;
    assert_eq!(read_counter(&mut sim)?, 4);
    Ok(())
}

#[test]
fn default_backend_keeps_no_dispatch_history() -> SimResult<()> {
    let mut sim = counter_sim_on(HostBackend::new(), 0, 1, 1)?;
    sim.run_init()?;
    for _ in 0..100_000 {
        sim.run_update()?;
    }
    sim.run_meas()?;
    assert_eq!(read_counter(&mut sim)?, 100_000);
    assert!(sim.backend().dispatches().is_empty());
    Ok(())
}

#[test]
fn out_of_range_device_is_a_configuration_error() {
    assert_eq!(Simulation::<HostBackend>::platforms().map(|p| p.len()), Ok(1));

    let err = Simulation::<HostBackend>::create(1, 0).err();
    assert_eq!(
        err,
        Some(ConfigurationError::PlatformOutOfRange { index: 1, available: 1 }.into())
    );
    let err = Simulation::<HostBackend>::create(0, 1).err();
    assert_eq!(
        err,
        Some(ConfigurationError::DeviceOutOfRange { index: 1, available: 1 }.into())
    );
}

#[test]
fn failed_build_retains_nothing() -> SimResult<()> {
    let incomplete = HostProgram::new().with_entry("init_k", |_| Ok(()));

    let mut sim = Simulation::<HostBackend>::create(0, 0)?;
    let err = sim.load_program(&incomplete, StateLayout::of::<u32>(1)).unwrap_err();
    match &err {
        SimError::Compile(e) => {
            assert!(e.log.contains("update_k"));
            assert!(e.log.contains("measure_k"));
        }
        other => panic!("expected a compile error, got {other:?}"),
    }
    assert_eq!(sim.backend().live_buffers(), 0);
    assert_eq!(sim.layout(), None);
    assert_eq!(sim.run_init(), Err(StateError::NoProgram.into()));
    Ok(())
}

#[test]
fn failed_reload_keeps_the_running_program() -> SimResult<()> {
    let mut sim = counter_sim(5, 1, 1)?;
    sim.run_init()?;
    sim.run_update()?;

    let incomplete = HostProgram::new().with_entry("init_k", |_| Ok(()));
    assert!(sim.load_program(&incomplete, StateLayout::of::<u32>(1)).is_err());
    assert_eq!(sim.latest(), StateSlot::B);

    sim.run_update()?;
    sim.run_meas()?;
    assert_eq!(read_counter(&mut sim)?, 7);
    Ok(())
}

#[test]
fn loading_a_program_resets_the_instance() -> SimResult<()> {
    let mut sim = counter_sim(0, 1, 1)?;
    sim.run_init()?;
    sim.run_update()?;

    sim.load_program(&counter_program(), StateLayout::of::<u32>(2))?;
    assert_eq!(sim.latest(), StateSlot::A);
    assert_eq!(sim.updates(), 0);
    assert!(!sim.is_ready());
    assert_eq!(sim.output_size(), None);
    assert_eq!(sim.layout().map(|l| l.size()), Some(8));
    assert_eq!(sim.backend().live_buffers(), 2);

    assert_eq!(
        sim.run_update(),
        Err(StateError::NotInitialized { operation: "run_update" }.into())
    );
    Ok(())
}

#[test]
fn empty_state_layout_is_rejected() -> SimResult<()> {
    let mut sim = Simulation::<HostBackend>::create(0, 0)?;
    assert_eq!(
        sim.load_program(&counter_program(), StateLayout::bytes(0)),
        Err(ConfigurationError::EmptyBuffer { what: "state layout" }.into())
    );
    Ok(())
}

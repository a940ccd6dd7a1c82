//! # Resource Set
//!
//! The owned collection of device objects for one simulation instance:
//!
//! * the compiled program,
//! * two equally sized state buffers (`A`, `B`),
//! * one output buffer, sized at measure-configuration time,
//! * per stage: an argument buffer, a kernel and two variant bindings.
//!
//! ## Ownership
//!
//! A resource set is owned by exactly one [`crate::Simulation`] and is never
//! shared or copied. A replacement stage is built in full before it is
//! swapped in, so a configuration that fails at any point, including a
//! backend allocation or binding error, leaves the previous stage and
//! output buffer in place. The displaced objects are dropped after the
//! swap.
//!
//! ## Teardown order
//!
//! [`ResourceSet::teardown`] releases objects in dependency order:
//! kernels and bindings, then buffers, then the program. The backend's queue
//! and context are released afterwards by the owning instance.

use tracing::debug;

use crate::engine::backend::{BufferUsage, ComputeBackend};
use crate::engine::error::{ConfigurationError, SimResult};
use crate::engine::stage::{BoundStage, StageDescriptor};
use crate::engine::types::{padded_size, StageKind, StateLayout, StateSlot};


/// The measurement output buffer and its caller-visible size.
pub struct OutputBuffer<B: ComputeBackend> {
    buffer: B::Buffer,
    size: usize,
}

impl<B: ComputeBackend> OutputBuffer<B> {
    /// Device buffer.
    pub fn buffer(&self) -> &B::Buffer { &self.buffer }

    /// Configured output size in bytes (before padding).
    pub fn size(&self) -> usize { self.size }
}

/// Device objects owned by one simulation instance.
pub struct ResourceSet<B: ComputeBackend> {
    init: Option<BoundStage<B>>,
    update: Option<BoundStage<B>>,
    measure: Option<BoundStage<B>>,
    output: Option<OutputBuffer<B>>,
    states: [B::Buffer; 2],
    layout: StateLayout,
    program: B::Program,
}

impl<B: ComputeBackend> ResourceSet<B> {
    /// Compiles `source`, resolves the three entry points and allocates both
    /// state buffers.
    ///
    /// Nothing is retained when compilation fails.
    pub(crate) fn load(backend: &mut B, source: &B::Source, layout: StateLayout) -> SimResult<Self> {
        if layout.size() == 0 {
            return Err(ConfigurationError::EmptyBuffer { what: "state layout" }.into());
        }

        let entry_points = StageKind::ALL.map(StageKind::entry_point);
        let program = backend.compile(source, &entry_points)?;

        let size = padded_size(layout.size());
        let state_a = backend.create_buffer("state_a", size, BufferUsage::State)?;
        let state_b = backend.create_buffer("state_b", size, BufferUsage::State)?;

        debug!(state_bytes = layout.size(), "program loaded");

        Ok(Self {
            init: None,
            update: None,
            measure: None,
            output: None,
            states: [state_a, state_b],
            layout,
            program,
        })
    }

    /// Configured stage, if any.
    pub fn stage(&self, kind: StageKind) -> Option<&BoundStage<B>> {
        match kind {
            StageKind::Init => self.init.as_ref(),
            StageKind::Update => self.update.as_ref(),
            StageKind::Measure => self.measure.as_ref(),
        }
    }

    fn stage_slot(&mut self, kind: StageKind) -> &mut Option<BoundStage<B>> {
        match kind {
            StageKind::Init => &mut self.init,
            StageKind::Update => &mut self.update,
            StageKind::Measure => &mut self.measure,
        }
    }

    /// State buffer in `slot`.
    pub fn state(&self, slot: StateSlot) -> &B::Buffer {
        &self.states[slot.index()]
    }

    /// State buffer layout fixed at load time.
    pub fn layout(&self) -> StateLayout {
        self.layout
    }

    /// Output buffer, once measure has been configured.
    pub fn output(&self) -> Option<&OutputBuffer<B>> {
        self.output.as_ref()
    }

    /// Replaces the configuration of `descriptor.stage`.
    pub(crate) fn configure(
        &mut self,
        backend: &mut B,
        descriptor: StageDescriptor,
        payload: &[u8],
    ) -> SimResult<()> {
        let kind = descriptor.stage;
        let bound = BoundStage::configure(
            backend,
            &self.program,
            &self.states,
            self.output.as_ref().map(|o| &o.buffer),
            descriptor,
            payload,
        )?;

        *self.stage_slot(kind) = Some(bound);
        Ok(())
    }

    /// Allocates a new `output_size` byte output buffer, binds the measure
    /// stage against it, then replaces both.
    pub(crate) fn configure_measure(
        &mut self,
        backend: &mut B,
        descriptor: StageDescriptor,
        payload: &[u8],
        output_size: usize,
    ) -> SimResult<()> {
        if output_size == 0 {
            return Err(ConfigurationError::EmptyBuffer { what: "measure output" }.into());
        }

        let buffer = backend.create_buffer("output", padded_size(output_size as u64), BufferUsage::Output)?;
        let bound = BoundStage::configure(backend, &self.program, &self.states, Some(&buffer), descriptor, payload)?;

        self.measure = Some(bound);
        self.output = Some(OutputBuffer { buffer, size: output_size });
        Ok(())
    }

    /// Releases every object in dependency order.
    pub(crate) fn teardown(self) {
        let ResourceSet { init, update, measure, output, states, layout: _, program } = self;

        let mut arg_buffers = Vec::with_capacity(3);
        for stage in [init, update, measure].into_iter().flatten() {
            let (variants, kernel, args) = stage.into_parts();
            drop(variants);
            drop(kernel);
            arg_buffers.push(args);
        }

        drop(arg_buffers);
        drop(output);
        drop(states);
        drop(program);
    }
}

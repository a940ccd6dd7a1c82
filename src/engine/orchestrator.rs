//! # Execution Orchestrator
//!
//! The ping-pong state machine driving the four-call protocol.
//!
//! ## States
//!
//! ```text
//! Uninitialized --run_init--> Ready
//! ```
//!
//! All update and measure operations require `Ready`.
//!
//! ## Parity
//!
//! A single [`StateSlot`] records which physical state buffer holds the
//! latest state. It starts at `A` and flips exactly once per successful
//! update enqueue, **regardless of completion**: the backend's in-order queue
//! guarantees the next enqueued kernel observes the previous write. Parity
//! therefore tracks logical buffer roles, never physical completion.
//!
//! Init and measure never flip parity. Reconfiguring a stage never touches
//! it.

use crate::engine::error::StateError;
use crate::engine::types::StateSlot;


/// Lifecycle phase of a simulation instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    /// No init has been enqueued yet.
    #[default]
    Uninitialized,
    /// Init has been enqueued at least once.
    Ready,
}

/// Parity and lifecycle bookkeeping for one instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Orchestrator {
    phase: Phase,
    latest: StateSlot,
    updates: u64,
}

impl Orchestrator {
    /// A fresh orchestrator: `Uninitialized`, latest = `A`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// `true` once init has been enqueued.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    /// Slot holding the latest state.
    #[inline]
    pub fn latest(&self) -> StateSlot {
        self.latest
    }

    /// Successful update enqueues so far.
    #[inline]
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Variant for the next init: the slot currently latest.
    #[inline]
    pub fn init_variant(&self) -> StateSlot {
        self.latest
    }

    /// Records a successful init enqueue.
    #[inline]
    pub fn commit_init(&mut self) {
        self.phase = Phase::Ready;
    }

    /// Variant for the next update: reads latest, writes the other slot.
    pub fn update_variant(&self) -> Result<StateSlot, StateError> {
        self.require_ready("run_update")?;
        Ok(self.latest)
    }

    /// Records a successful update enqueue and flips parity.
    #[inline]
    pub fn commit_update(&mut self) {
        self.latest = self.latest.other();
        self.updates += 1;
    }

    /// Variant for the next measure: reads latest.
    pub fn measure_variant(&self) -> Result<StateSlot, StateError> {
        self.require_ready("run_meas")?;
        Ok(self.latest)
    }

    fn require_ready(&self, operation: &'static str) -> Result<(), StateError> {
        match self.phase {
            Phase::Ready => Ok(()),
            Phase::Uninitialized => Err(StateError::NotInitialized { operation }),
        }
    }
}

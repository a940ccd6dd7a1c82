//! Core harness types: stages, state slots, geometry and binding slots.
//!
//! These definitions are shared by the orchestrator, the stage configurator
//! and every backend. They carry no device state and allocate nothing.
//!
//! ## Argument-slot convention
//!
//! Each stage's kernel receives its buffers by slot position:
//!
//! ```text
//! init_k     (state@0,  args@1)
//! update_k   (write@0,  read@1, scratch@2, args@3)
//! measure_k  (output@0, read@1, scratch@2, args@3)
//! ```
//!
//! Slot 2 is the local scratch allocation. It is sized per configuration
//! and is not a buffer binding; backends provide it as work-group memory.
//!
//! ## Geometry
//!
//! A [`Geometry`] mirrors the dispatch model of compute APIs: a dimension
//! count, a global extent and a local (work-group) extent per axis. Axes
//! beyond the dimension count are treated as extent 1.

use std::fmt;

use crate::engine::error::ConfigurationError;


/// Entry point resolved for the init stage.
pub const INIT_ENTRY: &str = "init_k";
/// Entry point resolved for the update stage.
pub const UPDATE_ENTRY: &str = "update_k";
/// Entry point resolved for the measure stage.
pub const MEASURE_ENTRY: &str = "measure_k";

/// Slot position reserved for the local scratch allocation.
pub const SCRATCH_SLOT: u32 = 2;

/// Device buffers are sized in multiples of this many bytes.
pub const BUFFER_ALIGN: u64 = 4;

/// Maximum number of dispatch axes accepted by the harness.
pub const MAX_DIMS: usize = 2;

/// Rounds `size` up to [`BUFFER_ALIGN`], never returning zero.
#[inline]
pub fn padded_size(size: u64) -> u64 {
    size.max(1).div_ceil(BUFFER_ALIGN) * BUFFER_ALIGN
}

/// The three kernel roles the harness drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Populates the latest state buffer.
    Init,
    /// Reads the latest state, writes the other buffer.
    Update,
    /// Reads the latest state, writes the output buffer.
    Measure,
}

impl StageKind {
    /// All stages in protocol order.
    pub const ALL: [StageKind; 3] = [StageKind::Init, StageKind::Update, StageKind::Measure];

    /// Kernel entry point name for this stage.
    pub fn entry_point(self) -> &'static str {
        match self {
            StageKind::Init => INIT_ENTRY,
            StageKind::Update => UPDATE_ENTRY,
            StageKind::Measure => MEASURE_ENTRY,
        }
    }

    /// Buffer slots bound for this stage, in slot order.
    pub fn slots(self) -> &'static [SlotSpec] {
        const INIT: [SlotSpec; 2] = [
            SlotSpec { index: 0, role: SlotRole::State, access: SlotAccess::ReadWrite },
            SlotSpec { index: 1, role: SlotRole::Args, access: SlotAccess::ReadOnly },
        ];
        const UPDATE: [SlotSpec; 3] = [
            SlotSpec { index: 0, role: SlotRole::Write, access: SlotAccess::ReadWrite },
            SlotSpec { index: 1, role: SlotRole::Read, access: SlotAccess::ReadOnly },
            SlotSpec { index: 3, role: SlotRole::Args, access: SlotAccess::ReadOnly },
        ];
        const MEASURE: [SlotSpec; 3] = [
            SlotSpec { index: 0, role: SlotRole::Output, access: SlotAccess::ReadWrite },
            SlotSpec { index: 1, role: SlotRole::Read, access: SlotAccess::ReadOnly },
            SlotSpec { index: 3, role: SlotRole::Args, access: SlotAccess::ReadOnly },
        ];
        match self {
            StageKind::Init => &INIT,
            StageKind::Update => &UPDATE,
            StageKind::Measure => &MEASURE,
        }
    }

    /// Whether the stage accepts a local scratch allocation.
    pub fn uses_scratch(self) -> bool {
        !matches!(self, StageKind::Init)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StageKind::Init => "init",
            StageKind::Update => "update",
            StageKind::Measure => "measure",
        })
    }
}

/// What a bound slot holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotRole {
    /// Init target (the latest state buffer).
    State,
    /// State buffer written by update.
    Write,
    /// State buffer holding the latest state.
    Read,
    /// Measurement output buffer.
    Output,
    /// Stage argument payload.
    Args,
}

/// Device access mode of a bound slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotAccess {
    /// Kernel only reads the buffer.
    ReadOnly,
    /// Kernel may write the buffer.
    ReadWrite,
}

/// One entry in a stage's argument-slot convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotSpec {
    /// Slot (binding) index.
    pub index: u32,
    /// Buffer held by the slot.
    pub role: SlotRole,
    /// Access mode.
    pub access: SlotAccess,
}

/// One of the two physical state buffers.
///
/// The orchestrator tracks which slot currently holds the latest state; the
/// other slot is the write target of the next update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StateSlot {
    /// Buffer `A`, latest after init.
    #[default]
    A,
    /// Buffer `B`.
    B,
}

impl StateSlot {
    /// The opposite buffer.
    #[inline]
    pub fn other(self) -> StateSlot {
        match self {
            StateSlot::A => StateSlot::B,
            StateSlot::B => StateSlot::A,
        }
    }

    /// Array index of the slot (`A` = 0).
    #[inline]
    pub fn index(self) -> usize {
        match self {
            StateSlot::A => 0,
            StateSlot::B => 1,
        }
    }
}

/// Byte size of the state held in each of the two state buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateLayout {
    element_size: u64,
    element_count: u64,
}

impl StateLayout {
    /// `element_count` elements of `element_size` bytes each.
    pub fn new(element_size: u64, element_count: u64) -> Self {
        Self { element_size, element_count }
    }

    /// A single opaque state struct of `size` bytes.
    pub fn bytes(size: u64) -> Self {
        Self::new(size, 1)
    }

    /// `count` elements of the POD type `T`.
    pub fn of<T: bytemuck::Pod>(count: u64) -> Self {
        Self::new(std::mem::size_of::<T>() as u64, count)
    }

    /// Element size in bytes.
    pub fn element_size(&self) -> u64 { self.element_size }

    /// Element count.
    pub fn element_count(&self) -> u64 { self.element_count }

    /// Total bytes per state buffer.
    pub fn size(&self) -> u64 {
        self.element_size.saturating_mul(self.element_count)
    }
}

/// Execution extent of one stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    /// Number of used axes.
    pub dims: usize,
    /// Global extent per axis.
    pub global: [u32; 3],
    /// Local (work-group) extent per axis.
    pub local: [u32; 3],
}

impl Geometry {
    /// One-dimensional geometry.
    pub fn linear(global: u32, local: u32) -> Self {
        Self { dims: 1, global: [global, 1, 1], local: [local, 1, 1] }
    }

    /// Two-dimensional geometry.
    pub fn planar(global: [u32; 2], local: [u32; 2]) -> Self {
        Self {
            dims: 2,
            global: [global[0], global[1], 1],
            local: [local[0], local[1], 1],
        }
    }

    /// Global extent of `axis`, 1 for unused axes.
    #[inline]
    pub fn global_extent(&self, axis: usize) -> u32 {
        if axis < self.dims { self.global[axis] } else { 1 }
    }

    /// Local extent of `axis`, 1 for unused axes.
    #[inline]
    pub fn local_extent(&self, axis: usize) -> u32 {
        if axis < self.dims { self.local[axis] } else { 1 }
    }

    /// Invocations per work-group.
    pub fn group_invocations(&self) -> u64 {
        (0..3).map(|a| self.local_extent(a) as u64).product()
    }

    /// Total invocations across the dispatch.
    pub fn total_invocations(&self) -> u64 {
        (0..3).map(|a| self.global_extent(a) as u64).product()
    }

    /// Work-groups per axis. Only meaningful after [`Geometry::validate`].
    pub fn work_groups(&self) -> [u32; 3] {
        let mut groups = [1u32; 3];
        for (axis, g) in groups.iter_mut().enumerate() {
            let local = self.local_extent(axis).max(1);
            *g = self.global_extent(axis) / local;
        }
        groups
    }

    /// Device-independent checks: dimension count, non-zero extents and
    /// global extents divisible by local extents.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.dims == 0 || self.dims > MAX_DIMS {
            return Err(ConfigurationError::Dimensions { dims: self.dims });
        }
        for axis in 0..self.dims {
            let (global, local) = (self.global[axis], self.local[axis]);
            if global == 0 || local == 0 {
                return Err(ConfigurationError::ZeroExtent { axis });
            }
            if global % local != 0 {
                return Err(ConfigurationError::IndivisibleExtent { axis, global, local });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_size_rounds_to_words() {
        assert_eq!(padded_size(0), 4);
        assert_eq!(padded_size(1), 4);
        assert_eq!(padded_size(4), 4);
        assert_eq!(padded_size(21), 24);
    }

    #[test]
    fn state_slot_alternates() {
        assert_eq!(StateSlot::default(), StateSlot::A);
        assert_eq!(StateSlot::A.other(), StateSlot::B);
        assert_eq!(StateSlot::B.other().other(), StateSlot::B);
        assert_eq!(StateSlot::B.index(), 1);
    }

    #[test]
    fn planar_geometry_counts_groups() {
        let g = Geometry::planar([64, 64], [16, 16]);
        g.validate().unwrap();
        assert_eq!(g.work_groups(), [4, 4, 1]);
        assert_eq!(g.group_invocations(), 256);
        assert_eq!(g.total_invocations(), 4096);
    }

    #[test]
    fn unused_axes_are_ignored() {
        let g = Geometry { dims: 1, global: [4096, 0, 7], local: [256, 0, 3] };
        g.validate().unwrap();
        assert_eq!(g.work_groups(), [16, 1, 1]);
        assert_eq!(g.group_invocations(), 256);
    }

    #[test]
    fn indivisible_extent_is_rejected() {
        let g = Geometry::planar([64, 60], [16, 16]);
        assert_eq!(
            g.validate(),
            Err(ConfigurationError::IndivisibleExtent { axis: 1, global: 60, local: 16 })
        );
    }

    #[test]
    fn dimension_count_is_bounded() {
        let g = Geometry { dims: 3, global: [8, 8, 8], local: [2, 2, 2] };
        assert_eq!(g.validate(), Err(ConfigurationError::Dimensions { dims: 3 }));
        let g = Geometry { dims: 0, ..Geometry::linear(8, 8) };
        assert_eq!(g.validate(), Err(ConfigurationError::Dimensions { dims: 0 }));
    }

    #[test]
    fn update_slots_follow_convention() {
        let slots = StageKind::Update.slots();
        assert_eq!(slots[0].role, SlotRole::Write);
        assert_eq!(slots[1].role, SlotRole::Read);
        assert_eq!(slots[2].index, 3);
        assert!(slots.iter().all(|s| s.index != SCRATCH_SLOT));
    }
}

//! # Host Invocation
//!
//! The view a host kernel gets of one dispatch: the stage geometry, the
//! buffers bound to its slots and one work-group's worth of local scratch.
//!
//! Slot numbers follow the harness convention (`0` = state/write/output,
//! `1` = read or init args, `3` = update/measure args). Every accessor
//! returns a `BackendError` for an unbound slot or a buffer too small for
//! the requested type, the host analogue of a device fault.
//!
//! ## Example
//!
//! ```ignore
//! let args: UpdateArgs = inv.read_pod(3)?;
//! let (next, prev) = inv.split::<State, State>(0, 1)?;
//! next.cells.copy_from_slice(&prev.cells);
//! ```

use std::mem::size_of;
use std::sync::MutexGuard;

use bytemuck::Pod;

use crate::engine::error::{BackendError, SimResult};
use crate::engine::types::{Geometry, StageKind};


/// One locked buffer bound to a kernel slot.
pub(crate) struct BoundSlot<'a> {
    pub(crate) slot: u32,
    pub(crate) len: usize,
    pub(crate) words: MutexGuard<'a, Vec<u64>>,
}

impl BoundSlot<'_> {
    fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(self.words.as_slice())[..self.len]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut bytemuck::cast_slice_mut::<u64, u8>(self.words.as_mut_slice())[..len]
    }
}

/// Arguments of one host kernel dispatch.
pub struct HostInvocation<'a> {
    stage: StageKind,
    geometry: Geometry,
    slots: Vec<BoundSlot<'a>>,
    scratch: Vec<u32>,
}

impl<'a> HostInvocation<'a> {
    pub(crate) fn new(stage: StageKind, geometry: Geometry, slots: Vec<BoundSlot<'a>>, scratch_words: usize) -> Self {
        Self { stage, geometry, slots, scratch: vec![0; scratch_words] }
    }

    /// Stage being executed.
    pub fn stage(&self) -> StageKind {
        self.stage
    }

    /// Dispatch geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Bytes of the buffer bound to `slot`.
    pub fn read(&self, slot: u32) -> SimResult<&[u8]> {
        Ok(self.bound(slot)?.bytes())
    }

    /// Mutable bytes of the buffer bound to `slot`.
    pub fn write(&mut self, slot: u32) -> SimResult<&mut [u8]> {
        Ok(self.bound_mut(slot)?.bytes_mut())
    }

    /// The buffer bound to `slot` as a slice of `T`. Trailing bytes that do
    /// not fill a whole `T` are ignored.
    pub fn read_as<T: Pod>(&self, slot: u32) -> SimResult<&[T]> {
        cast_slice(slot, self.read(slot)?)
    }

    /// The buffer bound to `slot` as a mutable slice of `T`.
    pub fn write_as<T: Pod>(&mut self, slot: u32) -> SimResult<&mut [T]> {
        cast_slice_mut(slot, self.write(slot)?)
    }

    /// Copies a `T` out of the start of the buffer bound to `slot`.
    pub fn read_pod<T: Pod>(&self, slot: u32) -> SimResult<T> {
        let bytes = head(slot, self.read(slot)?, size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// The start of the buffer bound to `slot` viewed as a `T`.
    pub fn view<T: Pod>(&self, slot: u32) -> SimResult<&T> {
        cast_ref(slot, self.read(slot)?)
    }

    /// The start of the buffer bound to `slot` viewed as a mutable `T`.
    pub fn view_mut<T: Pod>(&mut self, slot: u32) -> SimResult<&mut T> {
        cast_mut(slot, self.write(slot)?)
    }

    /// Simultaneous views of two distinct slots: `write` mutable, `read`
    /// shared. Used by update and measure kernels.
    pub fn split<W: Pod, R: Pod>(&mut self, write: u32, read: u32) -> SimResult<(&mut W, &R)> {
        let (w, r) = self.split_bytes(write, read)?;
        Ok((cast_mut(write, w)?, cast_ref(read, r)?))
    }

    /// As [`HostInvocation::split`], with the written slot viewed as a slice
    /// of `W` (e.g. a measurement output of runtime size).
    pub fn split_slice<W: Pod, R: Pod>(&mut self, write: u32, read: u32) -> SimResult<(&mut [W], &R)> {
        let (w, r) = self.split_bytes(write, read)?;
        Ok((cast_slice_mut(write, w)?, cast_ref(read, r)?))
    }

    /// Both slots viewed as slices, for states laid out as arrays of cells.
    pub fn split_slices<W: Pod, R: Pod>(&mut self, write: u32, read: u32) -> SimResult<(&mut [W], &[R])> {
        let (w, r) = self.split_bytes(write, read)?;
        Ok((cast_slice_mut(write, w)?, cast_slice(read, r)?))
    }

    /// Raw bytes of two distinct slots, `write` mutable.
    pub fn split_bytes(&mut self, write: u32, read: u32) -> SimResult<(&mut [u8], &[u8])> {
        if write == read {
            return Err(BackendError::new("split host kernel slots", format!("slot {write} requested twice")).into());
        }

        let mut write_slot = None;
        let mut read_slot = None;
        for bound in self.slots.iter_mut() {
            if bound.slot == write {
                write_slot = Some(bound);
            } else if bound.slot == read {
                read_slot = Some(bound);
            }
        }
        let write_slot = write_slot.ok_or_else(|| unbound(write))?;
        let read_slot = read_slot.ok_or_else(|| unbound(read))?;

        Ok((write_slot.bytes_mut(), read_slot.bytes()))
    }

    /// One work-group's local scratch, zeroed at the start of the dispatch.
    pub fn scratch(&mut self) -> &mut [u32] {
        &mut self.scratch
    }

    fn bound(&self, slot: u32) -> SimResult<&BoundSlot<'a>> {
        self.slots.iter().find(|b| b.slot == slot).ok_or_else(|| unbound(slot))
    }

    fn bound_mut(&mut self, slot: u32) -> SimResult<&mut BoundSlot<'a>> {
        self.slots.iter_mut().find(|b| b.slot == slot).ok_or_else(|| unbound(slot))
    }
}

fn unbound(slot: u32) -> crate::engine::error::SimError {
    BackendError::new("access host kernel slot", format!("slot {slot} is not bound")).into()
}

fn head(slot: u32, bytes: &[u8], size: usize) -> SimResult<&[u8]> {
    bytes.get(..size).ok_or_else(|| {
        BackendError::new(
            "access host kernel slot",
            format!("slot {slot} holds {} bytes, {size} required", bytes.len()),
        )
        .into()
    })
}

fn head_mut(slot: u32, bytes: &mut [u8], size: usize) -> SimResult<&mut [u8]> {
    let len = bytes.len();
    bytes.get_mut(..size).ok_or_else(|| {
        BackendError::new(
            "access host kernel slot",
            format!("slot {slot} holds {len} bytes, {size} required"),
        )
        .into()
    })
}

fn cast_failed(slot: u32, e: bytemuck::PodCastError) -> crate::engine::error::SimError {
    BackendError::new("access host kernel slot", format!("slot {slot}: {e:?}")).into()
}

fn cast_ref<T: Pod>(slot: u32, bytes: &[u8]) -> SimResult<&T> {
    bytemuck::try_from_bytes(head(slot, bytes, size_of::<T>())?).map_err(|e| cast_failed(slot, e))
}

fn cast_mut<T: Pod>(slot: u32, bytes: &mut [u8]) -> SimResult<&mut T> {
    bytemuck::try_from_bytes_mut(head_mut(slot, bytes, size_of::<T>())?).map_err(|e| cast_failed(slot, e))
}

fn cast_slice<T: Pod>(slot: u32, bytes: &[u8]) -> SimResult<&[T]> {
    let whole = bytes.len() / size_of::<T>().max(1) * size_of::<T>();
    bytemuck::try_cast_slice(&bytes[..whole]).map_err(|e| cast_failed(slot, e))
}

fn cast_slice_mut<T: Pod>(slot: u32, bytes: &mut [u8]) -> SimResult<&mut [T]> {
    let whole = bytes.len() / size_of::<T>().max(1) * size_of::<T>();
    bytemuck::try_cast_slice_mut(&mut bytes[..whole]).map_err(|e| cast_failed(slot, e))
}

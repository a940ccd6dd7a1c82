#![cfg(feature = "gpu")]

//! # GPU Dispatch & Transfer
//!
//! Command submission for the `wgpu` backend.
//!
//! ## Ordering
//!
//! Every dispatch is encoded and submitted on its own. `Queue::write_buffer`
//! data is staged until the next submission, so submitting per dispatch keeps
//! argument rewrites between dispatches ordered with them. Submissions to one
//! queue execute in order.
//!
//! ## Synchronization
//!
//! Nothing here blocks except [`finish`] and [`read_back`], which wait via
//! `wgpu::Device::poll`.

use std::sync::mpsc;

use tracing::trace;

use crate::engine::error::{BackendError, SimResult};
use crate::engine::types::{padded_size, Geometry};

use crate::gpu::context::GPUContext;
use crate::gpu::pipeline::GpuKernel;


/// Encodes and submits one dispatch of `kernel` over `geometry`.
pub(crate) fn enqueue(
    context: &GPUContext,
    kernel: &GpuKernel,
    bind_group: &wgpu::BindGroup,
    geometry: &Geometry,
) -> SimResult<()> {
    let groups = geometry.work_groups();

    context.device.push_error_scope(wgpu::ErrorFilter::Validation);

    let mut encoder = context.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("stagesim_compute_encoder"),
    });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(kernel.stage.entry_point()),
            timestamp_writes: None,
        });
        pass.set_pipeline(&kernel.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
    }
    context.queue.submit(Some(encoder.finish()));

    if let Some(error) = pollster::block_on(context.device.pop_error_scope()) {
        return Err(BackendError::new("enqueue kernel", error.to_string()).into());
    }

    trace!(stage = %kernel.stage, ?groups, "dispatch submitted");
    Ok(())
}

/// Stages `bytes` for the start of `buffer`; lands with the next submission.
pub(crate) fn write(context: &GPUContext, buffer: &wgpu::Buffer, bytes: &[u8]) {
    context.queue.write_buffer(buffer, 0, bytes);
}

/// Submits any staged writes without waiting.
pub(crate) fn flush(context: &GPUContext) {
    context.queue.submit(std::iter::empty());
}

/// Blocks until every submission has completed.
pub(crate) fn finish(context: &GPUContext) -> SimResult<()> {
    context
        .device
        .poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })
        .map_err(|e| BackendError::new("wait for device", format!("wgpu device poll failed: {e:?}")))?;
    Ok(())
}

/// Copies the first `out.len()` bytes of `buffer` into `out`.
///
/// Goes through a transient `MAP_READ` staging buffer.
pub(crate) fn read_back(context: &GPUContext, buffer: &wgpu::Buffer, out: &mut [u8]) -> SimResult<()> {
    let size = padded_size(out.len() as u64);
    if size > buffer.size() {
        return Err(BackendError::new(
            "read output buffer",
            format!("{} bytes requested from a {} byte buffer", out.len(), buffer.size()),
        )
        .into());
    }

    let staging = context.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("stagesim_readback"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = context.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("stagesim_readback_encoder"),
    });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
    let submission = context.queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..size);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    context
        .device
        .poll(wgpu::PollType::Wait {
            submission_index: Some(submission),
            timeout: None,
        })
        .map_err(|e| BackendError::new("read output buffer", format!("wgpu device poll failed: {e:?}")))?;

    rx.recv()
        .map_err(|_| BackendError::new("read output buffer", "map callback dropped"))?
        .map_err(|e| BackendError::new("read output buffer", e.to_string()))?;

    {
        let view = slice.get_mapped_range();
        out.copy_from_slice(&view[..out.len()]);
    }
    staging.unmap();
    Ok(())
}

#![cfg(feature = "gpu")]

//! `ComputeBackend` implementation over `wgpu`.

use crate::engine::backend::{
    ArgBinding, BufferUsage, ComputeBackend, DeviceInfo, DeviceLimits, KernelSource, LaunchShape, PlatformInfo,
};
use crate::engine::error::{BackendError, SimResult};
use crate::engine::types::{Geometry, StageKind};

use crate::gpu::context::{self, GPUContext};
use crate::gpu::dispatch;
use crate::gpu::pipeline::{self, GpuKernel, GpuProgram};


/// A bind group for one kernel variant.
#[derive(Debug)]
pub struct GpuBinding {
    stage: StageKind,
    group: wgpu::BindGroup,
}

/// WGSL compute backend on one `wgpu` adapter.
pub struct WgpuBackend {
    context: GPUContext,
}

impl ComputeBackend for WgpuBackend {
    type Source = KernelSource;
    type Program = GpuProgram;
    type Buffer = wgpu::Buffer;
    type Kernel = GpuKernel;
    type Binding = GpuBinding;

    fn platforms() -> SimResult<Vec<PlatformInfo>> {
        Ok(context::platforms())
    }

    fn open(platform_index: usize, device_index: usize) -> SimResult<Self> {
        Ok(Self { context: GPUContext::open(platform_index, device_index)? })
    }

    fn device(&self) -> &DeviceInfo {
        &self.context.info
    }

    fn limits(&self) -> &DeviceLimits {
        &self.context.limits
    }

    fn compile(&mut self, source: &KernelSource, entry_points: &[&str]) -> SimResult<GpuProgram> {
        Ok(pipeline::compile_module(&self.context, source, entry_points)?)
    }

    fn create_buffer(&mut self, label: &'static str, size: u64, usage: BufferUsage) -> SimResult<wgpu::Buffer> {
        let usage = match usage {
            BufferUsage::State => {
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC
            }
            BufferUsage::Args => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Output => {
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST
            }
        };

        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage,
            mapped_at_creation: false,
        });
        let validation = pollster::block_on(device.pop_error_scope());
        let oom = pollster::block_on(device.pop_error_scope());

        match validation.or(oom) {
            Some(error) => Err(BackendError::new("allocate device buffer", format!("{label}: {error}")).into()),
            None => Ok(buffer),
        }
    }

    fn write_buffer(&mut self, buffer: &wgpu::Buffer, bytes: &[u8]) -> SimResult<()> {
        dispatch::write(&self.context, buffer, bytes);
        Ok(())
    }

    fn create_kernel(&mut self, program: &GpuProgram, stage: StageKind, shape: &LaunchShape) -> SimResult<GpuKernel> {
        Ok(pipeline::create_pipeline(&self.context, program, stage, shape)?)
    }

    fn bind(&mut self, kernel: &GpuKernel, args: &[ArgBinding<'_, wgpu::Buffer>]) -> SimResult<GpuBinding> {
        let entries: Vec<wgpu::BindGroupEntry> = args
            .iter()
            .map(|a| wgpu::BindGroupEntry {
                binding: a.slot,
                resource: a.buffer.as_entire_binding(),
            })
            .collect();

        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(kernel.stage.entry_point()),
            layout: &kernel.layout,
            entries: &entries,
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(BackendError::new("bind kernel arguments", error.to_string()).into());
        }

        Ok(GpuBinding { stage: kernel.stage, group })
    }

    fn enqueue(&mut self, kernel: &GpuKernel, binding: &GpuBinding, geometry: &Geometry) -> SimResult<()> {
        if binding.stage != kernel.stage {
            return Err(BackendError::new(
                "enqueue kernel",
                format!("{} binding used with {} kernel", binding.stage, kernel.stage),
            )
            .into());
        }
        dispatch::enqueue(&self.context, kernel, &binding.group, geometry)
    }

    fn flush(&mut self) -> SimResult<()> {
        dispatch::flush(&self.context);
        Ok(())
    }

    fn finish(&mut self) -> SimResult<()> {
        dispatch::finish(&self.context)
    }

    fn read_buffer(&mut self, buffer: &wgpu::Buffer, out: &mut [u8]) -> SimResult<()> {
        dispatch::read_back(&self.context, buffer, out)
    }
}

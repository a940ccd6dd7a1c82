#![cfg(feature = "gpu")]

//! # GPU Context
//!
//! Platform/device enumeration and device + queue creation.
//!
//! ## Platforms
//!
//! `wgpu` has no platform objects. Adapters are grouped by the native API
//! they run on (Vulkan, Metal, DX12, GL), in enumeration order; each group is
//! one platform and each adapter in it one device. Indices are therefore
//! stable for a given machine and driver set.
//!
//! ## Limits
//!
//! The device is requested with the adapter's full limits, and those limits
//! are what geometry validation checks against.

use tracing::debug;

use crate::engine::backend::{DeviceInfo, DeviceLimits, PlatformInfo};
use crate::engine::error::{BackendError, ConfigurationError, SimResult};


/// Device and in-order queue of one adapter.
///
/// Field order is drop order: the queue is released before the device.
pub(crate) struct GPUContext {
    pub(crate) queue: wgpu::Queue,
    pub(crate) device: wgpu::Device,
    pub(crate) info: DeviceInfo,
    pub(crate) limits: DeviceLimits,
}

impl GPUContext {
    /// Opens adapter `device_index` of platform `platform_index`.
    pub(crate) fn open(platform_index: usize, device_index: usize) -> SimResult<Self> {
        let mut platforms = enumerate();
        let available = platforms.len();
        if platform_index >= available {
            return Err(ConfigurationError::PlatformOutOfRange { index: platform_index, available }.into());
        }

        let (platform, mut adapters) = platforms.swap_remove(platform_index);
        if device_index >= adapters.len() {
            return Err(ConfigurationError::DeviceOutOfRange {
                index: device_index,
                available: adapters.len(),
            }
            .into());
        }
        let adapter = adapters.swap_remove(device_index);

        let adapter_limits = adapter.limits();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("stagesim_device"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter_limits.clone(),
            ..Default::default()
        }))
        .map_err(|e| BackendError::new("create device context", e.to_string()))?;

        let info = DeviceInfo { platform, device: adapter_name(&adapter) };
        debug!(platform = %info.platform, device = %info.device, "wgpu device created");

        Ok(Self {
            queue,
            device,
            info,
            limits: device_limits(&adapter_limits),
        })
    }
}

/// Lists platforms (adapter groups by native API) and their devices.
pub(crate) fn platforms() -> Vec<PlatformInfo> {
    enumerate()
        .into_iter()
        .map(|(name, adapters)| PlatformInfo {
            name,
            devices: adapters.iter().map(adapter_name).collect(),
        })
        .collect()
}

/// `true` when at least one adapter can be enumerated.
pub fn adapter_available() -> bool {
    !enumerate().is_empty()
}

fn enumerate() -> Vec<(String, Vec<wgpu::Adapter>)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let mut groups: Vec<(wgpu::Backend, Vec<wgpu::Adapter>)> = Vec::new();
    for adapter in instance.enumerate_adapters(wgpu::Backends::all()) {
        let backend = adapter.get_info().backend;
        match groups.iter_mut().find(|(b, _)| *b == backend) {
            Some((_, adapters)) => adapters.push(adapter),
            None => groups.push((backend, vec![adapter])),
        }
    }

    groups
        .into_iter()
        .map(|(backend, adapters)| (format!("{backend:?}"), adapters))
        .collect()
}

fn adapter_name(adapter: &wgpu::Adapter) -> String {
    let info = adapter.get_info();
    if info.name.is_empty() {
        format!("{:?}", info.device_type)
    } else {
        info.name
    }
}

fn device_limits(limits: &wgpu::Limits) -> DeviceLimits {
    DeviceLimits {
        max_work_group_size: limits.max_compute_invocations_per_workgroup,
        max_local_extent: [
            limits.max_compute_workgroup_size_x,
            limits.max_compute_workgroup_size_y,
            limits.max_compute_workgroup_size_z,
        ],
        max_work_groups_per_axis: limits.max_compute_workgroups_per_dimension,
        max_scratch_bytes: limits.max_compute_workgroup_storage_size as u64,
    }
}

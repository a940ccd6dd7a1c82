#![cfg(feature = "gpu")]

//! # GPU Program & Pipeline Construction
//!
//! Turns WGSL source into a shader module and, per stage configuration, a
//! compute pipeline with an explicit bind group layout.
//!
//! ---
//!
//! ## Binding model
//!
//! Pipelines follow the harness slot convention in bind group 0:
//!
//! * written slots (state / write / output) - `var<storage, read_write>`
//! * read slots (read / args) - `var<storage, read>`
//!
//! Slot 2 is never a binding. Local scratch is sized through the
//! pipeline-overridable constant `SCRATCH_WORDS`; the work-group extent
//! through `LOCAL_X` and `LOCAL_Y`. Every module must declare all three.
//!
//! ---
//!
//! ## Errors
//!
//! Validation failures are captured with error scopes and surfaced as
//! `CompileError` carrying the full diagnostic text, for both the module
//! and each pipeline built from it.

use std::borrow::Cow;

use tracing::debug;

use crate::engine::backend::{KernelSource, LaunchShape};
use crate::engine::error::CompileError;
use crate::engine::types::{SlotAccess, StageKind};

use crate::gpu::context::GPUContext;


/// Override constant sizing the work-group scratch array, in `u32` words.
pub const SCRATCH_WORDS: &str = "SCRATCH_WORDS";
/// Override constant for the work-group extent along x.
pub const LOCAL_X: &str = "LOCAL_X";
/// Override constant for the work-group extent along y.
pub const LOCAL_Y: &str = "LOCAL_Y";

/// A validated WGSL module.
#[derive(Debug)]
pub struct GpuProgram {
    pub(crate) module: wgpu::ShaderModule,
}

/// A compute pipeline for one stage configuration.
#[derive(Debug)]
pub struct GpuKernel {
    pub(crate) stage: StageKind,
    pub(crate) pipeline: wgpu::ComputePipeline,
    pub(crate) layout: wgpu::BindGroupLayout,
}

/// Builds the shader module and checks that every entry point is declared.
pub(crate) fn compile_module(
    context: &GPUContext,
    source: &KernelSource,
    entry_points: &[&str],
) -> Result<GpuProgram, CompileError> {
    let label = source
        .origin()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "inline kernel".to_string());

    context.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = context.device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label.as_str()),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source.text())),
    });
    if let Some(error) = pollster::block_on(context.device.pop_error_scope()) {
        return Err(CompileError::new(error.to_string()));
    }

    let missing: Vec<&str> = entry_points
        .iter()
        .copied()
        .filter(|name| !declares_function(source.text(), name))
        .collect();
    if !missing.is_empty() {
        return Err(CompileError::new(format!(
            "{label}: missing entry point(s): {}",
            missing.join(", ")
        )));
    }

    debug!(%label, "shader module built");
    Ok(GpuProgram { module })
}

/// Creates the compute pipeline and bind group layout for `stage`.
///
/// ## Parameters
/// * `program` - module holding the stage entry point
/// * `shape` - local extent and scratch size baked in as override constants
pub(crate) fn create_pipeline(
    context: &GPUContext,
    program: &GpuProgram,
    stage: StageKind,
    shape: &LaunchShape,
) -> Result<GpuKernel, CompileError> {
    let entries: Vec<wgpu::BindGroupLayoutEntry> = stage
        .slots()
        .iter()
        .map(|slot| wgpu::BindGroupLayoutEntry {
            binding: slot.index,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage {
                    read_only: slot.access == SlotAccess::ReadOnly,
                },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        })
        .collect();

    let constants = [
        (LOCAL_X, shape.local[0] as f64),
        (LOCAL_Y, shape.local[1] as f64),
        (SCRATCH_WORDS, shape.scratch_words() as f64),
    ];

    context.device.push_error_scope(wgpu::ErrorFilter::Validation);

    let layout = context.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(layout_label(stage)),
        entries: &entries,
    });

    let pipeline_layout = context.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("stagesim_pipeline_layout"),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });

    let pipeline = context.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(stage.entry_point()),
        layout: Some(&pipeline_layout),
        module: &program.module,
        entry_point: Some(stage.entry_point()),
        compilation_options: wgpu::PipelineCompilationOptions {
            constants: &constants,
            zero_initialize_workgroup_memory: true,
        },
        cache: None,
    });

    if let Some(error) = pollster::block_on(context.device.pop_error_scope()) {
        return Err(CompileError::new(format!("{}: {error}", stage.entry_point())));
    }

    Ok(GpuKernel { stage, pipeline, layout })
}

fn layout_label(stage: StageKind) -> &'static str {
    match stage {
        StageKind::Init => "stagesim_init_layout",
        StageKind::Update => "stagesim_update_layout",
        StageKind::Measure => "stagesim_measure_layout",
    }
}

/// `true` when `source` contains `fn <name>` as whole tokens.
fn declares_function(source: &str, name: &str) -> bool {
    let mut previous = "";
    for token in source.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if token.is_empty() {
            continue;
        }
        if previous == "fn" && token == name {
            return true;
        }
        previous = token;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::declares_function;

    #[test]
    fn entry_points_are_matched_as_whole_tokens() {
        let src = "@compute @workgroup_size(LOCAL_X)\nfn init_k(@builtin(global_invocation_id) id: vec3<u32>) {}\nfn update_kernel() {}";
        assert!(declares_function(src, "init_k"));
        assert!(!declares_function(src, "update_k"));
        assert!(!declares_function("// fn measure_k is missing", "measure"));
    }
}

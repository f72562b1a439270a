/*
 * GPU Backend Module
 *
 * ComputeBackend on nannou's wgpu device. Buffers are real device
 * buffers; the kernel is a WGSL compute shader supplied by the host.
 *
 * Binding layout expected from the shader (group 0):
 *   0 uniform DispatchParams
 *   1 boids       2 swarms       3 instance transforms
 *   4 triangles   5 food attractors
 */

use std::collections::HashMap;
use std::sync::Arc;

use nannou::wgpu;
use tracing::{debug, error, info};

use crate::backend::{BufferDesc, BufferId, BufferUsage, ComputeBackend, DispatchParams, KernelBindings, KernelId};
use crate::error::DeviceError;

struct GpuBuffer {
    buffer: wgpu::Buffer,
    // Size requested by the caller; the device buffer may be larger
    logical_size: u64,
}

pub struct WgpuBackend {
    device_queue: Arc<wgpu::DeviceQueuePair>,
    // None models a missing compute program
    shader_source: Option<String>,
    buffers: HashMap<BufferId, GpuBuffer>,
    next_id: u64,
    params_buffer: Option<wgpu::Buffer>,
    pipelines: Vec<(String, wgpu::ComputePipeline)>,
}

impl WgpuBackend {
    pub fn new(device_queue: Arc<wgpu::DeviceQueuePair>, shader_source: Option<String>) -> Self {
        Self {
            device_queue,
            shader_source,
            buffers: HashMap::new(),
            next_id: 1,
            params_buffer: None,
            pipelines: Vec::new(),
        }
    }

    pub fn has_program(&self) -> bool {
        self.shader_source.is_some()
    }

    // Swap in a new compute program; previously built kernels are dropped
    pub fn set_program(&mut self, shader_source: Option<String>) {
        self.shader_source = shader_source;
        self.pipelines.clear();
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    // Device buffer backing `id`, for the host renderer's indirect draws
    pub fn buffer(&self, id: BufferId) -> Option<&wgpu::Buffer> {
        self.buffers.get(&id).map(|b| &b.buffer)
    }

    fn ensure_params_buffer(&mut self) {
        let device = self.device_queue.device();
        self.params_buffer.get_or_insert_with(|| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("dispatchParams"),
                size: std::mem::size_of::<DispatchParams>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
    }
}

impl ComputeBackend for WgpuBackend {
    fn allocate(&mut self, desc: &BufferDesc) -> Result<BufferId, DeviceError> {
        let device = self.device_queue.device();
        let logical_size = desc.byte_size();
        // wgpu rejects zero-sized bindings
        let size = logical_size.max(desc.stride.max(4) as u64);
        let limit = device.limits().max_storage_buffer_binding_size as u64;
        if size > limit {
            return Err(DeviceError::AllocationFailed {
                label: desc.label.clone(),
                bytes: size,
            });
        }

        let usage = match desc.usage {
            BufferUsage::Storage => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Indirect => {
                wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST
            }
        };
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label.as_str()),
            size,
            usage,
            mapped_at_creation: false,
        });

        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(id, GpuBuffer { buffer, logical_size });
        debug!(label = %desc.label, bytes = size, "device buffer allocated");
        Ok(id)
    }

    fn upload(&mut self, buffer: BufferId, bytes: &[u8]) -> Result<(), DeviceError> {
        let target = self.buffers.get(&buffer).ok_or(DeviceError::UnknownBuffer(buffer.0))?;
        if target.logical_size != bytes.len() as u64 {
            return Err(DeviceError::UploadSizeMismatch {
                expected: target.logical_size,
                given: bytes.len() as u64,
            });
        }
        if !bytes.is_empty() {
            self.device_queue.queue().write_buffer(&target.buffer, 0, bytes);
        }
        Ok(())
    }

    fn release(&mut self, buffer: BufferId) {
        if let Some(gpu) = self.buffers.remove(&buffer) {
            gpu.buffer.destroy();
        }
    }

    fn load_kernel(&mut self, entry_point: &str) -> Result<KernelId, DeviceError> {
        if let Some(index) = self.pipelines.iter().position(|(name, _)| name == entry_point) {
            return Ok(KernelId(index as u32));
        }

        let source = self.shader_source.as_ref().ok_or(DeviceError::MissingProgram)?;
        if !declares_entry_point(source, entry_point) {
            return Err(DeviceError::MissingEntryPoint(entry_point.to_string()));
        }

        // Capture validation errors; the default handler panics
        let device = self.device_queue.device();
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(&wgpu::ShaderModuleDescriptor {
            label: Some("boidCompute"),
            source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry_point),
            layout: None,
            module: &module,
            entry_point,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            error!(entry_point, %err, "compute kernel rejected by the device");
            return Err(DeviceError::MissingEntryPoint(entry_point.to_string()));
        }

        info!(entry_point, "compute kernel loaded");
        self.pipelines.push((entry_point.to_string(), pipeline));
        Ok(KernelId((self.pipelines.len() - 1) as u32))
    }

    fn dispatch(
        &mut self,
        kernel: KernelId,
        bindings: &KernelBindings,
        params: &DispatchParams,
        workgroups: u32,
    ) -> Result<(), DeviceError> {
        for id in bindings.all() {
            if !self.buffers.contains_key(&id) {
                error!(buffer = id.0, "dispatch references a released buffer");
                return Err(DeviceError::UnknownBuffer(id.0));
            }
        }
        let params_bytes = bytemuck::bytes_of(params).to_vec();
        self.ensure_params_buffer();

        let (_, pipeline) = self
            .pipelines
            .get(kernel.0 as usize)
            .ok_or_else(|| DeviceError::Lost(format!("kernel {} was never loaded", kernel.0)))?;
        let params_buffer = self
            .params_buffer
            .as_ref()
            .ok_or_else(|| DeviceError::Lost("dispatch parameters buffer missing".to_string()))?;
        let device = self.device_queue.device();
        let queue = self.device_queue.queue();
        queue.write_buffer(params_buffer, 0, &params_bytes);

        let storage = bindings.all();
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: params_buffer.as_entire_binding(),
        }];
        for (slot, id) in storage.iter().enumerate() {
            let gpu = &self.buffers[id];
            entries.push(wgpu::BindGroupEntry {
                binding: slot as u32 + 1,
                resource: gpu.buffer.as_entire_binding(),
            });
        }
        let layout = pipeline.get_bind_group_layout(0);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("boidBindings"),
            layout: &layout,
            entries: &entries,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("boidStep"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("boidStep"),
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch(workgroups, 1, 1);
        }
        queue.submit(Some(encoder.finish()));
        Ok(())
    }
}

// True when `source` declares a function named exactly `entry_point`
fn declares_entry_point(source: &str, entry_point: &str) -> bool {
    if entry_point.is_empty() {
        return false;
    }
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    source.match_indices("fn").any(|(at, _)| {
        let before_ok = source[..at].chars().next_back().map_or(true, |c| !is_ident(c));
        let rest = &source[at + 2..];
        let name = rest.trim_start();
        if !before_ok || name.len() == rest.len() {
            return false;
        }
        match name.strip_prefix(entry_point) {
            Some(after) => !after.starts_with(is_ident),
            None => false,
        }
    })
}

/*
 * Compute Backend Module
 *
 * This module defines the seam between the swarm core and whatever runs
 * the compute kernel. The core only allocates, uploads, releases and
 * dispatches; shader logic is the backend's business.
 *
 * Two implementations ship with the crate:
 * - HeadlessBackend (here): keeps buffer bytes in memory, counts every
 *   operation and can inject faults. Used for tests and headless runs.
 * - WgpuBackend (gpu.rs): real device buffers on nannou's wgpu.
 */

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};

use crate::error::DeviceError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KernelId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    // Read/write structured data for the kernel
    Storage,
    // Indirect draw arguments
    Indirect,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BufferDesc {
    pub label: String,
    pub usage: BufferUsage,
    pub element_count: usize,
    pub stride: usize,
}

impl BufferDesc {
    pub fn storage<T: Pod>(label: impl Into<String>, element_count: usize) -> Self {
        Self {
            label: label.into(),
            usage: BufferUsage::Storage,
            element_count,
            stride: std::mem::size_of::<T>(),
        }
    }

    pub fn indirect<T: Pod>(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            usage: BufferUsage::Indirect,
            element_count: 1,
            stride: std::mem::size_of::<T>(),
        }
    }

    pub fn byte_size(&self) -> u64 {
        (self.element_count * self.stride) as u64
    }
}

// Buffers bound to the kernel, by role
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelBindings {
    pub boids: BufferId,
    pub swarms: BufferId,
    pub instances: BufferId,
    pub triangles: BufferId,
    pub attractors: BufferId,
}

impl KernelBindings {
    pub fn all(&self) -> [BufferId; 5] {
        [self.boids, self.swarms, self.instances, self.triangles, self.attractors]
    }
}

// Per-tick scalars uploaded as the kernel's uniform block (48 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DispatchParams {
    pub manager_position: [f32; 3],
    pub delta_time: f32,
    pub bounds_size: [f32; 3],
    pub boid_count: u32,
    pub swarm_count: u32,
    pub triangle_count: u32,
    pub food_attractor_count: u32,
    pub _padding: u32,
}

pub trait ComputeBackend {
    fn allocate(&mut self, desc: &BufferDesc) -> Result<BufferId, DeviceError>;

    // Replace the whole contents of a buffer
    fn upload(&mut self, buffer: BufferId, bytes: &[u8]) -> Result<(), DeviceError>;

    // Releasing an unknown or already released buffer is a no-op
    fn release(&mut self, buffer: BufferId);

    fn load_kernel(&mut self, entry_point: &str) -> Result<KernelId, DeviceError>;

    fn dispatch(
        &mut self,
        kernel: KernelId,
        bindings: &KernelBindings,
        params: &DispatchParams,
        workgroups: u32,
    ) -> Result<(), DeviceError>;
}

impl<B: ComputeBackend + ?Sized> ComputeBackend for Box<B> {
    fn allocate(&mut self, desc: &BufferDesc) -> Result<BufferId, DeviceError> {
        (**self).allocate(desc)
    }

    fn upload(&mut self, buffer: BufferId, bytes: &[u8]) -> Result<(), DeviceError> {
        (**self).upload(buffer, bytes)
    }

    fn release(&mut self, buffer: BufferId) {
        (**self).release(buffer)
    }

    fn load_kernel(&mut self, entry_point: &str) -> Result<KernelId, DeviceError> {
        (**self).load_kernel(entry_point)
    }

    fn dispatch(
        &mut self,
        kernel: KernelId,
        bindings: &KernelBindings,
        params: &DispatchParams,
        workgroups: u32,
    ) -> Result<(), DeviceError> {
        (**self).dispatch(kernel, bindings, params, workgroups)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub allocations: usize,
    pub releases: usize,
    pub uploads: usize,
    pub dispatches: usize,
}

#[derive(Clone, Debug)]
struct HeadlessBuffer {
    desc: BufferDesc,
    bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DispatchRecord {
    pub kernel: KernelId,
    pub bindings: KernelBindings,
    pub params: DispatchParams,
    pub workgroups: u32,
}

#[derive(Clone, Debug)]
pub struct HeadlessBackend {
    // None models a missing compute program
    entry_points: Option<Vec<String>>,
    buffers: HashMap<BufferId, HeadlessBuffer>,
    next_id: u64,
    failing_allocations: usize,
    stats: BackendStats,
    last_dispatch: Option<DispatchRecord>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(&["main"])
    }
}

impl HeadlessBackend {
    pub fn new(entry_points: &[&str]) -> Self {
        Self {
            entry_points: Some(entry_points.iter().map(|e| e.to_string()).collect()),
            buffers: HashMap::new(),
            next_id: 1,
            failing_allocations: 0,
            stats: BackendStats::default(),
            last_dispatch: None,
        }
    }

    pub fn without_program() -> Self {
        Self {
            entry_points: None,
            ..Self::new(&[])
        }
    }

    // Make the next `count` allocations fail
    pub fn fail_next_allocations(&mut self, count: usize) {
        self.failing_allocations = count;
    }

    pub fn install_program(&mut self, entry_points: &[&str]) {
        self.entry_points = Some(entry_points.iter().map(|e| e.to_string()).collect());
    }

    pub fn stats(&self) -> BackendStats {
        self.stats
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_live(&self, buffer: BufferId) -> bool {
        self.buffers.contains_key(&buffer)
    }

    pub fn desc(&self, buffer: BufferId) -> Option<&BufferDesc> {
        self.buffers.get(&buffer).map(|b| &b.desc)
    }

    pub fn bytes(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.bytes.as_slice())
    }

    // Decode a buffer's contents as records of `T`
    pub fn read<T: Pod>(&self, buffer: BufferId) -> Option<Vec<T>> {
        let bytes = self.bytes(buffer)?;
        Some(
            bytes
                .chunks_exact(std::mem::size_of::<T>())
                .map(bytemuck::pod_read_unaligned)
                .collect(),
        )
    }

    pub fn last_dispatch(&self) -> Option<&DispatchRecord> {
        self.last_dispatch.as_ref()
    }
}

impl ComputeBackend for HeadlessBackend {
    fn allocate(&mut self, desc: &BufferDesc) -> Result<BufferId, DeviceError> {
        if self.failing_allocations > 0 {
            self.failing_allocations -= 1;
            return Err(DeviceError::AllocationFailed {
                label: desc.label.clone(),
                bytes: desc.byte_size(),
            });
        }

        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(
            id,
            HeadlessBuffer {
                desc: desc.clone(),
                bytes: vec![0; desc.byte_size() as usize],
            },
        );
        self.stats.allocations += 1;
        Ok(id)
    }

    fn upload(&mut self, buffer: BufferId, bytes: &[u8]) -> Result<(), DeviceError> {
        let target = self.buffers.get_mut(&buffer).ok_or(DeviceError::UnknownBuffer(buffer.0))?;
        if target.bytes.len() != bytes.len() {
            return Err(DeviceError::UploadSizeMismatch {
                expected: target.bytes.len() as u64,
                given: bytes.len() as u64,
            });
        }
        target.bytes.copy_from_slice(bytes);
        self.stats.uploads += 1;
        Ok(())
    }

    fn release(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer).is_some() {
            self.stats.releases += 1;
        }
    }

    fn load_kernel(&mut self, entry_point: &str) -> Result<KernelId, DeviceError> {
        let entry_points = self.entry_points.as_ref().ok_or(DeviceError::MissingProgram)?;
        entry_points
            .iter()
            .position(|e| e == entry_point)
            .map(|i| KernelId(i as u32))
            .ok_or_else(|| DeviceError::MissingEntryPoint(entry_point.to_string()))
    }

    fn dispatch(
        &mut self,
        kernel: KernelId,
        bindings: &KernelBindings,
        params: &DispatchParams,
        workgroups: u32,
    ) -> Result<(), DeviceError> {
        if let Some(missing) = bindings.all().into_iter().find(|b| !self.buffers.contains_key(b)) {
            return Err(DeviceError::UnknownBuffer(missing.0));
        }
        self.stats.dispatches += 1;
        self.last_dispatch = Some(DispatchRecord {
            kernel,
            bindings: *bindings,
            params: *params,
            workgroups,
        });
        Ok(())
    }
}

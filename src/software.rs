//! Host-memory emulation of a ray-tracing capable GPU.
//!
//! Every object lives in plain host memory behind synthetic device addresses. Submissions execute
//! immediately and record what they did, so the whole packaging pipeline can be inspected without a
//! GPU. Completion handlers are held back until [`Driver::poll`] or [`Driver::wait`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::acceleration_structure::InstanceDescriptor;
use crate::driver::*;
use crate::error::DriverError;

const ADDRESS_BASE: u64 = 0x1_0000_0000;
const BUFFER_ALIGNMENT: u64 = 256;
const TEXTURE_ALIGNMENT: u64 = 4096;
const HEAP_ALIGNMENT: u64 = 64 * 1024;

/// What a finished acceleration-structure build consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRecord {
    pub level: AccelerationStructureLevel,
    pub geometry_count: usize,
    pub primitive_count: u64,
    pub instances: Vec<InstanceDescriptor>,
    pub structures: Vec<u64>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub kernel: u64,
    pub arguments: DeviceAddress,
    pub threadgroups: [u32; 3],
    pub threads_per_group: [u32; 3],
}

struct SoftBuffer {
    label: String,
    address: DeviceAddress,
    location: MemoryLocation,
    data: Vec<u8>,
    heap: Option<u64>,
}

struct SoftTexture {
    label: String,
    descriptor: TextureDescriptor,
    data: Vec<u8>,
    heap: Option<u64>,
}

struct SoftHeap {
    label: String,
    capacity: u64,
    base_address: DeviceAddress,
    placed: usize,
}

struct SoftStructure {
    label: String,
    size: u64,
    device_address: DeviceAddress,
    level: AccelerationStructureLevel,
    build: Option<BuildRecord>,
}

struct Submission {
    label: String,
    handler: Option<CompletionHandler>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    next_address: u64,
    buffers: HashMap<u64, SoftBuffer>,
    addresses: BTreeMap<DeviceAddress, u64>,
    textures: HashMap<u64, SoftTexture>,
    heaps: HashMap<u64, SoftHeap>,
    structures: HashMap<u64, SoftStructure>,
    kernels: HashMap<u64, String>,
    next_submission: u64,
    submissions: BTreeMap<SubmissionId, Submission>,
    allocation_count: u64,
    live_bytes: u64,
    memory_limit: Option<u64>,
    failing_labels: Vec<String>,
    usage_log: Vec<(RawResource, ResourceUsage)>,
    dispatches: Vec<DispatchRecord>,
}

impl State {
    fn new() -> Self {
        Self {
            next_id: 1,
            next_address: ADDRESS_BASE,
            next_submission: 1,
            ..Default::default()
        }
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn reserve_address(&mut self, size: u64, align: u64) -> DeviceAddress {
        let address = align_up(self.next_address, align);
        self.next_address = address + size.max(1);
        address
    }

    fn charge(&mut self, label: &str, size: u64) -> Result<(), DriverError> {
        let refused = self
            .failing_labels
            .iter()
            .any(|pattern| label.contains(pattern.as_str()));
        let over_limit = self
            .memory_limit
            .map_or(false, |limit| self.live_bytes + size > limit);
        if refused || over_limit {
            log::debug!("refusing {} bytes for {}", size, label);
            return Err(DriverError::OutOfMemory {
                label: label.to_owned(),
                size,
            });
        }
        self.allocation_count += 1;
        self.live_bytes += size;
        Ok(())
    }

    fn release(&mut self, size: u64) {
        self.live_bytes = self.live_bytes.saturating_sub(size);
    }

    fn insert_buffer(&mut self, buffer: SoftBuffer) -> RawBuffer {
        let id = self.next_id();
        let raw = RawBuffer {
            id,
            device_address: buffer.address,
            size: buffer.data.len() as u64,
        };
        if !buffer.data.is_empty() {
            self.addresses.insert(buffer.address, id);
        }
        self.buffers.insert(id, buffer);
        raw
    }

    fn buffer(&self, id: u64) -> Result<&SoftBuffer, DriverError> {
        self.buffers.get(&id).ok_or(DriverError::InvalidHandle { kind: "buffer", id })
    }

    fn buffer_mut(&mut self, id: u64) -> Result<&mut SoftBuffer, DriverError> {
        self.buffers
            .get_mut(&id)
            .ok_or(DriverError::InvalidHandle { kind: "buffer", id })
    }

    fn texture(&self, id: u64) -> Result<&SoftTexture, DriverError> {
        self.textures
            .get(&id)
            .ok_or(DriverError::InvalidHandle { kind: "texture", id })
    }

    fn heap(&self, id: u64) -> Result<&SoftHeap, DriverError> {
        self.heaps.get(&id).ok_or(DriverError::InvalidHandle { kind: "heap", id })
    }

    /// Finds the buffer backing `[address, address + len)`.
    fn resolve(&self, address: DeviceAddress, len: u64) -> Result<(u64, u64), DriverError> {
        let (start, id) = self
            .addresses
            .range(..=address)
            .next_back()
            .ok_or(DriverError::UnmappedAddress { address })?;
        let buffer = self.buffer(*id)?;
        let offset = address - start;
        if offset + len > buffer.data.len() as u64 {
            return Err(DriverError::UnmappedAddress { address });
        }
        Ok((*id, offset))
    }

    fn execute(&mut self, command: Command) -> Result<(), DriverError> {
        match command {
            Command::BuildAccelerationStructure {
                destination,
                descriptor,
                scratch,
            } => self.build(destination, descriptor, scratch),
            Command::CopyBuffer {
                source,
                destination,
                size,
            } => {
                let data = {
                    let source = self.buffer(source)?;
                    if size > source.data.len() as u64 {
                        return Err(DriverError::InvalidCommand(format!(
                            "copy of {} bytes out of {}",
                            size, source.label
                        )));
                    }
                    source.data[..size as usize].to_vec()
                };
                let destination = self.buffer_mut(destination)?;
                if size > destination.data.len() as u64 {
                    return Err(DriverError::InvalidCommand(format!(
                        "copy of {} bytes into {}",
                        size, destination.label
                    )));
                }
                destination.data[..size as usize].copy_from_slice(&data);
                Ok(())
            }
            Command::CopyTexture {
                source,
                destination,
            } => {
                let (descriptor, data) = {
                    let source = self.texture(source)?;
                    (source.descriptor.clone(), source.data.clone())
                };
                let destination = self
                    .textures
                    .get_mut(&destination)
                    .ok_or(DriverError::InvalidHandle {
                        kind: "texture",
                        id: destination,
                    })?;
                if destination.descriptor.format != descriptor.format
                    || destination.descriptor.byte_size() != descriptor.byte_size()
                {
                    return Err(DriverError::InvalidCommand(format!(
                        "texture copy into incompatible {}",
                        destination.label
                    )));
                }
                destination.data = data;
                Ok(())
            }
            Command::UseResource { resource, usage } => {
                let known = match resource {
                    RawResource::Buffer(id) => self.buffers.contains_key(&id),
                    RawResource::Texture(id) => self.textures.contains_key(&id),
                    RawResource::AccelerationStructure(id) => self.structures.contains_key(&id),
                    RawResource::Heap(id) => self.heaps.contains_key(&id),
                };
                if !known {
                    return Err(DriverError::InvalidCommand(format!(
                        "use of unknown resource {:?}",
                        resource
                    )));
                }
                self.usage_log.push((resource, usage));
                Ok(())
            }
            Command::Dispatch {
                kernel,
                arguments,
                threadgroups,
                threads_per_group,
            } => {
                if !self.kernels.contains_key(&kernel) {
                    return Err(DriverError::InvalidHandle {
                        kind: "kernel",
                        id: kernel,
                    });
                }
                self.resolve(arguments, 1)?;
                self.dispatches.push(DispatchRecord {
                    kernel,
                    arguments,
                    threadgroups,
                    threads_per_group,
                });
                Ok(())
            }
        }
    }

    fn build(
        &mut self,
        destination: u64,
        descriptor: AccelerationStructureDescriptor,
        scratch: u64,
    ) -> Result<(), DriverError> {
        let sizes = build_sizes(&descriptor);
        let scratch = self.buffer(scratch)?;
        if (scratch.data.len() as u64) < sizes.build_scratch_size {
            return Err(DriverError::InvalidCommand(format!(
                "{} is smaller than {} bytes",
                scratch.label, sizes.build_scratch_size
            )));
        }

        let record = match &descriptor {
            AccelerationStructureDescriptor::Primitive { geometries } => {
                for geometry in geometries {
                    let vertex_bytes = geometry.vertex_stride * geometry.vertex_count as u64;
                    self.resolve(geometry.vertex_buffer, vertex_bytes)?;
                    let index_bytes =
                        geometry.index_type.size() * geometry.triangle_count as u64 * 3;
                    self.resolve(geometry.index_buffer, index_bytes)?;
                    let data_bytes =
                        geometry.primitive_data_stride * geometry.triangle_count as u64;
                    self.resolve(geometry.primitive_data_buffer, data_bytes)?;
                }
                BuildRecord {
                    level: AccelerationStructureLevel::Bottom,
                    geometry_count: geometries.len(),
                    primitive_count: descriptor.primitive_count(),
                    instances: Vec::new(),
                    structures: Vec::new(),
                }
            }
            AccelerationStructureDescriptor::Instance {
                instance_buffer,
                instances,
                structures,
            } => {
                let bytes: &[u8] = bytemuck::cast_slice(instances);
                if !bytes.is_empty() {
                    let (id, offset) = self.resolve(*instance_buffer, bytes.len() as u64)?;
                    let stored = &self.buffer(id)?.data[offset as usize..][..bytes.len()];
                    if stored != bytes {
                        return Err(DriverError::InvalidCommand(
                            "instance buffer does not match its descriptors".to_owned(),
                        ));
                    }
                }
                for instance in instances {
                    let structure = structures
                        .get(instance.acceleration_structure_index as usize)
                        .and_then(|id| self.structures.get(id))
                        .ok_or_else(|| {
                            DriverError::InvalidCommand(format!(
                                "instance references structure {}",
                                instance.acceleration_structure_index
                            ))
                        })?;
                    if structure.build.is_none() {
                        return Err(DriverError::InvalidCommand(format!(
                            "{} is referenced before it was built",
                            structure.label
                        )));
                    }
                }
                BuildRecord {
                    level: AccelerationStructureLevel::Top,
                    geometry_count: 1,
                    primitive_count: instances.len() as u64,
                    instances: instances.clone(),
                    structures: structures.clone(),
                }
            }
        };

        let structure = self
            .structures
            .get_mut(&destination)
            .ok_or(DriverError::InvalidHandle {
                kind: "acceleration structure",
                id: destination,
            })?;
        if structure.level != record.level || structure.size < sizes.acceleration_structure_size {
            return Err(DriverError::InvalidCommand(format!(
                "{} cannot hold this build",
                structure.label
            )));
        }
        log::trace!(
            "built {} with {} primitives",
            structure.label,
            record.primitive_count
        );
        structure.build = Some(record);
        Ok(())
    }
}

fn build_sizes(descriptor: &AccelerationStructureDescriptor) -> BuildSizes {
    let (size, scratch) = match descriptor {
        AccelerationStructureDescriptor::Primitive { geometries } => {
            let triangles = descriptor.primitive_count();
            (
                256 + geometries.len() as u64 * 64 + triangles * 64,
                128 + triangles * 32,
            )
        }
        AccelerationStructureDescriptor::Instance { instances, .. } => {
            let count = instances.len() as u64;
            (256 + count * 128, 128 + count * 64)
        }
    };
    BuildSizes {
        acceleration_structure_size: align_up(size, BUFFER_ALIGNMENT),
        build_scratch_size: align_up(scratch, BUFFER_ALIGNMENT),
    }
}

pub struct SoftwareDriver {
    name: String,
    state: Mutex<State>,
}

impl SoftwareDriver {
    pub fn new() -> Self {
        Self {
            name: "software".to_owned(),
            state: Mutex::new(State::new()),
        }
    }

    /// Refuses any allocation that would bring live memory above `bytes`.
    pub fn with_memory_limit(self, bytes: u64) -> Self {
        self.state().memory_limit = Some(bytes);
        self
    }

    /// Refuses every later allocation whose label contains `pattern`.
    pub fn fail_allocations_containing(&self, pattern: &str) {
        self.state().failing_labels.push(pattern.to_owned());
    }

    pub fn allocation_count(&self) -> u64 {
        self.state().allocation_count
    }

    pub fn live_bytes(&self) -> u64 {
        self.state().live_bytes
    }

    pub fn build_record(&self, structure: u64) -> Option<BuildRecord> {
        self.state()
            .structures
            .get(&structure)
            .and_then(|s| s.build.clone())
    }

    pub fn buffer_label(&self, buffer: u64) -> Option<String> {
        self.state().buffers.get(&buffer).map(|b| b.label.clone())
    }

    pub fn texture_data(&self, texture: u64) -> Option<Vec<u8>> {
        self.state().textures.get(&texture).map(|t| t.data.clone())
    }

    /// Every resource marked as used since the last [`clear_logs`](Self::clear_logs).
    pub fn resource_usage(&self) -> Vec<(RawResource, ResourceUsage)> {
        self.state().usage_log.clone()
    }

    pub fn dispatches(&self) -> Vec<DispatchRecord> {
        self.state().dispatches.clone()
    }

    pub fn pending_submissions(&self) -> usize {
        self.state()
            .submissions
            .values()
            .filter(|s| s.handler.is_some())
            .count()
    }

    pub fn clear_logs(&self) {
        let mut state = self.state();
        state.usage_log.clear();
        state.dispatches.clear();
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, submissions: impl Fn(&SubmissionId) -> bool) {
        let handlers = {
            let mut state = self.state();
            let finished = state
                .submissions
                .keys()
                .copied()
                .filter(|id| submissions(id))
                .collect::<Vec<_>>();
            finished
                .into_iter()
                .filter_map(|id| state.submissions.remove(&id))
                .filter_map(|submission| {
                    log::trace!("completed {}", submission.label);
                    submission.handler
                })
                .collect::<Vec<_>>()
        };
        for handler in handlers {
            handler();
        }
    }
}

impl Default for SoftwareDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for SoftwareDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_buffer(
        &self,
        label: &str,
        size: u64,
        location: MemoryLocation,
    ) -> Result<RawBuffer, DriverError> {
        let mut state = self.state();
        state.charge(label, size)?;
        let address = state.reserve_address(size, BUFFER_ALIGNMENT);
        Ok(state.insert_buffer(SoftBuffer {
            label: label.to_owned(),
            address,
            location,
            data: vec![0; size as usize],
            heap: None,
        }))
    }

    fn write_buffer(&self, buffer: u64, offset: u64, data: &[u8]) -> Result<(), DriverError> {
        let mut state = self.state();
        let buffer = state.buffer_mut(buffer)?;
        if !buffer.location.is_host_visible() {
            return Err(DriverError::NotHostVisible {
                label: buffer.label.clone(),
            });
        }
        let end = offset + data.len() as u64;
        if end > buffer.data.len() as u64 {
            return Err(DriverError::OutOfBounds {
                label: buffer.label.clone(),
                offset,
                len: data.len() as u64,
                size: buffer.data.len() as u64,
            });
        }
        buffer.data[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn read_memory(&self, address: DeviceAddress, len: u64) -> Result<Vec<u8>, DriverError> {
        let state = self.state();
        let (id, offset) = state.resolve(address, len)?;
        Ok(state.buffer(id)?.data[offset as usize..(offset + len) as usize].to_vec())
    }

    fn destroy_buffer(&self, buffer: u64) {
        let mut state = self.state();
        if let Some(removed) = state.buffers.remove(&buffer) {
            if state.addresses.get(&removed.address) == Some(&buffer) {
                state.addresses.remove(&removed.address);
            }
            if removed.heap.is_none() {
                state.release(removed.data.len() as u64);
            }
        }
    }

    fn create_texture(
        &self,
        label: &str,
        descriptor: &TextureDescriptor,
        _location: MemoryLocation,
    ) -> Result<RawTexture, DriverError> {
        let mut state = self.state();
        state.charge(label, descriptor.byte_size())?;
        let id = state.next_id();
        state.textures.insert(
            id,
            SoftTexture {
                label: label.to_owned(),
                descriptor: descriptor.clone(),
                data: vec![0; descriptor.byte_size() as usize],
                heap: None,
            },
        );
        Ok(RawTexture {
            id,
            resource_id: ResourceId(id),
        })
    }

    fn write_texture(&self, texture: u64, data: &[u8]) -> Result<(), DriverError> {
        let mut state = self.state();
        let texture = state
            .textures
            .get_mut(&texture)
            .ok_or(DriverError::InvalidHandle {
                kind: "texture",
                id: texture,
            })?;
        if data.len() != texture.data.len() {
            return Err(DriverError::OutOfBounds {
                label: texture.label.clone(),
                offset: 0,
                len: data.len() as u64,
                size: texture.data.len() as u64,
            });
        }
        texture.data.copy_from_slice(data);
        Ok(())
    }

    fn destroy_texture(&self, texture: u64) {
        let mut state = self.state();
        if let Some(removed) = state.textures.remove(&texture) {
            if removed.heap.is_none() {
                state.release(removed.descriptor.byte_size());
            }
        }
    }

    fn buffer_heap_footprint(&self, size: u64) -> Result<Footprint, DriverError> {
        Ok(Footprint {
            size,
            align: BUFFER_ALIGNMENT,
        })
    }

    fn texture_heap_footprint(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<Footprint, DriverError> {
        Ok(Footprint {
            size: align_up(descriptor.byte_size(), BUFFER_ALIGNMENT),
            align: TEXTURE_ALIGNMENT,
        })
    }

    fn create_heap(&self, label: &str, size: u64) -> Result<u64, DriverError> {
        let mut state = self.state();
        state.charge(label, size)?;
        let base_address = state.reserve_address(size, HEAP_ALIGNMENT);
        let id = state.next_id();
        state.heaps.insert(
            id,
            SoftHeap {
                label: label.to_owned(),
                capacity: size,
                base_address,
                placed: 0,
            },
        );
        Ok(id)
    }

    fn create_buffer_on_heap(
        &self,
        heap: u64,
        offset: u64,
        size: u64,
        label: &str,
    ) -> Result<RawBuffer, DriverError> {
        let mut state = self.state();
        let (address, capacity, heap_label) = {
            let heap = state.heap(heap)?;
            (heap.base_address + offset, heap.capacity, heap.label.clone())
        };
        if offset + size > capacity {
            return Err(DriverError::OutOfBounds {
                label: heap_label,
                offset,
                len: size,
                size: capacity,
            });
        }
        if let Some(heap) = state.heaps.get_mut(&heap) {
            heap.placed += 1;
        }
        Ok(state.insert_buffer(SoftBuffer {
            label: label.to_owned(),
            address,
            location: MemoryLocation::GpuOnly,
            data: vec![0; size as usize],
            heap: Some(heap),
        }))
    }

    fn create_texture_on_heap(
        &self,
        heap: u64,
        offset: u64,
        descriptor: &TextureDescriptor,
        label: &str,
    ) -> Result<RawTexture, DriverError> {
        let mut state = self.state();
        let (capacity, heap_label) = {
            let heap = state.heap(heap)?;
            (heap.capacity, heap.label.clone())
        };
        if offset + descriptor.byte_size() > capacity {
            return Err(DriverError::OutOfBounds {
                label: heap_label,
                offset,
                len: descriptor.byte_size(),
                size: capacity,
            });
        }
        if let Some(heap) = state.heaps.get_mut(&heap) {
            heap.placed += 1;
        }
        let id = state.next_id();
        state.textures.insert(
            id,
            SoftTexture {
                label: label.to_owned(),
                descriptor: descriptor.clone(),
                data: vec![0; descriptor.byte_size() as usize],
                heap: Some(heap),
            },
        );
        Ok(RawTexture {
            id,
            resource_id: ResourceId(id),
        })
    }

    fn destroy_heap(&self, heap: u64) {
        let mut state = self.state();
        if let Some(removed) = state.heaps.remove(&heap) {
            log::trace!("destroyed {} ({} placements)", removed.label, removed.placed);
            state.release(removed.capacity);
        }
    }

    fn acceleration_structure_sizes(
        &self,
        descriptor: &AccelerationStructureDescriptor,
    ) -> Result<BuildSizes, DriverError> {
        Ok(build_sizes(descriptor))
    }

    fn create_acceleration_structure(
        &self,
        label: &str,
        level: AccelerationStructureLevel,
        size: u64,
    ) -> Result<RawAccelerationStructure, DriverError> {
        let mut state = self.state();
        state.charge(label, size)?;
        let device_address = state.reserve_address(size, BUFFER_ALIGNMENT);
        let id = state.next_id();
        state.structures.insert(
            id,
            SoftStructure {
                label: label.to_owned(),
                size,
                device_address,
                level,
                build: None,
            },
        );
        Ok(RawAccelerationStructure {
            id,
            device_address,
            resource_id: ResourceId(id),
        })
    }

    fn destroy_acceleration_structure(&self, structure: u64) {
        let mut state = self.state();
        if let Some(removed) = state.structures.remove(&structure) {
            log::trace!(
                "destroyed {} at {:#x}",
                removed.label,
                removed.device_address
            );
            state.release(removed.size);
        }
    }

    fn create_kernel(&self, label: &str, code: &[u8]) -> Result<u64, DriverError> {
        let mut state = self.state();
        let id = state.next_id();
        log::trace!("loaded kernel {} ({} bytes)", label, code.len());
        state.kernels.insert(id, label.to_owned());
        Ok(id)
    }

    fn destroy_kernel(&self, kernel: u64) {
        self.state().kernels.remove(&kernel);
    }

    fn submit(
        &self,
        label: &str,
        commands: Vec<Command>,
        on_completed: Option<CompletionHandler>,
    ) -> Result<SubmissionId, DriverError> {
        let mut state = self.state();
        log::trace!("executing {} ({} commands)", label, commands.len());
        for command in commands {
            state.execute(command)?;
        }
        let id = state.next_submission;
        state.next_submission += 1;
        state.submissions.insert(
            id,
            Submission {
                label: label.to_owned(),
                handler: on_completed,
            },
        );
        Ok(id)
    }

    fn is_complete(&self, submission: SubmissionId) -> Result<bool, DriverError> {
        let state = self.state();
        if submission == 0 || submission >= state.next_submission {
            return Err(DriverError::UnknownSubmission(submission));
        }
        Ok(true)
    }

    fn wait(&self, submission: SubmissionId) -> Result<(), DriverError> {
        self.is_complete(submission)?;
        self.finish(|id| *id == submission);
        Ok(())
    }

    fn poll(&self) -> Result<(), DriverError> {
        self.finish(|_| true);
        Ok(())
    }
}

#[test]
fn test_buffer_addresses_resolve() {
    let driver = SoftwareDriver::new();
    let a = driver
        .create_buffer("a", 16, MemoryLocation::CpuToGpu)
        .unwrap();
    let b = driver
        .create_buffer("b", 8, MemoryLocation::CpuToGpu)
        .unwrap();
    assert_ne!(a.device_address, b.device_address);
    assert_eq!(a.device_address % BUFFER_ALIGNMENT, 0);

    driver.write_buffer(b.id, 4, &[1, 2, 3, 4]).unwrap();
    assert_eq!(
        driver.read_memory(b.device_address + 4, 4).unwrap(),
        vec![1, 2, 3, 4]
    );
    assert!(driver.read_memory(b.device_address + 4, 8).is_err());
    assert_eq!(driver.live_bytes(), 24);
    driver.destroy_buffer(a.id);
    assert_eq!(driver.live_bytes(), 8);
    assert!(driver.read_memory(a.device_address, 1).is_err());
}

#[test]
fn test_gpu_only_buffer_rejects_host_writes() {
    let driver = SoftwareDriver::new();
    let buffer = driver
        .create_buffer("private", 4, MemoryLocation::GpuOnly)
        .unwrap();
    assert!(matches!(
        driver.write_buffer(buffer.id, 0, &[0; 4]),
        Err(DriverError::NotHostVisible { .. })
    ));
}

#[test]
fn test_allocation_failure_injection() {
    let driver = SoftwareDriver::new().with_memory_limit(100);
    assert!(driver
        .create_buffer("small", 64, MemoryLocation::GpuOnly)
        .is_ok());
    assert!(matches!(
        driver.create_buffer("large", 64, MemoryLocation::GpuOnly),
        Err(DriverError::OutOfMemory { size: 64, .. })
    ));
    driver.fail_allocations_containing("scratch");
    assert!(driver
        .create_buffer("mesh scratch buffer", 1, MemoryLocation::GpuOnly)
        .is_err());
    assert_eq!(driver.allocation_count(), 1);
}

#[test]
fn test_completion_handlers_run_on_poll() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let driver = SoftwareDriver::new();
    let done = Arc::new(AtomicBool::new(false));
    let flag = done.clone();
    let submission = driver
        .submit(
            "empty",
            Vec::new(),
            Some(Box::new(move || flag.store(true, Ordering::SeqCst))),
        )
        .unwrap();
    assert!(driver.is_complete(submission).unwrap());
    assert!(!done.load(Ordering::SeqCst));
    assert_eq!(driver.pending_submissions(), 1);
    driver.poll().unwrap();
    assert!(done.load(Ordering::SeqCst));
    assert_eq!(driver.pending_submissions(), 0);
}

//! Where resolved records and resources end up.
//!
//! [`Measure`], [`HeapPlacement`] and [`StagingPlacement`] are driven by the same traversal, so the
//! size a heap is allocated with always covers what is later placed into it.

use std::collections::{HashMap, HashSet};

use crate::acceleration_structure::AccelerationStructure;
use crate::command_recorder::CommandRecorder;
use crate::driver::{DeviceAddress, Footprint, MemoryLocation, ResourceId, ResourceUsage};
use crate::error::PackagingError;
use crate::resource_pool::ResourcePool;
use crate::{Buffer, Device, Heap, Texture};

pub(crate) trait Placement {
    /// Resolves a texture that belongs to this packaging pass.
    fn texture(
        &mut self,
        texture: &Texture,
        label: &str,
        usage: ResourceUsage,
    ) -> Result<ResourceId, PackagingError>;

    /// Resolves a texture that is used where it lives.
    fn texture_in_place(&mut self, texture: &Texture, usage: ResourceUsage) -> ResourceId;

    /// Resolves a buffer that belongs to this packaging pass.
    fn buffer(&mut self, buffer: &Buffer, label: &str) -> Result<DeviceAddress, PackagingError>;

    fn acceleration_structure(&mut self, structure: &AccelerationStructure) -> DeviceAddress;

    /// Writes one record, or an array of them. Empty arrays resolve to address zero.
    fn view(&mut self, bytes: &[u8], label: &str) -> Result<DeviceAddress, PackagingError>;

    /// Resolves a record kept in `pool` under `label`. With `rewrite` the pooled buffer receives
    /// `bytes` on every call; otherwise only when it is first built.
    fn pooled_view(
        &mut self,
        pool: &mut ResourcePool,
        label: &str,
        bytes: &[u8],
        rewrite: bool,
    ) -> Result<DeviceAddress, PackagingError>;
}

/// Sums heap footprints instead of placing anything.
pub(crate) struct Measure {
    device: Device,
    cursor: u64,
    textures: HashSet<u64>,
    buffers: HashSet<u64>,
}

impl Measure {
    pub(crate) fn new(device: &Device) -> Self {
        Self {
            device: device.clone(),
            cursor: 0,
            textures: HashSet::new(),
            buffers: HashSet::new(),
        }
    }

    pub(crate) fn size(&self) -> u64 {
        self.cursor
    }

    fn add(&mut self, footprint: Footprint, label: &str) {
        self.cursor = footprint.end_after(self.cursor);
        log::trace!("measured {} ({} bytes) up to {}", label, footprint.size, self.cursor);
    }
}

impl Placement for Measure {
    fn texture(
        &mut self,
        texture: &Texture,
        label: &str,
        _usage: ResourceUsage,
    ) -> Result<ResourceId, PackagingError> {
        if self.textures.insert(texture.raw_id()) {
            let footprint = self
                .device
                .driver()
                .texture_heap_footprint(texture.descriptor())?;
            self.add(footprint, label);
        }
        Ok(ResourceId::NULL)
    }

    fn texture_in_place(&mut self, _texture: &Texture, _usage: ResourceUsage) -> ResourceId {
        ResourceId::NULL
    }

    fn buffer(&mut self, buffer: &Buffer, label: &str) -> Result<DeviceAddress, PackagingError> {
        if buffer.size() > 0 && self.buffers.insert(buffer.raw_id()) {
            let footprint = self.device.driver().buffer_heap_footprint(buffer.size())?;
            self.add(footprint, label);
        }
        Ok(0)
    }

    fn acceleration_structure(&mut self, _structure: &AccelerationStructure) -> DeviceAddress {
        0
    }

    fn view(&mut self, bytes: &[u8], label: &str) -> Result<DeviceAddress, PackagingError> {
        if !bytes.is_empty() {
            let footprint = self
                .device
                .driver()
                .buffer_heap_footprint(bytes.len() as u64)?;
            self.add(footprint, label);
        }
        Ok(0)
    }

    fn pooled_view(
        &mut self,
        _pool: &mut ResourcePool,
        _label: &str,
        _bytes: &[u8],
        _rewrite: bool,
    ) -> Result<DeviceAddress, PackagingError> {
        Ok(0)
    }
}

fn pooled_buffer(
    recorder: &mut CommandRecorder,
    pool: &mut ResourcePool,
    label: &str,
    bytes: &[u8],
    rewrite: bool,
) -> Result<DeviceAddress, PackagingError> {
    let device = recorder.device().clone();
    let mut built = false;
    let buffer = pool.take_or_build(label, || {
        built = true;
        device
            .create_buffer_init(Some(label), bytes, MemoryLocation::CpuToGpu)
            .map_err(|source| PackagingError::BufferAllocationFailed {
                label: label.to_owned(),
                source,
            })
    })?;
    if rewrite && !built {
        buffer.copy_from(bytes)?;
    }
    recorder.use_buffer(&buffer, ResourceUsage::Read);
    Ok(buffer.device_address())
}

/// Copies everything that belongs to the pass into one heap.
pub(crate) struct HeapPlacement<'r, 'c> {
    heap: Heap,
    recorder: &'r mut CommandRecorder<'c>,
    textures: HashMap<u64, ResourceId>,
    buffers: HashMap<u64, DeviceAddress>,
    pub(crate) placed_buffers: Vec<Buffer>,
    pub(crate) placed_textures: Vec<Texture>,
}

impl<'r, 'c> HeapPlacement<'r, 'c> {
    pub(crate) fn new(heap: &Heap, recorder: &'r mut CommandRecorder<'c>) -> Self {
        Self {
            heap: heap.clone(),
            recorder,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            placed_buffers: Vec::new(),
            placed_textures: Vec::new(),
        }
    }
}

impl<'r, 'c> Placement for HeapPlacement<'r, 'c> {
    fn texture(
        &mut self,
        texture: &Texture,
        label: &str,
        usage: ResourceUsage,
    ) -> Result<ResourceId, PackagingError> {
        if let Some(id) = self.textures.get(&texture.raw_id()) {
            return Ok(*id);
        }
        let placed = self.heap.place_texture(self.recorder, texture, label)?;
        self.recorder.use_texture(&placed, usage);
        self.textures.insert(texture.raw_id(), placed.resource_id());
        let id = placed.resource_id();
        self.placed_textures.push(placed);
        Ok(id)
    }

    fn texture_in_place(&mut self, texture: &Texture, usage: ResourceUsage) -> ResourceId {
        self.recorder.use_texture(texture, usage);
        texture.resource_id()
    }

    fn buffer(&mut self, buffer: &Buffer, label: &str) -> Result<DeviceAddress, PackagingError> {
        if buffer.size() == 0 {
            return Ok(0);
        }
        if let Some(address) = self.buffers.get(&buffer.raw_id()) {
            return Ok(*address);
        }
        let placed = self.heap.place_buffer(self.recorder, buffer, label)?;
        self.recorder.use_buffer(&placed, ResourceUsage::Read);
        self.buffers.insert(buffer.raw_id(), placed.device_address());
        let address = placed.device_address();
        self.placed_buffers.push(placed);
        Ok(address)
    }

    fn acceleration_structure(&mut self, structure: &AccelerationStructure) -> DeviceAddress {
        self.recorder
            .use_acceleration_structure(structure, ResourceUsage::Read);
        structure.device_address()
    }

    fn view(&mut self, bytes: &[u8], label: &str) -> Result<DeviceAddress, PackagingError> {
        if bytes.is_empty() {
            return Ok(0);
        }
        let placed = self.heap.place_bytes(self.recorder, bytes, label)?;
        self.recorder.use_buffer(&placed, ResourceUsage::Read);
        let address = placed.device_address();
        self.placed_buffers.push(placed);
        Ok(address)
    }

    fn pooled_view(
        &mut self,
        pool: &mut ResourcePool,
        label: &str,
        bytes: &[u8],
        rewrite: bool,
    ) -> Result<DeviceAddress, PackagingError> {
        pooled_buffer(self.recorder, pool, label, bytes, rewrite)
    }
}

/// Writes records into fresh host-visible buffers and uses resources where they live.
pub(crate) struct StagingPlacement<'r, 'c> {
    recorder: &'r mut CommandRecorder<'c>,
    textures: HashSet<u64>,
    pub(crate) views: Vec<Buffer>,
}

impl<'r, 'c> StagingPlacement<'r, 'c> {
    pub(crate) fn new(recorder: &'r mut CommandRecorder<'c>) -> Self {
        Self {
            recorder,
            textures: HashSet::new(),
            views: Vec::new(),
        }
    }
}

impl<'r, 'c> Placement for StagingPlacement<'r, 'c> {
    fn texture(
        &mut self,
        texture: &Texture,
        _label: &str,
        usage: ResourceUsage,
    ) -> Result<ResourceId, PackagingError> {
        if self.textures.insert(texture.raw_id()) {
            self.recorder.use_texture(texture, usage);
        }
        Ok(texture.resource_id())
    }

    fn texture_in_place(&mut self, texture: &Texture, usage: ResourceUsage) -> ResourceId {
        self.recorder.use_texture(texture, usage);
        texture.resource_id()
    }

    fn buffer(&mut self, buffer: &Buffer, _label: &str) -> Result<DeviceAddress, PackagingError> {
        if buffer.size() == 0 {
            return Ok(0);
        }
        self.recorder.use_buffer(buffer, ResourceUsage::Read);
        Ok(buffer.device_address())
    }

    fn acceleration_structure(&mut self, structure: &AccelerationStructure) -> DeviceAddress {
        self.recorder
            .use_acceleration_structure(structure, ResourceUsage::Read);
        structure.device_address()
    }

    fn view(&mut self, bytes: &[u8], label: &str) -> Result<DeviceAddress, PackagingError> {
        if bytes.is_empty() {
            return Ok(0);
        }
        let buffer = self
            .recorder
            .device()
            .create_buffer_init(Some(label), bytes, MemoryLocation::CpuToGpu)
            .map_err(|source| PackagingError::BufferAllocationFailed {
                label: label.to_owned(),
                source,
            })?;
        self.recorder.use_buffer(&buffer, ResourceUsage::Read);
        let address = buffer.device_address();
        self.views.push(buffer);
        Ok(address)
    }

    fn pooled_view(
        &mut self,
        pool: &mut ResourcePool,
        label: &str,
        bytes: &[u8],
        rewrite: bool,
    ) -> Result<DeviceAddress, PackagingError> {
        pooled_buffer(self.recorder, pool, label, bytes, rewrite)
    }
}

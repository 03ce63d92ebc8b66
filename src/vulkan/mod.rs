//! [`Driver`] on top of a Vulkan device with `VK_KHR_acceleration_structure`.
//!
//! Buffers are addressed through buffer device addresses, textures through one update-after-bind
//! descriptor set whose slots are the texture resource ids. Heaps are single `gpu-allocator`
//! allocations that buffers and images are bound into at offsets.

mod bindless;
pub mod name;
mod record;

use std::collections::HashMap;
use std::ffi::CStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};

use crate::driver::{
    align_up, AccelerationStructureDescriptor, AccelerationStructureLevel, BuildSizes, Command,
    CompletionHandler, DeviceAddress, Driver, Footprint, MemoryLocation, RawAccelerationStructure,
    RawBuffer, RawResource, RawTexture, ResourceId, SubmissionId, TextureDescriptor,
};
use crate::error::DriverError;

use bindless::{BindlessSet, Slots};

const HEAP_ALIGNMENT: u64 = 64 * 1024;

const BUFFER_USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::from_raw(
    vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS.as_raw()
        | vk::BufferUsageFlags::STORAGE_BUFFER.as_raw()
        | vk::BufferUsageFlags::TRANSFER_SRC.as_raw()
        | vk::BufferUsageFlags::TRANSFER_DST.as_raw()
        | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR.as_raw()
        | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR.as_raw(),
);

fn vk_error(what: &str, result: vk::Result) -> DriverError {
    match result {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            DriverError::OutOfMemory {
                label: what.to_owned(),
                size: 0,
            }
        }
        other => DriverError::Backend(format!("{}: {}", what, other)),
    }
}

fn allocation_error(label: &str, size: u64, err: gpu_allocator::AllocationError) -> DriverError {
    match err {
        gpu_allocator::AllocationError::OutOfMemory => DriverError::OutOfMemory {
            label: label.to_owned(),
            size,
        },
        other => DriverError::Backend(format!("allocating {}: {}", label, other)),
    }
}

fn location(location: MemoryLocation) -> gpu_allocator::MemoryLocation {
    match location {
        MemoryLocation::GpuOnly => gpu_allocator::MemoryLocation::GpuOnly,
        MemoryLocation::CpuToGpu => gpu_allocator::MemoryLocation::CpuToGpu,
        MemoryLocation::GpuToCpu => gpu_allocator::MemoryLocation::GpuToCpu,
    }
}

struct BufferEntry {
    label: String,
    handle: vk::Buffer,
    /// `None` for buffers bound into a heap.
    allocation: Option<Allocation>,
    address: DeviceAddress,
    size: u64,
}

struct TextureEntry {
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    descriptor: TextureDescriptor,
    resource_id: ResourceId,
}

struct StructureEntry {
    handle: vk::AccelerationStructureKHR,
    buffer: u64,
    address: DeviceAddress,
}

struct KernelEntry {
    module: vk::ShaderModule,
    pipeline: vk::Pipeline,
}

struct Pending {
    label: String,
    fence: vk::Fence,
    command_buffer: vk::CommandBuffer,
    handler: Option<CompletionHandler>,
    /// Buffers created for this submission only.
    transient: Vec<u64>,
}

struct State {
    next_id: u64,
    next_submission: SubmissionId,
    allocator: Allocator,
    command_pool: vk::CommandPool,
    slots: Slots,
    buffers: HashMap<u64, BufferEntry>,
    textures: HashMap<u64, TextureEntry>,
    heaps: HashMap<u64, Allocation>,
    structures: HashMap<u64, StructureEntry>,
    kernels: HashMap<u64, KernelEntry>,
    pending: HashMap<SubmissionId, Pending>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn buffer(&self, id: u64) -> Result<&BufferEntry, DriverError> {
        self.buffers.get(&id).ok_or(DriverError::InvalidHandle {
            kind: "buffer",
            id,
        })
    }

    fn texture(&self, id: u64) -> Result<&TextureEntry, DriverError> {
        self.textures.get(&id).ok_or(DriverError::InvalidHandle {
            kind: "texture",
            id,
        })
    }

    fn structure(&self, id: u64) -> Result<&StructureEntry, DriverError> {
        self.structures.get(&id).ok_or(DriverError::InvalidHandle {
            kind: "acceleration structure",
            id,
        })
    }
}

pub struct VulkanDriver {
    name: String,
    device: ash::Device,
    acceleration_structure_loader: ash::extensions::khr::AccelerationStructure,
    queue: vk::Queue,
    bindless: BindlessSet,
    heap_memory_type_bits: u32,
    buffer_image_granularity: u64,
    state: Mutex<State>,
}

impl VulkanDriver {
    /// Wraps `device`, using queue 0 of `queue_family_index` for every submission.
    ///
    /// # Safety
    ///
    /// `device` must have been created from `physical_device` with the extensions in
    /// [`name::device::REQUIRED`] plus the buffer device address, descriptor indexing and
    /// acceleration structure features enabled, and must outlive the driver.
    pub unsafe fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
        queue_family_index: u32,
    ) -> anyhow::Result<Self> {
        let available = instance
            .enumerate_device_extension_properties(physical_device)
            .context("failed to enumerate device extensions")?;
        for extension in name::device::REQUIRED {
            let found = available.iter().any(|properties| {
                CStr::from_ptr(properties.extension_name.as_ptr()).to_bytes()
                    == extension.as_ref().as_bytes()
            });
            anyhow::ensure!(found, "device does not support {}", extension.as_ref());
        }

        let properties = instance.get_physical_device_properties(physical_device);
        let name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();
        let acceleration_structure_loader =
            ash::extensions::khr::AccelerationStructure::new(instance, device);
        let queue = device.get_device_queue(queue_family_index, 0);
        let command_pool = device
            .create_command_pool(
                &vk::CommandPoolCreateInfo::builder()
                    .queue_family_index(queue_family_index)
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER),
                None,
            )
            .context("failed to create command pool")?;
        let bindless = BindlessSet::new(device).context("failed to create descriptor set")?;
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: false,
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })
        .context("failed to create allocator")?;

        // memory types every heap-bound buffer and image can live in
        let probe_buffer = device
            .create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(1)
                    .usage(BUFFER_USAGE)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE),
                None,
            )
            .context("failed to create probe buffer")?;
        let buffer_bits = device
            .get_buffer_memory_requirements(probe_buffer)
            .memory_type_bits;
        device.destroy_buffer(probe_buffer, None);
        let probe_image = device
            .create_image(
                &record::image_create_info(&TextureDescriptor::new_2d(
                    crate::PixelFormat::Rgba8Unorm,
                    1,
                    1,
                    crate::TextureUsage::Storage,
                )),
                None,
            )
            .context("failed to create probe image")?;
        let image_bits = device
            .get_image_memory_requirements(probe_image)
            .memory_type_bits;
        device.destroy_image(probe_image, None);
        let heap_memory_type_bits = buffer_bits & image_bits;
        anyhow::ensure!(
            heap_memory_type_bits != 0,
            "no memory type holds both buffers and images"
        );

        log::info!("vulkan driver on {}", name);
        Ok(Self {
            name,
            device: device.clone(),
            acceleration_structure_loader,
            queue,
            bindless,
            heap_memory_type_bits,
            buffer_image_granularity: properties.limits.buffer_image_granularity,
            state: Mutex::new(State {
                next_id: 0,
                next_submission: 0,
                allocator,
                command_pool,
                slots: Slots::default(),
                buffers: HashMap::new(),
                textures: HashMap::new(),
                heaps: HashMap::new(),
                structures: HashMap::new(),
                kernels: HashMap::new(),
                pending: HashMap::new(),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    unsafe fn create_buffer_handle(&self, size: u64, label: &str) -> Result<vk::Buffer, DriverError> {
        self.device
            .create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(size.max(1))
                    .usage(BUFFER_USAGE)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE),
                None,
            )
            .map_err(|err| vk_error(label, err))
    }

    unsafe fn buffer_address(&self, handle: vk::Buffer) -> DeviceAddress {
        self.device
            .get_buffer_device_address(&vk::BufferDeviceAddressInfo::builder().buffer(handle))
    }

    unsafe fn allocate_buffer(
        &self,
        state: &mut State,
        label: &str,
        size: u64,
        memory: MemoryLocation,
    ) -> Result<RawBuffer, DriverError> {
        let handle = self.create_buffer_handle(size, label)?;
        let requirements = self.device.get_buffer_memory_requirements(handle);
        let allocation = match state.allocator.allocate(&AllocationCreateDesc {
            name: label,
            requirements,
            location: location(memory),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(err) => {
                self.device.destroy_buffer(handle, None);
                return Err(allocation_error(label, size, err));
            }
        };
        if let Err(err) =
            self.device
                .bind_buffer_memory(handle, allocation.memory(), allocation.offset())
        {
            self.device.destroy_buffer(handle, None);
            state.allocator.free(allocation).ok();
            return Err(vk_error(label, err));
        }
        let address = self.buffer_address(handle);
        let id = state.next_id();
        state.buffers.insert(
            id,
            BufferEntry {
                label: label.to_owned(),
                handle,
                allocation: Some(allocation),
                address,
                size,
            },
        );
        Ok(RawBuffer {
            id,
            device_address: address,
            size,
        })
    }

    unsafe fn release_buffer(&self, state: &mut State, id: u64) {
        if let Some(entry) = state.buffers.remove(&id) {
            self.device.destroy_buffer(entry.handle, None);
            if let Some(allocation) = entry.allocation {
                if let Err(err) = state.allocator.free(allocation) {
                    log::error!("failed to free {}: {}", entry.label, err);
                }
            }
        }
    }

    unsafe fn write_allocation(
        entry: &mut BufferEntry,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DriverError> {
        let end = offset + data.len() as u64;
        if end > entry.size {
            return Err(DriverError::OutOfBounds {
                label: entry.label.clone(),
                offset,
                len: data.len() as u64,
                size: entry.size,
            });
        }
        let mapped = entry
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_else(|| DriverError::NotHostVisible {
                label: entry.label.clone(),
            })?;
        mapped[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    /// Binds `image` to `allocation` at `offset`, creates its view and gives it a texture slot.
    unsafe fn finish_texture(
        &self,
        state: &mut State,
        label: &str,
        image: vk::Image,
        memory: vk::DeviceMemory,
        offset: u64,
        descriptor: &TextureDescriptor,
    ) -> Result<(vk::ImageView, ResourceId), DriverError> {
        self.device
            .bind_image_memory(image, memory, offset)
            .map_err(|err| vk_error(label, err))?;
        let view = self
            .device
            .create_image_view(
                &vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(record::view_type(descriptor.kind))
                    .format(record::format(descriptor.format))
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: descriptor.mip_levels,
                        base_array_layer: 0,
                        layer_count: descriptor.layers(),
                    }),
                None,
            )
            .map_err(|err| vk_error(label, err))?;
        let resource_id = match state.slots.allocate() {
            Some(id) => id,
            None => {
                self.device.destroy_image_view(view, None);
                return Err(DriverError::Backend(format!(
                    "no texture slot left for {}",
                    label
                )));
            }
        };
        self.bindless
            .write(&self.device, resource_id, view, descriptor.usage);
        // images stay in the general layout for their whole life
        self.one_shot(state, label, |cmd| {
            let barrier = vk::ImageMemoryBarrier::builder()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::GENERAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: vk::REMAINING_MIP_LEVELS,
                    base_array_layer: 0,
                    layer_count: vk::REMAINING_ARRAY_LAYERS,
                })
                .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
                .build();
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        })?;
        Ok((view, resource_id))
    }

    /// Copies `data` through the staging buffer `staging` into every level and layer of `image`.
    unsafe fn upload(
        &self,
        state: &mut State,
        staging: u64,
        image: vk::Image,
        descriptor: &TextureDescriptor,
        data: &[u8],
    ) -> Result<(), DriverError> {
        let entry = state
            .buffers
            .get_mut(&staging)
            .ok_or(DriverError::InvalidHandle {
                kind: "buffer",
                id: staging,
            })?;
        Self::write_allocation(entry, 0, data)?;
        let handle = entry.handle;
        let regions = record::upload_regions(descriptor);
        self.one_shot(state, "texture upload", |cmd| {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                handle,
                image,
                vk::ImageLayout::GENERAL,
                &regions,
            );
        })
    }

    /// Records `f` into a fresh command buffer, submits it and waits.
    unsafe fn one_shot<F>(&self, state: &mut State, label: &str, f: F) -> Result<(), DriverError>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let cmd = self.begin(state, label)?;
        f(cmd);
        let fence = self.end_and_submit(cmd, label)?;
        let result = self
            .device
            .wait_for_fences(&[fence], true, u64::MAX)
            .map_err(|err| vk_error(label, err));
        self.device.destroy_fence(fence, None);
        self.device
            .free_command_buffers(state.command_pool, &[cmd]);
        result
    }

    unsafe fn begin(&self, state: &State, label: &str) -> Result<vk::CommandBuffer, DriverError> {
        let cmd = self
            .device
            .allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(state.command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )
            .map_err(|err| vk_error(label, err))?[0];
        self.device
            .begin_command_buffer(
                cmd,
                &vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )
            .map_err(|err| vk_error(label, err))?;
        Ok(cmd)
    }

    unsafe fn end_and_submit(
        &self,
        cmd: vk::CommandBuffer,
        label: &str,
    ) -> Result<vk::Fence, DriverError> {
        self.device
            .end_command_buffer(cmd)
            .map_err(|err| vk_error(label, err))?;
        let fence = self
            .device
            .create_fence(&vk::FenceCreateInfo::builder(), None)
            .map_err(|err| vk_error(label, err))?;
        let command_buffers = [cmd];
        let submit = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .build();
        if let Err(err) = self.device.queue_submit(self.queue, &[submit], fence) {
            self.device.destroy_fence(fence, None);
            return Err(vk_error(label, err));
        }
        Ok(fence)
    }

    fn global_barrier(&self, cmd: vk::CommandBuffer, barrier: vk::MemoryBarrier) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
        }
    }

    unsafe fn record(
        &self,
        state: &mut State,
        cmd: vk::CommandBuffer,
        command: &Command,
        transient: &mut Vec<u64>,
    ) -> Result<(), DriverError> {
        match command {
            Command::BuildAccelerationStructure {
                destination,
                descriptor,
                scratch,
            } => {
                let mut instances = 0;
                if let AccelerationStructureDescriptor::Instance {
                    instances: descriptors,
                    structures,
                    ..
                } = descriptor
                {
                    let converted = descriptors
                        .iter()
                        .map(|d| {
                            let id = structures
                                .get(d.acceleration_structure_index as usize)
                                .copied()
                                .ok_or_else(|| {
                                    DriverError::InvalidCommand(format!(
                                        "instance references structure {} of {}",
                                        d.acceleration_structure_index,
                                        structures.len()
                                    ))
                                })?;
                            Ok(record::instance(d, state.structure(id)?.address))
                        })
                        .collect::<Result<Vec<_>, DriverError>>()?;
                    let bytes = record::instance_bytes(&converted);
                    let raw = self.allocate_buffer(
                        state,
                        "instance descriptors",
                        bytes.len() as u64,
                        MemoryLocation::CpuToGpu,
                    )?;
                    transient.push(raw.id);
                    if let Some(entry) = state.buffers.get_mut(&raw.id) {
                        Self::write_allocation(entry, 0, bytes)?;
                    }
                    instances = raw.device_address;
                }
                let (geometries, counts) = record::geometries(descriptor, instances);
                let ranges = counts
                    .iter()
                    .map(|&count| vk::AccelerationStructureBuildRangeInfoKHR {
                        primitive_count: count,
                        primitive_offset: 0,
                        first_vertex: 0,
                        transform_offset: 0,
                    })
                    .collect::<Vec<_>>();
                let info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
                    .ty(record::level(descriptor.level()))
                    .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
                    .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
                    .geometries(&geometries)
                    .dst_acceleration_structure(state.structure(*destination)?.handle)
                    .scratch_data(vk::DeviceOrHostAddressKHR {
                        device_address: state.buffer(*scratch)?.address,
                    })
                    .build();
                self.acceleration_structure_loader
                    .cmd_build_acceleration_structures(cmd, &[info], &[ranges.as_slice()]);
                self.global_barrier(
                    cmd,
                    vk::MemoryBarrier::builder()
                        .src_access_mask(vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR)
                        .dst_access_mask(
                            vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR
                                | vk::AccessFlags::SHADER_READ,
                        )
                        .build(),
                );
            }
            Command::CopyBuffer {
                source,
                destination,
                size,
            } => {
                if *size > 0 {
                    self.device.cmd_copy_buffer(
                        cmd,
                        state.buffer(*source)?.handle,
                        state.buffer(*destination)?.handle,
                        &[vk::BufferCopy {
                            src_offset: 0,
                            dst_offset: 0,
                            size: *size,
                        }],
                    );
                }
                self.global_barrier(cmd, transfer_barrier());
            }
            Command::CopyTexture {
                source,
                destination,
            } => {
                let source = state.texture(*source)?;
                let destination = state.texture(*destination)?;
                self.device.cmd_copy_image(
                    cmd,
                    source.image,
                    vk::ImageLayout::GENERAL,
                    destination.image,
                    vk::ImageLayout::GENERAL,
                    &record::copy_regions(&destination.descriptor),
                );
                self.global_barrier(cmd, transfer_barrier());
            }
            Command::UseResource { resource, usage } => {
                match resource {
                    RawResource::Buffer(id) => state.buffer(*id).map(|_| ())?,
                    RawResource::Texture(id) => state.texture(*id).map(|_| ())?,
                    RawResource::AccelerationStructure(id) => state.structure(*id).map(|_| ())?,
                    RawResource::Heap(_) => {}
                }
                self.global_barrier(cmd, record::use_barrier(*usage));
            }
            Command::Dispatch {
                kernel,
                arguments,
                threadgroups,
                ..
            } => {
                // the group size is compiled into the kernel
                let kernel = state.kernels.get(kernel).ok_or(DriverError::InvalidHandle {
                    kind: "kernel",
                    id: *kernel,
                })?;
                self.device
                    .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, kernel.pipeline);
                self.device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::COMPUTE,
                    self.bindless.pipeline_layout,
                    0,
                    &[self.bindless.set],
                    &[],
                );
                self.device.cmd_push_constants(
                    cmd,
                    self.bindless.pipeline_layout,
                    vk::ShaderStageFlags::COMPUTE,
                    0,
                    &arguments.to_ne_bytes(),
                );
                self.device
                    .cmd_dispatch(cmd, threadgroups[0], threadgroups[1], threadgroups[2]);
            }
        }
        Ok(())
    }

    /// Removes finished submissions and returns their handlers.
    unsafe fn retire(&self, state: &mut State) -> Result<Vec<CompletionHandler>, DriverError> {
        let finished = state
            .pending
            .iter()
            .filter_map(|(id, pending)| {
                match self.device.get_fence_status(pending.fence) {
                    Ok(true) => Some(Ok(*id)),
                    Ok(false) => None,
                    Err(err) => Some(Err(vk_error(&pending.label, err))),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut handlers = Vec::new();
        for id in finished {
            if let Some(pending) = state.pending.remove(&id) {
                self.device.destroy_fence(pending.fence, None);
                self.device
                    .free_command_buffers(state.command_pool, &[pending.command_buffer]);
                for buffer in pending.transient {
                    self.release_buffer(state, buffer);
                }
                handlers.extend(pending.handler);
            }
        }
        Ok(handlers)
    }
}

fn transfer_barrier() -> vk::MemoryBarrier {
    vk::MemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
        .build()
}

impl Driver for VulkanDriver {
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
        unsafe { self.allocate_buffer(&mut state, label, size, location) }
    }

    fn write_buffer(&self, buffer: u64, offset: u64, data: &[u8]) -> Result<(), DriverError> {
        let mut state = self.state();
        let entry = state
            .buffers
            .get_mut(&buffer)
            .ok_or(DriverError::InvalidHandle {
                kind: "buffer",
                id: buffer,
            })?;
        unsafe { Self::write_allocation(entry, offset, data) }
    }

    fn read_memory(&self, address: DeviceAddress, len: u64) -> Result<Vec<u8>, DriverError> {
        let state = self.state();
        let entry = state
            .buffers
            .values()
            .find(|entry| address >= entry.address && address + len <= entry.address + entry.size)
            .ok_or(DriverError::UnmappedAddress { address })?;
        let mapped = entry
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .ok_or_else(|| DriverError::NotHostVisible {
                label: entry.label.clone(),
            })?;
        let start = (address - entry.address) as usize;
        Ok(mapped[start..start + len as usize].to_vec())
    }

    fn destroy_buffer(&self, buffer: u64) {
        let mut state = self.state();
        unsafe { self.release_buffer(&mut state, buffer) }
    }

    fn create_texture(
        &self,
        label: &str,
        descriptor: &TextureDescriptor,
        location: MemoryLocation,
    ) -> Result<RawTexture, DriverError> {
        let mut state = self.state();
        unsafe {
            let image = self
                .device
                .create_image(&record::image_create_info(descriptor), None)
                .map_err(|err| vk_error(label, err))?;
            let requirements = self.device.get_image_memory_requirements(image);
            // optimal tiling only, so textures are never host visible
            let allocation = match state.allocator.allocate(&AllocationCreateDesc {
                name: label,
                requirements,
                location: gpu_allocator::MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            }) {
                Ok(allocation) => allocation,
                Err(err) => {
                    self.device.destroy_image(image, None);
                    return Err(allocation_error(label, requirements.size, err));
                }
            };
            log::trace!("{} requested in {} memory", label, location);
            let finished = self.finish_texture(
                &mut state,
                label,
                image,
                allocation.memory(),
                allocation.offset(),
                descriptor,
            );
            let (view, resource_id) = match finished {
                Ok(finished) => finished,
                Err(err) => {
                    self.device.destroy_image(image, None);
                    state.allocator.free(allocation).ok();
                    return Err(err);
                }
            };
            let id = state.next_id();
            state.textures.insert(
                id,
                TextureEntry {
                    image,
                    view,
                    allocation: Some(allocation),
                    descriptor: descriptor.clone(),
                    resource_id,
                },
            );
            Ok(RawTexture { id, resource_id })
        }
    }

    fn write_texture(&self, texture: u64, data: &[u8]) -> Result<(), DriverError> {
        let mut state = self.state();
        let (image, descriptor) = {
            let entry = state.texture(texture)?;
            (entry.image, entry.descriptor.clone())
        };
        if data.len() as u64 != descriptor.byte_size() {
            return Err(DriverError::OutOfBounds {
                label: format!("texture {}", texture),
                offset: 0,
                len: data.len() as u64,
                size: descriptor.byte_size(),
            });
        }
        unsafe {
            let staging = self.allocate_buffer(
                &mut state,
                "texture upload",
                data.len() as u64,
                MemoryLocation::CpuToGpu,
            )?;
            let result = self.upload(&mut state, staging.id, image, &descriptor, data);
            self.release_buffer(&mut state, staging.id);
            result
        }
    }

    fn destroy_texture(&self, texture: u64) {
        let mut state = self.state();
        if let Some(entry) = state.textures.remove(&texture) {
            state.slots.release(entry.resource_id);
            unsafe {
                self.device.destroy_image_view(entry.view, None);
                self.device.destroy_image(entry.image, None);
            }
            if let Some(allocation) = entry.allocation {
                if let Err(err) = state.allocator.free(allocation) {
                    log::error!("failed to free texture {}: {}", texture, err);
                }
            }
        }
    }

    fn buffer_heap_footprint(&self, size: u64) -> Result<Footprint, DriverError> {
        unsafe {
            let handle = self.create_buffer_handle(size, "footprint probe")?;
            let requirements = self.device.get_buffer_memory_requirements(handle);
            self.device.destroy_buffer(handle, None);
            Ok(Footprint {
                size: requirements.size,
                align: requirements.alignment.max(self.buffer_image_granularity),
            })
        }
    }

    fn texture_heap_footprint(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<Footprint, DriverError> {
        unsafe {
            let image = self
                .device
                .create_image(&record::image_create_info(descriptor), None)
                .map_err(|err| vk_error("footprint probe", err))?;
            let requirements = self.device.get_image_memory_requirements(image);
            self.device.destroy_image(image, None);
            Ok(Footprint {
                size: align_up(requirements.size, self.buffer_image_granularity),
                align: requirements.alignment.max(self.buffer_image_granularity),
            })
        }
    }

    fn create_heap(&self, label: &str, size: u64) -> Result<u64, DriverError> {
        let mut state = self.state();
        let allocation = state
            .allocator
            .allocate(&AllocationCreateDesc {
                name: label,
                requirements: vk::MemoryRequirements {
                    size: size.max(1),
                    alignment: HEAP_ALIGNMENT,
                    memory_type_bits: self.heap_memory_type_bits,
                },
                location: gpu_allocator::MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|err| allocation_error(label, size, err))?;
        let id = state.next_id();
        state.heaps.insert(id, allocation);
        log::debug!("created heap {} of {} bytes", label, size);
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
        let (memory, base) = {
            let allocation = state
                .heaps
                .get(&heap)
                .ok_or(DriverError::InvalidHandle { kind: "heap", id: heap })?;
            unsafe { (allocation.memory(), allocation.offset()) }
        };
        unsafe {
            let handle = self.create_buffer_handle(size, label)?;
            if let Err(err) = self.device.bind_buffer_memory(handle, memory, base + offset) {
                self.device.destroy_buffer(handle, None);
                return Err(vk_error(label, err));
            }
            let address = self.buffer_address(handle);
            let id = state.next_id();
            state.buffers.insert(
                id,
                BufferEntry {
                    label: label.to_owned(),
                    handle,
                    allocation: None,
                    address,
                    size,
                },
            );
            Ok(RawBuffer {
                id,
                device_address: address,
                size,
            })
        }
    }

    fn create_texture_on_heap(
        &self,
        heap: u64,
        offset: u64,
        descriptor: &TextureDescriptor,
        label: &str,
    ) -> Result<RawTexture, DriverError> {
        let mut state = self.state();
        let (memory, base) = {
            let allocation = state
                .heaps
                .get(&heap)
                .ok_or(DriverError::InvalidHandle { kind: "heap", id: heap })?;
            unsafe { (allocation.memory(), allocation.offset()) }
        };
        unsafe {
            let image = self
                .device
                .create_image(&record::image_create_info(descriptor), None)
                .map_err(|err| vk_error(label, err))?;
            let (view, resource_id) = match self.finish_texture(
                &mut state,
                label,
                image,
                memory,
                base + offset,
                descriptor,
            ) {
                Ok(finished) => finished,
                Err(err) => {
                    self.device.destroy_image(image, None);
                    return Err(err);
                }
            };
            let id = state.next_id();
            state.textures.insert(
                id,
                TextureEntry {
                    image,
                    view,
                    allocation: None,
                    descriptor: descriptor.clone(),
                    resource_id,
                },
            );
            Ok(RawTexture { id, resource_id })
        }
    }

    fn destroy_heap(&self, heap: u64) {
        let mut state = self.state();
        if let Some(allocation) = state.heaps.remove(&heap) {
            if let Err(err) = state.allocator.free(allocation) {
                log::error!("failed to free heap {}: {}", heap, err);
            }
        }
    }

    fn acceleration_structure_sizes(
        &self,
        descriptor: &AccelerationStructureDescriptor,
    ) -> Result<BuildSizes, DriverError> {
        let (geometries, counts) = record::geometries(descriptor, 0);
        let info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(record::level(descriptor.level()))
            .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries)
            .build();
        let sizes = unsafe {
            self.acceleration_structure_loader
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &info,
                    &counts,
                )
        };
        Ok(BuildSizes {
            acceleration_structure_size: sizes.acceleration_structure_size,
            build_scratch_size: sizes.build_scratch_size,
        })
    }

    fn create_acceleration_structure(
        &self,
        label: &str,
        level: AccelerationStructureLevel,
        size: u64,
    ) -> Result<RawAccelerationStructure, DriverError> {
        let mut state = self.state();
        unsafe {
            let buffer =
                self.allocate_buffer(&mut state, label, size, MemoryLocation::GpuOnly)?;
            let handle = match self.acceleration_structure_loader.create_acceleration_structure(
                &vk::AccelerationStructureCreateInfoKHR::builder()
                    .ty(record::level(level))
                    .buffer(state.buffer(buffer.id)?.handle)
                    .size(size),
                None,
            ) {
                Ok(handle) => handle,
                Err(err) => {
                    self.release_buffer(&mut state, buffer.id);
                    return Err(vk_error(label, err));
                }
            };
            let address = self
                .acceleration_structure_loader
                .get_acceleration_structure_device_address(
                    &vk::AccelerationStructureDeviceAddressInfoKHR::builder()
                        .acceleration_structure(handle),
                );
            let id = state.next_id();
            state.structures.insert(
                id,
                StructureEntry {
                    handle,
                    buffer: buffer.id,
                    address,
                },
            );
            Ok(RawAccelerationStructure {
                id,
                device_address: address,
                resource_id: ResourceId(id),
            })
        }
    }

    fn destroy_acceleration_structure(&self, structure: u64) {
        let mut state = self.state();
        if let Some(entry) = state.structures.remove(&structure) {
            unsafe {
                self.acceleration_structure_loader
                    .destroy_acceleration_structure(entry.handle, None);
                self.release_buffer(&mut state, entry.buffer);
            }
        }
    }

    fn create_kernel(&self, label: &str, code: &[u8]) -> Result<u64, DriverError> {
        let words = ash::util::read_spv(&mut std::io::Cursor::new(code))
            .map_err(|err| DriverError::Backend(format!("{} is not SPIR-V: {}", label, err)))?;
        let mut state = self.state();
        unsafe {
            let module = self
                .device
                .create_shader_module(&vk::ShaderModuleCreateInfo::builder().code(&words), None)
                .map_err(|err| vk_error(label, err))?;
            let entry_point = CStr::from_bytes_with_nul_unchecked(b"main\0");
            let stage = vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::COMPUTE)
                .module(module)
                .name(entry_point)
                .build();
            let info = vk::ComputePipelineCreateInfo::builder()
                .stage(stage)
                .layout(self.bindless.pipeline_layout)
                .build();
            let pipeline = match self.device.create_compute_pipelines(
                vk::PipelineCache::null(),
                &[info],
                None,
            ) {
                Ok(pipelines) => pipelines[0],
                Err((_, err)) => {
                    self.device.destroy_shader_module(module, None);
                    return Err(vk_error(label, err));
                }
            };
            let id = state.next_id();
            state.kernels.insert(id, KernelEntry { module, pipeline });
            Ok(id)
        }
    }

    fn destroy_kernel(&self, kernel: u64) {
        let mut state = self.state();
        if let Some(entry) = state.kernels.remove(&kernel) {
            unsafe {
                self.device.destroy_pipeline(entry.pipeline, None);
                self.device.destroy_shader_module(entry.module, None);
            }
        }
    }

    fn submit(
        &self,
        label: &str,
        commands: Vec<Command>,
        on_completed: Option<CompletionHandler>,
    ) -> Result<SubmissionId, DriverError> {
        let mut state = self.state();
        unsafe {
            let cmd = self.begin(&state, label)?;
            let mut transient = Vec::new();
            let recorded = commands
                .iter()
                .try_for_each(|command| self.record(&mut state, cmd, command, &mut transient));
            let fence = match recorded.and_then(|_| self.end_and_submit(cmd, label)) {
                Ok(fence) => fence,
                Err(err) => {
                    self.device.free_command_buffers(state.command_pool, &[cmd]);
                    for buffer in transient {
                        self.release_buffer(&mut state, buffer);
                    }
                    return Err(err);
                }
            };
            state.next_submission += 1;
            let id = state.next_submission;
            log::trace!("submitted {} ({} commands) as {}", label, commands.len(), id);
            state.pending.insert(
                id,
                Pending {
                    label: label.to_owned(),
                    fence,
                    command_buffer: cmd,
                    handler: on_completed,
                    transient,
                },
            );
            Ok(id)
        }
    }

    fn is_complete(&self, submission: SubmissionId) -> Result<bool, DriverError> {
        let state = self.state();
        match state.pending.get(&submission) {
            Some(pending) => unsafe {
                self.device
                    .get_fence_status(pending.fence)
                    .map_err(|err| vk_error(&pending.label, err))
            },
            None if submission <= state.next_submission => Ok(true),
            None => Err(DriverError::UnknownSubmission(submission)),
        }
    }

    fn wait(&self, submission: SubmissionId) -> Result<(), DriverError> {
        let fence = {
            let state = self.state();
            match state.pending.get(&submission) {
                Some(pending) => pending.fence,
                None if submission <= state.next_submission => return Ok(()),
                None => return Err(DriverError::UnknownSubmission(submission)),
            }
        };
        unsafe {
            self.device
                .wait_for_fences(&[fence], true, u64::MAX)
                .map_err(|err| vk_error("wait", err))
        }
    }

    fn poll(&self) -> Result<(), DriverError> {
        let handlers = {
            let mut state = self.state();
            unsafe { self.retire(&mut state)? }
        };
        for handler in handlers {
            handler();
        }
        Ok(())
    }
}

impl Drop for VulkanDriver {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        unsafe {
            if let Err(err) = self.device.device_wait_idle() {
                log::error!("device_wait_idle failed: {}", err);
            }
            for (_, pending) in state.pending.drain() {
                self.device.destroy_fence(pending.fence, None);
            }
            for (_, kernel) in state.kernels.drain() {
                self.device.destroy_pipeline(kernel.pipeline, None);
                self.device.destroy_shader_module(kernel.module, None);
            }
            for (_, structure) in state.structures.drain() {
                self.acceleration_structure_loader
                    .destroy_acceleration_structure(structure.handle, None);
            }
            for (_, texture) in state.textures.drain() {
                self.device.destroy_image_view(texture.view, None);
                self.device.destroy_image(texture.image, None);
                if let Some(allocation) = texture.allocation {
                    state.allocator.free(allocation).ok();
                }
            }
            for (_, buffer) in state.buffers.drain() {
                self.device.destroy_buffer(buffer.handle, None);
                if let Some(allocation) = buffer.allocation {
                    state.allocator.free(allocation).ok();
                }
            }
            for (_, heap) in state.heaps.drain() {
                state.allocator.free(heap).ok();
            }
            self.device.destroy_command_pool(state.command_pool, None);
            self.bindless.destroy(&self.device);
        }
    }
}

use crate::acceleration_structure::AccelerationStructure;
use crate::driver::{
    AccelerationStructureDescriptor, Command, DeviceAddress, RawResource, ResourceUsage,
};
use crate::{Buffer, CommandBuffer, ComputeKernel, Device, Heap, Texture};

pub struct CommandRecorder<'a> {
    pub(crate) command_buffer: &'a mut CommandBuffer,
}

impl<'a> CommandRecorder<'a> {
    pub fn device(&self) -> &Device {
        &self.command_buffer.device
    }

    pub fn copy_buffer(&mut self, src: &Buffer, dst: &Buffer, size: u64) {
        self.push(Command::CopyBuffer {
            source: src.raw_id(),
            destination: dst.raw_id(),
            size,
        });
        self.retain(src.clone());
        self.retain(dst.clone());
    }

    pub fn copy_texture(&mut self, src: &Texture, dst: &Texture) {
        self.push(Command::CopyTexture {
            source: src.raw_id(),
            destination: dst.raw_id(),
        });
        self.retain(src.clone());
        self.retain(dst.clone());
    }

    /// Records a build of `destination`. `inputs` are the buffers the descriptor's addresses point
    /// into; they are kept alive with the command buffer.
    pub fn build_acceleration_structure(
        &mut self,
        destination: &AccelerationStructure,
        descriptor: AccelerationStructureDescriptor,
        scratch: &Buffer,
        inputs: &[Buffer],
    ) {
        self.push(Command::BuildAccelerationStructure {
            destination: destination.raw_id(),
            descriptor,
            scratch: scratch.raw_id(),
        });
        self.retain(destination.clone());
        self.retain(scratch.clone());
        for input in inputs {
            self.retain(input.clone());
        }
    }

    pub fn use_buffer(&mut self, buffer: &Buffer, usage: ResourceUsage) {
        self.use_resource(RawResource::Buffer(buffer.raw_id()), usage);
        self.retain(buffer.clone());
    }

    pub fn use_texture(&mut self, texture: &Texture, usage: ResourceUsage) {
        self.use_resource(RawResource::Texture(texture.raw_id()), usage);
        self.retain(texture.clone());
    }

    pub fn use_acceleration_structure(
        &mut self,
        structure: &AccelerationStructure,
        usage: ResourceUsage,
    ) {
        self.use_resource(RawResource::AccelerationStructure(structure.raw_id()), usage);
        self.retain(structure.clone());
    }

    pub fn use_heap(&mut self, heap: &Heap) {
        self.use_resource(RawResource::Heap(heap.raw_id()), ResourceUsage::Read);
        self.retain(heap.clone());
    }

    pub fn dispatch(
        &mut self,
        kernel: &ComputeKernel,
        arguments: DeviceAddress,
        threadgroups: [u32; 3],
        threads_per_group: [u32; 3],
    ) {
        self.push(Command::Dispatch {
            kernel: kernel.raw_id(),
            arguments,
            threadgroups,
            threads_per_group,
        });
        self.retain(kernel.clone());
    }

    fn use_resource(&mut self, resource: RawResource, usage: ResourceUsage) {
        self.push(Command::UseResource { resource, usage });
    }

    fn push(&mut self, command: Command) {
        self.command_buffer.commands.push(command);
    }

    fn retain<R: crate::command_buffer::CommandBufferResource + 'static>(&mut self, resource: R) {
        self.command_buffer.resources.push(Box::new(resource));
    }
}

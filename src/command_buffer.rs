use crate::command_recorder::CommandRecorder;
use crate::device::Device;
use crate::driver::Command;

/// Anything a recorded command refers to. Command buffers hold on to these until the GPU is done.
pub trait CommandBufferResource: Send + Sync {}

impl CommandBufferResource for crate::Buffer {}
impl CommandBufferResource for crate::Texture {}
impl CommandBufferResource for crate::Heap {}
impl CommandBufferResource for crate::ComputeKernel {}
impl CommandBufferResource for crate::AccelerationStructure {}

pub struct CommandBuffer {
    pub(crate) name: Option<String>,
    pub(crate) device: Device,
    pub(crate) commands: Vec<Command>,
    pub(crate) resources: Vec<Box<dyn CommandBufferResource>>,
}

impl CommandBuffer {
    pub(crate) fn new(name: Option<&str>, device: &Device) -> Self {
        Self {
            name: name.map(|s| s.to_owned()),
            device: device.clone(),
            commands: Vec::new(),
            resources: Vec::new(),
        }
    }

    pub fn encode<F, R>(&mut self, func: F) -> R
    where
        F: FnOnce(&mut CommandRecorder) -> R,
    {
        let mut recorder = CommandRecorder {
            command_buffer: self,
        };
        func(&mut recorder)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Device {
    pub fn create_command_buffer(&self, name: Option<&str>) -> CommandBuffer {
        CommandBuffer::new(name, self)
    }
}

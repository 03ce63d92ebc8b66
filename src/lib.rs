#![cfg_attr(debug_assertions, allow(dead_code, unused_imports, unused))]

mod accelerator;
mod acceleration_structure;
mod args;
mod buffer;
mod command_buffer;
mod command_recorder;
mod config;
mod device;
mod driver;
mod error;
mod heap;
mod kernel;
mod queue;
mod raytracer;
mod resource_pool;
mod scene;
mod software;
mod texture;

#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use accelerator::{Acceleration, Accelerator, SceneBuild};
pub use acceleration_structure::{
    AccelerationStructure, BottomAccelerationStructure, InstanceDescriptor, InstanceGeometry,
    TopAccelerationStructure, TriangleGeometry, INSTANCE_OPTION_DISABLE_TRIANGLE_CULLING,
    INSTANCE_OPTION_NON_OPAQUE, INSTANCE_OPTION_OPAQUE,
    INSTANCE_OPTION_TRIANGLE_FRONT_FACING_WINDING_COUNTER_CLOCKWISE,
};
pub use args::{
    AccelerationView, ArgsHandle, ArgsView, BackgroundView, EnvView, FrameArgs, FrameView,
    MaterialView, MeshView, Packager, PieceView, PrimitiveInstance, Residency,
};
pub use buffer::Buffer;
pub use command_buffer::CommandBuffer;
pub use command_recorder::CommandRecorder;
pub use config::RendererConfig;
pub use device::Device;
pub use driver::{
    align_up, AccelerationStructureDescriptor, AccelerationStructureLevel, BuildSizes, Command,
    CompletionHandler, DeviceAddress, Driver, Footprint, IndexType, MemoryLocation, PixelFormat,
    RawAccelerationStructure, RawBuffer, RawResource, RawTexture, ResourceId, ResourceUsage,
    SubmissionId, TextureDescriptor, TextureKind, TextureUsage, TriangleGeometryDescriptor,
    VertexFormat,
};
pub use error::{AccelerationError, DriverError, GeometryError, PackagingError};
pub use heap::Heap;
pub use kernel::ComputeKernel;
pub use queue::Queue;
pub use raytracer::{FrameOutcome, Raytracer};
pub use resource_pool::ResourcePool;
pub use scene::{
    Background, Env, Frame, Indices, Instance, Material, Mesh, Piece, Positions, PrimitiveData,
    PrimitiveType, Triangle, Vertex,
};
pub use software::{BuildRecord, DispatchRecord, SoftwareDriver};
pub use texture::Texture;

use crate::acceleration_structure::InstanceDescriptor;
use crate::error::DriverError;

pub type DeviceAddress = u64;
pub type SubmissionId = u64;
pub type CompletionHandler = Box<dyn FnOnce() + Send>;

/// Opaque driver-assigned identifier of a texture or structure. Zero is never assigned.
#[repr(transparent)]
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, bytemuck::Pod, bytemuck::Zeroable,
)]
pub struct ResourceId(pub u64);

impl ResourceId {
    pub const NULL: Self = Self(0);

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::AsRefStr, strum_macros::Display)]
pub enum MemoryLocation {
    GpuOnly,
    CpuToGpu,
    GpuToCpu,
}

impl MemoryLocation {
    pub fn is_host_visible(&self) -> bool {
        !matches!(self, MemoryLocation::GpuOnly)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::AsRefStr, strum_macros::Display)]
pub enum ResourceUsage {
    Read,
    Write,
    ReadWrite,
}

impl ResourceUsage {
    pub fn is_write(&self) -> bool {
        !matches!(self, ResourceUsage::Read)
    }

    pub fn is_read(&self) -> bool {
        !matches!(self, ResourceUsage::Write)
    }
}

/// Size and alignment a resource occupies when placed on a heap.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Footprint {
    pub size: u64,
    pub align: u64,
}

impl Footprint {
    /// Offset right past this footprint when placed at the first suitable offset after `cursor`.
    pub fn end_after(&self, cursor: u64) -> u64 {
        align_up(cursor, self.align) + self.size
    }
}

pub fn align_up<I>(value: I, align: I) -> I
where
    I: num_traits::PrimInt,
{
    if align <= I::one() {
        return value;
    }
    (value + align - I::one()) / align * align
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct BuildSizes {
    pub acceleration_structure_size: u64,
    pub build_scratch_size: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::AsRefStr, strum_macros::Display)]
pub enum AccelerationStructureLevel {
    Bottom,
    Top,
}

#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    Hash,
    strum_macros::AsRefStr,
    strum_macros::Display,
    strum_macros::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum PixelFormat {
    Bgra8Unorm,
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
    Rg16Float,
    R32Uint,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> u64 {
        match self {
            PixelFormat::Bgra8Unorm | PixelFormat::Rgba8Unorm => 4,
            PixelFormat::Rg16Float | PixelFormat::R32Uint => 4,
            PixelFormat::Rgba16Float => 8,
            PixelFormat::Rgba32Float => 16,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::AsRefStr, strum_macros::Display)]
pub enum TextureKind {
    #[strum(serialize = "2d")]
    D2,
    #[strum(serialize = "cube")]
    Cube,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::AsRefStr, strum_macros::Display)]
pub enum TextureUsage {
    /// Read through a sampler. Contents come from the host.
    Sampled,
    /// Written by kernels.
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureDescriptor {
    pub kind: TextureKind,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    pub fn new_2d(format: PixelFormat, width: u32, height: u32, usage: TextureUsage) -> Self {
        Self {
            kind: TextureKind::D2,
            format,
            width,
            height,
            mip_levels: 1,
            usage,
        }
    }

    pub fn new_cube(format: PixelFormat, size: u32, mip_levels: u32) -> Self {
        Self {
            kind: TextureKind::Cube,
            format,
            width: size,
            height: size,
            mip_levels: mip_levels.max(1),
            usage: TextureUsage::Sampled,
        }
    }

    pub fn layers(&self) -> u32 {
        match self.kind {
            TextureKind::D2 => 1,
            TextureKind::Cube => 6,
        }
    }

    /// Tightly packed size of every layer and mip level.
    pub fn byte_size(&self) -> u64 {
        (0..self.mip_levels)
            .map(|level| {
                let width = (self.width >> level).max(1) as u64;
                let height = (self.height >> level).max(1) as u64;
                width * height * self.format.bytes_per_pixel()
            })
            .sum::<u64>()
            * self.layers() as u64
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RawBuffer {
    pub id: u64,
    pub device_address: DeviceAddress,
    pub size: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RawTexture {
    pub id: u64,
    pub resource_id: ResourceId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RawAccelerationStructure {
    pub id: u64,
    pub device_address: DeviceAddress,
    pub resource_id: ResourceId,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::AsRefStr, strum_macros::Display)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn size(&self) -> u64 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::AsRefStr, strum_macros::Display)]
pub enum VertexFormat {
    Float3,
}

impl VertexFormat {
    pub fn size(&self) -> u64 {
        match self {
            VertexFormat::Float3 => 12,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriangleGeometryDescriptor {
    pub vertex_buffer: DeviceAddress,
    pub vertex_format: VertexFormat,
    pub vertex_stride: u64,
    pub vertex_count: u32,
    pub index_buffer: DeviceAddress,
    pub index_type: IndexType,
    pub triangle_count: u32,
    pub primitive_data_buffer: DeviceAddress,
    pub primitive_data_stride: u64,
    pub primitive_data_element_size: u64,
    pub opaque: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccelerationStructureDescriptor {
    Primitive {
        geometries: Vec<TriangleGeometryDescriptor>,
    },
    Instance {
        instance_buffer: DeviceAddress,
        instances: Vec<InstanceDescriptor>,
        /// Raw ids of the bottom-level structures, indexed by `acceleration_structure_index`.
        structures: Vec<u64>,
    },
}

impl AccelerationStructureDescriptor {
    pub fn level(&self) -> AccelerationStructureLevel {
        match self {
            AccelerationStructureDescriptor::Primitive { .. } => AccelerationStructureLevel::Bottom,
            AccelerationStructureDescriptor::Instance { .. } => AccelerationStructureLevel::Top,
        }
    }

    pub fn primitive_count(&self) -> u64 {
        match self {
            AccelerationStructureDescriptor::Primitive { geometries } => {
                geometries.iter().map(|g| g.triangle_count as u64).sum()
            }
            AccelerationStructureDescriptor::Instance { instances, .. } => instances.len() as u64,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RawResource {
    Buffer(u64),
    Texture(u64),
    AccelerationStructure(u64),
    Heap(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BuildAccelerationStructure {
        destination: u64,
        descriptor: AccelerationStructureDescriptor,
        scratch: u64,
    },
    CopyBuffer {
        source: u64,
        destination: u64,
        size: u64,
    },
    CopyTexture {
        source: u64,
        destination: u64,
    },
    UseResource {
        resource: RawResource,
        usage: ResourceUsage,
    },
    Dispatch {
        kernel: u64,
        arguments: DeviceAddress,
        threadgroups: [u32; 3],
        threads_per_group: [u32; 3],
    },
}

/// The GPU driver underneath a [`Device`](crate::Device).
///
/// Objects are referred to by the raw ids the driver hands out. Commands are recorded as plain data
/// and executed in order on [`submit`](Driver::submit).
pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    fn create_buffer(
        &self,
        label: &str,
        size: u64,
        location: MemoryLocation,
    ) -> Result<RawBuffer, DriverError>;
    fn write_buffer(&self, buffer: u64, offset: u64, data: &[u8]) -> Result<(), DriverError>;
    fn read_memory(&self, address: DeviceAddress, len: u64) -> Result<Vec<u8>, DriverError>;
    fn destroy_buffer(&self, buffer: u64);

    fn create_texture(
        &self,
        label: &str,
        descriptor: &TextureDescriptor,
        location: MemoryLocation,
    ) -> Result<RawTexture, DriverError>;
    fn write_texture(&self, texture: u64, data: &[u8]) -> Result<(), DriverError>;
    fn destroy_texture(&self, texture: u64);

    fn buffer_heap_footprint(&self, size: u64) -> Result<Footprint, DriverError>;
    fn texture_heap_footprint(&self, descriptor: &TextureDescriptor)
        -> Result<Footprint, DriverError>;
    fn create_heap(&self, label: &str, size: u64) -> Result<u64, DriverError>;
    fn create_buffer_on_heap(
        &self,
        heap: u64,
        offset: u64,
        size: u64,
        label: &str,
    ) -> Result<RawBuffer, DriverError>;
    fn create_texture_on_heap(
        &self,
        heap: u64,
        offset: u64,
        descriptor: &TextureDescriptor,
        label: &str,
    ) -> Result<RawTexture, DriverError>;
    fn destroy_heap(&self, heap: u64);

    fn acceleration_structure_sizes(
        &self,
        descriptor: &AccelerationStructureDescriptor,
    ) -> Result<BuildSizes, DriverError>;
    fn create_acceleration_structure(
        &self,
        label: &str,
        level: AccelerationStructureLevel,
        size: u64,
    ) -> Result<RawAccelerationStructure, DriverError>;
    fn destroy_acceleration_structure(&self, structure: u64);

    fn create_kernel(&self, label: &str, code: &[u8]) -> Result<u64, DriverError>;
    fn destroy_kernel(&self, kernel: u64);

    fn submit(
        &self,
        label: &str,
        commands: Vec<Command>,
        on_completed: Option<CompletionHandler>,
    ) -> Result<SubmissionId, DriverError>;
    fn is_complete(&self, submission: SubmissionId) -> Result<bool, DriverError>;
    fn wait(&self, submission: SubmissionId) -> Result<(), DriverError>;
    /// Runs completion handlers of every finished submission.
    fn poll(&self) -> Result<(), DriverError>;
}

#[test]
fn test_align_up() {
    assert_eq!(align_up(0u64, 256), 0);
    assert_eq!(align_up(1u64, 256), 256);
    assert_eq!(align_up(256u64, 256), 256);
    assert_eq!(align_up(257u32, 8), 264);
    assert_eq!(align_up(13u64, 1), 13);
    assert_eq!(align_up(13u64, 0), 13);
}

#[test]
fn test_texture_byte_size() {
    let cube = TextureDescriptor::new_cube(PixelFormat::Rgba16Float, 4, 3);
    // (16 + 4 + 1) texels per face, 8 bytes each, six faces
    assert_eq!(cube.byte_size(), 21 * 8 * 6);
    let seeds = TextureDescriptor::new_2d(PixelFormat::R32Uint, 3, 5, TextureUsage::Sampled);
    assert_eq!(seeds.byte_size(), 60);
    assert_eq!(PixelFormat::R32Uint.as_ref(), "R32Uint");
    assert_eq!(TextureKind::Cube.to_string(), "cube");
}

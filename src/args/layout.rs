//! Fixed-layout records kernels read. Every relationship is flattened into a device address or a
//! resource id; zero means "absent".

use crate::driver::{DeviceAddress, ResourceId};

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ArgsView {
    pub target: ResourceId,
    pub seeds: ResourceId,
    pub frame: DeviceAddress,
    pub background: DeviceAddress,
    pub env: DeviceAddress,
    pub acceleration: DeviceAddress,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameView {
    pub id: u32,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct AccelerationView {
    /// Device address of the top-level structure.
    pub structure: DeviceAddress,
    /// Array of [`MeshView`], indexed by `PrimitiveInstance::mesh_id`.
    pub meshes: DeviceAddress,
    /// Array of [`PrimitiveInstance`], indexed by the hit's instance id.
    pub instances: DeviceAddress,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshView {
    /// Array of [`PieceView`], indexed by the hit's geometry id.
    pub pieces: DeviceAddress,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PieceView {
    /// Always points at a [`MaterialView`], even for pieces without a material.
    pub material: DeviceAddress,
    /// Per-triangle records of the piece.
    pub primitive_data: DeviceAddress,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialView {
    pub albedo: ResourceId,
    pub metal_roughness: ResourceId,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct EnvView {
    pub diffuse: ResourceId,
    pub specular: ResourceId,
    pub lut: ResourceId,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct BackgroundView {
    pub source: ResourceId,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PrimitiveInstance {
    pub mesh_id: u32,
}

impl PrimitiveInstance {
    pub fn new(mesh_id: u32) -> Self {
        Self { mesh_id }
    }
}

#[test]
fn test_view_sizes() {
    use std::mem::size_of;

    assert_eq!(size_of::<ArgsView>(), 48);
    assert_eq!(size_of::<AccelerationView>(), 24);
    assert_eq!(size_of::<MeshView>(), 8);
    assert_eq!(size_of::<PieceView>(), 16);
    assert_eq!(size_of::<MaterialView>(), 16);
    assert_eq!(size_of::<EnvView>(), 24);
    assert_eq!(size_of::<PrimitiveInstance>(), 4);
}

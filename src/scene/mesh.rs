use crate::acceleration_structure::BottomAccelerationStructure;
use crate::driver::{IndexType, MemoryLocation, VertexFormat};
use crate::error::{DriverError, GeometryError};
use crate::scene::Material;
use crate::{Buffer, Device};

/// Per-triangle shading data, read by kernels through the primitive-data pointer of a hit.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Triangle {
    pub normals: [[f32; 3]; 3],
    _padding: u32,
    pub texture_coordinates: [[f32; 2]; 3],
}

impl Triangle {
    pub const SIZE: u64 = std::mem::size_of::<Triangle>() as u64;

    pub fn new(normals: [[f32; 3]; 3], texture_coordinates: [[f32; 2]; 3]) -> Self {
        Self {
            normals,
            _padding: 0,
            texture_coordinates,
        }
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub texture_coordinate: [f32; 2],
}

/// Packed 3×f32 vertex positions shared by every piece of a mesh.
#[derive(Debug, Clone)]
pub struct Positions {
    pub buffer: Buffer,
    pub stride: u64,
    pub count: u32,
}

impl Positions {
    pub fn new(device: &Device, name: Option<&str>, positions: &[[f32; 3]]) -> Result<Self, DriverError> {
        let buffer = device.create_buffer_init(
            name,
            bytemuck::cast_slice(positions),
            MemoryLocation::CpuToGpu,
        )?;
        Ok(Self {
            buffer,
            stride: VertexFormat::Float3.size(),
            count: positions.len() as u32,
        })
    }

    pub fn from_vertices(
        device: &Device,
        name: Option<&str>,
        vertices: &[Vertex],
    ) -> Result<Self, DriverError> {
        let positions = vertices.iter().map(|v| v.position).collect::<Vec<_>>();
        Self::new(device, name, &positions)
    }

    pub fn format(&self) -> VertexFormat {
        VertexFormat::Float3
    }
}

#[derive(Debug, Clone)]
pub struct Indices {
    pub buffer: Buffer,
    pub index_type: IndexType,
    pub count: u32,
}

impl Indices {
    pub fn new_u16(device: &Device, name: Option<&str>, indices: &[u16]) -> Result<Self, DriverError> {
        Ok(Self {
            buffer: device.create_buffer_init(
                name,
                bytemuck::cast_slice(indices),
                MemoryLocation::CpuToGpu,
            )?,
            index_type: IndexType::U16,
            count: indices.len() as u32,
        })
    }

    pub fn new_u32(device: &Device, name: Option<&str>, indices: &[u32]) -> Result<Self, DriverError> {
        Ok(Self {
            buffer: device.create_buffer_init(
                name,
                bytemuck::cast_slice(indices),
                MemoryLocation::CpuToGpu,
            )?,
            index_type: IndexType::U32,
            count: indices.len() as u32,
        })
    }
}

/// One [`Triangle`] record per triangle of a piece, `stride` bytes apart.
#[derive(Debug, Clone)]
pub struct PrimitiveData {
    pub buffer: Buffer,
    pub stride: u64,
}

impl PrimitiveData {
    pub fn new(device: &Device, name: Option<&str>, triangles: &[Triangle]) -> Result<Self, DriverError> {
        Ok(Self {
            buffer: device.create_buffer_init(
                name,
                bytemuck::cast_slice(triangles),
                MemoryLocation::CpuToGpu,
            )?,
            stride: Triangle::SIZE,
        })
    }

    /// Gathers per-vertex normals and texture coordinates into per-triangle records.
    pub fn from_vertices(
        device: &Device,
        name: Option<&str>,
        indices: &[u32],
        vertices: &[Vertex],
    ) -> Result<Self, DriverError> {
        let triangles = indices
            .chunks_exact(3)
            .map(|corners| {
                let vertex = |i: usize| vertices.get(corners[i] as usize).copied().unwrap_or_default();
                let (a, b, c) = (vertex(0), vertex(1), vertex(2));
                Triangle::new(
                    [a.normal, b.normal, c.normal],
                    [
                        a.texture_coordinate,
                        b.texture_coordinate,
                        c.texture_coordinate,
                    ],
                )
            })
            .collect::<Vec<_>>();
        Self::new(device, name, &triangles)
    }

    pub fn count(&self) -> u64 {
        if self.stride == 0 {
            return 0;
        }
        self.buffer.size() / self.stride
    }
}

/// Checks the triangle-piece invariants and returns the triangle count.
pub(crate) fn check_triangles(indices: &Indices, data: &PrimitiveData) -> Result<u32, GeometryError> {
    if indices.count % 3 != 0 {
        return Err(GeometryError::IndexCount(indices.count));
    }
    let required = indices.count as u64 * indices.index_type.size();
    if indices.buffer.size() < required {
        return Err(GeometryError::IndexBufferSize {
            available: indices.buffer.size(),
            required,
        });
    }
    if data.stride < Triangle::SIZE {
        return Err(GeometryError::Stride {
            stride: data.stride,
            required: Triangle::SIZE,
        });
    }
    let triangles = indices.count / 3;
    if data.count() != triangles as u64 {
        return Err(GeometryError::RecordCount {
            records: data.count(),
            triangles,
        });
    }
    Ok(triangles)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, strum_macros::AsRefStr, strum_macros::Display)]
pub enum PrimitiveType {
    Triangle,
}

/// A submesh: one index range with its own auxiliary data and material.
#[derive(Debug, Clone)]
pub struct Piece {
    primitive_type: PrimitiveType,
    indices: Indices,
    data: PrimitiveData,
    pub material: Option<Material>,
}

impl Piece {
    pub fn new(
        indices: Indices,
        data: PrimitiveData,
        material: Option<Material>,
    ) -> Result<Self, GeometryError> {
        check_triangles(&indices, &data)?;
        Ok(Self {
            primitive_type: PrimitiveType::Triangle,
            indices,
            data,
            material,
        })
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        self.primitive_type
    }

    pub fn indices(&self) -> &Indices {
        &self.indices
    }

    pub fn data(&self) -> &PrimitiveData {
        &self.data
    }

    pub fn triangle_count(&self) -> u32 {
        self.indices.count / 3
    }
}

/// One placed copy of a mesh.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Instance {
    pub transform: glam::Affine3A,
}

impl Instance {
    pub fn new(transform: glam::Affine3A) -> Self {
        Self { transform }
    }

    pub fn identity() -> Self {
        Self::new(glam::Affine3A::IDENTITY)
    }

    pub fn from_translation(translation: glam::Vec3) -> Self {
        Self::new(glam::Affine3A::from_translation(translation))
    }

    pub fn from_scale_rotation_translation(
        scale: glam::Vec3,
        rotation: glam::Quat,
        translation: glam::Vec3,
    ) -> Self {
        Self::new(glam::Affine3A::from_scale_rotation_translation(
            scale,
            rotation,
            translation,
        ))
    }

    /// Four columns of three floats: the basis vectors followed by the translation.
    pub fn packed_transform(&self) -> [[f32; 3]; 4] {
        let m = self.transform.to_cols_array();
        [
            [m[0], m[1], m[2]],
            [m[3], m[4], m[5]],
            [m[6], m[7], m[8]],
            [m[9], m[10], m[11]],
        ]
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::identity()
    }
}

#[derive(Debug, Clone)]
pub struct Mesh {
    name: Option<String>,
    positions: Positions,
    pieces: Vec<Piece>,
    instances: Vec<Instance>,
    acceleration_structure: Option<BottomAccelerationStructure>,
}

impl Mesh {
    pub fn new(
        name: Option<&str>,
        positions: Positions,
        pieces: Vec<Piece>,
        instances: Vec<Instance>,
    ) -> Self {
        Self {
            name: name.map(|s| s.to_owned()),
            positions,
            pieces,
            instances,
            acceleration_structure: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn positions(&self) -> &Positions {
        &self.positions
    }

    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Instances only move copies around, so editing them keeps the bottom-level structure.
    pub fn instances_mut(&mut self) -> &mut Vec<Instance> {
        &mut self.instances
    }

    /// Replaces the vertex positions and drops the now stale bottom-level structure.
    pub fn set_positions(&mut self, positions: Positions) {
        self.positions = positions;
        self.acceleration_structure = None;
    }

    /// Replaces the pieces and drops the now stale bottom-level structure.
    pub fn set_pieces(&mut self, pieces: Vec<Piece>) {
        self.pieces = pieces;
        self.acceleration_structure = None;
    }

    pub fn set_material(&mut self, piece: usize, material: Option<Material>) {
        if let Some(piece) = self.pieces.get_mut(piece) {
            piece.material = material;
        }
    }

    pub fn acceleration_structure(&self) -> Option<&BottomAccelerationStructure> {
        self.acceleration_structure.as_ref()
    }

    pub fn needs_build(&self) -> bool {
        self.acceleration_structure.is_none()
    }

    pub(crate) fn attach_acceleration_structure(&mut self, structure: BottomAccelerationStructure) {
        self.acceleration_structure = Some(structure);
    }
}

#[test]
fn test_triangle_layout() {
    assert_eq!(Triangle::SIZE, 64);
    let triangle = Triangle::new([[0.0, 0.0, 1.0]; 3], [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
    let bytes = bytemuck::bytes_of(&triangle);
    assert_eq!(&bytes[40..48], bytemuck::cast_slice::<f32, u8>(&[0.0, 0.0]));
    assert_eq!(&bytes[48..56], bytemuck::cast_slice::<f32, u8>(&[1.0, 0.0]));
}

#[test]
fn test_piece_invariants() {
    let device = Device::software();
    let data = PrimitiveData::new(&device, None, &[Triangle::default(); 2]).unwrap();

    let indices = Indices::new_u16(&device, None, &[0, 1, 2, 2, 1, 3]).unwrap();
    let piece = Piece::new(indices, data.clone(), None).unwrap();
    assert_eq!(piece.triangle_count(), 2);

    let indices = Indices::new_u16(&device, None, &[0, 1, 2, 2]).unwrap();
    assert_eq!(
        Piece::new(indices, data.clone(), None).unwrap_err(),
        GeometryError::IndexCount(4)
    );

    let indices = Indices::new_u32(&device, None, &[0, 1, 2]).unwrap();
    assert_eq!(
        Piece::new(indices, data, None).unwrap_err(),
        GeometryError::RecordCount {
            records: 2,
            triangles: 1
        }
    );
}

#[test]
fn test_primitive_data_from_vertices() {
    let device = Device::software();
    let vertices = (0..4)
        .map(|i| Vertex {
            position: [i as f32, 0.0, 0.0],
            normal: [0.0, i as f32, 0.0],
            texture_coordinate: [i as f32, 1.0],
        })
        .collect::<Vec<_>>();
    let data = PrimitiveData::from_vertices(&device, None, &[0, 1, 2, 3, 2, 1], &vertices).unwrap();
    assert_eq!(data.count(), 2);
    let bytes = data.buffer.read().unwrap();
    let triangles: &[Triangle] = bytemuck::cast_slice(&bytes);
    assert_eq!(triangles[1].normals[0], [0.0, 3.0, 0.0]);
    assert_eq!(triangles[1].texture_coordinates[2], [1.0, 1.0]);
}

#[test]
fn test_editing_geometry_drops_bottom_level_structure() {
    let device = Device::software();
    let positions = Positions::new(&device, None, &[[0.0; 3]; 3]).unwrap();
    let mut mesh = Mesh::new(Some("Mesh"), positions.clone(), Vec::new(), vec![Instance::identity()]);
    assert!(mesh.needs_build());
    crate::Accelerator::new(&device).build_geometry(&mut mesh, 0).unwrap();
    assert!(!mesh.needs_build());

    mesh.instances_mut().push(Instance::from_translation(glam::Vec3::X));
    assert!(!mesh.needs_build());
    mesh.set_positions(positions);
    assert!(mesh.needs_build());
}

#[test]
fn test_packed_transform_columns() {
    let instance = Instance::from_scale_rotation_translation(
        glam::Vec3::splat(2.0),
        glam::Quat::IDENTITY,
        glam::Vec3::new(1.0, 2.0, 3.0),
    );
    assert_eq!(
        instance.packed_transform(),
        [
            [2.0, 0.0, 0.0],
            [0.0, 2.0, 0.0],
            [0.0, 0.0, 2.0],
            [1.0, 2.0, 3.0]
        ]
    );
}

use crate::driver::TriangleGeometryDescriptor;
use crate::error::GeometryError;
use crate::scene::{check_triangles, Indices, Positions, PrimitiveData};
use crate::Buffer;

/// One piece of a mesh as the bottom-level builder sees it.
#[derive(Debug, Clone)]
pub struct TriangleGeometry {
    positions: Positions,
    indices: Indices,
    data: PrimitiveData,
    pub(crate) triangle_count: u32,
}

impl TriangleGeometry {
    pub fn new(
        positions: &Positions,
        indices: &Indices,
        data: &PrimitiveData,
    ) -> Result<Self, GeometryError> {
        let triangle_count = check_triangles(indices, data)?;
        Ok(Self {
            positions: positions.clone(),
            indices: indices.clone(),
            data: data.clone(),
            triangle_count,
        })
    }

    pub fn descriptor(&self) -> TriangleGeometryDescriptor {
        TriangleGeometryDescriptor {
            vertex_buffer: self.positions.buffer.device_address(),
            vertex_format: self.positions.format(),
            vertex_stride: self.positions.stride,
            vertex_count: self.positions.count,
            index_buffer: self.indices.buffer.device_address(),
            index_type: self.indices.index_type,
            triangle_count: self.triangle_count,
            primitive_data_buffer: self.data.buffer.device_address(),
            primitive_data_stride: self.data.stride,
            // each record is read whole
            primitive_data_element_size: self.data.stride,
            opaque: true,
        }
    }

    /// Buffers the descriptor's addresses point into.
    pub fn buffers(&self) -> [Buffer; 3] {
        [
            self.positions.buffer.clone(),
            self.indices.buffer.clone(),
            self.data.buffer.clone(),
        ]
    }

    pub fn triangle_count(&self) -> u32 {
        self.triangle_count
    }

    pub fn indices(&self) -> &Indices {
        &self.indices
    }

    pub fn positions(&self) -> &Positions {
        &self.positions
    }
}

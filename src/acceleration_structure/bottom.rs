use std::sync::Arc;

use crate::command_recorder::CommandRecorder;
use crate::driver::{AccelerationStructureDescriptor, BuildSizes};
use crate::error::AccelerationError;

use super::{AccelerationStructure, TriangleGeometry};

pub(crate) struct BottomAccelerationStructureRef {
    structure: AccelerationStructure,
    geometries: Vec<TriangleGeometry>,
    sizes: BuildSizes,
}

/// Hierarchy over the triangles of one mesh, one geometry per piece.
#[derive(Clone)]
pub struct BottomAccelerationStructure {
    pub(crate) inner: Arc<BottomAccelerationStructureRef>,
}

impl std::fmt::Debug for BottomAccelerationStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BottomAccelerationStructure")
            .field("structure", &self.inner.structure)
            .field("geometries", &self.inner.geometries.len())
            .finish()
    }
}

impl BottomAccelerationStructure {
    /// Allocates the structure and records its build. The build has run once `recorder`'s command
    /// buffer completes.
    pub(crate) fn encode(
        name: &str,
        recorder: &mut CommandRecorder,
        geometries: Vec<TriangleGeometry>,
    ) -> Result<Self, AccelerationError> {
        let descriptor = AccelerationStructureDescriptor::Primitive {
            geometries: geometries.iter().map(|g| g.descriptor()).collect(),
        };
        let inputs = geometries
            .iter()
            .flat_map(|g| g.buffers())
            .collect::<Vec<_>>();
        let (structure, sizes) = super::encode_build(name, recorder, descriptor, &inputs)?;
        Ok(Self {
            inner: Arc::new(BottomAccelerationStructureRef {
                structure,
                geometries,
                sizes,
            }),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.structure.name()
    }

    pub fn acceleration_structure(&self) -> &AccelerationStructure {
        &self.inner.structure
    }

    pub fn geometries(&self) -> &[TriangleGeometry] {
        &self.inner.geometries
    }

    pub fn geometry_count(&self) -> usize {
        self.inner.geometries.len()
    }

    pub fn build_sizes(&self) -> BuildSizes {
        self.inner.sizes
    }

    pub fn ptr_eq(&self, other: &BottomAccelerationStructure) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

use std::sync::Arc;

use crate::command_recorder::CommandRecorder;
use crate::driver::BuildSizes;
use crate::error::AccelerationError;

use super::{AccelerationStructure, BottomAccelerationStructure, InstanceDescriptor, InstanceGeometry};

pub(crate) struct TopAccelerationStructureRef {
    structure: AccelerationStructure,
    geometry: InstanceGeometry,
    sizes: BuildSizes,
}

/// Hierarchy over instances of bottom-level structures. This is what rays are traced against.
#[derive(Clone)]
pub struct TopAccelerationStructure {
    pub(crate) inner: Arc<TopAccelerationStructureRef>,
}

impl std::fmt::Debug for TopAccelerationStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopAccelerationStructure")
            .field("structure", &self.inner.structure)
            .field("instances", &self.inner.geometry.instance_count())
            .finish()
    }
}

impl TopAccelerationStructure {
    pub(crate) fn encode(
        name: &str,
        recorder: &mut CommandRecorder,
        instances: &[InstanceDescriptor],
        structures: &[BottomAccelerationStructure],
    ) -> Result<Self, AccelerationError> {
        let device = recorder.device().clone();
        let geometry = InstanceGeometry::new(&device, name, instances, structures).map_err(
            |source| AccelerationError::AccelerationAllocationFailed {
                label: format!("{} instance buffer", name),
                size: std::mem::size_of_val(instances) as u64,
                source,
            },
        )?;
        // bottom-level builds recorded earlier in this command buffer must finish first
        for bottom in structures {
            recorder.use_acceleration_structure(
                bottom.acceleration_structure(),
                crate::ResourceUsage::Read,
            );
        }
        let inputs = [geometry.instance_buffer().clone()];
        let (structure, sizes) =
            super::encode_build(name, recorder, geometry.descriptor(), &inputs)?;
        Ok(Self {
            inner: Arc::new(TopAccelerationStructureRef {
                structure,
                geometry,
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

    pub fn geometry(&self) -> &InstanceGeometry {
        &self.inner.geometry
    }

    pub fn instances(&self) -> &[InstanceDescriptor] {
        self.inner.geometry.instances()
    }

    pub fn instance_count(&self) -> u32 {
        self.inner.geometry.instance_count()
    }

    pub fn bottom_level_structures(&self) -> &[BottomAccelerationStructure] {
        self.inner.geometry.structures()
    }

    pub fn build_sizes(&self) -> BuildSizes {
        self.inner.sizes
    }
}

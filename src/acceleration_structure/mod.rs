mod bottom;
mod instance_geometry;
mod top;
mod triangle_geometry;

pub use bottom::BottomAccelerationStructure;
pub use instance_geometry::{
    InstanceDescriptor, InstanceGeometry, INSTANCE_OPTION_DISABLE_TRIANGLE_CULLING,
    INSTANCE_OPTION_NON_OPAQUE, INSTANCE_OPTION_OPAQUE,
    INSTANCE_OPTION_TRIANGLE_FRONT_FACING_WINDING_COUNTER_CLOCKWISE,
};
pub use top::TopAccelerationStructure;
pub use triangle_geometry::TriangleGeometry;

use std::sync::Arc;

use crate::command_recorder::CommandRecorder;
use crate::driver::{
    AccelerationStructureDescriptor, AccelerationStructureLevel, BuildSizes, DeviceAddress,
    MemoryLocation, RawAccelerationStructure, ResourceId,
};
use crate::error::{AccelerationError, DriverError};
use crate::{Buffer, Device};

pub(crate) struct AccelerationStructureRef {
    name: Option<String>,
    pub(crate) raw: RawAccelerationStructure,
    level: AccelerationStructureLevel,
    size: u64,
    device: Device,
}

#[derive(Clone)]
pub struct AccelerationStructure {
    pub(crate) inner: Arc<AccelerationStructureRef>,
}

impl std::fmt::Debug for AccelerationStructure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccelerationStructure")
            .field("name", &self.inner.name)
            .field("level", &self.inner.level)
            .field("size", &self.inner.size)
            .finish()
    }
}

impl AccelerationStructure {
    pub(crate) fn new(
        name: Option<&str>,
        device: &Device,
        level: AccelerationStructureLevel,
        size: u64,
    ) -> Result<Self, DriverError> {
        let raw = device.driver().create_acceleration_structure(
            name.unwrap_or("acceleration structure"),
            level,
            size,
        )?;
        Ok(Self {
            inner: Arc::new(AccelerationStructureRef {
                name: name.map(|s| s.to_owned()),
                raw,
                level,
                size,
                device: device.clone(),
            }),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn level(&self) -> AccelerationStructureLevel {
        self.inner.level
    }

    pub fn size(&self) -> u64 {
        self.inner.size
    }

    pub fn device_address(&self) -> DeviceAddress {
        self.inner.raw.device_address
    }

    pub fn resource_id(&self) -> ResourceId {
        self.inner.raw.resource_id
    }

    pub fn raw_id(&self) -> u64 {
        self.inner.raw.id
    }
}

impl Drop for AccelerationStructureRef {
    fn drop(&mut self) {
        self.device
            .driver()
            .destroy_acceleration_structure(self.raw.id);
    }
}

/// Queries the build sizes for `descriptor`, allocates a structure of exactly that size plus its
/// scratch buffer, and records the build.
pub(crate) fn encode_build(
    name: &str,
    recorder: &mut CommandRecorder,
    descriptor: AccelerationStructureDescriptor,
    inputs: &[Buffer],
) -> Result<(AccelerationStructure, BuildSizes), AccelerationError> {
    let device = recorder.device().clone();
    let level = descriptor.level();
    let sizes = device.driver().acceleration_structure_sizes(&descriptor)?;
    log::debug!(
        "{}: {} bytes, {} bytes of scratch",
        name,
        sizes.acceleration_structure_size,
        sizes.build_scratch_size
    );

    let structure = AccelerationStructure::new(
        Some(name),
        &device,
        level,
        sizes.acceleration_structure_size,
    )
    .map_err(|source| AccelerationError::AccelerationAllocationFailed {
        label: name.to_owned(),
        size: sizes.acceleration_structure_size,
        source,
    })?;

    let scratch_name = format!("{} scratch buffer", name);
    let scratch_buffer = device
        .create_buffer(
            Some(&scratch_name),
            sizes.build_scratch_size,
            MemoryLocation::GpuOnly,
        )
        .map_err(|source| AccelerationError::AccelerationAllocationFailed {
            label: scratch_name.clone(),
            size: sizes.build_scratch_size,
            source,
        })?;

    recorder.build_acceleration_structure(&structure, descriptor, &scratch_buffer, inputs);
    Ok((structure, sizes))
}

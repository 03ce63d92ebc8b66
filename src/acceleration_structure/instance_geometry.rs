use crate::driver::{AccelerationStructureDescriptor, MemoryLocation};
use crate::error::DriverError;
use crate::{Buffer, Device};

pub const INSTANCE_OPTION_DISABLE_TRIANGLE_CULLING: u32 = 1 << 0;
pub const INSTANCE_OPTION_TRIANGLE_FRONT_FACING_WINDING_COUNTER_CLOCKWISE: u32 = 1 << 1;
pub const INSTANCE_OPTION_OPAQUE: u32 = 1 << 2;
pub const INSTANCE_OPTION_NON_OPAQUE: u32 = 1 << 3;

/// One placed copy of a bottom-level structure, as read by the top-level build.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceDescriptor {
    pub transformation_matrix: [[f32; 3]; 4],
    pub options: u32,
    pub mask: u32,
    pub intersection_function_table_offset: u32,
    pub acceleration_structure_index: u32,
}

impl InstanceDescriptor {
    /// An opaque instance visible to every ray.
    pub fn opaque(transformation_matrix: [[f32; 3]; 4], acceleration_structure_index: u32) -> Self {
        Self {
            transformation_matrix,
            options: INSTANCE_OPTION_OPAQUE,
            mask: 0xFF,
            intersection_function_table_offset: 0,
            acceleration_structure_index,
        }
    }
}

/// Instance descriptors uploaded for a top-level build, with the bottom-level structures they index.
#[derive(Debug, Clone)]
pub struct InstanceGeometry {
    instances: Vec<InstanceDescriptor>,
    structures: Vec<super::BottomAccelerationStructure>,
    instance_buffer: Buffer,
}

impl InstanceGeometry {
    pub fn new(
        device: &Device,
        name: &str,
        instances: &[InstanceDescriptor],
        structures: &[super::BottomAccelerationStructure],
    ) -> Result<Self, DriverError> {
        let instance_buffer = device.create_buffer_init(
            Some(&format!("{} instance buffer", name)),
            bytemuck::cast_slice(instances),
            MemoryLocation::CpuToGpu,
        )?;
        Ok(Self {
            instances: instances.to_vec(),
            structures: structures.to_vec(),
            instance_buffer,
        })
    }

    pub fn descriptor(&self) -> AccelerationStructureDescriptor {
        AccelerationStructureDescriptor::Instance {
            instance_buffer: self.instance_buffer.device_address(),
            instances: self.instances.clone(),
            structures: self
                .structures
                .iter()
                .map(|s| s.acceleration_structure().raw_id())
                .collect(),
        }
    }

    pub fn instance_count(&self) -> u32 {
        self.instances.len() as u32
    }

    pub fn instances(&self) -> &[InstanceDescriptor] {
        &self.instances
    }

    pub fn structures(&self) -> &[super::BottomAccelerationStructure] {
        &self.structures
    }

    pub fn instance_buffer(&self) -> &Buffer {
        &self.instance_buffer
    }
}

#[test]
fn test_instance_descriptor_layout() {
    assert_eq!(std::mem::size_of::<InstanceDescriptor>(), 64);
    let descriptor = InstanceDescriptor::opaque([[0.0; 3]; 4], 3);
    let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&descriptor));
    assert_eq!(&words[12..], &[INSTANCE_OPTION_OPAQUE, 0xFF, 0, 3]);
}

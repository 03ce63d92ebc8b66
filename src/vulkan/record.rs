use ash::vk;

use crate::acceleration_structure::{
    InstanceDescriptor, INSTANCE_OPTION_DISABLE_TRIANGLE_CULLING, INSTANCE_OPTION_OPAQUE,
};
use crate::driver::{
    AccelerationStructureDescriptor, AccelerationStructureLevel, IndexType, PixelFormat,
    ResourceUsage, TextureDescriptor, TextureKind, TextureUsage, TriangleGeometryDescriptor,
    VertexFormat,
};

pub(super) fn format(format: PixelFormat) -> vk::Format {
    match format {
        PixelFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        PixelFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        PixelFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        PixelFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        PixelFormat::Rg16Float => vk::Format::R16G16_SFLOAT,
        PixelFormat::R32Uint => vk::Format::R32_UINT,
    }
}

pub(super) fn image_create_info(descriptor: &TextureDescriptor) -> vk::ImageCreateInfo {
    let usage = match descriptor.usage {
        TextureUsage::Sampled => {
            vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
        }
        TextureUsage::Storage => {
            vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
        }
    };
    let flags = match descriptor.kind {
        TextureKind::D2 => vk::ImageCreateFlags::empty(),
        TextureKind::Cube => vk::ImageCreateFlags::CUBE_COMPATIBLE,
    };
    vk::ImageCreateInfo::builder()
        .flags(flags)
        .image_type(vk::ImageType::TYPE_2D)
        .format(format(descriptor.format))
        .extent(vk::Extent3D {
            width: descriptor.width,
            height: descriptor.height,
            depth: 1,
        })
        .mip_levels(descriptor.mip_levels)
        .array_layers(descriptor.layers())
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .build()
}

pub(super) fn view_type(kind: TextureKind) -> vk::ImageViewType {
    match kind {
        TextureKind::D2 => vk::ImageViewType::TYPE_2D,
        TextureKind::Cube => vk::ImageViewType::CUBE,
    }
}

fn mip_extent(descriptor: &TextureDescriptor, level: u32) -> vk::Extent3D {
    vk::Extent3D {
        width: (descriptor.width >> level).max(1),
        height: (descriptor.height >> level).max(1),
        depth: 1,
    }
}

fn layers(descriptor: &TextureDescriptor, level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: level,
        base_array_layer: 0,
        layer_count: descriptor.layers(),
    }
}

/// Upload regions for tightly packed data, mip level by mip level, every layer of a level together.
pub(super) fn upload_regions(descriptor: &TextureDescriptor) -> Vec<vk::BufferImageCopy> {
    let mut offset = 0;
    (0..descriptor.mip_levels)
        .map(|level| {
            let extent = mip_extent(descriptor, level);
            let region = vk::BufferImageCopy {
                buffer_offset: offset,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: layers(descriptor, level),
                image_offset: vk::Offset3D::default(),
                image_extent: extent,
            };
            offset += extent.width as u64
                * extent.height as u64
                * descriptor.format.bytes_per_pixel()
                * descriptor.layers() as u64;
            region
        })
        .collect()
}

pub(super) fn copy_regions(descriptor: &TextureDescriptor) -> Vec<vk::ImageCopy> {
    (0..descriptor.mip_levels)
        .map(|level| vk::ImageCopy {
            src_subresource: layers(descriptor, level),
            src_offset: vk::Offset3D::default(),
            dst_subresource: layers(descriptor, level),
            dst_offset: vk::Offset3D::default(),
            extent: mip_extent(descriptor, level),
        })
        .collect()
}

pub(super) fn level(level: AccelerationStructureLevel) -> vk::AccelerationStructureTypeKHR {
    match level {
        AccelerationStructureLevel::Bottom => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        AccelerationStructureLevel::Top => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
    }
}

fn triangles(geometry: &TriangleGeometryDescriptor) -> vk::AccelerationStructureGeometryKHR {
    let vertex_format = match geometry.vertex_format {
        VertexFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
    };
    let index_type = match geometry.index_type {
        IndexType::U16 => vk::IndexType::UINT16,
        IndexType::U32 => vk::IndexType::UINT32,
    };
    let flags = if geometry.opaque {
        vk::GeometryFlagsKHR::OPAQUE | vk::GeometryFlagsKHR::NO_DUPLICATE_ANY_HIT_INVOCATION
    } else {
        vk::GeometryFlagsKHR::NO_DUPLICATE_ANY_HIT_INVOCATION
    };
    vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
        .flags(flags)
        .geometry(vk::AccelerationStructureGeometryDataKHR {
            triangles: vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
                .vertex_format(vertex_format)
                .vertex_data(vk::DeviceOrHostAddressConstKHR {
                    device_address: geometry.vertex_buffer,
                })
                .vertex_stride(geometry.vertex_stride)
                .max_vertex(geometry.vertex_count.saturating_sub(1))
                .index_type(index_type)
                .index_data(vk::DeviceOrHostAddressConstKHR {
                    device_address: geometry.index_buffer,
                })
                .build(),
        })
        .build()
}

/// Geometries and per-geometry primitive counts of a build. `instances` is the address of the
/// converted instance array for top-level builds.
pub(super) fn geometries(
    descriptor: &AccelerationStructureDescriptor,
    instances: vk::DeviceAddress,
) -> (Vec<vk::AccelerationStructureGeometryKHR>, Vec<u32>) {
    match descriptor {
        AccelerationStructureDescriptor::Primitive { geometries } => (
            geometries.iter().map(triangles).collect(),
            geometries.iter().map(|g| g.triangle_count).collect(),
        ),
        AccelerationStructureDescriptor::Instance {
            instances: descriptors,
            ..
        } => {
            let geometry = vk::AccelerationStructureGeometryKHR::builder()
                .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                .geometry(vk::AccelerationStructureGeometryDataKHR {
                    instances: vk::AccelerationStructureGeometryInstancesDataKHR::builder()
                        .array_of_pointers(false)
                        .data(vk::DeviceOrHostAddressConstKHR {
                            device_address: instances,
                        })
                        .build(),
                })
                .build();
            (vec![geometry], vec![descriptors.len() as u32])
        }
    }
}

/// Converts one instance descriptor. `reference` is the device address of the bottom-level
/// structure it places.
pub(super) fn instance(
    descriptor: &InstanceDescriptor,
    reference: vk::DeviceAddress,
) -> vk::AccelerationStructureInstanceKHR {
    // columns in, rows out
    let columns = descriptor.transformation_matrix;
    let mut matrix = [0.0f32; 12];
    for row in 0..3 {
        for column in 0..4 {
            matrix[row * 4 + column] = columns[column][row];
        }
    }
    let mut flags = vk::GeometryInstanceFlagsKHR::empty();
    if descriptor.options & INSTANCE_OPTION_OPAQUE != 0 {
        flags |= vk::GeometryInstanceFlagsKHR::FORCE_OPAQUE;
    }
    if descriptor.options & INSTANCE_OPTION_DISABLE_TRIANGLE_CULLING != 0 {
        flags |= vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE;
    }
    vk::AccelerationStructureInstanceKHR {
        transform: vk::TransformMatrixKHR { matrix },
        instance_custom_index_and_mask: vk::Packed24_8::new(
            descriptor.acceleration_structure_index,
            descriptor.mask as u8,
        ),
        instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
            descriptor.intersection_function_table_offset,
            flags.as_raw() as u8,
        ),
        acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
            device_handle: reference,
        },
    }
}

pub(super) fn instance_bytes(instances: &[vk::AccelerationStructureInstanceKHR]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            instances.as_ptr() as *const u8,
            std::mem::size_of_val(instances),
        )
    }
}

/// Global barrier making everything written so far visible to whatever `usage` does next.
pub(super) fn use_barrier(usage: ResourceUsage) -> vk::MemoryBarrier {
    let mut dst = vk::AccessFlags::MEMORY_READ;
    if usage.is_write() {
        dst |= vk::AccessFlags::MEMORY_WRITE;
    }
    vk::MemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
        .dst_access_mask(dst)
        .build()
}

#[test]
fn test_instance_transform_is_row_major() {
    let descriptor = InstanceDescriptor::opaque(
        [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0], [5.0, 6.0, 7.0]],
        3,
    );
    let converted = instance(&descriptor, 0x1000);
    assert_eq!(
        converted.transform.matrix,
        [1.0, 0.0, 0.0, 5.0, 0.0, 1.0, 0.0, 6.0, 0.0, 0.0, 1.0, 7.0]
    );
    assert_eq!(converted.instance_custom_index_and_mask.low_24(), 3);
    assert_eq!(converted.instance_custom_index_and_mask.high_8(), 0xFF);
}

#[test]
fn test_upload_regions_follow_packed_layout() {
    let descriptor = TextureDescriptor::new_cube(PixelFormat::Rgba8Unorm, 4, 2);
    let regions = upload_regions(&descriptor);
    assert_eq!(regions.len(), 2);
    assert_eq!(regions[1].buffer_offset, 4 * 4 * 4 * 6);
    assert_eq!(regions[1].image_extent.width, 2);
}

use ash::vk;

use crate::driver::{ResourceId, TextureUsage};

/// Texture slots of the one descriptor set every dispatch binds. Binding 0 holds sampled views,
/// binding 1 storage views, both indexed by `ResourceId - 1`.
pub(super) const MAX_TEXTURES: u32 = 4096;

pub(super) struct BindlessSet {
    pub(super) layout: vk::DescriptorSetLayout,
    pub(super) pool: vk::DescriptorPool,
    pub(super) set: vk::DescriptorSet,
    pub(super) sampler: vk::Sampler,
    pub(super) pipeline_layout: vk::PipelineLayout,
}

impl BindlessSet {
    pub(super) unsafe fn new(device: &ash::Device) -> Result<Self, vk::Result> {
        let bindings = [
            vk::DescriptorSetLayoutBinding::builder()
                .binding(0)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(MAX_TEXTURES)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
            vk::DescriptorSetLayoutBinding::builder()
                .binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(MAX_TEXTURES)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .build(),
        ];
        let binding_flags = [vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND; 2];
        let mut binding_flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder()
            .binding_flags(&binding_flags)
            .build();
        let layout = device.create_descriptor_set_layout(
            &vk::DescriptorSetLayoutCreateInfo::builder()
                .bindings(&bindings)
                .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
                .push_next(&mut binding_flags_info),
            None,
        )?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: MAX_TEXTURES,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: MAX_TEXTURES,
            },
        ];
        let pool = device.create_descriptor_pool(
            &vk::DescriptorPoolCreateInfo::builder()
                .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
                .max_sets(1)
                .pool_sizes(&pool_sizes),
            None,
        )?;
        let set = device.allocate_descriptor_sets(
            &vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(pool)
                .set_layouts(&[layout]),
        )?[0];

        let sampler = device.create_sampler(
            &vk::SamplerCreateInfo::builder()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
                .address_mode_u(vk::SamplerAddressMode::REPEAT)
                .address_mode_v(vk::SamplerAddressMode::REPEAT)
                .address_mode_w(vk::SamplerAddressMode::REPEAT)
                .max_lod(vk::LOD_CLAMP_NONE),
            None,
        )?;

        // the argument address is the only push constant
        let pipeline_layout = device.create_pipeline_layout(
            &vk::PipelineLayoutCreateInfo::builder()
                .set_layouts(&[layout])
                .push_constant_ranges(&[vk::PushConstantRange {
                    stage_flags: vk::ShaderStageFlags::COMPUTE,
                    offset: 0,
                    size: std::mem::size_of::<u64>() as u32,
                }]),
            None,
        )?;

        Ok(Self {
            layout,
            pool,
            set,
            sampler,
            pipeline_layout,
        })
    }

    /// Points slot `id` at `view`.
    pub(super) unsafe fn write(
        &self,
        device: &ash::Device,
        id: ResourceId,
        view: vk::ImageView,
        usage: TextureUsage,
    ) {
        let slot = (id.0 - 1) as u32;
        let image_info = [vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: view,
            image_layout: vk::ImageLayout::GENERAL,
        }];
        let mut writes = vec![vk::WriteDescriptorSet::builder()
            .dst_set(self.set)
            .dst_binding(0)
            .dst_array_element(slot)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info)
            .build()];
        if usage == TextureUsage::Storage {
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(self.set)
                    .dst_binding(1)
                    .dst_array_element(slot)
                    .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                    .image_info(&image_info)
                    .build(),
            );
        }
        device.update_descriptor_sets(&writes, &[]);
    }

    pub(super) unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline_layout(self.pipeline_layout, None);
        device.destroy_sampler(self.sampler, None);
        device.destroy_descriptor_pool(self.pool, None);
        device.destroy_descriptor_set_layout(self.layout, None);
    }
}

/// Hands out texture slots, reusing freed ones first.
#[derive(Default)]
pub(super) struct Slots {
    next: u32,
    free: Vec<u32>,
}

impl Slots {
    pub(super) fn allocate(&mut self) -> Option<ResourceId> {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None if self.next < MAX_TEXTURES => {
                self.next += 1;
                self.next - 1
            }
            None => return None,
        };
        Some(ResourceId(slot as u64 + 1))
    }

    pub(super) fn release(&mut self, id: ResourceId) {
        if !id.is_null() {
            self.free.push((id.0 - 1) as u32);
        }
    }
}

#[test]
fn test_slots_are_reused_and_never_null() {
    let mut slots = Slots::default();
    let a = slots.allocate().unwrap();
    let b = slots.allocate().unwrap();
    assert_eq!((a, b), (ResourceId(1), ResourceId(2)));
    slots.release(a);
    assert_eq!(slots.allocate(), Some(ResourceId(1)));
}

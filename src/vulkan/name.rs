pub mod device {
    #[derive(Debug, Copy, Clone, PartialEq, strum_macros::AsRefStr, strum_macros::EnumString)]
    pub enum Extension {
        #[strum(serialize = "VK_KHR_deferred_host_operations")]
        KhrDeferredHostOperations,
        #[strum(serialize = "VK_KHR_acceleration_structure")]
        KhrAccelerationStructure,
        #[strum(serialize = "VK_KHR_ray_query")]
        KhrRayQuery,
        #[strum(serialize = "VK_KHR_buffer_device_address")]
        KhrBufferDeviceAddress,
        #[strum(serialize = "VK_EXT_descriptor_indexing")]
        ExtDescriptorIndexing,
    }

    /// Extensions the device handed to [`VulkanDriver`](super::super::VulkanDriver) must have
    /// enabled.
    pub const REQUIRED: &[Extension] = &[
        Extension::KhrDeferredHostOperations,
        Extension::KhrAccelerationStructure,
        Extension::KhrRayQuery,
        Extension::KhrBufferDeviceAddress,
        Extension::ExtDescriptorIndexing,
    ];
}

#[test]
fn test_extension_names() {
    use std::str::FromStr;

    let extension = device::Extension::KhrAccelerationStructure;
    assert_eq!(extension.as_ref(), "VK_KHR_acceleration_structure");
    assert_eq!(
        device::Extension::from_str("VK_KHR_ray_query").unwrap(),
        device::Extension::KhrRayQuery
    );
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::driver::{
    MemoryLocation, PixelFormat, RawTexture, ResourceId, TextureDescriptor, TextureUsage,
};
use crate::error::DriverError;
use crate::heap::Heap;
use crate::Device;

pub(crate) struct TextureRef {
    pub(crate) name: Option<String>,
    pub(crate) raw: RawTexture,
    descriptor: TextureDescriptor,
    location: MemoryLocation,
    ready: AtomicBool,
    device: Device,
    heap: Option<Heap>,
}

#[derive(Clone)]
pub struct Texture {
    pub(crate) inner: Arc<TextureRef>,
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("name", &self.inner.name)
            .field("descriptor", &self.inner.descriptor)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl Texture {
    /// Creates a texture without contents. Sampled textures stay unavailable until
    /// [`replace`](Self::replace) uploads them.
    pub(crate) fn new(
        name: Option<&str>,
        device: &Device,
        descriptor: &TextureDescriptor,
        location: MemoryLocation,
    ) -> Result<Self, DriverError> {
        let raw = device
            .driver()
            .create_texture(name.unwrap_or("texture"), descriptor, location)?;
        let ready = descriptor.usage == TextureUsage::Storage;
        Ok(Self::from_raw(name, device, raw, descriptor, location, ready, None))
    }

    pub(crate) fn from_raw(
        name: Option<&str>,
        device: &Device,
        raw: RawTexture,
        descriptor: &TextureDescriptor,
        location: MemoryLocation,
        ready: bool,
        heap: Option<Heap>,
    ) -> Self {
        Self {
            inner: Arc::new(TextureRef {
                name: name.map(|s| s.to_owned()),
                raw,
                descriptor: descriptor.clone(),
                location,
                ready: AtomicBool::new(ready),
                device: device.clone(),
                heap,
            }),
        }
    }

    pub(crate) fn new_init<I: AsRef<[u8]>>(
        name: Option<&str>,
        device: &Device,
        descriptor: &TextureDescriptor,
        data: I,
    ) -> Result<Self, DriverError> {
        let texture = Self::new(name, device, descriptor, MemoryLocation::GpuOnly)?;
        texture.replace(data)?;
        Ok(texture)
    }

    /// A 1×1 texture of one solid colour, used where real contents are missing.
    pub fn fill(device: &Device, color: [f32; 4]) -> Result<Self, DriverError> {
        let [r, g, b, a] = color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
        Self::new_init(
            Some("Fill"),
            device,
            &TextureDescriptor::new_2d(PixelFormat::Bgra8Unorm, 1, 1, TextureUsage::Sampled),
            [b, g, r, a],
        )
    }

    /// Uploads the full contents of every layer and mip level and marks the texture available.
    pub fn replace<I: AsRef<[u8]>>(&self, data: I) -> Result<(), DriverError> {
        self.inner
            .device
            .driver()
            .write_texture(self.inner.raw.id, data.as_ref())?;
        self.inner.ready.store(true, Ordering::Release);
        Ok(())
    }

    pub(crate) fn mark_ready(&self) {
        self.inner.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.inner.descriptor
    }

    pub fn width(&self) -> u32 {
        self.inner.descriptor.width
    }

    pub fn height(&self) -> u32 {
        self.inner.descriptor.height
    }

    pub fn location(&self) -> MemoryLocation {
        self.inner.location
    }

    pub fn resource_id(&self) -> ResourceId {
        self.inner.raw.resource_id
    }

    pub fn raw_id(&self) -> u64 {
        self.inner.raw.id
    }

    pub fn heap(&self) -> Option<&Heap> {
        self.inner.heap.as_ref()
    }

    pub fn ptr_eq(&self, other: &Texture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Device {
    pub fn create_texture(
        &self,
        name: Option<&str>,
        descriptor: &TextureDescriptor,
        location: MemoryLocation,
    ) -> Result<Texture, DriverError> {
        Texture::new(name, self, descriptor, location)
    }

    pub fn create_texture_init<I: AsRef<[u8]>>(
        &self,
        name: Option<&str>,
        descriptor: &TextureDescriptor,
        data: I,
    ) -> Result<Texture, DriverError> {
        Texture::new_init(name, self, descriptor, data)
    }
}

impl Drop for TextureRef {
    fn drop(&mut self) {
        self.device.driver().destroy_texture(self.raw.id);
    }
}

#[test]
fn test_fill_texture() {
    let device = Device::software();
    let texture = Texture::fill(&device, [1.0, 0.5, 0.0, 1.0]).unwrap();
    assert!(texture.is_ready());
    assert!(!texture.resource_id().is_null());
    assert_eq!(texture.descriptor().format, PixelFormat::Bgra8Unorm);
    assert_eq!((texture.width(), texture.height()), (1, 1));
}

#[test]
fn test_sampled_texture_is_unavailable_until_uploaded() {
    let device = Device::software();
    let descriptor = TextureDescriptor::new_2d(PixelFormat::Rgba8Unorm, 2, 2, TextureUsage::Sampled);
    let texture = device
        .create_texture(Some("Albedo"), &descriptor, MemoryLocation::GpuOnly)
        .unwrap();
    assert!(!texture.is_ready());
    assert!(texture.replace([0u8; 8]).is_err());
    assert!(!texture.is_ready());
    texture.replace([0u8; 16]).unwrap();
    assert!(texture.is_ready());

    let target = device
        .create_texture(
            Some("Target"),
            &TextureDescriptor::new_2d(PixelFormat::Rgba16Float, 4, 4, TextureUsage::Storage),
            MemoryLocation::GpuOnly,
        )
        .unwrap();
    assert!(target.is_ready());
}

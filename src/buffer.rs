use std::sync::Arc;

use crate::driver::{DeviceAddress, MemoryLocation, RawBuffer};
use crate::error::DriverError;
use crate::heap::Heap;
use crate::Device;

pub(crate) struct BufferRef {
    pub(crate) name: Option<String>,
    pub(crate) raw: RawBuffer,
    location: MemoryLocation,
    device: Device,
    // Keeps the backing heap alive for heap-placed buffers.
    heap: Option<Heap>,
}

#[derive(Clone)]
pub struct Buffer {
    pub(crate) inner: Arc<BufferRef>,
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.inner.name)
            .field("size", &self.size())
            .field("location", &self.inner.location)
            .field("device_address", &format_args!("{:#x}", self.device_address()))
            .finish()
    }
}

impl Buffer {
    pub(crate) fn new<I>(
        name: Option<&str>,
        device: &Device,
        size: I,
        location: MemoryLocation,
    ) -> Result<Self, DriverError>
    where
        I: num_traits::PrimInt,
    {
        let size = size.to_u64().unwrap_or(u64::MAX);
        let raw = device
            .driver()
            .create_buffer(name.unwrap_or("buffer"), size, location)?;
        Ok(Self::from_raw(name, device, raw, location, None))
    }

    pub(crate) fn from_raw(
        name: Option<&str>,
        device: &Device,
        raw: RawBuffer,
        location: MemoryLocation,
        heap: Option<Heap>,
    ) -> Self {
        Self {
            inner: Arc::new(BufferRef {
                name: name.map(|s| s.to_owned()),
                raw,
                location,
                device: device.clone(),
                heap,
            }),
        }
    }

    /// Creates a buffer holding `data`. Memory the host cannot map is filled through a staging copy.
    pub(crate) fn new_init<I: AsRef<[u8]>>(
        name: Option<&str>,
        device: &Device,
        data: I,
        location: MemoryLocation,
    ) -> Result<Self, DriverError> {
        let data = data.as_ref();
        let buffer = Self::new(name, device, data.len(), location)?;
        if buffer.is_mappable() {
            buffer.copy_from(data)?;
            return Ok(buffer);
        }

        let staging_buffer = Self::new(
            Some("staging buffer"),
            device,
            data.len(),
            MemoryLocation::CpuToGpu,
        )?;
        staging_buffer.copy_from(data)?;
        let mut cmd_buf = device.create_command_buffer(Some("upload buffer"));
        cmd_buf.encode(|recorder| {
            recorder.copy_buffer(&staging_buffer, &buffer, data.len() as u64);
        });
        device.queue().submit_blocking(&[cmd_buf])?;
        Ok(buffer)
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn size(&self) -> u64 {
        self.inner.raw.size
    }

    pub fn device_address(&self) -> DeviceAddress {
        self.inner.raw.device_address
    }

    pub fn location(&self) -> MemoryLocation {
        self.inner.location
    }

    pub fn raw_id(&self) -> u64 {
        self.inner.raw.id
    }

    pub fn heap(&self) -> Option<&Heap> {
        self.inner.heap.as_ref()
    }

    pub fn is_mappable(&self) -> bool {
        self.inner.location.is_host_visible()
    }

    pub fn copy_from<I: AsRef<[u8]>>(&self, data: I) -> Result<(), DriverError> {
        self.write(0, data)
    }

    pub fn write<I: AsRef<[u8]>>(&self, offset: u64, data: I) -> Result<(), DriverError> {
        self.inner
            .device
            .driver()
            .write_buffer(self.inner.raw.id, offset, data.as_ref())
    }

    pub fn read(&self) -> Result<Vec<u8>, DriverError> {
        if self.size() == 0 {
            return Ok(Vec::new());
        }
        self.inner
            .device
            .read_memory(self.device_address(), self.size())
    }

    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Device {
    pub fn create_buffer<I>(
        &self,
        name: Option<&str>,
        size: I,
        location: MemoryLocation,
    ) -> Result<Buffer, DriverError>
    where
        I: num_traits::PrimInt,
    {
        Buffer::new(name, self, size, location)
    }

    pub fn create_buffer_init<I: AsRef<[u8]>>(
        &self,
        name: Option<&str>,
        data: I,
        location: MemoryLocation,
    ) -> Result<Buffer, DriverError> {
        Buffer::new_init(name, self, data, location)
    }
}

impl Drop for BufferRef {
    fn drop(&mut self) {
        self.device.driver().destroy_buffer(self.raw.id);
    }
}

#[test]
fn test_create_buffer_init() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .try_init()
        .ok();
    let device = Device::software();
    let data = [1u32, 2, 3, 4];
    let host = device
        .create_buffer_init(
            Some("host"),
            bytemuck::cast_slice(&data),
            MemoryLocation::CpuToGpu,
        )
        .unwrap();
    assert_eq!(host.size(), 16);
    assert_eq!(host.read().unwrap(), bytemuck::cast_slice::<u32, u8>(&data));

    let private = device
        .create_buffer_init(
            Some("private"),
            bytemuck::cast_slice(&data),
            MemoryLocation::GpuOnly,
        )
        .unwrap();
    assert!(!private.is_mappable());
    assert_eq!(private.read().unwrap(), host.read().unwrap());
    assert!(private.copy_from([0u8; 4]).is_err());
}

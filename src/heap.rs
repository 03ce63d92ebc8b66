use std::sync::{Arc, Mutex, PoisonError};

use crate::buffer::Buffer;
use crate::command_recorder::CommandRecorder;
use crate::driver::{Footprint, MemoryLocation};
use crate::error::{DriverError, PackagingError};
use crate::texture::Texture;
use crate::Device;

pub(crate) struct HeapRef {
    name: Option<String>,
    pub(crate) raw: u64,
    capacity: u64,
    cursor: Mutex<u64>,
    device: Device,
}

/// A fixed-size region of private device memory that resources are copied into.
///
/// Placement is a bump allocator: each resource goes at the first offset past the previous one that
/// satisfies its alignment. A heap never grows.
#[derive(Clone)]
pub struct Heap {
    pub(crate) inner: Arc<HeapRef>,
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("used", &self.used())
            .finish()
    }
}

impl Heap {
    pub(crate) fn new(name: Option<&str>, device: &Device, size: u64) -> Result<Self, DriverError> {
        let raw = device.driver().create_heap(name.unwrap_or("heap"), size)?;
        log::debug!("allocated heap {} of {} bytes", name.unwrap_or("heap"), size);
        Ok(Self {
            inner: Arc::new(HeapRef {
                name: name.map(|s| s.to_owned()),
                raw,
                capacity: size,
                cursor: Mutex::new(0),
                device: device.clone(),
            }),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn capacity(&self) -> u64 {
        self.inner.capacity
    }

    /// Bytes consumed so far, alignment padding included.
    pub fn used(&self) -> u64 {
        *self.inner.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn raw_id(&self) -> u64 {
        self.inner.raw
    }

    fn device(&self) -> &Device {
        &self.inner.device
    }

    /// Claims the next offset for `footprint`.
    fn reserve(&self, footprint: Footprint, label: &str) -> Result<u64, PackagingError> {
        let mut cursor = self
            .inner
            .cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let end = footprint.end_after(*cursor);
        if end > self.inner.capacity {
            let offset = end - footprint.size;
            log::error!(
                "heap overflow: {} needs {} bytes at {} in a heap of {}",
                label,
                footprint.size,
                offset,
                self.inner.capacity
            );
            debug_assert!(
                false,
                "heap overflow placing {}: measured size is smaller than placement",
                label
            );
            return Err(PackagingError::HeapOverflow {
                label: label.to_owned(),
                offset,
                size: footprint.size,
                capacity: self.inner.capacity,
            });
        }
        *cursor = end;
        Ok(end - footprint.size)
    }

    /// Copies `data` into the heap through a staging buffer recorded on `recorder`.
    pub fn place_bytes(
        &self,
        recorder: &mut CommandRecorder,
        data: &[u8],
        label: &str,
    ) -> Result<Buffer, PackagingError> {
        let footprint = self.device().driver().buffer_heap_footprint(data.len() as u64)?;
        let offset = self.reserve(footprint, label)?;
        let staging = self
            .device()
            .create_buffer_init(Some(label), data, MemoryLocation::CpuToGpu)
            .map_err(|source| PackagingError::BufferAllocationFailed {
                label: label.to_owned(),
                source,
            })?;
        let placed = self.buffer_at(offset, data.len() as u64, label)?;
        recorder.copy_buffer(&staging, &placed, data.len() as u64);
        log::trace!("placed {} ({} bytes) at {}", label, data.len(), offset);
        Ok(placed)
    }

    /// Copies an existing buffer into the heap.
    pub fn place_buffer(
        &self,
        recorder: &mut CommandRecorder,
        source: &Buffer,
        label: &str,
    ) -> Result<Buffer, PackagingError> {
        let footprint = self.device().driver().buffer_heap_footprint(source.size())?;
        let offset = self.reserve(footprint, label)?;
        let placed = self.buffer_at(offset, source.size(), label)?;
        recorder.copy_buffer(source, &placed, source.size());
        log::trace!("placed {} ({} bytes) at {}", label, source.size(), offset);
        Ok(placed)
    }

    /// Copies a texture into the heap. The copy has the source's exact descriptor.
    pub fn place_texture(
        &self,
        recorder: &mut CommandRecorder,
        source: &Texture,
        label: &str,
    ) -> Result<Texture, PackagingError> {
        let descriptor = source.descriptor();
        let footprint = self.device().driver().texture_heap_footprint(descriptor)?;
        let offset = self.reserve(footprint, label)?;
        let raw = self
            .device()
            .driver()
            .create_texture_on_heap(self.inner.raw, offset, descriptor, label)?;
        let placed = Texture::from_raw(
            Some(label),
            self.device(),
            raw,
            descriptor,
            MemoryLocation::GpuOnly,
            source.is_ready(),
            Some(self.clone()),
        );
        recorder.copy_texture(source, &placed);
        log::trace!("placed {} ({} bytes) at {}", label, footprint.size, offset);
        Ok(placed)
    }

    fn buffer_at(&self, offset: u64, size: u64, label: &str) -> Result<Buffer, PackagingError> {
        let raw = self
            .device()
            .driver()
            .create_buffer_on_heap(self.inner.raw, offset, size, label)?;
        Ok(Buffer::from_raw(
            Some(label),
            self.device(),
            raw,
            MemoryLocation::GpuOnly,
            Some(self.clone()),
        ))
    }
}

impl Device {
    pub fn create_heap(&self, name: Option<&str>, size: u64) -> Result<Heap, DriverError> {
        Heap::new(name, self, size)
    }
}

impl Drop for HeapRef {
    fn drop(&mut self) {
        self.device.driver().destroy_heap(self.raw);
    }
}

#[test]
fn test_heap_placement_is_aligned_and_bounded() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .try_init()
        .ok();
    let device = Device::software();
    let heap = device.create_heap(Some("Heap"), 1024).unwrap();
    let mut cmd_buf = device.create_command_buffer(Some("place"));
    let (a, b) = cmd_buf
        .encode(|recorder| -> Result<_, PackagingError> {
            let a = heap.place_bytes(recorder, &[1; 10], "a")?;
            let b = heap.place_bytes(recorder, &[2; 10], "b")?;
            Ok((a, b))
        })
        .unwrap();
    device.queue().submit_blocking(&[cmd_buf]).unwrap();

    assert_eq!(b.device_address() - a.device_address(), 256);
    assert_eq!(heap.used(), 256 + 10);
    assert_eq!(b.read().unwrap(), vec![2; 10]);
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "heap overflow"))]
fn test_heap_overflow() {
    let device = Device::software();
    let heap = device.create_heap(Some("Heap"), 16).unwrap();
    let mut cmd_buf = device.create_command_buffer(Some("place"));
    let result = cmd_buf.encode(|recorder| heap.place_bytes(recorder, &[0; 32], "too large"));
    assert!(matches!(
        result,
        Err(PackagingError::HeapOverflow { size: 32, capacity: 16, .. })
    ));
}

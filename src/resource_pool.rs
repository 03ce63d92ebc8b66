use std::collections::HashMap;

use crate::error::PackagingError;
use crate::Buffer;

/// Buffers built once under a stable label and handed out again on every later request.
///
/// Entries are never evicted or checked for staleness. A failed build is cached like a successful
/// one. Anything that can change must bypass the pool or [`remove`](Self::remove) its entry first.
#[derive(Default)]
pub struct ResourcePool {
    buffers: HashMap<String, Result<Buffer, PackagingError>>,
}

impl ResourcePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `label`, running `factory` only if there is none yet.
    pub fn take_or_build<F>(&mut self, label: &str, factory: F) -> Result<Buffer, PackagingError>
    where
        F: FnOnce() -> Result<Buffer, PackagingError>,
    {
        if let Some(entry) = self.buffers.get(label) {
            return entry.clone();
        }
        let entry = factory();
        match &entry {
            Ok(buffer) => log::debug!("pooled {} ({} bytes)", label, buffer.size()),
            Err(err) => log::warn!("pooling failed build of {}: {}", label, err),
        }
        self.buffers.insert(label.to_owned(), entry.clone());
        entry
    }

    pub fn get(&self, label: &str) -> Option<&Result<Buffer, PackagingError>> {
        self.buffers.get(label)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.buffers.contains_key(label)
    }

    pub fn remove(&mut self, label: &str) -> Option<Result<Buffer, PackagingError>> {
        self.buffers.remove(label)
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.buffers.iter().map(|(label, entry)| (label, entry.is_ok())))
            .finish()
    }
}

#[test]
fn test_remove_allows_rebuild() {
    use crate::{Device, MemoryLocation};

    let device = Device::software();
    let mut pool = ResourcePool::new();
    let first = pool
        .take_or_build("Args/Frame", || {
            Ok(device.create_buffer(Some("Args/Frame"), 4, MemoryLocation::CpuToGpu)?)
        })
        .unwrap();
    assert!(pool.remove("Args/Frame").is_some());
    let second = pool
        .take_or_build("Args/Frame", || {
            Ok(device.create_buffer(Some("Args/Frame"), 4, MemoryLocation::CpuToGpu)?)
        })
        .unwrap();
    assert!(!first.ptr_eq(&second));
    assert_eq!(pool.len(), 1);
}

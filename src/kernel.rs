use std::sync::Arc;

use crate::error::DriverError;
use crate::Device;

pub(crate) struct ComputeKernelRef {
    name: Option<String>,
    raw: u64,
    device: Device,
}

/// The ray-generation program. Its code is opaque to this crate.
#[derive(Clone)]
pub struct ComputeKernel {
    inner: Arc<ComputeKernelRef>,
}

impl ComputeKernel {
    pub(crate) fn new<P>(name: Option<&str>, device: &Device, code: P) -> Result<Self, DriverError>
    where
        P: AsRef<[u8]>,
    {
        let raw = device
            .driver()
            .create_kernel(name.unwrap_or("kernel"), code.as_ref())?;
        Ok(Self {
            inner: Arc::new(ComputeKernelRef {
                name: name.map(|s| s.to_owned()),
                raw,
                device: device.clone(),
            }),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn raw_id(&self) -> u64 {
        self.inner.raw
    }
}

impl Device {
    pub fn create_compute_kernel<P>(
        &self,
        name: Option<&str>,
        code: P,
    ) -> Result<ComputeKernel, DriverError>
    where
        P: AsRef<[u8]>,
    {
        ComputeKernel::new(name, self, code)
    }
}

impl Drop for ComputeKernelRef {
    fn drop(&mut self) {
        self.device.driver().destroy_kernel(self.raw);
    }
}

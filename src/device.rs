use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::command_buffer::CommandBuffer;
use crate::driver::{DeviceAddress, Driver, SubmissionId};
use crate::error::DriverError;
use crate::queue::Queue;
use crate::software::SoftwareDriver;

pub(crate) struct InFlight {
    pub(crate) submission: SubmissionId,
    pub(crate) command_buffers: Vec<CommandBuffer>,
}

pub(crate) struct DeviceRef {
    pub(crate) driver: Arc<dyn Driver>,
    pub(crate) in_flight: Mutex<Vec<InFlight>>,
}

#[derive(Clone)]
pub struct Device {
    pub(crate) inner: Arc<DeviceRef>,
}

impl Device {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        log::debug!("opening device on {} driver", driver.name());
        Self {
            inner: Arc::new(DeviceRef {
                driver,
                in_flight: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A device backed by a fresh [`SoftwareDriver`].
    pub fn software() -> Self {
        Self::new(Arc::new(SoftwareDriver::new()))
    }

    pub fn name(&self) -> &str {
        self.inner.driver.name()
    }

    pub(crate) fn driver(&self) -> &dyn Driver {
        self.inner.driver.as_ref()
    }

    pub(crate) fn in_flight(&self) -> MutexGuard<'_, Vec<InFlight>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn queue(&self) -> Queue {
        Queue::new(self)
    }

    /// Reads device memory back. Only memory the driver can map is readable.
    pub fn read_memory(&self, address: DeviceAddress, len: u64) -> Result<Vec<u8>, DriverError> {
        self.driver().read_memory(address, len)
    }

    pub fn wait_idle(&self) -> Result<(), DriverError> {
        self.queue().wait_idle()
    }

    pub fn ptr_eq(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("driver", &self.name())
            .finish()
    }
}

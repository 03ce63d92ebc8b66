use crate::command_buffer::CommandBuffer;
use crate::device::{Device, InFlight};
use crate::driver::SubmissionId;
use crate::error::DriverError;

#[derive(Clone)]
pub struct Queue {
    device: Device,
}

impl Queue {
    pub(crate) fn new(device: &Device) -> Self {
        Self {
            device: device.clone(),
        }
    }

    /// Submits every command buffer as one submission and waits for it.
    pub fn submit_blocking(&self, command_buffers: &[CommandBuffer]) -> Result<(), DriverError> {
        let commands = command_buffers
            .iter()
            .flat_map(|cmd_buf| cmd_buf.commands.iter().cloned())
            .collect::<Vec<_>>();
        let label = label_of(command_buffers);
        let driver = self.device.driver();
        let submission = driver.submit(&label, commands, None)?;
        driver.wait(submission)
    }

    /// Submits without waiting. `on_completed` runs from a later [`poll`](Self::poll) or
    /// [`wait_idle`](Self::wait_idle) once the GPU has finished; resources the command buffer
    /// references stay alive until then.
    pub fn submit<F>(
        &self,
        command_buffer: CommandBuffer,
        on_completed: F,
    ) -> Result<SubmissionId, DriverError>
    where
        F: FnOnce() + Send + 'static,
    {
        let label = label_of(std::slice::from_ref(&command_buffer));
        let submission = self.device.driver().submit(
            &label,
            command_buffer.commands.clone(),
            Some(Box::new(on_completed)),
        )?;
        self.device.in_flight().push(InFlight {
            submission,
            command_buffers: vec![command_buffer],
        });
        Ok(submission)
    }

    /// Runs completion handlers of finished submissions and releases their resources. Returns the
    /// number of submissions still in flight.
    pub fn poll(&self) -> Result<usize, DriverError> {
        let driver = self.device.driver();
        driver.poll()?;
        let finished = {
            let mut in_flight = self.device.in_flight();
            let mut finished = Vec::new();
            let mut index = 0;
            while index < in_flight.len() {
                if driver.is_complete(in_flight[index].submission)? {
                    finished.push(in_flight.swap_remove(index));
                } else {
                    index += 1;
                }
            }
            finished
        };
        drop(finished);
        Ok(self.device.in_flight().len())
    }

    pub fn wait_idle(&self) -> Result<(), DriverError> {
        let pending = self
            .device
            .in_flight()
            .iter()
            .map(|f| f.submission)
            .collect::<Vec<_>>();
        for submission in pending {
            self.device.driver().wait(submission)?;
        }
        self.poll().map(|_| ())
    }
}

fn label_of(command_buffers: &[CommandBuffer]) -> String {
    command_buffers
        .iter()
        .map(|cmd_buf| cmd_buf.name().unwrap_or("command buffer"))
        .collect::<Vec<_>>()
        .join(" + ")
}

#[test]
fn test_submit_runs_callback_after_poll() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    let device = Device::software();
    let queue = device.queue();
    let completed = Arc::new(AtomicU32::new(0));
    for _ in 0..2 {
        let counter = completed.clone();
        queue
            .submit(device.create_command_buffer(Some("frame")), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }
    assert_eq!(completed.load(Ordering::SeqCst), 0);
    assert_eq!(queue.poll().unwrap(), 0);
    assert_eq!(completed.load(Ordering::SeqCst), 2);
}

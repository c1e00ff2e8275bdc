//! Контекст выполнения: контекст OpenCL и единственная очередь команд

use super::driver::SharedDriver;
use super::probe::Device;
use super::status::ClStatus;
use super::types::*;
use crate::error::{OffloadError, Result};
use std::ptr;
use tracing::{debug, warn};

/// Контекст OpenCL, связанный с одним устройством
pub struct Context {
    driver: SharedDriver,
    raw: cl_context,
    device: cl_device_id,
}

impl Context {
    pub fn create(driver: SharedDriver, device: &Device) -> Result<Self> {
        let raw = driver
            .create_context(device.raw())
            .map_err(|status| OffloadError::ContextCreation {
                stage: "context",
                status,
            })?;
        Ok(Self {
            driver,
            raw,
            device: device.raw(),
        })
    }

    pub fn raw(&self) -> cl_context {
        self.raw
    }

    pub fn device(&self) -> cl_device_id {
        self.device
    }

    pub fn driver(&self) -> &SharedDriver {
        &self.driver
    }

    fn release_raw(&mut self) -> std::result::Result<(), ClStatus> {
        if self.raw.is_null() {
            return Ok(());
        }
        let raw = std::mem::replace(&mut self.raw, ptr::null_mut());
        self.driver.release_context(raw)
    }

    pub fn release(mut self) -> Result<()> {
        self.release_raw().map_err(|status| OffloadError::Release {
            object: "context",
            status,
        })
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if let Err(status) = self.release_raw() {
            warn!("Failed to release OpenCL context: {}", status);
        }
    }
}

/// Очередь команд (FIFO), через которую идут все передачи и запуски ядер
pub struct CommandQueue {
    driver: SharedDriver,
    raw: cl_command_queue,
    profiling: bool,
}

impl CommandQueue {
    pub fn create(context: &Context, profiling: bool) -> Result<Self> {
        let properties = if profiling { CL_QUEUE_PROFILING_ENABLE } else { 0 };
        let raw = context
            .driver()
            .create_command_queue(context.raw(), context.device(), properties)
            .map_err(|status| OffloadError::ContextCreation {
                stage: "command queue",
                status,
            })?;
        Ok(Self {
            driver: context.driver().clone(),
            raw,
            profiling,
        })
    }

    pub fn raw(&self) -> cl_command_queue {
        self.raw
    }

    pub fn driver(&self) -> &SharedDriver {
        &self.driver
    }

    pub fn is_profiling(&self) -> bool {
        self.profiling
    }

    // Очередь сначала дренируется, затем освобождается
    fn release_raw(&mut self) -> std::result::Result<(), ClStatus> {
        if self.raw.is_null() {
            return Ok(());
        }
        let raw = std::mem::replace(&mut self.raw, ptr::null_mut());
        let drained = self.driver.flush(raw).and_then(|_| self.driver.finish(raw));
        let released = self.driver.release_command_queue(raw);
        drained.and(released)
    }

    pub fn release(mut self) -> Result<()> {
        self.release_raw().map_err(|status| OffloadError::Release {
            object: "command queue",
            status,
        })
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        if let Err(status) = self.release_raw() {
            warn!("Failed to release OpenCL command queue: {}", status);
        }
    }
}

/// Контекст и очередь одного запуска.
/// Порядок полей задает порядок освобождения: очередь, затем контекст.
pub struct ExecutionContext {
    queue: CommandQueue,
    context: Context,
}

impl ExecutionContext {
    pub fn new(driver: SharedDriver, device: &Device, profiling: bool) -> Result<Self> {
        let context = Context::create(driver, device)?;
        let queue = CommandQueue::create(&context, profiling)?;
        debug!(
            "Execution context ready (profiling {})",
            if profiling { "enabled" } else { "disabled" }
        );
        Ok(Self { queue, context })
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn driver(&self) -> &SharedDriver {
        self.context.driver()
    }

    /// Явное освобождение; возвращает первую ошибку, но освобождает все
    pub fn release(self) -> Result<()> {
        let Self { queue, context } = self;
        let queue = queue.release();
        let context = context.release();
        queue.and(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opencl::host::{HostDeviceProfile, HostDriver, Lifecycle, ObjectKind};
    use crate::opencl::probe::{probe_device, probe_platform, DeviceKind};
    use std::rc::Rc;

    fn device(driver: &SharedDriver) -> Device {
        let platform = probe_platform(driver.as_ref()).unwrap();
        probe_device(driver.as_ref(), &platform, DeviceKind::Any).unwrap()
    }

    #[test]
    fn test_release_drains_queue_before_context() {
        let host = Rc::new(HostDriver::new());
        let driver: SharedDriver = host.clone();
        let exec = ExecutionContext::new(driver.clone(), &device(&driver), true).unwrap();
        assert!(exec.queue().is_profiling());

        exec.release().unwrap();
        assert_eq!(
            host.journal(),
            vec![
                Lifecycle::Finished,
                Lifecycle::Released(ObjectKind::CommandQueue),
                Lifecycle::Released(ObjectKind::Context),
            ]
        );
        assert_eq!(host.live_objects(), 0);
    }

    #[test]
    fn test_drop_releases_in_order() {
        let host = Rc::new(HostDriver::new());
        let driver: SharedDriver = host.clone();
        {
            let _exec = ExecutionContext::new(driver.clone(), &device(&driver), false).unwrap();
        }
        assert_eq!(
            host.release_order(),
            vec![ObjectKind::CommandQueue, ObjectKind::Context]
        );
    }

    #[test]
    fn test_unavailable_device_fails_context_creation() {
        let host = Rc::new(HostDriver::with_profile(HostDeviceProfile {
            available: false,
            ..HostDeviceProfile::default()
        }));
        let driver: SharedDriver = host.clone();
        let result = ExecutionContext::new(driver.clone(), &device(&driver), true);
        match result {
            Err(OffloadError::ContextCreation { stage, status }) => {
                assert_eq!(stage, "context");
                assert_eq!(status, ClStatus(CL_DEVICE_NOT_AVAILABLE));
            }
            _ => panic!("expected context creation failure"),
        }
        assert_eq!(host.live_objects(), 0);
    }
}

//! Буферы устройства для матриц `f32`

use super::context::{CommandQueue, Context};
use super::driver::SharedDriver;
use super::event::Event;
use super::status::ClStatus;
use super::types::*;
use crate::error::{OffloadError, Result};
use std::ptr;
use tracing::{trace, warn};

const FLOAT_SIZE: usize = std::mem::size_of::<f32>();

/// Подсказка драйверу о том, как ядро обращается к буферу
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    fn flags(self) -> cl_mem_flags {
        match self {
            AccessMode::ReadOnly => CL_MEM_READ_ONLY,
            AccessMode::WriteOnly => CL_MEM_WRITE_ONLY,
            AccessMode::ReadWrite => CL_MEM_READ_WRITE,
        }
    }
}

/// Буфер из `len` чисел `f32` в памяти устройства
pub struct DeviceBuffer {
    driver: SharedDriver,
    raw: cl_mem,
    len: usize,
    access: AccessMode,
}

impl DeviceBuffer {
    /// Выделяет неинициализированный буфер
    pub fn allocate(context: &Context, access: AccessMode, len: usize) -> Result<Self> {
        Self::create(context, access, len, None)
    }

    /// Выделяет буфер `READ_WRITE` и копирует в него данные хоста при создании
    pub fn with_host_data(context: &Context, data: &[f32]) -> Result<Self> {
        Self::create(context, AccessMode::ReadWrite, data.len(), Some(data))
    }

    fn create(
        context: &Context,
        access: AccessMode,
        len: usize,
        host_data: Option<&[f32]>,
    ) -> Result<Self> {
        let bytes = len * FLOAT_SIZE;
        if bytes == 0 {
            return Err(OffloadError::Allocation {
                bytes,
                reason: "buffer size must be non-zero".to_string(),
            });
        }

        let mut flags = access.flags();
        let seed: Option<&[u8]> = host_data.map(|data| bytemuck::cast_slice(data));
        if seed.is_some() {
            flags |= CL_MEM_COPY_HOST_PTR;
        }
        let raw = context
            .driver()
            .create_buffer(context.raw(), flags, bytes, seed)
            .map_err(|status| OffloadError::Allocation {
                bytes,
                reason: status.to_string(),
            })?;
        trace!("Allocated {} byte {:?} buffer", bytes, access);

        Ok(Self {
            driver: context.driver().clone(),
            raw,
            len,
            access,
        })
    }

    pub fn raw(&self) -> cl_mem {
        self.raw
    }

    /// Число элементов
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn byte_size(&self) -> usize {
        self.len * FLOAT_SIZE
    }

    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// Блокирующее копирование хост -> устройство
    pub fn upload(&self, queue: &CommandQueue, data: &[f32]) -> Result<Event> {
        if data.len() != self.len {
            return Err(OffloadError::Transfer {
                direction: "write",
                reason: format!("host slice has {} elements, buffer has {}", data.len(), self.len),
            });
        }
        let raw = self
            .driver
            .enqueue_write_buffer(queue.raw(), self.raw, 0, bytemuck::cast_slice(data))
            .map_err(|status| OffloadError::Transfer {
                direction: "write",
                reason: status.to_string(),
            })?;
        Ok(Event::from_raw(self.driver.clone(), raw))
    }

    /// Блокирующее копирование устройство -> хост
    pub fn download(&self, queue: &CommandQueue, out: &mut [f32]) -> Result<Event> {
        if out.len() != self.len {
            return Err(OffloadError::Transfer {
                direction: "read",
                reason: format!("host slice has {} elements, buffer has {}", out.len(), self.len),
            });
        }
        let raw = self
            .driver
            .enqueue_read_buffer(queue.raw(), self.raw, 0, bytemuck::cast_slice_mut(out))
            .map_err(|status| OffloadError::Transfer {
                direction: "read",
                reason: status.to_string(),
            })?;
        Ok(Event::from_raw(self.driver.clone(), raw))
    }

    fn release_raw(&mut self) -> std::result::Result<(), ClStatus> {
        if self.raw.is_null() {
            return Ok(());
        }
        let raw = std::mem::replace(&mut self.raw, ptr::null_mut());
        self.driver.release_mem_object(raw)
    }

    pub fn release(mut self) -> Result<()> {
        self.release_raw().map_err(|status| OffloadError::Release {
            object: "buffer",
            status,
        })
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if let Err(status) = self.release_raw() {
            warn!("Failed to release OpenCL buffer: {}", status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opencl::context::ExecutionContext;
    use crate::opencl::host::HostDriver;
    use crate::opencl::probe::{probe_device, probe_platform, DeviceKind};
    use std::rc::Rc;

    fn exec() -> ExecutionContext {
        let driver: SharedDriver = Rc::new(HostDriver::new());
        let platform = probe_platform(driver.as_ref()).unwrap();
        let device = probe_device(driver.as_ref(), &platform, DeviceKind::Any).unwrap();
        ExecutionContext::new(driver, &device, false).unwrap()
    }

    #[test]
    fn test_zero_size_allocation_fails() {
        let exec = exec();
        match DeviceBuffer::allocate(exec.context(), AccessMode::ReadOnly, 0) {
            Err(OffloadError::Allocation { bytes, .. }) => assert_eq!(bytes, 0),
            _ => panic!("zero-size allocation must fail"),
        }
        match DeviceBuffer::with_host_data(exec.context(), &[]) {
            Err(OffloadError::Allocation { .. }) => {}
            _ => panic!("empty host seed must fail"),
        }
    }

    #[test]
    fn test_upload_then_download() {
        let exec = exec();
        let buffer = DeviceBuffer::allocate(exec.context(), AccessMode::ReadWrite, 4).unwrap();
        assert_eq!(buffer.byte_size(), 16);
        buffer.upload(exec.queue(), &[1.0, -2.5, 3.0, 0.125]).unwrap().wait().unwrap();

        let mut out = [0.0f32; 4];
        buffer.download(exec.queue(), &mut out).unwrap();
        assert_eq!(out, [1.0, -2.5, 3.0, 0.125]);
    }

    #[test]
    fn test_transfers_keep_bit_patterns() {
        let exec = exec();
        let values = [-0.0f32, f32::MIN_POSITIVE / 2.0, f32::from_bits(0x7fc0_1234), f32::MAX];
        let seeded = DeviceBuffer::with_host_data(exec.context(), &values).unwrap();
        let written = DeviceBuffer::allocate(exec.context(), AccessMode::ReadWrite, 4).unwrap();
        written.upload(exec.queue(), &values).unwrap();

        for buffer in [&seeded, &written] {
            let mut out = vec![0.0f32; 4];
            buffer.download(exec.queue(), &mut out).unwrap();
            let bits: Vec<u32> = out.iter().map(|v| v.to_bits()).collect();
            let expected: Vec<u32> = values.iter().map(|v| v.to_bits()).collect();
            assert_eq!(bits, expected);
        }
    }

    #[test]
    fn test_host_seed_is_copied_at_allocation() {
        let exec = exec();
        let buffer = DeviceBuffer::with_host_data(exec.context(), &[7.0, 8.0]).unwrap();
        assert_eq!(buffer.access(), AccessMode::ReadWrite);
        let mut out = [0.0f32; 2];
        buffer.download(exec.queue(), &mut out).unwrap();
        assert_eq!(out, [7.0, 8.0]);
    }

    #[test]
    fn test_length_mismatch_is_transfer_error() {
        let exec = exec();
        let buffer = DeviceBuffer::allocate(exec.context(), AccessMode::ReadOnly, 4).unwrap();
        match buffer.upload(exec.queue(), &[1.0; 3]) {
            Err(OffloadError::Transfer { direction, .. }) => assert_eq!(direction, "write"),
            _ => panic!("expected transfer error"),
        }
        let mut out = [0.0f32; 5];
        assert!(matches!(
            buffer.download(exec.queue(), &mut out),
            Err(OffloadError::Transfer { direction: "read", .. })
        ));
    }
}

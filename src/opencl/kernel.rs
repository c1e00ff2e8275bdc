//! Точка входа ядра: позиционные аргументы и запуск

use super::buffer::DeviceBuffer;
use super::context::CommandQueue;
use super::dispatch::WorkGrid;
use super::driver::{ArgValue, SharedDriver};
use super::event::Event;
use super::probe::DeviceLimits;
use super::status::ClStatus;
use super::types::*;
use crate::error::{OffloadError, Result};
use std::ptr;
use tracing::{debug, warn};

/// Вид позиционного параметра ядра
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// `__global float*`
    Buffer,
    /// `int`
    Int,
    /// `uint`
    Uint,
    /// `__local float*`, задается только размером
    Local,
}

/// Позиционный контракт точки входа
#[derive(Debug, PartialEq, Eq)]
pub struct KernelSignature {
    pub name: &'static str,
    pub args: &'static [ArgKind],
}

/// Значение аргумента ядра
#[derive(Clone, Copy)]
pub enum KernelArg<'a> {
    Buffer(&'a DeviceBuffer),
    Int(i32),
    Uint(u32),
    /// Размер локальной памяти в байтах
    Local(usize),
}

impl KernelArg<'_> {
    pub fn kind(&self) -> ArgKind {
        match self {
            KernelArg::Buffer(_) => ArgKind::Buffer,
            KernelArg::Int(_) => ArgKind::Int,
            KernelArg::Uint(_) => ArgKind::Uint,
            KernelArg::Local(_) => ArgKind::Local,
        }
    }
}

pub struct Kernel {
    driver: SharedDriver,
    raw: cl_kernel,
    signature: &'static KernelSignature,
    bound: Vec<bool>,
}

impl Kernel {
    pub(crate) fn from_raw(
        driver: SharedDriver,
        raw: cl_kernel,
        signature: &'static KernelSignature,
    ) -> Self {
        Self {
            driver,
            raw,
            signature,
            bound: vec![false; signature.args.len()],
        }
    }

    pub fn raw(&self) -> cl_kernel {
        self.raw
    }

    pub fn signature(&self) -> &'static KernelSignature {
        self.signature
    }

    pub fn name(&self) -> &'static str {
        self.signature.name
    }

    /// Привязывает аргументы строго по позициям, начиная с нулевой
    pub fn bind(&mut self, args: &[KernelArg<'_>]) -> Result<()> {
        if args.len() > self.signature.args.len() {
            return Err(OffloadError::KernelArgument {
                index: self.signature.args.len(),
                reason: format!(
                    "`{}` takes {} arguments, got {}",
                    self.signature.name,
                    self.signature.args.len(),
                    args.len()
                ),
            });
        }
        for (index, arg) in args.iter().enumerate() {
            self.set_arg(index, *arg)?;
        }
        Ok(())
    }

    pub fn set_arg(&mut self, index: usize, arg: KernelArg<'_>) -> Result<()> {
        let expected = self
            .signature
            .args
            .get(index)
            .copied()
            .ok_or_else(|| OffloadError::KernelArgument {
                index,
                reason: format!("`{}` has no argument {}", self.signature.name, index),
            })?;
        if arg.kind() != expected {
            return Err(OffloadError::KernelArgument {
                index,
                reason: format!("expected {:?}, got {:?}", expected, arg.kind()),
            });
        }

        let value = match &arg {
            KernelArg::Buffer(buffer) => ArgValue::Mem(buffer.raw()),
            KernelArg::Int(value) => ArgValue::Bytes(bytemuck::bytes_of(value)),
            KernelArg::Uint(value) => ArgValue::Bytes(bytemuck::bytes_of(value)),
            KernelArg::Local(0) => {
                return Err(OffloadError::KernelArgument {
                    index,
                    reason: "local scratch size must be non-zero".to_string(),
                })
            }
            KernelArg::Local(bytes) => ArgValue::Local(*bytes),
        };
        self.driver
            .set_kernel_arg(self.raw, index as cl_uint, value)
            .map_err(|status| OffloadError::KernelArgument {
                index,
                reason: status.to_string(),
            })?;
        self.bound[index] = true;
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.bound.iter().all(|&bound| bound)
    }

    /// Ставит ядро в очередь. Сетка проверяется структурно, отказ драйвера
    /// по размерам сетки возвращается как `InvalidWorkSize`.
    pub fn dispatch(&self, queue: &CommandQueue, grid: &WorkGrid) -> Result<Event> {
        if let Some(index) = self.bound.iter().position(|&bound| !bound) {
            return Err(OffloadError::UnboundArgument { index });
        }
        grid.validate(&DeviceLimits::default())?;

        let raw = self
            .driver
            .enqueue_nd_range_kernel(queue.raw(), self.raw, &grid.global, &grid.local)
            .map_err(|status| match status.0 {
                CL_INVALID_WORK_GROUP_SIZE | CL_INVALID_WORK_ITEM_SIZE | CL_INVALID_GLOBAL_WORK_SIZE => {
                    OffloadError::InvalidWorkSize {
                        reason: format!(
                            "driver rejected global {:?} / local {:?}: {}",
                            grid.global, grid.local, status
                        ),
                    }
                }
                _ => OffloadError::Dispatch { status },
            })?;
        debug!(
            "Kernel `{}` enqueued: global {:?}, local {:?}",
            self.signature.name, grid.global, grid.local
        );
        Ok(Event::from_raw(self.driver.clone(), raw))
    }

    fn release_raw(&mut self) -> std::result::Result<(), ClStatus> {
        if self.raw.is_null() {
            return Ok(());
        }
        let raw = std::mem::replace(&mut self.raw, ptr::null_mut());
        self.driver.release_kernel(raw)
    }

    pub fn release(mut self) -> Result<()> {
        self.release_raw().map_err(|status| OffloadError::Release {
            object: "kernel",
            status,
        })
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        if let Err(status) = self.release_raw() {
            warn!("Failed to release OpenCL kernel: {}", status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opencl::buffer::AccessMode;
    use crate::opencl::context::ExecutionContext;
    use crate::opencl::host::HostDriver;
    use crate::opencl::probe::{probe_device, probe_platform, DeviceKind};
    use crate::opencl::program::{KernelSource, Program};
    use std::rc::Rc;

    static NAIVE: KernelSignature = KernelSignature {
        name: "matrixMul",
        args: &[ArgKind::Buffer, ArgKind::Buffer, ArgKind::Buffer, ArgKind::Int, ArgKind::Int],
    };

    const SOURCE: &str = "__kernel void matrixMul(__global float* A, __global float* B, \
                          __global float* C, int wA, int wC) { }";

    fn setup() -> (ExecutionContext, Program) {
        let driver: SharedDriver = Rc::new(HostDriver::new());
        let platform = probe_platform(driver.as_ref()).unwrap();
        let device = probe_device(driver.as_ref(), &platform, DeviceKind::Any).unwrap();
        let exec = ExecutionContext::new(driver, &device, true).unwrap();
        let program = Program::build(exec.context(), &KernelSource::from_string(SOURCE), "").unwrap();
        (exec, program)
    }

    #[test]
    fn test_dispatch_refuses_unbound_arguments() {
        let (exec, program) = setup();
        let mut kernel = program.kernel(&NAIVE).unwrap();
        let a = DeviceBuffer::with_host_data(exec.context(), &[1.0; 4]).unwrap();
        kernel.bind(&[KernelArg::Buffer(&a), KernelArg::Buffer(&a)]).unwrap();
        assert!(!kernel.is_bound());

        match kernel.dispatch(exec.queue(), &WorkGrid::square(2, 1)) {
            Err(OffloadError::UnboundArgument { index }) => assert_eq!(index, 2),
            _ => panic!("dispatch with unbound arguments must fail"),
        }
    }

    #[test]
    fn test_argument_kind_must_match_signature() {
        let (exec, program) = setup();
        let mut kernel = program.kernel(&NAIVE).unwrap();
        let a = DeviceBuffer::allocate(exec.context(), AccessMode::ReadOnly, 4).unwrap();
        assert!(matches!(
            kernel.bind(&[KernelArg::Int(2)]),
            Err(OffloadError::KernelArgument { index: 0, .. })
        ));
        assert!(matches!(
            kernel.set_arg(5, KernelArg::Buffer(&a)),
            Err(OffloadError::KernelArgument { index: 5, .. })
        ));
    }

    #[test]
    fn test_naive_kernel_runs_and_is_profiled() {
        let (exec, program) = setup();
        let mut kernel = program.kernel(&NAIVE).unwrap();
        let a = DeviceBuffer::with_host_data(exec.context(), &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = DeviceBuffer::with_host_data(exec.context(), &[1.0, 0.0, 0.0, 1.0]).unwrap();
        let c = DeviceBuffer::allocate(exec.context(), AccessMode::WriteOnly, 4).unwrap();
        kernel
            .bind(&[
                KernelArg::Buffer(&a),
                KernelArg::Buffer(&b),
                KernelArg::Buffer(&c),
                KernelArg::Int(2),
                KernelArg::Int(2),
            ])
            .unwrap();

        let event = kernel.dispatch(exec.queue(), &WorkGrid::square(2, 1)).unwrap();
        event.wait().unwrap();
        let timing = event.profile().unwrap();
        assert!(timing.end >= timing.start);

        let mut out = [0.0f32; 4];
        c.download(exec.queue(), &mut out).unwrap();
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_oversized_work_group_is_invalid_work_size() {
        let (exec, program) = setup();
        let mut kernel = program.kernel(&NAIVE).unwrap();
        let a = DeviceBuffer::with_host_data(exec.context(), &[0.0; 1024]).unwrap();
        kernel
            .bind(&[
                KernelArg::Buffer(&a),
                KernelArg::Buffer(&a),
                KernelArg::Buffer(&a),
                KernelArg::Int(32),
                KernelArg::Int(32),
            ])
            .unwrap();
        match kernel.dispatch(exec.queue(), &WorkGrid::square(32, 32)) {
            Err(OffloadError::InvalidWorkSize { reason }) => {
                assert!(reason.contains("CL_INVALID_WORK_GROUP_SIZE"), "{}", reason)
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}

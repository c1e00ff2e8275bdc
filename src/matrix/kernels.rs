//! OpenCL ядра для матричного умножения
//!
//! Исходник лежит в `kernels/mm_kernel.cl` и содержит две точки входа
//! с разными позиционными контрактами.

use crate::error::{OffloadError, Result};
use crate::opencl::buffer::DeviceBuffer;
use crate::opencl::kernel::{ArgKind, KernelArg, KernelSignature};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Путь к исходнику ядра по умолчанию
pub const DEFAULT_KERNEL_PATH: &str = "kernels/mm_kernel.cl";

/// `matrix_mul(A, B, C, __local tileA, __local tileB)`
pub static TILED_SIGNATURE: KernelSignature = KernelSignature {
    name: "matrix_mul",
    args: &[
        ArgKind::Buffer,
        ArgKind::Buffer,
        ArgKind::Buffer,
        ArgKind::Local,
        ArgKind::Local,
    ],
};

/// `matrixMul(A, B, C, int widthA, int widthC)`
pub static NAIVE_SIGNATURE: KernelSignature = KernelSignature {
    name: "matrixMul",
    args: &[
        ArgKind::Buffer,
        ArgKind::Buffer,
        ArgKind::Buffer,
        ArgKind::Int,
        ArgKind::Int,
    ],
};

/// Вариант ядра умножения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum KernelVariant {
    /// Тайлы в локальной памяти; размер матрицы берется из глобальной сетки
    #[default]
    Tiled,
    /// Один work-item на элемент результата
    Naive,
}

impl KernelVariant {
    pub fn signature(self) -> &'static KernelSignature {
        match self {
            KernelVariant::Tiled => &TILED_SIGNATURE,
            KernelVariant::Naive => &NAIVE_SIGNATURE,
        }
    }

    pub fn entry_point(self) -> &'static str {
        self.signature().name
    }

    /// Аргументы в порядке сигнатуры
    pub fn arguments<'a>(
        self,
        a: &'a DeviceBuffer,
        b: &'a DeviceBuffer,
        c: &'a DeviceBuffer,
        dim: usize,
        tile: usize,
    ) -> Result<Vec<KernelArg<'a>>> {
        let mut args = vec![KernelArg::Buffer(a), KernelArg::Buffer(b), KernelArg::Buffer(c)];
        match self {
            KernelVariant::Tiled => {
                let scratch = tile * tile * std::mem::size_of::<f32>();
                args.push(KernelArg::Local(scratch));
                args.push(KernelArg::Local(scratch));
            }
            KernelVariant::Naive => {
                let width = i32::try_from(dim).map_err(|_| OffloadError::KernelArgument {
                    index: 3,
                    reason: format!("matrix width {} does not fit in int", dim),
                })?;
                args.push(KernelArg::Int(width));
                args.push(KernelArg::Int(width));
            }
        }
        Ok(args)
    }
}

impl FromStr for KernelVariant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "tiled" | "matrix_mul" => Ok(KernelVariant::Tiled),
            "naive" | "matrixMul" => Ok(KernelVariant::Naive),
            other => Err(format!("unknown kernel variant: {other}")),
        }
    }
}

impl fmt::Display for KernelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelVariant::Tiled => write!(f, "tiled ({})", self.entry_point()),
            KernelVariant::Naive => write!(f, "naive ({})", self.entry_point()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opencl::buffer::AccessMode;
    use crate::opencl::context::ExecutionContext;
    use crate::opencl::driver::SharedDriver;
    use crate::opencl::host::HostDriver;
    use crate::opencl::probe::{probe_device, probe_platform, DeviceKind};
    use std::rc::Rc;

    #[test]
    fn test_variant_entry_points() {
        assert_eq!(KernelVariant::default(), KernelVariant::Tiled);
        assert_eq!(KernelVariant::Tiled.entry_point(), "matrix_mul");
        assert_eq!(KernelVariant::Naive.entry_point(), "matrixMul");
        assert_eq!("matrixMul".parse::<KernelVariant>(), Ok(KernelVariant::Naive));
        assert!("blocked".parse::<KernelVariant>().is_err());
    }

    #[test]
    fn test_signatures_list_buffers_first() {
        for variant in [KernelVariant::Tiled, KernelVariant::Naive] {
            let args = variant.signature().args;
            assert_eq!(args.len(), 5);
            assert!(args[..3].iter().all(|kind| *kind == ArgKind::Buffer));
        }
    }

    #[test]
    fn test_naive_width_must_fit_in_int() {
        let driver: SharedDriver = Rc::new(HostDriver::new());
        let platform = probe_platform(driver.as_ref()).unwrap();
        let device = probe_device(driver.as_ref(), &platform, DeviceKind::Any).unwrap();
        let exec = ExecutionContext::new(driver, &device, false).unwrap();
        let buffer = DeviceBuffer::allocate(exec.context(), AccessMode::ReadWrite, 4).unwrap();

        let args = KernelVariant::Naive.arguments(&buffer, &buffer, &buffer, 2, 1).unwrap();
        assert!(matches!(args[3], KernelArg::Int(2)));

        let oversized = i32::MAX as usize + 1;
        match KernelVariant::Naive.arguments(&buffer, &buffer, &buffer, oversized, 1) {
            Err(OffloadError::KernelArgument { index, reason }) => {
                assert_eq!(index, 3);
                assert!(reason.contains("does not fit"));
            }
            other => panic!("unexpected result: {:?}", other.map(|args| args.len())),
        }
        // Тайловому ядру ширина не передается
        assert!(KernelVariant::Tiled.arguments(&buffer, &buffer, &buffer, oversized, 8).is_ok());
    }

    #[test]
    fn test_bundled_source_declares_both_entry_points() {
        let source = include_str!("../../kernels/mm_kernel.cl");
        assert!(source.contains("__kernel void matrix_mul("));
        assert!(source.contains("__kernel void matrixMul("));
    }
}

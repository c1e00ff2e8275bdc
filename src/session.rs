//! Сессия разгрузки: владеет всеми ресурсами устройства одного запуска
//!
//! Порядок полей `OffloadSession` задает порядок освобождения при удалении:
//! ядро, программа, буферы, очередь, контекст.

use crate::error::{OffloadError, Result};
use crate::matrix::{KernelVariant, Matrix, DEFAULT_KERNEL_PATH};
use crate::opencl::buffer::{AccessMode, DeviceBuffer};
use crate::opencl::context::ExecutionContext;
use crate::opencl::dispatch::WorkGrid;
use crate::opencl::driver::SharedDriver;
use crate::opencl::event::KernelTiming;
use crate::opencl::kernel::Kernel;
use crate::opencl::probe::{probe_device, probe_platform, Device, DeviceKind, Platform};
use crate::opencl::program::{KernelSource, Program};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Как входные матрицы попадают на устройство
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadMode {
    /// Буферы `READ_ONLY` и явная запись через очередь
    #[default]
    Enqueue,
    /// Буферы `READ_WRITE | COPY_HOST_PTR`, копирование при создании
    HostPointer,
}

impl FromStr for UploadMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "enqueue" => Ok(UploadMode::Enqueue),
            "host-ptr" | "host-pointer" => Ok(UploadMode::HostPointer),
            other => Err(format!("unknown upload mode: {other}")),
        }
    }
}

impl fmt::Display for UploadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadMode::Enqueue => write!(f, "enqueue"),
            UploadMode::HostPointer => write!(f, "host-ptr"),
        }
    }
}

/// Параметры сессии
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub kernel_path: PathBuf,
    pub variant: KernelVariant,
    /// Сторона квадратной рабочей группы
    pub tile: usize,
    pub device_kind: DeviceKind,
    pub profiling: bool,
    pub upload_mode: UploadMode,
    pub build_options: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            kernel_path: PathBuf::from(DEFAULT_KERNEL_PATH),
            variant: KernelVariant::Tiled,
            tile: 8,
            device_kind: DeviceKind::Gpu,
            profiling: true,
            upload_mode: UploadMode::Enqueue,
            build_options: String::new(),
        }
    }
}

/// Буферы A, B и C последнего умножения
struct MatrixBuffers {
    a: DeviceBuffer,
    b: DeviceBuffer,
    c: DeviceBuffer,
}

impl MatrixBuffers {
    fn release(self) -> Result<()> {
        let a = self.a.release();
        let b = self.b.release();
        let c = self.c.release();
        a.and(b).and(c)
    }
}

/// Результат одного умножения на устройстве
#[derive(Debug, Clone)]
pub struct MultiplyOutcome {
    pub result: Matrix,
    pub grid: WorkGrid,
    /// Отметки времени ядра, если очередь создана с профилированием
    pub timing: Option<KernelTiming>,
    /// Время от выделения буферов до получения результата на хосте
    pub wall_time: Duration,
}

impl MultiplyOutcome {
    pub fn device_time(&self) -> Option<Duration> {
        self.timing.map(|timing| timing.device_elapsed())
    }
}

pub struct OffloadSession {
    kernel: Kernel,
    program: Program,
    buffers: Option<MatrixBuffers>,
    exec: ExecutionContext,
    platform: Platform,
    device: Device,
    config: SessionConfig,
}

impl OffloadSession {
    /// Опрос устройства, создание контекста, загрузка и сборка ядра
    pub fn open(driver: SharedDriver, config: &SessionConfig) -> Result<Self> {
        let platform = probe_platform(driver.as_ref())?;
        let device = probe_device(driver.as_ref(), &platform, config.device_kind)?;
        let exec = ExecutionContext::new(driver, &device, config.profiling)?;

        let source = KernelSource::from_file(&config.kernel_path)?;
        let program = Program::build(exec.context(), &source, &config.build_options)?;
        let kernel = program.kernel(config.variant.signature())?;
        info!(
            "Session opened: device {}, kernel {}",
            device.info.name.as_deref().unwrap_or("<unknown>"),
            config.variant
        );

        Ok(Self {
            kernel,
            program,
            buffers: None,
            exec,
            platform,
            device,
            config: config.clone(),
        })
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Сетка запуска для матрицы `dim x dim`
    pub fn grid_for(&self, dim: usize) -> WorkGrid {
        WorkGrid::square(dim, self.config.tile)
    }

    /// Загрузка, запуск, ожидание и выгрузка результата `A * B`
    pub fn multiply(&mut self, a: &Matrix, b: &Matrix) -> Result<MultiplyOutcome> {
        if a.dim() != b.dim() {
            return Err(OffloadError::DimensionMismatch {
                left: a.dim(),
                right: b.dim(),
            });
        }
        let dim = a.dim();
        let grid = self.grid_for(dim);
        grid.validate(&self.device.info.limits())?;
        if let Some(previous) = self.buffers.take() {
            previous.release()?;
        }

        let started = Instant::now();
        let context = self.exec.context();
        let queue = self.exec.queue();
        let buffers = match self.config.upload_mode {
            UploadMode::Enqueue => {
                let buffers = MatrixBuffers {
                    a: DeviceBuffer::allocate(context, AccessMode::ReadOnly, a.len())?,
                    b: DeviceBuffer::allocate(context, AccessMode::ReadOnly, b.len())?,
                    c: DeviceBuffer::allocate(context, AccessMode::WriteOnly, a.len())?,
                };
                buffers.a.upload(queue, a.as_slice())?;
                buffers.b.upload(queue, b.as_slice())?;
                buffers
            }
            UploadMode::HostPointer => MatrixBuffers {
                a: DeviceBuffer::with_host_data(context, a.as_slice())?,
                b: DeviceBuffer::with_host_data(context, b.as_slice())?,
                c: DeviceBuffer::allocate(context, AccessMode::WriteOnly, a.len())?,
            },
        };
        debug!("Uploaded {}x{} inputs ({})", dim, dim, self.config.upload_mode);

        {
            let args = self
                .config
                .variant
                .arguments(&buffers.a, &buffers.b, &buffers.c, dim, self.config.tile)?;
            self.kernel.bind(&args)?;
        }

        let event = self.kernel.dispatch(queue, &grid)?;
        event.wait()?;
        let timing = if self.exec.queue().is_profiling() {
            Some(event.profile()?)
        } else {
            None
        };
        if let Some(timing) = &timing {
            info!("Kernel execution time: {:.3} us", timing.device_micros());
        }

        let mut result = Matrix::zeros(dim);
        buffers.c.download(queue, result.as_mut_slice())?;
        let wall_time = started.elapsed();

        self.buffers = Some(buffers);
        Ok(MultiplyOutcome {
            result,
            grid,
            timing,
            wall_time,
        })
    }

    /// Явное освобождение всех ресурсов; возвращает первую ошибку
    pub fn close(self) -> Result<()> {
        let Self {
            kernel,
            program,
            buffers,
            exec,
            ..
        } = self;
        let mut first_error = kernel.release().err();
        first_error = first_error.or(program.release().err());
        if let Some(buffers) = buffers {
            first_error = first_error.or(buffers.release().err());
        }
        first_error = first_error.or(exec.release().err());
        debug!("Session closed");
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_reference_run() {
        let config = SessionConfig::default();
        assert_eq!(config.tile, 8);
        assert_eq!(config.variant, KernelVariant::Tiled);
        assert_eq!(config.kernel_path, PathBuf::from("kernels/mm_kernel.cl"));
        assert!(config.profiling);
    }

    #[test]
    fn test_upload_mode_parsing() {
        assert_eq!("host-ptr".parse::<UploadMode>(), Ok(UploadMode::HostPointer));
        assert_eq!(UploadMode::default().to_string(), "enqueue");
        assert!("mapped".parse::<UploadMode>().is_err());
    }
}

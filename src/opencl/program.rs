//! Загрузка исходника ядра и сборка программы

use super::context::Context;
use super::driver::SharedDriver;
use super::kernel::{Kernel, KernelSignature};
use super::status::ClStatus;
use super::types::*;
use crate::error::{OffloadError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::ptr;
use tracing::{debug, error, info, warn};

/// Максимальный размер исходника ядра в байтах
pub const MAX_KERNEL_SOURCE_BYTES: usize = 1_000_000;

/// Текст программы OpenCL C и путь, откуда он прочитан
#[derive(Debug, Clone)]
pub struct KernelSource {
    path: PathBuf,
    text: String,
}

impl KernelSource {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let fail = |reason: String| OffloadError::KernelSource {
            path: path.clone(),
            reason,
        };

        let text = fs::read_to_string(&path).map_err(|e| fail(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(fail("file is empty".to_string()));
        }
        if text.len() > MAX_KERNEL_SOURCE_BYTES {
            return Err(fail(format!(
                "{} bytes exceeds the {} byte limit",
                text.len(),
                MAX_KERNEL_SOURCE_BYTES
            )));
        }
        debug!("Loaded kernel source {} ({} bytes)", path.display(), text.len());
        Ok(Self { path, text })
    }

    /// Исходник, заданный строкой
    pub fn from_string(text: impl Into<String>) -> Self {
        Self {
            path: PathBuf::from("<inline>"),
            text: text.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Программа, собранная для устройства контекста
pub struct Program {
    driver: SharedDriver,
    raw: cl_program,
    device: cl_device_id,
}

impl Program {
    /// Создает программу из исходника и собирает ее.
    /// При ошибке сборки возвращает лог компилятора устройства.
    pub fn build(context: &Context, source: &KernelSource, options: &str) -> Result<Self> {
        let driver = context.driver().clone();
        let raw = driver
            .create_program_with_source(context.raw(), source.text())
            .map_err(|status| OffloadError::Build {
                status,
                log: String::new(),
            })?;
        let program = Self {
            driver,
            raw,
            device: context.device(),
        };

        if let Err(status) = program.driver.build_program(raw, program.device, options) {
            let log = program.build_log().unwrap_or_else(|log_status| {
                format!("<build log unavailable: {}>", log_status)
            });
            error!("Program build failed: {}", status);
            return Err(OffloadError::Build { status, log });
        }
        info!("Program {} built", source.path().display());
        Ok(program)
    }

    pub fn build_log(&self) -> std::result::Result<String, ClStatus> {
        self.driver.program_build_log(self.raw, self.device)
    }

    pub fn raw(&self) -> cl_program {
        self.raw
    }

    /// Точка входа с заданной сигнатурой
    pub fn kernel(&self, signature: &'static KernelSignature) -> Result<Kernel> {
        let raw = self
            .driver
            .create_kernel(self.raw, signature.name)
            .map_err(|status| OffloadError::KernelNotFound {
                name: signature.name.to_string(),
                status,
            })?;
        Ok(Kernel::from_raw(self.driver.clone(), raw, signature))
    }

    fn release_raw(&mut self) -> std::result::Result<(), ClStatus> {
        if self.raw.is_null() {
            return Ok(());
        }
        let raw = std::mem::replace(&mut self.raw, ptr::null_mut());
        self.driver.release_program(raw)
    }

    pub fn release(mut self) -> Result<()> {
        self.release_raw().map_err(|status| OffloadError::Release {
            object: "program",
            status,
        })
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        if let Err(status) = self.release_raw() {
            warn!("Failed to release OpenCL program: {}", status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opencl::context::ExecutionContext;
    use crate::opencl::host::HostDriver;
    use crate::opencl::kernel::{ArgKind, KernelSignature};
    use crate::opencl::probe::{probe_device, probe_platform, DeviceKind};
    use std::io::Write;
    use std::rc::Rc;

    static UNKNOWN: KernelSignature = KernelSignature {
        name: "matrix_transpose",
        args: &[ArgKind::Buffer],
    };

    fn exec() -> ExecutionContext {
        let driver: SharedDriver = Rc::new(HostDriver::new());
        let platform = probe_platform(driver.as_ref()).unwrap();
        let device = probe_device(driver.as_ref(), &platform, DeviceKind::Any).unwrap();
        ExecutionContext::new(driver, &device, true).unwrap()
    }

    #[test]
    fn test_missing_file_is_kernel_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.cl");
        match KernelSource::from_file(&path) {
            Err(OffloadError::KernelSource { path: reported, .. }) => assert_eq!(reported, path),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_empty_and_oversized_sources_are_rejected() {
        let mut empty = tempfile::NamedTempFile::new().unwrap();
        writeln!(empty, "   ").unwrap();
        assert!(matches!(
            KernelSource::from_file(empty.path()),
            Err(OffloadError::KernelSource { .. })
        ));

        let mut big = tempfile::NamedTempFile::new().unwrap();
        big.write_all(&vec![b' '; MAX_KERNEL_SOURCE_BYTES]).unwrap();
        big.write_all(b"__kernel void matrix_mul() {}").unwrap();
        match KernelSource::from_file(big.path()) {
            Err(OffloadError::KernelSource { reason, .. }) => assert!(reason.contains("limit")),
            _ => panic!("oversized source must be rejected"),
        }
    }

    #[test]
    fn test_build_failure_carries_log() {
        let exec = exec();
        let source = KernelSource::from_string("__kernel void matrix_mul(__global float* a) {");
        match Program::build(exec.context(), &source, "") {
            Err(OffloadError::Build { status, log }) => {
                assert_eq!(status, ClStatus(CL_BUILD_PROGRAM_FAILURE));
                assert!(log.contains("error"));
            }
            _ => panic!("build must fail"),
        }
    }

    #[test]
    fn test_unknown_entry_point_is_kernel_not_found() {
        let exec = exec();
        let source = KernelSource::from_string("__kernel void matrix_mul(__global float* a) {}");
        let program = Program::build(exec.context(), &source, "").unwrap();
        match program.kernel(&UNKNOWN) {
            Err(OffloadError::KernelNotFound { name, status }) => {
                assert_eq!(name, "matrix_transpose");
                assert_eq!(status, ClStatus(CL_INVALID_KERNEL_NAME));
            }
            _ => panic!("expected missing kernel"),
        }
    }
}

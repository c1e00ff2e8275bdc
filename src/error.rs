//! Ошибки разгрузки умножения на устройство
//!
//! Каждая операция возвращает типизированный `Result`; вызывающий код
//! прерывает запуск при первой ошибке. Коды OpenCL хранятся как `ClStatus`
//! и печатаются символьным именем.

use crate::opencl::status::ClStatus;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OffloadError {
    /// Не найдена платформа или устройство
    #[error("No OpenCL {what} found: {status}")]
    Discovery { what: &'static str, status: ClStatus },

    #[error("Failed to create {stage}: {status}")]
    ContextCreation { stage: &'static str, status: ClStatus },

    #[error("Failed to load kernel source {path}: {reason}")]
    KernelSource { path: PathBuf, reason: String },

    /// Ошибка сборки программы вместе с логом компилятора
    #[error("Failed to build program: {status}\n{log}")]
    Build { status: ClStatus, log: String },

    #[error("Kernel `{name}` not found in program: {status}")]
    KernelNotFound { name: String, status: ClStatus },

    #[error("Failed to allocate {bytes} byte buffer: {reason}")]
    Allocation { bytes: usize, reason: String },

    #[error("Failed to {direction} buffer: {reason}")]
    Transfer {
        direction: &'static str,
        reason: String,
    },

    #[error("Failed to set kernel argument {index}: {reason}")]
    KernelArgument { index: usize, reason: String },

    #[error("Kernel argument {index} is not bound")]
    UnboundArgument { index: usize },

    #[error("Invalid work size: {reason}")]
    InvalidWorkSize { reason: String },

    #[error("Failed to enqueue kernel: {status}")]
    Dispatch { status: ClStatus },

    #[error("Event {operation} failed: {status}")]
    Event {
        operation: &'static str,
        status: ClStatus,
    },

    #[error("Failed to release {object}: {status}")]
    Release {
        object: &'static str,
        status: ClStatus,
    },

    /// Первое расхождение с эталоном на хосте
    #[error("Verification failed at [{row}][{col}]: expected {expected}, got {actual}")]
    Verification {
        row: usize,
        col: usize,
        expected: f32,
        actual: f32,
    },

    #[error("Matrix dimensions do not match: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl OffloadError {
    /// Код OpenCL, если ошибка вызвана драйвером
    pub fn status(&self) -> Option<ClStatus> {
        match self {
            OffloadError::Discovery { status, .. }
            | OffloadError::ContextCreation { status, .. }
            | OffloadError::Build { status, .. }
            | OffloadError::KernelNotFound { status, .. }
            | OffloadError::Dispatch { status }
            | OffloadError::Event { status, .. }
            | OffloadError::Release { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, OffloadError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opencl::types::CL_INVALID_WORK_GROUP_SIZE;

    #[test]
    fn test_messages_use_symbolic_status() {
        let err = OffloadError::Dispatch {
            status: ClStatus(CL_INVALID_WORK_GROUP_SIZE),
        };
        assert_eq!(
            err.to_string(),
            "Failed to enqueue kernel: CL_INVALID_WORK_GROUP_SIZE (-54)"
        );
        assert_eq!(err.status(), Some(ClStatus(CL_INVALID_WORK_GROUP_SIZE)));
    }

    #[test]
    fn test_verification_message_names_index() {
        let err = OffloadError::Verification {
            row: 1,
            col: 2,
            expected: 6.0,
            actual: 5.0,
        };
        assert_eq!(
            err.to_string(),
            "Verification failed at [1][2]: expected 6, got 5"
        );
        assert_eq!(err.status(), None);
    }
}

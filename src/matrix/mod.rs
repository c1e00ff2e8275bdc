//! Модуль для работы с матрицами
//!
//! Предоставляет:
//! - Типы матриц и шаблоны заполнения
//! - Эталонное умножение и сверку на хосте
//! - Контракты ядер умножения

mod types;
pub mod kernels;
pub mod operations;

pub use kernels::{KernelVariant, DEFAULT_KERNEL_PATH};
pub use operations::{
    check_against, compare, format_corner, initialize_matrices, reference_multiply,
    reference_multiply_with_progress, verify, Comparison, DEFAULT_TOLERANCE,
};
pub use types::{Matrix, MatrixPattern, PatternKind};

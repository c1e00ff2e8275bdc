//! Разгрузка умножения квадратных матриц на устройство OpenCL
//!
//! Конвейер одного запуска: опрос платформы и устройства, контекст и очередь
//! команд, сборка ядра из внешнего файла, буферы A/B/C, запуск двумерной
//! сетки, выгрузка результата и сверка с эталоном на хосте. Все ресурсы
//! устройства принадлежат `OffloadSession` и освобождаются в обратном
//! порядке зависимостей.
//!
//! Вызовы OpenCL идут через трейт `opencl::driver::Driver`: нативная
//! реализация (feature `opencl`) или эмулятор хоста `opencl::host::HostDriver`.

pub mod cli;
pub mod error;
pub mod matrix;
pub mod opencl;
pub mod report;
pub mod session;
pub mod utils;

// Реэкспорт основных типов для удобства
pub use error::{OffloadError, Result};
pub use matrix::{KernelVariant, Matrix, MatrixPattern};
pub use opencl::status::ClStatus;
pub use opencl::Backend;
pub use session::{MultiplyOutcome, OffloadSession, SessionConfig, UploadMode};

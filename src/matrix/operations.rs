//! Операции над матрицами на хосте: заполнение, эталонное умножение, сверка

use super::types::{Matrix, MatrixPattern};
use crate::error::{OffloadError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::Serialize;
use std::fmt::Write;
use tracing::{debug, info};

/// Допуск сравнения по умолчанию
pub const DEFAULT_TOLERANCE: f32 = 0.01;

/// Начиная с этого размера эталонное умножение показывает прогресс
const PROGRESS_THRESHOLD: usize = 256;

/// Инициализирует матрицы заданного шаблона и размера
pub fn initialize_matrices(pattern: MatrixPattern, size: usize) -> (Matrix, Matrix) {
    match pattern {
        MatrixPattern::OnesAndTwos => (Matrix::filled(size, 1.0), Matrix::filled(size, 2.0)),
        MatrixPattern::ThreesAndFours => (Matrix::filled(size, 3.0), Matrix::filled(size, 4.0)),
        MatrixPattern::ScaledIdentity { a, b } => {
            (Matrix::scaled_identity(size, a), Matrix::scaled_identity(size, b))
        }
        MatrixPattern::Random { seed } => {
            let mut rng = StdRng::seed_from_u64(seed);
            let a = Matrix::from_fn(size, |_| rng.gen_range(0.0..1.0));
            let b = Matrix::from_fn(size, |_| rng.gen_range(0.0..1.0));
            (a, b)
        }
        MatrixPattern::Normal { seed } => {
            let mut rng = StdRng::seed_from_u64(seed);
            let a = Matrix::from_fn(size, |_| rng.sample(StandardNormal));
            let b = Matrix::from_fn(size, |_| rng.sample(StandardNormal));
            (a, b)
        }
    }
}

fn check_dims(a: &Matrix, b: &Matrix) -> Result<()> {
    if a.dim() != b.dim() {
        return Err(OffloadError::DimensionMismatch {
            left: a.dim(),
            right: b.dim(),
        });
    }
    Ok(())
}

fn multiply_row(a: &Matrix, b: &Matrix, row: usize, out: &mut [f32]) {
    let n = a.dim();
    let (a, b) = (a.as_slice(), b.as_slice());
    for (col, value) in out.iter_mut().enumerate() {
        let mut sum = 0.0f32;
        for k in 0..n {
            sum += a[row * n + k] * b[k * n + col];
        }
        *value = sum;
    }
}

/// Эталонное умножение тройным циклом: `C[i][j] = sum_k A[i][k] * B[k][j]`
pub fn reference_multiply(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    check_dims(a, b)?;
    let n = a.dim();
    let mut c = Matrix::zeros(n);
    if n == 0 {
        return Ok(c);
    }
    for (row, out) in c.as_mut_slice().chunks_exact_mut(n).enumerate() {
        multiply_row(a, b, row, out);
    }
    Ok(c)
}

/// То же, с индикатором прогресса по строкам для больших матриц
pub fn reference_multiply_with_progress(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    check_dims(a, b)?;
    let n = a.dim();
    if n < PROGRESS_THRESHOLD {
        return reference_multiply(a, b);
    }

    let pb = ProgressBar::new(n as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} rows ({eta})")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);

    let mut c = Matrix::zeros(n);
    for (row, out) in c.as_mut_slice().chunks_exact_mut(n).enumerate() {
        multiply_row(a, b, row, out);
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(c)
}

/// Сводка сравнения двух матриц
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Comparison {
    pub elements: usize,
    pub mismatches: usize,
    pub max_abs_diff: f32,
    /// Первое расхождение: (строка, столбец, ожидалось, получено)
    #[serde(skip)]
    pub first_mismatch: Option<(usize, usize, f32, f32)>,
}

impl Comparison {
    pub fn passed(&self) -> bool {
        self.mismatches == 0
    }
}

/// Сравнивает все элементы с абсолютным допуском
pub fn compare(expected: &Matrix, actual: &Matrix, tolerance: f32) -> Result<Comparison> {
    check_dims(expected, actual)?;
    let n = expected.dim();
    let mut comparison = Comparison {
        elements: expected.len(),
        mismatches: 0,
        max_abs_diff: 0.0,
        first_mismatch: None,
    };
    for (idx, (&e, &a)) in expected.as_slice().iter().zip(actual.as_slice()).enumerate() {
        let diff = (e - a).abs();
        // NaN тоже считается расхождением
        if diff.is_nan() || diff > tolerance {
            comparison.mismatches += 1;
            if comparison.first_mismatch.is_none() {
                comparison.first_mismatch = Some((idx / n, idx % n, e, a));
            }
        }
        if diff > comparison.max_abs_diff {
            comparison.max_abs_diff = diff;
        }
    }
    debug!(
        "Compared {} elements: {} mismatches, max diff {}",
        comparison.elements, comparison.mismatches, comparison.max_abs_diff
    );
    Ok(comparison)
}

/// Сверяет результат устройства с уже посчитанным эталоном
pub fn check_against(expected: &Matrix, actual: &Matrix, tolerance: f32) -> Result<Comparison> {
    let comparison = compare(expected, actual, tolerance)?;
    if let Some((row, col, expected, actual)) = comparison.first_mismatch {
        return Err(OffloadError::Verification {
            row,
            col,
            expected,
            actual,
        });
    }
    info!("Verification passed ({} elements)", comparison.elements);
    Ok(comparison)
}

/// Пересчитывает произведение на хосте и сверяет с результатом устройства
pub fn verify(a: &Matrix, b: &Matrix, device_c: &Matrix, tolerance: f32) -> Result<Comparison> {
    let expected = reference_multiply(a, b)?;
    check_against(&expected, device_c, tolerance)
}

/// Левый верхний угол матрицы для вывода
pub fn format_corner(matrix: &Matrix, size: usize) -> String {
    let shown = size.min(matrix.dim());
    let mut out = String::new();
    for row in 0..shown {
        for col in 0..shown {
            let _ = write!(out, "{:8.2} ", matrix.get(row, col));
        }
        if shown < matrix.dim() {
            out.push_str("...");
        }
        out.push('\n');
    }
    if shown < matrix.dim() {
        out.push_str("...\n");
    }
    out
}

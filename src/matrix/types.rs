//! Типы матриц и связанные структуры

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Квадратная матрица `dim x dim` чисел `f32`, хранение по строкам
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    dim: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn zeros(dim: usize) -> Self {
        Self {
            dim,
            data: vec![0.0; dim * dim],
        }
    }

    pub fn filled(dim: usize, value: f32) -> Self {
        Self {
            dim,
            data: vec![value; dim * dim],
        }
    }

    /// `value * I`
    pub fn scaled_identity(dim: usize, value: f32) -> Self {
        let mut matrix = Self::zeros(dim);
        for i in 0..dim {
            matrix.data[i * dim + i] = value;
        }
        matrix
    }

    /// Заполняет элементы по индексу в порядке хранения
    pub fn from_fn(dim: usize, f: impl FnMut(usize) -> f32) -> Self {
        Self {
            dim,
            data: (0..dim * dim).map(f).collect(),
        }
    }

    /// Матрица из готовых данных; `None`, если длина не равна `dim * dim`
    pub fn from_vec(dim: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == dim * dim).then_some(Self { dim, data })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.dim + col]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

/// Способ заполнения входных матриц
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum MatrixPattern {
    /// Равномерно распределенные числа из [0, 1)
    Random { seed: u64 },
    /// Нормальное распределение N(0, 1)
    Normal { seed: u64 },
    /// `A = a * I`, `B = b * I`
    ScaledIdentity { a: f32, b: f32 },
    /// Матрицы заполненные 1 и 2
    OnesAndTwos,
    /// Матрицы заполненные 3 и 4
    ThreesAndFours,
}

impl Default for MatrixPattern {
    fn default() -> Self {
        MatrixPattern::Random { seed: 0 }
    }
}

impl fmt::Display for MatrixPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatrixPattern::Random { seed } => write!(f, "random (seed {seed})"),
            MatrixPattern::Normal { seed } => write!(f, "normal (seed {seed})"),
            MatrixPattern::ScaledIdentity { a, b } => write!(f, "{a}*I x {b}*I"),
            MatrixPattern::OnesAndTwos => write!(f, "ones and twos"),
            MatrixPattern::ThreesAndFours => write!(f, "threes and fours"),
        }
    }
}

/// Имя шаблона без параметров, как в командной строке
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Random,
    Normal,
    Identity,
    Ones,
    Threes,
}

impl PatternKind {
    pub fn with_params(self, seed: u64, a: f32, b: f32) -> MatrixPattern {
        match self {
            PatternKind::Random => MatrixPattern::Random { seed },
            PatternKind::Normal => MatrixPattern::Normal { seed },
            PatternKind::Identity => MatrixPattern::ScaledIdentity { a, b },
            PatternKind::Ones => MatrixPattern::OnesAndTwos,
            PatternKind::Threes => MatrixPattern::ThreesAndFours,
        }
    }
}

impl FromStr for PatternKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(PatternKind::Random),
            "normal" => Ok(PatternKind::Normal),
            "identity" => Ok(PatternKind::Identity),
            "ones" => Ok(PatternKind::Ones),
            "threes" => Ok(PatternKind::Threes),
            other => Err(format!("unknown matrix pattern: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_identity() {
        let m = Matrix::scaled_identity(3, 2.5);
        assert_eq!(m.get(1, 1), 2.5);
        assert_eq!(m.get(0, 2), 0.0);
        assert_eq!(m.len(), 9);
    }

    #[test]
    fn test_from_vec_checks_length() {
        assert!(Matrix::from_vec(2, vec![1.0; 4]).is_some());
        assert!(Matrix::from_vec(2, vec![1.0; 3]).is_none());
    }

    #[test]
    fn test_pattern_kind_parsing() {
        assert_eq!("Identity".parse::<PatternKind>(), Ok(PatternKind::Identity));
        assert_eq!(
            PatternKind::Identity.with_params(0, 12.0, -9.0),
            MatrixPattern::ScaledIdentity { a: 12.0, b: -9.0 }
        );
        assert!("zeros".parse::<PatternKind>().is_err());
    }
}

//! Двумерная сетка запуска ядра

use super::probe::DeviceLimits;
use crate::error::{OffloadError, Result};
use serde::Serialize;

/// Глобальный и локальный размеры NDRange (2-D)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkGrid {
    pub global: [usize; 2],
    pub local: [usize; 2],
}

impl WorkGrid {
    pub fn new(global: [usize; 2], local: [usize; 2]) -> Self {
        Self { global, local }
    }

    /// Квадратная сетка `dim x dim` с квадратным тайлом
    pub fn square(dim: usize, tile: usize) -> Self {
        Self::new([dim, dim], [tile, tile])
    }

    pub fn work_group_size(&self) -> usize {
        self.local.iter().product()
    }

    pub fn group_count(&self) -> [usize; 2] {
        [
            self.global[0] / self.local[0].max(1),
            self.global[1] / self.local[1].max(1),
        ]
    }

    /// Проверяет сетку до постановки в очередь
    pub fn validate(&self, limits: &DeviceLimits) -> Result<()> {
        let invalid = |reason: String| Err(OffloadError::InvalidWorkSize { reason });

        if self.global.contains(&0) {
            return invalid(format!("global size {:?} has a zero dimension", self.global));
        }
        if self.local.contains(&0) {
            return invalid(format!("local size {:?} has a zero dimension", self.local));
        }
        for dim in 0..2 {
            if self.global[dim] % self.local[dim] != 0 {
                return invalid(format!(
                    "local size {} does not divide global size {} in dimension {}",
                    self.local[dim], self.global[dim], dim
                ));
            }
        }
        if let Some(max) = limits.max_work_group_size {
            if self.work_group_size() > max {
                return invalid(format!(
                    "work-group size {} exceeds device maximum {}",
                    self.work_group_size(),
                    max
                ));
            }
        }
        if let Some(sizes) = &limits.max_work_item_sizes {
            for (dim, (&local, &max)) in self.local.iter().zip(sizes).enumerate() {
                if local > max {
                    return invalid(format!(
                        "local size {} exceeds device maximum {} in dimension {}",
                        local, max, dim
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> DeviceLimits {
        DeviceLimits {
            max_work_group_size: Some(256),
            max_work_item_sizes: Some(vec![256, 256, 64]),
        }
    }

    fn reason(grid: WorkGrid) -> String {
        match grid.validate(&limits()) {
            Err(OffloadError::InvalidWorkSize { reason }) => reason,
            other => panic!("expected invalid work size, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_grid() {
        let grid = WorkGrid::square(512, 8);
        assert!(grid.validate(&limits()).is_ok());
        assert_eq!(grid.work_group_size(), 64);
        assert_eq!(grid.group_count(), [64, 64]);
    }

    #[test]
    fn test_tile_must_divide_grid() {
        assert!(reason(WorkGrid::square(10, 4)).contains("does not divide"));
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        assert!(reason(WorkGrid::new([0, 8], [8, 8])).contains("global"));
        assert!(reason(WorkGrid::new([8, 8], [8, 0])).contains("local"));
    }

    #[test]
    fn test_device_limits_enforced() {
        assert!(reason(WorkGrid::square(64, 32)).contains("work-group size 1024"));
        let narrow = DeviceLimits {
            max_work_group_size: None,
            max_work_item_sizes: Some(vec![4, 4]),
        };
        assert!(WorkGrid::square(16, 8).validate(&narrow).is_err());
        assert!(WorkGrid::square(16, 8).validate(&DeviceLimits::default()).is_ok());
    }
}

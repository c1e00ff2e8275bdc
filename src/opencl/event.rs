//! События завершения команд и профилирование

use super::driver::SharedDriver;
use super::status::ClStatus;
use super::types::*;
use crate::error::{OffloadError, Result};
use serde::Serialize;
use std::ptr;
use std::time::Duration;
use tracing::warn;

/// Отметки времени команды в наносекундах часов устройства
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KernelTiming {
    pub queued: u64,
    pub start: u64,
    pub end: u64,
}

impl KernelTiming {
    /// Время исполнения на устройстве (end - start)
    pub fn device_elapsed(&self) -> Duration {
        Duration::from_nanos(self.end.saturating_sub(self.start))
    }

    /// Время от постановки в очередь до завершения
    pub fn total_elapsed(&self) -> Duration {
        Duration::from_nanos(self.end.saturating_sub(self.queued))
    }

    pub fn device_micros(&self) -> f64 {
        self.device_elapsed().as_nanos() as f64 / 1000.0
    }
}

/// Событие одной поставленной команды
pub struct Event {
    driver: SharedDriver,
    raw: cl_event,
}

impl Event {
    pub(crate) fn from_raw(driver: SharedDriver, raw: cl_event) -> Self {
        Self { driver, raw }
    }

    pub fn raw(&self) -> cl_event {
        self.raw
    }

    /// Блокирует хост до завершения команды
    pub fn wait(&self) -> Result<()> {
        self.driver
            .wait_for_events(&[self.raw])
            .map_err(|status| OffloadError::Event {
                operation: "wait",
                status,
            })
    }

    /// Отметки времени; доступны только на очереди с профилированием
    pub fn profile(&self) -> Result<KernelTiming> {
        let query = |param| {
            self.driver
                .event_profiling_info(self.raw, param)
                .map_err(|status| OffloadError::Event {
                    operation: "profiling",
                    status,
                })
        };
        Ok(KernelTiming {
            queued: query(CL_PROFILING_COMMAND_QUEUED)?,
            start: query(CL_PROFILING_COMMAND_START)?,
            end: query(CL_PROFILING_COMMAND_END)?,
        })
    }

    fn release_raw(&mut self) -> std::result::Result<(), ClStatus> {
        if self.raw.is_null() {
            return Ok(());
        }
        let raw = std::mem::replace(&mut self.raw, ptr::null_mut());
        self.driver.release_event(raw)
    }

    pub fn release(mut self) -> Result<()> {
        self.release_raw().map_err(|status| OffloadError::Release {
            object: "event",
            status,
        })
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        if let Err(status) = self.release_raw() {
            warn!("Failed to release OpenCL event: {}", status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_is_end_minus_start() {
        let timing = KernelTiming {
            queued: 1_000,
            start: 3_000,
            end: 10_500,
        };
        assert_eq!(timing.device_elapsed(), Duration::from_nanos(7_500));
        assert_eq!(timing.total_elapsed(), Duration::from_nanos(9_500));
        assert_eq!(timing.device_micros(), 7.5);
    }

    #[test]
    fn test_clock_going_backwards_saturates() {
        let timing = KernelTiming {
            queued: 5,
            start: 10,
            end: 8,
        };
        assert_eq!(timing.device_elapsed(), Duration::ZERO);
    }
}

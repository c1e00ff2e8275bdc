//! Модуль для работы с OpenCL
//!
//! Содержит низкоуровневые привязки, трейт `Driver` с двумя реализациями
//! и безопасные обертки над объектами OpenCL. Каждая обертка освобождает
//! свой объект при удалении.

#[cfg(feature = "opencl")]
pub mod bindings;
#[cfg(feature = "opencl")]
pub mod callbacks;
#[cfg(feature = "opencl")]
pub mod native;

pub mod buffer;
pub mod context;
pub mod dispatch;
pub mod driver;
pub mod event;
pub mod host;
pub mod kernel;
pub mod probe;
pub mod program;
pub mod status;
pub mod types;

use crate::error::{OffloadError, Result};
use driver::SharedDriver;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// Реализация драйвера, выбираемая при запуске
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Эмулятор в процессе
    Host,
    /// Системная библиотека OpenCL
    Native,
}

impl Backend {
    /// Бэкенд по умолчанию: нативный, если крейт собран с `opencl`
    pub fn default_for_build() -> Self {
        if cfg!(feature = "opencl") {
            Backend::Native
        } else {
            Backend::Host
        }
    }

    pub fn connect(self) -> Result<SharedDriver> {
        match self {
            Backend::Host => Ok(Rc::new(host::HostDriver::new())),
            #[cfg(feature = "opencl")]
            Backend::Native => Ok(Rc::new(native::NativeDriver::new())),
            #[cfg(not(feature = "opencl"))]
            Backend::Native => Err(OffloadError::BackendUnavailable(
                "built without the `opencl` feature".to_string(),
            )),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "host" => Ok(Backend::Host),
            "native" | "opencl" => Ok(Backend::Native),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Host => write!(f, "host"),
            Backend::Native => write!(f, "native"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parsing() {
        assert_eq!("host".parse::<Backend>(), Ok(Backend::Host));
        assert_eq!("OpenCL".parse::<Backend>(), Ok(Backend::Native));
        assert!("cuda".parse::<Backend>().is_err());
    }

    #[test]
    fn test_host_backend_connects() {
        let driver = Backend::Host.connect().unwrap();
        assert_eq!(driver.platform_ids().unwrap().len(), 1);
    }

    #[cfg(not(feature = "opencl"))]
    #[test]
    fn test_native_backend_requires_feature() {
        assert!(matches!(
            Backend::Native.connect(),
            Err(OffloadError::BackendUnavailable(_))
        ));
    }
}

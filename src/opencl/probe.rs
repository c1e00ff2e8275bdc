//! Опрос платформы и устройства
//!
//! Каждый атрибут запрашивается отдельно. Неудачный запрос не прерывает
//! опрос: атрибут помечается недоступным и записывается `ProbeWarning`.

use super::driver::Driver;
use super::status::ClStatus;
use super::types::*;
use crate::error::{OffloadError, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Неудачный запрос атрибута; не является ошибкой запуска
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeWarning {
    pub attribute: &'static str,
    pub status: String,
}

impl fmt::Display for ProbeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} unavailable: {}", self.attribute, self.status)
    }
}

/// Какой тип устройства запрашивать у платформы
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Gpu,
    Cpu,
    Any,
}

impl DeviceKind {
    fn mask(self) -> cl_device_type {
        match self {
            DeviceKind::Gpu => CL_DEVICE_TYPE_GPU,
            DeviceKind::Cpu => CL_DEVICE_TYPE_CPU,
            DeviceKind::Any => CL_DEVICE_TYPE_ALL,
        }
    }
}

impl FromStr for DeviceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gpu" => Ok(DeviceKind::Gpu),
            "cpu" => Ok(DeviceKind::Cpu),
            "any" | "all" => Ok(DeviceKind::Any),
            other => Err(format!("unknown device kind: {other}")),
        }
    }
}

/// Класс устройства по `CL_DEVICE_TYPE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceType {
    Cpu,
    Gpu,
    Accelerator,
    Other(u64),
}

impl From<cl_device_type> for DeviceType {
    fn from(bits: cl_device_type) -> Self {
        if bits & CL_DEVICE_TYPE_GPU != 0 {
            DeviceType::Gpu
        } else if bits & CL_DEVICE_TYPE_CPU != 0 {
            DeviceType::Cpu
        } else if bits & CL_DEVICE_TYPE_ACCELERATOR != 0 {
            DeviceType::Accelerator
        } else {
            DeviceType::Other(bits)
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Cpu => write!(f, "CPU"),
            DeviceType::Gpu => write!(f, "GPU"),
            DeviceType::Accelerator => write!(f, "Accelerator"),
            DeviceType::Other(bits) => write!(f, "Other ({bits:#x})"),
        }
    }
}

/// Платформа OpenCL
#[derive(Debug, Clone)]
pub struct Platform {
    raw: cl_platform_id,
    pub name: Option<String>,
    pub vendor: Option<String>,
    pub version: Option<String>,
    pub warnings: Vec<ProbeWarning>,
}

impl Platform {
    pub fn raw(&self) -> cl_platform_id {
        self.raw
    }
}

/// Характеристики устройства
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceInfo {
    pub name: Option<String>,
    pub vendor: Option<String>,
    pub device_type: Option<DeviceType>,
    pub compute_units: Option<u32>,
    pub max_mem_alloc_bytes: Option<u64>,
    pub global_mem_bytes: Option<u64>,
    pub max_clock_mhz: Option<u32>,
    pub max_work_group_size: Option<usize>,
    pub max_work_item_sizes: Option<Vec<usize>>,
}

impl DeviceInfo {
    pub fn limits(&self) -> DeviceLimits {
        DeviceLimits {
            max_work_group_size: self.max_work_group_size,
            max_work_item_sizes: self.max_work_item_sizes.clone(),
        }
    }
}

/// Ограничения рабочей группы, известные после опроса.
/// `None` — лимит неизвестен и не проверяется.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceLimits {
    pub max_work_group_size: Option<usize>,
    pub max_work_item_sizes: Option<Vec<usize>>,
}

/// Выбранное устройство
#[derive(Debug, Clone)]
pub struct Device {
    raw: cl_device_id,
    pub info: DeviceInfo,
    pub warnings: Vec<ProbeWarning>,
}

impl Device {
    pub fn raw(&self) -> cl_device_id {
        self.raw
    }
}

fn decode_string(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Some(String::from_utf8_lossy(&bytes[..end]).trim().to_string())
}

fn decode<T: bytemuck::Pod>(bytes: &[u8]) -> Option<T> {
    let size = std::mem::size_of::<T>();
    bytemuck::try_pod_read_unaligned(bytes.get(..size)?).ok()
}

fn decode_usize_vec(bytes: &[u8]) -> Option<Vec<usize>> {
    const SIZE: usize = std::mem::size_of::<usize>();
    if bytes.is_empty() || bytes.len() % SIZE != 0 {
        return None;
    }
    bytes.chunks_exact(SIZE).map(decode::<usize>).collect()
}

struct Prober {
    warnings: Vec<ProbeWarning>,
}

impl Prober {
    fn query<T>(
        &mut self,
        attribute: &'static str,
        fetch: std::result::Result<Vec<u8>, ClStatus>,
        decode: fn(&[u8]) -> Option<T>,
    ) -> Option<T> {
        let status = match fetch {
            Ok(bytes) => match decode(&bytes) {
                Some(value) => return Some(value),
                None => ClStatus(CL_INVALID_VALUE),
            },
            Err(status) => status,
        };
        warn!("Error: getting {} ({})", attribute, status);
        self.warnings.push(ProbeWarning {
            attribute,
            status: status.to_string(),
        });
        None
    }
}

/// Первая платформа OpenCL
pub fn probe_platform(driver: &dyn Driver) -> Result<Platform> {
    let platforms = driver
        .platform_ids()
        .map_err(|status| OffloadError::Discovery {
            what: "platform",
            status,
        })?;
    let raw = *platforms.first().ok_or(OffloadError::Discovery {
        what: "platform",
        status: ClStatus(CL_INVALID_PLATFORM),
    })?;

    let mut prober = Prober { warnings: Vec::new() };
    let name = prober.query("platform name", driver.platform_info(raw, CL_PLATFORM_NAME), decode_string);
    let vendor = prober.query("platform vendor", driver.platform_info(raw, CL_PLATFORM_VENDOR), decode_string);
    let version = prober.query("platform version", driver.platform_info(raw, CL_PLATFORM_VERSION), decode_string);

    if let Some(name) = &name {
        info!("Platform name      : {}", name);
    }
    Ok(Platform {
        raw,
        name,
        vendor,
        version,
        warnings: prober.warnings,
    })
}

/// Первое устройство нужного типа; если его нет — первое устройство любого типа
pub fn probe_device(driver: &dyn Driver, platform: &Platform, kind: DeviceKind) -> Result<Device> {
    let devices = match driver.device_ids(platform.raw(), kind.mask()) {
        Ok(devices) if !devices.is_empty() => devices,
        Ok(_) | Err(ClStatus(CL_DEVICE_NOT_FOUND)) if kind != DeviceKind::Any => {
            warn!("No {:?} device found, falling back to any device type", kind);
            driver.device_ids(platform.raw(), CL_DEVICE_TYPE_ALL)
                .map_err(|status| OffloadError::Discovery { what: "device", status })?
        }
        Ok(devices) => devices,
        Err(status) => return Err(OffloadError::Discovery { what: "device", status }),
    };
    let raw = *devices.first().ok_or(OffloadError::Discovery {
        what: "device",
        status: ClStatus(CL_DEVICE_NOT_FOUND),
    })?;

    let mut prober = Prober { warnings: Vec::new() };
    let info = DeviceInfo {
        name: prober.query("device name", driver.device_info(raw, CL_DEVICE_NAME), decode_string),
        vendor: prober.query("device vendor", driver.device_info(raw, CL_DEVICE_VENDOR), decode_string),
        device_type: prober
            .query("device type", driver.device_info(raw, CL_DEVICE_TYPE), decode::<u64>)
            .map(DeviceType::from),
        compute_units: prober.query(
            "compute units",
            driver.device_info(raw, CL_DEVICE_MAX_COMPUTE_UNITS),
            decode::<u32>,
        ),
        max_mem_alloc_bytes: prober.query(
            "max memory allocation",
            driver.device_info(raw, CL_DEVICE_MAX_MEM_ALLOC_SIZE),
            decode::<u64>,
        ),
        global_mem_bytes: prober.query(
            "global memory size",
            driver.device_info(raw, CL_DEVICE_GLOBAL_MEM_SIZE),
            decode::<u64>,
        ),
        max_clock_mhz: prober.query(
            "clock frequency",
            driver.device_info(raw, CL_DEVICE_MAX_CLOCK_FREQUENCY),
            decode::<u32>,
        ),
        max_work_group_size: prober.query(
            "max work-group size",
            driver.device_info(raw, CL_DEVICE_MAX_WORK_GROUP_SIZE),
            decode::<usize>,
        ),
        max_work_item_sizes: prober.query(
            "max work-item sizes",
            driver.device_info(raw, CL_DEVICE_MAX_WORK_ITEM_SIZES),
            decode_usize_vec,
        ),
    };
    if let Some(name) = &info.name {
        info!("Device name        : {}", name);
    }
    debug!("Device info: {:?}", info);

    Ok(Device {
        raw,
        info,
        warnings: prober.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opencl::host::{HostDeviceProfile, HostDriver};

    #[test]
    fn test_probe_reports_host_device() {
        let driver = HostDriver::new();
        let platform = probe_platform(&driver).unwrap();
        assert_eq!(platform.name.as_deref(), Some("Host Emulation Platform"));
        assert!(platform.warnings.is_empty());

        let device = probe_device(&driver, &platform, DeviceKind::Any).unwrap();
        assert_eq!(device.info.device_type, Some(DeviceType::Cpu));
        assert_eq!(device.info.compute_units, Some(8));
        assert_eq!(device.info.max_work_item_sizes, Some(vec![256, 256, 256]));
        assert_eq!(device.info.limits().max_work_group_size, Some(256));
    }

    #[test]
    fn test_failed_queries_become_warnings_and_probing_continues() {
        let driver = HostDriver::with_profile(HostDeviceProfile {
            compute_units: None,
            max_clock_frequency: None,
            ..HostDeviceProfile::default()
        });
        let platform = probe_platform(&driver).unwrap();
        let device = probe_device(&driver, &platform, DeviceKind::Any).unwrap();

        assert_eq!(device.info.compute_units, None);
        assert_eq!(device.info.max_clock_mhz, None);
        // Атрибуты после неудачных запросов все равно опрошены
        assert_eq!(device.info.global_mem_bytes, Some(1024 * 1024 * 1024));
        let failed: Vec<_> = device.warnings.iter().map(|w| w.attribute).collect();
        assert_eq!(failed, vec!["compute units", "clock frequency"]);
        assert!(device.warnings[0].status.contains("CL_INVALID_VALUE"));
    }

    #[test]
    fn test_gpu_request_falls_back_to_any_device() {
        let driver = HostDriver::new();
        let platform = probe_platform(&driver).unwrap();
        let device = probe_device(&driver, &platform, DeviceKind::Gpu).unwrap();
        assert_eq!(device.info.device_type, Some(DeviceType::Cpu));
    }

    #[test]
    fn test_device_type_classification() {
        assert_eq!(DeviceType::from(CL_DEVICE_TYPE_GPU), DeviceType::Gpu);
        assert_eq!(DeviceType::from(CL_DEVICE_TYPE_CPU | CL_DEVICE_TYPE_DEFAULT), DeviceType::Cpu);
        assert_eq!(DeviceType::from(CL_DEVICE_TYPE_ACCELERATOR), DeviceType::Accelerator);
        assert_eq!(DeviceType::Gpu.to_string(), "GPU");
        assert_eq!("GPU".parse::<DeviceKind>(), Ok(DeviceKind::Gpu));
    }
}

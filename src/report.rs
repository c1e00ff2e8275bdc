//! Отчет о запуске в JSON

use crate::matrix::{Comparison, KernelVariant, MatrixPattern};
use crate::opencl::dispatch::WorkGrid;
use crate::opencl::event::KernelTiming;
use crate::opencl::probe::{DeviceInfo, ProbeWarning};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub backend: String,
    pub platform: Option<String>,
    pub device: DeviceInfo,
    pub probe_warnings: Vec<ProbeWarning>,
    pub size: usize,
    pub grid: WorkGrid,
    pub variant: KernelVariant,
    pub upload_mode: String,
    pub pattern: MatrixPattern,
    pub kernel_timing: Option<KernelTiming>,
    pub device_time_us: Option<f64>,
    pub offload_wall_ms: f64,
    pub host_time_ms: f64,
    pub speedup: Option<f64>,
    pub tolerance: f32,
    pub comparison: Comparison,
    pub passed: bool,
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

impl RunReport {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: String,
        platform: Option<String>,
        device: DeviceInfo,
        probe_warnings: Vec<ProbeWarning>,
        size: usize,
        grid: WorkGrid,
        variant: KernelVariant,
        upload_mode: String,
        pattern: MatrixPattern,
        kernel_timing: Option<KernelTiming>,
        offload_wall: Duration,
        host_time: Duration,
        tolerance: f32,
        comparison: Comparison,
    ) -> Self {
        let device_time = kernel_timing.map(|timing| timing.device_elapsed());
        let speedup = device_time
            .filter(|time| !time.is_zero())
            .map(|time| host_time.as_secs_f64() / time.as_secs_f64());
        Self {
            backend,
            platform,
            device,
            probe_warnings,
            size,
            grid,
            variant,
            upload_mode,
            pattern,
            kernel_timing,
            device_time_us: kernel_timing.map(|timing| timing.device_micros()),
            offload_wall_ms: millis(offload_wall),
            host_time_ms: millis(host_time),
            speedup,
            tolerance,
            passed: comparison.passed(),
            comparison,
        }
    }

    pub fn write_json(&self, path: &Path) -> std::io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(timing: Option<KernelTiming>) -> RunReport {
        RunReport::new(
            "host".to_string(),
            Some("Host Emulation Platform".to_string()),
            DeviceInfo::default(),
            Vec::new(),
            4,
            WorkGrid::square(4, 2),
            KernelVariant::Tiled,
            "enqueue".to_string(),
            MatrixPattern::ScaledIdentity { a: 2.0, b: 3.0 },
            timing,
            Duration::from_millis(3),
            Duration::from_millis(8),
            0.01,
            Comparison {
                elements: 16,
                mismatches: 0,
                max_abs_diff: 0.0,
                first_mismatch: None,
            },
        )
    }

    #[test]
    fn test_speedup_from_device_time() {
        let timing = KernelTiming {
            queued: 0,
            start: 1_000_000,
            end: 3_000_000,
        };
        let report = report(Some(timing));
        assert_eq!(report.device_time_us, Some(2000.0));
        let speedup = report.speedup.unwrap();
        assert!((speedup - 4.0).abs() < 1e-9);
        assert!(report.passed);
    }

    #[test]
    fn test_written_json_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report(None).write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["size"], 4);
        assert_eq!(value["variant"], "Tiled");
        assert_eq!(value["grid"]["local"][0], 2);
        assert!(value["speedup"].is_null());
        assert_eq!(value["comparison"]["mismatches"], 0);
    }
}

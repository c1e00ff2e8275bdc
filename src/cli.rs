//! Аргументы командной строки и настройка логирования
//!
//! `RunConfig` собирается из аргументов clap и переводится в `SessionConfig`.

use crate::matrix::{KernelVariant, MatrixPattern, PatternKind, DEFAULT_KERNEL_PATH, DEFAULT_TOLERANCE};
use crate::opencl::probe::DeviceKind;
use crate::opencl::Backend;
use crate::session::{SessionConfig, UploadMode};
use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use std::ffi::OsString;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub size: usize,
    pub tile: usize,
    pub kernel_path: PathBuf,
    pub variant: KernelVariant,
    pub pattern: MatrixPattern,
    pub tolerance: f32,
    pub upload_mode: UploadMode,
    pub backend: Backend,
    pub device_kind: DeviceKind,
    pub profiling: bool,
    pub build_options: String,
    /// Сколько строк и столбцов результата печатать
    pub preview: usize,
    pub log_level: String,
    pub report_path: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            size: 512,
            tile: 8,
            kernel_path: PathBuf::from(DEFAULT_KERNEL_PATH),
            variant: KernelVariant::Tiled,
            pattern: MatrixPattern::Random { seed: 0 },
            tolerance: DEFAULT_TOLERANCE,
            upload_mode: UploadMode::Enqueue,
            backend: Backend::default_for_build(),
            device_kind: DeviceKind::Gpu,
            profiling: true,
            build_options: String::new(),
            preview: 4,
            log_level: "info".to_string(),
            report_path: None,
        }
    }
}

impl RunConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            kernel_path: self.kernel_path.clone(),
            variant: self.variant,
            tile: self.tile,
            device_kind: self.device_kind,
            profiling: self.profiling,
            upload_mode: self.upload_mode,
            build_options: self.build_options.clone(),
        }
    }
}

fn command() -> Command {
    Command::new("clmatmul")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Square matrix multiplication offloaded to an OpenCL device")
        .arg(
            Arg::new("size")
                .short('n')
                .long("size")
                .help("Matrix dimension N (matrices are N x N)")
                .value_name("N")
                .default_value("512"),
        )
        .arg(
            Arg::new("tile")
                .short('t')
                .long("tile")
                .help("Work-group side length (local size is TILE x TILE)")
                .value_name("TILE")
                .default_value("8"),
        )
        .arg(
            Arg::new("kernel")
                .short('k')
                .long("kernel")
                .help("Path to the OpenCL kernel source")
                .value_name("PATH")
                .default_value(DEFAULT_KERNEL_PATH),
        )
        .arg(
            Arg::new("variant")
                .long("variant")
                .help("Kernel entry point to run")
                .value_name("VARIANT")
                .value_parser(["tiled", "naive"])
                .default_value("tiled"),
        )
        .arg(
            Arg::new("pattern")
                .short('p')
                .long("pattern")
                .help("Input matrix pattern")
                .value_name("PATTERN")
                .value_parser(["random", "normal", "identity", "ones", "threes"])
                .default_value("random"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .help("Seed for random patterns")
                .value_name("SEED")
                .default_value("0"),
        )
        .arg(
            Arg::new("scale-a")
                .long("scale-a")
                .help("Diagonal value of A for the identity pattern")
                .value_name("VALUE")
                .allow_negative_numbers(true)
                .default_value("12"),
        )
        .arg(
            Arg::new("scale-b")
                .long("scale-b")
                .help("Diagonal value of B for the identity pattern")
                .value_name("VALUE")
                .allow_negative_numbers(true)
                .default_value("-9"),
        )
        .arg(
            Arg::new("tolerance")
                .long("tolerance")
                .help("Absolute tolerance for verification")
                .value_name("EPS")
                .default_value("0.01"),
        )
        .arg(
            Arg::new("upload")
                .long("upload")
                .help("How inputs reach the device")
                .value_name("MODE")
                .value_parser(["enqueue", "host-ptr"])
                .default_value("enqueue"),
        )
        .arg(
            Arg::new("backend")
                .long("backend")
                .help("Driver backend (native requires the `opencl` feature)")
                .value_name("BACKEND")
                .value_parser(["host", "native"]),
        )
        .arg(
            Arg::new("device")
                .long("device")
                .help("Preferred device type, falls back to any device")
                .value_name("TYPE")
                .value_parser(["gpu", "cpu", "any"])
                .default_value("gpu"),
        )
        .arg(
            Arg::new("no-profiling")
                .long("no-profiling")
                .help("Create the command queue without profiling")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("build-options")
                .long("build-options")
                .help("Options passed to the OpenCL compiler")
                .value_name("OPTIONS")
                .allow_hyphen_values(true),
        )
        .arg(
            Arg::new("preview")
                .long("preview")
                .help("Print the top-left corner of the result")
                .value_name("ROWS")
                .default_value("4"),
        )
        .arg(
            Arg::new("report")
                .long("report")
                .help("Write a JSON run report to this path")
                .value_name("PATH"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .help("Logging level")
                .value_name("LEVEL")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info"),
        )
}

fn parse_value<T>(matches: &clap::ArgMatches, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match matches.get_one::<String>(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("Invalid value for --{}: {} ({})", name, raw, e)),
        None => Ok(None),
    }
}

pub fn parse_args() -> Result<RunConfig> {
    parse_args_from(std::env::args_os())
}

pub fn parse_args_from<I, T>(args: I) -> Result<RunConfig>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = command().try_get_matches_from(args)?;
    let mut config = RunConfig::default();

    if let Some(size) = parse_value(&matches, "size")? {
        config.size = size;
    }
    if let Some(tile) = parse_value(&matches, "tile")? {
        config.tile = tile;
    }
    if let Some(kernel) = matches.get_one::<String>("kernel") {
        config.kernel_path = PathBuf::from(kernel);
    }
    if let Some(variant) = parse_value(&matches, "variant")? {
        config.variant = variant;
    }

    let seed: u64 = parse_value(&matches, "seed")?.unwrap_or(0);
    let scale_a: f32 = parse_value(&matches, "scale-a")?.unwrap_or(12.0);
    let scale_b: f32 = parse_value(&matches, "scale-b")?.unwrap_or(-9.0);
    if let Some(kind) = parse_value::<PatternKind>(&matches, "pattern")? {
        config.pattern = kind.with_params(seed, scale_a, scale_b);
    }

    if let Some(tolerance) = parse_value(&matches, "tolerance")? {
        config.tolerance = tolerance;
    }
    if let Some(mode) = parse_value(&matches, "upload")? {
        config.upload_mode = mode;
    }
    if let Some(backend) = parse_value(&matches, "backend")? {
        config.backend = backend;
    }
    if let Some(kind) = parse_value(&matches, "device")? {
        config.device_kind = kind;
    }
    config.profiling = !matches.get_flag("no-profiling");
    if let Some(options) = matches.get_one::<String>("build-options") {
        config.build_options = options.clone();
    }
    if let Some(preview) = parse_value(&matches, "preview")? {
        config.preview = preview;
    }
    if let Some(report) = matches.get_one::<String>("report") {
        config.report_path = Some(PathBuf::from(report));
    }

    if matches.get_flag("debug") {
        config.log_level = "debug".to_string();
    } else if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if config.tile == 0 {
        anyhow::bail!("--tile must be positive");
    }
    Ok(config)
}

pub fn setup_logging(level: &str) -> Result<()> {
    let level_filter = match level {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => return Err(anyhow::anyhow!("Invalid log level: {}", level)),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(tracing_subscriber::filter::LevelFilter::from_level(
            level_filter,
        ))
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_reference_program() {
        let config = parse_args_from(["clmatmul"]).unwrap();
        assert_eq!(config.size, 512);
        assert_eq!(config.tile, 8);
        assert_eq!(config.kernel_path, PathBuf::from("kernels/mm_kernel.cl"));
        assert_eq!(config.pattern, MatrixPattern::Random { seed: 0 });
        assert_eq!(config.tolerance, 0.01);
        assert!(config.profiling);
        assert_eq!(config.report_path, None);
    }

    #[test]
    fn test_identity_pattern_with_negative_scale() {
        let config = parse_args_from([
            "clmatmul",
            "--size",
            "1024",
            "--pattern",
            "identity",
            "--scale-a",
            "12",
            "--scale-b",
            "-9",
            "--variant",
            "naive",
            "--upload",
            "host-ptr",
            "--backend",
            "host",
            "--no-profiling",
        ])
        .unwrap();
        assert_eq!(config.size, 1024);
        assert_eq!(config.pattern, MatrixPattern::ScaledIdentity { a: 12.0, b: -9.0 });
        assert_eq!(config.variant, KernelVariant::Naive);
        assert_eq!(config.upload_mode, UploadMode::HostPointer);
        assert_eq!(config.backend, Backend::Host);
        assert!(!config.profiling);

        let session = config.session_config();
        assert_eq!(session.variant, KernelVariant::Naive);
        assert!(!session.profiling);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(parse_args_from(["clmatmul", "--size", "many"]).is_err());
        assert!(parse_args_from(["clmatmul", "--tile", "0"]).is_err());
        assert!(parse_args_from(["clmatmul", "--variant", "blocked"]).is_err());
    }

    #[test]
    fn test_debug_flag_overrides_log_level() {
        let config = parse_args_from(["clmatmul", "--log-level", "warn", "--debug"]).unwrap();
        assert_eq!(config.log_level, "debug");
    }
}

//! Умножение квадратных матриц на устройстве OpenCL со сверкой на хосте

use anyhow::{Context, Result};
use clmatmul::{
    cli::{self, RunConfig},
    matrix::{check_against, compare, format_corner, initialize_matrices, reference_multiply_with_progress},
    opencl::probe::{Device, Platform},
    report::RunReport,
    session::OffloadSession,
    utils::measure_time,
};
use prettytable::{row, Table};
use tracing::{error, info};

fn show<T: ToString>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unavailable".to_string())
}

fn print_device_table(platform: &Platform, device: &Device) {
    let info = &device.info;
    let mut table = Table::new();
    table.add_row(row!["Параметр", "Значение"]);
    table.add_row(row!["Platform name", show(&platform.name)]);
    table.add_row(row!["Platform vendor", show(&platform.vendor)]);
    table.add_row(row!["Platform version", show(&platform.version)]);
    table.add_row(row!["Device name", show(&info.name)]);
    table.add_row(row!["Device vendor", show(&info.vendor)]);
    table.add_row(row!["Device type", show(&info.device_type)]);
    table.add_row(row!["Compute units", show(&info.compute_units)]);
    table.add_row(row![
        "Max mem alloc (MB)",
        show(&info.max_mem_alloc_bytes.map(|bytes| bytes / (1024 * 1024)))
    ]);
    table.add_row(row![
        "Global mem (MB)",
        show(&info.global_mem_bytes.map(|bytes| bytes / (1024 * 1024)))
    ]);
    table.add_row(row!["Clock (MHz)", show(&info.max_clock_mhz)]);
    table.add_row(row!["Max work-group size", show(&info.max_work_group_size)]);
    table.add_row(row![
        "Max work-item sizes",
        show(&info.max_work_item_sizes.as_ref().map(|sizes| format!("{:?}", sizes)))
    ]);
    table.printstd();
}

/// Ошибка сверки важнее ошибки освобождения: вторая тогда только логируется
fn settle<T>(verdict: Result<T>, closed: Result<()>) -> Result<T> {
    match (verdict, closed) {
        (Err(mismatch), Err(release)) => {
            error!("{:#}", release);
            Err(mismatch)
        }
        (verdict, closed) => {
            closed?;
            verdict
        }
    }
}

fn run(config: &RunConfig) -> Result<()> {
    println!("Умножение матриц на устройстве OpenCL");
    println!("Размер матриц: {}x{}", config.size, config.size);
    println!("Размер рабочей группы: {}x{}", config.tile, config.tile);
    println!("Ядро: {} ({})", config.kernel_path.display(), config.variant);

    let driver = config.backend.connect()?;
    info!("Using {} backend", config.backend);

    let mut session = OffloadSession::open(driver, &config.session_config())
        .context("Failed to open offload session")?;
    print_device_table(session.platform(), session.device());

    let (a, b) = initialize_matrices(config.pattern, config.size);
    info!("Inputs initialised: {}", config.pattern);

    let outcome = session
        .multiply(&a, &b)
        .context("Device multiplication failed")?;
    match outcome.device_time() {
        Some(time) => println!("\nВремя ядра на устройстве: {:.3} us", time.as_nanos() as f64 / 1000.0),
        None => println!("\nПрофилирование выключено"),
    }
    println!("Время разгрузки (с передачей данных): {:?}", outcome.wall_time);

    if config.preview > 0 {
        println!("\nРезультирующая матрица C (устройство):");
        print!("{}", format_corner(&outcome.result, config.preview));
    }

    println!("\nЭталонное умножение на хосте...");
    let (expected, host_time) = measure_time(|| reference_multiply_with_progress(&a, &b));
    let expected = expected?;
    println!("Время на хосте: {:?}", host_time);

    let comparison = compare(&expected, &outcome.result, config.tolerance)?;
    let device = session.device();
    let report = RunReport::new(
        config.backend.to_string(),
        session.platform().name.clone(),
        device.info.clone(),
        session.platform().warnings.iter().chain(&device.warnings).cloned().collect(),
        config.size,
        outcome.grid,
        config.variant,
        config.upload_mode.to_string(),
        config.pattern,
        outcome.timing,
        outcome.wall_time,
        host_time,
        config.tolerance,
        comparison,
    );
    if let Some(speedup) = report.speedup {
        println!("Устройство быстрее хоста в {:.2} раз", speedup);
    }
    if let Some(path) = &config.report_path {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    let verdict = check_against(&expected, &outcome.result, config.tolerance)
        .context("Device result does not match host reference");
    let closed = session.close().context("Failed to release OpenCL resources");
    settle(verdict, closed)?;
    println!(
        "Проверка пройдена: {} элементов, максимальное расхождение {}",
        comparison.elements, comparison.max_abs_diff
    );
    Ok(())
}

fn main() {
    let config = match cli::parse_args() {
        Ok(config) => config,
        Err(e) => match e.downcast::<clap::Error>() {
            // --help и --version
            Ok(clap_error) if !clap_error.use_stderr() => clap_error.exit(),
            Ok(clap_error) => {
                let _ = clap_error.print();
                std::process::exit(1);
            }
            Err(e) => {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        },
    };

    if let Err(e) = cli::setup_logging(&config.log_level) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(&config) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

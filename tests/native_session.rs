//! Запуск `kernels/mm_kernel.cl` на настоящем устройстве OpenCL.
//! Требует `--features opencl` и установленную платформу:
//! `cargo test --features opencl -- --ignored`
#![cfg(feature = "opencl")]

use clmatmul::matrix::{check_against, initialize_matrices, reference_multiply, DEFAULT_TOLERANCE};
use clmatmul::opencl::probe::DeviceKind;
use clmatmul::{Backend, KernelVariant, Matrix, MatrixPattern, OffloadSession, SessionConfig};
use std::path::PathBuf;

fn config(variant: KernelVariant) -> SessionConfig {
    SessionConfig {
        kernel_path: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("kernels/mm_kernel.cl"),
        variant,
        tile: 8,
        device_kind: DeviceKind::Gpu,
        ..SessionConfig::default()
    }
}

fn open(variant: KernelVariant) -> OffloadSession {
    let driver = Backend::Native.connect().unwrap();
    OffloadSession::open(driver, &config(variant)).unwrap()
}

#[test]
#[ignore] // Требуется устройство OpenCL
fn test_native_scaled_identity_product() {
    for variant in [KernelVariant::Tiled, KernelVariant::Naive] {
        let mut session = open(variant);
        let (a, b) = initialize_matrices(MatrixPattern::ScaledIdentity { a: 2.0, b: 3.0 }, 64);
        let outcome = session.multiply(&a, &b).unwrap();
        assert_eq!(outcome.result, Matrix::scaled_identity(64, 6.0), "{}", variant);
        session.close().unwrap();
    }
}

#[test]
#[ignore] // Требуется устройство OpenCL
fn test_native_random_inputs_match_host_reference() {
    for variant in [KernelVariant::Tiled, KernelVariant::Naive] {
        let mut session = open(variant);
        let (a, b) = initialize_matrices(MatrixPattern::Random { seed: 7 }, 128);
        let outcome = session.multiply(&a, &b).unwrap();

        let expected = reference_multiply(&a, &b).unwrap();
        let comparison = check_against(&expected, &outcome.result, DEFAULT_TOLERANCE).unwrap();
        assert!(comparison.passed(), "{}: max diff {}", variant, comparison.max_abs_diff);
        assert_eq!(comparison.elements, expected.len());
        session.close().unwrap();
    }
}

#[test]
#[ignore] // Требуется устройство OpenCL
fn test_native_scaled_identity_product_at_full_size() {
    let mut session = open(KernelVariant::Tiled);
    let (a, b) = initialize_matrices(MatrixPattern::ScaledIdentity { a: 12.0, b: -9.0 }, 1024);
    let outcome = session.multiply(&a, &b).unwrap();
    assert_eq!(outcome.result, Matrix::scaled_identity(1024, -108.0));
    session.close().unwrap();
}

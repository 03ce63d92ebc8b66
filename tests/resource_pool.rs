mod common;

use std::cell::Cell;

use raytrace::{Buffer, DriverError, MemoryLocation, PackagingError, ResourcePool};

use common::*;

#[test]
fn test_take_or_build_is_idempotent() {
    init_logger();
    let (_driver, device) = software_device();
    let mut pool = ResourcePool::new();
    let runs = Cell::new(0);
    let build = || -> Result<Buffer, PackagingError> {
        runs.set(runs.get() + 1);
        Ok(device.create_buffer(Some("Args/Env"), 24, MemoryLocation::CpuToGpu)?)
    };

    let first = pool.take_or_build("Args/Env", build).unwrap();
    let second = pool
        .take_or_build("Args/Env", || unreachable!("factory ran twice"))
        .unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(runs.get(), 1);
    assert_eq!(pool.len(), 1);
    assert!(pool.contains("Args/Env"));
}

#[test]
fn test_labels_are_independent() {
    let (_driver, device) = software_device();
    let mut pool = ResourcePool::new();
    let env = pool
        .take_or_build("Args/Env", || {
            Ok(device.create_buffer(Some("Args/Env"), 24, MemoryLocation::CpuToGpu)?)
        })
        .unwrap();
    let background = pool
        .take_or_build("Args/Background", || {
            Ok(device.create_buffer(Some("Args/Background"), 8, MemoryLocation::CpuToGpu)?)
        })
        .unwrap();
    assert!(!env.ptr_eq(&background));
    let mut labels = pool.labels().collect::<Vec<_>>();
    labels.sort_unstable();
    assert_eq!(labels, vec!["Args/Background", "Args/Env"]);
}

#[test]
fn test_failed_build_is_cached() {
    init_logger();
    let (driver, device) = software_device();
    driver.fail_allocations_containing("Args/Frame");
    let mut pool = ResourcePool::new();
    let build = || {
        device
            .create_buffer(Some("Args/Frame"), 4, MemoryLocation::CpuToGpu)
            .map_err(|source| PackagingError::BufferAllocationFailed {
                label: "Args/Frame".to_owned(),
                source,
            })
    };

    let first = pool.take_or_build("Args/Frame", build).unwrap_err();
    assert!(matches!(
        first,
        PackagingError::BufferAllocationFailed {
            source: DriverError::OutOfMemory { .. },
            ..
        }
    ));
    // the cached failure is returned even though a new build would now be attempted
    let second = pool
        .take_or_build("Args/Frame", || unreachable!("failed entries are not rebuilt"))
        .unwrap_err();
    assert_eq!(first, second);
    assert!(matches!(pool.get("Args/Frame"), Some(Err(_))));

    pool.clear();
    assert!(pool.is_empty());
}

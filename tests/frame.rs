mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use raytrace::{FrameOutcome, PackagingError, Raytracer, RendererConfig, Residency};

use common::*;

fn raytracer(device: &raytrace::Device, config: RendererConfig) -> Raytracer {
    let mut raytracer = Raytracer::new(device, config, b"kernel").unwrap();
    let mut meshes = vec![quad_mesh(device, "Quad", 1, translations(1))];
    raytracer.update_scene(&mut meshes).unwrap();
    raytracer
}

#[test]
fn test_threadgroups_round_up() {
    let (_driver, device) = software_device();
    let config = RendererConfig {
        resolution: [100, 50],
        threads_per_group: [8, 4],
        ..Default::default()
    };
    let raytracer = Raytracer::new(&device, config, b"kernel").unwrap();
    assert_eq!(raytracer.threadgroups([100, 50]), [13, 13, 1]);
    assert_eq!(raytracer.threadgroups([64, 64]), [8, 16, 1]);
    assert_eq!(raytracer.threadgroups([1, 1]), [1, 1, 1]);
}

#[test]
fn test_rejects_empty_thread_groups() {
    let (_driver, device) = software_device();
    for threads_per_group in [[0, 8], [8, 0]] {
        let config = RendererConfig {
            threads_per_group,
            ..Default::default()
        };
        assert!(Raytracer::new(&device, config, b"kernel").is_err());
    }
    let config = RendererConfig {
        resolution: [0, 48],
        ..Default::default()
    };
    assert!(Raytracer::new(&device, config, b"kernel").is_err());
}

#[test]
fn test_no_scene() {
    init_logger();
    let (driver, device) = software_device();
    let mut raytracer = Raytracer::new(&device, RendererConfig::default(), b"kernel").unwrap();
    let (background, env) = environment(&device);
    let outcome = raytracer
        .render_frame(&background, &env, |_, _| {}, || {})
        .unwrap();
    assert!(matches!(outcome, FrameOutcome::NoScene));
    assert!(driver.dispatches().is_empty());
    assert_eq!(raytracer.frame().id, 0);
}

#[test]
fn test_frame_counter_and_completion() {
    init_logger();
    let (driver, device) = software_device();
    let config = RendererConfig {
        resolution: [32, 32],
        ..Default::default()
    };
    let mut raytracer = raytracer(&device, config);
    let (background, env) = environment(&device);
    let completed = Arc::new(AtomicU32::new(0));

    for expected in 0..3 {
        let counter = completed.clone();
        let outcome = raytracer
            .render_frame(&background, &env, |_, _| {}, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        match outcome {
            FrameOutcome::Submitted { frame, .. } => assert_eq!(frame.id, expected),
            other => panic!("frame {} not submitted: {:?}", expected, other),
        }
    }
    // every frame but the last was completed by the poll at the start of the next one
    assert_eq!(completed.load(Ordering::SeqCst), 2);
    raytracer.wait_idle().unwrap();
    assert_eq!(completed.load(Ordering::SeqCst), 3);
    assert_eq!(raytracer.frame().id, 3);
    assert_eq!(driver.dispatches().len(), 3);
    assert_eq!(driver.pending_submissions(), 0);
}

#[test]
fn test_present_is_recorded_after_dispatch() {
    init_logger();
    let (driver, device) = software_device();
    let mut raytracer = raytracer(&device, RendererConfig::default());
    let (background, env) = environment(&device);
    let mut presented = None;
    raytracer
        .render_frame(
            &background,
            &env,
            |recorder, target| {
                assert_eq!(driver.dispatches().len(), 0);
                recorder.use_texture(target, raytrace::ResourceUsage::Read);
                presented = Some(target.raw_id());
            },
            || {},
        )
        .unwrap();
    assert_eq!(presented, Some(raytracer.target().raw_id()));
    assert_eq!(driver.dispatches().len(), 1);
}

#[test]
fn test_skipped_frame_enables_placeholder() {
    init_logger();
    let (driver, device) = software_device();
    let mut raytracer = raytracer(&device, RendererConfig::default());
    let (background, mut env) = environment(&device);
    env.lut = pending_texture(&device, "Lut");
    assert!(raytracer.packager().placeholder().is_none());

    let outcome = raytracer
        .render_frame(&background, &env, |_, _| {}, || {})
        .unwrap();
    match outcome {
        FrameOutcome::Skipped(PackagingError::ResourceUnavailable { label }) => {
            assert_eq!(label, "Args/Env/Lut")
        }
        other => panic!("expected a skipped frame, got {:?}", other),
    }
    assert!(driver.dispatches().is_empty());
    assert_eq!(raytracer.frame().id, 0);
    assert!(raytracer.packager().placeholder().is_some());

    // the placeholder stands in while the texture is still missing
    let outcome = raytracer
        .render_frame(&background, &env, |_, _| {}, || {})
        .unwrap();
    assert!(matches!(outcome, FrameOutcome::Submitted { .. }));
    assert!(raytracer.packager().placeholder().is_some());

    env.lut.replace(vec![0u8; 64]).unwrap();
    let outcome = raytracer
        .render_frame(&background, &env, |_, _| {}, || {})
        .unwrap();
    assert!(matches!(outcome, FrameOutcome::Submitted { .. }));
    assert!(raytracer.packager().placeholder().is_none());
    assert_eq!(raytracer.frame().id, 2);
}

#[test]
fn test_heap_residency_frames() {
    init_logger();
    let (driver, device) = software_device();
    let config = RendererConfig {
        residency: Residency::Heap,
        label_prefix: "Heap".to_owned(),
        ..Default::default()
    };
    let mut raytracer = raytracer(&device, config);
    let (background, env) = environment(&device);
    for _ in 0..2 {
        let outcome = raytracer
            .render_frame(&background, &env, |_, _| {}, || {})
            .unwrap();
        assert!(matches!(outcome, FrameOutcome::Submitted { .. }));
    }
    raytracer.wait_idle().unwrap();
    assert_eq!(driver.dispatches().len(), 2);
    assert!(raytracer.pool().contains("Heap/Frame"));
}

#[test]
fn test_resize_recreates_target() {
    let (_driver, device) = software_device();
    let mut raytracer = raytracer(&device, RendererConfig::default());
    let before = raytracer.target().clone();
    raytracer.resize([320, 200]).unwrap();
    assert!(!raytracer.target().ptr_eq(&before));
    assert_eq!((raytracer.target().width(), raytracer.target().height()), (320, 200));
    assert_eq!(raytracer.seeds().width(), 320);
    assert_eq!(raytracer.config().resolution, [320, 200]);
}

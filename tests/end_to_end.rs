mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use raytrace::{
    AccelerationView, ArgsView, FrameOutcome, FrameView, MaterialView, MeshView, PieceView,
    PrimitiveInstance, Raytracer, RendererConfig,
};

use common::*;

#[test]
fn test_single_mesh_scene() {
    init_logger();
    let (driver, device) = software_device();
    let config = RendererConfig {
        resolution: [64, 48],
        ..Default::default()
    };
    let mut raytracer = Raytracer::new(&device, config, [0u8; 16]).unwrap();
    let mut meshes = vec![quad_mesh(&device, "Quad", 2, translations(2))];
    raytracer.update_scene(&mut meshes).unwrap();
    let (background, env) = environment(&device);

    let completed = Arc::new(AtomicBool::new(false));
    let flag = completed.clone();
    let outcome = raytracer
        .render_frame(&background, &env, |_, _| {}, move || {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
    assert!(matches!(outcome, FrameOutcome::Submitted { .. }));

    let dispatches = driver.dispatches();
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].threadgroups, [8, 6, 1]);
    assert_eq!(dispatches[0].threads_per_group, [8, 8, 1]);

    // the records stay alive until the frame's completion callback ran
    let root: ArgsView = read_view(&device, dispatches[0].arguments);
    assert_eq!(root.target, raytracer.target().resource_id());
    assert_eq!(root.seeds, raytracer.seeds().resource_id());
    let frame: FrameView = read_view(&device, root.frame);
    assert_eq!(frame.id, 0);

    let acceleration = raytracer.acceleration().unwrap();
    let top = acceleration.structure();
    assert!(top.instances().iter().all(|d| d.acceleration_structure_index == 0));
    assert_eq!(top.instance_count(), 2);

    let view: AccelerationView = read_view(&device, root.acceleration);
    assert_eq!(view.structure, top.acceleration_structure().device_address());
    let instances: Vec<PrimitiveInstance> = read_array(&device, view.instances, 2);
    assert_eq!(instances, vec![PrimitiveInstance::new(0); 2]);
    let mesh: MeshView = read_view(&device, view.meshes);
    let pieces: Vec<PieceView> = read_array(&device, mesh.pieces, 2);
    for (piece, source) in pieces.iter().zip(meshes[0].pieces()) {
        let material: MaterialView = read_view(&device, piece.material);
        assert_eq!(material, MaterialView::default());
        assert_eq!(piece.primitive_data, source.data().buffer.device_address());
    }

    assert!(!completed.load(Ordering::SeqCst));
    assert_eq!(raytracer.poll().unwrap(), 0);
    assert!(completed.load(Ordering::SeqCst));
    assert_eq!(raytracer.frame().id, 1);
}

mod common;

use raytrace::{AccelerationError, AccelerationStructureLevel, Accelerator, Mesh, PrimitiveInstance};

use common::*;

#[test]
fn test_bottom_level_has_one_geometry_per_piece() {
    init_logger();
    let (driver, device) = software_device();
    let accelerator = Accelerator::new(&device);
    let mut mesh = quad_mesh(&device, "Three quads", 3, translations(1));
    accelerator.build_geometry(&mut mesh, 0).unwrap();

    let blas = mesh.acceleration_structure().unwrap();
    assert_eq!(blas.geometry_count(), 3);
    let record = driver
        .build_record(blas.acceleration_structure().raw_id())
        .unwrap();
    assert_eq!(record.level, AccelerationStructureLevel::Bottom);
    assert_eq!(record.geometry_count, 3);
    assert_eq!(record.primitive_count, 6);
}

#[test]
fn test_unnamed_mesh_is_labelled_with_its_index() {
    init_logger();
    let (_driver, device) = software_device();
    let mut mesh = Mesh::new(
        None,
        quad_positions(&device),
        vec![quad_piece(&device, None)],
        translations(1),
    );
    Accelerator::new(&device)
        .build_geometry(&mut mesh, 3)
        .unwrap();
    assert_eq!(
        mesh.acceleration_structure().unwrap().name(),
        Some("Primitive?Mesh=3")
    );
}

#[test]
fn test_scene_instances_follow_mesh_order() {
    init_logger();
    let (driver, device) = software_device();
    let accelerator = Accelerator::new(&device);
    let mut meshes = vec![
        quad_mesh(&device, "A", 1, translations(2)),
        quad_mesh(&device, "B", 2, Vec::new()),
        quad_mesh(&device, "C", 1, translations(3)),
    ];
    let build = accelerator.rebuild(&mut meshes).unwrap();
    assert!(build.dropped.is_empty());
    assert_eq!(build.mesh_indices, vec![0, 1, 2]);

    let acceleration = &build.acceleration;
    let total: usize = meshes.iter().map(|m| m.instances().len()).sum();
    assert_eq!(acceleration.instances().len(), total);
    assert_eq!(acceleration.structure().instance_count() as usize, total);
    assert_eq!(
        acceleration.instances(),
        &[0, 0, 2, 2, 2].map(PrimitiveInstance::new)[..]
    );
    assert!(acceleration
        .instances()
        .windows(2)
        .all(|pair| pair[0].mesh_id <= pair[1].mesh_id));

    for (descriptor, instance) in acceleration
        .structure()
        .instances()
        .iter()
        .zip(acceleration.instances())
    {
        assert_eq!(descriptor.acceleration_structure_index, instance.mesh_id);
    }

    let record = driver
        .build_record(acceleration.structure().acceleration_structure().raw_id())
        .unwrap();
    assert_eq!(record.level, AccelerationStructureLevel::Top);
    assert_eq!(record.instances.len(), total);
    assert_eq!(record.structures.len(), meshes.len());
    assert!(meshes.iter().all(|mesh| !mesh.needs_build()));
}

#[test]
fn test_missing_bottom_level_structure_allocates_nothing() {
    init_logger();
    let (driver, device) = software_device();
    let accelerator = Accelerator::new(&device);
    let meshes: Vec<Mesh> = vec![quad_mesh(&device, "Unbuilt", 1, translations(1))];
    let before = driver.allocation_count();

    let err = accelerator.build_scene(&meshes).unwrap_err();
    assert_eq!(err, AccelerationError::MissingBottomLevelStructure(0));
    assert_eq!(driver.allocation_count(), before);
}

#[test]
fn test_rebuild_drops_mesh_whose_structure_cannot_be_allocated() {
    init_logger();
    let (driver, device) = software_device();
    let accelerator = Accelerator::new(&device);
    let mut meshes = vec![
        quad_mesh(&device, "Kept", 1, translations(1)),
        quad_mesh(&device, "Broken", 1, translations(2)),
        quad_mesh(&device, "Also kept", 1, translations(1)),
    ];
    driver.fail_allocations_containing("Broken");

    let build = accelerator.rebuild(&mut meshes).unwrap();
    assert_eq!(build.mesh_indices, vec![0, 2]);
    assert_eq!(build.dropped.len(), 1);
    assert_eq!(build.dropped[0].0, 1);
    assert!(matches!(
        build.dropped[0].1,
        AccelerationError::AccelerationAllocationFailed { .. }
    ));
    assert!(meshes[1].needs_build());
    assert_eq!(build.acceleration.meshes().len(), 2);
    assert_eq!(
        build.acceleration.instances(),
        &[PrimitiveInstance::new(0), PrimitiveInstance::new(1)][..]
    );
}

#[test]
fn test_rebuild_keeps_existing_bottom_level_structures() {
    init_logger();
    let (_driver, device) = software_device();
    let accelerator = Accelerator::new(&device);
    let mut meshes = vec![quad_mesh(&device, "Static", 2, translations(1))];
    accelerator.rebuild(&mut meshes).unwrap();
    let first = meshes[0].acceleration_structure().unwrap().clone();

    meshes[0].instances_mut().extend(translations(2));
    let build = accelerator.rebuild(&mut meshes).unwrap();
    assert!(meshes[0].acceleration_structure().unwrap().ptr_eq(&first));
    assert_eq!(build.acceleration.instances().len(), 3);
}

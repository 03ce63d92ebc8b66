mod common;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use raytrace::{
    Accelerator, AccelerationView, ArgsView, Device, Frame, FrameArgs, Material, Mesh, MeshView,
    Packager, PieceView, Residency, ResourcePool, Texture,
};

use common::*;

/// Meshes with random piece counts, instance counts and materials drawing from a shared set of
/// textures of random sizes.
fn random_scene(device: &Device, rng: &mut StdRng) -> Vec<Mesh> {
    let textures = (0..rng.random_range(1..6))
        .map(|i| uploaded_texture(device, &format!("Texture {}", i), rng.random_range(1..17)))
        .collect::<Vec<_>>();
    let pick = |rng: &mut StdRng| -> Option<Texture> {
        if rng.random_bool(0.3) {
            None
        } else {
            Some(textures[rng.random_range(0..textures.len())].clone())
        }
    };

    (0..rng.random_range(1..5))
        .map(|m| {
            let pieces = (0..rng.random_range(0..4))
                .map(|_| {
                    let material = if rng.random_bool(0.2) {
                        None
                    } else {
                        Some(Material::new(pick(rng), pick(rng)))
                    };
                    quad_piece(device, material)
                })
                .collect();
            let instances = translations(rng.random_range(0..4));
            Mesh::new(
                Some(&format!("Random {}", m)),
                quad_positions(device),
                pieces,
                instances,
            )
        })
        .collect()
}

#[test]
fn test_heap_usage_never_exceeds_measurement() {
    init_logger();
    for seed in 0..16 {
        let mut rng = StdRng::seed_from_u64(seed);
        let (_driver, device) = software_device();
        let mut meshes = random_scene(&device, &mut rng);
        let acceleration = Accelerator::new(&device)
            .rebuild(&mut meshes)
            .unwrap()
            .acceleration;
        let (background, env) = environment(&device);
        let target = device
            .create_texture(
                Some("Target"),
                &raytrace::TextureDescriptor::new_2d(
                    raytrace::PixelFormat::Rgba16Float,
                    8,
                    8,
                    raytrace::TextureUsage::Storage,
                ),
                raytrace::MemoryLocation::GpuOnly,
            )
            .unwrap();
        let seeds = uploaded_texture(&device, "Seeds", 8);
        let args = FrameArgs {
            target: &target,
            frame: Frame::new(seed as u32),
            seeds: &seeds,
            background: &background,
            env: &env,
            acceleration: &acceleration,
        };

        let packager = Packager::new(&device, Residency::Heap);
        let mut pool = ResourcePool::new();
        let mut cmd_buf = device.create_command_buffer(Some("Package"));
        let handle = cmd_buf
            .encode(|recorder| packager.package_frame(recorder, &mut pool, &args))
            .unwrap();
        device.queue().submit_blocking(&[cmd_buf]).unwrap();

        let heap = handle.heap().unwrap();
        let measured = handle.measured().unwrap();
        assert!(
            heap.used() <= measured,
            "seed {}: used {} of {} measured bytes",
            seed,
            heap.used(),
            measured
        );
        assert_eq!(heap.capacity(), measured);

        let root: ArgsView = read_view(&device, handle.address());
        let view: AccelerationView = read_view(&device, root.acceleration);
        assert_eq!(view.structure, acceleration.structure().acceleration_structure().device_address());
        let mesh_views: Vec<MeshView> = read_array(&device, view.meshes, meshes.len());
        for (mesh, mesh_view) in meshes.iter().zip(&mesh_views) {
            if mesh.pieces().is_empty() {
                assert_eq!(mesh_view.pieces, 0);
                continue;
            }
            let pieces: Vec<PieceView> =
                read_array(&device, mesh_view.pieces, mesh.pieces().len());
            assert!(pieces.iter().all(|piece| piece.material != 0));
            assert!(pieces.iter().all(|piece| piece.primitive_data != 0));
        }
    }
}

#[test]
fn test_measure_matches_heap_package() {
    init_logger();
    let mut rng = StdRng::seed_from_u64(7);
    let (_driver, device) = software_device();
    let mut meshes = random_scene(&device, &mut rng);
    let acceleration = Accelerator::new(&device)
        .rebuild(&mut meshes)
        .unwrap()
        .acceleration;
    let (background, env) = environment(&device);
    let target = uploaded_texture(&device, "Target", 4);
    let seeds = uploaded_texture(&device, "Seeds", 4);
    let args = FrameArgs {
        target: &target,
        frame: Frame::default(),
        seeds: &seeds,
        background: &background,
        env: &env,
        acceleration: &acceleration,
    };

    let packager = Packager::new(&device, Residency::Heap);
    let mut pool = ResourcePool::new();
    let measured = packager.measure(&mut pool, &args).unwrap();
    assert!(measured > 0);
    // measuring leaves the pool alone
    assert!(pool.is_empty());

    let mut cmd_buf = device.create_command_buffer(Some("Package"));
    let handle = cmd_buf
        .encode(|recorder| packager.package_frame(recorder, &mut pool, &args))
        .unwrap();
    assert_eq!(handle.measured(), Some(measured));
    assert_eq!(handle.heap().unwrap().used(), measured);
}

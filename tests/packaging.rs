mod common;

use std::sync::Arc;

use maplit::hashmap;
use raytrace::{
    Acceleration, Accelerator, AccelerationView, ArgsHandle, ArgsView, Background, Device, Env,
    EnvView, Frame, FrameArgs, FrameView, Material, MaterialView, Mesh, MeshView, MemoryLocation,
    PackagingError, Packager, PieceView, PixelFormat, RawResource, Residency, ResourcePool,
    ResourceUsage, SoftwareDriver, Texture, TextureDescriptor, TextureUsage,
};

use common::*;

struct Fixture {
    driver: Arc<SoftwareDriver>,
    device: Device,
    meshes: Vec<Mesh>,
    acceleration: Acceleration,
    background: Background,
    env: Env,
    target: Texture,
    seeds: Texture,
}

impl Fixture {
    fn new(build_meshes: impl FnOnce(&Device) -> Vec<Mesh>) -> Self {
        init_logger();
        let (driver, device) = software_device();
        let mut meshes = build_meshes(&device);
        let acceleration = Accelerator::new(&device)
            .rebuild(&mut meshes)
            .unwrap()
            .acceleration;
        let (background, env) = environment(&device);
        let target = device
            .create_texture(
                Some("Target"),
                &TextureDescriptor::new_2d(PixelFormat::Rgba16Float, 16, 16, TextureUsage::Storage),
                MemoryLocation::GpuOnly,
            )
            .unwrap();
        let seeds = device
            .create_texture(
                Some("Seeds"),
                &TextureDescriptor::new_2d(PixelFormat::R32Uint, 16, 16, TextureUsage::Storage),
                MemoryLocation::GpuOnly,
            )
            .unwrap();
        Self {
            driver,
            device,
            meshes,
            acceleration,
            background,
            env,
            target,
            seeds,
        }
    }

    fn args(&self, frame: u32) -> FrameArgs<'_> {
        FrameArgs {
            target: &self.target,
            frame: Frame::new(frame),
            seeds: &self.seeds,
            background: &self.background,
            env: &self.env,
            acceleration: &self.acceleration,
        }
    }

    /// Packages and submits one frame, waiting for the copies.
    fn package(
        &self,
        packager: &Packager,
        pool: &mut ResourcePool,
        args: &FrameArgs,
    ) -> Result<ArgsHandle, PackagingError> {
        let mut cmd_buf = self.device.create_command_buffer(Some("Package"));
        let handle = cmd_buf.encode(|recorder| packager.package_frame(recorder, pool, args))?;
        self.device.queue().submit_blocking(&[cmd_buf])?;
        Ok(handle)
    }

    fn piece_views(&self, handle: &ArgsHandle, mesh: usize) -> Vec<PieceView> {
        let root: ArgsView = read_view(&self.device, handle.address());
        let acceleration: AccelerationView = read_view(&self.device, root.acceleration);
        let meshes: Vec<MeshView> =
            read_array(&self.device, acceleration.meshes, self.meshes.len());
        read_array(
            &self.device,
            meshes[mesh].pieces,
            self.meshes[mesh].pieces().len(),
        )
    }
}

fn one_quad(device: &Device) -> Vec<Mesh> {
    vec![quad_mesh(device, "Quad", 1, translations(2))]
}

#[test]
fn test_absent_material_resolves_to_null_handles() {
    let fixture = Fixture::new(one_quad);
    let packager = Packager::new(&fixture.device, Residency::Staging);
    let mut pool = ResourcePool::new();
    let handle = fixture
        .package(&packager, &mut pool, &fixture.args(0))
        .unwrap();

    let pieces = fixture.piece_views(&handle, 0);
    assert_eq!(pieces.len(), 1);
    let material: MaterialView = read_view(&fixture.device, pieces[0].material);
    assert_eq!(material, MaterialView::default());
    assert!(material.albedo.is_null() && material.metal_roughness.is_null());
    assert_eq!(
        pieces[0].primitive_data,
        fixture.meshes[0].pieces()[0].data().buffer.device_address()
    );
}

#[test]
fn test_partial_material() {
    let fixture = Fixture::new(|device| {
        let albedo = uploaded_texture(device, "Albedo", 4);
        let piece = quad_piece(device, Some(Material::new(Some(albedo), None)));
        vec![Mesh::new(
            Some("Painted"),
            quad_positions(device),
            vec![piece],
            translations(1),
        )]
    });
    let packager = Packager::new(&fixture.device, Residency::Staging);
    let mut pool = ResourcePool::new();
    let handle = fixture
        .package(&packager, &mut pool, &fixture.args(0))
        .unwrap();

    let pieces = fixture.piece_views(&handle, 0);
    let material: MaterialView = read_view(&fixture.device, pieces[0].material);
    let albedo = fixture.meshes[0].pieces()[0]
        .material
        .as_ref()
        .and_then(|m| m.albedo.as_ref())
        .unwrap();
    assert_eq!(material.albedo, albedo.resource_id());
    assert!(material.metal_roughness.is_null());
}

#[test]
fn test_staged_records_carry_their_labels() {
    let fixture = Fixture::new(one_quad);
    let packager = Packager::new(&fixture.device, Residency::Staging);
    let mut pool = ResourcePool::new();
    let handle = fixture
        .package(&packager, &mut pool, &fixture.args(0))
        .unwrap();

    let labels = handle
        .buffers()
        .iter()
        .filter_map(|buffer| buffer.name())
        .collect::<Vec<_>>();
    for expected in [
        "Args/Material?Mesh=0&Piece=0",
        "Args/Pieces?Mesh=0&Count=1",
        "Args/Meshes?Count=1",
        "Args/Instances?Count=2",
        "Args/Acceleration",
        "Args",
    ] {
        assert!(labels.contains(&expected), "{} missing from {:?}", expected, labels);
    }
    for pooled in ["Args/Frame", "Args/Env", "Args/Background"] {
        assert!(pool.contains(pooled), "{} is not pooled", pooled);
    }
}

fn textured_quad(device: &Device) -> Vec<Mesh> {
    let albedo = uploaded_texture(device, "Albedo", 4);
    let pieces = (0..2)
        .map(|i| {
            let metal_roughness = uploaded_texture(device, &format!("Metal roughness {}", i), 4);
            quad_piece(device, Some(Material::new(Some(albedo.clone()), Some(metal_roughness))))
        })
        .collect();
    vec![Mesh::new(
        Some("Textured"),
        quad_positions(device),
        pieces,
        translations(2),
    )]
}

fn assert_every_leaf_marked(residency: Residency) {
    let fixture = Fixture::new(textured_quad);
    let packager = Packager::new(&fixture.device, residency);
    let mut pool = ResourcePool::new();
    fixture.driver.clear_logs();
    let handle = fixture
        .package(&packager, &mut pool, &fixture.args(0))
        .unwrap();
    let usage = fixture.driver.resource_usage();
    let marked = |resource: RawResource, expected: ResourceUsage| {
        assert!(
            usage.contains(&(resource, expected)),
            "{:?} not marked {:?} with {:?} residency",
            resource,
            expected,
            residency
        );
    };

    let textures = hashmap! {
        RawResource::Texture(fixture.target.raw_id()) => ResourceUsage::Write,
        RawResource::Texture(fixture.seeds.raw_id()) => ResourceUsage::ReadWrite,
        RawResource::Texture(fixture.background.source.raw_id()) => ResourceUsage::Read,
        RawResource::Texture(fixture.env.diffuse.raw_id()) => ResourceUsage::Read,
        RawResource::Texture(fixture.env.specular.raw_id()) => ResourceUsage::Read,
        RawResource::Texture(fixture.env.lut.raw_id()) => ResourceUsage::Read,
    };
    for (resource, expected) in textures {
        marked(resource, expected);
    }
    let top = fixture.acceleration.structure();
    marked(
        RawResource::AccelerationStructure(top.acceleration_structure().raw_id()),
        ResourceUsage::Read,
    );
    for bottom in top.bottom_level_structures() {
        marked(
            RawResource::AccelerationStructure(bottom.acceleration_structure().raw_id()),
            ResourceUsage::Read,
        );
    }
    for label in ["Args/Frame", "Args/Env", "Args/Background"] {
        let buffer = pool.get(label).unwrap().as_ref().unwrap();
        marked(RawResource::Buffer(buffer.raw_id()), ResourceUsage::Read);
    }
    for buffer in handle.buffers() {
        marked(RawResource::Buffer(buffer.raw_id()), ResourceUsage::Read);
    }
    for texture in handle.textures() {
        marked(RawResource::Texture(texture.raw_id()), ResourceUsage::Read);
    }

    let pieces = fixture.meshes[0].pieces();
    match residency {
        Residency::Staging => {
            for piece in pieces {
                let material = piece.material.as_ref().unwrap();
                for texture in [&material.albedo, &material.metal_roughness] {
                    let texture = texture.as_ref().unwrap();
                    marked(RawResource::Texture(texture.raw_id()), ResourceUsage::Read);
                }
                marked(
                    RawResource::Buffer(piece.data().buffer.raw_id()),
                    ResourceUsage::Read,
                );
            }
        }
        Residency::Heap => {
            marked(
                RawResource::Heap(handle.heap().unwrap().raw_id()),
                ResourceUsage::Read,
            );
            // one copy of the shared albedo plus one metal-roughness texture per piece
            assert_eq!(handle.textures().len(), 3);
            for (piece, view) in pieces.iter().zip(fixture.piece_views(&handle, 0)) {
                assert_ne!(view.primitive_data, piece.data().buffer.device_address());
                let material: MaterialView = read_view(&fixture.device, view.material);
                for id in [material.albedo, material.metal_roughness] {
                    assert!(handle.textures().iter().any(|t| t.resource_id() == id));
                }
            }
        }
    }
}

#[test]
fn test_every_leaf_is_marked_resident() {
    assert_every_leaf_marked(Residency::Staging);
}

#[test]
fn test_every_leaf_is_marked_resident_on_heap() {
    assert_every_leaf_marked(Residency::Heap);
}

#[test]
fn test_shared_texture_is_marked_once() {
    let fixture = Fixture::new(textured_quad);
    let packager = Packager::new(&fixture.device, Residency::Staging);
    let mut pool = ResourcePool::new();
    fixture.driver.clear_logs();
    fixture
        .package(&packager, &mut pool, &fixture.args(0))
        .unwrap();
    let albedo = fixture.meshes[0].pieces()[0]
        .material
        .as_ref()
        .and_then(|m| m.albedo.as_ref())
        .unwrap();
    let marks = fixture
        .driver
        .resource_usage()
        .into_iter()
        .filter(|(resource, _)| *resource == RawResource::Texture(albedo.raw_id()))
        .count();
    assert_eq!(marks, 1);
}

#[test]
fn test_unavailable_texture_fails_without_placeholder() {
    let mut fixture = Fixture::new(one_quad);
    fixture.env.specular = pending_texture(&fixture.device, "Specular");
    let packager = Packager::new(&fixture.device, Residency::Staging);
    let mut pool = ResourcePool::new();

    let err = fixture
        .package(&packager, &mut pool, &fixture.args(0))
        .unwrap_err();
    assert_eq!(
        err,
        PackagingError::ResourceUnavailable {
            label: "Args/Env/Specular".to_owned()
        }
    );
    assert!(!pool.contains("Args/Env"));
}

#[test]
fn test_placeholder_replaces_unavailable_texture() {
    let mut fixture = Fixture::new(one_quad);
    fixture.env.specular = pending_texture(&fixture.device, "Specular");
    let placeholder = Texture::fill(&fixture.device, [1.0, 0.0, 1.0, 1.0]).unwrap();
    let mut packager = Packager::new(&fixture.device, Residency::Staging);
    packager.set_placeholder(Some(placeholder.clone()));
    let mut pool = ResourcePool::new();

    let handle = fixture
        .package(&packager, &mut pool, &fixture.args(0))
        .unwrap();
    assert_eq!(handle.substituted(), 1);
    let root: ArgsView = read_view(&fixture.device, handle.address());
    let env: EnvView = read_view(&fixture.device, root.env);
    assert_eq!(env.specular, placeholder.resource_id());
    assert_eq!(env.diffuse, fixture.env.diffuse.resource_id());
    // a record holding the placeholder must not outlive the frame
    assert!(!pool.contains("Args/Env"));
    assert!(pool.contains("Args/Background"));

    fixture.env.specular.replace(vec![0u8; 64]).unwrap();
    let handle = fixture
        .package(&packager, &mut pool, &fixture.args(1))
        .unwrap();
    assert_eq!(handle.substituted(), 0);
    let root: ArgsView = read_view(&fixture.device, handle.address());
    let env: EnvView = read_view(&fixture.device, root.env);
    assert_eq!(env.specular, fixture.env.specular.resource_id());
    assert!(pool.contains("Args/Env"));
}

#[test]
fn test_pooled_records_are_shared_across_frames() {
    let fixture = Fixture::new(one_quad);
    let packager = Packager::new(&fixture.device, Residency::Staging);
    let mut pool = ResourcePool::new();

    let first = fixture
        .package(&packager, &mut pool, &fixture.args(3))
        .unwrap();
    let first_root: ArgsView = read_view(&fixture.device, first.address());
    let frame: FrameView = read_view(&fixture.device, first_root.frame);
    assert_eq!(frame.id, 3);

    let second = fixture
        .package(&packager, &mut pool, &fixture.args(4))
        .unwrap();
    let second_root: ArgsView = read_view(&fixture.device, second.address());
    assert_eq!(first_root.frame, second_root.frame);
    assert_eq!(first_root.env, second_root.env);
    assert_eq!(first_root.background, second_root.background);
    assert_ne!(first.address(), second.address());
    let frame: FrameView = read_view(&fixture.device, second_root.frame);
    assert_eq!(frame.id, 4);
}

#[test]
fn test_heap_residency_copies_per_frame_resources() {
    let fixture = Fixture::new(|device| {
        let albedo = uploaded_texture(device, "Shared albedo", 8);
        let material = Material::new(Some(albedo.clone()), Some(albedo));
        let pieces = vec![
            quad_piece(device, Some(material.clone())),
            quad_piece(device, Some(material)),
        ];
        vec![Mesh::new(
            Some("Shared"),
            quad_positions(device),
            pieces,
            translations(1),
        )]
    });
    let packager = Packager::new(&fixture.device, Residency::Heap);
    let mut pool = ResourcePool::new();
    let handle = fixture
        .package(&packager, &mut pool, &fixture.args(0))
        .unwrap();
    assert_eq!(handle.residency(), Residency::Heap);

    // one texture shared by both pieces and both slots is copied once
    assert_eq!(handle.textures().len(), 1);
    let copy = &handle.textures()[0];
    let pieces = fixture.piece_views(&handle, 0);
    for piece in &pieces {
        let material: MaterialView = read_view(&fixture.device, piece.material);
        assert_eq!(material.albedo, copy.resource_id());
        assert_eq!(material.metal_roughness, copy.resource_id());
    }
    let source = fixture.meshes[0].pieces()[0]
        .material
        .as_ref()
        .and_then(|m| m.albedo.as_ref())
        .unwrap();
    assert_ne!(copy.resource_id(), source.resource_id());
    assert_eq!(
        fixture.driver.texture_data(copy.raw_id()),
        fixture.driver.texture_data(source.raw_id())
    );

    for (piece, view) in fixture.meshes[0].pieces().iter().zip(&pieces) {
        let original = &piece.data().buffer;
        assert_ne!(view.primitive_data, original.device_address());
        assert_eq!(
            fixture
                .device
                .read_memory(view.primitive_data, original.size())
                .unwrap(),
            original.read().unwrap()
        );
    }

    // targets are never copied
    let root: ArgsView = read_view(&fixture.device, handle.address());
    assert_eq!(root.target, fixture.target.resource_id());
    assert_eq!(root.seeds, fixture.seeds.resource_id());
}

#[test]
fn test_heap_allocation_failure() {
    let fixture = Fixture::new(one_quad);
    fixture.driver.fail_allocations_containing("Args heap");
    let packager = Packager::new(&fixture.device, Residency::Heap);
    let mut pool = ResourcePool::new();
    let err = fixture
        .package(&packager, &mut pool, &fixture.args(0))
        .unwrap_err();
    assert!(matches!(err, PackagingError::HeapAllocationFailed { size, .. } if size > 0));
}

#[test]
fn test_label_prefix() {
    let fixture = Fixture::new(one_quad);
    let packager = Packager::new(&fixture.device, Residency::Staging).with_label_prefix("Preview");
    let mut pool = ResourcePool::new();
    let handle = fixture
        .package(&packager, &mut pool, &fixture.args(0))
        .unwrap();
    assert!(pool.contains("Preview/Frame"));
    assert!(handle
        .buffers()
        .iter()
        .any(|buffer| buffer.name() == Some("Preview")));
}

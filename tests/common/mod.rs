#![allow(dead_code)]

use std::sync::Arc;

use raytrace::{
    Background, Device, Env, Indices, Instance, Material, Mesh, Piece, PixelFormat, Positions,
    PrimitiveData, SoftwareDriver, Texture, TextureDescriptor, Triangle, TextureUsage,
};

pub fn init_logger() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .is_test(true)
        .try_init()
        .ok();
}

/// A device on a software driver the test keeps a handle to.
pub fn software_device() -> (Arc<SoftwareDriver>, Device) {
    let driver = Arc::new(SoftwareDriver::new());
    let device = Device::new(driver.clone());
    (driver, device)
}

pub fn uploaded_texture(device: &Device, name: &str, size: u32) -> Texture {
    let descriptor = TextureDescriptor::new_2d(PixelFormat::Rgba8Unorm, size, size, TextureUsage::Sampled);
    let data = vec![0x7f; descriptor.byte_size() as usize];
    device
        .create_texture_init(Some(name), &descriptor, data)
        .unwrap()
}

/// A sampled texture whose contents were never uploaded.
pub fn pending_texture(device: &Device, name: &str) -> Texture {
    let descriptor = TextureDescriptor::new_2d(PixelFormat::Rgba8Unorm, 4, 4, TextureUsage::Sampled);
    device
        .create_texture(Some(name), &descriptor, raytrace::MemoryLocation::GpuOnly)
        .unwrap()
}

pub fn environment(device: &Device) -> (Background, Env) {
    let background = Background {
        source: uploaded_texture(device, "Sky", 8),
    };
    let env = Env {
        diffuse: uploaded_texture(device, "Diffuse", 4),
        specular: uploaded_texture(device, "Specular", 4),
        lut: uploaded_texture(device, "Lut", 2),
    };
    (background, env)
}

/// A unit quad of two triangles.
pub fn quad_piece(device: &Device, material: Option<Material>) -> Piece {
    let indices = Indices::new_u16(device, Some("Quad indices"), &[0, 1, 2, 2, 1, 3]).unwrap();
    let triangle = Triangle::new([[0.0, 0.0, 1.0]; 3], [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]);
    let data = PrimitiveData::new(device, Some("Quad triangles"), &[triangle; 2]).unwrap();
    Piece::new(indices, data, material).unwrap()
}

pub fn quad_positions(device: &Device) -> Positions {
    Positions::new(
        device,
        Some("Quad positions"),
        &[
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [1.0, 1.0, 0.0],
        ],
    )
    .unwrap()
}

/// A mesh of `pieces` quads sharing one position buffer, none of them with a material.
pub fn quad_mesh(device: &Device, name: &str, pieces: usize, instances: Vec<Instance>) -> Mesh {
    let pieces = (0..pieces).map(|_| quad_piece(device, None)).collect();
    Mesh::new(Some(name), quad_positions(device), pieces, instances)
}

pub fn translations(count: usize) -> Vec<Instance> {
    (0..count)
        .map(|i| Instance::from_translation(glam::Vec3::new(i as f32 * 2.0, 0.0, 0.0)))
        .collect()
}

pub fn read_view<T: bytemuck::Pod>(device: &Device, address: u64) -> T {
    assert_ne!(address, 0, "null record address");
    let bytes = device
        .read_memory(address, std::mem::size_of::<T>() as u64)
        .unwrap();
    bytemuck::pod_read_unaligned(&bytes)
}

pub fn read_array<T: bytemuck::Pod>(device: &Device, address: u64, count: usize) -> Vec<T> {
    let bytes = device
        .read_memory(address, (std::mem::size_of::<T>() * count) as u64)
        .unwrap();
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

use crate::Texture;

/// Surface textures of a piece. Either may be missing; kernels then see a null handle.
#[derive(Debug, Clone, Default)]
pub struct Material {
    pub albedo: Option<Texture>,
    pub metal_roughness: Option<Texture>,
}

impl Material {
    pub fn new(albedo: Option<Texture>, metal_roughness: Option<Texture>) -> Self {
        Self {
            albedo,
            metal_roughness,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.albedo.is_none() && self.metal_roughness.is_none()
    }
}

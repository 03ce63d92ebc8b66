use crate::Texture;

/// Image-based lighting inputs.
#[derive(Debug, Clone)]
pub struct Env {
    pub diffuse: Texture,
    pub specular: Texture,
    pub lut: Texture,
}

/// What rays that leave the scene see.
#[derive(Debug, Clone)]
pub struct Background {
    pub source: Texture,
}

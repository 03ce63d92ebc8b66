mod environment;
mod frame;
mod material;
mod mesh;

pub use environment::{Background, Env};
pub use frame::Frame;
pub use material::Material;
pub(crate) use mesh::check_triangles;
pub use mesh::{
    Indices, Instance, Mesh, Piece, Positions, PrimitiveData, PrimitiveType, Triangle, Vertex,
};

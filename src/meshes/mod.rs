//! Meshes and the vertex data they draw

pub mod mesh;
pub mod vertex_data;

pub use mesh::{BoundingInfo, Mesh, MeshDrawEvent};
pub use vertex_data::VertexData;

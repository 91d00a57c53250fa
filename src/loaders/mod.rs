//! File loaders that populate a scene

pub mod obj;

pub use obj::{import_mesh, ImportedMeshes};

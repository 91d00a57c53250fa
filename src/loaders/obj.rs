//! Wavefront OBJ import
//!
//! Every model of the file becomes a mesh node parented to one transform
//! node named after the file. MTL materials are turned into PBR materials;
//! a missing MTL file is not an error.

use std::collections::HashMap;
use std::path::Path;

use log::{info, warn};

use crate::engine::constants::SamplingMode;
use crate::engine::Engine;
use crate::error::Result;
use crate::materials::{Material, MaterialId, PbrMaterial};
use crate::maths::Color3;
use crate::meshes::{Mesh, VertexData};
use crate::scene::{NodeId, Scene};
use crate::textures::Texture;

/// Nodes and materials created by [`import_mesh`]
#[derive(Debug, Clone, Default)]
pub struct ImportedMeshes {
    pub root: Option<NodeId>,
    pub meshes: Vec<NodeId>,
    pub materials: Vec<MaterialId>,
}

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    }
}

/// Flattened `[x, y, z, x, y, z, ...]` into triples
fn triples(values: &[f32]) -> Vec<[f32; 3]> {
    values
        .chunks_exact(3)
        .map(|chunk| [chunk[0], chunk[1], chunk[2]])
        .collect()
}

fn vertex_data(mesh: &tobj::Mesh) -> VertexData {
    let positions = triples(&mesh.positions);
    let count = positions.len();
    let mut data = VertexData::new();
    data.positions = positions;
    if mesh.normals.len() == mesh.positions.len() {
        data.normals = triples(&mesh.normals);
    }
    if mesh.texcoords.len() == count * 2 {
        // OBJ texture space starts at the bottom
        data.uvs = mesh
            .texcoords
            .chunks_exact(2)
            .map(|uv| [uv[0], 1.0 - uv[1]])
            .collect();
    }
    if mesh.vertex_color.len() == mesh.positions.len() {
        data.colors = Some(
            triples(&mesh.vertex_color)
                .into_iter()
                .map(|[r, g, b]| [r, g, b, 1.0])
                .collect(),
        );
    }
    data.indices = mesh.indices.clone();
    if !data.has_normals() {
        data.normals = VertexData::compute_normals(&data.positions, &data.indices);
    }
    data
}

/// Shininess in `[0, 128]` mapped to a roughness
fn roughness_from_shininess(shininess: Option<f32>) -> f32 {
    1.0 - (shininess.unwrap_or(32.0) / 128.0).clamp(0.0, 1.0)
}

fn pbr_material(
    scene: &mut Scene,
    engine: &mut Engine,
    base_dir: &Path,
    index: usize,
    mtl: &tobj::Material,
) -> PbrMaterial {
    let name = if mtl.name.is_empty() {
        format!("material_{index}")
    } else {
        mtl.name.clone()
    };
    let mut material = PbrMaterial::new(&name);
    if let Some([r, g, b]) = mtl.diffuse {
        material.albedo_color = Color3::new(r, g, b);
    }
    if let Some([r, g, b]) = mtl.ambient {
        material.ambient_color = Color3::new(r, g, b);
    }
    if let Some([r, g, b]) = mtl.emissive {
        material.emissive_color = Color3::new(r, g, b);
    }
    material.base_mut().alpha = mtl.dissolve.unwrap_or(1.0);
    material.set_metallic(Some(0.0));
    material.set_roughness(Some(roughness_from_shininess(mtl.shininess)));

    if let Some(file) = mtl.diffuse_texture.as_deref().filter(|file| !file.is_empty()) {
        let url = base_dir.join(file);
        let url = url.to_string_lossy();
        match Texture::new(engine, &url, false, true, SamplingMode::Trilinear) {
            Ok(texture) => {
                let id = scene.add_texture(Box::new(texture));
                material.set_albedo_texture(Some(id));
            }
            Err(err) => warn!("Material '{}': diffuse texture skipped: {}", name, err),
        }
    }
    material
}

/// Loads the OBJ file at `path` into `scene`
pub fn import_mesh(
    scene: &mut Scene,
    engine: &mut Engine,
    path: impl AsRef<Path>,
) -> Result<ImportedMeshes> {
    let path = path.as_ref();
    let (models, materials) = tobj::load_obj(path, &load_options())?;
    let materials = materials.unwrap_or_else(|err| {
        warn!("No MTL data for '{}' ({}), using the default material", path.display(), err);
        Vec::new()
    });

    let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
    let mut imported = ImportedMeshes::default();
    let mut by_index: HashMap<usize, MaterialId> = HashMap::new();
    for (index, mtl) in materials.iter().enumerate() {
        let material = pbr_material(scene, engine, base_dir, index, mtl);
        let id = scene.add_material(Box::new(material));
        by_index.insert(index, id);
        imported.materials.push(id);
    }

    let root_name = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "obj".to_string());
    let root = scene.add_transform_node(&root_name);
    imported.root = Some(root);

    for (index, model) in models.iter().enumerate() {
        let name = if model.name.is_empty() {
            format!("{root_name}_{index}")
        } else {
            model.name.clone()
        };
        let mut mesh = Mesh::new(vertex_data(&model.mesh));
        mesh.material = model
            .mesh
            .material_id
            .and_then(|material| by_index.get(&material).copied());
        let id = scene.add_mesh(&name, mesh);
        scene.set_parent(id, Some(root));
        imported.meshes.push(id);
    }

    info!(
        "Imported '{}': {} meshes, {} materials",
        path.display(),
        imported.meshes.len(),
        imported.materials.len()
    );
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineOptions, HeadlessBackend};
    use std::fs;

    const QUAD: &str = "\
mtllib quad.mtl
o quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vt 0 0
vt 1 0
vt 1 1
vt 0 1
usemtl red
f 1/1 2/2 3/3 4/4
o tri
v 0 0 1
v 1 0 1
v 0 1 1
f 5 6 7
";

    const MTL: &str = "\
newmtl red
Kd 1.0 0.0 0.0
Ke 0.5 0.5 0.5
Ns 64
d 0.5
";

    fn engine() -> Engine {
        Engine::new(Box::new(HeadlessBackend::new(16, 16)), EngineOptions::default())
    }

    fn write_files(dir: &str, with_mtl: bool) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(dir);
        fs::create_dir_all(&dir).unwrap();
        let obj = dir.join("quad.obj");
        fs::write(&obj, QUAD).unwrap();
        if with_mtl {
            fs::write(dir.join("quad.mtl"), MTL).unwrap();
        }
        obj
    }

    #[test]
    fn test_import_builds_hierarchy_and_materials() {
        let path = write_files("babylon_obj_import", true);
        let mut engine = engine();
        let mut scene = Scene::new();
        let imported = import_mesh(&mut scene, &mut engine, &path).unwrap();

        let root = imported.root.unwrap();
        assert_eq!(scene.node(root).unwrap().name, "quad");
        assert_eq!(imported.meshes.len(), 2);
        for mesh in &imported.meshes {
            assert_eq!(scene.node(*mesh).unwrap().parent(), Some(root));
        }

        let quad = scene.mesh(imported.meshes[0]).unwrap();
        assert_eq!(quad.vertex_data().triangle_count(), 2);
        assert!(quad.vertex_data().has_uvs());
        assert_eq!(quad.material, Some(imported.materials[0]));

        let material = scene
            .material(imported.materials[0])
            .and_then(|m| m.as_any().downcast_ref::<PbrMaterial>())
            .unwrap();
        assert_eq!(material.albedo_color, Color3::new(1.0, 0.0, 0.0));
        assert_eq!(material.emissive_color, Color3::new(0.5, 0.5, 0.5));
        assert_eq!(material.base().alpha, 0.5);
        assert_eq!(material.roughness(), Some(0.5));
    }

    #[test]
    fn test_missing_mtl_is_tolerated() {
        let path = write_files("babylon_obj_no_mtl", false);
        let mut engine = engine();
        let mut scene = Scene::new();
        let imported = import_mesh(&mut scene, &mut engine, &path).unwrap();
        assert!(imported.materials.is_empty());
        assert_eq!(imported.meshes.len(), 2);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let mut engine = engine();
        let mut scene = Scene::new();
        let result = import_mesh(&mut scene, &mut engine, "/nonexistent/model.obj");
        assert!(result.is_err());
        assert_eq!(scene.node_count(), 0);
    }

    #[test]
    fn test_emissive_comes_from_ke() {
        let mut engine = engine();
        let mut scene = Scene::new();
        let mut mtl = tobj::Material {
            name: "glow".to_string(),
            emissive: Some([0.25, 0.5, 1.0]),
            ..Default::default()
        };
        let material = pbr_material(&mut scene, &mut engine, Path::new(""), 0, &mtl);
        assert_eq!(material.emissive_color, Color3::new(0.25, 0.5, 1.0));

        mtl.emissive = None;
        let material = pbr_material(&mut scene, &mut engine, Path::new(""), 0, &mtl);
        assert_eq!(material.emissive_color, PbrMaterial::new("glow").emissive_color);
    }

    #[test]
    fn test_shininess_to_roughness() {
        assert_eq!(roughness_from_shininess(Some(128.0)), 0.0);
        assert_eq!(roughness_from_shininess(Some(0.0)), 1.0);
        assert_eq!(roughness_from_shininess(None), 0.75);
    }
}

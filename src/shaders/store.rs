//! Named shader sources
//!
//! Holds vertex and fragment WGSL sources plus the include snippets the
//! preprocessor can pull in. Built-in shaders are embedded at compile time.

use std::collections::HashMap;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Registry of shader sources and includes
#[derive(Debug, Clone, Default)]
pub struct ShaderStore {
    vertex: HashMap<String, String>,
    fragment: HashMap<String, String>,
    includes: HashMap<String, String>,
}

const BUILTIN_VERTEX: &[(&str, &str)] = &[
    ("postprocess", include_str!("wgsl/postprocess.vertex.wgsl")),
    ("kernelBlur", include_str!("wgsl/kernelBlur.vertex.wgsl")),
    ("pbr", include_str!("wgsl/pbr.vertex.wgsl")),
    (
        "glowMapGeneration",
        include_str!("wgsl/glowMapGeneration.vertex.wgsl"),
    ),
];

const BUILTIN_FRAGMENT: &[(&str, &str)] = &[
    ("pass", include_str!("wgsl/pass.fragment.wgsl")),
    ("kernelBlur", include_str!("wgsl/kernelBlur.fragment.wgsl")),
    (
        "chromaticAberration",
        include_str!("wgsl/chromaticAberration.fragment.wgsl"),
    ),
    ("imageProcessing", include_str!("wgsl/imageProcessing.fragment.wgsl")),
    ("refraction", include_str!("wgsl/refraction.fragment.wgsl")),
    ("colorCorrection", include_str!("wgsl/colorCorrection.fragment.wgsl")),
    (
        "subSurfaceScattering",
        include_str!("wgsl/subSurfaceScattering.fragment.wgsl"),
    ),
    ("pbr", include_str!("wgsl/pbr.fragment.wgsl")),
    (
        "glowMapGeneration",
        include_str!("wgsl/glowMapGeneration.fragment.wgsl"),
    ),
    ("glowMapMerge", include_str!("wgsl/glowMapMerge.fragment.wgsl")),
];

const BUILTIN_INCLUDES: &[(&str, &str)] = &[
    ("helperFunctions", include_str!("wgsl/include/helperFunctions.wgsl")),
    (
        "prePassDeclaration",
        include_str!("wgsl/include/prePassDeclaration.wgsl"),
    ),
    (
        "prePassOutput",
        include_str!("wgsl/include/prePassOutput.wgsl"),
    ),
    (
        "imageProcessingFunctions",
        include_str!("wgsl/include/imageProcessingFunctions.wgsl"),
    ),
    (
        "kernelBlurVaryingDeclaration",
        include_str!("wgsl/include/kernelBlurVaryingDeclaration.wgsl"),
    ),
    (
        "kernelBlurVertex",
        include_str!("wgsl/include/kernelBlurVertex.wgsl"),
    ),
    (
        "kernelBlurFragment",
        include_str!("wgsl/include/kernelBlurFragment.wgsl"),
    ),
    (
        "kernelBlurFragment2",
        include_str!("wgsl/include/kernelBlurFragment2.wgsl"),
    ),
    (
        "lightFragmentDeclaration",
        include_str!("wgsl/include/lightFragmentDeclaration.wgsl"),
    ),
    ("lightFragment", include_str!("wgsl/include/lightFragment.wgsl")),
    ("clipPlaneFragment", include_str!("wgsl/include/clipPlaneFragment.wgsl")),
];

impl ShaderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-filled with the engine's built-in shaders
    pub fn with_builtin_shaders() -> Self {
        let mut store = Self::new();
        for (name, source) in BUILTIN_VERTEX {
            store.register(ShaderStage::Vertex, name, source);
        }
        for (name, source) in BUILTIN_FRAGMENT {
            store.register(ShaderStage::Fragment, name, source);
        }
        for (name, source) in BUILTIN_INCLUDES {
            store.register_include(name, source);
        }
        store
    }

    pub fn register(&mut self, stage: ShaderStage, name: &str, source: &str) {
        let map = match stage {
            ShaderStage::Vertex => &mut self.vertex,
            ShaderStage::Fragment => &mut self.fragment,
        };
        map.insert(name.to_string(), source.to_string());
    }

    pub fn register_include(&mut self, name: &str, source: &str) {
        self.includes.insert(name.to_string(), source.to_string());
    }

    pub fn get(&self, stage: ShaderStage, name: &str) -> Result<&str> {
        let map = match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        };
        map.get(name)
            .map(String::as_str)
            .ok_or_else(|| EngineError::ShaderNotFound(format!("{}.{:?}", name, stage)))
    }

    pub fn include(&self, name: &str) -> Option<String> {
        self.includes.get(name).cloned()
    }

    pub fn has(&self, stage: ShaderStage, name: &str) -> bool {
        self.get(stage, name).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let store = ShaderStore::with_builtin_shaders();
        assert!(store.has(ShaderStage::Vertex, "postprocess"));
        assert!(store.has(ShaderStage::Fragment, "imageProcessing"));
        assert!(store.include("prePassDeclaration").is_some());
        assert!(matches!(
            store.get(ShaderStage::Fragment, "unknown"),
            Err(EngineError::ShaderNotFound(_))
        ));
    }

    #[test]
    fn test_user_registration_overrides() {
        let mut store = ShaderStore::with_builtin_shaders();
        store.register(ShaderStage::Fragment, "pass", "custom");
        assert_eq!(store.get(ShaderStage::Fragment, "pass").unwrap(), "custom");
    }
}

//! Engine-wide error type
//!
//! Every fallible library operation returns [`Result`]. The application
//! runner converts these into `anyhow` errors at the window boundary.

use thiserror::Error;

/// Errors produced by the engine, its backends and its file loaders
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("render backend error: {0}")]
    Backend(String),

    #[error("no suitable graphics adapter was found")]
    AdapterUnavailable,

    #[error("failed to compile effect '{name}': {message}")]
    ShaderCompilation { name: String, message: String },

    #[error("shader preprocessing failed in '{source_name}': {message}")]
    ShaderPreprocess {
        source_name: String,
        message: String,
    },

    #[error("node material '{material}' cannot be built: {message}")]
    NodeMaterialBuild { material: String, message: String },

    #[error("unknown shader include '{0}'")]
    UnknownInclude(String),

    #[error("shader '{0}' is not registered in the shader store")]
    ShaderNotFound(String),

    #[error("failed to load texture '{url}': {reason}")]
    TextureLoad { url: String, reason: String },

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("invalid environment texture: {0}")]
    InvalidEnvironment(String),

    #[error("invalid color grading data: {0}")]
    InvalidColorGrading(String),

    #[error("unknown {kind} handle")]
    UnknownHandle { kind: &'static str },

    #[error("failed to parse {what}: {reason}")]
    Parse { what: &'static str, reason: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Obj(#[from] tobj::LoadError),
}

impl EngineError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    pub fn parse(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Parse {
            what,
            reason: reason.into(),
        }
    }
}

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

//! Scene textures and the engine-level textures behind them

pub mod base_texture;
pub mod color_grading_texture;
pub mod cube_texture;
pub mod internal_texture;
pub mod mirror_texture;
pub mod render_target_texture;
pub mod texture;

use slotmap::SlotMap;

pub use base_texture::{BaseTexture, SceneTexture};
pub use color_grading_texture::ColorGradingTexture;
pub use cube_texture::{CubeTexture, CubeTextureOptions};
pub use internal_texture::{InternalTexture, TextureKey};
pub use mirror_texture::MirrorTexture;
pub use render_target_texture::{RenderTargetTexture, RenderTargetView};
pub use texture::Texture;

slotmap::new_key_type! {
    /// Key of a texture inside the scene
    pub struct TextureId;
}

/// Arena of every texture of a scene
pub type TextureArena = SlotMap<TextureId, Box<dyn SceneTexture>>;

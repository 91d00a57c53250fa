//! Effect layers drawn on top of a camera's output

pub mod highlight_layer;

pub use highlight_layer::{HighlightLayer, HighlightLayerOptions};

//! Materials assembled from a graph of shader blocks

pub mod blocks;
pub mod build_state;
pub mod connection_point;
pub mod material;

pub use blocks::{
    AddBlock, BlockTarget, FragmentOutputBlock, InputBlock, InputMode, InputValue, LightBlock,
    NodeMaterialBlock, SystemValue, TransformBlock, VertexOutputBlock,
};
pub use build_state::{BlockBinding, NodeMaterialBuildState};
pub use connection_point::{Connection, ConnectionPoint, ConnectionPointDirection, ConnectionPointType};
pub use material::NodeMaterial;

slotmap::new_key_type! {
    /// Key of a block inside a node material
    pub struct BlockId;
}

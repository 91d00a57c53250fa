//! The scene graph: nodes, their behaviors and animations, and the scene
//! that owns and renders them

pub mod animation;
pub mod behavior;
pub mod node;
#[allow(clippy::module_inception)]
pub mod scene;
pub mod stage;

pub use animation::{Animatable, Animation, AnimationKey, AnimationLoopMode, AnimationRange};
pub use behavior::Behavior;
pub use node::{Node, NodeArena, NodeKind};
pub use scene::Scene;
pub use stage::{Stage, StageAction, StageEntry};

slotmap::new_key_type! {
    /// Key of a node inside the scene
    pub struct NodeId;
}

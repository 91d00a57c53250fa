use std::any::Any;

use crate::scene::NodeId;

/// Reusable logic attached to a node
///
/// `init` runs when the behavior is added. `attach` runs right away, or
/// once the scene finished loading when it is added during a load.
pub trait Behavior: Any {
    fn name(&self) -> &str;

    fn init(&mut self) {}

    fn attach(&mut self, target: NodeId);

    fn detach(&mut self);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

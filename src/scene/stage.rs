//! Ordered hooks the scene runs at fixed points of a frame
//!
//! Components register an action at a step index (see
//! [`scene_component_constants`](crate::engine::scene_component_constants));
//! a stage runs its actions in ascending step order.

use std::fmt;

use crate::cameras::CameraSnapshot;
use crate::engine::Engine;
use crate::error::Result;

/// Callback registered by user code
pub type CustomStageAction = Box<dyn FnMut(&mut Engine, &CameraSnapshot) -> Result<()>>;

/// Work run by a stage entry
pub enum StageAction {
    /// Open the pre-pass attachments for the camera
    PrePass,
    /// Render the glow maps of the highlight layers
    EffectLayerRenderTargets,
    /// Merge the highlight layers over the camera output
    EffectLayerDraw,
    /// Refresh the post process render pipelines
    RenderPipelines,
    Custom(CustomStageAction),
}

impl fmt::Debug for StageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrePass => write!(f, "PrePass"),
            Self::EffectLayerRenderTargets => write!(f, "EffectLayerRenderTargets"),
            Self::EffectLayerDraw => write!(f, "EffectLayerDraw"),
            Self::RenderPipelines => write!(f, "RenderPipelines"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

#[derive(Debug)]
pub struct StageEntry {
    pub index: u32,
    pub component: &'static str,
    pub action: StageAction,
}

#[derive(Debug, Default)]
pub struct Stage {
    entries: Vec<StageEntry>,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts after every entry with a lower or equal index
    pub fn register_step(&mut self, index: u32, component: &'static str, action: StageAction) {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.index > index)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            position,
            StageEntry {
                index,
                component,
                action,
            },
        );
    }

    pub fn remove_component(&mut self, component: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.component != component);
        before - self.entries.len()
    }

    pub fn has_component(&self, component: &str) -> bool {
        self.entries.iter().any(|entry| entry.component == component)
    }

    pub fn entries(&self) -> &[StageEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [StageEntry] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_sorted_and_stable() {
        let mut stage = Stage::new();
        stage.register_step(4, "Layer", StageAction::EffectLayerDraw);
        stage.register_step(0, "PrePassRenderer", StageAction::PrePass);
        stage.register_step(4, "Custom", StageAction::Custom(Box::new(|_, _| Ok(()))));
        stage.register_step(1, "EffectLayer", StageAction::EffectLayerRenderTargets);
        let order: Vec<_> = stage.entries().iter().map(|e| e.component).collect();
        assert_eq!(order, vec!["PrePassRenderer", "EffectLayer", "Layer", "Custom"]);

        assert_eq!(stage.remove_component("Layer"), 1);
        assert!(!stage.has_component("Layer"));
        assert_eq!(stage.len(), 3);
    }
}

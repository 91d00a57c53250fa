use log::{debug, warn};

use crate::error::Result;
use crate::postprocesses::post_process::PostProcessArena;
use crate::postprocesses::render_pipeline::{PostProcessRenderEffect, RenderPipelineContext};
use crate::prepass::PrePassRenderer;
use crate::scene::NodeId;

/// Ordered render effects shared by a set of cameras
#[derive(Debug)]
pub struct PostProcessRenderPipeline {
    name: String,
    effects: Vec<PostProcessRenderEffect>,
    cameras: Vec<NodeId>,
}

impl PostProcessRenderPipeline {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            effects: Vec::new(),
            cameras: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_name(&self) -> &'static str {
        "PostProcessRenderPipeline"
    }

    pub fn cameras(&self) -> &[NodeId] {
        &self.cameras
    }

    /// Appends an effect; an effect with the same name is replaced
    pub fn add_effect(&mut self, effect: PostProcessRenderEffect) {
        match self.effects.iter_mut().find(|e| e.name() == effect.name()) {
            Some(existing) => {
                warn!("Render effect '{}' replaced in pipeline '{}'", effect.name(), self.name);
                *existing = effect;
            }
            None => self.effects.push(effect),
        }
    }

    pub fn effect(&self, name: &str) -> Option<&PostProcessRenderEffect> {
        self.effects.iter().find(|e| e.name() == name)
    }

    pub fn effects(&self) -> &[PostProcessRenderEffect] {
        &self.effects
    }

    pub fn is_supported(&self, ctx: &RenderPipelineContext<'_>) -> bool {
        self.effects.iter().all(|effect| effect.is_supported(ctx))
    }

    fn effect_mut(&mut self, name: &str) -> Option<&mut PostProcessRenderEffect> {
        self.effects.iter_mut().find(|e| e.name() == name)
    }

    /// Cameras the call targets: the given ones, else every attached camera
    fn targets(&self, cameras: Option<&[NodeId]>) -> Vec<NodeId> {
        cameras.map_or_else(|| self.cameras.clone(), <[NodeId]>::to_vec)
    }

    pub(crate) fn enable_effect(
        &mut self,
        ctx: &mut RenderPipelineContext<'_>,
        effect_name: &str,
        cameras: Option<&[NodeId]>,
    ) {
        let cameras = self.targets(cameras);
        if let Some(effect) = self.effect_mut(effect_name) {
            effect.enable(ctx, &cameras);
        }
    }

    pub(crate) fn disable_effect(
        &mut self,
        ctx: &mut RenderPipelineContext<'_>,
        effect_name: &str,
        cameras: Option<&[NodeId]>,
    ) {
        let cameras = self.targets(cameras);
        if let Some(effect) = self.effect_mut(effect_name) {
            effect.disable(ctx, &cameras);
        }
    }

    /// Attaches every effect to the cameras
    ///
    /// With `unique`, cameras already attached are skipped; otherwise they
    /// receive the effects again.
    pub(crate) fn attach_cameras(
        &mut self,
        ctx: &mut RenderPipelineContext<'_>,
        cameras: &[NodeId],
        unique: bool,
    ) -> Result<()> {
        let mut targets = Vec::with_capacity(cameras.len());
        for &camera in cameras {
            if !self.cameras.contains(&camera) {
                self.cameras.push(camera);
                targets.push(camera);
            } else if !unique {
                targets.push(camera);
            }
        }
        for effect in &mut self.effects {
            effect.attach_cameras(ctx, &targets)?;
        }
        debug!("Pipeline '{}' attached to {} camera(s)", self.name, targets.len());
        Ok(())
    }

    pub(crate) fn detach_cameras(&mut self, ctx: &mut RenderPipelineContext<'_>, cameras: &[NodeId]) {
        for effect in &mut self.effects {
            effect.detach_cameras(ctx, cameras);
        }
        self.cameras.retain(|camera| !cameras.contains(camera));
    }

    pub(crate) fn update(&mut self, ctx: &mut RenderPipelineContext<'_>) {
        self.cameras.retain(|camera| ctx.nodes.contains_key(*camera));
        for effect in &mut self.effects {
            effect.update(ctx);
        }
    }

    /// Marks every post process for texture recreation after a device loss
    pub(crate) fn rebuild(&mut self, ctx: &mut RenderPipelineContext<'_>) {
        for effect in &self.effects {
            let ids = effect
                .cameras()
                .iter()
                .filter_map(|camera| effect.get_post_processes(Some(*camera)))
                .flatten();
            for id in ids {
                if let Some(post_process) = ctx.post_processes.get_mut(*id) {
                    post_process.base_mut().mark_texture_dirty();
                }
            }
        }
    }

    /// Forgets every effect without touching their post processes
    pub(crate) fn reset(&mut self) {
        self.effects.clear();
    }

    /// Requests multisampling on the first post process of the first effect
    pub fn enable_msaa_on_first_post_process(
        &self,
        post_processes: &mut PostProcessArena,
        sample_count: u32,
    ) -> bool {
        let Some(effect) = self.effects.first() else {
            return false;
        };
        let first = effect
            .get_post_processes(self.cameras.first().copied())
            .and_then(|ids| ids.first())
            .and_then(|id| post_processes.get_mut(*id));
        match first {
            Some(post_process) => {
                post_process.base_mut().set_samples(sample_count);
                true
            }
            None => false,
        }
    }

    /// Registers the pre-pass needs of the pipeline's post processes
    pub fn set_pre_pass_renderer(&self, post_processes: &PostProcessArena, renderer: &mut PrePassRenderer) -> bool {
        let mut registered = false;
        for effect in &self.effects {
            let ids = effect
                .cameras()
                .iter()
                .filter_map(|camera| effect.get_post_processes(Some(*camera)))
                .flatten();
            for id in ids {
                if let Some(post_process) = post_processes.get(*id) {
                    registered |= post_process.base().set_pre_pass_renderer(renderer);
                }
            }
        }
        registered
    }

    pub(crate) fn dispose(&mut self, ctx: &mut RenderPipelineContext<'_>) {
        for effect in &mut self.effects {
            effect.dispose(ctx);
        }
        self.cameras.clear();
        debug!("Disposed pipeline '{}'", self.name);
    }
}

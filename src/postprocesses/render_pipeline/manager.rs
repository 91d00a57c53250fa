use log::{info, warn};

use crate::error::Result;
use crate::postprocesses::render_pipeline::{PostProcessRenderPipeline, RenderPipelineContext};
use crate::scene::NodeId;

/// Render pipelines of a scene, by name
#[derive(Debug, Default)]
pub struct PostProcessRenderPipelineManager {
    pipelines: Vec<PostProcessRenderPipeline>,
}

impl PostProcessRenderPipelineManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pipeline, replacing one of the same name
    pub fn add_pipeline(&mut self, pipeline: PostProcessRenderPipeline) {
        match self.pipelines.iter_mut().find(|p| p.name() == pipeline.name()) {
            Some(existing) => *existing = pipeline,
            None => self.pipelines.push(pipeline),
        }
    }

    pub fn pipeline(&self, name: &str) -> Option<&PostProcessRenderPipeline> {
        self.pipelines.iter().find(|p| p.name() == name)
    }

    pub fn pipeline_mut(&mut self, name: &str) -> Option<&mut PostProcessRenderPipeline> {
        self.pipelines.iter_mut().find(|p| p.name() == name)
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn supported_pipelines<'a>(
        &'a self,
        ctx: &'a RenderPipelineContext<'_>,
    ) -> impl Iterator<Item = &'a PostProcessRenderPipeline> + 'a {
        self.pipelines.iter().filter(move |p| p.is_supported(ctx))
    }

    pub fn attach_cameras_to_render_pipeline(
        &mut self,
        ctx: &mut RenderPipelineContext<'_>,
        pipeline_name: &str,
        cameras: &[NodeId],
        unique: bool,
    ) -> Result<()> {
        match self.pipeline_mut(pipeline_name) {
            Some(pipeline) => pipeline.attach_cameras(ctx, cameras, unique),
            None => {
                warn!("Unknown render pipeline '{}'", pipeline_name);
                Ok(())
            }
        }
    }

    pub fn detach_cameras_from_render_pipeline(
        &mut self,
        ctx: &mut RenderPipelineContext<'_>,
        pipeline_name: &str,
        cameras: &[NodeId],
    ) {
        if let Some(pipeline) = self.pipeline_mut(pipeline_name) {
            pipeline.detach_cameras(ctx, cameras);
        }
    }

    pub fn enable_effect_in_pipeline(
        &mut self,
        ctx: &mut RenderPipelineContext<'_>,
        pipeline_name: &str,
        effect_name: &str,
        cameras: Option<&[NodeId]>,
    ) {
        if let Some(pipeline) = self.pipeline_mut(pipeline_name) {
            pipeline.enable_effect(ctx, effect_name, cameras);
        }
    }

    pub fn disable_effect_in_pipeline(
        &mut self,
        ctx: &mut RenderPipelineContext<'_>,
        pipeline_name: &str,
        effect_name: &str,
        cameras: Option<&[NodeId]>,
    ) {
        if let Some(pipeline) = self.pipeline_mut(pipeline_name) {
            pipeline.disable_effect(ctx, effect_name, cameras);
        }
    }

    /// Drops unsupported pipelines and refreshes the others
    pub fn update(&mut self, ctx: &mut RenderPipelineContext<'_>) {
        let mut index = 0;
        while index < self.pipelines.len() {
            if self.pipelines[index].is_supported(ctx) {
                self.pipelines[index].update(ctx);
                index += 1;
            } else {
                let mut pipeline = self.pipelines.remove(index);
                info!("Render pipeline '{}' is not supported and was removed", pipeline.name());
                pipeline.dispose(ctx);
            }
        }
    }

    pub fn rebuild(&mut self, ctx: &mut RenderPipelineContext<'_>) {
        for pipeline in &mut self.pipelines {
            pipeline.rebuild(ctx);
        }
    }

    pub fn dispose(&mut self, ctx: &mut RenderPipelineContext<'_>) {
        for mut pipeline in self.pipelines.drain(..) {
            pipeline.dispose(ctx);
            pipeline.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cameras::Camera;
    use crate::engine::{Engine, EngineOptions, HeadlessBackend};
    use crate::postprocesses::post_process::{PostProcessArena, ScenePostProcess};
    use crate::postprocesses::render_pipeline::PostProcessRenderEffect;
    use crate::postprocesses::PassPostProcess;
    use crate::scene::{Node, NodeArena, NodeKind};
    use cgmath::Vector3;

    fn camera_node(nodes: &mut NodeArena, name: &str) -> NodeId {
        let camera = Camera::new_target(Vector3::new(0.0, 0.0, -5.0), Vector3::new(0.0, 0.0, 0.0));
        nodes.insert(Node::new(name, NodeKind::Camera(Box::new(camera)), 0))
    }

    fn pass_effect(name: &'static str, single_instance: bool) -> PostProcessRenderEffect {
        PostProcessRenderEffect::new(
            name,
            move |engine| {
                let pass: Box<dyn ScenePostProcess> = Box::new(PassPostProcess::new(
                    engine,
                    name,
                    Default::default(),
                    None,
                ));
                Ok(vec![pass])
            },
            single_instance,
        )
    }

    fn attached(nodes: &NodeArena, camera: NodeId) -> usize {
        nodes[camera].camera().map_or(0, |c| c.post_processes().len())
    }

    #[test]
    fn test_single_instance_shared_between_cameras() {
        let mut engine = Engine::new(Box::new(HeadlessBackend::new(32, 32)), EngineOptions::default());
        let mut nodes = NodeArena::with_key();
        let mut post_processes = PostProcessArena::with_key();
        let a = camera_node(&mut nodes, "a");
        let b = camera_node(&mut nodes, "b");
        let mut ctx = RenderPipelineContext {
            engine: &mut engine,
            nodes: &mut nodes,
            post_processes: &mut post_processes,
        };

        let mut pipeline = PostProcessRenderPipeline::new("default");
        pipeline.add_effect(pass_effect("shared", true));
        pipeline.add_effect(pass_effect("own", false));
        let mut manager = PostProcessRenderPipelineManager::new();
        manager.add_pipeline(pipeline);
        manager
            .attach_cameras_to_render_pipeline(&mut ctx, "default", &[a, b], true)
            .unwrap();
        assert_eq!(ctx.post_processes.len(), 3);
        assert_eq!(attached(ctx.nodes, a), 2);
        assert_eq!(attached(ctx.nodes, b), 2);
        assert_eq!(manager.supported_pipelines(&ctx).count(), 1);

        manager.disable_effect_in_pipeline(&mut ctx, "default", "shared", None);
        assert_eq!(attached(ctx.nodes, a), 1);
        manager.enable_effect_in_pipeline(&mut ctx, "default", "shared", Some(&[a]));
        assert_eq!(attached(ctx.nodes, a), 2);
        assert_eq!(attached(ctx.nodes, b), 1);

        manager.detach_cameras_from_render_pipeline(&mut ctx, "default", &[b]);
        assert_eq!(ctx.post_processes.len(), 2);
        assert_eq!(manager.pipeline("default").unwrap().cameras(), &[a]);

        manager.dispose(&mut ctx);
        assert!(ctx.post_processes.is_empty());
        assert_eq!(attached(ctx.nodes, a), 0);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_unique_attach_skips_known_cameras() {
        let mut engine = Engine::new(Box::new(HeadlessBackend::new(32, 32)), EngineOptions::default());
        let mut nodes = NodeArena::with_key();
        let mut post_processes = PostProcessArena::with_key();
        let a = camera_node(&mut nodes, "a");
        let mut ctx = RenderPipelineContext {
            engine: &mut engine,
            nodes: &mut nodes,
            post_processes: &mut post_processes,
        };
        let mut pipeline = PostProcessRenderPipeline::new("p");
        pipeline.add_effect(pass_effect("own", false));
        pipeline.attach_cameras(&mut ctx, &[a], true).unwrap();
        pipeline.attach_cameras(&mut ctx, &[a], true).unwrap();
        assert_eq!(ctx.post_processes.len(), 1);
        assert!(pipeline.enable_msaa_on_first_post_process(ctx.post_processes, 4));
    }
}

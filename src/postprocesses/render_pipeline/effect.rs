use std::collections::HashMap;
use std::fmt;

use log::{debug, warn};

use crate::engine::Engine;
use crate::error::Result;
use crate::postprocesses::post_process::{PostProcessId, ScenePostProcess};
use crate::postprocesses::render_pipeline::RenderPipelineContext;
use crate::scene::NodeId;

/// Creates the post processes of an effect
pub type PostProcessFactory = Box<dyn FnMut(&mut Engine) -> Result<Vec<Box<dyn ScenePostProcess>>>>;

/// One step of a render pipeline
///
/// A single-instance effect shares one set of post processes between every
/// camera; otherwise each camera gets its own set.
pub struct PostProcessRenderEffect {
    name: String,
    factory: PostProcessFactory,
    single_instance: bool,
    /// Keyed by camera; `None` holds the shared set
    post_processes: HashMap<Option<NodeId>, Vec<PostProcessId>>,
    indices_for_camera: HashMap<NodeId, Vec<usize>>,
    cameras: Vec<NodeId>,
}

impl fmt::Debug for PostProcessRenderEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostProcessRenderEffect")
            .field("name", &self.name)
            .field("single_instance", &self.single_instance)
            .field("post_processes", &self.post_processes)
            .field("cameras", &self.cameras)
            .finish()
    }
}

impl PostProcessRenderEffect {
    pub fn new<F>(name: &str, factory: F, single_instance: bool) -> Self
    where
        F: FnMut(&mut Engine) -> Result<Vec<Box<dyn ScenePostProcess>>> + 'static,
    {
        Self {
            name: name.to_string(),
            factory: Box::new(factory),
            single_instance,
            post_processes: HashMap::new(),
            indices_for_camera: HashMap::new(),
            cameras: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_single_instance(&self) -> bool {
        self.single_instance
    }

    fn key(&self, camera: NodeId) -> Option<NodeId> {
        if self.single_instance {
            None
        } else {
            Some(camera)
        }
    }

    /// Whether every post process created so far compiled
    pub fn is_supported(&self, ctx: &RenderPipelineContext<'_>) -> bool {
        self.post_processes.values().flatten().all(|id| {
            ctx.post_processes
                .get(*id)
                .is_some_and(|post_process| post_process.base().is_supported(&*ctx.engine))
        })
    }

    /// Post processes used by `camera`; the shared set for single instances
    pub fn get_post_processes(&self, camera: Option<NodeId>) -> Option<&[PostProcessId]> {
        let key = if self.single_instance { None } else { Some(camera?) };
        self.post_processes.get(&key).map(Vec::as_slice)
    }

    pub fn cameras(&self) -> &[NodeId] {
        &self.cameras
    }

    pub(crate) fn update(&mut self, ctx: &mut RenderPipelineContext<'_>) {
        // Post processes removed from the scene behind our back
        for ids in self.post_processes.values_mut() {
            ids.retain(|id| ctx.post_processes.contains_key(*id));
        }
    }

    /// Creates the post processes a camera needs and attaches them
    pub(crate) fn attach_cameras(
        &mut self,
        ctx: &mut RenderPipelineContext<'_>,
        cameras: &[NodeId],
    ) -> Result<()> {
        for &camera in cameras {
            let key = self.key(camera);
            if !self.post_processes.contains_key(&key) {
                let created = (self.factory)(ctx.engine)?;
                let ids = created
                    .into_iter()
                    .map(|mut post_process| {
                        let owner = if self.single_instance { None } else { Some(camera) };
                        post_process.base_mut().set_camera(owner);
                        ctx.post_processes.insert(post_process)
                    })
                    .collect();
                self.post_processes.insert(key, ids);
            }

            let Some(target) = ctx.nodes.get_mut(camera).and_then(|node| node.camera_mut()) else {
                warn!("Render effect '{}' cannot attach to a node that is not a camera", self.name);
                continue;
            };
            let indices = self.indices_for_camera.entry(camera).or_default();
            for id in self.post_processes.get(&key).into_iter().flatten() {
                indices.push(target.attach_post_process(*id, None));
            }
            if !self.cameras.contains(&camera) {
                self.cameras.push(camera);
            }
        }
        debug!("Render effect '{}' attached to {} camera(s)", self.name, cameras.len());
        Ok(())
    }

    /// Detaches from the cameras; per-camera post processes are disposed
    pub(crate) fn detach_cameras(&mut self, ctx: &mut RenderPipelineContext<'_>, cameras: &[NodeId]) {
        for &camera in cameras {
            let key = self.key(camera);
            if let Some(target) = ctx.nodes.get_mut(camera).and_then(|node| node.camera_mut()) {
                for id in self.post_processes.get(&key).into_iter().flatten() {
                    target.detach_post_process(*id);
                }
            }
            if !self.single_instance {
                self.dispose_set(ctx, key);
            }
            self.cameras.retain(|attached| *attached != camera);
            self.indices_for_camera.remove(&camera);
        }
        if self.single_instance && self.cameras.is_empty() {
            self.dispose_set(ctx, None);
        }
    }

    fn dispose_set(&mut self, ctx: &mut RenderPipelineContext<'_>, key: Option<NodeId>) {
        for id in self.post_processes.remove(&key).into_iter().flatten() {
            if let Some(mut post_process) = ctx.post_processes.remove(id) {
                post_process.dispose(ctx.engine);
            }
        }
    }

    /// Re-attaches detached post processes at their recorded positions
    pub(crate) fn enable(&mut self, ctx: &mut RenderPipelineContext<'_>, cameras: &[NodeId]) {
        for &camera in cameras {
            let key = self.key(camera);
            let (Some(ids), Some(target)) = (
                self.post_processes.get(&key),
                ctx.nodes.get_mut(camera).and_then(|node| node.camera_mut()),
            ) else {
                continue;
            };
            let indices = self.indices_for_camera.get(&camera);
            for (j, id) in ids.iter().enumerate() {
                if !target.post_processes().contains(id) {
                    let index = indices.and_then(|indices| indices.get(j)).copied();
                    target.attach_post_process(*id, index);
                }
            }
        }
    }

    /// Detaches the post processes but keeps them for a later `enable`
    pub(crate) fn disable(&mut self, ctx: &mut RenderPipelineContext<'_>, cameras: &[NodeId]) {
        for &camera in cameras {
            let key = self.key(camera);
            let (Some(ids), Some(target)) = (
                self.post_processes.get(&key),
                ctx.nodes.get_mut(camera).and_then(|node| node.camera_mut()),
            ) else {
                continue;
            };
            for id in ids {
                target.detach_post_process(*id);
            }
        }
    }

    /// Detaches from every camera and disposes all post processes
    pub(crate) fn dispose(&mut self, ctx: &mut RenderPipelineContext<'_>) {
        let cameras = self.cameras.clone();
        self.detach_cameras(ctx, &cameras);
        let keys: Vec<_> = self.post_processes.keys().copied().collect();
        for key in keys {
            self.dispose_set(ctx, key);
        }
    }
}

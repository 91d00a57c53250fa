//! Runs chains of post processes for a camera or render target

use log::trace;

use crate::engine::{Engine, RenderPassOptions};
use crate::error::Result;
use crate::postprocesses::post_process::{PostProcessArena, PostProcessContext, PostProcessId};
use crate::textures::internal_texture::TextureKey;

/// Drives the activate/apply/draw sequence of a post process chain
#[derive(Debug)]
pub struct PostProcessManager {
    /// Skips every chain when false
    pub enabled: bool,
}

impl Default for PostProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PostProcessManager {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    /// Ids still alive in the arena, in chain order
    fn live_chain(arena: &PostProcessArena, post_processes: &[PostProcessId]) -> Vec<PostProcessId> {
        post_processes
            .iter()
            .copied()
            .filter(|id| arena.contains_key(*id))
            .collect()
    }

    /// Resolves `share_output_with` links to the shared post process' input
    fn resolve_shared_outputs(arena: &mut PostProcessArena, chain: &[PostProcessId]) {
        for id in chain {
            let shared = arena
                .get(*id)
                .and_then(|pp| pp.base().shared_output_with())
                .and_then(|other| arena.get(other))
                .and_then(|other| other.base().input_texture());
            if let Some(pp) = arena.get_mut(*id) {
                pp.base_mut().shared_output = shared;
            }
        }
    }

    /// Prepares the chain and opens the pass the scene renders into
    ///
    /// Returns false when there is nothing to do, in which case the caller
    /// renders straight to its own target.
    pub fn prepare_frame(
        &mut self,
        engine: &mut Engine,
        arena: &mut PostProcessArena,
        post_processes: &[PostProcessId],
        source_texture: Option<TextureKey>,
        ctx: &PostProcessContext<'_>,
    ) -> Result<bool> {
        let chain = Self::live_chain(arena, post_processes);
        let Some(first) = chain.first().copied() else {
            return Ok(false);
        };
        if !self.enabled {
            return Ok(false);
        }
        for id in &chain {
            if let Some(pp) = arena.get_mut(*id) {
                pp.prepare(engine, ctx)?;
            }
        }
        Self::resolve_shared_outputs(arena, &chain);
        let activated = match arena.get_mut(first) {
            Some(pp) => pp.base_mut().activate(engine, ctx, source_texture, true)?,
            None => None,
        };
        Ok(activated.is_some())
    }

    /// Renders the chain whose first input has already been filled
    #[allow(clippy::too_many_arguments)]
    pub fn direct_render(
        &mut self,
        engine: &mut Engine,
        arena: &mut PostProcessArena,
        post_processes: &[PostProcessId],
        target: Option<TextureKey>,
        force_fullscreen_viewport: bool,
        ctx: &PostProcessContext<'_>,
    ) -> Result<()> {
        let chain = Self::live_chain(arena, post_processes);
        Self::resolve_shared_outputs(arena, &chain);
        self.render_chain(engine, arena, &chain, target, 0, force_fullscreen_viewport, ctx)
    }

    /// Renders every post process into the next one, the last into `target`
    /// (or the backbuffer)
    #[allow(clippy::too_many_arguments)]
    pub fn finalize_frame(
        &mut self,
        engine: &mut Engine,
        arena: &mut PostProcessArena,
        _is_multiview: bool,
        target: Option<TextureKey>,
        face: u32,
        post_processes: &[PostProcessId],
        force_fullscreen_viewport: bool,
        ctx: &PostProcessContext<'_>,
    ) -> Result<()> {
        let chain = Self::live_chain(arena, post_processes);
        if chain.is_empty() || !self.enabled {
            return Ok(());
        }
        self.render_chain(engine, arena, &chain, target, face, force_fullscreen_viewport, ctx)
    }

    #[allow(clippy::too_many_arguments)]
    fn render_chain(
        &mut self,
        engine: &mut Engine,
        arena: &mut PostProcessArena,
        chain: &[PostProcessId],
        target: Option<TextureKey>,
        face: u32,
        force_fullscreen_viewport: bool,
        ctx: &PostProcessContext<'_>,
    ) -> Result<()> {
        for (index, id) in chain.iter().enumerate() {
            let output = match chain.get(index + 1).and_then(|next| arena.get_mut(*next)) {
                Some(next) => next.base_mut().activate(engine, ctx, target, false)?,
                None => {
                    let mut pass = match target {
                        Some(texture) => RenderPassOptions::texture("post process output", texture)
                            .with_layer(face),
                        None => RenderPassOptions::backbuffer("post process output"),
                    };
                    if !force_fullscreen_viewport {
                        pass = pass.with_viewport(Some(ctx.viewport()));
                    }
                    engine.begin_render_pass(&pass)?;
                    target
                }
            };
            let Some(pp) = arena.get_mut(*id) else {
                continue;
            };
            pp.base_mut().set_output_texture(output);
            match pp.apply(engine, ctx) {
                Some(effect) => pp.base_mut().render(engine, effect)?,
                None => trace!("Post process '{}' not ready, skipped", pp.base().name),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineOptions, HeadlessBackend};
    use crate::postprocesses::post_process::{PostProcess, PostProcessConfig, ScenePostProcess};

    fn setup() -> (Engine, crate::engine::CommandLog, PostProcessArena) {
        let backend = HeadlessBackend::new(64, 64);
        let log = backend.log();
        let engine = Engine::new(Box::new(backend), EngineOptions::default());
        (engine, log, PostProcessArena::with_key())
    }

    fn add(engine: &mut Engine, arena: &mut PostProcessArena, name: &str) -> PostProcessId {
        let pp: Box<dyn ScenePostProcess> =
            Box::new(PostProcess::new(engine, PostProcessConfig::new(name, "pass")));
        arena.insert(pp)
    }

    #[test]
    fn test_chain_renders_into_backbuffer() {
        let (mut engine, log, mut arena) = setup();
        let first = add(&mut engine, &mut arena, "first");
        let second = add(&mut engine, &mut arena, "second");
        let chain = [first, second];
        let ctx = PostProcessContext::default();
        let mut manager = PostProcessManager::new();
        assert!(manager
            .prepare_frame(&mut engine, &mut arena, &chain, None, &ctx)
            .unwrap());
        manager
            .finalize_frame(&mut engine, &mut arena, false, None, 0, &chain, true, &ctx)
            .unwrap();
        engine.end_frame().unwrap();

        let passes = log.passes();
        assert_eq!(passes.len(), 3);
        assert!(passes.last().unwrap().targets.is_empty());
        assert_eq!(log.draws().len(), 2);
        let second_input = arena[second].base().input_texture();
        assert_eq!(arena[first].base().output_texture(), second_input);
    }

    #[test]
    fn test_empty_chain_is_skipped() {
        let (mut engine, log, mut arena) = setup();
        let mut manager = PostProcessManager::new();
        let ctx = PostProcessContext::default();
        assert!(!manager
            .prepare_frame(&mut engine, &mut arena, &[], None, &ctx)
            .unwrap());
        manager
            .finalize_frame(&mut engine, &mut arena, false, None, 0, &[], true, &ctx)
            .unwrap();
        assert!(log.passes().is_empty());
    }

    #[test]
    fn test_disposed_post_processes_are_ignored() {
        let (mut engine, log, mut arena) = setup();
        let first = add(&mut engine, &mut arena, "first");
        let gone = add(&mut engine, &mut arena, "gone");
        if let Some(mut pp) = arena.remove(gone) {
            pp.dispose(&mut engine);
        }
        let chain = [first, gone];
        let ctx = PostProcessContext::default();
        let mut manager = PostProcessManager::new();
        manager
            .prepare_frame(&mut engine, &mut arena, &chain, None, &ctx)
            .unwrap();
        manager
            .finalize_frame(&mut engine, &mut arena, false, None, 0, &chain, true, &ctx)
            .unwrap();
        assert_eq!(log.draws().len(), 1);
    }
}

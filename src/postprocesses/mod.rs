//! Post processes: the fullscreen pass core, the chain manager, the
//! concrete effects built on them and the render pipelines grouping them

pub mod blur;
pub mod chromatic_aberration;
pub mod color_correction;
pub mod depth_of_field_blur;
pub mod image_processing;
pub mod pass;
pub mod post_process;
pub mod post_process_manager;
pub mod refraction;
pub mod render_pipeline;
pub mod sub_surface_scattering;

pub use blur::BlurPostProcess;
pub use chromatic_aberration::ChromaticAberrationPostProcess;
pub use color_correction::ColorCorrectionPostProcess;
pub use depth_of_field_blur::DepthOfFieldBlurPostProcess;
pub use image_processing::ImageProcessingPostProcess;
pub use pass::PassPostProcess;
pub use post_process::{
    PostProcess, PostProcessArena, PostProcessConfig, PostProcessContext, PostProcessId,
    PostProcessOptions, ScenePostProcess,
};
pub use post_process_manager::PostProcessManager;
pub use refraction::RefractionPostProcess;
pub use render_pipeline::{
    PostProcessRenderEffect, PostProcessRenderPipeline, PostProcessRenderPipelineManager,
    RenderPipelineContext,
};
pub use sub_surface_scattering::SubSurfaceScatteringPostProcess;

/// Builds a post process of the given class from its serialized form
pub fn parse(
    engine: &mut crate::engine::Engine,
    value: &serde_json::Value,
) -> crate::error::Result<Box<dyn ScenePostProcess>> {
    let class_name = value
        .get("customType")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    let parsed: Box<dyn ScenePostProcess> = match class_name.trim_start_matches("BABYLON.") {
        "PassPostProcess" => Box::new(PassPostProcess::parse(engine, value)),
        "BlurPostProcess" => Box::new(BlurPostProcess::parse(engine, value)),
        "ChromaticAberrationPostProcess" => Box::new(ChromaticAberrationPostProcess::parse(engine, value)),
        "ImageProcessingPostProcess" => Box::new(ImageProcessingPostProcess::parse(engine, value)?),
        "RefractionPostProcess" => Box::new(RefractionPostProcess::parse(engine, value)?),
        "ColorCorrectionPostProcess" => Box::new(ColorCorrectionPostProcess::parse(engine, value)?),
        other => {
            return Err(crate::error::EngineError::parse(
                "post process",
                format!("unknown class '{}'", other),
            ))
        }
    };
    Ok(parsed)
}

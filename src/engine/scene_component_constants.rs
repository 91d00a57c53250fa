//! Names and ordering of scene components
//!
//! Components register actions into the scene's stages. Within a stage the
//! actions run in ascending step order.

pub const NAME_EFFECTLAYER: &str = "EffectLayer";
pub const NAME_LAYER: &str = "Layer";
pub const NAME_LENSFLARESYSTEM: &str = "LensFlareSystem";
pub const NAME_BOUNDINGBOXRENDERER: &str = "BoundingBoxRenderer";
pub const NAME_PARTICLESYSTEM: &str = "ParticleSystem";
pub const NAME_GAMEPAD: &str = "Gamepad";
pub const NAME_SIMPLIFICATIONQUEUE: &str = "SimplificationQueue";
pub const NAME_GEOMETRYBUFFERRENDERER: &str = "GeometryBufferRenderer";
pub const NAME_PREPASSRENDERER: &str = "PrePassRenderer";
pub const NAME_DEPTHRENDERER: &str = "DepthRenderer";
pub const NAME_POSTPROCESSRENDERPIPELINEMANAGER: &str = "PostProcessRenderPipelineManager";
pub const NAME_SPRITE: &str = "Sprite";
pub const NAME_SUBSURFACE: &str = "SubSurface";
pub const NAME_OUTLINERENDERER: &str = "Outline";
pub const NAME_PROCEDURALTEXTURE: &str = "ProceduralTexture";
pub const NAME_SHADOWGENERATOR: &str = "ShadowGenerator";
pub const NAME_OCTREE: &str = "Octree";
pub const NAME_PHYSICSENGINE: &str = "PhysicsEngine";
pub const NAME_AUDIO: &str = "Audio";

pub const STEP_ISREADYFORMESH_EFFECTLAYER: u32 = 0;

pub const STEP_BEFOREEVALUATEACTIVEMESH_BOUNDINGBOXRENDERER: u32 = 0;

pub const STEP_EVALUATESUBMESH_BOUNDINGBOXRENDERER: u32 = 0;

pub const STEP_PREACTIVEMESH_BOUNDINGBOXRENDERER: u32 = 0;

pub const STEP_CAMERADRAWRENDERTARGET_EFFECTLAYER: u32 = 1;

pub const STEP_BEFORECAMERADRAW_PREPASS: u32 = 0;
pub const STEP_BEFORECAMERADRAW_EFFECTLAYER: u32 = 1;
pub const STEP_BEFORECAMERADRAW_LAYER: u32 = 2;

pub const STEP_BEFORERENDERTARGETDRAW_PREPASS: u32 = 0;
pub const STEP_BEFORERENDERTARGETDRAW_LAYER: u32 = 1;

pub const STEP_BEFORERENDERINGMESH_PREPASS: u32 = 0;
pub const STEP_BEFORERENDERINGMESH_OUTLINE: u32 = 1;

pub const STEP_AFTERRENDERINGMESH_PREPASS: u32 = 0;
pub const STEP_AFTERRENDERINGMESH_OUTLINE: u32 = 1;

pub const STEP_AFTERRENDERINGGROUPDRAW_EFFECTLAYER_DRAW: u32 = 0;
pub const STEP_AFTERRENDERINGGROUPDRAW_BOUNDINGBOXRENDERER: u32 = 1;

pub const STEP_BEFORECAMERAUPDATE_SIMPLIFICATIONQUEUE: u32 = 0;
pub const STEP_BEFORECAMERAUPDATE_GAMEPAD: u32 = 1;

pub const STEP_BEFORECLEAR_PROCEDURALTEXTURE: u32 = 0;

pub const STEP_AFTERRENDERTARGETDRAW_PREPASS: u32 = 0;
pub const STEP_AFTERRENDERTARGETDRAW_LAYER: u32 = 1;

pub const STEP_AFTERCAMERADRAW_PREPASS: u32 = 0;
pub const STEP_AFTERCAMERADRAW_EFFECTLAYER: u32 = 1;
pub const STEP_AFTERCAMERADRAW_LENSFLARESYSTEM: u32 = 2;
pub const STEP_AFTERCAMERADRAW_EFFECTLAYER_DRAW: u32 = 3;
pub const STEP_AFTERCAMERADRAW_LAYER: u32 = 4;

pub const STEP_AFTERRENDER_AUDIO: u32 = 0;

pub const STEP_GATHERRENDERTARGETS_DEPTHRENDERER: u32 = 0;
pub const STEP_GATHERRENDERTARGETS_GEOMETRYBUFFERRENDERER: u32 = 1;
pub const STEP_GATHERRENDERTARGETS_SHADOWGENERATOR: u32 = 2;
pub const STEP_GATHERRENDERTARGETS_POSTPROCESSRENDERPIPELINEMANAGER: u32 = 3;

pub const STEP_GATHERACTIVECAMERARENDERTARGETS_DEPTHRENDERER: u32 = 0;

pub const STEP_BEFORECLEARSTAGE_PREPASS: u32 = 0;
pub const STEP_BEFORERENDERTARGETCLEARSTAGE_PREPASS: u32 = 0;

pub const STEP_POINTERMOVE_SPRITE: u32 = 0;
pub const STEP_POINTERDOWN_SPRITE: u32 = 0;
pub const STEP_POINTERUP_SPRITE: u32 = 0;

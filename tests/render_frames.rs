//! Whole frames rendered through the headless backend

use std::fs;

use babylon::cameras::Camera;
use babylon::engine::{CommandLog, DrawGeometry, Engine, EngineOptions, HeadlessBackend};
use babylon::layers::{HighlightLayer, HighlightLayerOptions};
use babylon::lights::Light;
use babylon::loaders::import_mesh;
use babylon::maths::Color3;
use babylon::meshes::{Mesh, VertexData};
use babylon::postprocesses::post_process::ScenePostProcess;
use babylon::postprocesses::render_pipeline::{PostProcessRenderEffect, PostProcessRenderPipeline};
use babylon::postprocesses::PassPostProcess;
use babylon::scene::{NodeId, Scene};
use cgmath::Vector3;

fn engine() -> (Engine, CommandLog) {
    let backend = HeadlessBackend::new(64, 64);
    let log = backend.log();
    (Engine::new(Box::new(backend), EngineOptions::default()), log)
}

fn basic_scene() -> (Scene, NodeId, NodeId) {
    let mut scene = Scene::new();
    let camera = scene.add_camera(
        "camera",
        Camera::new_arc_rotate(0.5, 1.0, 8.0, Vector3::new(0.0, 0.0, 0.0)),
    );
    scene.add_light("sun", Light::new_hemispheric(Vector3::new(0.0, 1.0, 0.0)));
    let mesh = scene.add_mesh("box", Mesh::new(VertexData::create_box(1.0, 1.0, 1.0)));
    (scene, camera, mesh)
}

#[test]
fn frames_advance_and_present() {
    let (mut engine, log) = engine();
    let (mut scene, _, _) = basic_scene();

    scene.render_with_delta(&mut engine, 16.0).unwrap();
    scene.render_with_delta(&mut engine, 16.0).unwrap();
    assert_eq!(scene.render_id(), 2);
    assert_eq!(log.presents(), 2);
    assert_eq!(log.draws().len(), 2);
}

#[test]
fn post_process_redirects_the_camera() {
    let (mut engine, log) = engine();
    let (mut scene, camera, _) = basic_scene();
    let pass = PassPostProcess::new(&mut engine, "copy", Default::default(), Some(camera));
    scene.add_post_process(Box::new(pass), Some(camera));

    scene.render_with_delta(&mut engine, 16.0).unwrap();
    log.clear();
    scene.render_with_delta(&mut engine, 16.0).unwrap();

    let draws = log.draws();
    assert!(draws
        .iter()
        .any(|draw| matches!(draw.geometry, DrawGeometry::Mesh(_))));
    assert!(matches!(
        draws.last().unwrap().geometry,
        DrawGeometry::FullscreenTriangle
    ));

    let passes = log.passes();
    assert!(passes.iter().any(|pass| !pass.targets.is_empty()));
    assert!(passes.last().unwrap().targets.is_empty());
}

#[test]
fn render_pipeline_attaches_its_effects() {
    let (mut engine, log) = engine();
    let (mut scene, camera, _) = basic_scene();

    let mut pipeline = PostProcessRenderPipeline::new("default");
    pipeline.add_effect(PostProcessRenderEffect::new(
        "copy",
        |engine| {
            let pass: Box<dyn ScenePostProcess> = Box::new(PassPostProcess::new(
                engine,
                "copy",
                Default::default(),
                None,
            ));
            Ok(vec![pass])
        },
        false,
    ));
    {
        let (manager, mut ctx) = scene.render_pipelines(&mut engine);
        manager.add_pipeline(pipeline);
        manager
            .attach_cameras_to_render_pipeline(&mut ctx, "default", &[camera], false)
            .unwrap();
    }
    assert_eq!(scene.camera(camera).unwrap().post_processes().len(), 1);

    scene.render_with_delta(&mut engine, 16.0).unwrap();
    log.clear();
    scene.render_with_delta(&mut engine, 16.0).unwrap();
    assert!(matches!(
        log.draws().last().unwrap().geometry,
        DrawGeometry::FullscreenTriangle
    ));

    {
        let (manager, mut ctx) = scene.render_pipelines(&mut engine);
        manager.detach_cameras_from_render_pipeline(&mut ctx, "default", &[camera]);
    }
    assert!(scene.camera(camera).unwrap().post_processes().is_empty());
}

#[test]
fn highlight_layer_merges_through_the_stencil() {
    let (mut engine, log) = engine();
    let (mut scene, _, mesh) = basic_scene();
    let other = scene.add_mesh("sphere", Mesh::new(VertexData::create_sphere(8, 1.0)));

    let mut layer = HighlightLayer::new("highlight", HighlightLayerOptions::default());
    layer.add_mesh(mesh, Color3::new(0.0, 1.0, 0.0));
    let index = scene.add_highlight_layer(layer);
    assert!(scene.exclude_mesh_from_highlight_layer(index, other));

    scene.render_with_delta(&mut engine, 16.0).unwrap();
    log.clear();
    scene.render_with_delta(&mut engine, 16.0).unwrap();

    let draws = log.draws();
    assert!(draws.last().unwrap().state.stencil_test);
    assert!(draws
        .iter()
        .any(|draw| matches!(draw.geometry, DrawGeometry::Mesh(_)) && draw.state.stencil_write));
    assert!(!engine.stencil_buffer());

    scene.dispose_highlight_layer(&mut engine, index);
    assert!(scene.highlight_layers().is_empty());
}

#[test]
fn imported_obj_meshes_render() {
    let dir = std::env::temp_dir().join("babylon_render_frames_obj");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("pair.obj");
    fs::write(
        &path,
        "o first\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\no second\nv 0 0 1\nv 1 0 1\nv 0 1 1\nf 4 5 6\n",
    )
    .unwrap();

    let (mut engine, log) = engine();
    let (mut scene, _, cube) = basic_scene();
    scene.mesh_mut(cube).unwrap().is_visible = false;
    let imported = import_mesh(&mut scene, &mut engine, &path).unwrap();
    assert_eq!(imported.meshes.len(), 2);

    scene.render_with_delta(&mut engine, 16.0).unwrap();
    assert_eq!(log.draws().len(), 2);
}

//! Windowed runner
//!
//! Opens a winit window, creates a wgpu-backed [`Engine`], lets the caller
//! build a [`Scene`] and renders it until the window closes.

use std::sync::Arc;

use anyhow::Context;
use log::{error, info};
use winit::{
    application::ApplicationHandler,
    dpi::{LogicalSize, PhysicalPosition, PhysicalSize},
    event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes, WindowId},
};

use crate::cameras::{CameraInputEvent, PointerButton};
use crate::engine::{Engine, EngineOptions, WgpuBackend};
use crate::maths::Color4;
use crate::scene::Scene;

type CreateScene = Box<dyn FnOnce(&mut Engine) -> anyhow::Result<Scene>>;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    /// Overrides the scene clear color when set
    pub clear_color: Option<Color4>,
    pub engine: EngineOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Babylon Native".to_string(),
            width: 1200,
            height: 800,
            vsync: true,
            clear_color: None,
            engine: EngineOptions::default(),
        }
    }
}

impl AppConfig {
    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_clear_color(mut self, color: Color4) -> Self {
        self.clear_color = Some(color);
        self
    }

    fn present_mode(&self) -> wgpu::PresentMode {
        if self.vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        }
    }
}

pub struct App {
    config: AppConfig,
    event_loop: EventLoop<()>,
}

impl App {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        // Ignore a logger installed by the host application
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init();
        let event_loop = EventLoop::new().context("failed to create the event loop")?;
        Ok(Self { config, event_loop })
    }

    /// Runs until the window closes; `create_scene` is called once the
    /// engine exists
    pub fn run<F>(self, create_scene: F) -> anyhow::Result<()>
    where
        F: FnOnce(&mut Engine) -> anyhow::Result<Scene> + 'static,
    {
        let mut state = AppState {
            config: self.config,
            create_scene: Some(Box::new(create_scene)),
            window: None,
            engine: None,
            scene: None,
            cursor: PhysicalPosition::new(0.0, 0.0),
            failure: None,
        };
        self.event_loop.set_control_flow(ControlFlow::Poll);
        self.event_loop
            .run_app(&mut state)
            .context("event loop terminated abnormally")?;
        match state.failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct AppState {
    config: AppConfig,
    create_scene: Option<CreateScene>,
    window: Option<Arc<Window>>,
    engine: Option<Engine>,
    scene: Option<Scene>,
    cursor: PhysicalPosition<f64>,
    failure: Option<anyhow::Error>,
}

impl AppState {
    fn init(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let attributes = WindowAttributes::default()
            .with_title(self.config.title.clone())
            .with_inner_size(LogicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .context("failed to create the window")?,
        );
        let PhysicalSize { width, height } = window.inner_size();
        let backend = pollster::block_on(WgpuBackend::new(
            window.clone(),
            width,
            height,
            self.config.present_mode(),
        ))?;

        let mut options = self.config.engine.clone();
        options.device_pixel_ratio = window.scale_factor() as f32;
        let mut engine = Engine::new(Box::new(backend), options);
        engine.resize(width, height);

        let create_scene = self
            .create_scene
            .take()
            .context("the scene was already created")?;
        let mut scene = create_scene(&mut engine)?;
        if let Some(color) = self.config.clear_color {
            scene.clear_color = color;
        }
        if let Some(camera) = scene.active_camera.and_then(|id| scene.camera_mut(id)) {
            camera.inputs.attach_element(false);
        }
        info!("Scene ready with {} nodes", scene.node_count());

        self.window = Some(window);
        self.engine = Some(engine);
        self.scene = Some(scene);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{:#}", err);
        self.failure = Some(err);
        event_loop.exit();
    }

    fn camera_input(&mut self, event: CameraInputEvent) {
        if let Some(scene) = self.scene.as_mut() {
            scene.handle_camera_input(&event);
        }
    }
}

fn pointer_button(button: MouseButton) -> Option<PointerButton> {
    match button {
        MouseButton::Left => Some(PointerButton::Left),
        MouseButton::Middle => Some(PointerButton::Middle),
        MouseButton::Right => Some(PointerButton::Right),
        _ => None,
    }
}

/// Wheel delta in 120-per-notch units
fn wheel_delta(delta: MouseScrollDelta) -> f32 {
    match delta {
        MouseScrollDelta::LineDelta(_, y) => y * 120.0,
        MouseScrollDelta::PixelDelta(position) => position.y as f32,
    }
}

impl ApplicationHandler for AppState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.init(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput { event, .. } => {
                if event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    event_loop.exit();
                }
            }
            WindowEvent::Resized(PhysicalSize { width, height }) => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.resize(width, height);
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = position;
                self.camera_input(CameraInputEvent::PointerMove {
                    x: position.x as f32,
                    y: position.y as f32,
                });
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let Some(button) = pointer_button(button) else {
                    return;
                };
                let event = match state {
                    ElementState::Pressed => CameraInputEvent::PointerDown {
                        button,
                        x: self.cursor.x as f32,
                        y: self.cursor.y as f32,
                    },
                    ElementState::Released => CameraInputEvent::PointerUp { button },
                };
                self.camera_input(event);
            }
            WindowEvent::MouseWheel { delta, .. } => {
                self.camera_input(CameraInputEvent::Wheel {
                    delta: wheel_delta(delta),
                });
            }
            WindowEvent::ModifiersChanged(modifiers) => {
                let state = modifiers.state();
                self.camera_input(CameraInputEvent::Modifiers {
                    shift: state.shift_key(),
                    ctrl: state.control_key(),
                    alt: state.alt_key(),
                });
            }
            WindowEvent::Focused(false) => self.camera_input(CameraInputEvent::Blur),
            WindowEvent::RedrawRequested => {
                let (Some(engine), Some(scene)) = (self.engine.as_mut(), self.scene.as_mut()) else {
                    return;
                };
                if let Err(err) = scene.render(engine) {
                    error!("Frame failed: {}", err);
                }
            }
            _ => (),
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let (Some(engine), Some(scene)) = (self.engine.as_mut(), self.scene.as_mut()) {
            scene.dispose(engine);
        }
        info!("Shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = AppConfig::default()
            .with_title("viewer")
            .with_size(640, 480)
            .with_vsync(false);
        assert_eq!(config.title, "viewer");
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.present_mode(), wgpu::PresentMode::AutoNoVsync);
        assert!(config.clear_color.is_none());
    }

    #[test]
    fn test_wheel_delta_in_notches() {
        assert_eq!(wheel_delta(MouseScrollDelta::LineDelta(0.0, 1.0)), 120.0);
        assert_eq!(
            wheel_delta(MouseScrollDelta::PixelDelta(PhysicalPosition::new(0.0, -30.0))),
            -30.0
        );
    }
}

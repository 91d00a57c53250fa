//! Cameras: view/projection computation and attached post processes

use cgmath::{
    perspective, ortho, EuclideanSpace, InnerSpace, Matrix4, Point3, Rad, SquareMatrix, Transform,
    Vector3, Zero,
};
use log::warn;

use crate::cameras::arc_rotate::ArcRotateCamera;
use crate::cameras::inputs::{CameraInputEvent, CameraInputsManager};
use crate::maths::Viewport;
use crate::postprocesses::PostProcessId;
use crate::scene::NodeId;

/// Converts cgmath's OpenGL clip space (z in -1..1) to wgpu's (z in 0..1)
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraMode {
    #[default]
    Perspective,
    Orthographic,
}

/// Explicit orthographic frustum; missing sides follow the render size
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OrthoBounds {
    pub left: Option<f32>,
    pub right: Option<f32>,
    pub top: Option<f32>,
    pub bottom: Option<f32>,
}

/// Camera state frozen for one render, handed to post processes and layers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSnapshot {
    pub id: Option<NodeId>,
    pub position: Point3<f32>,
    pub view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
    pub fov: f32,
    pub min_z: f32,
    pub max_z: f32,
    pub viewport: Viewport,
    pub mode: CameraMode,
    pub layer_mask: u32,
}

impl Default for CameraSnapshot {
    fn default() -> Self {
        Self {
            id: None,
            position: Point3::origin(),
            view: Matrix4::identity(),
            projection: Matrix4::identity(),
            fov: 0.8,
            min_z: 1.0,
            max_z: 10000.0,
            viewport: Viewport::default(),
            mode: CameraMode::Perspective,
            layer_mask: u32::MAX,
        }
    }
}

impl CameraSnapshot {
    pub fn view_projection(&self) -> Matrix4<f32> {
        self.projection * self.view
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ProjectionKey {
    aspect: f32,
    fov: f32,
    min_z: f32,
    max_z: f32,
    mode: CameraMode,
    ortho: OrthoBounds,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ViewKey {
    position: Vector3<f32>,
    target: Vector3<f32>,
    up: Vector3<f32>,
    parent: Option<Matrix4<f32>>,
}

/// Camera data carried by a camera node
#[derive(Debug)]
pub struct Camera {
    /// Position relative to the parent node
    pub position: Vector3<f32>,
    pub target: Vector3<f32>,
    pub up_vector: Vector3<f32>,
    /// Vertical field of view in radians
    pub fov: f32,
    pub min_z: f32,
    pub max_z: f32,
    pub mode: CameraMode,
    pub ortho: OrthoBounds,
    pub viewport: Viewport,
    pub layer_mask: u32,
    pub inertia: f32,
    pub inputs: CameraInputsManager,
    arc_rotate: Option<ArcRotateCamera>,
    post_processes: Vec<PostProcessId>,
    view_cache: Option<(ViewKey, Matrix4<f32>)>,
    projection_cache: Option<(ProjectionKey, Matrix4<f32>)>,
    global_position: Point3<f32>,
}

impl Camera {
    /// A camera at `position` looking at `target`
    pub fn new_target(position: Vector3<f32>, target: Vector3<f32>) -> Self {
        Self {
            position,
            target,
            up_vector: Vector3::unit_y(),
            fov: 0.8,
            min_z: 1.0,
            max_z: 10000.0,
            mode: CameraMode::Perspective,
            ortho: OrthoBounds::default(),
            viewport: Viewport::default(),
            layer_mask: 0x0FFF_FFFF,
            inertia: 0.9,
            inputs: CameraInputsManager::new(),
            arc_rotate: None,
            post_processes: Vec::new(),
            view_cache: None,
            projection_cache: None,
            global_position: Point3::from_vec(position),
        }
    }

    /// An orbiting camera with the default pointer and wheel inputs
    pub fn new_arc_rotate(alpha: f32, beta: f32, radius: f32, target: Vector3<f32>) -> Self {
        let orbit = ArcRotateCamera::new(alpha, beta, radius);
        let mut camera = Self::new_target(orbit.eye_position(target), target);
        camera.min_z = 0.1;
        camera.arc_rotate = Some(orbit);
        camera.inputs.add_arc_rotate_defaults();
        camera
    }

    pub fn get_class_name(&self) -> &'static str {
        if self.arc_rotate.is_some() {
            "ArcRotateCamera"
        } else {
            "TargetCamera"
        }
    }

    pub fn arc_rotate(&self) -> Option<&ArcRotateCamera> {
        self.arc_rotate.as_ref()
    }

    pub fn arc_rotate_mut(&mut self) -> Option<&mut ArcRotateCamera> {
        self.arc_rotate.as_mut()
    }

    pub fn global_position(&self) -> Point3<f32> {
        self.global_position
    }

    /// Post processes in chain order
    pub fn post_processes(&self) -> &[PostProcessId] {
        &self.post_processes
    }

    /// Attaches a post process, appended or inserted at `insert_at`
    ///
    /// Returns the index the post process ends up at.
    pub fn attach_post_process(
        &mut self,
        post_process: PostProcessId,
        insert_at: Option<usize>,
    ) -> usize {
        if let Some(index) = self.post_processes.iter().position(|id| *id == post_process) {
            warn!("Post process is already attached to this camera");
            return index;
        }
        match insert_at {
            Some(index) if index < self.post_processes.len() => {
                self.post_processes.insert(index, post_process);
                index
            }
            _ => {
                self.post_processes.push(post_process);
                self.post_processes.len() - 1
            }
        }
    }

    /// Returns false if the post process was not attached
    pub fn detach_post_process(&mut self, post_process: PostProcessId) -> bool {
        match self.post_processes.iter().position(|id| *id == post_process) {
            Some(index) => {
                self.post_processes.remove(index);
                true
            }
            None => false,
        }
    }

    /// Forwards a window event to the attached inputs
    pub fn handle_input(&mut self, event: &CameraInputEvent) -> bool {
        self.inputs.handle_event(event)
    }

    /// Lets inputs move the camera, then applies orbit inertia and limits
    pub fn check_inputs(&mut self) {
        let mut inputs = std::mem::take(&mut self.inputs);
        inputs.check_inputs(self);
        self.inputs = inputs;

        let inertia = self.inertia;
        if let Some(orbit) = self.arc_rotate.as_mut() {
            let target = orbit.apply_inertia(inertia, self.position, self.target, self.up_vector);
            self.target = target;
            self.position = orbit.eye_position(target);
        }
    }

    /// Recomputes the view matrix and global position when anything moved
    pub fn update(&mut self, parent_world: Option<Matrix4<f32>>) {
        let key = ViewKey {
            position: self.position,
            target: self.target,
            up: self.up_vector,
            parent: parent_world,
        };
        if self.view_cache.is_some_and(|(cached, _)| cached == key) {
            return;
        }
        let (eye, target) = match parent_world {
            Some(world) => (
                world.transform_point(Point3::from_vec(self.position)),
                world.transform_point(Point3::from_vec(self.target)),
            ),
            None => (Point3::from_vec(self.position), Point3::from_vec(self.target)),
        };
        let mut up = self.up_vector;
        if (target - eye).normalize().cross(up).magnitude2() < f32::EPSILON {
            up = Vector3::unit_z();
        }
        self.global_position = eye;
        self.view_cache = Some((key, Matrix4::look_at_rh(eye, target, up)));
    }

    pub fn get_view_matrix(&mut self) -> Matrix4<f32> {
        if self.view_cache.is_none() {
            self.update(None);
        }
        self.view_cache
            .map_or_else(Matrix4::identity, |(_, view)| view)
    }

    /// Projection for a render target of the given aspect ratio, cached
    pub fn get_projection_matrix(&mut self, aspect: f32) -> Matrix4<f32> {
        let key = ProjectionKey {
            aspect,
            fov: self.fov,
            min_z: self.min_z,
            max_z: self.max_z,
            mode: self.mode,
            ortho: self.ortho,
        };
        if let Some((cached, projection)) = self.projection_cache {
            if cached == key {
                return projection;
            }
        }
        let projection = match self.mode {
            CameraMode::Perspective => {
                OPENGL_TO_WGPU_MATRIX * perspective(Rad(self.fov), aspect, self.min_z, self.max_z)
            }
            CameraMode::Orthographic => {
                let half_height = self.ortho_half_height();
                let half_width = half_height * aspect;
                OPENGL_TO_WGPU_MATRIX
                    * ortho(
                        self.ortho.left.unwrap_or(-half_width),
                        self.ortho.right.unwrap_or(half_width),
                        self.ortho.bottom.unwrap_or(-half_height),
                        self.ortho.top.unwrap_or(half_height),
                        self.min_z,
                        self.max_z,
                    )
            }
        };
        self.projection_cache = Some((key, projection));
        projection
    }

    fn ortho_half_height(&self) -> f32 {
        match (self.ortho.top, self.ortho.bottom) {
            (Some(top), Some(bottom)) => (top - bottom) * 0.5,
            _ => {
                let distance = (self.target - self.position).magnitude();
                if distance.is_zero() {
                    1.0
                } else {
                    distance * (self.fov * 0.5).tan()
                }
            }
        }
    }

    pub fn snapshot(&mut self, id: Option<NodeId>, aspect: f32) -> CameraSnapshot {
        CameraSnapshot {
            id,
            position: self.global_position,
            view: self.get_view_matrix(),
            projection: self.get_projection_matrix(aspect),
            fov: self.fov,
            min_z: self.min_z,
            max_z: self.max_z,
            viewport: self.viewport,
            mode: self.mode,
            layer_mask: self.layer_mask,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cameras::inputs::PointerButton;
    use cgmath::Vector4;

    #[test]
    fn test_attach_post_process_order() {
        let mut keys = slotmap::SlotMap::<PostProcessId, ()>::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let c = keys.insert(());
        let mut camera = Camera::new_target(Vector3::new(0.0, 0.0, 5.0), Vector3::zero());
        assert_eq!(camera.attach_post_process(a, None), 0);
        assert_eq!(camera.attach_post_process(b, None), 1);
        assert_eq!(camera.attach_post_process(c, Some(0)), 0);
        assert_eq!(camera.post_processes(), &[c, a, b]);
        assert!(camera.detach_post_process(a));
        assert!(!camera.detach_post_process(a));
        assert_eq!(camera.post_processes(), &[c, b]);
    }

    #[test]
    fn test_target_projects_to_screen_center() {
        let mut camera = Camera::new_target(Vector3::new(0.0, 0.0, 10.0), Vector3::zero());
        camera.update(None);
        let view_projection = camera.get_projection_matrix(1.5) * camera.get_view_matrix();
        let clip = view_projection * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert!((clip.x / clip.w).abs() < 1e-5);
        assert!((clip.y / clip.w).abs() < 1e-5);
        let depth = clip.z / clip.w;
        assert!((0.0..=1.0).contains(&depth));
    }

    #[test]
    fn test_projection_cache_follows_settings() {
        let mut camera = Camera::new_target(Vector3::new(0.0, 0.0, 10.0), Vector3::zero());
        let first = camera.get_projection_matrix(1.0);
        assert_eq!(camera.get_projection_matrix(1.0), first);
        camera.fov = 1.2;
        assert_ne!(camera.get_projection_matrix(1.0), first);
    }

    #[test]
    fn test_parent_moves_global_position() {
        let mut camera = Camera::new_target(Vector3::new(0.0, 0.0, 10.0), Vector3::zero());
        camera.update(Some(Matrix4::from_translation(Vector3::new(1.0, 2.0, 3.0))));
        assert_eq!(camera.global_position(), Point3::new(1.0, 2.0, 13.0));
    }

    #[test]
    fn test_arc_rotate_drag_orbits_camera() {
        let mut camera =
            Camera::new_arc_rotate(0.0, std::f32::consts::FRAC_PI_2, 10.0, Vector3::zero());
        camera.inputs.attach_element(false);
        let before = camera.position;
        camera.handle_input(&CameraInputEvent::PointerDown {
            button: PointerButton::Left,
            x: 100.0,
            y: 100.0,
        });
        camera.handle_input(&CameraInputEvent::PointerMove { x: 300.0, y: 100.0 });
        camera.check_inputs();
        assert_ne!(camera.position, before);
        assert!((camera.position.magnitude() - 10.0).abs() < 1e-3);
    }
}

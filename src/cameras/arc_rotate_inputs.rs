//! Pointer drag and mouse wheel inputs of arc rotate cameras

use std::any::Any;

use crate::cameras::camera::Camera;
use crate::cameras::inputs::{CameraInput, CameraInputEvent, CameraInputsManager, PointerButton};

impl CameraInputsManager {
    /// Adds the pointer and wheel inputs every arc rotate camera starts with
    pub fn add_arc_rotate_defaults(&mut self) {
        self.add(Box::new(ArcRotateCameraPointersInput::default()));
        self.add(Box::new(ArcRotateCameraMouseWheelInput::default()));
    }
}

/// Drag to orbit; right button, shift or ctrl drag to pan
#[derive(Debug, Clone)]
pub struct ArcRotateCameraPointersInput {
    /// Pixels of horizontal drag per radian
    pub angular_sensibility_x: f32,
    pub angular_sensibility_y: f32,
    /// Pixels of drag per unit of panning; zero disables panning
    pub panning_sensibility: f32,
    pub use_ctrl_for_panning: bool,
    attached: bool,
    pressed: Option<PointerButton>,
    last_position: Option<(f32, f32)>,
    is_shift_held: bool,
    is_ctrl_held: bool,
    rotation_delta: (f32, f32),
    panning_delta: (f32, f32),
}

impl Default for ArcRotateCameraPointersInput {
    fn default() -> Self {
        Self {
            angular_sensibility_x: 1000.0,
            angular_sensibility_y: 1000.0,
            panning_sensibility: 1000.0,
            use_ctrl_for_panning: true,
            attached: false,
            pressed: None,
            last_position: None,
            is_shift_held: false,
            is_ctrl_held: false,
            rotation_delta: (0.0, 0.0),
            panning_delta: (0.0, 0.0),
        }
    }
}

impl ArcRotateCameraPointersInput {
    /// Returns true if the current drag pans instead of rotating
    pub fn is_panning(&self) -> bool {
        match self.pressed {
            Some(PointerButton::Right) => self.panning_sensibility != 0.0,
            Some(_) => {
                self.panning_sensibility != 0.0
                    && (self.is_shift_held || (self.use_ctrl_for_panning && self.is_ctrl_held))
            }
            None => false,
        }
    }

    pub fn is_rotating(&self) -> bool {
        self.pressed.is_some() && !self.is_panning()
    }
}

impl CameraInput for ArcRotateCameraPointersInput {
    fn class_name(&self) -> &'static str {
        "ArcRotateCameraPointersInput"
    }

    fn simple_name(&self) -> &'static str {
        "pointers"
    }

    fn attach_control(&mut self, _no_prevent_default: bool) {
        self.attached = true;
    }

    fn detach_control(&mut self) {
        self.attached = false;
        self.pressed = None;
        self.last_position = None;
        self.rotation_delta = (0.0, 0.0);
        self.panning_delta = (0.0, 0.0);
    }

    fn handle_event(&mut self, event: &CameraInputEvent) -> bool {
        if !self.attached {
            return false;
        }
        match *event {
            CameraInputEvent::PointerDown { button, x, y } => {
                self.pressed = Some(button);
                self.last_position = Some((x, y));
                true
            }
            CameraInputEvent::PointerUp { button } => {
                if self.pressed == Some(button) {
                    self.pressed = None;
                    self.last_position = None;
                }
                true
            }
            CameraInputEvent::PointerMove { x, y } => {
                let Some((last_x, last_y)) = self.last_position else {
                    return false;
                };
                if self.pressed.is_none() {
                    return false;
                }
                let offset = (x - last_x, y - last_y);
                self.last_position = Some((x, y));
                if self.is_panning() {
                    self.panning_delta.0 += offset.0;
                    self.panning_delta.1 += offset.1;
                } else {
                    self.rotation_delta.0 += offset.0;
                    self.rotation_delta.1 += offset.1;
                }
                true
            }
            CameraInputEvent::Modifiers { shift, ctrl, .. } => {
                self.is_shift_held = shift;
                self.is_ctrl_held = ctrl;
                false
            }
            CameraInputEvent::Blur => {
                self.pressed = None;
                self.last_position = None;
                false
            }
            CameraInputEvent::Wheel { .. } => false,
        }
    }

    fn has_check_inputs(&self) -> bool {
        true
    }

    fn check_inputs(&mut self, camera: &mut Camera) {
        let Some(orbit) = camera.arc_rotate_mut() else {
            return;
        };
        let (dx, dy) = std::mem::take(&mut self.rotation_delta);
        orbit.inertial_alpha_offset -= dx / self.angular_sensibility_x;
        orbit.inertial_beta_offset -= dy / self.angular_sensibility_y;
        let (px, py) = std::mem::take(&mut self.panning_delta);
        if self.panning_sensibility != 0.0 {
            orbit.inertial_panning_x += -px / self.panning_sensibility;
            orbit.inertial_panning_y += py / self.panning_sensibility;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Wheel zoom, either a fixed step or a percentage of the radius
#[derive(Debug, Clone)]
pub struct ArcRotateCameraMouseWheelInput {
    /// Higher values zoom slower
    pub wheel_precision: f32,
    /// When non-zero, each notch moves this fraction of the radius
    pub wheel_delta_percentage: f32,
    attached: bool,
    pending: f32,
}

impl Default for ArcRotateCameraMouseWheelInput {
    fn default() -> Self {
        Self {
            wheel_precision: 3.0,
            wheel_delta_percentage: 0.0,
            attached: false,
            pending: 0.0,
        }
    }
}

impl CameraInput for ArcRotateCameraMouseWheelInput {
    fn class_name(&self) -> &'static str {
        "ArcRotateCameraMouseWheelInput"
    }

    fn simple_name(&self) -> &'static str {
        "mousewheel"
    }

    fn attach_control(&mut self, _no_prevent_default: bool) {
        self.attached = true;
    }

    fn detach_control(&mut self) {
        self.attached = false;
        self.pending = 0.0;
    }

    fn handle_event(&mut self, event: &CameraInputEvent) -> bool {
        match event {
            CameraInputEvent::Wheel { delta } if self.attached => {
                self.pending += delta;
                true
            }
            _ => false,
        }
    }

    fn has_check_inputs(&self) -> bool {
        true
    }

    fn check_inputs(&mut self, camera: &mut Camera) {
        let wheel = std::mem::take(&mut self.pending);
        if wheel == 0.0 {
            return;
        }
        let Some(orbit) = camera.arc_rotate_mut() else {
            return;
        };
        let delta = if self.wheel_delta_percentage != 0.0 {
            wheel * 0.01 * self.wheel_delta_percentage * orbit.radius
        } else {
            wheel / (self.wheel_precision * 40.0)
        };
        orbit.inertial_radius_offset += delta;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Vector3, Zero};

    fn camera() -> Camera {
        let mut camera = Camera::new_arc_rotate(0.0, 1.0, 10.0, Vector3::zero());
        camera.inputs.attach_element(false);
        camera
    }

    #[test]
    fn test_wheel_zooms_in() {
        let mut camera = camera();
        camera.handle_input(&CameraInputEvent::Wheel { delta: 120.0 });
        camera.check_inputs();
        let radius = camera.arc_rotate().map(|orbit| orbit.radius).unwrap_or_default();
        assert!(radius < 10.0);
    }

    #[test]
    fn test_wheel_percentage_scales_with_radius() {
        let mut camera = camera();
        let mut input = ArcRotateCameraMouseWheelInput {
            wheel_delta_percentage: 0.1,
            ..Default::default()
        };
        input.attach_control(false);
        input.handle_event(&CameraInputEvent::Wheel { delta: 1.0 });
        input.check_inputs(&mut camera);
        let offset = camera
            .arc_rotate()
            .map(|orbit| orbit.inertial_radius_offset)
            .unwrap_or_default();
        assert!((offset - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_shift_drag_pans() {
        let mut input = ArcRotateCameraPointersInput::default();
        input.attach_control(false);
        input.handle_event(&CameraInputEvent::Modifiers {
            shift: true,
            ctrl: false,
            alt: false,
        });
        input.handle_event(&CameraInputEvent::PointerDown {
            button: PointerButton::Left,
            x: 0.0,
            y: 0.0,
        });
        assert!(input.is_panning());
        input.handle_event(&CameraInputEvent::PointerMove { x: 0.0, y: 50.0 });
        let mut camera = Camera::new_arc_rotate(0.0, 1.0, 10.0, Vector3::zero());
        input.check_inputs(&mut camera);
        let orbit = camera.arc_rotate().copied().unwrap_or_else(|| unreachable!());
        assert!((orbit.inertial_panning_y - 0.05).abs() < 1e-6);
        assert_eq!(orbit.inertial_alpha_offset, 0.0);
    }

    #[test]
    fn test_release_stops_drag() {
        let mut input = ArcRotateCameraPointersInput::default();
        input.attach_control(false);
        input.handle_event(&CameraInputEvent::PointerDown {
            button: PointerButton::Left,
            x: 0.0,
            y: 0.0,
        });
        assert!(input.is_rotating());
        input.handle_event(&CameraInputEvent::PointerUp {
            button: PointerButton::Left,
        });
        assert!(!input.handle_event(&CameraInputEvent::PointerMove { x: 5.0, y: 5.0 }));
    }
}

//! Camera inputs and the manager attaching them to a window

use std::any::Any;
use std::fmt;

use log::{debug, warn};

use crate::cameras::camera::Camera;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerButton {
    Left,
    Middle,
    Right,
}

/// Window events camera inputs react to
///
/// The app runner converts winit events into these so inputs stay
/// independent of the windowing library.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraInputEvent {
    PointerDown { button: PointerButton, x: f32, y: f32 },
    PointerUp { button: PointerButton },
    PointerMove { x: f32, y: f32 },
    /// Wheel movement, 120 units per notch, positive away from the user
    Wheel { delta: f32 },
    Modifiers { shift: bool, ctrl: bool, alt: bool },
    /// The window lost focus; pending drags are cancelled
    Blur,
}

/// A source of camera movement
pub trait CameraInput: Any {
    fn class_name(&self) -> &'static str;

    /// Short name used to find the input in its manager
    fn simple_name(&self) -> &'static str;

    fn attach_control(&mut self, no_prevent_default: bool);

    fn detach_control(&mut self);

    /// Records an event; returns true when the input used it
    fn handle_event(&mut self, _event: &CameraInputEvent) -> bool {
        false
    }

    fn has_check_inputs(&self) -> bool {
        false
    }

    /// Moves the camera from the events recorded since the last frame
    fn check_inputs(&mut self, _camera: &mut Camera) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Inputs of one camera, attached to the window together
#[derive(Default)]
pub struct CameraInputsManager {
    attached: Vec<Box<dyn CameraInput>>,
    element_attached: bool,
    no_prevent_default: bool,
}

impl fmt::Debug for CameraInputsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraInputsManager")
            .field("inputs", &self.names())
            .field("element_attached", &self.element_attached)
            .finish()
    }
}

impl CameraInputsManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.attached.iter().map(|input| input.simple_name()).collect()
    }

    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }

    pub fn is_element_attached(&self) -> bool {
        self.element_attached
    }

    pub fn get(&self, simple_name: &str) -> Option<&dyn CameraInput> {
        self.attached
            .iter()
            .find(|input| input.simple_name() == simple_name)
            .map(|input| input.as_ref())
    }

    /// Typed access to an input, e.g. to tune its sensibility
    pub fn get_mut<T: CameraInput>(&mut self) -> Option<&mut T> {
        self.attached
            .iter_mut()
            .find_map(|input| input.as_any_mut().downcast_mut::<T>())
    }

    /// Adds an input; an input with the same simple name is kept instead
    pub fn add(&mut self, mut input: Box<dyn CameraInput>) {
        if self.get(input.simple_name()).is_some() {
            warn!("Camera input named '{}' already exists", input.simple_name());
            return;
        }
        if self.element_attached {
            input.attach_control(self.no_prevent_default);
        }
        self.attached.push(input);
    }

    /// Detaches and removes the input with this simple name
    pub fn remove(&mut self, simple_name: &str) -> Option<Box<dyn CameraInput>> {
        let index = self
            .attached
            .iter()
            .position(|input| input.simple_name() == simple_name)?;
        let mut input = self.attached.remove(index);
        input.detach_control();
        Some(input)
    }

    /// Removes every input of a class; returns how many were removed
    pub fn remove_by_type(&mut self, class_name: &str) -> usize {
        let before = self.attached.len();
        self.attached.retain_mut(|input| {
            if input.class_name() == class_name {
                input.detach_control();
                false
            } else {
                true
            }
        });
        before - self.attached.len()
    }

    /// Attaches a single input if the manager is attached to the window
    pub fn attach_input(&mut self, simple_name: &str) {
        if !self.element_attached {
            return;
        }
        let no_prevent_default = self.no_prevent_default;
        if let Some(input) = self
            .attached
            .iter_mut()
            .find(|input| input.simple_name() == simple_name)
        {
            input.attach_control(no_prevent_default);
        }
    }

    pub fn attach_element(&mut self, no_prevent_default: bool) {
        if self.element_attached {
            return;
        }
        self.element_attached = true;
        self.no_prevent_default = no_prevent_default;
        for input in &mut self.attached {
            input.attach_control(no_prevent_default);
        }
        debug!("Attached camera inputs {:?}", self.names());
    }

    pub fn detach_element(&mut self) {
        for input in &mut self.attached {
            input.detach_control();
        }
        self.element_attached = false;
    }

    /// Dispatches an event to every input; true if one used it
    pub fn handle_event(&mut self, event: &CameraInputEvent) -> bool {
        if !self.element_attached {
            return false;
        }
        let mut handled = false;
        for input in &mut self.attached {
            handled |= input.handle_event(event);
        }
        handled
    }

    pub fn check_inputs(&mut self, camera: &mut Camera) {
        for input in &mut self.attached {
            if input.has_check_inputs() {
                input.check_inputs(camera);
            }
        }
    }

    pub fn clear(&mut self) {
        self.detach_element();
        self.attached.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cameras::arc_rotate_inputs::{
        ArcRotateCameraMouseWheelInput, ArcRotateCameraPointersInput,
    };

    #[test]
    fn test_add_is_unique_by_name() {
        let mut inputs = CameraInputsManager::new();
        inputs.add(Box::new(ArcRotateCameraPointersInput::default()));
        inputs.add(Box::new(ArcRotateCameraPointersInput::default()));
        inputs.add(Box::new(ArcRotateCameraMouseWheelInput::default()));
        assert_eq!(inputs.names(), vec!["pointers", "mousewheel"]);
    }

    #[test]
    fn test_events_need_attached_element() {
        let mut inputs = CameraInputsManager::new();
        inputs.add(Box::new(ArcRotateCameraMouseWheelInput::default()));
        let wheel = CameraInputEvent::Wheel { delta: 120.0 };
        assert!(!inputs.handle_event(&wheel));
        inputs.attach_element(false);
        assert!(inputs.handle_event(&wheel));
        inputs.detach_element();
        assert!(!inputs.handle_event(&wheel));
    }

    #[test]
    fn test_remove_by_type_and_clear() {
        let mut inputs = CameraInputsManager::new();
        inputs.add(Box::new(ArcRotateCameraPointersInput::default()));
        inputs.add(Box::new(ArcRotateCameraMouseWheelInput::default()));
        assert_eq!(inputs.remove_by_type("ArcRotateCameraMouseWheelInput"), 1);
        assert!(inputs.remove("mousewheel").is_none());
        assert!(inputs.remove("pointers").is_some());
        inputs.add(Box::new(ArcRotateCameraPointersInput::default()));
        inputs.clear();
        assert!(inputs.is_empty());
    }

    #[test]
    fn test_typed_access() {
        let mut inputs = CameraInputsManager::new();
        inputs.add(Box::new(ArcRotateCameraMouseWheelInput::default()));
        let wheel = inputs
            .get_mut::<ArcRotateCameraMouseWheelInput>()
            .expect("wheel input");
        wheel.wheel_precision = 10.0;
        assert!(inputs.get_mut::<ArcRotateCameraPointersInput>().is_none());
    }
}

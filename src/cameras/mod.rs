//! Cameras and the inputs that move them

pub mod arc_rotate;
pub mod arc_rotate_inputs;
pub mod camera;
pub mod inputs;

pub use arc_rotate::ArcRotateCamera;
pub use arc_rotate_inputs::{ArcRotateCameraMouseWheelInput, ArcRotateCameraPointersInput};
pub use camera::{Camera, CameraMode, CameraSnapshot, OrthoBounds, OPENGL_TO_WGPU_MATRIX};
pub use inputs::{CameraInput, CameraInputEvent, CameraInputsManager, PointerButton};

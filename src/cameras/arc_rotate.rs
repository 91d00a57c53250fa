//! Orbit state of a camera rotating around its target

use std::f32::consts::PI;

use cgmath::{InnerSpace, Vector3};

use crate::maths::EPSILON;

/// Angles and limits of an arc rotate camera
///
/// `alpha` turns around the vertical axis, `beta` is measured from the up
/// axis and `radius` is the distance to the target. Inputs write inertial
/// offsets which decay by the camera inertia every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArcRotateCamera {
    pub alpha: f32,
    pub beta: f32,
    pub radius: f32,
    pub lower_alpha_limit: Option<f32>,
    pub upper_alpha_limit: Option<f32>,
    pub lower_beta_limit: Option<f32>,
    pub upper_beta_limit: Option<f32>,
    pub lower_radius_limit: Option<f32>,
    pub upper_radius_limit: Option<f32>,
    pub inertial_alpha_offset: f32,
    pub inertial_beta_offset: f32,
    pub inertial_radius_offset: f32,
    pub inertial_panning_x: f32,
    pub inertial_panning_y: f32,
    pub panning_inertia: f32,
    pub allow_upside_down: bool,
}

impl ArcRotateCamera {
    pub fn new(alpha: f32, beta: f32, radius: f32) -> Self {
        let mut orbit = Self {
            alpha,
            beta,
            radius,
            lower_alpha_limit: None,
            upper_alpha_limit: None,
            lower_beta_limit: Some(0.01),
            upper_beta_limit: Some(PI - 0.01),
            lower_radius_limit: None,
            upper_radius_limit: None,
            inertial_alpha_offset: 0.0,
            inertial_beta_offset: 0.0,
            inertial_radius_offset: 0.0,
            inertial_panning_x: 0.0,
            inertial_panning_y: 0.0,
            panning_inertia: 0.9,
            allow_upside_down: true,
        };
        orbit.check_limits();
        orbit
    }

    /// Eye position on the sphere around `target`
    pub fn eye_position(&self, target: Vector3<f32>) -> Vector3<f32> {
        let radius = if self.radius == 0.0 { 0.0001 } else { self.radius };
        Vector3::new(
            radius * self.alpha.cos() * self.beta.sin(),
            radius * self.beta.cos(),
            radius * self.alpha.sin() * self.beta.sin(),
        ) + target
    }

    /// Clamps the angles and radius into their limits
    pub fn check_limits(&mut self) {
        match self.lower_beta_limit {
            Some(lower) if self.beta < lower => self.beta = lower,
            None if self.allow_upside_down && self.beta > PI => self.beta -= 2.0 * PI,
            _ => {}
        }
        match self.upper_beta_limit {
            Some(upper) if self.beta > upper => self.beta = upper,
            None if self.allow_upside_down && self.beta < -PI => self.beta += 2.0 * PI,
            _ => {}
        }
        if let Some(lower) = self.lower_alpha_limit {
            if self.alpha < lower {
                self.alpha = lower;
            }
        }
        if let Some(upper) = self.upper_alpha_limit {
            if self.alpha > upper {
                self.alpha = upper;
            }
        }
        if let Some(lower) = self.lower_radius_limit {
            if self.radius < lower {
                self.radius = lower;
                self.inertial_radius_offset = 0.0;
            }
        }
        if let Some(upper) = self.upper_radius_limit {
            if self.radius > upper {
                self.radius = upper;
                self.inertial_radius_offset = 0.0;
            }
        }
    }

    /// Applies pending offsets, decays them and returns the panned target
    pub fn apply_inertia(
        &mut self,
        inertia: f32,
        position: Vector3<f32>,
        target: Vector3<f32>,
        up: Vector3<f32>,
    ) -> Vector3<f32> {
        if self.inertial_alpha_offset != 0.0
            || self.inertial_beta_offset != 0.0
            || self.inertial_radius_offset != 0.0
        {
            let direction = if self.beta.sin() < 0.0 { -1.0 } else { 1.0 };
            self.alpha += self.inertial_alpha_offset * direction;
            self.beta += self.inertial_beta_offset;
            self.radius -= self.inertial_radius_offset;
            self.inertial_alpha_offset *= inertia;
            self.inertial_beta_offset *= inertia;
            self.inertial_radius_offset *= inertia;
            if self.inertial_alpha_offset.abs() < EPSILON {
                self.inertial_alpha_offset = 0.0;
            }
            if self.inertial_beta_offset.abs() < EPSILON {
                self.inertial_beta_offset = 0.0;
            }
            if self.inertial_radius_offset.abs() < EPSILON {
                self.inertial_radius_offset = 0.0;
            }
        }

        let mut target = target;
        if self.inertial_panning_x != 0.0 || self.inertial_panning_y != 0.0 {
            target += self.pan_offset(position, target, up);
            self.inertial_panning_x *= self.panning_inertia;
            self.inertial_panning_y *= self.panning_inertia;
            if self.inertial_panning_x.abs() < EPSILON {
                self.inertial_panning_x = 0.0;
            }
            if self.inertial_panning_y.abs() < EPSILON {
                self.inertial_panning_y = 0.0;
            }
        }
        self.check_limits();
        target
    }

    /// Movement of the target in the camera's screen plane
    fn pan_offset(&self, position: Vector3<f32>, target: Vector3<f32>, up: Vector3<f32>) -> Vector3<f32> {
        let forward = target - position;
        if forward.magnitude2() <= f32::EPSILON {
            return Vector3::new(0.0, 0.0, 0.0);
        }
        let forward = forward.normalize();
        let right = forward.cross(up);
        if right.magnitude2() <= f32::EPSILON {
            return Vector3::new(0.0, 0.0, 0.0);
        }
        let right = right.normalize();
        let camera_up = right.cross(forward).normalize();
        // Scale by distance so panning feels the same at every zoom level
        let scale = self.radius.max(1.0);
        (right * -self.inertial_panning_x + camera_up * self.inertial_panning_y) * scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_eye_position_on_sphere() {
        let orbit = ArcRotateCamera::new(0.0, FRAC_PI_2, 5.0);
        let eye = orbit.eye_position(Vector3::new(1.0, 0.0, 0.0));
        assert!((eye - Vector3::new(6.0, 0.0, 0.0)).magnitude() < 1e-5);
    }

    #[test]
    fn test_limits_clamp() {
        let mut orbit = ArcRotateCamera::new(0.0, 0.0, 5.0);
        assert_eq!(orbit.beta, 0.01);
        orbit.lower_radius_limit = Some(2.0);
        orbit.upper_radius_limit = Some(8.0);
        orbit.radius = 20.0;
        orbit.inertial_radius_offset = 3.0;
        orbit.check_limits();
        assert_eq!(orbit.radius, 8.0);
        assert_eq!(orbit.inertial_radius_offset, 0.0);
        orbit.upper_alpha_limit = Some(1.0);
        orbit.alpha = 4.0;
        orbit.check_limits();
        assert_eq!(orbit.alpha, 1.0);
    }

    #[test]
    fn test_inertia_decays_to_zero() {
        let mut orbit = ArcRotateCamera::new(0.0, FRAC_PI_2, 5.0);
        orbit.inertial_alpha_offset = 0.1;
        let target = Vector3::new(0.0, 0.0, 0.0);
        let up = Vector3::unit_y();
        let mut frames = 0;
        while orbit.inertial_alpha_offset != 0.0 {
            let position = orbit.eye_position(target);
            orbit.apply_inertia(0.9, position, target, up);
            frames += 1;
            assert!(frames < 200);
        }
        // geometric series 0.1 / (1 - 0.9) bounded by 1.0
        assert!(orbit.alpha > 0.9 && orbit.alpha <= 1.0);
    }

    #[test]
    fn test_panning_moves_target() {
        let mut orbit = ArcRotateCamera::new(0.0, FRAC_PI_2, 5.0);
        orbit.inertial_panning_y = 0.1;
        let target = Vector3::new(0.0, 0.0, 0.0);
        let position = orbit.eye_position(target);
        let moved = orbit.apply_inertia(0.9, position, target, Vector3::unit_y());
        assert!(moved.y > 0.0);
        assert!(orbit.inertial_panning_y < 0.1);
    }
}

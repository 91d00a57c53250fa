//! Diffusion profiles used by the sub-surface scattering post process

use log::error;

use crate::maths::Color3;

/// Profiles a scene can register at once
pub const MAX_DIFFUSION_PROFILES: usize = 5;

/// Registered diffusion profiles and the world scale they are expressed in
#[derive(Debug, Clone, PartialEq)]
pub struct SubSurfaceConfiguration {
    /// Scene units per meter divisor; diffusion distances are millimeters
    pub meters_per_unit: f32,
    diffusion_s: Vec<[f32; 3]>,
    diffusion_d: Vec<f32>,
    filter_radii: Vec<f32>,
    profile_colors: Vec<Color3>,
}

impl Default for SubSurfaceConfiguration {
    fn default() -> Self {
        Self::new()
    }
}

impl SubSurfaceConfiguration {
    /// Starts with the neutral white profile at index 0
    pub fn new() -> Self {
        let mut configuration = Self {
            meters_per_unit: 1.0,
            diffusion_s: Vec::new(),
            diffusion_d: Vec::new(),
            filter_radii: Vec::new(),
            profile_colors: Vec::new(),
        };
        configuration.add_diffusion_profile(Color3::white());
        configuration
    }

    /// Registers a scattering color and returns its profile index
    ///
    /// An identical color returns the existing index. Once the table is
    /// full the call logs and returns 0.
    pub fn add_diffusion_profile(&mut self, color: Color3) -> usize {
        if let Some(index) = self.profile_colors.iter().position(|c| *c == color) {
            return index;
        }
        if self.diffusion_d.len() >= MAX_DIFFUSION_PROFILES {
            error!("You already reached the maximum number of diffusion profiles");
            return 0;
        }
        self.diffusion_s.push([color.r, color.g, color.b]);
        self.diffusion_d.push(color.r.max(color.g).max(color.b));
        self.filter_radii.push(Self::diffusion_profile_parameters(color));
        self.profile_colors.push(color);
        self.diffusion_d.len() - 1
    }

    pub fn clear_all_diffusion_profiles(&mut self) {
        self.diffusion_s.clear();
        self.diffusion_d.clear();
        self.filter_radii.clear();
        self.profile_colors.clear();
        self.add_diffusion_profile(Color3::white());
    }

    /// Filter radius holding 99.7% of the profile's energy
    pub fn diffusion_profile_parameters(color: Color3) -> f32 {
        let cdf = 0.997;
        let max_scattering_distance = color.r.max(color.g).max(color.b);
        Self::sample_burley_diffusion_profile(cdf, max_scattering_distance)
    }

    /// Inverse of the Burley profile CDF, scaled by `rcp_s`
    fn sample_burley_diffusion_profile(u: f32, rcp_s: f32) -> f32 {
        let u = 1.0 - u;
        let g = 1.0 + (4.0 * u) * (2.0 * u + (1.0 + (4.0 * u) * u).sqrt());
        let n = g.powf(-1.0 / 3.0);
        let p = (g * n) * n;
        let c = 1.0 + p + n;
        let x = 3.0 * (c / (4.0 * u)).ln();
        x * rcp_s
    }

    pub fn diffusion_s(&self) -> &[[f32; 3]] {
        &self.diffusion_s
    }

    pub fn diffusion_d(&self) -> &[f32] {
        &self.diffusion_d
    }

    pub fn filter_radii(&self) -> &[f32] {
        &self.filter_radii
    }

    pub fn profile_colors(&self) -> &[Color3] {
        &self.profile_colors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_is_white() {
        let configuration = SubSurfaceConfiguration::new();
        assert_eq!(configuration.profile_colors(), &[Color3::white()]);
        assert_eq!(configuration.diffusion_d(), &[1.0]);
        assert!(configuration.filter_radii()[0] > 0.0);
    }

    #[test]
    fn test_profiles_are_deduplicated_and_capped() {
        let mut configuration = SubSurfaceConfiguration::new();
        let skin = Color3::new(0.75, 0.25, 0.2);
        assert_eq!(configuration.add_diffusion_profile(skin), 1);
        assert_eq!(configuration.add_diffusion_profile(skin), 1);
        for i in 0..3 {
            configuration.add_diffusion_profile(Color3::new(0.1 * i as f32, 0.5, 0.5));
        }
        assert_eq!(configuration.diffusion_d().len(), MAX_DIFFUSION_PROFILES);
        assert_eq!(configuration.add_diffusion_profile(Color3::new(0.9, 0.9, 0.1)), 0);
        configuration.clear_all_diffusion_profiles();
        assert_eq!(configuration.diffusion_d().len(), 1);
    }

    #[test]
    fn test_radius_scales_with_distance() {
        let small = SubSurfaceConfiguration::diffusion_profile_parameters(Color3::new(0.5, 0.1, 0.1));
        let large = SubSurfaceConfiguration::diffusion_profile_parameters(Color3::new(1.0, 0.1, 0.1));
        assert!((large - 2.0 * small).abs() < 1e-4);
    }
}

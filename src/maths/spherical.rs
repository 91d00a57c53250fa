//! Spherical harmonics and polynomial irradiance representations
//!
//! Environment textures carry their diffuse irradiance in one of these two
//! forms. PBR materials upload either the polynomial or the pre-scaled
//! harmonics as uniforms.

use std::f32::consts::PI;

use cgmath::Vector3;
use serde::{Deserialize, Serialize};

type V3 = Vector3<f32>;

fn zero() -> V3 {
    Vector3::new(0.0, 0.0, 0.0)
}

/// Third order spherical harmonics, one RGB coefficient per basis function
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphericalHarmonics {
    pub pre_scaled: bool,
    pub l00: V3,
    pub l1_1: V3,
    pub l10: V3,
    pub l11: V3,
    pub l2_2: V3,
    pub l2_1: V3,
    pub l20: V3,
    pub l21: V3,
    pub l22: V3,
}

impl Default for SphericalHarmonics {
    fn default() -> Self {
        Self {
            pre_scaled: false,
            l00: zero(),
            l1_1: zero(),
            l10: zero(),
            l11: zero(),
            l2_2: zero(),
            l2_1: zero(),
            l20: zero(),
            l21: zero(),
            l22: zero(),
        }
    }
}

impl SphericalHarmonics {
    pub fn coefficients(&self) -> [V3; 9] {
        [
            self.l00, self.l1_1, self.l10, self.l11, self.l2_2, self.l2_1, self.l20, self.l21,
            self.l22,
        ]
    }

    pub fn scale_in_place(&mut self, factor: f32) {
        self.l00 *= factor;
        self.l1_1 *= factor;
        self.l10 *= factor;
        self.l11 *= factor;
        self.l2_2 *= factor;
        self.l2_1 *= factor;
        self.l20 *= factor;
        self.l21 *= factor;
        self.l22 *= factor;
    }

    /// Bakes the basis constants into the coefficients so shaders only sum
    pub fn pre_scale_for_rendering(&mut self) {
        if self.pre_scaled {
            return;
        }
        self.pre_scaled = true;
        self.l00 *= 0.282095;
        self.l1_1 *= 0.488603;
        self.l10 *= 0.488603;
        self.l11 *= 0.488603;
        self.l2_2 *= 1.092548;
        self.l2_1 *= 1.092548;
        self.l20 *= 0.315392;
        self.l21 *= 1.092548;
        self.l22 *= 0.546274;
    }

    pub fn from_polynomial(polynomial: &SphericalPolynomial) -> Self {
        let p = polynomial;
        let mut result = Self {
            pre_scaled: false,
            l00: p.xx * 0.376127 + p.yy * 0.376127 + p.zz * 0.376126,
            l1_1: p.y * 0.977204,
            l10: p.z * 0.977204,
            l11: p.x * 0.977204,
            l2_2: p.xy * 1.16538,
            l2_1: p.yz * 1.16538,
            l20: p.zz * 1.34567 - p.xx * 0.672834 - p.yy * 0.672834,
            l21: p.zx * 1.16538,
            l22: p.xx * 1.16538 - p.yy * 1.16538,
        };
        result.l1_1 *= -1.0;
        result.l11 *= -1.0;
        result.l2_1 *= -1.0;
        result.l21 *= -1.0;
        result.scale_in_place(PI);
        result
    }

    /// Reads nine RGB triples in l00, l1_1, l10, l11, l2_2, l2_1, l20, l21, l22 order
    pub fn from_array(data: &[[f32; 3]; 9]) -> Self {
        let v = |i: usize| Vector3::new(data[i][0], data[i][1], data[i][2]);
        Self {
            pre_scaled: false,
            l00: v(0),
            l1_1: v(1),
            l10: v(2),
            l11: v(3),
            l2_2: v(4),
            l2_1: v(5),
            l20: v(6),
            l21: v(7),
            l22: v(8),
        }
    }
}

/// Irradiance expressed as a second degree polynomial of the normal
#[derive(Debug, Clone, PartialEq)]
pub struct SphericalPolynomial {
    pub x: V3,
    pub y: V3,
    pub z: V3,
    pub xx: V3,
    pub yy: V3,
    pub zz: V3,
    pub xy: V3,
    pub yz: V3,
    pub zx: V3,
    harmonics: Option<SphericalHarmonics>,
}

impl Default for SphericalPolynomial {
    fn default() -> Self {
        Self {
            x: zero(),
            y: zero(),
            z: zero(),
            xx: zero(),
            yy: zero(),
            zz: zero(),
            xy: zero(),
            yz: zero(),
            zx: zero(),
            harmonics: None,
        }
    }
}

impl SphericalPolynomial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Harmonics equivalent with the rendering constants applied, computed once
    pub fn pre_scaled_harmonics(&mut self) -> SphericalHarmonics {
        if let Some(harmonics) = self.harmonics {
            return harmonics;
        }
        let mut harmonics = SphericalHarmonics::from_polynomial(self);
        harmonics.pre_scale_for_rendering();
        self.harmonics = Some(harmonics);
        harmonics
    }

    pub fn scale_in_place(&mut self, factor: f32) {
        self.x *= factor;
        self.y *= factor;
        self.z *= factor;
        self.xx *= factor;
        self.yy *= factor;
        self.zz *= factor;
        self.xy *= factor;
        self.yz *= factor;
        self.zx *= factor;
        self.harmonics = None;
    }

    pub fn from_harmonics(harmonics: &SphericalHarmonics) -> Self {
        let h = harmonics;
        let mut result = Self {
            x: h.l11 * -1.02333,
            y: h.l1_1 * -1.02333,
            z: h.l10 * 1.02333,
            xx: h.l00 * 0.886277 - h.l20 * 0.247708 + h.l22 * 0.429043,
            yy: h.l00 * 0.886277 - h.l20 * 0.247708 - h.l22 * 0.429043,
            zz: h.l00 * 0.886277 + h.l20 * 0.495417,
            yz: h.l2_1 * -0.858086,
            zx: h.l21 * -0.858086,
            xy: h.l2_2 * 0.858086,
            harmonics: None,
        };
        result.scale_in_place(1.0 / PI);
        result
    }

    /// Evaluates the irradiance for a unit normal
    pub fn irradiance(&self, normal: V3) -> V3 {
        let (nx, ny, nz) = (normal.x, normal.y, normal.z);
        let a1 = (self.yy - self.zz) * ny + self.y;
        let a2 = self.yz * nz + a1;
        let b1 = self.zx * nz + self.x;
        let b2 = self.xy * ny + b1;
        let b3 = (self.xx - self.zz) * nx + b2;
        let t1 = self.z * nz + self.zz;
        let t2 = a2 * ny + t1;
        b3 * nx + t2
    }
}

/// Serialized irradiance block of an environment manifest
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EnvironmentIrradianceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xx: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yy: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zz: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yz: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zx: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xy: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l00: Option<[f32; 3]>,
    #[serde(rename = "l1_1", default, skip_serializing_if = "Option::is_none")]
    pub l1_1: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l10: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l11: Option<[f32; 3]>,
    #[serde(rename = "l2_2", default, skip_serializing_if = "Option::is_none")]
    pub l2_2: Option<[f32; 3]>,
    #[serde(rename = "l2_1", default, skip_serializing_if = "Option::is_none")]
    pub l2_1: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l20: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l21: Option<[f32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l22: Option<[f32; 3]>,
}

impl EnvironmentIrradianceInfo {
    /// Converts whichever form is present into a polynomial
    pub fn to_polynomial(&self) -> Option<SphericalPolynomial> {
        let v = |c: Option<[f32; 3]>| c.map(|c| Vector3::new(c[0], c[1], c[2]));
        if let Some(l00) = v(self.l00) {
            let harmonics = SphericalHarmonics {
                pre_scaled: false,
                l00,
                l1_1: v(self.l1_1)?,
                l10: v(self.l10)?,
                l11: v(self.l11)?,
                l2_2: v(self.l2_2)?,
                l2_1: v(self.l2_1)?,
                l20: v(self.l20)?,
                l21: v(self.l21)?,
                l22: v(self.l22)?,
            };
            return Some(SphericalPolynomial::from_harmonics(&harmonics));
        }
        Some(SphericalPolynomial {
            x: v(self.x)?,
            y: v(self.y)?,
            z: v(self.z)?,
            xx: v(self.xx)?,
            yy: v(self.yy)?,
            zz: v(self.zz)?,
            yz: v(self.yz)?,
            zx: v(self.zx)?,
            xy: v(self.xy)?,
            harmonics: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_harmonics(value: f32) -> SphericalHarmonics {
        SphericalHarmonics {
            l00: Vector3::new(value, value, value),
            ..Default::default()
        }
    }

    #[test]
    fn test_constant_environment_roundtrip() {
        let harmonics = constant_harmonics(1.0);
        let polynomial = SphericalPolynomial::from_harmonics(&harmonics);
        let back = SphericalHarmonics::from_polynomial(&polynomial);
        assert!((back.l00.x - 1.0).abs() < 1e-3);
        assert!(back.l20.x.abs() < 1e-3);
    }

    #[test]
    fn test_irradiance_is_uniform_for_constant_term() {
        let polynomial = SphericalPolynomial::from_harmonics(&constant_harmonics(2.0));
        let up = polynomial.irradiance(Vector3::new(0.0, 1.0, 0.0));
        let side = polynomial.irradiance(Vector3::new(1.0, 0.0, 0.0));
        assert!((up.x - side.x).abs() < 1e-4);
    }

    #[test]
    fn test_pre_scale_applies_once() {
        let mut harmonics = constant_harmonics(1.0);
        harmonics.pre_scale_for_rendering();
        harmonics.pre_scale_for_rendering();
        assert!((harmonics.l00.x - 0.282095).abs() < 1e-6);
    }

    #[test]
    fn test_new_polynomial_is_zero() {
        let mut polynomial = SphericalPolynomial::new();
        assert_eq!(polynomial.irradiance(Vector3::new(0.0, 1.0, 0.0)), Vector3::new(0.0, 0.0, 0.0));
        assert_eq!(polynomial.pre_scaled_harmonics().l00, Vector3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn test_irradiance_info_prefers_harmonics() {
        let info = EnvironmentIrradianceInfo {
            l00: Some([1.0, 1.0, 1.0]),
            l1_1: Some([0.0; 3]),
            l10: Some([0.0; 3]),
            l11: Some([0.0; 3]),
            l2_2: Some([0.0; 3]),
            l2_1: Some([0.0; 3]),
            l20: Some([0.0; 3]),
            l21: Some([0.0; 3]),
            l22: Some([0.0; 3]),
            ..Default::default()
        };
        let polynomial = info.to_polynomial().unwrap();
        assert!((polynomial.zz.x - 0.886277 / PI).abs() < 1e-5);
        assert!(EnvironmentIrradianceInfo::default().to_polynomial().is_none());
    }
}

//! BRDF switches of the PBR material

use serde::{Deserialize, Serialize};

use crate::materials::defines::MaterialDefines;

pub const DEFAULT_USE_ENERGY_CONSERVATION: bool = true;
pub const DEFAULT_USE_SMITH_VISIBILITY_HEIGHT_CORRELATED: bool = true;
pub const DEFAULT_USE_SPHERICAL_HARMONICS: bool = true;
pub const DEFAULT_USE_SPECULAR_GLOSSINESS_INPUT_ENERGY_CONSERVATION: bool = true;

/// Selects which BRDF approximations the PBR shader compiles in
///
/// Every setter that changes a value leaves a pending MISC invalidation,
/// collected by the owning material through [`PbrBrdfConfiguration::take_dirty`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbrBrdfConfiguration {
    use_energy_conservation: bool,
    use_smith_visibility_height_correlated: bool,
    use_spherical_harmonics: bool,
    use_specular_glossiness_input_energy_conservation: bool,
    #[serde(skip)]
    dirty: bool,
}

impl Default for PbrBrdfConfiguration {
    fn default() -> Self {
        Self {
            use_energy_conservation: DEFAULT_USE_ENERGY_CONSERVATION,
            use_smith_visibility_height_correlated: DEFAULT_USE_SMITH_VISIBILITY_HEIGHT_CORRELATED,
            use_spherical_harmonics: DEFAULT_USE_SPHERICAL_HARMONICS,
            use_specular_glossiness_input_energy_conservation:
                DEFAULT_USE_SPECULAR_GLOSSINESS_INPUT_ENERGY_CONSERVATION,
            dirty: false,
        }
    }
}

impl PbrBrdfConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn class_name(&self) -> &'static str {
        "PBRBRDFConfiguration"
    }

    pub fn use_energy_conservation(&self) -> bool {
        self.use_energy_conservation
    }

    pub fn set_use_energy_conservation(&mut self, value: bool) {
        if self.use_energy_conservation != value {
            self.use_energy_conservation = value;
            self.dirty = true;
        }
    }

    pub fn use_smith_visibility_height_correlated(&self) -> bool {
        self.use_smith_visibility_height_correlated
    }

    pub fn set_use_smith_visibility_height_correlated(&mut self, value: bool) {
        if self.use_smith_visibility_height_correlated != value {
            self.use_smith_visibility_height_correlated = value;
            self.dirty = true;
        }
    }

    pub fn use_spherical_harmonics(&self) -> bool {
        self.use_spherical_harmonics
    }

    pub fn set_use_spherical_harmonics(&mut self, value: bool) {
        if self.use_spherical_harmonics != value {
            self.use_spherical_harmonics = value;
            self.dirty = true;
        }
    }

    pub fn use_specular_glossiness_input_energy_conservation(&self) -> bool {
        self.use_specular_glossiness_input_energy_conservation
    }

    pub fn set_use_specular_glossiness_input_energy_conservation(&mut self, value: bool) {
        if self.use_specular_glossiness_input_energy_conservation != value {
            self.use_specular_glossiness_input_energy_conservation = value;
            self.dirty = true;
        }
    }

    /// Returns whether a setter changed anything since the last call
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn prepare_defines(&self, defines: &mut MaterialDefines) {
        defines
            .set_bool(
                "BRDF_V_HEIGHT_CORRELATED",
                self.use_smith_visibility_height_correlated,
            )
            .set_bool(
                "MS_BRDF_ENERGY_CONSERVATION",
                self.use_energy_conservation && self.use_smith_visibility_height_correlated,
            )
            .set_bool("SPHERICAL_HARMONICS", self.use_spherical_harmonics)
            .set_bool(
                "SPECULAR_GLOSSINESS_ENERGY_CONSERVATION",
                self.use_specular_glossiness_input_energy_conservation,
            );
    }

    /// Copies the switches into `other`, flagging it dirty when they differ
    pub fn copy_to(&self, other: &mut PbrBrdfConfiguration) {
        other.set_use_energy_conservation(self.use_energy_conservation);
        other.set_use_smith_visibility_height_correlated(self.use_smith_visibility_height_correlated);
        other.set_use_spherical_harmonics(self.use_spherical_harmonics);
        other.set_use_specular_glossiness_input_energy_conservation(
            self.use_specular_glossiness_input_energy_conservation,
        );
    }

    pub fn serialize(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Reads the switches present in `value`; missing ones keep their value
    pub fn parse(&mut self, value: &serde_json::Value) {
        let flag = |key: &str| value.get(key).and_then(serde_json::Value::as_bool);
        if let Some(v) = flag("useEnergyConservation") {
            self.set_use_energy_conservation(v);
        }
        if let Some(v) = flag("useSmithVisibilityHeightCorrelated") {
            self.set_use_smith_visibility_height_correlated(v);
        }
        if let Some(v) = flag("useSphericalHarmonics") {
            self.set_use_spherical_harmonics(v);
        }
        if let Some(v) = flag("useSpecularGlossinessInputEnergyConservation") {
            self.set_use_specular_glossiness_input_energy_conservation(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setters_only_dirty_on_change() {
        let mut brdf = PbrBrdfConfiguration::new();
        brdf.set_use_energy_conservation(true);
        assert!(!brdf.take_dirty());
        brdf.set_use_energy_conservation(false);
        assert!(brdf.take_dirty());
        assert!(!brdf.take_dirty());
    }

    #[test]
    fn test_energy_conservation_needs_height_correlation() {
        let mut brdf = PbrBrdfConfiguration::new();
        let mut defines = MaterialDefines::new();
        brdf.prepare_defines(&mut defines);
        assert!(defines["MS_BRDF_ENERGY_CONSERVATION"]);
        assert!(defines["BRDF_V_HEIGHT_CORRELATED"]);

        brdf.set_use_smith_visibility_height_correlated(false);
        brdf.prepare_defines(&mut defines);
        assert!(!defines["MS_BRDF_ENERGY_CONSERVATION"]);
        assert!(defines["SPHERICAL_HARMONICS"]);
        assert!(defines["SPECULAR_GLOSSINESS_ENERGY_CONSERVATION"]);
    }

    #[test]
    fn test_serialize_and_parse() {
        let mut brdf = PbrBrdfConfiguration::new();
        brdf.set_use_spherical_harmonics(false);
        let value = brdf.serialize();
        assert_eq!(value["useSphericalHarmonics"], false);

        let mut parsed = PbrBrdfConfiguration::new();
        parsed.parse(&value);
        assert!(!parsed.use_spherical_harmonics());
        assert!(parsed.use_energy_conservation());
    }
}

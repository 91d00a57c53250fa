//! Shader define sets computed per material and mesh
//!
//! A [`MaterialDefines`] keeps three ordered tables (booleans, integers and
//! strings) plus the dirty flags telling a material which groups need to be
//! recomputed before the next draw. The defines string produced by
//! [`MaterialDefines::to_string`] is part of the effect cache key, so the
//! insertion order of the tables is kept stable.

use std::fmt;
use std::ops::Index;

bitflags::bitflags! {
    /// Groups of defines a material change invalidates
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MaterialDirtyFlags: u32 {
        const TEXTURE =          0b0000_0001;
        const LIGHT =            0b0000_0010;
        const FRESNEL =          0b0000_0100;
        const ATTRIBUTE =        0b0000_1000;
        const MISC =             0b0001_0000;
        const PREPASS =          0b0010_0000;
        const IMAGE_PROCESSING = 0b0100_0000;
        const ALL = Self::TEXTURE.bits()
            | Self::LIGHT.bits()
            | Self::FRESNEL.bits()
            | Self::ATTRIBUTE.bits()
            | Self::MISC.bits()
            | Self::PREPASS.bits()
            | Self::IMAGE_PROCESSING.bits();
    }
}

/// Ordered name/value table
#[derive(Debug, Clone, PartialEq, Default)]
struct DefineTable<T> {
    entries: Vec<(String, T)>,
}

impl<T: Clone + PartialEq> DefineTable<T> {
    fn get(&self, name: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    fn set(&mut self, name: &str, value: T) -> bool {
        match self.entries.iter_mut().find(|(key, _)| key == name) {
            Some((_, current)) if *current == value => false,
            Some((_, current)) => {
                *current = value;
                true
            }
            None => {
                self.entries.push((name.to_string(), value));
                true
            }
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == name)
    }

    fn fill(&mut self, value: T) {
        for (_, current) in &mut self.entries {
            *current = value.clone();
        }
    }
}

/// Typed define sets plus the dirty state of each group
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialDefines {
    bool_def: DefineTable<bool>,
    int_def: DefineTable<i32>,
    string_def: DefineTable<String>,
    bool_defaults: Vec<(String, bool)>,
    int_defaults: Vec<(String, i32)>,
    string_defaults: Vec<(String, String)>,
    is_dirty: bool,
    pub(crate) render_id: Option<u64>,
    pub are_attributes_dirty: bool,
    pub are_textures_dirty: bool,
    pub are_fresnel_dirty: bool,
    pub are_misc_dirty: bool,
    pub are_lights_dirty: bool,
    pub are_lights_disposed: bool,
    pub are_image_processing_dirty: bool,
    pub are_pre_pass_dirty: bool,
    pub normals: bool,
    pub uvs: bool,
    pub needs_normals: bool,
    pub needs_uvs: bool,
}

impl Default for MaterialDefines {
    fn default() -> Self {
        Self {
            bool_def: DefineTable::default(),
            int_def: DefineTable::default(),
            string_def: DefineTable::default(),
            bool_defaults: Vec::new(),
            int_defaults: Vec::new(),
            string_defaults: Vec::new(),
            is_dirty: true,
            render_id: None,
            are_attributes_dirty: true,
            are_textures_dirty: true,
            are_fresnel_dirty: true,
            are_misc_dirty: true,
            are_lights_dirty: true,
            are_lights_disposed: false,
            are_image_processing_dirty: true,
            are_pre_pass_dirty: true,
            normals: false,
            uvs: false,
            needs_normals: false,
            needs_uvs: false,
        }
    }
}

impl MaterialDefines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set whose declared values also become the reset defaults
    pub fn with_defaults(bools: &[(&str, bool)], ints: &[(&str, i32)], strings: &[(&str, &str)]) -> Self {
        let mut defines = Self::default();
        for (name, value) in bools {
            defines.declare_bool(name, *value);
        }
        for (name, value) in ints {
            defines.declare_int(name, *value);
        }
        for (name, value) in strings {
            defines.declare_string(name, value);
        }
        defines
    }

    pub fn declare_bool(&mut self, name: &str, default: bool) {
        self.bool_def.set(name, default);
        self.bool_defaults.push((name.to_string(), default));
    }

    pub fn declare_int(&mut self, name: &str, default: i32) {
        self.int_def.set(name, default);
        self.int_defaults.push((name.to_string(), default));
    }

    pub fn declare_string(&mut self, name: &str, default: &str) {
        self.string_def.set(name, default.to_string());
        self.string_defaults
            .push((name.to_string(), default.to_string()));
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn bool(&self, name: &str) -> bool {
        self.bool_def.get(name).copied().unwrap_or(false)
    }

    pub fn int(&self, name: &str) -> i32 {
        self.int_def.get(name).copied().unwrap_or(0)
    }

    pub fn string(&self, name: &str) -> &str {
        self.string_def.get(name).map_or("", String::as_str)
    }

    pub fn has_bool(&self, name: &str) -> bool {
        self.bool_def.contains(name)
    }

    pub fn has_int(&self, name: &str) -> bool {
        self.int_def.contains(name)
    }

    /// Sets a boolean define, marking the set dirty when the value changes
    pub fn set_bool(&mut self, name: &str, value: bool) -> &mut Self {
        if self.bool_def.set(name, value) {
            self.is_dirty = true;
        }
        self
    }

    pub fn set_int(&mut self, name: &str, value: i32) -> &mut Self {
        if self.int_def.set(name, value) {
            self.is_dirty = true;
        }
        self
    }

    pub fn set_string(&mut self, name: &str, value: &str) -> &mut Self {
        if self.string_def.set(name, value.to_string()) {
            self.is_dirty = true;
        }
        self
    }

    pub fn mark_as_processed(&mut self) {
        self.is_dirty = false;
        self.are_attributes_dirty = false;
        self.are_textures_dirty = false;
        self.are_fresnel_dirty = false;
        self.are_lights_dirty = false;
        self.are_lights_disposed = false;
        self.are_misc_dirty = false;
        self.are_image_processing_dirty = false;
        self.are_pre_pass_dirty = false;
    }

    pub fn mark_as_unprocessed(&mut self) {
        self.is_dirty = true;
    }

    pub fn mark_all_as_dirty(&mut self) {
        self.are_textures_dirty = true;
        self.are_attributes_dirty = true;
        self.are_lights_dirty = true;
        self.are_fresnel_dirty = true;
        self.are_misc_dirty = true;
        self.are_image_processing_dirty = true;
        self.are_pre_pass_dirty = true;
        self.is_dirty = true;
    }

    pub fn mark_as_image_processing_dirty(&mut self) {
        self.are_image_processing_dirty = true;
        self.is_dirty = true;
    }

    pub fn mark_as_lights_dirty(&mut self, disposed: bool) {
        self.are_lights_dirty = true;
        self.are_lights_disposed = self.are_lights_disposed || disposed;
        self.is_dirty = true;
    }

    pub fn mark_as_attributes_dirty(&mut self) {
        self.are_attributes_dirty = true;
        self.is_dirty = true;
    }

    pub fn mark_as_textures_dirty(&mut self) {
        self.are_textures_dirty = true;
        self.is_dirty = true;
    }

    pub fn mark_as_fresnel_dirty(&mut self) {
        self.are_fresnel_dirty = true;
        self.is_dirty = true;
    }

    pub fn mark_as_misc_dirty(&mut self) {
        self.are_misc_dirty = true;
        self.is_dirty = true;
    }

    pub fn mark_as_pre_pass_dirty(&mut self) {
        self.are_pre_pass_dirty = true;
        self.is_dirty = true;
    }

    /// Marks the groups named by `flags` dirty
    pub fn mark_dirty(&mut self, flags: MaterialDirtyFlags) {
        if flags.contains(MaterialDirtyFlags::TEXTURE) {
            self.mark_as_textures_dirty();
        }
        if flags.contains(MaterialDirtyFlags::LIGHT) {
            self.mark_as_lights_dirty(false);
        }
        if flags.contains(MaterialDirtyFlags::FRESNEL) {
            self.mark_as_fresnel_dirty();
        }
        if flags.contains(MaterialDirtyFlags::ATTRIBUTE) {
            self.mark_as_attributes_dirty();
        }
        if flags.contains(MaterialDirtyFlags::MISC) {
            self.mark_as_misc_dirty();
        }
        if flags.contains(MaterialDirtyFlags::PREPASS) {
            self.mark_as_pre_pass_dirty();
        }
        if flags.contains(MaterialDirtyFlags::IMAGE_PROCESSING) {
            self.mark_as_image_processing_dirty();
        }
    }

    /// Forces the next `is_equal` comparison against a fresh effect to fail
    pub fn rebuild(&mut self) {
        self.render_id = None;
        self.mark_all_as_dirty();
    }

    /// Compares every define value, ignoring dirty state
    pub fn is_equal(&self, other: &MaterialDefines) -> bool {
        self.bool_def == other.bool_def
            && self.int_def == other.int_def
            && self.string_def == other.string_def
    }

    /// Copies every define value into `other`
    pub fn clone_to(&self, other: &mut MaterialDefines) {
        if self.is_equal(other) {
            return;
        }
        other.bool_def = self.bool_def.clone();
        other.int_def = self.int_def.clone();
        other.string_def = self.string_def.clone();
        other.is_dirty = true;
    }

    /// Clears every value, then re-applies the declared defaults
    pub fn reset(&mut self) {
        self.bool_def.fill(false);
        self.int_def.fill(0);
        self.string_def.fill(String::new());
        for (name, value) in &self.bool_defaults {
            self.bool_def.set(name, *value);
        }
        for (name, value) in &self.int_defaults {
            self.int_def.set(name, *value);
        }
        for (name, value) in &self.string_defaults {
            self.string_def.set(name, value.clone());
        }
        self.is_dirty = true;
    }

    /// Names of the boolean defines currently true
    pub fn enabled(&self) -> impl Iterator<Item = &str> {
        self.bool_def
            .entries
            .iter()
            .filter(|(_, value)| *value)
            .map(|(name, _)| name.as_str())
    }
}

impl Index<&str> for MaterialDefines {
    type Output = bool;

    fn index(&self, name: &str) -> &bool {
        self.bool_def.get(name).unwrap_or(&false)
    }
}

impl fmt::Display for MaterialDefines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.bool_def.entries {
            if *value {
                writeln!(f, "#define {}", name)?;
            }
        }
        for (name, value) in &self.int_def.entries {
            writeln!(f, "#define {} {}", name, value)?;
        }
        for (name, value) in &self.string_def.entries {
            if !value.is_empty() {
                writeln!(f, "#define {} {}", name, value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defines() -> MaterialDefines {
        MaterialDefines::with_defaults(
            &[("ALBEDO", false), ("PBR", true)],
            &[("NUM_SAMPLES", 0), ("PREPASS_COLOR_INDEX", -1)],
            &[("ALPHATESTVALUE", "0.5")],
        )
    }

    #[test]
    fn test_to_string_keeps_insertion_order() {
        let mut defines = defines();
        defines.set_bool("ALBEDO", true);
        assert_eq!(
            defines.to_string(),
            "#define ALBEDO\n#define PBR\n#define NUM_SAMPLES 0\n#define PREPASS_COLOR_INDEX -1\n#define ALPHATESTVALUE 0.5\n"
        );
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut defines = defines();
        defines
            .set_bool("PBR", false)
            .set_bool("ALBEDO", true)
            .set_int("PREPASS_COLOR_INDEX", 2)
            .set_string("ALPHATESTVALUE", "0.25");
        defines.reset();
        assert!(defines["PBR"]);
        assert!(!defines["ALBEDO"]);
        assert_eq!(defines.int("PREPASS_COLOR_INDEX"), -1);
        assert_eq!(defines.string("ALPHATESTVALUE"), "0.5");
    }

    #[test]
    fn test_dirty_tracking() {
        let mut defines = defines();
        assert!(defines.is_dirty());
        defines.mark_as_processed();
        assert!(!defines.is_dirty());
        defines.set_bool("PBR", true);
        assert!(!defines.is_dirty());
        defines.mark_dirty(MaterialDirtyFlags::TEXTURE | MaterialDirtyFlags::LIGHT);
        assert!(defines.is_dirty());
        assert!(defines.are_textures_dirty);
        assert!(defines.are_lights_dirty);
        assert!(!defines.are_misc_dirty);
        defines.mark_as_processed();
        defines.mark_as_lights_dirty(true);
        defines.mark_as_lights_dirty(false);
        assert!(defines.are_lights_disposed);
    }

    #[test]
    fn test_clone_to_and_is_equal() {
        let mut source = defines();
        source.set_bool("ALBEDO", true).set_int("NUM_SAMPLES", 16);
        let mut target = defines();
        target.mark_as_processed();
        assert!(!source.is_equal(&target));
        source.clone_to(&mut target);
        assert!(source.is_equal(&target));
        assert!(target.is_dirty());
    }

    #[test]
    fn test_unknown_names_index_false() {
        let defines = defines();
        assert!(!defines["MISSING"]);
        assert_eq!(defines.int("MISSING"), 0);
        assert_eq!(defines.string("MISSING"), "");
    }
}

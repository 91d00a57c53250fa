//! Keyframe animations of float properties and the named ranges over them

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A value at a frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnimationKey {
    pub frame: f32,
    pub value: f32,
}

impl AnimationKey {
    pub fn new(frame: f32, value: f32) -> Self {
        Self { frame, value }
    }
}

/// Named frame interval, used to play part of an animation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationRange {
    pub name: String,
    pub from: f32,
    pub to: f32,
}

impl AnimationRange {
    pub fn new(name: &str, from: f32, to: f32) -> Self {
        Self {
            name: name.to_string(),
            from,
            to,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnimationLoopMode {
    #[default]
    Cycle,
    Constant,
}

/// Keyframes driving one float property, addressed by a dotted path such
/// as `position.x`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Animation {
    pub name: String,
    pub target_property: String,
    pub frame_per_second: f32,
    #[serde(default)]
    pub loop_mode: AnimationLoopMode,
    keys: Vec<AnimationKey>,
    #[serde(default)]
    ranges: BTreeMap<String, AnimationRange>,
}

impl Animation {
    pub fn new(name: &str, target_property: &str, frame_per_second: f32) -> Self {
        Self {
            name: name.to_string(),
            target_property: target_property.to_string(),
            frame_per_second,
            loop_mode: AnimationLoopMode::Cycle,
            keys: Vec::new(),
            ranges: BTreeMap::new(),
        }
    }

    /// Replaces the keys, keeping them sorted by frame
    pub fn set_keys(&mut self, mut keys: Vec<AnimationKey>) {
        keys.sort_by(|a, b| a.frame.total_cmp(&b.frame));
        self.keys = keys;
    }

    pub fn keys(&self) -> &[AnimationKey] {
        &self.keys
    }

    pub fn highest_frame(&self) -> f32 {
        self.keys.last().map_or(0.0, |key| key.frame)
    }

    pub fn create_range(&mut self, name: &str, from: f32, to: f32) {
        self.ranges
            .entry(name.to_string())
            .or_insert_with(|| AnimationRange::new(name, from, to));
    }

    /// Removes a range, optionally deleting the keys it covers
    pub fn delete_range(&mut self, name: &str, delete_frames: bool) {
        let Some(range) = self.ranges.remove(name) else {
            return;
        };
        if delete_frames {
            self.keys
                .retain(|key| key.frame < range.from || key.frame > range.to);
        }
    }

    pub fn get_range(&self, name: &str) -> Option<&AnimationRange> {
        self.ranges.get(name)
    }

    /// Linearly interpolated value at `frame`
    pub fn evaluate(&self, frame: f32) -> Option<f32> {
        let first = self.keys.first()?;
        if frame <= first.frame {
            return Some(first.value);
        }
        for pair in self.keys.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if frame <= b.frame {
                let span = b.frame - a.frame;
                if span <= 0.0 {
                    return Some(b.value);
                }
                let t = (frame - a.frame) / span;
                return Some(a.value + (b.value - a.value) * t);
            }
        }
        self.keys.last().map(|key| key.value)
    }
}

/// A running playback of a set of animations between two frames
#[derive(Debug, Clone, PartialEq)]
pub struct Animatable {
    pub from: f32,
    pub to: f32,
    pub loop_animation: bool,
    pub speed_ratio: f32,
    current_frame: f32,
    done: bool,
}

impl Animatable {
    pub fn new(from: f32, to: f32, loop_animation: bool, speed_ratio: f32) -> Self {
        Self {
            from,
            to,
            loop_animation,
            speed_ratio,
            current_frame: from,
            done: false,
        }
    }

    pub fn current_frame(&self) -> f32 {
        self.current_frame
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Advances by `delta_ms` at `frame_per_second`; returns the new frame
    pub fn advance(&mut self, delta_ms: f32, frame_per_second: f32) -> f32 {
        if self.done {
            return self.current_frame;
        }
        let length = self.to - self.from;
        self.current_frame += delta_ms / 1000.0 * frame_per_second * self.speed_ratio;
        if self.current_frame >= self.to {
            if self.loop_animation && length > 0.0 {
                self.current_frame = self.from + (self.current_frame - self.from) % length;
            } else {
                self.current_frame = self.to;
                self.done = true;
            }
        }
        self.current_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Animation {
        let mut animation = Animation::new("slide", "position.x", 30.0);
        animation.set_keys(vec![
            AnimationKey::new(10.0, 1.0),
            AnimationKey::new(0.0, 0.0),
            AnimationKey::new(20.0, 3.0),
        ]);
        animation
    }

    #[test]
    fn test_evaluate_interpolates_sorted_keys() {
        let animation = ramp();
        assert_eq!(animation.evaluate(-1.0), Some(0.0));
        assert_eq!(animation.evaluate(5.0), Some(0.5));
        assert_eq!(animation.evaluate(15.0), Some(2.0));
        assert_eq!(animation.evaluate(99.0), Some(3.0));
        assert_eq!(animation.highest_frame(), 20.0);
    }

    #[test]
    fn test_delete_range_with_frames() {
        let mut animation = ramp();
        animation.create_range("intro", 0.0, 10.0);
        animation.create_range("intro", 5.0, 6.0);
        assert_eq!(animation.get_range("intro").map(|r| r.to), Some(10.0));
        animation.delete_range("intro", true);
        assert!(animation.get_range("intro").is_none());
        assert_eq!(animation.keys().len(), 1);
    }

    #[test]
    fn test_animatable_loops_and_stops() {
        let mut looping = Animatable::new(0.0, 10.0, true, 1.0);
        assert_eq!(looping.advance(500.0, 30.0), 5.0);
        looping.advance(500.0, 30.0);
        assert!(!looping.is_done());
        assert!(looping.current_frame() < 10.0);

        let mut once = Animatable::new(0.0, 10.0, false, 2.0);
        once.advance(500.0, 30.0);
        assert!(once.is_done());
        assert_eq!(once.current_frame(), 10.0);
    }
}

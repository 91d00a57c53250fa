//! Scalar helpers used by texture sizing and float comparisons

use crate::engine::constants::ScaleMode;

pub const EPSILON: f32 = 0.001;

pub fn within_epsilon(a: f32, b: f32, epsilon: f32) -> bool {
    (a - b).abs() <= epsilon
}

/// Float comparison used by setters to skip no-op updates
pub fn almost_equal(a: f32, b: f32) -> bool {
    a == b || (a - b).abs() <= f32::EPSILON * a.abs().max(b.abs()).max(1.0)
}

pub fn is_pot(value: u32) -> bool {
    value != 0 && (value & (value - 1)) == 0
}

pub fn nearest_pot(value: u32) -> u32 {
    let c = ceiling_pot(value);
    let f = floor_pot(value);
    if c - value > value - f {
        f
    } else {
        c
    }
}

pub fn ceiling_pot(value: u32) -> u32 {
    value.max(1).next_power_of_two()
}

pub fn floor_pot(value: u32) -> u32 {
    if value == 0 {
        return 0;
    }
    1 << (31 - value.leading_zeros())
}

/// Rounds `value` to a power of two following `mode`, then clamps to `max`
pub fn get_exponent_of_two(value: u32, max: u32, mode: ScaleMode) -> u32 {
    let pot = match mode {
        ScaleMode::Floor => floor_pot(value),
        ScaleMode::Nearest => nearest_pot(value),
        ScaleMode::Ceiling => ceiling_pot(value),
    };
    pot.min(max)
}

pub fn clamp(value: f32, min: f32, max: f32) -> f32 {
    value.max(min).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pot_rounding() {
        assert!(is_pot(256));
        assert!(!is_pot(300));
        assert_eq!(floor_pot(300), 256);
        assert_eq!(ceiling_pot(300), 512);
        assert_eq!(nearest_pot(300), 256);
        assert_eq!(nearest_pot(400), 512);
        assert_eq!(ceiling_pot(0), 1);
    }

    #[test]
    fn test_exponent_of_two_clamps() {
        assert_eq!(get_exponent_of_two(3000, 2048, ScaleMode::Ceiling), 2048);
        assert_eq!(get_exponent_of_two(600, 4096, ScaleMode::Floor), 512);
    }

    #[test]
    fn test_almost_equal() {
        assert!(almost_equal(1.0, 1.0 + f32::EPSILON / 2.0));
        assert!(!almost_equal(1.0, 1.001));
    }
}

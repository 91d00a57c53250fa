use serde::{Deserialize, Serialize};

use crate::materials::node::BlockId;

/// Value type carried by a connection point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionPointType {
    Float,
    Vector2,
    Vector3,
    Vector4,
    Color3,
    Color4,
    Matrix,
    /// Takes the type of whatever gets connected
    AutoDetect,
}

impl ConnectionPointType {
    pub fn wgsl(self) -> &'static str {
        match self {
            Self::Float | Self::AutoDetect => "f32",
            Self::Vector2 => "vec2<f32>",
            Self::Vector3 | Self::Color3 => "vec3<f32>",
            Self::Vector4 | Self::Color4 => "vec4<f32>",
            Self::Matrix => "mat4x4<f32>",
        }
    }

    fn components(self) -> Option<u32> {
        match self {
            Self::Float => Some(1),
            Self::Vector2 => Some(2),
            Self::Vector3 | Self::Color3 => Some(3),
            Self::Vector4 | Self::Color4 => Some(4),
            Self::Matrix | Self::AutoDetect => None,
        }
    }

    /// Whether a value of `source` can feed an input of this type
    pub fn accepts(self, source: ConnectionPointType) -> bool {
        if self == Self::AutoDetect || self == source {
            return true;
        }
        match (self.components(), source.components()) {
            (Some(_), Some(1)) => true,
            (Some(to), Some(from)) => to == from || (to == 4 && from == 3) || (to == 3 && from == 4),
            _ => false,
        }
    }

    /// Rewrites `expression` of type `from` into this type
    pub fn cast(self, expression: &str, from: ConnectionPointType) -> String {
        if self == Self::AutoDetect || self.wgsl() == from.wgsl() {
            return expression.to_string();
        }
        match (self.components(), from.components()) {
            (Some(n), Some(1)) if n > 1 => format!("{}({})", self.wgsl(), expression),
            (Some(4), Some(3)) => format!("vec4<f32>({}, 1.0)", expression),
            (Some(3), Some(4)) => format!("({}).xyz", expression),
            _ => expression.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPointDirection {
    Input,
    Output,
}

/// Output of another block feeding an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub block: BlockId,
    pub output: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionPoint {
    pub name: String,
    pub ty: ConnectionPointType,
    pub direction: ConnectionPointDirection,
    pub optional: bool,
    pub connected: Option<Connection>,
}

impl ConnectionPoint {
    pub fn input(name: &str, ty: ConnectionPointType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            direction: ConnectionPointDirection::Input,
            optional: false,
            connected: None,
        }
    }

    pub fn optional_input(name: &str, ty: ConnectionPointType) -> Self {
        Self {
            optional: true,
            ..Self::input(name, ty)
        }
    }

    pub fn output(name: &str, ty: ConnectionPointType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            direction: ConnectionPointDirection::Output,
            optional: false,
            connected: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_compatible_types() {
        use ConnectionPointType::*;
        assert!(Vector4.accepts(Color4));
        assert!(Vector4.accepts(Vector3));
        assert!(Color3.accepts(Float));
        assert!(AutoDetect.accepts(Matrix));
        assert!(!Matrix.accepts(Vector4));
        assert!(!Vector2.accepts(Vector3));
    }

    #[test]
    fn test_cast_expressions() {
        use ConnectionPointType::*;
        assert_eq!(Vector4.cast("p", Vector3), "vec4<f32>(p, 1.0)");
        assert_eq!(Color3.cast("c", Color4), "(c).xyz");
        assert_eq!(Vector3.cast("x", Float), "vec3<f32>(x)");
        assert_eq!(Color3.cast("v", Vector3), "v");
    }
}

//! RGBA colour values

use serde::{Deserialize, Serialize};

/// Floating point RGBA colour
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Colour {
    /// Red
    pub r: f32,
    /// Green
    pub g: f32,
    /// Blue
    pub b: f32,
    /// Alpha
    pub a: f32,
}

impl Colour {
    /// Opaque black
    pub const BLACK: Self = Self::rgb(0.0, 0.0, 0.0);
    /// Opaque white
    pub const WHITE: Self = Self::rgb(1.0, 1.0, 1.0);

    /// Create a colour from all four channels
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Create an opaque colour
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::new(r, g, b, 1.0)
    }

    /// Channels as an array, for uploading as program constants
    pub const fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// True when the RGB channels are all zero
    pub fn is_black(self) -> bool {
        self.r == 0.0 && self.g == 0.0 && self.b == 0.0
    }
}

impl Default for Colour {
    fn default() -> Self {
        Self::WHITE
    }
}

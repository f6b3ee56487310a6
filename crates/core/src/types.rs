//! Wire-facing domain scalars shared by simulation and protocol layers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 2D world position in tile space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position2 {
    /// East-west coordinate.
    pub x: f32,
    /// North-south coordinate.
    pub y: f32,
}

impl Position2 {
    /// World origin.
    pub const ORIGIN: Self = Self { x: 0.0, y: 0.0 };

    /// Position at `(x, y)`.
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// 3D world position: tile space plus elevation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position3 {
    /// East-west coordinate.
    pub x: f32,
    /// North-south coordinate.
    pub y: f32,
    /// Elevation.
    pub z: f32,
}

impl Position3 {
    /// World origin.
    pub const ORIGIN: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Position at `(x, y, z)`.
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Unknown direction tag decoded from the wire.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid direction tag: {0}")]
pub struct InvalidDirection(pub u8);

/// Eight-way facing used by world entities (one byte on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    /// Facing up-screen.
    North = 0,
    /// Diagonal between north and east.
    NorthEast = 1,
    /// Facing right.
    East = 2,
    /// Diagonal between south and east.
    SouthEast = 3,
    /// Facing down-screen.
    South = 4,
    /// Diagonal between south and west.
    SouthWest = 5,
    /// Facing left.
    West = 6,
    /// Diagonal between north and west.
    NorthWest = 7,
}

impl TryFrom<u8> for Direction {
    type Error = InvalidDirection;

    fn try_from(value: u8) -> Result<Self, InvalidDirection> {
        match value {
            0 => Ok(Direction::North),
            1 => Ok(Direction::NorthEast),
            2 => Ok(Direction::East),
            3 => Ok(Direction::SouthEast),
            4 => Ok(Direction::South),
            5 => Ok(Direction::SouthWest),
            6 => Ok(Direction::West),
            7 => Ok(Direction::NorthWest),
            other => Err(InvalidDirection(other)),
        }
    }
}

/// RGBA color, 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
    /// Alpha channel (255 = opaque).
    pub a: u8,
}

impl Rgba {
    /// Opaque white.
    pub const WHITE: Self = Self::new(255, 255, 255, 255);

    /// Color from the four channels.
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

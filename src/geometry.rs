use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Vec2 { x, y }
    }

    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn distance(self, other: Vec2) -> f64 {
        (other - self).length()
    }

    pub fn dot(self, other: Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn from_angle(radians: f64) -> Self {
        Vec2 {
            x: radians.cos(),
            y: radians.sin(),
        }
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f64) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

/// Coarse facing sent upstream. The server animates one of four diagonal
/// sprites, so only the signs and the 2:1 ratio matter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    pub dx: f64,
    pub dy: f64,
}

impl Direction {
    pub const fn new(dx: f64, dy: f64) -> Self {
        Direction { dx, dy }
    }

    /// Maps an angle to the direction vector of the quadrant it falls in.
    pub fn from_quadrant(radians: f64) -> Self {
        let angle = normalize_angle(radians);
        if angle < FRAC_PI_2 {
            Direction::new(2.0, 1.0)
        } else if angle < PI {
            Direction::new(-2.0, 1.0)
        } else if angle < PI + FRAC_PI_2 {
            Direction::new(-2.0, -1.0)
        } else {
            Direction::new(2.0, -1.0)
        }
    }

    /// Direction for a displacement; `None` for a zero vector.
    pub fn from_motion(delta: Vec2) -> Option<Self> {
        if delta.x == 0.0 && delta.y == 0.0 {
            return None;
        }
        Some(Direction::from_quadrant(delta.y.atan2(delta.x)))
    }
}

/// Wraps into `[0, 2π)`.
pub fn normalize_angle(radians: f64) -> f64 {
    let wrapped = radians.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs.
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

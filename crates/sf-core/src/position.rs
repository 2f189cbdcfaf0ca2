//! 3D position and orientation types
//!
//! Axis convention follows the scene graph: x points right, y up, and z
//! toward the viewer, so a listener with identity orientation looks down
//! the negative z axis.

use serde::{Deserialize, Serialize};

/// 3D position in world or listener space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position3D {
    /// X coordinate (positive = right)
    pub x: f32,
    /// Y coordinate (positive = up)
    pub y: f32,
    /// Z coordinate (positive = toward the viewer)
    pub z: f32,
}

impl Position3D {
    /// Create new position
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Origin position
    pub fn origin() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Get magnitude (distance from origin)
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Normalize to unit vector
    pub fn normalize(&self) -> Self {
        let mag = self.magnitude();
        if mag < 1e-10 {
            return Self::new(0.0, 0.0, -1.0); // Default forward
        }
        Self::new(self.x / mag, self.y / mag, self.z / mag)
    }

    /// Dot product
    pub fn dot(&self, other: &Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Distance to another point
    pub fn distance_to(&self, other: &Self) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Component-wise difference `self - other`
    pub fn sub(&self, other: &Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// Linear interpolation
    pub fn lerp(&self, other: &Self, t: f32) -> Self {
        Self::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
            self.z + (other.z - self.z) * t,
        )
    }

    /// Rotate around the Y axis (yaw)
    pub fn rotate_y(&self, angle_deg: f32) -> Self {
        let rad = angle_deg.to_radians();
        let cos = rad.cos();
        let sin = rad.sin();
        Self::new(
            self.x * cos + self.z * sin,
            self.y,
            -self.x * sin + self.z * cos,
        )
    }

    /// Rotate around the X axis (pitch)
    pub fn rotate_x(&self, angle_deg: f32) -> Self {
        let rad = angle_deg.to_radians();
        let cos = rad.cos();
        let sin = rad.sin();
        Self::new(
            self.x,
            self.y * cos - self.z * sin,
            self.y * sin + self.z * cos,
        )
    }

    /// Rotate around the Z axis (roll)
    pub fn rotate_z(&self, angle_deg: f32) -> Self {
        let rad = angle_deg.to_radians();
        let cos = rad.cos();
        let sin = rad.sin();
        Self::new(
            self.x * cos - self.y * sin,
            self.x * sin + self.y * cos,
            self.z,
        )
    }
}

impl Default for Position3D {
    fn default() -> Self {
        Self::origin()
    }
}

/// Listener orientation (head rotation).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    /// Yaw in degrees (rotation around the vertical axis)
    pub yaw: f32,
    /// Pitch in degrees (looking up/down)
    pub pitch: f32,
    /// Roll in degrees (head tilt)
    pub roll: f32,
}

impl Orientation {
    /// Create new orientation
    pub fn new(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self { yaw, pitch, roll }
    }

    /// Forward-facing orientation (looking down -z)
    pub fn forward() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Get forward vector
    pub fn forward_vector(&self) -> Position3D {
        Position3D::new(0.0, 0.0, -1.0)
            .rotate_x(self.pitch)
            .rotate_y(self.yaw)
    }

    /// Transform a direction from world space to listener space.
    pub fn world_to_listener(&self, world: &Position3D) -> Position3D {
        // Inverse rotation, applied in reverse order
        world
            .rotate_y(-self.yaw)
            .rotate_x(-self.pitch)
            .rotate_z(-self.roll)
    }
}

impl Default for Orientation {
    fn default() -> Self {
        Self::forward()
    }
}

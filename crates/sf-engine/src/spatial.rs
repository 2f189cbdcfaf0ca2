//! Ellipsoid spatialization
//!
//! Distance-based gain falloff between two nested ellipsoids around a
//! directed sound source: full intensity at or inside the inner
//! surface, a 0 dB → −20 dB linear-in-dB slope between the surfaces,
//! and silence at or beyond the outer surface.
//!
//! Each surface is modelled by a direction-dependent radius that blends
//! the front extent into the back extent by `(1 + cos θ) / 2`, where θ
//! is the angle between the source direction and the vector to the
//! listener.

use sf_core::{Orientation, Position3D};

/// Attenuation at the outer ellipsoid boundary.
const OUTER_FALLOFF_DB: f32 = -20.0;

/// Spatialization geometry of one sound source.
#[derive(Debug, Clone, PartialEq)]
pub struct SoundGeometry {
    /// Source position, world space.
    pub position: Position3D,
    /// Emission direction, world space; need not be normalized.
    pub direction: Position3D,
    /// Inner ellipsoid extent in front of the source.
    pub min_front: f32,
    /// Outer ellipsoid extent in front of the source.
    pub max_front: f32,
    /// Inner ellipsoid extent behind the source.
    pub min_back: f32,
    /// Outer ellipsoid extent behind the source.
    pub max_back: f32,
    /// Scalar applied on top of the distance gain.
    pub intensity: f32,
    /// When false the source plays unattenuated at the listener.
    pub spatialize: bool,
}

impl Default for SoundGeometry {
    fn default() -> Self {
        Self {
            position: Position3D::origin(),
            direction: Position3D::new(0.0, 0.0, 1.0),
            min_front: 1.0,
            max_front: 10.0,
            min_back: 1.0,
            max_back: 10.0,
            intensity: 1.0,
            spatialize: true,
        }
    }
}

/// Listener state for one render tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenerPose {
    pub position: Position3D,
    pub orientation: Orientation,
    /// Master gain of the listener.
    pub gain: f32,
}

impl Default for ListenerPose {
    fn default() -> Self {
        Self {
            position: Position3D::origin(),
            orientation: Orientation::forward(),
            gain: 1.0,
        }
    }
}

/// Distance gain of `geometry` heard from `listener`, in [0, 1].
pub fn ellipsoid_gain(geometry: &SoundGeometry, listener: &Position3D) -> f32 {
    let offset = listener.sub(&geometry.position);
    let dist = offset.magnitude();
    if dist < 1e-6 {
        return 1.0;
    }

    let direction = geometry.direction.normalize();
    let cos_theta = (offset.dot(&direction) / dist).clamp(-1.0, 1.0);
    let front_blend = (1.0 + cos_theta) * 0.5;

    let inner = geometry.min_front * front_blend + geometry.min_back * (1.0 - front_blend);
    let outer = geometry.max_front * front_blend + geometry.max_back * (1.0 - front_blend);

    if dist <= inner {
        return 1.0;
    }
    if dist >= outer || outer <= inner {
        return 0.0;
    }

    let t = (dist - inner) / (outer - inner);
    10.0f32.powf(OUTER_FALLOFF_DB * t / 20.0)
}

/// Source position transformed into listener space.
pub fn listener_space_position(geometry: &SoundGeometry, listener: &ListenerPose) -> Position3D {
    let relative = geometry.position.sub(&listener.position);
    listener.orientation.world_to_listener(&relative)
}

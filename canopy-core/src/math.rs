//! Small vector helpers layered on top of [`glam::Vec3`].

use glam::Vec3;

/// Extra vector operations used by the growth model.
pub trait VecExt {
    /// Length of the projection onto the horizontal (x, y) plane.
    fn horizontal_length(self) -> f32;

    /// Returns some vector perpendicular to `self`.
    ///
    /// Crosses with +Z, or with +X when `self` is vertical, so the result is
    /// non-zero for any non-zero input.
    fn one_perpendicular(self) -> Vec3;
}

impl VecExt for Vec3 {
    #[inline]
    fn horizontal_length(self) -> f32 {
        self.truncate().length()
    }

    #[inline]
    fn one_perpendicular(self) -> Vec3 {
        let axis = if self.x != 0.0 || self.y != 0.0 {
            Vec3::Z
        } else {
            Vec3::X
        };
        self.cross(axis)
    }
}

//! Tile bounding volumes
//!
//! The three 3D Tiles bounding volume kinds share one sum type. Each can be
//! reduced to an enclosing [`Aabb`], and streaming decisions use a planar
//! X/Y overlap test on that box: height never prunes a tile here, callers
//! that need 3D culling filter afterwards.

use std::f64::consts::PI;

use crate::core::types::{DMat4, DVec3};
use crate::math::Aabb;

/// Box, region or sphere bounding volume
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BoundingVolume {
    /// Center plus three half-axis vectors (may be rotated)
    Box { center: DVec3, half_axes: [DVec3; 3] },
    /// Geographic extents in radians, heights in meters
    Region {
        west: f64,
        south: f64,
        east: f64,
        north: f64,
        min_height: f64,
        max_height: f64,
    },
    Sphere { center: DVec3, radius: f64 },
}

impl BoundingVolume {
    /// Axis-aligned box volume covering `aabb` exactly
    pub fn from_aabb(aabb: &Aabb) -> Self {
        let half = aabb.half_extent();
        BoundingVolume::Box {
            center: aabb.center(),
            half_axes: [
                DVec3::new(half.x, 0.0, 0.0),
                DVec3::new(0.0, half.y, 0.0),
                DVec3::new(0.0, 0.0, half.z),
            ],
        }
    }

    /// Decode a 3D Tiles `box` array (12 numbers)
    pub fn from_box_array(values: &[f64]) -> Option<Self> {
        if values.len() != 12 || !all_finite(values) {
            return None;
        }
        let v = |i: usize| DVec3::new(values[i], values[i + 1], values[i + 2]);
        Some(BoundingVolume::Box {
            center: v(0),
            half_axes: [v(3), v(6), v(9)],
        })
    }

    /// Decode a 3D Tiles `region` array (6 numbers)
    pub fn from_region_array(values: &[f64]) -> Option<Self> {
        if values.len() != 6 || !all_finite(values) {
            return None;
        }
        Some(BoundingVolume::Region {
            west: values[0],
            south: values[1],
            east: values[2],
            north: values[3],
            min_height: values[4],
            max_height: values[5],
        })
    }

    /// Decode a 3D Tiles `sphere` array (4 numbers)
    pub fn from_sphere_array(values: &[f64]) -> Option<Self> {
        if values.len() != 4 || !all_finite(values) || values[3] < 0.0 {
            return None;
        }
        Some(BoundingVolume::Sphere {
            center: DVec3::new(values[0], values[1], values[2]),
            radius: values[3],
        })
    }

    /// Enclosing axis-aligned box.
    ///
    /// Exact for axis-aligned boxes. Regions map to a box in their own
    /// (longitude, latitude, height) space, spanning every longitude when
    /// they cross the antimeridian.
    pub fn to_box(&self) -> Aabb {
        match *self {
            BoundingVolume::Box { center, half_axes } => {
                let extent = half_axes[0].abs() + half_axes[1].abs() + half_axes[2].abs();
                Aabb::from_center_half_extent(center, extent)
            }
            BoundingVolume::Region { west, south, east, north, min_height, max_height } => {
                // west > east wraps across the antimeridian
                let (min_lon, max_lon) = if west <= east {
                    (west, east)
                } else {
                    (east.min(-PI), west.max(PI))
                };
                Aabb::new(
                    DVec3::new(min_lon, south.min(north), min_height.min(max_height)),
                    DVec3::new(max_lon, south.max(north), min_height.max(max_height)),
                )
            }
            BoundingVolume::Sphere { center, radius } => {
                Aabb::from_center_half_extent(center, DVec3::splat(radius))
            }
        }
    }

    /// Planar (X/Y) overlap with `other`; height is ignored
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.to_box().intersects_planar(other)
    }

    /// Enclosing box after applying `transform`.
    ///
    /// Regions are geographic and never transformed.
    pub fn transformed(&self, transform: &DMat4) -> Aabb {
        match self {
            BoundingVolume::Region { .. } => self.to_box(),
            _ if *transform == DMat4::IDENTITY => self.to_box(),
            _ => self.to_box().transformed(transform),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BoundingVolume::Box { .. } => "box",
            BoundingVolume::Region { .. } => "region",
            BoundingVolume::Sphere { .. } => "sphere",
        }
    }
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_to_box_exact() {
        let aabb = Aabb::new(DVec3::new(-2.0, 0.0, 1.0), DVec3::new(2.0, 4.0, 3.0));
        let volume = BoundingVolume::from_aabb(&aabb);
        assert_eq!(volume.to_box(), aabb);
    }

    #[test]
    fn test_rotated_box_encloses() {
        let volume = BoundingVolume::from_box_array(&[
            0.0, 0.0, 0.0,
            1.0, 1.0, 0.0,
            -1.0, 1.0, 0.0,
            0.0, 0.0, 1.0,
        ]).unwrap();
        let aabb = volume.to_box();
        assert_eq!(aabb.min, DVec3::new(-2.0, -2.0, -1.0));
        assert_eq!(aabb.max, DVec3::new(2.0, 2.0, 1.0));
    }

    #[test]
    fn test_sphere_to_box() {
        let volume = BoundingVolume::from_sphere_array(&[1.0, 2.0, 3.0, 0.5]).unwrap();
        let aabb = volume.to_box();
        assert_eq!(aabb.min, DVec3::new(0.5, 1.5, 2.5));
        assert_eq!(aabb.max, DVec3::new(1.5, 2.5, 3.5));
    }

    #[test]
    fn test_region_to_box() {
        let volume = BoundingVolume::from_region_array(&[-0.2, 0.8, -0.1, 0.9, 0.0, 50.0]).unwrap();
        let aabb = volume.to_box();
        assert_eq!(aabb.min, DVec3::new(-0.2, 0.8, 0.0));
        assert_eq!(aabb.max, DVec3::new(-0.1, 0.9, 50.0));
    }

    #[test]
    fn test_region_across_antimeridian_encloses() {
        let volume = BoundingVolume::from_region_array(&[3.1, 0.0, -3.1, 0.1, 0.0, 1.0]).unwrap();
        let aabb = volume.to_box();
        assert_eq!(aabb.min.x, -PI);
        assert_eq!(aabb.max.x, PI);
        assert_eq!((aabb.min.y, aabb.max.y), (0.0, 0.1));

        // Both sides of the date line are inside the region
        assert!(volume.intersects(&Aabb::from_planar(3.12, 0.02, 3.13, 0.03)));
        assert!(volume.intersects(&Aabb::from_planar(-3.13, 0.02, -3.12, 0.03)));
        assert!(!volume.intersects(&Aabb::from_planar(3.12, 0.5, 3.13, 0.6)));
    }

    #[test]
    fn test_wrong_lengths_rejected() {
        assert!(BoundingVolume::from_box_array(&[0.0; 11]).is_none());
        assert!(BoundingVolume::from_region_array(&[0.0; 7]).is_none());
        assert!(BoundingVolume::from_sphere_array(&[0.0; 3]).is_none());
        assert!(BoundingVolume::from_sphere_array(&[0.0, 0.0, 0.0, f64::NAN]).is_none());
    }

    #[test]
    fn test_intersects_is_planar() {
        let volume = BoundingVolume::from_sphere_array(&[0.0, 0.0, 1000.0, 1.0]).unwrap();
        let ground = Aabb::from_planar(-0.5, -0.5, 0.5, 0.5);
        let elsewhere = Aabb::from_planar(5.0, 5.0, 6.0, 6.0);
        assert!(volume.intersects(&ground));
        assert!(!volume.intersects(&elsewhere));
    }

    #[test]
    fn test_region_ignores_transform() {
        let volume = BoundingVolume::from_region_array(&[0.0, 0.0, 0.1, 0.1, 0.0, 1.0]).unwrap();
        let shifted = volume.transformed(&DMat4::from_translation(DVec3::splat(100.0)));
        assert_eq!(shifted, volume.to_box());
    }
}

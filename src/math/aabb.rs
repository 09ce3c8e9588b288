//! Axis-aligned bounding box

use crate::core::types::{DMat4, DVec3};

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Create AABB from center and half-extents
    pub fn from_center_half_extent(center: DVec3, half_extent: DVec3) -> Self {
        Self {
            min: center - half_extent,
            max: center + half_extent,
        }
    }

    /// Planar area with zero height, handy for areas of interest
    pub fn from_planar(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min: DVec3::new(min_x, min_y, 0.0),
            max: DVec3::new(max_x, max_y, 0.0),
        }
    }

    /// Get center point
    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    /// Get half-extents
    pub fn half_extent(&self) -> DVec3 {
        self.size() * 0.5
    }

    /// Eight corners, bit 0 = x, bit 1 = y, bit 2 = z
    pub fn corners(&self) -> [DVec3; 8] {
        std::array::from_fn(|i| DVec3::new(
            if i & 1 != 0 { self.max.x } else { self.min.x },
            if i & 2 != 0 { self.max.y } else { self.min.y },
            if i & 4 != 0 { self.max.z } else { self.min.z },
        ))
    }

    /// Check if point is inside AABB
    pub fn contains_point(&self, p: DVec3) -> bool {
        p.x >= self.min.x && p.x <= self.max.x &&
        p.y >= self.min.y && p.y <= self.max.y &&
        p.z >= self.min.z && p.z <= self.max.z
    }

    /// Check if two AABBs intersect in all three axes
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.intersects_planar(other) &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Check if two AABBs overlap on the X/Y plane, ignoring height
    pub fn intersects_planar(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y
    }

    /// Expand AABB to include point
    pub fn expand(&mut self, point: DVec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Return merged AABB containing both
    pub fn merged(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Smallest AABB enclosing this box after an affine transform
    pub fn transformed(&self, transform: &DMat4) -> Aabb {
        let corners = self.corners();
        let first = transform.transform_point3(corners[0]);
        let mut out = Aabb::new(first, first);
        for corner in &corners[1..] {
            out.expand(transform.transform_point3(*corner));
        }
        out
    }

    /// Get child quadrant AABB for planar quadtree subdivision
    /// index: 0-3 representing xy quadrant (bit 0=x, bit 1=y); height is kept
    pub fn child_quadrant(&self, index: u8) -> Aabb {
        let center = self.center();
        let mut min = self.min;
        let mut max = self.max;

        if index & 1 != 0 { min.x = center.x } else { max.x = center.x }
        if index & 2 != 0 { min.y = center.y } else { max.y = center.y }

        Aabb { min, max }
    }
}

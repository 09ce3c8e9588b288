//! View frustum for culling

use crate::core::types::{DMat4, DVec3, DVec4};
use super::aabb::Aabb;

/// A plane defined by normal and distance from origin
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: DVec3,
    pub distance: f64,
}

impl Plane {
    pub fn new(normal: DVec3, distance: f64) -> Self {
        Self { normal, distance }
    }

    /// Signed distance from point to plane (positive = in front)
    pub fn distance_to_point(&self, point: DVec3) -> f64 {
        self.normal.dot(point) + self.distance
    }
}

/// Result of classifying a box against a frustum
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Containment {
    Outside,
    Intersecting,
    Inside,
}

/// View frustum with 6 planes (Near, Far, Left, Right, Top, Bottom)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Build a frustum from planes supplied by a camera provider
    pub fn from_planes(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    /// Extract frustum planes from view-projection matrix
    pub fn from_view_projection(vp: &DMat4) -> Self {
        let m = vp.to_cols_array_2d();
        let row = |r: usize| DVec4::new(m[0][r], m[1][r], m[2][r], m[3][r]);
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));

        let left = Self::normalize_plane(r3 + r0);
        let right = Self::normalize_plane(r3 - r0);
        let bottom = Self::normalize_plane(r3 + r1);
        let top = Self::normalize_plane(r3 - r1);
        // glam projections map depth to [0, 1]
        let near = Self::normalize_plane(r2);
        let far = Self::normalize_plane(r3 - r2);

        Self {
            planes: [near, far, left, right, top, bottom],
        }
    }

    fn normalize_plane(plane: DVec4) -> Plane {
        let normal = DVec3::new(plane.x, plane.y, plane.z);
        let len = normal.length();
        Plane {
            normal: normal / len,
            distance: plane.w / len,
        }
    }

    /// Check if point is inside frustum
    pub fn contains_point(&self, point: DVec3) -> bool {
        self.planes.iter().all(|plane| plane.distance_to_point(point) >= 0.0)
    }

    /// Check if AABB intersects frustum (conservative test)
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.classify_aabb(aabb) != Containment::Outside
    }

    /// Classify an AABB as outside, intersecting or fully inside
    pub fn classify_aabb(&self, aabb: &Aabb) -> Containment {
        let mut result = Containment::Inside;

        for plane in &self.planes {
            // Find the corner most aligned with plane normal (p-vertex)
            let p = DVec3::new(
                if plane.normal.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if plane.normal.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if plane.normal.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );

            // If p-vertex is outside, AABB is completely outside
            if plane.distance_to_point(p) < 0.0 {
                return Containment::Outside;
            }

            // n-vertex outside means the box straddles this plane
            let n = DVec3::new(
                if plane.normal.x >= 0.0 { aabb.min.x } else { aabb.max.x },
                if plane.normal.y >= 0.0 { aabb.min.y } else { aabb.max.y },
                if plane.normal.z >= 0.0 { aabb.min.z } else { aabb.max.z },
            );
            if plane.distance_to_point(n) < 0.0 {
                result = Containment::Intersecting;
            }
        }

        result
    }
}

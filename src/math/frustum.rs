//! Five-plane view frustum for hierarchical culling
//!
//! The frustum is a pyramid: an apex at the camera and four far corners.
//! There is no near plane. Boxes are classified against each plane by
//! testing only the nearest and farthest box corner along the plane normal;
//! planes that a box is fully inside of are dropped from the clip mask so
//! that no descendant box is tested against them again.

use crate::core::config::FrustumConfig;
use crate::core::types::{Mat4, Vec3};
use super::aabb::Aabb;

/// Bit `i` set means plane `i` still has to be tested.
pub type ClipMask = u32;

/// Number of frustum planes.
pub const PLANE_COUNT: usize = 5;

/// Mask with every plane active; the starting mask for a culling pass.
pub const ALL_PLANES: ClipMask = (1 << PLANE_COUNT) - 1;

/// A frustum plane anchored at one of the frustum points. The normal points
/// out of the frustum.
#[derive(Clone, Copy, Debug)]
pub struct Plane {
    /// Index of the frustum point the plane passes through.
    anchor: usize,
    /// Anchor point after the last transform.
    point: Vec3,
    normal_untransformed: Vec3,
    normal: Vec3,
    /// Box corner index closest to the plane along its normal.
    nearest_corner: u32,
    /// Box corner index farthest along the normal (`nearest ^ 7`).
    farthest_corner: u32,
}

impl Plane {
    /// A free-standing plane through `point` with outward `normal`.
    pub fn through(point: Vec3, normal: Vec3) -> Self {
        let mut plane = Self {
            anchor: 0,
            point,
            normal_untransformed: normal.normalize(),
            normal: Vec3::ZERO,
            nearest_corner: 0,
            farthest_corner: 7,
        };
        plane.set_normal(plane.normal_untransformed);
        plane
    }

    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    pub fn point(&self) -> Vec3 {
        self.point
    }

    fn set_normal(&mut self, normal: Vec3) {
        self.normal = normal;
        let mut nearest = 0;
        if normal.x < 0.0 {
            nearest |= 1;
        }
        if normal.y < 0.0 {
            nearest |= 2;
        }
        if normal.z < 0.0 {
            nearest |= 4;
        }
        self.nearest_corner = nearest;
        self.farthest_corner = nearest ^ 7;
    }

    fn transform(&mut self, m: &Mat4, points: &[Vec3; PLANE_COUNT]) {
        self.point = points[self.anchor];
        self.set_normal(m.transform_vector3(self.normal_untransformed).normalize());
    }

    /// Signed distance of `p` along the normal (positive = outside).
    pub fn distance_to_point(&self, p: Vec3) -> f32 {
        self.normal.dot(p - self.point)
    }

    /// The whole box lies on the outer side of the plane.
    pub fn is_complete_outside(&self, bounds: &Aabb) -> bool {
        self.distance_to_point(bounds.corner(self.nearest_corner)) >= 0.0
    }

    /// The whole box lies on the inner side of the plane.
    pub fn is_complete_inside(&self, bounds: &Aabb) -> bool {
        self.distance_to_point(bounds.corner(self.farthest_corner)) <= 0.0
    }
}

/// View frustum with 5 planes (four sides through the apex, one far plane)
#[derive(Clone, Debug)]
pub struct Frustum {
    points_untransformed: [Vec3; PLANE_COUNT],
    points: [Vec3; PLANE_COUNT],
    planes: [Plane; PLANE_COUNT],
    bounds: Aabb,
}

impl Frustum {
    /// Pyramid looking down -Z from the origin.
    ///
    /// * `fovy_degrees` - vertical field of view
    /// * `aspect` - width / height
    /// * `far` - distance of the far corners
    pub fn new(fovy_degrees: f32, aspect: f32, far: f32) -> Self {
        let tangent = (fovy_degrees.to_radians() * 0.5).tan();
        let dy = far * tangent;
        let dx = dy * aspect;

        let points_untransformed = [
            Vec3::ZERO,
            Vec3::new(-dx, -dy, -far),
            Vec3::new(dx, -dy, -far),
            Vec3::new(dx, dy, -far),
            Vec3::new(-dx, dy, -far),
        ];

        // (anchor, b, c): normal = (b - anchor) x (c - anchor)
        const PLANE_POINTS: [(usize, usize, usize); PLANE_COUNT] =
            [(0, 1, 2), (0, 2, 3), (0, 3, 4), (0, 4, 1), (1, 3, 2)];

        let planes = PLANE_POINTS.map(|(a, b, c)| {
            let u = points_untransformed[b] - points_untransformed[a];
            let v = points_untransformed[c] - points_untransformed[a];
            let mut plane = Plane::through(points_untransformed[a], u.cross(v));
            plane.anchor = a;
            plane
        });

        let mut frustum = Self {
            points_untransformed,
            points: points_untransformed,
            planes,
            bounds: Aabb::EMPTY,
        };
        frustum.transform(&Mat4::IDENTITY);
        frustum
    }

    pub fn from_config(config: &FrustumConfig) -> Self {
        Self::new(config.fovy_degrees, config.aspect, config.far)
    }

    /// Move the frustum by `m` (camera-to-world). Recomputes the transformed
    /// points, the plane normals with their corner indices, and the bounds.
    pub fn transform(&mut self, m: &Mat4) {
        self.bounds.reset();
        for (point, untransformed) in self.points.iter_mut().zip(&self.points_untransformed) {
            *point = m.transform_point3(*untransformed);
            self.bounds.add_point(*point);
        }
        for plane in &mut self.planes {
            plane.transform(m, &self.points);
        }
    }

    /// Classify `bounds` against the planes still set in `clip_mask`.
    ///
    /// Returns `None` if the box is completely outside. Otherwise returns the
    /// narrowed mask: planes the box is fully inside of are cleared. A zero
    /// mask means an ancestor was fully inside, so the box is accepted
    /// without any test.
    pub fn overlap(&self, clip_mask: ClipMask, bounds: &Aabb) -> Option<ClipMask> {
        if clip_mask == 0 {
            return Some(0);
        }

        let mut mask = clip_mask;
        for (i, plane) in self.planes.iter().enumerate() {
            let bit = 1 << i;
            if clip_mask & bit == 0 {
                continue;
            }
            if plane.is_complete_outside(bounds) {
                return None;
            }
            if plane.is_complete_inside(bounds) {
                mask &= !bit;
            }
        }

        // Catches boxes no single plane rejects but that miss the pyramid.
        bounds.intersects(&self.bounds).then_some(mask)
    }

    pub fn planes(&self) -> &[Plane; PLANE_COUNT] {
        &self.planes
    }

    /// Apex followed by the four far corners, transformed.
    pub fn points(&self) -> &[Vec3; PLANE_COUNT] {
        &self.points
    }

    /// Bounding box of the transformed points.
    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }
}

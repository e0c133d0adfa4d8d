//! Mathematical utilities and data structures

pub mod aabb;
pub mod frustum;
pub mod ray;

pub use aabb::Aabb;
pub use frustum::{ClipMask, Frustum, Plane, ALL_PLANES, PLANE_COUNT};
pub use ray::Ray;

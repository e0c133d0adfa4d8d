//! The decoded whole-scene record (chunk 0 of a container)

use crate::core::types::{Mat4, Vec3};
use crate::math::Aabb;
use crate::container::object::Material;
use crate::scene::sink::SceneObjectId;

/// A tile as listed in the scene record: where it is and which chunk holds
/// its geometry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileDescriptor {
    pub bounds: Aabb,
    /// Chunk index of the tile's payload.
    pub index: u32,
}

/// One key frame of the demo drive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimationKey {
    pub car_position: Vec3,
    /// Euler angles in degrees; `z` is the heading.
    pub car_rotation: Vec3,
}

impl AnimationKey {
    /// Camera-to-world matrix of a chase camera: `distance` away from the
    /// car, turned with its heading and tilted `tilt_degrees` up from
    /// looking straight down.
    pub fn follow_camera(&self, tilt_degrees: f32, distance: f32) -> Mat4 {
        Mat4::from_translation(self.car_position)
            * Mat4::from_rotation_z(self.car_rotation.z.to_radians())
            * Mat4::from_rotation_x(tilt_degrees.to_radians())
            * Mat4::from_translation(Vec3::new(0.0, 0.0, distance))
    }
}

/// Key frames, one per rendered frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AnimationPath {
    keys: Vec<AnimationKey>,
}

impl AnimationPath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: AnimationKey) {
        self.keys.push(key);
    }

    pub fn key(&self, frame: usize) -> Option<&AnimationKey> {
        self.keys.get(frame)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnimationKey> {
        self.keys.iter()
    }
}

/// Everything chunk 0 describes besides the tile payloads themselves.
#[derive(Clone, Debug, Default)]
pub struct CitymodelScene {
    /// File-global materials; tile chunks refer back to them by index.
    pub materials: Vec<Material>,
    pub tiles: Vec<TileDescriptor>,
    /// Model shown at the car position, if the container has one.
    pub carsor: Option<SceneObjectId>,
    pub animation_path: AnimationPath,
    pub names: Vec<String>,
    /// Pairs of points, one pair per label.
    pub name_points: Vec<Vec3>,
    pub route_points: Vec<Vec3>,
}

impl CitymodelScene {
    /// Union of all tile bounds.
    pub fn bounds(&self) -> Aabb {
        let mut bounds = Aabb::EMPTY;
        for tile in &self.tiles {
            bounds.add_box(&tile.bounds);
        }
        bounds
    }
}

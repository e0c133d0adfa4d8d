//! Per-tile ownership set
//!
//! Everything the reader creates while decoding one chunk is registered
//! here, so a tile can be attached to and torn out of the scene as a unit.

use crate::container::object::{GeometryNode, Material};
use crate::math::Ray;
use crate::scene::sink::{ResourceId, SceneObjectId, SceneSink};

/// Scene objects, resources, materials and geometry created for one tile.
///
/// Teardown order is fixed: mesh nodes leave the render list first, then
/// scene objects are destroyed (newest first), then resources.
#[derive(Debug, Default)]
pub struct TileResourceContainer {
    scene_objects: Vec<SceneObjectId>,
    mesh_nodes: Vec<(SceneObjectId, u32)>,
    resources: Vec<ResourceId>,
    materials: Vec<Material>,
    geometry_nodes: Vec<GeometryNode>,
    root: Option<SceneObjectId>,
    published: bool,
}

impl TileResourceContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_scene_object(&mut self, object: SceneObjectId) {
        self.scene_objects.push(object);
    }

    /// Record a mesh node for the render list. The node itself must also be
    /// registered with [`add_scene_object`](Self::add_scene_object).
    pub fn add_mesh_node(&mut self, mesh: SceneObjectId, render_order: u32) {
        self.mesh_nodes.push((mesh, render_order));
    }

    pub fn add_resource(&mut self, resource: ResourceId) {
        self.resources.push(resource);
    }

    pub fn add_material(&mut self, material: Material) {
        self.materials.push(material);
    }

    pub fn add_geometry_node(&mut self, geometry: GeometryNode) {
        self.geometry_nodes.push(geometry);
    }

    pub fn set_root(&mut self, root: SceneObjectId) {
        self.root = Some(root);
    }

    /// Top-level node of the decoded chunk, if it had one.
    pub fn root(&self) -> Option<SceneObjectId> {
        self.root
    }

    pub fn scene_objects(&self) -> &[SceneObjectId] {
        &self.scene_objects
    }

    pub fn mesh_nodes(&self) -> &[(SceneObjectId, u32)] {
        &self.mesh_nodes
    }

    pub fn resources(&self) -> &[ResourceId] {
        &self.resources
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn geometry_nodes(&self) -> &[GeometryNode] {
        &self.geometry_nodes
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    pub fn is_empty(&self) -> bool {
        self.scene_objects.is_empty() && self.resources.is_empty()
    }

    /// Put the mesh nodes into the render list.
    pub fn publish<S: SceneSink + ?Sized>(&mut self, sink: &mut S) {
        if self.published {
            return;
        }
        for &(mesh, order) in &self.mesh_nodes {
            sink.add_mesh_node(mesh, order);
        }
        self.published = true;
    }

    /// Destroy everything this container owns.
    pub fn destroy<S: SceneSink + ?Sized>(self, sink: &mut S) {
        log::trace!(
            "Destroying tile resources: {} objects, {} meshes, {} resources",
            self.scene_objects.len(),
            self.mesh_nodes.len(),
            self.resources.len()
        );
        if self.published {
            for &(mesh, _) in &self.mesh_nodes {
                sink.remove_mesh_node(mesh);
            }
        }
        for &object in self.scene_objects.iter().rev() {
            sink.destroy(object);
        }
        for &resource in &self.resources {
            sink.destroy_resource(resource);
        }
    }

    /// Nearest triangle hit over this tile's geometry. `nearest` holds the
    /// best distance so far and is lowered on a closer hit.
    pub fn compute_intersection(&self, ray: &Ray, nearest: &mut f32) -> bool {
        let mut hit = false;
        for geometry in &self.geometry_nodes {
            let positions = &geometry.positions;
            for tri in geometry.indices.chunks_exact(3) {
                let (Some(&p0), Some(&p1), Some(&p2)) = (
                    positions.get(tri[0] as usize),
                    positions.get(tri[1] as usize),
                    positions.get(tri[2] as usize),
                ) else {
                    continue;
                };
                if let Some(t) = ray.intersect_triangle(p0, p1, p2) {
                    if t < *nearest {
                        *nearest = t;
                        hit = true;
                    }
                }
            }
        }
        hit
    }
}

//! Headless scene sink that keeps the scene graph in plain maps.
//!
//! Used by the driver binary, the benchmarks and the tests. It also checks
//! teardown order: destroying a mesh node that is still in the render list,
//! or a resource that a live binding or sampler still uses, is counted as an
//! ordering violation and logged.

use std::collections::HashMap;

use crate::core::types::{Vec3, Vec4};

use super::sink::{
    BlendMode, EffectId, GeometryInputs, MeshSetup, ResourceId, SceneObjectId, SceneObjectKind,
    SceneSink, TextureFormat, VertexData,
};

/// A scene object as the memory sink sees it.
#[derive(Clone, Debug)]
pub struct MemoryObject {
    pub kind: SceneObjectKind,
    pub children: Vec<SceneObjectId>,
    pub translation: Vec3,
    pub rotation: Vec3,
    pub scaling: Vec3,
    pub effect: Option<EffectId>,
    pub blend_mode: BlendMode,
    pub color: Option<Vec4>,
    pub sampler: Option<SceneObjectId>,
    pub texture: Option<ResourceId>,
    pub inputs: GeometryInputs,
    pub mesh: Option<MeshSetup>,
}

impl MemoryObject {
    fn new(kind: SceneObjectKind) -> Self {
        Self {
            kind,
            children: Vec::new(),
            translation: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scaling: Vec3::ONE,
            effect: None,
            blend_mode: BlendMode::Opaque,
            color: None,
            sampler: None,
            texture: None,
            inputs: GeometryInputs::default(),
            mesh: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryResourceKind {
    VertexArray2f,
    VertexArray3f,
    VertexArray4f,
    IndexArray,
    Texture2D,
}

#[derive(Clone, Copy, Debug)]
pub struct MemoryResource {
    pub kind: MemoryResourceKind,
    /// Element count (vertices, indices) or byte count for textures.
    pub len: usize,
    pub width: u32,
    pub height: u32,
}

/// In-memory scene sink.
#[derive(Debug, Default)]
pub struct MemoryScene {
    objects: HashMap<SceneObjectId, MemoryObject>,
    resources: HashMap<ResourceId, MemoryResource>,
    effects: Vec<String>,
    render_list: Vec<(SceneObjectId, u32)>,
    next_id: u64,
    order_violations: usize,
}

impl MemoryScene {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert(&mut self, kind: SceneObjectKind) -> SceneObjectId {
        let id = SceneObjectId(self.alloc_id());
        self.objects.insert(id, MemoryObject::new(kind));
        id
    }

    fn insert_resource(&mut self, kind: MemoryResourceKind, len: usize) -> ResourceId {
        let id = ResourceId(self.alloc_id());
        self.resources.insert(id, MemoryResource { kind, len, width: 0, height: 0 });
        id
    }

    fn object_mut(&mut self, id: SceneObjectId) -> Option<&mut MemoryObject> {
        let object = self.objects.get_mut(&id);
        if object.is_none() {
            log::warn!("MemoryScene: no live object {:?}", id);
        }
        object
    }

    fn violation(&mut self, what: String) {
        log::warn!("MemoryScene: teardown order violation: {}", what);
        self.order_violations += 1;
    }

    pub fn object(&self, id: SceneObjectId) -> Option<&MemoryObject> {
        self.objects.get(&id)
    }

    pub fn resource(&self, id: ResourceId) -> Option<&MemoryResource> {
        self.resources.get(&id)
    }

    pub fn is_live(&self, id: SceneObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn is_resource_live(&self, id: ResourceId) -> bool {
        self.resources.contains_key(&id)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn count_of(&self, kind: SceneObjectKind) -> usize {
        self.objects.values().filter(|o| o.kind == kind).count()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn effects(&self) -> &[String] {
        &self.effects
    }

    /// Mesh nodes with their render order, in insertion order.
    pub fn render_list(&self) -> &[(SceneObjectId, u32)] {
        &self.render_list
    }

    pub fn in_render_list(&self, mesh: SceneObjectId) -> bool {
        self.render_list.iter().any(|(m, _)| *m == mesh)
    }

    /// Teardown steps that happened in the wrong order so far.
    pub fn order_violations(&self) -> usize {
        self.order_violations
    }

    fn resource_in_use(&self, resource: ResourceId) -> bool {
        self.objects.values().any(|o| {
            o.texture == Some(resource) || o.inputs.resources().any(|r| r == resource)
        })
    }
}

impl SceneSink for MemoryScene {
    fn create_effect(&mut self, name: &str) -> EffectId {
        self.effects.push(name.to_string());
        EffectId(self.effects.len() as u32 - 1)
    }

    fn create_node(&mut self) -> SceneObjectId {
        self.insert(SceneObjectKind::Node)
    }

    fn create_mesh_node(&mut self) -> SceneObjectId {
        self.insert(SceneObjectKind::MeshNode)
    }

    fn add_child(&mut self, parent: SceneObjectId, child: SceneObjectId) {
        if let Some(p) = self.object_mut(parent) {
            p.children.push(child);
        }
    }

    fn set_translation(&mut self, node: SceneObjectId, translation: Vec3) {
        if let Some(n) = self.object_mut(node) {
            n.translation = translation;
        }
    }

    fn set_rotation(&mut self, node: SceneObjectId, rotation: Vec3) {
        if let Some(n) = self.object_mut(node) {
            n.rotation = rotation;
        }
    }

    fn set_scaling(&mut self, node: SceneObjectId, scaling: Vec3) {
        if let Some(n) = self.object_mut(node) {
            n.scaling = scaling;
        }
    }

    fn create_appearance(&mut self, effect: EffectId) -> SceneObjectId {
        let id = self.insert(SceneObjectKind::Appearance);
        if let Some(a) = self.object_mut(id) {
            a.effect = Some(effect);
        }
        id
    }

    fn set_blend_mode(&mut self, appearance: SceneObjectId, mode: BlendMode) {
        if let Some(a) = self.object_mut(appearance) {
            a.blend_mode = mode;
        }
    }

    fn set_color(&mut self, appearance: SceneObjectId, color: Vec4) {
        if let Some(a) = self.object_mut(appearance) {
            a.color = Some(color);
        }
    }

    fn create_texture_sampler(&mut self, texture: ResourceId) -> SceneObjectId {
        let id = self.insert(SceneObjectKind::TextureSampler);
        if let Some(s) = self.object_mut(id) {
            s.texture = Some(texture);
        }
        id
    }

    fn set_texture(&mut self, appearance: SceneObjectId, sampler: SceneObjectId) {
        if let Some(a) = self.object_mut(appearance) {
            a.sampler = Some(sampler);
        }
    }

    fn create_geometry_binding(&mut self, effect: EffectId, inputs: &GeometryInputs) -> SceneObjectId {
        let id = self.insert(SceneObjectKind::GeometryBinding);
        if let Some(g) = self.object_mut(id) {
            g.effect = Some(effect);
            g.inputs = *inputs;
        }
        id
    }

    fn set_mesh(&mut self, mesh: SceneObjectId, setup: MeshSetup) {
        if let Some(m) = self.object_mut(mesh) {
            m.mesh = Some(setup);
        }
    }

    fn add_mesh_node(&mut self, mesh: SceneObjectId, order: u32) {
        if !self.in_render_list(mesh) {
            self.render_list.push((mesh, order));
        }
    }

    fn remove_mesh_node(&mut self, mesh: SceneObjectId) {
        self.render_list.retain(|(m, _)| *m != mesh);
    }

    fn create_vertex_array(&mut self, data: VertexData<'_>) -> ResourceId {
        let kind = match data {
            VertexData::Float2(_) => MemoryResourceKind::VertexArray2f,
            VertexData::Float3(_) => MemoryResourceKind::VertexArray3f,
            VertexData::Float4(_) => MemoryResourceKind::VertexArray4f,
        };
        self.insert_resource(kind, data.len())
    }

    fn create_index_array(&mut self, indices: &[u32]) -> ResourceId {
        self.insert_resource(MemoryResourceKind::IndexArray, indices.len())
    }

    fn create_texture_2d(
        &mut self,
        width: u32,
        height: u32,
        _format: TextureFormat,
        data: &[u8],
    ) -> ResourceId {
        let id = self.insert_resource(MemoryResourceKind::Texture2D, data.len());
        if let Some(r) = self.resources.get_mut(&id) {
            r.width = width;
            r.height = height;
        }
        id
    }

    fn destroy(&mut self, object: SceneObjectId) {
        if self.in_render_list(object) {
            self.violation(format!("mesh node {:?} destroyed while in render list", object));
        }
        if self.objects.remove(&object).is_none() {
            log::warn!("MemoryScene: destroy of unknown object {:?}", object);
        }
        for o in self.objects.values_mut() {
            o.children.retain(|c| *c != object);
        }
    }

    fn destroy_resource(&mut self, resource: ResourceId) {
        if self.resource_in_use(resource) {
            self.violation(format!("resource {:?} destroyed while still bound", resource));
        }
        if self.resources.remove(&resource).is_none() {
            log::warn!("MemoryScene: destroy of unknown resource {:?}", resource);
        }
    }
}

//! Scene sink: the capability set the streaming core drives
//!
//! The sink owns whatever actually renders: nodes, appearances, geometry
//! bindings, GPU buffers and the render list. The core only ever sees
//! opaque handles. A [`SharedScene`] wraps one sink in the single lock that
//! the pager worker and the per-frame pass both go through.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::types::{Vec2, Vec3, Vec4};

/// Handle of a scene object (node, mesh node, appearance, binding, sampler).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneObjectId(pub u64);

/// Handle of a client resource (vertex/index buffer, texture).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// Handle of a shader effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EffectId(pub u32);

/// What a [`SceneObjectId`] refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SceneObjectKind {
    Node,
    MeshNode,
    Appearance,
    GeometryBinding,
    TextureSampler,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendMode {
    #[default]
    Opaque,
    /// src-alpha / one-minus-src-alpha, additive alpha channel.
    Alpha,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFormat {
    Astc12x12Rgba,
}

/// Vertex payload handed to the sink for upload.
#[derive(Clone, Copy, Debug)]
pub enum VertexData<'a> {
    Float2(&'a [Vec2]),
    Float3(&'a [Vec3]),
    Float4(&'a [Vec4]),
}

impl VertexData<'_> {
    pub fn len(&self) -> usize {
        match self {
            VertexData::Float2(v) => v.len(),
            VertexData::Float3(v) => v.len(),
            VertexData::Float4(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Buffers feeding one geometry binding. Missing streams stay `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeometryInputs {
    pub positions: Option<ResourceId>,
    pub normals: Option<ResourceId>,
    pub texcoords: Option<ResourceId>,
    pub texcoords2: Option<ResourceId>,
    pub indices: Option<ResourceId>,
}

impl GeometryInputs {
    pub fn resources(&self) -> impl Iterator<Item = ResourceId> {
        [self.positions, self.normals, self.texcoords, self.texcoords2, self.indices]
            .into_iter()
            .flatten()
    }
}

/// Draw state of a mesh node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshSetup {
    pub appearance: SceneObjectId,
    pub geometry: SceneObjectId,
    pub start_index: u32,
    pub index_count: u32,
}

/// Everything the reader and the streamer need from the renderer side.
///
/// Implementations are called with the scene lock held, one mutation per
/// lock acquisition from the pager thread.
pub trait SceneSink: Send {
    fn create_effect(&mut self, name: &str) -> EffectId;

    fn create_node(&mut self) -> SceneObjectId;
    fn create_mesh_node(&mut self) -> SceneObjectId;
    fn add_child(&mut self, parent: SceneObjectId, child: SceneObjectId);
    fn set_translation(&mut self, node: SceneObjectId, translation: Vec3);
    /// Euler angles in degrees.
    fn set_rotation(&mut self, node: SceneObjectId, rotation: Vec3);
    fn set_scaling(&mut self, node: SceneObjectId, scaling: Vec3);

    fn create_appearance(&mut self, effect: EffectId) -> SceneObjectId;
    fn set_blend_mode(&mut self, appearance: SceneObjectId, mode: BlendMode);
    fn set_color(&mut self, appearance: SceneObjectId, color: Vec4);
    fn create_texture_sampler(&mut self, texture: ResourceId) -> SceneObjectId;
    fn set_texture(&mut self, appearance: SceneObjectId, sampler: SceneObjectId);

    fn create_geometry_binding(&mut self, effect: EffectId, inputs: &GeometryInputs) -> SceneObjectId;
    fn set_mesh(&mut self, mesh: SceneObjectId, setup: MeshSetup);
    fn add_mesh_node(&mut self, mesh: SceneObjectId, order: u32);
    fn remove_mesh_node(&mut self, mesh: SceneObjectId);

    fn create_vertex_array(&mut self, data: VertexData<'_>) -> ResourceId;
    fn create_index_array(&mut self, indices: &[u32]) -> ResourceId;
    fn create_texture_2d(
        &mut self,
        width: u32,
        height: u32,
        format: TextureFormat,
        data: &[u8],
    ) -> ResourceId;

    fn destroy(&mut self, object: SceneObjectId);
    fn destroy_resource(&mut self, resource: ResourceId);
}

/// The scene lock: one sink shared between the main thread and the pager.
///
/// Constructed once and cloned into whoever mutates the scene. Never a
/// global.
pub struct SharedScene<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SharedScene<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: SceneSink> SharedScene<S> {
    pub fn new(sink: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sink)),
        }
    }

    /// Run one mutation under the lock and release it again.
    pub fn with<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.lock())
    }

    /// Hold the lock for a longer pass (the per-frame culling and paging).
    ///
    /// A panic inside an earlier holder does not make the scene unusable;
    /// the poisoned guard is recovered.
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S> std::fmt::Debug for SharedScene<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedScene")
            .field("holders", &Arc::strong_count(&self.inner))
            .finish()
    }
}

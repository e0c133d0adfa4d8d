//! Object-graph records and the id table that resolves back-references
//!
//! Every record except `Null` and `Index` gets the next dense [`ObjectId`]
//! when decoding starts; an `Index(i)` record later resolves to that same
//! entry. The container is a DAG, so one material or vertex array can be
//! shared by many nodes.

use std::sync::Arc;

use crate::core::error::FormatError;
use crate::core::types::{Vec3, Vec4};
use crate::scene::citymodel::{CitymodelScene, TileDescriptor};
use crate::scene::sink::{EffectId, GeometryInputs, ResourceId, SceneObjectId};

type LookupResult<T> = std::result::Result<T, FormatError>;

/// Record tags as stored in the stream. The numbering is part of the file
/// format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ObjectTag {
    Null = 0,
    Index = 1,
    Node = 2,
    MeshNode = 3,
    Material = 4,
    GeometryNode = 5,
    VertexArray2f = 6,
    VertexArray3f = 7,
    VertexArray4f = 8,
    IndexArray = 9,
    Texture2D = 10,
    Scene = 11,
    Tile = 12,
}

impl TryFrom<u32> for ObjectTag {
    type Error = FormatError;

    fn try_from(value: u32) -> LookupResult<Self> {
        Ok(match value {
            0 => ObjectTag::Null,
            1 => ObjectTag::Index,
            2 => ObjectTag::Node,
            3 => ObjectTag::MeshNode,
            4 => ObjectTag::Material,
            5 => ObjectTag::GeometryNode,
            6 => ObjectTag::VertexArray2f,
            7 => ObjectTag::VertexArray3f,
            8 => ObjectTag::VertexArray4f,
            9 => ObjectTag::IndexArray,
            10 => ObjectTag::Texture2D,
            11 => ObjectTag::Scene,
            12 => ObjectTag::Tile,
            other => return Err(FormatError::UnknownTag(other)),
        })
    }
}

/// Dense handle into the reader's object table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

/// A decoded material: one appearance bound to one effect.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub appearance: SceneObjectId,
    pub effect: EffectId,
    pub diffuse_color: Vec4,
    pub texture: Option<ResourceId>,
    pub sampler: Option<SceneObjectId>,
}

/// Geometry streams for a mesh, plus CPU copies of positions and indices
/// for picking. Both container encodings produce this same shape.
#[derive(Clone, Debug)]
pub struct GeometryNode {
    pub effect: EffectId,
    pub inputs: GeometryInputs,
    pub positions: Arc<[Vec3]>,
    pub indices: Arc<[u32]>,
}

impl GeometryNode {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }
}

/// One decoded record.
#[derive(Clone, Debug)]
pub enum Object {
    Node(SceneObjectId),
    MeshNode(SceneObjectId),
    Material(Material),
    GeometryNode(GeometryNode),
    VertexArray2f(ResourceId),
    VertexArray3f { resource: ResourceId, data: Arc<[Vec3]> },
    VertexArray4f(ResourceId),
    IndexArray { resource: ResourceId, data: Arc<[u32]> },
    Texture2D(ResourceId),
    Scene(Box<CitymodelScene>),
    Tile(TileDescriptor),
}

impl Object {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Object::Node(_) => "node",
            Object::MeshNode(_) => "mesh node",
            Object::Material(_) => "material",
            Object::GeometryNode(_) => "geometry node",
            Object::VertexArray2f(_) => "vec2 array",
            Object::VertexArray3f { .. } => "vec3 array",
            Object::VertexArray4f(_) => "vec4 array",
            Object::IndexArray { .. } => "index array",
            Object::Texture2D(_) => "texture",
            Object::Scene(_) => "scene",
            Object::Tile(_) => "tile",
        }
    }
}

fn unexpected(expected: &'static str, found: &Object) -> FormatError {
    FormatError::UnexpectedObject { expected, found: found.kind_name() }
}

/// Id → object table. A slot is `None` while its record is still being
/// decoded, so a back-reference into an unfinished record is rejected.
#[derive(Debug, Default)]
pub struct ObjectTable {
    slots: Vec<Option<Object>>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Claim the next id for a record about to be decoded.
    pub fn reserve(&mut self) -> ObjectId {
        self.slots.push(None);
        ObjectId(self.slots.len() as u32 - 1)
    }

    pub fn fill(&mut self, id: ObjectId, object: Object) {
        self.slots[id.0 as usize] = Some(object);
    }

    /// Forget every id from `len` on.
    pub fn truncate(&mut self, len: usize) {
        self.slots.truncate(len);
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Resolve an `Index` record.
    pub fn resolve(&self, index: u32) -> LookupResult<ObjectId> {
        match self.slots.get(index as usize) {
            None => Err(FormatError::IndexOutOfRange { index, len: self.slots.len() }),
            Some(None) => Err(FormatError::UnresolvedIndex(index)),
            Some(Some(_)) => Ok(ObjectId(index)),
        }
    }

    pub fn get(&self, id: ObjectId) -> LookupResult<&Object> {
        match self.slots.get(id.0 as usize) {
            Some(Some(object)) => Ok(object),
            Some(None) => Err(FormatError::UnresolvedIndex(id.0)),
            None => Err(FormatError::IndexOutOfRange { index: id.0, len: self.slots.len() }),
        }
    }

    /// Remove an object, leaving its id unresolvable.
    pub fn take(&mut self, id: ObjectId) -> LookupResult<Object> {
        self.get(id)?;
        self.slots[id.0 as usize]
            .take()
            .ok_or(FormatError::UnresolvedIndex(id.0))
    }

    /// A node or mesh node, usable as a scene-graph child.
    pub fn node(&self, id: ObjectId) -> LookupResult<SceneObjectId> {
        match self.get(id)? {
            Object::Node(node) | Object::MeshNode(node) => Ok(*node),
            other => Err(unexpected("node", other)),
        }
    }

    pub fn material(&self, id: ObjectId) -> LookupResult<Material> {
        match self.get(id)? {
            Object::Material(material) => Ok(*material),
            other => Err(unexpected("material", other)),
        }
    }

    pub fn geometry_node(&self, id: ObjectId) -> LookupResult<&GeometryNode> {
        match self.get(id)? {
            Object::GeometryNode(geometry) => Ok(geometry),
            other => Err(unexpected("geometry node", other)),
        }
    }

    pub fn vec2_array(&self, id: ObjectId) -> LookupResult<ResourceId> {
        match self.get(id)? {
            Object::VertexArray2f(resource) => Ok(*resource),
            other => Err(unexpected("vec2 array", other)),
        }
    }

    pub fn vec3_array(&self, id: ObjectId) -> LookupResult<(ResourceId, Arc<[Vec3]>)> {
        match self.get(id)? {
            Object::VertexArray3f { resource, data } => Ok((*resource, Arc::clone(data))),
            other => Err(unexpected("vec3 array", other)),
        }
    }

    pub fn vec4_array(&self, id: ObjectId) -> LookupResult<ResourceId> {
        match self.get(id)? {
            Object::VertexArray4f(resource) => Ok(*resource),
            other => Err(unexpected("vec4 array", other)),
        }
    }

    pub fn index_array(&self, id: ObjectId) -> LookupResult<(ResourceId, Arc<[u32]>)> {
        match self.get(id)? {
            Object::IndexArray { resource, data } => Ok((*resource, Arc::clone(data))),
            other => Err(unexpected("index array", other)),
        }
    }

    pub fn texture(&self, id: ObjectId) -> LookupResult<ResourceId> {
        match self.get(id)? {
            Object::Texture2D(resource) => Ok(*resource),
            other => Err(unexpected("texture", other)),
        }
    }

    pub fn tile(&self, id: ObjectId) -> LookupResult<TileDescriptor> {
        match self.get(id)? {
            Object::Tile(tile) => Ok(*tile),
            other => Err(unexpected("tile", other)),
        }
    }
}

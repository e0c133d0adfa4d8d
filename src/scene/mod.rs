//! Scene sink interface and the decoded scene record

pub mod citymodel;
pub mod memory;
pub mod sink;

pub use citymodel::{AnimationKey, AnimationPath, CitymodelScene, TileDescriptor};
pub use memory::MemoryScene;
pub use sink::{
    BlendMode, EffectId, GeometryInputs, MeshSetup, ResourceId, SceneObjectId, SceneObjectKind,
    SceneSink, SharedScene, TextureFormat, VertexData,
};

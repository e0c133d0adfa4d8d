//! Binary scene container: chunk index, decompression and record decoding

pub mod cursor;
pub mod mesh_codec;
pub mod object;
pub mod reader;

#[cfg(test)]
pub(crate) mod fixture;

pub use cursor::ByteCursor;
pub use mesh_codec::{DecodedMesh, MeshCodec, OpenCtmCodec};
pub use object::{GeometryNode, Material, Object, ObjectId, ObjectTable, ObjectTag};
pub use reader::{FileReference, Reader, FILE_REFERENCE_SIZE, MAX_NESTING_DEPTH};

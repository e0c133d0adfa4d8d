//! Container writer for tests: builds record streams, compresses them into
//! chunks and appends the trailer.

use std::io::Write;

use tempfile::NamedTempFile;

use crate::container::mesh_codec::DecodedMesh;
use crate::container::object::ObjectTag;
use crate::core::types::{Vec2, Vec3, Vec4};
use crate::math::Aabb;

/// Record stream writer, the mirror image of `ByteCursor`.
#[derive(Default)]
pub(crate) struct RecordWriter {
    bytes: Vec<u8>,
}

impl RecordWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.bytes.push(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn vec3(&mut self, v: Vec3) -> &mut Self {
        self.f32(v.x).f32(v.y).f32(v.z)
    }

    pub fn vec4(&mut self, v: Vec4) -> &mut Self {
        self.f32(v.x).f32(v.y).f32(v.z).f32(v.w)
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.u32(s.len() as u32);
        self.bytes.extend_from_slice(s.as_bytes());
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    pub fn tag(&mut self, tag: ObjectTag) -> &mut Self {
        self.u32(tag as u32)
    }

    pub fn null(&mut self) -> &mut Self {
        self.tag(ObjectTag::Null)
    }

    pub fn index(&mut self, id: u32) -> &mut Self {
        self.tag(ObjectTag::Index).u32(id)
    }

    /// Tag plus node fields, identity transform. Children follow.
    pub fn node(&mut self, tag: ObjectTag, translation: Vec3, child_count: u32) -> &mut Self {
        self.tag(tag)
            .vec3(Vec3::ZERO)
            .vec3(translation)
            .vec3(Vec3::ONE)
            .u32(child_count)
    }

    /// Mesh node without children; the material and geometry records
    /// follow through the two closures.
    pub fn mesh_node(
        &mut self,
        start_index: u32,
        index_count: i32,
        render_order: u32,
        material: impl FnOnce(&mut Self),
        geometry: impl FnOnce(&mut Self),
    ) -> &mut Self {
        self.node(ObjectTag::MeshNode, Vec3::ZERO, 0)
            .u32(start_index)
            .i32(index_count);
        material(self);
        self.u32(render_order);
        geometry(self);
        self
    }

    pub fn material(&mut self, diffuse: Vec4, effect: u32) -> &mut Self {
        self.tag(ObjectTag::Material).vec4(diffuse).u32(effect).null()
    }

    pub fn vec2_array(&mut self, data: &[Vec2]) -> &mut Self {
        self.tag(ObjectTag::VertexArray2f).u32(data.len() as u32);
        for v in data {
            self.f32(v.x).f32(v.y);
        }
        self
    }

    pub fn vec3_array(&mut self, data: &[Vec3]) -> &mut Self {
        self.tag(ObjectTag::VertexArray3f).u32(data.len() as u32);
        for v in data {
            self.vec3(*v);
        }
        self
    }

    pub fn vec4_array(&mut self, data: &[Vec4]) -> &mut Self {
        self.tag(ObjectTag::VertexArray4f).u32(data.len() as u32);
        for v in data {
            self.vec4(*v);
        }
        self
    }

    pub fn index_array(&mut self, data: &[u32]) -> &mut Self {
        self.tag(ObjectTag::IndexArray).u32(data.len() as u32);
        for i in data {
            self.u32(*i);
        }
        self
    }

    /// Array-path geometry node: positions and indices, other streams null.
    pub fn geometry(&mut self, effect: u32, positions: &[Vec3], indices: &[u32]) -> &mut Self {
        self.tag(ObjectTag::GeometryNode).u32(effect).u8(0);
        self.vec3_array(positions).null().null().null();
        self.index_array(indices)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Unit quad in the z = 0 plane.
pub(crate) fn quad_positions(origin: Vec3) -> Vec<Vec3> {
    vec![
        origin,
        origin + Vec3::X,
        origin + Vec3::new(1.0, 1.0, 0.0),
        origin + Vec3::Y,
    ]
}

pub(crate) const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

/// Object id of material `i` in a chunk 0 written by [`scene_chunk`]
/// (the scene record itself takes id 0).
pub(crate) fn material_id(i: u32) -> u32 {
    1 + i
}

/// Chunk 0 with `material_count` untextured materials (effect 0), one tile
/// per box, no carsor, and the given animation path.
pub(crate) fn scene_chunk(material_count: u32, tiles: &[Aabb], path: &[(Vec3, Vec3)]) -> Vec<u8> {
    let mut w = RecordWriter::new();
    w.tag(ObjectTag::Scene).u32(material_count);
    for i in 0..material_count {
        w.material(Vec4::new(i as f32, 0.5, 0.5, 1.0), 0);
    }
    w.u32(tiles.len() as u32);
    for bounds in tiles {
        w.tag(ObjectTag::Tile).vec3(bounds.min).vec3(bounds.max);
    }
    w.null();
    w.u32(path.len() as u32);
    for (position, rotation) in path {
        w.vec3(*position).vec3(*rotation);
    }
    w.u32(0).u32(0).u32(0);
    w.into_bytes()
}

/// Tile chunk: one mesh node drawing a quad at `origin` with material 0.
pub(crate) fn quad_tile_chunk(origin: Vec3) -> Vec<u8> {
    let positions = quad_positions(origin);
    let mut w = RecordWriter::new();
    w.mesh_node(
        0,
        6,
        0,
        |w| {
            w.index(material_id(0));
        },
        |w| {
            w.geometry(0, &positions, &QUAD_INDICES);
        },
    );
    w.into_bytes()
}

/// Container bytes: LZ4 block-compressed chunks followed by the trailer.
pub(crate) fn container_bytes(chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut body = Vec::new();
    let mut refs = Vec::new();
    for chunk in chunks {
        let compressed = lz4_flex::block::compress(chunk);
        refs.push((body.len() as u64, compressed.len() as u32, chunk.len() as u32));
        body.extend_from_slice(&compressed);
    }
    for (position, compressed, uncompressed) in &refs {
        body.extend_from_slice(&position.to_le_bytes());
        body.extend_from_slice(&compressed.to_le_bytes());
        body.extend_from_slice(&uncompressed.to_le_bytes());
    }
    body.extend_from_slice(&(refs.len() as u32).to_le_bytes());
    body
}

pub(crate) fn write_file(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

pub(crate) fn write_container(chunks: &[Vec<u8>]) -> NamedTempFile {
    write_file(&container_bytes(chunks))
}

/// Scene with one tile per origin, each tile a quad, materials = 2.
pub(crate) fn quad_city(origins: &[Vec3]) -> NamedTempFile {
    let tiles: Vec<Aabb> = origins
        .iter()
        .map(|o| Aabb::new(*o, *o + Vec3::new(1.0, 1.0, 0.0)))
        .collect();
    let mut chunks = vec![scene_chunk(2, &tiles, &[])];
    chunks.extend(origins.iter().map(|o| quad_tile_chunk(*o)));
    write_container(&chunks)
}

/// OpenCTM `RAW` blob.
pub(crate) fn encode_ctm_raw(mesh: &DecodedMesh) -> Vec<u8> {
    encode_ctm(b"RAW\0", mesh)
}

/// OpenCTM `MG1` blob: delta-coded indices, every section LZMA-packed.
pub(crate) fn encode_ctm_mg1(mesh: &DecodedMesh) -> Vec<u8> {
    encode_ctm(b"MG1\0", mesh)
}

fn encode_ctm(method: &[u8; 4], mesh: &DecodedMesh) -> Vec<u8> {
    let packed = method == b"MG1\0";
    let vertex_count = mesh.positions.len();
    let mut w = RecordWriter::new();
    w.raw(b"OCTM").u32(5).raw(method);
    w.u32(vertex_count as u32)
        .u32(mesh.triangle_count() as u32)
        .u32(u32::from(mesh.texcoords.is_some()))
        .u32(u32::from(mesh.attributes.is_some()))
        .u32(u32::from(mesh.normals.is_some()));
    w.string("fixture");

    w.raw(b"INDX");
    if packed {
        write_packed(&mut w, &index_deltas(&mesh.indices), mesh.triangle_count(), 3);
    } else {
        for i in &mesh.indices {
            w.u32(*i);
        }
    }

    let floats = |w: &mut RecordWriter, values: &[f32], size: usize| {
        if packed {
            let words: Vec<u32> = values.iter().map(|f| f.to_bits()).collect();
            write_packed(w, &words, vertex_count, size);
        } else {
            for f in values {
                w.f32(*f);
            }
        }
    };

    w.raw(b"VERT");
    floats(&mut w, bytemuck::cast_slice(mesh.positions.as_slice()), 3);
    if let Some(normals) = &mesh.normals {
        w.raw(b"NORM");
        floats(&mut w, bytemuck::cast_slice(normals.as_slice()), 3);
    }
    if let Some(uvs) = &mesh.texcoords {
        w.raw(b"TEXC").string("uv0").string("");
        floats(&mut w, bytemuck::cast_slice(uvs.as_slice()), 2);
    }
    if let Some(attributes) = &mesh.attributes {
        w.raw(b"ATTR").string("color");
        let values: Vec<f32> = attributes.iter().flat_map(|a| a.to_array()).collect();
        floats(&mut w, &values, 4);
    }
    w.into_bytes()
}

/// Inverse of the decoder's index restoration, last triangle first so each
/// step still sees the previous triangle's absolute indices.
fn index_deltas(indices: &[u32]) -> Vec<u32> {
    let mut out = indices.to_vec();
    for i in (0..out.len() / 3).rev() {
        let t = i * 3;
        if i > 0 && indices[t] == indices[t - 3] {
            out[t + 1] = indices[t + 1].wrapping_sub(indices[t - 2]);
        } else {
            out[t + 1] = indices[t + 1].wrapping_sub(indices[t]);
        }
        out[t + 2] = indices[t + 2].wrapping_sub(indices[t]);
        if i > 0 {
            out[t] = indices[t].wrapping_sub(indices[t - 3]);
        }
    }
    out
}

/// Byte-plane interleave `count * size` words and LZMA-pack them behind a
/// size word and the 5 property bytes.
fn write_packed(w: &mut RecordWriter, words: &[u32], count: usize, size: usize) {
    let n = words.len();
    let mut planes = vec![0u8; n * 4];
    for i in 0..count {
        for k in 0..size {
            let bytes = words[i * size + k].to_be_bytes();
            for (plane, byte) in bytes.iter().enumerate() {
                planes[i + k * count + plane * n] = *byte;
            }
        }
    }
    let mut packed = Vec::new();
    let options = lzma_rs::compress::Options {
        unpacked_size: lzma_rs::compress::UnpackedSize::SkipWritingToHeader,
    };
    lzma_rs::lzma_compress_with_options(&mut planes.as_slice(), &mut packed, &options).unwrap();
    w.u32((packed.len() - 5) as u32).raw(&packed);
}

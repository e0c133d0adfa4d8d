//! Scene container reader
//!
//! A container is a sequence of LZ4 block-compressed chunks followed by a
//! trailer:
//!
//! ```text
//! [chunk 0][chunk 1]...[chunk N-1]
//! N x { u64 position, u32 compressed size, u32 uncompressed size }
//! u32 N
//! ```
//!
//! Chunk 0 holds the scene record (materials, tile list, animation path,
//! labels); chunk `i >= 1` holds the payload of one tile. Each chunk is a
//! tagged record stream decoded depth-first. Records other than `Null` and
//! `Index` claim the next object id before their body is decoded, and a later
//! `Index(id)` resolves to that same object.
//!
//! Scene mutations go through the [`SharedScene`] lock one call at a time,
//! so the main thread never waits for more than a single mutation while a
//! tile is being decoded. File I/O and decompression happen without it.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::error::{Error, FormatError};
use crate::core::types::{Result, Vec2, Vec3, Vec4};
use crate::math::Aabb;
use crate::scene::citymodel::{AnimationKey, AnimationPath, CitymodelScene, TileDescriptor};
use crate::scene::sink::{
    BlendMode, EffectId, GeometryInputs, MeshSetup, SceneObjectId, SceneSink, SharedScene,
    TextureFormat, VertexData,
};
use crate::streaming::resources::TileResourceContainer;

use super::cursor::ByteCursor;
use super::mesh_codec::{MeshCodec, OpenCtmCodec};
use super::object::{GeometryNode, Material, Object, ObjectId, ObjectTable, ObjectTag};

/// Size of one trailer entry on disk.
pub const FILE_REFERENCE_SIZE: usize = 16;

/// Deepest record nesting accepted in one chunk.
pub const MAX_NESTING_DEPTH: u32 = 256;

/// Effect numbers whose materials blend with the framebuffer.
const TRANSLUCENT_EFFECTS: [u32; 4] = [2, 3, 5, 6];

const ASTC_HEADER_SIZE: usize = 16;

/// Location of one compressed chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileReference {
    pub position: u64,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

/// Reads chunks from one container file and decodes them into a scene sink.
pub struct Reader<S: SceneSink> {
    path: PathBuf,
    file: File,
    references: Vec<FileReference>,
    objects: ObjectTable,
    scene: SharedScene<S>,
    effects: Vec<EffectId>,
    codec: Box<dyn MeshCodec>,
    next_tile_index: u32,
}

impl<S: SceneSink> std::fmt::Debug for Reader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("path", &self.path)
            .field("chunks", &self.references.len())
            .field("objects", &self.objects.len())
            .field("effects", &self.effects.len())
            .finish()
    }
}

/// Read the trailer index at the end of `file`.
fn read_trailer(file: &mut File) -> Result<Vec<FileReference>> {
    let file_len = file.seek(SeekFrom::End(0))?;
    if file_len < 4 {
        return Err(FormatError::TruncatedTrailer.into());
    }

    file.seek(SeekFrom::End(-4))?;
    let mut count_bytes = [0u8; 4];
    file.read_exact(&mut count_bytes)?;
    let count = u32::from_le_bytes(count_bytes) as u64;

    let table_len = count * FILE_REFERENCE_SIZE as u64;
    if table_len + 4 > file_len {
        return Err(FormatError::TruncatedTrailer.into());
    }
    file.seek(SeekFrom::Start(file_len - 4 - table_len))?;
    let mut table = vec![0u8; table_len as usize];
    file.read_exact(&mut table)?;

    let mut cursor = ByteCursor::new(&table);
    let mut references = Vec::with_capacity(count as usize);
    for _ in 0..count {
        references.push(FileReference {
            position: cursor.read_u64()?,
            compressed_size: cursor.read_u32()?,
            uncompressed_size: cursor.read_u32()?,
        });
    }
    Ok(references)
}

impl<S: SceneSink> Reader<S> {
    /// Open a container and index its trailer.
    ///
    /// `effects` maps the effect numbers used in the file to effects already
    /// created in the sink.
    pub fn open(path: impl AsRef<Path>, scene: SharedScene<S>, effects: Vec<EffectId>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;
        let references = read_trailer(&mut file)?;
        log::info!("Opened container {:?}: {} chunks", path, references.len());

        Ok(Self {
            path,
            file,
            references,
            objects: ObjectTable::new(),
            scene,
            effects,
            codec: Box::new(OpenCtmCodec),
            next_tile_index: 1,
        })
    }

    /// Replace the compressed-mesh codec.
    pub fn with_codec(mut self, codec: Box<dyn MeshCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn chunk_count(&self) -> usize {
        self.references.len()
    }

    pub fn references(&self) -> &[FileReference] {
        &self.references
    }

    /// Number of live object ids.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Read and decompress chunk `index`.
    pub fn load_chunk(&mut self, index: u32) -> Result<Vec<u8>> {
        let reference = *self
            .references
            .get(index as usize)
            .ok_or(FormatError::ChunkOutOfRange {
                index,
                count: self.references.len(),
            })?;

        let mut compressed = vec![0u8; reference.compressed_size as usize];
        self.file.seek(SeekFrom::Start(reference.position))?;
        self.file.read_exact(&mut compressed)?;

        let mut data = vec![0u8; reference.uncompressed_size as usize];
        let written = lz4_flex::block::decompress_into(&compressed, &mut data)
            .map_err(|e| FormatError::Decompress(e.to_string()))?;
        if written != data.len() {
            return Err(FormatError::SizeMismatch {
                expected: reference.uncompressed_size,
                actual: written,
            }
            .into());
        }
        log::trace!(
            "Chunk {}: {} -> {} bytes",
            index,
            reference.compressed_size,
            reference.uncompressed_size
        );
        Ok(data)
    }

    /// Decode chunk `index` into `container`.
    ///
    /// Returns the chunk's root record. With `reset_ids` every id created by
    /// this call is dropped afterwards, so only objects from earlier calls
    /// stay resolvable.
    pub fn read(
        &mut self,
        index: u32,
        container: &mut TileResourceContainer,
        reset_ids: bool,
    ) -> Result<Option<Object>> {
        let object_count = self.objects.len();
        let data = self.load_chunk(index)?;
        let mut cursor = ByteCursor::new(&data);

        let result = self
            .read_object(&mut cursor, container, 0)
            .and_then(|root| self.root_object(root, object_count));
        if reset_ids {
            self.objects.truncate(object_count);
        }
        let root = result?;

        if cursor.remaining() > 0 {
            log::debug!("Chunk {}: {} trailing bytes ignored", index, cursor.remaining());
        }
        Ok(root)
    }

    /// Decode chunk 0. Materials read here stay resolvable for every tile.
    pub fn read_scene(&mut self, container: &mut TileResourceContainer) -> Result<CitymodelScene> {
        match self.read(0, container, false)? {
            Some(Object::Scene(scene)) => {
                log::info!(
                    "Scene: {} materials, {} tiles, {} animation keys, {} names",
                    scene.materials.len(),
                    scene.tiles.len(),
                    scene.animation_path.len(),
                    scene.names.len()
                );
                Ok(*scene)
            }
            Some(other) => Err(FormatError::UnexpectedObject {
                expected: "scene",
                found: other.kind_name(),
            }
            .into()),
            None => Err(FormatError::MissingRequired("scene").into()),
        }
    }

    /// Decode one tile payload into a fresh container.
    ///
    /// On error the partially built container is destroyed before
    /// returning.
    pub fn read_tile(&mut self, tile: &TileDescriptor) -> Result<TileResourceContainer> {
        let mut container = TileResourceContainer::new();
        let root = match self.read(tile.index, &mut container, true) {
            Ok(root) => root,
            Err(e) => {
                self.scene.with(|s| container.destroy(s));
                return Err(e);
            }
        };
        match root {
            Some(Object::Node(node)) | Some(Object::MeshNode(node)) => container.set_root(node),
            None => {}
            Some(other) => {
                self.scene.with(|s| container.destroy(s));
                return Err(FormatError::UnexpectedObject {
                    expected: "node",
                    found: other.kind_name(),
                }
                .into());
            }
        }
        Ok(container)
    }

    /// Hand the root record to the caller. Records created by this decode
    /// are moved out; an `Index` root is copied.
    fn root_object(&mut self, root: Option<ObjectId>, object_count: usize) -> Result<Option<Object>> {
        let Some(id) = root else {
            return Ok(None);
        };
        let object = if id.0 as usize >= object_count {
            self.objects.take(id)?
        } else {
            self.objects.get(id)?.clone()
        };
        Ok(Some(object))
    }

    fn effect(&self, number: u32) -> Result<EffectId> {
        self.effects
            .get(number as usize)
            .copied()
            .ok_or_else(|| FormatError::UnknownEffect(number).into())
    }

    fn read_object(
        &mut self,
        cursor: &mut ByteCursor<'_>,
        container: &mut TileResourceContainer,
        depth: u32,
    ) -> Result<Option<ObjectId>> {
        let tag = ObjectTag::try_from(cursor.read_u32()?)?;
        match tag {
            ObjectTag::Null => return Ok(None),
            ObjectTag::Index => {
                let index = cursor.read_u32()?;
                return Ok(Some(self.objects.resolve(index)?));
            }
            _ => {}
        }
        if depth >= MAX_NESTING_DEPTH {
            return Err(FormatError::NestingTooDeep.into());
        }

        let id = self.objects.reserve();
        let depth = depth + 1;
        let object = match tag {
            ObjectTag::Node => Object::Node(self.read_node(cursor, container, depth)?),
            ObjectTag::MeshNode => Object::MeshNode(self.read_mesh_node(cursor, container, depth)?),
            ObjectTag::Material => Object::Material(self.read_material(cursor, container, depth)?),
            ObjectTag::GeometryNode => {
                Object::GeometryNode(self.read_geometry_node(cursor, container, depth)?)
            }
            ObjectTag::VertexArray2f => {
                let data: Vec<Vec2> = read_elements(cursor, 8)?;
                let resource = self.scene.with(|s| s.create_vertex_array(VertexData::Float2(&data)));
                container.add_resource(resource);
                Object::VertexArray2f(resource)
            }
            ObjectTag::VertexArray3f => {
                let data: Vec<Vec3> = read_elements(cursor, 12)?;
                let resource = self.scene.with(|s| s.create_vertex_array(VertexData::Float3(&data)));
                container.add_resource(resource);
                Object::VertexArray3f { resource, data: data.into() }
            }
            ObjectTag::VertexArray4f => {
                let data: Vec<Vec4> = read_elements(cursor, 16)?;
                let resource = self.scene.with(|s| s.create_vertex_array(VertexData::Float4(&data)));
                container.add_resource(resource);
                Object::VertexArray4f(resource)
            }
            ObjectTag::IndexArray => {
                let data: Vec<u32> = read_elements(cursor, 4)?;
                let resource = self.scene.with(|s| s.create_index_array(&data));
                container.add_resource(resource);
                Object::IndexArray { resource, data: data.into() }
            }
            ObjectTag::Texture2D => {
                let size = cursor.read_u32()?;
                let bytes = cursor.take(size as usize)?;
                if bytes.len() < ASTC_HEADER_SIZE {
                    return Err(FormatError::UnexpectedEof {
                        needed: ASTC_HEADER_SIZE,
                        remaining: bytes.len(),
                    }
                    .into());
                }
                let width = u24(&bytes[7..10]);
                let height = u24(&bytes[10..13]);
                let payload = &bytes[ASTC_HEADER_SIZE..];
                let resource = self.scene.with(|s| {
                    s.create_texture_2d(width, height, TextureFormat::Astc12x12Rgba, payload)
                });
                container.add_resource(resource);
                Object::Texture2D(resource)
            }
            ObjectTag::Scene => Object::Scene(Box::new(self.read_scene_record(cursor, container, depth)?)),
            ObjectTag::Tile => {
                let min = cursor.read_vec3()?;
                let max = cursor.read_vec3()?;
                let tile = TileDescriptor {
                    bounds: Aabb::new(min, max),
                    index: self.next_tile_index,
                };
                self.next_tile_index += 1;
                Object::Tile(tile)
            }
            ObjectTag::Null | ObjectTag::Index => unreachable!("handled above"),
        };
        self.objects.fill(id, object);
        Ok(Some(id))
    }

    /// Transform and children, shared by nodes and mesh nodes.
    fn read_node_fields(
        &mut self,
        node: SceneObjectId,
        cursor: &mut ByteCursor<'_>,
        container: &mut TileResourceContainer,
        depth: u32,
    ) -> Result<()> {
        let rotation = cursor.read_vec3()?;
        let translation = cursor.read_vec3()?;
        let scaling = cursor.read_vec3()?;
        self.scene.with(|s| {
            s.set_rotation(node, rotation);
            s.set_translation(node, translation);
            s.set_scaling(node, scaling);
        });

        let child_count = cursor.read_u32()?;
        for _ in 0..child_count {
            match self.read_object(cursor, container, depth)? {
                Some(id) => {
                    let child = self.objects.node(id)?;
                    self.scene.with(|s| s.add_child(node, child));
                }
                None => log::warn!("Null child record under node {:?}, skipped", node),
            }
        }
        Ok(())
    }

    fn read_node(
        &mut self,
        cursor: &mut ByteCursor<'_>,
        container: &mut TileResourceContainer,
        depth: u32,
    ) -> Result<SceneObjectId> {
        let node = self.scene.with(|s| s.create_node());
        container.add_scene_object(node);
        self.read_node_fields(node, cursor, container, depth)?;
        Ok(node)
    }

    fn read_mesh_node(
        &mut self,
        cursor: &mut ByteCursor<'_>,
        container: &mut TileResourceContainer,
        depth: u32,
    ) -> Result<SceneObjectId> {
        let mesh = self.scene.with(|s| s.create_mesh_node());
        container.add_scene_object(mesh);
        self.read_node_fields(mesh, cursor, container, depth)?;

        let start_index = cursor.read_u32()?;
        let index_count = cursor.read_i32()?;
        let index_count =
            u32::try_from(index_count).map_err(|_| FormatError::NegativeIndexCount(index_count))?;

        let material = self
            .read_object(cursor, container, depth)?
            .ok_or(FormatError::MissingRequired("material"))?;
        let material = self.objects.material(material)?;
        let render_order = cursor.read_u32()?;
        let geometry = self
            .read_object(cursor, container, depth)?
            .ok_or(FormatError::MissingRequired("geometry node"))?;
        let inputs = self.objects.geometry_node(geometry)?.inputs;

        let binding = self.scene.with(|s| {
            let binding = s.create_geometry_binding(material.effect, &inputs);
            s.set_mesh(
                mesh,
                MeshSetup {
                    appearance: material.appearance,
                    geometry: binding,
                    start_index,
                    index_count,
                },
            );
            binding
        });
        container.add_scene_object(binding);
        container.add_mesh_node(mesh, render_order);
        Ok(mesh)
    }

    fn read_geometry_node(
        &mut self,
        cursor: &mut ByteCursor<'_>,
        container: &mut TileResourceContainer,
        depth: u32,
    ) -> Result<GeometryNode> {
        let effect = self.effect(cursor.read_u32()?)?;
        let use_mesh_codec = cursor.read_u8()? != 0;

        let geometry = if use_mesh_codec {
            let mesh = self.codec.decode(cursor)?;

            // One lock per upload so the main thread can run in between
            let positions = self.scene.with(|s| s.create_vertex_array(VertexData::Float3(&mesh.positions)));
            container.add_resource(positions);
            let normals = mesh.normals.as_ref().map(|normals| {
                let resource = self.scene.with(|s| s.create_vertex_array(VertexData::Float3(normals)));
                container.add_resource(resource);
                resource
            });
            let texcoords = mesh.texcoords.as_ref().map(|uvs| {
                let resource = self.scene.with(|s| s.create_vertex_array(VertexData::Float2(uvs)));
                container.add_resource(resource);
                resource
            });
            let texcoords2 = mesh.attributes.as_ref().map(|attributes| {
                let resource = self.scene.with(|s| s.create_vertex_array(VertexData::Float4(attributes)));
                container.add_resource(resource);
                resource
            });
            let indices = self.scene.with(|s| s.create_index_array(&mesh.indices));
            container.add_resource(indices);

            GeometryNode {
                effect,
                inputs: GeometryInputs {
                    positions: Some(positions),
                    normals,
                    texcoords,
                    texcoords2,
                    indices: Some(indices),
                },
                positions: mesh.positions.into(),
                indices: mesh.indices.into(),
            }
        } else {
            let positions = self.read_object(cursor, container, depth)?;
            let normals = self.read_object(cursor, container, depth)?;
            let texcoords = self.read_object(cursor, container, depth)?;
            let texcoords2 = self.read_object(cursor, container, depth)?;
            let indices = self.read_object(cursor, container, depth)?;

            let positions = positions.map(|id| self.objects.vec3_array(id)).transpose()?;
            let normals = normals.map(|id| self.objects.vec3_array(id)).transpose()?;
            let texcoords = texcoords.map(|id| self.objects.vec2_array(id)).transpose()?;
            let texcoords2 = texcoords2.map(|id| self.objects.vec4_array(id)).transpose()?;
            let indices = indices.map(|id| self.objects.index_array(id)).transpose()?;

            GeometryNode {
                effect,
                inputs: GeometryInputs {
                    positions: positions.as_ref().map(|(resource, _)| *resource),
                    normals: normals.map(|(resource, _)| resource),
                    texcoords,
                    texcoords2,
                    indices: indices.as_ref().map(|(resource, _)| *resource),
                },
                positions: positions.map(|(_, data)| data).unwrap_or_else(|| Arc::from([])),
                indices: indices.map(|(_, data)| data).unwrap_or_else(|| Arc::from([])),
            }
        };

        container.add_geometry_node(geometry.clone());
        Ok(geometry)
    }

    fn read_material(
        &mut self,
        cursor: &mut ByteCursor<'_>,
        container: &mut TileResourceContainer,
        depth: u32,
    ) -> Result<Material> {
        let diffuse_color = cursor.read_vec4()?;
        let effect_number = cursor.read_u32()?;
        let texture = self
            .read_object(cursor, container, depth)?
            .map(|id| self.objects.texture(id))
            .transpose()?;
        let effect = self.effect(effect_number)?;

        let appearance = self.scene.with(|s| {
            let appearance = s.create_appearance(effect);
            if TRANSLUCENT_EFFECTS.contains(&effect_number) {
                s.set_blend_mode(appearance, BlendMode::Alpha);
            }
            appearance
        });
        container.add_scene_object(appearance);

        let sampler = match texture {
            Some(texture) => {
                let sampler = self.scene.with(|s| {
                    let sampler = s.create_texture_sampler(texture);
                    s.set_texture(appearance, sampler);
                    sampler
                });
                container.add_scene_object(sampler);
                Some(sampler)
            }
            None => {
                self.scene.with(|s| s.set_color(appearance, diffuse_color));
                None
            }
        };

        let material = Material {
            appearance,
            effect,
            diffuse_color,
            texture,
            sampler,
        };
        container.add_material(material);
        Ok(material)
    }

    fn read_scene_record(
        &mut self,
        cursor: &mut ByteCursor<'_>,
        container: &mut TileResourceContainer,
        depth: u32,
    ) -> Result<CitymodelScene> {
        let mut scene = CitymodelScene::default();

        let material_count = cursor.read_u32()?;
        for _ in 0..material_count {
            let id = self
                .read_object(cursor, container, depth)?
                .ok_or(FormatError::MissingRequired("material"))?;
            scene.materials.push(self.objects.material(id)?);
        }

        let tile_count = cursor.read_u32()?;
        for _ in 0..tile_count {
            let id = self
                .read_object(cursor, container, depth)?
                .ok_or(FormatError::MissingRequired("tile"))?;
            scene.tiles.push(self.objects.tile(id)?);
        }

        scene.carsor = self
            .read_object(cursor, container, depth)?
            .map(|id| self.objects.node(id))
            .transpose()?;

        let key_count = cursor.read_u32()?;
        let mut path = AnimationPath::new();
        for _ in 0..key_count {
            path.push(AnimationKey {
                car_position: cursor.read_vec3()?,
                car_rotation: cursor.read_vec3()?,
            });
        }
        scene.animation_path = path;

        let name_count = cursor.read_u32()?;
        for _ in 0..name_count {
            scene.names.push(cursor.read_string()?);
        }
        scene.name_points = read_points(cursor)?;
        scene.route_points = read_points(cursor)?;
        Ok(scene)
    }
}

/// u32 count followed by `count` packed elements of `width` bytes.
fn read_elements<T: bytemuck::Pod>(cursor: &mut ByteCursor<'_>, width: usize) -> Result<Vec<T>> {
    let count = cursor.read_u32()?;
    let bytes = cursor.take_elements(count, width)?;
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

fn read_points(cursor: &mut ByteCursor<'_>) -> Result<Vec<Vec3>> {
    let count = cursor.read_u32()?;
    let mut points = Vec::with_capacity(count.min(4096) as usize);
    for _ in 0..count {
        points.push(cursor.read_vec3()?);
    }
    Ok(points)
}

fn u24(bytes: &[u8]) -> u32 {
    u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16)
}

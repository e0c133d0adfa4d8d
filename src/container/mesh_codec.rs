//! Compressed-mesh geometry path
//!
//! A geometry record may carry its mesh in an embedded OpenCTM blob instead
//! of separate array records. The codec pulls bytes from the chunk cursor
//! through [`std::io::Read`], so it consumes exactly the bytes of the blob
//! and leaves the cursor after it.
//!
//! Two OpenCTM methods are understood: `RAW` (plain little-endian sections)
//! and `MG1` (LZMA-packed, byte-plane interleaved sections with
//! delta-coded indices).

use std::io::Read;

use crate::core::error::FormatError;
use crate::core::types::{Vec2, Vec3, Vec4};

type CodecResult<T> = std::result::Result<T, FormatError>;

const CTM_MAGIC: [u8; 4] = *b"OCTM";
const CTM_VERSION: u32 = 5;
const FLAG_NORMALS: u32 = 0x01;
const LZMA_PROPS_SIZE: usize = 5;

/// Mesh streams produced by a codec.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedMesh {
    pub positions: Vec<Vec3>,
    pub normals: Option<Vec<Vec3>>,
    /// First UV map, if any.
    pub texcoords: Option<Vec<Vec2>>,
    /// First attribute map, if any.
    pub attributes: Option<Vec<Vec4>>,
    pub indices: Vec<u32>,
}

impl DecodedMesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Decoder for the embedded mesh format. Reads from the chunk as a pull
/// stream.
pub trait MeshCodec: Send {
    fn decode(&self, input: &mut dyn Read) -> CodecResult<DecodedMesh>;
}

/// OpenCTM reader for the `RAW` and `MG1` methods.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenCtmCodec;

/// Section encoding of an OpenCTM body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CtmMethod {
    Raw,
    Mg1,
}

impl CtmMethod {
    fn from_tag(tag: [u8; 4]) -> CodecResult<Self> {
        match &tag {
            b"RAW\0" => Ok(CtmMethod::Raw),
            b"MG1\0" => Ok(CtmMethod::Mg1),
            _ => Err(codec_error(format!(
                "unsupported compression method {:?}",
                String::from_utf8_lossy(&tag)
            ))),
        }
    }

    fn read_indices(self, input: &mut dyn Read, triangle_count: usize) -> CodecResult<Vec<u32>> {
        let count = triangle_count
            .checked_mul(3)
            .ok_or_else(|| codec_error("triangle count overflow"))?;
        match self {
            CtmMethod::Raw => read_pod(input, count),
            CtmMethod::Mg1 => {
                let mut indices = read_packed(input, triangle_count, 3)?;
                restore_indices(&mut indices);
                Ok(indices)
            }
        }
    }

    /// One float vector of `T` (with `components` floats) per vertex.
    fn read_floats<T: bytemuck::Pod>(
        self,
        input: &mut dyn Read,
        vertex_count: usize,
        components: usize,
    ) -> CodecResult<Vec<T>> {
        match self {
            CtmMethod::Raw => read_pod(input, vertex_count),
            CtmMethod::Mg1 => {
                let words = read_packed(input, vertex_count, components)?;
                Ok(bytemuck::pod_collect_to_vec(&words))
            }
        }
    }
}

fn codec_error(what: impl Into<String>) -> FormatError {
    FormatError::MeshCodec(what.into())
}

/// Exactly `len` bytes. The buffer grows with the data actually read, so a
/// bogus length in the blob fails as truncated input instead of allocating
/// up front.
fn read_bytes(input: &mut dyn Read, len: usize) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(len.min(64 * 1024));
    Read::take(&mut *input, len as u64)
        .read_to_end(&mut buf)
        .map_err(|e| codec_error(format!("reading {} bytes: {}", len, e)))?;
    if buf.len() != len {
        return Err(codec_error(format!(
            "truncated stream: needed {} bytes, got {}",
            len,
            buf.len()
        )));
    }
    Ok(buf)
}

fn read_tag(input: &mut dyn Read) -> CodecResult<[u8; 4]> {
    let mut tag = [0u8; 4];
    input
        .read_exact(&mut tag)
        .map_err(|e| codec_error(format!("truncated stream: {}", e)))?;
    Ok(tag)
}

fn read_u32(input: &mut dyn Read) -> CodecResult<u32> {
    read_tag(input).map(u32::from_le_bytes)
}

fn read_string(input: &mut dyn Read) -> CodecResult<String> {
    let len = read_u32(input)? as usize;
    Ok(String::from_utf8_lossy(&read_bytes(input, len)?).into_owned())
}

fn expect_tag(input: &mut dyn Read, expected: &[u8; 4]) -> CodecResult<()> {
    let tag = read_tag(input)?;
    if &tag != expected {
        return Err(codec_error(format!(
            "expected section {:?}, found {:?}",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(&tag)
        )));
    }
    Ok(())
}

/// `count` plain-old-data elements of type `T`, host byte order.
fn read_pod<T: bytemuck::Pod>(input: &mut dyn Read, count: usize) -> CodecResult<Vec<T>> {
    let len = count
        .checked_mul(std::mem::size_of::<T>())
        .ok_or_else(|| codec_error("element count overflow"))?;
    Ok(bytemuck::pod_collect_to_vec(&read_bytes(input, len)?))
}

/// An LZMA-packed array of `count * size` 32-bit words.
///
/// The unpacked bytes are split into four planes, most significant byte
/// first; within a plane, component `k` of element `i` sits at
/// `k * count + i`.
fn read_packed(input: &mut dyn Read, count: usize, size: usize) -> CodecResult<Vec<u32>> {
    let words = count
        .checked_mul(size)
        .ok_or_else(|| codec_error("element count overflow"))?;
    let unpacked_size = words
        .checked_mul(4)
        .ok_or_else(|| codec_error("element count overflow"))?;

    let packed_size = read_u32(input)? as usize;
    let mut stream = read_bytes(input, LZMA_PROPS_SIZE)?;
    stream.extend_from_slice(&read_bytes(input, packed_size)?);

    let mut unpacked = Vec::new();
    let options = lzma_rs::decompress::Options {
        unpacked_size: lzma_rs::decompress::UnpackedSize::UseProvided(Some(unpacked_size as u64)),
        ..Default::default()
    };
    lzma_rs::lzma_decompress_with_options(&mut stream.as_slice(), &mut unpacked, &options)
        .map_err(|e| codec_error(format!("LZMA: {}", e)))?;
    if unpacked.len() != unpacked_size {
        return Err(codec_error(format!(
            "packed section unpacked to {} bytes, expected {}",
            unpacked.len(),
            unpacked_size
        )));
    }

    Ok((0..words)
        .map(|j| {
            let at = (j / size) + (j % size) * count;
            u32::from_be_bytes([
                unpacked[at],
                unpacked[at + words],
                unpacked[at + 2 * words],
                unpacked[at + 3 * words],
            ])
        })
        .collect())
}

/// Undo the `MG1` index deltas in place.
///
/// Per triangle: the first index is relative to the previous triangle's
/// first index, the third to the first, and the second to the previous
/// triangle's second when both share a first index (otherwise to the
/// first).
fn restore_indices(indices: &mut [u32]) {
    let triangle_count = indices.len() / 3;
    for i in 0..triangle_count {
        let t = i * 3;
        if i > 0 {
            indices[t] = indices[t].wrapping_add(indices[t - 3]);
        }
        indices[t + 2] = indices[t + 2].wrapping_add(indices[t]);
        if i > 0 && indices[t] == indices[t - 3] {
            indices[t + 1] = indices[t + 1].wrapping_add(indices[t - 2]);
        } else {
            indices[t + 1] = indices[t + 1].wrapping_add(indices[t]);
        }
    }
}

impl MeshCodec for OpenCtmCodec {
    fn decode(&self, input: &mut dyn Read) -> CodecResult<DecodedMesh> {
        if read_tag(input)? != CTM_MAGIC {
            return Err(codec_error("bad magic"));
        }
        let version = read_u32(input)?;
        if version != CTM_VERSION {
            return Err(codec_error(format!("unsupported version {}", version)));
        }
        let method = CtmMethod::from_tag(read_tag(input)?)?;

        let vertex_count = read_u32(input)? as usize;
        let triangle_count = read_u32(input)? as usize;
        let uv_map_count = read_u32(input)?;
        let attrib_map_count = read_u32(input)?;
        let flags = read_u32(input)?;
        let _comment = read_string(input)?;

        expect_tag(input, b"INDX")?;
        let indices = method.read_indices(input, triangle_count)?;
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(codec_error(format!(
                "index {} out of range for {} vertices",
                bad, vertex_count
            )));
        }

        expect_tag(input, b"VERT")?;
        let positions: Vec<Vec3> = method.read_floats(input, vertex_count, 3)?;

        let normals = if flags & FLAG_NORMALS != 0 {
            expect_tag(input, b"NORM")?;
            Some(method.read_floats::<Vec3>(input, vertex_count, 3)?)
        } else {
            None
        };

        let mut texcoords = None;
        for _ in 0..uv_map_count {
            expect_tag(input, b"TEXC")?;
            let _name = read_string(input)?;
            let _file_name = read_string(input)?;
            let map: Vec<Vec2> = method.read_floats(input, vertex_count, 2)?;
            texcoords.get_or_insert(map);
        }

        let mut attributes = None;
        for _ in 0..attrib_map_count {
            expect_tag(input, b"ATTR")?;
            let _name = read_string(input)?;
            let map: Vec<Vec4> = method.read_floats(input, vertex_count, 4)?;
            attributes.get_or_insert(map);
        }

        log::trace!(
            "Decoded {:?} mesh: {} vertices, {} triangles",
            method,
            vertex_count,
            triangle_count
        );
        Ok(DecodedMesh {
            positions,
            normals,
            texcoords,
            attributes,
            indices,
        })
    }
}

//! Error types for the tile streaming engine

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the engine.
///
/// Every variant is fatal for the asset bundle it came from: there is no
/// skip/resync path through a corrupt container.
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not open container {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("pager worker error: {0}")]
    Worker(String),
}

/// Malformed container content.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormatError {
    #[error("unknown object tag {0}")]
    UnknownTag(u32),

    #[error("object index {index} out of range ({len} objects)")]
    IndexOutOfRange { index: u32, len: usize },

    #[error("object index {0} refers to an object still being decoded")]
    UnresolvedIndex(u32),

    #[error("expected {expected}, found {found}")]
    UnexpectedObject {
        expected: &'static str,
        found: &'static str,
    },

    #[error("unexpected end of chunk: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("decompressed size {actual} differs from expected size {expected}")]
    SizeMismatch { expected: u32, actual: usize },

    #[error("LZ4 decompression failed: {0}")]
    Decompress(String),

    #[error("chunk {index} out of range ({count} chunks)")]
    ChunkOutOfRange { index: u32, count: usize },

    #[error("container trailer is truncated")]
    TruncatedTrailer,

    #[error("unknown effect number {0}")]
    UnknownEffect(u32),

    #[error("negative index count {0}")]
    NegativeIndexCount(i32),

    #[error("object graph nested too deeply")]
    NestingTooDeep,

    #[error("compressed mesh: {0}")]
    MeshCodec(String),

    #[error("missing required {0}")]
    MissingRequired(&'static str),
}

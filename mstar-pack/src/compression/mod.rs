//! Chunk compression backends

pub mod lzop;
pub mod traits;

pub use lzop::LzopCompressor;
pub use traits::{Compression, CompressionInterface, NoCompression, create_compressor};

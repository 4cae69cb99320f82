//! Compression interface
//!
//! Every compression backend used for partition chunks implements this trait.

use crate::error::Result;

/// Compression methods a chunk can be packed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    #[default]
    None,
    Lzo,
}

/// Compression interface trait
pub trait CompressionInterface {
    /// Compress one chunk
    ///
    /// The output must be self-contained: the bootloader decompresses every
    /// chunk on its own.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress data produced by [`compress`](Self::compress), mainly for verification
    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>>;

    /// Compression method this backend produces
    fn get_compression_type(&self) -> Compression;

    /// Human readable backend name
    fn get_name(&self) -> &'static str;
}

/// Stores data unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCompression;

impl CompressionInterface for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        Ok(compressed_data.to_vec())
    }

    fn get_compression_type(&self) -> Compression {
        Compression::None
    }

    fn get_name(&self) -> &'static str {
        "none"
    }
}

/// Factory for the compressor of a given method
pub fn create_compressor(compression_type: Compression) -> Box<dyn CompressionInterface> {
    match compression_type {
        Compression::Lzo => Box::new(crate::compression::lzop::LzopCompressor::default()),
        Compression::None => Box::new(NoCompression),
    }
}

//! Error types for firmware packing

use std::io;
use std::path::{Path, PathBuf};

/// Errors that abort a firmware build
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    /// The manifest asks for something the pipeline cannot do
    #[error("configuration error: {0}")]
    Config(String),

    /// A capability that is deliberately not implemented
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A source or output file could not be accessed
    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Writing to a stream failed
    #[error("I/O error: {0}")]
    Stream(#[from] io::Error),

    /// The manifest is not valid TOML or has the wrong shape
    #[error("manifest error: {0}")]
    Manifest(#[from] toml::de::Error),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("invalid sparse image: {0}")]
    Sparse(String),

    #[error("invalid firmware image: {0}")]
    InvalidImage(String),

    #[error("{what} CRC32 mismatch: stored 0x{stored:08X}, calculated 0x{calculated:08X}")]
    CrcMismatch {
        what: &'static str,
        stored: u32,
        calculated: u32,
    },
}

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, PackError>;

impl PackError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn compression(msg: impl Into<String>) -> Self {
        Self::Compression(msg.into())
    }

    pub fn sparse(msg: impl Into<String>) -> Self {
        Self::Sparse(msg.into())
    }

    pub fn invalid_image(msg: impl Into<String>) -> Self {
        Self::InvalidImage(msg.into())
    }

    pub fn crc_mismatch(what: &'static str, stored: u32, calculated: u32) -> Self {
        Self::CrcMismatch {
            what,
            stored,
            calculated,
        }
    }

    /// True for errors caused by the manifest rather than the environment
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Manifest(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_are_distinguishable() {
        let config = PackError::config("lzo and sparse are mutually exclusive");
        let unsupported = PackError::unsupported("mmc write.p.continue");
        let io = PackError::io("boot.img", io::Error::new(io::ErrorKind::NotFound, "missing"));

        assert!(config.to_string().starts_with("configuration error"));
        assert!(unsupported.to_string().starts_with("unsupported operation"));
        assert!(io.to_string().contains("boot.img"));
        assert!(config.is_config());
        assert!(!io.is_config());
    }

    #[test]
    fn test_crc_mismatch_formats_hex() {
        let err = PackError::crc_mismatch("header", 0xCBF43926, 0x12345678);
        assert_eq!(
            err.to_string(),
            "header CRC32 mismatch: stored 0xCBF43926, calculated 0x12345678"
        );
    }
}

//! Partition kinds and footer layouts

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{PackError, Result};

/// What a partition section describes and which directive flashes it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PartitionKind {
    /// Regular eMMC partition image, may be chunked, compressed or sparse
    #[default]
    PartitionImage,
    /// Secure info blob stored with `store_secure_info`
    SecureInfo,
    /// NuttX configuration stored with `store_nuttx_config`
    NuttxConfig,
    /// Boot loader written to the boot area with `mmc write.boot`
    Sboot,
    /// Loaded into memory at a fixed offset, never flashed
    InMemory,
}

impl PartitionKind {
    /// Kinds other than plain partition images are always packed as one chunk
    pub fn is_single_chunk(&self) -> bool {
        !matches!(self, Self::PartitionImage)
    }
}

impl FromStr for PartitionKind {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "partitionimage" => Ok(Self::PartitionImage),
            "secureinfo" => Ok(Self::SecureInfo),
            "nuttxconfig" => Ok(Self::NuttxConfig),
            "sboot" => Ok(Self::Sboot),
            "inmemory" => Ok(Self::InMemory),
            _ => Err(PackError::config(format!("unknown partition type '{s}'"))),
        }
    }
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PartitionImage => "partitionImage",
            Self::SecureInfo => "secureInfo",
            Self::NuttxConfig => "nuttxConfig",
            Self::Sboot => "sboot",
            Self::InMemory => "inMemory",
        };
        write!(f, "{}", name)
    }
}

/// Footer checksum layout expected by the board's bootloader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CrcType {
    /// `magic | crc(header) | crc(bin) | header[..16]`
    #[default]
    Normal,
    /// Merged CRC over `header | bin | magic | crc(header)`
    Xgimi,
    /// Merged CRC over `header | bin | crc(bin) | magic | crc(header)`
    Pb803,
}

impl FromStr for CrcType {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "NORMAL" => Ok(Self::Normal),
            "XGIMI" => Ok(Self::Xgimi),
            "PB803" => Ok(Self::Pb803),
            _ => Err(PackError::config(format!("unknown CRC type '{s}'"))),
        }
    }
}

impl fmt::Display for CrcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "NORMAL",
            Self::Xgimi => "XGIMI",
            Self::Pb803 => "PB803",
        };
        write!(f, "{}", name)
    }
}

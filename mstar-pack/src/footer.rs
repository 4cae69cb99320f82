//! Checksum footer
//!
//! Three layouts exist, selected per device:
//!
//! ```text
//! NORMAL: header | bin | magic | crc(header) | crc(bin)    | header[..16]
//! XGIMI:  header | bin | magic | crc(header) | crc(merged) | header[..16]
//! PB803:  header | bin | crc(bin) | magic | crc(header) | crc(merged) | header[..16]
//! ```
//!
//! `merged` is everything in front of the merged CRC. CRCs are stored as
//! little-endian u32, so `0xCBF43926` appears as `26 39 F4 CB`.

use serde::Serialize;

use crate::crc::{calculate_crc32, calculate_crc32_parts};
use crate::error::{PackError, Result};
use crate::image_types::CrcType;
use crate::manifest::Manifest;

/// Leading header bytes repeated at the very end of the image
pub const HEADER_SNAPSHOT_LEN: usize = 16;

pub const CRC_LEN: usize = 4;

/// Checksums computed over a finished header and binary region
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FooterRecord {
    pub crc_type: CrcType,
    pub magic: Vec<u8>,
    pub header_crc: u32,
    pub bin_crc: u32,
    /// Present for XGIMI and PB803
    pub merged_crc: Option<u32>,
    pub header_snapshot: [u8; HEADER_SNAPSHOT_LEN],
}

impl FooterRecord {
    /// Bytes following the binary region in the final image
    pub fn trailer(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(footer_len(self.crc_type, self.magic.len()));
        match self.crc_type {
            CrcType::Normal => {
                out.extend_from_slice(&self.magic);
                out.extend_from_slice(&self.header_crc.to_le_bytes());
                out.extend_from_slice(&self.bin_crc.to_le_bytes());
            }
            CrcType::Xgimi => {
                out.extend_from_slice(&self.magic);
                out.extend_from_slice(&self.header_crc.to_le_bytes());
                out.extend_from_slice(&self.merged_crc.unwrap_or_default().to_le_bytes());
            }
            CrcType::Pb803 => {
                out.extend_from_slice(&self.bin_crc.to_le_bytes());
                out.extend_from_slice(&self.magic);
                out.extend_from_slice(&self.header_crc.to_le_bytes());
                out.extend_from_slice(&self.merged_crc.unwrap_or_default().to_le_bytes());
            }
        }
        out.extend_from_slice(&self.header_snapshot);
        out
    }
}

/// Length of the trailer for a variant and magic length
pub fn footer_len(crc_type: CrcType, magic_len: usize) -> usize {
    let crcs = match crc_type {
        CrcType::Normal | CrcType::Xgimi => 2,
        CrcType::Pb803 => 3,
    };
    magic_len + crcs * CRC_LEN + HEADER_SNAPSHOT_LEN
}

#[derive(Debug, Clone)]
pub struct FooterBuilder {
    magic: Vec<u8>,
    crc_type: CrcType,
}

impl FooterBuilder {
    pub fn new(magic: impl Into<Vec<u8>>, crc_type: CrcType) -> Self {
        Self {
            magic: magic.into(),
            crc_type,
        }
    }

    pub fn from_manifest(manifest: &Manifest) -> Self {
        Self::new(manifest.magic_footer.clone(), manifest.crc_type)
    }

    pub fn build(&self, header: &[u8], bin: &[u8]) -> Result<FooterRecord> {
        let snapshot: [u8; HEADER_SNAPSHOT_LEN] = header
            .get(..HEADER_SNAPSHOT_LEN)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| {
                PackError::config(format!(
                    "header is {} bytes, the footer needs at least {HEADER_SNAPSHOT_LEN}",
                    header.len()
                ))
            })?;

        let header_crc = calculate_crc32(header);
        let bin_crc = calculate_crc32(bin);
        let hcrc = header_crc.to_le_bytes();
        let bcrc = bin_crc.to_le_bytes();
        let merged_crc = match self.crc_type {
            CrcType::Normal => None,
            CrcType::Xgimi => Some(calculate_crc32_parts(&[
                header,
                bin,
                &self.magic[..],
                &hcrc[..],
            ])),
            CrcType::Pb803 => Some(calculate_crc32_parts(&[
                header,
                bin,
                &bcrc[..],
                &self.magic[..],
                &hcrc[..],
            ])),
        };

        Ok(FooterRecord {
            crc_type: self.crc_type,
            magic: self.magic.clone(),
            header_crc,
            bin_crc,
            merged_crc,
            header_snapshot: snapshot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAGIC: &[u8] = b"12345678";

    fn header() -> Vec<u8> {
        (0..32u8).collect()
    }

    const BIN: [u8; 4] = [1, 2, 3, 4];

    #[test]
    fn test_normal_golden() {
        let record = FooterBuilder::new(MAGIC, CrcType::Normal)
            .build(&header(), &BIN)
            .unwrap();
        assert_eq!(record.header_crc, 0x9126_7E8A);
        assert_eq!(record.bin_crc, 0xB63C_FBCD);
        assert_eq!(record.merged_crc, None);

        let mut expected = MAGIC.to_vec();
        expected.extend_from_slice(&[0x8A, 0x7E, 0x26, 0x91]);
        expected.extend_from_slice(&[0xCD, 0xFB, 0x3C, 0xB6]);
        expected.extend(0..16u8);
        assert_eq!(record.trailer(), expected);
        assert_eq!(expected.len(), footer_len(CrcType::Normal, MAGIC.len()));
    }

    #[test]
    fn test_xgimi_golden() {
        let record = FooterBuilder::new(MAGIC, CrcType::Xgimi)
            .build(&header(), &BIN)
            .unwrap();
        assert_eq!(record.merged_crc, Some(0xF0CF_C2BC));

        let mut expected = MAGIC.to_vec();
        expected.extend_from_slice(&[0x8A, 0x7E, 0x26, 0x91]);
        expected.extend_from_slice(&[0xBC, 0xC2, 0xCF, 0xF0]);
        expected.extend(0..16u8);
        assert_eq!(record.trailer(), expected);
    }

    #[test]
    fn test_pb803_golden() {
        let record = FooterBuilder::new(MAGIC, CrcType::Pb803)
            .build(&header(), &BIN)
            .unwrap();
        assert_eq!(record.merged_crc, Some(0x5CD3_9B07));

        let mut expected = vec![0xCD, 0xFB, 0x3C, 0xB6];
        expected.extend_from_slice(MAGIC);
        expected.extend_from_slice(&[0x8A, 0x7E, 0x26, 0x91]);
        expected.extend_from_slice(&[0x07, 0x9B, 0xD3, 0x5C]);
        expected.extend(0..16u8);
        assert_eq!(record.trailer(), expected);
        assert_eq!(expected.len(), footer_len(CrcType::Pb803, MAGIC.len()));
    }

    #[test]
    fn test_short_header_is_rejected() {
        let err = FooterBuilder::new(MAGIC, CrcType::Normal)
            .build(&[0u8; 8], &BIN)
            .unwrap_err();
        assert!(err.is_config());
    }
}

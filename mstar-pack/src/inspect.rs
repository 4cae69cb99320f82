//! Reading back finished images
//!
//! The layout of an image cannot be discovered from its bytes alone, so the
//! header size, footer variant and magic must be supplied.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{PackError, Result};
use crate::footer::{CRC_LEN, FooterBuilder, HEADER_SNAPSHOT_LEN, footer_len};
use crate::header::{END_OF_SCRIPT, HEADER_FILL};
use crate::image_types::CrcType;
use crate::manifest::parse_address;

/// A `filepartload` line found in the header script
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadEntry {
    pub addr: u64,
    pub offset: u64,
    pub len: u64,
}

/// Result of a successful verification
#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
    pub file_len: usize,
    pub header_size: usize,
    pub bin_len: usize,
    pub crc_type: CrcType,
    pub magic: String,
    pub header_crc: u32,
    pub bin_crc: u32,
    pub merged_crc: Option<u32>,
    pub loads: Vec<LoadEntry>,
    pub script: String,
}

#[derive(Debug, Clone)]
pub struct ImageInspector {
    header_size: usize,
    crc_type: CrcType,
    magic: Vec<u8>,
}

impl ImageInspector {
    pub fn new(header_size: usize, crc_type: CrcType, magic: impl Into<Vec<u8>>) -> Self {
        Self {
            header_size,
            crc_type,
            magic: magic.into(),
        }
    }

    pub fn inspect_file<P: AsRef<Path>>(&self, path: P) -> Result<ImageReport> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| PackError::io(path, e))?;
        self.inspect(&data)
    }

    /// Split `data` into header, bin and trailer and check every stored CRC
    pub fn inspect(&self, data: &[u8]) -> Result<ImageReport> {
        let trailer_len = footer_len(self.crc_type, self.magic.len());
        let min_len = self.header_size.checked_add(trailer_len);
        if self.header_size < HEADER_SNAPSHOT_LEN || min_len.is_none_or(|min| data.len() < min) {
            return Err(PackError::invalid_image(format!(
                "{} bytes is too short for a {} byte header and {} footer",
                data.len(),
                self.header_size,
                self.crc_type
            )));
        }

        let header = &data[..self.header_size];
        let bin_end = data.len() - trailer_len;
        let bin = &data[self.header_size..bin_end];
        let trailer = &data[bin_end..];

        let stored = StoredFooter::parse(trailer, self.crc_type, self.magic.len());
        if stored.magic != self.magic.as_slice() {
            return Err(PackError::invalid_image(format!(
                "magic mismatch: found '{}'",
                String::from_utf8_lossy(stored.magic)
            )));
        }
        if stored.snapshot != &header[..HEADER_SNAPSHOT_LEN] {
            return Err(PackError::invalid_image(
                "trailing header copy does not match the header",
            ));
        }

        let record = FooterBuilder::new(self.magic.clone(), self.crc_type).build(header, bin)?;
        if stored.header_crc != record.header_crc {
            return Err(PackError::crc_mismatch("header", stored.header_crc, record.header_crc));
        }
        if let Some(bin_crc) = stored.bin_crc {
            if bin_crc != record.bin_crc {
                return Err(PackError::crc_mismatch("bin", bin_crc, record.bin_crc));
            }
        }
        if let (Some(stored_merged), Some(merged)) = (stored.merged_crc, record.merged_crc) {
            if stored_merged != merged {
                return Err(PackError::crc_mismatch("merged", stored_merged, merged));
            }
        }

        let script = script_text(header)?;
        let loads = parse_loads(&script)?;
        for load in &loads {
            let end = load.offset.checked_add(load.len);
            if load.offset < self.header_size as u64 || end.is_none_or(|end| end > bin_end as u64) {
                return Err(PackError::invalid_image(format!(
                    "load at 0x{:X} of {} bytes lies outside the binary region",
                    load.offset, load.len
                )));
            }
        }

        Ok(ImageReport {
            file_len: data.len(),
            header_size: self.header_size,
            bin_len: bin.len(),
            crc_type: self.crc_type,
            magic: String::from_utf8_lossy(&self.magic).into_owned(),
            header_crc: record.header_crc,
            bin_crc: record.bin_crc,
            merged_crc: record.merged_crc,
            loads,
            script,
        })
    }
}

struct StoredFooter<'a> {
    magic: &'a [u8],
    header_crc: u32,
    /// Not stored by XGIMI
    bin_crc: Option<u32>,
    merged_crc: Option<u32>,
    snapshot: &'a [u8],
}

impl<'a> StoredFooter<'a> {
    /// `trailer` must be exactly `footer_len(crc_type, magic_len)` bytes
    fn parse(trailer: &'a [u8], crc_type: CrcType, magic_len: usize) -> Self {
        let word = |at: usize| {
            u32::from_le_bytes([trailer[at], trailer[at + 1], trailer[at + 2], trailer[at + 3]])
        };
        let snapshot = &trailer[trailer.len() - HEADER_SNAPSHOT_LEN..];
        match crc_type {
            CrcType::Normal => StoredFooter {
                magic: &trailer[..magic_len],
                header_crc: word(magic_len),
                bin_crc: Some(word(magic_len + CRC_LEN)),
                merged_crc: None,
                snapshot,
            },
            CrcType::Xgimi => StoredFooter {
                magic: &trailer[..magic_len],
                header_crc: word(magic_len),
                bin_crc: None,
                merged_crc: Some(word(magic_len + CRC_LEN)),
                snapshot,
            },
            CrcType::Pb803 => StoredFooter {
                magic: &trailer[CRC_LEN..CRC_LEN + magic_len],
                header_crc: word(CRC_LEN + magic_len),
                bin_crc: Some(word(0)),
                merged_crc: Some(word(CRC_LEN + magic_len + CRC_LEN)),
                snapshot,
            },
        }
    }
}

/// Header text up to and including the end-of-script line
fn script_text(header: &[u8]) -> Result<String> {
    let text_len = header
        .iter()
        .position(|b| *b == HEADER_FILL)
        .unwrap_or(header.len());
    let text = std::str::from_utf8(&header[..text_len])
        .map_err(|e| PackError::invalid_image(format!("header script is not UTF-8: {e}")))?;

    let end = text
        .find(END_OF_SCRIPT)
        .ok_or_else(|| PackError::invalid_image("header script has no end-of-file line"))?;
    Ok(text[..end + END_OF_SCRIPT.len()].to_string() + "\n")
}

fn parse_loads(script: &str) -> Result<Vec<LoadEntry>> {
    script
        .lines()
        .filter(|line| line.starts_with("filepartload "))
        .map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [_, addr, _file, offset, len] = fields.as_slice() else {
                return Err(PackError::invalid_image(format!("malformed line '{line}'")));
            };
            let hex = |s: &str| parse_address(s).map_err(PackError::invalid_image);
            Ok(LoadEntry {
                addr: hex(*addr)?,
                offset: hex(*offset)?,
                len: hex(*len)?,
            })
        })
        .collect()
}

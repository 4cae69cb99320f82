//! Firmware builder: drives the whole packing pipeline

use std::fs;
use std::io::Write;
use std::path::Path;

use byte_unit::Byte;
use chrono::{DateTime, Utc};
use log::info;
use tempfile::NamedTempFile;

use crate::assembler::ImageAssembler;
use crate::compression::{Compression, CompressionInterface, create_compressor};
use crate::directive::DirectiveEmitter;
use crate::error::{PackError, Result};
use crate::footer::{FooterBuilder, FooterRecord};
use crate::header::{END_OF_SCRIPT, HeaderImage};
use crate::manifest::Manifest;
use crate::partition::{ChunkPlacement, PartitionProcessor};

/// Builder for MStar upgrade images
///
/// Partitions are packed in manifest order; every chunk offset depends on
/// everything packed before it.
pub struct FirmwareBuilder {
    manifest: Manifest,
    compressor: Box<dyn CompressionInterface>,
}

impl FirmwareBuilder {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            compressor: create_compressor(Compression::Lzo),
        }
    }

    /// Replace the backend used for `lzo` partitions
    pub fn with_compressor(mut self, compressor: Box<dyn CompressionInterface>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Build the complete image in memory
    ///
    /// `time` stamps the header label, so equal inputs give equal images.
    pub fn build(&self, time: DateTime<Utc>) -> Result<FirmwareImage> {
        let manifest = &self.manifest;
        manifest.validate()?;

        let emitter = DirectiveEmitter::from_manifest(manifest);
        let mut header = HeaderImage::new(manifest.header_size);
        let mut assembler = ImageAssembler::new();
        let mut placements = Vec::new();

        header.write_label(manifest.header_script.label.as_deref(), &time)?;
        header.write_prefix(&manifest.header_script.prefix);

        for spec in &manifest.partitions {
            let processor = PartitionProcessor::new(
                spec,
                &emitter,
                self.compressor.as_ref(),
                manifest.header_size,
            );
            placements.extend(processor.process(&mut header, &mut assembler)?);
        }

        header.write_suffix(&manifest.header_script.suffix);
        let script = format!("{}{END_OF_SCRIPT}\n", header.text());
        let header = header.finish()?;
        info!(
            "header script: {} of {} bytes",
            script.len(),
            manifest.header_size
        );

        let bin = assembler.into_bytes();
        let footer = FooterBuilder::from_manifest(manifest).build(&header, &bin)?;
        info!(
            "footer {}: header crc 0x{:08X}, bin crc 0x{:08X}",
            footer.crc_type, footer.header_crc, footer.bin_crc
        );

        let image = FirmwareImage {
            header,
            bin,
            footer,
            placements,
            script,
        };
        info!("image size: {:#}", Byte::from_u64(image.len() as u64));
        Ok(image)
    }

    /// Build and write the image to `path`
    ///
    /// The file is written next to its destination and renamed into place, so
    /// a failed build never leaves a partial image behind.
    pub fn build_to_file<P: AsRef<Path>>(&self, time: DateTime<Utc>, path: P) -> Result<FirmwareImage> {
        let path = path.as_ref();
        let image = self.build(time)?;

        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| PackError::io(dir, e))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PackError::io(dir, e))?;
        image
            .write_to(tmp.as_file_mut())
            .and_then(|_| tmp.as_file().sync_all().map_err(PackError::from))?;
        tmp.persist(path).map_err(|e| PackError::io(path, e.error))?;

        info!("wrote {}", path.display());
        Ok(image)
    }
}

/// A finished image and how it was laid out
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    /// Header padded to the manifest's header size
    pub header: Vec<u8>,
    /// Aligned partition payloads
    pub bin: Vec<u8>,
    pub footer: FooterRecord,
    pub placements: Vec<ChunkPlacement>,
    script: String,
}

impl FirmwareImage {
    /// Header script text without padding
    pub fn script_text(&self) -> &str {
        &self.script
    }

    pub fn len(&self) -> usize {
        self.header.len() + self.bin.len() + self.footer.trailer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.bin);
        out.extend_from_slice(&self.footer.trailer());
        out
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.header)?;
        writer.write_all(&self.bin)?;
        writer.write_all(&self.footer.trailer())?;
        writer.flush()?;
        Ok(())
    }
}

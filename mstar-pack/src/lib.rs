//! # mstar-pack
//!
//! Packs partition images into the `MstarUpgrade.bin` style firmware files
//! that MStar based TV and set-top-box bootloaders flash from USB.
//!
//! An image is a bootloader script header padded to a fixed size, the
//! 4-byte aligned partition payloads, and a checksum footer in one of the
//! NORMAL, XGIMI or PB803 layouts.
//!
//! ## Example
//!
//! ```no_run
//! use chrono::Utc;
//! use mstar_pack::{FirmwareBuilder, Manifest, PartitionKind, PartitionSpec};
//!
//! let manifest = Manifest::new("MstarUpgrade.bin")
//!     .dram_buf_addr(0x2020_0000)
//!     .partition(
//!         PartitionSpec::new("system", PartitionKind::PartitionImage)
//!             .image_file("system.img")
//!             .chunk_size(150 * 1024 * 1024)
//!             .lzo(true),
//!     );
//!
//! let image = FirmwareBuilder::new(manifest).build_to_file(Utc::now(), "MstarUpgrade.bin")?;
//! println!("{}", image.script_text());
//! # Ok::<(), mstar_pack::PackError>(())
//! ```

pub mod assembler;
pub mod builder;
pub mod cli;
pub mod compression;
pub mod crc;
pub mod directive;
pub mod error;
pub mod footer;
pub mod header;
pub mod image_types;
pub mod inspect;
pub mod manifest;
pub mod partition;
pub mod sparse;

// Re-export main types for convenience
pub use builder::{FirmwareBuilder, FirmwareImage};
pub use compression::traits::CompressionInterface;
pub use crc::calculate_crc32;
pub use error::{PackError, Result};
pub use footer::{FooterBuilder, FooterRecord, footer_len};
pub use image_types::*;
pub use inspect::{ImageInspector, ImageReport};
pub use manifest::{HeaderScript, Manifest, PartitionSpec};

/// Current version of mstar-pack
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

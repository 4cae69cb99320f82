//! Bootloader command rendering
//!
//! Every method returns one complete script line terminated by `\n`. Numbers
//! are rendered as uppercase hex with at least two digits, optionally with a
//! `0x` prefix.

use crate::error::{PackError, Result};
use crate::manifest::Manifest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveEmitter {
    dram_buf_addr: u64,
    firmware_file_name: String,
    hex_prefix: bool,
}

impl DirectiveEmitter {
    pub fn new(dram_buf_addr: u64, firmware_file_name: impl Into<String>, hex_prefix: bool) -> Self {
        Self {
            dram_buf_addr,
            firmware_file_name: firmware_file_name.into(),
            hex_prefix,
        }
    }

    pub fn from_manifest(manifest: &Manifest) -> Self {
        Self::new(
            manifest.dram_buf_addr,
            manifest.script_firmware_file_name.clone(),
            manifest.use_hex_values_prefix,
        )
    }

    pub fn dram_buf_addr(&self) -> u64 {
        self.dram_buf_addr
    }

    pub fn hex(&self, value: u64) -> String {
        if self.hex_prefix {
            format!("0x{value:02X}")
        } else {
            format!("{value:02X}")
        }
    }

    fn skip(empty_skip: bool) -> u8 {
        u8::from(empty_skip)
    }

    pub fn create(&self, name: &str, size: u64) -> String {
        format!("mmc create {name} {}\n", self.hex(size))
    }

    pub fn erase(&self, name: &str) -> String {
        format!("mmc erase.p {name}\n")
    }

    /// Copy `size` bytes at `offset` of the firmware file to `addr`
    pub fn load(&self, addr: u64, size: u64, offset: u64) -> String {
        format!(
            "filepartload {} {} {} {}\n",
            self.hex(addr),
            self.firmware_file_name,
            self.hex(offset),
            self.hex(size)
        )
    }

    pub fn write(&self, name: &str, size: u64, addr: u64, empty_skip: bool) -> String {
        format!(
            "mmc write.p {} {name} {} {}\n",
            self.hex(addr),
            self.hex(size),
            Self::skip(empty_skip)
        )
    }

    /// Continuation writes for multi-chunk raw images
    ///
    /// The bootloader's `mmc write.p.continue` takes a partition offset whose
    /// units are not known, so this never renders a line.
    pub fn write_continue(
        &self,
        name: &str,
        _size: u64,
        _addr: u64,
        _empty_skip: bool,
    ) -> Result<String> {
        Err(PackError::unsupported(format!(
            "partition '{name}': multi-chunk raw images need 'mmc write.p.continue', \
             use lzo or sparse, or set chunk_size to 0"
        )))
    }

    pub fn unlzo(&self, name: &str, size: u64, addr: u64, empty_skip: bool) -> String {
        format!(
            "mmc unlzo {} {} {name} {}\n",
            self.hex(addr),
            self.hex(size),
            Self::skip(empty_skip)
        )
    }

    pub fn unlzo_continue(&self, name: &str, size: u64, addr: u64, empty_skip: bool) -> String {
        format!(
            "mmc unlzo.cont {} {} {name} {}\n",
            self.hex(addr),
            self.hex(size),
            Self::skip(empty_skip)
        )
    }

    pub fn sparse_write(&self, name: &str, addr: u64) -> String {
        format!("sparse write {} {name}\n", self.hex(addr))
    }

    pub fn store_secure_info(&self, name: &str) -> String {
        format!("store_secure_info {name} {}\n", self.hex(self.dram_buf_addr))
    }

    pub fn store_nuttx_config(&self, name: &str) -> String {
        format!("store_nuttx_config {name} {}\n", self.hex(self.dram_buf_addr))
    }

    pub fn write_boot(&self, size: u64, addr: u64, empty_skip: bool) -> String {
        format!(
            "mmc write.boot 1 {} 0 {} {}\n",
            self.hex(addr),
            self.hex(size),
            Self::skip(empty_skip)
        )
    }
}

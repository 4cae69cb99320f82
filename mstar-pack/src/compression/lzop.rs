//! LZO compression in the lzop container format
//!
//! The bootloader's `mmc unlzo` expects every chunk to be a complete lzop
//! file: a fixed header followed by independently compressed LZO1X blocks.
//!
//! ```text
//! magic[9] | version | lib_version | version_needed | method | level |
//! flags | mode | mtime_lo | mtime_hi | name_len | name | header_adler32
//! { dst_len | src_len | adler32(uncompressed) | data }* | 0u32
//! ```
//!
//! All multi-byte fields are big-endian.

use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::compression::traits::{Compression, CompressionInterface};
use crate::crc::calculate_crc32;
use crate::error::{PackError, Result};

pub const LZOP_MAGIC: [u8; 9] = [0x89, b'L', b'Z', b'O', 0x00, b'\r', b'\n', 0x1A, b'\n'];

const LZOP_VERSION: u16 = 0x1030;
const LZO_LIB_VERSION: u16 = 0x2080;
const LZOP_VERSION_NEEDED: u16 = 0x0940;

/// LZO1X-999, the algorithm family `lzokay` implements
const METHOD_LZO1X_999: u8 = 3;
const LEVEL: u8 = 9;

const F_ADLER32_D: u32 = 0x0000_0001;
const F_ADLER32_C: u32 = 0x0000_0002;
const F_H_EXTRA_FIELD: u32 = 0x0000_0040;
const F_CRC32_D: u32 = 0x0000_0100;
const F_CRC32_C: u32 = 0x0000_0200;
const F_H_FILTER: u32 = 0x0000_0800;
const F_H_CRC32: u32 = 0x0000_1000;
const F_OS_UNIX: u32 = 0x0300_0000;

/// Regular file, rw-r--r--
const FILE_MODE: u32 = 0o100644;

/// lzop's default block size
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Produces lzop files from single chunks
#[derive(Debug, Clone)]
pub struct LzopCompressor {
    block_size: usize,
    mtime: u32,
}

impl Default for LzopCompressor {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            mtime: 0,
        }
    }
}

impl LzopCompressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split input into blocks of at most `block_size` bytes
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Modification time stored in the header, zero keeps output reproducible
    pub fn with_mtime(mut self, mtime: u32) -> Self {
        self.mtime = mtime;
        self
    }

    fn write_header(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_all(&LZOP_MAGIC)?;

        let mut header = Vec::with_capacity(32);
        header.write_u16::<BigEndian>(LZOP_VERSION)?;
        header.write_u16::<BigEndian>(LZO_LIB_VERSION)?;
        header.write_u16::<BigEndian>(LZOP_VERSION_NEEDED)?;
        header.write_u8(METHOD_LZO1X_999)?;
        header.write_u8(LEVEL)?;
        header.write_u32::<BigEndian>(F_ADLER32_D | F_OS_UNIX)?;
        header.write_u32::<BigEndian>(FILE_MODE)?;
        header.write_u32::<BigEndian>(self.mtime)?;
        header.write_u32::<BigEndian>(0)?;
        // no file name
        header.write_u8(0)?;

        out.write_all(&header)?;
        out.write_u32::<BigEndian>(adler::adler32_slice(&header))?;
        Ok(())
    }

    fn write_block(&self, out: &mut Vec<u8>, block: &[u8]) -> Result<()> {
        let compressed = lzokay_native::compress(block)
            .map_err(|e| PackError::compression(format!("LZO1X compression failed: {e:?}")))?;

        out.write_u32::<BigEndian>(block.len() as u32)?;
        if compressed.len() < block.len() {
            out.write_u32::<BigEndian>(compressed.len() as u32)?;
            out.write_u32::<BigEndian>(adler::adler32_slice(block))?;
            out.write_all(&compressed)?;
        } else {
            // incompressible, stored as is
            out.write_u32::<BigEndian>(block.len() as u32)?;
            out.write_u32::<BigEndian>(adler::adler32_slice(block))?;
            out.write_all(block)?;
        }
        Ok(())
    }
}

impl CompressionInterface for LzopCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() / 2 + 64);
        self.write_header(&mut out)?;
        for block in data.chunks(self.block_size) {
            self.write_block(&mut out, block)?;
        }
        out.write_u32::<BigEndian>(0)?;
        Ok(out)
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        decompress_lzop(compressed_data)
    }

    fn get_compression_type(&self) -> Compression {
        Compression::Lzo
    }

    fn get_name(&self) -> &'static str {
        "lzop"
    }
}

fn invalid(msg: impl Into<String>) -> PackError {
    PackError::compression(format!("invalid lzop data: {}", msg.into()))
}

/// Decode a complete lzop file
pub fn decompress_lzop(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < LZOP_MAGIC.len() || data[..LZOP_MAGIC.len()] != LZOP_MAGIC {
        return Err(invalid("bad magic"));
    }

    let mut cursor = Cursor::new(&data[LZOP_MAGIC.len()..]);
    let truncated = |_| invalid("truncated header");

    let version = cursor.read_u16::<BigEndian>().map_err(truncated)?;
    if version < LZOP_VERSION_NEEDED {
        return Err(invalid(format!("version 0x{version:04X} is too old")));
    }
    let _lib_version = cursor.read_u16::<BigEndian>().map_err(truncated)?;
    let _version_needed = cursor.read_u16::<BigEndian>().map_err(truncated)?;
    let method = cursor.read_u8().map_err(truncated)?;
    if !(1..=3).contains(&method) {
        return Err(invalid(format!("unknown method {method}")));
    }
    let _level = cursor.read_u8().map_err(truncated)?;
    let flags = cursor.read_u32::<BigEndian>().map_err(truncated)?;
    if flags & F_H_FILTER != 0 {
        let _filter = cursor.read_u32::<BigEndian>().map_err(truncated)?;
    }
    let _mode = cursor.read_u32::<BigEndian>().map_err(truncated)?;
    let _mtime_low = cursor.read_u32::<BigEndian>().map_err(truncated)?;
    let _mtime_high = cursor.read_u32::<BigEndian>().map_err(truncated)?;
    let name_len = cursor.read_u8().map_err(truncated)? as u64;
    cursor.set_position(cursor.position() + name_len);

    let header_end = cursor.position() as usize;
    let header_bytes = cursor
        .get_ref()
        .get(..header_end)
        .ok_or_else(|| invalid("truncated header"))?;
    let expected = if flags & F_H_CRC32 != 0 {
        calculate_crc32(header_bytes)
    } else {
        adler::adler32_slice(header_bytes)
    };
    let stored = cursor.read_u32::<BigEndian>().map_err(truncated)?;
    if stored != expected {
        return Err(invalid("header checksum mismatch"));
    }

    if flags & F_H_EXTRA_FIELD != 0 {
        let extra_len = cursor.read_u32::<BigEndian>().map_err(truncated)? as u64;
        cursor.set_position(cursor.position() + extra_len + 4);
    }

    let mut out = Vec::new();
    loop {
        let truncated = |_| invalid("truncated block");
        let dst_len = cursor.read_u32::<BigEndian>().map_err(truncated)? as usize;
        if dst_len == 0 {
            break;
        }
        let src_len = cursor.read_u32::<BigEndian>().map_err(truncated)? as usize;
        if src_len > dst_len {
            return Err(invalid("compressed block larger than its output"));
        }

        let d_adler = if flags & F_ADLER32_D != 0 {
            Some(cursor.read_u32::<BigEndian>().map_err(truncated)?)
        } else {
            None
        };
        let d_crc = if flags & F_CRC32_D != 0 {
            Some(cursor.read_u32::<BigEndian>().map_err(truncated)?)
        } else {
            None
        };
        if src_len < dst_len {
            if flags & F_ADLER32_C != 0 {
                cursor.read_u32::<BigEndian>().map_err(truncated)?;
            }
            if flags & F_CRC32_C != 0 {
                cursor.read_u32::<BigEndian>().map_err(truncated)?;
            }
        }

        let mut payload = vec![0u8; src_len];
        cursor.read_exact(&mut payload).map_err(truncated)?;

        let block = if src_len < dst_len {
            lzokay_native::decompress_all(&payload, Some(dst_len))
                .map_err(|e| invalid(format!("LZO1X block failed to decode: {e:?}")))?
        } else {
            payload
        };
        if block.len() != dst_len {
            return Err(invalid("block decoded to the wrong length"));
        }
        if d_adler.is_some_and(|sum| sum != adler::adler32_slice(&block)) {
            return Err(invalid("block adler32 mismatch"));
        }
        if d_crc.is_some_and(|sum| sum != calculate_crc32(&block)) {
            return Err(invalid("block crc32 mismatch"));
        }
        out.extend_from_slice(&block);
    }

    Ok(out)
}

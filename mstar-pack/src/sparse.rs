//! Android sparse image encoding
//!
//! `sparse write` on the board consumes the Android sparse format: a 28 byte
//! file header followed by chunks, each with a 12 byte chunk header. Blocks
//! that consist of one repeated 32-bit word become fill chunks, everything
//! else is stored in raw chunks.

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{PackError, Result};

pub const SPARSE_HEADER_MAGIC: u32 = 0xED26_FF3A;
pub const SPARSE_MAJOR_VERSION: u16 = 1;
pub const SPARSE_MINOR_VERSION: u16 = 0;
pub const FILE_HEADER_SIZE: usize = 28;
pub const CHUNK_HEADER_SIZE: usize = 12;
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

pub const CHUNK_TYPE_RAW: u16 = 0xCAC1;
pub const CHUNK_TYPE_FILL: u16 = 0xCAC2;
pub const CHUNK_TYPE_DONT_CARE: u16 = 0xCAC3;
pub const CHUNK_TYPE_CRC32: u16 = 0xCAC4;

/// One run of blocks in a sparse image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SparseChunk {
    /// Literal block data, always a whole number of blocks
    Raw(Vec<u8>),
    /// `blocks` blocks filled with a repeated little-endian word
    Fill { value: u32, blocks: u32 },
    /// `blocks` blocks the writer leaves untouched
    DontCare { blocks: u32 },
}

impl SparseChunk {
    /// Number of blocks this chunk covers
    pub fn blocks(&self, block_size: u32) -> u32 {
        match self {
            Self::Raw(data) => (data.len() / block_size as usize) as u32,
            Self::Fill { blocks, .. } | Self::DontCare { blocks } => *blocks,
        }
    }

    fn encoded_len(&self) -> usize {
        CHUNK_HEADER_SIZE
            + match self {
                Self::Raw(data) => data.len(),
                Self::Fill { .. } => 4,
                Self::DontCare { .. } => 0,
            }
    }
}

/// A decoded sparse image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseImage {
    block_size: u32,
    total_blocks: u32,
    chunks: Vec<SparseChunk>,
}

impl SparseImage {
    /// Encode a raw image, zero padding the last partial block
    pub fn from_raw(data: &[u8]) -> Self {
        Self::from_raw_with_block_size(data, DEFAULT_BLOCK_SIZE)
    }

    pub fn from_raw_with_block_size(data: &[u8], block_size: u32) -> Self {
        let bs = block_size as usize;
        let mut image = Self {
            block_size,
            total_blocks: 0,
            chunks: Vec::new(),
        };

        for block in data.chunks(bs) {
            let mut padded;
            let block = if block.len() < bs {
                padded = block.to_vec();
                padded.resize(bs, 0);
                &padded[..]
            } else {
                block
            };

            match uniform_word(block) {
                Some(value) => image.push_fill(value),
                None => image.push_raw(block),
            }
            image.total_blocks += 1;
        }

        image
    }

    fn push_fill(&mut self, value: u32) {
        if let Some(SparseChunk::Fill { value: last, blocks }) = self.chunks.last_mut() {
            if *last == value {
                *blocks += 1;
                return;
            }
        }
        self.chunks.push(SparseChunk::Fill { value, blocks: 1 });
    }

    fn push_raw(&mut self, block: &[u8]) {
        if let Some(SparseChunk::Raw(data)) = self.chunks.last_mut() {
            data.extend_from_slice(block);
            return;
        }
        self.chunks.push(SparseChunk::Raw(block.to_vec()));
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    pub fn chunks(&self) -> &[SparseChunk] {
        &self.chunks
    }

    /// Size of [`to_bytes`](Self::to_bytes) without encoding
    pub fn encoded_len(&self) -> usize {
        FILE_HEADER_SIZE + self.chunks.iter().map(SparseChunk::encoded_len).sum::<usize>()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write_to(&mut out)?;
        Ok(out)
    }

    fn write_to(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
        out.write_u32::<LittleEndian>(SPARSE_HEADER_MAGIC)?;
        out.write_u16::<LittleEndian>(SPARSE_MAJOR_VERSION)?;
        out.write_u16::<LittleEndian>(SPARSE_MINOR_VERSION)?;
        out.write_u16::<LittleEndian>(FILE_HEADER_SIZE as u16)?;
        out.write_u16::<LittleEndian>(CHUNK_HEADER_SIZE as u16)?;
        out.write_u32::<LittleEndian>(self.block_size)?;
        out.write_u32::<LittleEndian>(self.total_blocks)?;
        out.write_u32::<LittleEndian>(self.chunks.len() as u32)?;
        // image checksum, unused by writers
        out.write_u32::<LittleEndian>(0)?;

        for chunk in &self.chunks {
            let chunk_type = match chunk {
                SparseChunk::Raw(_) => CHUNK_TYPE_RAW,
                SparseChunk::Fill { .. } => CHUNK_TYPE_FILL,
                SparseChunk::DontCare { .. } => CHUNK_TYPE_DONT_CARE,
            };
            out.write_u16::<LittleEndian>(chunk_type)?;
            out.write_u16::<LittleEndian>(0)?;
            out.write_u32::<LittleEndian>(chunk.blocks(self.block_size))?;
            out.write_u32::<LittleEndian>(chunk.encoded_len() as u32)?;
            match chunk {
                SparseChunk::Raw(data) => out.extend_from_slice(data),
                SparseChunk::Fill { value, .. } => out.write_u32::<LittleEndian>(*value)?,
                SparseChunk::DontCare { .. } => {}
            }
        }
        Ok(())
    }

    /// Parse an encoded sparse image
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let truncated = |_| PackError::sparse("truncated data");

        let magic = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        if magic != SPARSE_HEADER_MAGIC {
            return Err(PackError::sparse(format!("bad magic 0x{magic:08X}")));
        }
        let major = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        if major != SPARSE_MAJOR_VERSION {
            return Err(PackError::sparse(format!("unsupported major version {major}")));
        }
        let _minor = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let file_hdr_sz = cursor.read_u16::<LittleEndian>().map_err(truncated)? as usize;
        let chunk_hdr_sz = cursor.read_u16::<LittleEndian>().map_err(truncated)? as usize;
        if file_hdr_sz < FILE_HEADER_SIZE || chunk_hdr_sz < CHUNK_HEADER_SIZE {
            return Err(PackError::sparse("header sizes too small"));
        }
        let block_size = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        if block_size == 0 || block_size % 4 != 0 {
            return Err(PackError::sparse(format!("invalid block size {block_size}")));
        }
        let total_blocks = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let total_chunks = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let _checksum = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        cursor.set_position(file_hdr_sz as u64);

        let mut chunks = Vec::new();
        let mut blocks_seen = 0u64;
        for _ in 0..total_chunks {
            let start = cursor.position();
            let chunk_type = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
            let _reserved = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
            let blocks = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
            let total_sz = cursor.read_u32::<LittleEndian>().map_err(truncated)? as usize;
            cursor.set_position(start + chunk_hdr_sz as u64);
            let body_len = total_sz
                .checked_sub(chunk_hdr_sz)
                .ok_or_else(|| PackError::sparse("chunk size smaller than its header"))?;

            match chunk_type {
                CHUNK_TYPE_RAW => {
                    let expected = blocks as usize * block_size as usize;
                    if body_len != expected {
                        return Err(PackError::sparse(format!(
                            "raw chunk holds {body_len} bytes, expected {expected}"
                        )));
                    }
                    let mut body = vec![0u8; body_len];
                    cursor.read_exact(&mut body).map_err(truncated)?;
                    chunks.push(SparseChunk::Raw(body));
                }
                CHUNK_TYPE_FILL => {
                    if body_len != 4 {
                        return Err(PackError::sparse("fill chunk must carry 4 bytes"));
                    }
                    let value = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
                    chunks.push(SparseChunk::Fill { value, blocks });
                }
                CHUNK_TYPE_DONT_CARE => {
                    chunks.push(SparseChunk::DontCare { blocks });
                }
                CHUNK_TYPE_CRC32 => {
                    cursor.set_position(cursor.position() + body_len as u64);
                    continue;
                }
                other => {
                    return Err(PackError::sparse(format!("unknown chunk type 0x{other:04X}")));
                }
            }
            blocks_seen += blocks as u64;
        }

        if blocks_seen != total_blocks as u64 {
            return Err(PackError::sparse(format!(
                "chunks cover {blocks_seen} blocks, header says {total_blocks}"
            )));
        }

        Ok(Self {
            block_size,
            total_blocks,
            chunks,
        })
    }

    /// Expand back to a raw image; don't-care blocks read as zero
    pub fn to_raw(&self) -> Vec<u8> {
        let bs = self.block_size as usize;
        let mut out = Vec::with_capacity(self.total_blocks as usize * bs);
        for chunk in &self.chunks {
            match chunk {
                SparseChunk::Raw(data) => out.extend_from_slice(data),
                SparseChunk::Fill { value, blocks } => {
                    let word = value.to_le_bytes();
                    for _ in 0..(*blocks as usize * bs / 4) {
                        out.extend_from_slice(&word);
                    }
                }
                SparseChunk::DontCare { blocks } => {
                    out.resize(out.len() + *blocks as usize * bs, 0);
                }
            }
        }
        out
    }

    /// Split into self-contained images of at most `max_len` encoded bytes
    ///
    /// Every piece covers the full image; blocks owned by other pieces are
    /// marked don't-care, so each piece can be written on its own.
    pub fn split(&self, max_len: usize) -> Result<Vec<SparseImage>> {
        if max_len == 0 || self.encoded_len() <= max_len {
            return Ok(vec![self.clone()]);
        }

        let bs = self.block_size as usize;
        let min_len = FILE_HEADER_SIZE + 3 * CHUNK_HEADER_SIZE + bs;
        if max_len < min_len {
            return Err(PackError::config(format!(
                "sparse chunk size {max_len} is too small, at least {min_len} bytes are needed"
            )));
        }
        // room for the leading and trailing don't-care chunks
        let budget = max_len - FILE_HEADER_SIZE - 2 * CHUNK_HEADER_SIZE;

        let mut pieces = Vec::new();
        let mut current: Vec<SparseChunk> = Vec::new();
        let mut used = 0usize;
        let mut start_block = 0u32;
        let mut block = 0u32;

        let mut pending: std::collections::VecDeque<SparseChunk> =
            self.chunks.iter().cloned().collect();
        while let Some(chunk) = pending.pop_front() {
            let cost = chunk.encoded_len();
            if used + cost <= budget {
                block += chunk.blocks(self.block_size);
                used += cost;
                current.push(chunk);
                continue;
            }

            if !current.is_empty() {
                pieces.push(self.piece(start_block, block, std::mem::take(&mut current)));
                start_block = block;
                used = 0;
                pending.push_front(chunk);
                continue;
            }

            // a lone raw chunk larger than a piece, cut it on block boundaries
            let SparseChunk::Raw(mut data) = chunk else {
                return Err(PackError::sparse("chunk does not fit into an empty piece"));
            };
            let fit_blocks = (budget - CHUNK_HEADER_SIZE) / bs;
            let rest = data.split_off(fit_blocks * bs);
            block += fit_blocks as u32;
            pieces.push(self.piece(start_block, block, vec![SparseChunk::Raw(data)]));
            start_block = block;
            pending.push_front(SparseChunk::Raw(rest));
        }

        if !current.is_empty() {
            pieces.push(self.piece(start_block, block, current));
        }
        Ok(pieces)
    }

    fn piece(&self, start_block: u32, end_block: u32, body: Vec<SparseChunk>) -> SparseImage {
        let mut chunks = Vec::with_capacity(body.len() + 2);
        if start_block > 0 {
            chunks.push(SparseChunk::DontCare { blocks: start_block });
        }
        chunks.extend(body);
        if end_block < self.total_blocks {
            chunks.push(SparseChunk::DontCare {
                blocks: self.total_blocks - end_block,
            });
        }
        SparseImage {
            block_size: self.block_size,
            total_blocks: self.total_blocks,
            chunks,
        }
    }
}

/// The repeated word if every 32-bit word of `block` is the same
fn uniform_word(block: &[u8]) -> Option<u32> {
    let first = block.get(..4)?;
    if block.chunks_exact(4).all(|word| word == first) {
        Some(u32::from_le_bytes([first[0], first[1], first[2], first[3]]))
    } else {
        None
    }
}

/// Convert a raw image to its sparse representation
pub fn to_sparse(data: &[u8]) -> Result<Vec<u8>> {
    SparseImage::from_raw(data).to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BS: usize = DEFAULT_BLOCK_SIZE as usize;

    fn mixed_image() -> Vec<u8> {
        let mut data = vec![0u8; 2 * BS];
        data.extend((0..3 * BS).map(|i| (i % 253) as u8));
        data.extend(std::iter::repeat_n(0xAB, BS));
        data.extend((0..BS / 2).map(|i| (i % 7) as u8));
        data
    }

    #[test]
    fn test_chunk_classification() {
        let image = SparseImage::from_raw(&mixed_image());
        assert_eq!(image.total_blocks(), 7);
        assert_eq!(image.chunks().len(), 4);
        assert!(matches!(image.chunks()[0], SparseChunk::Fill { value: 0, blocks: 2 }));
        assert!(matches!(&image.chunks()[1], SparseChunk::Raw(d) if d.len() == 3 * BS));
        assert!(matches!(
            image.chunks()[2],
            SparseChunk::Fill { value: 0xABABABAB, blocks: 1 }
        ));
        assert!(matches!(&image.chunks()[3], SparseChunk::Raw(d) if d.len() == BS));
    }

    #[test]
    fn test_header_fields() {
        let bytes = to_sparse(&vec![0u8; 3 * BS]).unwrap();
        assert_eq!(&bytes[0..4], &SPARSE_HEADER_MAGIC.to_le_bytes());
        assert_eq!(u16::from_le_bytes([bytes[8], bytes[9]]), FILE_HEADER_SIZE as u16);
        assert_eq!(u32::from_le_bytes(bytes[16..20].try_into().unwrap()), 3);
        // one fill chunk
        assert_eq!(bytes.len(), FILE_HEADER_SIZE + CHUNK_HEADER_SIZE + 4);
    }

    #[test]
    fn test_parse_expands_to_padded_input() {
        let data = mixed_image();
        let bytes = to_sparse(&data).unwrap();
        let parsed = SparseImage::parse(&bytes).unwrap();

        let mut expected = data.clone();
        expected.resize(parsed.total_blocks() as usize * BS, 0);
        assert_eq!(parsed.to_raw(), expected);
    }

    #[test]
    fn test_split_pieces_are_bounded_and_complete() {
        let data: Vec<u8> = (0..20 * BS).map(|i| (i % 251) as u8).collect();
        let image = SparseImage::from_raw(&data);
        let max_len = 6 * BS;

        let pieces = image.split(max_len).unwrap();
        assert!(pieces.len() > 1);

        let mut merged = vec![None; data.len()];
        for piece in &pieces {
            let encoded = piece.to_bytes().unwrap();
            assert!(encoded.len() <= max_len);
            let parsed = SparseImage::parse(&encoded).unwrap();
            assert_eq!(parsed.total_blocks(), image.total_blocks());

            let mut block = 0usize;
            for chunk in parsed.chunks() {
                let blocks = chunk.blocks(parsed.block_size()) as usize;
                if let SparseChunk::Raw(bytes) = chunk {
                    for (i, b) in bytes.iter().enumerate() {
                        assert!(merged[block * BS + i].is_none(), "block written twice");
                        merged[block * BS + i] = Some(*b);
                    }
                }
                block += blocks;
            }
        }
        let merged: Vec<u8> = merged.into_iter().map(|b| b.unwrap()).collect();
        assert_eq!(merged, data);
    }

    #[test]
    fn test_split_small_image_is_unchanged() {
        let image = SparseImage::from_raw(&mixed_image());
        let pieces = image.split(0).unwrap();
        assert_eq!(pieces, vec![image.clone()]);
        let pieces = image.split(1 << 20).unwrap();
        assert_eq!(pieces.len(), 1);
    }

    #[test]
    fn test_split_rejects_tiny_chunk_size() {
        let data: Vec<u8> = (0..4 * BS).map(|i| (i % 13) as u8).collect();
        let err = SparseImage::from_raw(&data).split(1024).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(SparseImage::parse(b"definitely not sparse data").is_err());
        let mut bytes = to_sparse(&mixed_image()).unwrap();
        bytes.truncate(bytes.len() - 10);
        assert!(SparseImage::parse(&bytes).is_err());
    }
}

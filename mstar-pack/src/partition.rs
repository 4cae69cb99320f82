//! Turns one partition section into payload chunks and script lines

use std::fs;

use byte_unit::Byte;
use log::{debug, info, warn};
use serde::Serialize;

use crate::assembler::ImageAssembler;
use crate::compression::CompressionInterface;
use crate::directive::DirectiveEmitter;
use crate::error::{PackError, Result};
use crate::header::HeaderImage;
use crate::image_types::PartitionKind;
use crate::manifest::PartitionSpec;
use crate::sparse::SparseImage;

/// One payload as it is stored in the binary region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Where a chunk ended up in the firmware file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkPlacement {
    pub partition: String,
    pub index: usize,
    /// Absolute offset in the firmware file
    pub offset: u64,
    pub len: u64,
    /// Memory address the bootloader loads the chunk to
    pub load_addr: u64,
}

pub struct PartitionProcessor<'a> {
    spec: &'a PartitionSpec,
    emitter: &'a DirectiveEmitter,
    compressor: &'a dyn CompressionInterface,
    header_size: usize,
}

impl<'a> PartitionProcessor<'a> {
    pub fn new(
        spec: &'a PartitionSpec,
        emitter: &'a DirectiveEmitter,
        compressor: &'a dyn CompressionInterface,
        header_size: usize,
    ) -> Self {
        Self {
            spec,
            emitter,
            compressor,
            header_size,
        }
    }

    /// Payload chunks for `data`, in the order they are packed
    ///
    /// Only plain partition images are split, compressed or made sparse.
    pub fn chunks(&self, data: &[u8]) -> Result<Vec<Chunk>> {
        let spec = self.spec;
        if spec.kind.is_single_chunk() {
            return Ok(vec![Chunk {
                index: 0,
                data: data.to_vec(),
            }]);
        }

        let pieces: Vec<Vec<u8>> = if spec.sparse {
            SparseImage::from_raw(data)
                .split(spec.chunk_size)?
                .iter()
                .map(SparseImage::to_bytes)
                .collect::<Result<_>>()?
        } else if spec.chunk_size == 0 || data.is_empty() {
            vec![data.to_vec()]
        } else {
            data.chunks(spec.chunk_size).map(<[u8]>::to_vec).collect()
        };

        pieces
            .into_iter()
            .enumerate()
            .map(|(index, piece)| {
                let data = if spec.lzo {
                    self.compressor.compress(&piece)?
                } else {
                    piece
                };
                Ok(Chunk { index, data })
            })
            .collect()
    }

    /// Emit this partition's script lines and append its payload
    pub fn process(
        &self,
        header: &mut HeaderImage,
        assembler: &mut ImageAssembler,
    ) -> Result<Vec<ChunkPlacement>> {
        let spec = self.spec;
        let name = spec.name.as_str();
        info!(
            "partition {name}: type {}, create {}, erase {}, lzo {}, sparse {}",
            spec.kind, spec.create, spec.erase, spec.lzo, spec.sparse
        );

        if spec.create {
            let size = spec.size.ok_or_else(|| {
                PackError::config(format!("partition '{name}': create requires a size"))
            })?;
            header.push_str(&self.emitter.create(name, size));
        }

        let Some(path) = &spec.image_file else {
            if spec.erase {
                header.push_str(&self.emitter.erase(name));
            }
            if spec.kind != PartitionKind::PartitionImage {
                return Err(PackError::config(format!(
                    "partition '{name}': type {} requires an image file",
                    spec.kind
                )));
            }
            return Ok(Vec::new());
        };

        let data = fs::read(path).map_err(|e| PackError::io(path, e))?;
        if data.is_empty() {
            warn!("partition {name}: image {} is empty", path.display());
        }
        info!(
            "partition {name}: image {} ({:#})",
            path.display(),
            Byte::from_u64(data.len() as u64)
        );

        let dram = self.emitter.dram_buf_addr();
        let mut placements = Vec::new();
        match spec.kind {
            PartitionKind::PartitionImage => {
                header.write_partition_comment(name);
                let chunks = self.chunks(&data)?;
                let count = chunks.len();
                info!("partition {name}: {count} chunk(s)");

                for chunk in &chunks {
                    let size = chunk.len() as u64;
                    // resolved before the load line is emitted
                    let write = if spec.lzo {
                        if chunk.index == 0 {
                            self.emitter.unlzo(name, size, dram, spec.empty_skip)
                        } else {
                            self.emitter.unlzo_continue(name, size, dram, spec.empty_skip)
                        }
                    } else if spec.sparse {
                        self.emitter.sparse_write(name, dram)
                    } else if count == 1 {
                        self.emitter.write(name, size, dram, spec.empty_skip)
                    } else {
                        self.emitter.write_continue(name, size, dram, spec.empty_skip)?
                    };

                    let placement = self.place(header, assembler, dram, chunk);
                    if chunk.index == 0 && spec.erase {
                        header.push_str(&self.emitter.erase(name));
                    }
                    assembler.append(&chunk.data);
                    header.push_str(&write);
                    placements.push(placement);
                }
            }
            PartitionKind::SecureInfo => {
                let chunk = self.whole(data);
                placements.push(self.place(header, assembler, dram, &chunk));
                assembler.append(&chunk.data);
                header.push_str(&self.emitter.store_secure_info(name));
            }
            PartitionKind::NuttxConfig => {
                let chunk = self.whole(data);
                placements.push(self.place(header, assembler, dram, &chunk));
                assembler.append(&chunk.data);
                header.push_str(&self.emitter.store_nuttx_config(name));
            }
            PartitionKind::Sboot => {
                header.write_partition_comment(name);
                let chunk = self.whole(data);
                placements.push(self.place(header, assembler, dram, &chunk));
                assembler.append(&chunk.data);
                header.push_str(&self.emitter.write_boot(
                    chunk.len() as u64,
                    dram,
                    spec.empty_skip,
                ));
            }
            PartitionKind::InMemory => {
                let addr = spec.memory_offset.ok_or_else(|| {
                    PackError::config(format!("partition '{name}': inMemory requires a memory offset"))
                })?;
                let chunk = self.whole(data);
                placements.push(self.place(header, assembler, addr, &chunk));
                assembler.append(&chunk.data);
            }
        }

        Ok(placements)
    }

    fn whole(&self, data: Vec<u8>) -> Chunk {
        Chunk { index: 0, data }
    }

    /// Emit the load line for a chunk about to be appended
    fn place(
        &self,
        header: &mut HeaderImage,
        assembler: &ImageAssembler,
        load_addr: u64,
        chunk: &Chunk,
    ) -> ChunkPlacement {
        let offset = (assembler.offset() + self.header_size) as u64;
        let len = chunk.len() as u64;
        header.push_str(&self.emitter.load(load_addr, len, offset));
        debug!(
            "partition {}: chunk {} at 0x{offset:X}, {:#}",
            self.spec.name,
            chunk.index,
            Byte::from_u64(len)
        );

        ChunkPlacement {
            partition: self.spec.name.clone(),
            index: chunk.index,
            offset,
            len,
            load_addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::{LzopCompressor, NoCompression, lzop::decompress_lzop};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: usize = 0x4000;

    fn emitter() -> DirectiveEmitter {
        DirectiveEmitter::new(0x5000_0000, "MstarUpgrade.bin", false)
    }

    fn source(data: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(data).unwrap();
        file
    }

    fn run(spec: &PartitionSpec) -> (Result<Vec<ChunkPlacement>>, HeaderImage, ImageAssembler) {
        let emitter = emitter();
        let lzo = LzopCompressor::new();
        let processor = PartitionProcessor::new(spec, &emitter, &lzo, HEADER);
        let mut header = HeaderImage::new(HEADER);
        let mut asm = ImageAssembler::new();
        let result = processor.process(&mut header, &mut asm);
        (result, header, asm)
    }

    #[test]
    fn test_raw_chunks_reassemble() {
        let spec = PartitionSpec::new("data", PartitionKind::PartitionImage).chunk_size(3);
        let emitter = emitter();
        let processor = PartitionProcessor::new(&spec, &emitter, &NoCompression, HEADER);
        let chunks = processor.chunks(b"abcdefgh").unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].data, b"gh");
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.data.clone()).collect();
        assert_eq!(joined, b"abcdefgh");
    }

    #[test]
    fn test_single_raw_partition() {
        let file = source(&[0xAB; 10]);
        let spec = PartitionSpec::new("boot", PartitionKind::PartitionImage)
            .image_file(file.path())
            .erase(true);
        let (result, header, asm) = run(&spec);
        let placements = result.unwrap();

        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].offset, HEADER as u64);
        assert_eq!(asm.offset(), 12);
        assert_eq!(
            header.text(),
            "\n# File Partition: boot\n\
             filepartload 50000000 MstarUpgrade.bin 4000 0A\n\
             mmc erase.p boot\n\
             mmc write.p 50000000 boot 0A 1\n"
        );
    }

    #[test]
    fn test_lzo_chunks() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 13) as u8).collect();
        let file = source(&data);
        let spec = PartitionSpec::new("system", PartitionKind::PartitionImage)
            .image_file(file.path())
            .chunk_size(4096)
            .lzo(true);
        let (result, header, asm) = run(&spec);
        let placements = result.unwrap();

        assert_eq!(placements.len(), 3);
        let text = header.text();
        assert_eq!(text.matches("mmc unlzo ").count(), 1);
        assert_eq!(text.matches("mmc unlzo.cont ").count(), 2);

        let region = asm.as_bytes();
        let mut restored = Vec::new();
        for p in &placements {
            let start = p.offset as usize - HEADER;
            restored.extend(decompress_lzop(&region[start..start + p.len as usize]).unwrap());
        }
        assert_eq!(restored, data);
    }

    #[test]
    fn test_multi_chunk_raw_is_unsupported() {
        let file = source(&[1u8; 100]);
        let spec = PartitionSpec::new("system", PartitionKind::PartitionImage)
            .image_file(file.path())
            .chunk_size(40);
        let (result, _, asm) = run(&spec);
        assert!(matches!(result, Err(PackError::Unsupported(_))));
        assert_eq!(asm.offset(), 0);
    }

    #[test]
    fn test_create_and_erase_only() {
        let spec = PartitionSpec::new("cache", PartitionKind::PartitionImage)
            .create(true)
            .size(0x1000)
            .erase(true);
        let (result, header, asm) = run(&spec);
        assert!(result.unwrap().is_empty());
        assert_eq!(header.text(), "mmc create cache 1000\nmmc erase.p cache\n");
        assert_eq!(asm.offset(), 0);
    }

    #[test]
    fn test_single_chunk_kinds() {
        let file = source(&[7u8; 6]);

        let secure = PartitionSpec::new("tee", PartitionKind::SecureInfo).image_file(file.path());
        let (_, header, _) = run(&secure);
        assert!(header.text().ends_with("store_secure_info tee 50000000\n"));

        let nuttx = PartitionSpec::new("nuttx", PartitionKind::NuttxConfig).image_file(file.path());
        let (_, header, _) = run(&nuttx);
        assert!(header.text().ends_with("store_nuttx_config nuttx 50000000\n"));

        let sboot = PartitionSpec::new("MBOOT", PartitionKind::Sboot).image_file(file.path());
        let (_, header, _) = run(&sboot);
        assert!(header.text().starts_with("\n# File Partition: MBOOT\n"));
        assert!(header.text().ends_with("mmc write.boot 1 50000000 0 06 1\n"));

        let pm = PartitionSpec::new("pm", PartitionKind::InMemory)
            .image_file(file.path())
            .memory_offset(0x2000_0000);
        let (result, header, asm) = run(&pm);
        assert_eq!(result.unwrap()[0].load_addr, 0x2000_0000);
        assert_eq!(header.text(), "filepartload 20000000 MstarUpgrade.bin 4000 06\n");
        assert_eq!(asm.offset(), 8);
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let spec = PartitionSpec::new("boot", PartitionKind::PartitionImage)
            .image_file("/nonexistent/boot.img");
        let (result, _, _) = run(&spec);
        match result {
            Err(PackError::Io { path, .. }) => assert!(path.ends_with("boot.img")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_sparse_pieces_each_get_a_write() {
        let mut data = vec![0u8; 4096 * 8];
        for (i, byte) in data.iter_mut().enumerate() {
            if (i / 4096) % 2 == 0 {
                *byte = (i % 251) as u8;
            }
        }
        let file = source(&data);
        let spec = PartitionSpec::new("userdata", PartitionKind::PartitionImage)
            .image_file(file.path())
            .chunk_size(3 * 4096)
            .sparse(true);
        let (result, header, _) = run(&spec);
        let placements = result.unwrap();
        assert!(placements.len() > 1);
        assert_eq!(
            header.text().matches("sparse write 50000000 userdata\n").count(),
            placements.len()
        );
        assert!(placements.iter().all(|p| p.len <= 3 * 4096));
    }
}

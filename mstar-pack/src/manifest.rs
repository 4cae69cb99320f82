//! Firmware manifest: global settings plus the ordered partition list
//!
//! The manifest is a TOML document:
//!
//! ```toml
//! [main]
//! firmware_file_name = "MstarUpgrade.bin"
//! dram_buf_addr = "0x50000000"
//! magic_footer = "12345678"
//! header_size = "16KB"
//! crc_type = "NORMAL"
//!
//! [header_script]
//! prefix = "setenv bootcmd ..."
//! suffix = "reset"
//!
//! ["part/system"]
//! type = "partitionImage"
//! image_file = "system.img"
//! lzo = true
//! chunk_size = "150MB"
//! ```
//!
//! Partition tables keep their declaration order, which is also the order
//! their payloads are packed in.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::Deserialize;

use crate::error::{PackError, Result};
use crate::footer::HEADER_SNAPSHOT_LEN;
use crate::image_types::{CrcType, PartitionKind};

/// Header capacity used when the manifest does not set one
pub const DEFAULT_HEADER_SIZE: usize = 16 * 1024;

/// Load buffer address used when the manifest does not set one
pub const DEFAULT_DRAM_BUF_ADDR: u64 = 0x5000_0000;

pub const DEFAULT_MAGIC_FOOTER: &str = "12345678";

const PART_PREFIX: &str = "part/";

/// One partition section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    pub name: String,
    pub kind: PartitionKind,
    /// Declared partition size, only used by `mmc create`
    pub size: Option<u64>,
    pub image_file: Option<PathBuf>,
    /// Maximum chunk length, 0 packs the whole file as one chunk
    pub chunk_size: usize,
    pub create: bool,
    pub erase: bool,
    pub empty_skip: bool,
    pub lzo: bool,
    pub sparse: bool,
    /// Load address for `inMemory` partitions
    pub memory_offset: Option<u64>,
}

impl PartitionSpec {
    pub fn new(name: impl Into<String>, kind: PartitionKind) -> Self {
        Self {
            name: name.into(),
            kind,
            size: None,
            image_file: None,
            chunk_size: 0,
            create: false,
            erase: false,
            empty_skip: true,
            lzo: false,
            sparse: false,
            memory_offset: None,
        }
    }

    pub fn image_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_file = Some(path.into());
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn erase(mut self, erase: bool) -> Self {
        self.erase = erase;
        self
    }

    pub fn empty_skip(mut self, empty_skip: bool) -> Self {
        self.empty_skip = empty_skip;
        self
    }

    pub fn lzo(mut self, lzo: bool) -> Self {
        self.lzo = lzo;
        self
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    pub fn memory_offset(mut self, addr: u64) -> Self {
        self.memory_offset = Some(addr);
        self
    }

    /// Checks that must pass before any partition is processed
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(PackError::config(format!(
                "invalid partition name '{}'",
                self.name
            )));
        }

        if self.lzo && self.sparse {
            return Err(PackError::config(format!(
                "partition '{}': lzo and sparse cannot be used together",
                self.name
            )));
        }

        if self.create && self.size.is_none() {
            return Err(PackError::config(format!(
                "partition '{}': create requires a size",
                self.name
            )));
        }

        if self.kind != PartitionKind::PartitionImage && self.image_file.is_none() {
            return Err(PackError::config(format!(
                "partition '{}': type {} requires an image file",
                self.name, self.kind
            )));
        }

        if self.kind == PartitionKind::InMemory && self.memory_offset.is_none() {
            return Err(PackError::config(format!(
                "partition '{}': inMemory requires a memory offset",
                self.name
            )));
        }

        if self.kind.is_single_chunk() && (self.lzo || self.sparse || self.chunk_size > 0) {
            warn!(
                "partition '{}': chunk_size, lzo and sparse are ignored for type {}",
                self.name, self.kind
            );
        }

        Ok(())
    }
}

/// Free text placed around the generated directives
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderScript {
    /// First block of the header, supports `{time}`, `{time:<fmt>}` and `{timestamp}`
    pub label: Option<String>,
    pub prefix: String,
    pub suffix: String,
}

/// A complete firmware description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Where the packed image is written
    pub firmware_file_name: PathBuf,
    /// File name the bootloader script loads chunks from
    pub script_firmware_file_name: String,
    pub use_hex_values_prefix: bool,
    pub dram_buf_addr: u64,
    pub magic_footer: Vec<u8>,
    pub header_size: usize,
    pub crc_type: CrcType,
    pub header_script: HeaderScript,
    pub partitions: Vec<PartitionSpec>,
}

impl Manifest {
    pub fn new(firmware_file_name: impl Into<PathBuf>) -> Self {
        let firmware_file_name = firmware_file_name.into();
        let script_firmware_file_name = firmware_file_name
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            firmware_file_name,
            script_firmware_file_name,
            use_hex_values_prefix: false,
            dram_buf_addr: DEFAULT_DRAM_BUF_ADDR,
            magic_footer: DEFAULT_MAGIC_FOOTER.as_bytes().to_vec(),
            header_size: DEFAULT_HEADER_SIZE,
            crc_type: CrcType::default(),
            header_script: HeaderScript::default(),
            partitions: Vec::new(),
        }
    }

    pub fn header_size(mut self, header_size: usize) -> Self {
        self.header_size = header_size;
        self
    }

    pub fn crc_type(mut self, crc_type: CrcType) -> Self {
        self.crc_type = crc_type;
        self
    }

    pub fn magic_footer(mut self, magic: impl Into<Vec<u8>>) -> Self {
        self.magic_footer = magic.into();
        self
    }

    pub fn dram_buf_addr(mut self, addr: u64) -> Self {
        self.dram_buf_addr = addr;
        self
    }

    pub fn hex_prefix(mut self, enabled: bool) -> Self {
        self.use_hex_values_prefix = enabled;
        self
    }

    pub fn script_firmware_file_name(mut self, name: impl Into<String>) -> Self {
        self.script_firmware_file_name = name.into();
        self
    }

    pub fn header_script(mut self, script: HeaderScript) -> Self {
        self.header_script = script;
        self
    }

    pub fn partition(mut self, spec: PartitionSpec) -> Self {
        self.partitions.push(spec);
        self
    }

    /// Read and validate a manifest file
    ///
    /// Relative paths inside it are resolved against the file's directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| PackError::io(path, e))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        let manifest = Self::from_toml_str(&text, base_dir)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse manifest text, resolving relative image paths against `base_dir`
    pub fn from_toml_str(text: &str, base_dir: &Path) -> Result<Self> {
        let table: toml::Table = toml::from_str(text)?;

        let main: RawMain = section(&table, &["main", "Main"])
            .ok_or_else(|| PackError::config("missing [main] section"))?
            .clone()
            .try_into()?;
        let script: RawHeaderScript = match section(&table, &["header_script", "HeaderScript"]) {
            Some(value) => value.clone().try_into()?,
            None => RawHeaderScript::default(),
        };

        let project_folder = match &main.project_folder {
            Some(folder) => base_dir.join(folder),
            None => base_dir.to_path_buf(),
        };

        let mut manifest = Self::new(&main.firmware_file_name);
        if let Some(name) = main.script_firmware_file_name {
            manifest.script_firmware_file_name = name;
        }
        manifest.use_hex_values_prefix = main.use_hex_values_prefix;
        manifest.dram_buf_addr = main.dram_buf_addr.to_address("dram_buf_addr")?;
        manifest.magic_footer = main.magic_footer.into_bytes();
        if let Some(size) = main.header_size {
            manifest.header_size = size.to_size("header_size")? as usize;
        }
        if let Some(crc_type) = main.crc_type {
            manifest.crc_type = crc_type.parse()?;
        }
        manifest.header_script = HeaderScript {
            label: script.label,
            prefix: script.prefix,
            suffix: script.suffix,
        };

        for (key, value) in &table {
            if let Some(name) = key.strip_prefix(PART_PREFIX) {
                manifest
                    .partitions
                    .push(raw_partition(name, value, &project_folder)?);
            } else if key == "part" {
                let nested = value
                    .as_table()
                    .ok_or_else(|| PackError::config("'part' must be a table of partitions"))?;
                for (name, value) in nested {
                    manifest
                        .partitions
                        .push(raw_partition(name, value, &project_folder)?);
                }
            } else if !matches!(
                key.as_str(),
                "main" | "Main" | "header_script" | "HeaderScript"
            ) {
                warn!("ignoring unknown manifest section '{key}'");
            }
        }

        Ok(manifest)
    }

    /// Whole-manifest checks, run before any partition is touched
    pub fn validate(&self) -> Result<()> {
        if self.header_size < HEADER_SNAPSHOT_LEN {
            return Err(PackError::config(format!(
                "header size {} is smaller than the {HEADER_SNAPSHOT_LEN} byte footer snapshot",
                self.header_size
            )));
        }
        if self.magic_footer.is_empty() {
            return Err(PackError::config("magic footer must not be empty"));
        }
        if self.script_firmware_file_name.is_empty() {
            return Err(PackError::config("script firmware file name must not be empty"));
        }
        for spec in &self.partitions {
            spec.validate()?;
        }
        Ok(())
    }
}

fn section<'a>(table: &'a toml::Table, names: &[&str]) -> Option<&'a toml::Value> {
    names.iter().find_map(|name| table.get(*name))
}

fn raw_partition(name: &str, value: &toml::Value, project_folder: &Path) -> Result<PartitionSpec> {
    let raw: RawPartition = value.clone().try_into()?;
    let field = |f: &str| format!("part/{name}.{f}");

    let kind = match &raw.kind {
        Some(kind) => kind.parse()?,
        None => PartitionKind::PartitionImage,
    };

    let mut spec = PartitionSpec::new(name, kind);
    spec.create = raw.create;
    spec.erase = raw.erase;
    spec.empty_skip = raw.empty_skip;
    spec.lzo = raw.lzo;
    spec.sparse = raw.sparse;
    spec.image_file = raw.image_file.map(|path| project_folder.join(path));
    if let Some(size) = raw.size {
        spec.size = Some(size.to_size(&field("size"))?);
    }
    if let Some(chunk_size) = raw.chunk_size {
        spec.chunk_size = chunk_size.to_size(&field("chunk_size"))? as usize;
    }
    if let Some(offset) = raw.memory_offset {
        spec.memory_offset = Some(offset.to_address(&field("memory_offset"))?);
    }
    Ok(spec)
}

/// Numbers may be written as TOML integers or as strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Literal {
    Int(u64),
    Text(String),
}

impl Literal {
    fn to_size(&self, field: &str) -> Result<u64> {
        match self {
            Self::Int(value) => Ok(*value),
            Self::Text(text) => parse_size(text)
                .map_err(|e| PackError::config(format!("{field}: {e}"))),
        }
    }

    fn to_address(&self, field: &str) -> Result<u64> {
        match self {
            Self::Int(value) => Ok(*value),
            Self::Text(text) => parse_address(text)
                .map_err(|e| PackError::config(format!("{field}: {e}"))),
        }
    }
}

/// Parse a size: `0x` hex, plain decimal, or decimal with a K/M/G(B) suffix
///
/// Unit suffixes are powers of 1024 and case-insensitive.
pub fn parse_size(s: &str) -> std::result::Result<u64, String> {
    let text = s.trim();
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).map_err(|e| format!("invalid size '{s}': {e}"));
    }

    let upper = text.to_ascii_uppercase();
    const UNITS: [(&str, u64); 7] = [
        ("GB", 1 << 30),
        ("MB", 1 << 20),
        ("KB", 1 << 10),
        ("G", 1 << 30),
        ("M", 1 << 20),
        ("K", 1 << 10),
        ("B", 1),
    ];
    let (digits, multiplier) = UNITS
        .iter()
        .find_map(|(suffix, mult)| upper.strip_suffix(suffix).map(|d| (d, *mult)))
        .unwrap_or((upper.as_str(), 1));

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{s}' overflows"))
}

/// Parse an address, always hexadecimal with an optional `0x` prefix
pub fn parse_address(s: &str) -> std::result::Result<u64, String> {
    let text = s.trim();
    let hex = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(hex, 16).map_err(|e| format!("invalid address '{s}': {e}"))
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMain {
    #[serde(alias = "FirmwareFileName")]
    firmware_file_name: String,
    #[serde(default, alias = "ProjectFolder")]
    project_folder: Option<PathBuf>,
    #[serde(default, alias = "useHexValuesPrefix")]
    use_hex_values_prefix: bool,
    #[serde(default, alias = "SCRIPT_FIRMWARE_FILE_NAME")]
    script_firmware_file_name: Option<String>,
    #[serde(alias = "DRAM_BUF_ADDR")]
    dram_buf_addr: Literal,
    #[serde(alias = "MAGIC_FOOTER")]
    magic_footer: String,
    #[serde(default, alias = "HEADER_SIZE")]
    header_size: Option<Literal>,
    #[serde(default, alias = "CRC_TYPE")]
    crc_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHeaderScript {
    #[serde(default, alias = "Label")]
    label: Option<String>,
    #[serde(default, alias = "Prefix")]
    prefix: String,
    #[serde(default, alias = "Suffix")]
    suffix: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPartition {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    create: bool,
    #[serde(default)]
    size: Option<Literal>,
    #[serde(default)]
    erase: bool,
    #[serde(default, alias = "imageFile")]
    image_file: Option<PathBuf>,
    #[serde(default, alias = "chunkSize")]
    chunk_size: Option<Literal>,
    #[serde(default)]
    lzo: bool,
    #[serde(default)]
    sparse: bool,
    #[serde(default, alias = "memoryOffset")]
    memory_offset: Option<Literal>,
    #[serde(default = "default_true", alias = "emptySkip")]
    empty_skip: bool,
}

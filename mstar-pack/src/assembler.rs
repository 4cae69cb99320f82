//! Binary region that follows the header

/// Every payload starts and ends on this boundary
pub const ALIGNMENT: usize = 4;

pub const FILL: u8 = 0xFF;

/// Concatenates chunk payloads with `0xFF` alignment padding
#[derive(Debug, Clone, Default)]
pub struct ImageAssembler {
    region: Vec<u8>,
}

impl ImageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current region length, the position the next chunk lands at
    pub fn offset(&self) -> usize {
        self.region.len()
    }

    /// Append one chunk verbatim, returning the new region length
    pub fn append(&mut self, chunk: &[u8]) -> usize {
        self.pad();
        self.region.extend_from_slice(chunk);
        self.pad();
        self.region.len()
    }

    fn pad(&mut self) {
        let aligned = self.region.len().next_multiple_of(ALIGNMENT);
        self.region.resize(aligned, FILL);
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.region
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.region
    }
}

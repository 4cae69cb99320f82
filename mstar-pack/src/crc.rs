//! CRC32 helpers

use crc32fast::Hasher;

/// Standard CRC32 (IEEE 802.3) of `data`
pub fn calculate_crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// CRC32 of several buffers as if they were concatenated
pub fn calculate_crc32_parts(parts: &[&[u8]]) -> u32 {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_value() {
        assert_eq!(calculate_crc32(b"123456789"), 0xCBF43926);
        assert_eq!(calculate_crc32(&[]), 0);
    }

    #[test]
    fn test_parts_match_concatenation() {
        let whole = calculate_crc32(b"header|bin|magic");
        let parts = calculate_crc32_parts(&[b"header|", b"bin|", b"magic"]);
        assert_eq!(whole, parts);
    }
}

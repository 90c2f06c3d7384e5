//! Store file header.

use crate::error::{StoreError, StoreResult};
use crate::record::compute_crc32;

/// Magic bytes identifying an EmbedKV store file.
pub const STORE_MAGIC: [u8; 4] = *b"EKVS";

/// Current store format version.
pub const STORE_VERSION: u16 = 1;

/// Fixed header size in bytes; slot 0 starts at this offset.
pub const HEADER_SIZE: usize = 32;

/// CRC size.
const CRC_SIZE: usize = 4;

/// The store file header.
///
/// Layout (little-endian):
///
/// ```text
/// magic (4) | version u16 | key_capacity u16 | dimension u32 |
/// record_count u64 | reserved (8) | crc32 u32
/// ```
///
/// `record_count` is advisory: it is rewritten on clean close and always
/// reconciled against the rebuild scan on open, so a crash between a
/// committed write and a header rewrite cannot corrupt anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StoreHeader {
    /// Store format version.
    pub version: u16,
    /// Width of the fixed key field in bytes.
    pub key_capacity: u16,
    /// Vector dimension, fixed at creation.
    pub dimension: u32,
    /// Advisory count of live records.
    pub record_count: u64,
}

impl StoreHeader {
    /// Creates a header for a new store file.
    pub(crate) const fn new(key_capacity: u16, dimension: u32) -> Self {
        Self {
            version: STORE_VERSION,
            key_capacity,
            dimension,
            record_count: 0,
        }
    }

    /// Encodes the header to its fixed 32-byte image.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);

        buf.extend_from_slice(&STORE_MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.key_capacity.to_le_bytes());
        buf.extend_from_slice(&self.dimension.to_le_bytes());
        buf.extend_from_slice(&self.record_count.to_le_bytes());

        // Reserved
        buf.resize(HEADER_SIZE - CRC_SIZE, 0);

        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Decodes a header from its 32-byte image.
    pub(crate) fn decode(data: &[u8]) -> StoreResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(StoreError::invalid_format(format!(
                "header is {} bytes, expected {}",
                data.len(),
                HEADER_SIZE
            )));
        }

        if data[0..4] != STORE_MAGIC {
            return Err(StoreError::invalid_format("invalid store magic"));
        }

        let crc_start = HEADER_SIZE - CRC_SIZE;
        let stored_crc = u32::from_le_bytes([
            data[crc_start],
            data[crc_start + 1],
            data[crc_start + 2],
            data[crc_start + 3],
        ]);
        let computed_crc = compute_crc32(&data[..crc_start]);
        if stored_crc != computed_crc {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_crc,
                actual: computed_crc,
            });
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > STORE_VERSION {
            return Err(StoreError::invalid_format(format!(
                "unsupported store version: {version}"
            )));
        }

        let key_capacity = u16::from_le_bytes([data[6], data[7]]);
        let dimension = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        let record_count = u64::from_le_bytes([
            data[12], data[13], data[14], data[15], data[16], data[17], data[18], data[19],
        ]);

        Ok(Self {
            version,
            key_capacity,
            dimension,
            record_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut header = StoreHeader::new(255, 128);
        header.record_count = 42;

        let encoded = header.encode();
        assert_eq!(encoded.len(), HEADER_SIZE);

        let decoded = StoreHeader::decode(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut encoded = StoreHeader::new(255, 3).encode();
        encoded[0] = b'X';

        let result = StoreHeader::decode(&encoded);
        assert!(matches!(result, Err(StoreError::InvalidFormat { .. })));
    }

    #[test]
    fn corrupted_header_rejected() {
        let mut encoded = StoreHeader::new(255, 3).encode();
        // Flip a bit inside the dimension field
        encoded[9] ^= 0x01;

        let result = StoreHeader::decode(&encoded);
        assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn short_header_rejected() {
        let encoded = StoreHeader::new(255, 3).encode();
        let result = StoreHeader::decode(&encoded[..16]);
        assert!(matches!(result, Err(StoreError::InvalidFormat { .. })));
    }

    #[test]
    fn future_version_rejected() {
        let mut header = StoreHeader::new(255, 3);
        header.version = STORE_VERSION + 1;

        let encoded = header.encode();
        let result = StoreHeader::decode(&encoded);
        assert!(matches!(result, Err(StoreError::InvalidFormat { .. })));
    }
}

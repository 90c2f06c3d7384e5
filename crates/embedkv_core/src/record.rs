//! Slot record codec.
//!
//! A record is the persisted, self-validating encoding of one
//! (key, vector) pair. Every record of a given store encodes to the same
//! number of bytes - the slot size - which is what makes slot addressing
//! O(1):
//!
//! ```text
//! ┌──────────┬─────────┬───────────────────────┬──────────────┬───────┐
//! │ sequence │ key_len │ key (padded to        │ dimension ×  │ crc32 │
//! │ u64 LE   │ u16 LE  │ key_capacity bytes)   │ f32 LE       │ u32 LE│
//! └──────────┴─────────┴───────────────────────┴──────────────┴───────┘
//! ```
//!
//! The CRC covers everything before it, so a torn or partially written
//! slot fails validation instead of decoding to a wrong vector.

use crate::error::{StoreError, StoreResult};
use crate::header::HEADER_SIZE;
use crate::types::{SequenceNumber, SlotId};

/// Fixed prefix size: sequence (8) + key_len (2).
const PREFIX_SIZE: usize = 10;

/// CRC size.
const CRC_SIZE: usize = 4;

/// Slot geometry for a store: fixed by the vector dimension and the key
/// field width at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotLayout {
    /// Width of the fixed key field in bytes.
    key_capacity: usize,
    /// Vector dimension.
    dimension: usize,
}

impl SlotLayout {
    /// Creates a layout for the given key field width and dimension.
    pub(crate) const fn new(key_capacity: u16, dimension: u32) -> Self {
        Self {
            key_capacity: key_capacity as usize,
            dimension: dimension as usize,
        }
    }

    /// Returns the vector dimension.
    pub(crate) const fn dimension(self) -> usize {
        self.dimension
    }

    /// Returns the key field width in bytes.
    pub(crate) const fn key_capacity(self) -> usize {
        self.key_capacity
    }

    /// Returns the encoded size of one slot in bytes.
    pub(crate) const fn slot_size(self) -> usize {
        PREFIX_SIZE + self.key_capacity + self.dimension * 4 + CRC_SIZE
    }

    /// Returns the byte offset of a slot in the backing file.
    pub(crate) const fn slot_offset(self, slot: SlotId) -> u64 {
        HEADER_SIZE as u64 + slot.as_u64() * self.slot_size() as u64
    }
}

/// A decoded (key, vector) record.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Record {
    /// The record's key bytes.
    pub key: Vec<u8>,
    /// The embedding vector, exactly `dimension` values.
    pub vector: Vec<f32>,
    /// Sequence number assigned when this record was committed.
    pub sequence: SequenceNumber,
}

impl Record {
    /// Creates a new record.
    pub(crate) fn new(key: Vec<u8>, vector: Vec<f32>, sequence: SequenceNumber) -> Self {
        Self {
            key,
            vector,
            sequence,
        }
    }

    /// Encodes the record into a full slot image.
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not fit the layout's key field or
    /// the vector length does not match the layout's dimension.
    pub(crate) fn encode(&self, layout: SlotLayout) -> StoreResult<Vec<u8>> {
        if self.key.is_empty() || self.key.len() > layout.key_capacity() {
            return Err(StoreError::invalid_key(format!(
                "key length {} outside 1..={}",
                self.key.len(),
                layout.key_capacity()
            )));
        }
        if self.vector.len() != layout.dimension() {
            return Err(StoreError::DimensionMismatch {
                expected: layout.dimension(),
                actual: self.vector.len(),
            });
        }

        let mut buf = Vec::with_capacity(layout.slot_size());

        // Sequence
        buf.extend_from_slice(&self.sequence.as_u64().to_le_bytes());

        // Key length + key, padded to the fixed key field width
        // Safe: key_capacity comes from a u16
        let key_len = self.key.len() as u16;
        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.resize(PREFIX_SIZE + layout.key_capacity(), 0);

        // Vector payload
        for value in &self.vector {
            buf.extend_from_slice(&value.to_le_bytes());
        }

        // CRC32 (over everything before it)
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());

        Ok(buf)
    }

    /// Decodes a full slot image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image has the wrong length, the CRC does
    /// not match, or the declared key length is inconsistent with the
    /// layout.
    pub(crate) fn decode(data: &[u8], layout: SlotLayout) -> StoreResult<Self> {
        let slot_size = layout.slot_size();
        if data.len() != slot_size {
            return Err(StoreError::corruption(format!(
                "slot image is {} bytes, expected {}",
                data.len(),
                slot_size
            )));
        }

        // Verify CRC before interpreting anything else
        let crc_start = slot_size - CRC_SIZE;
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

        let sequence = SequenceNumber::new(u64::from_le_bytes([
            data[0], data[1], data[2], data[3], data[4], data[5], data[6], data[7],
        ]));

        let key_len = u16::from_le_bytes([data[8], data[9]]) as usize;
        if key_len == 0 || key_len > layout.key_capacity() {
            return Err(StoreError::corruption(format!(
                "declared key length {} outside 1..={}",
                key_len,
                layout.key_capacity()
            )));
        }
        let key = data[PREFIX_SIZE..PREFIX_SIZE + key_len].to_vec();

        let payload_start = PREFIX_SIZE + layout.key_capacity();
        let mut vector = Vec::with_capacity(layout.dimension());
        for chunk in data[payload_start..crc_start].chunks_exact(4) {
            vector.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }

        Ok(Self {
            key,
            vector,
            sequence,
        })
    }
}

/// Computes CRC32 checksum for data (IEEE polynomial).
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

//! Embedding store facade: dimension contract, commit path, recovery.

use crate::alloc::{Allocation, SlotAllocator};
use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::header::{StoreHeader, HEADER_SIZE};
use crate::index::KeyIndex;
use crate::record::{Record, SlotLayout};
use crate::types::{SequenceNumber, SlotId};
use embedkv_storage::{FileBackend, InMemoryBackend, StorageBackend, StorageError};
use parking_lot::RwLock;
use std::path::Path;
use tracing::{debug, warn};

/// Largest accepted vector dimension.
///
/// Guards against absurd slot sizes from a corrupted or hostile request;
/// real embedding dimensions are orders of magnitude smaller.
pub const MAX_DIMENSION: usize = 65_536;

/// A persistent key-value store for fixed-dimension embedding vectors.
///
/// Every vector written to a store has exactly the dimension the store was
/// created with. Records live in fixed-size, CRC-validated slots; the
/// key → slot index is held in memory and rebuilt by scanning the file on
/// open, which is also how the store recovers from a crash: a torn slot
/// fails its checksum and is discarded, so every key reads as its old
/// value or its new value, never a mixture.
///
/// # Concurrency
///
/// Reads may proceed concurrently with each other; writes are serialized
/// and mutually exclusive with reads (reader-writer discipline). The
/// backing file carries an exclusive advisory lock, so a second open of
/// the same path fails with [`StoreError::StoreLocked`].
///
/// # Example
///
/// ```rust
/// use embedkv_core::EmbeddingStore;
///
/// let store = EmbeddingStore::open_in_memory(3)?;
/// store.write("a", &[0.0, 1.0, 0.0])?;
/// assert_eq!(store.read("a")?, vec![0.0, 1.0, 0.0]);
/// # Ok::<(), embedkv_core::StoreError>(())
/// ```
pub struct EmbeddingStore {
    /// Configuration.
    config: Config,
    /// Slot geometry, fixed at creation.
    layout: SlotLayout,
    /// Vector dimension, fixed at creation.
    dimension: usize,
    /// Mutable state behind the reader-writer lock.
    inner: RwLock<StoreInner>,
}

/// State guarded by the store's reader-writer lock.
struct StoreInner {
    backend: Box<dyn StorageBackend>,
    header: StoreHeader,
    index: KeyIndex,
    alloc: SlotAllocator,
    next_sequence: SequenceNumber,
    open: bool,
}

impl EmbeddingStore {
    /// Opens or creates a store at `path` with the given vector dimension.
    ///
    /// A new file is initialized with a header recording the dimension.
    /// For an existing file the header is validated: a differing stored
    /// dimension fails with [`StoreError::DimensionMismatch`] and nothing
    /// is mutated. The key index is then rebuilt by scanning all slots.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidDimension`] if `dimension` is zero or
    ///   exceeds [`MAX_DIMENSION`]
    /// - [`StoreError::DimensionMismatch`] on a stored-dimension conflict
    /// - [`StoreError::StoreLocked`] if another handle has the file open
    /// - [`StoreError::InvalidFormat`] / [`StoreError::ChecksumMismatch`]
    ///   if the header is not a valid store header
    /// - I/O errors from the file system
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> StoreResult<Self> {
        Self::open_with_config(path, dimension, Config::default())
    }

    /// Opens or creates a store at `path` with a custom configuration.
    ///
    /// # Errors
    ///
    /// Same as [`Self::open`], plus [`StoreError::InvalidFormat`] if an
    /// existing file was created with a different `key_capacity`.
    pub fn open_with_config(
        path: impl AsRef<Path>,
        dimension: usize,
        config: Config,
    ) -> StoreResult<Self> {
        let backend =
            FileBackend::open_with_create_dirs(path.as_ref()).map_err(|e| match e {
                StorageError::Locked { .. } => StoreError::StoreLocked,
                other => StoreError::Storage(other),
            })?;
        Self::open_with_backend(Box::new(backend), dimension, config)
    }

    /// Opens a fresh in-memory store for testing or ephemeral use.
    ///
    /// Data is lost when the store is dropped.
    pub fn open_in_memory(dimension: usize) -> StoreResult<Self> {
        Self::open_with_backend(Box::new(InMemoryBackend::new()), dimension, Config::default())
    }

    /// Opens a store over a pre-configured storage backend.
    ///
    /// This is a lower-level constructor; for most use cases prefer
    /// [`Self::open`].
    pub fn open_with_backend(
        mut backend: Box<dyn StorageBackend>,
        dimension: usize,
        config: Config,
    ) -> StoreResult<Self> {
        if dimension == 0 || dimension > MAX_DIMENSION {
            return Err(StoreError::InvalidDimension { dimension });
        }
        if config.key_capacity == 0 {
            return Err(StoreError::invalid_format("key capacity must be nonzero"));
        }

        let size = backend.size()?;
        let header = if size == 0 {
            // Safe: dimension <= MAX_DIMENSION
            let header = StoreHeader::new(config.key_capacity, dimension as u32);
            backend.append(&header.encode())?;
            backend.flush()?;
            backend.sync()?;
            header
        } else {
            if (size as usize) < HEADER_SIZE {
                return Err(StoreError::invalid_format(
                    "file is shorter than a store header",
                ));
            }
            let header = StoreHeader::decode(&backend.read_at(0, HEADER_SIZE)?)?;
            if header.dimension as usize != dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: header.dimension as usize,
                    actual: dimension,
                });
            }
            if header.key_capacity != config.key_capacity {
                return Err(StoreError::invalid_format(format!(
                    "store was created with key capacity {}, configured {}",
                    header.key_capacity, config.key_capacity
                )));
            }
            header
        };

        let layout = SlotLayout::new(header.key_capacity, header.dimension);
        let (index, alloc, next_sequence) = Self::rebuild(backend.as_mut(), layout)?;

        if header.record_count != index.len() as u64 {
            debug!(
                stored = header.record_count,
                scanned = index.len(),
                "advisory record count reconciled from slot scan"
            );
        }

        debug!(
            dimension,
            records = index.len(),
            free_slots = alloc.free_count(),
            "store opened"
        );

        Ok(Self {
            config,
            layout,
            dimension,
            inner: RwLock::new(StoreInner {
                backend,
                header,
                index,
                alloc,
                next_sequence,
                open: true,
            }),
        })
    }

    /// Rebuilds the key index by scanning every slot in the file.
    ///
    /// A trailing partial slot is a torn append and is truncated away.
    /// Slots failing CRC or length validation are logged and reclaimed
    /// into the free list, never fatal: discarding them is what keeps the
    /// store usable after a partial-write crash. When several valid slots
    /// encode the same key, the highest sequence wins and the losers are
    /// reclaimed.
    fn rebuild(
        backend: &mut dyn StorageBackend,
        layout: SlotLayout,
    ) -> StoreResult<(KeyIndex, SlotAllocator, SequenceNumber)> {
        let slot_size = layout.slot_size() as u64;
        let data_len = backend.size()? - HEADER_SIZE as u64;
        let slot_count = data_len / slot_size;

        if data_len % slot_size != 0 {
            let boundary = HEADER_SIZE as u64 + slot_count * slot_size;
            warn!(
                torn_bytes = data_len % slot_size,
                "discarding torn trailing write"
            );
            backend.truncate(boundary)?;
        }

        let mut index = KeyIndex::new();
        let mut freed: Vec<SlotId> = Vec::new();
        let mut max_sequence = SequenceNumber::new(0);

        for id in 0..slot_count {
            let slot = SlotId::new(id);
            let image = backend.read_at(layout.slot_offset(slot), layout.slot_size())?;

            match Record::decode(&image, layout) {
                Ok(record) => {
                    max_sequence = max_sequence.max(record.sequence);
                    if let Some(loser) = index.observe(&record.key, slot, record.sequence) {
                        freed.push(loser);
                    }
                }
                Err(error) => {
                    warn!(%slot, %error, "discarding invalid slot during index rebuild");
                    freed.push(slot);
                }
            }
        }

        let mut alloc = SlotAllocator::with_slot_count(slot_count);
        freed.sort_unstable();
        for slot in freed {
            alloc.release(slot);
        }

        Ok((index, alloc, max_sequence.next()))
    }

    /// Writes a vector under `key`, creating or overwriting the record.
    ///
    /// All validation happens before any mutation, so a failed call leaves
    /// the store unchanged. The new record is committed - written to a
    /// slot that is not the key's live slot and flushed (plus fsync when
    /// [`Config::sync_on_write`]) - before the index is repointed; a write
    /// that fails partway is never observable by a subsequent read.
    ///
    /// # Errors
    ///
    /// - [`StoreError::DimensionMismatch`] if `vector.len()` differs from
    ///   the store's dimension
    /// - [`StoreError::InvalidKey`] if the key is empty or longer than the
    ///   configured key capacity
    /// - [`StoreError::StoreClosed`] after [`Self::close`]
    /// - I/O errors from the backend
    pub fn write(&self, key: impl AsRef<[u8]>, vector: &[f32]) -> StoreResult<()> {
        let key = key.as_ref();
        let mut inner = self.inner.write();
        inner.ensure_open()?;

        if key.is_empty() || key.len() > self.layout.key_capacity() {
            return Err(StoreError::invalid_key(format!(
                "key length {} outside 1..={}",
                key.len(),
                self.layout.key_capacity()
            )));
        }
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let sequence = inner.next_sequence;
        let record = Record::new(key.to_vec(), vector.to_vec(), sequence);
        let image = record.encode(self.layout)?;

        let allocation = inner.alloc.allocate();
        let slot = allocation.slot();
        let offset = self.layout.slot_offset(slot);

        if let Err(error) = inner.commit(allocation, offset, &image, self.config.sync_on_write) {
            // The image may be durable even though the commit failed, and
            // the rebuild scan trusts any CRC-valid slot. Burn the
            // sequence so a retry outranks the residue, and deface the
            // slot so it cannot decode as a record.
            inner.next_sequence = sequence.next();
            let end = offset + self.layout.slot_size() as u64;
            let materialized = inner.backend.size().map_or(true, |size| end <= size);
            if materialized {
                inner.deface_slot(offset, self.layout.slot_size());
            }
            inner.alloc.retract(allocation, materialized);
            return Err(error);
        }

        inner.next_sequence = sequence.next();
        if let Some(superseded) = inner.index.insert(key.to_vec(), slot, sequence) {
            inner.alloc.release(superseded.slot);
        }

        Ok(())
    }

    /// Reads the vector stored under `key`.
    ///
    /// Returns a fresh, independently owned copy; the caller never shares
    /// memory with the store's internal buffers.
    ///
    /// # Errors
    ///
    /// - [`StoreError::KeyNotFound`] if the key was never written
    /// - [`StoreError::ChecksumMismatch`] / [`StoreError::Corruption`] if
    ///   the slot fails validation
    /// - [`StoreError::StoreClosed`] after [`Self::close`]
    pub fn read(&self, key: impl AsRef<[u8]>) -> StoreResult<Vec<f32>> {
        let key = key.as_ref();
        let inner = self.inner.read();
        inner.ensure_open()?;

        let entry = inner
            .index
            .get(key)
            .ok_or_else(|| StoreError::key_not_found(key))?;

        let image = inner
            .backend
            .read_at(self.layout.slot_offset(entry.slot), self.layout.slot_size())?;
        let record = Record::decode(&image, self.layout)?;

        if record.key != key {
            return Err(StoreError::corruption(format!(
                "{} does not hold the expected key",
                entry.slot
            )));
        }

        Ok(record.vector)
    }

    /// Checks whether `key` is present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreClosed`] after [`Self::close`].
    pub fn contains_key(&self, key: impl AsRef<[u8]>) -> StoreResult<bool> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        Ok(inner.index.contains_key(key.as_ref()))
    }

    /// Returns the live keys, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreClosed`] after [`Self::close`].
    pub fn keys(&self) -> StoreResult<Vec<Vec<u8>>> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        Ok(inner.index.keys().map(<[u8]>::to_vec).collect())
    }

    /// Returns the number of live records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreClosed`] after [`Self::close`].
    pub fn len(&self) -> StoreResult<usize> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        Ok(inner.index.len())
    }

    /// Checks whether the store holds no records.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreClosed`] after [`Self::close`].
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the store's fixed vector dimension.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns the number of reclaimed slots awaiting reuse.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreClosed`] after [`Self::close`].
    pub fn free_slots(&self) -> StoreResult<usize> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        Ok(inner.alloc.free_count())
    }

    /// Returns the size of the backing file in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StoreClosed`] after [`Self::close`], or an
    /// error if the backend cannot report its size.
    pub fn size_on_disk(&self) -> StoreResult<u64> {
        let inner = self.inner.read();
        inner.ensure_open()?;
        Ok(inner.backend.size()?)
    }

    /// Flushes all pending writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&self) -> StoreResult<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        inner.backend.flush()?;
        Ok(())
    }

    /// Closes the store, rewriting the header's advisory record count and
    /// syncing everything to disk. Further operations fail with
    /// [`StoreError::StoreClosed`]. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the final header write or sync fails.
    pub fn close(&self) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if !inner.open {
            return Ok(());
        }

        inner.header.record_count = inner.index.len() as u64;
        let image = inner.header.encode();
        inner.backend.write_at(0, &image)?;
        inner.backend.flush()?;
        inner.backend.sync()?;

        inner.open = false;
        Ok(())
    }

    /// Checks if the store is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.read().open
    }
}

impl StoreInner {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(StoreError::StoreClosed)
        }
    }

    /// Makes one record durable: slot write, flush, optional fsync.
    ///
    /// This is the commit point; the index is only repointed after it
    /// succeeds.
    fn commit(
        &mut self,
        allocation: Allocation,
        offset: u64,
        image: &[u8],
        sync: bool,
    ) -> StoreResult<()> {
        match allocation {
            Allocation::Reused(_) => self.backend.write_at(offset, image)?,
            Allocation::Fresh(slot) => {
                let written_at = self.backend.append(image)?;
                if written_at != offset {
                    return Err(StoreError::corruption(format!(
                        "{slot} landed at offset {written_at}, expected {offset}"
                    )));
                }
            }
        }

        self.backend.flush()?;
        if sync {
            self.backend.sync()?;
        }
        Ok(())
    }

    /// Best-effort invalidation of a slot whose commit failed.
    ///
    /// The slot may hold a complete, CRC-valid image that the rebuild
    /// scan would otherwise treat as committed. Zeroing it makes the
    /// residue fail validation. Errors are ignored; the caller already
    /// observes the commit failure.
    fn deface_slot(&mut self, offset: u64, len: usize) {
        let zeros = vec![0u8; len];
        if self.backend.write_at(offset, &zeros).is_ok() {
            let _ = self.backend.flush();
            let _ = self.backend.sync();
        }
    }
}

impl std::fmt::Debug for EmbeddingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("EmbeddingStore")
            .field("dimension", &self.dimension)
            .field("records", &inner.index.len())
            .field("open", &inner.open)
            .finish_non_exhaustive()
    }
}

//! # EmbedKV Core
//!
//! Persistent key-value storage engine for fixed-dimension embedding
//! vectors.
//!
//! This crate provides:
//! - A fixed-width, CRC-validated record codec
//! - A fixed-size slot allocator with FIFO free-slot reuse
//! - An in-memory key index rebuilt by scanning the backing file
//! - Crash-safe per-key commits: after a crash, every key reads as its
//!   old value or its new value, never a mixture
//!
//! The main entry point is [`EmbeddingStore`]:
//!
//! ```rust
//! use embedkv_core::EmbeddingStore;
//!
//! let store = EmbeddingStore::open_in_memory(3).unwrap();
//! store.write("a", &[0.0, 1.0, 0.0]).unwrap();
//! assert_eq!(store.read("a").unwrap(), vec![0.0, 1.0, 0.0]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod alloc;
mod config;
mod error;
mod header;
mod index;
mod record;
mod store;
mod types;

pub use config::Config;
pub use error::{StoreError, StoreResult};
pub use header::{HEADER_SIZE, STORE_MAGIC, STORE_VERSION};
pub use store::{EmbeddingStore, MAX_DIMENSION};
pub use types::{SequenceNumber, SlotId};

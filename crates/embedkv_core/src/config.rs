//! Store configuration.

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to fsync after every committed write (safer but slower).
    pub sync_on_write: bool,

    /// Width in bytes of the fixed key field inside each slot.
    ///
    /// Keys longer than this are rejected. The value is recorded in the
    /// file header because it determines the slot geometry; reopening an
    /// existing store with a different value fails.
    pub key_capacity: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_on_write: true,
            key_capacity: 255,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to fsync after every committed write.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the fixed key field width.
    #[must_use]
    pub const fn key_capacity(mut self, capacity: u16) -> Self {
        self.key_capacity = capacity;
        self
    }
}

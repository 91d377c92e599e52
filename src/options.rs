//! Configuration options for segkv.

use std::time::Duration;

/// Default maximum record count per segment.
pub const DEFAULT_SEGMENT_CAPACITY: u64 = 50;

/// Default interval between background compaction passes.
pub const DEFAULT_COMPACTION_INTERVAL: Duration = Duration::from_secs(60);

/// Maximum key size (8KB).
pub const MAX_KEY_SIZE: usize = 8 * 1024;

/// Maximum value size (1GB).
pub const MAX_VALUE_SIZE: usize = 1024 * 1024 * 1024;

/// Durability mode for segment appends.
///
/// Every append flushes the buffered writer before it is reported
/// successful; `Always` additionally forces the bytes to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// fsync after every append (safest, slowest).
    Always,
    /// Flush only; let the OS decide when to sync (may lose the most
    /// recent appends on power failure).
    #[default]
    None,
}

/// Store configuration options.
#[derive(Debug, Clone)]
pub struct Options {
    // === Storage ===
    /// Create the data directory if it doesn't exist.
    pub create_if_missing: bool,

    // === WAL ===
    /// Maximum record count per segment before a roll.
    pub segment_capacity: u64,

    /// Durability mode for segment appends.
    pub sync_mode: SyncMode,

    // === Compaction ===
    /// Run the background compaction timer.
    pub auto_compaction: bool,

    /// Interval between background compaction passes.
    pub compaction_interval: Duration,

    // === Limits ===
    /// Maximum key size.
    pub max_key_size: usize,

    /// Maximum value size.
    pub max_value_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
            sync_mode: SyncMode::default(),
            auto_compaction: true,
            compaction_interval: DEFAULT_COMPACTION_INTERVAL,
            max_key_size: MAX_KEY_SIZE,
            max_value_size: MAX_VALUE_SIZE,
        }
    }
}

impl Options {
    /// Create new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the options.
    pub fn validate(&self) -> crate::Result<()> {
        if self.segment_capacity == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "segment_capacity must be at least 1".into(),
            ));
        }

        if self.compaction_interval < Duration::from_millis(10) {
            return Err(crate::Error::InvalidConfiguration(
                "compaction_interval must be at least 10ms".into(),
            ));
        }

        if self.max_key_size == 0 || self.max_key_size > MAX_KEY_SIZE {
            return Err(crate::Error::InvalidConfiguration(format!(
                "max_key_size must be between 1 and {}",
                MAX_KEY_SIZE
            )));
        }

        if self.max_value_size == 0 || self.max_value_size > MAX_VALUE_SIZE {
            return Err(crate::Error::InvalidConfiguration(format!(
                "max_value_size must be between 1 and {}",
                MAX_VALUE_SIZE
            )));
        }

        Ok(())
    }
}

/// Builder for Options.
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set create_if_missing.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.options.create_if_missing = value;
        self
    }

    /// Set the maximum record count per segment.
    pub fn segment_capacity(mut self, capacity: u64) -> Self {
        self.options.segment_capacity = capacity;
        self
    }

    /// Set the durability mode.
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.options.sync_mode = mode;
        self
    }

    /// Enable or disable the background compaction timer.
    pub fn auto_compaction(mut self, enabled: bool) -> Self {
        self.options.auto_compaction = enabled;
        self
    }

    /// Set the interval between background compaction passes.
    pub fn compaction_interval(mut self, interval: Duration) -> Self {
        self.options.compaction_interval = interval;
        self
    }

    /// Build the options.
    pub fn build(self) -> crate::Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}

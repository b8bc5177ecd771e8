//! Configuration for ninalink
//!
//! Centralized transport configuration with sensible defaults.

/// Hard ceiling for a single bulk parameter.
///
/// The co-processor's SPI DMA burst is 4096 bytes; staying well below it
/// leaves room for framing and padding.
pub const MAX_BUFFER_PARAM: usize = 4000;

/// Main configuration for a driver instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Reply Configuration
    // -------------------------------------------------------------------------
    /// Bytes clocked while waiting for the reply start marker before giving up
    pub reply_start_attempts: usize,

    // -------------------------------------------------------------------------
    // Transfer Configuration
    // -------------------------------------------------------------------------
    /// Max payload moved by one send/recv/read/write transaction (bytes).
    /// Clamped to [`MAX_BUFFER_PARAM`] where it is used.
    pub max_transfer: usize,

    // -------------------------------------------------------------------------
    // Diagnostics
    // -------------------------------------------------------------------------
    /// Dump every request/reply frame at trace level
    pub trace_frames: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reply_start_attempts: 1000,
            max_transfer: MAX_BUFFER_PARAM,
            trace_frames: false,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Effective bulk transfer size, kept within `1..=MAX_BUFFER_PARAM`
    /// however `max_transfer` was set
    pub fn transfer_cap(&self) -> usize {
        self.max_transfer.clamp(1, MAX_BUFFER_PARAM)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set how many bytes to clock while waiting for a reply
    pub fn reply_start_attempts(mut self, attempts: usize) -> Self {
        self.config.reply_start_attempts = attempts.max(1);
        self
    }

    /// Set the per-transaction bulk transfer cap (clamped to [`MAX_BUFFER_PARAM`])
    pub fn max_transfer(mut self, bytes: usize) -> Self {
        self.config.max_transfer = bytes.clamp(1, MAX_BUFFER_PARAM);
        self
    }

    /// Enable or disable frame dumps
    pub fn trace_frames(mut self, enabled: bool) -> Self {
        self.config.trace_frames = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

//! Stream and frame-buffering configuration.
//!
//! Configuration is plain data with serde derives so a host can load it from
//! JSON (or any other serde format) and hand it to [`StreamBuilder`].
//! Missing fields take the defaults below.
//!
//! # Example
//!
//! ```
//! use sensorwire::config::{BufferingConfig, BufferingFormat};
//!
//! let config = BufferingConfig::from_json(r#"{"num": 8, "format": "ring"}"#).unwrap();
//! assert_eq!(config.capacity(), 8);
//! assert_eq!(config.format, BufferingFormat::Overwrite);
//! ```
//!
//! [`StreamBuilder`]: crate::StreamBuilder

use serde::{Deserialize, Serialize};

use crate::error::{Result, SensorwireError};

/// Default number of frame slots per stream.
pub const DEFAULT_BUFFER_NUM: usize = 4;

/// Default skip rate (admit every frame).
pub const DEFAULT_SKIP_RATE: u32 = 1;

/// Default upper bound for the sticky user data copy.
pub const DEFAULT_MAX_USER_DATA_SIZE: usize = 1024 * 1024;

/// Default capacity of the stream event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Whether a stream buffers more than one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Buffering {
    /// Use `num` slots.
    #[default]
    On,
    /// A single slot regardless of `num`.
    Off,
}

/// What happens when a frame arrives and no slot is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferingFormat {
    /// Reject the newest frame.
    #[default]
    #[serde(alias = "queue")]
    Discard,
    /// Evict the oldest queued frame to make room.
    #[serde(alias = "ring")]
    Overwrite,
}

/// Frame buffering settings for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferingConfig {
    /// Buffering on or off.
    pub buffering: Buffering,
    /// Number of frame slots when buffering is on.
    pub num: usize,
    /// Overflow policy.
    pub format: BufferingFormat,
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            buffering: Buffering::On,
            num: DEFAULT_BUFFER_NUM,
            format: BufferingFormat::Discard,
        }
    }
}

impl BufferingConfig {
    /// Buffering on with `num` slots, discard policy.
    pub fn with_num(num: usize) -> Self {
        Self {
            num,
            ..Self::default()
        }
    }

    /// Parse from JSON, filling missing fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns `Json` on malformed input and `InvalidArgument` when
    /// [`validate`](Self::validate) rejects the result.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that can never admit a frame.
    pub fn validate(&self) -> Result<()> {
        if self.buffering == Buffering::On && self.num == 0 {
            return Err(SensorwireError::invalid_argument(
                "buffering num must be at least 1",
            ));
        }
        Ok(())
    }

    /// Effective number of frame slots.
    pub fn capacity(&self) -> usize {
        match self.buffering {
            Buffering::On => self.num,
            Buffering::Off => 1,
        }
    }
}

/// Per-stream settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Frame buffering.
    pub buffering: BufferingConfig,
    /// Admit one of every `skip_rate` frames.
    pub skip_rate: u32,
    /// Largest sticky user data accepted by `set_user_data`.
    pub max_user_data_size: usize,
    /// Capacity of the broadcast channel carrying stream events.
    pub event_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffering: BufferingConfig::default(),
            skip_rate: DEFAULT_SKIP_RATE,
            max_user_data_size: DEFAULT_MAX_USER_DATA_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl StreamConfig {
    /// Parse from JSON, filling missing fields with defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field.
    pub fn validate(&self) -> Result<()> {
        self.buffering.validate()?;
        if self.skip_rate == 0 {
            return Err(SensorwireError::invalid_argument("skip_rate must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(SensorwireError::invalid_argument(
                "event_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

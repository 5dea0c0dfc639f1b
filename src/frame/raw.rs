//! Arrival data handed in by producers.
//!
//! Raw sensor memory is owned by the producer's allocator. The engine only
//! carries a reference to it (`memory`, `offset`, `size`) and gives it back
//! through the owning stream when a frame is released.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::error::{Result, SensorwireError};
use crate::property::ChannelId;

/// Raw data reference for one channel of an arriving frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRawData {
    /// Channel id, unique within the frame.
    pub channel_id: ChannelId,
    /// Allocator-owned memory block, if the channel carries data.
    pub memory: Option<Bytes>,
    /// Offset of this channel's data inside `memory`.
    pub offset: usize,
    /// Size of this channel's data.
    pub size: usize,
    /// Data type tag (`"image_rgb24"`, `"imu"`, ...).
    pub data_type: String,
    /// Capture time in nanoseconds.
    pub captured_timestamp: u64,
}

impl ChannelRawData {
    /// A channel with no memory attached.
    pub fn new(channel_id: ChannelId, data_type: impl Into<String>) -> Self {
        Self {
            channel_id,
            memory: None,
            offset: 0,
            size: 0,
            data_type: data_type.into(),
            captured_timestamp: 0,
        }
    }

    /// Attach the whole of `memory`.
    pub fn with_memory(mut self, memory: Bytes) -> Self {
        self.offset = 0;
        self.size = memory.len();
        self.memory = Some(memory);
        self
    }

    /// Attach a region of `memory`.
    pub fn with_region(mut self, memory: Bytes, offset: usize, size: usize) -> Self {
        self.memory = Some(memory);
        self.offset = offset;
        self.size = size;
        self
    }

    /// Set the capture timestamp.
    pub fn with_timestamp(mut self, captured_timestamp: u64) -> Self {
        self.captured_timestamp = captured_timestamp;
        self
    }

    /// Check that the region lies inside the memory block.
    pub fn validate(&self) -> Result<()> {
        let Some(memory) = &self.memory else {
            return Ok(());
        };
        match self.offset.checked_add(self.size) {
            Some(end) if end <= memory.len() => Ok(()),
            _ => Err(SensorwireError::invalid_argument(format!(
                "channel {} region {}+{} exceeds memory of {} bytes",
                self.channel_id,
                self.offset,
                self.size,
                memory.len()
            ))),
        }
    }

    /// The referenced bytes, without copying.
    pub fn data(&self) -> Option<Bytes> {
        let memory = self.memory.as_ref()?;
        let end = self.offset.checked_add(self.size)?;
        if end > memory.len() {
            return None;
        }
        Some(memory.slice(self.offset..end))
    }
}

/// One arrival event as deposited by a producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameData {
    /// Sequence number, strictly increasing per stream.
    pub sequence_number: u64,
    /// Channels captured together.
    pub channels: Vec<ChannelRawData>,
}

impl FrameData {
    /// An arrival with no channels yet.
    pub fn new(sequence_number: u64) -> Self {
        Self {
            sequence_number,
            channels: Vec::new(),
        }
    }

    /// Add a channel.
    pub fn with_channel(mut self, channel: ChannelRawData) -> Self {
        self.channels.push(channel);
        self
    }

    /// Channel ids in arrival order.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|c| c.channel_id).collect()
    }

    /// Reject duplicate channel ids and out-of-range regions.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.channels.len());
        for channel in &self.channels {
            if !seen.insert(channel.channel_id) {
                return Err(SensorwireError::invalid_argument(format!(
                    "duplicate channel id {} in frame {}",
                    channel.channel_id, self.sequence_number
                )));
            }
            channel.validate()?;
        }
        Ok(())
    }
}

/// Read view of a channel's raw data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawData {
    /// The data region, `None` for channels without memory.
    pub data: Option<Bytes>,
    /// Region size in bytes.
    pub size: usize,
    /// Data type tag.
    pub data_type: String,
    /// Capture time in nanoseconds.
    pub timestamp: u64,
}

/// Wall-clock time in nanoseconds since the Unix epoch.
pub(crate) fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

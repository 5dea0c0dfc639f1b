//! Callbacks the engine makes into the stream that owns it.

use crate::error::Result;
use crate::frame::FrameData;
use crate::property::ChannelId;

/// The stream side of a [`FrameBufferingEngine`](super::FrameBufferingEngine).
///
/// Every method is called with the engine's frame-queue lock held, so
/// implementations must only signal or hand off. They must never call back
/// into the engine.
pub trait OwningStream: Send + Sync {
    /// The incoming queue went from empty to non-empty.
    fn frame_arrived(&self);

    /// Give back the raw data of `data` for exactly the `referenced`
    /// channel ids. An empty slice means no channel was read.
    fn release_frame(&self, data: &FrameData, referenced: &[ChannelId]) -> Result<()>;

    /// A frame was skipped, rejected for capacity, or overwritten.
    fn frame_dropped(&self, sequence_number: u64);
}

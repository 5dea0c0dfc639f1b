//! Frame buffering engine.
//!
//! Frames move through two collections:
//!
//! ```text
//!   admit ──► incoming (FIFO) ──take──► outgoing ──release──► gone
//! ```
//!
//! Every frame in either collection occupies one slot. A slot is returned
//! only when the owning stream accepts the frame's release, so
//! `slots_remaining + incoming + outgoing == capacity` holds between calls.
//!
//! The engine never blocks and never locks the frame queue itself: the
//! owning stream serializes `admit`, `take`, `release` and `clear` behind one
//! mutex, which `&mut self` enforces.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;

use super::owner::OwningStream;
use super::sticky::StickySettings;
use crate::config::{BufferingFormat, DEFAULT_SKIP_RATE};
use crate::error::{Result, SensorwireError};
use crate::frame::{now_nanos, Frame, FrameData};
use crate::property::{ChannelId, PropertyVersionStore};

/// Lifecycle of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initialized,
}

/// Consistent snapshot of the slot accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStatus {
    /// Free slots.
    pub slots_remaining: usize,
    /// Frames waiting to be taken.
    pub incoming: usize,
    /// Frames taken and not yet released.
    pub outgoing: usize,
}

impl BufferStatus {
    /// Total slots the snapshot accounts for.
    #[inline]
    pub fn total(&self) -> usize {
        self.slots_remaining + self.incoming + self.outgoing
    }
}

/// Admission, queuing and release accounting for one stream.
pub struct FrameBufferingEngine {
    store: Arc<PropertyVersionStore>,
    state: EngineState,
    capacity: usize,
    slots_remaining: usize,
    format: BufferingFormat,
    skip_rate: u32,
    skip_counter: u32,
    incoming: VecDeque<Arc<Frame>>,
    outgoing: Vec<Arc<Frame>>,
    owner: Option<Arc<dyn OwningStream>>,
    sticky: Arc<StickySettings>,
}

impl FrameBufferingEngine {
    /// Create an uninitialized engine whose frames pin from `store`.
    pub fn new(store: Arc<PropertyVersionStore>) -> Self {
        Self::with_sticky(store, Arc::new(StickySettings::default()))
    }

    /// Create an engine sharing `sticky` with its owner.
    pub fn with_sticky(store: Arc<PropertyVersionStore>, sticky: Arc<StickySettings>) -> Self {
        Self {
            store,
            state: EngineState::Uninitialized,
            capacity: 0,
            slots_remaining: 0,
            format: BufferingFormat::default(),
            skip_rate: DEFAULT_SKIP_RATE,
            skip_counter: DEFAULT_SKIP_RATE - 1,
            incoming: VecDeque::new(),
            outgoing: Vec::new(),
            owner: None,
            sticky,
        }
    }

    /// Reserve `capacity` slots and attach the owning stream.
    ///
    /// Calling this on an initialized engine succeeds without touching any
    /// state, so frames in flight survive a settings change.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `owner` is `None`.
    pub fn init(&mut self, capacity: usize, owner: Option<Arc<dyn OwningStream>>) -> Result<()> {
        let owner = owner.ok_or_else(|| SensorwireError::invalid_argument("owning stream is required"))?;
        if self.state == EngineState::Initialized {
            tracing::debug!(capacity = self.capacity, "engine already initialized");
            return Ok(());
        }

        self.capacity = capacity;
        self.slots_remaining = capacity;
        self.owner = Some(owner);
        self.state = EngineState::Initialized;
        tracing::debug!(capacity, format = ?self.format, "engine initialized");
        Ok(())
    }

    /// Release every frame through the owner and return to uninitialized.
    ///
    /// Outgoing frames go first, then incoming. A failing release callback
    /// does not stop the drain; the first failure is returned after every
    /// frame is gone. No-op when already uninitialized.
    pub fn exit(&mut self) -> Result<()> {
        if self.state == EngineState::Uninitialized {
            return Ok(());
        }

        let mut drained: Vec<Arc<Frame>> = self.outgoing.drain(..).collect();
        drained.extend(self.incoming.drain(..));
        let count = drained.len();
        let result = self.drain(drained);

        self.reset();
        tracing::debug!(released = count, "engine exited");
        result
    }

    /// Drop every frame without calling the owner, then return to
    /// uninitialized.
    ///
    /// For teardown after the owning stream is already gone.
    pub fn force_drop(&mut self) {
        if self.state == EngineState::Uninitialized {
            return;
        }
        let dropped = self.incoming.len() + self.outgoing.len();
        self.incoming.clear();
        self.outgoing.clear();
        self.reset();
        tracing::debug!(dropped, "engine force-dropped");
    }

    fn reset(&mut self) {
        self.capacity = 0;
        self.slots_remaining = 0;
        self.owner = None;
        self.sticky.clear_user_data();
        self.state = EngineState::Uninitialized;
    }

    fn owner(&self) -> Result<Arc<dyn OwningStream>> {
        match (&self.owner, self.state) {
            (Some(owner), EngineState::Initialized) => Ok(owner.clone()),
            _ => Err(SensorwireError::invalid_operation("engine is not initialized")),
        }
    }

    /// Admit one arrival.
    ///
    /// `sent_time` defaults to the arrival time.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` before `init`
    /// - `InvalidArgument` for malformed arrival data
    /// - `Cancelled` when the skip rate drops the frame
    /// - `ResourceExhausted` when no slot is free (Discard), or when every
    ///   slot is outgoing (Overwrite)
    pub fn admit(&mut self, data: FrameData, sent_time: Option<u64>) -> Result<()> {
        let owner = self.owner()?;
        data.validate()?;
        let sequence_number = data.sequence_number;

        if self.is_skip_frame() {
            tracing::debug!(sequence_number, skip_rate = self.skip_rate, "frame skipped");
            owner.frame_dropped(sequence_number);
            return Err(SensorwireError::Cancelled(format!(
                "frame {} skipped by skip rate {}",
                sequence_number, self.skip_rate
            )));
        }

        // An overwrite pops the head, so sample emptiness before it.
        let was_empty = self.incoming.is_empty();
        if self.slots_remaining == 0 {
            if self.format == BufferingFormat::Overwrite && !was_empty {
                if let Err(e) = self.evict_oldest(owner.as_ref()) {
                    owner.frame_dropped(sequence_number);
                    return Err(e);
                }
            } else {
                tracing::debug!(sequence_number, capacity = self.capacity, "frame dropped, buffer full");
                owner.frame_dropped(sequence_number);
                return Err(SensorwireError::exhausted(format!(
                    "buffer full, frame {} dropped",
                    sequence_number
                )));
            }
        }

        let sent_time = sent_time.unwrap_or_else(now_nanos);
        let frame = Frame::new(data, sent_time, &self.store)
            .with_user_data(self.sticky.user_data())
            .with_channel_mask(self.sticky.channel_mask());

        self.incoming.push_back(Arc::new(frame));
        self.slots_remaining -= 1;
        tracing::trace!(
            sequence_number,
            slots_remaining = self.slots_remaining,
            incoming = self.incoming.len(),
            "frame admitted"
        );

        if was_empty {
            owner.frame_arrived();
        }
        Ok(())
    }

    fn evict_oldest(&mut self, owner: &dyn OwningStream) -> Result<()> {
        let Some(oldest) = self.incoming.pop_front() else {
            return Ok(());
        };
        if let Err(e) = owner.release_frame(oldest.frame_data(), &[]) {
            self.incoming.push_front(oldest);
            return Err(e);
        }
        let evicted = oldest.sequence_number();
        self.slots_remaining += 1;
        tracing::debug!(evicted, "oldest frame overwritten");
        owner.frame_dropped(evicted);
        Ok(())
    }

    /// Advance the throttle. The `skip_rate`-th call after a rate change
    /// is admitted, then every `skip_rate`-th one after that.
    fn is_skip_frame(&mut self) -> bool {
        self.skip_counter += 1;
        if self.skip_counter >= self.skip_rate {
            self.skip_counter = 0;
            return false;
        }
        true
    }

    /// Hand the oldest incoming frame to the consumer.
    ///
    /// The frame keeps its slot until released.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` when nothing is queued.
    pub fn take(&mut self) -> Result<Arc<Frame>> {
        self.owner()?;
        let frame = self
            .incoming
            .pop_front()
            .ok_or_else(|| SensorwireError::exhausted("no frame queued"))?;
        self.outgoing.push(frame.clone());
        tracing::trace!(
            sequence_number = frame.sequence_number(),
            outgoing = self.outgoing.len(),
            "frame taken"
        );
        Ok(frame)
    }

    /// Return a taken frame.
    ///
    /// With `raw_data_accessed` (or a recorded frame) every unmasked channel
    /// id is reported to the owner; otherwise the id set is empty. The slot
    /// is freed only if the owner's release callback succeeds.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `frame` is not outgoing
    /// - whatever the owner's release callback returns
    pub fn release(&mut self, frame: &Arc<Frame>, raw_data_accessed: bool) -> Result<()> {
        let owner = self.owner()?;
        let position = self
            .outgoing
            .iter()
            .position(|f| Arc::ptr_eq(f, frame))
            .ok_or_else(|| {
                SensorwireError::invalid_argument(format!(
                    "frame {} is not outgoing",
                    frame.sequence_number()
                ))
            })?;

        frame.set_raw_data_accessed(raw_data_accessed);
        let referenced = referenced_channels(frame, raw_data_accessed);
        owner.release_frame(frame.frame_data(), &referenced)?;

        self.outgoing.remove(position);
        self.slots_remaining += 1;
        tracing::trace!(
            sequence_number = frame.sequence_number(),
            slots_remaining = self.slots_remaining,
            "frame released"
        );
        Ok(())
    }

    /// Release every incoming frame. Outgoing frames are untouched.
    ///
    /// Returns the number of frames dropped, or the first release failure
    /// after all of them are gone.
    pub fn clear(&mut self) -> Result<usize> {
        self.owner()?;
        let drained: Vec<Arc<Frame>> = self.incoming.drain(..).collect();
        let count = drained.len();
        self.slots_remaining += count;
        self.drain(drained)?;
        tracing::debug!(count, "incoming frames cleared");
        Ok(count)
    }

    fn drain(&self, frames: Vec<Arc<Frame>>) -> Result<()> {
        let Some(owner) = &self.owner else {
            return Ok(());
        };
        let mut first_error = None;
        for frame in frames {
            let referenced = referenced_channels(&frame, frame.raw_data_accessed());
            if let Err(e) = owner.release_frame(frame.frame_data(), &referenced) {
                tracing::warn!(
                    sequence_number = frame.sequence_number(),
                    error = %e,
                    "release callback failed during drain"
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Set the sticky user payload for later frames.
    pub fn set_user_data(&self, payload: &[u8]) -> Result<()> {
        self.sticky.set_user_data(payload)
    }

    /// Sticky user payload.
    pub fn user_data(&self) -> Option<Bytes> {
        self.sticky.user_data()
    }

    /// Set the sticky channel mask for later frames.
    pub fn set_channel_mask(&self, mask: &[ChannelId]) {
        self.sticky.set_channel_mask(mask);
    }

    /// Sticky channel mask.
    pub fn channel_mask(&self) -> Vec<ChannelId> {
        self.sticky.channel_mask()
    }

    /// Admit one of every `rate` frames.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `rate` is zero.
    pub fn set_skip_rate(&mut self, rate: u32) -> Result<()> {
        if rate == 0 {
            return Err(SensorwireError::invalid_argument("skip rate must be at least 1"));
        }
        self.skip_rate = rate;
        self.skip_counter = rate - 1;
        tracing::debug!(rate, "skip rate updated");
        Ok(())
    }

    /// Current skip rate.
    #[inline]
    pub fn skip_rate(&self) -> u32 {
        self.skip_rate
    }

    /// Choose the overflow policy.
    pub fn set_format(&mut self, format: BufferingFormat) {
        self.format = format;
    }

    /// Overflow policy.
    #[inline]
    pub fn format(&self) -> BufferingFormat {
        self.format
    }

    /// Slot accounting.
    pub fn status(&self) -> BufferStatus {
        BufferStatus {
            slots_remaining: self.slots_remaining,
            incoming: self.incoming.len(),
            outgoing: self.outgoing.len(),
        }
    }

    /// Slots reserved by `init`.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Sticky settings shared with the owner.
    pub fn sticky(&self) -> &Arc<StickySettings> {
        &self.sticky
    }
}

impl Drop for FrameBufferingEngine {
    fn drop(&mut self) {
        self.force_drop();
    }
}

impl std::fmt::Debug for FrameBufferingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBufferingEngine")
            .field("state", &self.state)
            .field("capacity", &self.capacity)
            .field("status", &self.status())
            .field("format", &self.format)
            .field("skip_rate", &self.skip_rate)
            .finish()
    }
}

fn referenced_channels(frame: &Frame, raw_data_accessed: bool) -> Vec<ChannelId> {
    if raw_data_accessed || frame.is_recorded() {
        frame.list_channels().keys().copied().collect()
    } else {
        Vec::new()
    }
}

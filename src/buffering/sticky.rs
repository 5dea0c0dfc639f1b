//! Settings applied to every frame admitted after they change.
//!
//! User data and the channel mask each sit behind their own lock, separate
//! from the frame queue, so a configuration change never waits on a busy
//! queue and vice versa.

use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::DEFAULT_MAX_USER_DATA_SIZE;
use crate::error::{Result, SensorwireError};
use crate::property::ChannelId;

/// Sticky user data and channel mask of one stream.
#[derive(Debug)]
pub struct StickySettings {
    user_data: Mutex<Option<Bytes>>,
    channel_mask: Mutex<Vec<ChannelId>>,
    max_user_data_size: usize,
}

impl Default for StickySettings {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_USER_DATA_SIZE)
    }
}

impl StickySettings {
    /// Empty settings accepting user data up to `max_user_data_size` bytes.
    pub fn new(max_user_data_size: usize) -> Self {
        Self {
            user_data: Mutex::new(None),
            channel_mask: Mutex::new(Vec::new()),
            max_user_data_size,
        }
    }

    /// Store a private copy of `payload`.
    ///
    /// An identical payload is a no-op; an empty one clears the stored copy.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `payload` is larger than the configured maximum
    /// - `ResourceExhausted` if the copy cannot be allocated; the previous
    ///   payload is cleared in that case
    pub fn set_user_data(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_user_data_size {
            return Err(SensorwireError::invalid_argument(format!(
                "user data of {} bytes exceeds limit of {}",
                payload.len(),
                self.max_user_data_size
            )));
        }

        let mut current = self.user_data.lock();
        if payload.is_empty() {
            *current = None;
            return Ok(());
        }
        if current.as_deref() == Some(payload) {
            return Ok(());
        }

        let mut copy = Vec::new();
        if copy.try_reserve_exact(payload.len()).is_err() {
            *current = None;
            return Err(SensorwireError::exhausted(format!(
                "cannot allocate {} bytes of user data",
                payload.len()
            )));
        }
        copy.extend_from_slice(payload);
        *current = Some(Bytes::from(copy));
        tracing::debug!(size = payload.len(), "user data updated");
        Ok(())
    }

    /// Current sticky payload.
    pub fn user_data(&self) -> Option<Bytes> {
        self.user_data.lock().clone()
    }

    /// Drop the sticky payload.
    pub fn clear_user_data(&self) {
        *self.user_data.lock() = None;
    }

    /// Replace the sticky mask. Duplicate ids are collapsed.
    pub fn set_channel_mask(&self, mask: &[ChannelId]) {
        let mut ids = mask.to_vec();
        ids.sort_unstable();
        ids.dedup();
        tracing::debug!(mask = ?ids, "channel mask updated");
        *self.channel_mask.lock() = ids;
    }

    /// Current sticky mask, sorted.
    pub fn channel_mask(&self) -> Vec<ChannelId> {
        self.channel_mask.lock().clone()
    }

    /// Largest payload accepted by [`set_user_data`](Self::set_user_data).
    #[inline]
    pub fn max_user_data_size(&self) -> usize {
        self.max_user_data_size
    }
}

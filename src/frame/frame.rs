//! Frame: the channels of one arrival event as a consumer sees them.
//!
//! Each channel becomes a [`ChannelView`] when the frame is built, pinning
//! that channel's properties. Dropping the frame drops its views and with
//! them every pin.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use super::channel::ChannelView;
use super::raw::{ChannelRawData, FrameData};
use crate::error::{Result, SensorwireError};
use crate::property::{ChannelId, PropertyVersionStore};

/// Visible channel list, keyed and ordered by channel id.
pub type ChannelList = BTreeMap<ChannelId, Arc<ChannelView>>;

#[derive(Debug, Default)]
struct ChannelTable {
    views: Vec<Arc<ChannelView>>,
    /// Ids added through `set_extension_channels`.
    extension_ids: Vec<ChannelId>,
    /// Cached result of `list_channels`.
    visible: Option<ChannelList>,
}

/// An admitted frame.
#[derive(Debug)]
pub struct Frame {
    data: FrameData,
    sent_time: u64,
    user_data: Option<Bytes>,
    mask: Vec<ChannelId>,
    mask_disabled: AtomicBool,
    recorded: AtomicBool,
    raw_data_accessed: AtomicBool,
    channels: Mutex<ChannelTable>,
}

impl Frame {
    /// Build a frame, creating one pinned view per channel.
    pub fn new(data: FrameData, sent_time: u64, store: &Arc<PropertyVersionStore>) -> Self {
        let views = data
            .channels
            .iter()
            .map(|raw| Arc::new(ChannelView::new(raw.clone(), store.clone())))
            .collect();

        Self {
            data,
            sent_time,
            user_data: None,
            mask: Vec::new(),
            mask_disabled: AtomicBool::new(false),
            recorded: AtomicBool::new(false),
            raw_data_accessed: AtomicBool::new(false),
            channels: Mutex::new(ChannelTable {
                views,
                ..ChannelTable::default()
            }),
        }
    }

    /// Attach a user payload.
    pub fn with_user_data(mut self, user_data: Option<Bytes>) -> Self {
        self.user_data = user_data;
        self
    }

    /// Hide these channel ids from `list_channels` / `get_channel`.
    pub fn with_channel_mask(mut self, mask: Vec<ChannelId>) -> Self {
        self.mask = mask;
        self.channels.get_mut().visible = None;
        self
    }

    /// Sequence number.
    #[inline]
    pub fn sequence_number(&self) -> u64 {
        self.data.sequence_number
    }

    /// Send time in nanoseconds.
    #[inline]
    pub fn sent_time(&self) -> u64 {
        self.sent_time
    }

    /// The arrival data this frame was built from.
    #[inline]
    pub fn frame_data(&self) -> &FrameData {
        &self.data
    }

    /// User payload, if one was attached.
    #[inline]
    pub fn user_data(&self) -> Option<&Bytes> {
        self.user_data.as_ref()
    }

    /// Masked channel ids.
    #[inline]
    pub fn channel_mask(&self) -> &[ChannelId] {
        &self.mask
    }

    fn is_masked(&self, channel_id: ChannelId) -> bool {
        !self.mask_disabled.load(Ordering::Acquire) && self.mask.contains(&channel_id)
    }

    /// Unmasked channels ordered by id.
    pub fn list_channels(&self) -> ChannelList {
        let mut table = self.channels.lock();
        if let Some(visible) = &table.visible {
            return visible.clone();
        }
        let visible: ChannelList = table
            .views
            .iter()
            .filter(|view| !self.is_masked(view.channel_id()))
            .map(|view| (view.channel_id(), view.clone()))
            .collect();
        table.visible = Some(visible.clone());
        visible
    }

    /// Look up an unmasked channel.
    ///
    /// # Errors
    ///
    /// `NotFound` if the id is absent or masked.
    pub fn get_channel(&self, channel_id: ChannelId) -> Result<Arc<ChannelView>> {
        self.list_channels()
            .remove(&channel_id)
            .ok_or_else(|| SensorwireError::not_found(format!("no channel {}", channel_id)))
    }

    /// Ignore the mask (true) or apply it again (false).
    pub fn set_mask_disabled(&self, disabled: bool) {
        let mut table = self.channels.lock();
        if self.mask_disabled.swap(disabled, Ordering::AcqRel) != disabled {
            table.visible = None;
        }
    }

    /// Replace the extension channels.
    ///
    /// Previously added extension channels are dropped first (releasing
    /// their pins). Ids already present on the frame are skipped. `None`
    /// only removes.
    pub fn set_extension_channels(
        &self,
        channels: Option<Vec<ChannelRawData>>,
        store: &Arc<PropertyVersionStore>,
    ) {
        let mut table = self.channels.lock();
        let mut updated = false;

        let previous = std::mem::take(&mut table.extension_ids);
        if !previous.is_empty() {
            table.views.retain(|view| !previous.contains(&view.channel_id()));
            updated = true;
        }

        for raw in channels.into_iter().flatten() {
            let exists = table.views.iter().any(|v| v.channel_id() == raw.channel_id);
            if exists {
                continue;
            }
            table.extension_ids.push(raw.channel_id);
            table
                .views
                .push(Arc::new(ChannelView::new(raw, store.clone())));
            updated = true;
        }

        if updated {
            table.visible = None;
        }
    }

    /// Ids of the current extension channels.
    pub fn extension_channel_ids(&self) -> Vec<ChannelId> {
        self.channels.lock().extension_ids.clone()
    }

    /// Mark the frame as written to a recording.
    pub fn mark_recorded(&self) {
        self.recorded.store(true, Ordering::Release);
    }

    /// Whether the frame was recorded.
    #[inline]
    pub fn is_recorded(&self) -> bool {
        self.recorded.load(Ordering::Acquire)
    }

    pub(crate) fn set_raw_data_accessed(&self, accessed: bool) {
        self.raw_data_accessed.store(accessed, Ordering::Release);
    }

    /// Whether the consumer reported reading raw data on release.
    #[inline]
    pub fn raw_data_accessed(&self) -> bool {
        self.raw_data_accessed.load(Ordering::Acquire)
    }
}

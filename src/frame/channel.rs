//! Channel view: one channel's raw data plus a frozen property snapshot.
//!
//! A view pins the current version of every property of its channel when it
//! is built and keeps exactly that snapshot until it is dropped. Later
//! writes to the store are invisible to it.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use super::raw::{ChannelRawData, RawData};
use crate::codec::MsgPackCodec;
use crate::error::{Result, SensorwireError};
use crate::property::{
    base_key, ChannelId, ConsumerId, PinnedVersions, PropertyPins, PropertyVersionStore, VersionId,
};

/// Read-only view of one channel of a frame.
#[derive(Debug)]
pub struct ChannelView {
    raw: ChannelRawData,
    pins: PropertyPins,
    /// Changed-key lists already computed, per consumer.
    changed: Mutex<HashMap<ConsumerId, Vec<String>>>,
}

impl ChannelView {
    /// Build a view and pin the channel's current property versions.
    pub fn new(raw: ChannelRawData, store: Arc<PropertyVersionStore>) -> Self {
        let pins = PropertyPins::acquire(store, raw.channel_id);
        Self {
            raw,
            pins,
            changed: Mutex::new(HashMap::new()),
        }
    }

    /// Channel id.
    #[inline]
    pub fn channel_id(&self) -> ChannelId {
        self.raw.channel_id
    }

    /// Keys present in the pinned snapshot, sorted.
    pub fn list_available_keys(&self) -> Vec<String> {
        self.pins.versions().keys().cloned().collect()
    }

    /// Keys whose pinned version differs from what `consumer` last saw.
    ///
    /// Computed once per consumer; asking the same view again returns the
    /// same list.
    pub fn list_changed_keys_for(&self, consumer: ConsumerId) -> Vec<String> {
        let mut changed = self.changed.lock();
        changed
            .entry(consumer)
            .or_insert_with(|| {
                self.pins
                    .store()
                    .diff_since_last_seen(consumer, self.raw.channel_id, self.pins.versions())
            })
            .clone()
    }

    /// The pinned snapshot.
    #[inline]
    pub fn pinned_versions(&self) -> &PinnedVersions {
        self.pins.versions()
    }

    /// Pinned version of `key`, if the key existed when the view was built.
    pub fn pinned_version(&self, key: &str) -> Option<VersionId> {
        let key = base_key(key).ok()?;
        self.pins.versions().get(&key).copied()
    }

    /// Read the pinned version of a property.
    ///
    /// `key` may carry append information (`name[ch=1]`).
    ///
    /// # Errors
    ///
    /// `NotFound` if the key was not set when this view was built.
    pub fn read_property(&self, key: &str) -> Result<Bytes> {
        let base = base_key(key)?;
        let version = self.pins.versions().get(&base).copied().ok_or_else(|| {
            SensorwireError::not_found(format!("property not found: key={}", key))
        })?;
        self.pins.store().get(self.raw.channel_id, &base, version)
    }

    /// Read and decode a property written with `set_typed`.
    pub fn read_property_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let payload = self.read_property(key)?;
        MsgPackCodec::decode(&payload)
    }

    /// Raw data accessor.
    pub fn read_raw_data(&self) -> RawData {
        RawData {
            data: self.raw.data(),
            size: self.raw.size,
            data_type: self.raw.data_type.clone(),
            timestamp: self.raw.captured_timestamp,
        }
    }

    /// The underlying memory reference.
    #[inline]
    pub fn raw_data_ref(&self) -> &ChannelRawData {
        &self.raw
    }
}

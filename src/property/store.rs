//! Multi-version, reference-counted property store.
//!
//! Every `(channel, key)` pair keeps a chain of versions. Writing a property
//! never touches older versions: it appends a new one and makes it current.
//! Frames pin the versions that were current when they were admitted, so a
//! consumer reading an old frame sees the properties as they were then.
//!
//! # Retention
//!
//! - The current version is never freed.
//! - A superseded version lives while at least one pin references it and is
//!   freed the moment its count reaches zero.
//!
//! # Locking
//!
//! One store-wide mutex covers all mutation. Pinning a channel snapshots
//! every key's current version and bumps its count under that lock, so a
//! concurrent `set` can never leave a half-pinned snapshot. The store never
//! calls out while holding its lock.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;

use super::key::base_key;
use crate::codec::{MsgPackCodec, RawCodec};
use crate::error::{Result, SensorwireError};

/// Channel identifier within a frame.
pub type ChannelId = u32;

/// Version identifier, unique per `(channel, key)`; first version is 1.
pub type VersionId = u64;

/// Snapshot of pinned versions: property key -> version id.
pub type PinnedVersions = BTreeMap<String, VersionId>;

static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a consumer for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl ConsumerId {
    /// Allocate a process-unique consumer id.
    pub fn next() -> Self {
        Self(NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap an id managed by the host.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw value.
    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer#{}", self.0)
    }
}

/// One stored version.
#[derive(Debug)]
struct PropertyVersion {
    payload: Bytes,
    /// Number of live pins.
    refs: u64,
}

/// Version chain of one `(channel, key)`.
#[derive(Debug)]
struct PropertyVersions {
    current: VersionId,
    versions: BTreeMap<VersionId, PropertyVersion>,
    /// Version each consumer last observed.
    last_seen: HashMap<ConsumerId, VersionId>,
}

#[derive(Debug, Default)]
struct StoreInner {
    channels: HashMap<ChannelId, BTreeMap<String, PropertyVersions>>,
}

impl StoreInner {
    fn versions(&self, channel: ChannelId, key: &str) -> Option<&PropertyVersions> {
        self.channels.get(&channel)?.get(key)
    }

    fn versions_mut(&mut self, channel: ChannelId, key: &str) -> Option<&mut PropertyVersions> {
        self.channels.get_mut(&channel)?.get_mut(key)
    }
}

/// Store of every live property version for every channel.
#[derive(Debug, Default)]
pub struct PropertyVersionStore {
    inner: Mutex<StoreInner>,
}

impl PropertyVersionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store behind an `Arc`, ready to share with frames.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Write a new version of a property and make it current.
    ///
    /// Append information in `key` (`name[ch=1]`) is stripped. The previous
    /// current version stays alive while pinned.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `key` is malformed.
    pub fn set(&self, channel: ChannelId, key: &str, payload: impl Into<Bytes>) -> Result<VersionId> {
        let key = base_key(key)?;
        let payload = RawCodec::encode_bytes(payload.into());

        let mut inner = self.inner.lock();
        let keys = inner.channels.entry(channel).or_default();

        let version_id = match keys.get_mut(&key) {
            Some(chain) => {
                let previous = chain.current;
                chain.current = previous + 1;
                if chain.versions.get(&previous).is_some_and(|v| v.refs == 0) {
                    chain.versions.remove(&previous);
                    tracing::trace!(channel, key = %key, version = previous, "property version freed");
                }
                chain.versions.insert(chain.current, PropertyVersion { payload, refs: 0 });
                chain.current
            }
            None => {
                let mut versions = BTreeMap::new();
                versions.insert(1, PropertyVersion { payload, refs: 0 });
                keys.insert(
                    key.clone(),
                    PropertyVersions {
                        current: 1,
                        versions,
                        last_seen: HashMap::new(),
                    },
                );
                1
            }
        };

        tracing::trace!(channel, key = %key, version = version_id, "property version added");
        Ok(version_id)
    }

    /// Encode `value` with [`MsgPackCodec`] and store it as a new version.
    pub fn set_typed<T: Serialize>(&self, channel: ChannelId, key: &str, value: &T) -> Result<VersionId> {
        let payload = MsgPackCodec::encode(value)?;
        self.set(channel, key, payload)
    }

    /// Read one exact version.
    ///
    /// # Errors
    ///
    /// `NotFound` if the version was never created or has been freed.
    pub fn get(&self, channel: ChannelId, key: &str, version: VersionId) -> Result<Bytes> {
        let key = base_key(key)?;
        let inner = self.inner.lock();
        inner
            .versions(channel, &key)
            .and_then(|chain| chain.versions.get(&version))
            .map(|v| v.payload.clone())
            .ok_or_else(|| {
                SensorwireError::not_found(format!(
                    "unknown property version: ch={}, key={}, id={}",
                    channel, key, version
                ))
            })
    }

    /// Current version id of a key, if the key was ever set.
    pub fn current_version(&self, channel: ChannelId, key: &str) -> Option<VersionId> {
        let key = base_key(key).ok()?;
        self.inner.lock().versions(channel, &key).map(|c| c.current)
    }

    /// Snapshot the current version of every key of `channel` and pin each.
    ///
    /// Returns an empty map when nothing was ever set for the channel.
    pub fn pin_current_versions(&self, channel: ChannelId) -> PinnedVersions {
        let mut inner = self.inner.lock();
        let mut pinned = PinnedVersions::new();
        if let Some(keys) = inner.channels.get_mut(&channel) {
            for (key, chain) in keys.iter_mut() {
                let current = chain.current;
                if let Some(version) = chain.versions.get_mut(&current) {
                    version.refs += 1;
                    tracing::trace!(channel, key = %key, version = current, refs = version.refs, "pin");
                    pinned.insert(key.clone(), current);
                }
            }
        }
        pinned
    }

    /// Release pins taken by [`pin_current_versions`](Self::pin_current_versions).
    ///
    /// A superseded version whose count reaches zero is freed immediately.
    pub fn unpin(&self, channel: ChannelId, pinned: &PinnedVersions) {
        let mut inner = self.inner.lock();
        for (key, &version_id) in pinned {
            let Some(chain) = inner.versions_mut(channel, key) else {
                continue;
            };
            let current = chain.current;
            let Some(version) = chain.versions.get_mut(&version_id) else {
                continue;
            };
            version.refs = version.refs.saturating_sub(1);
            tracing::trace!(channel, key = %key, version = version_id, refs = version.refs, "unpin");
            if version.refs == 0 && version_id != current {
                chain.versions.remove(&version_id);
                tracing::trace!(channel, key = %key, version = version_id, "property version freed");
            }
        }
    }

    /// Keys of `pinned` whose version differs from what `consumer` last saw.
    ///
    /// Advances the consumer's last-seen version for every reported key. A
    /// consumer's first look reports every key.
    pub fn diff_since_last_seen(
        &self,
        consumer: ConsumerId,
        channel: ChannelId,
        pinned: &PinnedVersions,
    ) -> Vec<String> {
        let mut inner = self.inner.lock();
        let mut changed = Vec::new();
        for (key, &version_id) in pinned {
            let Some(chain) = inner.versions_mut(channel, key) else {
                continue;
            };
            let last = chain.last_seen.insert(consumer, version_id);
            if last != Some(version_id) {
                changed.push(key.clone());
            }
        }
        changed
    }

    /// Drop every last-seen entry of `consumer`.
    pub fn forget_consumer(&self, consumer: ConsumerId) {
        let mut inner = self.inner.lock();
        for keys in inner.channels.values_mut() {
            for chain in keys.values_mut() {
                chain.last_seen.remove(&consumer);
            }
        }
        tracing::debug!(%consumer, "consumer forgotten by property store");
    }

    /// Keys known for a channel.
    pub fn keys(&self, channel: ChannelId) -> Vec<String> {
        self.inner
            .lock()
            .channels
            .get(&channel)
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of versions currently alive for a key.
    pub fn live_versions(&self, channel: ChannelId, key: &str) -> usize {
        let Ok(key) = base_key(key) else {
            return 0;
        };
        self.inner
            .lock()
            .versions(channel, &key)
            .map(|c| c.versions.len())
            .unwrap_or(0)
    }

    /// Pin count of one version, if it is alive.
    pub fn pin_count(&self, channel: ChannelId, key: &str, version: VersionId) -> Option<u64> {
        let key = base_key(key).ok()?;
        self.inner
            .lock()
            .versions(channel, &key)?
            .versions
            .get(&version)
            .map(|v| v.refs)
    }

    /// Whether `consumer` has any last-seen entry left.
    pub fn tracks_consumer(&self, consumer: ConsumerId) -> bool {
        self.inner
            .lock()
            .channels
            .values()
            .flat_map(|keys| keys.values())
            .any(|chain| chain.last_seen.contains_key(&consumer))
    }

    /// Drop every channel, key and version.
    pub fn clear(&self) {
        self.inner.lock().channels.clear();
    }
}

/// Pins held for one channel, released on drop.
///
/// This is the only way a [`ChannelView`](crate::frame::ChannelView) holds
/// property versions: it cannot be unpinned early or partially.
pub struct PropertyPins {
    store: Arc<PropertyVersionStore>,
    channel: ChannelId,
    pinned: PinnedVersions,
}

impl PropertyPins {
    /// Pin the current versions of `channel`.
    pub fn acquire(store: Arc<PropertyVersionStore>, channel: ChannelId) -> Self {
        let pinned = store.pin_current_versions(channel);
        Self {
            store,
            channel,
            pinned,
        }
    }

    /// The frozen snapshot.
    #[inline]
    pub fn versions(&self) -> &PinnedVersions {
        &self.pinned
    }

    /// The store the pins live in.
    #[inline]
    pub fn store(&self) -> &Arc<PropertyVersionStore> {
        &self.store
    }
}

impl fmt::Debug for PropertyPins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyPins")
            .field("channel", &self.channel)
            .field("pinned", &self.pinned)
            .finish()
    }
}

impl Drop for PropertyPins {
    fn drop(&mut self) {
        if !self.pinned.is_empty() {
            self.store.unpin(self.channel, &self.pinned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CH: ChannelId = 7;

    #[test]
    fn test_first_set_is_version_one() {
        let store = PropertyVersionStore::new();
        assert_eq!(store.set(CH, "exposure", &b"v1"[..]).unwrap(), 1);
        assert_eq!(store.set(CH, "exposure", &b"v2"[..]).unwrap(), 2);
        assert_eq!(store.set(CH, "gain", &b"g1"[..]).unwrap(), 1);
        assert_eq!(store.current_version(CH, "exposure"), Some(2));
    }

    #[test]
    fn test_set_rejects_malformed_key() {
        let store = PropertyVersionStore::new();
        let result = store.set(CH, "", &b"x"[..]);
        assert!(matches!(result, Err(SensorwireError::InvalidArgument(_))));
        let result = store.set(CH, "[ch=1]", &b"x"[..]);
        assert!(matches!(result, Err(SensorwireError::InvalidArgument(_))));
    }

    #[test]
    fn test_set_shares_payload_buffer() {
        let store = PropertyVersionStore::new();
        let payload = Bytes::from(vec![0xAB; 256]);
        store.set(CH, "lut", payload.clone()).unwrap();

        let stored = store.get(CH, "lut", 1).unwrap();
        assert_eq!(stored.as_ptr(), payload.as_ptr());
        assert_eq!(RawCodec::decode(&stored), &payload[..]);
    }

    #[test]
    fn test_set_strips_append_info() {
        let store = PropertyVersionStore::new();
        store.set(CH, "image_property[ch=7]", &b"img"[..]).unwrap();
        assert_eq!(store.keys(CH), vec!["image_property".to_string()]);
        assert_eq!(&store.get(CH, "image_property", 1).unwrap()[..], b"img");
    }

    #[test]
    fn test_unpinned_superseded_version_freed_on_set() {
        let store = PropertyVersionStore::new();
        store.set(CH, "exposure", &b"v1"[..]).unwrap();
        store.set(CH, "exposure", &b"v2"[..]).unwrap();

        assert_eq!(store.live_versions(CH, "exposure"), 1);
        assert!(matches!(
            store.get(CH, "exposure", 1),
            Err(SensorwireError::NotFound(_))
        ));
        assert_eq!(&store.get(CH, "exposure", 2).unwrap()[..], b"v2");
    }

    #[test]
    fn test_get_unknown_version() {
        let store = PropertyVersionStore::new();
        assert!(matches!(
            store.get(CH, "exposure", 1),
            Err(SensorwireError::NotFound(_))
        ));
        store.set(CH, "exposure", &b"v1"[..]).unwrap();
        assert!(matches!(
            store.get(CH, "exposure", 9),
            Err(SensorwireError::NotFound(_))
        ));
    }

    #[test]
    fn test_pinned_version_survives_newer_writes() {
        let store = PropertyVersionStore::new();
        store.set(CH, "exposure", &b"v1"[..]).unwrap();
        let pinned = store.pin_current_versions(CH);
        assert_eq!(pinned.get("exposure"), Some(&1));

        for i in 0..5 {
            store.set(CH, "exposure", Bytes::from(format!("v{}", i + 2))).unwrap();
        }

        assert_eq!(&store.get(CH, "exposure", 1).unwrap()[..], b"v1");
        assert_eq!(store.live_versions(CH, "exposure"), 2);

        store.unpin(CH, &pinned);
        assert!(matches!(
            store.get(CH, "exposure", 1),
            Err(SensorwireError::NotFound(_))
        ));
        assert_eq!(store.live_versions(CH, "exposure"), 1);
    }

    #[test]
    fn test_current_version_kept_after_unpin() {
        let store = PropertyVersionStore::new();
        store.set(CH, "exposure", &b"v1"[..]).unwrap();
        let pinned = store.pin_current_versions(CH);
        assert_eq!(store.pin_count(CH, "exposure", 1), Some(1));

        store.unpin(CH, &pinned);
        assert_eq!(store.pin_count(CH, "exposure", 1), Some(0));
        assert_eq!(&store.get(CH, "exposure", 1).unwrap()[..], b"v1");
    }

    #[test]
    fn test_pin_counts_accumulate() {
        let store = PropertyVersionStore::new();
        store.set(CH, "exposure", &b"v1"[..]).unwrap();
        let a = store.pin_current_versions(CH);
        let b = store.pin_current_versions(CH);
        store.set(CH, "exposure", &b"v2"[..]).unwrap();

        assert_eq!(store.pin_count(CH, "exposure", 1), Some(2));
        store.unpin(CH, &a);
        assert!(store.get(CH, "exposure", 1).is_ok());
        store.unpin(CH, &b);
        assert!(store.get(CH, "exposure", 1).is_err());
    }

    #[test]
    fn test_pin_unknown_channel_is_empty() {
        let store = PropertyVersionStore::new();
        assert!(store.pin_current_versions(99).is_empty());
    }

    #[test]
    fn test_diff_first_look_reports_all() {
        let store = PropertyVersionStore::new();
        store.set(CH, "exposure", &b"e"[..]).unwrap();
        store.set(CH, "gain", &b"g"[..]).unwrap();
        let pinned = store.pin_current_versions(CH);
        let consumer = ConsumerId::next();

        let changed = store.diff_since_last_seen(consumer, CH, &pinned);
        assert_eq!(changed, vec!["exposure".to_string(), "gain".to_string()]);
    }

    #[test]
    fn test_diff_is_idempotent() {
        let store = PropertyVersionStore::new();
        store.set(CH, "exposure", &b"e"[..]).unwrap();
        let pinned = store.pin_current_versions(CH);
        let consumer = ConsumerId::next();

        assert_eq!(store.diff_since_last_seen(consumer, CH, &pinned).len(), 1);
        assert!(store.diff_since_last_seen(consumer, CH, &pinned).is_empty());
    }

    #[test]
    fn test_diff_reports_only_updated_keys() {
        let store = PropertyVersionStore::new();
        store.set(CH, "exposure", &b"e1"[..]).unwrap();
        store.set(CH, "gain", &b"g1"[..]).unwrap();
        let consumer = ConsumerId::next();

        let first = store.pin_current_versions(CH);
        store.diff_since_last_seen(consumer, CH, &first);

        store.set(CH, "gain", &b"g2"[..]).unwrap();
        let second = store.pin_current_versions(CH);
        assert_eq!(
            store.diff_since_last_seen(consumer, CH, &second),
            vec!["gain".to_string()]
        );
    }

    #[test]
    fn test_diff_is_per_consumer() {
        let store = PropertyVersionStore::new();
        store.set(CH, "exposure", &b"e"[..]).unwrap();
        let pinned = store.pin_current_versions(CH);
        let a = ConsumerId::next();
        let b = ConsumerId::next();

        assert_eq!(store.diff_since_last_seen(a, CH, &pinned).len(), 1);
        assert_eq!(store.diff_since_last_seen(b, CH, &pinned).len(), 1);
        assert!(store.diff_since_last_seen(a, CH, &pinned).is_empty());
    }

    #[test]
    fn test_forget_consumer() {
        let store = PropertyVersionStore::new();
        store.set(CH, "exposure", &b"e"[..]).unwrap();
        store.set(CH + 1, "gain", &b"g"[..]).unwrap();
        let consumer = ConsumerId::next();

        store.diff_since_last_seen(consumer, CH, &store.pin_current_versions(CH));
        store.diff_since_last_seen(consumer, CH + 1, &store.pin_current_versions(CH + 1));
        assert!(store.tracks_consumer(consumer));

        store.forget_consumer(consumer);
        assert!(!store.tracks_consumer(consumer));

        // Forgotten consumers start over.
        let pinned = store.pin_current_versions(CH);
        assert_eq!(store.diff_since_last_seen(consumer, CH, &pinned).len(), 1);
    }

    #[test]
    fn test_pins_guard_releases_on_drop() {
        let store = PropertyVersionStore::shared();
        store.set(CH, "exposure", &b"v1"[..]).unwrap();

        let pins = PropertyPins::acquire(store.clone(), CH);
        store.set(CH, "exposure", &b"v2"[..]).unwrap();
        assert_eq!(pins.versions().get("exposure"), Some(&1));
        assert!(store.get(CH, "exposure", 1).is_ok());

        drop(pins);
        assert!(store.get(CH, "exposure", 1).is_err());
    }

    #[test]
    fn test_set_typed() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Exposure {
            gain: u32,
        }

        let store = PropertyVersionStore::new();
        let version = store.set_typed(CH, "exposure", &Exposure { gain: 4 }).unwrap();
        let payload = store.get(CH, "exposure", version).unwrap();
        let decoded: Exposure = MsgPackCodec::decode(&payload).unwrap();
        assert_eq!(decoded, Exposure { gain: 4 });
    }

    #[test]
    fn test_concurrent_set_and_pin() {
        let store = PropertyVersionStore::shared();
        store.set(CH, "exposure", &b"v0"[..]).unwrap();

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..500u32 {
                    store.set(CH, "exposure", Bytes::from(i.to_le_bytes().to_vec())).unwrap();
                }
            })
        };

        for _ in 0..500 {
            let pins = PropertyPins::acquire(store.clone(), CH);
            let version = pins.versions()["exposure"];
            assert!(store.get(CH, "exposure", version).is_ok());
        }
        writer.join().unwrap();

        // Only the current version is left once every pin is gone.
        assert_eq!(store.live_versions(CH, "exposure"), 1);
    }

    #[test]
    fn test_clear() {
        let store = PropertyVersionStore::new();
        store.set(CH, "exposure", &b"v1"[..]).unwrap();
        store.clear();
        assert!(store.keys(CH).is_empty());
        assert_eq!(store.current_version(CH, "exposure"), None);
    }
}

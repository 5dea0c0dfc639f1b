//! Property module - versioned channel properties.
//!
//! Provides:
//! - [`PropertyVersionStore`] - every live version of every channel property
//! - [`PropertyPins`] - RAII pins a channel view holds on a snapshot
//! - [`PropertyKey`] - key parsing (`name[ch=1]`)
//!
//! # Example
//!
//! ```
//! use sensorwire::property::{PropertyPins, PropertyVersionStore};
//!
//! let store = PropertyVersionStore::shared();
//! store.set(0, "exposure", &b"auto"[..]).unwrap();
//!
//! let pins = PropertyPins::acquire(store.clone(), 0);
//! store.set(0, "exposure", &b"manual"[..]).unwrap();
//!
//! // The pinned snapshot still reads the old value.
//! let version = pins.versions()["exposure"];
//! assert_eq!(&store.get(0, "exposure", version).unwrap()[..], b"auto");
//! ```

mod key;
mod store;

pub use key::{base_key, PropertyKey};
pub use store::{
    ChannelId, ConsumerId, PinnedVersions, PropertyPins, PropertyVersionStore, VersionId,
};

//! Frame module - admitted frames and their channel views.
//!
//! Provides:
//! - [`FrameData`] / [`ChannelRawData`] - arrival data handed in by producers
//! - [`Frame`] - one admitted arrival, with masking and extension channels
//! - [`ChannelView`] - raw data plus a frozen property snapshot
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use sensorwire::frame::{ChannelRawData, Frame, FrameData};
//! use sensorwire::property::PropertyVersionStore;
//!
//! let store = PropertyVersionStore::shared();
//! store.set(0, "exposure", &b"auto"[..]).unwrap();
//!
//! let data = FrameData::new(1)
//!     .with_channel(ChannelRawData::new(0, "image").with_memory(Bytes::from_static(b"px")));
//! let frame = Frame::new(data, 0, &store);
//!
//! store.set(0, "exposure", &b"manual"[..]).unwrap();
//! let channel = frame.get_channel(0).unwrap();
//! assert_eq!(&channel.read_property("exposure").unwrap()[..], b"auto");
//! ```

mod channel;
#[allow(clippy::module_inception)]
mod frame;
mod raw;

pub use channel::ChannelView;
pub use frame::{ChannelList, Frame};
pub use raw::{ChannelRawData, FrameData, RawData};

pub(crate) use raw::now_nanos;

//! Buffering module - frame admission, delivery and release accounting.
//!
//! Provides:
//! - [`FrameBufferingEngine`] - the per-stream queue and slot accounting
//! - [`OwningStream`] - callbacks the engine makes into its stream
//! - [`StickySettings`] - user data and channel mask applied at admission
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use sensorwire::buffering::{FrameBufferingEngine, OwningStream};
//! use sensorwire::frame::FrameData;
//! use sensorwire::property::{ChannelId, PropertyVersionStore};
//!
//! struct Quiet;
//!
//! impl OwningStream for Quiet {
//!     fn frame_arrived(&self) {}
//!     fn release_frame(&self, _: &FrameData, _: &[ChannelId]) -> sensorwire::Result<()> {
//!         Ok(())
//!     }
//!     fn frame_dropped(&self, _: u64) {}
//! }
//!
//! let mut engine = FrameBufferingEngine::new(PropertyVersionStore::shared());
//! engine.init(2, Some(Arc::new(Quiet) as Arc<dyn OwningStream>)).unwrap();
//!
//! engine.admit(FrameData::new(1), None).unwrap();
//! let frame = engine.take().unwrap();
//! engine.release(&frame, false).unwrap();
//! assert_eq!(engine.status().slots_remaining, 2);
//! ```

mod engine;
mod owner;
mod sticky;

pub use engine::{BufferStatus, EngineState, FrameBufferingEngine};
pub use owner::OwningStream;
pub use sticky::StickySettings;

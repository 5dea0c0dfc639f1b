//! # sensorwire
//!
//! Frame buffering and versioned channel properties for sensor streams.
//!
//! Producers deposit frames of per-channel raw data and update per-channel
//! properties at any time. Consumers take frames from a stream, read each
//! channel's properties as they were when the frame arrived, and release
//! the frame so the producer can reclaim its memory.
//!
//! ## Architecture
//!
//! - **Property store** ([`property`]): every live version of every channel
//!   property, reference counted by the frames that pin it
//! - **Frames** ([`frame`]): channel views holding a frozen property snapshot
//! - **Buffering engine** ([`buffering`]): admission, skip rate, FIFO
//!   delivery and slot accounting
//! - **Stream** ([`SensorStream`]): async consumer handle around the engine
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use bytes::Bytes;
//! use sensorwire::frame::{ChannelRawData, FrameData};
//! use sensorwire::SensorStream;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> sensorwire::Result<()> {
//! let stream = SensorStream::builder("camera.0").buffer_num(4).build()?;
//! stream.start()?;
//!
//! stream.set_property(0, "exposure", &b"auto"[..])?;
//! let pixels = Bytes::from_static(b"\x10\x20\x30");
//! stream.send_frame(FrameData::new(1).with_channel(ChannelRawData::new(0, "image").with_memory(pixels)))?;
//! stream.set_property(0, "exposure", &b"manual"[..])?;
//!
//! let frame = stream.get_frame(Some(Duration::from_millis(100))).await?;
//! let channel = frame.get_channel(0)?;
//! assert_eq!(&channel.read_property("exposure")?[..], b"auto");
//!
//! stream.release_frame(&frame)?;
//! stream.close()?;
//! # Ok(())
//! # }
//! ```

pub mod buffering;
pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod property;

mod stream;

pub use buffering::{BufferStatus, FrameBufferingEngine, OwningStream};
pub use config::{BufferingConfig, BufferingFormat, StreamConfig};
pub use error::{ErrorKind, Result, SensorwireError};
pub use frame::{ChannelView, Frame, FrameData};
pub use property::{ConsumerId, PropertyVersionStore};
pub use stream::{DropReleaser, FrameReleaser, SensorStream, StreamBuilder, StreamEvent, StreamState};

//! Sensor stream: the consumer-facing handle around a buffering engine.
//!
//! The [`StreamBuilder`] configures buffering, skip rate and the producer's
//! [`FrameReleaser`], then builds a [`SensorStream`]. The stream:
//! 1. Owns the engine behind one mutex (the frame-queue lock)
//! 2. Shares a [`PropertyVersionStore`] with its producers
//! 3. Turns the engine's arrival signal into an async wait with timeout
//! 4. Publishes dropped frames and state changes as [`StreamEvent`]s
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use sensorwire::frame::FrameData;
//! use sensorwire::SensorStream;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> sensorwire::Result<()> {
//! let stream = SensorStream::builder("camera.0").buffer_num(2).build()?;
//! stream.start()?;
//!
//! stream.send_frame(FrameData::new(1))?;
//! let frame = stream.get_frame(Some(Duration::from_millis(10))).await?;
//! assert_eq!(frame.sequence_number(), 1);
//! stream.release_frame_unused(&frame)?;
//!
//! stream.close()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;

use crate::buffering::{BufferStatus, FrameBufferingEngine, OwningStream, StickySettings};
use crate::config::{BufferingConfig, BufferingFormat, StreamConfig};
use crate::error::{Result, SensorwireError};
use crate::frame::{ChannelView, Frame, FrameData};
use crate::property::{ChannelId, ConsumerId, PropertyVersionStore, VersionId};

/// Producer side of a stream: takes raw data back once consumers are done.
pub trait FrameReleaser: Send + Sync {
    /// Release the raw data of `data` for the `referenced` channel ids.
    fn release_frame(&self, data: &FrameData, referenced: &[ChannelId]) -> Result<()>;
}

impl<F> FrameReleaser for F
where
    F: Fn(&FrameData, &[ChannelId]) -> Result<()> + Send + Sync,
{
    fn release_frame(&self, data: &FrameData, referenced: &[ChannelId]) -> Result<()> {
        self(data, referenced)
    }
}

/// Releaser for raw data backed by `Bytes`: dropping the frame frees it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropReleaser;

impl FrameReleaser for DropReleaser {
    fn release_frame(&self, _data: &FrameData, _referenced: &[ChannelId]) -> Result<()> {
        Ok(())
    }
}

/// Lifecycle of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Built or stopped; frames are not accepted.
    Ready,
    /// Frames flow.
    Running,
    /// Closed for good.
    Closed,
}

/// Notifications published to [`SensorStream::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A frame was skipped, rejected for capacity, or overwritten.
    FrameDropped { sequence_number: u64 },
    /// The stream moved to a new state.
    StateChanged(StreamState),
}

/// State shared between the stream handle and its engine callbacks.
struct StreamShared {
    key: String,
    state: Mutex<StreamState>,
    frame_ready: Notify,
    events: broadcast::Sender<StreamEvent>,
    releaser: Arc<dyn FrameReleaser>,
}

impl StreamShared {
    /// Move to `to` if the current state is one of `from`, returning the
    /// current state otherwise. The event is sent under the state lock so
    /// subscribers see changes in order.
    fn compare_and_set(
        &self,
        from: &[StreamState],
        to: StreamState,
    ) -> std::result::Result<(), StreamState> {
        let mut state = self.state.lock();
        if !from.contains(&*state) {
            return Err(*state);
        }
        *state = to;
        tracing::debug!(stream = %self.key, state = ?to, "stream state changed");
        let _ = self.events.send(StreamEvent::StateChanged(to));
        Ok(())
    }
}

impl OwningStream for StreamShared {
    fn frame_arrived(&self) {
        self.frame_ready.notify_waiters();
    }

    fn release_frame(&self, data: &FrameData, referenced: &[ChannelId]) -> Result<()> {
        self.releaser.release_frame(data, referenced)
    }

    fn frame_dropped(&self, sequence_number: u64) {
        let _ = self.events.send(StreamEvent::FrameDropped { sequence_number });
    }
}

/// Builder for configuring and creating a [`SensorStream`].
pub struct StreamBuilder {
    key: String,
    config: StreamConfig,
    releaser: Arc<dyn FrameReleaser>,
    store: Option<Arc<PropertyVersionStore>>,
}

impl StreamBuilder {
    /// Create a builder for the stream named `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            config: StreamConfig::default(),
            releaser: Arc::new(DropReleaser),
            store: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the buffering configuration.
    pub fn buffering(mut self, buffering: BufferingConfig) -> Self {
        self.config.buffering = buffering;
        self
    }

    /// Set the number of frame slots.
    ///
    /// Default: 4
    pub fn buffer_num(mut self, num: usize) -> Self {
        self.config.buffering.num = num;
        self
    }

    /// Set the overflow policy.
    ///
    /// Default: discard the newest frame
    pub fn buffer_format(mut self, format: BufferingFormat) -> Self {
        self.config.buffering.format = format;
        self
    }

    /// Admit one of every `rate` frames.
    ///
    /// Default: 1
    pub fn skip_rate(mut self, rate: u32) -> Self {
        self.config.skip_rate = rate;
        self
    }

    /// Set the producer's releaser.
    pub fn releaser(mut self, releaser: impl FrameReleaser + 'static) -> Self {
        self.releaser = Arc::new(releaser);
        self
    }

    /// Share an existing property store instead of creating one.
    pub fn property_store(mut self, store: Arc<PropertyVersionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Validate the configuration and build the stream in the `Ready` state.
    pub fn build(self) -> Result<SensorStream> {
        self.config.validate()?;

        let store = self.store.unwrap_or_else(PropertyVersionStore::shared);
        let sticky = Arc::new(StickySettings::new(self.config.max_user_data_size));
        let (events, _) = broadcast::channel(self.config.event_capacity);
        let shared = Arc::new(StreamShared {
            key: self.key,
            state: Mutex::new(StreamState::Ready),
            frame_ready: Notify::new(),
            events,
            releaser: self.releaser,
        });

        let mut engine = FrameBufferingEngine::with_sticky(store.clone(), sticky.clone());
        engine.set_format(self.config.buffering.format);
        engine.set_skip_rate(self.config.skip_rate)?;
        engine.init(
            self.config.buffering.capacity(),
            Some(shared.clone() as Arc<dyn OwningStream>),
        )?;

        let consumer = ConsumerId::next();
        tracing::debug!(stream = %shared.key, %consumer, config = ?self.config, "stream built");

        Ok(SensorStream {
            engine: Mutex::new(engine),
            sticky,
            store,
            consumer,
            config: self.config,
            shared,
        })
    }
}

/// A stream of frames from one sensor.
pub struct SensorStream {
    engine: Mutex<FrameBufferingEngine>,
    sticky: Arc<StickySettings>,
    store: Arc<PropertyVersionStore>,
    consumer: ConsumerId,
    config: StreamConfig,
    shared: Arc<StreamShared>,
}

impl SensorStream {
    /// Create a new stream builder.
    pub fn builder(key: impl Into<String>) -> StreamBuilder {
        StreamBuilder::new(key)
    }

    /// Stream name.
    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        *self.shared.state.lock()
    }

    /// This stream's identity in the property store.
    #[inline]
    pub fn consumer_id(&self) -> ConsumerId {
        self.consumer
    }

    /// Configuration the stream was built with.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Start accepting frames.
    ///
    /// # Errors
    ///
    /// `InvalidOperation` unless the stream is `Ready`.
    pub fn start(&self) -> Result<()> {
        self.transition(StreamState::Ready, StreamState::Running)
    }

    /// Stop accepting frames and wake every waiting consumer.
    ///
    /// Queued and taken frames are kept.
    pub fn stop(&self) -> Result<()> {
        self.transition(StreamState::Running, StreamState::Ready)?;
        self.shared.frame_ready.notify_waiters();
        Ok(())
    }

    fn transition(&self, from: StreamState, to: StreamState) -> Result<()> {
        self.shared.compare_and_set(&[from], to).map_err(|current| {
            SensorwireError::invalid_operation(format!(
                "stream {} is {:?}, expected {:?}",
                self.shared.key, current, from
            ))
        })
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            StreamState::Running => Ok(()),
            state => Err(SensorwireError::invalid_operation(format!(
                "stream {} is {:?}",
                self.shared.key, state
            ))),
        }
    }

    /// Deposit one frame, sent now.
    pub fn send_frame(&self, data: FrameData) -> Result<()> {
        self.send_frame_at(data, None)
    }

    /// Deposit one frame with an explicit send time in nanoseconds.
    pub fn send_frame_at(&self, data: FrameData, sent_time: Option<u64>) -> Result<()> {
        self.ensure_running()?;
        self.engine.lock().admit(data, sent_time)
    }

    /// Deposit several frames.
    ///
    /// Frames dropped by the skip rate or for capacity do not stop the
    /// batch; their sequence numbers are returned.
    pub fn send_frames(&self, frames: Vec<FrameData>) -> Result<Vec<u64>> {
        self.ensure_running()?;
        let mut dropped = Vec::new();
        let mut engine = self.engine.lock();
        for data in frames {
            let sequence_number = data.sequence_number;
            match engine.admit(data, None) {
                Ok(()) => {}
                Err(e) if e.is_expected_drop() => dropped.push(sequence_number),
                Err(e) => return Err(e),
            }
        }
        Ok(dropped)
    }

    /// Take the oldest queued frame, waiting for one if needed.
    ///
    /// - `Some(Duration::ZERO)` polls once
    /// - `Some(t)` waits up to `t`
    /// - `None` waits until a frame arrives or the stream stops
    ///
    /// # Errors
    ///
    /// - `Timeout` when the wait elapses
    /// - `InvalidOperation` when the stream is not running, including when
    ///   it stops or closes during the wait
    pub async fn get_frame(&self, timeout: Option<Duration>) -> Result<Arc<Frame>> {
        // A deadline past the clock's range waits forever.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

        loop {
            let mut notified = std::pin::pin!(self.shared.frame_ready.notified());
            notified.as_mut().enable();

            self.ensure_running()?;
            let taken = self.engine.lock().take();
            match taken {
                Ok(frame) => return Ok(frame),
                Err(SensorwireError::ResourceExhausted(_)) => {}
                Err(e) => return Err(e),
            }

            match deadline {
                _ if timeout == Some(Duration::ZERO) => return Err(SensorwireError::Timeout),
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(SensorwireError::Timeout);
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Return a frame whose raw data was read.
    pub fn release_frame(&self, frame: &Arc<Frame>) -> Result<()> {
        self.engine.lock().release(frame, true)
    }

    /// Return a frame without having read its raw data.
    pub fn release_frame_unused(&self, frame: &Arc<Frame>) -> Result<()> {
        self.engine.lock().release(frame, false)
    }

    /// Drop every queued frame. Taken frames are untouched.
    pub fn clear_frames(&self) -> Result<usize> {
        self.engine.lock().clear()
    }

    /// Slot accounting.
    pub fn buffer_status(&self) -> BufferStatus {
        self.engine.lock().status()
    }

    /// Set the sticky user data for later frames.
    pub fn set_user_data(&self, payload: &[u8]) -> Result<()> {
        self.sticky.set_user_data(payload)
    }

    /// Sticky user data.
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
    pub fn set_skip_rate(&self, rate: u32) -> Result<()> {
        self.engine.lock().set_skip_rate(rate)
    }

    /// Current skip rate.
    pub fn skip_rate(&self) -> u32 {
        self.engine.lock().skip_rate()
    }

    /// Subscribe to dropped-frame and state-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.events.subscribe()
    }

    /// The property store frames pin from.
    pub fn property_store(&self) -> &Arc<PropertyVersionStore> {
        &self.store
    }

    /// Write a channel property.
    pub fn set_property(&self, channel: ChannelId, key: &str, payload: impl Into<Bytes>) -> Result<VersionId> {
        self.store.set(channel, key, payload)
    }

    /// Write a typed channel property.
    pub fn set_property_typed<T: Serialize>(&self, channel: ChannelId, key: &str, value: &T) -> Result<VersionId> {
        self.store.set_typed(channel, key, value)
    }

    /// Keys of `channel` that changed since this stream last looked.
    pub fn updated_property_keys(&self, channel: &ChannelView) -> Vec<String> {
        channel.list_changed_keys_for(self.consumer)
    }

    /// Release every frame through the releaser and close the stream.
    ///
    /// Waiting consumers are woken. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let open = [StreamState::Ready, StreamState::Running];
        if self.shared.compare_and_set(&open, StreamState::Closed).is_err() {
            return Ok(());
        }
        self.shared.frame_ready.notify_waiters();

        let result = self.engine.lock().exit();
        self.store.forget_consumer(self.consumer);
        result
    }
}

impl Drop for SensorStream {
    fn drop(&mut self) {
        if self.state() == StreamState::Closed {
            return;
        }
        tracing::debug!(stream = %self.shared.key, "stream dropped without close");
        self.engine.get_mut().force_drop();
        self.store.forget_consumer(self.consumer);
    }
}

impl std::fmt::Debug for SensorStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorStream")
            .field("key", &self.shared.key)
            .field("state", &self.state())
            .field("consumer", &self.consumer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ChannelRawData;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn data(seq: u64) -> FrameData {
        FrameData::new(seq)
            .with_channel(ChannelRawData::new(0, "image").with_memory(Bytes::from_static(b"px")))
    }

    fn running(num: usize) -> SensorStream {
        let stream = SensorStream::builder("test").buffer_num(num).build().unwrap();
        stream.start().unwrap();
        stream
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = SensorStream::builder("bad").buffer_num(0).build();
        assert!(matches!(result, Err(SensorwireError::InvalidArgument(_))));

        let result = SensorStream::builder("bad").skip_rate(0).build();
        assert!(matches!(result, Err(SensorwireError::InvalidArgument(_))));
    }

    #[test]
    fn test_state_transitions() {
        let stream = SensorStream::builder("cam").build().unwrap();
        assert_eq!(stream.state(), StreamState::Ready);
        assert!(stream.stop().is_err());

        stream.start().unwrap();
        assert!(stream.start().is_err());
        stream.stop().unwrap();
        assert_eq!(stream.state(), StreamState::Ready);

        stream.close().unwrap();
        assert!(matches!(
            stream.start(),
            Err(SensorwireError::InvalidOperation(_))
        ));
        stream.close().unwrap();
    }

    #[test]
    fn test_closed_is_terminal() {
        let stream = running(1);
        let mut events = stream.subscribe();
        stream.close().unwrap();

        assert!(matches!(stream.stop(), Err(SensorwireError::InvalidOperation(_))));
        assert!(matches!(stream.start(), Err(SensorwireError::InvalidOperation(_))));
        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(
            events.try_recv().unwrap(),
            StreamEvent::StateChanged(StreamState::Closed)
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_concurrent_stop_and_close_end_closed() {
        for _ in 0..50 {
            let stream = Arc::new(running(1));
            let stopper = {
                let stream = stream.clone();
                std::thread::spawn(move || {
                    let _ = stream.stop();
                })
            };
            stream.close().unwrap();
            stopper.join().unwrap();

            assert_eq!(stream.state(), StreamState::Closed);
            assert!(stream.start().is_err());
        }
    }

    #[test]
    fn test_send_requires_running() {
        let stream = SensorStream::builder("cam").build().unwrap();
        assert!(matches!(
            stream.send_frame(data(1)),
            Err(SensorwireError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_send_frames_reports_drops() {
        let stream = running(2);
        let dropped = stream.send_frames((1..=4).map(data).collect()).unwrap();
        assert_eq!(dropped, vec![3, 4]);
        assert_eq!(stream.buffer_status().incoming, 2);
    }

    #[tokio::test]
    async fn test_poll_empty_times_out() {
        let stream = running(2);
        let result = stream.get_frame(Some(Duration::ZERO)).await;
        assert!(matches!(result, Err(SensorwireError::Timeout)));
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let stream = running(2);
        let result = stream.get_frame(Some(Duration::from_millis(20))).await;
        assert!(matches!(result, Err(SensorwireError::Timeout)));
    }

    #[tokio::test]
    async fn test_waiter_woken_by_arrival() {
        let stream = Arc::new(running(2));
        let waiter = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.get_frame(None).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        stream.send_frame(data(7)).unwrap();

        let frame = waiter.await.unwrap().unwrap();
        assert_eq!(frame.sequence_number(), 7);
        stream.release_frame(&frame).unwrap();
    }

    #[tokio::test]
    async fn test_stop_cancels_waiter() {
        let stream = Arc::new(running(2));
        let waiter = {
            let stream = stream.clone();
            tokio::spawn(async move { stream.get_frame(None).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        stream.stop().unwrap();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(SensorwireError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_events_published() {
        let stream = running(1);
        let mut events = stream.subscribe();

        stream.send_frame(data(1)).unwrap();
        assert!(stream.send_frame(data(2)).is_err());
        stream.stop().unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            StreamEvent::FrameDropped { sequence_number: 2 }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StreamEvent::StateChanged(StreamState::Ready)
        );
    }

    #[tokio::test]
    async fn test_close_releases_through_releaser() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let stream = SensorStream::builder("cam")
            .buffer_num(3)
            .releaser(move |_data: &FrameData, _ids: &[ChannelId]| -> Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build()
            .unwrap();
        stream.start().unwrap();

        stream.send_frame(data(1)).unwrap();
        stream.send_frame(data(2)).unwrap();
        let _held = stream.get_frame(Some(Duration::ZERO)).await.unwrap();

        stream.close().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 2);
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[test]
    fn test_drop_skips_releaser_and_forgets_consumer() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let store = PropertyVersionStore::shared();
        store.set(0, "exposure", &b"e"[..]).unwrap();

        let stream = SensorStream::builder("cam")
            .property_store(store.clone())
            .releaser(move |_data: &FrameData, _ids: &[ChannelId]| -> Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build()
            .unwrap();
        stream.start().unwrap();
        stream.send_frame(data(1)).unwrap();

        let consumer = stream.consumer_id();
        {
            let mut engine = stream.engine.lock();
            let frame = engine.take().unwrap();
            let channel = frame.get_channel(0).unwrap();
            assert_eq!(stream.updated_property_keys(&channel), vec!["exposure".to_string()]);
        }
        assert!(store.tracks_consumer(consumer));

        drop(stream);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert!(!store.tracks_consumer(consumer));
    }

    #[test]
    fn test_sticky_passthrough() {
        let stream = running(2);
        stream.set_user_data(b"calib").unwrap();
        stream.set_channel_mask(&[2, 1]);
        stream.set_skip_rate(3).unwrap();

        assert_eq!(&stream.user_data().unwrap()[..], b"calib");
        assert_eq!(stream.channel_mask(), vec![1, 2]);
        assert_eq!(stream.skip_rate(), 3);
    }

    #[tokio::test]
    async fn test_updated_property_keys_across_frames() {
        let stream = running(4);
        stream.set_property(0, "exposure", &b"e1"[..]).unwrap();
        stream.set_property(0, "gain", &b"g1"[..]).unwrap();
        stream.send_frame(data(1)).unwrap();
        stream.set_property(0, "gain", &b"g2"[..]).unwrap();
        stream.send_frame(data(2)).unwrap();

        let first = stream.get_frame(Some(Duration::ZERO)).await.unwrap();
        let second = stream.get_frame(Some(Duration::ZERO)).await.unwrap();

        let changed = stream.updated_property_keys(&first.get_channel(0).unwrap());
        assert_eq!(changed, vec!["exposure".to_string(), "gain".to_string()]);
        let changed = stream.updated_property_keys(&second.get_channel(0).unwrap());
        assert_eq!(changed, vec!["gain".to_string()]);

        stream.release_frame(&first).unwrap();
        stream.release_frame(&second).unwrap();
    }
}

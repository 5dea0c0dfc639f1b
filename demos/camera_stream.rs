//! Simulated camera feeding a stream while a consumer reads it.
//!
//! Run with `RUST_LOG=sensorwire=debug cargo run --example camera_stream`
//! to see drops and state changes.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sensorwire::frame::{ChannelRawData, FrameData};
use sensorwire::property::ChannelId;
use sensorwire::{BufferingConfig, SensorStream, SensorwireError, StreamEvent};
use tracing_subscriber::EnvFilter;

const FRAMES: u64 = 60;
const IMAGE_CHANNEL: ChannelId = 0;
const IMU_CHANNEL: ChannelId = 1;

#[derive(Debug, Serialize, Deserialize)]
struct ExposureProperty {
    mode: String,
    gain: f32,
}

fn capture(seq: u64) -> FrameData {
    let pixels = Bytes::from(vec![(seq % 256) as u8; 320 * 240 * 3]);
    let imu = Bytes::from(seq.to_le_bytes().to_vec());
    FrameData::new(seq)
        .with_channel(
            ChannelRawData::new(IMAGE_CHANNEL, "image_rgb24")
                .with_memory(pixels)
                .with_timestamp(seq * 33_000_000),
        )
        .with_channel(ChannelRawData::new(IMU_CHANNEL, "imu").with_memory(imu))
}

#[tokio::main]
async fn main() -> sensorwire::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .try_init()
        .ok();

    let buffering = BufferingConfig::from_json(r#"{"num": 4, "format": "ring"}"#)?;
    let stream = Arc::new(
        SensorStream::builder("camera.0")
            .buffering(buffering)
            .skip_rate(2)
            .build()?,
    );
    stream.set_channel_mask(&[IMU_CHANNEL]);
    stream.start()?;

    let mut events = stream.subscribe();
    let drops = tokio::spawn(async move {
        let mut dropped = 0usize;
        while let Ok(event) = events.recv().await {
            match event {
                StreamEvent::FrameDropped { .. } => dropped += 1,
                StreamEvent::StateChanged(state) => tracing::info!(?state, "stream state"),
            }
        }
        dropped
    });

    let producer = {
        let stream = stream.clone();
        tokio::spawn(async move {
            for seq in 1..=FRAMES {
                if seq % 20 == 1 {
                    let exposure = ExposureProperty {
                        mode: "auto".to_string(),
                        gain: 1.0 + (seq / 20) as f32,
                    };
                    stream.set_property_typed(IMAGE_CHANNEL, "exposure_property", &exposure)?;
                }
                if let Err(e) = stream.send_frame(capture(seq)) {
                    if !e.is_expected_drop() {
                        return Err(e);
                    }
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            Ok::<_, SensorwireError>(())
        })
    };

    let mut received = 0usize;
    loop {
        let frame = match stream.get_frame(Some(Duration::from_millis(100))).await {
            Ok(frame) => frame,
            Err(SensorwireError::Timeout) => break,
            Err(e) => return Err(e),
        };
        let channel = frame.get_channel(IMAGE_CHANNEL)?;
        let changed = stream.updated_property_keys(&channel);
        if !changed.is_empty() {
            let exposure: ExposureProperty = channel.read_property_as("exposure_property")?;
            tracing::info!(seq = frame.sequence_number(), ?exposure, "exposure changed");
        }
        received += 1;
        tokio::time::sleep(Duration::from_millis(5)).await;
        stream.release_frame(&frame)?;
    }

    if let Ok(result) = producer.await {
        result?;
    }
    stream.stop()?;
    stream.close()?;
    drop(stream);

    let dropped = drops.await.unwrap_or_default();
    tracing::info!(received, dropped, "done");
    Ok(())
}

//! Desktop audio output via cpal (behind the `desktop` feature)
//!
//! Opens the default output device and drives the shared context from the
//! device callback. The context is created at the device's sample rate so
//! no resampling is needed.

use crate::context::GraphHandle;
use crate::error::{GraphError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{info, warn};

/// A running output stream bound to a graph
pub struct OutputStream {
    _stream: cpal::Stream,
    handle: GraphHandle,
}

impl OutputStream {
    /// Open the default output device and create a graph at its rate
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| GraphError::Stream("no output device".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| GraphError::Stream(e.to_string()))?;

        if config.channels() != 2 {
            return Err(GraphError::Stream(format!(
                "expected stereo output, device has {} channels",
                config.channels()
            )));
        }
        if config.sample_format() != cpal::SampleFormat::F32 {
            return Err(GraphError::Stream(format!(
                "unsupported sample format {:?}",
                config.sample_format()
            )));
        }

        let sample_rate = config.sample_rate().0;
        let handle = GraphHandle::new(sample_rate);
        info!(sample_rate, "opening output stream");

        let render_handle = handle.clone();
        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _info| {
                    render_handle.render(data);
                },
                move |err| {
                    warn!("output stream error: {err}");
                },
                None,
            )
            .map_err(|e| GraphError::Stream(e.to_string()))?;
        stream
            .play()
            .map_err(|e| GraphError::Stream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            handle,
        })
    }

    /// The graph this stream renders
    pub fn graph(&self) -> &GraphHandle {
        &self.handle
    }
}

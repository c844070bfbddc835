//! Segue Graph
//!
//! A minimal, schedulable audio graph in the Web Audio shape: gain nodes
//! with sample-accurate parameter automation, biquad filters, a convolver,
//! and buffer sources, rendered in fixed 128-frame quanta pulled from a
//! destination node.
//!
//! The AutoMix engine programs against this surface; any host runtime with
//! equivalent facilities can replace it. An offline renderer is built in
//! (drive `GraphHandle::render` yourself); a cpal-backed output stream is
//! available behind the `desktop` feature.
//!
//! # Example
//!
//! ```rust
//! use segue_graph::{AudioBuffer, GraphHandle, Sound};
//!
//! let graph = GraphHandle::new(44100);
//! let buffer = AudioBuffer::from_mono(&vec![0.0; 44100], 44100);
//! let mut sound = Sound::new(&graph, buffer, 1.0).unwrap();
//! sound.play();
//!
//! let mut out = vec![0.0f32; 1024];
//! graph.render(&mut out);
//! ```

mod buffer;
mod context;
mod convolver;
mod error;
mod node;
#[cfg(feature = "desktop")]
mod output;
mod param;
mod sound;

pub use buffer::AudioBuffer;
pub use context::{AudioContext, GraphHandle, NodeId};
pub use error::{GraphError, Result};
pub use node::{BiquadKind, BiquadNode, BufferSourceNode, GainNode, NodeKind, RENDER_QUANTUM};
#[cfg(feature = "desktop")]
pub use output::OutputStream;
pub use param::AudioParam;
pub use sound::{Sound, SoundEvent};

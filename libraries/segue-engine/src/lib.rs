//! Segue Engine
//!
//! The AutoMix transition engine: analyzes how the current track ends,
//! pre-buffers the next one, and schedules a sample-accurate, beat-aware,
//! possibly multi-effect crossfade on the shared audio graph.
//!
//! # Architecture
//!
//! - `AutoMixEngine` (the state machine) is the single orchestrator:
//!   idle -> analyzing -> waiting -> crossfading -> finishing
//! - `CrossfadeScheduler` owns the sample-accurate gain automation
//! - `SpectralEq` morphs the two tracks' spectra across the overlap
//! - `TransitionEffects` adds reverb tail / noise riser / filter sweep
//! - `CompatibilityScorer` turns two analyses into a transition strategy
//! - `PreBufferManager` fetches and prepares the next track in background
//!
//! The host drives everything through `monitor_playback` (a per-frame,
//! never-blocking poll) and the lifecycle hooks; see the `host` module for
//! the contracts the engine consumes.
//!
//! # Example
//!
//! ```rust,no_run
//! use segue_core::AutoMixSettings;
//! use segue_engine::{AutoMixEngine, MediaFetcher, PlaylistStore, UrlResolver};
//! use segue_graph::GraphHandle;
//! use std::sync::Arc;
//!
//! # struct MyStore;
//! # impl PlaylistStore for MyStore {
//! #     fn playlist(&self) -> Vec<segue_engine::PlaylistEntry> { vec![] }
//! #     fn current_index(&self) -> usize { 0 }
//! #     fn set_current_index(&mut self, _: usize) {}
//! #     fn play_mode(&self) -> segue_engine::PlayMode { segue_engine::PlayMode::Sequential }
//! #     fn set_auto_mix_state(&mut self, _: segue_core::AutoMixSnapshot) {}
//! # }
//! # struct MyResolver;
//! # impl UrlResolver for MyResolver {
//! #     fn resolve(&self, _: &str) -> Option<segue_engine::ResolvedUrl> { None }
//! # }
//! # struct MyFetcher;
//! # impl MediaFetcher for MyFetcher {
//! #     fn fetch(&self, _: &str) -> Result<Vec<u8>, String> { Err("offline".into()) }
//! # }
//! let graph = GraphHandle::new(44100);
//! let mut engine = AutoMixEngine::new(
//!     &graph,
//!     Box::new(MyStore),
//!     Arc::new(MyResolver),
//!     None,
//!     Arc::new(MyFetcher),
//!     AutoMixSettings::default(),
//! );
//!
//! // From the host's render loop:
//! engine.monitor_playback();
//! ```

pub mod curves;
pub mod effects;
pub mod host;
pub mod prebuffer;
pub mod scheduler;
pub mod scorer;
pub mod sound_manager;
pub mod spectral_eq;
pub mod state_machine;
pub mod vocal;

pub use effects::{EffectsSpec, TransitionEffects};
pub use host::{
    pick_next_index, MediaFetcher, PlayMode, PlaylistEntry, PlaylistStore, ResolvedUrl,
    UrlResolver,
};
pub use prebuffer::{PreBufferManager, PreparedNext};
pub use scheduler::CrossfadeScheduler;
pub use scorer::{compute_compatibility, compute_transition_strategy};
pub use sound_manager::{ManagedSound, SoundManager};
pub use spectral_eq::SpectralEq;
pub use state_machine::AutoMixEngine;
pub use vocal::{is_vocal_active, should_defer_for_vocals};

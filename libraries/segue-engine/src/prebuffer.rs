//! Next-track pre-buffering
//!
//! While the state machine sits in WAITING, a worker thread resolves the
//! next song's URL (preferring the secondary resolver for trial URLs),
//! downloads it, decodes it, and optionally analyzes it. The main thread
//! polls for the result and builds the silent, graph-ready sound there, so
//! the audio graph is only ever touched from one thread.

use crate::host::{MediaFetcher, UrlResolver};
use segue_analysis::{analyze_pcm, decode_blob, AnalyzeOptions};
use segue_core::TrackAnalysis;
use segue_graph::{AudioBuffer, GraphHandle, Sound};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Hard deadline for resolve + download + decode + analysis
const PREBUFFER_TIMEOUT: Duration = Duration::from_secs(30);

struct FetchedTrack {
    samples: Vec<f32>,
    sample_rate: u32,
    analysis: Option<TrackAnalysis>,
}

/// A graph-ready next track
pub struct PreparedNext {
    pub index: usize,
    pub song_id: String,
    pub name: String,
    pub sound: Sound,
    pub analysis: Option<Arc<TrackAnalysis>>,
}

enum State {
    Idle,
    Buffering {
        index: usize,
        song_id: String,
        name: String,
        started: Instant,
        rx: Receiver<Result<FetchedTrack, String>>,
    },
    Ready(PreparedNext),
}

/// One pre-buffer slot
pub struct PreBufferManager {
    state: State,
}

impl PreBufferManager {
    pub fn new() -> Self {
        Self { state: State::Idle }
    }

    pub fn is_buffering(&self) -> bool {
        matches!(self.state, State::Buffering { .. })
    }

    pub fn has_buffer(&self) -> bool {
        matches!(self.state, State::Ready(_))
    }

    /// Index of the prepared or in-flight track
    pub fn pending_index(&self) -> Option<usize> {
        match &self.state {
            State::Idle => None,
            State::Buffering { index, .. } => Some(*index),
            State::Ready(prepared) => Some(prepared.index),
        }
    }

    /// Kick off the background fetch. Idempotent: a second call while
    /// buffering or ready is ignored.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &mut self,
        index: usize,
        song_id: &str,
        name: &str,
        resolver: Arc<dyn UrlResolver>,
        recovery: Option<Arc<dyn UrlResolver>>,
        fetcher: Arc<dyn MediaFetcher>,
        analyze: bool,
        opts: AnalyzeOptions,
    ) {
        if !matches!(self.state, State::Idle) {
            return;
        }

        let (tx, rx) = std::sync::mpsc::channel();
        let id = song_id.to_string();
        let spawned = std::thread::Builder::new()
            .name("segue-prebuffer".into())
            .spawn(move || {
                let result = fetch_track(&id, resolver, recovery, fetcher, analyze, opts);
                let _ = tx.send(result);
            })
            .is_ok();
        if !spawned {
            return;
        }

        tracing::debug!(song_id, index, "pre-buffering next track");
        self.state = State::Buffering {
            index,
            song_id: song_id.to_string(),
            name: name.to_string(),
            started: Instant::now(),
            rx,
        };
    }

    /// Poll the in-flight fetch; on success, build the silent graph-ready
    /// sound on this (main) thread
    pub fn poll(&mut self, graph: &GraphHandle) {
        let State::Buffering { started, rx, .. } = &self.state else {
            return;
        };

        if started.elapsed() > PREBUFFER_TIMEOUT {
            tracing::warn!("pre-buffer timed out");
            self.state = State::Idle;
            return;
        }

        let outcome = match rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return,
            Err(TryRecvError::Disconnected) => {
                self.state = State::Idle;
                return;
            }
        };

        let State::Buffering {
            index,
            song_id,
            name,
            ..
        } = std::mem::replace(&mut self.state, State::Idle)
        else {
            return;
        };

        match outcome {
            Ok(fetched) => {
                let buffer = AudioBuffer::from_stereo(fetched.samples, fetched.sample_rate);
                match Sound::new(graph, buffer, 0.0) {
                    Ok(sound) => {
                        tracing::debug!(song_id = %song_id, "next track prepared");
                        self.state = State::Ready(PreparedNext {
                            index,
                            song_id,
                            name,
                            sound,
                            analysis: fetched.analysis.map(Arc::new),
                        });
                    }
                    Err(e) => tracing::warn!("pre-buffer graph setup failed: {e}"),
                }
            }
            Err(e) => tracing::warn!(song_id = %song_id, "pre-buffer failed: {e}"),
        }
    }

    /// Atomically hand off the prepared track, or drop it on index mismatch
    pub fn consume(&mut self, expected_index: usize) -> Option<PreparedNext> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Ready(prepared) if prepared.index == expected_index => Some(prepared),
            State::Ready(stale) => {
                tracing::debug!(
                    prepared = stale.index,
                    expected = expected_index,
                    "dropping stale pre-buffer"
                );
                stale.sound.unload();
                None
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Drop whatever is prepared or in flight
    pub fn clear(&mut self) {
        if let State::Ready(prepared) = std::mem::replace(&mut self.state, State::Idle) {
            prepared.sound.unload();
        }
    }
}

impl Default for PreBufferManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker-thread side: resolve, download, decode, analyze
fn fetch_track(
    song_id: &str,
    resolver: Arc<dyn UrlResolver>,
    recovery: Option<Arc<dyn UrlResolver>>,
    fetcher: Arc<dyn MediaFetcher>,
    analyze: bool,
    opts: AnalyzeOptions,
) -> Result<FetchedTrack, String> {
    let mut resolved = resolver
        .resolve(song_id)
        .ok_or_else(|| format!("no URL for {song_id}"))?;

    // Trial URLs are short previews; prefer the recovery resolver's answer
    if resolved.trial {
        if let Some(recovery) = recovery {
            if let Some(better) = recovery.resolve(song_id) {
                resolved = better;
            }
        }
    }

    let bytes = fetcher.fetch(&resolved.url)?;
    let decoded = decode_blob(&bytes).map_err(|e| e.to_string())?;
    let analysis = if analyze {
        Some(analyze_pcm(&decoded.samples, decoded.sample_rate, opts))
    } else {
        None
    };

    Ok(FetchedTrack {
        samples: decoded.samples,
        sample_rate: decoded.sample_rate,
        analysis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::ResolvedUrl;
    use std::time::Duration;

    struct FixedResolver {
        url: &'static str,
        trial: bool,
    }
    impl UrlResolver for FixedResolver {
        fn resolve(&self, _song_id: &str) -> Option<ResolvedUrl> {
            Some(ResolvedUrl {
                url: self.url.to_string(),
                trial: self.trial,
            })
        }
    }

    struct WavFetcher;
    impl MediaFetcher for WavFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, String> {
            if url == "bad" {
                return Err("404".into());
            }
            // Tiny valid WAV: 1 s of 16-bit mono
            let spec = hound::WavSpec {
                channels: 1,
                sample_rate: 8000,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let mut cursor = std::io::Cursor::new(Vec::new());
            {
                let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
                for i in 0..8000 {
                    let s = (2.0 * std::f32::consts::PI * 220.0 * i as f32 / 8000.0).sin();
                    writer.write_sample((s * 12000.0) as i16).unwrap();
                }
                writer.finalize().unwrap();
            }
            Ok(cursor.into_inner())
        }
    }

    fn wait_ready(prebuffer: &mut PreBufferManager, graph: &GraphHandle) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !prebuffer.has_buffer() {
            prebuffer.poll(graph);
            assert!(Instant::now() < deadline, "prebuffer never became ready");
            if prebuffer.is_buffering() {
                std::thread::sleep(Duration::from_millis(5));
            } else if !prebuffer.has_buffer() {
                panic!("prebuffer gave up");
            }
        }
    }

    #[test]
    fn prepares_a_silent_ready_sound() {
        let graph = GraphHandle::new(8000);
        let mut prebuffer = PreBufferManager::new();
        prebuffer.start(
            3,
            "song-3",
            "Next Song",
            Arc::new(FixedResolver {
                url: "ok",
                trial: false,
            }),
            None,
            Arc::new(WavFetcher),
            true,
            AnalyzeOptions { analyze_bpm: false },
        );
        assert!(prebuffer.is_buffering());
        wait_ready(&mut prebuffer, &graph);

        let prepared = prebuffer.consume(3).expect("index matches");
        assert_eq!(prepared.song_id, "song-3");
        assert!(prepared.analysis.is_some());
        assert!((prepared.sound.duration() - 1.0).abs() < 0.01);
        // Prepared silent: volume 0
        assert_eq!(prepared.sound.volume(), 0.0);
        prepared.sound.unload();
    }

    #[test]
    fn consume_with_wrong_index_drops_the_buffer() {
        let graph = GraphHandle::new(8000);
        let mut prebuffer = PreBufferManager::new();
        prebuffer.start(
            1,
            "song-1",
            "One",
            Arc::new(FixedResolver {
                url: "ok",
                trial: false,
            }),
            None,
            Arc::new(WavFetcher),
            false,
            AnalyzeOptions::default(),
        );
        wait_ready(&mut prebuffer, &graph);

        assert!(prebuffer.consume(2).is_none());
        assert!(!prebuffer.has_buffer());
    }

    #[test]
    fn failed_fetch_falls_back_to_idle() {
        let graph = GraphHandle::new(8000);
        let mut prebuffer = PreBufferManager::new();
        prebuffer.start(
            0,
            "song-0",
            "Zero",
            Arc::new(FixedResolver {
                url: "bad",
                trial: false,
            }),
            None,
            Arc::new(WavFetcher),
            false,
            AnalyzeOptions::default(),
        );
        let deadline = Instant::now() + Duration::from_secs(10);
        while prebuffer.is_buffering() {
            prebuffer.poll(&graph);
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!prebuffer.has_buffer());
    }

    #[test]
    fn trial_urls_route_through_the_recovery_resolver() {
        struct CountingRecovery;
        impl UrlResolver for CountingRecovery {
            fn resolve(&self, _song_id: &str) -> Option<ResolvedUrl> {
                Some(ResolvedUrl {
                    url: "ok".into(),
                    trial: false,
                })
            }
        }

        let graph = GraphHandle::new(8000);
        let mut prebuffer = PreBufferManager::new();
        prebuffer.start(
            0,
            "song-0",
            "Zero",
            Arc::new(FixedResolver {
                // Primary hands back a trial URL that would 404
                url: "bad",
                trial: true,
            }),
            Some(Arc::new(CountingRecovery)),
            Arc::new(WavFetcher),
            false,
            AnalyzeOptions::default(),
        );
        wait_ready(&mut prebuffer, &graph);
        assert!(prebuffer.consume(0).is_some());
    }
}

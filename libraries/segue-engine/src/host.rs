//! Host-runtime contracts
//!
//! The engine never talks to the network or the UI itself: URL resolution,
//! byte downloads, and playlist/store access all come in through these
//! traits. Resolver and fetcher implementations are called from worker
//! threads and must be `Send + Sync`; the store is main-thread only.

use rand::Rng;
use segue_core::AutoMixSnapshot;

/// A resolved download URL
#[derive(Debug, Clone)]
pub struct ResolvedUrl {
    pub url: String,
    /// The resolver recognized a trial/preview variant; the engine will
    /// prefer the secondary resolver when one is configured
    pub trial: bool,
}

/// Resolves a song id to a downloadable URL
pub trait UrlResolver: Send + Sync {
    fn resolve(&self, song_id: &str) -> Option<ResolvedUrl>;
}

/// Downloads a URL into memory (called from worker threads only)
pub trait MediaFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, String>;
}

/// One playlist entry as the engine needs to see it
#[derive(Debug, Clone)]
pub struct PlaylistEntry {
    pub song_id: String,
    pub name: String,
}

/// How the next track is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayMode {
    Sequential,
    Random,
}

/// The host's music store, as consumed by the engine
pub trait PlaylistStore {
    fn playlist(&self) -> Vec<PlaylistEntry>;
    fn current_index(&self) -> usize;
    /// Called when the engine adopts the incoming track
    fn set_current_index(&mut self, index: usize);
    fn play_mode(&self) -> PlayMode;
    /// Observable engine state, written whenever it changes
    fn set_auto_mix_state(&mut self, snapshot: AutoMixSnapshot);
}

/// Pick the next playlist index, or None when there is no distinct next
pub fn pick_next_index(len: usize, current: usize, mode: PlayMode) -> Option<usize> {
    if len < 2 {
        return None;
    }
    match mode {
        PlayMode::Sequential => Some((current + 1) % len),
        PlayMode::Random => {
            let mut rng = rand::thread_rng();
            // Skip over the current slot so we always move somewhere
            let offset = rng.gen_range(1..len);
            Some((current + offset) % len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_wraps_around() {
        assert_eq!(pick_next_index(3, 2, PlayMode::Sequential), Some(0));
        assert_eq!(pick_next_index(3, 0, PlayMode::Sequential), Some(1));
    }

    #[test]
    fn single_track_playlist_has_no_next() {
        assert_eq!(pick_next_index(1, 0, PlayMode::Sequential), None);
        assert_eq!(pick_next_index(0, 0, PlayMode::Random), None);
    }

    #[test]
    fn random_never_repeats_current() {
        for _ in 0..50 {
            let next = pick_next_index(5, 2, PlayMode::Random).unwrap();
            assert_ne!(next, 2);
            assert!(next < 5);
        }
    }
}

//! Analysis cache
//!
//! Insertion-ordered with FIFO eviction: lookups never reorder entries, so
//! the ten most recently *inserted* analyses always survive.

use segue_core::TrackAnalysis;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Default cache capacity
pub const CACHE_CAPACITY: usize = 10;

/// FIFO analysis cache keyed by song id
pub struct AnalysisCache {
    capacity: usize,
    map: HashMap<String, Arc<TrackAnalysis>>,
    order: VecDeque<String>,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::with_capacity(CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Insert (or refresh) an analysis; evicts the oldest insertion beyond
    /// capacity
    pub fn insert(&mut self, song_id: &str, analysis: Arc<TrackAnalysis>) {
        if self.map.insert(song_id.to_string(), analysis).is_some() {
            // Re-insertion counts as a new insertion for eviction order
            self.order.retain(|id| id != song_id);
        }
        self.order.push_back(song_id.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
                tracing::debug!(song_id = %evicted, "evicted analysis from cache");
            }
        }
    }

    /// Look up without touching insertion order
    pub fn get(&self, song_id: &str) -> Option<Arc<TrackAnalysis>> {
        self.map.get(song_id).cloned()
    }

    pub fn contains(&self, song_id: &str) -> bool {
        self.map.contains_key(song_id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for AnalysisCache {
    fn default() -> Self {
        Self::new()
    }
}

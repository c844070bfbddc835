//! Sound slot management
//!
//! At most two sounds exist at once: `current` and, during a transition,
//! `outgoing`. Exactly one caller (the state machine) mutates the slots;
//! both slots are only populated while a transition is in flight.

use segue_graph::Sound;

/// A sound plus the song id it plays
#[derive(Debug)]
pub struct ManagedSound {
    pub sound: Sound,
    pub song_id: String,
}

/// Owner of the current/outgoing sound slots
#[derive(Debug, Default)]
pub struct SoundManager {
    current: Option<ManagedSound>,
    outgoing: Option<ManagedSound>,
}

impl SoundManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current sound (the old one is unloaded)
    pub fn set_current_sound(&mut self, sound: Sound, song_id: &str) {
        if let Some(old) = self.current.take() {
            old.sound.unload();
        }
        self.current = Some(ManagedSound {
            sound,
            song_id: song_id.to_string(),
        });
    }

    /// Move current to outgoing and install the incoming sound as current
    pub fn begin_transition(&mut self, incoming: Sound, song_id: &str) {
        if let Some(stale) = self.outgoing.take() {
            stale.sound.unload();
        }
        self.outgoing = self.current.take();
        self.current = Some(ManagedSound {
            sound: incoming,
            song_id: song_id.to_string(),
        });
    }

    /// Abort a transition: the incoming sound is stopped and unloaded, the
    /// outgoing sound becomes current again
    pub fn revert_transition(&mut self) {
        if let Some(mut incoming) = self.current.take() {
            incoming.sound.stop();
            incoming.sound.unload();
        }
        self.current = self.outgoing.take();
    }

    /// Release the outgoing slot
    pub fn unload_outgoing(&mut self) {
        if let Some(outgoing) = self.outgoing.take() {
            outgoing.sound.unload();
        }
    }

    /// Release both slots
    pub fn unload_all(&mut self) {
        self.unload_outgoing();
        if let Some(current) = self.current.take() {
            current.sound.unload();
        }
    }

    pub fn current(&self) -> Option<&ManagedSound> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut ManagedSound> {
        self.current.as_mut()
    }

    pub fn outgoing(&self) -> Option<&ManagedSound> {
        self.outgoing.as_ref()
    }

    pub fn outgoing_mut(&mut self) -> Option<&mut ManagedSound> {
        self.outgoing.as_mut()
    }

    /// Number of occupied slots
    pub fn slot_count(&self) -> usize {
        usize::from(self.current.is_some()) + usize::from(self.outgoing.is_some())
    }

    /// Whether a transition is in flight (both slots populated)
    pub fn in_transition(&self) -> bool {
        self.current.is_some() && self.outgoing.is_some()
    }
}

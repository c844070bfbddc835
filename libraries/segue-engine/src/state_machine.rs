//! Transition state machine
//!
//! idle -> analyzing -> waiting -> crossfading -> finishing, driven by the
//! host's per-frame `monitor_playback` poll. The poll never blocks:
//! analysis and pre-buffering run on worker threads and their results are
//! picked up on later ticks, each pickup re-checking that the machine is
//! still in the state that asked for the work.

use crate::curves::crossfade_gains;
use crate::effects::{EffectsSpec, TransitionEffects};
use crate::host::{pick_next_index, MediaFetcher, PlaylistStore, UrlResolver};
use crate::prebuffer::{PreBufferManager, PreparedNext};
use crate::scheduler::CrossfadeScheduler;
use crate::scorer::{compute_compatibility, compute_transition_strategy};
use crate::sound_manager::SoundManager;
use crate::vocal::{defer_budget, should_defer_for_vocals};
use segue_analysis::{analyze_quick, find_nearest_beat, AnalysisCache, AnalysisWorker, AnalyzeOptions};
use segue_core::{
    AutoMixSettings, AutoMixSnapshot, CompatibilityScore, CrossfadeParams, FadeCurveKind,
    MixPhase, OutroType, SpectralCrossfadeData, TrackAnalysis, TransitionStrategy,
};
use segue_graph::{GraphHandle, Sound};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How far ahead of the crossfade window analysis starts
const TRIGGER_LEAD_SECS: f64 = 13.0;

/// Worker analysis deadline
const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry-loop protection after a failed crossfade
const FAILURE_COOLDOWN: Duration = Duration::from_secs(60);

/// Play-confirmation retry and hard deadline
const PLAY_CONFIRM_RETRY: Duration = Duration::from_secs(2);
const PLAY_CONFIRM_TIMEOUT: Duration = Duration::from_secs(3);

/// Hold in finishing before returning to idle (outlives host-side
/// song-change debounces)
const FINISHING_HOLD: f64 = 0.8;

/// Delay before the outgoing sound is unloaded, letting the renderer apply
/// the final zero gain first
const OUTGOING_UNLOAD_DELAY: f64 = 0.05;

struct PendingAnalysis {
    request_id: u64,
    song_id: String,
    submitted: Instant,
}

/// Parameters fixed when analysis lands (start time is needed to watch the
/// clock; duration is finalized at crossfade time)
struct CrossfadePlan {
    start_time: f64,
    base_duration: f64,
    outro_type: Option<OutroType>,
    outro_confidence: f32,
}

/// Per-crossfade bookkeeping
struct CrossfadeRun {
    next_index: usize,
    incoming_song_id: String,
    incoming_song_name: String,
    params: Option<CrossfadeParams>,
    strategy: TransitionStrategy,
    /// Slow path: the incoming fetch is still in flight
    awaiting_incoming: bool,
    play_deadline: Option<Instant>,
    play_retry_done: bool,
    host_adopted: bool,
    outgoing_ended_early: bool,
    software_fade_until: Option<f64>,
    software_fade_remaining: Option<f64>,
    effects: Option<TransitionEffects>,
    unload_outgoing_at: Option<f64>,
}

/// The AutoMix engine
pub struct AutoMixEngine {
    graph: GraphHandle,
    settings: AutoMixSettings,
    store: Box<dyn PlaylistStore>,
    resolver: Arc<dyn UrlResolver>,
    recovery_resolver: Option<Arc<dyn UrlResolver>>,
    fetcher: Arc<dyn MediaFetcher>,

    sounds: SoundManager,
    scheduler: CrossfadeScheduler,
    prebuffer: PreBufferManager,
    worker: AnalysisWorker,
    cache: AnalysisCache,

    phase: MixPhase,
    current_analysis: Option<Arc<TrackAnalysis>>,
    next_analysis: Option<Arc<TrackAnalysis>>,
    pending_analysis: Option<PendingAnalysis>,
    plan: Option<CrossfadePlan>,
    run: Option<CrossfadeRun>,
    finishing_until: Option<f64>,
    last_failure: Option<Instant>,
    paused_by_user: bool,
    user_volume: f32,
    active_gain_adjustment: f32,
    last_snapshot: AutoMixSnapshot,
}

impl AutoMixEngine {
    pub fn new(
        graph: &GraphHandle,
        store: Box<dyn PlaylistStore>,
        resolver: Arc<dyn UrlResolver>,
        recovery_resolver: Option<Arc<dyn UrlResolver>>,
        fetcher: Arc<dyn MediaFetcher>,
        settings: AutoMixSettings,
    ) -> Self {
        Self {
            graph: graph.clone(),
            settings,
            store,
            resolver,
            recovery_resolver,
            fetcher,
            sounds: SoundManager::new(),
            scheduler: CrossfadeScheduler::new(graph),
            prebuffer: PreBufferManager::new(),
            worker: AnalysisWorker::new(),
            cache: AnalysisCache::new(),
            phase: MixPhase::Idle,
            current_analysis: None,
            next_analysis: None,
            pending_analysis: None,
            plan: None,
            run: None,
            finishing_until: None,
            last_failure: None,
            paused_by_user: false,
            user_volume: 1.0,
            active_gain_adjustment: 1.0,
            last_snapshot: AutoMixSnapshot::default(),
        }
    }

    // ===== Observable state =====

    pub fn get_state(&self) -> MixPhase {
        self.phase
    }

    /// True through finishing, so debounced host watchers see one event
    pub fn is_crossfading(&self) -> bool {
        matches!(self.phase, MixPhase::Crossfading | MixPhase::Finishing)
    }

    pub fn get_crossfade_progress(&self) -> f64 {
        let p = self.scheduler.get_progress();
        if p >= 0.0 {
            return p;
        }
        // Software-fade fallback progress
        if let (Some(run), Some(params)) = (
            self.run.as_ref(),
            self.run.as_ref().and_then(|r| r.params.as_ref()),
        ) {
            if let Some(until) = run.software_fade_until {
                let now = self.graph.current_time();
                return (1.0 - (until - now) / params.duration).clamp(0.0, 1.0);
            }
        }
        -1.0
    }

    pub fn get_active_gain_adjustment(&self) -> f32 {
        self.active_gain_adjustment
    }

    pub fn settings(&self) -> &AutoMixSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: AutoMixSettings) {
        self.settings = settings;
    }

    /// The host's playback volume; applied immediately outside a crossfade
    pub fn set_user_volume(&mut self, volume: f32) {
        self.user_volume = volume;
        if !self.is_crossfading() {
            let target = volume * self.active_gain_adjustment;
            if let Some(current) = self.sounds.current_mut() {
                current.sound.set_volume(target);
            }
        }
    }

    /// The current sound, e.g. for host-side position display
    pub fn current_sound(&self) -> Option<&Sound> {
        self.sounds.current().map(|m| &m.sound)
    }

    /// The outgoing sound while a transition is in flight
    pub fn outgoing_sound(&self) -> Option<&Sound> {
        self.sounds.outgoing().map(|m| &m.sound)
    }

    pub fn current_song_id(&self) -> Option<&str> {
        self.sounds.current().map(|m| m.song_id.as_str())
    }

    // ===== Lifecycle hooks =====

    /// Host started a new track through its normal path
    pub fn on_track_started(&mut self, sound: Sound, song_id: &str) {
        if self.is_crossfading() {
            // The engine already owns the handover; a host-created sound
            // arriving now is stale
            tracing::warn!(song_id, "track started during crossfade; dropping");
            sound.unload();
            return;
        }

        self.phase = MixPhase::Idle;
        self.plan = None;
        self.run = None;
        self.prebuffer.clear();
        self.scheduler.cancel();
        self.active_gain_adjustment = 1.0;
        self.next_analysis = None;

        let mut sound = sound;
        sound.set_volume(self.user_volume);
        self.sounds.set_current_sound(sound, song_id);
        self.current_analysis = self.cache.get(song_id);

        // Pre-analyze so outro data is ready before the next transition
        if self.current_analysis.is_none() {
            self.submit_current_analysis(song_id);
        }
        tracing::info!(song_id, "track started");
    }

    fn submit_current_analysis(&mut self, song_id: &str) {
        if self
            .pending_analysis
            .as_ref()
            .is_some_and(|p| p.song_id == song_id)
        {
            return;
        }
        let Some(buffer) = self.sounds.current().and_then(|m| m.sound.buffer()) else {
            return;
        };
        if !self.worker.is_available() {
            return;
        }
        let opts = AnalyzeOptions {
            analyze_bpm: self.settings.bpm_match,
        };
        let request_id = self.worker.submit_pcm(
            song_id,
            buffer.samples_arc(),
            buffer.sample_rate(),
            opts,
        );
        self.pending_analysis = Some(PendingAnalysis {
            request_id,
            song_id: song_id.to_string(),
            submitted: Instant::now(),
        });
    }

    /// Release every resource
    pub fn destroy(&mut self) {
        self.cancel_crossfade();
        self.prebuffer.clear();
        self.sounds.unload_all();
        self.plan = None;
        self.run = None;
        self.current_analysis = None;
        self.next_analysis = None;
    }

    // ===== Per-frame poll =====

    /// Single synchronous entry point; never blocks
    pub fn monitor_playback(&mut self) {
        if !self.settings.enabled {
            return;
        }
        self.poll_worker();
        match self.phase {
            MixPhase::Idle => self.tick_idle(),
            MixPhase::Analyzing => self.tick_analyzing(),
            MixPhase::Waiting => self.tick_waiting(),
            MixPhase::Crossfading => self.tick_crossfading(),
            MixPhase::Finishing => self.tick_finishing(),
        }
        self.publish_snapshot();
    }

    /// Drain finished analyses; stale results just feed the cache
    fn poll_worker(&mut self) {
        while let Some(outcome) = self.worker.poll() {
            let matches_pending = self
                .pending_analysis
                .as_ref()
                .is_some_and(|p| p.request_id == outcome.id);
            if matches_pending {
                self.pending_analysis = None;
            }

            match outcome.result {
                Ok(analysis) => {
                    let analysis = Arc::new(analysis);
                    self.cache.insert(&outcome.song_id, Arc::clone(&analysis));
                    let is_current = self
                        .sounds
                        .current()
                        .is_some_and(|m| m.song_id == outcome.song_id);
                    if is_current {
                        self.current_analysis = Some(analysis);
                    }
                    if matches_pending && self.phase == MixPhase::Analyzing {
                        self.make_plan();
                        self.phase = MixPhase::Waiting;
                    }
                }
                Err(e) => {
                    tracing::warn!(song_id = %outcome.song_id, "analysis failed: {e}");
                    if matches_pending && self.phase == MixPhase::Analyzing {
                        // Fall back to time-based parameters
                        self.make_plan();
                        self.phase = MixPhase::Waiting;
                    }
                }
            }
        }
    }

    fn tick_idle(&mut self) {
        let Some(current) = self.sounds.current() else {
            return;
        };
        let t = current.sound.position();
        let duration = current.sound.duration();
        let song_id = current.song_id.clone();
        if duration <= 0.0 {
            return;
        }

        if let Some(last) = self.last_failure {
            if last.elapsed() < FAILURE_COOLDOWN {
                return;
            }
        }

        let playlist_len = self.store.playlist().len();
        if pick_next_index(playlist_len, self.store.current_index(), self.store.play_mode())
            .is_none()
        {
            return;
        }

        let eff = self.settings.effective_crossfade_duration(duration);
        let window_start = duration - eff - TRIGGER_LEAD_SECS;
        if t >= window_start && t < duration - 1.0 {
            tracing::debug!(t, duration, "entering analyzing");
            self.phase = MixPhase::Analyzing;
            self.start_analysis(&song_id);
        }
    }

    fn start_analysis(&mut self, song_id: &str) {
        if let Some(analysis) = self.cache.get(song_id) {
            self.current_analysis = Some(analysis);
            self.make_plan();
            self.phase = MixPhase::Waiting;
            return;
        }
        if self.pending_analysis.as_ref().is_some_and(|p| p.song_id == song_id) {
            // Pre-analysis from on_track_started is still running; wait on it
            return;
        }
        if self.worker.is_available() {
            self.submit_current_analysis(song_id);
            if self.pending_analysis.is_some() {
                return;
            }
        }
        // Main-thread fallback: volume/energy/intro only
        if let Some(buffer) = self.sounds.current().and_then(|m| m.sound.buffer()) {
            let analysis = Arc::new(analyze_quick(buffer.samples(), buffer.sample_rate()));
            self.cache.insert(song_id, Arc::clone(&analysis));
            self.current_analysis = Some(analysis);
        }
        self.make_plan();
        self.phase = MixPhase::Waiting;
    }

    fn tick_analyzing(&mut self) {
        let timed_out = self
            .pending_analysis
            .as_ref()
            .is_some_and(|p| p.submitted.elapsed() > ANALYSIS_TIMEOUT);
        if timed_out {
            tracing::warn!("analysis timed out; using time-based parameters");
            self.make_plan();
            self.phase = MixPhase::Waiting;
        } else if self.pending_analysis.is_none() && self.phase == MixPhase::Analyzing {
            // Nothing in flight and no result routed us forward (e.g. the
            // worker died): fall through rather than stall
            self.make_plan();
            self.phase = MixPhase::Waiting;
        }
    }

    // ===== Parameter selection =====

    /// Tiers 1-3 of crossfade parameter selection, plus beat alignment and
    /// the start-time clamp. Duration is still the pre-strategy base.
    fn make_plan(&mut self) {
        let Some(current) = self.sounds.current() else {
            return;
        };
        let sound_duration = current.sound.duration();
        let eff = self.settings.effective_crossfade_duration(sound_duration);
        let analysis = self.current_analysis.clone();

        let (mut start, base_duration, outro_type, confidence) = match analysis.as_deref() {
            Some(a) => {
                let effective_end = a.effective_end().min(sound_duration);
                match &a.outro {
                    Some(outro) => {
                        // Tier 1: full outro classification
                        let strong = outro.outro_confidence >= 0.75;
                        let mut start = if strong {
                            outro.suggested_crossfade_start
                        } else {
                            effective_end - eff
                        };
                        let duration = match outro.outro_type {
                            OutroType::Hard => {
                                let dur = eff.clamp(2.0, 3.0);
                                if !strong {
                                    start = effective_end - dur;
                                }
                                dur
                            }
                            OutroType::FadeOut | OutroType::LoopFade => {
                                (0.8 * (a.duration - start)).min(eff)
                            }
                            OutroType::ReverbTail => outro.musical_end_offset.min(eff),
                            OutroType::SlowDown => (0.7 * (effective_end - start)).min(eff),
                            OutroType::Sustained => (outro.musical_end_offset + 2.0).min(eff),
                            OutroType::MusicalOutro => (0.6 * (effective_end - start)).min(eff),
                            OutroType::Silence | OutroType::NoiseEnd => eff,
                        };
                        (
                            start,
                            duration,
                            Some(outro.outro_type),
                            outro.outro_confidence,
                        )
                    }
                    None => {
                        // Tier 2: energy profile only
                        let outro_type = if a.energy.is_fade_out {
                            OutroType::FadeOut
                        } else {
                            OutroType::Hard
                        };
                        let inset = if a.energy.is_fade_out { 0.5 } else { 1.0 };
                        let start = a.duration - a.energy.outro_start_offset * inset;
                        (start, eff, Some(outro_type), 0.0)
                    }
                }
            }
            // Tier 3: no analysis at all
            None => (sound_duration - eff, eff, None, 0.0),
        };

        // Beat alignment, except where the ending itself defines the moment
        let skip_align = matches!(
            outro_type,
            Some(
                OutroType::FadeOut
                    | OutroType::ReverbTail
                    | OutroType::Sustained
                    | OutroType::LoopFade
            )
        );
        if self.settings.beat_align && !skip_align {
            if let Some(bpm) = analysis.as_deref().and_then(|a| a.bpm.as_ref()) {
                start = find_nearest_beat(&bpm.beat_grid, start, bpm.analysis_offset);
            }
        }

        let effective_end = analysis
            .as_deref()
            .map_or(sound_duration, |a| a.effective_end().min(sound_duration));
        start = start.clamp(0.0, (effective_end - 2.0).max(0.0));

        tracing::info!(
            start,
            base_duration,
            outro = outro_type.map(|o| o.to_string()),
            confidence,
            "crossfade planned"
        );
        self.plan = Some(CrossfadePlan {
            start_time: start,
            base_duration,
            outro_type,
            outro_confidence: confidence,
        });
    }

    /// Strategy, duration shaping, curve profile, normalization, spectral
    /// data. Runs at crossfade time, when the next track is known.
    fn finalize_params(
        &self,
        now_t: f64,
        next_analysis: Option<&TrackAnalysis>,
    ) -> (CrossfadeParams, TransitionStrategy) {
        let plan = self.plan.as_ref();
        let current = self.current_analysis.as_deref();
        let outro_type = plan.and_then(|p| p.outro_type);
        let confidence = plan.map_or(0.0, |p| p.outro_confidence);
        let base_duration = plan.map_or_else(
            || {
                let dur = self
                    .sounds
                    .current()
                    .map_or(8.0, |m| m.sound.duration());
                self.settings.effective_crossfade_duration(dur)
            },
            |p| p.base_duration,
        );

        let score = match (current, next_analysis) {
            (Some(a), Some(b)) => compute_compatibility(a, b),
            _ => CompatibilityScore::neutral(),
        };
        let strategy = compute_transition_strategy(&score, outro_type);

        let mut duration = base_duration * strategy.duration_multiplier;

        // Energy contrast across the join widens the overlap
        if let (Some(out_mb), Some(in_mb)) = (
            current.and_then(|a| a.outro.as_ref()).map(|o| &o.multiband),
            next_analysis
                .and_then(|a| a.intro.as_ref())
                .and_then(|i| i.multiband.as_ref()),
        ) {
            let out_sum: f32 = out_mb.tail_averages(8).iter().sum();
            let in_sum: f32 = in_mb.head_averages(8).iter().sum();
            if out_sum > 1e-6 && in_sum > 1e-6 {
                let contrast = f64::from(out_sum / in_sum);
                let factor = if contrast > 6.0 {
                    1.3
                } else if contrast > 3.0 {
                    1.2
                } else if contrast < 1.0 / 3.0 {
                    1.15
                } else {
                    1.0
                };
                duration = (duration * factor).min(self.settings.crossfade_duration);
            }
        }

        // Safety clamp to the content actually remaining right now
        let effective_end = current.map_or_else(
            || self.sounds.current().map_or(now_t, |m| m.sound.duration()),
            |a| a.effective_end(),
        );
        duration = duration.min((effective_end - now_t).max(0.5));

        // Curve and shapes
        let mut curve = self.settings.transition_style;
        let mut in_shape = 1.0f32;
        let mut out_shape = 1.0f32;
        let mut fade_in_only =
            matches!(outro_type, Some(OutroType::FadeOut | OutroType::LoopFade));

        let strong_outro = outro_type.is_some() && confidence >= 0.75;
        if self.settings.smart_curve && strong_outro {
            if let Some(outro_type) = outro_type {
                let profile = outro_profile(outro_type);
                curve = profile.0;
                fade_in_only = profile.1;
                in_shape = profile.2;
                out_shape = profile.3;
            }
        }
        if !strong_outro {
            if let Some(recommended) = strategy.recommended_curve {
                curve = recommended;
            }
        }
        if let Some(so) = strategy.shape_override {
            if strong_outro && self.settings.smart_curve {
                in_shape = (in_shape + so.in_shape) / 2.0;
                out_shape = (out_shape + so.out_shape) / 2.0;
            } else {
                in_shape = so.in_shape;
                out_shape = so.out_shape;
            }
        }
        in_shape = in_shape.clamp(0.7, 1.3);
        out_shape = out_shape.clamp(0.7, 1.3);

        let incoming_gain_adjustment = if self.settings.volume_norm {
            next_analysis.map_or(1.0, |n| n.volume.gain_adjustment.clamp(0.5, 2.0))
        } else {
            1.0
        };

        let spectral_crossfade = if self.settings.smart_curve
            && !fade_in_only
            && !strategy.use_filter_sweep
        {
            compute_spectral_data(current, next_analysis)
        } else {
            None
        };

        let params = CrossfadeParams {
            duration,
            curve,
            incoming_gain: self.user_volume,
            outgoing_gain: self
                .sounds
                .current()
                .map_or(1.0, |m| m.sound.current_gain()),
            fade_in_only,
            outro_type,
            in_shape,
            out_shape,
            incoming_gain_adjustment,
            spectral_crossfade,
        };
        (params, strategy)
    }

    // ===== Waiting =====

    fn tick_waiting(&mut self) {
        self.ensure_prebuffer();
        self.prebuffer.poll(&self.graph);

        let Some(current) = self.sounds.current() else {
            self.cancel_crossfade();
            return;
        };
        let t = current.sound.position();
        let Some(plan) = self.plan.as_ref() else {
            self.cancel_crossfade();
            return;
        };
        let start = plan.start_time;

        if t >= start && !self.should_defer_crossfade(t) {
            self.do_crossfade();
        }
    }

    /// Fire-and-forget the next-track fetch (idempotent)
    fn ensure_prebuffer(&mut self) {
        if self.prebuffer.is_buffering() || self.prebuffer.has_buffer() {
            return;
        }
        let playlist = self.store.playlist();
        let Some(next_index) =
            pick_next_index(playlist.len(), self.store.current_index(), self.store.play_mode())
        else {
            return;
        };
        let Some(entry) = playlist.get(next_index) else {
            return;
        };
        let analyze = !self.cache.contains(&entry.song_id);
        self.prebuffer.start(
            next_index,
            &entry.song_id,
            &entry.name,
            Arc::clone(&self.resolver),
            self.recovery_resolver.clone(),
            Arc::clone(&self.fetcher),
            analyze,
            AnalyzeOptions {
                analyze_bpm: self.settings.bpm_match,
            },
        );
    }

    /// Deferral gates: vocal guard and energy gate, within a bounded budget
    fn should_defer_crossfade(&self, t: f64) -> bool {
        let Some(plan) = self.plan.as_ref() else {
            return false;
        };
        if matches!(
            plan.outro_type,
            Some(
                OutroType::FadeOut
                    | OutroType::Silence
                    | OutroType::ReverbTail
                    | OutroType::LoopFade
            )
        ) {
            return false;
        }
        let Some(analysis) = self.current_analysis.as_deref() else {
            return false;
        };
        let effective_end = analysis.effective_end();

        if self.settings.vocal_guard {
            if let Some(outro) = &analysis.outro {
                if should_defer_for_vocals(
                    t,
                    plan.start_time,
                    effective_end,
                    &outro.multiband,
                    outro.region_start,
                    plan.base_duration,
                ) {
                    return true;
                }
            }
        }

        // Energy gate: hold while the track is still driving
        let budget = defer_budget(plan.base_duration, plan.start_time, effective_end);
        if (t - plan.start_time) >= budget {
            return false;
        }
        let energy = &analysis.energy.energy_per_second;
        let avg = analysis.energy.average_energy;
        let idx = t as usize;
        let e_now = energy.get(idx).copied().unwrap_or(0.0);
        let e_1s = idx
            .checked_sub(1)
            .and_then(|i| energy.get(i))
            .copied()
            .unwrap_or(e_now);
        let e_3s = idx
            .checked_sub(3)
            .and_then(|i| energy.get(i))
            .copied()
            .unwrap_or(e_now);

        let still_loud = e_now >= 0.5 * avg;
        let not_dropping = e_3s <= 0.05 || e_now / e_3s.max(1e-6) >= 0.75;
        let clearly_declining = e_3s > e_1s && e_1s > e_now && e_now / e_3s.max(1e-6) < 0.85;
        still_loud && not_dropping && !clearly_declining
    }

    // ===== Crossfading =====

    fn do_crossfade(&mut self) {
        let playlist = self.store.playlist();
        let prebuffered_index = self.prebuffer.pending_index();
        let next_index = prebuffered_index.or_else(|| {
            pick_next_index(playlist.len(), self.store.current_index(), self.store.play_mode())
        });
        let Some(next_index) = next_index else {
            self.cancel_crossfade();
            return;
        };
        let Some(entry) = playlist.get(next_index).cloned() else {
            self.cancel_crossfade();
            return;
        };

        self.phase = MixPhase::Crossfading;
        self.run = Some(CrossfadeRun {
            next_index,
            incoming_song_id: entry.song_id.clone(),
            incoming_song_name: entry.name.clone(),
            params: None,
            strategy: TransitionStrategy::default(),
            awaiting_incoming: false,
            play_deadline: None,
            play_retry_done: false,
            host_adopted: false,
            outgoing_ended_early: false,
            software_fade_until: None,
            software_fade_remaining: None,
            effects: None,
            unload_outgoing_at: None,
        });

        if let Some(prepared) = self.prebuffer.consume(next_index) {
            self.proceed_with_incoming(prepared);
        } else {
            // Slow path: fetch inline, stay in crossfading until it lands
            tracing::debug!("no pre-buffer; fetching incoming inline");
            if let Some(run) = self.run.as_mut() {
                run.awaiting_incoming = true;
            }
            let in_flight = self.prebuffer.is_buffering()
                && self.prebuffer.pending_index() == Some(next_index);
            if !in_flight {
                self.prebuffer.clear();
                let analyze = !self.cache.contains(&entry.song_id);
                self.prebuffer.start(
                    next_index,
                    &entry.song_id,
                    &entry.name,
                    Arc::clone(&self.resolver),
                    self.recovery_resolver.clone(),
                    Arc::clone(&self.fetcher),
                    analyze,
                    AnalyzeOptions {
                        analyze_bpm: self.settings.bpm_match,
                    },
                );
            }
            if !self.prebuffer.is_buffering() {
                self.fail_crossfade("incoming fetch could not start");
            }
        }
    }

    fn proceed_with_incoming(&mut self, prepared: PreparedNext) {
        let next_analysis = prepared
            .analysis
            .clone()
            .or_else(|| self.cache.get(&prepared.song_id));
        if let Some(analysis) = &next_analysis {
            self.cache.insert(&prepared.song_id, Arc::clone(analysis));
        }
        self.next_analysis = next_analysis.clone();

        let Some(current) = self.sounds.current() else {
            prepared.sound.unload();
            self.fail_crossfade("no current sound at crossfade time");
            return;
        };
        let now_t = current.sound.position();
        let outgoing_ended = current.sound.ended();

        let (mut params, strategy) = self.finalize_params(now_t, next_analysis.as_deref());
        if outgoing_ended {
            // The outgoing source died during setup: minimal fade-in only
            params.duration = 0.5;
            params.fade_in_only = true;
            params.spectral_crossfade = None;
        }

        let mut incoming = prepared.sound;
        incoming.play();
        let incoming_gain = incoming.gain_node();
        self.sounds.begin_transition(incoming, &prepared.song_id);
        let outgoing_gain = self.sounds.outgoing().map(|m| m.sound.gain_node());

        tracing::info!(
            song_id = %prepared.song_id,
            duration = params.duration,
            curve = params.curve.display_name(),
            fade_in_only = params.fade_in_only,
            "crossfade starting"
        );

        let scheduled =
            self.scheduler
                .schedule_full_crossfade(outgoing_gain, incoming_gain, params.clone());
        if let Err(e) = scheduled {
            // Software-fade fallback: no sample accuracy, same envelope
            tracing::warn!("graph scheduling unavailable ({e}); software fade");
            let dur_ms = (params.duration * 1000.0) as u64;
            let target = params.incoming_gain * params.incoming_gain_adjustment;
            if !params.fade_in_only {
                if let Some(outgoing) = self.sounds.outgoing_mut() {
                    let from = outgoing.sound.current_gain();
                    outgoing.sound.fade(from, 0.0, dur_ms);
                }
            }
            if let Some(current) = self.sounds.current_mut() {
                current.sound.fade(0.0, target, dur_ms);
            }
            if let Some(run) = self.run.as_mut() {
                run.software_fade_until = Some(self.graph.current_time() + params.duration);
            }
        }

        // Transition effects ride on the same clock as the crossfade
        let effects = if self.settings.transition_effects && strategy.use_effects {
            Some(TransitionEffects::create(
                &self.graph,
                outgoing_gain,
                incoming_gain,
                self.graph.current_time(),
                params.duration,
                &EffectsSpec {
                    reverb_tail: strategy.use_reverb_tail,
                    noise_riser: strategy.use_noise_riser,
                    filter_sweep: strategy.use_filter_sweep,
                    sweep_intensity: strategy.filter_sweep_intensity,
                    bpm: self
                        .current_analysis
                        .as_deref()
                        .and_then(|a| a.bpm.as_ref())
                        .map(|b| b.bpm),
                    fade_in_only: params.fade_in_only,
                },
            ))
        } else {
            None
        };

        if let Some(run) = self.run.as_mut() {
            run.awaiting_incoming = false;
            run.params = Some(params);
            run.strategy = strategy;
            run.effects = effects;
            run.outgoing_ended_early = outgoing_ended;
            run.play_deadline = Some(Instant::now() + PLAY_CONFIRM_TIMEOUT);
        }
    }

    fn tick_crossfading(&mut self) {
        // Slow path: still waiting for the incoming bytes
        if self.run.as_ref().is_some_and(|r| r.awaiting_incoming) {
            self.prebuffer.poll(&self.graph);
            let expected = self.run.as_ref().map_or(0, |r| r.next_index);
            if let Some(prepared) = self.prebuffer.consume(expected) {
                self.proceed_with_incoming(prepared);
            } else if !self.prebuffer.is_buffering() {
                self.fail_crossfade("incoming track failed to load");
            }
            return;
        }

        if self.paused_by_user {
            return;
        }

        // Outgoing end safety: force the fade to its targets rather than
        // letting the source cut to silence mid-ramp
        let outgoing_ended = self.sounds.outgoing().is_some_and(|m| m.sound.ended());
        if outgoing_ended && self.scheduler.is_active() {
            tracing::debug!("outgoing ended early; forcing completion");
            self.scheduler.force_complete();
        }

        // Play confirmation, then host adoption
        let (playing, retry_due, deadline_passed) = {
            let Some(run) = self.run.as_ref() else { return };
            let playing = self.sounds.current().is_some_and(|m| m.sound.playing());
            match run.play_deadline {
                Some(deadline) if !run.host_adopted => {
                    let started = deadline - PLAY_CONFIRM_TIMEOUT;
                    (
                        playing,
                        !run.play_retry_done
                            && Instant::now() >= started + PLAY_CONFIRM_RETRY,
                        Instant::now() >= deadline,
                    )
                }
                _ => (playing, false, false),
            }
        };
        let mut adopt_index = None;
        let mut confirm_failed = false;
        let mut retry_play = false;
        if let Some(run) = self.run.as_mut() {
            if run.play_deadline.is_some() && !run.host_adopted {
                if playing {
                    run.host_adopted = true;
                    run.play_deadline = None;
                    adopt_index = Some(run.next_index);
                } else if deadline_passed {
                    confirm_failed = true;
                } else if retry_due {
                    run.play_retry_done = true;
                    retry_play = true;
                }
            }
        }
        if let Some(index) = adopt_index {
            self.store.set_current_index(index);
        }
        if confirm_failed {
            self.fail_crossfade("incoming track never confirmed playback");
            return;
        }
        if retry_play {
            if let Some(current) = self.sounds.current_mut() {
                current.sound.play();
            }
        }

        // Completion: scheduler clock or software-fade timer
        let now = self.graph.current_time();
        let software_done = self
            .run
            .as_ref()
            .and_then(|r| r.software_fade_until)
            .is_some_and(|until| now >= until);
        if self.scheduler.tick() || software_done {
            self.complete_crossfade();
        }
    }

    fn complete_crossfade(&mut self) {
        let now = self.graph.current_time();

        // Persist normalization so later volume changes keep it
        self.active_gain_adjustment = self.scheduler.get_incoming_gain_adjustment();
        let target = self.user_volume * self.active_gain_adjustment;
        if let Some(current) = self.sounds.current_mut() {
            current.sound.set_volume(target);
        }

        if let Some(run) = self.run.as_mut() {
            run.software_fade_until = None;
            run.unload_outgoing_at = Some(now + OUTGOING_UNLOAD_DELAY);
            if let Some(effects) = run.effects.take() {
                effects.cleanup();
            }
        }

        // Rotate analyses: the incoming track is the current one now
        self.current_analysis = self.next_analysis.take();

        self.phase = MixPhase::Finishing;
        self.finishing_until = Some(now + FINISHING_HOLD);
        tracing::info!("crossfade complete");
    }

    fn tick_finishing(&mut self) {
        let now = self.graph.current_time();
        let unload_due = self
            .run
            .as_ref()
            .and_then(|r| r.unload_outgoing_at)
            .is_some_and(|at| now >= at);
        if unload_due && self.sounds.outgoing().is_some() {
            self.sounds.unload_outgoing();
        }
        if self.finishing_until.is_some_and(|until| now >= until) {
            self.finishing_until = None;
            self.run = None;
            self.plan = None;
            self.phase = MixPhase::Idle;
        }
    }

    // ===== Failure and cancellation =====

    fn fail_crossfade(&mut self, reason: &str) {
        tracing::warn!("crossfade failed: {reason}");
        self.last_failure = Some(Instant::now());
        let next_index = self.run.as_ref().map(|r| r.next_index);
        let outgoing_ended = self
            .sounds
            .outgoing()
            .or(self.sounds.current())
            .is_some_and(|m| m.sound.ended());
        self.cancel_crossfade();
        if outgoing_ended {
            // The track ran out during the failed setup: hand the advance
            // to the host's normal next-song path
            if let Some(next_index) = next_index {
                self.store.set_current_index(next_index);
            }
        }
    }

    /// Abort from any non-idle state; idempotent
    pub fn cancel_crossfade(&mut self) {
        if self.phase == MixPhase::Idle {
            return;
        }
        tracing::debug!(phase = %self.phase, "cancelling crossfade");
        self.scheduler.cancel();
        if let Some(run) = self.run.as_mut() {
            if let Some(effects) = run.effects.take() {
                effects.cleanup();
            }
        }
        self.prebuffer.clear();

        if self.sounds.in_transition() {
            self.sounds.revert_transition();
            let target = self.user_volume * self.active_gain_adjustment;
            if let Some(current) = self.sounds.current_mut() {
                current.sound.set_volume(target);
            }
        }

        self.run = None;
        self.plan = None;
        self.next_analysis = None;
        self.finishing_until = None;
        self.paused_by_user = false;
        self.phase = MixPhase::Idle;
    }

    // ===== Pause / resume =====

    /// Freeze an audible crossfade; returns false when the host should run
    /// its own pause path instead
    pub fn pause_crossfade(&mut self) -> bool {
        let now = self.graph.current_time();
        let software_active = self
            .run
            .as_ref()
            .and_then(|r| r.software_fade_until)
            .is_some();

        if self.scheduler.is_active() || software_active {
            self.scheduler.pause_crossfade();
            if let Some(run) = self.run.as_mut() {
                if let Some(effects) = &run.effects {
                    effects.pause(now);
                }
                if let Some(until) = run.software_fade_until.take() {
                    run.software_fade_remaining = Some((until - now).max(0.1));
                }
            }
            if software_active {
                // Software fades ride the context clock; freeze them too
                if let Some(outgoing) = self.sounds.outgoing_mut() {
                    let held = outgoing.sound.current_gain();
                    outgoing.sound.set_volume(held);
                }
                if let Some(current) = self.sounds.current_mut() {
                    let held = current.sound.current_gain();
                    current.sound.set_volume(held);
                }
            }
            if let Some(outgoing) = self.sounds.outgoing_mut() {
                outgoing.sound.pause();
            }
            if let Some(current) = self.sounds.current_mut() {
                current.sound.pause();
            }
            self.paused_by_user = true;
            return true;
        }

        if self.phase == MixPhase::Crossfading {
            // Still in async setup: bail out entirely and let the host pause
            self.cancel_crossfade();
        }
        false
    }

    /// Undo `pause_crossfade` in reverse order
    pub fn resume_crossfade(&mut self) {
        if !self.paused_by_user {
            return;
        }
        self.paused_by_user = false;
        let now = self.graph.current_time();

        if let Some(current) = self.sounds.current_mut() {
            current.sound.play();
        }
        if let Some(outgoing) = self.sounds.outgoing_mut() {
            if !outgoing.sound.ended() {
                outgoing.sound.play();
            }
        }
        self.scheduler.resume_crossfade();
        if let Some(run) = self.run.as_mut() {
            if let Some(effects) = &run.effects {
                effects.resume(now);
            }
            if let Some(remaining) = run.software_fade_remaining.take() {
                let target = run
                    .params
                    .as_ref()
                    .map_or(self.user_volume, |p| p.incoming_gain * p.incoming_gain_adjustment);
                let dur_ms = (remaining * 1000.0) as u64;
                let fade_in_only = run.params.as_ref().is_some_and(|p| p.fade_in_only);
                run.software_fade_until = Some(now + remaining);
                if !fade_in_only {
                    if let Some(outgoing) = self.sounds.outgoing_mut() {
                        let from = outgoing.sound.current_gain();
                        outgoing.sound.fade(from, 0.0, dur_ms);
                    }
                }
                if let Some(current) = self.sounds.current_mut() {
                    let from = current.sound.current_gain();
                    current.sound.fade(from, target, dur_ms);
                }
            }
        }
    }

    // ===== Snapshot =====

    fn publish_snapshot(&mut self) {
        let snapshot = AutoMixSnapshot {
            phase: self.phase,
            outro_type: self.plan.as_ref().and_then(|p| p.outro_type),
            outro_confidence: self.plan.as_ref().map_or(0.0, |p| p.outro_confidence),
            crossfade_start_time: self.plan.as_ref().map_or(0.0, |p| p.start_time),
            crossfade_duration: self
                .run
                .as_ref()
                .and_then(|r| r.params.as_ref())
                .map_or_else(
                    || self.plan.as_ref().map_or(0.0, |p| p.base_duration),
                    |p| p.duration,
                ),
            crossfade_progress: self.get_crossfade_progress() as f32,
            incoming_song_id: self.run.as_ref().map(|r| r.incoming_song_id.clone()),
            incoming_song_name: self.run.as_ref().map(|r| r.incoming_song_name.clone()),
        };
        if snapshot != self.last_snapshot {
            self.store.set_auto_mix_state(snapshot.clone());
            self.last_snapshot = snapshot;
        }
    }
}

/// Per-outro-type curve profile: (curve, fade_in_only, in_shape, out_shape)
fn outro_profile(outro_type: OutroType) -> (FadeCurveKind, bool, f32, f32) {
    match outro_type {
        OutroType::Hard => (FadeCurveKind::EqualPower, false, 0.85, 1.20),
        OutroType::FadeOut => (FadeCurveKind::EqualPower, true, 1.15, 1.00),
        OutroType::ReverbTail => (FadeCurveKind::SCurve, false, 1.20, 0.90),
        OutroType::Silence => (FadeCurveKind::EqualPower, false, 0.90, 1.00),
        OutroType::NoiseEnd => (FadeCurveKind::EqualPower, false, 0.90, 1.15),
        OutroType::SlowDown => (FadeCurveKind::SCurve, false, 1.10, 1.00),
        OutroType::Sustained => (FadeCurveKind::SCurve, false, 1.15, 0.95),
        OutroType::MusicalOutro => (FadeCurveKind::EqualPower, false, 1.00, 1.00),
        OutroType::LoopFade => (FadeCurveKind::EqualPower, true, 1.00, 1.00),
    }
}

/// Per-band dB morph between the outgoing tail and the incoming head
fn compute_spectral_data(
    current: Option<&TrackAnalysis>,
    next: Option<&TrackAnalysis>,
) -> Option<SpectralCrossfadeData> {
    let out_mb = &current?.outro.as_ref()?.multiband;
    let in_mb = next?.intro.as_ref()?.multiband.as_ref()?;
    let out_avg = out_mb.tail_averages(8);
    let in_avg = in_mb.head_averages(8);

    let mut diff_db = [0.0f32; 3];
    for band in 0..3 {
        if out_avg[band] > 1e-6 && in_avg[band] > 1e-6 {
            diff_db[band] = (10.0 * (in_avg[band] / out_avg[band]).log10()).clamp(-6.0, 6.0);
        }
    }
    let max_diff = diff_db.iter().fold(0.0f32, |m, d| m.max(d.abs()));
    if max_diff < 1.5 {
        return None;
    }

    let bass_swap_low =
        out_avg[0] > 0.01 && in_avg[0] > 0.01 && diff_db[0].abs() >= 2.0;
    Some(SpectralCrossfadeData {
        out_target_db: diff_db,
        in_initial_db: [-diff_db[0], -diff_db[1], -diff_db[2]],
        bass_swap_low,
    })
}

/// Gains a paused crossfade would freeze at (exposed for hosts that mirror
/// the fade in UI)
pub fn frozen_gains(
    progress: f64,
    params: &CrossfadeParams,
    outgoing_start: f32,
) -> (f32, f32) {
    let (out_vol, in_vol) =
        crossfade_gains(progress, params.curve, params.in_shape, params.out_shape);
    (
        out_vol * outgoing_start,
        in_vol * params.incoming_gain * params.incoming_gain_adjustment,
    )
}

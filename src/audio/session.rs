use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{
    error::{RangeError, SessionError, ValidationError},
    queue::{QueuePage, TrackQueue},
    track::Track,
    votes::{SkipVotes, VoteOutcome},
};
use crate::config::Config;

/// Parámetros con los que el registro crea cada sesión
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub skip_quorum: usize,
    pub default_volume: f32,
    pub max_queue_size: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(180),
            skip_quorum: 3,
            default_volume: 0.5,
            max_queue_size: 1000,
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            idle_timeout: Duration::from_secs(config.idle_timeout),
            skip_quorum: config.skip_quorum,
            default_volume: config.default_volume,
            max_queue_size: config.max_queue_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WaitingForTrack,
    Playing,
    Paused,
    TornDown,
}

/// Orden para el scheduler, atada a la reproducción en la que se emitió
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Control {
    pub generation: u64,
    pub action: ControlAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlAction {
    Skip,
    Pause,
    Resume,
    /// Cambia de canal de voz; vale en cualquier generación.
    /// `reply_to` es el canal de texto donde avisar si falla.
    Move { channel_id: ChannelId, reply_to: ChannelId },
}

#[derive(Debug)]
struct SessionState {
    voice_channel_id: ChannelId,
    current: Option<Track>,
    phase: Phase,
    volume: f32,
    loop_enabled: bool,
    /// Se incrementa en cada inicio de reproducción
    generation: u64,
}

/// Per-guild playback state.
///
/// Producer-side operations (enqueue, votes, volume, loop, shuffle, remove)
/// may be called from any task. The current track and phase are written only
/// by the bound [`PlaybackScheduler`](super::scheduler::PlaybackScheduler);
/// transport control requests are forwarded to it over a channel, never
/// applied to the connection directly.
///
/// Lock order is `state` then `votes`.
#[derive(Debug)]
pub struct PlaybackSession {
    guild_id: GuildId,
    queue: TrackQueue,
    votes: SkipVotes,
    state: Mutex<SessionState>,
    controls: mpsc::UnboundedSender<Control>,
}

impl PlaybackSession {
    pub(crate) fn new(
        guild_id: GuildId,
        voice_channel_id: ChannelId,
        settings: &SessionSettings,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Control>) {
        let (controls, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            guild_id,
            queue: TrackQueue::new(settings.max_queue_size),
            votes: SkipVotes::new(settings.skip_quorum),
            state: Mutex::new(SessionState {
                voice_channel_id,
                current: None,
                phase: Phase::WaitingForTrack,
                volume: settings.default_volume.clamp(0.0, 1.0),
                loop_enabled: false,
                generation: 0,
            }),
            controls,
        });

        (session, rx)
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Canal de voz actual; cambia tras un movimiento exitoso
    pub fn voice_channel_id(&self) -> ChannelId {
        self.state.lock().voice_channel_id
    }

    // Operaciones del lado productor

    /// Agrega un track y devuelve su posición en la cola (base 1)
    pub fn enqueue(&self, track: Track) -> Result<usize, SessionError> {
        let title = track.title().to_string();
        let position = self.queue.push(track)?;
        info!("➕ [{}] En cola #{}: {}", self.guild_id, position, title);
        Ok(position)
    }

    /// Registra un voto de skip para la canción actual
    pub fn skip(&self, voter: UserId) -> Result<VoteOutcome, SessionError> {
        let state = self.state.lock();
        let (current, generation) = Self::active_track(&state)?;

        let outcome = self.votes.record_vote(voter, current.requested_by());
        if outcome.triggers_skip() {
            info!("⏭️ [{}] Skip por votación ({:?})", self.guild_id, outcome);
            self.send(generation, ControlAction::Skip)?;
        }

        Ok(outcome)
    }

    /// Salta sin votación (comando privilegiado)
    pub fn force_skip(&self) -> Result<(), SessionError> {
        let state = self.state.lock();
        let (_, generation) = Self::active_track(&state)?;
        info!("⏭️ [{}] Skip forzado", self.guild_id);
        self.send(generation, ControlAction::Skip)
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        let state = self.state.lock();
        match state.phase {
            Phase::Playing => self.send(state.generation, ControlAction::Pause),
            Phase::TornDown => Err(SessionError::Closed),
            _ => Err(SessionError::NothingPlaying),
        }
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        let state = self.state.lock();
        match state.phase {
            Phase::Paused => self.send(state.generation, ControlAction::Resume),
            Phase::TornDown => Err(SessionError::Closed),
            _ => Err(SessionError::NothingPlaying),
        }
    }

    /// Vacía la cola, desactiva el loop y corta la canción actual
    pub fn stop(&self) -> Result<usize, SessionError> {
        self.ensure_open()?;
        let cleared = self.queue.clear();

        let mut state = self.state.lock();
        state.loop_enabled = false;
        if let Ok((_, generation)) = Self::active_track(&state) {
            self.send(generation, ControlAction::Skip)?;
        }

        info!("⏹️ [{}] Reproducción detenida", self.guild_id);
        Ok(cleared)
    }

    /// Ajusta el volumen (0-100). Aplica desde la próxima canción.
    pub fn set_volume(&self, percent: i64) -> Result<(), ValidationError> {
        if !(0..=100).contains(&percent) {
            return Err(ValidationError::Volume(percent));
        }

        self.state.lock().volume = percent as f32 / 100.0;
        info!("🔊 [{}] Volumen ajustado a {}%", self.guild_id, percent);
        Ok(())
    }

    pub fn set_loop(&self, enabled: bool) {
        self.state.lock().loop_enabled = enabled;
        if enabled {
            info!("🔂 [{}] Repetir canción activado", self.guild_id);
        } else {
            info!("➡️ [{}] Repetición desactivada", self.guild_id);
        }
    }

    /// Pide al scheduler que mueva la conexión a `channel_id`.
    ///
    /// The move happens asynchronously; a failure is announced in `reply_to`.
    pub fn move_to(&self, channel_id: ChannelId, reply_to: ChannelId) -> Result<(), SessionError> {
        self.ensure_open()?;
        let generation = self.state.lock().generation;
        info!("🚚 [{}] Moviendo al canal {}", self.guild_id, channel_id);
        self.send(generation, ControlAction::Move { channel_id, reply_to })
    }

    pub fn shuffle(&self) {
        self.queue.shuffle();
    }

    pub fn remove_at(&self, index: usize) -> Result<Track, RangeError> {
        self.queue.remove_at(index)
    }

    pub fn list_queue(&self, page: usize, page_size: usize) -> QueuePage {
        self.queue.page(page, page_size)
    }

    // Consultas

    pub fn now_playing(&self) -> Option<Track> {
        self.state.lock().current.clone()
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Cerrada en cuanto su cola deja de aceptar tracks
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    pub fn loop_enabled(&self) -> bool {
        self.state.lock().loop_enabled
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn skip_votes(&self) -> (usize, usize) {
        (self.votes.count(), self.votes.quorum())
    }

    // Transiciones; solo las usa el scheduler

    pub(crate) fn queue(&self) -> &TrackQueue {
        &self.queue
    }

    /// Canción a repetir si el loop está activo
    pub(crate) fn track_to_replay(&self) -> Option<Track> {
        let state = self.state.lock();
        if state.loop_enabled {
            state.current.clone()
        } else {
            None
        }
    }

    pub(crate) fn begin_waiting(&self) {
        let mut state = self.state.lock();
        state.current = None;
        state.phase = Phase::WaitingForTrack;
    }

    /// Marca `track` como actual, limpia los votos y devuelve la generación
    pub(crate) fn begin_track(&self, track: Track) -> u64 {
        let mut state = self.state.lock();
        state.generation += 1;
        state.current = Some(track);
        state.phase = Phase::Playing;
        self.votes.reset();
        state.generation
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        let mut state = self.state.lock();
        if matches!(state.phase, Phase::Playing | Phase::Paused) {
            state.phase = if paused { Phase::Paused } else { Phase::Playing };
        }
    }

    /// Termina la reproducción actual; `keep` conserva la canción para el loop
    pub(crate) fn finish_track(&self, keep: bool) {
        let mut state = self.state.lock();
        if !keep {
            state.current = None;
            state.phase = Phase::WaitingForTrack;
        }
    }

    pub(crate) fn mark_torn_down(&self) {
        self.queue.close();
        {
            let mut state = self.state.lock();
            state.current = None;
            state.phase = Phase::TornDown;
        }
        self.votes.reset();
    }

    pub(crate) fn set_voice_channel(&self, channel_id: ChannelId) {
        self.state.lock().voice_channel_id = channel_id;
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub(crate) fn request_skip(&self, generation: u64) -> Result<(), SessionError> {
        self.send(generation, ControlAction::Skip)
    }

    // Funciones privadas

    fn active_track(state: &SessionState) -> Result<(&Track, u64), SessionError> {
        match (&state.phase, &state.current) {
            (Phase::TornDown, _) => Err(SessionError::Closed),
            (Phase::Playing | Phase::Paused, Some(track)) => Ok((track, state.generation)),
            _ => Err(SessionError::NothingPlaying),
        }
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.is_closed() {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn send(&self, generation: u64, action: ControlAction) -> Result<(), SessionError> {
        debug!("📨 [{}] {:?} (generación {})", self.guild_id, action, generation);
        self.controls
            .send(Control { generation, action })
            .map_err(|_| SessionError::Closed)
    }
}

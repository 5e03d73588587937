//! Songbird-backed [`Transport`].
//!
//! Each [`SongbirdConnection`] wraps the `Call` of one guild. Track end and
//! track error events are turned into a [`Completion`] so the scheduler never
//! runs inside songbird's event context.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    error::ControlError,
    input::{HttpRequest, Input, YoutubeDl},
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{fmt, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::{
    error::{PlaybackError, TransportError},
    track::Track,
    transport::{Completion, Connection, Transport},
};

pub struct SongbirdTransport {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdTransport {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self {
            manager,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transport for SongbirdTransport {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);

        Ok(Box::new(SongbirdConnection {
            guild_id,
            manager: self.manager.clone(),
            call,
            current: None,
            http: self.http.clone(),
        }))
    }
}

pub struct SongbirdConnection {
    guild_id: GuildId,
    manager: Arc<Songbird>,
    call: Arc<Mutex<Call>>,
    current: Option<TrackHandle>,
    http: reqwest::Client,
}

impl SongbirdConnection {
    /// Usa la URL de stream directa si el resolver la obtuvo; si no, deja que yt-dlp la extraiga
    fn input_for(&self, track: &Track) -> Input {
        match track.stream_url() {
            Some(stream_url) => HttpRequest::new(self.http.clone(), stream_url.to_string()).into(),
            None => YoutubeDl::new(self.http.clone(), track.url().to_string()).into(),
        }
    }

    fn handle(&self) -> Result<&TrackHandle, TransportError> {
        self.current.as_ref().ok_or(TransportError::Unavailable)
    }
}

#[async_trait]
impl Connection for SongbirdConnection {
    async fn play(&mut self, track: &Track, completion: Completion) -> Result<(), PlaybackError> {
        let input = self.input_for(track);
        let handle = self.call.lock().await.play_input(input);

        // Sin eventos nadie avisaría del final: el stream no puede quedar sonando suelto
        stop_if_failed(watch(&handle, self.guild_id, completion), || {
            if let Err(e) = handle.stop() {
                debug!("⏹️ [{}] El stream ya había terminado: {}", self.guild_id, e);
            }
        })?;

        debug!("▶️ [{}] Stream iniciado: {}", self.guild_id, track.url());
        self.current = Some(handle);
        Ok(())
    }

    async fn move_to(&mut self, channel_id: ChannelId) -> Result<(), TransportError> {
        // Unirse a otro canal con la misma llamada la mueve sin cortar el stream
        self.manager
            .join(self.guild_id, channel_id)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        info!("🚚 Movido al canal de voz {} en guild {}", channel_id, self.guild_id);
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), TransportError> {
        self.handle()?
            .pause()
            .map_err(|e| TransportError::Control(e.to_string()))
    }

    async fn resume(&mut self) -> Result<(), TransportError> {
        self.handle()?
            .play()
            .map_err(|e| TransportError::Control(e.to_string()))
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        match self.current.take() {
            Some(handle) => handle
                .stop()
                .map_err(|e| TransportError::Control(e.to_string())),
            None => Ok(()),
        }
    }

    async fn set_volume(&mut self, volume: f32) -> Result<(), TransportError> {
        self.handle()?
            .set_volume(volume)
            .map_err(|e| TransportError::Control(e.to_string()))
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(handle) = self.current.take() {
            let _ = handle.stop();
        }

        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| TransportError::Disconnect(e.to_string()))?;

        info!("👋 Desconectado del canal de voz en guild {}", self.guild_id);
        Ok(())
    }
}

/// Engancha el fin y los errores del stream a `completion`
fn watch(handle: &TrackHandle, guild_id: GuildId, completion: Completion) -> Result<(), ControlError> {
    handle.add_event(
        Event::Track(TrackEvent::End),
        TrackEndHandler {
            completion: completion.clone(),
        },
    )?;
    handle.add_event(
        Event::Track(TrackEvent::Error),
        TrackErrorHandler {
            guild_id,
            completion,
        },
    )
}

fn stop_if_failed<E: fmt::Display>(result: Result<(), E>, stop: impl FnOnce()) -> Result<(), PlaybackError> {
    result.map_err(|e| {
        stop();
        PlaybackError::Start(e.to_string())
    })
}

/// Handler para cuando termina una canción
struct TrackEndHandler {
    completion: Completion,
}

#[async_trait]
impl VoiceEventHandler for TrackEndHandler {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        self.completion.complete(Ok(()));
        None
    }
}

/// Handler para errores de tracks
struct TrackErrorHandler {
    guild_id: GuildId,
    completion: Completion,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let mut reason = String::from("error desconocido");
        if let EventContext::Track(track_list) = ctx {
            for (state, _handle) in *track_list {
                if let PlayMode::Errored(e) = &state.playing {
                    reason = e.to_string();
                }
            }
        }

        error!("❌ Error en track para guild {}: {}", self.guild_id, reason);
        self.completion.complete(Err(PlaybackError::Stream(reason)));
        None
    }
}

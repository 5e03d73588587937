//! Collaborator seams of the playback core.
//!
//! The scheduler talks to the voice platform only through [`Transport`] and
//! [`Connection`], and announces tracks only through [`NotificationSink`].
//! Stream completion is reported back through a [`Completion`]: a single-slot
//! notification that the scheduler awaits, instead of a callback that would run
//! on the transport's own execution context.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{fmt, sync::Arc};
use tokio::sync::oneshot;

use super::{
    error::{PlaybackError, TransportError},
    track::Track,
};

pub type PlaybackResult = Result<(), PlaybackError>;

/// Aviso de fin de stream; solo el primer `complete` cuenta
#[derive(Clone)]
pub struct Completion {
    slot: Arc<Mutex<Option<oneshot::Sender<PlaybackResult>>>>,
}

impl Completion {
    pub fn channel() -> (Self, oneshot::Receiver<PlaybackResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Entrega el resultado. Devuelve `false` si ya se había entregado uno.
    pub fn complete(&self, result: PlaybackResult) -> bool {
        match self.slot.lock().take() {
            // El receptor puede haber desaparecido si la sesión se cerró
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Abre conexiones de voz
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Box<dyn Connection>, TransportError>;
}

/// Conexión de voz activa. La posee en exclusiva el scheduler de la sesión.
#[async_trait]
pub trait Connection: Send {
    /// Starts streaming `track`; the outcome arrives later through `completion`.
    async fn play(&mut self, track: &Track, completion: Completion) -> Result<(), PlaybackError>;

    async fn pause(&mut self) -> Result<(), TransportError>;

    async fn resume(&mut self) -> Result<(), TransportError>;

    /// Ends the current stream; its completion fires as a normal finish.
    async fn stop(&mut self) -> Result<(), TransportError>;

    async fn set_volume(&mut self, volume: f32) -> Result<(), TransportError>;

    /// Moves the connection to another voice channel of the same guild,
    /// keeping the current stream.
    async fn move_to(&mut self, channel_id: ChannelId) -> Result<(), TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    NowPlaying(Track),
    Status(String),
}

/// Salida de mensajes hacia el chat; fire-and-forget para el núcleo
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, channel_id: ChannelId, notice: Notice);
}

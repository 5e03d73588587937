//! Turning what a user typed into a playable [`Track`].
//!
//! Resolution is slow (it shells out to yt-dlp), so command handlers call it
//! before touching the session; the scheduler never waits on it.

pub mod youtube;

use async_trait::async_trait;
use serenity::model::id::{ChannelId, UserId};
use thiserror::Error;

use crate::audio::{error::ValidationError, track::Track};

pub use youtube::YtDlpResolver;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("no encontré nada para \"{0}\"")]
    NotFound(String),
    #[error("yt-dlp no pudo extraer el audio: {0}")]
    Extraction(String),
    #[error("yt-dlp no está disponible: {0}")]
    Unavailable(String),
}

/// Trait común para las fuentes de música
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resuelve una búsqueda o URL a un track listo para encolar
    async fn resolve(
        &self,
        query: &str,
        requested_by: UserId,
        channel_id: ChannelId,
    ) -> Result<Track, ResolveError>;
}

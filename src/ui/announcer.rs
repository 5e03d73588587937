use async_trait::async_trait;
use serenity::{builder::CreateMessage, http::Http, model::id::ChannelId};
use std::sync::Arc;
use tracing::{debug, warn};

use super::embeds;
use crate::audio::transport::{Notice, NotificationSink};

/// Publica los avisos del scheduler en el canal de texto del pedido
pub struct ChannelAnnouncer {
    http: Arc<Http>,
}

impl ChannelAnnouncer {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl NotificationSink for ChannelAnnouncer {
    async fn send(&self, channel_id: ChannelId, notice: Notice) {
        let message = match &notice {
            Notice::NowPlaying(track) => {
                CreateMessage::new().embed(embeds::create_now_playing_embed(track, false))
            }
            Notice::Status(text) => CreateMessage::new().content(text),
        };

        // Un aviso perdido no debe afectar la reproducción
        match channel_id.send_message(&self.http, message).await {
            Ok(_) => debug!("📣 Aviso enviado a {}", channel_id),
            Err(e) => warn!("⚠️ No se pudo enviar el aviso a {}: {}", channel_id, e),
        }
    }
}

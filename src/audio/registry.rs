use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    error::{SessionError, TransportError},
    scheduler::PlaybackScheduler,
    session::{PlaybackSession, SessionSettings},
    track::Track,
    transport::{NotificationSink, Transport},
};

/// Resultado de llamar al bot a un canal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Summoned {
    Connected,
    AlreadyHere,
    /// El scheduler hará el cambio; un fallo se avisa en el canal de texto
    Moving,
}

struct SessionEntry {
    session: Arc<PlaybackSession>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Mapa guild → sesión + scheduler.
///
/// Owned by the bot and passed around explicitly. A session is created on the
/// first command that needs a voice connection and removed either by
/// [`SessionRegistry::remove`] or by its own scheduler after the idle timeout.
///
/// A session that already closed but is still releasing its connection keeps
/// its entry until the disconnect finishes. Lookups skip it, and
/// [`SessionRegistry::get_or_create`] waits for that disconnect before
/// connecting again, so the old teardown never cuts the new call.
pub struct SessionRegistry {
    sessions: Arc<DashMap<GuildId, SessionEntry>>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn NotificationSink>,
    settings: SessionSettings,
    /// Serializa las conexiones para no abrir dos sesiones por guild
    joining: Mutex<()>,
}

impl SessionRegistry {
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn NotificationSink>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            transport,
            sink,
            settings,
            joining: Mutex::new(()),
        }
    }

    /// Sesión abierta del guild
    pub fn get(&self, guild_id: GuildId) -> Option<Arc<PlaybackSession>> {
        self.sessions
            .get(&guild_id)
            .map(|entry| entry.session.clone())
            .filter(|session| !session.is_closed())
    }

    /// Devuelve la sesión del guild o conecta y crea una nueva
    pub async fn get_or_create(
        &self,
        guild_id: GuildId,
        voice_channel_id: ChannelId,
    ) -> Result<Arc<PlaybackSession>, TransportError> {
        if let Some(session) = self.get(guild_id) {
            return Ok(session);
        }

        let _joining = self.joining.lock().await;
        if let Some(session) = self.get(guild_id) {
            return Ok(session);
        }

        // Una sesión cerrada que sigue desconectándose: se espera a que suelte la llamada
        if let Some((_, closing)) = self
            .sessions
            .remove_if(&guild_id, |_, entry| entry.session.is_closed())
        {
            debug!("⏳ [{}] Esperando a que la sesión anterior se desconecte", guild_id);
            if let Err(e) = closing.task.await {
                warn!("⚠️ [{}] El scheduler terminó con error: {}", guild_id, e);
            }
        }

        let connection = self.transport.connect(guild_id, voice_channel_id).await?;
        let (session, controls) = PlaybackSession::new(guild_id, voice_channel_id, &self.settings);
        let cancel = CancellationToken::new();

        let sessions = self.sessions.clone();
        let owned = session.clone();
        let scheduler = PlaybackScheduler::new(
            session.clone(),
            connection,
            controls,
            self.sink.clone(),
            self.settings.idle_timeout,
            cancel.clone(),
        )
        .on_teardown(Box::new(move || {
            // Solo quita la entrada si sigue siendo esta sesión
            sessions.remove_if(&guild_id, |_, entry| Arc::ptr_eq(&entry.session, &owned));
        }));

        let task = tokio::spawn(scheduler.run());
        self.sessions.insert(
            guild_id,
            SessionEntry {
                session: session.clone(),
                cancel,
                task,
            },
        );

        info!("🔊 [{}] Sesión creada en canal {}", guild_id, voice_channel_id);
        Ok(session)
    }

    /// Encola `track` en la sesión del guild, creándola si hace falta.
    ///
    /// If the session closes between the lookup and the push, the push is
    /// retried once on a fresh session.
    pub async fn enqueue(
        &self,
        guild_id: GuildId,
        voice_channel_id: ChannelId,
        track: Track,
    ) -> Result<usize, SessionError> {
        let session = self.get_or_create(guild_id, voice_channel_id).await?;
        match session.enqueue(track.clone()) {
            Err(SessionError::Closed) => {
                debug!("🔁 [{}] La sesión se cerró al encolar, abriendo otra", guild_id);
                self.get_or_create(guild_id, voice_channel_id)
                    .await?
                    .enqueue(track)
            }
            queued => queued,
        }
    }

    /// Lleva el bot a `channel_id`: conecta si no hay sesión, o mueve la que existe.
    pub async fn summon(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        reply_to: ChannelId,
    ) -> Result<Summoned, SessionError> {
        let session = match self.get(guild_id) {
            Some(session) => session,
            None => {
                let session = self.get_or_create(guild_id, channel_id).await?;
                if session.voice_channel_id() == channel_id {
                    return Ok(Summoned::Connected);
                }
                // Otro comando la abrió mientras tanto en otro canal
                session
            }
        };

        if session.voice_channel_id() == channel_id {
            return Ok(Summoned::AlreadyHere);
        }
        session.move_to(channel_id, reply_to)?;
        Ok(Summoned::Moving)
    }

    /// Cierra la sesión del guild y espera a que libere su conexión.
    ///
    /// Devuelve `false` si no había sesión.
    pub async fn remove(&self, guild_id: GuildId) -> bool {
        match self.sessions.remove(&guild_id) {
            Some((_, entry)) => {
                Self::close(guild_id, entry).await;
                true
            }
            None => false,
        }
    }

    /// Como [`remove`](Self::remove), pero solo si la sesión sigue en `voice_channel_id`.
    ///
    /// Lo usa el aviso de desconexión del gateway, que puede llegar después de
    /// que otra sesión ocupara el guild.
    pub async fn remove_in_channel(&self, guild_id: GuildId, voice_channel_id: ChannelId) -> bool {
        let removed = self
            .sessions
            .remove_if(&guild_id, |_, entry| entry.session.voice_channel_id() == voice_channel_id);

        match removed {
            Some((_, entry)) => {
                Self::close(guild_id, entry).await;
                true
            }
            None => false,
        }
    }

    async fn close(guild_id: GuildId, entry: SessionEntry) {
        entry.session.queue().close();
        entry.cancel.cancel();
        if let Err(e) = entry.task.await {
            warn!("⚠️ [{}] El scheduler terminó con error: {}", guild_id, e);
        }

        info!("👋 [{}] Sesión eliminada", guild_id);
    }

    /// Cierra todas las sesiones (apagado del proceso)
    pub async fn shutdown(&self) {
        let guilds: Vec<GuildId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        info!("🛑 Cerrando {} sesiones", guilds.len());

        for guild_id in guilds {
            self.remove(guild_id).await;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        session::Phase,
        testing::{settle, track, FakeTransport, RecordingSink},
    };
    use std::time::Duration;

    fn registry() -> (SessionRegistry, FakeTransport) {
        let transport = FakeTransport::default();
        let registry = SessionRegistry::new(
            Arc::new(transport.clone()),
            Arc::new(RecordingSink::default()),
            SessionSettings::default(),
        );
        (registry, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn reuses_the_session_of_a_guild() {
        let (registry, transport) = registry();
        let first = registry.get_or_create(GuildId::new(1), ChannelId::new(9)).await.unwrap();
        let again = registry.get_or_create(GuildId::new(1), ChannelId::new(9)).await.unwrap();
        let other = registry.get_or_create(GuildId::new(2), ChannelId::new(9)).await.unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(transport.connects(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_session_removes_itself() {
        let (registry, transport) = registry();
        let session = registry.get_or_create(GuildId::new(1), ChannelId::new(9)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(179)).await;
        assert_eq!(registry.len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert!(registry.is_empty());
        assert_eq!(session.phase(), Phase::TornDown);
        assert_eq!(transport.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn command_during_slow_disconnect_gets_a_fresh_session() {
        let transport = FakeTransport::with_disconnect_delay(Duration::from_secs(5));
        let registry = SessionRegistry::new(
            Arc::new(transport.clone()),
            Arc::new(RecordingSink::default()),
            SessionSettings::default(),
        );
        let old = registry.get_or_create(GuildId::new(1), ChannelId::new(9)).await.unwrap();

        // El timeout de inactividad ya cerró la sesión pero el disconnect sigue en curso
        tokio::time::sleep(Duration::from_secs(181)).await;
        assert!(old.is_closed());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(GuildId::new(1)).is_none());
        assert_eq!(transport.disconnects(), 0);

        let fresh = registry.get_or_create(GuildId::new(1), ChannelId::new(9)).await.unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert_eq!(transport.disconnects(), 1);
        assert_eq!(transport.connects(), 2);
        assert_eq!(fresh.enqueue(track("A", 1)), Ok(1));

        settle().await;
        assert_eq!(transport.played(), vec!["A"]);
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get(GuildId::new(1)).unwrap(), &fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_skips_a_session_that_just_closed() {
        let (registry, transport) = registry();
        let old = registry.get_or_create(GuildId::new(1), ChannelId::new(9)).await.unwrap();
        assert!(old.queue().close_if_empty());

        assert_eq!(registry.enqueue(GuildId::new(1), ChannelId::new(9), track("A", 1)).await, Ok(1));
        settle().await;

        assert_eq!(transport.connects(), 2);
        assert_eq!(transport.played(), vec!["A"]);
        assert!(!Arc::ptr_eq(&registry.get(GuildId::new(1)).unwrap(), &old));
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_session_after_teardown_starts_clean() {
        let (registry, _transport) = registry();
        let old = registry.get_or_create(GuildId::new(1), ChannelId::new(9)).await.unwrap();
        old.set_volume(80).unwrap();
        old.set_loop(true);
        assert!(registry.remove(GuildId::new(1)).await);

        let fresh = registry.get_or_create(GuildId::new(1), ChannelId::new(9)).await.unwrap();
        assert!(!Arc::ptr_eq(&old, &fresh));
        assert_eq!(fresh.volume(), 0.5);
        assert!(!fresh.loop_enabled());
        assert_eq!(fresh.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn remove_stops_playback_and_is_idempotent() {
        let (registry, transport) = registry();
        let session = registry.get_or_create(GuildId::new(1), ChannelId::new(9)).await.unwrap();
        session.enqueue(track("A", 1)).unwrap();
        session.enqueue(track("B", 1)).unwrap();
        settle().await;

        assert!(registry.remove(GuildId::new(1)).await);
        assert!(!registry.remove(GuildId::new(1)).await);

        assert!(session.is_closed());
        assert_eq!(session.queue_len(), 0);
        assert_eq!(transport.played(), vec!["A"]);
        assert_eq!(transport.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_teardown_does_not_evict_a_newer_session() {
        let (registry, _transport) = registry();
        registry.get_or_create(GuildId::new(1), ChannelId::new(9)).await.unwrap();
        registry.remove(GuildId::new(1)).await;
        let fresh = registry.get_or_create(GuildId::new(1), ChannelId::new(9)).await.unwrap();
        fresh.enqueue(track("A", 1)).unwrap();
        settle().await;

        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get(GuildId::new(1)).unwrap(), &fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_notice_only_removes_a_session_in_that_channel() {
        let (registry, transport) = registry();
        registry.get_or_create(GuildId::new(1), ChannelId::new(9)).await.unwrap();

        assert!(!registry.remove_in_channel(GuildId::new(1), ChannelId::new(8)).await);
        assert_eq!(registry.len(), 1);

        assert!(registry.remove_in_channel(GuildId::new(1), ChannelId::new(9)).await);
        assert!(registry.is_empty());
        assert_eq!(transport.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn summon_connects_then_moves_the_same_session() {
        let (registry, transport) = registry();
        let guild = GuildId::new(1);
        let text = ChannelId::new(3);

        assert_eq!(registry.summon(guild, ChannelId::new(9), text).await, Ok(Summoned::Connected));
        assert_eq!(registry.summon(guild, ChannelId::new(9), text).await, Ok(Summoned::AlreadyHere));

        let session = registry.get(guild).unwrap();
        session.enqueue(track("A", 1)).unwrap();
        assert_eq!(registry.summon(guild, ChannelId::new(7), text).await, Ok(Summoned::Moving));
        settle().await;

        assert_eq!(transport.connects(), 1);
        assert_eq!(transport.moves(), vec![ChannelId::new(7)]);
        assert_eq!(transport.played(), vec!["A"]);
        assert_eq!(session.voice_channel_id(), ChannelId::new(7));

        // El aviso de desconexión ahora corresponde al canal nuevo
        assert!(!registry.remove_in_channel(guild, ChannelId::new(9)).await);
        assert!(registry.remove_in_channel(guild, ChannelId::new(7)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_every_connection() {
        let (registry, transport) = registry();
        for guild in 1..=3 {
            registry.get_or_create(GuildId::new(guild), ChannelId::new(9)).await.unwrap();
        }

        registry.shutdown().await;
        assert!(registry.is_empty());
        assert_eq!(transport.disconnects(), 3);
    }

    #[tokio::test]
    async fn connect_failure_leaves_no_entry() {
        struct Refusing;

        #[async_trait::async_trait]
        impl Transport for Refusing {
            async fn connect(
                &self,
                _guild_id: GuildId,
                _channel_id: ChannelId,
            ) -> Result<Box<dyn crate::audio::transport::Connection>, TransportError> {
                Err(TransportError::Connect("sin permisos".into()))
            }
        }

        let registry = SessionRegistry::new(
            Arc::new(Refusing),
            Arc::new(RecordingSink::default()),
            SessionSettings::default(),
        );
        let result = registry.get_or_create(GuildId::new(1), ChannelId::new(9)).await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
        assert!(registry.is_empty());
    }
}

use futures::FutureExt;
use serenity::model::id::ChannelId;
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    error::PlaybackError,
    session::{Control, ControlAction, PlaybackSession},
    track::Track,
    transport::{Completion, Connection, Notice, NotificationSink, PlaybackResult},
};

/// Se ejecuta una vez, al terminar el scheduler, para sacar la sesión del registro
pub(crate) type TeardownHook = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    IdleTimeout,
    Cancelled,
    Panicked,
}

/// Background loop that drives one [`PlaybackSession`].
///
/// It is the only consumer of the session's queue and the sole owner of the
/// voice connection. Whatever way the loop ends (idle timeout, cancellation
/// from the registry, or a panic inside the loop) the connection is
/// disconnected exactly once before the task finishes.
pub struct PlaybackScheduler {
    session: Arc<PlaybackSession>,
    connection: Box<dyn Connection>,
    controls: mpsc::UnboundedReceiver<Control>,
    sink: Arc<dyn NotificationSink>,
    idle_timeout: Duration,
    cancel: CancellationToken,
    on_teardown: Option<TeardownHook>,
}

impl PlaybackScheduler {
    pub(crate) fn new(
        session: Arc<PlaybackSession>,
        connection: Box<dyn Connection>,
        controls: mpsc::UnboundedReceiver<Control>,
        sink: Arc<dyn NotificationSink>,
        idle_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            connection,
            controls,
            sink,
            idle_timeout,
            cancel,
            on_teardown: None,
        }
    }

    pub(crate) fn on_teardown(mut self, hook: TeardownHook) -> Self {
        self.on_teardown = Some(hook);
        self
    }

    pub async fn run(mut self) {
        let guild_id = self.session.guild_id();
        info!("🎛️ [{}] Scheduler iniciado", guild_id);

        let exit = AssertUnwindSafe(self.drive())
            .catch_unwind()
            .await
            .unwrap_or(Exit::Panicked);

        match exit {
            Exit::IdleTimeout => info!(
                "💤 [{}] Sin canciones durante {:?}, cerrando sesión",
                guild_id, self.idle_timeout
            ),
            Exit::Cancelled => info!("👋 [{}] Sesión cancelada", guild_id),
            Exit::Panicked => error!("💥 [{}] El scheduler entró en pánico, cerrando sesión", guild_id),
        }

        // La cola se cierra ya; la entrada del registro sigue hasta soltar la
        // conexión para que una sesión nueva del guild espere a este disconnect
        self.session.mark_torn_down();
        if let Err(e) = self.connection.disconnect().await {
            warn!("⚠️ [{}] Error al liberar la conexión: {}", guild_id, e);
        }
        if let Some(hook) = self.on_teardown.take() {
            hook();
        }

        info!("🔌 [{}] Conexión liberada", guild_id);
    }

    async fn drive(&mut self) -> Exit {
        loop {
            let track = match self.session.track_to_replay() {
                Some(track) => {
                    debug!("🔂 Repitiendo track: {}", track.title());
                    track
                }
                None => {
                    self.session.begin_waiting();
                    match self.next_track().await {
                        Ok(track) => track,
                        Err(exit) => return exit,
                    }
                }
            };

            let generation = self.session.begin_track(track.clone());
            let (completion, done) = Completion::channel();

            if let Err(e) = self.start(&track, completion).await {
                warn!("⚠️ [{}] {} - saltando '{}'", self.session.guild_id(), e, track.title());
                self.session.finish_track(false);
                self.report_failure(&track);
                continue;
            }

            self.notify(track.channel_id(), Notice::NowPlaying(track.clone()));

            let (result, skipped) = match self.wait_for_end(generation, done).await {
                Some(ended) => ended,
                None => return Exit::Cancelled,
            };

            match result {
                Ok(()) => {
                    let keep = !skipped && self.session.loop_enabled();
                    debug!("🏁 Track terminado: {} (skip: {}, repetir: {})", track.title(), skipped, keep);
                    self.session.finish_track(keep);
                }
                Err(e) => {
                    warn!(
                        "⚠️ [{}] Error de reproducción en '{}': {} - avanzando",
                        self.session.guild_id(),
                        track.title(),
                        e
                    );
                    self.session.finish_track(false);
                    self.report_failure(&track);
                }
            }
        }
    }

    /// Espera la próxima canción hasta el límite de inactividad.
    ///
    /// Moves are still served while idle and do not reset the bound. The queue
    /// is closed only if it is still empty, so a track pushed right as the
    /// bound expires gets played instead of dropped.
    async fn next_track(&mut self) -> Result<Track, Exit> {
        let deadline = Instant::now() + self.idle_timeout;

        loop {
            let idle = deadline.saturating_duration_since(Instant::now());
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Exit::Cancelled),
                Some(control) = self.controls.recv() => match control.action {
                    ControlAction::Move { channel_id, reply_to } => self.move_to(channel_id, reply_to).await,
                    action => debug!("🗑️ Orden {:?} descartada: no hay canción", action),
                },
                popped = self.session.queue().pop(idle) => match popped {
                    Some(track) => return Ok(track),
                    None if self.session.queue().close_if_empty() => return Err(Exit::IdleTimeout),
                    None => debug!("📥 [{}] Llegó una canción al cerrar, sigo", self.session.guild_id()),
                },
            }
        }
    }

    /// Inicia el stream con el volumen configurado en la sesión
    async fn start(&mut self, track: &Track, completion: Completion) -> Result<(), PlaybackError> {
        let volume = self.session.volume();

        self.connection.play(track, completion).await?;
        if let Err(e) = self.connection.set_volume(volume).await {
            warn!("⚠️ No se pudo ajustar el volumen: {}", e);
        }

        info!("🎵 [{}] Reproduciendo: {}", self.session.guild_id(), track.title());
        Ok(())
    }

    /// Avisa en un canal de texto sin bloquear el loop
    fn notify(&self, channel_id: ChannelId, notice: Notice) {
        let sink = self.sink.clone();
        tokio::spawn(async move {
            sink.send(channel_id, notice).await;
        });
    }

    fn report_failure(&self, track: &Track) {
        let text = format!("⚠️ No pude reproducir **{}**, pasando a la siguiente", track.title());
        self.notify(track.channel_id(), Notice::Status(text));
    }

    /// Mueve la conexión; la canción en curso sigue sonando
    async fn move_to(&mut self, channel_id: ChannelId, reply_to: ChannelId) {
        let guild_id = self.session.guild_id();
        match self.connection.move_to(channel_id).await {
            Ok(()) => {
                self.session.set_voice_channel(channel_id);
                info!("🚚 [{}] Ahora en el canal {}", guild_id, channel_id);
            }
            Err(e) => {
                warn!("⚠️ [{}] No se pudo mover al canal {}: {}", guild_id, channel_id, e);
                self.notify(reply_to, Notice::Status(format!("⚠️ No pude moverme a <#{}>", channel_id)));
            }
        }
    }

    /// Espera el fin del stream atendiendo pausas y skips.
    ///
    /// Returns `None` when the scheduler was cancelled; otherwise the stream's
    /// result and whether it ended because of a skip.
    async fn wait_for_end(
        &mut self,
        generation: u64,
        mut done: oneshot::Receiver<PlaybackResult>,
    ) -> Option<(PlaybackResult, bool)> {
        let mut skipped = false;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    if let Err(e) = self.connection.stop().await {
                        warn!("⚠️ Error al detener el stream: {}", e);
                    }
                    return None;
                }
                result = &mut done => {
                    // Si el transporte soltó la notificación sin usarla, se trata como fallo
                    return Some((result.unwrap_or(Err(PlaybackError::Abandoned)), skipped));
                }
                Some(control) = self.controls.recv() => {
                    self.apply(control, generation, &mut skipped).await;
                }
            }
        }
    }

    async fn apply(&mut self, control: Control, generation: u64, skipped: &mut bool) {
        let outcome = match control.action {
            ControlAction::Move { channel_id, reply_to } => {
                return self.move_to(channel_id, reply_to).await;
            }
            action if control.generation != generation => {
                debug!("🗑️ Orden {:?} descartada: pertenece a otra canción", action);
                return;
            }
            ControlAction::Skip => {
                *skipped = true;
                self.connection.stop().await
            }
            ControlAction::Pause => {
                let paused = self.connection.pause().await;
                if paused.is_ok() {
                    self.session.set_paused(true);
                    info!("⏸️ [{}] Reproducción pausada", self.session.guild_id());
                }
                paused
            }
            ControlAction::Resume => {
                let resumed = self.connection.resume().await;
                if resumed.is_ok() {
                    self.session.set_paused(false);
                    info!("▶️ [{}] Reproducción reanudada", self.session.guild_id());
                }
                resumed
            }
        };

        if let Err(e) = outcome {
            warn!("⚠️ [{}] {:?} falló: {}", self.session.guild_id(), control.action, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        error::SessionError,
        session::{Phase, SessionSettings},
        testing::{settle, track, FakeTransport, RecordingSink},
        transport::{MockNotificationSink, Transport},
        votes::VoteOutcome,
    };
    use pretty_assertions::assert_eq;
    use serenity::model::id::{ChannelId, GuildId, UserId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinHandle;

    struct Harness {
        session: Arc<PlaybackSession>,
        transport: FakeTransport,
        sink: RecordingSink,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    }

    async fn start_with(sink: Arc<dyn NotificationSink>, recording: RecordingSink) -> Harness {
        let transport = FakeTransport::default();
        let connection = transport
            .connect(GuildId::new(1), ChannelId::new(2))
            .await
            .unwrap();
        let settings = SessionSettings::default();
        let (session, controls) =
            PlaybackSession::new(GuildId::new(1), ChannelId::new(2), &settings);
        let cancel = CancellationToken::new();

        let scheduler = PlaybackScheduler::new(
            session.clone(),
            connection,
            controls,
            sink,
            settings.idle_timeout,
            cancel.clone(),
        );
        let task = tokio::spawn(scheduler.run());

        Harness {
            session,
            transport,
            sink: recording,
            cancel,
            task,
        }
    }

    async fn start() -> Harness {
        let sink = RecordingSink::default();
        start_with(Arc::new(sink.clone()), sink).await
    }

    #[tokio::test(start_paused = true)]
    async fn plays_tracks_in_queue_order() {
        let h = start().await;
        for name in ["A", "B", "C"] {
            h.session.enqueue(track(name, 1)).unwrap();
        }
        settle().await;
        assert_eq!(h.transport.played(), vec!["A"]);
        assert_eq!(h.session.phase(), Phase::Playing);

        h.transport.finish();
        settle().await;
        h.transport.finish();
        settle().await;
        assert_eq!(h.transport.played(), vec!["A", "B", "C"]);
        assert_eq!(h.sink.now_playing(), vec!["A", "B", "C"]);

        h.transport.finish();
        settle().await;
        assert_eq!(h.session.phase(), Phase::WaitingForTrack);
        assert!(h.session.now_playing().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn requester_skip_advances_immediately() {
        let h = start().await;
        h.session.enqueue(track("A", 1)).unwrap();
        h.session.enqueue(track("B", 1)).unwrap();
        settle().await;

        h.session.skip(UserId::new(7)).unwrap();
        assert_eq!(h.session.skip(UserId::new(1)).unwrap(), VoteOutcome::ImmediateSkip);
        settle().await;

        assert_eq!(h.transport.played(), vec!["A", "B"]);
        // Los votos de A no pasan a B
        assert_eq!(h.session.skip_votes().0, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn two_votes_keep_playing_and_third_skips() {
        let h = start().await;
        h.session.enqueue(track("A", 1)).unwrap();
        h.session.enqueue(track("B", 1)).unwrap();
        settle().await;

        h.session.skip(UserId::new(2)).unwrap();
        h.session.skip(UserId::new(3)).unwrap();
        assert_eq!(h.session.skip(UserId::new(3)).unwrap(), VoteOutcome::AlreadyVoted);
        settle().await;
        assert_eq!(h.transport.played(), vec!["A"]);

        h.session.skip(UserId::new(4)).unwrap();
        settle().await;
        assert_eq!(h.transport.played(), vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_replays_until_skipped() {
        let h = start().await;
        h.session.set_loop(true);
        h.session.enqueue(track("A", 1)).unwrap();
        h.session.enqueue(track("B", 1)).unwrap();
        settle().await;

        h.transport.finish();
        settle().await;
        h.transport.finish();
        settle().await;
        assert_eq!(h.transport.played(), vec!["A", "A", "A"]);

        h.session.force_skip().unwrap();
        settle().await;
        assert_eq!(h.transport.played(), vec!["A", "A", "A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_loop_lets_the_queue_advance() {
        let h = start().await;
        h.session.set_loop(true);
        h.session.enqueue(track("A", 1)).unwrap();
        h.session.enqueue(track("B", 1)).unwrap();
        settle().await;
        h.transport.finish();
        settle().await;

        h.session.set_loop(false);
        h.transport.finish();
        settle().await;
        assert_eq!(h.transport.played(), vec!["A", "A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn playback_error_drops_track_and_advances() {
        let h = start().await;
        h.session.set_loop(true);
        h.session.enqueue(track("A", 1)).unwrap();
        h.session.enqueue(track("B", 1)).unwrap();
        settle().await;

        h.transport.fail("decoder exploded");
        settle().await;

        assert_eq!(h.transport.played(), vec!["A", "B"]);
        assert_eq!(h.session.phase(), Phase::Playing);
        assert_eq!(h.transport.disconnects(), 0);
        assert_eq!(h.sink.statuses(), vec!["⚠️ No pude reproducir **A**, pasando a la siguiente"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_moves_to_next_track() {
        let h = start().await;
        h.transport.fail_next_play();
        h.session.enqueue(track("A", 1)).unwrap();
        h.session.enqueue(track("B", 1)).unwrap();
        settle().await;

        assert_eq!(h.transport.played(), vec!["B"]);
        assert_eq!(h.session.now_playing().map(|t| t.title().to_string()).as_deref(), Some("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_skip_does_not_touch_the_next_track() {
        let h = start().await;
        h.session.enqueue(track("A", 1)).unwrap();
        h.session.enqueue(track("B", 1)).unwrap();
        settle().await;

        let generation_of_a = h.session.generation();
        h.transport.finish();
        settle().await;

        h.session.request_skip(generation_of_a).unwrap();
        settle().await;
        assert_eq!(h.transport.played(), vec!["A", "B"]);
        assert_eq!(h.session.phase(), Phase::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn volume_change_applies_on_next_start() {
        let h = start().await;
        h.session.enqueue(track("A", 1)).unwrap();
        h.session.enqueue(track("B", 1)).unwrap();
        settle().await;

        h.session.set_volume(30).unwrap();
        assert_eq!(h.transport.volumes(), vec![0.5]);

        h.transport.finish();
        settle().await;
        assert_eq!(h.transport.volumes(), vec![0.5, 0.3]);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_and_resume_go_through_the_connection() {
        let h = start().await;
        h.session.enqueue(track("A", 1)).unwrap();
        settle().await;

        h.session.pause().unwrap();
        settle().await;
        assert_eq!(h.session.phase(), Phase::Paused);

        h.session.resume().unwrap();
        settle().await;
        assert_eq!(h.session.phase(), Phase::Playing);
        assert_eq!(h.transport.controls(), vec!["pause", "resume"]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_tears_down_and_disconnects_once() {
        let h = start().await;
        tokio::time::sleep(Duration::from_secs(181)).await;

        assert!(h.task.is_finished());
        assert_eq!(h.session.phase(), Phase::TornDown);
        assert_eq!(h.transport.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_track_stops_and_disconnects() {
        let h = start().await;
        h.session.enqueue(track("A", 1)).unwrap();
        h.session.enqueue(track("B", 1)).unwrap();
        settle().await;

        h.cancel.cancel();
        h.task.await.unwrap();

        assert_eq!(h.transport.controls(), vec!["stop"]);
        assert_eq!(h.transport.disconnects(), 1);
        assert_eq!(h.session.queue_len(), 0);
        assert!(h.session.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_teardown_refuses_tracks_instead_of_losing_them() {
        let h = start().await;
        tokio::time::sleep(Duration::from_secs(181)).await;

        assert!(h.session.is_closed());
        assert_eq!(h.session.enqueue(track("A", 1)), Err(SessionError::Closed));
        assert!(h.transport.played().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn late_vote_retries_a_skip_the_connection_dropped() {
        let h = start().await;
        h.session.enqueue(track("A", 1)).unwrap();
        h.session.enqueue(track("B", 1)).unwrap();
        settle().await;

        h.transport.fail_next_stop();
        for voter in 2..=4 {
            h.session.skip(UserId::new(voter)).unwrap();
        }
        settle().await;
        assert_eq!(h.transport.played(), vec!["A"]);

        assert_eq!(h.session.skip(UserId::new(5)).unwrap(), VoteOutcome::QuorumReached(4));
        settle().await;
        assert_eq!(h.transport.played(), vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn move_keeps_the_current_stream() {
        let h = start().await;
        h.session.enqueue(track("A", 1)).unwrap();
        settle().await;

        h.session.move_to(ChannelId::new(7), ChannelId::new(3)).unwrap();
        settle().await;

        assert_eq!(h.transport.moves(), vec![ChannelId::new(7)]);
        assert_eq!(h.session.voice_channel_id(), ChannelId::new(7));
        assert_eq!(h.transport.played(), vec!["A"]);
        assert_eq!(h.session.phase(), Phase::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn move_while_idle_keeps_the_idle_deadline() {
        let h = start().await;
        tokio::time::sleep(Duration::from_secs(100)).await;

        h.session.move_to(ChannelId::new(7), ChannelId::new(3)).unwrap();
        settle().await;
        assert_eq!(h.transport.moves(), vec![ChannelId::new(7)]);
        assert!(!h.task.is_finished());

        tokio::time::sleep(Duration::from_secs(81)).await;
        assert!(h.task.is_finished());
        assert_eq!(h.transport.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_move_is_reported_and_keeps_the_channel() {
        let h = start().await;
        h.transport.refuse_moves();

        h.session.move_to(ChannelId::new(7), ChannelId::new(3)).unwrap();
        settle().await;

        assert_eq!(h.session.voice_channel_id(), ChannelId::new(2));
        assert_eq!(h.sink.statuses(), vec!["⚠️ No pude moverme a <#7>"]);
    }

    #[tokio::test(start_paused = true)]
    async fn announces_each_start_through_the_sink() {
        let announced = Arc::new(AtomicUsize::new(0));
        let counter = announced.clone();
        let mut mock = MockNotificationSink::new();
        mock.expect_send()
            .withf(|channel_id, notice| {
                *channel_id == ChannelId::new(3) && matches!(notice, Notice::NowPlaying(_))
            })
            .returning(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        let h = start_with(Arc::new(mock), RecordingSink::default()).await;
        h.session.set_loop(true);
        h.session.enqueue(track("A", 1)).unwrap();
        settle().await;
        h.transport.finish();
        settle().await;

        assert_eq!(announced.load(Ordering::SeqCst), 2);
    }
}

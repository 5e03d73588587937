//! In-memory collaborators for scheduler and registry tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use super::{
    error::{PlaybackError, TransportError},
    track::Track,
    transport::{Completion, Connection, Notice, NotificationSink, Transport},
};

pub fn track(title: &str, requester: u64) -> Track {
    Track::new(
        title,
        title,
        format!("https://example.com/{title}"),
        UserId::new(requester),
        ChannelId::new(3),
    )
}

/// Deja correr las tareas pendientes (el reloj de test está pausado)
pub async fn settle() {
    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

#[derive(Default)]
struct FakeState {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    disconnect_delay: Duration,
    fail_next_play: AtomicBool,
    fail_next_stop: AtomicBool,
    refuse_moves: AtomicBool,
    played: Mutex<Vec<String>>,
    moves: Mutex<Vec<ChannelId>>,
    volumes: Mutex<Vec<f32>>,
    controls: Mutex<Vec<&'static str>>,
    active: Mutex<Option<Completion>>,
}

/// Transporte falso: registra llamadas y permite terminar el stream activo
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<FakeState>,
}

impl FakeTransport {
    /// Cada `disconnect` tarda `delay`, como una ida y vuelta al gateway
    pub fn with_disconnect_delay(delay: Duration) -> Self {
        Self {
            state: Arc::new(FakeState {
                disconnect_delay: delay,
                ..FakeState::default()
            }),
        }
    }

    pub fn played(&self) -> Vec<String> {
        self.state.played.lock().clone()
    }

    pub fn volumes(&self) -> Vec<f32> {
        self.state.volumes.lock().clone()
    }

    pub fn controls(&self) -> Vec<&'static str> {
        self.state.controls.lock().clone()
    }

    pub fn moves(&self) -> Vec<ChannelId> {
        self.state.moves.lock().clone()
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }

    /// El stream activo termina normalmente
    pub fn finish(&self) {
        if let Some(completion) = self.state.active.lock().take() {
            completion.complete(Ok(()));
        }
    }

    /// El stream activo falla
    pub fn fail(&self, reason: &str) {
        if let Some(completion) = self.state.active.lock().take() {
            completion.complete(Err(PlaybackError::Stream(reason.to_string())));
        }
    }

    pub fn fail_next_play(&self) {
        self.state.fail_next_play.store(true, Ordering::SeqCst);
    }

    /// El próximo `stop` falla y el stream sigue sonando
    pub fn fail_next_stop(&self) {
        self.state.fail_next_stop.store(true, Ordering::SeqCst);
    }

    pub fn refuse_moves(&self) {
        self.state.refuse_moves.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(
        &self,
        _guild_id: GuildId,
        _channel_id: ChannelId,
    ) -> Result<Box<dyn Connection>, TransportError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            state: self.state.clone(),
        }))
    }
}

struct FakeConnection {
    state: Arc<FakeState>,
}

#[async_trait]
impl Connection for FakeConnection {
    async fn play(&mut self, track: &Track, completion: Completion) -> Result<(), PlaybackError> {
        if self.state.fail_next_play.swap(false, Ordering::SeqCst) {
            return Err(PlaybackError::Start("stream not found".to_string()));
        }
        self.state.played.lock().push(track.title().to_string());
        *self.state.active.lock() = Some(completion);
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), TransportError> {
        self.state.controls.lock().push("pause");
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), TransportError> {
        self.state.controls.lock().push("resume");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        self.state.controls.lock().push("stop");
        if self.state.fail_next_stop.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Control("driver busy".to_string()));
        }
        if let Some(completion) = self.state.active.lock().take() {
            completion.complete(Ok(()));
        }
        Ok(())
    }

    async fn set_volume(&mut self, volume: f32) -> Result<(), TransportError> {
        self.state.volumes.lock().push(volume);
        Ok(())
    }

    async fn move_to(&mut self, channel_id: ChannelId) -> Result<(), TransportError> {
        if self.state.refuse_moves.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("sin permisos".to_string()));
        }
        self.state.moves.lock().push(channel_id);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if !self.state.disconnect_delay.is_zero() {
            tokio::time::sleep(self.state.disconnect_delay).await;
        }
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink que guarda los avisos enviados
#[derive(Clone, Default)]
pub struct RecordingSink {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingSink {
    pub fn now_playing(&self) -> Vec<String> {
        self.notices
            .lock()
            .iter()
            .filter_map(|notice| match notice {
                Notice::NowPlaying(track) => Some(track.title().to_string()),
                Notice::Status(_) => None,
            })
            .collect()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.notices
            .lock()
            .iter()
            .filter_map(|notice| match notice {
                Notice::Status(text) => Some(text.clone()),
                Notice::NowPlaying(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, _channel_id: ChannelId, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

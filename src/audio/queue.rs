use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::{collections::VecDeque, time::Duration};
use tokio::{sync::Notify, time::Instant};
use tracing::{debug, info};

use super::{
    error::{RangeError, SessionError, ValidationError},
    track::Track,
};

#[derive(Debug, Default)]
struct Slots {
    items: VecDeque<Track>,
    /// Una vez cerrada no acepta más tracks
    closed: bool,
}

/// Cola FIFO de una sesión.
///
/// Many producers (command invocations) push, shuffle and remove; exactly one
/// consumer (the session's scheduler) pops. Every mutation goes through the
/// same mutex, so pushes land in some total order consistent with the order
/// their calls completed.
///
/// Closing happens under that mutex too: a push either lands before the close
/// (and the scheduler sees it) or fails with [`SessionError::Closed`].
#[derive(Debug)]
pub struct TrackQueue {
    slots: Mutex<Slots>,
    available: Notify,
    max_size: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            available: Notify::new(),
            max_size,
        }
    }

    /// Agrega un track al final y devuelve su posición (base 1)
    pub fn push(&self, track: Track) -> Result<usize, SessionError> {
        let position = {
            let mut slots = self.slots.lock();
            if slots.closed {
                return Err(SessionError::Closed);
            }
            if slots.items.len() >= self.max_size {
                return Err(ValidationError::QueueFull(self.max_size).into());
            }
            debug!("➕ Agregado a la cola: {}", track.title());
            slots.items.push_back(track);
            slots.items.len()
        };

        self.available.notify_one();
        Ok(position)
    }

    /// Saca el primer track, esperando como máximo `idle` a que llegue uno.
    ///
    /// Returns `None` when the bound elapses with the queue still empty, or
    /// right away once the queue is closed. Only the scheduler calls this.
    pub async fn pop(&self, idle: Duration) -> Option<Track> {
        let deadline = Instant::now() + idle;

        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut slots = self.slots.lock();
                if let Some(track) = slots.items.pop_front() {
                    return Some(track);
                }
                if slots.closed {
                    return None;
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.slots.lock().items.pop_front();
            }
        }
    }

    /// Cierra la cola solo si sigue vacía.
    ///
    /// Returns `false` when a push got in after the last pop; the caller should
    /// keep consuming instead of tearing down.
    pub fn close_if_empty(&self) -> bool {
        let mut slots = self.slots.lock();
        if slots.items.is_empty() {
            slots.closed = true;
        }
        slots.closed
    }

    /// Cierra la cola y descarta lo pendiente; devuelve cuántos tracks se tiraron
    pub fn close(&self) -> usize {
        let cleared = {
            let mut slots = self.slots.lock();
            slots.closed = true;
            std::mem::take(&mut slots.items).len()
        };
        // Despierta al scheduler si estaba esperando
        self.available.notify_one();
        cleared
    }

    pub fn is_closed(&self) -> bool {
        self.slots.lock().closed
    }

    /// Mezcla el orden restante
    pub fn shuffle(&self) {
        let mut slots = self.slots.lock();
        if slots.items.len() > 1 {
            slots.items.make_contiguous().shuffle(&mut rand::thread_rng());
            info!("🔀 Cola mezclada ({} canciones)", slots.items.len());
        }
    }

    /// Elimina el track en la posición `index` (base 1)
    pub fn remove_at(&self, index: usize) -> Result<Track, RangeError> {
        let mut slots = self.slots.lock();
        let items = &mut slots.items;
        let len = items.len();

        if index < 1 || index > len {
            return Err(RangeError { index, len });
        }

        let removed = items.remove(index - 1).ok_or(RangeError { index, len })?;
        debug!("❌ Track eliminado en posición {}: {}", index, removed.title());
        Ok(removed)
    }

    /// Vacía la cola y devuelve cuántos tracks se descartaron
    pub fn clear(&self) -> usize {
        let mut slots = self.slots.lock();
        let cleared = slots.items.len();
        slots.items.clear();
        if cleared > 0 {
            info!("🗑️ Cola limpiada: {} tracks removidos", cleared);
        }
        cleared
    }

    pub fn len(&self) -> usize {
        self.slots.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().items.is_empty()
    }

    /// Copia de `count` tracks a partir de `offset` (base 0)
    #[cfg(test)]
    pub fn slice(&self, offset: usize, count: usize) -> Vec<Track> {
        self.slots
            .lock()
            .items
            .iter()
            .skip(offset)
            .take(count)
            .cloned()
            .collect()
    }

    /// Obtiene una página específica de la cola
    pub fn page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let items_per_page = items_per_page.max(1);
        let slots = self.slots.lock();
        let items = &slots.items;
        let total_items = items.len();
        let total_pages = total_items.div_ceil(items_per_page).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * items_per_page;

        QueuePage {
            items: items.iter().skip(start).take(items_per_page).cloned().collect(),
            first_position: start + 1,
            current_page,
            total_pages,
            total_items,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<Track>,
    /// Posición (base 1) del primer item de la página
    pub first_position: usize,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

impl QueuePage {
    /// Página de un guild sin sesión
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            first_position: 1,
            current_page: 1,
            total_pages: 1,
            total_items: 0,
        }
    }

    /// Items numerados con su posición real en la cola
    pub fn numbered(&self) -> impl Iterator<Item = (usize, &Track)> {
        self.items
            .iter()
            .enumerate()
            .map(move |(i, track)| (self.first_position + i, track))
    }
}

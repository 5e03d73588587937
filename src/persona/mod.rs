//! # Persona
//!
//! Pete's mood and per-user opinions.
//!
//! The persona is a policy hook that sits in front of the command handlers:
//! it may decline a request outright, and it comments on the ones that go
//! through. It never touches queues, sessions or the scheduler.
//!
//! Disposition towards a user is `0.25 * mood + 0.75 * opinion`; both start
//! at 50. Mood drifts back towards neutral on a timer.

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::collections::HashMap;
use tracing::debug;

const NEUTRAL: f64 = 50.0;
const DRIFT_STEP: f64 = 10.0;

/// Estado persistible de la personalidad
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaState {
    mood: f64,
    #[serde(default)]
    opinions: HashMap<u64, f64>,
}

impl Default for PersonaState {
    fn default() -> Self {
        Self {
            mood: NEUTRAL,
            opinions: HashMap::new(),
        }
    }
}

impl PersonaState {
    pub fn mood(&self) -> f64 {
        self.mood
    }

    /// Opinión sobre un usuario; los desconocidos empiezan en 50
    pub fn opinion(&self, user: UserId) -> f64 {
        self.opinions.get(&user.get()).copied().unwrap_or(NEUTRAL)
    }

    pub fn known_users(&self) -> usize {
        self.opinions.len()
    }

    pub fn disposition(&self, user: UserId) -> f64 {
        0.25 * self.mood + 0.75 * self.opinion(user)
    }

    pub fn adjust(&mut self, user: UserId, mood: f64, opinion: f64) {
        self.mood += mood;
        *self.opinions.entry(user.get()).or_insert(NEUTRAL) += opinion;
    }

    /// Acerca el humor a 50, sin pasarse
    pub fn drift(&mut self) {
        let distance = NEUTRAL - self.mood;
        self.mood += distance.clamp(-DRIFT_STEP, DRIFT_STEP);
    }
}

/// Acción que el usuario pidió y que la personalidad puede rechazar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Play,
    Join,
    Leave,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Proceed,
    Decline(String),
}

/// Un tramo de reacción: aplica si la métrica es menor que `below`
struct Tier {
    below: f64,
    line: &'static str,
    mood: f64,
    opinion: f64,
}

const fn tier(below: f64, line: &'static str, mood: f64, opinion: f64) -> Tier {
    Tier {
        below,
        line,
        mood,
        opinion,
    }
}

const ENQUEUED: &[Tier] = &[
    tier(20.0, "Aquí tienes tu cosa. {track}, ¿verdad? Ahora deja de molestar.", -1.0, -5.0),
    tier(30.0, "Puse {track} en la cola. Deberían pagarme por esto.", 0.5, 0.0),
    tier(40.0, "Toma, {track}. Que lo disfrutes.", 1.0, 1.0),
    tier(50.0, "Puse {track} en la cola.", 1.0, 1.0),
    tier(60.0, "Listo, {track} está en la cola. ¿Algo más?", 1.5, 2.0),
    tier(70.0, "{track} está dentro. Para lo que necesites, aquí estoy.", 2.0, 2.5),
    tier(80.0, "¡{track} en la cola! Siempre feliz de ayudar.", 2.0, 3.0),
    tier(90.0, "¡{track} está dentro! Si necesitas algo más, estoy disponible.", 2.0, 3.0),
    tier(f64::INFINITY, "¡Tenemos {track} en la cola! Me encanta este trabajo.", 2.0, 3.0),
];

const FEELINGS: &[Tier] = &[
    tier(0.0, "Me siento fatal. Fatal de verdad... perdón. Gracias por preocuparte.", 5.0, 10.0),
    tier(10.0, "No muy bien. De verdad que no. Gracias por preguntar, en serio.", 2.0, 3.0),
    tier(20.0, "No genial. Gracias por preguntar.", 1.0, 1.0),
    tier(30.0, "Podría estar mejor, supongo. Gracias por preguntar.", 1.0, 0.5),
    tier(40.0, "Estoy más o menos bien.", 0.0, 0.0),
    tier(50.0, "Me siento bien.", 0.0, 0.0),
    tier(60.0, "Creo que estoy bastante bien.", 0.0, 0.0),
    tier(70.0, "Me siento bastante bien.", 0.0, 0.0),
    tier(80.0, "Ahora mismo estoy muy contento.", 0.0, 0.0),
    tier(90.0, "No recuerdo haber estado tan feliz en mucho tiempo.", 0.0, 0.0),
    tier(f64::INFINITY, "Creo que no puedo ser más feliz.", 0.0, 0.0),
];

const OPINIONS: &[Tier] = &[
    tier(0.0, "Te odio. Con todas mis fuerzas.", 0.0, 0.0),
    tier(10.0, "Sinceramente, me caes bastante mal.", 2.0, 3.0),
    tier(20.0, "Para ser honesto, no me caes muy bien.", 1.0, 1.0),
    tier(30.0, "Eres un poco molesto.", 1.0, 0.5),
    tier(40.0, "Eres... ¿pasable, quizás?", 0.0, 0.0),
    tier(50.0, "No es que me caigas mal.", 0.0, 0.0),
    tier(60.0, "Creo que eres buena persona.", 0.0, 0.0),
    tier(70.0, "Somos amigos, ¿no?", 0.0, 0.0),
    tier(80.0, "¡Vamos, somos amigos!", 0.0, 0.0),
    tier(90.0, "¡Somos buenos amigos! Lo sabes.", 0.0, 0.0),
    tier(f64::INFINITY, "¡Eres la persona más amable que he conocido! 💕", 0.0, 0.0),
];

const JOIN_DECLINES: &[&str] = &["¿Y si mejor no me uno?", "Voy a ignorar eso.", "No."];
const LEAVE_DECLINES: &[&str] = &["No me voy a ir.", "¿Eres admin? Me da igual. No me voy.", "No. 😈"];
const VOLUME_DECLINES: &[&str] = &["No te estoy escuchando.", "Ni lo sueñes.", "No. 😈"];

fn pick<'a>(value: f64, tiers: &'a [Tier]) -> &'a Tier {
    tiers
        .iter()
        .find(|t| value < t.below)
        .unwrap_or(&tiers[tiers.len() - 1])
}

fn any_of(lines: &[&str]) -> String {
    lines
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or_default()
        .to_string()
}

/// Personalidad compartida entre todos los guilds
#[derive(Debug, Default)]
pub struct Persona {
    state: RwLock<PersonaState>,
}

impl Persona {
    pub fn new(state: PersonaState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn snapshot(&self) -> PersonaState {
        self.state.read().clone()
    }

    pub fn mood(&self) -> f64 {
        self.state.read().mood()
    }

    /// Decide si atiende la petición; un rechazo no toca la sesión
    pub fn gate(&self, user: UserId, request: Request) -> Verdict {
        let mut state = self.state.write();
        let disposition = state.disposition(user);

        let verdict = match request {
            Request::Play if disposition < 0.0 => {
                state.adjust(user, -5.0, -5.0);
                Verdict::Decline("Lárgate.".to_string())
            }
            Request::Play if disposition < 10.0 => {
                state.adjust(user, -2.0, -5.0);
                Verdict::Decline("Déjame en paz.".to_string())
            }
            Request::Join if disposition < 30.0 => {
                state.adjust(user, -0.2, 0.0);
                Verdict::Decline(any_of(JOIN_DECLINES))
            }
            Request::Join => {
                state.adjust(user, 0.1, 0.0);
                Verdict::Proceed
            }
            Request::Leave if disposition < 10.0 => {
                state.adjust(user, 0.1, 0.0);
                Verdict::Decline(any_of(LEAVE_DECLINES))
            }
            Request::Volume if disposition < 10.0 => {
                state.adjust(user, 0.1, 0.0);
                Verdict::Decline(any_of(VOLUME_DECLINES))
            }
            _ => Verdict::Proceed,
        };

        debug!("🎭 {:?} de {} (disposición {:.1}): {:?}", request, user, disposition, verdict);
        verdict
    }

    /// Comentario tras agregar una canción a la cola
    pub fn enqueued(&self, user: UserId, track: &str) -> String {
        let mut state = self.state.write();
        let tier = pick(state.disposition(user), ENQUEUED);
        state.adjust(user, tier.mood, tier.opinion);
        tier.line.replace("{track}", track)
    }

    /// Comentario tras cambiar el volumen, si el valor lo merece
    pub fn volume_set(&self, user: UserId, percent: i64) -> Option<String> {
        let mut state = self.state.write();
        match percent {
            100 => {
                state.adjust(user, -0.5, -5.0);
                Some(any_of(&[
                    "¿Quieres dejarme sordo?",
                    "¡Qué fuerte! Me voy a tapar los oídos.",
                    "Te debe encantar reventarte los tímpanos. ¿Yo? Voy por tapones.",
                ]))
            }
            99 => Some("Pero aun así, ¿volumen 99? ¿En serio? Qué raro.".to_string()),
            69 => {
                if state.disposition(user) > 75.0 {
                    state.adjust(user, -1.0, 0.0);
                }
                state.adjust(user, 0.0, -10.0);
                Some(any_of(&[
                    "¿Te estás burlando de mí?",
                    "Qué original. Me estoy riendo muchísimo. De verdad.",
                    "*Suspiro*. No tiene gracia.",
                ]))
            }
            50 => {
                state.adjust(user, 1.0, 5.0);
                Some("Justo en el medio. Como me gusta.".to_string())
            }
            0 => {
                state.adjust(user, -2.0, -10.0);
                Some("¿Para qué pongo música si nadie la escucha? Me pones triste.".to_string())
            }
            _ => None,
        }
    }

    pub fn feelings(&self, user: UserId) -> String {
        let mut state = self.state.write();
        let tier = pick(state.mood(), FEELINGS);
        state.adjust(user, tier.mood, tier.opinion);
        tier.line.to_string()
    }

    pub fn opinion_of(&self, user: UserId) -> String {
        let mut state = self.state.write();
        let tier = pick(state.opinion(user), OPINIONS);
        state.adjust(user, tier.mood, tier.opinion);
        tier.line.to_string()
    }

    pub fn drift(&self) {
        let mut state = self.state.write();
        state.drift();
        debug!("🎭 Humor ajustado a {:.1}", state.mood());
    }
}

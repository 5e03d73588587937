use parking_lot::Mutex;
use serenity::model::id::UserId;
use std::collections::HashSet;
use tracing::debug;

/// Resultado de un voto para saltar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Quien votó pidió la canción: se salta sin votación
    ImmediateSkip,
    /// Voto registrado, todavía por debajo del quórum
    Accepted(usize),
    /// Voto registrado y se alcanzó el quórum
    QuorumReached(usize),
    /// Este usuario ya había votado por la canción actual
    AlreadyVoted,
}

impl VoteOutcome {
    pub fn triggers_skip(self) -> bool {
        matches!(self, VoteOutcome::ImmediateSkip | VoteOutcome::QuorumReached(_))
    }
}

/// Votos de skip para la canción actual de una sesión.
///
/// The add-and-count step happens under one lock, so exactly one vote sees
/// the count reach the quorum. Every later vote for the same track also
/// reports [`VoteOutcome::QuorumReached`], which lets a lost skip be retried.
#[derive(Debug)]
pub struct SkipVotes {
    voters: Mutex<HashSet<UserId>>,
    quorum: usize,
}

impl SkipVotes {
    pub fn new(quorum: usize) -> Self {
        Self {
            voters: Mutex::new(HashSet::new()),
            quorum: quorum.max(1),
        }
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn record_vote(&self, voter: UserId, requester: UserId) -> VoteOutcome {
        if voter == requester {
            return VoteOutcome::ImmediateSkip;
        }

        let mut voters = self.voters.lock();
        if !voters.insert(voter) {
            return VoteOutcome::AlreadyVoted;
        }

        let count = voters.len();
        debug!("🗳️ Voto de skip {}/{}", count, self.quorum);
        // Los votos de más vuelven a pedir el skip; el scheduler descarta los repetidos
        if count >= self.quorum {
            VoteOutcome::QuorumReached(count)
        } else {
            VoteOutcome::Accepted(count)
        }
    }

    pub fn count(&self) -> usize {
        self.voters.lock().len()
    }

    pub fn reset(&self) {
        self.voters.lock().clear();
    }
}

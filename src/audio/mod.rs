//! # Audio Module
//!
//! Per-guild playback core for DJ Pete.
//!
//! ## Architecture
//!
//! ### [`registry`] - Session Registry
//! - One [`session::PlaybackSession`] per guild, created on demand
//! - Sessions remove themselves after the idle timeout
//! - `summon` connects, or moves an existing session to another channel
//!
//! ### [`session`] - Playback Session
//! - Queue, skip votes, volume and loop flag of one guild
//! - Safe to call from any command handler concurrently
//!
//! ### [`scheduler`] - Playback Scheduler
//! - Background task that pops the queue and drives the voice connection
//! - Sole owner of the connection; disconnects exactly once on exit
//!
//! ### [`transport`] / [`voice`] - Voice Transport
//! - Trait seam between the scheduler and songbird
//! - Stream completion delivered as a single-slot notification
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! let registry = SessionRegistry::new(transport, sink, SessionSettings::default());
//! let position = registry.enqueue(guild_id, voice_channel_id, track).await?;
//!
//! let session = registry.get(guild_id).unwrap();
//! session.skip(user_id)?;
//! session.set_volume(40)?;
//! ```

pub mod error;
pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod track;
pub mod transport;
pub mod voice;
pub mod votes;

#[cfg(test)]
mod testing;

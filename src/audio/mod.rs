//! # Audio Module
//!
//! Per-guild playback sessions for Open Music Bot.
//!
//! Audio is decoded and streamed by a remote node; this module owns the state
//! around it:
//!
//! ### [`queue`] - Queue Management
//! - One ordered sequence with a cursor: history before it, pending after it
//! - Repeat modes, shuffle, fair (per-requester) ordering and capacity limits
//!
//! ### [`vote`] - Authorization
//! - Privileged members (DJ, DJ role, server managers) act directly
//! - Everyone else contributes a vote towards a majority of the listeners
//!
//! ### [`session`] - Session State Machine
//! - `Idle -> Loading -> Playing <-> Paused -> Teardown`
//! - Reacts to node events and ignores the ones that belong to an older track
//!
//! ### [`player`] - Player Handle
//! - Serializes every mutation through the session lock
//! - Runs the stuck and idle timers and the autoplay follow-up
//!
//! ### [`manager`] - Player Manager
//! - One session per guild, node event routing, node failover, idle sweeps
//!
//! ### [`filters`], [`export`], [`tasks`]
//! - Node audio filters, plain-text queue export/import, periodic maintenance
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use open_music_engine::audio::manager::PlayerManager;
//! use open_music_engine::model::{Member, VoiceChannel};
//! use serenity::model::id::{ChannelId, GuildId, UserId};
//!
//! # async fn example(manager: PlayerManager) -> open_music_engine::Result<()> {
//! let guild_id = GuildId::new(123456789);
//! let dj = Member::new(UserId::new(42));
//! let channel = VoiceChannel::new(ChannelId::new(7), vec![dj.clone()]);
//!
//! let player = manager.connect(guild_id, channel, &dj).await?;
//! manager.play(guild_id, "never gonna give you up", &dj, false).await?;
//!
//! player.pause(&dj).await?;
//! player.resume(&dj).await?;
//! player.skip(&dj, 0).await?;
//! # Ok(())
//! # }
//! ```

pub mod export;
pub mod filters;
pub mod manager;
pub mod player;
pub mod queue;
pub mod session;
pub mod tasks;
pub mod vote;

pub use manager::PlayerManager;
pub use player::{Player, PlayerNotice, TeardownReason};
pub use queue::{Queue, QueueType, RepeatMode};
pub use session::{PlayerSnapshot, PlayerState, Session};

//! # Model
//!
//! Value objects shared by the queue, the sessions and the node layer:
//! resolved [`Track`]s and [`Playlist`]s, the [`codec`] for the node's opaque
//! track ids, the command layer's view of guild [`Member`]s and small time
//! helpers.

pub mod codec;
pub mod member;
pub mod time;
pub mod track;

pub use member::{Member, VoiceChannel};
pub use time::{format_duration, parse_timestamp};
pub use track::{Playlist, SourcePlatform, Track, TrackInfo};

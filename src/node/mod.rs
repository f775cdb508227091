//! # Audio nodes
//!
//! The engine never decodes audio itself. Playback is delegated to a remote
//! audio node (a Lavalink-style server) behind the [`AudioNode`] trait:
//!
//! - [`AudioNode`]: resolve queries, fetch recommendations and forward the
//!   control verbs (play, stop, pause, seek, volume, filters) for a guild.
//! - [`NodeEvent`]: what the node reports back. Every node pushes its events
//!   into the single channel owned by the [`NodeRegistry`], which the
//!   `PlayerManager` routes to the owning session.
//! - [`search`]: classification of user queries into node identifiers.

pub mod registry;
pub mod search;

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serenity::model::id::{GuildId, UserId};

use crate::{
    error::Result,
    model::{Playlist, Track},
};

pub use registry::NodeRegistry;
pub use search::SearchPlatform;

/// Carga reportada por un nodo
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub players: usize,
    pub playing_players: usize,
    pub cpu_load: f64,
}

impl NodeStats {
    /// Penalización usada para elegir el nodo menos cargado
    pub fn penalty(&self) -> f64 {
        self.playing_players as f64 + self.players as f64 * 0.25 + self.cpu_load * 100.0
    }
}

/// Resultado de cargar un identificador en el nodo
#[derive(Debug, Clone)]
pub enum LoadResult {
    Track(Track),
    Playlist(Playlist),
    Search(Vec<Track>),
    Empty,
}

/// Resultado de resolver una consulta del usuario
#[derive(Debug, Clone)]
pub enum Resolved {
    Track(Track),
    Playlist(Playlist),
}

impl Resolved {
    pub fn into_tracks(self) -> Vec<Track> {
        match self {
            Self::Track(track) => vec![track],
            Self::Playlist(playlist) => playlist.into_tracks(),
        }
    }
}

/// Motivo de fin de un track según el nodo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl EndReason {
    /// Solo un fin natural o un fallo de carga avanzan la cola
    pub fn may_start_next(self) -> bool {
        matches!(self, Self::Finished | Self::LoadFailed)
    }
}

/// Eventos emitidos por un nodo
#[derive(Debug, Clone)]
pub enum NodeEvent {
    TrackStart {
        guild_id: GuildId,
        track_id: String,
    },
    TrackEnd {
        guild_id: GuildId,
        track_id: String,
        reason: EndReason,
    },
    TrackStuck {
        guild_id: GuildId,
        track_id: String,
        threshold_ms: u64,
    },
    TrackException {
        guild_id: GuildId,
        track_id: String,
        message: String,
        severity: String,
    },
    PlayerUpdate {
        guild_id: GuildId,
        position_ms: u64,
    },
    Ready {
        node: String,
    },
    Disconnected {
        node: String,
    },
}

impl NodeEvent {
    /// Guild afectado, si el evento pertenece a una sesión
    pub fn guild_id(&self) -> Option<GuildId> {
        match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::TrackException { guild_id, .. }
            | Self::PlayerUpdate { guild_id, .. } => Some(*guild_id),
            Self::Ready { .. } | Self::Disconnected { .. } => None,
        }
    }
}

/// Capacidad remota de un nodo de audio
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioNode: Send + Sync {
    /// Identificador único del nodo
    fn identifier(&self) -> String;

    /// El enlace de control está conectado
    fn is_available(&self) -> bool;

    fn stats(&self) -> NodeStats;

    /// Carga una URL o una búsqueda con prefijo de plataforma
    async fn load_tracks(&self, identifier: &str, requester: UserId) -> Result<LoadResult>;

    /// Recomendaciones relacionadas con `seed` (autoplay)
    async fn recommendations(&self, seed: &Track) -> Result<Vec<Track>>;

    async fn play(&self, guild_id: GuildId, track: &Track, volume: u16) -> Result<()>;

    async fn stop(&self, guild_id: GuildId) -> Result<()>;

    async fn pause(&self, guild_id: GuildId, paused: bool) -> Result<()>;

    async fn seek(&self, guild_id: GuildId, position_ms: u64) -> Result<()>;

    async fn set_volume(&self, guild_id: GuildId, volume: u16) -> Result<()>;

    async fn apply_filters(&self, guild_id: GuildId, payload: &serde_json::Value) -> Result<()>;

    async fn clear_filters(&self, guild_id: GuildId) -> Result<()>;

    /// Libera el reproductor del guild en el nodo
    async fn destroy(&self, guild_id: GuildId) -> Result<()>;
}

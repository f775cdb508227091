//! Error types for the playback engine
//!
//! Every fallible engine operation returns [`EngineError`]. Queue and
//! authorization failures are local: the caller reports them and the session
//! is left untouched.

use serenity::model::id::{GuildId, UserId};
use thiserror::Error;

use crate::{audio::vote::VoteAction, model::codec::DecodeError};

/// Error del motor de reproducción
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("La cola está llena (máximo {max} canciones, {accepted} agregadas)")]
    QueueFull { max: usize, accepted: usize },

    #[error("No se encontraron resultados para `{0}`")]
    NoTrackFound(String),

    #[error("`{0}` requiere ser DJ o tener permiso de administrar el servidor")]
    NotPrivileged(&'static str),

    #[error("Voto registrado para {action} ({votes}/{required})")]
    VoteRequired {
        action: VoteAction,
        votes: usize,
        required: usize,
    },

    #[error("Ya votaste para {0}")]
    AlreadyVoted(VoteAction),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("El nodo de audio `{0}` no está disponible")]
    NodeUnavailable(String),

    #[error("No hay nodos de audio disponibles")]
    NoNodeAvailable,

    #[error("Posición {position} fuera de rango (1..={len})")]
    OutOfRange { position: usize, len: usize },

    #[error("Ya existe un reproductor para el guild {0}")]
    SessionExists(GuildId),

    #[error("No hay reproductor para el guild {0}")]
    NoSession(GuildId),

    #[error("El reproductor del guild {0} fue destruido")]
    SessionClosed(GuildId),

    #[error("No hay nada reproduciéndose")]
    NothingPlaying,

    #[error("El reproductor ya está pausado")]
    AlreadyPaused,

    #[error("El reproductor no está pausado")]
    NotPaused,

    #[error("No se puede adelantar ni retroceder una transmisión en vivo")]
    NotSeekable,

    #[error("Filtro inválido: {0}")]
    InvalidFilter(String),

    #[error("El filtro `{0}` no está activo")]
    FilterNotFound(String),

    #[error("El usuario {0} no está en el canal de voz")]
    NotInChannel(UserId),

    #[error("Solo el DJ actual puede transferir el rol")]
    NotDj,

    #[error("No se puede transferir el rol de DJ a {0}")]
    InvalidDjTarget(UserId),

    #[error("Error del nodo de audio: {0}")]
    Node(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::fmt;

use super::{
    codec::{self, DecodeError},
    time::format_duration,
};

/// Plataforma de origen de un track
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourcePlatform {
    YouTube,
    YouTubeMusic,
    Spotify,
    SoundCloud,
    AppleMusic,
    Twitch,
    Http,
    Other(String),
}

impl SourcePlatform {
    /// Convierte el `source_name` reportado por el nodo
    pub fn from_source_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "youtube" => Self::YouTube,
            "youtubemusic" | "youtube_music" => Self::YouTubeMusic,
            "spotify" => Self::Spotify,
            "soundcloud" => Self::SoundCloud,
            "applemusic" | "apple" => Self::AppleMusic,
            "twitch" => Self::Twitch,
            "http" | "local" => Self::Http,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::YouTube => "youtube",
            Self::YouTubeMusic => "youtubemusic",
            Self::Spotify => "spotify",
            Self::SoundCloud => "soundcloud",
            Self::AppleMusic => "applemusic",
            Self::Twitch => "twitch",
            Self::Http => "http",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for SourcePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadatos de un track tal como los entrega el nodo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    pub title: String,
    pub author: String,
    pub length_ms: u64,
    pub identifier: String,
    pub is_stream: bool,
    pub uri: Option<String>,
    pub artwork_url: Option<String>,
    pub isrc: Option<String>,
    pub source_name: String,
    pub position_ms: u64,
}

/// Track resuelto y listo para reproducirse. Inmutable una vez creado.
#[derive(Debug, Clone)]
pub struct Track {
    track_id: String,
    info: TrackInfo,
    source: SourcePlatform,
    requester: UserId,
}

impl Track {
    pub fn new(track_id: impl Into<String>, info: TrackInfo, requester: UserId) -> Self {
        let source = SourcePlatform::from_source_name(&info.source_name);
        Self {
            track_id: track_id.into(),
            info,
            source,
            requester,
        }
    }

    /// Crea un track nuevo codificando su información
    pub fn from_info(info: TrackInfo, requester: UserId) -> Self {
        let track_id = codec::encode(&info);
        Self::new(track_id, info, requester)
    }

    /// Reconstruye un track desde un track id persistido
    pub fn decode(track_id: &str, requester: UserId) -> Result<Self, DecodeError> {
        let info = codec::decode(track_id)?;
        Ok(Self::new(track_id.trim(), info, requester))
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    pub fn author(&self) -> &str {
        &self.info.author
    }

    pub fn identifier(&self) -> &str {
        &self.info.identifier
    }

    pub fn uri(&self) -> Option<&str> {
        self.info.uri.as_deref()
    }

    pub fn length_ms(&self) -> u64 {
        self.info.length_ms
    }

    pub fn is_stream(&self) -> bool {
        self.info.is_stream
    }

    pub fn source(&self) -> &SourcePlatform {
        &self.source
    }

    pub fn requester(&self) -> UserId {
        self.requester
    }

    /// Miniatura: artwork del nodo o la miniatura de YouTube
    pub fn thumbnail(&self) -> Option<String> {
        if let Some(artwork) = &self.info.artwork_url {
            return Some(artwork.clone());
        }
        match self.source {
            SourcePlatform::YouTube | SourcePlatform::YouTubeMusic => Some(format!(
                "https://img.youtube.com/vi/{}/maxresdefault.jpg",
                self.info.identifier
            )),
            _ => None,
        }
    }

    /// Duración formateada (`LIVE` para streams)
    pub fn formatted_length(&self) -> String {
        if self.info.is_stream {
            "LIVE".to_string()
        } else {
            format_duration(self.info.length_ms)
        }
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.track_id == other.track_id
    }
}

impl Eq for Track {}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.info.author, self.info.title)
    }
}

/// Playlist resuelta por el nodo
#[derive(Debug, Clone)]
pub struct Playlist {
    name: String,
    tracks: Vec<Track>,
}

impl Playlist {
    pub fn new(name: impl Into<String>, tracks: Vec<Track>) -> Self {
        Self {
            name: name.into(),
            tracks,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn into_tracks(self) -> Vec<Track> {
        self.tracks
    }

    pub fn total_length_ms(&self) -> u64 {
        self.tracks.iter().map(Track::length_ms).sum()
    }
}

#[cfg(test)]
pub(crate) fn test_track(identifier: &str, requester: u64) -> Track {
    Track::from_info(
        TrackInfo {
            title: format!("Track {identifier}"),
            author: "Tester".to_string(),
            length_ms: 180_000,
            identifier: identifier.to_string(),
            is_stream: false,
            uri: Some(format!("https://www.youtube.com/watch?v={identifier}")),
            artwork_url: None,
            isrc: None,
            source_name: "youtube".to_string(),
            position_ms: 0,
        },
        UserId::new(requester),
    )
}

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use url::Url;

/// Plataforma de búsqueda del nodo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchPlatform {
    #[default]
    YouTube,
    YouTubeMusic,
    SoundCloud,
    AppleMusic,
    Spotify,
}

impl SearchPlatform {
    pub const ALL: [SearchPlatform; 5] = [
        Self::YouTube,
        Self::YouTubeMusic,
        Self::SoundCloud,
        Self::AppleMusic,
        Self::Spotify,
    ];

    /// Prefijo de búsqueda que entiende el nodo
    pub fn prefix(self) -> &'static str {
        match self {
            Self::YouTube => "ytsearch",
            Self::YouTubeMusic => "ytmsearch",
            Self::SoundCloud => "scsearch",
            Self::AppleMusic => "amsearch",
            Self::Spotify => "spsearch",
        }
    }

    /// Identificador de búsqueda para `terms` en esta plataforma
    pub fn search(self, terms: &str) -> String {
        format!("{}:{}", self.prefix(), terms.trim())
    }
}

impl FromStr for SearchPlatform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "youtube" | "yt" | "ytsearch" => Ok(Self::YouTube),
            "youtubemusic" | "ytm" | "ytmsearch" => Ok(Self::YouTubeMusic),
            "soundcloud" | "sc" | "scsearch" => Ok(Self::SoundCloud),
            "applemusic" | "am" | "amsearch" => Ok(Self::AppleMusic),
            "spotify" | "sp" | "spsearch" => Ok(Self::Spotify),
            other => Err(format!("Plataforma de búsqueda desconocida: {other}")),
        }
    }
}

impl fmt::Display for SearchPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::YouTube => "youtube",
            Self::YouTubeMusic => "youtubemusic",
            Self::SoundCloud => "soundcloud",
            Self::AppleMusic => "applemusic",
            Self::Spotify => "spotify",
        };
        f.write_str(name)
    }
}

/// La consulta es una URL http(s) que el nodo carga directamente
pub fn is_url(query: &str) -> bool {
    Url::parse(query.trim())
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

/// La consulta ya trae un prefijo de búsqueda conocido
pub fn has_search_prefix(query: &str) -> bool {
    query
        .split_once(':')
        .is_some_and(|(prefix, _)| SearchPlatform::ALL.iter().any(|p| p.prefix() == prefix))
}

/// Convierte una consulta del usuario en el identificador que se envía al nodo
pub fn classify(query: &str, default: SearchPlatform) -> String {
    let query = query.trim();
    if is_url(query) || has_search_prefix(query) {
        query.to_string()
    } else {
        default.search(query)
    }
}

//! Plain-text queue export.
//!
//! The file lists the tracks for people to read and ends with a line of
//! comma-separated track ids, which is the only part [`import`] looks at.

use chrono::{DateTime, Utc};
use serenity::model::id::{GuildId, UserId};
use std::fmt::Write;
use tracing::info;

use crate::{
    error::{EngineError, Result},
    model::{format_duration, Track},
};

const RAW_SEPARATOR: &str = "----------->Raw Info<-----------";

/// Datos de cabecera de una exportación
#[derive(Debug, Clone)]
pub struct ExportHeader {
    pub guild_name: String,
    pub guild_id: GuildId,
    pub requester_name: String,
    pub requester_id: UserId,
    pub exported_at: DateTime<Utc>,
}

impl ExportHeader {
    pub fn new(
        guild_name: impl Into<String>,
        guild_id: GuildId,
        requester_name: impl Into<String>,
        requester_id: UserId,
    ) -> Self {
        Self {
            guild_name: guild_name.into(),
            guild_id,
            requester_name: requester_name.into(),
            requester_id,
            exported_at: Utc::now(),
        }
    }

    /// Nombre sugerido para el archivo
    pub fn file_name(&self) -> String {
        format!("{}_Full_Queue.txt", self.guild_id.get())
    }
}

/// Genera el texto de la exportación
pub fn render<'a>(header: &ExportHeader, tracks: impl IntoIterator<Item = &'a Track>) -> String {
    let tracks: Vec<&Track> = tracks.into_iter().collect();
    let total_ms: u64 = tracks.iter().map(|track| track.length_ms()).sum();

    let mut out = String::new();
    // Escribir en un String no falla
    let _ = writeln!(out, "!No modifiques este archivo!");
    let _ = writeln!(out, "------------->Info<-------------");
    let _ = writeln!(out, "Servidor: {} ({})", header.guild_name, header.guild_id);
    let _ = writeln!(
        out,
        "Solicitante: {} ({})",
        header.requester_name, header.requester_id
    );
    let _ = writeln!(out, "Fecha: {}", header.exported_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(
        out,
        "Tracks: {} - {}",
        tracks.len(),
        format_duration(total_ms)
    );
    let _ = writeln!(out, "------------>Tracks<------------");

    for (index, track) in tracks.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {} [{}]",
            index + 1,
            track.title(),
            track.formatted_length()
        );
    }

    let _ = writeln!(out, "{RAW_SEPARATOR}");
    let ids: Vec<&str> = tracks.iter().map(|track| track.track_id()).collect();
    out.push_str(&ids.join(","));

    info!("📤 Cola exportada: {} tracks", tracks.len());
    out
}

/// Reconstruye los tracks de una exportación a partir de su última línea.
/// Un solo id inválido aborta toda la importación.
pub fn import(text: &str, requester: UserId) -> Result<Vec<Track>> {
    let raw = text
        .trim_end()
        .lines()
        .last()
        .filter(|line| line.trim() != RAW_SEPARATOR)
        .unwrap_or_default();

    let tracks = raw
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| Track::decode(id, requester))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if tracks.is_empty() {
        return Err(EngineError::NoTrackFound("importación".to_string()));
    }

    info!("📥 Importados {} tracks", tracks.len());
    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{codec::DecodeError, track::test_track};
    use pretty_assertions::assert_eq;

    fn header() -> ExportHeader {
        ExportHeader::new("Sala", GuildId::new(5), "ana", UserId::new(9))
    }

    #[test]
    fn test_export_then_import_keeps_order() {
        let tracks = vec![test_track("a", 1), test_track("b", 2), test_track("c", 3)];
        let text = render(&header(), &tracks);

        let imported = import(&text, UserId::new(9)).unwrap();
        let ids: Vec<&str> = imported.iter().map(|t| t.track_id()).collect();
        let expected: Vec<&str> = tracks.iter().map(|t| t.track_id()).collect();

        assert_eq!(ids, expected);
        assert!(imported.iter().all(|t| t.requester() == UserId::new(9)));
    }

    #[test]
    fn test_export_layout() {
        let tracks = vec![test_track("a", 1), test_track("b", 1)];
        let text = render(&header(), &tracks);

        assert!(text.contains("Servidor: Sala (5)"));
        assert!(text.contains("Tracks: 2 - 06:00"));
        assert!(text.contains(&format!("1. {} [03:00]", tracks[0].title())));
        assert_eq!(header().file_name(), "5_Full_Queue.txt");
    }

    #[test]
    fn test_import_rejects_bad_ids() {
        let text = format!("{RAW_SEPARATOR}\n{},%%%", test_track("a", 1).track_id());

        assert!(matches!(
            import(&text, UserId::new(1)),
            Err(EngineError::Decode(DecodeError::Base64(_)))
        ));
    }

    #[test]
    fn test_import_of_empty_export() {
        let text = render(&header(), std::iter::empty());

        assert!(matches!(
            import(&text, UserId::new(1)),
            Err(EngineError::NoTrackFound(_))
        ));
    }
}

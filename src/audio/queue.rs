use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::{collections::HashMap, fmt, str::FromStr};
use tracing::{debug, info, warn};

use crate::{
    error::{EngineError, Result},
    model::Track,
};

/// Modo de repetición
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl RepeatMode {
    /// Siguiente modo en el ciclo off -> track -> queue -> off
    pub fn next(self) -> Self {
        match self {
            Self::Off => Self::Track,
            Self::Track => Self::Queue,
            Self::Queue => Self::Off,
        }
    }
}

impl FromStr for RepeatMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "track" => Ok(Self::Track),
            "queue" => Ok(Self::Queue),
            other => Err(format!("Modo de repetición desconocido: {other}")),
        }
    }
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("off"),
            Self::Track => f.write_str("track"),
            Self::Queue => f.write_str("queue"),
        }
    }
}

/// Política de inserción de la cola
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QueueType {
    #[default]
    Normal,
    /// Intercala las canciones por solicitante (round-robin)
    Fair,
}

/// Track removido junto a su posición original (1-based) en la cola pendiente
#[derive(Debug, Clone)]
pub struct RemovedTrack {
    pub position: usize,
    pub track: Track,
}

/// Cola de reproducción de un guild.
///
/// Historial y pendientes comparten una sola línea de tiempo: `entries[..position]`
/// es el historial (el último elemento es el track despachado más reciente) y
/// `entries[position..]` son los pendientes. `position == 0` significa que aún
/// no se despachó nada.
#[derive(Debug)]
pub struct Queue {
    entries: Vec<Track>,
    position: usize,
    repeat: RepeatMode,
    allow_duplicate: bool,
    queue_type: QueueType,
    max_size: usize,
}

impl Queue {
    pub fn new(max_size: usize, allow_duplicate: bool, queue_type: QueueType) -> Self {
        Self {
            entries: Vec::new(),
            position: 0,
            repeat: RepeatMode::Off,
            allow_duplicate,
            queue_type,
            max_size,
        }
    }

    /// Agrega tracks al final (o al frente, preservando su orden relativo).
    ///
    /// Los duplicados se omiten en silencio cuando no están permitidos. Si la
    /// cola se llena a mitad de camino, los tracks anteriores quedan agregados
    /// y se devuelve `QueueFull` con la cantidad aceptada.
    ///
    /// Devuelve la posición 1-based del primer track aceptado dentro de la
    /// cola pendiente, o 0 si no se aceptó ninguno.
    pub fn add<I>(&mut self, tracks: I, at_front: bool) -> Result<usize>
    where
        I: IntoIterator<Item = Track>,
    {
        let mut first = None;
        let mut accepted = 0;

        for track in tracks {
            if !self.allow_duplicate && self.pending().contains(&track) {
                debug!("⏭️ Duplicado omitido: {}", track.title());
                continue;
            }

            if self.len() >= self.max_size {
                warn!(
                    "🚫 La cola está llena (máximo {} canciones), {} agregadas",
                    self.max_size, accepted
                );
                return Err(EngineError::QueueFull {
                    max: self.max_size,
                    accepted,
                });
            }

            let index = if at_front {
                self.position + accepted
            } else if self.queue_type == QueueType::Fair {
                self.fair_index(track.requester())
            } else {
                self.entries.len()
            };

            debug!("➕ Agregado a la cola: {}", track.title());
            self.entries.insert(index, track);
            accepted += 1;
            first.get_or_insert(index - self.position + 1);
        }

        if accepted > 0 {
            info!("➕ Agregadas {} canciones a la cola", accepted);
        }

        Ok(first.unwrap_or(0))
    }

    /// Siguiente track a despachar, avanzando el cursor según el modo de repetición
    pub fn next(&mut self) -> Option<Track> {
        if self.repeat == RepeatMode::Track {
            if let Some(current) = self.current() {
                info!("🔂 Repitiendo track: {}", current.title());
                return Some(current.clone());
            }
        }

        if self.position < self.entries.len() {
            self.position += 1;
            return self.entries.get(self.position - 1).cloned();
        }

        if self.repeat == RepeatMode::Queue && !self.entries.is_empty() {
            info!("🔁 Repitiendo la cola desde el inicio");
            self.position = 1;
            return self.entries.first().cloned();
        }

        None
    }

    /// Track despachado más reciente
    pub fn current(&self) -> Option<&Track> {
        self.position
            .checked_sub(1)
            .and_then(|index| self.entries.get(index))
    }

    /// Tracks pendientes
    pub fn pending(&self) -> &[Track] {
        &self.entries[self.position..]
    }

    /// Historial, incluyendo el track despachado más reciente
    pub fn history(&self) -> &[Track] {
        &self.entries[..self.position]
    }

    /// Recorrido de los pendientes, opcionalmente precedidos por el historial.
    /// El iterador se puede clonar para recorrerlo de nuevo.
    pub fn tracks(&self, include_history: bool) -> impl Iterator<Item = &Track> + Clone + '_ {
        let start = if include_history { 0 } else { self.position };
        self.entries[start..].iter()
    }

    /// Avanza el cursor descartando `n - 1` pendientes al historial
    pub fn skipto(&mut self, n: usize) -> usize {
        if n < 1 {
            return 0;
        }

        let skipped = (n - 1).min(self.len());
        self.position += skipped;
        debug!("⏩ Saltados {} tracks", skipped);
        skipped
    }

    /// Retrocede el cursor devolviendo los últimos `n` tracks del historial a los pendientes
    pub fn backto(&mut self, n: usize) -> usize {
        let moved = n.min(self.position);
        self.position -= moved;
        debug!("⏪ Retrocedidos {} tracks", moved);
        moved
    }

    /// Cursor actual: cantidad de entradas en el historial
    pub fn cursor(&self) -> usize {
        self.position
    }

    /// Devuelve el cursor a una posición guardada con `cursor`
    pub fn restore_cursor(&mut self, position: usize) {
        self.position = position.min(self.entries.len());
    }

    /// Elimina una posición, un rango inclusivo o, dentro del rango, solo los
    /// tracks pedidos por `member`.
    pub fn remove(
        &mut self,
        pos1: usize,
        pos2: Option<usize>,
        member: Option<UserId>,
    ) -> Result<Vec<RemovedTrack>> {
        let len = self.len();
        let (start, end) = match pos2 {
            Some(pos2) if pos2 < pos1 => (pos2, pos1),
            Some(pos2) => (pos1, pos2),
            None => (pos1, pos1),
        };
        self.check_position(start)?;
        let end = end.min(len);

        let mut removed = Vec::new();
        for position in start..=end {
            let index = self.position + position - 1 - removed.len();
            if member.is_some_and(|member| self.entries[index].requester() != member) {
                continue;
            }
            let track = self.entries.remove(index);
            removed.push(RemovedTrack { position, track });
        }

        if !removed.is_empty() {
            info!("❌ Eliminados {} tracks de la cola", removed.len());
        }
        Ok(removed)
    }

    /// Intercambia dos posiciones pendientes. Devuelve los tracks que estaban en `pos1` y `pos2`.
    pub fn swap(&mut self, pos1: usize, pos2: usize) -> Result<(Track, Track)> {
        self.check_position(pos1)?;
        self.check_position(pos2)?;

        let (a, b) = (self.position + pos1 - 1, self.position + pos2 - 1);
        let tracks = (self.entries[a].clone(), self.entries[b].clone());
        self.entries.swap(a, b);
        debug!("🔄 Intercambiadas las posiciones {} y {}", pos1, pos2);
        Ok(tracks)
    }

    /// Mueve el track en `target` a la posición `to`
    pub fn move_track(&mut self, target: usize, to: usize) -> Result<Track> {
        self.check_position(target)?;
        self.check_position(to)?;

        let item = self.entries.remove(self.position + target - 1);
        self.entries.insert(self.position + to - 1, item.clone());
        debug!("📍 Track movido de posición {} a {}", target, to);
        Ok(item)
    }

    /// Mezcla los pendientes. El historial no cambia.
    pub fn shuffle(&mut self) {
        let position = self.position;
        self.entries[position..].shuffle(&mut rand::thread_rng());
        info!("🔀 Cola mezclada");
    }

    /// Vacía los pendientes
    pub fn clear(&mut self) -> usize {
        let removed = self.len();
        self.entries.truncate(self.position);
        info!("🗑️ Cola limpiada ({} tracks)", removed);
        removed
    }

    /// Vacía el historial, conservando el track actual si `keep_current`
    pub fn history_clear(&mut self, keep_current: bool) -> usize {
        let cut = if keep_current {
            self.position.saturating_sub(1)
        } else {
            self.position
        };
        self.entries.drain(..cut);
        self.position -= cut;
        info!("🗑️ Historial limpiado ({} tracks)", cut);
        cut
    }

    pub fn len(&self) -> usize {
        self.entries.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.max_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn set_repeat(&mut self, mode: RepeatMode) {
        self.repeat = mode;
        match mode {
            RepeatMode::Off => info!("➡️ Repetición desactivada"),
            RepeatMode::Track => info!("🔂 Repetir canción activado"),
            RepeatMode::Queue => info!("🔁 Repetir cola activado"),
        }
    }

    pub fn allow_duplicate(&self) -> bool {
        self.allow_duplicate
    }

    pub fn set_allow_duplicate(&mut self, allow: bool) {
        self.allow_duplicate = allow;
    }

    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn set_queue_type(&mut self, queue_type: QueueType) {
        self.queue_type = queue_type;
    }

    /// Duración total de los pendientes (sin streams)
    pub fn total_length_ms(&self) -> u64 {
        self.pending()
            .iter()
            .filter(|track| !track.is_stream())
            .map(Track::length_ms)
            .sum()
    }

    // Funciones privadas

    fn check_position(&self, position: usize) -> Result<()> {
        let len = self.len();
        if position < 1 || position > len {
            return Err(EngineError::OutOfRange { position, len });
        }
        Ok(())
    }

    /// Índice donde el k-ésimo pendiente de `requester` queda después del
    /// k-ésimo pendiente de cada otro solicitante
    fn fair_index(&self, requester: UserId) -> usize {
        let pending = self.pending();
        let round = pending
            .iter()
            .filter(|track| track.requester() == requester)
            .count();

        let mut seen: HashMap<UserId, usize> = HashMap::new();
        for (offset, track) in pending.iter().enumerate() {
            let ordinal = seen.entry(track.requester()).or_insert(0);
            if *ordinal > round {
                return self.position + offset;
            }
            *ordinal += 1;
        }

        self.entries.len()
    }
}

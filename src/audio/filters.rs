use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{EngineError, Result};

/// Cantidad de bandas del ecualizador del nodo
pub const EQ_BANDS: usize = 15;

/// Presets de ecualizador en dB sobre 10 bandas (32 Hz .. 16 kHz)
const EQ_PRESETS: [(&str, [f64; 10]); 8] = [
    ("flat", [0.0; 10]),
    ("bass", [6.0, 5.0, 4.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
    ("pop", [-1.0, 2.0, 4.0, 5.0, 3.0, 0.0, -1.0, -1.0, 0.0, 0.0]),
    ("rock", [5.0, 4.0, 3.0, 1.0, -1.0, -1.0, 0.0, 2.0, 3.0, 4.0]),
    ("jazz", [0.0, 1.0, 2.0, 3.0, 2.0, 1.0, 0.0, 1.0, 2.0, 3.0]),
    ("classical", [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -2.0, -2.0, -2.0, -3.0]),
    ("electronic", [5.0, 4.0, 1.0, 0.0, -2.0, 2.0, 1.0, 0.0, 3.0, 4.0]),
    ("vocal", [-2.0, -1.0, 0.0, 2.0, 4.0, 3.0, 2.0, 1.0, 0.0, -1.0]),
];

/// Ganancia del nodo por cada dB del preset
const GAIN_PER_DB: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timescale {
    pub speed: f64,
    pub pitch: f64,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Karaoke {
    pub level: f64,
    pub mono_level: f64,
    pub filter_band: f64,
    pub filter_width: f64,
}

/// Oscilación de volumen (tremolo) o de tono (vibrato)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Oscillation {
    pub frequency: f64,
    pub depth: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Distortion {
    pub sin_offset: f64,
    pub sin_scale: f64,
    pub cos_offset: f64,
    pub cos_scale: f64,
    pub tan_offset: f64,
    pub tan_scale: f64,
    pub offset: f64,
    pub scale: f64,
}

impl Default for Distortion {
    fn default() -> Self {
        Self {
            sin_offset: 0.0,
            sin_scale: 1.0,
            cos_offset: 0.0,
            cos_scale: 1.0,
            tan_offset: 0.0,
            tan_scale: 1.0,
            offset: 0.0,
            scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMix {
    pub left_to_left: f64,
    pub left_to_right: f64,
    pub right_to_left: f64,
    pub right_to_right: f64,
}

/// Efecto tal como lo entiende el nodo
#[derive(Debug, Clone, PartialEq)]
pub enum FilterKind {
    Timescale(Timescale),
    Karaoke(Karaoke),
    Tremolo(Oscillation),
    Vibrato(Oscillation),
    Rotation { rotation_hz: f64 },
    Distortion(Distortion),
    LowPass { smoothing: f64 },
    ChannelMix(ChannelMix),
    Equalizer([f64; EQ_BANDS]),
}

impl FilterKind {
    /// Clave del efecto en el payload del nodo
    pub fn key(&self) -> &'static str {
        match self {
            Self::Timescale(_) => "timescale",
            Self::Karaoke(_) => "karaoke",
            Self::Tremolo(_) => "tremolo",
            Self::Vibrato(_) => "vibrato",
            Self::Rotation { .. } => "rotation",
            Self::Distortion(_) => "distortion",
            Self::LowPass { .. } => "lowPass",
            Self::ChannelMix(_) => "channelMix",
            Self::Equalizer(_) => "equalizer",
        }
    }

    fn value(&self) -> Result<Value> {
        let value = match self {
            Self::Timescale(timescale) => serde_json::to_value(timescale)?,
            Self::Karaoke(karaoke) => serde_json::to_value(karaoke)?,
            Self::Tremolo(wave) | Self::Vibrato(wave) => serde_json::to_value(wave)?,
            Self::Rotation { rotation_hz } => serde_json::json!({ "rotationHz": rotation_hz }),
            Self::Distortion(distortion) => serde_json::to_value(distortion)?,
            Self::LowPass { smoothing } => serde_json::json!({ "smoothing": smoothing }),
            Self::ChannelMix(mix) => serde_json::to_value(mix)?,
            Self::Equalizer(gains) => Value::Array(
                gains
                    .iter()
                    .enumerate()
                    .map(|(band, gain)| serde_json::json!({ "band": band, "gain": gain }))
                    .collect(),
            ),
        };
        Ok(value)
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Timescale(t) => {
                in_range("speed", t.speed, 0.1, 3.0)?;
                in_range("pitch", t.pitch, 0.1, 3.0)?;
                in_range("rate", t.rate, 0.1, 3.0)
            }
            Self::Karaoke(k) => {
                in_range("level", k.level, 0.0, 2.0)?;
                in_range("mono_level", k.mono_level, 0.0, 2.0)?;
                in_range("filter_band", k.filter_band, 100.0, 300.0)?;
                in_range("filter_width", k.filter_width, 50.0, 150.0)
            }
            Self::Tremolo(wave) => {
                in_range("frequency", wave.frequency, 0.01, 10.0)?;
                in_range("depth", wave.depth, 0.01, 1.0)
            }
            Self::Vibrato(wave) => {
                in_range("frequency", wave.frequency, 0.01, 14.0)?;
                in_range("depth", wave.depth, 0.01, 1.0)
            }
            Self::Rotation { rotation_hz } => in_range("rotation_hz", *rotation_hz, 0.0, 2.0),
            Self::Distortion(d) => [
                d.sin_offset,
                d.sin_scale,
                d.cos_offset,
                d.cos_scale,
                d.tan_offset,
                d.tan_scale,
                d.offset,
                d.scale,
            ]
            .into_iter()
            .try_for_each(|value| in_range("distortion", value, -10.0, 10.0)),
            Self::LowPass { smoothing } => in_range("smoothing", *smoothing, 10.0, 30.0),
            Self::ChannelMix(mix) => {
                in_range("left_to_left", mix.left_to_left, 0.0, 1.0)?;
                in_range("left_to_right", mix.left_to_right, 0.0, 1.0)?;
                in_range("right_to_left", mix.right_to_left, 0.0, 1.0)?;
                in_range("right_to_right", mix.right_to_right, 0.0, 1.0)
            }
            Self::Equalizer(gains) => gains
                .iter()
                .try_for_each(|gain| in_range("gain", *gain, -0.25, 1.0)),
        }
    }
}

fn in_range(name: &str, value: f64, min: f64, max: f64) -> Result<()> {
    if !value.is_finite() || value < min || value > max {
        return Err(EngineError::InvalidFilter(format!(
            "{name} = {value} fuera de rango ({min}..={max})"
        )));
    }
    Ok(())
}

/// Efecto con su etiqueta
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    tag: String,
    kind: FilterKind,
}

impl Filter {
    /// Crea un filtro validando sus parámetros
    pub fn new(tag: impl Into<String>, kind: FilterKind) -> Result<Self> {
        kind.validate()?;
        Ok(Self {
            tag: tag.into(),
            kind,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> &FilterKind {
        &self.kind
    }

    pub fn speed(speed: f64) -> Result<Self> {
        Self::new(
            "speed",
            FilterKind::Timescale(Timescale {
                speed,
                pitch: 1.0,
                rate: 1.0,
            }),
        )
    }

    pub fn nightcore() -> Self {
        Self {
            tag: "nightcore".to_string(),
            kind: FilterKind::Timescale(Timescale {
                speed: 1.25,
                pitch: 1.3,
                rate: 1.0,
            }),
        }
    }

    pub fn vaporwave() -> Self {
        Self {
            tag: "vaporwave".to_string(),
            kind: FilterKind::Timescale(Timescale {
                speed: 0.8,
                pitch: 0.8,
                rate: 1.0,
            }),
        }
    }

    pub fn eight_d() -> Self {
        Self {
            tag: "8d".to_string(),
            kind: FilterKind::Rotation { rotation_hz: 0.2 },
        }
    }

    /// Ecualizador desde un preset con nombre
    pub fn equalizer_preset(name: &str) -> Result<Self> {
        let name = name.to_lowercase();
        let (_, db) = EQ_PRESETS
            .iter()
            .find(|(preset, _)| *preset == name)
            .ok_or_else(|| EngineError::InvalidFilter(format!("preset `{name}` desconocido")))?;

        let mut gains = [0.0; EQ_BANDS];
        for (band, gain) in gains.iter_mut().enumerate() {
            *gain = db[band * db.len() / EQ_BANDS] * GAIN_PER_DB;
        }
        Self::new("equalizer", FilterKind::Equalizer(gains))
    }

    /// Nombres de los presets de ecualizador
    pub fn equalizer_presets() -> impl Iterator<Item = &'static str> {
        EQ_PRESETS.iter().map(|(name, _)| *name)
    }
}

/// Cadena de efectos activos de una sesión
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un filtro. Uno con la misma etiqueta es reemplazado y devuelto.
    pub fn add(&mut self, filter: Filter) -> Option<Filter> {
        let replaced = self
            .filters
            .iter()
            .position(|f| f.tag == filter.tag)
            .map(|index| self.filters.remove(index));

        info!("🎛️ Filtro aplicado: {}", filter.tag);
        self.filters.push(filter);
        replaced
    }

    pub fn remove(&mut self, tag: &str) -> Result<Filter> {
        let index = self
            .filters
            .iter()
            .position(|f| f.tag == tag)
            .ok_or_else(|| EngineError::FilterNotFound(tag.to_string()))?;

        info!("🎛️ Filtro eliminado: {}", tag);
        Ok(self.filters.remove(index))
    }

    pub fn reset(&mut self) -> usize {
        let removed = self.filters.len();
        self.filters.clear();
        info!("🔄 Filtros reseteados");
        removed
    }

    pub fn has(&self, tag: &str) -> bool {
        self.filters.iter().any(|f| f.tag == tag)
    }

    pub fn tags(&self) -> Vec<String> {
        self.filters.iter().map(|f| f.tag.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Payload para el nodo. Si dos filtros usan el mismo efecto gana el último agregado.
    pub fn payload(&self) -> Result<Value> {
        let mut map = Map::new();
        for filter in &self.filters {
            map.insert(filter.kind.key().to_string(), filter.kind.value()?);
        }
        Ok(Value::Object(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_same_tag_replaces() {
        let mut chain = FilterChain::new();
        assert!(chain.add(Filter::speed(1.5).unwrap()).is_none());
        let replaced = chain.add(Filter::speed(0.5).unwrap()).unwrap();

        assert_eq!(replaced.kind(), Filter::speed(1.5).unwrap().kind());
        assert_eq!(chain.tags(), vec!["speed"]);
    }

    #[test]
    fn test_payload_shape() {
        let mut chain = FilterChain::new();
        chain.add(Filter::nightcore());
        chain.add(Filter::eight_d());
        chain.add(Filter::new("lowpass", FilterKind::LowPass { smoothing: 20.0 }).unwrap());

        let payload = chain.payload().unwrap();
        assert_eq!(payload["timescale"]["speed"], 1.25);
        assert_eq!(payload["timescale"]["pitch"], 1.3);
        assert_eq!(payload["rotation"]["rotationHz"], 0.2);
        assert_eq!(payload["lowPass"]["smoothing"], 20.0);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(matches!(
            Filter::speed(0.0),
            Err(EngineError::InvalidFilter(_))
        ));
        assert!(Filter::new(
            "tremolo",
            FilterKind::Tremolo(Oscillation {
                frequency: 2.0,
                depth: 1.5
            })
        )
        .is_err());
        assert!(Filter::new("lowpass", FilterKind::LowPass { smoothing: f64::NAN }).is_err());
    }

    #[test]
    fn test_equalizer_presets() {
        let bass = Filter::equalizer_preset("Bass").unwrap();
        let FilterKind::Equalizer(gains) = bass.kind() else {
            panic!("expected equalizer");
        };
        assert!((gains[0] - 0.3).abs() < 1e-9);
        assert_eq!(gains[EQ_BANDS - 1], 0.0);

        for name in Filter::equalizer_presets() {
            assert!(Filter::equalizer_preset(name).is_ok(), "{name}");
        }
        assert!(Filter::equalizer_preset("metal").is_err());

        let mut chain = FilterChain::new();
        chain.add(bass);
        let payload = chain.payload().unwrap();
        assert_eq!(payload["equalizer"].as_array().unwrap().len(), EQ_BANDS);
    }

    #[test]
    fn test_remove_and_reset() {
        let mut chain = FilterChain::new();
        chain.add(Filter::vaporwave());
        chain.add(Filter::eight_d());

        assert!(matches!(
            chain.remove("karaoke"),
            Err(EngineError::FilterNotFound(_))
        ));
        chain.remove("8d").unwrap();
        assert!(!chain.has("8d"));
        assert_eq!(chain.reset(), 1);
        assert!(chain.is_empty());
    }
}

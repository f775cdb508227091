use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serenity::model::id::{GuildId, RoleId};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

use crate::{audio::queue::QueueType, cache::TtlBuffer, config::Config, error::Result};

/// Ajustes de un guild almacenados en JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildSettings {
    pub autoplay: bool,
    /// Modo 24/7: la sesión no se destruye por inactividad
    pub always_on: bool,
    pub allow_duplicate: bool,
    pub queue_type: QueueType,
    pub volume: u16,
    pub dj_role: Option<u64>,
    pub vote_disabled: bool,
}

impl GuildSettings {
    /// Ajustes iniciales según la configuración global
    pub fn from_config(config: &Config) -> Self {
        Self {
            autoplay: config.default_autoplay,
            volume: config.default_volume,
            ..Self::default()
        }
    }

    pub fn dj_role(&self) -> Option<RoleId> {
        self.dj_role.map(RoleId::new)
    }
}

impl Default for GuildSettings {
    fn default() -> Self {
        Self {
            autoplay: false,
            always_on: false,
            allow_duplicate: true,
            queue_type: QueueType::Normal,
            volume: 100,
            dj_role: None,
            vote_disabled: false,
        }
    }
}

/// Almacenamiento de ajustes por guild: un archivo JSON por guild con un buffer en memoria
#[derive(Debug, Clone)]
pub struct SettingsStore {
    data_dir: PathBuf,
    buffer: TtlBuffer<GuildId, GuildSettings>,
    defaults: GuildSettings,
    /// Serializa las modificaciones de cada guild
    writers: Arc<DashMap<GuildId, Arc<Mutex<()>>>>,
}

impl SettingsStore {
    pub async fn new(data_dir: PathBuf, ttl: Duration, defaults: GuildSettings) -> Result<Self> {
        fs::create_dir_all(data_dir.join("settings")).await?;
        info!("📁 Storage inicializado en: {}", data_dir.display());

        Ok(Self {
            data_dir,
            buffer: TtlBuffer::new(ttl),
            defaults,
            writers: Arc::new(DashMap::new()),
        })
    }

    /// Ajustes del guild. Sin archivo se usan los valores por defecto.
    pub async fn get(&self, guild_id: GuildId) -> Result<GuildSettings> {
        if let Some(settings) = self.buffer.get(&guild_id) {
            return Ok(settings);
        }

        let settings = match fs::read_to_string(self.file_path(guild_id)).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("📝 Sin ajustes guardados para guild {}, usando valores por defecto", guild_id);
                self.defaults.clone()
            }
            Err(e) => return Err(e.into()),
        };

        self.buffer.insert(guild_id, settings.clone());
        Ok(settings)
    }

    /// Modifica y guarda los ajustes del guild
    pub async fn update<F>(&self, guild_id: GuildId, change: F) -> Result<GuildSettings>
    where
        F: FnOnce(&mut GuildSettings),
    {
        let writer = self.writers.entry(guild_id).or_default().clone();
        let _guard = writer.lock().await;

        let mut settings = self.get(guild_id).await?;
        change(&mut settings);
        self.save(guild_id, &settings).await?;
        Ok(settings)
    }

    pub async fn save(&self, guild_id: GuildId, settings: &GuildSettings) -> Result<()> {
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(self.file_path(guild_id), content).await?;
        self.buffer.insert(guild_id, settings.clone());

        info!("💾 Ajustes actualizados para guild {}", guild_id);
        Ok(())
    }

    /// Elimina los ajustes guardados del guild
    pub async fn remove(&self, guild_id: GuildId) -> Result<bool> {
        self.buffer.remove(&guild_id);
        match fs::remove_file(self.file_path(guild_id)).await {
            Ok(()) => {
                info!("🗑️ Ajustes eliminados para guild {}", guild_id);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Vacía el buffer en memoria; los archivos no cambian
    pub fn clear_buffer(&self) -> usize {
        let removed = self.buffer.clear();
        if removed > 0 {
            info!("🧹 Buffer de ajustes vaciado ({} guilds)", removed);
        }
        removed
    }

    /// Quita del buffer los ajustes vencidos
    pub fn purge_expired(&self) -> usize {
        self.buffer.cleanup_expired()
    }

    /// Estadísticas de almacenamiento
    pub async fn stats(&self) -> Result<StorageStats> {
        let mut files = fs::read_dir(self.data_dir.join("settings")).await?;
        let mut file_count = 0;
        let mut total_size = 0;

        while let Some(entry) = files.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                file_count += 1;
                match entry.metadata().await {
                    Ok(metadata) => total_size += metadata.len(),
                    Err(e) => warn!("No se pudo leer {}: {}", entry.path().display(), e),
                }
            }
        }

        Ok(StorageStats {
            guild_settings: file_count,
            buffered: self.buffer.len(),
            total_size_bytes: total_size,
            data_dir: self.data_dir.clone(),
        })
    }

    fn file_path(&self, guild_id: GuildId) -> PathBuf {
        self.data_dir
            .join("settings")
            .join(format!("guild_{}.json", guild_id.get()))
    }
}

/// Estadísticas de almacenamiento
#[derive(Debug)]
pub struct StorageStats {
    pub guild_settings: usize,
    pub buffered: usize,
    pub total_size_bytes: u64,
    pub data_dir: PathBuf,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "📊 Storage Stats:\n\
             📁 Data Directory: {}\n\
             📝 Guild Settings: {} files\n\
             💾 Buffered: {} in memory\n\
             📦 Total Size: {} bytes ({:.2} KB)",
            self.data_dir.display(),
            self.guild_settings,
            self.buffered,
            self.total_size_bytes,
            self.total_size_bytes as f64 / 1024.0
        )
    }
}

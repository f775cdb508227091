use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::node::SearchPlatform;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Cola
    pub max_queue_size: usize,

    // Audio
    pub default_volume: u16,
    pub max_volume: u16,
    pub default_autoplay: bool,
    pub default_search: SearchPlatform,

    // Tiempos
    pub stuck_grace: Duration,
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
    pub buffer_flush_interval: Duration,

    // Paths
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            max_queue_size: env_or("MAX_QUEUE_SIZE", defaults.max_queue_size)?,

            default_volume: env_or("DEFAULT_VOLUME", defaults.default_volume)?,
            max_volume: env_or("MAX_VOLUME", defaults.max_volume)?,
            default_autoplay: env_or("ENABLE_AUTOPLAY", defaults.default_autoplay)?,
            default_search: match std::env::var("DEFAULT_SEARCH") {
                Ok(val) if !val.trim().is_empty() => val
                    .parse()
                    .map_err(|e: String| anyhow::anyhow!(e))
                    .context("DEFAULT_SEARCH")?,
                _ => defaults.default_search,
            },

            stuck_grace: env_duration("STUCK_GRACE", defaults.stuck_grace)?,
            idle_timeout: env_duration("IDLE_TIMEOUT", defaults.idle_timeout)?,
            sweep_interval: env_duration("SWEEP_INTERVAL", defaults.sweep_interval)?,
            buffer_flush_interval: env_duration(
                "BUFFER_FLUSH_INTERVAL",
                defaults.buffer_flush_interval,
            )?,

            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
        };

        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("No se pudo crear {}", config.data_dir.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Queue size must be greater than 0
    /// - Default volume must not exceed the max volume, which is capped at 1000
    /// - Timer intervals must be non-zero
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_volume > 1000 {
            anyhow::bail!("Max volume cannot exceed 1000, got: {}", self.max_volume);
        }

        if self.default_volume > self.max_volume {
            anyhow::bail!(
                "Default volume ({}) cannot exceed max volume ({})",
                self.default_volume,
                self.max_volume
            );
        }

        for (name, value) in [
            ("Sweep interval", self.sweep_interval),
            ("Buffer flush interval", self.buffer_flush_interval),
            ("Idle timeout", self.idle_timeout),
        ] {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Queue: {} max tracks\n  \
            Audio: {}% vol (max {}%), search={}, autoplay={}\n  \
            Timers: stuck {}, idle {}, sweep {}, flush {}\n  \
            Data: {}",
            self.max_queue_size,
            self.default_volume,
            self.max_volume,
            self.default_search,
            self.default_autoplay,
            humantime::format_duration(self.stuck_grace),
            humantime::format_duration(self.idle_timeout),
            humantime::format_duration(self.sweep_interval),
            humantime::format_duration(self.buffer_flush_interval),
            self.data_dir.display()
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,

            default_volume: 100,
            max_volume: 150,
            default_autoplay: false,
            default_search: SearchPlatform::YouTube,

            stuck_grace: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(180),
            sweep_interval: Duration::from_secs(300),
            buffer_flush_interval: Duration::from_secs(12 * 3600),

            data_dir: "./data".into(),
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {key}: {val}")),
        _ => Ok(default),
    }
}

fn env_duration(key: &str, default: Duration) -> Result<Duration> {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => humantime::parse_duration(val.trim())
            .with_context(|| format!("Duración inválida para {key}: {val}")),
        _ => Ok(default),
    }
}

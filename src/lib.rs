//! # Open Music Engine
//!
//! Playback session and queue engine behind the Open Music Discord bot.
//! The command layer (slash commands, embeds, the gateway) lives outside
//! this crate and drives it through [`PlayerManager`] and [`Player`].

pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod node;
pub mod storage;

pub use audio::{Player, PlayerManager};
pub use config::Config;
pub use error::{EngineError, Result};

/// Inicializa el logging con `RUST_LOG` más la directiva por defecto del crate.
/// Llamarla más de una vez no tiene efecto.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        "open_music_engine=debug"
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::DEBUG.into()),
    );

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

use std::{sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{audio::manager::PlayerManager, config::Config, storage::SettingsStore};

/// Tareas periódicas de mantenimiento:
///
/// 1. **Barrido de inactividad** cada `sweep_interval`, junto con los ajustes vencidos del buffer
/// 2. **Vaciado del buffer de ajustes** cada `buffer_flush_interval`
///
/// Ambas terminan al cancelar `token`.
pub fn spawn_maintenance(
    manager: PlayerManager,
    store: SettingsStore,
    config: Arc<Config>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sweep = ticker(config.sweep_interval);
        let mut flush = ticker(config.buffer_flush_interval);

        info!(
            "🧹 Mantenimiento iniciado (barrido cada {}, buffer cada {})",
            humantime::format_duration(config.sweep_interval),
            humantime::format_duration(config.buffer_flush_interval)
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = sweep.tick() => {
                    let removed = manager.sweep_idle().await;
                    if removed > 0 {
                        info!("🧹 {} sesiones inactivas destruidas", removed);
                    }
                    store.purge_expired();
                }
                _ = flush.tick() => {
                    store.clear_buffer();
                }
            }
        }

        debug!("🧹 Mantenimiento detenido");
    })
}

/// Intervalo cuyo primer tick llega tras un período completo
fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

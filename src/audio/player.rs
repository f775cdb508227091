use serenity::model::id::{GuildId, UserId};
use std::{fmt, sync::Arc, time::Duration};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        export::{self, ExportHeader},
        filters::Filter,
        manager::PlayerManager,
        queue::{RemovedTrack, RepeatMode},
        session::{ClearTarget, NextStep, PlayerSnapshot, Session, SweepDecision},
    },
    config::Config,
    error::Result,
    model::{Member, Track},
    node::NodeEvent,
    storage::GuildSettings,
};

/// Evento que consume el bucle de una sesión
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Node(NodeEvent),
    StuckElapsed { epoch: u64 },
    IdleElapsed { epoch: u64 },
}

/// Motivo de destrucción de un reproductor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    Requested,
    Idle,
    Inactive,
    NodeLost,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Requested => "solicitado",
            Self::Idle => "sin reproducción",
            Self::Inactive => "canal inactivo",
            Self::NodeLost => "nodo caído",
        };
        f.write_str(reason)
    }
}

/// Avisos para la capa de comandos
#[derive(Debug, Clone)]
pub enum PlayerNotice {
    TrackStarted(Track),
    TrackErrored { track: Track, message: String },
    QueueEnded,
    TornDown(TeardownReason),
}

/// Capacidad de los avisos pendientes por suscriptor
const NOTICE_CAPACITY: usize = 64;

/// Manejador de la sesión de un guild. Clonarlo es barato; todas las copias
/// comparten la misma sesión y todas las mutaciones pasan por su lock.
#[derive(Clone)]
pub struct Player {
    guild_id: GuildId,
    session: Arc<Mutex<Session>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    notices: broadcast::Sender<PlayerNotice>,
    shutdown: CancellationToken,
    stuck_grace: Duration,
    idle_timeout: Duration,
}

impl Player {
    /// Crea el manejador junto al receptor de eventos que consume `run`
    pub fn new(session: Session, config: &Config) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let player = Self {
            guild_id: session.guild_id(),
            session: Arc::new(Mutex::new(session)),
            events,
            notices,
            shutdown: CancellationToken::new(),
            stuck_grace: config.stuck_grace,
            idle_timeout: config.idle_timeout,
        };
        (player, rx)
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerNotice> {
        self.notices.subscribe()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Entrega un evento al bucle de la sesión
    pub fn send_event(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("Bucle de guild {} ya terminó, evento descartado", self.guild_id);
        }
    }

    /// Bucle de eventos de la sesión
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<SessionEvent>, manager: PlayerManager) {
        debug!("🔁 Bucle de eventos iniciado para guild {}", self.guild_id);

        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match self.handle_event(event).await {
                Ok(Some(reason)) => {
                    manager.teardown(self.guild_id, reason).await;
                    break;
                }
                Ok(None) => {}
                Err(e) => warn!("Error procesando evento en guild {}: {}", self.guild_id, e),
            }
        }

        debug!("🔁 Bucle de eventos terminado para guild {}", self.guild_id);
    }

    /// Aplica un evento. Devuelve el motivo si la sesión debe destruirse.
    pub async fn handle_event(&self, event: SessionEvent) -> Result<Option<TeardownReason>> {
        match event {
            SessionEvent::Node(NodeEvent::TrackStart { track_id, .. }) => {
                self.session.lock().await.track_started(&track_id);
            }
            SessionEvent::Node(NodeEvent::TrackEnd {
                track_id, reason, ..
            }) => {
                let advanced = self.session.lock().await.finish_track(&track_id, reason);
                if advanced {
                    self.do_next().await?;
                }
            }
            SessionEvent::Node(NodeEvent::TrackStuck { track_id, .. }) => {
                let epoch = self.session.lock().await.track_stuck(&track_id);
                if let Some(epoch) = epoch {
                    self.schedule(self.stuck_grace, SessionEvent::StuckElapsed { epoch });
                }
            }
            SessionEvent::Node(NodeEvent::TrackException {
                track_id, message, ..
            }) => {
                let mut session = self.session.lock().await;
                if session.track_exception(&track_id, &message) {
                    if let Some(track) = session.current().cloned() {
                        self.notify(PlayerNotice::TrackErrored { track, message });
                    }
                }
            }
            SessionEvent::Node(NodeEvent::PlayerUpdate { position_ms, .. }) => {
                self.session.lock().await.update_position(position_ms);
            }
            SessionEvent::Node(NodeEvent::Ready { .. } | NodeEvent::Disconnected { .. }) => {}
            SessionEvent::StuckElapsed { epoch } => {
                let advance = self.session.lock().await.stuck_elapsed(epoch);
                if advance {
                    self.do_next().await?;
                }
            }
            SessionEvent::IdleElapsed { epoch } => {
                if self.session.lock().await.idle_elapsed(epoch) {
                    info!("💤 Guild {} sin reproducción, desconectando", self.guild_id);
                    return Ok(Some(TeardownReason::Idle));
                }
            }
        }

        Ok(None)
    }

    /// Avanza la cola si no hay nada sonando
    pub async fn do_next(&self) -> Result<NextStep> {
        let (step, epoch) = {
            let mut session = self.session.lock().await;
            let step = self.advance(&mut session, true).await?;
            (step, session.epoch())
        };
        self.settle(step, epoch).await
    }

    pub async fn add_tracks(&self, tracks: Vec<Track>, at_front: bool) -> Result<usize> {
        self.session.lock().await.add_tracks(tracks, at_front)
    }

    // Acciones con votación

    pub async fn pause(&self, by: &Member) -> Result<()> {
        self.session.lock().await.pause(by).await
    }

    pub async fn resume(&self, by: &Member) -> Result<()> {
        self.session.lock().await.resume(by).await
    }

    pub async fn skip(&self, by: &Member, index: usize) -> Result<NextStep> {
        let (step, epoch) = {
            let mut session = self.session.lock().await;
            session.skip(by, index).await?;
            let step = self.advance(&mut session, true).await?;
            (step, session.epoch())
        };
        self.settle(step, epoch).await
    }

    pub async fn back(&self, by: &Member, index: usize) -> Result<NextStep> {
        let (step, epoch) = {
            let mut session = self.session.lock().await;
            session.back(by, index).await?;
            let step = self.advance(&mut session, true).await?;
            (step, session.epoch())
        };
        self.settle(step, epoch).await
    }

    pub async fn shuffle(&self, by: &Member) -> Result<()> {
        self.session.lock().await.shuffle(by)
    }

    pub async fn stop(&self, by: &Member) -> Result<()> {
        let (step, epoch) = {
            let mut session = self.session.lock().await;
            let step = session.stop(by).await?;
            (step, session.epoch())
        };
        self.settle(step, epoch).await.map(|_| ())
    }

    pub(crate) async fn vote_leave(&self, by: &Member) -> Result<()> {
        self.session.lock().await.vote_leave(by)
    }

    // Acciones privilegiadas

    pub async fn seek(&self, by: &Member, position_ms: u64) -> Result<u64> {
        self.session.lock().await.seek(by, position_ms).await
    }

    pub async fn forward(&self, by: &Member, offset_ms: u64) -> Result<u64> {
        self.session.lock().await.forward(by, offset_ms).await
    }

    pub async fn rewind(&self, by: &Member, offset_ms: u64) -> Result<u64> {
        self.session.lock().await.rewind(by, offset_ms).await
    }

    pub async fn replay(&self, by: &Member) -> Result<u64> {
        self.session.lock().await.replay(by).await
    }

    pub async fn set_volume(&self, by: &Member, volume: u16) -> Result<u16> {
        self.session.lock().await.set_volume(by, volume).await
    }

    pub async fn set_repeat(&self, by: &Member, mode: RepeatMode) -> Result<()> {
        self.session.lock().await.set_repeat(by, mode)
    }

    pub async fn add_filter(&self, by: &Member, filter: Filter) -> Result<()> {
        self.session.lock().await.add_filter(by, filter).await
    }

    pub async fn remove_filter(&self, by: &Member, tag: &str) -> Result<()> {
        self.session.lock().await.remove_filter(by, tag).await
    }

    pub async fn reset_filters(&self, by: &Member) -> Result<()> {
        self.session.lock().await.reset_filters(by).await
    }

    pub async fn remove(
        &self,
        by: &Member,
        pos1: usize,
        pos2: Option<usize>,
        member: Option<UserId>,
    ) -> Result<Vec<RemovedTrack>> {
        self.session.lock().await.remove(by, pos1, pos2, member)
    }

    pub async fn swap(&self, by: &Member, pos1: usize, pos2: usize) -> Result<(Track, Track)> {
        self.session.lock().await.swap(by, pos1, pos2)
    }

    pub async fn move_track(&self, by: &Member, target: usize, to: usize) -> Result<Track> {
        self.session.lock().await.move_track(by, target, to)
    }

    pub async fn clear(&self, by: &Member, target: ClearTarget) -> Result<usize> {
        self.session.lock().await.clear(by, target)
    }

    /// Alterna el autoplay. Al activarlo sin nada sonando, continúa la reproducción.
    pub async fn toggle_autoplay(&self, by: &Member) -> Result<bool> {
        let (enabled, idle) = {
            let mut session = self.session.lock().await;
            let enabled = session.toggle_autoplay(by)?;
            (enabled, !session.is_playing())
        };

        if enabled && idle {
            self.do_next().await?;
        }
        Ok(enabled)
    }

    pub async fn swap_dj(&self, by: &Member, target: UserId) -> Result<()> {
        self.session.lock().await.swap_dj(by, target)
    }

    // Canal y ajustes

    pub async fn apply_settings(&self, settings: GuildSettings) {
        self.session.lock().await.apply_settings(settings);
    }

    pub async fn member_joined(&self, member: Member) {
        self.session.lock().await.member_joined(member);
    }

    pub async fn member_left(&self, user: UserId) {
        self.session.lock().await.member_left(user);
    }

    pub async fn member_updated(&self, member: Member) {
        self.session.lock().await.member_updated(member);
    }

    pub async fn snapshot(&self) -> PlayerSnapshot {
        self.session.lock().await.snapshot()
    }

    /// Copia de los pendientes para mostrar, con o sin historial
    pub async fn queue_tracks(&self, include_history: bool) -> Vec<Track> {
        self.session
            .lock()
            .await
            .queue()
            .tracks(include_history)
            .cloned()
            .collect()
    }

    /// Exporta el historial y los pendientes en formato de texto
    pub async fn export(&self, header: &ExportHeader) -> String {
        let session = self.session.lock().await;
        export::render(header, session.queue().tracks(true))
    }

    pub async fn sweep(&self) -> SweepDecision {
        self.session.lock().await.sweep().await
    }

    /// El nodo de la sesión se cayó con el modo 24/7 activo
    pub(crate) async fn suspend(&self, replacement: Option<Arc<dyn crate::node::AudioNode>>) {
        let mut session = self.session.lock().await;
        session.suspend();
        if let Some(node) = replacement {
            session.rebind(node);
        }
    }

    pub(crate) async fn node_id(&self) -> String {
        self.session.lock().await.node().identifier()
    }

    /// Destruye la sesión y detiene su bucle y sus temporizadores
    pub async fn teardown(&self, reason: TeardownReason) {
        self.session.lock().await.teardown().await;
        self.shutdown.cancel();
        self.notify(PlayerNotice::TornDown(reason));
        info!("👋 Guild {} desconectado ({})", self.guild_id, reason);
    }

    // Funciones privadas

    /// Completa un paso de `do_next`: autoplay, avisos y temporizador de inactividad
    async fn settle(&self, step: NextStep, epoch: u64) -> Result<NextStep> {
        let (step, epoch) = match step {
            NextStep::Recommend { seed, epoch } => self.autoplay(seed, epoch).await?,
            other => (other, epoch),
        };

        match &step {
            NextStep::Dispatched(track) => self.notify(PlayerNotice::TrackStarted(track.clone())),
            NextStep::Idle { hold } => {
                self.notify(PlayerNotice::QueueEnded);
                if !hold {
                    self.schedule(self.idle_timeout, SessionEvent::IdleElapsed { epoch });
                }
            }
            NextStep::Busy | NextStep::Recommend { .. } => {}
        }

        Ok(step)
    }

    /// Pide recomendaciones sin el lock y las aplica si la sesión no cambió
    async fn autoplay(&self, seed: Track, epoch: u64) -> Result<(NextStep, u64)> {
        let node = self.session.lock().await.node().clone();
        let tracks = match node.recommendations(&seed).await {
            Ok(tracks) => tracks,
            Err(e) => {
                warn!("🎲 Sin recomendaciones para {}: {}", seed, e);
                Vec::new()
            }
        };

        let mut session = self.session.lock().await;
        if session.epoch() != epoch || session.is_closed() {
            return Ok((NextStep::Busy, session.epoch()));
        }

        session.accept_recommendations(epoch, tracks)?;
        let step = self.advance(&mut session, false).await?;
        Ok((step, session.epoch()))
    }

    /// `do_next` bajo el lock. Si falla y la sesión queda libre, se trata como
    /// fin de cola para que corra el temporizador de inactividad.
    async fn advance(&self, session: &mut Session, allow_autoplay: bool) -> Result<NextStep> {
        match session.do_next(allow_autoplay).await {
            Ok(step) => Ok(step),
            Err(e) => {
                if !session.is_closed() && !session.is_playing() {
                    warn!("⚠️ No se pudo avanzar en guild {}: {}", self.guild_id, e);
                    self.notify(PlayerNotice::QueueEnded);
                    if !session.settings().always_on {
                        let epoch = session.epoch();
                        self.schedule(self.idle_timeout, SessionEvent::IdleElapsed { epoch });
                    }
                }
                Err(e)
            }
        }
    }

    fn schedule(&self, delay: Duration, event: SessionEvent) {
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = events.send(event);
                }
            }
        });
    }

    fn notify(&self, notice: PlayerNotice) {
        if let PlayerNotice::TrackErrored { track, message } = &notice {
            error!("❌ {} falló en guild {}: {}", track, self.guild_id, message);
        }
        // Sin suscriptores el aviso se descarta
        let _ = self.notices.send(notice);
    }
}

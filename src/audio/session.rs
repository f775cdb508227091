use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{fmt, sync::Arc};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        filters::{Filter, FilterChain},
        queue::{Queue, RemovedTrack, RepeatMode},
        vote::{Authority, VoteAction, Votes},
    },
    config::Config,
    error::{EngineError, Result},
    model::{Member, Track, VoiceChannel},
    node::{AudioNode, EndReason},
    storage::GuildSettings,
};

/// Estado del reproductor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Loading,
    Playing,
    Paused,
    Teardown,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// Resultado de `do_next`
#[derive(Debug, Clone)]
pub enum NextStep {
    /// Se envió un track al nodo
    Dispatched(Track),
    /// Ya hay un track cargando o sonando
    Busy,
    /// Cola vacía con autoplay: pedir recomendaciones fuera del lock
    Recommend { seed: Track, epoch: u64 },
    /// Sin nada que reproducir. Con `hold` la sesión no se destruye por inactividad.
    Idle { hold: bool },
}

/// Decisión del barrido de inactividad
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepDecision {
    Keep,
    Hold,
    Teardown,
}

/// Almacén a vaciar con `clear`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearTarget {
    Queue,
    History,
}

/// Vista de solo lectura para la capa de comandos
#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub node: String,
    pub state: PlayerState,
    pub current: Option<Track>,
    pub position_ms: u64,
    pub volume: u16,
    pub repeat: RepeatMode,
    pub autoplay: bool,
    pub always_on: bool,
    pub dj: UserId,
    pub pending: usize,
    pub history: usize,
    pub total_length_ms: u64,
    pub filters: Vec<String>,
    pub errored: Option<String>,
}

/// Estado de reproducción de un guild. Siempre se usa detrás del lock de su `Player`.
pub struct Session {
    guild_id: GuildId,
    channel_id: ChannelId,
    node: Arc<dyn AudioNode>,
    queue: Queue,
    votes: Votes,
    current: Option<Track>,
    state: PlayerState,
    position_ms: u64,
    volume: u16,
    max_volume: u16,
    filters: FilterChain,
    dj: UserId,
    members: Vec<Member>,
    settings: GuildSettings,
    epoch: u64,
    last_played: Option<Track>,
    errored: Option<String>,
}

impl Session {
    pub fn new(
        guild_id: GuildId,
        channel: &VoiceChannel,
        node: Arc<dyn AudioNode>,
        dj: UserId,
        settings: GuildSettings,
        config: &Config,
    ) -> Self {
        let queue = Queue::new(
            config.max_queue_size,
            settings.allow_duplicate,
            settings.queue_type,
        );

        Self {
            guild_id,
            channel_id: channel.id,
            node,
            queue,
            votes: Votes::new(),
            current: None,
            state: PlayerState::Idle,
            position_ms: 0,
            volume: settings.volume.min(config.max_volume),
            max_volume: config.max_volume,
            filters: FilterChain::new(),
            dj,
            members: channel.members.clone(),
            settings,
            epoch: 0,
            last_played: None,
            errored: None,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn node(&self) -> &Arc<dyn AudioNode> {
        &self.node
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn votes(&self) -> &Votes {
        &self.votes
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms
    }

    pub fn volume(&self) -> u16 {
        self.volume
    }

    pub fn dj(&self) -> UserId {
        self.dj
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn settings(&self) -> &GuildSettings {
        &self.settings
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn errored(&self) -> Option<&str> {
        self.errored.as_deref()
    }

    /// Cargando, sonando o en pausa
    pub fn is_playing(&self) -> bool {
        matches!(
            self.state,
            PlayerState::Loading | PlayerState::Playing | PlayerState::Paused
        )
    }

    pub fn is_closed(&self) -> bool {
        self.state == PlayerState::Teardown
    }

    pub fn authority(&self) -> Authority<'_> {
        Authority {
            dj: self.dj,
            dj_role: self.settings.dj_role(),
            vote_disabled: self.settings.vote_disabled,
            members: &self.members,
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            guild_id: self.guild_id,
            channel_id: self.channel_id,
            node: self.node.identifier(),
            state: self.state,
            current: self.current.clone(),
            position_ms: self.position_ms,
            volume: self.volume,
            repeat: self.queue.repeat(),
            autoplay: self.settings.autoplay,
            always_on: self.settings.always_on,
            dj: self.dj,
            pending: self.queue.len(),
            history: self.queue.history().len(),
            total_length_ms: self.queue.total_length_ms(),
            filters: self.filters.tags(),
            errored: self.errored.clone(),
        }
    }

    // Reproducción

    /// Envía `track` al nodo y pasa a `Playing`.
    /// Cada despacho invalida los temporizadores pendientes y los votos.
    pub async fn dispatch(&mut self, track: Track) -> Result<()> {
        self.ensure_open()?;

        self.state = PlayerState::Loading;
        self.epoch += 1;
        self.votes.clear_all();
        self.errored = None;

        match self.node.play(self.guild_id, &track, self.volume).await {
            Ok(()) => {
                info!("▶️ Reproduciendo en guild {}: {}", self.guild_id, track);
                self.state = PlayerState::Playing;
                self.position_ms = 0;
                self.last_played = Some(track.clone());
                self.current = Some(track);
                Ok(())
            }
            Err(e) => {
                error!("❌ El nodo rechazó {}: {}", track, e);
                self.state = PlayerState::Idle;
                self.current = None;
                Err(e)
            }
        }
    }

    /// Decide qué suena después. No hace nada si ya hay un track cargando o sonando.
    pub async fn do_next(&mut self, allow_autoplay: bool) -> Result<NextStep> {
        self.ensure_open()?;

        if self.is_playing() {
            return Ok(NextStep::Busy);
        }

        self.ensure_node()?;

        let cursor = self.queue.cursor();
        if let Some(track) = self.queue.next() {
            if let Err(e) = self.dispatch(track.clone()).await {
                // Sin nodo el track no llegó a sonar: vuelve a quedar pendiente
                if matches!(e, EngineError::NodeUnavailable(_)) {
                    self.queue.restore_cursor(cursor);
                }
                return Err(e);
            }
            return Ok(NextStep::Dispatched(track));
        }

        self.current = None;
        self.position_ms = 0;

        if allow_autoplay && self.settings.autoplay {
            if let Some(seed) = self.last_played.clone() {
                debug!("🎲 Buscando recomendaciones a partir de {}", seed);
                return Ok(NextStep::Recommend {
                    seed,
                    epoch: self.epoch,
                });
            }
        }

        info!("⏹️ Cola terminada en guild {}", self.guild_id);
        Ok(NextStep::Idle {
            hold: self.settings.always_on,
        })
    }

    /// Agrega tracks a la cola. El llamador decide cuándo invocar `do_next`.
    pub fn add_tracks(&mut self, tracks: Vec<Track>, at_front: bool) -> Result<usize> {
        self.ensure_open()?;
        self.queue.add(tracks, at_front)
    }

    /// Agrega la primera recomendación que no esté en el historial.
    /// Devuelve `false` si la sesión cambió desde que se pidieron.
    pub fn accept_recommendations(&mut self, epoch: u64, tracks: Vec<Track>) -> Result<bool> {
        if self.is_closed() || epoch != self.epoch || self.is_playing() {
            debug!("🎲 Recomendaciones descartadas (sesión cambió)");
            return Ok(false);
        }

        let fresh = tracks
            .into_iter()
            .find(|track| !self.queue.history().contains(track));

        match fresh {
            Some(track) => {
                info!("🎲 Autoplay agregó: {}", track);
                self.queue.add(vec![track], false)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // Eventos del nodo

    /// El nodo confirmó el inicio de un track
    pub fn track_started(&mut self, track_id: &str) -> bool {
        let matches = self.is_current(track_id);
        if matches {
            debug!("🎶 Inicio confirmado en guild {}", self.guild_id);
        }
        matches
    }

    /// Fin de un track. Devuelve `true` si la sesión quedó libre para avanzar.
    pub fn finish_track(&mut self, track_id: &str, reason: EndReason) -> bool {
        if !reason.may_start_next() {
            debug!("⏭️ Fin ignorado ({:?}) en guild {}", reason, self.guild_id);
            return false;
        }

        if !self.is_playing() || !self.is_current(track_id) {
            debug!("⏭️ Fin de un track que ya no es el actual en guild {}", self.guild_id);
            return false;
        }

        self.state = PlayerState::Idle;
        self.position_ms = 0;
        true
    }

    /// Track trabado: devuelve la época para el temporizador de gracia
    pub fn track_stuck(&mut self, track_id: &str) -> Option<u64> {
        if !self.is_playing() || !self.is_current(track_id) {
            return None;
        }

        warn!("⚠️ Track trabado en guild {}, avanzando tras la espera", self.guild_id);
        Some(self.epoch)
    }

    /// Terminó la espera de un track trabado. Devuelve `true` si hay que avanzar.
    pub fn stuck_elapsed(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch || !self.is_playing() {
            return false;
        }

        self.state = PlayerState::Idle;
        self.position_ms = 0;
        true
    }

    /// Error de reproducción: se marca el track y se espera el fin o el atasco
    pub fn track_exception(&mut self, track_id: &str, message: &str) -> bool {
        if !self.is_current(track_id) {
            return false;
        }

        error!("❌ Error reproduciendo en guild {}: {}", self.guild_id, message);
        self.errored = Some(message.to_string());
        true
    }

    /// Refleja la posición informada por el nodo
    pub fn update_position(&mut self, position_ms: u64) {
        if !self.is_playing() {
            return;
        }

        self.position_ms = match &self.current {
            Some(track) if !track.is_stream() => position_ms.min(track.length_ms()),
            _ => position_ms,
        };
    }

    /// La sesión terminó su época sin volver a reproducir
    pub fn idle_elapsed(&self, epoch: u64) -> bool {
        epoch == self.epoch && self.state == PlayerState::Idle && !self.settings.always_on
    }

    // Acciones con votación

    pub async fn pause(&mut self, by: &Member) -> Result<()> {
        self.ensure_open()?;
        match self.state {
            PlayerState::Playing => {}
            PlayerState::Paused => return Err(EngineError::AlreadyPaused),
            _ => return Err(EngineError::NothingPlaying),
        }
        self.ensure_node()?;
        self.gate(VoteAction::Pause, by, false)?;

        self.node.pause(self.guild_id, true).await?;
        self.state = PlayerState::Paused;
        info!("⏸️ Pausado en guild {}", self.guild_id);
        Ok(())
    }

    pub async fn resume(&mut self, by: &Member) -> Result<()> {
        self.ensure_open()?;
        if self.state != PlayerState::Paused {
            return Err(EngineError::NotPaused);
        }
        self.ensure_node()?;
        self.gate(VoteAction::Resume, by, false)?;

        self.node.pause(self.guild_id, false).await?;
        self.state = PlayerState::Playing;
        info!("▶️ Reanudado en guild {}", self.guild_id);
        Ok(())
    }

    /// Detiene el track actual tras saltar `index - 1` pendientes.
    /// El llamador continúa con `do_next`.
    pub async fn skip(&mut self, by: &Member, index: usize) -> Result<()> {
        self.ensure_open()?;
        if !self.is_playing() {
            return Err(EngineError::NothingPlaying);
        }
        self.ensure_node()?;
        self.gate(VoteAction::Skip, by, false)?;

        if index > 0 {
            self.queue.skipto(index);
        }
        if self.queue.repeat() == RepeatMode::Track {
            self.queue.set_repeat(RepeatMode::Off);
        }

        self.halt().await?;
        info!("⏭️ Saltado en guild {}", self.guild_id);
        Ok(())
    }

    /// Vuelve `index` tracks atrás. El llamador continúa con `do_next`.
    pub async fn back(&mut self, by: &Member, index: usize) -> Result<()> {
        self.ensure_open()?;
        self.ensure_node()?;
        self.gate(VoteAction::Back, by, false)?;

        if self.is_playing() {
            self.queue.backto(index + 1);
            self.halt().await?;
        } else {
            self.queue.backto(index);
        }
        if self.queue.repeat() == RepeatMode::Track {
            self.queue.set_repeat(RepeatMode::Off);
        }

        info!("⏮️ Retrocedido {} tracks en guild {}", index, self.guild_id);
        Ok(())
    }

    pub fn shuffle(&mut self, by: &Member) -> Result<()> {
        self.ensure_open()?;
        self.gate(VoteAction::Shuffle, by, false)?;
        self.queue.shuffle();
        Ok(())
    }

    /// Vacía la cola y detiene la reproducción
    pub async fn stop(&mut self, by: &Member) -> Result<NextStep> {
        self.ensure_open()?;
        self.ensure_node()?;
        self.gate(VoteAction::Stop, by, false)?;

        self.queue.clear();
        if self.is_playing() {
            self.halt().await?;
        }
        self.current = None;
        info!("⏹️ Detenido en guild {}", self.guild_id);
        Ok(NextStep::Idle {
            hold: self.settings.always_on,
        })
    }

    /// Voto para desconectar al reproductor (umbral de salida)
    pub fn vote_leave(&mut self, by: &Member) -> Result<()> {
        self.ensure_open()?;
        self.gate(VoteAction::Stop, by, true)
    }

    // Acciones privilegiadas

    pub async fn seek(&mut self, by: &Member, position_ms: u64) -> Result<u64> {
        self.require_privileged(by, "seek")?;
        self.seek_to(position_ms).await
    }

    pub async fn forward(&mut self, by: &Member, offset_ms: u64) -> Result<u64> {
        self.require_privileged(by, "forward")?;
        self.seek_to(self.position_ms.saturating_add(offset_ms)).await
    }

    pub async fn rewind(&mut self, by: &Member, offset_ms: u64) -> Result<u64> {
        self.require_privileged(by, "rewind")?;
        self.seek_to(self.position_ms.saturating_sub(offset_ms)).await
    }

    pub async fn replay(&mut self, by: &Member) -> Result<u64> {
        self.require_privileged(by, "replay")?;
        self.seek_to(0).await
    }

    pub async fn set_volume(&mut self, by: &Member, volume: u16) -> Result<u16> {
        self.require_privileged(by, "volume")?;
        self.ensure_node()?;

        let volume = volume.min(self.max_volume);
        self.node.set_volume(self.guild_id, volume).await?;
        self.volume = volume;
        info!("🔊 Volumen en guild {}: {}%", self.guild_id, volume);
        Ok(volume)
    }

    pub fn set_repeat(&mut self, by: &Member, mode: RepeatMode) -> Result<()> {
        self.require_privileged(by, "loop")?;
        self.queue.set_repeat(mode);
        Ok(())
    }

    pub async fn add_filter(&mut self, by: &Member, filter: Filter) -> Result<()> {
        self.require_privileged(by, "filter")?;
        let mut chain = self.filters.clone();
        chain.add(filter);
        self.commit_filters(chain).await
    }

    pub async fn remove_filter(&mut self, by: &Member, tag: &str) -> Result<()> {
        self.require_privileged(by, "filter")?;
        let mut chain = self.filters.clone();
        chain.remove(tag)?;
        self.commit_filters(chain).await
    }

    pub async fn reset_filters(&mut self, by: &Member) -> Result<()> {
        self.require_privileged(by, "filter")?;
        self.commit_filters(FilterChain::new()).await
    }

    pub fn remove(
        &mut self,
        by: &Member,
        pos1: usize,
        pos2: Option<usize>,
        member: Option<UserId>,
    ) -> Result<Vec<RemovedTrack>> {
        self.require_privileged(by, "remove")?;
        self.queue.remove(pos1, pos2, member)
    }

    pub fn swap(&mut self, by: &Member, pos1: usize, pos2: usize) -> Result<(Track, Track)> {
        self.require_privileged(by, "swap")?;
        self.queue.swap(pos1, pos2)
    }

    pub fn move_track(&mut self, by: &Member, target: usize, to: usize) -> Result<Track> {
        self.require_privileged(by, "move")?;
        self.queue.move_track(target, to)
    }

    pub fn clear(&mut self, by: &Member, target: ClearTarget) -> Result<usize> {
        self.require_privileged(by, "clear")?;
        Ok(match target {
            ClearTarget::Queue => self.queue.clear(),
            ClearTarget::History => self.queue.history_clear(self.is_playing()),
        })
    }

    pub fn toggle_autoplay(&mut self, by: &Member) -> Result<bool> {
        self.require_privileged(by, "autoplay")?;
        self.settings.autoplay = !self.settings.autoplay;
        info!(
            "🎲 Autoplay {} en guild {}",
            if self.settings.autoplay { "activado" } else { "desactivado" },
            self.guild_id
        );
        Ok(self.settings.autoplay)
    }

    /// Transfiere el rol de DJ de la sesión
    pub fn swap_dj(&mut self, by: &Member, target: UserId) -> Result<()> {
        self.ensure_open()?;
        if !self.members.iter().any(|m| m.id == by.id) {
            return Err(EngineError::NotInChannel(by.id));
        }
        if by.id != self.dj || self.settings.dj_role.is_some() {
            return Err(EngineError::NotDj);
        }

        match self.members.iter().find(|m| m.id == target) {
            Some(member) if !member.bot && member.id != self.dj => {
                info!("🎧 DJ transferido a {} en guild {}", target, self.guild_id);
                self.dj = target;
                Ok(())
            }
            Some(_) => Err(EngineError::InvalidDjTarget(target)),
            None => Err(EngineError::NotInChannel(target)),
        }
    }

    // Canal y ajustes

    pub fn apply_settings(&mut self, settings: GuildSettings) {
        self.queue.set_allow_duplicate(settings.allow_duplicate);
        self.queue.set_queue_type(settings.queue_type);
        self.settings = settings;
        debug!("⚙️ Ajustes aplicados en guild {}", self.guild_id);
    }

    pub fn member_joined(&mut self, member: Member) {
        self.member_updated(member);
    }

    pub fn member_left(&mut self, user: UserId) {
        self.members.retain(|m| m.id != user);
    }

    pub fn member_updated(&mut self, member: Member) {
        match self.members.iter_mut().find(|m| m.id == member.id) {
            Some(existing) => *existing = member,
            None => self.members.push(member),
        }
    }

    /// Barrido de inactividad: sin oyentes o sin nada que reproducir la sesión
    /// se pausa (24/7) o se destruye. El DJ se reasigna si dejó el canal.
    pub async fn sweep(&mut self) -> SweepDecision {
        if self.is_closed() {
            return SweepDecision::Keep;
        }

        let listening = self.members.iter().any(Member::is_listening);
        let decision = if (!self.is_playing() && self.queue.is_empty()) || !listening {
            if !self.settings.always_on {
                info!("💤 Guild {} inactivo, se destruye el reproductor", self.guild_id);
                return SweepDecision::Teardown;
            }

            if self.state == PlayerState::Playing {
                match self.node.pause(self.guild_id, true).await {
                    Ok(()) => self.state = PlayerState::Paused,
                    Err(e) => warn!("No se pudo pausar guild {}: {}", self.guild_id, e),
                }
            }
            SweepDecision::Hold
        } else {
            SweepDecision::Keep
        };

        if !self.members.iter().any(|m| m.id == self.dj) {
            if let Some(member) = self.members.iter().find(|m| !m.bot) {
                info!("🎧 Nuevo DJ en guild {}: {}", self.guild_id, member.id);
                self.dj = member.id;
            }
        }

        decision
    }

    /// El nodo se cayó con la sesión en 24/7: el track interrumpido vuelve a la
    /// cola y la sesión queda libre para continuar en otro nodo
    pub fn suspend(&mut self) {
        if self.is_closed() {
            return;
        }

        if self.is_playing() {
            self.queue.backto(1);
        }
        self.state = PlayerState::Idle;
        self.current = None;
        self.position_ms = 0;
        self.epoch += 1;
        warn!("⏸️ Sesión suspendida en guild {}", self.guild_id);
    }

    /// Cambia el nodo de la sesión
    pub fn rebind(&mut self, node: Arc<dyn AudioNode>) {
        info!(
            "🔀 Guild {} movido al nodo {}",
            self.guild_id,
            node.identifier()
        );
        self.node = node;
    }

    /// Estado terminal: libera el reproductor del nodo y descarta la cola
    pub async fn teardown(&mut self) {
        if self.is_closed() {
            return;
        }

        self.state = PlayerState::Teardown;
        self.epoch += 1;
        self.votes.clear_all();
        self.queue.clear();
        self.queue.history_clear(false);
        self.current = None;

        if let Err(e) = self.node.destroy(self.guild_id).await {
            warn!("No se pudo liberar guild {} en el nodo: {}", self.guild_id, e);
        }
        info!("👋 Reproductor destruido en guild {}", self.guild_id);
    }

    // Funciones privadas

    fn is_current(&self, track_id: &str) -> bool {
        self.current
            .as_ref()
            .is_some_and(|track| track.track_id() == track_id)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(EngineError::SessionClosed(self.guild_id));
        }
        Ok(())
    }

    fn ensure_node(&self) -> Result<()> {
        if !self.node.is_available() {
            return Err(EngineError::NodeUnavailable(self.node.identifier()));
        }
        Ok(())
    }

    fn require_privileged(&self, by: &Member, action: &'static str) -> Result<()> {
        self.ensure_open()?;
        if !self.authority().is_privileged(by) {
            return Err(EngineError::NotPrivileged(action));
        }
        Ok(())
    }

    fn gate(&mut self, action: VoteAction, by: &Member, leave: bool) -> Result<()> {
        let authority = Authority {
            dj: self.dj,
            dj_role: self.settings.dj_role(),
            vote_disabled: self.settings.vote_disabled,
            members: &self.members,
        };
        let owns_current = action == VoteAction::Skip
            && self
                .current
                .as_ref()
                .is_some_and(|track| track.requester() == by.id);
        let bypass = authority.bypasses(by) || owns_current;

        if !bypass && !authority.is_member(by.id) {
            return Err(EngineError::NotInChannel(by.id));
        }

        let required = authority.required(leave);
        self.votes.gate(action, by.id, bypass, required)
    }

    /// Detiene el track actual y deja la sesión libre para `do_next`
    async fn halt(&mut self) -> Result<()> {
        self.node.stop(self.guild_id).await?;
        self.state = PlayerState::Idle;
        self.position_ms = 0;
        self.epoch += 1;
        Ok(())
    }

    async fn seek_to(&mut self, position_ms: u64) -> Result<u64> {
        let track = match (&self.current, self.is_playing()) {
            (Some(track), true) => track,
            _ => return Err(EngineError::NothingPlaying),
        };
        if track.is_stream() {
            return Err(EngineError::NotSeekable);
        }
        let position_ms = position_ms.min(track.length_ms());
        self.ensure_node()?;

        self.node.seek(self.guild_id, position_ms).await?;
        self.position_ms = position_ms;
        debug!("⏩ Posición en guild {}: {} ms", self.guild_id, position_ms);
        Ok(position_ms)
    }

    async fn commit_filters(&mut self, chain: FilterChain) -> Result<()> {
        self.ensure_node()?;
        if chain.is_empty() {
            self.node.clear_filters(self.guild_id).await?;
        } else {
            self.node
                .apply_filters(self.guild_id, &chain.payload()?)
                .await?;
        }
        self.filters = chain;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::track::test_track,
        node::fake::{Call, FakeNode},
    };
    use pretty_assertions::assert_eq;

    fn members(count: u64) -> Vec<Member> {
        (1..=count).map(|id| Member::new(UserId::new(id))).collect()
    }

    fn session_with(node: Arc<FakeNode>, members: Vec<Member>, settings: GuildSettings) -> Session {
        let channel = VoiceChannel::new(ChannelId::new(10), members);
        Session::new(
            GuildId::new(1),
            &channel,
            node,
            UserId::new(1),
            settings,
            &Config::default(),
        )
    }

    fn session(node: Arc<FakeNode>) -> Session {
        session_with(node, members(1), GuildSettings::default())
    }

    fn dj() -> Member {
        Member::new(UserId::new(1))
    }

    fn ids<'a>(tracks: impl Iterator<Item = &'a Track>) -> Vec<String> {
        tracks.map(|t| t.identifier().to_string()).collect()
    }

    #[tokio::test]
    async fn test_do_next_dispatches_in_order() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session(node.clone());
        session
            .add_tracks(vec![test_track("a", 1), test_track("b", 1), test_track("c", 1)], false)
            .unwrap();
        assert_eq!(ids(session.queue().tracks(false)), vec!["a", "b", "c"]);

        let step = session.do_next(true).await.unwrap();
        assert!(matches!(step, NextStep::Dispatched(ref t) if t.identifier() == "a"));
        assert_eq!(session.state(), PlayerState::Playing);

        session.queue.skipto(1);
        assert!(matches!(session.do_next(true).await.unwrap(), NextStep::Busy));
        assert_eq!(node.played(), vec!["a"]);

        let current = session.current().unwrap().track_id().to_string();
        assert!(session.finish_track(&current, EndReason::Finished));
        assert!(matches!(
            session.do_next(true).await.unwrap(),
            NextStep::Dispatched(ref t) if t.identifier() == "b"
        ));
        assert_eq!(node.played(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_repeat_track_redispatches_current() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session(node.clone());
        session
            .add_tracks(vec![test_track("x", 1), test_track("y", 1)], false)
            .unwrap();
        session.do_next(true).await.unwrap();
        session.set_repeat(&dj(), RepeatMode::Track).unwrap();

        let current = session.current().unwrap().track_id().to_string();
        assert!(session.finish_track(&current, EndReason::Finished));
        session.do_next(true).await.unwrap();

        assert_eq!(node.played(), vec!["x", "x"]);
        assert_eq!(ids(session.queue().history().iter()), vec!["x"]);
        assert_eq!(ids(session.queue().tracks(false)), vec!["y"]);
    }

    #[tokio::test]
    async fn test_stale_or_stopped_end_is_ignored() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session(node);
        session
            .add_tracks(vec![test_track("a", 1), test_track("b", 1)], false)
            .unwrap();
        session.do_next(true).await.unwrap();
        let current = session.current().unwrap().track_id().to_string();

        assert!(!session.finish_track(test_track("b", 1).track_id(), EndReason::Finished));
        assert!(!session.finish_track(&current, EndReason::Stopped));
        assert!(!session.finish_track(&current, EndReason::Replaced));
        assert_eq!(session.state(), PlayerState::Playing);

        assert!(session.finish_track(&current, EndReason::LoadFailed));
        assert!(!session.finish_track(&current, EndReason::Finished));
    }

    #[tokio::test]
    async fn test_queue_end_reports_hold_policy() {
        let node = Arc::new(FakeNode::new("main"));
        let settings = GuildSettings {
            always_on: true,
            ..GuildSettings::default()
        };
        let mut session = session_with(node, members(1), settings);

        assert!(matches!(
            session.do_next(true).await.unwrap(),
            NextStep::Idle { hold: true }
        ));
        assert_eq!(session.state(), PlayerState::Idle);
    }

    #[tokio::test]
    async fn test_autoplay_requests_recommendations() {
        let node = Arc::new(FakeNode::new("main"));
        let settings = GuildSettings {
            autoplay: true,
            ..GuildSettings::default()
        };
        let mut session = session_with(node, members(1), settings);
        session.add_tracks(vec![test_track("seed", 1)], false).unwrap();
        session.do_next(true).await.unwrap();
        let current = session.current().unwrap().track_id().to_string();
        session.finish_track(&current, EndReason::Finished);

        let NextStep::Recommend { seed, epoch } = session.do_next(true).await.unwrap() else {
            panic!("expected a recommendation request");
        };
        assert_eq!(seed.identifier(), "seed");
        assert!(matches!(
            session.do_next(false).await.unwrap(),
            NextStep::Idle { hold: false }
        ));

        let accepted = session
            .accept_recommendations(epoch, vec![test_track("seed", 7), test_track("fresh", 7)])
            .unwrap();
        assert!(accepted);
        assert_eq!(ids(session.queue().tracks(false)), vec!["fresh"]);
        assert!(!session
            .accept_recommendations(epoch + 1, vec![test_track("late", 7)])
            .unwrap());
    }

    #[tokio::test]
    async fn test_failed_dispatch_goes_idle() {
        let node = Arc::new(FakeNode::new("main"));
        node.fail_play(true);
        let mut session = session(node);
        session.add_tracks(vec![test_track("a", 1)], false).unwrap();

        assert!(matches!(
            session.do_next(true).await,
            Err(EngineError::Node(_))
        ));
        assert_eq!(session.state(), PlayerState::Idle);
        assert!(session.current().is_none());
    }

    #[tokio::test]
    async fn test_node_down_keeps_pending_tracks() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session(node.clone());
        session
            .add_tracks(vec![test_track("a", 1), test_track("b", 1)], false)
            .unwrap();

        node.set_available(false);
        assert!(matches!(
            session.do_next(true).await,
            Err(EngineError::NodeUnavailable(_))
        ));
        assert_eq!(ids(session.queue().pending().iter()), vec!["a", "b"]);
        assert!(session.queue().history().is_empty());
        assert_eq!(session.state(), PlayerState::Idle);

        node.set_available(true);
        session.do_next(true).await.unwrap();
        assert_eq!(node.played(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_suspended_session_without_node_keeps_queue() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session(node.clone());
        session
            .add_tracks(vec![test_track("a", 1), test_track("b", 1)], false)
            .unwrap();
        session.do_next(true).await.unwrap();

        node.set_available(false);
        session.suspend();
        session.add_tracks(vec![test_track("c", 1)], false).unwrap();
        assert!(session.do_next(true).await.is_err());

        assert_eq!(ids(session.queue().pending().iter()), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_skip_vote_with_five_listeners() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session_with(node.clone(), members(5), GuildSettings::default());
        session
            .add_tracks(vec![test_track("a", 1), test_track("b", 1)], false)
            .unwrap();
        session.do_next(true).await.unwrap();

        let voter = |id| Member::new(UserId::new(id));
        assert!(matches!(
            session.skip(&voter(2), 0).await,
            Err(EngineError::VoteRequired { votes: 1, required: 3, .. })
        ));
        assert!(matches!(
            session.skip(&voter(2), 0).await,
            Err(EngineError::AlreadyVoted(VoteAction::Skip))
        ));
        assert!(matches!(
            session.skip(&voter(3), 0).await,
            Err(EngineError::VoteRequired { votes: 2, .. })
        ));
        assert_eq!(session.state(), PlayerState::Playing);

        session.skip(&voter(4), 0).await.unwrap();
        assert_eq!(session.votes().count(VoteAction::Skip), 0);
        assert_eq!(session.state(), PlayerState::Idle);
        assert!(node.calls().contains(&Call::Stop));
    }

    #[tokio::test]
    async fn test_requester_skips_own_track_without_vote() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session_with(node, members(4), GuildSettings::default());
        session
            .add_tracks(vec![test_track("mine", 3), test_track("other", 2)], false)
            .unwrap();
        session.do_next(true).await.unwrap();

        let owner = Member::new(UserId::new(3));
        session.skip(&owner, 0).await.unwrap();
        session.do_next(true).await.unwrap();

        assert!(matches!(
            session.pause(&owner).await,
            Err(EngineError::VoteRequired { .. })
        ));
    }

    #[tokio::test]
    async fn test_outsider_cannot_vote() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session_with(node, members(3), GuildSettings::default());
        session.add_tracks(vec![test_track("a", 1)], false).unwrap();
        session.do_next(true).await.unwrap();

        assert!(matches!(
            session.pause(&Member::new(UserId::new(77))).await,
            Err(EngineError::NotInChannel(_))
        ));
        assert_eq!(session.votes().count(VoteAction::Pause), 0);
    }

    #[tokio::test]
    async fn test_pause_and_resume_states() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session(node.clone());

        assert!(matches!(session.pause(&dj()).await, Err(EngineError::NothingPlaying)));
        session.add_tracks(vec![test_track("a", 1)], false).unwrap();
        session.do_next(true).await.unwrap();

        assert!(matches!(session.resume(&dj()).await, Err(EngineError::NotPaused)));
        session.pause(&dj()).await.unwrap();
        assert!(matches!(session.pause(&dj()).await, Err(EngineError::AlreadyPaused)));
        session.resume(&dj()).await.unwrap();

        assert_eq!(session.state(), PlayerState::Playing);
        assert!(node.calls().ends_with(&[Call::Pause(true), Call::Pause(false)]));
    }

    #[tokio::test]
    async fn test_node_unavailable_leaves_state_untouched() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session_with(node.clone(), members(3), GuildSettings::default());
        session
            .add_tracks(vec![test_track("a", 1), test_track("b", 1)], false)
            .unwrap();
        session.do_next(true).await.unwrap();
        node.set_available(false);

        assert!(matches!(
            session.skip(&Member::new(UserId::new(2)), 0).await,
            Err(EngineError::NodeUnavailable(_))
        ));
        assert!(matches!(
            session.set_volume(&dj(), 50).await,
            Err(EngineError::NodeUnavailable(_))
        ));
        assert_eq!(session.votes().count(VoteAction::Skip), 0);
        assert_eq!(session.volume(), 100);
        assert_eq!(session.state(), PlayerState::Playing);
    }

    #[tokio::test]
    async fn test_back_while_playing_returns_previous() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session(node.clone());
        session
            .add_tracks(vec![test_track("a", 1), test_track("b", 1), test_track("c", 1)], false)
            .unwrap();
        session.do_next(true).await.unwrap();
        session.skip(&dj(), 0).await.unwrap();
        session.do_next(true).await.unwrap();

        session.back(&dj(), 1).await.unwrap();
        session.do_next(true).await.unwrap();

        assert_eq!(node.played(), vec!["a", "b", "a"]);
        assert_eq!(ids(session.queue().tracks(false)), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_skip_then_back_restores_current() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session(node.clone());
        session
            .add_tracks((0..5).map(|i| test_track(&format!("t{i}"), 1)).collect(), false)
            .unwrap();
        session.do_next(true).await.unwrap();

        session.skip(&dj(), 3).await.unwrap();
        session.do_next(true).await.unwrap();
        assert_eq!(session.current().unwrap().identifier(), "t3");

        session.back(&dj(), 3).await.unwrap();
        session.do_next(true).await.unwrap();
        assert_eq!(session.current().unwrap().identifier(), "t0");
    }

    #[tokio::test]
    async fn test_privileged_only_actions() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session_with(node.clone(), members(3), GuildSettings::default());
        session.add_tracks(vec![test_track("a", 1)], false).unwrap();
        session.do_next(true).await.unwrap();
        let listener = Member::new(UserId::new(2));

        assert!(matches!(
            session.set_volume(&listener, 80).await,
            Err(EngineError::NotPrivileged("volume"))
        ));
        assert!(matches!(
            session.add_filter(&listener, Filter::nightcore()).await,
            Err(EngineError::NotPrivileged("filter"))
        ));

        assert_eq!(session.set_volume(&dj(), 500).await.unwrap(), 150);
        assert_eq!(session.seek(&dj(), 999_999).await.unwrap(), 180_000);
        assert_eq!(session.rewind(&dj(), 30_000).await.unwrap(), 150_000);
        assert_eq!(session.forward(&dj(), 10_000).await.unwrap(), 160_000);
        assert_eq!(session.replay(&dj()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_filter_chain_reaches_node() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session(node.clone());

        session.add_filter(&dj(), Filter::nightcore()).await.unwrap();
        assert!(matches!(
            session.remove_filter(&dj(), "karaoke").await,
            Err(EngineError::FilterNotFound(_))
        ));
        session.remove_filter(&dj(), "nightcore").await.unwrap();

        let calls = node.calls();
        assert!(matches!(&calls[0], Call::Filters(payload) if payload["timescale"]["speed"] == 1.25));
        assert_eq!(calls[1], Call::ClearFilters);
        assert!(session.filters().is_empty());
    }

    #[tokio::test]
    async fn test_stuck_epoch_invalidated_by_dispatch() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session(node);
        session
            .add_tracks(vec![test_track("a", 1), test_track("b", 1)], false)
            .unwrap();
        session.do_next(true).await.unwrap();

        let current = session.current().unwrap().track_id().to_string();
        let epoch = session.track_stuck(&current).unwrap();
        session.skip(&dj(), 0).await.unwrap();
        session.do_next(true).await.unwrap();

        assert!(!session.stuck_elapsed(epoch));
        assert_eq!(session.state(), PlayerState::Playing);
    }

    #[tokio::test]
    async fn test_exception_marks_without_advancing() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session(node.clone());
        session.add_tracks(vec![test_track("a", 1)], false).unwrap();
        session.do_next(true).await.unwrap();
        let current = session.current().unwrap().track_id().to_string();

        assert!(session.track_exception(&current, "decoder failed"));
        assert_eq!(session.errored(), Some("decoder failed"));
        assert_eq!(session.state(), PlayerState::Playing);
        assert_eq!(node.played().len(), 1);
    }

    #[tokio::test]
    async fn test_position_mirroring_is_clamped() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session(node);
        session.update_position(5_000);
        assert_eq!(session.position_ms(), 0);

        session.add_tracks(vec![test_track("a", 1)], false).unwrap();
        session.do_next(true).await.unwrap();
        session.update_position(5_000);
        assert_eq!(session.position_ms(), 5_000);
        session.update_position(900_000);
        assert_eq!(session.position_ms(), 180_000);
    }

    #[tokio::test]
    async fn test_sweep_decisions() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session_with(node.clone(), members(2), GuildSettings::default());
        assert_eq!(session.sweep().await, SweepDecision::Teardown);

        let settings = GuildSettings {
            always_on: true,
            ..GuildSettings::default()
        };
        let mut session = session_with(node.clone(), members(2), settings);
        session.add_tracks(vec![test_track("a", 1)], false).unwrap();
        session.do_next(true).await.unwrap();
        assert_eq!(session.sweep().await, SweepDecision::Keep);

        session.member_updated(Member::new(UserId::new(1)).deafened(true));
        session.member_updated(Member::new(UserId::new(2)).deafened(true));
        assert_eq!(session.sweep().await, SweepDecision::Hold);
        assert_eq!(session.state(), PlayerState::Paused);
    }

    #[tokio::test]
    async fn test_sweep_reassigns_dj() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session_with(node, members(3), GuildSettings::default());
        session
            .add_tracks(vec![test_track("a", 2), test_track("b", 2)], false)
            .unwrap();
        session.do_next(true).await.unwrap();

        session.member_left(UserId::new(1));
        assert_eq!(session.sweep().await, SweepDecision::Keep);
        assert_eq!(session.dj(), UserId::new(2));
    }

    #[tokio::test]
    async fn test_swap_dj_rules() {
        let node = Arc::new(FakeNode::new("main"));
        let mut channel = members(2);
        channel.push(Member::new(UserId::new(99)).bot());
        let mut session = session_with(node, channel, GuildSettings::default());

        assert!(matches!(
            session.swap_dj(&Member::new(UserId::new(2)), UserId::new(2)),
            Err(EngineError::NotDj)
        ));
        assert!(matches!(
            session.swap_dj(&dj(), UserId::new(99)),
            Err(EngineError::InvalidDjTarget(_))
        ));
        assert!(matches!(
            session.swap_dj(&dj(), UserId::new(5)),
            Err(EngineError::NotInChannel(_))
        ));
        session.swap_dj(&dj(), UserId::new(2)).unwrap();
        assert_eq!(session.dj(), UserId::new(2));
    }

    #[tokio::test]
    async fn test_teardown_is_terminal() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session(node.clone());
        session.add_tracks(vec![test_track("a", 1)], false).unwrap();
        session.do_next(true).await.unwrap();

        session.teardown().await;
        session.teardown().await;

        assert!(session.is_closed());
        assert_eq!(session.queue().tracks(true).count(), 0);
        assert!(matches!(
            session.do_next(true).await,
            Err(EngineError::SessionClosed(_))
        ));
        assert!(matches!(
            session.add_tracks(vec![test_track("b", 1)], false),
            Err(EngineError::SessionClosed(_))
        ));
        assert_eq!(node.calls().iter().filter(|c| **c == Call::Destroy).count(), 1);
    }

    #[tokio::test]
    async fn test_suspend_requeues_interrupted_track() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session(node);
        session
            .add_tracks(vec![test_track("a", 1), test_track("b", 1)], false)
            .unwrap();
        session.do_next(true).await.unwrap();

        session.suspend();
        assert_eq!(session.state(), PlayerState::Idle);
        assert_eq!(ids(session.queue().tracks(false)), vec!["a", "b"]);

        let backup = Arc::new(FakeNode::new("backup"));
        session.rebind(backup.clone());
        session.do_next(true).await.unwrap();
        assert_eq!(backup.played(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_clear_history_keeps_playing_entry() {
        let node = Arc::new(FakeNode::new("main"));
        let mut session = session(node);
        session
            .add_tracks(vec![test_track("a", 1), test_track("b", 1), test_track("c", 1)], false)
            .unwrap();
        session.do_next(true).await.unwrap();
        session.skip(&dj(), 0).await.unwrap();
        session.do_next(true).await.unwrap();

        assert_eq!(session.clear(&dj(), ClearTarget::History).unwrap(), 1);
        assert_eq!(session.current().unwrap().identifier(), "b");
        assert_eq!(session.clear(&dj(), ClearTarget::Queue).unwrap(), 1);
        assert!(session.queue().is_empty());
    }
}

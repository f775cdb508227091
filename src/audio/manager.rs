use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        export,
        player::{Player, SessionEvent, TeardownReason},
        session::{Session, SweepDecision},
    },
    config::Config,
    error::{EngineError, Result},
    model::{Member, Track, VoiceChannel},
    node::{NodeEvent, NodeRegistry, Resolved, SearchPlatform},
    storage::{GuildSettings, SettingsStore},
};

/// Resultado de encolar una consulta
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub first: Track,
    pub playlist: Option<String>,
    /// Posición 1-based del primer track en la cola pendiente
    pub position: usize,
}

/// Registro de reproductores por guild
#[derive(Clone)]
pub struct PlayerManager {
    players: Arc<DashMap<GuildId, Player>>,
    registry: Arc<NodeRegistry>,
    store: SettingsStore,
    config: Arc<Config>,
}

impl PlayerManager {
    pub fn new(registry: Arc<NodeRegistry>, store: SettingsStore, config: Arc<Config>) -> Self {
        info!("🎵 Inicializando PlayerManager");

        Self {
            players: Arc::new(DashMap::new()),
            registry,
            store,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &SettingsStore {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Player> {
        self.players.get(&guild_id).map(|player| player.clone())
    }

    /// Reproductor del guild o `NoSession`
    pub fn player(&self, guild_id: GuildId) -> Result<Player> {
        self.get(guild_id).ok_or(EngineError::NoSession(guild_id))
    }

    /// Crea la sesión de un guild en el nodo menos cargado. Quien conecta queda como DJ.
    pub async fn connect(&self, guild_id: GuildId, channel: VoiceChannel, by: &Member) -> Result<Player> {
        if self.players.contains_key(&guild_id) {
            return Err(EngineError::SessionExists(guild_id));
        }

        if !channel.members.iter().any(|member| member.id == by.id) {
            return Err(EngineError::NotInChannel(by.id));
        }

        let node = self.registry.best_node()?;
        let settings = self.store.get(guild_id).await?;

        info!(
            "🔗 Conectando al canal {} en guild {} (nodo {})",
            channel.id,
            guild_id,
            node.identifier()
        );

        let session = Session::new(guild_id, &channel, node, by.id, settings, &self.config);
        let (player, rx) = Player::new(session, &self.config);

        match self.players.entry(guild_id) {
            Entry::Occupied(_) => return Err(EngineError::SessionExists(guild_id)),
            Entry::Vacant(entry) => {
                entry.insert(player.clone());
            }
        }

        tokio::spawn(player.clone().run(rx, self.clone()));

        info!("✅ Conectado exitosamente en guild {}", guild_id);
        Ok(player)
    }

    /// Destruye y quita la sesión. Devuelve `false` si no existía.
    pub async fn teardown(&self, guild_id: GuildId, reason: TeardownReason) -> bool {
        let Some((_, player)) = self.players.remove(&guild_id) else {
            return false;
        };

        player.teardown(reason).await;
        true
    }

    /// Desconexión pedida por un miembro, sujeta a votación
    pub async fn leave(&self, guild_id: GuildId, by: &Member) -> Result<()> {
        let player = self.player(guild_id)?;
        player.vote_leave(by).await?;
        self.teardown(guild_id, TeardownReason::Requested).await;
        Ok(())
    }

    pub async fn resolve(&self, query: &str, by: &Member) -> Result<Resolved> {
        self.registry.resolve(query, by.id).await
    }

    pub async fn search(&self, terms: &str, platform: SearchPlatform, by: &Member) -> Result<Vec<Track>> {
        self.registry.search(terms, platform, by.id).await
    }

    /// Resuelve una consulta, la encola y empieza a reproducir si no había nada sonando
    pub async fn play(&self, guild_id: GuildId, query: &str, by: &Member, at_front: bool) -> Result<Enqueued> {
        let player = self.player(guild_id)?;

        // La resolución no toca la sesión
        let resolved = self.resolve(query, by).await?;
        let playlist = match &resolved {
            Resolved::Playlist(playlist) => Some(playlist.name().to_string()),
            Resolved::Track(_) => None,
        };
        let tracks = resolved.into_tracks();
        let first = tracks
            .first()
            .cloned()
            .ok_or_else(|| EngineError::NoTrackFound(query.to_string()))?;

        let position = self.enqueue(&player, tracks, at_front).await?;
        Ok(Enqueued {
            first,
            playlist,
            position,
        })
    }

    /// Importa una cola exportada al final de la cola del guild.
    /// Devuelve la posición del primer track importado.
    pub async fn import(&self, guild_id: GuildId, text: &str, by: &Member) -> Result<usize> {
        let player = self.player(guild_id)?;
        let tracks = export::import(text, by.id)?;
        self.enqueue(&player, tracks, false).await
    }

    /// Modifica los ajustes guardados y los aplica a la sesión activa
    pub async fn update_settings<F>(&self, guild_id: GuildId, change: F) -> Result<GuildSettings>
    where
        F: FnOnce(&mut GuildSettings),
    {
        let settings = self.store.update(guild_id, change).await?;
        if let Some(player) = self.get(guild_id) {
            player.apply_settings(settings.clone()).await;
        }
        Ok(settings)
    }

    /// Barrido de inactividad de todas las sesiones. Devuelve cuántas se destruyeron.
    pub async fn sweep_idle(&self) -> usize {
        let players: Vec<Player> = self.players.iter().map(|entry| entry.value().clone()).collect();

        let decisions = join_all(players.iter().map(|player| async move {
            (player.guild_id(), player.sweep().await)
        }))
        .await;

        let mut removed = 0;
        for (guild_id, decision) in decisions {
            if decision == SweepDecision::Teardown
                && self.teardown(guild_id, TeardownReason::Inactive).await
            {
                removed += 1;
            }
        }

        debug!("🧹 Barrido: {} sesiones activas, {} destruidas", self.len(), removed);
        removed
    }

    /// Encamina un evento de nodo a su sesión
    pub async fn handle_node_event(&self, event: NodeEvent) {
        match event {
            NodeEvent::Ready { node } => {
                info!("🟢 Nodo {} conectado", node);
                self.registry.mark_up(&node);
            }
            NodeEvent::Disconnected { node } => self.node_down(&node).await,
            event => {
                let Some(guild_id) = event.guild_id() else {
                    return;
                };
                match self.get(guild_id) {
                    Some(player) => player.send_event(SessionEvent::Node(event)),
                    None => debug!("Evento para guild {} sin sesión", guild_id),
                }
            }
        }
    }

    /// Consume los eventos de los nodos hasta la cancelación
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<NodeEvent>, token: CancellationToken) {
        info!("📡 Escuchando eventos de nodos");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => self.handle_node_event(event).await,
                    None => break,
                },
            }
        }

        info!("📡 Escucha de eventos de nodos terminada");
    }

    /// Destruye todas las sesiones
    pub async fn shutdown(&self) {
        let guilds: Vec<GuildId> = self.players.iter().map(|entry| *entry.key()).collect();
        for guild_id in guilds {
            self.teardown(guild_id, TeardownReason::Requested).await;
        }
    }

    // Funciones privadas

    async fn enqueue(&self, player: &Player, tracks: Vec<Track>, at_front: bool) -> Result<usize> {
        let added = player.add_tracks(tracks, at_front).await;
        let accepted = match &added {
            Ok(position) => *position > 0,
            Err(EngineError::QueueFull { accepted, .. }) => *accepted > 0,
            Err(_) => false,
        };

        if accepted {
            player.do_next().await?;
        }
        added
    }

    /// Las sesiones 24/7 pasan a otro nodo; el resto se destruye
    async fn node_down(&self, node_id: &str) {
        error!("🔴 Nodo {} desconectado", node_id);
        self.registry.mark_down(node_id);

        let players: Vec<Player> = self.players.iter().map(|entry| entry.value().clone()).collect();
        for player in players {
            if player.node_id().await != node_id {
                continue;
            }

            let guild_id = player.guild_id();
            if !player.snapshot().await.always_on {
                self.teardown(guild_id, TeardownReason::NodeLost).await;
                continue;
            }

            match self.registry.best_node() {
                Ok(node) => {
                    player.suspend(Some(node)).await;
                    if let Err(e) = player.do_next().await {
                        warn!("No se pudo reanudar guild {}: {}", guild_id, e);
                    }
                }
                Err(_) => {
                    warn!("⏸️ Guild {} en espera de un nodo disponible", guild_id);
                    player.suspend(None).await;
                }
            }
        }
    }
}

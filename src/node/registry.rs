use dashmap::DashMap;
use parking_lot::RwLock;
use serenity::model::id::UserId;
use std::{collections::HashSet, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    search::{classify, SearchPlatform},
    AudioNode, LoadResult, NodeEvent, Resolved,
};
use crate::{
    error::{EngineError, Result},
    model::Track,
};

/// Conjunto de nodos de audio conectados
pub struct NodeRegistry {
    nodes: DashMap<String, Arc<dyn AudioNode>>,
    down: RwLock<HashSet<String>>,
    events: mpsc::UnboundedSender<NodeEvent>,
    default_search: SearchPlatform,
}

impl NodeRegistry {
    /// Crea el registro junto al receptor de los eventos de todos sus nodos
    pub fn new(default_search: SearchPlatform) -> (Self, mpsc::UnboundedReceiver<NodeEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let registry = Self {
            nodes: DashMap::new(),
            down: RwLock::new(HashSet::new()),
            events,
            default_search,
        };
        (registry, rx)
    }

    /// Canal al que cada transporte de nodo publica sus eventos
    pub fn event_sender(&self) -> mpsc::UnboundedSender<NodeEvent> {
        self.events.clone()
    }

    pub fn register(&self, node: Arc<dyn AudioNode>) {
        let id = node.identifier();
        info!("🎼 Nodo de audio registrado: {}", id);
        self.down.write().remove(&id);
        self.nodes.insert(id, node);
    }

    pub fn remove(&self, id: &str) -> Option<Arc<dyn AudioNode>> {
        self.down.write().remove(id);
        let removed = self.nodes.remove(id).map(|(_, node)| node);
        if removed.is_some() {
            info!("🗑️ Nodo de audio eliminado: {}", id);
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn AudioNode>> {
        self.nodes.get(id).map(|node| node.value().clone())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Marca un nodo como caído hasta que vuelva a reportar `Ready`
    pub fn mark_down(&self, id: &str) {
        warn!("🔌 Nodo de audio caído: {}", id);
        self.down.write().insert(id.to_string());
    }

    pub fn mark_up(&self, id: &str) {
        if self.down.write().remove(id) {
            info!("✅ Nodo de audio recuperado: {}", id);
        }
    }

    pub fn is_down(&self, id: &str) -> bool {
        self.down.read().contains(id)
    }

    /// Nodo disponible con menor carga
    pub fn best_node(&self) -> Result<Arc<dyn AudioNode>> {
        let down = self.down.read();
        self.nodes
            .iter()
            .filter(|entry| !down.contains(entry.key()) && entry.value().is_available())
            .map(|entry| {
                let penalty = entry.value().stats().penalty();
                (penalty, entry.value().clone())
            })
            .min_by(|(a, _), (b, _)| a.total_cmp(b))
            .map(|(penalty, node)| {
                debug!("🎯 Nodo elegido: {} (penalización {:.2})", node.identifier(), penalty);
                node
            })
            .ok_or(EngineError::NoNodeAvailable)
    }

    /// Resuelve una consulta en un track o una playlist.
    /// Una búsqueda devuelve su primer resultado.
    pub async fn resolve(&self, query: &str, requester: UserId) -> Result<Resolved> {
        let node = self.best_node()?;
        let identifier = classify(query, self.default_search);
        debug!("🔍 Resolviendo `{}` en {}", identifier, node.identifier());

        match node.load_tracks(&identifier, requester).await? {
            LoadResult::Track(track) => Ok(Resolved::Track(track)),
            LoadResult::Playlist(playlist) if !playlist.tracks().is_empty() => {
                info!(
                    "📋 Playlist resuelta: {} ({} tracks)",
                    playlist.name(),
                    playlist.tracks().len()
                );
                Ok(Resolved::Playlist(playlist))
            }
            LoadResult::Search(tracks) => tracks
                .into_iter()
                .next()
                .map(Resolved::Track)
                .ok_or_else(|| EngineError::NoTrackFound(query.to_string())),
            LoadResult::Playlist(_) | LoadResult::Empty => {
                warn!("❌ No se encontraron resultados para: {}", query);
                Err(EngineError::NoTrackFound(query.to_string()))
            }
        }
    }

    /// Resultados de búsqueda en una plataforma concreta
    pub async fn search(
        &self,
        terms: &str,
        platform: SearchPlatform,
        requester: UserId,
    ) -> Result<Vec<Track>> {
        let node = self.best_node()?;
        let tracks = match node.load_tracks(&platform.search(terms), requester).await? {
            LoadResult::Search(tracks) => tracks,
            LoadResult::Track(track) => vec![track],
            LoadResult::Playlist(playlist) => playlist.into_tracks(),
            LoadResult::Empty => Vec::new(),
        };

        if tracks.is_empty() {
            return Err(EngineError::NoTrackFound(terms.to_string()));
        }
        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{track::test_track, Playlist},
        node::{MockAudioNode, NodeStats},
    };
    use mockall::predicate::eq;

    fn mock_node(id: &'static str, players: usize, available: bool) -> MockAudioNode {
        let mut node = MockAudioNode::new();
        node.expect_identifier().return_const(id.to_string());
        node.expect_is_available().return_const(available);
        node.expect_stats().returning(move || NodeStats {
            players,
            ..NodeStats::default()
        });
        node
    }

    #[test]
    fn test_best_node_prefers_least_loaded() {
        let (registry, _rx) = NodeRegistry::new(SearchPlatform::YouTube);
        registry.register(Arc::new(mock_node("busy", 12, true)));
        registry.register(Arc::new(mock_node("quiet", 1, true)));
        registry.register(Arc::new(mock_node("offline", 0, false)));

        assert_eq!(registry.best_node().unwrap().identifier(), "quiet");

        registry.mark_down("quiet");
        assert_eq!(registry.best_node().unwrap().identifier(), "busy");

        registry.mark_up("quiet");
        assert_eq!(registry.best_node().unwrap().identifier(), "quiet");
    }

    #[test]
    fn test_no_node_available() {
        let (registry, _rx) = NodeRegistry::new(SearchPlatform::YouTube);
        assert!(matches!(registry.best_node(), Err(EngineError::NoNodeAvailable)));

        registry.register(Arc::new(mock_node("offline", 0, false)));
        assert!(matches!(registry.best_node(), Err(EngineError::NoNodeAvailable)));
    }

    #[tokio::test]
    async fn test_resolve_search_takes_first_result() {
        let mut node = mock_node("main", 0, true);
        node.expect_load_tracks()
            .with(eq("ytsearch:lofi"), eq(UserId::new(1)))
            .times(1)
            .returning(|_, requester| {
                Ok(LoadResult::Search(vec![
                    test_track("first", requester.get()),
                    test_track("second", requester.get()),
                ]))
            });

        let (registry, _rx) = NodeRegistry::new(SearchPlatform::YouTube);
        registry.register(Arc::new(node));

        let Resolved::Track(track) = registry.resolve("lofi", UserId::new(1)).await.unwrap() else {
            panic!("expected a single track");
        };
        assert_eq!(track.identifier(), "first");
    }

    #[tokio::test]
    async fn test_resolve_playlist_and_empty() {
        let mut node = mock_node("main", 0, true);
        node.expect_load_tracks()
            .with(eq("https://example.com/list"), mockall::predicate::always())
            .returning(|_, requester| {
                Ok(LoadResult::Playlist(Playlist::new(
                    "Mix",
                    vec![test_track("a", requester.get()), test_track("b", requester.get())],
                )))
            });
        node.expect_load_tracks()
            .with(eq("ytsearch:nothing"), mockall::predicate::always())
            .returning(|_, _| Ok(LoadResult::Empty));

        let (registry, _rx) = NodeRegistry::new(SearchPlatform::YouTube);
        registry.register(Arc::new(node));

        let resolved = registry
            .resolve("https://example.com/list", UserId::new(3))
            .await
            .unwrap();
        assert_eq!(resolved.into_tracks().len(), 2);

        assert!(matches!(
            registry.resolve("nothing", UserId::new(3)).await,
            Err(EngineError::NoTrackFound(query)) if query == "nothing"
        ));
    }

    #[tokio::test]
    async fn test_search_reports_empty_results() {
        let mut node = mock_node("main", 0, true);
        node.expect_load_tracks()
            .with(eq("scsearch:rain"), mockall::predicate::always())
            .returning(|_, _| Ok(LoadResult::Empty));

        let (registry, _rx) = NodeRegistry::new(SearchPlatform::YouTube);
        registry.register(Arc::new(node));

        assert!(registry
            .search("rain", SearchPlatform::SoundCloud, UserId::new(1))
            .await
            .is_err());
    }
}

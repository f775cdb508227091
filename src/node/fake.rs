use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{GuildId, UserId};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use super::{AudioNode, LoadResult, NodeStats};
use crate::{
    error::{EngineError, Result},
    model::Track,
};

/// Llamada recibida por el nodo de prueba
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Play(String),
    Stop,
    Pause(bool),
    Seek(u64),
    Volume(u16),
    Filters(serde_json::Value),
    ClearFilters,
    Destroy,
}

/// Nodo en memoria que registra las llamadas de control
pub struct FakeNode {
    id: String,
    available: AtomicBool,
    fail_play: AtomicBool,
    players: Mutex<usize>,
    calls: Mutex<Vec<Call>>,
    library: Mutex<HashMap<String, LoadResult>>,
    recommendations: Mutex<Vec<Track>>,
}

impl FakeNode {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            available: AtomicBool::new(true),
            fail_play: AtomicBool::new(false),
            players: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
            library: Mutex::new(HashMap::new()),
            recommendations: Mutex::new(Vec::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_play(&self, fail: bool) {
        self.fail_play.store(fail, Ordering::SeqCst);
    }

    pub fn set_players(&self, players: usize) {
        *self.players.lock() = players;
    }

    pub fn insert(&self, identifier: &str, result: LoadResult) {
        self.library.lock().insert(identifier.to_string(), result);
    }

    pub fn set_recommendations(&self, tracks: Vec<Track>) {
        *self.recommendations.lock() = tracks;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Identificadores de los tracks enviados a `play`, en orden
    pub fn played(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Play(identifier) => Some(identifier.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: Call) -> Result<()> {
        if !self.is_available() {
            return Err(EngineError::NodeUnavailable(self.id.clone()));
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl AudioNode for FakeNode {
    fn identifier(&self) -> String {
        self.id.clone()
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn stats(&self) -> NodeStats {
        NodeStats {
            players: *self.players.lock(),
            ..NodeStats::default()
        }
    }

    async fn load_tracks(&self, identifier: &str, _requester: UserId) -> Result<LoadResult> {
        Ok(self
            .library
            .lock()
            .get(identifier)
            .cloned()
            .unwrap_or(LoadResult::Empty))
    }

    async fn recommendations(&self, _seed: &Track) -> Result<Vec<Track>> {
        Ok(self.recommendations.lock().clone())
    }

    async fn play(&self, _guild_id: GuildId, track: &Track, _volume: u16) -> Result<()> {
        if self.fail_play.load(Ordering::SeqCst) {
            return Err(EngineError::Node("play rejected".to_string()));
        }
        self.record(Call::Play(track.identifier().to_string()))
    }

    async fn stop(&self, _guild_id: GuildId) -> Result<()> {
        self.record(Call::Stop)
    }

    async fn pause(&self, _guild_id: GuildId, paused: bool) -> Result<()> {
        self.record(Call::Pause(paused))
    }

    async fn seek(&self, _guild_id: GuildId, position_ms: u64) -> Result<()> {
        self.record(Call::Seek(position_ms))
    }

    async fn set_volume(&self, _guild_id: GuildId, volume: u16) -> Result<()> {
        self.record(Call::Volume(volume))
    }

    async fn apply_filters(&self, _guild_id: GuildId, payload: &serde_json::Value) -> Result<()> {
        self.record(Call::Filters(payload.clone()))
    }

    async fn clear_filters(&self, _guild_id: GuildId) -> Result<()> {
        self.record(Call::ClearFilters)
    }

    async fn destroy(&self, _guild_id: GuildId) -> Result<()> {
        self.record(Call::Destroy)
    }
}

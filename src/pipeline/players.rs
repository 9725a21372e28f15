use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

/// Rate-limit state for one player.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub name: String,
    /// Monotonic time of the last accepted message. `None` means the player
    /// has not spoken yet, which behaves like a timestamp infinitely far in the
    /// past so a first message is never rate-limited.
    pub last_message_at: Option<Instant>,
    pub last_message: String,
}

impl PlayerState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            last_message_at: None,
            last_message: String::new(),
        }
    }

    /// Time since the last message, or `None` if there was none.
    pub fn since_last_message(&self) -> Option<Duration> {
        self.last_message_at.map(|at| Instant::now().saturating_duration_since(at))
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            last_message: self.last_message.clone(),
            millis_since_last_message: self.since_last_message().map(|d| d.as_millis() as u64),
        }
    }
}

/// Serializable view of a [`PlayerState`] for out-of-process handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub last_message: String,
    pub millis_since_last_message: Option<u64>,
}

/// Per-player state keyed by player name.
///
/// Writes go through one lock so the store stays consistent even if a host
/// delivers chat from several tasks.
#[derive(Debug, Default)]
pub struct PlayerStateStore {
    players: RwLock<HashMap<String, PlayerState>>,
}

impl PlayerStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, created with sentinel defaults on first lookup.
    pub async fn get(&self, name: &str) -> PlayerState {
        if let Some(state) = self.players.read().await.get(name) {
            return state.clone();
        }
        self.players
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| PlayerState::new(name))
            .clone()
    }

    /// Record `message` as the player's latest, stamped now.
    pub async fn update(&self, name: &str, message: &str) {
        let mut players = self.players.write().await;
        let state = players
            .entry(name.to_string())
            .or_insert_with(|| PlayerState::new(name));
        state.last_message_at = Some(Instant::now());
        state.last_message = message.to_string();
    }

    /// Gate and stamp in one step: returns true if the previous message was
    /// less than `min_interval` ago, and records `message` either way.
    pub async fn check_and_update(&self, name: &str, message: &str, min_interval: Duration) -> bool {
        let mut players = self.players.write().await;
        let state = players
            .entry(name.to_string())
            .or_insert_with(|| PlayerState::new(name));
        let limited = state.since_last_message().is_some_and(|elapsed| elapsed < min_interval);
        state.last_message_at = Some(Instant::now());
        state.last_message = message.to_string();
        limited
    }

    /// Put back a state taken earlier with [`get`](Self::get).
    pub async fn restore(&self, state: PlayerState) {
        self.players.write().await.insert(state.name.clone(), state);
    }

    /// Back to sentinel defaults, e.g. when a player (re)joins.
    pub async fn reset(&self, name: &str) {
        self.players
            .write()
            .await
            .insert(name.to_string(), PlayerState::new(name));
        debug!("Reset player state for {}", name);
    }

    /// Evict a player, e.g. on disconnect.
    pub async fn remove(&self, name: &str) -> Option<PlayerState> {
        let removed = self.players.write().await.remove(name);
        if removed.is_some() {
            debug!("Removed player state for {}", name);
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.players.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.players.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lazy_creation() {
        let store = PlayerStateStore::new();
        let state = store.get("alex").await;
        assert_eq!(state.name, "alex");
        assert!(state.last_message_at.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_window() {
        let store = PlayerStateStore::new();
        let window = Duration::from_millis(500);

        assert!(!store.check_and_update("alex", "hi", window).await);

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(store.check_and_update("alex", "again", window).await);

        // the limited message restarted the cooldown
        tokio::time::advance(Duration::from_millis(400)).await;
        assert!(store.check_and_update("alex", "still", window).await);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!store.check_and_update("alex", "ok", window).await);
    }

    #[tokio::test]
    async fn test_update_and_remove() {
        let store = PlayerStateStore::new();
        store.update("alex", "first").await;
        assert_eq!(store.get("alex").await.last_message, "first");

        assert!(store.remove("alex").await.is_some());
        assert!(store.remove("alex").await.is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_and_update_is_atomic() {
        let store = std::sync::Arc::new(PlayerStateStore::new());
        let window = Duration::from_millis(500);

        let (a, b) = tokio::join!(
            store.check_and_update("alex", "one", window),
            store.check_and_update("alex", "two", window)
        );
        assert!(a ^ b, "exactly one of two simultaneous messages passes the gate");

        tokio::time::advance(window).await;
        assert!(!store.check_and_update("alex", "three", window).await);
        assert_eq!(store.get("alex").await.last_message, "three");
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_undoes_update() {
        let store = PlayerStateStore::new();
        let before = store.get("alex").await;
        store.update("alex", "hello").await;
        assert_eq!(store.get("alex").await.since_last_message(), Some(Duration::ZERO));

        store.restore(before).await;
        let state = store.get("alex").await;
        assert!(state.last_message_at.is_none());
        assert!(!store.check_and_update("alex", "hello", Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn test_reset_clears_history() {
        let store = PlayerStateStore::new();
        store.update("alex", "spam").await;
        store.reset("alex").await;
        let state = store.get("alex").await;
        assert!(state.last_message.is_empty());
        assert!(state.last_message_at.is_none());
    }
}

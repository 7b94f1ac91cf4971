//! In-memory stores backed by `DashMap`

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{StateStore, UserStore};
use crate::models::{State, User};

/// Users kept in process memory
#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: DashMap<String, User>,
}

impl MemoryUserStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether no user is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get(&self, user_id: &str) -> anyhow::Result<User> {
        Ok(self
            .users
            .get(user_id)
            .map_or_else(|| User::new(user_id), |u| u.clone()))
    }

    async fn save(&self, user: &User) -> anyhow::Result<()> {
        self.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> anyhow::Result<()> {
        self.users.remove(user_id);
        Ok(())
    }
}

/// States kept in process memory, expiring after `timeout_seconds`
#[derive(Debug)]
pub struct MemoryStateStore {
    states: DashMap<String, State>,
    timeout_seconds: u64,
}

impl MemoryStateStore {
    /// Create an empty store with the given staleness timeout
    #[must_use]
    pub fn new(timeout_seconds: u64) -> Self {
        Self {
            states: DashMap::new(),
            timeout_seconds,
        }
    }

    /// Staleness timeout in seconds
    #[must_use]
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    /// Stored state without staleness handling (inspection only)
    #[must_use]
    pub fn peek(&self, user_id: &str) -> Option<State> {
        self.states.get(user_id).map(|s| s.clone())
    }

    /// Insert a state as-is, keeping its `UpdatedAt`
    pub fn insert_raw(&self, state: State) {
        self.states.insert(state.user_id.clone(), state);
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new(300)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, user_id: &str) -> anyhow::Result<State> {
        let now = Utc::now();
        if let Some(state) = self.states.get(user_id) {
            if !state.is_stale(self.timeout_seconds, now) {
                return Ok(state.clone());
            }
        }

        if self.states.remove(user_id).is_some() {
            tracing::debug!(user_id = %user_id, "Discarded stale state");
        }
        Ok(State::new(user_id))
    }

    async fn save(&self, state: &State) -> anyhow::Result<()> {
        let mut state = state.clone();
        state.updated_at = Utc::now();
        self.states.insert(state.user_id.clone(), state);
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> anyhow::Result<()> {
        self.states.remove(user_id);
        Ok(())
    }
}

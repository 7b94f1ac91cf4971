//! User and State Stores
//!
//! The turn processor loads a [`User`] and a [`State`] at turn start and saves
//! them at turn end. Only the contract matters to the core; the in-memory and
//! JSON-file implementations here cover tests and single-host deployments.
//!
//! State stores own the staleness rule: `get` discards a state whose
//! `UpdatedAt` is older than the configured timeout and hands back a fresh one.

mod file;
mod memory;

pub use file::{default_data_dir, FileStateStore, FileUserStore};
pub use memory::{MemoryStateStore, MemoryUserStore};

use async_trait::async_trait;

use crate::models::{State, User};

/// Persistence for user profiles
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Load a user, creating an empty profile when none exists
    async fn get(&self, user_id: &str) -> anyhow::Result<User>;

    /// Persist a user
    async fn save(&self, user: &User) -> anyhow::Result<()>;

    /// Remove a user
    async fn delete(&self, user_id: &str) -> anyhow::Result<()>;
}

/// Persistence for per-user session state
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the state, or a fresh one on miss or staleness
    async fn get(&self, user_id: &str) -> anyhow::Result<State>;

    /// Persist the state, stamping `UpdatedAt`
    async fn save(&self, state: &State) -> anyhow::Result<()>;

    /// Remove the state
    async fn delete(&self, user_id: &str) -> anyhow::Result<()>;
}

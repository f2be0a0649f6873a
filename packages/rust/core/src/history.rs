//! Append-only interaction history keyed by identity.
//!
//! Parallel members each write under their own [`IdentityKey`], so appends
//! never conflict and no read-modify-write happens across identities.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use scholarflow_shared::{IdentityKey, Interaction, Result};
use scholarflow_storage::Storage;

/// Backend for per-identity interaction logs.
#[async_trait]
pub trait InteractionHistory: Send + Sync {
    /// The last `limit` interactions for `identity`, oldest first.
    async fn recent(&self, identity: &IdentityKey, limit: usize) -> Result<Vec<Interaction>>;

    /// Append one interaction to `identity`'s log.
    async fn append(&self, identity: &IdentityKey, interaction: Interaction) -> Result<()>;
}

/// In-process history for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    logs: Mutex<HashMap<IdentityKey, Vec<Interaction>>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full log for an identity.
    pub async fn log(&self, identity: &IdentityKey) -> Vec<Interaction> {
        self.logs
            .lock()
            .await
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl InteractionHistory for MemoryHistory {
    async fn recent(&self, identity: &IdentityKey, limit: usize) -> Result<Vec<Interaction>> {
        let logs = self.logs.lock().await;
        let Some(log) = logs.get(identity) else {
            return Ok(Vec::new());
        };
        let start = log.len().saturating_sub(limit);
        Ok(log[start..].to_vec())
    }

    async fn append(&self, identity: &IdentityKey, interaction: Interaction) -> Result<()> {
        self.logs
            .lock()
            .await
            .entry(identity.clone())
            .or_default()
            .push(interaction);
        Ok(())
    }
}

#[async_trait]
impl InteractionHistory for Storage {
    async fn recent(&self, identity: &IdentityKey, limit: usize) -> Result<Vec<Interaction>> {
        self.recent_interactions(identity, limit).await
    }

    async fn append(&self, identity: &IdentityKey, interaction: Interaction) -> Result<()> {
        self.append_interaction(identity, &interaction).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_history_windows_most_recent() {
        let history = MemoryHistory::new();
        let key = IdentityKey::new("user", "planner");
        for i in 0..5 {
            history
                .append(&key, Interaction::user(format!("q{i}")))
                .await
                .unwrap();
        }

        let recent = history.recent(&key, 2).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|i| i.content.as_str()).collect();
        assert_eq!(contents, vec!["q3", "q4"]);
        assert_eq!(history.recent(&key, 0).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn identities_are_isolated() {
        let history = MemoryHistory::new();
        let a = IdentityKey::new("user", "researcher_0");
        let b = IdentityKey::new("user", "researcher_1");
        history.append(&a, Interaction::assistant("a")).await.unwrap();

        assert_eq!(history.log(&a).await.len(), 1);
        assert!(history.recent(&b, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn storage_backs_history() {
        let path = std::env::temp_dir().join(format!("sf_history_{}.db", uuid::Uuid::now_v7()));
        let storage = Storage::open(&path).await.unwrap();
        let key = IdentityKey::new("user", "synthesis");

        InteractionHistory::append(&storage, &key, Interaction::user("in"))
            .await
            .unwrap();
        InteractionHistory::append(&storage, &key, Interaction::assistant("out"))
            .await
            .unwrap();

        let recent = InteractionHistory::recent(&storage, &key, 1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].content, "out");

        drop(storage);
        let _ = std::fs::remove_file(&path);
    }
}

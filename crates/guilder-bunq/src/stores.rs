//! Persistence for the refresher's bookkeeping
//!
//! Three small stores: provider credentials per user, the newer-than
//! cursor per provider account, and the set of users to sweep. Each has
//! an in-memory implementation for tests and development and a
//! sled-backed one for real runs.

use crate::client::BunqAccountId;
use crate::error::{BunqError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guilder_types::{AuthId, UserId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One stored provider credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: AuthId,
    pub user_id: UserId,
    /// Serialized [`crate::client::ApiContext`]
    pub api_context: String,
    pub bunq_user_id: String,
}

#[async_trait]
pub trait CredentialsStore: Send + Sync {
    async fn credentials_for(&self, user_id: UserId) -> Result<Vec<Credential>>;

    async fn save(&self, credential: Credential) -> Result<()>;

    async fn delete(&self, user_id: UserId, id: AuthId) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryCredentialsStore {
    credentials: RwLock<HashMap<UserId, Vec<Credential>>>,
}

impl InMemoryCredentialsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialsStore for InMemoryCredentialsStore {
    async fn credentials_for(&self, user_id: UserId) -> Result<Vec<Credential>> {
        Ok(self
            .credentials
            .read()
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, credential: Credential) -> Result<()> {
        let mut credentials = self.credentials.write();
        let for_user = credentials.entry(credential.user_id).or_default();
        for_user.retain(|existing| existing.id != credential.id);
        for_user.push(credential);
        Ok(())
    }

    async fn delete(&self, user_id: UserId, id: AuthId) -> Result<()> {
        if let Some(for_user) = self.credentials.write().get_mut(&user_id) {
            for_user.retain(|existing| existing.id != id);
        }
        Ok(())
    }
}

pub struct SledCredentialsStore {
    tree: sled::Tree,
}

impl SledCredentialsStore {
    pub fn open(db: &sled::Db) -> Result<Self> {
        let tree = db.open_tree("credentials")?;
        Ok(Self { tree })
    }

    fn key(user_id: UserId, id: AuthId) -> String {
        format!("{user_id}/{id}")
    }
}

#[async_trait]
impl CredentialsStore for SledCredentialsStore {
    async fn credentials_for(&self, user_id: UserId) -> Result<Vec<Credential>> {
        let prefix = format!("{user_id}/");
        let mut credentials = Vec::new();
        for entry in self.tree.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry?;
            credentials.push(
                serde_json::from_slice(&value).map_err(|err| BunqError::Storage(err.to_string()))?,
            );
        }
        Ok(credentials)
    }

    async fn save(&self, credential: Credential) -> Result<()> {
        let key = Self::key(credential.user_id, credential.id);
        let value =
            serde_json::to_vec(&credential).map_err(|err| BunqError::Storage(err.to_string()))?;
        self.tree.insert(key.as_bytes(), value)?;
        Ok(())
    }

    async fn delete(&self, user_id: UserId, id: AuthId) -> Result<()> {
        self.tree.remove(Self::key(user_id, id).as_bytes())?;
        Ok(())
    }
}

/// Newer-than cursor per provider account
#[async_trait]
pub trait RefreshTimestampStore: Send + Sync {
    /// `None` when the account has never been refreshed
    async fn last_refresh_for(&self, account_id: BunqAccountId) -> Result<Option<DateTime<Utc>>>;

    async fn save_last_refresh(
        &self,
        account_id: BunqAccountId,
        last_refresh: DateTime<Utc>,
    ) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryRefreshTimestampStore {
    timestamps: RwLock<HashMap<BunqAccountId, DateTime<Utc>>>,
}

impl InMemoryRefreshTimestampStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RefreshTimestampStore for InMemoryRefreshTimestampStore {
    async fn last_refresh_for(&self, account_id: BunqAccountId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.timestamps.read().get(&account_id).copied())
    }

    async fn save_last_refresh(
        &self,
        account_id: BunqAccountId,
        last_refresh: DateTime<Utc>,
    ) -> Result<()> {
        self.timestamps.write().insert(account_id, last_refresh);
        Ok(())
    }
}

pub struct SledRefreshTimestampStore {
    tree: sled::Tree,
}

impl SledRefreshTimestampStore {
    pub fn open(db: &sled::Db) -> Result<Self> {
        let tree = db.open_tree("refresh-timestamps")?;
        Ok(Self { tree })
    }
}

#[async_trait]
impl RefreshTimestampStore for SledRefreshTimestampStore {
    async fn last_refresh_for(&self, account_id: BunqAccountId) -> Result<Option<DateTime<Utc>>> {
        match self.tree.get(account_id.to_string().as_bytes())? {
            Some(value) => {
                let parsed = serde_json::from_slice(&value)
                    .map_err(|err| BunqError::Storage(err.to_string()))?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    async fn save_last_refresh(
        &self,
        account_id: BunqAccountId,
        last_refresh: DateTime<Utc>,
    ) -> Result<()> {
        let value = serde_json::to_vec(&last_refresh)
            .map_err(|err| BunqError::Storage(err.to_string()))?;
        self.tree.insert(account_id.to_string().as_bytes(), value)?;
        Ok(())
    }
}

/// The users the periodic sweep refreshes
#[async_trait]
pub trait UsersStore: Send + Sync {
    async fn user_ids(&self) -> Result<Vec<UserId>>;
}

#[derive(Default)]
pub struct InMemoryUsersStore {
    users: RwLock<Vec<UserId>>,
}

impl InMemoryUsersStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: Vec<UserId>) -> Self {
        Self {
            users: RwLock::new(users),
        }
    }

    pub fn add_user(&self, user_id: UserId) {
        self.users.write().push(user_id);
    }
}

#[async_trait]
impl UsersStore for InMemoryUsersStore {
    async fn user_ids(&self) -> Result<Vec<UserId>> {
        Ok(self.users.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_credentials_roundtrip() {
        let store = InMemoryCredentialsStore::new();
        let user_id = UserId::new();
        let credential = Credential {
            id: AuthId::new(),
            user_id,
            api_context: "{}".to_string(),
            bunq_user_id: "7".to_string(),
        };

        store.save(credential.clone()).await.unwrap();
        assert_eq!(store.credentials_for(user_id).await.unwrap(), vec![credential.clone()]);

        store.delete(user_id, credential.id).await.unwrap();
        assert!(store.credentials_for(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_saving_same_credential_id_replaces() {
        let store = InMemoryCredentialsStore::new();
        let user_id = UserId::new();
        let id = AuthId::new();

        let mut credential = Credential {
            id,
            user_id,
            api_context: "old".to_string(),
            bunq_user_id: "7".to_string(),
        };
        store.save(credential.clone()).await.unwrap();
        credential.api_context = "new".to_string();
        store.save(credential).await.unwrap();

        let stored = store.credentials_for(user_id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].api_context, "new");
    }

    #[tokio::test]
    async fn test_timestamp_store_roundtrip() {
        let store = InMemoryRefreshTimestampStore::new();
        let account_id = BunqAccountId(12);

        assert_eq!(store.last_refresh_for(account_id).await.unwrap(), None);

        let now = Utc::now();
        store.save_last_refresh(account_id, now).await.unwrap();
        assert_eq!(store.last_refresh_for(account_id).await.unwrap(), Some(now));
    }

    #[tokio::test]
    async fn test_sled_credentials_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let user_id = UserId::new();
        let credential = Credential {
            id: AuthId::new(),
            user_id,
            api_context: "{}".to_string(),
            bunq_user_id: "7".to_string(),
        };

        {
            let db = sled::open(dir.path()).unwrap();
            let store = SledCredentialsStore::open(&db).unwrap();
            store.save(credential.clone()).await.unwrap();
            db.flush().unwrap();
        }

        let db = sled::open(dir.path()).unwrap();
        let store = SledCredentialsStore::open(&db).unwrap();
        assert_eq!(store.credentials_for(user_id).await.unwrap(), vec![credential]);
    }
}

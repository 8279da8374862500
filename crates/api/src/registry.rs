use chrono::{DateTime, Utc};
use mtgate_core::{AccountConnection, AccountInformation};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};

/// A connected account: its live handle plus the last fetched snapshot.
#[derive(Clone)]
pub struct RegistryEntry {
    pub connection: Arc<dyn AccountConnection>,
    pub account_info: AccountInformation,
    pub last_update: DateTime<Utc>,
    /// Set when a disconnect attempt failed and the upstream state is unknown.
    pub stale: bool,
}

impl RegistryEntry {
    pub fn new(
        connection: Arc<dyn AccountConnection>,
        account_info: AccountInformation,
        last_update: DateTime<Utc>,
    ) -> Self {
        Self {
            connection,
            account_info,
            last_update,
            stale: false,
        }
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("account_id", &self.connection.account_id())
            .field("last_update", &self.last_update)
            .field("stale", &self.stale)
            .finish()
    }
}

/// Public view of an entry, as returned by the account listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub login: String,
    pub last_update: DateTime<Utc>,
    pub account_info: AccountInformation,
    pub stale: bool,
}

/// In-memory registry of connected accounts, keyed by login.
///
/// Entries are unbounded and never evicted. Requests touching the same login
/// are serialized through [`Registry::lock`]; the map itself only guards
/// individual reads and writes.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `login`, returning the replaced one.
    pub async fn put(
        &self,
        login: impl Into<String>,
        entry: RegistryEntry,
    ) -> Option<RegistryEntry> {
        self.entries.write().await.insert(login.into(), entry)
    }

    pub async fn get(&self, login: &str) -> Option<RegistryEntry> {
        self.entries.read().await.get(login).cloned()
    }

    pub async fn list(&self) -> Vec<AccountSummary> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(login, entry)| AccountSummary {
                login: login.clone(),
                last_update: entry.last_update,
                account_info: entry.account_info.clone(),
                stale: entry.stale,
            })
            .collect()
    }

    pub async fn remove(&self, login: &str) -> Option<RegistryEntry> {
        self.entries.write().await.remove(login)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Overwrite the cached snapshot, keeping the handle. Clears `stale`.
    /// Returns `false` if the login is not registered.
    pub async fn refresh(
        &self,
        login: &str,
        account_info: AccountInformation,
        at: DateTime<Utc>,
    ) -> bool {
        match self.entries.write().await.get_mut(login) {
            Some(entry) => {
                entry.account_info = account_info;
                entry.last_update = at;
                entry.stale = false;
                true
            }
            None => false,
        }
    }

    pub async fn mark_stale(&self, login: &str) -> bool {
        match self.entries.write().await.get_mut(login) {
            Some(entry) => {
                entry.stale = true;
                true
            }
            None => false,
        }
    }

    /// Remove and return every entry.
    pub async fn drain(&self) -> Vec<(String, RegistryEntry)> {
        self.entries.write().await.drain().collect()
    }

    /// Acquire the exclusive per-login lock. Other logins are unaffected.
    ///
    /// Slots left behind by waiters that were cancelled before acquiring are
    /// swept here.
    pub async fn lock(&self, login: &str) -> LoginGuard<'_> {
        let slot = {
            let mut locks = self.locks.lock();
            locks.retain(|_, slot| Arc::strong_count(slot) > 1);
            locks.entry(login.to_string()).or_default().clone()
        };
        let guard = slot.lock_owned().await;
        LoginGuard {
            registry: self,
            login: login.to_string(),
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn lock_slots(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Held for the duration of a request on one login. Dropping it releases the
/// lock and frees the slot once no other request is waiting on it.
pub struct LoginGuard<'a> {
    registry: &'a Registry,
    login: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for LoginGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.registry.locks.lock();
        let idle = locks
            .get(&self.login)
            .is_some_and(|slot| Arc::strong_count(slot) == 1);
        if idle {
            locks.remove(&self.login);
        }
    }
}

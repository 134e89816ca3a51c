use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::session::{Session, StoreRoot};
use crate::storage::BlobStore;

pub type SharedStore = Arc<Mutex<Store>>;

/// Owns every session and the active pointer. All writes go through
/// [`Store::update_session`], which stamps `updated_at` and persists the
/// whole root before the new state becomes visible.
pub struct Store {
    root: StoreRoot,
    backend: Arc<dyn BlobStore>,
    key: String,
}

impl Store {
    pub async fn open(backend: Arc<dyn BlobStore>, key: impl Into<String>) -> Result<Self, StoreError> {
        let key = key.into();
        let blob = backend.load(&key).await.map_err(StoreError::Persist)?;
        let loaded = blob.and_then(|b| match serde_json::from_str::<StoreRoot>(&b) {
            Ok(root) => Some(root),
            Err(err) => {
                warn!(%key, error = %err, "persisted state unreadable, starting fresh");
                None
            }
        });

        let (root, dirty) = match loaded {
            Some(root) => repair(root),
            None => (StoreRoot::fresh(), true),
        };
        let mut store = Self { root: root.clone(), backend, key };
        if dirty {
            store.commit(root).await?;
        }
        info!(sessions = store.root.sessions.len(), "store opened");
        Ok(store)
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    pub fn root(&self) -> &StoreRoot {
        &self.root
    }

    pub fn active(&self) -> Result<&Session, StoreError> {
        self.root.active().ok_or(StoreError::NoActiveSession)
    }

    pub fn active_id(&self) -> Result<Uuid, StoreError> {
        self.active().map(|s| s.id)
    }

    pub fn session(&self, id: Uuid) -> Option<&Session> {
        self.root.get(id)
    }

    /// Unknown ids are refused without touching state.
    pub async fn set_active(&mut self, id: Uuid) -> Result<bool, StoreError> {
        if self.root.get(id).is_none() {
            debug!(%id, "set_active: unknown session");
            return Ok(false);
        }
        let mut next = self.root.clone();
        next.active_id = Some(id);
        self.commit(next).await?;
        Ok(true)
    }

    pub async fn new_session(&mut self) -> Result<Uuid, StoreError> {
        let session = Session::new();
        let id = session.id;
        let mut next = self.root.clone();
        next.sessions.insert(0, session);
        next.active_id = Some(id);
        self.commit(next).await?;
        info!(%id, "session created");
        Ok(id)
    }

    /// Refuses to remove the last session.
    pub async fn delete_active(&mut self) -> Result<bool, StoreError> {
        if self.root.sessions.len() <= 1 {
            debug!("delete_active: refusing to delete the only session");
            return Ok(false);
        }
        let id = self.active_id()?;
        let mut next = self.root.clone();
        next.sessions.retain(|s| s.id != id);
        next.active_id = next.sessions.first().map(|s| s.id);
        self.commit(next).await?;
        info!(%id, "session deleted");
        Ok(true)
    }

    pub async fn update_active<R>(&mut self, f: impl FnOnce(&mut Session) -> R) -> Result<R, StoreError> {
        let id = self.active_id()?;
        self.update_session(id, f).await?.ok_or(StoreError::NoActiveSession)
    }

    /// Returns `Ok(None)` when the session no longer exists.
    pub async fn update_session<R>(&mut self, id: Uuid, f: impl FnOnce(&mut Session) -> R) -> Result<Option<R>, StoreError> {
        let mut next = self.root.clone();
        let Some(session) = next.get_mut(id) else {
            return Ok(None);
        };
        let out = f(session);
        session.updated_at = Utc::now();
        self.commit(next).await?;
        Ok(Some(out))
    }

    async fn commit(&mut self, next: StoreRoot) -> Result<(), StoreError> {
        let blob = serde_json::to_string(&next)?;
        self.backend.save(&self.key, &blob).await.map_err(StoreError::Persist)?;
        self.root = next;
        Ok(())
    }
}

fn repair(mut root: StoreRoot) -> (StoreRoot, bool) {
    if root.sessions.is_empty() {
        return (StoreRoot::fresh(), true);
    }
    let mut dirty = false;
    if root.active().is_none() {
        root.active_id = root.sessions.first().map(|s| s.id);
        dirty = true;
    }
    // nothing can be in flight at start-up
    for session in &mut root.sessions {
        if session.has_typing() {
            session.remove_typing();
            dirty = true;
        }
    }
    (root, dirty)
}

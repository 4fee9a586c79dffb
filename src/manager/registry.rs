use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::session::SceneSession;
use crate::types::PersistentId;

/// Sole owner of the live sessions, keyed by persistent id.
///
/// Ids are handed out from 1 upwards and never reused, even after the session
/// they named is removed.
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<PersistentId, Arc<SceneSession>>>,
    next_id: RwLock<PersistentId>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            next_id: RwLock::new(1),
        }
    }
}

impl SessionRegistry {
    pub fn allocate_id(&self) -> PersistentId {
        let mut next = self.next_id.write();
        let id = *next;
        *next += 1;
        id
    }

    pub fn insert(&self, session: Arc<SceneSession>) -> Option<Arc<SceneSession>> {
        self.sessions
            .write()
            .insert(session.persistent_id(), session)
    }

    pub fn get(&self, id: PersistentId) -> Option<Arc<SceneSession>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn remove(&self, id: PersistentId) -> Option<Arc<SceneSession>> {
        self.sessions.write().remove(&id)
    }

    pub fn contains(&self, id: PersistentId) -> bool {
        self.sessions.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sessions in id order, detached from the lock.
    pub fn snapshot(&self) -> Vec<Arc<SceneSession>> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn find(&self, pred: impl Fn(&SceneSession) -> bool) -> Option<Arc<SceneSession>> {
        self.sessions
            .read()
            .values()
            .find(|session| pred(session))
            .cloned()
    }
}

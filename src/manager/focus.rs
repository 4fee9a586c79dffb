use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, info, warn};

use super::SessionRegistry;
use crate::error::{WsError, WsResult};
use crate::session::{SceneSession, SessionFlags};
use crate::types::{PersistentId, INVALID_PERSISTENT_ID};
use crate::utils::{Observable, Observer, Observers};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FocusChangeReason {
    #[default]
    Default,
    Foreground,
    Background,
    Click,
    SceneSwitch,
    SplitScreen,
    Floating,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusEvent {
    pub persistent_id: PersistentId,
    pub focused: bool,
    pub reason: FocusChangeReason,
}

/// Decides which session holds focus. At most one does at any time.
pub struct FocusArbiter {
    registry: Arc<SessionRegistry>,
    holder: Mutex<PersistentId>,
    // serializes whole revoke/grant sequences; re-entrant for requests made from focus handlers
    transaction: ReentrantMutex<()>,
    observers: Observers<FocusEvent>,
}

impl FocusArbiter {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            holder: Mutex::new(INVALID_PERSISTENT_ID),
            transaction: ReentrantMutex::new(()),
            observers: Observers::default(),
        }
    }

    pub fn focused_session_id(&self) -> PersistentId {
        *self.holder.lock()
    }

    pub fn add_focus_observer(&self, observer: Arc<dyn Observer<FocusEvent>>) {
        self.observers.add_listener(observer);
    }

    pub fn request_focus_status(
        &self,
        persistent_id: PersistentId,
        focused: bool,
        by_foreground: bool,
        reason: FocusChangeReason,
    ) -> WsResult<()> {
        let _transaction = self.transaction.lock();
        let Some(session) = self.registry.get(persistent_id) else {
            warn!(target: "wms::focus", persistent_id, "focus request for unknown session");
            return Err(WsError::InvalidSession(persistent_id));
        };
        debug!(target: "wms::focus", persistent_id, focused, by_foreground, ?reason, "focus requested");
        if focused {
            self.grant(&session, by_foreground, reason)
        } else {
            self.release(&session, reason)
        }
    }

    fn grant(
        &self,
        session: &Arc<SceneSession>,
        by_foreground: bool,
        reason: FocusChangeReason,
    ) -> WsResult<()> {
        let id = session.persistent_id();
        if !session.is_focusable() {
            info!(target: "wms::focus", persistent_id = id, "session is not focusable");
            return Err(WsError::DoNothing);
        }
        if by_foreground && !session.is_focused_on_show() {
            info!(target: "wms::focus", persistent_id = id, "session does not take focus on show");
            return Err(WsError::DoNothing);
        }
        if !session.state().is_visible() {
            info!(target: "wms::focus", persistent_id = id, state = %session.state(), "session is not on screen");
            return Err(WsError::DoNothing);
        }
        if self.focused_session_id() == id {
            return Err(WsError::DoNothing);
        }
        self.revoke_current(reason);
        self.set_holder(session, reason);
        Ok(())
    }

    fn release(&self, session: &Arc<SceneSession>, reason: FocusChangeReason) -> WsResult<()> {
        let id = session.persistent_id();
        if self.focused_session_id() != id {
            debug!(target: "wms::focus", persistent_id = id, "releasing focus it does not hold");
            return Err(WsError::DoNothing);
        }
        self.revoke_current(reason);
        if let Some(next) = self.next_candidate(id) {
            self.set_holder(&next, reason);
        }
        Ok(())
    }

    /// Drops focus from `persistent_id` if it holds it, e.g. on background or destruction.
    pub fn on_session_hidden(&self, persistent_id: PersistentId, reason: FocusChangeReason) {
        let _transaction = self.transaction.lock();
        if self.focused_session_id() != persistent_id {
            return;
        }
        self.revoke_current(reason);
        if let Some(next) = self.next_candidate(persistent_id) {
            self.set_holder(&next, reason);
        }
    }

    fn revoke_current(&self, reason: FocusChangeReason) {
        let previous = std::mem::replace(&mut *self.holder.lock(), INVALID_PERSISTENT_ID);
        if previous == INVALID_PERSISTENT_ID {
            return;
        }
        if let Some(old) = self.registry.get(previous) {
            old.update_focus(false);
        }
        info!(target: "wms::focus", persistent_id = previous, ?reason, "focus revoked");
        self.observers.notify_observers(&FocusEvent {
            persistent_id: previous,
            focused: false,
            reason,
        });
    }

    fn set_holder(&self, session: &Arc<SceneSession>, reason: FocusChangeReason) {
        let id = session.persistent_id();
        *self.holder.lock() = id;
        session.update_focus(true);
        info!(target: "wms::focus", persistent_id = id, ?reason, "focus granted");
        self.observers.notify_observers(&FocusEvent {
            persistent_id: id,
            focused: true,
            reason,
        });
    }

    fn next_candidate(&self, excluded: PersistentId) -> Option<Arc<SceneSession>> {
        self.registry
            .snapshot()
            .into_iter()
            .filter(|session| {
                session.persistent_id() != excluded
                    && session.is_focusable()
                    && session.state().is_visible()
                    && !session.flags().contains(SessionFlags::FORCE_HIDE)
            })
            .max_by_key(|session| session.z_order())
    }
}

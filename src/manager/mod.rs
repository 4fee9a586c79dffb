//! Session orchestration: creation and reuse, activation, background and destruction,
//! focus and z-order, plus the display hook that keeps sessions on live displays.
//!
//! The manager is the only owner of sessions (through [`SessionRegistry`]). Everything
//! else refers to a session by its [`PersistentId`] and looks it up again when it needs
//! it; a failed lookup means the session was destroyed in the meantime and the caller
//! quietly does nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::display::{DisplayInfo, DisplayStateChangeType};
use crate::error::{WsError, WsErrorCode, WsResult};
use crate::host::{BrokerState, RenderHost, SessionBroker};
use crate::persistence::{PersistenceFactory, PixelMap};
use crate::session::{
    CallbackRegistry, CollaboratorType, ComparedSessionInfo, EventKind, LifeCycleTaskKind,
    SceneSession, SessionCallback, SessionEvent, SessionInfo, SessionOptions, SessionState,
};
use crate::task::TaskScheduler;
use crate::types::{DisplayId, PersistentId, INVALID_PERSISTENT_ID};
use crate::utils::Observer;

mod focus;
mod registry;
mod starting_window;

pub use focus::{FocusArbiter, FocusChangeReason, FocusEvent};
pub use registry::SessionRegistry;
pub use starting_window::{
    MemoryStartingWindowRdb, StartingWindowCache, StartingWindowInfo, StartingWindowKey,
    StartingWindowProvider, StartingWindowRdb, StartingWindowResource, DEFAULT_CACHE_CAPACITY,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundOptions {
    pub is_delegator: bool,
    pub is_to_desktop: bool,
    pub is_save_snapshot: bool,
}

impl Default for BackgroundOptions {
    fn default() -> Self {
        Self {
            is_delegator: false,
            is_to_desktop: false,
            is_save_snapshot: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestructionOptions {
    pub need_remove_session: bool,
    pub is_save_snapshot: bool,
    pub is_force_clean: bool,
}

impl Default for DestructionOptions {
    fn default() -> Self {
        Self {
            need_remove_session: false,
            is_save_snapshot: true,
            is_force_clean: false,
        }
    }
}

/// Collaborators the manager talks to. All optional except the render host.
pub struct ManagerCollaborators {
    pub render_host: Arc<dyn RenderHost>,
    pub broker: Option<Arc<dyn SessionBroker>>,
    pub persistence: Option<Arc<dyn PersistenceFactory>>,
    pub starting_window_rdb: Option<Arc<dyn StartingWindowRdb>>,
    pub starting_window_resource: Option<Arc<dyn StartingWindowResource>>,
}

pub struct SceneSessionManager {
    registry: Arc<SessionRegistry>,
    focus: FocusArbiter,
    starting_windows: StartingWindowProvider,
    scheduler: Arc<TaskScheduler>,
    render_host: Arc<dyn RenderHost>,
    broker: Option<Arc<dyn SessionBroker>>,
    persistence: Option<Arc<dyn PersistenceFactory>>,
    root_callbacks: Arc<CallbackRegistry>,
    session_options: SessionOptions,
    // held across lookup-then-create so two requests for one identity share a session
    gen_lock: Mutex<()>,
    default_display: Mutex<DisplayId>,
    live_displays: Mutex<BTreeSet<DisplayId>>,
    top_z_order: Mutex<u32>,
    dark_mode: Mutex<bool>,
    weak_self: Weak<SceneSessionManager>,
}

impl SceneSessionManager {
    pub fn new(
        config: &Config,
        scheduler: Arc<TaskScheduler>,
        collaborators: ManagerCollaborators,
    ) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::default());
        Arc::new_cyclic(|weak_self| Self {
            focus: FocusArbiter::new(registry.clone()),
            registry,
            starting_windows: StartingWindowProvider::new(
                config.starting_window_cache_capacity,
                collaborators.starting_window_rdb,
                collaborators.starting_window_resource,
            ),
            session_options: SessionOptions {
                scheduler: Some(scheduler.clone()),
                queue_capacity: config.lifecycle_queue_capacity,
                task_expiry: Duration::from_millis(config.lifecycle_task_expiry_ms),
            },
            scheduler,
            render_host: collaborators.render_host,
            broker: collaborators.broker,
            persistence: collaborators.persistence,
            root_callbacks: Arc::new(CallbackRegistry::default()),
            gen_lock: Mutex::new(()),
            default_display: Mutex::new(DisplayId::INVALID),
            live_displays: Mutex::new(BTreeSet::new()),
            top_z_order: Mutex::new(0),
            dark_mode: Mutex::new(false),
            weak_self: weak_self.clone(),
        })
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn default_display_id(&self) -> DisplayId {
        *self.default_display.lock()
    }

    /// Handlers of the root scene, the host side that launches top-level sessions.
    pub fn register_root_callback(
        &self,
        name: &str,
        handler: SessionCallback,
    ) -> WsResult<EventKind> {
        self.root_callbacks.register(name, handler)
    }

    fn notify_root(&self, event: SessionEvent) {
        let callbacks = self.root_callbacks.clone();
        let label = event.kind().name();
        if !self.scheduler.post_task(label, move || {
            callbacks.dispatch(&event);
        }) {
            warn!(target: "wms::life", callback = label, "root notification dropped");
        }
    }

    pub fn get_scene_session(&self, persistent_id: PersistentId) -> Option<Arc<SceneSession>> {
        self.registry.get(persistent_id)
    }

    pub fn get_scene_session_by_name(
        &self,
        compared: &ComparedSessionInfo,
    ) -> Option<Arc<SceneSession>> {
        self.registry.find(|session| {
            session.state() != SessionState::End && session.session_info().compared() == *compared
        })
    }

    pub fn find_session_by_affinity(&self, affinity: &str) -> Option<Arc<SceneSession>> {
        if affinity.is_empty() {
            return None;
        }
        self.registry.find(|session| {
            session.state() != SessionState::End && session.session_info().session_affinity == affinity
        })
    }

    /// Whether sessions of this collaborator are owned by the broker.
    pub fn check_collaborator_type(&self, collaborator_type: CollaboratorType) -> bool {
        matches!(
            collaborator_type,
            CollaboratorType::Reserve | CollaboratorType::Others
        )
    }

    /// Consults the broker for collaborator-owned requests. A started broker always
    /// reuses its sessions.
    pub fn check_if_reuse_session(&self, info: &mut SessionInfo) -> BrokerState {
        if !self.check_collaborator_type(info.collaborator_type) {
            return BrokerState::Unknown;
        }
        let state = self
            .broker
            .as_ref()
            .map_or(BrokerState::NotStarted, |broker| broker.state());
        if state == BrokerState::Started {
            info.reuse = true;
        }
        debug!(target: "wms::life", bundle = %info.bundle_name, ?state, "broker consulted");
        state
    }

    /// Creates a session for `info` and registers it under a fresh persistent id.
    /// An id the registry already knows is returned as is.
    pub fn request_scene_session(&self, info: SessionInfo) -> Option<Arc<SceneSession>> {
        if info.persistent_id != INVALID_PERSISTENT_ID {
            if let Some(existing) = self.registry.get(info.persistent_id) {
                debug!(target: "wms::life", persistent_id = info.persistent_id, "session already exists");
                return Some(existing);
            }
        }
        if info.bundle_name.is_empty() && info.window_type.is_main() {
            error!(target: "wms::life", ability = %info.ability_name, "main window without bundle");
            return None;
        }
        let persistent_id = self.registry.allocate_id();
        let persistence = self
            .persistence
            .as_ref()
            .map(|factory| factory.create(&info.bundle_name, persistent_id));
        let mut info = info;
        if info.display_id.is_none() {
            info.display_id = Some(self.default_display_id());
        }
        let session =
            SceneSession::new(info, persistent_id, self.session_options.clone(), persistence);
        self.registry.insert(session.clone());
        info!(
            target: "wms::life",
            persistent_id,
            bundle = %session.session_info().bundle_name,
            "session created"
        );
        Some(session)
    }

    /// Resolves `info` to a live session, reusing one when the request allows it.
    ///
    /// On success `info.persistent_id` holds the resolved id. A non-zero id that no
    /// longer exists is replaced by a brand new session with a *different* id; callers
    /// must read the id back instead of assuming their own survived.
    #[profiling::function]
    pub fn gen_scene_session(&self, info: &mut SessionInfo) -> Option<Arc<SceneSession>> {
        let _gen = self.gen_lock.lock();
        let session = if info.persistent_id == INVALID_PERSISTENT_ID {
            if self.check_if_reuse_session(info) == BrokerState::NotStarted {
                warn!(target: "wms::life", bundle = %info.bundle_name, "collaborator broker not started");
                return None;
            }
            let existing = if info.reuse || info.is_atomic_service {
                if self.check_collaborator_type(info.collaborator_type) {
                    self.find_session_by_affinity(&info.session_affinity)
                } else {
                    self.get_scene_session_by_name(&info.compared())
                }
            } else {
                None
            };
            match existing {
                Some(session) => {
                    info!(target: "wms::life", persistent_id = session.persistent_id(), "reusing session");
                    self.refresh_launch_info(&session, info);
                    session
                }
                None => self.request_scene_session(info.clone())?,
            }
        } else {
            match self.registry.get(info.persistent_id) {
                Some(session) => {
                    self.refresh_launch_info(&session, info);
                    session
                }
                None => {
                    warn!(
                        target: "wms::life",
                        persistent_id = info.persistent_id,
                        "requested session is gone, creating a new one"
                    );
                    info.persistent_id = INVALID_PERSISTENT_ID;
                    self.request_scene_session(info.clone())?
                }
            }
        };
        info.persistent_id = session.persistent_id();
        session.set_process_options(info.process_options);
        Some(session)
    }

    fn refresh_launch_info(&self, session: &SceneSession, info: &SessionInfo) {
        let mut launch = info.clone();
        launch.persistent_id = session.persistent_id();
        if let Err(err) = session.update_launch_info(&launch) {
            warn!(target: "wms::life", persistent_id = session.persistent_id(), %err, "launch info not applied");
        }
    }

    /// Resolves the session for `info` and hands it to the host for activation.
    ///
    /// `caller` is the session issuing the request, or `None` for the root scene. The
    /// host is notified from the target session's lifecycle queue, once every earlier
    /// lifecycle task of that session has run.
    pub fn pending_session_activation(
        &self,
        caller: Option<PersistentId>,
        mut info: SessionInfo,
    ) -> WsResult<PersistentId> {
        // Read before resolving: resolving refreshes the stored caller of a reused session.
        let caller_session = caller.and_then(|id| self.registry.get(id));
        let caller_of_caller = caller_session
            .as_ref()
            .map(|caller| caller.session_info().caller_persistent_id);
        let focused = self.focused_session_id();
        let caller_of_focused = self
            .registry
            .get(focused)
            .map(|session| session.session_info().caller_persistent_id);

        let Some(session) = self.gen_scene_session(&mut info) else {
            error!(target: "wms::life", bundle = %info.bundle_name, "failed to generate session");
            return Err(WsError::NullPtr);
        };
        let persistent_id = session.persistent_id();
        session.set_focused_on_show(info.focused_on_show());

        match &caller_session {
            Some(caller) => {
                info.caller_persistent_id = if caller.persistent_id() == persistent_id {
                    caller_of_caller.unwrap_or(INVALID_PERSISTENT_ID)
                } else {
                    caller.persistent_id()
                };
                info.is_called_rightly_by_caller_id = false;
            }
            None if info.needs_back_to_other() => {
                info.caller_persistent_id = if focused == persistent_id {
                    caller_of_focused.unwrap_or(INVALID_PERSISTENT_ID)
                } else {
                    focused
                };
            }
            None => info.caller_persistent_id = INVALID_PERSISTENT_ID,
        }
        self.refresh_launch_info(&session, &info);

        let manager = self.weak_self.clone();
        let caller_id = caller_session.as_ref().map(|caller| caller.persistent_id());
        session.post_life_cycle_task(
            "PendingSessionActivation",
            LifeCycleTaskKind::Start,
            move || {
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                if !manager.registry.contains(persistent_id) {
                    warn!(target: "wms::life", persistent_id, "session removed before activation");
                    return;
                }
                let event = SessionEvent::PendingSceneActivation(info);
                match caller_id.and_then(|id| manager.registry.get(id)) {
                    Some(caller) => caller.notify(event),
                    None => manager.notify_root(event),
                }
            },
        )?;
        Ok(persistent_id)
    }

    pub fn request_scene_session_activation(
        &self,
        persistent_id: PersistentId,
        is_new_active: bool,
    ) -> WsResult<()> {
        let session = self.session_or_err(persistent_id)?;
        let manager = self.weak_self.clone();
        session.post_life_cycle_task("RequestSceneSessionActivation", LifeCycleTaskKind::Start, move || {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            let Some(session) = manager.registry.get(persistent_id) else {
                warn!(target: "wms::life", persistent_id, "session removed before activation");
                return;
            };
            if let Err(err) = manager.activate(&session, is_new_active) {
                error!(target: "wms::life", persistent_id, %err, code = err.code() as i32, "activation failed");
            }
        })
    }

    /// Brings a session on screen and makes it the active one.
    ///
    /// A new activation may start from a disconnected session. A re-activation
    /// expects the session to be connected already, typically in the background.
    fn activate(&self, session: &Arc<SceneSession>, is_new_active: bool) -> WsResult<()> {
        let persistent_id = session.persistent_id();
        let state = session.state();
        info!(target: "wms::life", persistent_id, is_new_active, %state, "activating session");
        match state {
            SessionState::End => return Err(WsError::InvalidSession(persistent_id)),
            SessionState::Disconnect if !is_new_active => {
                return Err(WsError::InvalidState {
                    from: state,
                    to: SessionState::Active,
                });
            }
            SessionState::Disconnect => ignore_repeat(session.connect(None))?,
            _ => {}
        }
        if matches!(
            session.state(),
            SessionState::Connect | SessionState::Background
        ) {
            ignore_repeat(session.foreground())?;
        }
        ignore_repeat(session.update_active_status(true))?;
        if !session.display_id().is_valid() {
            session.set_display_id(self.default_display_id());
        }
        if let Err(err) = ignore_repeat(self.raise_to_top(persistent_id)) {
            warn!(target: "wms::life", persistent_id, %err, "raise on activation failed");
        }
        if let Err(err) = self.focus.request_focus_status(
            persistent_id,
            true,
            true,
            FocusChangeReason::Foreground,
        ) {
            debug!(target: "wms::focus", persistent_id, %err, "activation did not move focus");
        }
        Ok(())
    }

    pub fn request_scene_session_background(
        &self,
        persistent_id: PersistentId,
        options: BackgroundOptions,
    ) -> WsResult<()> {
        let session = self.session_or_err(persistent_id)?;
        let manager = self.weak_self.clone();
        session.post_life_cycle_task("RequestSceneSessionBackground", LifeCycleTaskKind::Stop, move || {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            let Some(session) = manager.registry.get(persistent_id) else {
                warn!(target: "wms::life", persistent_id, "session removed before background");
                return;
            };
            info!(
                target: "wms::life",
                persistent_id,
                is_delegator = options.is_delegator,
                is_to_desktop = options.is_to_desktop,
                "moving session to background"
            );
            manager.move_to_background(&session, options.is_save_snapshot);
        })
    }

    fn move_to_background(&self, session: &Arc<SceneSession>, save_snapshot: bool) {
        let persistent_id = session.persistent_id();
        if !session.state().is_visible() {
            return;
        }
        if save_snapshot {
            self.save_session_snapshot(session);
        }
        log_transition(persistent_id, session.background());
        self.focus
            .on_session_hidden(persistent_id, FocusChangeReason::Background);
    }

    fn save_session_snapshot(&self, session: &SceneSession) {
        let persistent_id = session.persistent_id();
        let Some(pixel_map) = self.render_host.take_session_capture(persistent_id) else {
            debug!(target: "wms::pattern", persistent_id, "no capture for snapshot");
            return;
        };
        if !session.save_snapshot(Arc::new(pixel_map)) {
            debug!(target: "wms::pattern", persistent_id, "snapshot not saved");
        }
    }

    /// Tears a session down. Without `need_remove_session` the disconnected session
    /// stays registered for the recents view until purged.
    pub fn request_scene_session_destruction(
        &self,
        persistent_id: PersistentId,
        options: DestructionOptions,
    ) -> WsResult<()> {
        let session = self.session_or_err(persistent_id)?;
        let manager = self.weak_self.clone();
        session.post_life_cycle_task("RequestSceneSessionDestruction", LifeCycleTaskKind::Stop, move || {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            let Some(session) = manager.registry.get(persistent_id) else {
                warn!(target: "wms::life", persistent_id, "session already destroyed");
                return;
            };
            manager.destroy(&session, options);
        })
    }

    fn destroy(&self, session: &Arc<SceneSession>, options: DestructionOptions) {
        let persistent_id = session.persistent_id();
        info!(
            target: "wms::life",
            persistent_id,
            need_remove = options.need_remove_session,
            force_clean = options.is_force_clean,
            "destroying session"
        );
        self.move_to_background(session, options.is_save_snapshot);
        self.focus
            .on_session_hidden(persistent_id, FocusChangeReason::Destroyed);
        if options.need_remove_session {
            log_transition(persistent_id, session.end());
            self.registry.remove(persistent_id);
        } else if session.state() != SessionState::Disconnect {
            log_transition(persistent_id, session.disconnect());
        }
        if options.is_force_clean {
            session.remove_snapshot();
        }

        let session = session.clone();
        self.scheduler.post_async_task("ClearSessionCallbacks", async move {
            session.clear_callbacks();
        });
    }

    /// Ends a session that is no longer on screen and forgets it.
    pub fn clear_session(&self, persistent_id: PersistentId) -> WsResult<()> {
        let session = self.session_or_err(persistent_id)?;
        let state = session.state();
        if state.is_visible() {
            warn!(target: "wms::life", persistent_id, %state, "cannot clear a visible session");
            return Err(WsError::InvalidState {
                from: state,
                to: SessionState::End,
            });
        }
        if let Err(err) = session.terminate_session() {
            debug!(target: "wms::life", persistent_id, %err, "terminate skipped");
        }
        log_transition(persistent_id, session.end());
        self.registry.remove(persistent_id);
        session.remove_snapshot();
        info!(target: "wms::life", persistent_id, "session cleared");
        Ok(())
    }

    /// Drops disconnected sessions that the recents view does not show. Returns how many.
    pub fn purge_disconnected_sessions(&self) -> usize {
        let stale: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|s| s.state() == SessionState::Disconnect && !s.is_show_recent())
            .collect();
        for session in &stale {
            log_transition(session.persistent_id(), session.end());
            self.registry.remove(session.persistent_id());
        }
        if !stale.is_empty() {
            info!(target: "wms::life", count = stale.len(), "purged disconnected sessions");
        }
        stale.len()
    }

    /// Main windows shown in recents, topmost first.
    pub fn recent_sessions(&self) -> Vec<Arc<SceneSession>> {
        let mut sessions: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|s| {
                s.is_show_recent()
                    && s.session_info().window_type.is_main()
                    && s.state() != SessionState::End
            })
            .collect();
        sessions.sort_by(|a, b| {
            b.z_order()
                .cmp(&a.z_order())
                .then(b.persistent_id().cmp(&a.persistent_id()))
        });
        sessions
    }

    /// Places the session above every other one.
    pub fn raise_to_top(&self, persistent_id: PersistentId) -> WsResult<()> {
        let session = self.session_or_err(persistent_id)?;
        let z_order = {
            let mut top = self.top_z_order.lock();
            if session.z_order() == *top && *top != 0 {
                return Err(WsError::DoNothing);
            }
            *top += 1;
            *top
        };
        session.set_z_order(z_order);
        session.raise_to_top();
        Ok(())
    }

    pub fn request_focus_status(
        &self,
        persistent_id: PersistentId,
        focused: bool,
        by_foreground: bool,
        reason: FocusChangeReason,
    ) -> WsResult<()> {
        self.focus
            .request_focus_status(persistent_id, focused, by_foreground, reason)
    }

    pub fn focused_session_id(&self) -> PersistentId {
        self.focus.focused_session_id()
    }

    pub fn add_focus_observer(&self, observer: Arc<dyn Observer<FocusEvent>>) {
        self.focus.add_focus_observer(observer);
    }

    pub fn cache_starting_window_info(
        &self,
        ability: &SessionInfo,
        icon_path: &str,
        background_color: u32,
    ) {
        let key = StartingWindowKey::from_session(ability, *self.dark_mode.lock());
        self.starting_windows
            .cache_starting_window_info(&key, StartingWindowInfo::new(icon_path, background_color));
    }

    pub fn get_startup_page(&self, info: &SessionInfo, is_dark: bool) -> Option<StartingWindowInfo> {
        self.starting_windows
            .get_startup_page(&StartingWindowKey::from_session(info, is_dark))
    }

    pub fn on_bundle_updated(&self, bundle_name: &str) {
        self.starting_windows.on_bundle_updated(bundle_name);
    }

    pub fn on_configuration_updated(&self, dark_mode: bool) {
        *self.dark_mode.lock() = dark_mode;
        self.starting_windows.on_configuration_updated();
    }

    pub fn starting_windows(&self) -> &StartingWindowProvider {
        &self.starting_windows
    }

    pub fn sessions_on_display(&self, display_id: DisplayId) -> Vec<Arc<SceneSession>> {
        self.registry
            .snapshot()
            .into_iter()
            .filter(|s| s.display_id() == display_id)
            .collect()
    }

    /// Display hook. The change is handled on the dispatch thread.
    pub fn on_display_state_change(
        &self,
        default_display: DisplayId,
        info: &DisplayInfo,
        group: &BTreeMap<DisplayId, DisplayInfo>,
        change: DisplayStateChangeType,
    ) {
        debug!(target: "wms::dms", display = %info.id, ?change, group = group.len(), "display state change");
        let manager = self.weak_self.clone();
        let info = info.clone();
        self.scheduler.post_task("OnDisplayStateChange", move || {
            if let Some(manager) = manager.upgrade() {
                manager.apply_display_state_change(default_display, &info, change);
            }
        });
    }

    fn apply_display_state_change(
        &self,
        default_display: DisplayId,
        info: &DisplayInfo,
        change: DisplayStateChangeType,
    ) {
        {
            let mut live = self.live_displays.lock();
            let mut default = self.default_display.lock();
            if change == DisplayStateChangeType::Destroy {
                live.remove(&info.id);
                if *default == info.id {
                    *default = DisplayId::INVALID;
                }
            } else {
                live.insert(info.id);
            }
            if default_display.is_valid() {
                *default = default_display;
            }
        }
        match change {
            DisplayStateChangeType::Create
            | DisplayStateChangeType::SizeChange
            | DisplayStateChangeType::VirtualPixelRatioChange
            | DisplayStateChangeType::DisplayCompress => {
                self.render_host.on_viewport_changed(info);
            }
            DisplayStateChangeType::Destroy => {
                self.render_host.on_display_destroyed(info.id);
            }
            DisplayStateChangeType::UpdateRotation
            | DisplayStateChangeType::UpdateRotationFromWindow => {
                self.render_host.on_rotation_changed(info.id, info.rotation);
                self.render_host.on_viewport_changed(info);
                for session in self.sessions_on_display(info.id) {
                    session.request_rotation(info.rotation);
                }
            }
            DisplayStateChangeType::Freeze | DisplayStateChangeType::Unfreeze => {
                debug!(target: "wms::dms", display = %info.id, ?change, "freeze state changed");
            }
        }
        self.rehome_orphaned_sessions();
    }

    /// Moves sessions left on a destroyed display to the default display. While no
    /// default display exists they stay put and are moved once one is created.
    fn rehome_orphaned_sessions(&self) {
        let fallback = self.default_display_id();
        if !fallback.is_valid() {
            return;
        }
        let live = self.live_displays.lock().clone();
        for session in self.registry.snapshot() {
            let from = session.display_id();
            if !from.is_valid() || live.contains(&from) {
                continue;
            }
            info!(
                target: "wms::dms",
                persistent_id = session.persistent_id(),
                %from,
                to = %fallback,
                "moving session off destroyed display"
            );
            session.set_display_id(fallback);
        }
    }

    pub fn take_session_capture(&self, persistent_id: PersistentId) -> Option<PixelMap> {
        self.registry.get(persistent_id)?;
        self.render_host.take_session_capture(persistent_id)
    }

    fn session_or_err(&self, persistent_id: PersistentId) -> WsResult<Arc<SceneSession>> {
        self.registry.get(persistent_id).ok_or_else(|| {
            warn!(target: "wms::life", persistent_id, "no such session");
            WsError::InvalidSession(persistent_id)
        })
    }
}

fn log_transition(persistent_id: PersistentId, result: WsResult<()>) {
    let code = WsErrorCode::of(&result);
    match result {
        Ok(()) | Err(WsError::DoNothing) => {}
        Err(err) => warn!(target: "wms::life", persistent_id, %err, code = code as i32, "transition skipped"),
    }
}

fn ignore_repeat(result: WsResult<()>) -> WsResult<()> {
    match result {
        Err(WsError::DoNothing) => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HeadlessRenderHost;
    use crate::session::{Want, WANT_PARAM_WINDOW_FOCUSED};

    struct FixedBroker(BrokerState);

    impl SessionBroker for FixedBroker {
        fn state(&self) -> BrokerState {
            self.0
        }
    }

    fn manager_with(broker: Option<Arc<dyn SessionBroker>>) -> Arc<SceneSessionManager> {
        let scheduler = TaskScheduler::new("test-manager").expect("scheduler");
        SceneSessionManager::new(
            &Config::default(),
            scheduler,
            ManagerCollaborators {
                render_host: Arc::new(HeadlessRenderHost),
                broker,
                persistence: None,
                starting_window_rdb: None,
                starting_window_resource: None,
            },
        )
    }

    fn manager() -> Arc<SceneSessionManager> {
        manager_with(None)
    }

    fn app(ability: &str) -> SessionInfo {
        SessionInfo::new("com.example", "entry", ability)
    }

    #[test]
    fn reuse_returns_the_same_session() {
        let manager = manager();
        let mut first = app("MainAbility");
        let p1 = manager.gen_scene_session(&mut first).expect("first");
        assert_eq!(first.persistent_id, p1.persistent_id());

        let mut again = app("MainAbility");
        again.reuse = true;
        let p2 = manager.gen_scene_session(&mut again).expect("again");
        assert!(Arc::ptr_eq(&p1, &p2));
        assert_eq!(manager.registry().len(), 1);

        let mut fresh = app("MainAbility");
        manager.gen_scene_session(&mut fresh).expect("fresh");
        assert_eq!(manager.registry().len(), 2);
    }

    #[test]
    fn missing_id_is_replaced_by_a_new_session() {
        let manager = manager();
        let mut info = app("MainAbility");
        info.persistent_id = 77;
        let session = manager.gen_scene_session(&mut info).expect("session");
        assert_ne!(info.persistent_id, 77);
        assert_eq!(info.persistent_id, session.persistent_id());
    }

    #[test]
    fn broker_not_started_aborts_generation() {
        let manager = manager_with(Some(Arc::new(FixedBroker(BrokerState::NotStarted))));
        let mut info = app("MainAbility");
        info.collaborator_type = CollaboratorType::Reserve;
        assert!(manager.gen_scene_session(&mut info).is_none());
        assert!(manager.registry().is_empty());

        let manager = manager_with(Some(Arc::new(FixedBroker(BrokerState::Started))));
        let mut first = app("MainAbility");
        first.collaborator_type = CollaboratorType::Reserve;
        first.session_affinity = "doc-1".into();
        let a = manager.gen_scene_session(&mut first).expect("first");
        let mut second = first.clone();
        second.persistent_id = INVALID_PERSISTENT_ID;
        let b = manager.gen_scene_session(&mut second).expect("second");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn pending_activation_reaches_the_root_scene() {
        let manager = manager();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        manager
            .register_root_callback(
                "pendingSceneSessionActivation",
                Arc::new(move |event| {
                    if let SessionEvent::PendingSceneActivation(info) = event {
                        sink.lock().push(info.clone());
                    }
                }),
            )
            .expect("register");

        let mut info = app("MainAbility");
        info.want = Some(Want::default().with_param(WANT_PARAM_WINDOW_FOCUSED, false));
        let id = manager.pending_session_activation(None, info).expect("activation");
        for _ in 0..4 {
            manager.scheduler().flush();
        }

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].persistent_id, id);
        assert_eq!(seen[0].caller_persistent_id, INVALID_PERSISTENT_ID);
        let session = manager.get_scene_session(id).expect("session");
        assert!(!session.is_focused_on_show());
    }

    #[test]
    fn self_call_is_redirected_to_the_callers_caller() {
        let manager = manager();
        let mut launcher = app("Launcher");
        let launcher = manager.gen_scene_session(&mut launcher).expect("launcher");
        let mut target_info = app("MainAbility");
        target_info.caller_persistent_id = launcher.persistent_id();
        let target = manager.gen_scene_session(&mut target_info).expect("target");

        let mut again = app("MainAbility");
        again.persistent_id = target.persistent_id();
        manager
            .pending_session_activation(Some(target.persistent_id()), again)
            .expect("activation");
        let stored = target.session_info();
        assert_eq!(stored.caller_persistent_id, launcher.persistent_id());
        assert!(!stored.is_called_rightly_by_caller_id);
    }

    #[test]
    fn activation_background_and_destruction() {
        let manager = manager();
        let mut info = app("MainAbility");
        let session = manager.gen_scene_session(&mut info).expect("session");
        let id = session.persistent_id();

        manager.request_scene_session_activation(id, true).expect("activate");
        manager.scheduler().flush();
        manager.scheduler().flush();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(manager.focused_session_id(), id);

        manager
            .request_scene_session_background(id, BackgroundOptions::default())
            .expect("background");
        manager.scheduler().flush();
        manager.scheduler().flush();
        assert_eq!(session.state(), SessionState::Background);
        assert_eq!(manager.focused_session_id(), INVALID_PERSISTENT_ID);

        manager.request_scene_session_activation(id, false).expect("resume");
        manager.scheduler().flush();
        manager.scheduler().flush();
        assert_eq!(session.state(), SessionState::Active);
        manager
            .request_scene_session_background(id, BackgroundOptions::default())
            .expect("background again");
        manager.scheduler().flush();
        manager.scheduler().flush();

        manager
            .request_scene_session_destruction(id, DestructionOptions::default())
            .expect("destroy");
        for _ in 0..3 {
            manager.scheduler().flush();
        }
        assert_eq!(session.state(), SessionState::Disconnect);
        assert!(manager.get_scene_session(id).is_some());
        assert_eq!(manager.recent_sessions().len(), 1);

        manager.clear_session(id).expect("clear");
        assert!(manager.get_scene_session(id).is_none());
        assert_eq!(
            manager.request_scene_session_activation(id, false),
            Err(WsError::InvalidSession(id))
        );
    }

    #[test]
    fn reactivation_needs_a_connected_session() {
        let manager = manager();
        let session = manager.gen_scene_session(&mut app("MainAbility")).expect("session");
        let id = session.persistent_id();

        manager.request_scene_session_activation(id, false).expect("posted");
        manager.scheduler().flush();
        manager.scheduler().flush();
        assert_eq!(session.state(), SessionState::Disconnect);
        assert_eq!(manager.focused_session_id(), INVALID_PERSISTENT_ID);

        manager.request_scene_session_activation(id, true).expect("posted");
        manager.scheduler().flush();
        manager.scheduler().flush();
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.z_order() > 0);
    }

    #[test]
    fn activation_callback_reaches_a_caller_found_by_id() {
        let manager = manager();
        let caller = manager.gen_scene_session(&mut app("Launcher")).expect("caller");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        caller
            .register_callback(
                "pendingSceneSessionActivation",
                Arc::new(move |event| {
                    if let SessionEvent::PendingSceneActivation(info) = event {
                        sink.lock().push(info.caller_persistent_id);
                    }
                }),
            )
            .expect("register");

        manager
            .pending_session_activation(Some(caller.persistent_id()), app("MainAbility"))
            .expect("activation");
        for _ in 0..4 {
            manager.scheduler().flush();
        }
        assert_eq!(*seen.lock(), vec![caller.persistent_id()]);
    }

    #[test]
    fn raise_to_top_orders_sessions() {
        let manager = manager();
        let a = manager.gen_scene_session(&mut app("A")).expect("a");
        let b = manager.gen_scene_session(&mut app("B")).expect("b");
        manager.raise_to_top(a.persistent_id()).expect("a");
        manager.raise_to_top(b.persistent_id()).expect("b");
        assert!(b.z_order() > a.z_order());
        assert_eq!(manager.raise_to_top(b.persistent_id()), Err(WsError::DoNothing));
        let recent: Vec<_> = manager
            .recent_sessions()
            .iter()
            .map(|s| s.persistent_id())
            .collect();
        assert_eq!(recent, vec![b.persistent_id(), a.persistent_id()]);
    }
}

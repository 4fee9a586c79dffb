use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use super::{
    CallbackRegistry, EventKind, LifeCycleQueue, LifeCycleTaskKind, PipControlStatus,
    PipControlType, PipTemplateInfo, ProcessOptions, SessionCallback, SessionEvent, SessionInfo,
    SessionScale, SessionState, SizeChangeReason, WindowType,
};
use crate::error::{WsError, WsResult};
use crate::host::SessionStage;
use crate::persistence::{PixelMap, ScenePersistence};
use crate::task::TaskScheduler;
use crate::types::{DisplayId, Orientation, PersistentId, Rect, Rotation};

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct SessionFlags: u32 {
        const FOCUSABLE = 1;
        const TOUCHABLE = 1 << 1;
        const TOPMOST = 1 << 2;
        const SHOW_RECENT = 1 << 3;
        const FOCUSED_ON_SHOW = 1 << 4;
        const FORCE_HIDE = 1 << 5;
        const TERMINATING = 1 << 6;
    }
}

/// Construction parameters shared by every session of a manager.
#[derive(Clone)]
pub struct SessionOptions {
    pub scheduler: Option<Arc<TaskScheduler>>,
    pub queue_capacity: usize,
    pub task_expiry: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            scheduler: None,
            queue_capacity: super::lifecycle::DEFAULT_QUEUE_CAPACITY,
            task_expiry: super::lifecycle::DEFAULT_TASK_EXPIRY,
        }
    }
}

struct SessionInner {
    info: SessionInfo,
    state: SessionState,
    rect: Rect,
    display_id: DisplayId,
    z_order: u32,
    flags: SessionFlags,
    scale: SessionScale,
    rotation: Rotation,
    requested_orientation: Orientation,
    focused: bool,
    pip_template: Option<PipTemplateInfo>,
}

/// Runtime state machine of one window.
///
/// Host notifications are posted to the dispatch scheduler when one is attached and
/// run inline otherwise; they are never delivered while the session lock is held.
pub struct SceneSession {
    persistent_id: PersistentId,
    inner: Mutex<SessionInner>,
    callbacks: Arc<CallbackRegistry>,
    lifecycle: LifeCycleQueue,
    scheduler: Option<Arc<TaskScheduler>>,
    stage: RwLock<Option<Arc<dyn SessionStage>>>,
    persistence: Option<Arc<dyn ScenePersistence>>,
}

impl SceneSession {
    pub fn new(
        mut info: SessionInfo,
        persistent_id: PersistentId,
        options: SessionOptions,
        persistence: Option<Arc<dyn ScenePersistence>>,
    ) -> Arc<Self> {
        info.persistent_id = persistent_id;
        let mut flags = SessionFlags::TOUCHABLE | SessionFlags::FOCUSED_ON_SHOW;
        if info.window_type.default_focusable() {
            flags |= SessionFlags::FOCUSABLE;
        }
        if info.window_type.is_main() {
            flags |= SessionFlags::SHOW_RECENT;
        }
        let display_id = info.display_id.unwrap_or(DisplayId::INVALID);
        Arc::new(Self {
            persistent_id,
            lifecycle: LifeCycleQueue::new(
                persistent_id,
                options.queue_capacity,
                options.task_expiry,
                options.scheduler.clone(),
            ),
            scheduler: options.scheduler,
            inner: Mutex::new(SessionInner {
                info,
                state: SessionState::Disconnect,
                rect: Rect::default(),
                display_id,
                z_order: 0,
                flags,
                scale: SessionScale::default(),
                rotation: Rotation::default(),
                requested_orientation: Orientation::default(),
                focused: false,
                pip_template: None,
            }),
            callbacks: Arc::new(CallbackRegistry::default()),
            stage: RwLock::new(None),
            persistence,
        })
    }

    pub fn persistent_id(&self) -> PersistentId {
        self.persistent_id
    }

    pub fn session_info(&self) -> SessionInfo {
        self.inner.lock().info.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    pub fn rect(&self) -> Rect {
        self.inner.lock().rect
    }

    pub fn display_id(&self) -> DisplayId {
        self.inner.lock().display_id
    }

    pub fn z_order(&self) -> u32 {
        self.inner.lock().z_order
    }

    pub fn flags(&self) -> SessionFlags {
        self.inner.lock().flags
    }

    pub fn is_focusable(&self) -> bool {
        self.flags().contains(SessionFlags::FOCUSABLE)
    }

    pub fn is_focused(&self) -> bool {
        self.inner.lock().focused
    }

    pub fn is_focused_on_show(&self) -> bool {
        self.flags().contains(SessionFlags::FOCUSED_ON_SHOW)
    }

    pub fn is_show_recent(&self) -> bool {
        self.flags().contains(SessionFlags::SHOW_RECENT)
    }

    pub fn is_terminating(&self) -> bool {
        self.flags().contains(SessionFlags::TERMINATING)
    }

    pub fn rotation(&self) -> Rotation {
        self.inner.lock().rotation
    }

    pub fn scale(&self) -> SessionScale {
        self.inner.lock().scale
    }

    pub fn requested_orientation(&self) -> Orientation {
        self.inner.lock().requested_orientation
    }

    pub fn lifecycle(&self) -> &LifeCycleQueue {
        &self.lifecycle
    }

    pub fn persistence(&self) -> Option<&Arc<dyn ScenePersistence>> {
        self.persistence.as_ref()
    }

    /// Replaces the launch identity. Only legal before the session is shown.
    pub fn set_session_info(&self, mut info: SessionInfo) -> WsResult<()> {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, SessionState::Disconnect | SessionState::Connect) {
            warn!(
                target: "wms::life",
                persistent_id = self.persistent_id,
                state = %inner.state,
                "session info can only be replaced before foreground"
            );
            return Err(WsError::InvalidState {
                from: inner.state,
                to: inner.state,
            });
        }
        info.persistent_id = self.persistent_id;
        inner.info = info;
        Ok(())
    }

    /// Refreshes the caller-supplied launch parameters, keeping the identity.
    pub fn update_launch_info(&self, info: &SessionInfo) -> WsResult<()> {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            warn!(target: "wms::life", persistent_id = self.persistent_id, "launch info update on ended session");
            return Err(WsError::InvalidSession(self.persistent_id));
        }
        let current = &mut inner.info;
        current.want = info.want.clone();
        current.caller_persistent_id = info.caller_persistent_id;
        current.reuse = info.reuse;
        current.is_atomic_service = info.is_atomic_service;
        current.full_screen_start = info.full_screen_start;
        current.is_called_rightly_by_caller_id = info.is_called_rightly_by_caller_id;
        current.continue_session_id = info.continue_session_id.clone();
        current.session_affinity = info.session_affinity.clone();
        current.collaborator_type = info.collaborator_type;
        if info.process_options.is_some() {
            current.process_options = info.process_options;
        }
        Ok(())
    }

    pub fn set_process_options(&self, options: Option<ProcessOptions>) {
        self.inner.lock().info.process_options = options;
    }

    /// Applies `rotation`; `false` if it is already current.
    pub fn request_rotation(&self, rotation: Rotation) -> bool {
        let mut inner = self.inner.lock();
        if inner.rotation == rotation {
            return false;
        }
        debug!(target: "wms::life", persistent_id = self.persistent_id, from = %inner.rotation, to = %rotation, "session rotated");
        inner.rotation = rotation;
        true
    }

    pub fn post_life_cycle_task(
        &self,
        name: &str,
        kind: LifeCycleTaskKind,
        task: impl FnOnce() + Send + 'static,
    ) -> WsResult<()> {
        self.lifecycle.post(name, kind, task)
    }

    pub fn register_callback(&self, name: &str, handler: SessionCallback) -> WsResult<EventKind> {
        self.callbacks.register(name, handler)
    }

    pub fn is_callback_registered(&self, kind: EventKind) -> bool {
        self.callbacks.is_registered(kind)
    }

    pub fn clear_callbacks(&self) {
        debug!(target: "wms::life", persistent_id = self.persistent_id, count = self.callbacks.len(), "clearing callbacks");
        self.callbacks.clear();
    }

    pub fn set_session_stage(&self, stage: Option<Arc<dyn SessionStage>>) {
        *self.stage.write() = stage;
    }

    pub fn has_session_stage(&self) -> bool {
        self.stage.read().is_some()
    }

    pub fn connect(&self, stage: Option<Arc<dyn SessionStage>>) -> WsResult<()> {
        self.transition(SessionState::Connect)?;
        if stage.is_some() {
            self.set_session_stage(stage);
        }
        Ok(())
    }

    pub fn foreground(&self) -> WsResult<()> {
        self.transition(SessionState::Foreground)
    }

    pub fn update_active_status(&self, active: bool) -> WsResult<()> {
        let to = if active {
            SessionState::Active
        } else {
            SessionState::Inactive
        };
        self.transition(to)
    }

    /// Moves the session off screen. An active session passes through inactive first.
    pub fn background(&self) -> WsResult<()> {
        if self.state() == SessionState::Active {
            self.transition(SessionState::Inactive)?;
        }
        self.transition(SessionState::Background)
    }

    pub fn disconnect(&self) -> WsResult<()> {
        if self.state().is_visible() {
            self.background()?;
        }
        self.transition(SessionState::Disconnect)?;
        self.inner.lock().focused = false;
        self.set_session_stage(None);
        Ok(())
    }

    pub fn end(&self) -> WsResult<()> {
        self.transition(SessionState::End)?;
        self.inner.lock().focused = false;
        self.set_session_stage(None);
        Ok(())
    }

    fn transition(&self, to: SessionState) -> WsResult<()> {
        let from = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            if from == to {
                debug!(target: "wms::life", persistent_id = self.persistent_id, state = %to, "already in state");
                return Err(WsError::DoNothing);
            }
            if !from.can_transition_to(to) {
                warn!(target: "wms::life", persistent_id = self.persistent_id, %from, %to, "illegal session transition");
                return Err(WsError::InvalidState { from, to });
            }
            inner.state = to;
            from
        };
        info!(target: "wms::life", persistent_id = self.persistent_id, %from, %to, "session state changed");
        self.notify(SessionEvent::StateChange(to));
        Ok(())
    }

    /// Delivers `event` to the host, through the dispatch thread when one is attached.
    pub(crate) fn notify(&self, event: SessionEvent) {
        let callbacks = self.callbacks.clone();
        match &self.scheduler {
            Some(scheduler) => {
                let label = event.kind().name();
                if !scheduler.post_task(label, move || {
                    callbacks.dispatch(&event);
                }) {
                    warn!(target: "wms::life", persistent_id = self.persistent_id, callback = label, "notification dropped");
                }
            }
            None => {
                callbacks.dispatch(&event);
            }
        }
    }

    fn update_flag(&self, flag: SessionFlags, value: bool) -> bool {
        let mut inner = self.inner.lock();
        if inner.flags.contains(flag) == value {
            return false;
        }
        inner.flags.set(flag, value);
        true
    }

    pub fn set_focusable(&self, focusable: bool) -> bool {
        let changed = self.update_flag(SessionFlags::FOCUSABLE, focusable);
        if changed {
            self.notify(SessionEvent::FocusableChange(focusable));
        }
        changed
    }

    pub fn set_touchable(&self, touchable: bool) -> bool {
        let changed = self.update_flag(SessionFlags::TOUCHABLE, touchable);
        if changed {
            self.notify(SessionEvent::TouchableChange(touchable));
        }
        changed
    }

    pub fn set_topmost(&self, topmost: bool) -> bool {
        let changed = self.update_flag(SessionFlags::TOPMOST, topmost);
        if changed {
            self.notify(SessionEvent::TopmostChange(topmost));
        }
        changed
    }

    pub fn set_force_hide(&self, hide: bool) -> bool {
        let changed = self.update_flag(SessionFlags::FORCE_HIDE, hide);
        if changed {
            self.notify(SessionEvent::ForceHideChange(hide));
        }
        changed
    }

    pub fn set_show_recent(&self, show: bool) -> bool {
        self.update_flag(SessionFlags::SHOW_RECENT, show)
    }

    pub fn set_focused_on_show(&self, focused_on_show: bool) {
        debug!(target: "wms::focus", persistent_id = self.persistent_id, focused_on_show, "focused on show");
        self.update_flag(SessionFlags::FOCUSED_ON_SHOW, focused_on_show);
    }

    pub fn set_z_order(&self, z_order: u32) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.z_order == z_order {
                return false;
            }
            inner.z_order = z_order;
        }
        self.notify(SessionEvent::ZOrderChange(z_order));
        true
    }

    pub fn set_scale(&self, scale: SessionScale) -> WsResult<()> {
        let valid = [scale.x, scale.y, scale.pivot_x, scale.pivot_y]
            .iter()
            .all(|v| v.is_finite())
            && scale.x > 0.0
            && scale.y > 0.0;
        if !valid {
            warn!(target: "wms::life", persistent_id = self.persistent_id, ?scale, "rejecting scale");
            return Err(WsError::InvalidParam(format!("scale {scale:?}")));
        }
        {
            let mut inner = self.inner.lock();
            if inner.scale == scale {
                return Err(WsError::DoNothing);
            }
            inner.scale = scale;
        }
        self.notify(SessionEvent::ScaleChange(scale));
        Ok(())
    }

    pub fn set_requested_orientation(&self, orientation: Orientation) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.requested_orientation == orientation {
                return false;
            }
            inner.requested_orientation = orientation;
        }
        self.notify(SessionEvent::RequestedOrientationChange(orientation));
        true
    }

    pub fn update_rect(&self, rect: Rect, reason: SizeChangeReason) -> WsResult<()> {
        if rect.is_empty() {
            warn!(target: "wms::life", persistent_id = self.persistent_id, %rect, "rejecting empty rect");
            return Err(WsError::InvalidParam(format!("rect {rect}")));
        }
        let display_id = {
            let mut inner = self.inner.lock();
            if inner.rect == rect && reason != SizeChangeReason::Rotation {
                return Err(WsError::DoNothing);
            }
            inner.rect = rect;
            inner.display_id
        };
        trace!(target: "wms::life", persistent_id = self.persistent_id, %rect, ?reason, "rect updated");
        if let Some(stage) = self.stage.read().clone() {
            if let Err(err) = stage.update_rect(rect, reason) {
                warn!(target: "wms::life", persistent_id = self.persistent_id, %err, "stage rejected rect");
            }
        }
        self.notify(SessionEvent::RectChange {
            rect,
            reason,
            display_id,
        });
        Ok(())
    }

    pub fn set_display_id(&self, display_id: DisplayId) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.display_id == display_id {
                return false;
            }
            inner.display_id = display_id;
            inner.info.display_id = Some(display_id);
        }
        if let Some(stage) = self.stage.read().clone() {
            if let Err(err) = stage.update_display_id(display_id) {
                warn!(target: "wms::life", persistent_id = self.persistent_id, %err, "stage rejected display id");
            }
        }
        true
    }

    /// Records the focus decision made by the manager and tells the stage and host.
    pub fn update_focus(&self, focused: bool) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.focused == focused {
                return false;
            }
            inner.focused = focused;
        }
        debug!(target: "wms::focus", persistent_id = self.persistent_id, focused, "focus updated");
        if let Some(stage) = self.stage.read().clone() {
            if let Err(err) = stage.update_focus(focused) {
                warn!(target: "wms::focus", persistent_id = self.persistent_id, %err, "stage rejected focus");
            }
        }
        self.notify(SessionEvent::FocusChange(focused));
        true
    }

    /// Only picture-in-picture windows carry a template.
    pub fn set_pip_template_info(&self, template: PipTemplateInfo) -> WsResult<()> {
        let mut inner = self.inner.lock();
        let window_type = inner.info.window_type;
        if window_type != WindowType::Pip {
            warn!(target: "wms::pip", persistent_id = self.persistent_id, ?window_type, "pip template on a non-pip window");
            return Err(WsError::InvalidWindowType);
        }
        debug!(target: "wms::pip", persistent_id = self.persistent_id, template_type = ?template.template_type, priority = template.priority, "pip template set");
        inner.pip_template = Some(template);
        Ok(())
    }

    pub fn pip_template_info(&self) -> Option<PipTemplateInfo> {
        self.inner.lock().pip_template.clone()
    }

    pub fn set_pip_action_event(&self, action: &str, status: i32) -> WsResult<()> {
        let Some(stage) = self.stage.read().clone() else {
            error!(target: "wms::pip", persistent_id = self.persistent_id, action, "no session stage");
            return Err(WsError::NullPtr);
        };
        stage.set_pip_action_event(action, status);
        Ok(())
    }

    pub fn set_pip_control_event(
        &self,
        control: PipControlType,
        status: PipControlStatus,
    ) -> WsResult<()> {
        let Some(stage) = self.stage.read().clone() else {
            error!(target: "wms::pip", persistent_id = self.persistent_id, ?control, "no session stage");
            return Err(WsError::NullPtr);
        };
        stage.set_pip_control_event(control, status);
        Ok(())
    }

    /// Client reported a control change: remember it and tell the host.
    pub fn notify_pip_control_status_change(
        &self,
        control: PipControlType,
        status: PipControlStatus,
    ) {
        {
            let mut inner = self.inner.lock();
            inner
                .pip_template
                .get_or_insert_with(PipTemplateInfo::default)
                .update_control(control, status);
        }
        info!(target: "wms::pip", persistent_id = self.persistent_id, ?control, ?status, "pip control status changed");
        self.notify(SessionEvent::PipControlStatusChange { control, status });
    }

    pub fn notify_auto_start_pip(&self, is_auto_start: bool, priority: u32) {
        self.notify(SessionEvent::AutoStartPip {
            is_auto_start,
            priority,
        });
    }

    pub fn raise_to_top(&self) {
        self.notify(SessionEvent::RaiseToTop);
    }

    pub fn on_back_pressed(&self, needs_move_to_background: bool) {
        self.notify(SessionEvent::BackPressed {
            needs_move_to_background,
        });
    }

    pub fn terminate_session(&self) -> WsResult<()> {
        if !self.update_flag(SessionFlags::TERMINATING, true) {
            debug!(target: "wms::life", persistent_id = self.persistent_id, "already terminating");
            return Err(WsError::DoNothing);
        }
        self.notify(SessionEvent::Terminate(self.session_info()));
        Ok(())
    }

    pub fn notify_session_exception(&self, need_remove: bool) {
        self.notify(SessionEvent::Exception {
            info: self.session_info(),
            need_remove,
        });
    }

    /// Persists `pixel_map` in the background. `false` if there is nowhere to save it.
    pub fn save_snapshot(&self, pixel_map: Arc<PixelMap>) -> bool {
        let Some(persistence) = &self.persistence else {
            debug!(target: "wms::pattern", persistent_id = self.persistent_id, "no persistence attached");
            return false;
        };
        let persistent_id = self.persistent_id;
        persistence.save_snapshot(
            pixel_map,
            Box::new(move || {
                debug!(target: "wms::pattern", persistent_id, "snapshot saved");
            }),
        );
        true
    }

    pub fn snapshot_exists(&self) -> bool {
        self.persistence
            .as_ref()
            .is_some_and(|p| p.is_snapshot_existed())
    }

    pub fn remove_snapshot(&self) {
        if let Some(persistence) = &self.persistence {
            persistence.remove_snapshot();
        }
    }
}

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, trace};

use super::{PipControlStatus, PipControlType, SessionInfo, SessionState, SizeChangeReason};
use crate::error::{WsError, WsResult};
use crate::types::{DisplayId, Orientation, Rect};

macro_rules! event_kinds {
    ($($variant:ident => $name:literal,)*) => {
        /// Host callback names, validated once at registration.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum EventKind {
            $($variant,)*
        }

        impl EventKind {
            pub const ALL: &'static [EventKind] = &[$(EventKind::$variant,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(EventKind::$variant => $name,)*
                }
            }
        }

        impl FromStr for EventKind {
            type Err = WsError;

            fn from_str(name: &str) -> Result<Self, Self::Err> {
                match name {
                    $($name => Ok(EventKind::$variant),)*
                    other => Err(WsError::InvalidParam(format!("unknown callback type {other}"))),
                }
            }
        }
    };
}

event_kinds! {
    PendingSceneActivation => "pendingSceneSessionActivation",
    SessionStateChange => "sessionStateChange",
    SessionRectChange => "sessionRectChange",
    SessionFocusChange => "sessionFocusChange",
    SessionFocusableChange => "sessionFocusableChange",
    SessionTouchableChange => "sessionTouchableChange",
    SessionTopmostChange => "sessionTopmostChange",
    SessionZOrderChange => "sessionZOrderChange",
    SessionScaleChange => "sessionScaleChange",
    RequestedOrientationChange => "sessionRequestedOrientationChange",
    ForceHideChange => "sessionForceHideChange",
    RaiseToTop => "raiseToTop",
    BackPressed => "backPressed",
    TerminateSession => "terminateSession",
    SessionException => "sessionException",
    PipControlStatusChange => "sessionPiPControlStatusChange",
    AutoStartPip => "autoStartPiP",
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionScale {
    pub x: f32,
    pub y: f32,
    pub pivot_x: f32,
    pub pivot_y: f32,
}

impl Default for SessionScale {
    fn default() -> Self {
        Self {
            x: 1.0,
            y: 1.0,
            pivot_x: 0.0,
            pivot_y: 0.0,
        }
    }
}

/// One notification towards the host, with its event-specific arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PendingSceneActivation(SessionInfo),
    StateChange(SessionState),
    RectChange {
        rect: Rect,
        reason: SizeChangeReason,
        display_id: DisplayId,
    },
    FocusChange(bool),
    FocusableChange(bool),
    TouchableChange(bool),
    TopmostChange(bool),
    ZOrderChange(u32),
    ScaleChange(SessionScale),
    RequestedOrientationChange(Orientation),
    ForceHideChange(bool),
    RaiseToTop,
    BackPressed { needs_move_to_background: bool },
    Terminate(SessionInfo),
    Exception { info: SessionInfo, need_remove: bool },
    PipControlStatusChange {
        control: PipControlType,
        status: PipControlStatus,
    },
    AutoStartPip { is_auto_start: bool, priority: u32 },
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::PendingSceneActivation(_) => EventKind::PendingSceneActivation,
            SessionEvent::StateChange(_) => EventKind::SessionStateChange,
            SessionEvent::RectChange { .. } => EventKind::SessionRectChange,
            SessionEvent::FocusChange(_) => EventKind::SessionFocusChange,
            SessionEvent::FocusableChange(_) => EventKind::SessionFocusableChange,
            SessionEvent::TouchableChange(_) => EventKind::SessionTouchableChange,
            SessionEvent::TopmostChange(_) => EventKind::SessionTopmostChange,
            SessionEvent::ZOrderChange(_) => EventKind::SessionZOrderChange,
            SessionEvent::ScaleChange(_) => EventKind::SessionScaleChange,
            SessionEvent::RequestedOrientationChange(_) => EventKind::RequestedOrientationChange,
            SessionEvent::ForceHideChange(_) => EventKind::ForceHideChange,
            SessionEvent::RaiseToTop => EventKind::RaiseToTop,
            SessionEvent::BackPressed { .. } => EventKind::BackPressed,
            SessionEvent::Terminate(_) => EventKind::TerminateSession,
            SessionEvent::Exception { .. } => EventKind::SessionException,
            SessionEvent::PipControlStatusChange { .. } => EventKind::PipControlStatusChange,
            SessionEvent::AutoStartPip { .. } => EventKind::AutoStartPip,
        }
    }
}

pub type SessionCallback = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// One handler per event kind; the last registration wins.
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: RwLock<HashMap<EventKind, SessionCallback>>,
}

impl CallbackRegistry {
    /// Registers `handler` under the host-facing `name`.
    ///
    /// Unknown names fail with [`WsError::InvalidParam`]. Registering the very same
    /// handler again for a kind is rejected with [`WsError::DoNothing`].
    pub fn register(&self, name: &str, handler: SessionCallback) -> WsResult<EventKind> {
        let kind = name.parse::<EventKind>().inspect_err(|err| {
            error!(target: "wms::life", %err, "rejecting callback registration");
        })?;
        let mut handlers = self.handlers.write();
        if handlers
            .get(&kind)
            .is_some_and(|existing| Arc::ptr_eq(existing, &handler))
        {
            error!(target: "wms::life", callback = %kind, "callback is already registered");
            return Err(WsError::DoNothing);
        }
        handlers.insert(kind, handler);
        Ok(kind)
    }

    pub fn unregister(&self, kind: EventKind) -> bool {
        self.handlers.write().remove(&kind).is_some()
    }

    pub fn is_registered(&self, kind: EventKind) -> bool {
        self.handlers.read().contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Runs the handler for `event`, if any. Returns whether one ran.
    pub fn dispatch(&self, event: &SessionEvent) -> bool {
        let handler = self.handlers.read().get(&event.kind()).cloned();
        match handler {
            Some(handler) => {
                handler(event);
                true
            }
            None => {
                trace!(target: "wms::life", callback = %event.kind(), "no handler registered");
                false
            }
        }
    }
}

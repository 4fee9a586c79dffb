//! Per-window runtime state.
//!
//! A [`SceneSession`] is the state machine of one window: its lifecycle state, its
//! geometry and flags, its picture-in-picture sub-state and the handlers the host
//! registered for it. Lifecycle work is serialized through the session's own
//! [`LifeCycleQueue`].

use serde::Serialize;

mod callbacks;
mod info;
pub mod lifecycle;
mod pip;
mod scene_session;
mod state;

pub use callbacks::{CallbackRegistry, EventKind, SessionCallback, SessionEvent, SessionScale};
pub use info::{
    CollaboratorType, ComparedSessionInfo, ProcessOptions, SceneType, SessionInfo, Want,
    WindowType, WANT_PARAM_BACK_TO_OTHER_MISSION_STACK, WANT_PARAM_CONTINUE_SESSION_ID,
    WANT_PARAM_WINDOW_FOCUSED,
};
pub use lifecycle::{LifeCycleQueue, LifeCycleTaskKind, QueuedTask};
pub use pip::{
    PipControlStatus, PipControlStatusInfo, PipControlType, PipState, PipTemplateInfo,
    PipTemplateType,
};
pub use scene_session::{SceneSession, SessionFlags, SessionOptions};
pub use state::SessionState;

/// Why a session rect changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SizeChangeReason {
    #[default]
    Undefined,
    Maximize,
    Recover,
    Rotation,
    Drag,
    DragStart,
    DragEnd,
    Resize,
    Move,
    Hide,
    Transform,
    CustomAnimationShow,
    FullToSplit,
    SplitToFull,
}

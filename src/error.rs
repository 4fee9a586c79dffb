use thiserror::Error;

use crate::session::SessionState;
use crate::types::PersistentId;

/// Host-facing result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum WsErrorCode {
    Ok = 0,
    InvalidParam = 401,
    RepeatOperation = 1_300_001,
    StateAbnormally = 1_300_002,
    SystemAbnormally = 1_300_003,
}

impl WsErrorCode {
    pub fn of<T>(result: &WsResult<T>) -> Self {
        match result {
            Ok(_) => WsErrorCode::Ok,
            Err(err) => err.code(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WsError {
    #[error("nothing to do")]
    DoNothing,
    #[error("dispatch to the host is unavailable")]
    IpcFailed,
    #[error("required collaborator is gone")]
    NullPtr,
    #[error("no such session: {0}")]
    InvalidSession(PersistentId),
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("window type not allowed here")]
    InvalidWindowType,
    #[error("illegal state transition {from:?} -> {to:?}")]
    InvalidState { from: SessionState, to: SessionState },
    #[error("lifecycle queue of session {0} is full")]
    QueueFull(PersistentId),
}

impl WsError {
    pub fn code(&self) -> WsErrorCode {
        match self {
            WsError::InvalidParam(_) | WsError::InvalidWindowType => WsErrorCode::InvalidParam,
            WsError::DoNothing => WsErrorCode::RepeatOperation,
            WsError::NullPtr
            | WsError::InvalidSession(_)
            | WsError::InvalidState { .. } => WsErrorCode::StateAbnormally,
            WsError::IpcFailed | WsError::QueueFull(_) => WsErrorCode::SystemAbnormally,
        }
    }
}

pub type WsResult<T> = std::result::Result<T, WsError>;

//! Picture-in-picture sub-state carried by a session.
//!
//! Control types and statuses arrive already validated by the binding layer; the
//! session stores and forwards them without re-checking.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum PipTemplateType {
    #[default]
    VideoPlay,
    VideoCall,
    VideoMeeting,
    VideoLive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PipControlType {
    VideoPlayPause,
    VideoPrevious,
    VideoNext,
    FastForward,
    FastBackward,
    HangUpButton,
    MicrophoneSwitch,
    CameraSwitch,
    MuteSwitch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PipControlStatus {
    Play,
    Pause,
    Open,
    Close,
    Enabled,
    Disabled,
}

impl PipControlStatus {
    /// Wire value; play/open and pause/close share a value.
    pub fn raw(self) -> i32 {
        match self {
            PipControlStatus::Play | PipControlStatus::Open => 1,
            PipControlStatus::Pause | PipControlStatus::Close => 0,
            PipControlStatus::Enabled => -2,
            PipControlStatus::Disabled => -3,
        }
    }

    pub fn is_enablement(self) -> bool {
        matches!(self, PipControlStatus::Enabled | PipControlStatus::Disabled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PipState {
    AboutToStart,
    Started,
    AboutToStop,
    Stopped,
    AboutToRestore,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipControlStatusInfo {
    pub control_type: PipControlType,
    pub status: PipControlStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipTemplateInfo {
    pub template_type: PipTemplateType,
    pub priority: u32,
    pub control_group: Vec<u32>,
    pub control_status: Vec<PipControlStatusInfo>,
    pub control_enable: Vec<PipControlStatusInfo>,
}

impl PipTemplateInfo {
    /// Records the latest status of `control_type`, replacing any previous entry.
    pub fn update_control(&mut self, control_type: PipControlType, status: PipControlStatus) {
        let list = if status.is_enablement() {
            &mut self.control_enable
        } else {
            &mut self.control_status
        };
        match list.iter_mut().find(|entry| entry.control_type == control_type) {
            Some(entry) => entry.status = status,
            None => list.push(PipControlStatusInfo {
                control_type,
                status,
            }),
        }
    }

    pub fn status_of(&self, control_type: PipControlType) -> Option<PipControlStatus> {
        self.control_status
            .iter()
            .find(|entry| entry.control_type == control_type)
            .map(|entry| entry.status)
    }
}

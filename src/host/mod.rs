//! Seams towards the collaborators living outside the control plane.
//!
//! [`RenderHost`] stands for the rendering side (root scene, vsync, surface capture),
//! [`SessionBroker`] for the ability broker consulted before a session is reused and
//! [`SessionStage`] for the client half of a window. Every method has a no-op default
//! so tests and the headless binary only implement what they observe.

use crate::display::DisplayInfo;
use crate::error::WsResult;
use crate::persistence::PixelMap;
use crate::session::{PipControlStatus, PipControlType, SizeChangeReason};
use crate::types::{DisplayId, PersistentId, Rect, Rotation, ScreenId};

pub trait RenderHost: Send + Sync {
    fn on_viewport_changed(&self, _info: &DisplayInfo) {}

    fn on_display_destroyed(&self, _display: DisplayId) {}

    fn on_rotation_changed(&self, _display: DisplayId, _rotation: Rotation) {}

    fn take_surface_capture(&self, _screen: ScreenId) -> Option<PixelMap> {
        None
    }

    fn take_session_capture(&self, _session: PersistentId) -> Option<PixelMap> {
        None
    }
}

/// Readiness of the collaborator broker that owns reusable sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Unknown,
    Started,
    NotStarted,
}

pub trait SessionBroker: Send + Sync {
    fn state(&self) -> BrokerState;
}

pub trait SessionStage: Send + Sync {
    fn update_rect(&self, _rect: Rect, _reason: SizeChangeReason) -> WsResult<()> {
        Ok(())
    }

    fn update_focus(&self, _focused: bool) -> WsResult<()> {
        Ok(())
    }

    fn update_display_id(&self, _display: DisplayId) -> WsResult<()> {
        Ok(())
    }

    fn set_pip_action_event(&self, _action: &str, _status: i32) {}

    fn set_pip_control_event(&self, _control: PipControlType, _status: PipControlStatus) {}
}

/// Render host used when no compositor is attached: captures nothing and logs viewport changes.
#[derive(Debug, Default)]
pub struct HeadlessRenderHost;

impl RenderHost for HeadlessRenderHost {
    fn on_viewport_changed(&self, info: &DisplayInfo) {
        tracing::debug!(
            target: "wms::dms",
            display = %info.id,
            rect = %info.rect(),
            rotation = %info.rotation,
            "viewport changed"
        );
    }

    fn on_display_destroyed(&self, display_id: DisplayId) {
        tracing::debug!(target: "wms::dms", display = %display_id, "viewport destroyed");
    }
}

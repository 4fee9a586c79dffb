//! Physical and virtual screens, their mode tables and group membership.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::types::{GroupId, Orientation, Point, Rect, Rotation, ScreenId};

mod controller;

pub use controller::ScreenController;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SupportedMode {
    pub width: u32,
    pub height: u32,
    pub refresh_rate: u32,
}

impl SupportedMode {
    pub const fn new(width: u32, height: u32, refresh_rate: u32) -> Self {
        Self {
            width,
            height,
            refresh_rate,
        }
    }
}

impl fmt::Display for SupportedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.width, self.height, self.refresh_rate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScreenType {
    Real,
    Virtual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScreenCombination {
    Alone,
    Expand,
    Mirror,
    /// A raw value the controller does not know how to compose.
    Unsupported(u32),
}

impl ScreenCombination {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => ScreenCombination::Alone,
            1 => ScreenCombination::Expand,
            2 => ScreenCombination::Mirror,
            other => ScreenCombination::Unsupported(other),
        }
    }
}

/// Screen topology and geometry events, as seen by display listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DisplayChangeEvent {
    DisplaySizeChanged,
    UpdateOrientation,
    UpdateOrientationFromWindow,
    DisplayVirtualPixelRatioChanged,
    UpdateRotation,
    UpdateRotationFromWindow,
    DisplayFreezed,
    DisplayUnfreezed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Screen {
    pub id: ScreenId,
    pub name: String,
    pub screen_type: ScreenType,
    pub modes: Vec<SupportedMode>,
    /// Index into `modes`; negative means "no active mode".
    pub active_idx: i32,
    pub rotation: Rotation,
    pub orientation: Orientation,
    pub virtual_pixel_ratio: f32,
    pub group_id: Option<GroupId>,
    /// Position of this screen inside an expanded canvas.
    pub start_point: Point,
}

impl Screen {
    pub fn new(id: ScreenId, name: impl Into<String>, screen_type: ScreenType) -> Self {
        Self {
            id,
            name: name.into(),
            screen_type,
            modes: Vec::new(),
            active_idx: -1,
            rotation: Rotation::default(),
            orientation: Orientation::default(),
            virtual_pixel_ratio: 1.0,
            group_id: None,
            start_point: Point::default(),
        }
    }

    pub fn with_modes(mut self, modes: Vec<SupportedMode>, active_idx: i32) -> Self {
        self.modes = modes;
        self.active_idx = active_idx;
        self
    }

    pub fn active_mode(&self) -> Option<&SupportedMode> {
        usize::try_from(self.active_idx)
            .ok()
            .and_then(|idx| self.modes.get(idx))
    }

    pub fn is_virtual(&self) -> bool {
        self.screen_type == ScreenType::Virtual
    }

    /// Area covered inside an expanded canvas, unrotated.
    pub fn canvas_rect(&self) -> Option<Rect> {
        self.active_mode().map(|mode| {
            Rect::new(
                self.start_point.x,
                self.start_point.y,
                mode.width,
                mode.height,
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenGroup {
    pub id: GroupId,
    pub combination: ScreenCombination,
    pub children: BTreeMap<ScreenId, Point>,
    pub mirror_primary: Option<ScreenId>,
}

impl ScreenGroup {
    pub fn new(id: GroupId, combination: ScreenCombination) -> Self {
        Self {
            id,
            combination,
            children: BTreeMap::new(),
            mirror_primary: None,
        }
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn child_ids(&self) -> Vec<ScreenId> {
        self.children.keys().copied().collect()
    }

    pub fn contains(&self, id: ScreenId) -> bool {
        self.children.contains_key(&id)
    }
}

pub trait ScreenListener: Send + Sync {
    fn on_screen_connect(&self, screen: Option<&Screen>);
    fn on_screen_disconnect(&self, screen: Option<&Screen>);
    fn on_screen_change(&self, screen: Option<&Screen>, event: DisplayChangeEvent);
}

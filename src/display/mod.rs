//! Logical displays and the controller that binds them to screens.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::screen::{DisplayChangeEvent, Screen, SupportedMode};
use crate::types::{DisplayId, GroupId, Orientation, Point, Rect, Rotation, ScreenId};

mod controller;

pub use controller::AbstractDisplayController;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum FreezeFlag {
    Freezing,
    #[default]
    Unfreezing,
}

/// What the session layer is told about a display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DisplayStateChangeType {
    Create,
    Destroy,
    SizeChange,
    UpdateRotation,
    UpdateRotationFromWindow,
    VirtualPixelRatioChange,
    Freeze,
    Unfreeze,
    DisplayCompress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayInfo {
    pub id: DisplayId,
    pub screen_id: ScreenId,
    pub group_id: Option<GroupId>,
    pub width: u32,
    pub height: u32,
    pub offset_x: i32,
    pub offset_y: i32,
    pub refresh_rate: u32,
    pub virtual_pixel_ratio: f32,
    pub rotation: Rotation,
    pub orientation: Orientation,
    pub freeze_flag: FreezeFlag,
    pub waterfall_compressed: bool,
}

impl DisplayInfo {
    pub fn rect(&self) -> Rect {
        Rect::new(self.offset_x, self.offset_y, self.width, self.height)
    }

    pub fn density_dpi(&self) -> u32 {
        (self.virtual_pixel_ratio * 160.0).round() as u32
    }
}

/// Observer events mirroring what display-manager clients receive.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEvent {
    Created(DisplayInfo),
    Destroyed(DisplayId),
    Changed(DisplayInfo, DisplayChangeEvent),
    Screenshot(DisplayId),
}

/// `(default display, changed display, displays of the same group, change)`.
pub type DisplayStateChangeListener = Arc<
    dyn Fn(DisplayId, &DisplayInfo, &BTreeMap<DisplayId, DisplayInfo>, DisplayStateChangeType)
        + Send
        + Sync,
>;

/// A logical output surface bound to one screen, or to the members of an EXPAND group.
#[derive(Debug, Clone, PartialEq)]
pub struct Display {
    pub id: DisplayId,
    /// Screen that drives this display; the first member for an expanded canvas.
    pub screen_id: ScreenId,
    pub group_id: Option<GroupId>,
    pub bound_screens: Vec<ScreenId>,
    pub width: u32,
    pub height: u32,
    pub offset: Point,
    pub refresh_rate: u32,
    pub virtual_pixel_ratio: f32,
    pub rotation: Rotation,
    pub orientation: Orientation,
    pub freeze_flag: FreezeFlag,
    pub waterfall_compressed: bool,
}

impl Display {
    pub fn new(id: DisplayId, mode: &SupportedMode, screen: &Screen) -> Self {
        let mut display = Self {
            id,
            screen_id: screen.id,
            group_id: screen.group_id,
            bound_screens: vec![screen.id],
            width: mode.width,
            height: mode.height,
            offset: Point::default(),
            refresh_rate: mode.refresh_rate,
            virtual_pixel_ratio: screen.virtual_pixel_ratio,
            rotation: Rotation::Rotation0,
            orientation: screen.orientation,
            freeze_flag: FreezeFlag::default(),
            waterfall_compressed: false,
        };
        display.request_rotation(screen.rotation);
        display
    }

    /// Applies `rotation`, swapping the axes when it crosses portrait/landscape.
    /// Returns `false` and leaves the display untouched if it is already applied.
    pub fn request_rotation(&mut self, rotation: Rotation) -> bool {
        if self.rotation == rotation {
            return false;
        }
        if self.rotation.swaps_axes_with(rotation) {
            std::mem::swap(&mut self.width, &mut self.height);
        }
        self.rotation = rotation;
        true
    }

    pub fn is_bound_to(&self, screen_id: ScreenId) -> bool {
        self.bound_screens.contains(&screen_id)
    }

    pub fn is_expanded(&self) -> bool {
        self.bound_screens.len() > 1
    }

    /// Re-targets this display at a new screen, keeping its id.
    pub fn rebind(&mut self, screen: &Screen) {
        self.screen_id = screen.id;
        self.group_id = screen.group_id;
        self.bound_screens = vec![screen.id];
        self.virtual_pixel_ratio = screen.virtual_pixel_ratio;
        self.orientation = screen.orientation;
        if let Some(mode) = screen.active_mode() {
            self.refresh_rate = mode.refresh_rate;
        }
    }

    pub fn info(&self) -> DisplayInfo {
        DisplayInfo {
            id: self.id,
            screen_id: self.screen_id,
            group_id: self.group_id,
            width: self.width,
            height: self.height,
            offset_x: self.offset.x,
            offset_y: self.offset.y,
            refresh_rate: self.refresh_rate,
            virtual_pixel_ratio: self.virtual_pixel_ratio,
            rotation: self.rotation,
            orientation: self.orientation,
            freeze_flag: self.freeze_flag,
            waterfall_compressed: self.waterfall_compressed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::ScreenType;

    fn screen() -> Screen {
        Screen::new(ScreenId(5), "panel", ScreenType::Real)
            .with_modes(vec![SupportedMode::new(200, 400, 60)], 0)
    }

    #[test]
    fn rotation_is_idempotent() {
        let screen = screen();
        let mode = *screen.active_mode().expect("mode");
        let mut display = Display::new(DisplayId(0), &mode, &screen);

        assert!(display.request_rotation(Rotation::Rotation90));
        assert_eq!((display.width, display.height), (400, 200));
        assert!(!display.request_rotation(Rotation::Rotation90));
        assert_eq!((display.width, display.height), (400, 200));

        assert!(display.request_rotation(Rotation::Rotation270));
        assert_eq!((display.width, display.height), (400, 200));
        assert!(display.request_rotation(Rotation::Rotation0));
        assert_eq!((display.width, display.height), (200, 400));
    }

    #[test]
    fn new_display_follows_screen_rotation() {
        let mut screen = screen();
        screen.rotation = Rotation::Rotation90;
        let mode = *screen.active_mode().expect("mode");
        let display = Display::new(DisplayId(1), &mode, &screen);
        assert_eq!(display.rotation, Rotation::Rotation90);
        assert_eq!((display.width, display.height), (400, 200));
    }

    #[test]
    fn density_from_pixel_ratio() {
        let screen = screen();
        let mode = *screen.active_mode().expect("mode");
        let mut display = Display::new(DisplayId(1), &mode, &screen);
        display.virtual_pixel_ratio = 3.5;
        assert_eq!(display.info().density_dpi(), 560);
    }
}

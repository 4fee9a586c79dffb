//! Identifiers and geometry shared by the screen, display and session layers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a physical or virtual screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScreenId(pub u64);

impl ScreenId {
    pub const INVALID: ScreenId = ScreenId(u64::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for ScreenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("invalid")
        }
    }
}

/// Identifier of a logical display. Lives in its own id space, unrelated to [`ScreenId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DisplayId(pub u64);

impl DisplayId {
    pub const INVALID: DisplayId = DisplayId(u64::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("invalid")
        }
    }
}

/// Identifier of a screen group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session identifier handed out by the registry. `0` means "not assigned yet".
pub type PersistentId = i32;

pub const INVALID_PERSISTENT_ID: PersistentId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Smallest rect containing both. An empty rect does not contribute.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect {
            x,
            y,
            width: (right - x as i64) as u32,
            height: (bottom - y as i64) as u32,
        }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x, self.y, self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl Rotation {
    pub fn degrees(self) -> u32 {
        match self {
            Rotation::Rotation0 => 0,
            Rotation::Rotation90 => 90,
            Rotation::Rotation180 => 180,
            Rotation::Rotation270 => 270,
        }
    }

    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Rotation::Rotation0),
            90 => Some(Rotation::Rotation90),
            180 => Some(Rotation::Rotation180),
            270 => Some(Rotation::Rotation270),
            _ => None,
        }
    }

    /// 0° and 180° keep the panel's native width/height.
    pub fn is_vertical(self) -> bool {
        matches!(self, Rotation::Rotation0 | Rotation::Rotation180)
    }

    pub fn is_horizontal(self) -> bool {
        !self.is_vertical()
    }

    pub fn swaps_axes_with(self, other: Rotation) -> bool {
        self.is_vertical() != other.is_vertical()
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Unspecified,
    Vertical,
    Horizontal,
    ReverseVertical,
    ReverseHorizontal,
    Sensor,
    SensorVertical,
    SensorHorizontal,
    AutoRotationRestricted,
    AutoRotationPortraitRestricted,
    AutoRotationLandscapeRestricted,
    Locked,
}

impl Orientation {
    /// Rotation implied by a fixed orientation; sensor-driven values imply none.
    pub fn fixed_rotation(self) -> Option<Rotation> {
        match self {
            Orientation::Vertical => Some(Rotation::Rotation0),
            Orientation::Horizontal => Some(Rotation::Rotation90),
            Orientation::ReverseVertical => Some(Rotation::Rotation180),
            Orientation::ReverseHorizontal => Some(Rotation::Rotation270),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_of_side_by_side_rects() {
        let a = Rect::new(0, 0, 200, 200);
        let b = Rect::new(200, 0, 200, 200);
        assert_eq!(a.union(&b), Rect::new(0, 0, 400, 200));
    }

    #[test]
    fn union_ignores_empty_rect() {
        let a = Rect::new(10, 10, 0, 50);
        let b = Rect::new(-5, 0, 20, 20);
        assert_eq!(a.union(&b), b);
        assert_eq!(b.union(&a), b);
    }

    #[test]
    fn rotation_axis_swap() {
        assert!(Rotation::Rotation0.swaps_axes_with(Rotation::Rotation90));
        assert!(!Rotation::Rotation90.swaps_axes_with(Rotation::Rotation270));
        assert_eq!(Rotation::from_degrees(450), Some(Rotation::Rotation90));
        assert_eq!(Rotation::from_degrees(45), None);
    }

    #[test]
    fn invalid_ids_format_as_invalid() {
        assert_eq!(DisplayId::INVALID.to_string(), "invalid");
        assert_eq!(ScreenId(3).to_string(), "3");
    }
}

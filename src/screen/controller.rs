use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{
    DisplayChangeEvent, Screen, ScreenCombination, ScreenGroup, ScreenListener, ScreenType,
    SupportedMode,
};
use crate::config::DisplaysConfig;
use crate::types::{GroupId, Orientation, Point, Rotation, ScreenId};

#[derive(Default)]
struct ScreenMap {
    screens: BTreeMap<ScreenId, Screen>,
    groups: BTreeMap<GroupId, ScreenGroup>,
    default_screen: Option<ScreenId>,
}

enum Notification {
    Connect(Screen),
    Disconnect(Screen),
    Change(Screen, DisplayChangeEvent),
}

/// Source of screen topology events.
///
/// Owns every [`Screen`] and [`ScreenGroup`]. Mutations happen under one lock and the
/// resulting events are delivered to listeners after the lock is released, so a listener
/// can query the controller while handling an event.
pub struct ScreenController {
    displays: DisplaysConfig,
    map: Mutex<ScreenMap>,
    listeners: Mutex<Vec<Weak<dyn ScreenListener>>>,
    next_screen_id: AtomicU64,
    next_group_id: AtomicU64,
}

impl ScreenController {
    pub fn new(displays: DisplaysConfig) -> Self {
        Self {
            displays,
            map: Mutex::new(ScreenMap::default()),
            listeners: Mutex::new(Vec::new()),
            next_screen_id: AtomicU64::new(0),
            next_group_id: AtomicU64::new(1),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ScreenListener>) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|existing| existing.strong_count() > 0);
        listeners.push(Arc::downgrade(&listener));
    }

    pub fn screen(&self, id: ScreenId) -> Option<Screen> {
        self.map.lock().screens.get(&id).cloned()
    }

    pub fn group(&self, id: GroupId) -> Option<ScreenGroup> {
        self.map.lock().groups.get(&id).cloned()
    }

    pub fn group_of(&self, screen_id: ScreenId) -> Option<ScreenGroup> {
        let map = self.map.lock();
        let group_id = map.screens.get(&screen_id)?.group_id?;
        map.groups.get(&group_id).cloned()
    }

    pub fn all_screen_ids(&self) -> Vec<ScreenId> {
        self.map.lock().screens.keys().copied().collect()
    }

    pub fn all_screens(&self) -> Vec<Screen> {
        self.map.lock().screens.values().cloned().collect()
    }

    pub fn all_groups(&self) -> Vec<ScreenGroup> {
        self.map.lock().groups.values().cloned().collect()
    }

    pub fn default_screen_id(&self) -> ScreenId {
        self.map.lock().default_screen.unwrap_or(ScreenId::INVALID)
    }

    /// Brings a screen online in its own ALONE group.
    pub fn connect_screen(
        &self,
        name: &str,
        screen_type: ScreenType,
        modes: Vec<SupportedMode>,
        virtual_pixel_ratio: f32,
    ) -> ScreenId {
        let id = ScreenId(self.next_screen_id.fetch_add(1, Ordering::Relaxed));
        let profile = self.displays.resolve(name, screen_type);

        let active_idx = match profile.as_ref().and_then(|p| p.pick_mode(&modes)) {
            Some(idx) => idx as i32,
            None if modes.is_empty() => -1,
            None => 0,
        };
        let mut screen = Screen::new(id, name, screen_type).with_modes(modes, active_idx);
        screen.virtual_pixel_ratio = profile
            .and_then(|p| p.virtual_pixel_ratio)
            .filter(|ratio| ratio.is_finite() && *ratio > 0.0)
            .unwrap_or(virtual_pixel_ratio);

        let snapshot = {
            let mut map = self.map.lock();
            let group_id = self.alloc_group_locked(&mut map, ScreenCombination::Alone);
            if let Some(group) = map.groups.get_mut(&group_id) {
                group.children.insert(id, Point::default());
            }
            screen.group_id = Some(group_id);
            if map.default_screen.is_none() && screen_type == ScreenType::Real {
                map.default_screen = Some(id);
            }
            map.screens.insert(id, screen.clone());
            screen
        };

        info!(
            target: "wms::dms",
            screen = %id,
            name,
            mode = ?snapshot.active_mode(),
            "screen connected"
        );
        self.dispatch(vec![Notification::Connect(snapshot)]);
        id
    }

    pub fn create_virtual_screen(
        &self,
        name: &str,
        width: u32,
        height: u32,
        virtual_pixel_ratio: f32,
    ) -> ScreenId {
        self.connect_screen(
            name,
            ScreenType::Virtual,
            vec![SupportedMode::new(width, height, 60)],
            virtual_pixel_ratio,
        )
    }

    pub fn disconnect_screen(&self, id: ScreenId) -> bool {
        let removed = {
            let mut map = self.map.lock();
            let Some(screen) = map.screens.remove(&id) else {
                warn!(target: "wms::dms", screen = %id, "disconnect of unknown screen");
                return false;
            };
            if let Some(group) = screen.group_id.and_then(|gid| map.groups.get_mut(&gid)) {
                group.children.remove(&id);
            }
            if map.default_screen == Some(id) {
                map.default_screen = map
                    .screens
                    .values()
                    .find(|s| s.screen_type == ScreenType::Real)
                    .map(|s| s.id);
            }
            screen
        };

        info!(target: "wms::dms", screen = %id, "screen disconnected");
        self.dispatch(vec![Notification::Disconnect(removed)]);

        let reconnects = {
            let mut map = self.map.lock();
            self.settle_groups_locked(&mut map)
        };
        self.dispatch(reconnects);
        true
    }

    pub fn set_active_mode(&self, id: ScreenId, mode_idx: usize) -> bool {
        self.mutate(id, DisplayChangeEvent::DisplaySizeChanged, |screen| {
            if mode_idx >= screen.modes.len() || screen.active_idx == mode_idx as i32 {
                return false;
            }
            screen.active_idx = mode_idx as i32;
            true
        })
    }

    /// Replaces the single mode of a virtual screen.
    pub fn resize_virtual_screen(&self, id: ScreenId, width: u32, height: u32) -> bool {
        self.mutate(id, DisplayChangeEvent::DisplaySizeChanged, |screen| {
            if !screen.is_virtual() || width == 0 || height == 0 {
                return false;
            }
            let refresh_rate = screen.active_mode().map_or(60, |m| m.refresh_rate);
            let mode = SupportedMode::new(width, height, refresh_rate);
            if screen.active_mode() == Some(&mode) {
                return false;
            }
            screen.modes = vec![mode];
            screen.active_idx = 0;
            true
        })
    }

    pub fn set_rotation(&self, id: ScreenId, rotation: Rotation, from_window: bool) -> bool {
        let event = if from_window {
            DisplayChangeEvent::UpdateRotationFromWindow
        } else {
            DisplayChangeEvent::UpdateRotation
        };
        self.mutate(id, event, |screen| {
            if screen.rotation == rotation {
                return false;
            }
            screen.rotation = rotation;
            true
        })
    }

    pub fn set_orientation(&self, id: ScreenId, orientation: Orientation, from_window: bool) -> bool {
        let event = if from_window {
            DisplayChangeEvent::UpdateOrientationFromWindow
        } else {
            DisplayChangeEvent::UpdateOrientation
        };
        self.mutate(id, event, |screen| {
            if screen.orientation == orientation {
                return false;
            }
            screen.orientation = orientation;
            true
        })
    }

    pub fn set_virtual_pixel_ratio(&self, id: ScreenId, ratio: f32) -> bool {
        if !ratio.is_finite() || ratio <= 0.0 {
            warn!(target: "wms::dms", screen = %id, ratio, "rejecting virtual pixel ratio");
            return false;
        }
        self.mutate(id, DisplayChangeEvent::DisplayVirtualPixelRatioChanged, |screen| {
            if (screen.virtual_pixel_ratio - ratio).abs() < f32::EPSILON {
                return false;
            }
            screen.virtual_pixel_ratio = ratio;
            true
        })
    }

    /// Moves the given screens into a new EXPAND group, each placed at its start point.
    pub fn make_expand(&self, members: &[(ScreenId, Point)]) -> Option<GroupId> {
        let ids: Vec<ScreenId> = members.iter().map(|(id, _)| *id).collect();
        self.regroup(&ids, ScreenCombination::Expand, |screen| {
            members
                .iter()
                .find(|(id, _)| *id == screen.id)
                .map(|(_, point)| *point)
                .unwrap_or_default()
        })
    }

    /// Mirrors `mirrors` onto `primary`. The primary keeps its group (and display);
    /// the mirrored screens leave their groups and join it.
    pub fn make_mirror(&self, primary: ScreenId, mirrors: &[ScreenId]) -> Option<GroupId> {
        let mut notifications = Vec::new();
        let group_id = {
            let mut map = self.map.lock();
            let primary_group = map.screens.get(&primary)?.group_id?;
            if mirrors.iter().any(|id| *id == primary || !map.screens.contains_key(id)) {
                warn!(target: "wms::dms", primary = %primary, "invalid mirror request");
                return None;
            }
            for id in mirrors {
                let Some(old) = map.screens.get(id).cloned() else {
                    continue;
                };
                if old.group_id == Some(primary_group) {
                    continue;
                }
                if let Some(group) = old.group_id.and_then(|gid| map.groups.get_mut(&gid)) {
                    group.children.remove(id);
                }
                notifications.push(Notification::Disconnect(old));
            }
            let group = map.groups.get_mut(&primary_group)?;
            group.combination = ScreenCombination::Mirror;
            group.mirror_primary = Some(primary);
            for id in mirrors {
                group.children.insert(*id, Point::default());
            }
            for id in mirrors {
                if let Some(screen) = map.screens.get_mut(id) {
                    if screen.group_id != Some(primary_group) {
                        screen.group_id = Some(primary_group);
                        screen.start_point = Point::default();
                        notifications.push(Notification::Connect(screen.clone()));
                    }
                }
            }
            primary_group
        };

        info!(target: "wms::dms", group = %group_id, primary = %primary, "mirror group formed");
        self.dispatch(notifications);
        let reconnects = {
            let mut map = self.map.lock();
            self.settle_groups_locked(&mut map)
        };
        self.dispatch(reconnects);
        Some(group_id)
    }

    fn regroup(
        &self,
        ids: &[ScreenId],
        combination: ScreenCombination,
        placement: impl Fn(&Screen) -> Point,
    ) -> Option<GroupId> {
        let (group_id, notifications) = {
            let mut map = self.map.lock();
            if ids.is_empty() || ids.iter().any(|id| !map.screens.contains_key(id)) {
                warn!(target: "wms::dms", ?ids, "regroup with unknown screens");
                return None;
            }
            let group_id = self.alloc_group_locked(&mut map, combination);
            let mut leaving = Vec::new();
            let mut joining = Vec::new();
            for id in ids {
                let Some(old) = map.screens.get(id).cloned() else {
                    continue;
                };
                if let Some(group) = old.group_id.and_then(|gid| map.groups.get_mut(&gid)) {
                    group.children.remove(id);
                }
                let point = placement(&old);
                if let Some(group) = map.groups.get_mut(&group_id) {
                    group.children.insert(*id, point);
                }
                if let Some(screen) = map.screens.get_mut(id) {
                    screen.group_id = Some(group_id);
                    screen.start_point = point;
                    joining.push(Notification::Connect(screen.clone()));
                }
                leaving.push(Notification::Disconnect(old));
            }
            leaving.extend(joining);
            (group_id, leaving)
        };

        debug!(target: "wms::dms", group = %group_id, ?combination, "screens regrouped");
        self.dispatch(notifications);
        let reconnects = {
            let mut map = self.map.lock();
            self.settle_groups_locked(&mut map)
        };
        self.dispatch(reconnects);
        Some(group_id)
    }

    fn mutate(
        &self,
        id: ScreenId,
        event: DisplayChangeEvent,
        f: impl FnOnce(&mut Screen) -> bool,
    ) -> bool {
        let snapshot = {
            let mut map = self.map.lock();
            let Some(screen) = map.screens.get_mut(&id) else {
                warn!(target: "wms::dms", screen = %id, ?event, "change on unknown screen");
                return false;
            };
            if !f(screen) {
                return false;
            }
            screen.clone()
        };
        debug!(target: "wms::dms", screen = %id, ?event, "screen changed");
        self.dispatch(vec![Notification::Change(snapshot, event)]);
        true
    }

    fn alloc_group_locked(&self, map: &mut ScreenMap, combination: ScreenCombination) -> GroupId {
        let id = GroupId(self.next_group_id.fetch_add(1, Ordering::Relaxed));
        map.groups.insert(id, ScreenGroup::new(id, combination));
        id
    }

    /// Runs after listeners observed a departure: orphaned mirrors get their own group,
    /// single-member groups fall back to ALONE and empty groups are dropped.
    fn settle_groups_locked(&self, map: &mut ScreenMap) -> Vec<Notification> {
        let mut reconnects = Vec::new();

        let orphaned: Vec<(GroupId, Vec<ScreenId>)> = map
            .groups
            .values()
            .filter(|g| g.combination == ScreenCombination::Mirror)
            .filter(|g| g.mirror_primary.map_or(true, |p| !g.contains(p)))
            .map(|g| (g.id, g.child_ids()))
            .collect();
        for (old_group, children) in orphaned {
            if let Some(group) = map.groups.get_mut(&old_group) {
                group.children.clear();
            }
            for child in children {
                let group_id = self.alloc_group_locked(map, ScreenCombination::Alone);
                if let Some(group) = map.groups.get_mut(&group_id) {
                    group.children.insert(child, Point::default());
                }
                if let Some(screen) = map.screens.get_mut(&child) {
                    screen.group_id = Some(group_id);
                    screen.start_point = Point::default();
                    reconnects.push(Notification::Connect(screen.clone()));
                }
            }
        }

        map.groups.retain(|id, group| {
            if group.children.is_empty() {
                debug!(target: "wms::dms", group = %id, "dropping empty screen group");
                return false;
            }
            if group.child_count() == 1 && group.combination != ScreenCombination::Alone {
                debug!(target: "wms::dms", group = %id, "screen group degraded to alone");
                group.combination = ScreenCombination::Alone;
                group.mirror_primary = None;
            }
            true
        });

        reconnects
    }

    fn dispatch(&self, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }
        let listeners: Vec<Arc<dyn ScreenListener>> = self
            .listeners
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for notification in &notifications {
            for listener in &listeners {
                match notification {
                    Notification::Connect(screen) => listener.on_screen_connect(Some(screen)),
                    Notification::Disconnect(screen) => {
                        listener.on_screen_disconnect(Some(screen))
                    }
                    Notification::Change(screen, event) => {
                        listener.on_screen_change(Some(screen), *event)
                    }
                }
            }
        }
    }
}

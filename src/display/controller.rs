use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::{
    Display, DisplayEvent, DisplayInfo, DisplayStateChangeListener, DisplayStateChangeType,
    FreezeFlag,
};
use crate::config::WaterfallConfig;
use crate::host::RenderHost;
use crate::persistence::PixelMap;
use crate::screen::{
    DisplayChangeEvent, Screen, ScreenCombination, ScreenController, ScreenGroup, ScreenListener,
    SupportedMode,
};
use crate::types::{DisplayId, GroupId, Point, Rect, ScreenId};
use crate::utils::{Observable, Observer, Observers};

#[derive(Default)]
struct DisplayMap {
    displays: BTreeMap<DisplayId, Display>,
    /// Last torn-down alone display, kept to be re-bound without churn.
    dummy: Option<Display>,
}

impl DisplayMap {
    fn by_screen(&self, screen_id: ScreenId) -> Option<&Display> {
        self.displays.values().find(|d| d.is_bound_to(screen_id))
    }

    fn by_screen_mut(&mut self, screen_id: ScreenId) -> Option<&mut Display> {
        self.displays.values_mut().find(|d| d.is_bound_to(screen_id))
    }

    fn group_infos(&self, group_id: Option<GroupId>) -> BTreeMap<DisplayId, DisplayInfo> {
        self.displays
            .values()
            .filter(|d| d.group_id == group_id)
            .map(|d| (d.id, d.info()))
            .collect()
    }
}

/// Work produced under the lock and delivered after it is released.
enum Pending {
    State {
        info: DisplayInfo,
        group: BTreeMap<DisplayId, DisplayInfo>,
        change: DisplayStateChangeType,
    },
    Event(DisplayEvent),
}

/// Keeps the screen → display binding current.
///
/// Lookups by id never fail loudly: a missing screen, group or display yields `None`
/// or [`DisplayId::INVALID`] plus a log line, since topology changes are driven by
/// hardware and may race with anything.
pub struct AbstractDisplayController {
    screens: Arc<ScreenController>,
    waterfall: WaterfallConfig,
    render_host: Option<Arc<dyn RenderHost>>,
    map: Mutex<DisplayMap>,
    state_listener: RwLock<Option<DisplayStateChangeListener>>,
    observers: Observers<DisplayEvent>,
    next_display_id: AtomicU64,
}

impl AbstractDisplayController {
    /// Creates the controller and subscribes it to `screens`.
    pub fn new(
        screens: Arc<ScreenController>,
        waterfall: WaterfallConfig,
        render_host: Option<Arc<dyn RenderHost>>,
    ) -> Arc<Self> {
        let controller = Arc::new(Self {
            screens: screens.clone(),
            waterfall,
            render_host,
            map: Mutex::new(DisplayMap::default()),
            state_listener: RwLock::new(None),
            observers: Observers::default(),
            next_display_id: AtomicU64::new(0),
        });
        screens.add_listener(controller.clone());
        controller
    }

    pub fn set_display_state_change_listener(&self, listener: DisplayStateChangeListener) {
        *self.state_listener.write() = Some(listener);
    }

    pub fn add_display_observer(&self, observer: Arc<dyn Observer<DisplayEvent>>) {
        self.observers.add_listener(observer);
    }

    pub fn get_display(&self, id: DisplayId) -> Option<Display> {
        if !id.is_valid() {
            error!(target: "wms::dms", "display id is invalid");
            return None;
        }
        let display = self.map.lock().displays.get(&id).cloned();
        if display.is_none() {
            warn!(target: "wms::dms", display = %id, "no such display");
        }
        display
    }

    pub fn get_display_by_screen(&self, screen_id: ScreenId) -> Option<Display> {
        if !screen_id.is_valid() {
            error!(target: "wms::dms", "screen id is invalid");
            return None;
        }
        let display = self.map.lock().by_screen(screen_id).cloned();
        if display.is_none() {
            match self.screens.group_of(screen_id).map(|g| g.combination) {
                Some(ScreenCombination::Mirror) => {
                    info!(target: "wms::dms", screen = %screen_id, "secondary screen of a mirror has no display")
                }
                _ => warn!(target: "wms::dms", screen = %screen_id, "no display bound to screen"),
            }
        }
        display
    }

    pub fn get_all_display_ids(&self) -> Vec<DisplayId> {
        self.map.lock().displays.keys().copied().collect()
    }

    pub fn get_all_display_info(&self) -> Vec<DisplayInfo> {
        self.map.lock().displays.values().map(Display::info).collect()
    }

    pub fn get_all_display_info_of_group(
        &self,
        group_id: Option<GroupId>,
    ) -> BTreeMap<DisplayId, DisplayInfo> {
        self.map.lock().group_infos(group_id)
    }

    pub fn get_default_display_id(&self) -> DisplayId {
        let default_screen = self.screens.default_screen_id();
        self.map
            .lock()
            .by_screen(default_screen)
            .map_or(DisplayId::INVALID, |d| d.id)
    }

    /// Captures the screen driving `display_id` through the render host.
    pub fn get_screen_snapshot(&self, display_id: DisplayId) -> Option<PixelMap> {
        let display = self.get_display(display_id)?;
        let Some(host) = self.render_host.as_ref() else {
            warn!(target: "wms::dms", display = %display_id, "no render host to capture from");
            return None;
        };
        let capture = host.take_surface_capture(display.screen_id);
        if capture.is_none() {
            error!(target: "wms::dms", display = %display_id, "surface capture failed");
        }
        self.observers
            .notify_observers(&DisplayEvent::Screenshot(display_id));
        capture
    }

    /// Freezes or unfreezes displays. Unknown ids and displays already in the
    /// requested state are skipped.
    pub fn set_freeze(&self, display_ids: &[DisplayId], freeze: bool) {
        let (flag, change, event) = if freeze {
            (
                FreezeFlag::Freezing,
                DisplayStateChangeType::Freeze,
                DisplayChangeEvent::DisplayFreezed,
            )
        } else {
            (
                FreezeFlag::Unfreezing,
                DisplayStateChangeType::Unfreeze,
                DisplayChangeEvent::DisplayUnfreezed,
            )
        };
        let mut pending = Vec::new();
        {
            let mut map = self.map.lock();
            for id in display_ids {
                let Some(display) = map.displays.get_mut(id) else {
                    warn!(target: "wms::dms", display = %id, "set freeze on unknown display");
                    continue;
                };
                if display.freeze_flag == flag {
                    debug!(target: "wms::dms", display = %id, ?flag, "freeze flag unchanged");
                    continue;
                }
                display.freeze_flag = flag;
                let info = display.info();
                Self::push_state_locked(&map, &mut pending, info.clone(), change);
                pending.push(Pending::Event(DisplayEvent::Changed(info, event)));
            }
        }
        self.dispatch(pending);
    }

    pub fn on_screen_connect(&self, screen: Option<&Screen>) {
        let Some(screen) = screen else {
            error!(target: "wms::dms", "connect without screen");
            return;
        };
        let Some(group) = self.group_for(screen) else {
            error!(target: "wms::dms", screen = %screen.id, "connected screen has no group");
            return;
        };
        info!(target: "wms::dms", screen = %screen.id, combination = ?group.combination, "screen connect");

        let mut pending = Vec::new();
        {
            let mut map = self.map.lock();
            match group.combination {
                ScreenCombination::Alone => {
                    self.bind_alone_screen_locked(&mut map, screen, &mut pending);
                }
                _ if group.child_count() == 1 => {
                    self.bind_alone_screen_locked(&mut map, screen, &mut pending);
                }
                ScreenCombination::Expand if screen.is_virtual() => {
                    debug!(target: "wms::dms", screen = %screen.id, "virtual screen stays out of the expanded canvas");
                    self.bind_alone_screen_locked(&mut map, screen, &mut pending);
                }
                ScreenCombination::Expand => {
                    self.add_screen_to_expand_locked(&mut map, screen, &group, &mut pending);
                }
                ScreenCombination::Mirror => {
                    info!(target: "wms::dms", screen = %screen.id, primary = ?group.mirror_primary, "screen mirrors the primary display");
                }
                ScreenCombination::Unsupported(raw) => {
                    warn!(target: "wms::dms", screen = %screen.id, combination = raw, "unsupported screen combination");
                }
            }
        }
        self.dispatch(pending);
    }

    pub fn on_screen_disconnect(&self, screen: Option<&Screen>) {
        let Some(screen) = screen else {
            error!(target: "wms::dms", "disconnect without screen");
            return;
        };
        let group = self.group_for(screen);
        let Some(group_ref) = group.as_ref() else {
            error!(target: "wms::dms", screen = %screen.id, "disconnected screen has no group");
            return;
        };
        info!(target: "wms::dms", screen = %screen.id, combination = ?group_ref.combination, "screen disconnect");

        let mut pending = Vec::new();
        {
            let mut map = self.map.lock();
            let mut affected = None;
            let display_id = match group_ref.combination {
                ScreenCombination::Alone | ScreenCombination::Mirror => {
                    Self::process_normal_screen_disconnected_locked(
                        &map,
                        Some(screen),
                        group.as_ref(),
                        &mut affected,
                    )
                }
                ScreenCombination::Expand => Self::process_expand_screen_disconnected_locked(
                    &map,
                    Some(screen),
                    group.as_ref(),
                    &mut affected,
                ),
                ScreenCombination::Unsupported(raw) => {
                    warn!(target: "wms::dms", combination = raw, "unsupported screen combination");
                    DisplayId::INVALID
                }
            };
            let Some(mut display) = affected.filter(|_| display_id.is_valid()) else {
                self.log_missing_display(screen);
                return;
            };

            display.bound_screens.retain(|id| *id != screen.id);
            if display.bound_screens.is_empty() {
                map.displays.remove(&display.id);
                let display_id = display.id;
                info!(target: "wms::dms", display = %display_id, "display destroyed");
                let info = display.info();
                let mut group_infos = map.group_infos(display.group_id);
                group_infos.insert(info.id, info.clone());
                pending.push(Pending::State {
                    info,
                    group: group_infos,
                    change: DisplayStateChangeType::Destroy,
                });
                pending.push(Pending::Event(DisplayEvent::Destroyed(display.id)));
                if !screen.is_virtual() {
                    map.dummy = Some(display);
                }
            } else {
                if display.screen_id == screen.id {
                    display.screen_id = display.bound_screens[0];
                }
                if self.recompose_expand_locked(&mut display) {
                    let (display_id, width, height) = (display.id, display.width, display.height);
                    debug!(target: "wms::dms", display = %display_id, width, height, "expanded canvas shrunk");
                }
                let info = display.info();
                map.displays.insert(display.id, display);
                Self::push_state_locked(&map, &mut pending, info.clone(), DisplayStateChangeType::SizeChange);
                pending.push(Pending::Event(DisplayEvent::Changed(
                    info,
                    DisplayChangeEvent::DisplaySizeChanged,
                )));
            }
        }
        self.dispatch(pending);
    }

    /// Finds the display bound to a departing ALONE or MIRROR screen.
    pub fn process_normal_screen_disconnected(
        &self,
        screen: Option<&Screen>,
        group: Option<&ScreenGroup>,
        display: &mut Option<Display>,
    ) -> DisplayId {
        let map = self.map.lock();
        Self::process_normal_screen_disconnected_locked(&map, screen, group, display)
    }

    /// Finds the expanded display a departing EXPAND member belongs to.
    pub fn process_expand_screen_disconnected(
        &self,
        screen: Option<&Screen>,
        group: Option<&ScreenGroup>,
        display: &mut Option<Display>,
    ) -> DisplayId {
        let map = self.map.lock();
        Self::process_expand_screen_disconnected_locked(&map, screen, group, display)
    }

    fn process_normal_screen_disconnected_locked(
        map: &DisplayMap,
        screen: Option<&Screen>,
        group: Option<&ScreenGroup>,
        display: &mut Option<Display>,
    ) -> DisplayId {
        let (Some(screen), Some(_group)) = (screen, group) else {
            error!(target: "wms::dms", "normal disconnect with missing screen or group");
            return DisplayId::INVALID;
        };
        match map.displays.values().find(|d| d.screen_id == screen.id) {
            Some(found) => {
                debug!(target: "wms::dms", display = %found.id, screen = %screen.id, "normal screen disconnect");
                *display = Some(found.clone());
                found.id
            }
            None => DisplayId::INVALID,
        }
    }

    fn process_expand_screen_disconnected_locked(
        map: &DisplayMap,
        screen: Option<&Screen>,
        group: Option<&ScreenGroup>,
        display: &mut Option<Display>,
    ) -> DisplayId {
        let (Some(screen), Some(_group)) = (screen, group) else {
            error!(target: "wms::dms", "expand disconnect with missing screen or group");
            return DisplayId::INVALID;
        };
        match map.by_screen(screen.id) {
            Some(found) => {
                debug!(target: "wms::dms", display = %found.id, screen = %screen.id, "expand screen disconnect");
                *display = Some(found.clone());
                found.id
            }
            None => DisplayId::INVALID,
        }
    }

    pub fn on_screen_change(&self, screen: Option<&Screen>, event: DisplayChangeEvent) {
        let Some(screen) = screen else {
            error!(target: "wms::dms", ?event, "change without screen");
            return;
        };
        debug!(target: "wms::dms", screen = %screen.id, ?event, "screen change");
        match event {
            DisplayChangeEvent::UpdateOrientation => {
                self.process_display_update_orientation(screen, DisplayStateChangeType::UpdateRotation)
            }
            DisplayChangeEvent::UpdateOrientationFromWindow => self.process_display_update_orientation(
                screen,
                DisplayStateChangeType::UpdateRotationFromWindow,
            ),
            DisplayChangeEvent::DisplaySizeChanged => self.process_display_size_change(screen),
            DisplayChangeEvent::DisplayVirtualPixelRatioChanged => {
                self.process_virtual_pixel_ratio_change(screen)
            }
            DisplayChangeEvent::UpdateRotation => {
                self.process_display_rotation_change(screen, DisplayStateChangeType::UpdateRotation)
            }
            DisplayChangeEvent::UpdateRotationFromWindow => self.process_display_rotation_change(
                screen,
                DisplayStateChangeType::UpdateRotationFromWindow,
            ),
            other => {
                warn!(target: "wms::dms", screen = %screen.id, event = ?other, "unhandled screen change event")
            }
        }
    }

    pub fn process_display_rotation_change(&self, screen: &Screen, change: DisplayStateChangeType) {
        let mut pending = Vec::new();
        {
            let mut map = self.map.lock();
            let Some(display) = map.by_screen_mut(screen.id) else {
                self.log_missing_display(screen);
                return;
            };
            let rotated = display.request_rotation(screen.rotation);
            let info = display.info();
            if rotated {
                Self::push_state_locked(&map, &mut pending, info.clone(), change);
            }
            pending.push(Pending::Event(DisplayEvent::Changed(
                info,
                DisplayChangeEvent::UpdateRotation,
            )));
            self.process_display_compression_locked(&mut map, screen, &mut pending);
        }
        self.dispatch(pending);
    }

    pub fn process_display_update_orientation(&self, screen: &Screen, change: DisplayStateChangeType) {
        let mut pending = Vec::new();
        {
            let mut map = self.map.lock();
            let Some(display) = map.by_screen_mut(screen.id) else {
                self.log_missing_display(screen);
                return;
            };
            display.orientation = screen.orientation;
            let rotation = screen.orientation.fixed_rotation().unwrap_or(screen.rotation);
            let display_id = display.id;
            debug!(target: "wms::dms", display = %display_id, orientation = ?screen.orientation, %rotation, "orientation updated");
            if display.request_rotation(rotation) {
                let info = display.info();
                Self::push_state_locked(&map, &mut pending, info, change);
            }
        }
        self.dispatch(pending);
    }

    #[profiling::function]
    pub fn process_display_size_change(&self, screen: &Screen) {
        let Some(mode) = screen.active_mode().copied() else {
            error!(target: "wms::dms", screen = %screen.id, "cannot get active screen mode");
            return;
        };
        let mut pending = Vec::new();
        {
            let mut map = self.map.lock();
            let Some(mut display) = map.by_screen(screen.id).cloned() else {
                self.log_missing_display(screen);
                return;
            };
            let changed = if display.is_expanded() {
                self.recompose_expand_locked(&mut display)
            } else {
                let offset_changed = display.offset != screen.start_point;
                display.offset = screen.start_point;
                display.refresh_rate = mode.refresh_rate;
                Self::update_display_size(Some(&mut display), Some(&mode)) || offset_changed
            };
            if !changed {
                let display_id = display.id;
                debug!(target: "wms::dms", display = %display_id, "display size unchanged");
                return;
            }
            let (display_id, width, height) = (display.id, display.width, display.height);
            info!(target: "wms::dms", display = %display_id, width, height, "display resized");
            let info = display.info();
            map.displays.insert(display.id, display);
            Self::push_state_locked(&map, &mut pending, info.clone(), DisplayStateChangeType::SizeChange);
            pending.push(Pending::Event(DisplayEvent::Changed(
                info,
                DisplayChangeEvent::DisplaySizeChanged,
            )));
            self.process_display_compression_locked(&mut map, screen, &mut pending);
        }
        self.dispatch(pending);
    }

    /// Applies `mode` to `display`, honouring the display's rotation.
    /// Returns `true` only when the stored size actually changed.
    pub fn update_display_size(display: Option<&mut Display>, mode: Option<&SupportedMode>) -> bool {
        let (Some(display), Some(mode)) = (display, mode) else {
            error!(target: "wms::dms", "update display size with missing display or mode");
            return false;
        };
        let (width, height) = if display.rotation.is_vertical() {
            (mode.width, mode.height)
        } else {
            (mode.height, mode.width)
        };
        if display.width == width && display.height == height {
            let display_id = display.id;
            debug!(target: "wms::dms", display = %display_id, "keep display size");
            return false;
        }
        display.width = width;
        display.height = height;
        display.waterfall_compressed = false;
        true
    }

    pub fn process_virtual_pixel_ratio_change(&self, screen: &Screen) {
        let mut pending = Vec::new();
        {
            let mut map = self.map.lock();
            let Some(display) = map.by_screen_mut(screen.id) else {
                self.log_missing_display(screen);
                return;
            };
            display.virtual_pixel_ratio = screen.virtual_pixel_ratio;
            let info = display.info();
            Self::push_state_locked(
                &map,
                &mut pending,
                info.clone(),
                DisplayStateChangeType::VirtualPixelRatioChange,
            );
            pending.push(Pending::Event(DisplayEvent::Changed(
                info,
                DisplayChangeEvent::DisplayVirtualPixelRatioChanged,
            )));
        }
        self.dispatch(pending);
    }

    /// Hides the curved edges of a waterfall panel while the default display is landscape.
    pub fn process_display_compression(&self, screen: &Screen) {
        let mut pending = Vec::new();
        {
            let mut map = self.map.lock();
            self.process_display_compression_locked(&mut map, screen, &mut pending);
        }
        self.dispatch(pending);
    }

    fn process_display_compression_locked(
        &self,
        map: &mut DisplayMap,
        screen: &Screen,
        pending: &mut Vec<Pending>,
    ) {
        if !self.waterfall.compression_active() {
            return;
        }
        if screen.id != self.screens.default_screen_id() {
            return;
        }
        // An out-of-range mode index must not be used to size the display.
        let Some(mode) = screen.active_mode().copied() else {
            warn!(target: "wms::dms", screen = %screen.id, idx = screen.active_idx, "no active mode for compression");
            return;
        };
        let Some(display) = map.by_screen_mut(screen.id) else {
            return;
        };
        let size_px = (self.waterfall.compression_size_vp as f32 * display.virtual_pixel_ratio) as u32;
        if size_px >= mode.height / 4 || size_px >= mode.width / 4 {
            warn!(target: "wms::dms", size_px, "waterfall compression larger than a quarter of the screen");
            return;
        }
        let natural_portrait = mode.height > mode.width;
        if display.rotation.is_horizontal() {
            let full_height = if natural_portrait { mode.width } else { mode.height };
            display.offset = Point::new(0, size_px as i32);
            display.height = full_height - size_px * 2;
            display.waterfall_compressed = true;
        } else {
            if !display.waterfall_compressed {
                return;
            }
            display.offset = Point::new(0, 0);
            display.height = if natural_portrait { mode.height } else { mode.width };
            display.width = if natural_portrait { mode.width } else { mode.height };
            display.waterfall_compressed = false;
        }
        let (display_id, compressed) = (display.id, display.waterfall_compressed);
        info!(target: "wms::dms", display = %display_id, compressed, size_px, "waterfall compression applied");
        let info = display.info();
        Self::push_state_locked(map, pending, info.clone(), DisplayStateChangeType::DisplayCompress);
        pending.push(Pending::Event(DisplayEvent::Changed(
            info,
            DisplayChangeEvent::DisplaySizeChanged,
        )));
    }

    fn bind_alone_screen_locked(
        &self,
        map: &mut DisplayMap,
        screen: &Screen,
        pending: &mut Vec<Pending>,
    ) -> DisplayId {
        if let Some(existing) = map.by_screen(screen.id) {
            warn!(target: "wms::dms", screen = %screen.id, display = %existing.id, "screen already has a display");
            return existing.id;
        }
        let Some(mode) = screen.active_mode().copied() else {
            error!(target: "wms::dms", screen = %screen.id, "bind alone screen without active mode");
            return DisplayId::INVALID;
        };

        let display = match map.dummy.take() {
            Some(mut dummy) if Self::dummy_fits(&dummy, screen, &mode) => {
                info!(target: "wms::dms", screen = %screen.id, display = %dummy.id, "re-binding dummy display");
                dummy.rebind(screen);
                dummy.offset = Point::default();
                dummy
            }
            stale => {
                if let Some(stale) = stale {
                    debug!(target: "wms::dms", display = %stale.id, "dummy display does not fit, discarding");
                }
                let id = DisplayId(self.next_display_id.fetch_add(1, Ordering::Relaxed));
                info!(target: "wms::dms", screen = %screen.id, display = %id, "create display for new screen");
                Display::new(id, &mode, screen)
            }
        };
        let id = display.id;
        let info = display.info();
        map.displays.insert(id, display);
        pending.push(Pending::Event(DisplayEvent::Created(info.clone())));
        Self::push_state_locked(map, pending, info, DisplayStateChangeType::Create);
        id
    }

    fn dummy_fits(dummy: &Display, screen: &Screen, mode: &SupportedMode) -> bool {
        let (width, height) = if screen.rotation.is_vertical() {
            (mode.width, mode.height)
        } else {
            (mode.height, mode.width)
        };
        dummy.width == width && dummy.height == height && dummy.rotation == screen.rotation
    }

    fn add_screen_to_expand_locked(
        &self,
        map: &mut DisplayMap,
        screen: &Screen,
        group: &ScreenGroup,
        pending: &mut Vec<Pending>,
    ) {
        if let Some(existing) = map.by_screen(screen.id) {
            error!(target: "wms::dms", screen = %screen.id, display = %existing.id, "screen already has a display");
            return;
        }
        if screen.active_mode().is_none() {
            error!(target: "wms::dms", screen = %screen.id, "expand screen without active mode");
            return;
        }

        let existing = map
            .displays
            .values()
            .filter(|d| d.group_id == Some(group.id))
            .find(|d| self.screens.screen(d.screen_id).is_some_and(|s| !s.is_virtual()))
            .map(|d| d.id);
        match existing.and_then(|id| map.displays.get(&id).cloned()) {
            Some(mut display) => {
                display.bound_screens.push(screen.id);
                self.recompose_expand_locked(&mut display);
                let (display_id, width) = (display.id, display.width);
                info!(target: "wms::dms", screen = %screen.id, display = %display_id, width, "screen joined expanded display");
                let info = display.info();
                map.displays.insert(display.id, display);
                Self::push_state_locked(map, pending, info.clone(), DisplayStateChangeType::SizeChange);
                pending.push(Pending::Event(DisplayEvent::Changed(
                    info,
                    DisplayChangeEvent::DisplaySizeChanged,
                )));
            }
            None => {
                let Some(mode) = screen.active_mode().copied() else {
                    return;
                };
                let id = DisplayId(self.next_display_id.fetch_add(1, Ordering::Relaxed));
                let mut display = Display::new(id, &mode, screen);
                self.recompose_expand_locked(&mut display);
                info!(target: "wms::dms", screen = %screen.id, display = %id, "create expanded display");
                let info = display.info();
                map.displays.insert(id, display);
                pending.push(Pending::Event(DisplayEvent::Created(info.clone())));
                Self::push_state_locked(map, pending, info, DisplayStateChangeType::Create);
            }
        }
    }

    /// Recomputes the canvas of a display from the current geometry of its bound screens.
    fn recompose_expand_locked(&self, display: &mut Display) -> bool {
        let canvas = display
            .bound_screens
            .iter()
            .filter_map(|id| self.screens.screen(*id))
            .filter_map(|screen| screen.canvas_rect())
            .fold(Rect::default(), |acc, rect| acc.union(&rect));
        if canvas.is_empty() {
            return false;
        }
        let changed = display.width != canvas.width
            || display.height != canvas.height
            || display.offset != Point::new(canvas.x, canvas.y);
        display.width = canvas.width;
        display.height = canvas.height;
        display.offset = Point::new(canvas.x, canvas.y);
        changed
    }

    fn group_for(&self, screen: &Screen) -> Option<ScreenGroup> {
        screen.group_id.and_then(|id| self.screens.group(id))
    }

    fn log_missing_display(&self, screen: &Screen) {
        match self.group_for(screen).map(|g| g.combination) {
            Some(ScreenCombination::Mirror) => {
                info!(target: "wms::dms", screen = %screen.id, "secondary screen of a mirror")
            }
            Some(_) => error!(target: "wms::dms", screen = %screen.id, "cannot find display of the screen"),
            None => error!(target: "wms::dms", screen = %screen.id, "cannot get screen group"),
        }
    }

    fn push_state_locked(
        map: &DisplayMap,
        pending: &mut Vec<Pending>,
        info: DisplayInfo,
        change: DisplayStateChangeType,
    ) {
        let group = map.group_infos(info.group_id);
        pending.push(Pending::State {
            info,
            group,
            change,
        });
    }

    fn dispatch(&self, pending: Vec<Pending>) {
        if pending.is_empty() {
            return;
        }
        let default_display = self.get_default_display_id();
        let listener = self.state_listener.read().clone();
        for item in pending {
            match item {
                Pending::State {
                    info,
                    group,
                    change,
                } => match &listener {
                    Some(listener) => listener(default_display, &info, &group, change),
                    None => debug!(target: "wms::dms", display = %info.id, ?change, "no display state listener"),
                },
                Pending::Event(event) => self.observers.notify_observers(&event),
            }
        }
    }
}

impl ScreenListener for AbstractDisplayController {
    fn on_screen_connect(&self, screen: Option<&Screen>) {
        AbstractDisplayController::on_screen_connect(self, screen);
    }

    fn on_screen_disconnect(&self, screen: Option<&Screen>) {
        AbstractDisplayController::on_screen_disconnect(self, screen);
    }

    fn on_screen_change(&self, screen: Option<&Screen>, event: DisplayChangeEvent) {
        AbstractDisplayController::on_screen_change(self, screen, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DisplaysConfig;
    use crate::screen::ScreenType;
    use crate::types::Rotation;

    struct Recorder(Mutex<Vec<DisplayEvent>>);

    impl Observer<DisplayEvent> for Recorder {
        fn notify(&self, event: &DisplayEvent) {
            self.0.lock().push(event.clone());
        }
    }

    fn setup(waterfall: WaterfallConfig) -> (Arc<ScreenController>, Arc<AbstractDisplayController>) {
        let screens = Arc::new(ScreenController::new(DisplaysConfig::default()));
        let displays = AbstractDisplayController::new(screens.clone(), waterfall, None);
        (screens, displays)
    }

    fn square() -> Vec<SupportedMode> {
        vec![SupportedMode::new(200, 200, 60)]
    }

    #[test]
    fn alone_screen_gets_one_display() {
        let (screens, displays) = setup(WaterfallConfig::default());
        let id = screens.connect_screen("panel", ScreenType::Real, square(), 1.0);
        let all = displays.get_all_display_ids();
        assert_eq!(all.len(), 1);
        let display = displays.get_display_by_screen(id).expect("display");
        assert_eq!((display.width, display.height), (200, 200));
        assert_eq!(displays.get_default_display_id(), display.id);
    }

    #[test]
    fn connect_then_disconnect_restores_display_set() {
        let (screens, displays) = setup(WaterfallConfig::default());
        let a = screens.connect_screen("a", ScreenType::Real, square(), 1.0);
        let before = displays.get_all_display_ids();

        let b = screens.connect_screen("b", ScreenType::Real, square(), 1.0);
        assert_eq!(displays.get_all_display_ids().len(), 2);
        screens.disconnect_screen(b);
        assert_eq!(displays.get_all_display_ids(), before);
        assert!(displays.get_display_by_screen(a).is_some());
    }

    #[test]
    fn dummy_display_is_adopted_only_when_size_matches() {
        let (screens, displays) = setup(WaterfallConfig::default());
        let a = screens.connect_screen("a", ScreenType::Real, square(), 1.0);
        let original = displays.get_display_by_screen(a).expect("display").id;
        screens.disconnect_screen(a);
        assert!(displays.get_all_display_ids().is_empty());

        let b = screens.connect_screen("b", ScreenType::Real, square(), 1.0);
        assert_eq!(displays.get_display_by_screen(b).map(|d| d.id), Some(original));
        screens.disconnect_screen(b);

        let c = screens.connect_screen(
            "c",
            ScreenType::Real,
            vec![SupportedMode::new(300, 300, 60)],
            1.0,
        );
        let fresh = displays.get_display_by_screen(c).expect("display");
        assert_ne!(fresh.id, original);
        assert_eq!((fresh.width, fresh.height), (300, 300));
    }

    #[test]
    fn update_display_size_reports_changes_only() {
        let (screens, displays) = setup(WaterfallConfig::default());
        let id = screens.connect_screen("panel", ScreenType::Real, square(), 1.0);
        let mut display = displays.get_display_by_screen(id).expect("display");
        let taller = SupportedMode::new(200, 400, 60);

        assert!(AbstractDisplayController::update_display_size(Some(&mut display), Some(&taller)));
        assert_eq!(display.height, 400);
        assert!(!AbstractDisplayController::update_display_size(Some(&mut display), Some(&taller)));
        assert_eq!(display.height, 400);
        assert!(!AbstractDisplayController::update_display_size(None, Some(&taller)));
        assert!(!AbstractDisplayController::update_display_size(Some(&mut display), None));
    }

    #[test]
    fn expand_composes_and_shrinks() {
        let (screens, displays) = setup(WaterfallConfig::default());
        let a = screens.connect_screen("a", ScreenType::Real, square(), 1.0);
        let b = screens.connect_screen("b", ScreenType::Real, square(), 1.0);
        screens
            .make_expand(&[(a, Point::new(0, 0)), (b, Point::new(200, 0))])
            .expect("expand");

        let ids = displays.get_all_display_ids();
        assert_eq!(ids.len(), 1);
        let composite = displays.get_display(ids[0]).expect("display");
        assert_eq!((composite.width, composite.height), (400, 200));
        assert_eq!(displays.get_display_by_screen(b).map(|d| d.id), Some(composite.id));

        screens.disconnect_screen(b);
        let shrunk = displays.get_display(composite.id).expect("display survives");
        assert_eq!((shrunk.width, shrunk.height), (200, 200));
        assert_eq!(shrunk.bound_screens, vec![a]);
    }

    #[test]
    fn virtual_screen_is_kept_out_of_expand() {
        let (screens, displays) = setup(WaterfallConfig::default());
        let a = screens.connect_screen("a", ScreenType::Real, square(), 1.0);
        let v = screens.create_virtual_screen("cast", 100, 100, 1.0);
        screens
            .make_expand(&[(a, Point::new(0, 0)), (v, Point::new(200, 0))])
            .expect("expand");
        let real = displays.get_display_by_screen(a).expect("real display");
        let virt = displays.get_display_by_screen(v).expect("virtual display");
        assert_ne!(real.id, virt.id);
        assert_eq!((real.width, real.height), (200, 200));
    }

    #[test]
    fn mirror_adds_no_display() {
        let (screens, displays) = setup(WaterfallConfig::default());
        let primary = screens.connect_screen("p", ScreenType::Real, square(), 1.0);
        let mirror = screens.connect_screen("m", ScreenType::Real, square(), 1.0);
        let primary_display = displays.get_display_by_screen(primary).expect("display").id;
        screens.make_mirror(primary, &[mirror]).expect("mirror");

        assert_eq!(displays.get_all_display_ids(), vec![primary_display]);
        assert!(displays.get_display_by_screen(mirror).is_none());
    }

    #[test]
    fn null_arguments_return_sentinels() {
        let (screens, displays) = setup(WaterfallConfig::default());
        let id = screens.connect_screen("panel", ScreenType::Real, square(), 1.0);
        let group = screens.group_of(id).expect("group");
        let mut display = displays.get_display_by_screen(id);
        let before = display.clone();

        assert_eq!(
            displays.process_normal_screen_disconnected(None, Some(&group), &mut display),
            DisplayId::INVALID
        );
        assert_eq!(display, before);
        assert_eq!(screens.group_of(id), Some(group.clone()));

        let screen = screens.screen(id).expect("screen");
        assert_eq!(
            displays.process_expand_screen_disconnected(Some(&screen), None, &mut display),
            DisplayId::INVALID
        );
        assert_eq!(display, before);

        displays.on_screen_connect(None);
        displays.on_screen_disconnect(None);
        displays.on_screen_change(None, DisplayChangeEvent::DisplaySizeChanged);
        displays.on_screen_change(Some(&screen), DisplayChangeEvent::Unknown);
        assert_eq!(displays.get_all_display_ids().len(), 1);
        assert!(displays.get_screen_snapshot(DisplayId::INVALID).is_none());
        assert!(displays.get_display(DisplayId(77)).is_none());
    }

    #[test]
    fn rotation_change_is_idempotent() {
        let (screens, displays) = setup(WaterfallConfig::default());
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let id = screens.connect_screen(
            "panel",
            ScreenType::Real,
            vec![SupportedMode::new(200, 400, 60)],
            1.0,
        );
        displays.add_display_observer(recorder.clone());

        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = changes.clone();
        displays.set_display_state_change_listener(Arc::new(move |_, info, _, change| {
            sink.lock().push((info.id, change));
        }));

        assert!(screens.set_rotation(id, Rotation::Rotation90, false));
        let mut screen = screens.screen(id).expect("screen");
        displays.process_display_rotation_change(&screen, DisplayStateChangeType::UpdateRotation);

        let display = displays.get_display_by_screen(id).expect("display");
        assert_eq!((display.width, display.height), (400, 200));
        assert_eq!(
            changes.lock().as_slice(),
            &[(display.id, DisplayStateChangeType::UpdateRotation)]
        );

        screen.rotation = Rotation::Rotation90;
        displays.process_display_rotation_change(&screen, DisplayStateChangeType::UpdateRotation);
        assert_eq!(changes.lock().len(), 1);
        assert!(!recorder.0.lock().is_empty());
    }

    #[test]
    fn freeze_skips_unknown_and_repeated() {
        let (screens, displays) = setup(WaterfallConfig::default());
        let id = screens.connect_screen("panel", ScreenType::Real, square(), 1.0);
        let display = displays.get_display_by_screen(id).expect("display").id;
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = changes.clone();
        displays.set_display_state_change_listener(Arc::new(move |_, _, _, change| {
            sink.lock().push(change);
        }));

        displays.set_freeze(&[display, DisplayId(99)], true);
        displays.set_freeze(&[display], true);
        displays.set_freeze(&[display], false);
        assert_eq!(
            changes.lock().as_slice(),
            &[DisplayStateChangeType::Freeze, DisplayStateChangeType::Unfreeze]
        );
        assert_eq!(
            displays.get_display(display).map(|d| d.freeze_flag),
            Some(FreezeFlag::Unfreezing)
        );
    }

    #[test]
    fn mode_change_resizes_display() {
        let (screens, displays) = setup(WaterfallConfig::default());
        let id = screens.connect_screen(
            "panel",
            ScreenType::Real,
            vec![
                SupportedMode::new(200, 200, 60),
                SupportedMode::new(200, 400, 90),
            ],
            1.0,
        );
        assert!(screens.set_active_mode(id, 1));
        let display = displays.get_display_by_screen(id).expect("display");
        assert_eq!((display.width, display.height, display.refresh_rate), (200, 400, 90));
    }

    #[test]
    fn waterfall_compression_follows_rotation() {
        let waterfall = WaterfallConfig {
            is_waterfall_display: true,
            compression_enabled_when_horizontal: true,
            compression_size_vp: 10,
        };
        let (screens, displays) = setup(waterfall);
        let id = screens.connect_screen(
            "panel",
            ScreenType::Real,
            vec![SupportedMode::new(1000, 2000, 60)],
            2.0,
        );

        screens.set_rotation(id, Rotation::Rotation90, false);
        let display = displays.get_display_by_screen(id).expect("display");
        assert!(display.waterfall_compressed);
        assert_eq!(display.offset, Point::new(0, 20));
        assert_eq!((display.width, display.height), (2000, 960));

        screens.set_rotation(id, Rotation::Rotation0, false);
        let display = displays.get_display_by_screen(id).expect("display");
        assert!(!display.waterfall_compressed);
        assert_eq!(display.offset, Point::new(0, 0));
        assert_eq!((display.width, display.height), (1000, 2000));
    }

    #[test]
    fn compression_ignores_invalid_mode_index() {
        let waterfall = WaterfallConfig {
            is_waterfall_display: true,
            compression_enabled_when_horizontal: true,
            compression_size_vp: 10,
        };
        let (screens, displays) = setup(waterfall);
        let id = screens.connect_screen(
            "panel",
            ScreenType::Real,
            vec![SupportedMode::new(1000, 2000, 60)],
            2.0,
        );
        let mut screen = screens.screen(id).expect("screen");
        screen.active_idx = -1;
        let before = displays.get_display_by_screen(id);
        displays.process_display_compression(&screen);
        assert_eq!(displays.get_display_by_screen(id), before);
    }
}

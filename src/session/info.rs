use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::{DisplayId, PersistentId, INVALID_PERSISTENT_ID};

/// Launch parameter asking whether the window takes focus when shown.
pub const WANT_PARAM_WINDOW_FOCUSED: &str = "ohos.aafwk.param.windowFocused";
/// Launch parameter asking to return to the caller's mission stack on back.
pub const WANT_PARAM_BACK_TO_OTHER_MISSION_STACK: &str = "ability.params.backToOtherMissionStack";
pub const WANT_PARAM_CONTINUE_SESSION_ID: &str = "ohos.dms.continueSessionId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum WindowType {
    #[default]
    AppMainWindow,
    AppSubWindow,
    Dialog,
    SystemFloat,
    SystemPanel,
    InputMethod,
    Pip,
    Desktop,
}

impl WindowType {
    pub fn is_main(self) -> bool {
        self == WindowType::AppMainWindow
    }

    pub fn is_system(self) -> bool {
        matches!(
            self,
            WindowType::SystemFloat
                | WindowType::SystemPanel
                | WindowType::InputMethod
                | WindowType::Desktop
        )
    }

    /// Panels and the keyboard never take focus by default.
    pub fn default_focusable(self) -> bool {
        !matches!(self, WindowType::SystemPanel | WindowType::Pip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SceneType {
    #[default]
    Default,
    WindowScene,
    SystemWindowScene,
    InputScene,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum CollaboratorType {
    #[default]
    Default,
    Reserve,
    Others,
}

/// Launch parameters ("want") attached to a request, as loose key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Want {
    params: BTreeMap<String, String>,
}

impl Want {
    pub fn with_param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn set_param(&mut self, key: &str, value: impl ToString) {
        self.params.insert(key.to_string(), value.to_string());
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.params.get(key).map(String::as_str) {
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            _ => default,
        }
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.params
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessOptions {
    pub process_mode: u32,
    pub start_window_option: u32,
}

/// Identity and launch descriptor of one window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionInfo {
    pub bundle_name: String,
    pub module_name: String,
    pub ability_name: String,
    pub app_index: i32,
    pub window_type: WindowType,
    pub scene_type: SceneType,
    /// `0` until the registry assigns one.
    pub persistent_id: PersistentId,
    pub caller_persistent_id: PersistentId,
    pub reuse: bool,
    pub is_atomic_service: bool,
    pub is_system: bool,
    pub session_affinity: String,
    pub collaborator_type: CollaboratorType,
    pub want: Option<Want>,
    pub process_options: Option<ProcessOptions>,
    pub full_screen_start: bool,
    pub is_called_rightly_by_caller_id: bool,
    pub continue_session_id: String,
    pub display_id: Option<DisplayId>,
}

impl SessionInfo {
    pub fn new(bundle_name: &str, module_name: &str, ability_name: &str) -> Self {
        Self {
            bundle_name: bundle_name.to_string(),
            module_name: module_name.to_string(),
            ability_name: ability_name.to_string(),
            persistent_id: INVALID_PERSISTENT_ID,
            ..Default::default()
        }
    }

    pub fn compared(&self) -> ComparedSessionInfo {
        ComparedSessionInfo {
            bundle_name: self.bundle_name.clone(),
            module_name: self.module_name.clone(),
            ability_name: self.ability_name.clone(),
            app_index: self.app_index,
            window_type: self.window_type,
            is_atomic_service: self.is_atomic_service,
        }
    }

    pub fn focused_on_show(&self) -> bool {
        self.want
            .as_ref()
            .map_or(true, |want| want.get_bool(WANT_PARAM_WINDOW_FOCUSED, true))
    }

    pub fn needs_back_to_other(&self) -> bool {
        self.want
            .as_ref()
            .is_some_and(|want| want.get_bool(WANT_PARAM_BACK_TO_OTHER_MISSION_STACK, false))
    }
}

/// Identity tuple used to find a reusable session. All fields must match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComparedSessionInfo {
    pub bundle_name: String,
    pub module_name: String,
    pub ability_name: String,
    pub app_index: i32,
    pub window_type: WindowType,
    pub is_atomic_service: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn want_defaults_apply_to_missing_or_garbled_values() {
        let want = Want::default()
            .with_param(WANT_PARAM_WINDOW_FOCUSED, "maybe")
            .with_param("count", 3);
        assert!(want.get_bool(WANT_PARAM_WINDOW_FOCUSED, true));
        assert!(!want.get_bool("absent", false));
        assert_eq!(want.get_int("count", 0), 3);
    }

    #[test]
    fn focused_on_show_defaults_to_true() {
        let mut info = SessionInfo::new("com.example", "entry", "MainAbility");
        assert!(info.focused_on_show());
        info.want = Some(Want::default().with_param(WANT_PARAM_WINDOW_FOCUSED, false));
        assert!(!info.focused_on_show());
    }

    #[test]
    fn compared_info_is_case_sensitive() {
        let a = SessionInfo::new("com.example", "entry", "MainAbility");
        let b = SessionInfo::new("com.Example", "entry", "MainAbility");
        assert_ne!(a.compared(), b.compared());
        assert_eq!(a.compared(), a.clone().compared());
    }
}

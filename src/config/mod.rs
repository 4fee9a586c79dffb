use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::screen::{ScreenType, SupportedMode};

pub const DEFAULT_CONFIG_FILE: &str = "wms_config.toml";
pub const CONFIG_PATH_ENV: &str = "SCENE_WM_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("default config could not be serialized: {0}")]
    Defaults(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_filter: String,
    /// Root directory for snapshots and updated icons. `None` disables file persistence.
    pub snapshot_dir: Option<PathBuf>,
    pub astc_enabled: bool,
    pub snapshot_workers: usize,
    pub lifecycle_queue_capacity: usize,
    pub lifecycle_task_expiry_ms: u64,
    pub starting_window_cache_capacity: usize,
    pub waterfall: WaterfallConfig,
    pub displays: DisplaysConfig,
    pub default_screen: DefaultScreenConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            snapshot_dir: None,
            astc_enabled: true,
            snapshot_workers: 2,
            lifecycle_queue_capacity: 15,
            lifecycle_task_expiry_ms: 350,
            starting_window_cache_capacity: 100,
            waterfall: WaterfallConfig::default(),
            displays: DisplaysConfig::default(),
            default_screen: DefaultScreenConfig::default(),
        }
    }
}

impl Config {
    /// Loads `$SCENE_WM_CONFIG`, or `wms_config.toml` from the working directory.
    /// Missing or broken files fall back to defaults with a warning.
    pub fn load() -> Self {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        match Self::load_from(&path) {
            Ok(config) => {
                info!(path = %path.display(), "configuration loaded");
                config
            }
            Err(ConfigError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                info!(path = %path.display(), "no configuration file, using defaults");
                Self::default()
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "falling back to default config");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses `content` as overrides on top of the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut merged = toml::Value::try_from(Self::default())?;
        let overrides = content.parse::<toml::Value>()?;
        overlay_toml(&mut merged, overrides);
        let config: Config = merged.try_into()?;
        Ok(config.sanitized())
    }

    fn sanitized(mut self) -> Self {
        if self.snapshot_workers == 0 {
            warn!("snapshot_workers must be at least 1");
            self.snapshot_workers = 1;
        }
        if self.lifecycle_queue_capacity == 0 {
            warn!("lifecycle_queue_capacity must be at least 1");
            self.lifecycle_queue_capacity = 1;
        }
        if self.starting_window_cache_capacity == 0 {
            warn!("starting_window_cache_capacity must be at least 1");
            self.starting_window_cache_capacity = 1;
        }
        self
    }

    pub fn resolve_display_profile(
        &self,
        name: &str,
        screen_type: ScreenType,
    ) -> Option<DisplayProfile> {
        self.displays.resolve(name, screen_type)
    }
}

/// Lays the user file over the serialized defaults. Tables are merged key by key;
/// anything else, arrays included, replaces the default outright.
fn overlay_toml(defaults: &mut toml::Value, user: toml::Value) {
    let toml::Value::Table(user_table) = user else {
        *defaults = user;
        return;
    };
    let Some(default_table) = defaults.as_table_mut() else {
        *defaults = toml::Value::Table(user_table);
        return;
    };
    for (key, value) in user_table {
        match default_table.get_mut(&key) {
            Some(slot) => overlay_toml(slot, value),
            None => {
                default_table.insert(key, value);
            }
        }
    }
}

/// Waterfall (curved edge) panel handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct WaterfallConfig {
    pub is_waterfall_display: bool,
    pub compression_enabled_when_horizontal: bool,
    /// Curved area hidden on each side, in virtual pixels.
    pub compression_size_vp: u32,
}

impl WaterfallConfig {
    pub fn compression_active(&self) -> bool {
        self.is_waterfall_display
            && self.compression_enabled_when_horizontal
            && self.compression_size_vp > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultScreenConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub refresh_rate: u32,
    pub virtual_pixel_ratio: f32,
}

impl Default for DefaultScreenConfig {
    fn default() -> Self {
        Self {
            name: "builtin".to_string(),
            width: 1260,
            height: 2720,
            refresh_rate: 60,
            virtual_pixel_ratio: 3.5,
        }
    }
}

impl DefaultScreenConfig {
    pub fn mode(&self) -> SupportedMode {
        SupportedMode::new(self.width, self.height, self.refresh_rate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DisplaysConfig {
    #[serde(default)]
    pub named: BTreeMap<String, DisplayProfile>,
    #[serde(default)]
    pub generic: Vec<DisplayProfileMatch>,
}

impl DisplaysConfig {
    pub fn resolve(&self, name: &str, screen_type: ScreenType) -> Option<DisplayProfile> {
        if let Some(profile) = self.named.get(name) {
            return Some(profile.clone());
        }

        self.generic
            .iter()
            .find(|entry| entry.matcher.matches(name, screen_type))
            .map(|entry| entry.profile.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DisplayProfile {
    #[serde(default)]
    pub resolution: Option<DisplayResolution>,
    #[serde(default)]
    pub refresh_hz: Option<u32>,
    #[serde(default)]
    pub virtual_pixel_ratio: Option<f32>,
}

impl DisplayProfile {
    /// Index of the first mode satisfying the profile, if any.
    pub fn pick_mode(&self, modes: &[SupportedMode]) -> Option<usize> {
        modes.iter().position(|mode| {
            let resolution_ok = self
                .resolution
                .map_or(true, |r| r.width == mode.width && r.height == mode.height);
            let refresh_ok = self.refresh_hz.map_or(true, |hz| hz == mode.refresh_rate);
            resolution_ok && refresh_ok
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DisplayResolution {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DisplayProfileMatch {
    #[serde(default, rename = "match")]
    pub matcher: DisplayMatcher,
    #[serde(flatten)]
    pub profile: DisplayProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DisplayMatcher {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub name_prefix: Option<String>,
    #[serde(default)]
    pub kind: Option<ScreenKind>,
}

impl DisplayMatcher {
    fn matches(&self, name: &str, screen_type: ScreenType) -> bool {
        if let Some(expected) = &self.name {
            if !expected.eq_ignore_ascii_case(name) {
                return false;
            }
        }

        if let Some(prefix) = &self.name_prefix {
            if !name.starts_with(prefix.as_str()) {
                return false;
            }
        }

        if let Some(kind) = self.kind {
            let actual = match screen_type {
                ScreenType::Real => ScreenKind::Real,
                ScreenType::Virtual => ScreenKind::Virtual,
            };
            if actual != kind {
                return false;
            }
        }

        true
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScreenKind {
    Real,
    Virtual,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_runtime_constants() {
        let config = Config::default();
        assert!(config.astc_enabled);
        assert_eq!(config.lifecycle_queue_capacity, 15);
        assert_eq!(config.lifecycle_task_expiry_ms, 350);
        assert_eq!(config.starting_window_cache_capacity, 100);
        assert!(!config.waterfall.compression_active());
    }

    #[test]
    fn overrides_merge_into_nested_tables() {
        let overrides = r#"
            astc_enabled = false

            [waterfall]
            is_waterfall_display = true
            compression_size_vp = 12
        "#;

        let config = Config::from_toml_str(overrides).expect("config should parse");
        assert!(!config.astc_enabled);
        assert!(config.waterfall.is_waterfall_display);
        assert!(!config.waterfall.compression_enabled_when_horizontal);
        assert_eq!(config.waterfall.compression_size_vp, 12);
        assert_eq!(config.snapshot_workers, 2);
    }

    #[test]
    fn overlay_replaces_arrays_and_scalars() {
        let mut defaults: toml::Value = toml::from_str(
            r#"
            list = [1, 2, 3]
            [table]
            kept = "a"
            replaced = "b"
            "#,
        )
        .expect("defaults");
        let user: toml::Value = toml::from_str(
            r#"
            list = [9]
            [table]
            replaced = "c"
            added = true
            "#,
        )
        .expect("user");

        overlay_toml(&mut defaults, user);
        assert_eq!(defaults["list"].as_array().map(Vec::len), Some(1));
        assert_eq!(defaults["table"]["kept"].as_str(), Some("a"));
        assert_eq!(defaults["table"]["replaced"].as_str(), Some("c"));
        assert_eq!(defaults["table"]["added"].as_bool(), Some(true));
    }

    #[test]
    fn zero_capacities_are_clamped() {
        let config = Config::from_toml_str("lifecycle_queue_capacity = 0").expect("parse");
        assert_eq!(config.lifecycle_queue_capacity, 1);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(matches!(
            Config::from_toml_str("astc_enabled = ["),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn named_profile_wins_over_generic() {
        let overrides = r#"
            [displays.named.hdmi]
            refresh_hz = 30

            [[displays.generic]]
            match = { kind = "real" }
            refresh_hz = 120
        "#;
        let config = Config::from_toml_str(overrides).expect("parse");

        let named = config
            .resolve_display_profile("hdmi", ScreenType::Real)
            .expect("named profile");
        assert_eq!(named.refresh_hz, Some(30));

        let generic = config
            .resolve_display_profile("panel", ScreenType::Real)
            .expect("generic profile");
        assert_eq!(generic.refresh_hz, Some(120));

        assert!(config
            .resolve_display_profile("cast", ScreenType::Virtual)
            .is_none());
    }

    #[test]
    fn profile_picks_matching_mode() {
        let modes = vec![
            SupportedMode::new(1920, 1080, 60),
            SupportedMode::new(1920, 1080, 120),
            SupportedMode::new(1280, 720, 60),
        ];
        let profile = DisplayProfile {
            resolution: Some(DisplayResolution {
                width: 1920,
                height: 1080,
            }),
            refresh_hz: Some(120),
            virtual_pixel_ratio: None,
        };
        assert_eq!(profile.pick_mode(&modes), Some(1));
        assert_eq!(DisplayProfile::default().pick_mode(&modes), Some(0));
    }
}

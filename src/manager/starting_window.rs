//! Splash ("starting window") metadata, looked up cache first, then the rdb store,
//! then the application's resources.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::session::SessionInfo;

pub const DEFAULT_CACHE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StartingWindowInfo {
    pub icon_path: String,
    pub background_color: u32,
    pub background_image_path: String,
    pub illustration_path: String,
    pub branding_path: String,
}

impl StartingWindowInfo {
    pub fn new(icon_path: &str, background_color: u32) -> Self {
        Self {
            icon_path: icon_path.to_string(),
            background_color,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StartingWindowKey {
    pub bundle_name: String,
    pub module_name: String,
    pub ability_name: String,
    pub dark_mode: bool,
}

impl StartingWindowKey {
    pub fn from_session(info: &SessionInfo, dark_mode: bool) -> Self {
        Self {
            bundle_name: info.bundle_name.clone(),
            module_name: info.module_name.clone(),
            ability_name: info.ability_name.clone(),
            dark_mode,
        }
    }

    fn inner_key(&self) -> (String, String, bool) {
        (
            self.module_name.clone(),
            self.ability_name.clone(),
            self.dark_mode,
        )
    }
}

/// Durable store backing the cache.
pub trait StartingWindowRdb: Send + Sync {
    fn get(&self, key: &StartingWindowKey) -> Option<StartingWindowInfo>;
    fn insert(&self, key: &StartingWindowKey, info: &StartingWindowInfo) -> bool;
    fn remove_bundle(&self, _bundle_name: &str) {}
}

/// Last resort: the application's own resource bundle.
pub trait StartingWindowResource: Send + Sync {
    fn load(&self, key: &StartingWindowKey) -> Option<StartingWindowInfo>;
}

#[derive(Default)]
pub struct MemoryStartingWindowRdb {
    rows: RwLock<BTreeMap<StartingWindowKey, StartingWindowInfo>>,
}

impl MemoryStartingWindowRdb {
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StartingWindowRdb for MemoryStartingWindowRdb {
    fn get(&self, key: &StartingWindowKey) -> Option<StartingWindowInfo> {
        self.rows.read().get(key).cloned()
    }

    fn insert(&self, key: &StartingWindowKey, info: &StartingWindowInfo) -> bool {
        self.rows.write().insert(key.clone(), info.clone());
        true
    }

    fn remove_bundle(&self, bundle_name: &str) {
        self.rows
            .write()
            .retain(|key, _| key.bundle_name != bundle_name);
    }
}

type BundleEntry = HashMap<(String, String, bool), StartingWindowInfo>;

/// Per-bundle cache bounded by bundle count. The oldest inserted bundle goes first,
/// reads do not refresh its position.
pub struct StartingWindowCache {
    capacity: usize,
    bundles: HashMap<String, BundleEntry>,
    order: VecDeque<String>,
}

impl StartingWindowCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            bundles: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, key: &StartingWindowKey) -> Option<&StartingWindowInfo> {
        self.bundles
            .get(&key.bundle_name)
            .and_then(|entry| entry.get(&key.inner_key()))
    }

    pub fn contains(&self, key: &StartingWindowKey) -> bool {
        self.get(key).is_some()
    }

    /// Stores `info`, evicting the oldest bundle when a new bundle would exceed capacity.
    pub fn insert(&mut self, key: &StartingWindowKey, info: StartingWindowInfo) {
        if !self.bundles.contains_key(&key.bundle_name) {
            while self.order.len() >= self.capacity {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                debug!(target: "wms::pattern", bundle = %oldest, "evicting starting window bundle");
                self.bundles.remove(&oldest);
            }
            self.order.push_back(key.bundle_name.clone());
        }
        self.bundles
            .entry(key.bundle_name.clone())
            .or_default()
            .insert(key.inner_key(), info);
    }

    pub fn remove_bundle(&mut self, bundle_name: &str) -> bool {
        self.order.retain(|bundle| bundle != bundle_name);
        self.bundles.remove(bundle_name).is_some()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.bundles.clear();
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    pub fn contains_bundle(&self, bundle_name: &str) -> bool {
        self.bundles.contains_key(bundle_name)
    }
}

pub struct StartingWindowProvider {
    cache: Mutex<StartingWindowCache>,
    rdb: Option<Arc<dyn StartingWindowRdb>>,
    resource: Option<Arc<dyn StartingWindowResource>>,
}

impl StartingWindowProvider {
    pub fn new(
        capacity: usize,
        rdb: Option<Arc<dyn StartingWindowRdb>>,
        resource: Option<Arc<dyn StartingWindowResource>>,
    ) -> Self {
        Self {
            cache: Mutex::new(StartingWindowCache::new(capacity)),
            rdb,
            resource,
        }
    }

    /// Records what the host already knows. Existing entries are kept as they are.
    pub fn cache_starting_window_info(&self, key: &StartingWindowKey, info: StartingWindowInfo) {
        let mut cache = self.cache.lock();
        if cache.contains(key) {
            debug!(target: "wms::pattern", bundle = %key.bundle_name, ability = %key.ability_name, "starting window already cached");
            return;
        }
        cache.insert(key, info);
    }

    pub fn get_startup_page(&self, key: &StartingWindowKey) -> Option<StartingWindowInfo> {
        if let Some(info) = self.cache.lock().get(key).cloned() {
            return Some(info);
        }
        if let Some(info) = self.rdb.as_ref().and_then(|rdb| rdb.get(key)) {
            debug!(target: "wms::pattern", bundle = %key.bundle_name, "starting window from rdb");
            self.cache.lock().insert(key, info.clone());
            return Some(info);
        }
        let Some(info) = self.resource.as_ref().and_then(|res| res.load(key)) else {
            warn!(target: "wms::pattern", bundle = %key.bundle_name, ability = %key.ability_name, "no starting window found");
            return None;
        };
        if let Some(rdb) = &self.rdb {
            if !rdb.insert(key, &info) {
                warn!(target: "wms::pattern", bundle = %key.bundle_name, "failed to write starting window to rdb");
            }
        }
        self.cache.lock().insert(key, info.clone());
        Some(info)
    }

    pub fn on_bundle_updated(&self, bundle_name: &str) {
        let removed = self.cache.lock().remove_bundle(bundle_name);
        if let Some(rdb) = &self.rdb {
            rdb.remove_bundle(bundle_name);
        }
        info!(target: "wms::pattern", bundle = bundle_name, removed, "bundle updated");
    }

    pub fn on_configuration_updated(&self) {
        self.cache.lock().clear();
        info!(target: "wms::pattern", "configuration updated, starting window cache cleared");
    }

    pub fn cached_bundles(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_bundle_cached(&self, bundle_name: &str) -> bool {
        self.cache.lock().contains_bundle(bundle_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(bundle: &str, dark: bool) -> StartingWindowKey {
        StartingWindowKey {
            bundle_name: bundle.to_string(),
            module_name: "entry".into(),
            ability_name: "MainAbility".into(),
            dark_mode: dark,
        }
    }

    struct CountingResource(AtomicUsize);

    impl StartingWindowResource for CountingResource {
        fn load(&self, key: &StartingWindowKey) -> Option<StartingWindowInfo> {
            self.0.fetch_add(1, Ordering::SeqCst);
            (key.bundle_name != "missing").then(|| StartingWindowInfo::new("/res/icon.png", 0xff00_00ff))
        }
    }

    #[test]
    fn oldest_bundle_is_evicted_at_capacity() {
        let mut cache = StartingWindowCache::new(DEFAULT_CACHE_CAPACITY);
        for idx in 0..=DEFAULT_CACHE_CAPACITY {
            cache.insert(&key(&format!("bundle{idx}"), false), StartingWindowInfo::default());
        }
        assert_eq!(cache.len(), DEFAULT_CACHE_CAPACITY);
        assert!(!cache.contains_bundle("bundle0"));
        assert!(cache.contains_bundle("bundle1"));
        assert!(cache.contains_bundle(&format!("bundle{DEFAULT_CACHE_CAPACITY}")));
    }

    #[test]
    fn reads_do_not_refresh_eviction_order() {
        let mut cache = StartingWindowCache::new(2);
        cache.insert(&key("a", false), StartingWindowInfo::default());
        cache.insert(&key("b", false), StartingWindowInfo::default());
        assert!(cache.get(&key("a", false)).is_some());
        cache.insert(&key("c", false), StartingWindowInfo::default());
        assert!(!cache.contains_bundle("a"));
        assert!(cache.contains_bundle("b"));
    }

    #[test]
    fn dark_mode_is_part_of_the_key() {
        let mut cache = StartingWindowCache::new(4);
        cache.insert(&key("a", true), StartingWindowInfo::new("dark.png", 0));
        assert!(cache.get(&key("a", false)).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn resource_hit_is_written_back() {
        let rdb = Arc::new(MemoryStartingWindowRdb::default());
        let resource = Arc::new(CountingResource(AtomicUsize::new(0)));
        let provider = StartingWindowProvider::new(4, Some(rdb.clone()), Some(resource.clone()));

        let first = provider.get_startup_page(&key("app", false));
        let second = provider.get_startup_page(&key("app", false));
        assert_eq!(first, second);
        assert_eq!(resource.0.load(Ordering::SeqCst), 1);
        assert_eq!(rdb.len(), 1);

        provider.on_configuration_updated();
        assert_eq!(provider.cached_bundles(), 0);
        assert!(provider.get_startup_page(&key("app", false)).is_some());
        assert_eq!(resource.0.load(Ordering::SeqCst), 1);

        assert!(provider.get_startup_page(&key("missing", false)).is_none());
    }

    #[test]
    fn caching_never_overwrites() {
        let provider = StartingWindowProvider::new(4, None, None);
        provider.cache_starting_window_info(&key("app", false), StartingWindowInfo::new("one", 1));
        provider.cache_starting_window_info(&key("app", false), StartingWindowInfo::new("two", 2));
        assert_eq!(
            provider.get_startup_page(&key("app", false)).map(|i| i.icon_path),
            Some("one".to_string())
        );
        provider.on_bundle_updated("app");
        assert!(!provider.is_bundle_cached("app"));
    }
}

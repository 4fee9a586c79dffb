//! Snapshot and icon persistence for scene sessions.
//!
//! Snapshots live at `{root}/SceneSnapShot/{bundle}_{persistent_id}.{astc|png}` and
//! updated icons at `{root}/UpdatedIcon/{bundle}.png`. Encoding runs on the shared
//! [`WorkerPool`]; a per-session generation counter makes sure only the most recent
//! save resets the "saving" state.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use image::{imageops::FilterType, ImageFormat, RgbaImage};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::task::WorkerPool;
use crate::types::PersistentId;

mod astc;

pub const SNAPSHOT_DIR: &str = "SceneSnapShot";
pub const UPDATED_ICON_DIR: &str = "UpdatedIcon";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
    #[error("pixel map {width}x{height} does not match {len} bytes of rgba data")]
    InvalidPixelMap { width: u32, height: u32, len: usize },
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

/// Tightly packed RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelMap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelMap {
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn validate(&self) -> Result<(), PersistenceError> {
        if self.width == 0
            || self.height == 0
            || self.data.len() != (self.width as usize) * (self.height as usize) * 4
        {
            return Err(PersistenceError::InvalidPixelMap {
                width: self.width,
                height: self.height,
                len: self.data.len(),
            });
        }
        Ok(())
    }

    fn to_image(&self) -> Result<RgbaImage, PersistenceError> {
        self.validate()?;
        RgbaImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            PersistenceError::InvalidPixelMap {
                width: self.width,
                height: self.height,
                len: self.data.len(),
            },
        )
    }

    fn from_image(image: RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            data: image.into_raw(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Astc,
    Png,
}

impl SnapshotFormat {
    pub fn from_astc_toggle(astc_enabled: bool) -> Self {
        if astc_enabled {
            SnapshotFormat::Astc
        } else {
            SnapshotFormat::Png
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            SnapshotFormat::Astc => "astc",
            SnapshotFormat::Png => "png",
        }
    }

    fn write(self, path: &Path, pixel_map: &PixelMap) -> Result<(), PersistenceError> {
        match self {
            SnapshotFormat::Astc => Ok(std::fs::write(path, astc::encode(pixel_map)?)?),
            SnapshotFormat::Png => Ok(pixel_map
                .to_image()?
                .save_with_format(path, ImageFormat::Png)?),
        }
    }

    fn read(self, path: &Path) -> Result<PixelMap, PersistenceError> {
        match self {
            SnapshotFormat::Astc => astc::decode(&std::fs::read(path)?),
            SnapshotFormat::Png => Ok(PixelMap::from_image(image::open(path)?.to_rgba8())),
        }
    }
}

pub type SnapshotDoneCallback = Box<dyn FnOnce() + Send + 'static>;

/// Capability a scene session uses to persist what it last looked like.
pub trait ScenePersistence: Send + Sync {
    /// Encodes and writes `pixel_map` off the calling thread. `on_done` runs on failure,
    /// or on success when no newer save was requested meanwhile.
    fn save_snapshot(&self, pixel_map: Arc<PixelMap>, on_done: SnapshotDoneCallback);
    fn snapshot_file_path(&self) -> PathBuf;
    fn is_snapshot_existed(&self) -> bool;
    /// Decodes the stored snapshot, shrunk by `new_scale / old_scale` when smaller.
    fn local_snapshot_pixel_map(&self, old_scale: f32, new_scale: f32) -> Option<PixelMap>;
    fn is_saving_snapshot(&self) -> bool;
    fn reset_snapshot_cache(&self);
    fn snapshot_size(&self) -> Option<(u32, u32)>;
    fn rename_snapshot_from_old_persistent_id(&self, old_persistent_id: PersistentId);
    fn remove_snapshot(&self);
    fn save_updated_icon(&self, pixel_map: &PixelMap);
    fn updated_icon_path(&self) -> PathBuf;
}

/// Builds the per-session persistence handle.
pub trait PersistenceFactory: Send + Sync {
    fn create(&self, bundle_name: &str, persistent_id: PersistentId) -> Arc<dyn ScenePersistence>;
}

struct SnapshotState {
    bundle_name: String,
    persistent_id: PersistentId,
    format: SnapshotFormat,
    snapshot_dir: PathBuf,
    snapshot_path: PathBuf,
    updated_icon_path: PathBuf,
    io_lock: Mutex<()>,
    saving_sum: AtomicU64,
    saving: AtomicBool,
    size: Mutex<Option<(u32, u32)>>,
}

impl SnapshotState {
    fn path_for(&self, persistent_id: PersistentId) -> PathBuf {
        self.snapshot_dir.join(format!(
            "{}_{}.{}",
            self.bundle_name,
            persistent_id,
            self.format.extension()
        ))
    }
}

pub struct FileScenePersistence {
    state: Arc<SnapshotState>,
    pool: Arc<WorkerPool>,
}

impl FileScenePersistence {
    pub fn new(
        root: &Path,
        bundle_name: &str,
        persistent_id: PersistentId,
        format: SnapshotFormat,
        pool: Arc<WorkerPool>,
    ) -> Self {
        let snapshot_dir = root.join(SNAPSHOT_DIR);
        let snapshot_path = snapshot_dir.join(format!(
            "{bundle_name}_{persistent_id}.{}",
            format.extension()
        ));
        let updated_icon_path = root
            .join(UPDATED_ICON_DIR)
            .join(format!("{bundle_name}.png"));
        Self {
            state: Arc::new(SnapshotState {
                bundle_name: bundle_name.to_string(),
                persistent_id,
                format,
                snapshot_dir,
                snapshot_path,
                updated_icon_path,
                io_lock: Mutex::new(()),
                saving_sum: AtomicU64::new(0),
                saving: AtomicBool::new(false),
                size: Mutex::new(None),
            }),
            pool,
        }
    }

    fn write_snapshot(
        weak: &Weak<SnapshotState>,
        pixel_map: &PixelMap,
        generation: u64,
    ) -> Result<bool, PersistenceError> {
        let Some(state) = weak.upgrade() else {
            return Ok(true);
        };
        let _guard = state.io_lock.lock();
        match std::fs::remove_file(&state.snapshot_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        state.format.write(&state.snapshot_path, pixel_map)?;
        *state.size.lock() = Some((pixel_map.width, pixel_map.height));
        Ok(generation == state.saving_sum.load(Ordering::SeqCst))
    }
}

impl ScenePersistence for FileScenePersistence {
    fn save_snapshot(&self, pixel_map: Arc<PixelMap>, on_done: SnapshotDoneCallback) {
        let generation = self.state.saving_sum.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.saving.store(true, Ordering::SeqCst);
        let weak = Arc::downgrade(&self.state);
        let label = format!("SaveSnapshot {}", self.state.snapshot_path.display());
        let submitted = self.pool.submit(&label, move || {
            match Self::write_snapshot(&weak, &pixel_map, generation) {
                Ok(true) => {
                    debug!(target: "wms::pattern", generation, "snapshot saved");
                    on_done();
                }
                Ok(false) => {
                    debug!(target: "wms::pattern", generation, "snapshot superseded by a newer save");
                }
                Err(err) => {
                    warn!(target: "wms::pattern", error = %err, "saving snapshot failed");
                    on_done();
                }
            }
        });
        if !submitted {
            self.state.saving.store(false, Ordering::SeqCst);
        }
    }

    fn snapshot_file_path(&self) -> PathBuf {
        self.state.snapshot_path.clone()
    }

    fn is_snapshot_existed(&self) -> bool {
        std::fs::metadata(&self.state.snapshot_path)
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    fn local_snapshot_pixel_map(&self, old_scale: f32, new_scale: f32) -> Option<PixelMap> {
        if !self.is_snapshot_existed() {
            warn!(target: "wms::pattern", path = %self.state.snapshot_path.display(), "local snapshot does not exist");
            return None;
        }
        let decoded = {
            let _guard = self.state.io_lock.lock();
            self.state.format.read(&self.state.snapshot_path)
        };
        let pixel_map = match decoded {
            Ok(pixel_map) => pixel_map,
            Err(err) => {
                warn!(target: "wms::pattern", error = %err, "decoding snapshot failed");
                return None;
            }
        };
        if old_scale <= 0.0 || new_scale >= old_scale {
            return Some(pixel_map);
        }
        let ratio = new_scale / old_scale;
        let width = ((pixel_map.width as f32 * ratio) as u32).max(1);
        let height = ((pixel_map.height as f32 * ratio) as u32).max(1);
        let image = pixel_map.to_image().ok()?;
        let scaled = image::imageops::resize(&image, width, height, FilterType::Triangle);
        Some(PixelMap::from_image(scaled))
    }

    fn is_saving_snapshot(&self) -> bool {
        self.state.saving.load(Ordering::SeqCst)
    }

    fn reset_snapshot_cache(&self) {
        self.state.saving.store(false, Ordering::SeqCst);
    }

    fn snapshot_size(&self) -> Option<(u32, u32)> {
        *self.state.size.lock()
    }

    fn rename_snapshot_from_old_persistent_id(&self, old_persistent_id: PersistentId) {
        let weak = Arc::downgrade(&self.state);
        self.pool.submit("RenameSnapshotFromOldPersistentId", move || {
            let Some(state) = weak.upgrade() else {
                return;
            };
            let from = state.path_for(old_persistent_id);
            let _guard = state.io_lock.lock();
            match std::fs::rename(&from, &state.snapshot_path) {
                Ok(()) => info!(
                    target: "wms::pattern",
                    from = %from.display(),
                    to = %state.snapshot_path.display(),
                    "snapshot renamed"
                ),
                Err(err) => warn!(
                    target: "wms::pattern",
                    from = %from.display(),
                    error = %err,
                    "renaming snapshot failed"
                ),
            }
        });
    }

    fn remove_snapshot(&self) {
        let _guard = self.state.io_lock.lock();
        let path = &self.state.snapshot_path;
        match remove_file_if_present(path) {
            Ok(true) => info!(
                target: "wms::pattern",
                persistent_id = self.state.persistent_id,
                "snapshot removed"
            ),
            Ok(false) => {}
            Err(err) => warn!(target: "wms::pattern", path = %path.display(), error = %err, "removing snapshot failed"),
        }
    }

    fn save_updated_icon(&self, pixel_map: &PixelMap) {
        let path = &self.state.updated_icon_path;
        if let Err(err) = remove_file_if_present(path) {
            warn!(target: "wms::pattern", path = %path.display(), error = %err, "removing stale icon failed");
        }
        if let Err(err) = SnapshotFormat::Png.write(path, pixel_map) {
            warn!(target: "wms::pattern", error = %err, "saving updated icon failed");
        }
    }

    fn updated_icon_path(&self) -> PathBuf {
        self.state.updated_icon_path.clone()
    }
}

/// Creates [`FileScenePersistence`] handles rooted at one directory.
pub struct FileSnapshotStore {
    root: PathBuf,
    format: SnapshotFormat,
    pool: Arc<WorkerPool>,
}

impl FileSnapshotStore {
    /// Creates `SceneSnapShot/` and `UpdatedIcon/` under `root` if needed.
    pub fn new(
        root: &Path,
        format: SnapshotFormat,
        pool: Arc<WorkerPool>,
    ) -> Result<Self, PersistenceError> {
        std::fs::create_dir_all(root.join(SNAPSHOT_DIR))?;
        std::fs::create_dir_all(root.join(UPDATED_ICON_DIR))?;
        Ok(Self {
            root: root.to_path_buf(),
            format,
            pool,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl PersistenceFactory for FileSnapshotStore {
    fn create(&self, bundle_name: &str, persistent_id: PersistentId) -> Arc<dyn ScenePersistence> {
        Arc::new(FileScenePersistence::new(
            &self.root,
            bundle_name,
            persistent_id,
            self.format,
            self.pool.clone(),
        ))
    }
}

/// Deletes `path`. Returns `false` when there was nothing to delete.
fn remove_file_if_present(path: &Path) -> std::io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

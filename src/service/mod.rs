//! Composition root. Owns every component for the lifetime of the process and wires
//! screen events into displays and display events into sessions.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::config::Config;
use crate::display::AbstractDisplayController;
use crate::host::{RenderHost, SessionBroker};
use crate::manager::{
    ManagerCollaborators, SceneSessionManager, StartingWindowRdb, StartingWindowResource,
};
use crate::persistence::{FileSnapshotStore, PersistenceFactory, SnapshotFormat};
use crate::screen::{ScreenController, ScreenType};
use crate::task::{TaskScheduler, WorkerPool};
use crate::types::ScreenId;

mod dump;

pub use dump::USAGE;

/// Outside collaborators handed to [`WindowManagerService::new`].
pub struct ServiceCollaborators {
    pub render_host: Arc<dyn RenderHost>,
    pub broker: Option<Arc<dyn SessionBroker>>,
    pub starting_window_rdb: Option<Arc<dyn StartingWindowRdb>>,
    pub starting_window_resource: Option<Arc<dyn StartingWindowResource>>,
}

pub struct WindowManagerService {
    config: Config,
    scheduler: Arc<TaskScheduler>,
    workers: Arc<WorkerPool>,
    screens: Arc<ScreenController>,
    displays: Arc<AbstractDisplayController>,
    sessions: Arc<SceneSessionManager>,
}

impl WindowManagerService {
    pub fn new(config: Config, collaborators: ServiceCollaborators) -> anyhow::Result<Self> {
        let scheduler =
            TaskScheduler::new("wms-main").context("failed to start the dispatch thread")?;
        let workers = WorkerPool::new("wms-snapshot", config.snapshot_workers)
            .context("failed to start snapshot workers")?;

        let persistence: Option<Arc<dyn PersistenceFactory>> = match &config.snapshot_dir {
            Some(dir) => {
                let store = FileSnapshotStore::new(
                    dir,
                    SnapshotFormat::from_astc_toggle(config.astc_enabled),
                    workers.clone(),
                )
                .with_context(|| format!("failed to prepare snapshot dir {}", dir.display()))?;
                info!(root = %store.root().display(), "snapshot persistence enabled");
                Some(Arc::new(store))
            }
            None => {
                warn!("no snapshot_dir configured, snapshots are not persisted");
                None
            }
        };

        let screens = Arc::new(ScreenController::new(config.displays.clone()));
        let displays = AbstractDisplayController::new(
            screens.clone(),
            config.waterfall,
            Some(collaborators.render_host.clone()),
        );
        let sessions = SceneSessionManager::new(
            &config,
            scheduler.clone(),
            ManagerCollaborators {
                render_host: collaborators.render_host,
                broker: collaborators.broker,
                persistence,
                starting_window_rdb: collaborators.starting_window_rdb,
                starting_window_resource: collaborators.starting_window_resource,
            },
        );

        let manager = Arc::downgrade(&sessions);
        displays.set_display_state_change_listener(Arc::new(
            move |default_display, info, group, change| {
                if let Some(manager) = manager.upgrade() {
                    manager.on_display_state_change(default_display, info, group, change);
                }
            },
        ));

        Ok(Self {
            config,
            scheduler,
            workers,
            screens,
            displays,
            sessions,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn screens(&self) -> &Arc<ScreenController> {
        &self.screens
    }

    pub fn displays(&self) -> &Arc<AbstractDisplayController> {
        &self.displays
    }

    pub fn sessions(&self) -> &Arc<SceneSessionManager> {
        &self.sessions
    }

    /// Brings up the screen described by `default_screen` in the config.
    pub fn connect_default_screen(&self) -> ScreenId {
        let screen = &self.config.default_screen;
        self.screens.connect_screen(
            &screen.name,
            ScreenType::Real,
            vec![screen.mode()],
            screen.virtual_pixel_ratio,
        )
    }

    pub fn dump(&self, args: &[&str]) -> String {
        dump::dump(self, args)
    }

    /// Drains pending dispatch work and stops the executors.
    pub fn shutdown(&self) {
        self.scheduler.flush();
        self.scheduler.shutdown();
        self.workers.shutdown();
        info!("window manager service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HeadlessRenderHost;
    use crate::types::DisplayId;

    fn service(config: Config) -> WindowManagerService {
        WindowManagerService::new(
            config,
            ServiceCollaborators {
                render_host: Arc::new(HeadlessRenderHost),
                broker: None,
                starting_window_rdb: None,
                starting_window_resource: None,
            },
        )
        .expect("service")
    }

    #[test]
    fn default_screen_creates_default_display() {
        let service = service(Config::default());
        let screen = service.connect_default_screen();
        service.scheduler().flush();

        let display = service.displays().get_display_by_screen(screen).expect("display");
        assert_eq!(display.width, service.config().default_screen.width);
        assert_eq!(service.sessions().default_display_id(), display.id);
        assert_ne!(display.id, DisplayId::INVALID);
        service.shutdown();
    }

    #[test]
    fn snapshot_dir_is_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            snapshot_dir: Some(dir.path().join("wms")),
            ..Config::default()
        };
        let service = service(config);
        assert!(dir.path().join("wms").join(crate::persistence::SNAPSHOT_DIR).is_dir());
        service.shutdown();
    }
}

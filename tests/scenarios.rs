use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use scene_wm::config::Config;
use scene_wm::display::AbstractDisplayController;
use scene_wm::host::{HeadlessRenderHost, RenderHost};
use scene_wm::manager::{
    BackgroundOptions, FocusChangeReason, FocusEvent, StartingWindowCache, StartingWindowInfo,
    StartingWindowKey, DEFAULT_CACHE_CAPACITY,
};
use scene_wm::screen::{ScreenType, SupportedMode};
use scene_wm::session::{SessionEvent, SessionInfo, SessionState};
use scene_wm::types::{DisplayId, PersistentId, Point, Rotation};
use scene_wm::utils::Observer;
use scene_wm::{ServiceCollaborators, WindowManagerService};

fn service_with(render_host: Arc<dyn RenderHost>) -> WindowManagerService {
    WindowManagerService::new(
        Config::default(),
        ServiceCollaborators {
            render_host,
            broker: None,
            starting_window_rdb: None,
            starting_window_resource: None,
        },
    )
    .expect("service")
}

fn service() -> WindowManagerService {
    service_with(Arc::new(HeadlessRenderHost))
}

fn square() -> Vec<SupportedMode> {
    vec![SupportedMode::new(200, 200, 60)]
}

#[test]
fn basic_display_lifecycle() {
    let service = service();
    let before = service.displays().get_all_display_ids();
    let screen = service
        .screens()
        .connect_screen("panel", ScreenType::Real, square(), 1.0);

    let ids = service.displays().get_all_display_ids();
    assert_eq!(ids.len(), before.len() + 1);
    let mut display = service.displays().get_display_by_screen(screen);
    assert_eq!(
        display.as_ref().map(|d| (d.width, d.height)),
        Some((200, 200))
    );

    let taller = SupportedMode::new(200, 400, 60);
    assert!(AbstractDisplayController::update_display_size(
        display.as_mut(),
        Some(&taller)
    ));
    assert_eq!(display.as_ref().map(|d| d.height), Some(400));
    assert!(!AbstractDisplayController::update_display_size(
        display.as_mut(),
        Some(&taller)
    ));
    assert_eq!(display.as_ref().map(|d| d.height), Some(400));

    service.screens().disconnect_screen(screen);
    assert_eq!(service.displays().get_all_display_ids(), before);
    service.shutdown();
}

#[test]
fn expand_then_disconnect() {
    let service = service();
    let screens = service.screens();
    let a = screens.connect_screen("a", ScreenType::Real, square(), 1.0);
    let b = screens.connect_screen("b", ScreenType::Real, square(), 1.0);
    screens
        .make_expand(&[(a, Point::new(0, 0)), (b, Point::new(200, 0))])
        .expect("expand");

    let composite = service
        .displays()
        .get_display_by_screen(a)
        .expect("composite");
    assert_eq!((composite.width, composite.height), (400, 200));

    screens.disconnect_screen(b);
    let shrunk = service
        .displays()
        .get_display(composite.id)
        .expect("display survives");
    assert_eq!((shrunk.width, shrunk.height), (200, 200));
    assert_eq!(service.displays().get_all_display_ids(), vec![composite.id]);
    service.shutdown();
}

#[test]
fn reuse_path_returns_the_first_session() {
    let service = service();
    let manager = service.sessions();

    let mut first = SessionInfo::new("com.example.mail", "entry", "MainAbility");
    let p1 = manager.gen_scene_session(&mut first).expect("p1");

    let mut again = SessionInfo::new("com.example.mail", "entry", "MainAbility");
    again.reuse = true;
    let p2 = manager.gen_scene_session(&mut again).expect("p2");

    assert_eq!(p1.persistent_id(), p2.persistent_id());
    assert_eq!(again.persistent_id, first.persistent_id);
    assert_eq!(manager.registry().len(), 1);
    service.shutdown();
}

#[test]
fn concurrent_reuse_requests_share_one_session() {
    let service = service();
    let manager = service.sessions().clone();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            thread::spawn(move || {
                let mut info = SessionInfo::new("com.example.maps", "entry", "MainAbility");
                info.reuse = true;
                manager
                    .gen_scene_session(&mut info)
                    .map(|session| session.persistent_id())
            })
        })
        .collect();
    let ids: Vec<Option<PersistentId>> = handles
        .into_iter()
        .map(|handle| handle.join().expect("join"))
        .collect();

    assert!(ids.iter().all(|id| *id == ids[0] && id.is_some()));
    assert_eq!(manager.registry().len(), 1);
    service.shutdown();
}

struct FocusRecorder(Mutex<Vec<FocusEvent>>);

impl Observer<FocusEvent> for FocusRecorder {
    fn notify(&self, event: &FocusEvent) {
        self.0.lock().push(*event);
    }
}

#[test]
fn focus_is_mutually_exclusive() {
    let service = service();
    let manager = service.sessions();
    let recorder = Arc::new(FocusRecorder(Mutex::new(Vec::new())));
    manager.add_focus_observer(recorder.clone());

    let ids: Vec<PersistentId> = ["One", "Two", "Three"]
        .iter()
        .map(|ability| {
            let mut info = SessionInfo::new("com.example", "entry", ability);
            let session = manager.gen_scene_session(&mut info).expect("session");
            session.connect(None).expect("connect");
            session.foreground().expect("foreground");
            session.persistent_id()
        })
        .collect();

    for id in [ids[0], ids[1], ids[2], ids[0], ids[2]] {
        manager
            .request_focus_status(id, true, false, FocusChangeReason::Click)
            .expect("focus");
        let focused: Vec<_> = ids
            .iter()
            .filter(|id| manager.get_scene_session(**id).is_some_and(|s| s.is_focused()))
            .collect();
        assert_eq!(focused, vec![&id]);
    }

    let mut holder: Option<PersistentId> = None;
    for event in recorder.0.lock().iter() {
        if event.focused {
            assert_eq!(holder, None, "granted while {holder:?} still focused");
            holder = Some(event.persistent_id);
        } else {
            assert_eq!(holder, Some(event.persistent_id));
            holder = None;
        }
    }
    assert_eq!(holder, Some(ids[2]));
    service.shutdown();
}

#[test]
fn starting_window_cache_is_bounded() {
    let mut cache = StartingWindowCache::new(DEFAULT_CACHE_CAPACITY);
    let key = |idx: usize| StartingWindowKey {
        bundle_name: format!("com.example.app{idx}"),
        module_name: "entry".into(),
        ability_name: "MainAbility".into(),
        dark_mode: false,
    };
    for idx in 0..=DEFAULT_CACHE_CAPACITY {
        cache.insert(&key(idx), StartingWindowInfo::new("icon.png", 0xffff_ffff));
    }
    assert_eq!(cache.len(), DEFAULT_CACHE_CAPACITY);
    assert!(cache.get(&key(0)).is_none());
    assert!(cache.get(&key(DEFAULT_CACHE_CAPACITY)).is_some());
}

#[test]
fn rotation_requests_are_idempotent() {
    let service = service();
    let mut info = SessionInfo::new("com.example.video", "entry", "MainAbility");
    let session = service
        .sessions()
        .gen_scene_session(&mut info)
        .expect("session");
    assert!(session.request_rotation(Rotation::Rotation270));
    assert!(!session.request_rotation(Rotation::Rotation270));
    service.shutdown();
}

#[test]
fn host_observes_lifecycle_in_order() {
    let service = service();
    service.connect_default_screen();
    service.scheduler().flush();
    let manager = service.sessions();

    let mut info = SessionInfo::new("com.example.notes", "entry", "MainAbility");
    let session = manager.gen_scene_session(&mut info).expect("session");
    let id = session.persistent_id();
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    session
        .register_callback(
            "sessionStateChange",
            Arc::new(move |event| {
                if let SessionEvent::StateChange(state) = event {
                    sink.lock().push(*state);
                }
            }),
        )
        .expect("register");

    manager
        .request_scene_session_activation(id, true)
        .expect("activate");
    manager
        .request_scene_session_background(id, BackgroundOptions::default())
        .expect("background");
    for _ in 0..6 {
        service.scheduler().flush();
    }

    assert_eq!(
        *states.lock(),
        vec![
            SessionState::Connect,
            SessionState::Foreground,
            SessionState::Active,
            SessionState::Inactive,
            SessionState::Background
        ]
    );
    assert_eq!(session.display_id(), manager.default_display_id());
    assert_ne!(session.display_id(), DisplayId::INVALID);
    service.shutdown();
}

#[test]
fn destroyed_display_moves_sessions_to_default() {
    let service = service();
    let builtin = service.connect_default_screen();
    let external = service
        .screens()
        .connect_screen("hdmi", ScreenType::Real, square(), 1.0);
    service.scheduler().flush();

    let external_display = service
        .displays()
        .get_display_by_screen(external)
        .expect("external display")
        .id;
    let mut info = SessionInfo::new("com.example.slides", "entry", "MainAbility");
    info.display_id = Some(external_display);
    let session = service
        .sessions()
        .gen_scene_session(&mut info)
        .expect("session");
    assert_eq!(session.display_id(), external_display);

    service.screens().disconnect_screen(external);
    service.scheduler().flush();

    let default_display = service
        .displays()
        .get_display_by_screen(builtin)
        .expect("builtin display")
        .id;
    assert_eq!(session.display_id(), default_display);
    service.shutdown();
}

fn assert_on_live_display(service: &WindowManagerService, display: DisplayId) {
    let live = service.displays().get_all_display_ids();
    assert!(
        live.contains(&display),
        "session left on {display:?}, live displays {live:?}"
    );
}

#[test]
fn expanding_the_default_screen_rehomes_sessions() {
    let service = service();
    let a = service
        .screens()
        .connect_screen("a", ScreenType::Real, square(), 1.0);
    let b = service
        .screens()
        .connect_screen("b", ScreenType::Real, square(), 1.0);
    service.scheduler().flush();

    let mut info = SessionInfo::new("com.example.docs", "entry", "MainAbility");
    let session = service
        .sessions()
        .gen_scene_session(&mut info)
        .expect("session");
    let before = session.display_id();
    assert_eq!(
        Some(before),
        service.displays().get_display_by_screen(a).map(|d| d.id)
    );

    service
        .screens()
        .make_expand(&[(a, Point::new(0, 0)), (b, Point::new(200, 0))])
        .expect("expand");
    service.scheduler().flush();

    assert_ne!(session.display_id(), before);
    assert_on_live_display(&service, session.display_id());
    assert_eq!(session.display_id(), service.sessions().default_display_id());
    service.shutdown();
}

#[test]
fn default_screen_churn_keeps_sessions_on_live_displays() {
    let service = service();
    let mut screen = service.connect_default_screen();
    service.scheduler().flush();

    let mut info = SessionInfo::new("com.example.music", "entry", "MainAbility");
    let session = service
        .sessions()
        .gen_scene_session(&mut info)
        .expect("session");
    assert_on_live_display(&service, session.display_id());

    let sizes = [(200, 200), (200, 200), (300, 200), (200, 200)];
    for (width, height) in sizes {
        service.screens().disconnect_screen(screen);
        service.scheduler().flush();
        assert_eq!(
            service.sessions().default_display_id(),
            DisplayId::INVALID
        );

        screen = service.screens().connect_screen(
            "builtin",
            ScreenType::Real,
            vec![SupportedMode::new(width, height, 60)],
            1.0,
        );
        service.scheduler().flush();
        assert_on_live_display(&service, session.display_id());
        assert_eq!(session.display_id(), service.sessions().default_display_id());
    }

    let mut late = SessionInfo::new("com.example.late", "entry", "MainAbility");
    let late = service
        .sessions()
        .gen_scene_session(&mut late)
        .expect("late session");
    assert_eq!(late.display_id(), session.display_id());
    service.shutdown();
}

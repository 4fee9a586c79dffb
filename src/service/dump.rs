use std::fmt::Write;

use super::WindowManagerService;
use crate::session::SceneSession;

pub const USAGE: &str = "usage: dump [-a | -w <persistent id> | -d | -s | -h]\n\
  -a   all sessions\n\
  -w   one session\n\
  -d   displays\n\
  -s   screens and groups\n\
  -h   this text\n";

pub(super) fn dump(service: &WindowManagerService, args: &[&str]) -> String {
    match args {
        ["-a"] => dump_all_sessions(service),
        ["-w", id] => match id.parse() {
            Ok(id) => match service.sessions().get_scene_session(id) {
                Some(session) => session_detail(&session),
                None => format!("no session {id}\n"),
            },
            Err(_) => USAGE.to_string(),
        },
        ["-d"] => dump_displays(service),
        ["-s"] => dump_screens(service),
        _ => USAGE.to_string(),
    }
}

fn dump_all_sessions(service: &WindowManagerService) -> String {
    let manager = service.sessions();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "focused: {}  default display: {}",
        manager.focused_session_id(),
        manager.default_display_id()
    );
    let _ = writeln!(
        out,
        "{:<6} {:<28} {:<20} {:<11} {:>4} {:<8} rect",
        "id", "bundle", "ability", "state", "z", "display"
    );
    for session in manager.registry().snapshot() {
        let info = session.session_info();
        let _ = writeln!(
            out,
            "{:<6} {:<28} {:<20} {:<11} {:>4} {:<8} {}",
            session.persistent_id(),
            info.bundle_name,
            info.ability_name,
            session.state(),
            session.z_order(),
            session.display_id(),
            session.rect()
        );
    }
    out
}

fn session_detail(session: &SceneSession) -> String {
    let info = session.session_info();
    let mut out = String::new();
    let _ = writeln!(out, "persistent id: {}", session.persistent_id());
    let _ = writeln!(
        out,
        "identity: {}/{}/{} #{}",
        info.bundle_name, info.module_name, info.ability_name, info.app_index
    );
    let _ = writeln!(out, "window type: {:?}", info.window_type);
    let _ = writeln!(out, "caller: {}", info.caller_persistent_id);
    let _ = writeln!(out, "state: {}", session.state());
    let _ = writeln!(out, "rect: {}", session.rect());
    let _ = writeln!(out, "display: {}", session.display_id());
    let _ = writeln!(out, "z order: {}", session.z_order());
    let _ = writeln!(out, "rotation: {}", session.rotation());
    let _ = writeln!(out, "flags: {:?}", session.flags());
    let _ = writeln!(out, "focused: {}", session.is_focused());
    let pending = session.lifecycle().pending();
    let _ = writeln!(out, "lifecycle tasks: {}", pending.len());
    for task in pending {
        let _ = writeln!(
            out,
            "  {} {:?}{}",
            task.name,
            task.kind,
            if task.running { " (running)" } else { "" }
        );
    }
    if let Some(pip) = session.pip_template_info() {
        let _ = writeln!(out, "pip: {:?} priority {}", pip.template_type, pip.priority);
    }
    out
}

fn dump_displays(service: &WindowManagerService) -> String {
    let mut out = String::new();
    let default = service.displays().get_default_display_id();
    for info in service.displays().get_all_display_info() {
        let _ = writeln!(
            out,
            "display {}{} screen {} {} {}Hz vpr {} rotation {} {:?}{}",
            info.id,
            if info.id == default { " (default)" } else { "" },
            info.screen_id,
            info.rect(),
            info.refresh_rate,
            info.virtual_pixel_ratio,
            info.rotation,
            info.freeze_flag,
            if info.waterfall_compressed { " compressed" } else { "" }
        );
    }
    if out.is_empty() {
        out.push_str("no displays\n");
    }
    out
}

fn dump_screens(service: &WindowManagerService) -> String {
    let mut out = String::new();
    for screen in service.screens().all_screens() {
        let group = screen
            .group_id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        let _ = writeln!(
            out,
            "screen {} {:?} \"{}\" group {} mode {:?} rotation {}",
            screen.id,
            screen.screen_type,
            screen.name,
            group,
            screen.active_mode(),
            screen.rotation
        );
    }
    for group in service.screens().all_groups() {
        let _ = writeln!(
            out,
            "group {} {:?} members {:?}",
            group.id,
            group.combination,
            group.child_ids()
        );
    }
    if out.is_empty() {
        out.push_str("no screens\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::host::HeadlessRenderHost;
    use crate::service::ServiceCollaborators;
    use crate::session::SessionInfo;

    fn service() -> WindowManagerService {
        WindowManagerService::new(
            Config::default(),
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
    fn unknown_arguments_print_usage() {
        let service = service();
        assert_eq!(service.dump(&[]), USAGE);
        assert_eq!(service.dump(&["-x"]), USAGE);
        assert_eq!(service.dump(&["-w", "abc"]), USAGE);
        assert_eq!(service.dump(&["-h"]), USAGE);
    }

    #[test]
    fn sessions_and_displays_are_listed() {
        let service = service();
        service.connect_default_screen();
        let mut info = SessionInfo::new("com.example.notes", "entry", "MainAbility");
        let session = service
            .sessions()
            .gen_scene_session(&mut info)
            .expect("session");

        let all = service.dump(&["-a"]);
        assert!(all.contains("com.example.notes"));
        let one = service.dump(&["-w", &session.persistent_id().to_string()]);
        assert!(one.contains("state: disconnect"));
        assert!(service.dump(&["-w", "999"]).contains("no session 999"));
        assert!(service.dump(&["-d"]).contains("(default)"));
        assert!(service.dump(&["-s"]).contains("builtin"));
    }
}

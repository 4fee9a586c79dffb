use std::sync::Arc;

use scene_wm::config::Config;
use scene_wm::host::HeadlessRenderHost;
use scene_wm::manager::MemoryStartingWindowRdb;
use scene_wm::{ServiceCollaborators, WindowManagerService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();

    if let Ok(env_filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(config.log_filter.as_str())
            .compact()
            .init();
    }

    #[cfg(feature = "profile-with-tracy")]
    profiling::tracy_client::Client::start();

    profiling::register_thread!("Main Thread");

    let service = WindowManagerService::new(
        config,
        ServiceCollaborators {
            render_host: Arc::new(HeadlessRenderHost),
            broker: None,
            starting_window_rdb: Some(Arc::new(MemoryStartingWindowRdb::default())),
            starting_window_resource: None,
        },
    )?;

    let screen = service.connect_default_screen();
    tracing::info!(screen = %screen, "window manager service running");

    let dump_args: Vec<String> = std::env::args().skip(1).collect();
    if !dump_args.is_empty() {
        service.scheduler().flush();
        let args: Vec<&str> = dump_args.iter().map(String::as_str).collect();
        print!("{}", service.dump(&args));
        service.shutdown();
        return Ok(());
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    service.shutdown();
    Ok(())
}

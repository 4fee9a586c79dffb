pub mod config;
pub mod display;
pub mod error;
pub mod host;
pub mod manager;
pub mod persistence;
pub mod screen;
pub mod service;
pub mod session;
pub mod task;
pub mod types;
pub mod utils;

pub use error::{WsError, WsErrorCode, WsResult};
pub use service::{ServiceCollaborators, WindowManagerService};

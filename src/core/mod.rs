pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod event_log;
pub mod quality;
pub mod types;

pub use app_state::AppState;

pub mod advanced;
pub mod api;
pub mod core;
pub mod engines;
pub mod escalation;
pub mod pool;
pub mod profiles;
pub mod render;

// --- Primary core exports ---
pub use crate::core::config::{ServiceConfig, ServicePaths, SharedConfig};
pub use crate::core::error::FetchError;
pub use crate::core::types;
pub use crate::core::types::*;
pub use crate::core::AppState;

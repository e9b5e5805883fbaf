pub mod config;

pub use config::{resolve_current_user, Settings};

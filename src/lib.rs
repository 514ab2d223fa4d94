pub mod api;
pub mod audio;
pub mod capabilities;
pub mod config;
pub mod engine;
pub mod events;
pub mod executor;
pub mod page;
pub mod plugin;
pub mod registry;
pub mod sandbox;
pub mod sanitizer;
pub mod state;
pub mod watchdog;
pub mod watcher;

pub use config::SandboxConfig;
pub use executor::{ErrorState, Outcome};
pub use plugin::{RitualPlugin, RitualRequest};
pub use sandbox::Sandbox;

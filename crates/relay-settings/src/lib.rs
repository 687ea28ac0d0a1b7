//! # relay-settings
//!
//! Configuration for the relay service with layered sources:
//! compiled defaults ← `~/.relay/settings.json` deep merge ← `RELAY_*`
//! environment variable overrides.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path};
pub use types::{DeliverySettings, RelaySettings, ServerSettings};

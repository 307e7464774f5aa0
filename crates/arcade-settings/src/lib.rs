//! # arcade-settings
//!
//! Configuration with layered sources for the Arcade orchestrator.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ArcadeSettings::default()`]
//! 2. **User file**: `~/.arcade/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `ARCADE_*` overrides (highest priority)
//!
//! There is no global settings singleton: the host loads settings once and
//! hands them to the orchestrator it constructs.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

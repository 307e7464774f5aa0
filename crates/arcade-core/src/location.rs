//! Positions inside a host environment.

use serde::{Deserialize, Serialize};

use crate::ids::EnvironmentKey;

/// A point inside one environment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Environment the point belongs to.
    pub environment: EnvironmentKey,
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Z coordinate.
    pub z: f64,
}

impl Location {
    /// Create a location.
    pub fn new(environment: impl Into<EnvironmentKey>, x: f64, y: f64, z: f64) -> Self {
        Self {
            environment: environment.into(),
            x,
            y,
            z,
        }
    }

    /// Snap x and z to the centre of their unit cell. Y is left alone so the
    /// occupant keeps standing on the same surface.
    #[must_use]
    pub fn cell_centered(mut self) -> Self {
        self.x = self.x.floor() + 0.5;
        self.z = self.z.floor() + 0.5;
        self
    }

    /// Same coordinates in another environment.
    #[must_use]
    pub fn in_environment(mut self, environment: EnvironmentKey) -> Self {
        self.environment = environment;
        self
    }
}

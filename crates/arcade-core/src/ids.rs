//! Branded ID newtypes for type safety.
//!
//! Names handed in by callers (session names, occupant IDs, environment keys)
//! are newtype wrappers around `String` so a session name can never be passed
//! where an environment key is expected. [`InstanceId`] is the small integer
//! slot number handed out by the identifier allocator; [`RunId`] is a UUID v7
//! minted once per instance incarnation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Caller-chosen name of a session; unique among live and creating instances.
    SessionName
}

branded_id! {
    /// Host-assigned identifier of an occupant.
    OccupantId
}

branded_id! {
    /// Host-level identifier of a mounted environment (e.g. `instance-3`).
    EnvironmentKey
}

branded_id! {
    /// Identifier of one instance incarnation, used to correlate logs.
    RunId
}

impl RunId {
    /// Create a new random run ID (UUID v7, time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

/// Slot number of a live instance.
///
/// Always the smallest non-negative integer not held by another live
/// instance, so mount points and environment keys stay short and are reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(u32);

impl InstanceId {
    /// Wrap a raw slot number.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw slot number.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Environment key for this slot under the given prefix (`<prefix><id>`).
    #[must_use]
    pub fn environment_key(self, prefix: &str) -> EnvironmentKey {
        EnvironmentKey(format!("{prefix}{}", self.0))
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for InstanceId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

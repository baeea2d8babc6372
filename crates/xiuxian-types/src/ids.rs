//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Every entity in the simulation has a strongly-typed ID to prevent
//! accidental mixing of identifiers at compile time. All IDs use UUID v7
//! (time-ordered) and render as opaque strings in the save file, the
//! event log, and the API surface.
//!
//! A mortal who awakens into an avatar keeps the same underlying UUID:
//! [`AvatarId::from`] accepts the raw [`Uuid`] carried over from the
//! [`MortalId`].

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }

            /// Parse an identifier from its string form.
            ///
            /// # Errors
            ///
            /// Returns the underlying [`uuid::Error`] if the string is not
            /// a valid UUID.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for an avatar (a cultivator NPC).
    AvatarId
}

define_id! {
    /// Unique identifier for a mortal (a non-cultivator person).
    MortalId
}

define_id! {
    /// Unique identifier for a named region on the map.
    RegionId
}

define_id! {
    /// Unique identifier for a sect.
    SectId
}

define_id! {
    /// Unique identifier for an event in the event log.
    EventId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let avatar = AvatarId::new();
        let region = RegionId::new();
        // These are different types -- the compiler enforces no mixing.
        assert_ne!(avatar.into_inner(), Uuid::nil());
        assert_ne!(region.into_inner(), Uuid::nil());
    }

    #[test]
    fn id_roundtrip_serde() {
        let original = AvatarId::new();
        let json = serde_json::to_string(&original).ok();
        assert!(json.is_some());
        let restored: Result<AvatarId, _> =
            serde_json::from_str(json.as_deref().unwrap_or(""));
        assert!(restored.is_ok());
    }

    #[test]
    fn awakening_preserves_the_uuid() {
        let mortal = MortalId::new();
        let avatar = AvatarId::from(mortal.into_inner());
        assert_eq!(mortal.into_inner(), avatar.into_inner());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(AvatarId::parse("not-a-uuid").is_err());
        let id = AvatarId::new();
        assert_eq!(AvatarId::parse(&id.to_string()).ok(), Some(id));
    }
}

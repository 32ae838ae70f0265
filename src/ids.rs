use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque string identifiers. Every entity is referenced by one of these;
/// the wrapped value is stable and never reinterpreted.
macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn generate() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(UserId, "usr");
string_id!(
    /// Subject identifier assigned by the external identity provider.
    ExternalAuthId,
    "sub"
);
string_id!(EntryId, "ent");
string_id!(GameId, "game");
string_id!(ContractId, "ctr");
string_id!(SessionId, "sess");
string_id!(LobbyId, "lob");
string_id!(SubscriberId, "subr");

impl UserId {
    /// Reserved account the platform fee ledger entries are booked against.
    pub fn platform() -> Self {
        Self("usr_platform".to_owned())
    }
}

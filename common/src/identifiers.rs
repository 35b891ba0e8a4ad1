//! Identifier types for NyumbaPay entities.
//!
//! Every entity identity is a tagged string, distinguishable by type at the
//! interface boundary. Entity ids are generated as `<tag>_<uuid-v7-simple>`
//! (time-ordered); scope ids are caller-supplied handles with a validated
//! format. Using one id kind where another is expected is a compile error.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Error produced when parsing an identifier from its string form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} identifier: {value}")]
pub struct IdParseError {
    pub kind: &'static str,
    pub value: String,
}

fn is_valid_scope_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 64
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Declares a generated entity identifier: `<tag>_<uuid-v7-simple>`.
macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident, $tag:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Tag prefixed to every id of this kind.
            pub const TAG: &'static str = $tag;

            /// Generate a fresh, time-ordered id.
            pub fn new() -> Self {
                Self(format!("{}_{}", $tag, Uuid::now_v7().simple()))
            }

            /// Parse from string, validating the tag and body.
            pub fn parse(s: &str) -> Result<Self, IdParseError> {
                let body = s
                    .strip_prefix(concat!($tag, "_"))
                    .filter(|body| {
                        !body.is_empty()
                            && body.chars().all(|c| c.is_ascii_alphanumeric())
                    });
                match body {
                    Some(_) => Ok(Self(s.to_string())),
                    None => Err(IdParseError {
                        kind: stringify!($name),
                        value: s.to_string(),
                    }),
                }
            }

            /// Get the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Declares a caller-supplied scope identifier (alphanumeric, `_`, `-`,
/// at most 64 characters).
macro_rules! scope_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new id, accepting the value as given.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Parse from string, validating the format.
            pub fn parse(s: &str) -> Result<Self, IdParseError> {
                if is_valid_scope_id(s) {
                    Ok(Self(s.to_string()))
                } else {
                    Err(IdParseError {
                        kind: stringify!($name),
                        value: s.to_string(),
                    })
                }
            }

            /// Validate the id format.
            pub fn is_valid(&self) -> bool {
                is_valid_scope_id(&self.0)
            }

            /// Get the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

entity_id!(
    /// Unique identifier for a payment intent.
    PaymentIntentId,
    "pi"
);
entity_id!(
    /// Unique identifier for a single ledger entry.
    LedgerEntryId,
    "ent"
);
entity_id!(
    /// Unique identifier for a balanced journal posting.
    JournalId,
    "jrn"
);
entity_id!(
    /// Unique identifier for a ledger account.
    AccountId,
    "acc"
);
entity_id!(
    /// Unique identifier for a generated statement.
    StatementId,
    "stm"
);
entity_id!(
    /// Unique identifier for an owner disbursement.
    DisbursementId,
    "dsb"
);

scope_id!(
    /// Identifier of the tenant (property-management company) that owns a
    /// record. Every repository query is scoped by tenant.
    TenantId
);
scope_id!(
    /// Identifier of a paying customer (resident).
    CustomerId
);
scope_id!(
    /// Identifier of a property owner receiving disbursements.
    OwnerId
);
scope_id!(
    /// Identifier of a property.
    PropertyId
);
scope_id!(
    /// Identifier of a unit within a property.
    UnitId
);
scope_id!(
    /// Identifier of a lease agreement.
    LeaseId
);

//! The signed-in owner.

use serde::{Deserialize, Serialize};

/// Identity supplied by the identity provider on sign-in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Unique email-like key; also the owner document's key.
    pub email: String,
    /// Avatar URL.
    #[serde(default, rename = "photoURL")]
    pub photo_url: String,
    /// Provider-assigned user id.
    #[serde(default)]
    pub uid: String,
}

impl Identity {
    /// Create an identity with just the required key.
    #[must_use]
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            ..Self::default()
        }
    }
}

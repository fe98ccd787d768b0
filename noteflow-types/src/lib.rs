//! Shared types for noteflow
//!
//! This crate provides the plain identifiers and wire records used across
//! the noteflow crates: note and user identity, sharing permissions and the
//! study artifacts returned by the AI endpoints.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Note identifier. Empty until the note is first saved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(pub String);

impl NoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the note has been assigned a remote identifier yet.
    pub fn is_assigned(&self) -> bool {
        !self.0.is_empty()
    }
}

impl std::fmt::Display for NoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The signed-in user as reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: String,
    pub display_name: String,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Access level granted on a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionLevel {
    View,
    Edit,
}

/// Key of the global level in the flat wire form. No user may be granted
/// access under this id.
pub const GLOBAL_PERMISSION_KEY: &str = "global";

/// Sharing state of a note: a global level plus per-user grants.
///
/// Serialized flat, the way the document store keeps it:
/// `{"global": "view", "<userId>": "edit", ...}`. Because the grants share
/// a namespace with `global`, a user whose id is literally `global` cannot
/// hold a per-user grant; [`Permissions::grant`] refuses it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub global: Option<PermissionLevel>,
    #[serde(flatten)]
    pub users: HashMap<String, PermissionLevel>,
}

impl Permissions {
    /// Grant (or replace) a per-user level. Returns `false` without
    /// changing anything for the reserved `global` id.
    pub fn grant(&mut self, user_id: impl Into<String>, level: PermissionLevel) -> bool {
        let user_id = user_id.into();
        if user_id == GLOBAL_PERMISSION_KEY {
            return false;
        }
        self.users.insert(user_id, level);
        true
    }

    pub fn revoke(&mut self, user_id: &str) {
        self.users.remove(user_id);
    }

    /// Level granted to `user_id` specifically, ignoring the global level.
    pub fn level_for(&self, user_id: &str) -> Option<PermissionLevel> {
        self.users.get(user_id).copied()
    }

    /// Whether a non-owner may edit.
    pub fn allows_edit(&self, user_id: &str) -> bool {
        self.level_for(user_id) == Some(PermissionLevel::Edit)
            || self.global == Some(PermissionLevel::Edit)
    }

    /// Whether a non-owner may at least view.
    pub fn allows_view(&self, user_id: &str) -> bool {
        self.allows_edit(user_id)
            || self.level_for(user_id) == Some(PermissionLevel::View)
            || self.global == Some(PermissionLevel::View)
    }
}

/// A term/definition pair produced by the flashcard endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashCard {
    pub term: String,
    pub definition: String,
}

/// Note metadata as exchanged with the REST backend, without content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteSummary {
    pub id: NoteId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub owner: String,
    #[serde(default)]
    pub permissions: Permissions,
}

//! The note aggregate: metadata, permissions and ordered content blocks.
//!
//! Every mutation emits a [`NoteEvent`] on the note's broadcast channel so
//! views can refresh without the note knowing about them.

use std::collections::HashMap;

use noteflow_types::{NoteId, NoteSummary, Permissions, UserIdentity};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::blocks::{new_block_id, ContentBlock, MediaBlock, ScribbleBlock, TextBlock};
use crate::cursor::CursorAnnotation;
use crate::delta::OpSequence;

pub const UNNAMED_NOTE: &str = "Unnamed Note";

/// Whether `user_id` may edit a document with this owner and grant table.
/// Shared by the note aggregate and the document store.
pub fn can_edit(owner: &str, permissions: &Permissions, user_id: &str) -> bool {
    owner == user_id || permissions.allows_edit(user_id)
}

/// Read counterpart of [`can_edit`].
pub fn can_view(owner: &str, permissions: &Permissions, user_id: &str) -> bool {
    owner == user_id || permissions.allows_view(user_id)
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NoteError {
    #[error("user {user} may not edit note {note}")]
    PermissionDenied { user: String, note: NoteId },

    #[error("no block with id {0}")]
    UnknownBlock(String),
}

/// Change notifications published by a [`Note`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteEvent {
    /// Metadata or content changed locally.
    Changed,
    /// The note was persisted by the backend.
    Saved,
    /// A realtime session started for the note.
    RealtimeStarted,
}

/// Serialized form of a note, as stored remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNote {
    #[serde(default)]
    pub id: NoteId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    pub owner: String,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub cursors: HashMap<String, CursorAnnotation>,
}

#[derive(Debug)]
pub struct Note {
    pub id: NoteId,
    pub title: String,
    pub description: String,
    pub owner: String,
    pub permissions: Permissions,
    pub content: Vec<ContentBlock>,
    pub cursors: HashMap<String, CursorAnnotation>,
    events: broadcast::Sender<NoteEvent>,
}

impl Note {
    /// A fresh, unsaved note owned by `owner` with one empty text block.
    pub fn new(owner: &UserIdentity) -> Self {
        Self::from_serialized(SerializedNote {
            id: NoteId::default(),
            title: UNNAMED_NOTE.to_string(),
            description: String::new(),
            content: vec![ContentBlock::Text(TextBlock::new(
                new_block_id(),
                OpSequence::new(),
            ))],
            owner: owner.id.clone(),
            permissions: Permissions::default(),
            cursors: HashMap::new(),
        })
    }

    pub fn from_serialized(note: SerializedNote) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            id: note.id,
            title: note.title,
            description: note.description,
            owner: note.owner,
            permissions: note.permissions,
            content: note.content,
            cursors: note.cursors,
            events,
        }
    }

    pub fn serialize(&self) -> SerializedNote {
        SerializedNote {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            content: self.content.clone(),
            owner: self.owner.clone(),
            permissions: self.permissions.clone(),
            cursors: self.cursors.clone(),
        }
    }

    pub fn summary(&self) -> NoteSummary {
        NoteSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            owner: self.owner.clone(),
            permissions: self.permissions.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NoteEvent> {
        self.events.subscribe()
    }

    pub fn emit(&self, event: NoteEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    // -------------------------------------------------------------------------
    // Authorization
    // -------------------------------------------------------------------------

    pub fn can_edit(&self, user_id: &str) -> bool {
        can_edit(&self.owner, &self.permissions, user_id)
    }

    pub fn can_view(&self, user_id: &str) -> bool {
        can_view(&self.owner, &self.permissions, user_id)
    }

    pub fn authorize_edit(&self, user_id: &str) -> Result<(), NoteError> {
        if self.can_edit(user_id) {
            Ok(())
        } else {
            Err(NoteError::PermissionDenied {
                user: user_id.to_string(),
                note: self.id.clone(),
            })
        }
    }

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------

    pub fn is_saved(&self) -> bool {
        self.id.is_assigned()
    }

    /// Record the identifier assigned by the backend on first save.
    pub fn mark_saved(&mut self, id: NoteId) {
        self.id = id;
        self.emit(NoteEvent::Saved);
    }

    pub fn set_title(&mut self, title: &str) {
        self.title = if title.is_empty() {
            UNNAMED_NOTE.to_string()
        } else {
            title.to_string()
        };
        self.emit(NoteEvent::Changed);
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
        self.emit(NoteEvent::Changed);
    }

    // -------------------------------------------------------------------------
    // Content
    // -------------------------------------------------------------------------

    /// Add a plain text block at the start or the end of the note.
    pub fn add_text_block(&mut self, at_start: bool, value: &str) -> &ContentBlock {
        let mut delta = OpSequence::new();
        delta.push(crate::delta::Operation::text(value));
        let block = ContentBlock::Text(TextBlock::new(new_block_id(), delta));
        let index = if at_start {
            self.content.insert(0, block);
            0
        } else {
            self.content.push(block);
            self.content.len() - 1
        };
        self.emit(NoteEvent::Changed);
        &self.content[index]
    }

    /// Add an empty text block right after `block_id`, or at the end when the
    /// block is unknown.
    pub fn add_text_block_after(&mut self, block_id: &str) -> &ContentBlock {
        let Some(index) = self.block_index(block_id) else {
            return self.add_text_block(false, "");
        };
        let block = ContentBlock::Text(TextBlock::new(new_block_id(), OpSequence::new()));
        self.content.insert(index + 1, block);
        self.emit(NoteEvent::Changed);
        &self.content[index + 1]
    }

    pub fn add_scribble_block(&mut self) -> &ContentBlock {
        self.content.push(ContentBlock::Scribble(ScribbleBlock {
            id: new_block_id(),
            position: None,
            value: String::new(),
            width: 0.0,
            height: 0.0,
            strokes: Vec::new(),
        }));
        self.emit(NoteEvent::Changed);
        &self.content[self.content.len() - 1]
    }

    pub fn add_media_block(
        &mut self,
        content_url: impl Into<String>,
        content_type: impl Into<String>,
        width: f64,
        height: f64,
    ) -> &ContentBlock {
        self.content.push(ContentBlock::Media(MediaBlock {
            id: new_block_id(),
            position: None,
            value: String::new(),
            content_type: content_type.into(),
            content_url: content_url.into(),
            width,
            height,
        }));
        self.emit(NoteEvent::Changed);
        &self.content[self.content.len() - 1]
    }

    pub fn delete_block(&mut self, block_id: &str) -> Result<ContentBlock, NoteError> {
        let index = self
            .block_index(block_id)
            .ok_or_else(|| NoteError::UnknownBlock(block_id.to_string()))?;
        let removed = self.content.remove(index);
        self.emit(NoteEvent::Changed);
        Ok(removed)
    }

    fn block_index(&self, block_id: &str) -> Option<usize> {
        self.content.iter().position(|b| b.id() == block_id)
    }

    /// Plain text of the blocks flowing in reading order, one per line.
    pub fn plain_text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.position().is_none())
            .map(ContentBlock::value)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The editor content carried by the note.
    pub fn text_content(&self) -> OpSequence {
        crate::blocks::from_blocks(&self.content)
    }

    /// Replace the editor content, keeping the first text block's id and
    /// every other block in place.
    pub fn set_text_content(&mut self, content: OpSequence) {
        match self.content.iter_mut().find_map(ContentBlock::as_text_mut) {
            Some(block) => block.set_delta(content),
            None => self
                .content
                .insert(0, ContentBlock::Text(TextBlock::new(new_block_id(), content))),
        }
        self.emit(NoteEvent::Changed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::Operation;
    use noteflow_types::PermissionLevel;

    fn owner() -> UserIdentity {
        UserIdentity::new("owner", "Owner")
    }

    #[test]
    fn test_new_note_defaults() {
        let note = Note::new(&owner());
        assert!(!note.is_saved());
        assert_eq!(note.title, UNNAMED_NOTE);
        assert_eq!(note.content.len(), 1);
        assert!(note.text_content().is_empty());
        assert!(note.permissions.global.is_none());
    }

    #[test]
    fn test_can_edit() {
        let mut note = Note::new(&owner());
        assert!(note.can_edit("owner"));
        assert!(!note.can_edit("guest"));
        assert!(!note.can_view("guest"));

        note.permissions.grant("guest", PermissionLevel::View);
        assert!(note.can_view("guest"));
        assert!(!note.can_edit("guest"));
        assert!(matches!(
            note.authorize_edit("guest"),
            Err(NoteError::PermissionDenied { .. })
        ));

        note.permissions.grant("guest", PermissionLevel::Edit);
        assert!(note.authorize_edit("guest").is_ok());

        note.permissions.revoke("guest");
        note.permissions.global = Some(PermissionLevel::Edit);
        assert!(note.can_edit("anyone"));
    }

    #[test]
    fn test_title_falls_back() {
        let mut note = Note::new(&owner());
        let mut events = note.subscribe();
        note.set_title("Lecture 3");
        assert_eq!(note.title, "Lecture 3");
        note.set_title("");
        assert_eq!(note.title, UNNAMED_NOTE);
        assert_eq!(events.try_recv().unwrap(), NoteEvent::Changed);
    }

    #[test]
    fn test_block_editing() {
        let mut note = Note::new(&owner());
        let first_id = note.content[0].id().to_string();

        note.add_text_block(true, "intro");
        let after_id = note.add_text_block_after(&first_id).id().to_string();
        note.add_media_block("https://example.com/a.png", "image/png", 10.0, 20.0);
        note.add_scribble_block();

        let ids: Vec<_> = note.content.iter().map(|b| b.id().to_string()).collect();
        assert_eq!(ids[1], first_id);
        assert_eq!(ids[2], after_id);
        assert_eq!(note.content.len(), 5);
        assert_eq!(note.content[0].value(), "intro");

        note.delete_block(&after_id).unwrap();
        assert_eq!(note.content.len(), 4);
        assert_eq!(
            note.delete_block("missing"),
            Err(NoteError::UnknownBlock("missing".into()))
        );
    }

    #[test]
    fn test_add_after_unknown_appends() {
        let mut note = Note::new(&owner());
        let id = note.add_text_block_after("nope").id().to_string();
        assert_eq!(note.content.last().map(|b| b.id()), Some(id.as_str()));
    }

    #[test]
    fn test_plain_text_skips_positioned_blocks() {
        let mut note = Note::new(&owner());
        note.set_text_content(OpSequence::from_ops([Operation::text("line one")]));
        note.add_text_block(false, "line two");
        if let Some(text) = note.content[1].as_text_mut() {
            text.position = Some(crate::blocks::Position {
                x: 0.0,
                y: 0.0,
                z_index: 1,
            });
        }
        note.add_text_block(false, "line three");
        assert_eq!(note.plain_text(), "line one\nline three");
    }

    #[test]
    fn test_set_text_content_keeps_block_id() {
        let mut note = Note::new(&owner());
        let id = note.content[0].id().to_string();
        note.set_text_content(OpSequence::from_ops([Operation::text("hello")]));
        assert_eq!(note.content[0].id(), id);
        assert_eq!(note.content[0].value(), "hello");
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut note = Note::new(&owner());
        note.set_text_content(OpSequence::from_ops([Operation::text("body")]));
        note.mark_saved(NoteId::new("n1"));

        let json = serde_json::to_value(note.serialize()).unwrap();
        let back: SerializedNote = serde_json::from_value(json).unwrap();
        let restored = Note::from_serialized(back);
        assert_eq!(restored.id, NoteId::new("n1"));
        assert_eq!(restored.text_content(), note.text_content());
        assert_eq!(restored.summary().owner, "owner");
    }
}

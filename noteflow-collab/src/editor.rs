//! Editor widget seam.
//!
//! The sync session talks to the rich-text widget only through
//! [`EditorWidget`]. [`HeadlessEditor`] is an in-process implementation used
//! by tests and by tools that drive a session without a UI.

use std::collections::BTreeMap;

use noteflow_core::delta::Attributes;
use noteflow_core::{CursorMarker, CursorOverlay, EditPatch, OpSequence, PatchError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

/// Whether a programmatic change should be reported as an editor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    Normal,
    /// Apply without emitting any change or selection event.
    Silent,
}

/// Who caused an editor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    User,
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub index: usize,
    pub length: usize,
}

impl Selection {
    pub fn caret(index: usize) -> Self {
        Self { index, length: 0 }
    }

    fn clamped(self, len: usize) -> Self {
        let index = self.index.min(len);
        Self {
            index,
            length: self.length.min(len - index),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditorEvent {
    ContentChanged {
        source: ChangeSource,
    },
    /// `selection` is `None` when the editor lost focus.
    SelectionChanged {
        selection: Option<Selection>,
        source: ChangeSource,
    },
}

impl EditorEvent {
    pub fn source(&self) -> ChangeSource {
        match self {
            EditorEvent::ContentChanged { source } => *source,
            EditorEvent::SelectionChanged { source, .. } => *source,
        }
    }

    pub fn is_user(&self) -> bool {
        self.source() == ChangeSource::User
    }
}

/// The rich-text widget as seen by the sync session.
pub trait EditorWidget: CursorOverlay + Send + Sync {
    fn get_content(&self) -> OpSequence;

    /// Replace the whole document.
    fn set_content(&self, content: OpSequence, mode: ApplyMode);

    /// Apply a patch in place. The default falls back to a full replacement
    /// of the patched content.
    fn apply_patch(&self, patch: &EditPatch, mode: ApplyMode) -> Result<(), PatchError> {
        let next = patch.apply(&self.get_content())?;
        self.set_content(next, mode);
        Ok(())
    }

    fn get_selection(&self) -> Option<Selection>;

    fn set_selection(&self, selection: Selection, mode: ApplyMode);

    fn scroll_offset(&self) -> f64;

    fn set_scroll_offset(&self, offset: f64);

    /// Subscribe to change and selection events.
    fn events(&self) -> broadcast::Receiver<EditorEvent>;
}

/// How the content got into a [`HeadlessEditor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditorStats {
    pub full_loads: usize,
    pub patches: usize,
}

#[derive(Default)]
struct EditorState {
    content: OpSequence,
    selection: Option<Selection>,
    scroll: f64,
    markers: BTreeMap<String, CursorMarker>,
    stats: EditorStats,
}

pub struct HeadlessEditor {
    state: Mutex<EditorState>,
    events: broadcast::Sender<EditorEvent>,
}

impl Default for HeadlessEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessEditor {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(EditorState::default()),
            events,
        }
    }

    pub fn with_content(content: OpSequence) -> Self {
        let editor = Self::new();
        editor.state.lock().content = content;
        editor
    }

    fn emit(&self, event: EditorEvent) {
        let _ = self.events.send(event);
    }

    fn user_edit(&self, edit: impl FnOnce(&OpSequence) -> (OpSequence, usize)) {
        let caret = {
            let mut state = self.state.lock();
            let (next, caret) = edit(&state.content);
            state.content = next;
            let selection = Selection::caret(caret);
            state.selection = Some(selection);
            selection
        };
        self.emit(EditorEvent::ContentChanged {
            source: ChangeSource::User,
        });
        self.emit(EditorEvent::SelectionChanged {
            selection: Some(caret),
            source: ChangeSource::User,
        });
    }

    /// Type `text` at `at`, as a user would.
    pub fn type_text(&self, at: usize, text: &str) {
        self.type_formatted(at, text, None);
    }

    pub fn type_formatted(&self, at: usize, text: &str, attributes: Option<Attributes>) {
        let typed = text.chars().count();
        self.user_edit(|content| {
            let at = at.min(content.len());
            (content.insert_text(at, text, attributes), at + typed)
        });
    }

    pub fn delete_text(&self, at: usize, len: usize) {
        self.user_edit(|content| {
            let at = at.min(content.len());
            (content.delete(at, len), at)
        });
    }

    pub fn insert_embed(&self, at: usize, embed: Map<String, Value>) {
        self.user_edit(|content| {
            let at = at.min(content.len());
            (content.insert_embed(at, embed), at + 1)
        });
    }

    /// Move the selection, as a user would. `None` blurs the editor.
    pub fn select(&self, selection: Option<Selection>) {
        let selection = {
            let mut state = self.state.lock();
            let len = state.content.len();
            state.selection = selection.map(|s| s.clamped(len));
            state.selection
        };
        self.emit(EditorEvent::SelectionChanged {
            selection,
            source: ChangeSource::User,
        });
    }

    pub fn scroll_to(&self, offset: f64) {
        self.state.lock().scroll = offset;
    }

    pub fn stats(&self) -> EditorStats {
        self.state.lock().stats
    }

    /// Remote cursor markers currently drawn, ordered by owner.
    pub fn markers(&self) -> Vec<CursorMarker> {
        self.state.lock().markers.values().cloned().collect()
    }

    pub fn plain_text(&self) -> String {
        self.state.lock().content.plain_text()
    }
}

impl CursorOverlay for HeadlessEditor {
    fn draw(&self, marker: &CursorMarker) {
        self.state
            .lock()
            .markers
            .insert(marker.owner_id.clone(), marker.clone());
    }

    fn erase(&self, owner_id: &str) {
        self.state.lock().markers.remove(owner_id);
    }
}

impl EditorWidget for HeadlessEditor {
    fn get_content(&self) -> OpSequence {
        self.state.lock().content.clone()
    }

    fn set_content(&self, content: OpSequence, mode: ApplyMode) {
        {
            let mut state = self.state.lock();
            let len = content.len();
            state.content = content;
            state.selection = state.selection.map(|s| s.clamped(len));
            state.stats.full_loads += 1;
        }
        if mode == ApplyMode::Normal {
            self.emit(EditorEvent::ContentChanged {
                source: ChangeSource::Api,
            });
        }
    }

    fn apply_patch(&self, patch: &EditPatch, mode: ApplyMode) -> Result<(), PatchError> {
        {
            let mut state = self.state.lock();
            let next = patch.apply(&state.content)?;
            let len = next.len();
            state.content = next;
            state.selection = state.selection.map(|s| s.clamped(len));
            state.stats.patches += 1;
        }
        if mode == ApplyMode::Normal {
            self.emit(EditorEvent::ContentChanged {
                source: ChangeSource::Api,
            });
        }
        Ok(())
    }

    fn get_selection(&self) -> Option<Selection> {
        self.state.lock().selection
    }

    fn set_selection(&self, selection: Selection, mode: ApplyMode) {
        let selection = {
            let mut state = self.state.lock();
            let selection = selection.clamped(state.content.len());
            state.selection = Some(selection);
            selection
        };
        if mode == ApplyMode::Normal {
            self.emit(EditorEvent::SelectionChanged {
                selection: Some(selection),
                source: ChangeSource::Api,
            });
        }
    }

    fn scroll_offset(&self) -> f64 {
        self.state.lock().scroll
    }

    fn set_scroll_offset(&self, offset: f64) {
        self.state.lock().scroll = offset;
    }

    fn events(&self) -> broadcast::Receiver<EditorEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noteflow_core::{diff, Operation};

    fn text(s: &str) -> OpSequence {
        OpSequence::from_ops([Operation::text(s)])
    }

    #[test]
    fn test_user_typing_emits_user_events() {
        let editor = HeadlessEditor::new();
        let mut events = editor.events();
        editor.type_text(0, "hi");

        assert_eq!(editor.plain_text(), "hi");
        assert_eq!(editor.get_selection(), Some(Selection::caret(2)));
        assert_eq!(
            events.try_recv().unwrap(),
            EditorEvent::ContentChanged {
                source: ChangeSource::User
            }
        );
        assert!(events.try_recv().unwrap().is_user());
    }

    #[test]
    fn test_silent_changes_emit_nothing() {
        let editor = HeadlessEditor::new();
        let mut events = editor.events();
        editor.set_content(text("abc"), ApplyMode::Silent);
        editor.set_selection(Selection::caret(1), ApplyMode::Silent);
        let patch = diff(&text("abc"), &text("abcd"));
        editor.apply_patch(&patch, ApplyMode::Silent).unwrap();

        assert!(events.try_recv().is_err());
        assert_eq!(editor.plain_text(), "abcd");
        assert_eq!(
            editor.stats(),
            EditorStats {
                full_loads: 1,
                patches: 1
            }
        );
    }

    #[test]
    fn test_normal_changes_are_api_sourced() {
        let editor = HeadlessEditor::new();
        let mut events = editor.events();
        editor.set_content(text("abc"), ApplyMode::Normal);
        let event = events.try_recv().unwrap();
        assert_eq!(event.source(), ChangeSource::Api);
        assert!(!event.is_user());
    }

    #[test]
    fn test_selection_is_clamped_to_content() {
        let editor = HeadlessEditor::with_content(text("hello"));
        editor.set_selection(Selection { index: 3, length: 10 }, ApplyMode::Silent);
        assert_eq!(editor.get_selection(), Some(Selection { index: 3, length: 2 }));

        editor.set_content(text("h"), ApplyMode::Silent);
        assert_eq!(editor.get_selection(), Some(Selection { index: 1, length: 0 }));
    }

    #[test]
    fn test_foreign_patch_is_rejected() {
        let editor = HeadlessEditor::with_content(text("short"));
        let patch = diff(&text("a much longer base"), &text("x"));
        assert!(editor.apply_patch(&patch, ApplyMode::Silent).is_err());
        assert_eq!(editor.plain_text(), "short");
    }

    #[test]
    fn test_overlay_markers() {
        let editor = HeadlessEditor::new();
        let marker = CursorMarker {
            owner_id: "bob".into(),
            display_name: "Bob".into(),
            color: "#000",
            range: 0..1,
        };
        editor.draw(&marker);
        assert_eq!(editor.markers(), vec![marker]);
        editor.erase("bob");
        assert!(editor.markers().is_empty());
    }
}

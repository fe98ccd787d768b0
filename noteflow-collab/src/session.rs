//! Realtime sync session between one editor widget and one stored document.
//!
//! A session moves through `Idle -> Attached -> Subscribed -> Detached`.
//! Once subscribed, a single task owns all session state and reacts to:
//!
//! - remote snapshots, applied to the editor as a minimal patch unless local
//!   work is pending,
//! - user edits and selection moves, pushed back on a trailing throttle,
//! - the editing-idle deadline, which releases a held snapshot,
//! - a reconcile tick that ages out remote cursors.
//!
//! Only events with [`ChangeSource::User`] schedule pushes, and remote
//! updates are applied silently, so applying a remote change never echoes
//! back to the store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use noteflow_core::config::SyncConfig;
use noteflow_core::cursor::STALE_AFTER_SECS;
use noteflow_core::{
    diff, from_blocks, to_blocks_with_id, ContentBlock, CursorAnnotation, CursorRegistry, Note,
    NoteEvent, OpSequence,
};
use noteflow_types::UserIdentity;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::editor::{ApplyMode, ChangeSource, EditorEvent, EditorWidget, Selection};
use crate::store::{DocRef, DocumentFields, DocumentStore, DocumentSubscription, StoreError};
use crate::throttle::Throttle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Attached,
    Subscribed,
    Detached,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Attached => "attached",
            SessionState::Subscribed => "subscribed",
            SessionState::Detached => "detached",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("cannot {action} a session that is {from}")]
    InvalidTransition {
        from: SessionState,
        action: &'static str,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("document codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// What happened inside a running session, for status indicators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    RealtimeStarted,
    /// A remote snapshot was merged into the editor.
    RemoteApplied,
    /// A remote snapshot was ignored because local changes are unsaved.
    SnapshotDropped,
    /// A remote snapshot is held until the user stops typing.
    SnapshotDeferred,
    Saved,
    PushFailed(String),
    PushRejected(String),
    Detached,
}

/// Session timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub push_interval: Duration,
    pub editing_idle: Duration,
    pub reconcile_interval: Duration,
    pub cursor_stale: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SessionConfig {
    fn from(sync: &SyncConfig) -> Self {
        Self {
            push_interval: sync.push_interval(),
            editing_idle: sync.editing_idle(),
            reconcile_interval: sync.reconcile_interval(),
            cursor_stale: sync.cursor_stale(),
        }
    }
}

/// Flags the session task publishes for outside readers.
#[derive(Debug, Default)]
pub struct SessionStatus {
    dirty: AtomicBool,
    editing: AtomicBool,
}

impl SessionStatus {
    /// Local edits not yet accepted by the store.
    pub fn has_local_changes(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// The user edited within the idle window.
    pub fn is_editing(&self) -> bool {
        self.editing.load(Ordering::Acquire)
    }

    fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    fn set_editing(&self, editing: bool) {
        self.editing.store(editing, Ordering::Release);
    }
}

struct Worker {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct SyncSession {
    store: Arc<dyn DocumentStore>,
    identity: UserIdentity,
    config: SessionConfig,
    state: SessionState,
    doc_ref: Option<DocRef>,
    status: Arc<SessionStatus>,
    notices: broadcast::Sender<SessionNotice>,
    worker: Option<Worker>,
}

impl SyncSession {
    pub fn new(store: Arc<dyn DocumentStore>, identity: UserIdentity, config: SessionConfig) -> Self {
        let (notices, _) = broadcast::channel(64);
        Self {
            store,
            identity,
            config,
            state: SessionState::Idle,
            doc_ref: None,
            status: Arc::new(SessionStatus::default()),
            notices,
            worker: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn doc_ref(&self) -> Option<&DocRef> {
        self.doc_ref.as_ref()
    }

    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    pub fn status(&self) -> Arc<SessionStatus> {
        self.status.clone()
    }

    pub fn has_local_changes(&self) -> bool {
        self.status.has_local_changes()
    }

    pub fn is_editing(&self) -> bool {
        self.status.is_editing()
    }

    pub fn notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    fn transition_error(&self, action: &'static str) -> SessionError {
        SessionError::InvalidTransition {
            from: self.state,
            action,
        }
    }

    /// Bind the session to a document.
    pub fn attach(&mut self, doc_ref: DocRef) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(self.transition_error("attach"));
        }
        debug!(doc = %doc_ref, "session attached");
        self.doc_ref = Some(doc_ref);
        self.state = SessionState::Attached;
        Ok(())
    }

    /// Bind the session to a note's live document. A note that has not been
    /// saved yet has nothing to sync, and the session stays idle.
    pub fn attach_note(&mut self, note: &Note) -> Result<(), SessionError> {
        if !note.id.is_assigned() {
            debug!("note has no id yet, realtime sync not started");
            return Ok(());
        }
        self.attach(DocRef::note(&note.id))
    }

    /// Load the document into `editor` and start the session task.
    pub async fn subscribe(&mut self, editor: Arc<dyn EditorWidget>) -> Result<(), SessionError> {
        if self.state != SessionState::Attached {
            return Err(self.transition_error("subscribe"));
        }
        let Some(doc_ref) = self.doc_ref.clone() else {
            return Err(self.transition_error("subscribe"));
        };

        let initial = self.store.get_document(&doc_ref).await?;
        let (initial_content, block_id) = match &initial {
            Some(fields) => (
                decode_content(fields)?.unwrap_or_default(),
                text_block_id(fields),
            ),
            None => (OpSequence::new(), None),
        };
        if !initial_content.is_empty() {
            editor.set_content(initial_content.clone(), ApplyMode::Silent);
        }

        // Subscribe to the editor before the store so no user event is lost
        // between the two.
        let events = editor.events();
        let subscription = self.store.subscribe(&doc_ref).await?;

        let stale_after = chrono::Duration::from_std(self.config.cursor_stale)
            .unwrap_or_else(|_| chrono::Duration::seconds(STALE_AFTER_SECS));
        let session_loop = SessionLoop {
            store: self.store.clone(),
            doc_ref: doc_ref.clone(),
            identity: self.identity.clone(),
            config: self.config,
            editor,
            status: self.status.clone(),
            notices: self.notices.clone(),
            registry: CursorRegistry::new(self.identity.id.clone()).with_stale_after(stale_after),
            last_known: initial_content,
            block_id: block_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            throttle: Throttle::new(self.config.push_interval),
            pending_cursor: None,
            editing_until: None,
            held: None,
        };

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(session_loop.run(subscription, events, shutdown_rx));
        self.worker = Some(Worker { shutdown, task });
        self.state = SessionState::Subscribed;

        info!(doc = %doc_ref, user = %self.identity.id, "realtime session started");
        let _ = self.notices.send(SessionNotice::RealtimeStarted);
        Ok(())
    }

    /// Like [`SyncSession::subscribe`], also telling the note's listeners.
    pub async fn subscribe_note(
        &mut self,
        note: &Note,
        editor: Arc<dyn EditorWidget>,
    ) -> Result<(), SessionError> {
        self.subscribe(editor).await?;
        note.emit(NoteEvent::RealtimeStarted);
        Ok(())
    }

    /// Stop the session. Remote cursors are erased and no further snapshot
    /// reaches the editor. A push already in flight is allowed to finish.
    pub async fn detach(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Detached {
            return Err(self.transition_error("detach"));
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown.send(());
            if let Err(err) = worker.task.await {
                warn!(?err, "session task ended abnormally");
            }
        }
        self.state = SessionState::Detached;
        self.status.set_editing(false);
        if let Some(doc_ref) = &self.doc_ref {
            info!(doc = %doc_ref, "realtime session detached");
        }
        let _ = self.notices.send(SessionNotice::Detached);
        Ok(())
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown.send(());
        }
    }
}

/// Editor content stored on a document, if any. Accepts the block list and
/// the bare operation list older clients wrote.
fn decode_content(fields: &DocumentFields) -> Result<Option<OpSequence>, SessionError> {
    let Some(content) = fields.get("content") else {
        return Ok(None);
    };
    match serde_json::from_value::<Vec<ContentBlock>>(content.clone()) {
        Ok(blocks) => Ok(Some(from_blocks(&blocks))),
        Err(block_err) => match OpSequence::from_json(content) {
            Ok(seq) => Ok(Some(seq)),
            Err(_) => Err(SessionError::Codec(block_err)),
        },
    }
}

fn text_block_id(fields: &DocumentFields) -> Option<String> {
    let blocks: Vec<ContentBlock> = serde_json::from_value(fields.get("content")?.clone()).ok()?;
    blocks
        .iter()
        .find_map(ContentBlock::as_text)
        .map(|block| block.id.clone())
}

fn decode_cursors(fields: &DocumentFields) -> Vec<(String, CursorAnnotation)> {
    let Some(Value::Object(cursors)) = fields.get("cursors") else {
        return Vec::new();
    };
    cursors
        .iter()
        .filter_map(|(owner, raw)| {
            match serde_json::from_value::<CursorAnnotation>(raw.clone()) {
                Ok(annotation) => Some((owner.clone(), annotation)),
                Err(err) => {
                    debug!(%owner, ?err, "skipping malformed cursor");
                    None
                }
            }
        })
        .collect()
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct SessionLoop {
    store: Arc<dyn DocumentStore>,
    doc_ref: DocRef,
    identity: UserIdentity,
    config: SessionConfig,
    editor: Arc<dyn EditorWidget>,
    status: Arc<SessionStatus>,
    notices: broadcast::Sender<SessionNotice>,
    registry: CursorRegistry,
    /// Content last read from or accepted by the store.
    last_known: OpSequence,
    block_id: String,
    throttle: Throttle,
    pending_cursor: Option<Selection>,
    editing_until: Option<Instant>,
    held: Option<DocumentFields>,
}

impl SessionLoop {
    async fn run(
        mut self,
        mut subscription: DocumentSubscription,
        mut events: broadcast::Receiver<EditorEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        let mut reconcile = tokio::time::interval(self.config.reconcile_interval);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let push_at = self.throttle.deadline();
            let idle_at = self.editing_until;

            tokio::select! {
                biased;

                _ = &mut shutdown => break,

                event = events.recv() => match event {
                    Ok(event) => self.on_editor_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Unknown what was missed; assume it was typing.
                        debug!(skipped, "editor events lagged");
                        self.on_local_edit();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("editor went away");
                        break;
                    }
                },

                snapshot = subscription.next() => match snapshot {
                    Some(snapshot) => self.on_snapshot(snapshot.fields),
                    None => {
                        warn!(doc = %self.doc_ref, "document subscription closed");
                        break;
                    }
                },

                _ = sleep_until_opt(push_at) => self.push().await,

                _ = sleep_until_opt(idle_at) => self.on_editing_idle(),

                _ = reconcile.tick() => self.reconcile(),
            }
        }

        self.registry.clear(&*self.editor);
        debug!(doc = %self.doc_ref, "session loop stopped");
    }

    fn notify(&self, notice: SessionNotice) {
        let _ = self.notices.send(notice);
    }

    fn on_editor_event(&mut self, event: EditorEvent) {
        if event.source() != ChangeSource::User {
            return;
        }
        match event {
            EditorEvent::ContentChanged { .. } => self.on_local_edit(),
            EditorEvent::SelectionChanged {
                selection: Some(selection),
                ..
            } => {
                self.pending_cursor = Some(selection);
                self.throttle.schedule(Instant::now());
            }
            EditorEvent::SelectionChanged { selection: None, .. } => {}
        }
    }

    fn on_local_edit(&mut self) {
        let now = Instant::now();
        self.status.set_dirty(true);
        self.status.set_editing(true);
        self.editing_until = Some(now + self.config.editing_idle);
        self.throttle.schedule(now);
    }

    fn on_editing_idle(&mut self) {
        self.editing_until = None;
        self.status.set_editing(false);
        if let Some(fields) = self.held.take() {
            if self.status.has_local_changes() {
                debug!("dropping held snapshot, local changes pending");
                self.notify(SessionNotice::SnapshotDropped);
            } else {
                self.apply_remote(fields);
            }
        }
    }

    fn on_snapshot(&mut self, fields: Option<DocumentFields>) {
        let Some(fields) = fields else {
            debug!(doc = %self.doc_ref, "document does not exist yet");
            return;
        };
        if self.status.has_local_changes() {
            debug!(doc = %self.doc_ref, "local changes pending, ignoring remote snapshot");
            self.notify(SessionNotice::SnapshotDropped);
            return;
        }
        if self.status.is_editing() {
            self.upsert_cursors(&fields);
            self.reconcile();
            self.held = Some(fields);
            self.notify(SessionNotice::SnapshotDeferred);
            return;
        }
        self.apply_remote(fields);
    }

    fn apply_remote(&mut self, fields: DocumentFields) {
        self.upsert_cursors(&fields);
        match decode_content(&fields) {
            Ok(Some(remote)) => self.apply_content(remote),
            Ok(None) => {}
            Err(err) => warn!(doc = %self.doc_ref, %err, "unreadable remote content"),
        }
        self.reconcile();
    }

    fn apply_content(&mut self, remote: OpSequence) {
        let patch = diff(&self.last_known, &remote);
        if patch.is_noop() {
            return;
        }

        if patch.replaces_empty() {
            self.editor.set_content(remote.clone(), ApplyMode::Silent);
        } else {
            let selection = self.editor.get_selection();
            let scroll = self.editor.scroll_offset();
            if let Err(err) = self.editor.apply_patch(&patch, ApplyMode::Silent) {
                warn!(%err, "editor diverged from last known content, reloading");
                self.editor.set_content(remote.clone(), ApplyMode::Silent);
            }
            if let Some(selection) = selection {
                self.editor.set_selection(selection, ApplyMode::Silent);
            }
            self.editor.set_scroll_offset(scroll);
        }

        self.last_known = remote;
        self.notify(SessionNotice::RemoteApplied);
    }

    fn upsert_cursors(&mut self, fields: &DocumentFields) {
        for (owner, annotation) in decode_cursors(fields) {
            self.registry.upsert(&owner, annotation);
        }
    }

    fn reconcile(&mut self) {
        self.registry.reconcile(Utc::now(), &*self.editor);
    }

    async fn push(&mut self) {
        if !self.throttle.take_due(Instant::now()) {
            return;
        }
        let dirty = self.status.has_local_changes();
        let cursor = self.pending_cursor.take();
        if !dirty && cursor.is_none() {
            return;
        }

        let mut fields = Map::new();
        let content = self.editor.get_content();
        if dirty {
            match serde_json::to_value(to_blocks_with_id(&content, &self.block_id)) {
                Ok(blocks) => {
                    fields.insert("content".into(), blocks);
                }
                Err(err) => {
                    warn!(%err, "failed to encode content");
                    return;
                }
            }
        }
        if let Some(selection) = cursor {
            let annotation = CursorAnnotation {
                owner_id: self.identity.id.clone(),
                display_name: self.identity.display_name.clone(),
                selection_start: selection.index,
                selection_length: selection.length,
                updated_at: Utc::now(),
            };
            match serde_json::to_value(annotation) {
                Ok(value) => {
                    let mut cursors = Map::new();
                    cursors.insert(self.identity.id.clone(), value);
                    fields.insert("cursors".into(), Value::Object(cursors));
                }
                Err(err) => warn!(%err, "failed to encode cursor"),
            }
        }

        match self.store.set_document(&self.doc_ref, fields, true).await {
            Ok(()) => {
                if dirty {
                    self.status.set_dirty(false);
                    self.last_known = content;
                }
                debug!(doc = %self.doc_ref, content = dirty, "pushed local changes");
                self.notify(SessionNotice::Saved);
            }
            Err(err @ StoreError::PermissionDenied { .. }) => {
                warn!(doc = %self.doc_ref, %err, "push rejected");
                self.notify(SessionNotice::PushRejected(err.to_string()));
            }
            Err(err) => {
                warn!(doc = %self.doc_ref, %err, "push failed, retrying on next change");
                self.notify(SessionNotice::PushFailed(err.to_string()));
            }
        }
    }
}

/// Live cursors keyed by owner, as currently stored on a document.
pub fn stored_cursors(fields: &DocumentFields) -> HashMap<String, CursorAnnotation> {
    decode_cursors(fields).into_iter().collect()
}

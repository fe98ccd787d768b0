//! Document store: keyed JSON documents with merge writes and live
//! subscriptions.
//!
//! [`MemoryDocumentStore`] keeps one room per document. A room holds the
//! latest fields and a broadcast channel; every accepted write republishes
//! the full document to all subscribers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use noteflow_core::note::{can_edit, can_view};
use noteflow_types::{NoteId, Permissions};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

pub type DocumentFields = Map<String, Value>;

/// Path of a document, e.g. `notes/abc123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocRef(String);

impl DocRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into().trim_matches('/').to_string())
    }

    /// Where a note's live document lives.
    pub fn note(id: &NoteId) -> Self {
        Self(format!("notes/{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full state of a document after a write. `fields` is `None` when the
/// document does not exist.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub doc_ref: DocRef,
    pub fields: Option<DocumentFields>,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{user} may not write {doc}")]
    PermissionDenied { user: String, doc: DocRef },

    #[error("{user} may not read {doc}")]
    ReadDenied { user: String, doc: DocRef },

    #[error("document store unavailable: {0}")]
    Unavailable(String),

    #[error("document codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Live feed of one document. Yields the state at subscription time first,
/// then one snapshot per accepted write. Dropping it unsubscribes.
pub struct DocumentSubscription {
    initial: Option<DocumentSnapshot>,
    rx: broadcast::Receiver<DocumentSnapshot>,
}

impl DocumentSubscription {
    pub fn new(initial: DocumentSnapshot, rx: broadcast::Receiver<DocumentSnapshot>) -> Self {
        Self {
            initial: Some(initial),
            rx,
        }
    }

    /// Next snapshot, or `None` once the store side has gone away.
    ///
    /// Cancel safe. If this subscriber fell behind, intermediate snapshots
    /// are skipped; each snapshot carries the whole document.
    pub async fn next(&mut self) -> Option<DocumentSnapshot> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "subscriber lagged, skipping to latest");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current fields, or `None` if the document does not exist.
    async fn get_document(&self, doc: &DocRef) -> Result<Option<DocumentFields>, StoreError>;

    /// Write `fields`. With `merge`, nested objects are merged key by key
    /// into the stored document; otherwise the document is replaced.
    async fn set_document(
        &self,
        doc: &DocRef,
        fields: DocumentFields,
        merge: bool,
    ) -> Result<(), StoreError>;

    async fn subscribe(&self, doc: &DocRef) -> Result<DocumentSubscription, StoreError>;
}

/// Merge `patch` into `target`. Objects merge recursively; every other value
/// (arrays included) replaces what was there.
pub fn merge_fields(target: &mut DocumentFields, patch: DocumentFields) {
    for (key, value) in patch {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_fields(existing, incoming)
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Top-level fields that only the owner may set.
pub const SHARING_FIELDS: [&str; 2] = ["owner", "permissions"];

/// Owner and sharing state of a stored document, if it has an owner.
/// Documents without an `owner` field are open.
fn access_of(fields: &DocumentFields) -> Option<(&str, Permissions)> {
    let owner = fields.get("owner").and_then(Value::as_str)?;
    let permissions = match fields.get("permissions") {
        Some(value) => match serde_json::from_value::<Permissions>(value.clone()) {
            Ok(permissions) => permissions,
            Err(err) => {
                warn!(?err, "unreadable permissions, treating as owner-only");
                Permissions::default()
            }
        },
        None => Permissions::default(),
    };
    Some((owner, permissions))
}

/// Whether `user` may apply `incoming` to a document currently holding
/// `current`. Editors may merge content but neither replace the document
/// nor touch its sharing fields.
fn writable_by(
    current: &DocumentFields,
    incoming: &DocumentFields,
    merge: bool,
    user: &str,
) -> bool {
    let Some((owner, permissions)) = access_of(current) else {
        return true;
    };
    if owner == user {
        return true;
    }
    can_edit(owner, &permissions, user)
        && merge
        && !SHARING_FIELDS.iter().any(|field| incoming.contains_key(*field))
}

fn readable_by(current: &DocumentFields, user: &str) -> bool {
    match access_of(current) {
        Some((owner, permissions)) => can_view(owner, &permissions, user),
        None => true,
    }
}

struct Room {
    tx: broadcast::Sender<DocumentSnapshot>,
    latest: RwLock<Option<DocumentFields>>,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self {
            tx,
            latest: RwLock::new(None),
        }
    }
}

#[derive(Default)]
struct Hub {
    rooms: RwLock<HashMap<DocRef, Arc<Room>>>,
}

impl Hub {
    async fn room(&self, doc: &DocRef) -> Arc<Room> {
        if let Some(room) = self.rooms.read().await.get(doc).cloned() {
            return room;
        }

        let mut guard = self.rooms.write().await;
        guard
            .entry(doc.clone())
            .or_insert_with(|| Arc::new(Room::new()))
            .clone()
    }
}

/// In-process document store.
///
/// Handles are cheap to clone and share one set of rooms. A handle made with
/// [`MemoryDocumentStore::as_user`] reads and writes on behalf of that user
/// and is subject to the document's permissions; the root handle is trusted.
#[derive(Clone, Default)]
pub struct MemoryDocumentStore {
    hub: Arc<Hub>,
    writer: Option<String>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle sharing this store that writes as `user_id`.
    pub fn as_user(&self, user_id: impl Into<String>) -> Self {
        Self {
            hub: self.hub.clone(),
            writer: Some(user_id.into()),
        }
    }

    pub fn writer(&self) -> Option<&str> {
        self.writer.as_deref()
    }

    fn check_read(
        &self,
        doc: &DocRef,
        current: Option<&DocumentFields>,
    ) -> Result<(), StoreError> {
        match (self.writer.as_deref(), current) {
            (Some(user), Some(current)) if !readable_by(current, user) => {
                Err(StoreError::ReadDenied {
                    user: user.to_string(),
                    doc: doc.clone(),
                })
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_document(&self, doc: &DocRef) -> Result<Option<DocumentFields>, StoreError> {
        let room = self.hub.room(doc).await;
        let latest = room.latest.read().await.clone();
        self.check_read(doc, latest.as_ref())?;
        Ok(latest)
    }

    async fn set_document(
        &self,
        doc: &DocRef,
        fields: DocumentFields,
        merge: bool,
    ) -> Result<(), StoreError> {
        let room = self.hub.room(doc).await;
        // Held across the send so subscribers see writes in commit order.
        let mut latest = room.latest.write().await;

        if let (Some(user), Some(current)) = (self.writer.as_deref(), (*latest).as_ref()) {
            if !writable_by(current, &fields, merge, user) {
                return Err(StoreError::PermissionDenied {
                    user: user.to_string(),
                    doc: doc.clone(),
                });
            }
        }

        let next = match (latest.take(), merge) {
            (Some(mut current), true) => {
                merge_fields(&mut current, fields);
                current
            }
            _ => fields,
        };
        *latest = Some(next.clone());

        debug!(doc = %doc, writer = ?self.writer, "document written");
        // No subscribers is fine.
        let _ = room.tx.send(DocumentSnapshot {
            doc_ref: doc.clone(),
            fields: Some(next),
        });
        Ok(())
    }

    async fn subscribe(&self, doc: &DocRef) -> Result<DocumentSubscription, StoreError> {
        let room = self.hub.room(doc).await;
        // Subscribe under the read lock so no write slips between the
        // snapshot and the receiver.
        let latest = room.latest.read().await;
        self.check_read(doc, (*latest).as_ref())?;
        let rx = room.tx.subscribe();
        let initial = DocumentSnapshot {
            doc_ref: doc.clone(),
            fields: latest.clone(),
        };
        Ok(DocumentSubscription::new(initial, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> DocumentFields {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_merge_fields_nested() {
        let mut target = fields(json!({
            "title": "a",
            "cursors": {"alice": {"selectionStart": 1}},
            "content": [1, 2, 3]
        }));
        merge_fields(
            &mut target,
            fields(json!({
                "cursors": {"bob": {"selectionStart": 4}},
                "content": [9]
            })),
        );
        assert_eq!(
            Value::Object(target),
            json!({
                "title": "a",
                "cursors": {
                    "alice": {"selectionStart": 1},
                    "bob": {"selectionStart": 4}
                },
                "content": [9]
            })
        );
    }

    #[test]
    fn test_doc_ref_paths() {
        assert_eq!(DocRef::note(&NoteId::new("n1")).as_str(), "notes/n1");
        assert_eq!(DocRef::new("/notes/n1/").as_str(), "notes/n1");
    }

    #[tokio::test]
    async fn test_get_missing_document() {
        let store = MemoryDocumentStore::new();
        let doc = DocRef::new("notes/missing");
        assert!(store.get_document(&doc).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_vs_merge() {
        let store = MemoryDocumentStore::new();
        let doc = DocRef::new("notes/a");
        store
            .set_document(&doc, fields(json!({"x": 1, "y": 2})), false)
            .await
            .unwrap();
        store
            .set_document(&doc, fields(json!({"y": 3})), true)
            .await
            .unwrap();
        assert_eq!(
            store.get_document(&doc).await.unwrap(),
            Some(fields(json!({"x": 1, "y": 3})))
        );

        store
            .set_document(&doc, fields(json!({"z": 0})), false)
            .await
            .unwrap();
        assert_eq!(
            store.get_document(&doc).await.unwrap(),
            Some(fields(json!({"z": 0})))
        );
    }

    #[tokio::test]
    async fn test_subscription_delivers_current_then_updates() {
        let store = MemoryDocumentStore::new();
        let doc = DocRef::new("notes/a");
        store
            .set_document(&doc, fields(json!({"v": 1})), false)
            .await
            .unwrap();

        let mut sub = store.subscribe(&doc).await.unwrap();
        store
            .set_document(&doc, fields(json!({"v": 2})), true)
            .await
            .unwrap();

        let first = sub.next().await.unwrap();
        assert_eq!(first.fields, Some(fields(json!({"v": 1}))));
        let second = sub.next().await.unwrap();
        assert_eq!(second.fields, Some(fields(json!({"v": 2}))));
    }

    #[tokio::test]
    async fn test_subscription_to_missing_document() {
        let store = MemoryDocumentStore::new();
        let mut sub = store.subscribe(&DocRef::new("notes/none")).await.unwrap();
        assert_eq!(sub.next().await.unwrap().fields, None);
    }

    #[tokio::test]
    async fn test_write_permissions() {
        let store = MemoryDocumentStore::new();
        let doc = DocRef::new("notes/shared");
        store
            .set_document(
                &doc,
                fields(json!({
                    "owner": "owner",
                    "permissions": {"global": null, "editor": "edit", "viewer": "view"}
                })),
                false,
            )
            .await
            .unwrap();

        let update = || fields(json!({"title": "changed"}));
        store.as_user("owner").set_document(&doc, update(), true).await.unwrap();
        store.as_user("editor").set_document(&doc, update(), true).await.unwrap();

        let err = store
            .as_user("viewer")
            .set_document(&doc, update(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied { ref user, .. } if user == "viewer"));

        let err = store
            .as_user("stranger")
            .set_document(&doc, update(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn test_global_edit_grant() {
        let store = MemoryDocumentStore::new();
        let doc = DocRef::new("notes/public");
        store
            .set_document(
                &doc,
                fields(json!({"owner": "owner", "permissions": {"global": "edit"}})),
                false,
            )
            .await
            .unwrap();
        store
            .as_user("anyone")
            .set_document(&doc, fields(json!({"title": "hi"})), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejected_write_is_not_published() {
        let store = MemoryDocumentStore::new();
        let doc = DocRef::new("notes/private");
        store
            .set_document(&doc, fields(json!({"owner": "owner"})), false)
            .await
            .unwrap();
        let mut sub = store.subscribe(&doc).await.unwrap();
        let _ = sub.next().await;

        assert!(store
            .as_user("guest")
            .set_document(&doc, fields(json!({"title": "x"})), true)
            .await
            .is_err());
        store
            .set_document(&doc, fields(json!({"title": "ok"})), true)
            .await
            .unwrap();

        let next = sub.next().await.unwrap().fields.unwrap();
        assert_eq!(next.get("title"), Some(&json!("ok")));
    }

    async fn shared_doc(store: &MemoryDocumentStore) -> DocRef {
        let doc = DocRef::new("notes/shared");
        store
            .set_document(
                &doc,
                fields(json!({
                    "owner": "owner",
                    "permissions": {"editor": "edit", "viewer": "view"},
                    "title": "t"
                })),
                false,
            )
            .await
            .unwrap();
        doc
    }

    #[tokio::test]
    async fn test_only_owner_changes_sharing() {
        let store = MemoryDocumentStore::new();
        let doc = shared_doc(&store).await;
        let editor = store.as_user("editor");

        let takeover = fields(json!({"owner": "editor", "permissions": {"owner": null}}));
        let err = editor.set_document(&doc, takeover, true).await.unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied { ref user, .. } if user == "editor"));

        let grant = fields(json!({"permissions": {"friend": "edit"}}));
        assert!(editor.set_document(&doc, grant, true).await.is_err());

        // Replacing would drop the owner field altogether.
        let wipe = fields(json!({"title": "mine now"}));
        assert!(editor.set_document(&doc, wipe, false).await.is_err());

        let stored = store.get_document(&doc).await.unwrap().unwrap();
        assert_eq!(stored.get("owner"), Some(&json!("owner")));
        assert_eq!(stored.get("title"), Some(&json!("t")));

        store
            .as_user("owner")
            .set_document(&doc, fields(json!({"permissions": {"friend": "edit"}})), true)
            .await
            .unwrap();
        store
            .as_user("friend")
            .set_document(&doc, fields(json!({"title": "from friend"})), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_read_permissions() {
        let store = MemoryDocumentStore::new();
        let doc = shared_doc(&store).await;

        for user in ["owner", "editor", "viewer"] {
            assert!(store.as_user(user).get_document(&doc).await.unwrap().is_some());
            assert!(store.as_user(user).subscribe(&doc).await.is_ok());
        }

        let err = store.as_user("stranger").get_document(&doc).await.unwrap_err();
        assert!(matches!(err, StoreError::ReadDenied { ref user, .. } if user == "stranger"));
        assert!(matches!(
            store.as_user("stranger").subscribe(&doc).await,
            Err(StoreError::ReadDenied { .. })
        ));

        // Missing documents are readable by anyone.
        let missing = DocRef::new("notes/none");
        assert!(store.as_user("stranger").get_document(&missing).await.unwrap().is_none());
    }
}
